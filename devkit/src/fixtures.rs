/*!
Fixture builders for XenAPI payloads

- `RrdXmlBuilder` produces `rrd_updates` documents (meta + legend + rows)
- `XmlRpcResponse` produces XenAPI-style XML-RPC method responses
*/

/// Builds an `rrd_updates` XML document.
///
/// Rows are written in the order they are added; XenServer sends them newest
/// first, so add the most recent sample first unless a test wants otherwise.
#[derive(Debug, Clone)]
pub struct RrdXmlBuilder {
    start: i64,
    step: i64,
    end: i64,
    legend: Vec<String>,
    rows: Vec<(String, Vec<String>)>,
    declared_rows: Option<usize>,
    declared_columns: Option<usize>,
}

impl RrdXmlBuilder {
    pub fn new(start: i64, step: i64, end: i64) -> Self {
        Self {
            start,
            step,
            end,
            legend: Vec::new(),
            rows: Vec::new(),
            declared_rows: None,
            declared_columns: None,
        }
    }

    /// Add a legend entry, e.g. `AVERAGE:vm:<uuid>:cpu0`
    pub fn column(mut self, entry: &str) -> Self {
        self.legend.push(entry.to_string());
        self
    }

    /// Shorthand for `AVERAGE:host:<uuid>:<param>`
    pub fn host_column(self, uuid: &str, param: &str) -> Self {
        self.column(&format!("AVERAGE:host:{}:{}", uuid, param))
    }

    /// Shorthand for `AVERAGE:vm:<uuid>:<param>`
    pub fn vm_column(self, uuid: &str, param: &str) -> Self {
        self.column(&format!("AVERAGE:vm:{}:{}", uuid, param))
    }

    pub fn row(mut self, timestamp: i64, values: &[&str]) -> Self {
        self.rows.push((
            timestamp.to_string(),
            values.iter().map(|v| v.to_string()).collect(),
        ));
        self
    }

    /// Row whose timestamp cell is raw text (for malformed-cell tests)
    pub fn raw_row(mut self, timestamp: &str, values: &[&str]) -> Self {
        self.rows.push((
            timestamp.to_string(),
            values.iter().map(|v| v.to_string()).collect(),
        ));
        self
    }

    /// Override the `<rows>` metadata instead of counting the added rows
    pub fn declare_rows(mut self, rows: usize) -> Self {
        self.declared_rows = Some(rows);
        self
    }

    /// Override the `<columns>` metadata instead of counting the legend
    pub fn declare_columns(mut self, columns: usize) -> Self {
        self.declared_columns = Some(columns);
        self
    }

    pub fn build(&self) -> String {
        let mut xml = String::from("<xport><meta>");
        xml.push_str(&format!("<start>{}</start>", self.start));
        xml.push_str(&format!("<step>{}</step>", self.step));
        xml.push_str(&format!("<end>{}</end>", self.end));
        xml.push_str(&format!(
            "<rows>{}</rows>",
            self.declared_rows.unwrap_or(self.rows.len())
        ));
        xml.push_str(&format!(
            "<columns>{}</columns>",
            self.declared_columns.unwrap_or(self.legend.len())
        ));
        xml.push_str("<legend>");
        for entry in &self.legend {
            xml.push_str(&format!("<entry>{}</entry>", entry));
        }
        xml.push_str("</legend></meta><data>");
        for (timestamp, values) in &self.rows {
            xml.push_str(&format!("<row><t>{}</t>", timestamp));
            for value in values {
                xml.push_str(&format!("<v>{}</v>", value));
            }
            xml.push_str("</row>");
        }
        xml.push_str("</data></xport>");
        xml
    }
}

/// XenAPI XML-RPC response bodies
pub struct XmlRpcResponse;

impl XmlRpcResponse {
    /// `{Status: Success, Value: <value>}` where `value_xml` is the inner
    /// content of a `<value>` element
    pub fn success(value_xml: &str) -> String {
        Self::wrap(&format!(
            "<struct>{}{}</struct>",
            Self::member("Status", "Success"),
            Self::member("Value", value_xml)
        ))
    }

    /// `{Status: Failure, ErrorDescription: [...]}`
    pub fn failure(description: &[&str]) -> String {
        let items: Vec<String> = description.iter().map(|d| Self::string(d)).collect();
        Self::wrap(&format!(
            "<struct>{}{}</struct>",
            Self::member("Status", "Failure"),
            Self::member("ErrorDescription", &Self::array(&items))
        ))
    }

    pub fn string(value: &str) -> String {
        format!("<string>{}</string>", value)
    }

    pub fn boolean(value: bool) -> String {
        format!("<boolean>{}</boolean>", if value { 1 } else { 0 })
    }

    pub fn array(items: &[String]) -> String {
        let mut xml = String::from("<array><data>");
        for item in items {
            xml.push_str(&format!("<value>{}</value>", item));
        }
        xml.push_str("</data></array>");
        xml
    }

    /// Struct from `(name, inner value xml)` pairs
    pub fn structure(members: &[(&str, String)]) -> String {
        let mut xml = String::from("<struct>");
        for (name, value) in members {
            xml.push_str(&Self::member(name, value));
        }
        xml.push_str("</struct>");
        xml
    }

    fn member(name: &str, value_xml: &str) -> String {
        format!("<member><name>{}</name><value>{}</value></member>", name, value_xml)
    }

    fn wrap(value_xml: &str) -> String {
        format!(
            "<?xml version=\"1.0\"?><methodResponse><params><param><value>{}</value></param></params></methodResponse>",
            value_xml
        )
    }
}
