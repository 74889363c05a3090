//! Minimal XenAPI XML-RPC client
//!
//! Covers what the collector needs to open a session and name entities:
//! login/logout, the host record and every VM record. Results come wrapped
//! in the XenAPI envelope `{Status, Value}` / `{Status, ErrorDescription}`.

use quick_xml::escape::escape;
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

const API_VERSION: &str = "1.0";
const ORIGINATOR: &str = "graphite-plugins";
const CALL_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum XapiError {
    #[error("XenAPI request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("invalid XenAPI response to {method}: {reason}")]
    Protocol { method: String, reason: String },
    #[error("XenAPI call {method} failed: {}", .description.join(" "))]
    Failure {
        method: String,
        description: Vec<String>,
    },
}

impl XapiError {
    fn protocol(method: &str, reason: impl Into<String>) -> Self {
        XapiError::Protocol {
            method: method.to_string(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum XmlRpcValue {
    String(String),
    Int(i64),
    Boolean(bool),
    Double(f64),
    DateTime(String),
    Array(Vec<XmlRpcValue>),
    Struct(BTreeMap<String, XmlRpcValue>),
    Nil,
}

impl XmlRpcValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            XmlRpcValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            XmlRpcValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[XmlRpcValue]> {
        match self {
            XmlRpcValue::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_struct(&self) -> Option<&BTreeMap<String, XmlRpcValue>> {
        match self {
            XmlRpcValue::Struct(members) => Some(members),
            _ => None,
        }
    }

    pub fn member(&self, name: &str) -> Option<&XmlRpcValue> {
        self.as_struct().and_then(|m| m.get(name))
    }
}

// Wire shapes for serde; converted into XmlRpcValue right after decoding.

#[derive(Debug, Deserialize)]
struct MethodResponseXml {
    params: Option<ParamsXml>,
    fault: Option<FaultXml>,
}

#[derive(Debug, Deserialize)]
struct ParamsXml {
    param: ParamXml,
}

#[derive(Debug, Deserialize)]
struct ParamXml {
    value: ValueXml,
}

#[derive(Debug, Deserialize)]
struct FaultXml {
    value: ValueXml,
}

#[derive(Debug, Deserialize)]
struct ValueXml {
    #[serde(rename = "$value", default)]
    kind: Option<KindXml>,
}

#[derive(Debug, Deserialize)]
enum KindXml {
    #[serde(rename = "string")]
    String(String),
    #[serde(rename = "int")]
    Int(i64),
    #[serde(rename = "i4")]
    I4(i64),
    #[serde(rename = "i8")]
    I8(i64),
    #[serde(rename = "boolean")]
    Boolean(String),
    #[serde(rename = "double")]
    Double(f64),
    #[serde(rename = "dateTime.iso8601")]
    DateTime(String),
    #[serde(rename = "array")]
    Array(ArrayXml),
    #[serde(rename = "struct")]
    Struct(StructXml),
    #[serde(rename = "nil")]
    Nil,
    #[serde(rename = "$text")]
    Text(String),
}

#[derive(Debug, Default, Deserialize)]
struct ArrayXml {
    #[serde(default)]
    data: ArrayDataXml,
}

#[derive(Debug, Default, Deserialize)]
struct ArrayDataXml {
    #[serde(default)]
    value: Vec<ValueXml>,
}

#[derive(Debug, Default, Deserialize)]
struct StructXml {
    #[serde(default)]
    member: Vec<MemberXml>,
}

#[derive(Debug, Deserialize)]
struct MemberXml {
    name: String,
    value: ValueXml,
}

impl From<ValueXml> for XmlRpcValue {
    fn from(value: ValueXml) -> Self {
        match value.kind {
            None => XmlRpcValue::String(String::new()),
            Some(KindXml::String(s)) | Some(KindXml::Text(s)) => XmlRpcValue::String(s),
            Some(KindXml::Int(i)) | Some(KindXml::I4(i)) | Some(KindXml::I8(i)) => XmlRpcValue::Int(i),
            Some(KindXml::Boolean(b)) => XmlRpcValue::Boolean(b.trim() == "1"),
            Some(KindXml::Double(d)) => XmlRpcValue::Double(d),
            Some(KindXml::DateTime(d)) => XmlRpcValue::DateTime(d),
            Some(KindXml::Array(a)) => XmlRpcValue::Array(a.data.value.into_iter().map(Into::into).collect()),
            Some(KindXml::Struct(s)) => XmlRpcValue::Struct(
                s.member
                    .into_iter()
                    .map(|m| (m.name, XmlRpcValue::from(m.value)))
                    .collect(),
            ),
            Some(KindXml::Nil) => XmlRpcValue::Nil,
        }
    }
}

/// `methodCall` body; every XenAPI argument used here is a string
pub fn encode_call(method: &str, params: &[&str]) -> String {
    let mut xml = format!(
        "<?xml version=\"1.0\"?><methodCall><methodName>{}</methodName><params>",
        escape(method)
    );
    for param in params {
        xml.push_str(&format!(
            "<param><value><string>{}</string></value></param>",
            escape(*param)
        ));
    }
    xml.push_str("</params></methodCall>");
    xml
}

/// Decode a `methodResponse` and unwrap the XenAPI envelope
pub fn decode_response(method: &str, body: &str) -> Result<XmlRpcValue, XapiError> {
    let response: MethodResponseXml =
        quick_xml::de::from_str(body).map_err(|e| XapiError::protocol(method, e.to_string()))?;

    if let Some(fault) = response.fault {
        let fault = XmlRpcValue::from(fault.value);
        let reason = fault
            .member("faultString")
            .and_then(XmlRpcValue::as_str)
            .unwrap_or("unknown fault")
            .to_string();
        return Err(XapiError::protocol(method, reason));
    }

    let params = response
        .params
        .ok_or_else(|| XapiError::protocol(method, "no params in response"))?;
    unwrap_envelope(method, params.param.value.into())
}

fn unwrap_envelope(method: &str, envelope: XmlRpcValue) -> Result<XmlRpcValue, XapiError> {
    let XmlRpcValue::Struct(mut fields) = envelope else {
        return Err(XapiError::protocol(method, "result is not a struct"));
    };

    match fields.get("Status").and_then(XmlRpcValue::as_str) {
        Some("Success") => fields
            .remove("Value")
            .ok_or_else(|| XapiError::protocol(method, "Success without Value")),
        Some("Failure") => {
            let description = fields
                .get("ErrorDescription")
                .and_then(XmlRpcValue::as_array)
                .map(|items| {
                    items
                        .iter()
                        .filter_map(XmlRpcValue::as_str)
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default();
            Err(XapiError::Failure {
                method: method.to_string(),
                description,
            })
        }
        other => Err(XapiError::protocol(method, format!("unexpected Status {:?}", other))),
    }
}

/// The subset of a VM record used for naming
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmRecord {
    pub uuid: String,
    pub name_label: String,
    pub is_control_domain: bool,
}

pub struct XapiClient {
    http: reqwest::Client,
    url: String,
}

impl XapiClient {
    pub fn new(url: impl Into<String>) -> Result<Self, XapiError> {
        let http = reqwest::Client::builder().timeout(CALL_TIMEOUT).build()?;
        Ok(Self { http, url: url.into() })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn call(&self, method: &str, params: &[&str]) -> Result<XmlRpcValue, XapiError> {
        debug!(method, url = %self.url, "XenAPI call");
        let body = self
            .http
            .post(&self.url)
            .header(CONTENT_TYPE, "text/xml")
            .body(encode_call(method, params))
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        decode_response(method, &body)
    }

    async fn call_string(&self, method: &str, params: &[&str]) -> Result<String, XapiError> {
        let value = self.call(method, params).await?;
        value
            .as_str()
            .map(String::from)
            .ok_or_else(|| XapiError::protocol(method, "expected a string"))
    }

    /// Open a session, returning its reference
    pub async fn login(&self, user: &str, passwd: &str) -> Result<String, XapiError> {
        self.call_string(
            "session.login_with_password",
            &[user, passwd, API_VERSION, ORIGINATOR],
        )
        .await
    }

    pub async fn logout(&self, session: &str) -> Result<(), XapiError> {
        self.call("session.logout", &[session]).await.map(|_| ())
    }

    pub async fn host_refs(&self, session: &str) -> Result<Vec<String>, XapiError> {
        let value = self.call("host.get_all", &[session]).await?;
        let refs = value
            .as_array()
            .ok_or_else(|| XapiError::protocol("host.get_all", "expected an array"))?;
        Ok(refs.iter().filter_map(XmlRpcValue::as_str).map(String::from).collect())
    }

    pub async fn host_uuid(&self, session: &str, host_ref: &str) -> Result<String, XapiError> {
        self.call_string("host.get_uuid", &[session, host_ref]).await
    }

    pub async fn host_hostname(&self, session: &str, host_ref: &str) -> Result<String, XapiError> {
        self.call_string("host.get_hostname", &[session, host_ref]).await
    }

    pub async fn vm_records(&self, session: &str) -> Result<Vec<VmRecord>, XapiError> {
        let value = self.call("VM.get_all_records", &[session]).await?;
        let records = value
            .as_struct()
            .ok_or_else(|| XapiError::protocol("VM.get_all_records", "expected a struct"))?;

        Ok(records
            .values()
            .filter_map(|record| {
                Some(VmRecord {
                    uuid: record.member("uuid")?.as_str()?.to_string(),
                    name_label: record
                        .member("name_label")
                        .and_then(XmlRpcValue::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    is_control_domain: record
                        .member("is_control_domain")
                        .and_then(XmlRpcValue::as_bool)
                        .unwrap_or(false),
                })
            })
            .collect())
    }
}
