/*!
Fake XenAPI endpoint

Serves the two surfaces the xenserver plugin talks to:
- `POST /` : XML-RPC (session login/logout, host and VM lookups)
- `GET /rrd_updates` : canned `rrd_updates` documents, served in order

Every query string and every XML-RPC method name is recorded for assertions.
*/

use crate::fixtures::XmlRpcResponse;
use anyhow::Result;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Router;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

#[derive(Debug, Clone)]
pub struct FakeVm {
    pub uuid: String,
    pub name_label: String,
    pub is_control_domain: bool,
}

impl FakeVm {
    pub fn new(uuid: &str, name_label: &str) -> Self {
        Self {
            uuid: uuid.to_string(),
            name_label: name_label.to_string(),
            is_control_domain: false,
        }
    }

    pub fn control_domain(uuid: &str) -> Self {
        Self {
            uuid: uuid.to_string(),
            name_label: "Control domain on host".to_string(),
            is_control_domain: true,
        }
    }
}

#[derive(Debug, Default)]
struct FakeState {
    host_uuid: String,
    hostname: String,
    vms: Vec<FakeVm>,
    reject_logins: bool,
    fail_logouts: bool,
    fail_vm_records: bool,
    sessions_opened: u32,
    rrd_responses: VecDeque<(StatusCode, String)>,
    rrd_queries: Vec<HashMap<String, String>>,
    calls: Vec<String>,
}

type Shared = Arc<Mutex<FakeState>>;

pub struct FakeXapi {
    base_url: String,
    state: Shared,
    server_task: JoinHandle<()>,
}

impl FakeXapi {
    /// Start the fake on an ephemeral local port
    pub async fn start(host_uuid: &str, hostname: &str, vms: Vec<FakeVm>) -> Result<Self> {
        env_logger::try_init().ok();

        let state: Shared = Arc::new(Mutex::new(FakeState {
            host_uuid: host_uuid.to_string(),
            hostname: hostname.to_string(),
            vms,
            ..FakeState::default()
        }));

        let app = Router::new()
            .route("/", post(xmlrpc))
            .route("/rrd_updates", get(rrd_updates))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let base_url = format!("http://{}", listener.local_addr()?);
        let server_task = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                log::warn!("[fake-xapi] server stopped: {}", e);
            }
        });

        log::info!("[fake-xapi] serving on {}", base_url);
        Ok(Self {
            base_url,
            state,
            server_task,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Queue an `rrd_updates` document for the next fetch
    pub fn push_rrd(&self, xml: String) {
        self.state.lock().unwrap().rrd_responses.push_back((StatusCode::OK, xml));
    }

    /// Queue an HTTP error for the next fetch
    pub fn push_rrd_error(&self, status: u16) {
        let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        self.state.lock().unwrap().rrd_responses.push_back((status, String::new()));
    }

    pub fn reject_logins(&self, reject: bool) {
        self.state.lock().unwrap().reject_logins = reject;
    }

    pub fn fail_logouts(&self, fail: bool) {
        self.state.lock().unwrap().fail_logouts = fail;
    }

    /// Make `VM.get_all_records` answer with a failure
    pub fn fail_vm_records(&self, fail: bool) {
        self.state.lock().unwrap().fail_vm_records = fail;
    }

    /// Query strings of every `rrd_updates` request, in order
    pub fn rrd_queries(&self) -> Vec<HashMap<String, String>> {
        self.state.lock().unwrap().rrd_queries.clone()
    }

    /// XML-RPC method names called, in order
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn count_calls(&self, method: &str) -> usize {
        self.calls().iter().filter(|c| c.as_str() == method).count()
    }
}

impl Drop for FakeXapi {
    fn drop(&mut self) {
        self.server_task.abort();
    }
}

async fn rrd_updates(
    State(state): State<Shared>,
    Query(params): Query<HashMap<String, String>>,
) -> (StatusCode, String) {
    let mut state = state.lock().unwrap();
    state.rrd_queries.push(params);
    state
        .rrd_responses
        .pop_front()
        .unwrap_or((StatusCode::SERVICE_UNAVAILABLE, String::new()))
}

async fn xmlrpc(State(state): State<Shared>, body: String) -> String {
    let method = method_name(&body).unwrap_or_default();
    let mut state = state.lock().unwrap();
    state.calls.push(method.clone());
    log::info!("[fake-xapi] {}", method);

    match method.as_str() {
        "session.login_with_password" => {
            if state.reject_logins {
                return XmlRpcResponse::failure(&["SESSION_AUTHENTICATION_FAILED", "root"]);
            }
            state.sessions_opened += 1;
            let session = format!("OpaqueRef:session-{}", state.sessions_opened);
            XmlRpcResponse::success(&XmlRpcResponse::string(&session))
        }
        "session.logout" => {
            if state.fail_logouts {
                return XmlRpcResponse::failure(&["SESSION_INVALID", "OpaqueRef:session"]);
            }
            XmlRpcResponse::success(&XmlRpcResponse::string(""))
        }
        "host.get_all" => XmlRpcResponse::success(&XmlRpcResponse::array(&[XmlRpcResponse::string(
            "OpaqueRef:host-1",
        )])),
        "host.get_uuid" => XmlRpcResponse::success(&XmlRpcResponse::string(&state.host_uuid)),
        "host.get_hostname" => XmlRpcResponse::success(&XmlRpcResponse::string(&state.hostname)),
        "VM.get_all_records" => {
            if state.fail_vm_records {
                return XmlRpcResponse::failure(&["INTERNAL_ERROR", "VM.get_all_records"]);
            }
            let records: Vec<(String, String)> = state
                .vms
                .iter()
                .enumerate()
                .map(|(i, vm)| {
                    let record = XmlRpcResponse::structure(&[
                        ("uuid", XmlRpcResponse::string(&vm.uuid)),
                        ("name_label", XmlRpcResponse::string(&vm.name_label)),
                        ("is_control_domain", XmlRpcResponse::boolean(vm.is_control_domain)),
                    ]);
                    (format!("OpaqueRef:vm-{}", i), record)
                })
                .collect();
            let members: Vec<(&str, String)> = records
                .iter()
                .map(|(r, v)| (r.as_str(), v.clone()))
                .collect();
            XmlRpcResponse::success(&XmlRpcResponse::structure(&members))
        }
        _ => XmlRpcResponse::failure(&["MESSAGE_METHOD_UNKNOWN", &method]),
    }
}

fn method_name(body: &str) -> Option<String> {
    let start = body.find("<methodName>")? + "<methodName>".len();
    let end = body[start..].find("</methodName>")? + start;
    Some(body[start..end].trim().to_string())
}
