//! Blocking client for the Proxmox VE REST API (`/api2/json`).

use reqwest::blocking::{Client, RequestBuilder};
use reqwest::header::{AUTHORIZATION, COOKIE};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use url::Url;
use vsm_config::{ComputeResourceConfig, Credentials};
use vsm_core::error::SnapshotError;

use super::error::ProxmoxError;
use super::types::{GuestKind, ProxmoxGuest, ProxmoxSnapshotInfo};
use super::ProxmoxApi;

type Result<T> = std::result::Result<T, ProxmoxError>;

/// Name of the pseudo snapshot marking the running state.
const CURRENT_STATE: &str = "current";

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct ClusterResource {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    vmid: Option<u32>,
    #[serde(default)]
    node: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TaskStatus {
    status: String,
    #[serde(default)]
    exitstatus: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TicketData {
    ticket: String,
    #[serde(rename = "CSRFPreventionToken")]
    csrf_token: String,
}

#[derive(Debug, Clone)]
struct Ticket {
    ticket: String,
    csrf_token: String,
}

enum Auth {
    /// Pre-rendered `Authorization` header value.
    Token(String),
    Password { user: String, password: String },
}

pub struct ProxmoxClient {
    http: Client,
    base: Url,
    auth: Auth,
    poll_interval: Duration,
    task_timeout: Duration,
    ticket: Mutex<Option<Ticket>>,
}

impl ProxmoxClient {
    pub fn new(config: &ComputeResourceConfig) -> vsm_core::error::Result<Self> {
        let auth = match config.auth.credentials()? {
            Credentials::Token {
                user,
                token_id,
                secret,
            } => Auth::Token(format!("PVEAPIToken={user}!{token_id}={secret}")),
            Credentials::Password { user, password } => Auth::Password {
                user: user.to_string(),
                password: password.to_string(),
            },
        };

        let base = api_base(&config.url)
            .map_err(|e| SnapshotError::Config(format!("{}: {e}", config.name)))?;

        let http = Client::builder()
            .timeout(config.request_timeout())
            .danger_accept_invalid_certs(!config.verify_tls)
            .build()
            .map_err(|e| SnapshotError::Provider(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base,
            auth,
            poll_interval: config.poll_interval(),
            task_timeout: config.task_timeout(),
            ticket: Mutex::new(None),
        })
    }

    fn url<S: AsRef<str>>(&self, segments: &[S]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| ProxmoxError::InvalidUrl(self.base.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn send<T: DeserializeOwned>(
        &self,
        method: Method,
        segments: &[String],
        query: &[(&str, &str)],
        form: &[(&str, String)],
    ) -> Result<T> {
        let url = self.url(segments)?;
        let mut retried = false;
        loop {
            let mut request = self.http.request(method.clone(), url.clone());
            if !query.is_empty() {
                request = request.query(query);
            }
            if !form.is_empty() {
                request = request.form(form);
            }
            let response = self.authorize(request, &method)?.send()?;
            let status = response.status();

            // Tickets expire after two hours; log in again once.
            if status == StatusCode::UNAUTHORIZED && !retried && self.clear_ticket() {
                warn!("Proxmox ticket rejected, logging in again");
                retried = true;
                continue;
            }

            if !status.is_success() {
                let body = response.text().unwrap_or_default();
                return Err(ProxmoxError::Api {
                    status: status.as_u16(),
                    message: error_message(&body),
                });
            }

            let envelope: Envelope<T> = response.json()?;
            return Ok(envelope.data);
        }
    }

    fn authorize(&self, request: RequestBuilder, method: &Method) -> Result<RequestBuilder> {
        match &self.auth {
            Auth::Token(header) => Ok(request.header(AUTHORIZATION, header)),
            Auth::Password { .. } => {
                let ticket = self.ticket()?;
                let mut request =
                    request.header(COOKIE, format!("PVEAuthCookie={}", ticket.ticket));
                if method != Method::GET {
                    request = request.header("CSRFPreventionToken", ticket.csrf_token);
                }
                Ok(request)
            }
        }
    }

    fn ticket(&self) -> Result<Ticket> {
        let mut cached = self
            .ticket
            .lock()
            .map_err(|_| ProxmoxError::Auth("ticket cache poisoned".into()))?;
        if let Some(ticket) = cached.as_ref() {
            return Ok(ticket.clone());
        }

        let Auth::Password { user, password } = &self.auth else {
            return Err(ProxmoxError::Auth("no password configured".into()));
        };

        let response = self
            .http
            .post(self.url(&["access", "ticket"][..])?)
            .form(&[("username", user.as_str()), ("password", password.as_str())])
            .send()?;
        if !response.status().is_success() {
            return Err(ProxmoxError::Auth(format!(
                "login as {user} rejected with status {}",
                response.status()
            )));
        }

        let envelope: Envelope<TicketData> = response.json()?;
        let ticket = Ticket {
            ticket: envelope.data.ticket,
            csrf_token: envelope.data.csrf_token,
        };
        debug!(user = %user, "Obtained Proxmox ticket");
        *cached = Some(ticket.clone());
        Ok(ticket)
    }

    /// Drop a cached ticket. Returns whether one was cached.
    fn clear_ticket(&self) -> bool {
        match self.ticket.lock() {
            Ok(mut cached) => cached.take().is_some(),
            Err(_) => false,
        }
    }

    fn snapshot_segments(guest: &ProxmoxGuest, rest: &[&str]) -> Vec<String> {
        let mut segments = guest.segments();
        segments.push("snapshot".to_string());
        segments.extend(rest.iter().map(|s| s.to_string()));
        segments
    }

    fn wait_for_task(&self, node: &str, upid: &str) -> Result<()> {
        let started = Instant::now();
        let segments = vec![
            "nodes".to_string(),
            node.to_string(),
            "tasks".to_string(),
            upid.to_string(),
            "status".to_string(),
        ];

        loop {
            let status: TaskStatus = self.send(Method::GET, &segments, &[], &[])?;
            if status.status == "stopped" {
                return match status.exitstatus.as_deref() {
                    Some(exit) if task_successful(exit) => Ok(()),
                    other => Err(ProxmoxError::TaskFailed {
                        upid: upid.to_string(),
                        exit_status: other.unwrap_or("unknown").to_string(),
                    }),
                };
            }

            if started.elapsed() >= self.task_timeout {
                return Err(ProxmoxError::TaskTimeout {
                    upid: upid.to_string(),
                    timeout: self.task_timeout,
                });
            }

            debug!(upid, status = %status.status, "Waiting for Proxmox task");
            std::thread::sleep(self.poll_interval);
        }
    }
}

impl ProxmoxApi for ProxmoxClient {
    fn find_guest(&self, vmid: u32) -> Result<Option<ProxmoxGuest>> {
        let resources: Vec<ClusterResource> = self.send(
            Method::GET,
            &["cluster".to_string(), "resources".to_string()],
            &[("type", "vm")],
            &[],
        )?;

        Ok(resources.into_iter().find_map(|resource| {
            let kind = match resource.kind.as_str() {
                "qemu" => GuestKind::Qemu,
                "lxc" => GuestKind::Lxc,
                _ => return None,
            };
            match (resource.vmid, resource.node) {
                (Some(id), Some(node)) if id == vmid => Some(ProxmoxGuest::new(node, id, kind)),
                _ => None,
            }
        }))
    }

    fn list_snapshots(&self, guest: &ProxmoxGuest) -> Result<Vec<ProxmoxSnapshotInfo>> {
        let snapshots: Vec<ProxmoxSnapshotInfo> =
            self.send(Method::GET, &Self::snapshot_segments(guest, &[]), &[], &[])?;
        Ok(snapshots
            .into_iter()
            .filter(|s| s.name != CURRENT_STATE)
            .collect())
    }

    fn create_snapshot(&self, guest: &ProxmoxGuest, name: &str, vmstate: bool) -> Result<()> {
        let mut form = vec![("snapname", name.to_string())];
        if vmstate {
            form.push(("vmstate", "1".to_string()));
        }
        let upid: String = self.send(
            Method::POST,
            &Self::snapshot_segments(guest, &[]),
            &[],
            &form,
        )?;
        self.wait_for_task(&guest.node, &upid)
    }

    fn set_snapshot_description(
        &self,
        guest: &ProxmoxGuest,
        name: &str,
        description: &str,
    ) -> Result<()> {
        let _: serde_json::Value = self.send(
            Method::PUT,
            &Self::snapshot_segments(guest, &[name, "config"]),
            &[],
            &[("description", description.to_string())],
        )?;
        Ok(())
    }

    fn delete_snapshot(&self, guest: &ProxmoxGuest, name: &str) -> Result<()> {
        let upid: String = self.send(
            Method::DELETE,
            &Self::snapshot_segments(guest, &[name]),
            &[],
            &[],
        )?;
        self.wait_for_task(&guest.node, &upid)
    }

    fn rollback_snapshot(&self, guest: &ProxmoxGuest, name: &str) -> Result<()> {
        let upid: String = self.send(
            Method::POST,
            &Self::snapshot_segments(guest, &[name, "rollback"]),
            &[],
            &[],
        )?;
        self.wait_for_task(&guest.node, &upid)
    }
}

fn api_base(raw: &str) -> std::result::Result<Url, String> {
    let mut base = Url::parse(raw).map_err(|e| format!("invalid url '{raw}': {e}"))?;
    let has_api_path = base.path().trim_end_matches('/').ends_with("/api2/json");
    {
        let mut segments = base
            .path_segments_mut()
            .map_err(|_| format!("url '{raw}' cannot be a base"))?;
        segments.pop_if_empty();
        if !has_api_path {
            segments.extend(["api2", "json"]);
        }
    }
    Ok(base)
}

fn task_successful(exit_status: &str) -> bool {
    exit_status == "OK" || exit_status.starts_with("WARNINGS")
}

/// Pull a readable message out of a Proxmox error body.
fn error_message(body: &str) -> String {
    let parsed: serde_json::Value = match serde_json::from_str(body) {
        Ok(value) => value,
        Err(_) if body.trim().is_empty() => return "no error message".to_string(),
        Err(_) => return body.trim().to_string(),
    };

    if let Some(message) = parsed["message"].as_str().map(str::trim) {
        if !message.is_empty() {
            return message.to_string();
        }
    }
    if let Some(errors) = parsed["errors"].as_object() {
        let mut parts: Vec<String> = errors
            .iter()
            .map(|(field, err)| format!("{field}: {}", err.as_str().unwrap_or_default().trim()))
            .collect();
        parts.sort();
        if !parts.is_empty() {
            return parts.join("; ");
        }
    }
    "no error message".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_base() {
        assert_eq!(
            api_base("https://pve.example.com:8006").unwrap().as_str(),
            "https://pve.example.com:8006/api2/json"
        );
        assert_eq!(
            api_base("https://pve.example.com:8006/api2/json/").unwrap().as_str(),
            "https://pve.example.com:8006/api2/json"
        );
        assert!(api_base("not a url").is_err());
    }

    #[test]
    fn test_error_message_variants() {
        assert_eq!(
            error_message(r#"{"data":null,"message":"snapshot 'x' does not exist\n"}"#),
            "snapshot 'x' does not exist"
        );
        assert_eq!(
            error_message(r#"{"data":null,"errors":{"snapname":"invalid format\n"}}"#),
            "snapname: invalid format"
        );
        assert_eq!(error_message("proxy timeout"), "proxy timeout");
        assert_eq!(error_message(""), "no error message");
    }

    #[test]
    fn test_task_successful() {
        assert!(task_successful("OK"));
        assert!(task_successful("WARNINGS: 2"));
        assert!(!task_successful("snapshot feature is not available"));
    }
}
