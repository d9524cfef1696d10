//! Blocking client for the vSphere Web Services API (SOAP, `/sdk`).

use chrono::{DateTime, Utc};
use quick_xml::escape::escape;
use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use url::Url;
use vsm_config::{ComputeResourceConfig, Credentials};
use vsm_core::error::SnapshotError;

use super::error::VsphereError;
use super::soap::{moref_element, parse_response, Request, XmlElement};
use super::types::{MoRef, VsphereSnapshot};
use super::VsphereApi;

type Result<T> = std::result::Result<T, VsphereError>;

const SOAP_ACTION: &str = "urn:vim25/7.0.3.0";

#[derive(Debug, Clone)]
struct ServiceContent {
    property_collector: MoRef,
    search_index: MoRef,
    session_manager: MoRef,
}

pub struct VsphereClient {
    http: Client,
    endpoint: Url,
    user: String,
    password: String,
    instance_uuid: bool,
    poll_interval: Duration,
    task_timeout: Duration,
    session: Mutex<Option<ServiceContent>>,
}

impl VsphereClient {
    pub fn new(config: &ComputeResourceConfig) -> vsm_core::error::Result<Self> {
        let (user, password) = match config.auth.credentials()? {
            Credentials::Password { user, password } => (user.to_string(), password.to_string()),
            Credentials::Token { .. } => {
                return Err(SnapshotError::Config(format!(
                    "{}: vSphere only supports user/password authentication",
                    config.name
                )))
            }
        };

        let endpoint = sdk_endpoint(&config.url)
            .map_err(|e| SnapshotError::Config(format!("{}: {e}", config.name)))?;

        let http = Client::builder()
            .timeout(config.request_timeout())
            .danger_accept_invalid_certs(!config.verify_tls)
            .cookie_store(true)
            .build()
            .map_err(|e| SnapshotError::Provider(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            endpoint,
            user,
            password,
            instance_uuid: config.instance_uuid,
            poll_interval: config.poll_interval(),
            task_timeout: config.task_timeout(),
            session: Mutex::new(None),
        })
    }

    fn invoke(&self, request: &Request) -> Result<XmlElement> {
        let response = self
            .http
            .post(self.endpoint.clone())
            .header(CONTENT_TYPE, "text/xml; charset=utf-8")
            .header("SOAPAction", SOAP_ACTION)
            .body(request.render())
            .send()?;
        let status = response.status();
        let body = response.text()?;

        match parse_response(&body) {
            Ok(element) if status.is_success() => Ok(element),
            Err(fault @ VsphereError::Fault { .. }) => Err(fault),
            Err(err) if status.is_success() => Err(err),
            _ => Err(VsphereError::InvalidResponse(format!(
                "{} returned HTTP {status}",
                request.method()
            ))),
        }
    }

    /// Service content for the current session, logging in on first use.
    fn service(&self) -> Result<ServiceContent> {
        let mut cached = self
            .session
            .lock()
            .map_err(|_| VsphereError::Session("session cache poisoned".into()))?;
        if let Some(service) = cached.as_ref() {
            return Ok(service.clone());
        }

        let instance = MoRef::new("ServiceInstance", "ServiceInstance");
        let response = self.invoke(&Request::new("RetrieveServiceContent", &instance))?;
        let content = response
            .child("returnval")
            .ok_or_else(|| VsphereError::InvalidResponse("no service content".into()))?;
        let moref = |name: &str| {
            content
                .child(name)
                .and_then(XmlElement::to_moref)
                .ok_or_else(|| VsphereError::InvalidResponse(format!("service content lacks {name}")))
        };
        let service = ServiceContent {
            property_collector: moref("propertyCollector")?,
            search_index: moref("searchIndex")?,
            session_manager: moref("sessionManager")?,
        };

        self.invoke(
            &Request::new("Login", &service.session_manager)
                .text("userName", &self.user)
                .text("password", &self.password),
        )
        .map_err(|e| match e {
            VsphereError::Fault { message, .. } => {
                VsphereError::Session(format!("login as {} rejected: {message}", self.user))
            }
            other => other,
        })?;
        debug!(user = %self.user, "Logged in to vSphere");

        *cached = Some(service.clone());
        Ok(service)
    }

    fn clear_session(&self) -> bool {
        match self.session.lock() {
            Ok(mut cached) => cached.take().is_some(),
            Err(_) => false,
        }
    }

    /// Invoke a method built against the session's service content. An
    /// expired session is re-established once.
    fn call(&self, build: impl Fn(&ServiceContent) -> Request) -> Result<XmlElement> {
        let service = self.service()?;
        match self.invoke(&build(&service)) {
            Err(VsphereError::Fault {
                kind: Some(ref kind),
                ..
            }) if kind == "NotAuthenticated" && self.clear_session() => {
                warn!("vSphere session expired, logging in again");
                let service = self.service()?;
                self.invoke(&build(&service))
            }
            other => other,
        }
    }

    fn retrieve_property(&self, obj: &MoRef, path: &str) -> Result<Option<XmlElement>> {
        let spec = format!(
            "<specSet><propSet><type>{}</type><pathSet>{}</pathSet></propSet>\
             <objectSet>{}<skip>false</skip></objectSet></specSet><options></options>",
            escape(obj.kind.as_str()),
            escape(path),
            moref_element("obj", obj)
        );
        let response = self.call(|service| {
            Request::new("RetrievePropertiesEx", &service.property_collector).raw(&spec)
        })?;

        Ok(response
            .child("returnval")
            .and_then(|r| r.child("objects"))
            .and_then(|o| {
                o.children_named("propSet")
                    .find(|p| p.child_text("name") == Some(path))
            })
            .and_then(|p| p.child("val"))
            .cloned())
    }

    fn start_task(&self, request: Request) -> Result<MoRef> {
        let method = request.method();
        let response = self.call(|_| request.clone())?;
        response
            .child("returnval")
            .and_then(XmlElement::to_moref)
            .ok_or_else(|| VsphereError::InvalidResponse(format!("{method} returned no task")))
    }

    /// Poll `Task.info` until the task settles. Returns the final info.
    fn wait_for_task(&self, task: &MoRef) -> Result<XmlElement> {
        let started = Instant::now();
        loop {
            let info = self.retrieve_property(task, "info")?.ok_or_else(|| {
                VsphereError::InvalidResponse(format!("task {} has no info", task.value))
            })?;

            match info.child_text("state") {
                Some("success") => return Ok(info),
                Some("error") => {
                    let message = info
                        .child("error")
                        .and_then(|e| e.child_text("localizedMessage"))
                        .unwrap_or("unknown error");
                    return Err(VsphereError::TaskFailed {
                        task: task.value.clone(),
                        message: message.to_string(),
                    });
                }
                state => {
                    if started.elapsed() >= self.task_timeout {
                        return Err(VsphereError::TaskTimeout {
                            task: task.value.clone(),
                            timeout: self.task_timeout,
                        });
                    }
                    debug!(task = %task.value, state = state.unwrap_or("unknown"), "Waiting for vSphere task");
                    std::thread::sleep(self.poll_interval);
                }
            }
        }
    }
}

impl VsphereApi for VsphereClient {
    fn find_vm_by_uuid(&self, uuid: &str) -> Result<Option<MoRef>> {
        let response = self.call(|service| {
            Request::new("FindByUuid", &service.search_index)
                .text("uuid", uuid)
                .flag("vmSearch", true)
                .flag("instanceUuid", self.instance_uuid)
        })?;
        Ok(response.child("returnval").and_then(XmlElement::to_moref))
    }

    fn snapshot_tree(&self, vm: &MoRef) -> Result<Vec<Arc<VsphereSnapshot>>> {
        match self.retrieve_property(vm, "snapshot")? {
            Some(info) => info
                .children_named("rootSnapshotList")
                .map(|node| parse_tree(node).map(Arc::new))
                .collect(),
            None => Ok(Vec::new()),
        }
    }

    fn create_snapshot(
        &self,
        vm: &MoRef,
        name: &str,
        description: &str,
        memory: bool,
        quiesce: bool,
    ) -> Result<MoRef> {
        let task = self.start_task(
            Request::new("CreateSnapshot_Task", vm)
                .text("name", name)
                .text("description", description)
                .flag("memory", memory)
                .flag("quiesce", quiesce),
        )?;
        let info = self.wait_for_task(&task)?;
        info.child("result")
            .and_then(XmlElement::to_moref)
            .ok_or_else(|| {
                VsphereError::InvalidResponse(format!("task {} returned no snapshot", task.value))
            })
    }

    fn remove_snapshot(&self, snapshot: &MoRef, remove_children: bool) -> Result<()> {
        let task = self.start_task(
            Request::new("RemoveSnapshot_Task", snapshot)
                .flag("removeChildren", remove_children)
                .flag("consolidate", true),
        )?;
        self.wait_for_task(&task).map(|_| ())
    }

    fn revert_to_snapshot(&self, snapshot: &MoRef) -> Result<()> {
        let task = self.start_task(Request::new("RevertToSnapshot_Task", snapshot))?;
        self.wait_for_task(&task).map(|_| ())
    }

    fn rename_snapshot(&self, snapshot: &MoRef, name: &str, description: &str) -> Result<()> {
        self.call(|_| {
            Request::new("RenameSnapshot", snapshot)
                .text("name", name)
                .text("description", description)
        })?;
        Ok(())
    }
}

/// Build a snapshot node from a `VirtualMachineSnapshotTree` element.
fn parse_tree(node: &XmlElement) -> Result<VsphereSnapshot> {
    let snapshot = node
        .child("snapshot")
        .and_then(XmlElement::to_moref)
        .ok_or_else(|| VsphereError::InvalidResponse("snapshot tree node without reference".into()))?;
    let vm = node
        .child("vm")
        .and_then(XmlElement::to_moref)
        .ok_or_else(|| VsphereError::InvalidResponse(format!("snapshot {} has no vm", snapshot.value)))?;

    let mut parsed = VsphereSnapshot::new(snapshot, vm, node.child_text("name").unwrap_or_default());
    parsed.description = node.child_text("description").unwrap_or_default().to_string();
    parsed.id = node
        .child_text("id")
        .and_then(|id| id.parse().ok())
        .unwrap_or_default();
    parsed.create_time = node
        .child_text("createTime")
        .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
        .map(|t| t.with_timezone(&Utc));
    if let Some(state) = node.child_text("state") {
        parsed.state = state.to_string();
    }
    parsed.quiesced = node.child_text("quiesced") == Some("true");
    parsed.children = node
        .children_named("childSnapshotList")
        .map(|child| parse_tree(child).map(Arc::new))
        .collect::<Result<_>>()?;
    Ok(parsed)
}

fn sdk_endpoint(raw: &str) -> std::result::Result<Url, String> {
    let mut url = Url::parse(raw).map_err(|e| format!("invalid url '{raw}': {e}"))?;
    let has_sdk = url.path().trim_end_matches('/').ends_with("/sdk");
    {
        let mut segments = url
            .path_segments_mut()
            .map_err(|_| format!("url '{raw}' cannot be a base"))?;
        segments.pop_if_empty();
        if !has_sdk {
            segments.push("sdk");
        }
    }
    Ok(url)
}
