//! HTTP client for the remote debugger's control API.
//!
//! Wraps the REST surface under `/s/-/dw/debugger/v2_0/` with basic auth,
//! a bounded retry policy, transparent pagination for variable/member
//! reads, and an optional HTTPS proxy picked up from the environment.

use crate::config::{proxy_from_env, ConnectionConfig};
use crate::error::{DebugError, Result};
use crate::sdapi::types::{
    BreakpointRequest, BreakpointsEnvelope, EvalResult, MemberPage, ObjectMember, RemoteBreakpoint,
    ScriptThread, ThreadsEnvelope,
};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Value of the `x-dw-client-id` header on every request.
pub const CLIENT_ID: &str = "prophet-dap";

const BASE_PATH: &str = "/s/-/dw/debugger/v2_0";
const RETRY_ATTEMPTS: u32 = 3;
const RETRY_DELAY: Duration = Duration::from_millis(450);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);
const PROXY_PROBE_TIMEOUT: Duration = Duration::from_secs(2);
const PAGE_SIZE: u64 = 100;

/// Per-operation retry policy. Step/resume/eval calls must never retry: a
/// repeated step would move the remote thread twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retry {
    Auto,
    Never,
}

pub struct DebuggerClient {
    http: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
}

impl DebuggerClient {
    /// Build a client for the configured sandbox. Certificate verification
    /// follows `verify_tls` (default off, the sandboxes use self-signed
    /// certs); an HTTPS proxy from the environment is used only if it is
    /// actually reachable.
    pub async fn connect(config: &ConnectionConfig) -> Result<Self> {
        config.validate()?;

        let mut builder = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .danger_accept_invalid_certs(!config.verify_tls);

        if let Some(proxy) = usable_proxy().await {
            builder = builder.proxy(proxy);
        }

        Ok(Self {
            http: builder.build()?,
            base_url: format!("https://{}{}", config.hostname, BASE_PATH),
            username: config.username.clone(),
            password: config.password.clone(),
        })
    }

    /// Client against an explicit base URL, bypassing TLS/proxy setup.
    pub fn with_base_url(base_url: String, username: String, password: String) -> Result<Self> {
        Ok(Self {
            http: reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?,
            base_url,
            username,
            password,
        })
    }

    // ========================================================================
    // Session
    // ========================================================================

    pub async fn establish_session(&self) -> Result<()> {
        self.send(Method::POST, "/client", &[], None, Retry::Auto)
            .await
            .map(|_| ())
    }

    pub async fn disconnect_session(&self) -> Result<()> {
        self.send(Method::DELETE, "/client", &[], None, Retry::Auto)
            .await
            .map(|_| ())
    }

    // ========================================================================
    // Breakpoints
    // ========================================================================

    pub async fn create_breakpoints(
        &self,
        requests: &[BreakpointRequest],
    ) -> Result<Vec<RemoteBreakpoint>> {
        let body = json!({ "breakpoints": requests });
        let envelope: BreakpointsEnvelope = self
            .send_json_or_default(Method::POST, "/breakpoints", &[], Some(body), Retry::Auto)
            .await?;
        Ok(envelope.breakpoints)
    }

    pub async fn list_breakpoints(&self) -> Result<Vec<RemoteBreakpoint>> {
        let envelope: BreakpointsEnvelope = self
            .send_json_or_default(Method::GET, "/breakpoints", &[], None, Retry::Auto)
            .await?;
        Ok(envelope.breakpoints)
    }

    /// Remove one breakpoint. A 404 means it was already gone and counts as
    /// success; the same policy applies to every breakpoint delete.
    pub async fn remove_breakpoint(&self, id: i64) -> Result<()> {
        let path = format!("/breakpoints/{}", id);
        self.delete_tolerating_missing(&path).await
    }

    /// Remove every breakpoint known to the remote store.
    pub async fn remove_all_breakpoints(&self) -> Result<()> {
        self.delete_tolerating_missing("/breakpoints").await
    }

    async fn delete_tolerating_missing(&self, path: &str) -> Result<()> {
        match self.send(Method::DELETE, path, &[], None, Retry::Auto).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_already_removed() => Ok(()),
            Err(e) => Err(e),
        }
    }

    // ========================================================================
    // Threads
    // ========================================================================

    pub async fn list_threads(&self) -> Result<Vec<ScriptThread>> {
        let envelope: ThreadsEnvelope = self
            .send_json_or_default(Method::GET, "/threads", &[], None, Retry::Auto)
            .await?;
        Ok(envelope.script_threads)
    }

    pub async fn reset_threads(&self) -> Result<()> {
        self.send(Method::POST, "/threads/reset", &[], None, Retry::Auto)
            .await
            .map(|_| ())
    }

    pub async fn get_stack_trace(&self, thread_id: u64) -> Result<ScriptThread> {
        let path = format!("/threads/{}", thread_id);
        self.send_json(Method::GET, &path, &[], None, Retry::Auto)
            .await
    }

    pub async fn step_into(&self, thread_id: u64) -> Result<()> {
        self.thread_op(thread_id, "into").await
    }

    pub async fn step_over(&self, thread_id: u64) -> Result<()> {
        self.thread_op(thread_id, "over").await
    }

    pub async fn step_out(&self, thread_id: u64) -> Result<()> {
        self.thread_op(thread_id, "out").await
    }

    pub async fn resume(&self, thread_id: u64) -> Result<()> {
        self.thread_op(thread_id, "resume").await
    }

    pub async fn stop(&self, thread_id: u64) -> Result<()> {
        self.thread_op(thread_id, "stop").await
    }

    async fn thread_op(&self, thread_id: u64, op: &str) -> Result<()> {
        let path = format!("/threads/{}/{}", thread_id, op);
        self.send(Method::POST, &path, &[], None, Retry::Never)
            .await
            .map(|_| ())
    }

    // ========================================================================
    // Variables / members / eval
    // ========================================================================

    pub async fn get_variables(&self, thread_id: u64, frame_index: u32) -> Result<Vec<ObjectMember>> {
        let path = format!("/threads/{}/frames/{}/variables", thread_id, frame_index);
        self.fetch_all_pages(&path, None).await
    }

    pub async fn get_members(
        &self,
        thread_id: u64,
        frame_index: u32,
        object_path: Option<&str>,
    ) -> Result<Vec<ObjectMember>> {
        let path = format!("/threads/{}/frames/{}/members", thread_id, frame_index);
        self.fetch_all_pages(&path, object_path).await
    }

    pub async fn evaluate(&self, thread_id: u64, frame_index: u32, expression: &str) -> Result<String> {
        let path = format!("/threads/{}/frames/{}/eval", thread_id, frame_index);
        let query = [("expr", expression.to_string())];
        let result: EvalResult = self
            .send_json(Method::GET, &path, &query, None, Retry::Never)
            .await?;
        Ok(result.result.unwrap_or_default())
    }

    /// Follow the paging convention: keep requesting while the reported
    /// total exceeds what has been fetched, concatenating pages in order.
    async fn fetch_all_pages(&self, path: &str, object_path: Option<&str>) -> Result<Vec<ObjectMember>> {
        let mut members = Vec::new();
        let mut start = 0u64;
        loop {
            let mut query = vec![("start", start.to_string()), ("count", PAGE_SIZE.to_string())];
            if let Some(op) = object_path {
                query.push(("object_path", op.to_string()));
            }
            let page: MemberPage = self
                .send_json_or_default(Method::GET, path, &query, None, Retry::Auto)
                .await?;

            let fetched = page.object_members.len() as u64;
            let more = fetched > 0 && page.has_more();
            members.extend(page.object_members);
            if !more {
                return Ok(members);
            }
            start += fetched;
        }
    }

    // ========================================================================
    // Request plumbing
    // ========================================================================

    async fn send_json<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<serde_json::Value>,
        retry: Retry,
    ) -> Result<T> {
        let response = self.send(method, path, query, body, retry).await?;
        let text = response.text().await?;
        serde_json::from_str(&text).map_err(DebugError::from)
    }

    /// Like `send_json`, for list envelopes where the server may answer
    /// with an empty body instead of an empty list.
    async fn send_json_or_default<T: DeserializeOwned + Default>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<serde_json::Value>,
        retry: Retry,
    ) -> Result<T> {
        let response = self.send(method, path, query, body, retry).await?;
        let text = response.text().await?;
        if text.trim().is_empty() {
            return Ok(T::default());
        }
        serde_json::from_str(&text).map_err(DebugError::from)
    }

    /// One logical operation: up to 3 attempts with a fixed pause for
    /// `Retry::Auto`, a single attempt for `Retry::Never`. 404 is returned
    /// immediately (it is never transient); the last error otherwise
    /// surfaces unmodified.
    async fn send(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<serde_json::Value>,
        retry: Retry,
    ) -> Result<reqwest::Response> {
        let url = format!("{}{}", self.base_url, path);
        let attempts = match retry {
            Retry::Auto => RETRY_ATTEMPTS,
            Retry::Never => 1,
        };

        let mut last_err = None;
        for attempt in 1..=attempts {
            if attempt > 1 {
                tokio::time::sleep(RETRY_DELAY).await;
            }

            let mut request = self
                .http
                .request(method.clone(), &url)
                .basic_auth(&self.username, Some(&self.password))
                .header("x-dw-client-id", CLIENT_ID);
            if !query.is_empty() {
                request = request.query(query);
            }
            if let Some(ref b) = body {
                request = request.json(b);
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response);
                    }
                    let body_text = response.text().await.unwrap_or_default();
                    let err = DebugError::Remote {
                        status: status.as_u16(),
                        body: body_text,
                    };
                    if err.is_already_removed() {
                        return Err(err);
                    }
                    debug!(%url, attempt, status = status.as_u16(), "remote call failed");
                    last_err = Some(err);
                }
                Err(e) => {
                    debug!(%url, attempt, error = %e, "remote call failed");
                    last_err = Some(e.into());
                }
            }
        }

        Err(last_err.unwrap_or_else(|| DebugError::Connection(format!("no attempt made for {}", url))))
    }
}

/// Resolve the environment proxy to something reqwest can use, probing
/// reachability first. An unusable proxy downgrades to a direct connection;
/// it never fails the client.
async fn usable_proxy() -> Option<reqwest::Proxy> {
    let raw = proxy_from_env()?;
    let addr = match proxy_probe_addr(&raw) {
        Some(addr) => addr,
        None => {
            warn!(proxy = %raw, "ignoring non-HTTP proxy");
            return None;
        }
    };

    match timeout(PROXY_PROBE_TIMEOUT, TcpStream::connect(&addr)).await {
        Ok(Ok(_)) => match reqwest::Proxy::https(&raw) {
            Ok(proxy) => {
                info!(proxy = %raw, "tunneling remote API traffic through proxy");
                Some(proxy)
            }
            Err(e) => {
                warn!(proxy = %raw, error = %e, "proxy rejected, using direct connection");
                None
            }
        },
        _ => {
            warn!(proxy = %raw, "proxy unreachable, using direct connection");
            None
        }
    }
}

/// `host:port` to probe for an `http://` proxy URL, `None` for other schemes.
fn proxy_probe_addr(url: &str) -> Option<String> {
    let rest = url.strip_prefix("http://")?;
    let rest = rest.trim_end_matches('/');
    // Drop userinfo if present.
    let hostport = rest.rsplit('@').next().unwrap_or(rest);
    if hostport.is_empty() {
        return None;
    }
    if hostport.contains(':') {
        Some(hostport.to_string())
    } else {
        Some(format!("{}:80", hostport))
    }
}
