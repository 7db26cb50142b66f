//! The debug-adapter session: protocol state machine, request dispatch,
//! and the poll loop that turns remote thread-list diffs into DAP events.
//!
//! Connection settings never travel in launch arguments. `initialize`
//! emits `prophet.getdebugger.config` and its response stays deferred until
//! the editor answers with the custom `DebuggerConfig` request; the stored
//! oneshot is dropped on teardown so a client that disconnects early never
//! leaves a suspended handler behind.

pub mod paths;
pub mod threads;
pub mod variables;

use crate::config::{LaunchArguments, SessionConfig};
use crate::dap::protocol::*;
use crate::dap::transport::{MessageReader, MessageWriter};
use crate::error::{DebugError, Result};
use crate::sdapi::client::DebuggerClient;
use crate::sdapi::types::{BreakpointRequest, ObjectMember, RemoteBreakpoint, ScriptThread};
use async_trait::async_trait;
use dashmap::DashMap;
use paths::{PathMap, UNRESOLVED_PATH};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use threads::{StopReason, ThreadEvent, ThreadTracker};
use tokio::io::AsyncRead;
use tokio::sync::{oneshot, Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use variables::{child_path, is_expandable, scope_partitions, FrameRef, HandleStore, VariableSlot};

/// Breakpoints under this segment run in the shopper's browser, not on the
/// remote runtime, and cannot be debugged over this protocol.
const CLIENT_SCRIPT_MARKER: &str = "/cartridge/client/";

const POLL_INTERVAL: Duration = Duration::from_secs(5);
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

// ============================================================================
// Remote control seam
// ============================================================================

/// The remote-control operations the session depends on. `DebuggerClient`
/// is the production implementation; integration tests drop in a stub.
#[async_trait]
pub trait ControlApi: Send + Sync {
    async fn establish_session(&self) -> Result<()>;
    async fn disconnect_session(&self) -> Result<()>;
    async fn list_threads(&self) -> Result<Vec<ScriptThread>>;
    async fn reset_threads(&self) -> Result<()>;
    async fn get_stack_trace(&self, thread_id: u64) -> Result<ScriptThread>;
    async fn create_breakpoints(&self, requests: &[BreakpointRequest]) -> Result<Vec<RemoteBreakpoint>>;
    async fn remove_breakpoint(&self, id: i64) -> Result<()>;
    async fn remove_all_breakpoints(&self) -> Result<()>;
    async fn step_into(&self, thread_id: u64) -> Result<()>;
    async fn step_over(&self, thread_id: u64) -> Result<()>;
    async fn step_out(&self, thread_id: u64) -> Result<()>;
    async fn resume(&self, thread_id: u64) -> Result<()>;
    async fn stop(&self, thread_id: u64) -> Result<()>;
    async fn get_variables(&self, thread_id: u64, frame_index: u32) -> Result<Vec<ObjectMember>>;
    async fn get_members(
        &self,
        thread_id: u64,
        frame_index: u32,
        object_path: Option<&str>,
    ) -> Result<Vec<ObjectMember>>;
    async fn evaluate(&self, thread_id: u64, frame_index: u32, expression: &str) -> Result<String>;
}

#[async_trait]
impl ControlApi for DebuggerClient {
    async fn establish_session(&self) -> Result<()> {
        DebuggerClient::establish_session(self).await
    }
    async fn disconnect_session(&self) -> Result<()> {
        DebuggerClient::disconnect_session(self).await
    }
    async fn list_threads(&self) -> Result<Vec<ScriptThread>> {
        DebuggerClient::list_threads(self).await
    }
    async fn reset_threads(&self) -> Result<()> {
        DebuggerClient::reset_threads(self).await
    }
    async fn get_stack_trace(&self, thread_id: u64) -> Result<ScriptThread> {
        DebuggerClient::get_stack_trace(self, thread_id).await
    }
    async fn create_breakpoints(&self, requests: &[BreakpointRequest]) -> Result<Vec<RemoteBreakpoint>> {
        DebuggerClient::create_breakpoints(self, requests).await
    }
    async fn remove_breakpoint(&self, id: i64) -> Result<()> {
        DebuggerClient::remove_breakpoint(self, id).await
    }
    async fn remove_all_breakpoints(&self) -> Result<()> {
        DebuggerClient::remove_all_breakpoints(self).await
    }
    async fn step_into(&self, thread_id: u64) -> Result<()> {
        DebuggerClient::step_into(self, thread_id).await
    }
    async fn step_over(&self, thread_id: u64) -> Result<()> {
        DebuggerClient::step_over(self, thread_id).await
    }
    async fn step_out(&self, thread_id: u64) -> Result<()> {
        DebuggerClient::step_out(self, thread_id).await
    }
    async fn resume(&self, thread_id: u64) -> Result<()> {
        DebuggerClient::resume(self, thread_id).await
    }
    async fn stop(&self, thread_id: u64) -> Result<()> {
        DebuggerClient::stop(self, thread_id).await
    }
    async fn get_variables(&self, thread_id: u64, frame_index: u32) -> Result<Vec<ObjectMember>> {
        DebuggerClient::get_variables(self, thread_id, frame_index).await
    }
    async fn get_members(
        &self,
        thread_id: u64,
        frame_index: u32,
        object_path: Option<&str>,
    ) -> Result<Vec<ObjectMember>> {
        DebuggerClient::get_members(self, thread_id, frame_index, object_path).await
    }
    async fn evaluate(&self, thread_id: u64, frame_index: u32, expression: &str) -> Result<String> {
        DebuggerClient::evaluate(self, thread_id, frame_index, expression).await
    }
}

/// Builds the remote client once config arrives.
pub type ControlConnector = Arc<
    dyn Fn(SessionConfig) -> Pin<Box<dyn Future<Output = Result<Arc<dyn ControlApi>>> + Send>>
        + Send
        + Sync,
>;

/// Production connector: a `DebuggerClient` against the configured sandbox.
pub fn sdapi_connector() -> ControlConnector {
    Arc::new(|config: SessionConfig| {
        Box::pin(async move {
            let client = DebuggerClient::connect(&config.config).await?;
            Ok(Arc::new(client) as Arc<dyn ControlApi>)
        })
    })
}

#[derive(Debug, Clone, Copy)]
pub struct SessionOptions {
    pub poll_interval: Duration,
    pub keepalive_interval: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            poll_interval: POLL_INTERVAL,
            keepalive_interval: KEEPALIVE_INTERVAL,
        }
    }
}

// ============================================================================
// Session
// ============================================================================

pub struct DebugSession {
    writer: Arc<MessageWriter>,
    connector: ControlConnector,
    options: SessionOptions,

    /// Set once `launch` establishes the remote session.
    client: RwLock<Option<Arc<dyn ControlApi>>>,
    /// Config supplied by the `DebuggerConfig` request.
    config: RwLock<Option<SessionConfig>>,
    path_map: RwLock<Option<PathMap>>,
    /// Wakes a suspended `initialize` handler; dropped on teardown.
    config_tx: Mutex<Option<oneshot::Sender<()>>>,

    /// Client path -> remote breakpoint ids. Setting breakpoints for a path
    /// is always a full replace.
    breakpoints: DashMap<String, Vec<i64>>,
    tracker: Mutex<ThreadTracker>,
    handles: HandleStore,

    poll_task: Mutex<Option<JoinHandle<()>>>,
    shutdown: Notify,
}

/// Serve one editor connection over the given streams until it disconnects.
pub async fn run<R, W>(reader: R, writer: W) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: tokio::io::AsyncWrite + Send + Unpin + 'static,
{
    let session = DebugSession::new(
        Arc::new(MessageWriter::new(writer)),
        sdapi_connector(),
        SessionOptions::default(),
    );
    session.serve(MessageReader::new(reader)).await
}

impl DebugSession {
    pub fn new(writer: Arc<MessageWriter>, connector: ControlConnector, options: SessionOptions) -> Arc<Self> {
        Arc::new(Self {
            writer,
            connector,
            options,
            client: RwLock::new(None),
            config: RwLock::new(None),
            path_map: RwLock::new(None),
            config_tx: Mutex::new(None),
            breakpoints: DashMap::new(),
            tracker: Mutex::new(ThreadTracker::new()),
            handles: HandleStore::new(),
            poll_task: Mutex::new(None),
            shutdown: Notify::new(),
        })
    }

    /// Read loop. Every request runs as its own task so a slow remote call
    /// never blocks pipelined requests.
    pub async fn serve<R: AsyncRead + Unpin>(self: &Arc<Self>, mut reader: MessageReader<R>) -> Result<()> {
        loop {
            tokio::select! {
                _ = self.shutdown.notified() => break,
                next = reader.next_request() => match next {
                    Ok(Some(request)) => {
                        let session = Arc::clone(self);
                        tokio::spawn(async move {
                            session.dispatch(request).await;
                        });
                    }
                    Ok(None) => {
                        info!("editor closed the connection");
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "transport failure, ending session");
                        break;
                    }
                },
            }
        }
        self.teardown().await;
        Ok(())
    }

    async fn dispatch(self: Arc<Self>, request: Request) {
        let seq = request.seq;
        let command = request.command.clone();
        debug!(command = %command, seq, "request");

        let result = match command.as_str() {
            "initialize" => self.handle_initialize(request).await,
            COMMAND_DEBUGGER_CONFIG => self.handle_debugger_config(request).await,
            "launch" => self.handle_launch(request).await,
            "configurationDone" => self.handle_configuration_done(request).await,
            "setBreakpoints" => self.handle_set_breakpoints(request).await,
            "threads" => self.handle_threads(request).await,
            "stackTrace" => self.handle_stack_trace(request).await,
            "scopes" => self.handle_scopes(request).await,
            "variables" => self.handle_variables(request).await,
            "evaluate" => self.handle_evaluate(request).await,
            "continue" => self.handle_continue(request).await,
            "next" => self.handle_step(request, StepKind::Over).await,
            "stepIn" => self.handle_step(request, StepKind::Into).await,
            "stepOut" => self.handle_step(request, StepKind::Out).await,
            "pause" => self.handle_pause(request).await,
            "disconnect" => self.handle_disconnect(request).await,
            _ => {
                self.writer
                    .send_response(seq, &command, false, Some("Command not supported".to_string()), None)
                    .await
            }
        };

        if let Err(e) = result {
            error!(command = %command, error = %e, "request handler failed");
            let _ = self
                .writer
                .send_response(seq, &command, false, Some(e.to_string()), None)
                .await;
        }
    }

    // ========================================================================
    // Handshake
    // ========================================================================

    async fn handle_initialize(&self, request: Request) -> Result<()> {
        // Park the waker first, then check for config: the config handler
        // stores config before it looks for a waiting sender, so this order
        // cannot lose a concurrently arriving DebuggerConfig.
        let (tx, rx) = oneshot::channel();
        *self.config_tx.lock().await = Some(tx);

        let rx = if self.config.read().await.is_some() {
            // Editor pushed config eagerly; nothing to wait for.
            self.config_tx.lock().await.take();
            None
        } else {
            Some(rx)
        };

        if let Some(rx) = rx {
            self.writer.send_event(EVENT_GET_DEBUGGER_CONFIG, None).await?;
            if rx.await.is_err() {
                // Sender dropped: session tore down before config arrived.
                return self
                    .writer
                    .send_response(
                        request.seq,
                        &request.command,
                        false,
                        Some("session closed before configuration was provided".to_string()),
                        None,
                    )
                    .await;
            }
        }

        let capabilities = serde_json::to_value(Capabilities::adapter_default())?;
        self.writer
            .send_response(request.seq, &request.command, true, None, Some(capabilities))
            .await
    }

    async fn handle_debugger_config(&self, request: Request) -> Result<()> {
        let config: SessionConfig = parse_args(request.arguments.clone())?;
        config.config.validate()?;

        *self.path_map.write().await = Some(PathMap::new(config.cartridges.clone()));
        *self.config.write().await = Some(config);

        // Resume a suspended initialize, if one is waiting.
        if let Some(tx) = self.config_tx.lock().await.take() {
            let _ = tx.send(());
        }

        self.writer
            .send_response(request.seq, &request.command, true, None, None)
            .await
    }

    // ========================================================================
    // Launch / configuration
    // ========================================================================

    async fn handle_launch(&self, request: Request) -> Result<()> {
        let _args: LaunchArguments = parse_args(request.arguments.clone()).unwrap_or_default();

        if self.client.read().await.is_some() {
            // Already connected: a second launch is a no-op.
            return self
                .writer
                .send_response(request.seq, &request.command, true, None, None)
                .await;
        }

        let config = match self.config.read().await.clone() {
            Some(config) => config,
            None => {
                return self
                    .writer
                    .send_response(
                        request.seq,
                        &request.command,
                        false,
                        Some("launch received before debugger configuration".to_string()),
                        None,
                    )
                    .await;
            }
        };

        let hostname = config.config.hostname.clone();
        let launched: Result<Arc<dyn ControlApi>> = async {
            let client = (self.connector)(config).await?;
            client.establish_session().await?;
            // Clean slate: whatever breakpoints an earlier session left
            // behind are gone before the editor sends its own.
            client.remove_all_breakpoints().await?;
            Ok(client)
        }
        .await;

        match launched {
            Ok(client) => {
                *self.client.write().await = Some(client);
                info!(host = %hostname, "remote debugger session established");
                self.writer
                    .send_response(request.seq, &request.command, true, None, None)
                    .await?;
                self.writer.send_event("initialized", None).await
            }
            Err(e) => {
                error!(host = %hostname, error = %e, "launch failed");
                self.log_output(format!("Failed to connect to remote debugger: {}", e))
                    .await;
                self.writer
                    .send_response(request.seq, &request.command, false, Some(e.to_string()), None)
                    .await?;
                self.writer.send_event("terminated", None).await
            }
        }
    }

    async fn handle_configuration_done(self: &Arc<Self>, request: Request) -> Result<()> {
        if let Some(client) = self.client.read().await.clone() {
            self.start_poll_loop(client).await;
        }
        // Protocol compliance: always acknowledge, connected or not.
        self.writer
            .send_response(request.seq, &request.command, true, None, None)
            .await
    }

    // ========================================================================
    // Breakpoints
    // ========================================================================

    async fn handle_set_breakpoints(&self, request: Request) -> Result<()> {
        let args: SetBreakpointsArguments = parse_args(request.arguments.clone())?;

        let path = match args.source.path.clone() {
            Some(path) => path,
            None => {
                return self
                    .respond_breakpoints_failure(&request, "breakpoint source has no path")
                    .await;
            }
        };

        let lines: Vec<u32> = match (&args.breakpoints, &args.lines) {
            (Some(breakpoints), _) => breakpoints.iter().map(|bp| bp.line).collect(),
            (None, Some(lines)) => lines.clone(),
            (None, None) => Vec::new(),
        };

        let remote_path = self.to_remote_or_sentinel(&path).await;
        if remote_path.contains(CLIENT_SCRIPT_MARKER) {
            // Browser-side scripts never reach the remote runtime; refuse
            // without touching the remote store.
            return self
                .respond_breakpoints_failure(&request, "client-side scripts cannot be debugged in this session")
                .await;
        }

        let client = match self.client.read().await.clone() {
            Some(client) => client,
            None => {
                return self
                    .respond_breakpoints_failure(&request, "no remote debugger session")
                    .await;
            }
        };

        // Full replace: drop everything previously tracked for this path.
        if let Some((_, old_ids)) = self.breakpoints.remove(&path) {
            for id in old_ids {
                if let Err(e) = client.remove_breakpoint(id).await {
                    warn!(id, error = %e, "failed to remove stale breakpoint");
                }
            }
        }

        if lines.is_empty() {
            let body = serde_json::to_value(SetBreakpointsResponseBody { breakpoints: Vec::new() })?;
            return self
                .writer
                .send_response(request.seq, &request.command, true, None, Some(body))
                .await;
        }

        let requests: Vec<BreakpointRequest> = lines
            .iter()
            .map(|&line| BreakpointRequest {
                line_number: line,
                script_path: remote_path.clone(),
            })
            .collect();

        match client.create_breakpoints(&requests).await {
            Ok(created) => {
                self.breakpoints
                    .insert(path.clone(), created.iter().filter_map(|bp| bp.id).collect());

                let breakpoints = created
                    .iter()
                    .map(|bp| Breakpoint {
                        id: bp.id,
                        // The remote store gives no verification feedback at
                        // creation time; report what it accepted.
                        verified: true,
                        message: None,
                        source: Some(Source {
                            name: None,
                            path: Some(path.clone()),
                        }),
                        line: Some(bp.line_number),
                    })
                    .collect();

                let body = serde_json::to_value(SetBreakpointsResponseBody { breakpoints })?;
                self.writer
                    .send_response(request.seq, &request.command, true, None, Some(body))
                    .await
            }
            Err(e) => {
                warn!(path = %path, error = %e, "breakpoint creation failed");
                self.respond_breakpoints_failure(&request, &e.to_string()).await
            }
        }
    }

    async fn respond_breakpoints_failure(&self, request: &Request, message: &str) -> Result<()> {
        let body = serde_json::to_value(SetBreakpointsResponseBody { breakpoints: Vec::new() })?;
        self.writer
            .send_response(request.seq, &request.command, false, Some(message.to_string()), Some(body))
            .await
    }

    // ========================================================================
    // Threads / stacks
    // ========================================================================

    async fn handle_threads(&self, request: Request) -> Result<()> {
        let client = match self.client.read().await.clone() {
            Some(client) => client,
            None => {
                let body = serde_json::to_value(ThreadsResponseBody { threads: Vec::new() })?;
                return self
                    .writer
                    .send_response(
                        request.seq,
                        &request.command,
                        false,
                        Some("no remote debugger session".to_string()),
                        Some(body),
                    )
                    .await;
            }
        };

        let threads = client.list_threads().await?;
        let threads: Vec<Thread> = threads
            .iter()
            .filter(|t| t.is_halted())
            .map(|t| Thread {
                id: t.id as i64,
                name: format!("thread {}", t.id),
            })
            .collect();

        let body = serde_json::to_value(ThreadsResponseBody { threads })?;
        self.writer
            .send_response(request.seq, &request.command, true, None, Some(body))
            .await
    }

    async fn handle_stack_trace(&self, request: Request) -> Result<()> {
        let args: StackTraceArguments = parse_args(request.arguments.clone())?;
        let client = self.require_client().await?;

        let thread = client.get_stack_trace(args.thread_id as u64).await?;
        let call_stack = thread.call_stack.unwrap_or_default();
        let total = call_stack.len() as i64;

        let start = args.start_frame.unwrap_or(0).max(0) as usize;
        let levels = match args.levels {
            Some(levels) if levels > 0 => levels as usize,
            _ => usize::MAX,
        };

        let mut stack_frames = Vec::new();
        for frame in call_stack.iter().skip(start).take(levels) {
            let frame_id = self.handles.frame_handle(FrameRef {
                thread_id: args.thread_id as u64,
                frame_index: frame.index,
            });
            let client_path = self.to_client_or_sentinel(&frame.location.script_path).await;
            stack_frames.push(StackFrame {
                id: frame_id,
                name: frame
                    .location
                    .function_name
                    .clone()
                    .unwrap_or_else(|| "(anonymous)".to_string()),
                source: Some(Source {
                    name: None,
                    path: Some(client_path),
                }),
                line: frame.location.line_number,
                column: 1,
            });
        }

        let body = serde_json::to_value(StackTraceResponseBody {
            stack_frames,
            total_frames: Some(total),
        })?;
        self.writer
            .send_response(request.seq, &request.command, true, None, Some(body))
            .await
    }

    // ========================================================================
    // Scopes / variables / evaluate
    // ========================================================================

    async fn handle_scopes(&self, request: Request) -> Result<()> {
        let args: ScopesArguments = parse_args(request.arguments.clone())?;

        let frame = match self.handles.frame(args.frame_id) {
            Some(frame) => frame,
            None => {
                // Stale or unknown frame id: degrade to no scopes.
                let body = serde_json::to_value(ScopesResponseBody { scopes: Vec::new() })?;
                return self
                    .writer
                    .send_response(request.seq, &request.command, true, None, Some(body))
                    .await;
            }
        };

        let client = self.require_client().await?;
        let members = client.get_variables(frame.thread_id, frame.frame_index).await?;

        let scopes = scope_partitions(members)
            .into_iter()
            .map(|(name, members)| {
                let named = members.len() as i64;
                let reference = self
                    .handles
                    .variable_handle(VariableSlot::Scope { frame, members });
                Scope {
                    name: name.to_string(),
                    variables_reference: reference,
                    expensive: false,
                    named_variables: Some(named),
                }
            })
            .collect();

        let body = serde_json::to_value(ScopesResponseBody { scopes })?;
        self.writer
            .send_response(request.seq, &request.command, true, None, Some(body))
            .await
    }

    async fn handle_variables(&self, request: Request) -> Result<()> {
        let args: VariablesArguments = parse_args(request.arguments.clone())?;

        let variables = match self.handles.variable(args.variables_reference) {
            Some(VariableSlot::Scope { frame, members }) => {
                self.members_to_variables(frame, None, members)
            }
            Some(VariableSlot::Members { frame, object_path }) => {
                let client = self.require_client().await?;
                let members = client
                    .get_members(frame.thread_id, frame.frame_index, Some(&object_path))
                    .await?;
                self.members_to_variables(frame, Some(&object_path), members)
            }
            None => {
                // Unknown handle: neutral response, never a crash.
                Vec::new()
            }
        };

        let body = serde_json::to_value(VariablesResponseBody { variables })?;
        self.writer
            .send_response(request.seq, &request.command, true, None, Some(body))
            .await
    }

    fn members_to_variables(
        &self,
        frame: FrameRef,
        parent: Option<&str>,
        members: Vec<ObjectMember>,
    ) -> Vec<Variable> {
        members
            .into_iter()
            .map(|member| {
                let reference = if is_expandable(&member) {
                    self.handles.variable_handle(VariableSlot::Members {
                        frame,
                        object_path: child_path(parent, &member.name),
                    })
                } else {
                    0
                };
                Variable {
                    name: member.name,
                    value: member.value.unwrap_or_else(|| "undefined".to_string()),
                    value_type: member.value_type,
                    variables_reference: reference,
                }
            })
            .collect()
    }

    async fn handle_evaluate(&self, request: Request) -> Result<()> {
        let args: EvaluateArguments = parse_args(request.arguments.clone())?;

        let frame = args.frame_id.and_then(|id| self.handles.frame(id));
        let frame = match frame {
            Some(frame) => frame,
            None => {
                return self
                    .writer
                    .send_response(
                        request.seq,
                        &request.command,
                        false,
                        Some("evaluation requires a halted stack frame".to_string()),
                        None,
                    )
                    .await;
            }
        };

        let client = self.require_client().await?;
        match client
            .evaluate(frame.thread_id, frame.frame_index, &args.expression)
            .await
        {
            Ok(result) => {
                let body = serde_json::to_value(EvaluateResponseBody {
                    result,
                    variables_reference: 0,
                    value_type: None,
                })?;
                self.writer
                    .send_response(request.seq, &request.command, true, None, Some(body))
                    .await
            }
            Err(e) => {
                self.writer
                    .send_response(request.seq, &request.command, false, Some(e.to_string()), None)
                    .await
            }
        }
    }

    // ========================================================================
    // Execution control
    // ========================================================================

    async fn handle_continue(&self, request: Request) -> Result<()> {
        let args: ThreadIdArguments = parse_args(request.arguments.clone())?;
        let client = self.require_client().await?;
        let thread_id = args.thread_id as u64;

        // Pending goes in first: right after the call the server may still
        // report the thread halted with stale info, and only the next poll
        // tick tells the truth.
        self.tracker.lock().await.mark_pending(thread_id, StopReason::Step);

        match client.resume(thread_id).await {
            Ok(()) => {
                let body = serde_json::to_value(ContinueResponseBody {
                    all_threads_continued: Some(false),
                })?;
                self.writer
                    .send_response(request.seq, &request.command, true, None, Some(body))
                    .await
            }
            Err(e) => {
                self.tracker.lock().await.clear_pending(thread_id);
                self.writer
                    .send_response(request.seq, &request.command, false, Some(e.to_string()), None)
                    .await
            }
        }
    }

    async fn handle_step(&self, request: Request, kind: StepKind) -> Result<()> {
        let args: ThreadIdArguments = parse_args(request.arguments.clone())?;
        let client = self.require_client().await?;
        let thread_id = args.thread_id as u64;

        self.tracker.lock().await.mark_pending(thread_id, StopReason::Step);

        let issued = match kind {
            StepKind::Into => client.step_into(thread_id).await,
            StepKind::Over => client.step_over(thread_id).await,
            StepKind::Out => client.step_out(thread_id).await,
        };

        match issued {
            Ok(()) => {
                self.writer
                    .send_response(request.seq, &request.command, true, None, None)
                    .await
            }
            Err(e) => {
                self.tracker.lock().await.clear_pending(thread_id);
                self.writer
                    .send_response(request.seq, &request.command, false, Some(e.to_string()), None)
                    .await
            }
        }
    }

    async fn handle_pause(&self, request: Request) -> Result<()> {
        let args: ThreadIdArguments = parse_args(request.arguments.clone())?;
        let client = self.require_client().await?;
        let thread_id = args.thread_id as u64;

        self.tracker.lock().await.mark_pending(thread_id, StopReason::Pause);

        match client.stop(thread_id).await {
            Ok(()) => {
                self.writer
                    .send_response(request.seq, &request.command, true, None, None)
                    .await
            }
            Err(e) => {
                self.tracker.lock().await.clear_pending(thread_id);
                self.writer
                    .send_response(request.seq, &request.command, false, Some(e.to_string()), None)
                    .await
            }
        }
    }

    // ========================================================================
    // Disconnect / teardown
    // ========================================================================

    async fn handle_disconnect(&self, request: Request) -> Result<()> {
        self.teardown().await;
        // Best-effort teardown already happened; the response does not
        // depend on its outcome.
        self.writer
            .send_response(request.seq, &request.command, true, None, None)
            .await?;
        self.shutdown.notify_one();
        Ok(())
    }

    async fn teardown(&self) {
        // Cancel a suspended initialize, if any.
        self.config_tx.lock().await.take();

        if let Some(task) = self.poll_task.lock().await.take() {
            task.abort();
        }

        let client = self.client.write().await.take();
        if let Some(client) = client {
            let tracked: Vec<i64> = self
                .breakpoints
                .iter()
                .flat_map(|entry| entry.value().clone())
                .collect();
            self.breakpoints.clear();

            for id in tracked {
                if let Err(e) = client.remove_breakpoint(id).await {
                    debug!(id, error = %e, "breakpoint cleanup failed");
                }
            }
            if let Err(e) = client.disconnect_session().await {
                debug!(error = %e, "remote disconnect failed");
            }
        }
    }

    // ========================================================================
    // Poll loop
    // ========================================================================

    async fn start_poll_loop(self: &Arc<Self>, client: Arc<dyn ControlApi>) {
        let mut guard = self.poll_task.lock().await;
        if guard.is_some() {
            return;
        }

        let session = Arc::clone(self);
        *guard = Some(tokio::spawn(async move {
            let mut poll = tokio::time::interval(session.options.poll_interval);
            poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut keepalive = tokio::time::interval(session.options.keepalive_interval);
            keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // Intervals fire immediately; an instant keep-alive reset would
            // wipe server state the editor just set up.
            keepalive.tick().await;

            loop {
                tokio::select! {
                    _ = poll.tick() => {
                        // A tick is processed to completion, events included,
                        // before the next fetch can start.
                        session.poll_threads(&client).await;
                    }
                    _ = keepalive.tick() => {
                        if let Err(e) = client.reset_threads().await {
                            warn!(error = %e, "keep-alive thread reset failed");
                        }
                    }
                }
            }
        }));
    }

    async fn poll_threads(&self, client: &Arc<dyn ControlApi>) {
        let threads = match client.list_threads().await {
            Ok(threads) => threads,
            Err(e) => {
                debug!(error = %e, "thread poll failed");
                return;
            }
        };

        let events = self.tracker.lock().await.observe(&threads);
        for event in events {
            if let Err(e) = self.emit_thread_event(event).await {
                warn!(error = %e, "failed to emit thread event");
                return;
            }
        }
    }

    async fn emit_thread_event(&self, event: ThreadEvent) -> Result<()> {
        match event {
            ThreadEvent::Started(id) => {
                let body = serde_json::to_value(ThreadEventBody {
                    reason: "started".to_string(),
                    thread_id: id as i64,
                })?;
                self.writer.send_event("thread", Some(body)).await
            }
            ThreadEvent::Stopped { id, reason } => {
                let body = serde_json::to_value(StoppedEventBody {
                    reason: reason.as_str().to_string(),
                    description: None,
                    thread_id: Some(id as i64),
                    preserve_focus_hint: Some(false),
                    all_threads_stopped: Some(false),
                })?;
                self.writer.send_event("stopped", Some(body)).await
            }
            ThreadEvent::Exited(id) => {
                let body = serde_json::to_value(ThreadEventBody {
                    reason: "exited".to_string(),
                    thread_id: id as i64,
                })?;
                self.writer.send_event("thread", Some(body)).await
            }
        }
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    async fn require_client(&self) -> Result<Arc<dyn ControlApi>> {
        self.client
            .read()
            .await
            .clone()
            .ok_or_else(|| DebugError::Connection("no remote debugger session".to_string()))
    }

    async fn to_remote_or_sentinel(&self, client_path: &str) -> String {
        let map = self.path_map.read().await;
        let result = map
            .as_ref()
            .ok_or_else(|| DebugError::Config("no cartridges configured".to_string()))
            .and_then(|map| map.to_remote(client_path));
        match result {
            Ok(path) => path,
            Err(e) => {
                self.log_output(format!("Cannot map workspace path: {}", e)).await;
                UNRESOLVED_PATH.to_string()
            }
        }
    }

    async fn to_client_or_sentinel(&self, remote_path: &str) -> String {
        let map = self.path_map.read().await;
        let result = map
            .as_ref()
            .ok_or_else(|| DebugError::Config("no cartridges configured".to_string()))
            .and_then(|map| map.to_client(remote_path));
        match result {
            Ok(path) => path,
            Err(e) => {
                self.log_output(format!("Cannot map remote path: {}", e)).await;
                UNRESOLVED_PATH.to_string()
            }
        }
    }

    async fn log_output(&self, message: String) {
        let body = OutputEventBody {
            category: Some("console".to_string()),
            output: format!("{}\n", message),
        };
        if let Ok(body) = serde_json::to_value(&body) {
            let _ = self.writer.send_event("output", Some(body)).await;
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum StepKind {
    Into,
    Over,
    Out,
}

fn parse_args<T: DeserializeOwned>(arguments: Option<Value>) -> Result<T> {
    serde_json::from_value(arguments.unwrap_or(Value::Null))
        .map_err(|e| DebugError::Protocol(format!("invalid request arguments: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_args_reports_protocol_errors() {
        let err = parse_args::<ThreadIdArguments>(Some(json!({"wrong": true}))).unwrap_err();
        assert!(matches!(err, DebugError::Protocol(_)));

        let ok: ThreadIdArguments = parse_args(Some(json!({"threadId": 4}))).unwrap();
        assert_eq!(ok.thread_id, 4);
    }

    #[test]
    fn client_script_marker_matches_translated_paths() {
        assert!("/app_storefront/cartridge/client/default/js/main.js".contains(CLIENT_SCRIPT_MARKER));
        assert!(!"/app_storefront/cartridge/controllers/Home.js".contains(CLIENT_SCRIPT_MARKER));
    }
}
