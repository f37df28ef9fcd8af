//! CDP-to-DAP adapter
//!
//! Drives a JavaScript runtime's inspector over CDP and presents it through
//! the same [`DebugBackend`] contract as a DAP adapter. CDP events are
//! translated into the shared [`Event`] union on the session's notification
//! channel; call frames, scopes and object ids are kept here and exposed
//! through DAP's integer frame ids and variable references.
//!
//! Lines and columns are 1-based on the DAP side and 0-based in CDP.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, Lines};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::backend::{
    self, DebugBackend, ExitReason, Notification, NotificationReceiver, NotificationSender,
};
use crate::common::config::Config;
use crate::common::pending::PendingRequests;
use crate::common::{lock, BestEffort, Error, Result};
use crate::dap::{
    AttachArguments, Breakpoint, Capabilities, EvaluateResponseBody, Event, ExitedEventBody,
    LaunchArguments, OutputEventBody, ProcessEventBody, Scope, Source, SourceBreakpoint,
    StackFrame, StoppedEventBody, Thread, ThreadEventBody, Variable,
};

use super::handles::VariableHandles;
use super::protocol::{
    stop_reason, to_cdp_coordinate, to_dap_coordinate, BreakpointResolvedParams, CallFrame,
    CdpCommand, CdpEvent, CdpMessage, EvaluateResult, GetPropertiesResult, PausedParams,
    PropertyDescriptor, RemoteObject, SetBreakpointResult, TargetInfo, BREAK_ON_START,
};
use super::scripts::ScriptRegistry;
use super::urls::{file_url_to_path, path_to_file_url};
use super::websocket::{WebSocketClient, WsEvent, WsEventReceiver};

/// CDP has no threads; the debuggee is presented as this single one
pub const THREAD_ID: i64 = 1;
const THREAD_NAME: &str = "main";

/// How long teardown waits for the socket to close and the debuggee to exit
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Inspector URL printed on the debuggee's stderr
const WS_URL_PATTERN: &str = r"ws://[^\s]+";

/// Inspector chatter on stderr that is not debuggee output
const INSPECTOR_BANNERS: &[&str] = &[
    "Debugger listening on",
    "For help, see:",
    "Debugger attached.",
    "Waiting for the debugger to disconnect...",
];

/// Settings for a CDP session
#[derive(Debug, Clone)]
pub struct CdpOptions {
    /// Runtime started by `launch`
    pub node_path: PathBuf,
    pub request_timeout: Duration,
    /// Bound on inspector URL discovery and the WebSocket handshake
    pub connect_timeout: Duration,
}

impl Default for CdpOptions {
    fn default() -> Self {
        Self {
            node_path: PathBuf::from("node"),
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl CdpOptions {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            node_path: config.node_executable()?,
            request_timeout: config.timeouts.cdp_request(),
            connect_timeout: config.timeouts.connect(),
        })
    }
}

/// Lifecycle of an adapter session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    Idle,
    Launching,
    Attaching,
    Running,
    Paused,
    Disconnected,
}

impl std::fmt::Display for AdapterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Launching => write!(f, "launching"),
            Self::Attaching => write!(f, "attaching"),
            Self::Running => write!(f, "running"),
            Self::Paused => write!(f, "paused"),
            Self::Disconnected => write!(f, "disconnected"),
        }
    }
}

/// Breakpoint currently set in the target
#[derive(Debug)]
struct ActiveBreakpoint {
    dap_id: i64,
    cdp_id: String,
}

/// Per-session translation state
#[derive(Debug, Default)]
struct Session {
    scripts: ScriptRegistry,
    handles: VariableHandles,
    /// Call frames of the current pause, empty while running
    frames: Vec<CallFrame>,
    /// DAP id of `frames[0]`; ids are never reused across pauses
    frame_base: i64,
    next_frame_id: i64,
    /// First default execution context, the debuggee's main one
    main_context: Option<i64>,
    /// Bumped on every resume; lookups that span a resume are stale
    epoch: u64,
    breakpoints: HashMap<PathBuf, Vec<ActiveBreakpoint>>,
    /// Breakpoints set before the target was connected
    pending_breakpoints: BTreeMap<PathBuf, Vec<(i64, SourceBreakpoint)>>,
    /// CDP breakpoint id to DAP breakpoint id
    cdp_breakpoints: HashMap<String, i64>,
    next_breakpoint_id: i64,
}

impl Session {
    fn assign_ids(&mut self, breakpoints: Vec<SourceBreakpoint>) -> Vec<(i64, SourceBreakpoint)> {
        breakpoints
            .into_iter()
            .map(|bp| {
                self.next_breakpoint_id += 1;
                (self.next_breakpoint_id, bp)
            })
            .collect()
    }

    fn pause(&mut self, frames: Vec<CallFrame>) {
        self.frame_base = self.next_frame_id;
        self.next_frame_id += frames.len() as i64;
        self.frames = frames;
    }

    /// Forget everything tied to the current pause
    fn resume(&mut self) {
        self.frames.clear();
        self.handles.invalidate();
        self.epoch += 1;
    }

    fn frame_index(&self, frame_id: i64) -> Option<usize> {
        let index = usize::try_from(frame_id.checked_sub(self.frame_base)?).ok()?;
        (index < self.frames.len()).then_some(index)
    }

    fn frame(&self, frame_id: i64) -> Option<&CallFrame> {
        self.frame_index(frame_id)
            .and_then(|index| self.frames.get(index))
    }

    fn context_created(&mut self, id: i64, is_default: bool) {
        if is_default && self.main_context.is_none() {
            self.main_context = Some(id);
        }
    }

    /// Whether `id` was the main context
    fn context_destroyed(&mut self, id: i64) -> bool {
        if self.main_context == Some(id) {
            self.main_context = None;
            true
        } else {
            false
        }
    }
}

struct Inner {
    options: CdpOptions,
    ws: Mutex<Option<Arc<WebSocketClient>>>,
    next_id: AtomicI64,
    pending: PendingRequests,
    state: Mutex<AdapterState>,
    session: Mutex<Session>,
    capabilities: OnceLock<Capabilities>,
    /// Launched debuggee
    child: Mutex<Option<Child>>,
    /// Session started by `launch` rather than `attach`
    launched: AtomicBool,
    stop_on_entry: AtomicBool,
    entry_handled: AtomicBool,
    /// The next `Debugger.resumed` comes from skipping the entry break
    silent_resume: AtomicBool,
    terminated_sent: AtomicBool,
    exit_sent: AtomicBool,
    notify: NotificationSender,
}

/// DAP-shaped debugger backed by a CDP target
pub struct CdpAdapter {
    inner: Arc<Inner>,
    notifications: Mutex<Option<NotificationReceiver>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl CdpAdapter {
    pub fn new(options: CdpOptions) -> Self {
        let (notify, notifications) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Inner {
                options,
                ws: Mutex::new(None),
                next_id: AtomicI64::new(1),
                pending: PendingRequests::new(),
                state: Mutex::new(AdapterState::Idle),
                session: Mutex::new(Session::default()),
                capabilities: OnceLock::new(),
                child: Mutex::new(None),
                launched: AtomicBool::new(false),
                stop_on_entry: AtomicBool::new(false),
                entry_handled: AtomicBool::new(false),
                silent_resume: AtomicBool::new(false),
                terminated_sent: AtomicBool::new(false),
                exit_sent: AtomicBool::new(false),
                notify,
            }),
            notifications: Mutex::new(Some(notifications)),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(CdpOptions::from_config(config)?))
    }

    pub fn state(&self) -> AdapterState {
        self.inner.state()
    }

    fn spawn<F>(&self, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        lock(&self.tasks).push(tokio::spawn(future));
    }

    /// Start the runtime paused on its first line and connect to its inspector
    #[tracing::instrument(skip(self, args), fields(program = %args.program))]
    async fn launch_node(&self, args: LaunchArguments) -> Result<()> {
        self.inner.begin(AdapterState::Launching, "launch")?;
        self.inner.launched.store(true, Ordering::SeqCst);
        self.inner
            .stop_on_entry
            .store(args.stop_on_entry, Ordering::SeqCst);

        match self.start_node(&args).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.inner.kill_child().await;
                self.inner.reset();
                Err(e)
            }
        }
    }

    async fn start_node(&self, args: &LaunchArguments) -> Result<()> {
        let node = &self.inner.options.node_path;
        let runtime_args: Vec<String> = args
            .extra
            .get("runtimeArgs")
            .and_then(Value::as_array)
            .map(|list| {
                list.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let mut cmd = Command::new(node);
        cmd.args(&runtime_args)
            .arg("--inspect-brk=127.0.0.1:0")
            .arg(&args.program)
            .args(&args.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(cwd) = &args.cwd {
            cmd.current_dir(cwd);
        }
        if let Some(env) = &args.env {
            cmd.envs(env);
        }

        let mut child = cmd.spawn().map_err(|e| {
            Error::AdapterStartFailed(format!("Failed to start {}: {}", node.display(), e))
        })?;
        let pid = child.id();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take().ok_or_else(|| {
            Error::AdapterStartFailed("Failed to get debuggee stderr".to_string())
        })?;
        *lock(&self.inner.child) = Some(child);
        tracing::info!(node = %node.display(), pid = ?pid, "Spawned debuggee");

        let pattern = Regex::new(WS_URL_PATTERN).map_err(|e| Error::Internal(e.to_string()))?;
        let mut lines = BufReader::new(stderr).lines();
        let timeout = self.inner.options.connect_timeout;

        let ws_url = tokio::time::timeout(timeout, async {
            while let Some(line) = lines.next_line().await? {
                if let Some(found) = pattern.find(&line) {
                    return Ok(found.as_str().to_string());
                }
                tracing::debug!(line = %line, "Debuggee stderr before inspector URL");
            }
            Err::<String, Error>(Error::AdapterStartFailed(
                "Debuggee exited before printing its inspector URL".to_string(),
            ))
        })
        .await
        .map_err(|_| {
            Error::AdapterStartFailed(format!(
                "No inspector URL within {} seconds",
                timeout.as_secs()
            ))
        })??;

        self.spawn(forward_output(lines, "stderr", self.inner.clone()));
        if let Some(stdout) = stdout {
            self.spawn(forward_output(
                BufReader::new(stdout).lines(),
                "stdout",
                self.inner.clone(),
            ));
        }

        let process = ProcessEventBody {
            name: args.program.clone(),
            system_process_id: pid.map(i64::from),
            is_local_process: Some(true),
            start_method: Some("launch".to_string()),
        };
        self.connect(&ws_url, process).await
    }

    /// Connect to a running inspector
    ///
    /// Uses `webSocketDebuggerUrl` from the arguments when given, otherwise
    /// asks `http://host:port/json` for one.
    #[tracing::instrument(skip(self, args))]
    async fn attach_target(&self, args: AttachArguments) -> Result<()> {
        self.inner.begin(AdapterState::Attaching, "attach")?;
        let stop_on_entry = args
            .extra
            .get("stopOnEntry")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        self.inner
            .stop_on_entry
            .store(stop_on_entry, Ordering::SeqCst);

        let result = async {
            let ws_url = match args.extra.get("webSocketDebuggerUrl").and_then(Value::as_str) {
                Some(url) => url.to_string(),
                None => {
                    let host = args.host.as_deref().unwrap_or("127.0.0.1");
                    let port = args.port.unwrap_or(9229);
                    discover_websocket_url(host, port, self.inner.options.connect_timeout).await?
                }
            };

            let process = ProcessEventBody {
                name: ws_url.clone(),
                system_process_id: args.pid.map(i64::from),
                is_local_process: None,
                start_method: Some("attach".to_string()),
            };
            self.connect(&ws_url, process).await
        }
        .await;

        if result.is_err() {
            self.inner.reset();
        }
        result
    }

    async fn connect(&self, ws_url: &str, process: ProcessEventBody) -> Result<()> {
        let (ws, events) =
            WebSocketClient::connect(ws_url, self.inner.options.connect_timeout).await?;
        *lock(&self.inner.ws) = Some(Arc::new(ws));
        self.spawn(event_loop(self.inner.clone(), events));
        self.inner.set_state(AdapterState::Running);
        tracing::info!(%ws_url, "Connected to inspector");

        self.inner.command("Runtime.enable", json!({})).await?;
        self.inner.command("Debugger.enable", json!({})).await?;
        self.inner.flush_pending_breakpoints().await;

        self.inner.emit(Event::Process(process));
        self.inner.emit(Event::Thread(ThreadEventBody {
            reason: "started".to_string(),
            thread_id: THREAD_ID,
        }));
        self.inner.emit(Event::Initialized);
        Ok(())
    }

    async fn step(&self, method: &str) -> Result<()> {
        self.inner.command(method, json!({})).await?;
        Ok(())
    }
}

/// Ask an inspector's HTTP endpoint for a WebSocket debugger URL
pub async fn discover_websocket_url(host: &str, port: u16, timeout: Duration) -> Result<String> {
    let endpoint = format!("http://{}:{}/json", host, port);
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .no_proxy()
        .build()?;

    let targets: Vec<TargetInfo> = client
        .get(&endpoint)
        .send()
        .await
        .map_err(|e| Error::connection_failed(&endpoint, e))?
        .error_for_status()?
        .json()
        .await?;
    tracing::debug!(count = targets.len(), %endpoint, "Discovered inspector targets");

    let preferred = targets
        .iter()
        .find(|t| t.kind == "node" && t.web_socket_debugger_url.is_some())
        .or_else(|| targets.iter().find(|t| t.web_socket_debugger_url.is_some()));

    preferred
        .and_then(|t| t.web_socket_debugger_url.clone())
        .ok_or_else(|| Error::connection_failed(&endpoint, "no debuggable targets"))
}

impl Inner {
    fn state(&self) -> AdapterState {
        *lock(&self.state)
    }

    /// Leave `Idle` for a starting state
    fn begin(&self, next: AdapterState, action: &str) -> Result<()> {
        let mut state = lock(&self.state);
        if *state != AdapterState::Idle {
            return Err(Error::invalid_state(action, &state.to_string()));
        }
        *state = next;
        Ok(())
    }

    /// Back to `Idle` after a failed launch or attach
    fn reset(&self) {
        lock(&self.ws).take();
        self.launched.store(false, Ordering::SeqCst);
        *lock(&self.state) = AdapterState::Idle;
    }

    fn set_state(&self, next: AdapterState) {
        let mut state = lock(&self.state);
        if *state != AdapterState::Disconnected {
            *state = next;
        }
    }

    fn emit(&self, event: Event) {
        if self.exit_sent.load(Ordering::SeqCst) {
            tracing::debug!(event = event.name(), "Dropping event after exit");
            return;
        }
        if matches!(event, Event::Terminated(_)) {
            self.terminated_sent.store(true, Ordering::SeqCst);
        }
        let _ = self.notify.send(Notification::Event(event));
    }

    async fn command(&self, method: &str, params: Value) -> Result<Value> {
        let ws = lock(&self.ws).clone().ok_or(Error::NotConnected)?;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let text = serde_json::to_string(&CdpCommand { id, method, params })?;
        let rx = self.pending.register(id, method);

        tracing::debug!("CDP >>> {}", text);
        if let Err(e) = ws.send(&text).await {
            self.pending.remove(id);
            return Err(e);
        }
        drop(ws);

        self.pending
            .wait(id, method, rx, self.options.request_timeout)
            .await
    }

    async fn command_as<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<T> {
        let result = self.command(method, params).await?;
        serde_json::from_value(result)
            .map_err(|e| Error::CdpProtocol(format!("Unexpected {} result: {}", method, e)))
    }

    fn handle_message(self: &Arc<Self>, text: &str) {
        tracing::debug!("CDP <<< {}", text);
        match CdpMessage::parse(text) {
            Ok(CdpMessage::Response { id, result }) => {
                let Some(method) = self.pending.command(id) else {
                    tracing::warn!(id, "Dropping CDP response to unknown command");
                    return;
                };
                let outcome = result.map_err(|e| Error::cdp_command_failed(&method, &e.message));
                self.pending.resolve(id, outcome);
            }
            Ok(CdpMessage::Event(event)) => self.handle_event(event),
            Err(e) => tracing::warn!(error = %e, "Dropping unparsable CDP message"),
        }
    }

    fn handle_event(self: &Arc<Self>, event: CdpEvent) {
        match event {
            CdpEvent::Paused(params) => self.on_paused(params),
            CdpEvent::Resumed => self.on_resumed(),
            CdpEvent::ScriptParsed(params) => {
                tracing::trace!(
                    script_id = %params.script_id,
                    url = %params.url,
                    source_map = ?params.source_map_url,
                    "Script parsed"
                );
                lock(&self.session).scripts.insert(
                    &params.script_id,
                    &params.url,
                    params.source_map_url,
                );
            }
            CdpEvent::BreakpointResolved(params) => self.on_breakpoint_resolved(params),
            CdpEvent::ConsoleApiCalled(params) => {
                self.emit(Event::Output(OutputEventBody::new(
                    params.category(),
                    format!("{}\n", params.text()),
                )));
            }
            CdpEvent::ExceptionThrown(params) => {
                self.emit(Event::Output(OutputEventBody::new(
                    "stderr",
                    format!("Uncaught {}\n", params.exception_details.message()),
                )));
            }
            CdpEvent::ExecutionContextCreated(params) => {
                let context = params.context;
                tracing::debug!(
                    id = context.id,
                    name = %context.name,
                    default = context.is_default(),
                    "Execution context created"
                );
                lock(&self.session).context_created(context.id, context.is_default());
            }
            CdpEvent::ExecutionContextDestroyed(params) => {
                let id = params.execution_context_id;
                let main = lock(&self.session).context_destroyed(id);
                // An attached inspector outlives the debuggee's contexts and
                // closes the socket itself
                if main && self.launched.load(Ordering::SeqCst) {
                    tracing::info!("Debuggee finished, closing inspector connection");
                    self.close_connection();
                } else {
                    tracing::debug!(id, main, "Execution context destroyed");
                }
            }
            CdpEvent::Detached { reason } => {
                tracing::info!(%reason, "Inspector detached");
                self.close_connection();
            }
            CdpEvent::Other { method } => {
                tracing::trace!(%method, "Ignoring CDP event");
            }
        }
    }

    fn on_paused(self: &Arc<Self>, params: PausedParams) {
        let hit_breakpoint_ids: Vec<i64> = {
            let session = lock(&self.session);
            params
                .hit_breakpoints
                .iter()
                .filter_map(|id| session.cdp_breakpoints.get(id).copied())
                .collect()
        };

        let at_entry =
            params.reason == BREAK_ON_START && !self.entry_handled.swap(true, Ordering::SeqCst);
        if at_entry && hit_breakpoint_ids.is_empty() && !self.stop_on_entry.load(Ordering::SeqCst)
        {
            tracing::debug!("Resuming past entry break");
            self.silent_resume.store(true, Ordering::SeqCst);
            let inner = self.clone();
            tokio::spawn(async move {
                inner
                    .command("Debugger.resume", json!({}))
                    .await
                    .best_effort("resume past entry");
            });
            return;
        }

        let reason = stop_reason(&params.reason, !hit_breakpoint_ids.is_empty());
        let text = if reason == "exception" {
            params
                .data
                .as_ref()
                .and_then(|data| data.get("description"))
                .and_then(Value::as_str)
                .map(str::to_string)
        } else {
            None
        };

        lock(&self.session).pause(params.call_frames);
        self.set_state(AdapterState::Paused);

        self.emit(Event::Stopped(StoppedEventBody {
            reason,
            description: None,
            thread_id: Some(THREAD_ID),
            all_threads_stopped: true,
            hit_breakpoint_ids,
            text,
        }));
    }

    fn on_resumed(&self) {
        lock(&self.session).resume();
        self.set_state(AdapterState::Running);

        if self.silent_resume.swap(false, Ordering::SeqCst) {
            return;
        }
        self.emit(Event::Continued {
            thread_id: THREAD_ID,
            all_threads_continued: true,
        });
    }

    fn on_breakpoint_resolved(&self, params: BreakpointResolvedParams) {
        let breakpoint = {
            let session = lock(&self.session);
            let Some(&dap_id) = session.cdp_breakpoints.get(&params.breakpoint_id) else {
                tracing::debug!(id = %params.breakpoint_id, "Resolved breakpoint is not ours");
                return;
            };
            Breakpoint {
                id: Some(dap_id),
                verified: true,
                message: None,
                source: session
                    .scripts
                    .url(&params.location.script_id)
                    .and_then(source_for_url),
                line: Some(to_dap_coordinate(params.location.line_number)),
                column: params.location.column_number.map(to_dap_coordinate),
            }
        };
        self.emit(Event::Breakpoint {
            reason: "changed".to_string(),
            breakpoint,
        });
    }

    /// Start the closing handshake without waiting for it
    fn close_connection(&self) {
        let ws = lock(&self.ws).clone();
        if let Some(ws) = ws {
            tokio::spawn(async move {
                ws.close().await.best_effort("close inspector connection");
            });
        }
    }

    async fn connection_closed(&self, error: Option<String>) {
        lock(&self.ws).take();
        let code = self.reap_child(CLOSE_TIMEOUT).await;
        if let Some(exit_code) = code {
            self.emit(Event::Exited(ExitedEventBody { exit_code }));
        }

        let reason = error
            .clone()
            .unwrap_or_else(|| "inspector connection closed".to_string());
        self.finish(ExitReason { code, error }, |method| {
            Error::TransportClosed(format!("{} ({})", reason, method))
        });
    }

    /// End the session: reject pending commands, drop session state, notify once
    fn finish(&self, reason: ExitReason, make_error: impl Fn(&str) -> Error) {
        *lock(&self.state) = AdapterState::Disconnected;

        let failed = self.pending.fail_all(make_error);
        if failed > 0 {
            tracing::debug!(failed, "Rejected pending CDP commands");
        }

        {
            let mut session = lock(&self.session);
            session.resume();
            session.scripts.clear();
            session.breakpoints.clear();
            session.cdp_breakpoints.clear();
            session.main_context = None;
        }

        if !self.terminated_sent.swap(true, Ordering::SeqCst) && !self.exit_sent.load(Ordering::SeqCst) {
            let _ = self
                .notify
                .send(Notification::Event(Event::Terminated(None)));
        }
        if !self.exit_sent.swap(true, Ordering::SeqCst) {
            tracing::info!(code = ?reason.code, error = ?reason.error, "CDP session ended");
            let _ = self.notify.send(Notification::Exit(reason));
        }
    }

    async fn kill_child(&self) {
        let child = lock(&self.child).take();
        if let Some(mut child) = child {
            child
                .kill()
                .await
                .map_err(Error::from)
                .best_effort("kill debuggee");
            *lock(&self.child) = Some(child);
        }
    }

    /// Exit code of the launched debuggee, if it exits within `wait`
    async fn reap_child(&self, wait: Duration) -> Option<i32> {
        let mut child = lock(&self.child).take()?;
        match tokio::time::timeout(wait, child.wait()).await {
            Ok(Ok(status)) => status.code(),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Failed to collect debuggee exit status");
                None
            }
            Err(_) => {
                *lock(&self.child) = Some(child);
                None
            }
        }
    }

    async fn flush_pending_breakpoints(&self) {
        let pending = std::mem::take(&mut lock(&self.session).pending_breakpoints);
        for (path, entries) in pending {
            match self.apply_breakpoints(&path, entries).await {
                Ok(breakpoints) => {
                    for breakpoint in breakpoints {
                        self.emit(Event::Breakpoint {
                            reason: "changed".to_string(),
                            breakpoint,
                        });
                    }
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to set pending breakpoints");
                }
            }
        }
    }

    /// Replace every breakpoint in `path` with `entries`
    async fn apply_breakpoints(
        &self,
        path: &Path,
        entries: Vec<(i64, SourceBreakpoint)>,
    ) -> Result<Vec<Breakpoint>> {
        let previous = {
            let mut session = lock(&self.session);
            let previous = session.breakpoints.remove(path).unwrap_or_default();
            for old in &previous {
                session.cdp_breakpoints.remove(&old.cdp_id);
            }
            previous
        };
        for old in previous {
            self.command(
                "Debugger.removeBreakpoint",
                json!({ "breakpointId": old.cdp_id }),
            )
            .await
            .best_effort("remove breakpoint");
        }

        let url = path_to_file_url(path)?;
        let source = Source::from_path(path);
        let mut active = Vec::new();
        let mut reported = Vec::with_capacity(entries.len());

        for (dap_id, bp) in entries {
            let mut breakpoint = Breakpoint {
                id: Some(dap_id),
                verified: false,
                message: None,
                source: Some(source.clone()),
                line: Some(bp.line),
                column: bp.column,
            };

            if bp.hit_condition.is_some() {
                breakpoint.message = Some("Hit conditions are not supported".to_string());
                reported.push(breakpoint);
                continue;
            }

            let mut params = json!({
                "url": url,
                "lineNumber": to_cdp_coordinate(bp.line),
            });
            if let Some(column) = bp.column {
                params["columnNumber"] = json!(to_cdp_coordinate(column));
            }
            if let Some(condition) = breakpoint_condition(&bp) {
                params["condition"] = json!(condition);
            }

            match self
                .command_as::<SetBreakpointResult>("Debugger.setBreakpointByUrl", params)
                .await
            {
                Ok(set) => {
                    if let Some(location) = set.locations.first() {
                        breakpoint.verified = true;
                        breakpoint.line = Some(to_dap_coordinate(location.line_number));
                        breakpoint.column = location.column_number.map(to_dap_coordinate);
                    } else {
                        let loaded = lock(&self.session).scripts.script_id(&url).is_some();
                        breakpoint.message = Some(
                            if loaded {
                                "No code at this line"
                            } else {
                                "Pending until the script is loaded"
                            }
                            .to_string(),
                        );
                    }
                    active.push(ActiveBreakpoint {
                        dap_id,
                        cdp_id: set.breakpoint_id,
                    });
                }
                Err(e) => breakpoint.message = Some(e.to_string()),
            }
            reported.push(breakpoint);
        }

        let mut session = lock(&self.session);
        for bp in &active {
            session.cdp_breakpoints.insert(bp.cdp_id.clone(), bp.dap_id);
        }
        session.breakpoints.insert(path.to_path_buf(), active);
        Ok(reported)
    }
}

async fn event_loop(inner: Arc<Inner>, mut events: WsEventReceiver) {
    loop {
        match events.recv().await {
            Some(WsEvent::Message(text)) => inner.handle_message(&text),
            Some(WsEvent::Closed(error)) => {
                inner.connection_closed(error).await;
                break;
            }
            None => {
                inner.connection_closed(None).await;
                break;
            }
        }
    }
}

/// Relay debuggee output lines as `output` events
async fn forward_output<R: AsyncRead + Unpin>(
    mut lines: Lines<BufReader<R>>,
    category: &'static str,
    inner: Arc<Inner>,
) {
    while let Ok(Some(line)) = lines.next_line().await {
        if INSPECTOR_BANNERS.iter().any(|banner| line.starts_with(banner)) {
            tracing::debug!(line = %line, "Inspector message");
            continue;
        }
        inner.emit(Event::Output(OutputEventBody::new(
            category,
            format!("{}\n", line),
        )));
    }
}

/// Condition expression sent to CDP for a breakpoint
///
/// Log points become a condition that prints through `console.log` and
/// evaluates to false, so the debuggee never pauses on them.
fn breakpoint_condition(bp: &SourceBreakpoint) -> Option<String> {
    let condition = bp
        .condition
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty());
    match (&bp.log_message, condition) {
        (Some(message), Some(condition)) => Some(format!(
            "({}) && {}",
            condition,
            log_point_expression(message)
        )),
        (Some(message), None) => Some(log_point_expression(message)),
        (None, condition) => condition.map(str::to_string),
    }
}

fn log_point_expression(message: &str) -> String {
    format!("(console.log({}), false)", template_literal(message))
}

/// JavaScript template literal for a log message; `{expr}` is interpolated
fn template_literal(message: &str) -> String {
    let mut out = String::from("`");
    let mut chars = message.chars();
    while let Some(c) = chars.next() {
        match c {
            '{' => {
                let mut expr = String::new();
                let mut depth = 1;
                for next in chars.by_ref() {
                    match next {
                        '{' => depth += 1,
                        '}' => {
                            depth -= 1;
                            if depth == 0 {
                                break;
                            }
                        }
                        _ => {}
                    }
                    expr.push(next);
                }
                out.push_str("${");
                out.push_str(&expr);
                out.push('}');
            }
            '`' | '\\' => {
                out.push('\\');
                out.push(c);
            }
            '$' => out.push_str("\\$"),
            _ => out.push(c),
        }
    }
    out.push('`');
    out
}

fn source_for_url(url: &str) -> Option<Source> {
    if url.is_empty() {
        return None;
    }
    Some(match file_url_to_path(url) {
        Some(path) => Source::from_path(&path),
        None => Source {
            name: Some(url.to_string()),
            path: None,
            source_reference: None,
        },
    })
}

fn to_stack_frame(id: i64, frame: &CallFrame, scripts: &ScriptRegistry) -> StackFrame {
    let url = if frame.url.is_empty() {
        scripts.url(&frame.location.script_id).unwrap_or_default()
    } else {
        frame.url.as_str()
    };
    let name = if frame.function_name.is_empty() {
        "(anonymous)".to_string()
    } else {
        frame.function_name.clone()
    };

    StackFrame {
        id,
        name,
        source: source_for_url(url),
        line: to_dap_coordinate(frame.location.line_number),
        column: to_dap_coordinate(frame.location.column_number.unwrap_or(0)),
    }
}

fn to_variable(name: String, value: &RemoteObject, handles: &mut VariableHandles) -> Variable {
    Variable {
        name,
        value: value.display(),
        type_name: Some(value.type_name()),
        variables_reference: value
            .object_id
            .as_deref()
            .map_or(0, |object_id| handles.mint(object_id)),
    }
}

fn property_variable(property: PropertyDescriptor, handles: &mut VariableHandles) -> Option<Variable> {
    match (&property.value, &property.get) {
        (Some(value), _) => Some(to_variable(property.name.clone(), value, handles)),
        (None, Some(_)) => Some(Variable {
            name: property.name,
            value: "(getter)".to_string(),
            type_name: None,
            variables_reference: 0,
        }),
        (None, None) => None,
    }
}

fn text_result(text: String) -> EvaluateResponseBody {
    EvaluateResponseBody {
        result: text,
        type_name: None,
        variables_reference: 0,
    }
}

#[async_trait]
impl DebugBackend for CdpAdapter {
    async fn initialize(&self, adapter_id: &str) -> Result<Capabilities> {
        tracing::debug!(adapter_id, "Initializing CDP adapter");
        let caps = Capabilities {
            supports_configuration_done_request: true,
            supports_function_breakpoints: false,
            supports_conditional_breakpoints: true,
            supports_hit_conditional_breakpoints: false,
            supports_evaluate_for_hovers: true,
            supports_log_points: true,
            supports_set_variable: false,
            supports_restart_request: false,
            supports_terminate_request: true,
        };
        if self.inner.capabilities.set(caps).is_err() {
            tracing::warn!("CDP adapter initialized twice");
        }
        Ok(self.capabilities())
    }

    async fn launch(&self, args: LaunchArguments) -> Result<()> {
        self.launch_node(args).await
    }

    async fn attach(&self, args: AttachArguments) -> Result<()> {
        self.attach_target(args).await
    }

    async fn configuration_done(&self) -> Result<()> {
        self.inner
            .command("Runtime.runIfWaitingForDebugger", json!({}))
            .await?;
        Ok(())
    }

    async fn set_breakpoints(
        &self,
        source: &Path,
        breakpoints: Vec<SourceBreakpoint>,
    ) -> Result<Vec<Breakpoint>> {
        match self.inner.state() {
            AdapterState::Idle | AdapterState::Launching | AdapterState::Attaching => {
                let mut session = lock(&self.inner.session);
                let entries = session.assign_ids(breakpoints);
                let reported = entries
                    .iter()
                    .map(|(id, bp)| Breakpoint {
                        id: Some(*id),
                        verified: false,
                        message: Some("Pending until the debuggee starts".to_string()),
                        source: Some(Source::from_path(source)),
                        line: Some(bp.line),
                        column: bp.column,
                    })
                    .collect();
                session
                    .pending_breakpoints
                    .insert(source.to_path_buf(), entries);
                Ok(reported)
            }
            AdapterState::Disconnected => Err(Error::NotConnected),
            AdapterState::Running | AdapterState::Paused => {
                let entries = lock(&self.inner.session).assign_ids(breakpoints);
                self.inner.apply_breakpoints(source, entries).await
            }
        }
    }

    async fn continue_execution(&self, _thread_id: i64) -> Result<bool> {
        self.inner.command("Debugger.resume", json!({})).await?;
        Ok(true)
    }

    async fn pause(&self, _thread_id: i64) -> Result<()> {
        self.step("Debugger.pause").await
    }

    async fn next(&self, _thread_id: i64) -> Result<()> {
        self.step("Debugger.stepOver").await
    }

    async fn step_in(&self, _thread_id: i64) -> Result<()> {
        self.step("Debugger.stepInto").await
    }

    async fn step_out(&self, _thread_id: i64) -> Result<()> {
        self.step("Debugger.stepOut").await
    }

    async fn threads(&self) -> Result<Vec<Thread>> {
        Ok(vec![Thread {
            id: THREAD_ID,
            name: THREAD_NAME.to_string(),
        }])
    }

    async fn stack_trace(&self, _thread_id: i64) -> Result<Vec<StackFrame>> {
        let session = lock(&self.inner.session);
        if session.frames.is_empty() {
            return Err(Error::invalid_state("get stack trace", "running"));
        }
        Ok(session
            .frames
            .iter()
            .enumerate()
            .map(|(index, frame)| {
                to_stack_frame(session.frame_base + index as i64, frame, &session.scripts)
            })
            .collect())
    }

    async fn scopes(&self, frame_id: i64) -> Result<Vec<Scope>> {
        let mut guard = lock(&self.inner.session);
        let session = &mut *guard;
        let frame = session
            .frame_index(frame_id)
            .and_then(|index| session.frames.get(index))
            .ok_or(Error::FrameNotFound(frame_id))?;

        Ok(frame
            .scope_chain
            .iter()
            .filter_map(|scope| {
                let object_id = scope.object.object_id.as_deref()?;
                Some(Scope {
                    name: scope.display_name(),
                    variables_reference: session.handles.mint(object_id),
                    expensive: scope.is_expensive(),
                })
            })
            .collect())
    }

    async fn variables(&self, variables_reference: i64) -> Result<Vec<Variable>> {
        let (object_id, epoch) = {
            let session = lock(&self.inner.session);
            let object_id = session.handles.resolve(variables_reference)?.to_string();
            (object_id, session.epoch)
        };

        let properties: GetPropertiesResult = self
            .inner
            .command_as(
                "Runtime.getProperties",
                json!({ "objectId": object_id, "ownProperties": true }),
            )
            .await?;

        let mut session = lock(&self.inner.session);
        if session.epoch != epoch {
            return Err(Error::InvalidVariableReference(variables_reference));
        }
        Ok(properties
            .result
            .into_iter()
            .filter_map(|property| property_variable(property, &mut session.handles))
            .collect())
    }

    async fn evaluate(
        &self,
        expression: &str,
        frame_id: Option<i64>,
        context: Option<&str>,
    ) -> Result<EvaluateResponseBody> {
        let (call_frame_id, epoch) = {
            let session = lock(&self.inner.session);
            let call_frame_id = frame_id
                .and_then(|id| session.frame(id))
                .map(|frame| frame.call_frame_id.clone());
            (call_frame_id, session.epoch)
        };

        let (method, mut params) = match call_frame_id {
            Some(call_frame_id) => (
                "Debugger.evaluateOnCallFrame",
                json!({ "callFrameId": call_frame_id, "expression": expression }),
            ),
            None => ("Runtime.evaluate", json!({ "expression": expression })),
        };
        match context {
            Some(backend::context::HOVER) => params["throwOnSideEffect"] = json!(true),
            Some(backend::context::REPL) => params["includeCommandLineAPI"] = json!(true),
            _ => {}
        }

        match self.inner.command_as::<EvaluateResult>(method, params).await {
            Ok(EvaluateResult {
                exception_details: Some(details),
                ..
            }) => Ok(text_result(details.message())),
            Ok(EvaluateResult { result, .. }) => {
                let mut session = lock(&self.inner.session);
                let variables_reference = match result.object_id.as_deref() {
                    Some(object_id) if session.epoch == epoch => session.handles.mint(object_id),
                    _ => 0,
                };
                Ok(EvaluateResponseBody {
                    result: result.display(),
                    type_name: Some(result.type_name()),
                    variables_reference,
                })
            }
            Err(
                e @ (Error::CdpCommandFailed { .. }
                | Error::Timeout { .. }
                | Error::CdpProtocol(_)),
            ) => {
                tracing::debug!(expression, error = %e, "Evaluation failed");
                Ok(text_result(e.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    async fn disconnect(&self, terminate_debuggee: bool) {
        if terminate_debuggee {
            self.inner.kill_child().await;
        }

        let ws = lock(&self.inner.ws).take();
        if let Some(ws) = ws {
            match tokio::time::timeout(CLOSE_TIMEOUT, ws.close()).await {
                Ok(result) => result.best_effort("close inspector connection"),
                Err(_) => tracing::debug!("Inspector did not acknowledge close"),
            }
        }

        let code = self.inner.reap_child(CLOSE_TIMEOUT).await;
        if let Some(exit_code) = code {
            self.inner.emit(Event::Exited(ExitedEventBody { exit_code }));
        }
        self.inner
            .finish(ExitReason::clean(code), |method| Error::SessionStopped(method.to_string()));
    }

    async fn terminate(&self) -> Result<()> {
        self.disconnect(true).await;
        Ok(())
    }

    fn capabilities(&self) -> Capabilities {
        self.inner.capabilities.get().cloned().unwrap_or_default()
    }

    fn take_notifications(&self) -> Option<NotificationReceiver> {
        lock(&self.notifications).take()
    }
}

impl Drop for CdpAdapter {
    fn drop(&mut self) {
        for task in lock(&self.tasks).drain(..) {
            task.abort();
        }
        if let Some(child) = lock(&self.inner.child).as_mut() {
            let _ = child.start_kill();
        }
    }
}
