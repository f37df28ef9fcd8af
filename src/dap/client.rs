//! DAP client for communicating with debug adapters
//!
//! A background reader task decodes frames from the adapter and routes
//! them: responses to the pending request they answer (matched by
//! `request_seq`, so arrival order does not matter), events to the session's
//! notification channel, and reverse requests straight back to the adapter
//! with a "not implemented" failure.

use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, BufReader};
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::backend::{
    DebugBackend, ExitReason, Notification, NotificationReceiver, NotificationSender,
};
use crate::common::pending::PendingRequests;
use crate::common::{lock, parse_listen_address, BestEffort, Error, Result};

use super::codec::{self, FrameDecoder};
use super::types::*;

/// Adapters may exit without answering disconnect; don't wait long for it
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(5);

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Connection state of a DAP client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Disconnected,
    Connecting,
    Connected,
}

impl std::fmt::Display for ClientState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
        }
    }
}

/// State shared between the client handle and its reader task
struct Inner {
    /// Adapter stdin or socket write half
    writer: tokio::sync::Mutex<BoxedWriter>,
    /// Sequence number for outgoing messages
    seq: AtomicI64,
    /// Requests waiting for responses
    pending: PendingRequests,
    /// Adapter capabilities (set once by initialize)
    capabilities: OnceLock<Capabilities>,
    state: Mutex<ClientState>,
    /// Adapter subprocess, if we spawned one
    adapter: Mutex<Option<Child>>,
    /// Whether the adapter already reported `terminated`
    terminated_seen: AtomicBool,
    /// Whether the exit notification went out
    exit_sent: AtomicBool,
    notify: NotificationSender,
    request_timeout: Duration,
}

/// DAP client for communicating with a debug adapter
pub struct DapClient {
    inner: Arc<Inner>,
    reader_task: Mutex<Option<JoinHandle<()>>>,
    notifications: Mutex<Option<NotificationReceiver>>,
}

impl DapClient {
    /// Spawn a new DAP adapter speaking over stdin/stdout
    pub async fn spawn(adapter_path: &Path, args: &[String], request_timeout: Duration) -> Result<Self> {
        let mut cmd = Command::new(adapter_path);
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit()); // Let adapter errors go to stderr

        let mut adapter = cmd.spawn().map_err(|e| {
            Error::AdapterStartFailed(format!(
                "Failed to start {}: {}",
                adapter_path.display(),
                e
            ))
        })?;

        let stdin = adapter
            .stdin
            .take()
            .ok_or_else(|| Error::AdapterStartFailed("Failed to get adapter stdin".to_string()))?;
        let stdout = adapter.stdout.take().ok_or_else(|| {
            Error::AdapterStartFailed("Failed to get adapter stdout".to_string())
        })?;

        tracing::info!(adapter = %adapter_path.display(), pid = ?adapter.id(), "Spawned DAP adapter");
        Ok(Self::start(stdout, stdin, Some(adapter), request_timeout))
    }

    /// Spawn an adapter that listens on TCP and connect to it
    ///
    /// The adapter must print `listening at: <addr>` on stdout.
    pub async fn spawn_tcp(
        adapter_path: &Path,
        args: &[String],
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<Self> {
        let mut adapter = Command::new(adapter_path)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| {
                Error::AdapterStartFailed(format!(
                    "Failed to start {}: {}",
                    adapter_path.display(),
                    e
                ))
            })?;

        let stdout = adapter.stdout.take().ok_or_else(|| {
            Error::AdapterStartFailed("Failed to get adapter stdout".to_string())
        })?;
        let mut lines = BufReader::new(stdout).lines();

        let addr = tokio::time::timeout(connect_timeout, async {
            while let Some(line) = lines.next_line().await? {
                tracing::debug!(line = %line, "Adapter output");
                if let Some(addr) = parse_listen_address(&line) {
                    return Ok(addr);
                }
            }
            Err::<String, Error>(Error::AdapterStartFailed(
                "Adapter exited before reporting its listen address".to_string(),
            ))
        })
        .await
        .map_err(|_| {
            Error::AdapterStartFailed(format!(
                "Adapter did not report a listen address within {} seconds",
                connect_timeout.as_secs()
            ))
        })??;

        // Keep draining stdout so the adapter never blocks on a full pipe
        tokio::spawn(async move {
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::debug!(line = %line, "Adapter output");
            }
        });

        let stream = TcpStream::connect(&addr)
            .await
            .map_err(|e| Error::connection_failed(&addr, e))?;
        let (reader, writer) = stream.into_split();

        tracing::info!(adapter = %adapter_path.display(), %addr, "Connected to DAP adapter over TCP");
        Ok(Self::start(reader, writer, Some(adapter), request_timeout))
    }

    /// Connect to an adapter already listening on `addr` (host:port)
    pub async fn connect(addr: &str, request_timeout: Duration) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| Error::connection_failed(addr, e))?;
        let (reader, writer) = stream.into_split();
        tracing::info!(%addr, "Connected to DAP adapter");
        Ok(Self::start(reader, writer, None, request_timeout))
    }

    /// Run the client over an arbitrary byte stream pair
    pub fn from_streams<R, W>(reader: R, writer: W, request_timeout: Duration) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self::start(reader, writer, None, request_timeout)
    }

    fn start<R, W>(reader: R, writer: W, adapter: Option<Child>, request_timeout: Duration) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (notify, notifications) = mpsc::unbounded_channel();

        let inner = Arc::new(Inner {
            writer: tokio::sync::Mutex::new(Box::new(writer)),
            seq: AtomicI64::new(1),
            pending: PendingRequests::new(),
            capabilities: OnceLock::new(),
            state: Mutex::new(ClientState::Connecting),
            adapter: Mutex::new(adapter),
            terminated_seen: AtomicBool::new(false),
            exit_sent: AtomicBool::new(false),
            notify,
            request_timeout,
        });

        let reader_task = tokio::spawn(read_loop(reader, inner.clone()));
        *lock(&inner.state) = ClientState::Connected;

        Self {
            inner,
            reader_task: Mutex::new(Some(reader_task)),
            notifications: Mutex::new(Some(notifications)),
        }
    }

    pub fn state(&self) -> ClientState {
        *lock(&self.inner.state)
    }

    /// Number of requests still waiting for a response
    pub fn pending_requests(&self) -> usize {
        self.inner.pending.len()
    }

    /// Send a request and wait for its response body
    pub async fn request<T: serde::de::DeserializeOwned>(
        &self,
        command: &str,
        arguments: Option<Value>,
    ) -> Result<T> {
        self.request_with_timeout(command, arguments, self.inner.request_timeout)
            .await
    }

    async fn request_with_timeout<T: serde::de::DeserializeOwned>(
        &self,
        command: &str,
        arguments: Option<Value>,
        timeout: Duration,
    ) -> Result<T> {
        let state = self.state();
        if state != ClientState::Connected {
            return Err(Error::invalid_state(command, &state.to_string()));
        }

        let seq = self.inner.next_seq();
        let rx = self.inner.pending.register(seq, command);

        let request = ProtocolMessage::Request(RequestMessage {
            seq,
            command: command.to_string(),
            arguments,
        });
        if let Err(e) = self.inner.send(&request).await {
            self.inner.pending.remove(seq);
            return Err(e);
        }

        let body = self.inner.pending.wait(seq, command, rx, timeout).await?;
        serde_json::from_value(body).map_err(|e| {
            Error::DapProtocol(format!("Failed to parse {} response: {}", command, e))
        })
    }

    /// Tear down the transport and reject every pending request
    pub async fn stop(&self) {
        if let Some(task) = lock(&self.reader_task).take() {
            task.abort();
        }

        let adapter = lock(&self.inner.adapter).take();
        if let Some(mut adapter) = adapter {
            adapter
                .kill()
                .await
                .map_err(Error::from)
                .best_effort("kill adapter");
        }

        let failed = self
            .inner
            .pending
            .fail_all(|command| Error::SessionStopped(command.to_string()));
        if failed > 0 {
            tracing::debug!(failed, "Rejected pending requests on stop");
        }
        self.inner.finish(ExitReason::clean(None));
    }

    fn step_args(thread_id: i64) -> Result<Option<Value>> {
        let args = StepArguments {
            thread_id,
            granularity: Some("statement".to_string()),
        };
        Ok(Some(serde_json::to_value(&args)?))
    }
}

impl Inner {
    fn next_seq(&self) -> i64 {
        self.seq.fetch_add(1, Ordering::SeqCst)
    }

    async fn send(&self, message: &ProtocolMessage) -> Result<()> {
        if tracing::enabled!(tracing::Level::DEBUG) {
            tracing::debug!("DAP >>> {}", serde_json::to_string(message)?);
        }
        let mut writer = self.writer.lock().await;
        codec::write_message(&mut *writer, message).await
    }

    fn emit(&self, event: Event) {
        if matches!(event, Event::Terminated(_)) {
            self.terminated_seen.store(true, Ordering::SeqCst);
        }
        let _ = self.notify.send(Notification::Event(event));
    }

    async fn dispatch(&self, value: Value) {
        tracing::debug!("DAP <<< {}", value);
        let message: ProtocolMessage = match serde_json::from_value(value) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(error = %e, "Dropping unrecognized DAP message");
                return;
            }
        };

        match message {
            ProtocolMessage::Response(response) => self.handle_response(response),
            ProtocolMessage::Event(event) => {
                if let Some(event) = Event::from_message(&event) {
                    self.emit(event);
                }
            }
            ProtocolMessage::Request(request) => {
                tracing::info!(command = %request.command, "Declining reverse request");
                let reply = ResponseMessage::not_implemented(self.next_seq(), &request);
                if let Err(e) = self.send(&ProtocolMessage::Response(reply)).await {
                    tracing::warn!(error = %e, "Failed to answer reverse request");
                }
            }
        }
    }

    fn handle_response(&self, response: ResponseMessage) {
        let Some(command) = self.pending.command(response.request_seq) else {
            tracing::warn!(
                request_seq = response.request_seq,
                command = %response.command,
                "Dropping response to unknown request"
            );
            return;
        };

        let outcome = if response.success {
            Ok(response.body.unwrap_or(Value::Null))
        } else {
            let message = response
                .message
                .unwrap_or_else(|| format!("{} request was rejected", command));
            Err(Error::dap_request_failed(&command, &message))
        };
        self.pending.resolve(response.request_seq, outcome);
    }

    /// Mark the session closed and send the exit notification once
    fn finish(&self, reason: ExitReason) {
        *lock(&self.state) = ClientState::Disconnected;
        if self.exit_sent.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.notify.send(Notification::Exit(reason));
    }

    /// Transport closed underneath us
    fn transport_closed(&self, error: Option<String>) {
        *lock(&self.state) = ClientState::Disconnected;

        let description = error.clone().unwrap_or_else(|| "adapter closed the stream".to_string());
        let failed = self
            .pending
            .fail_all(|_| Error::TransportClosed(description.clone()));
        tracing::info!(failed, reason = %description, "DAP transport closed");

        if !self.terminated_seen.load(Ordering::SeqCst) && !self.exit_sent.load(Ordering::SeqCst) {
            self.emit(Event::Terminated(None));
        }

        let code = lock(&self.adapter)
            .as_mut()
            .and_then(|adapter| adapter.try_wait().ok().flatten())
            .and_then(|status| status.code());
        self.finish(ExitReason { code, error });
    }
}

async fn read_loop<R: AsyncRead + Unpin>(mut reader: R, inner: Arc<Inner>) {
    let mut decoder = FrameDecoder::new();
    let mut buf = vec![0u8; 8192];

    let error = loop {
        match reader.read(&mut buf).await {
            Ok(0) => break None,
            Ok(n) => {
                for message in decoder.feed(&buf[..n]) {
                    inner.dispatch(message).await;
                }
            }
            Err(e) => break Some(e.to_string()),
        }
    };

    inner.transport_closed(error);
}

#[async_trait]
impl DebugBackend for DapClient {
    /// Initialize the debug adapter
    async fn initialize(&self, adapter_id: &str) -> Result<Capabilities> {
        let args = InitializeArguments::new(adapter_id);
        let caps: Capabilities = self
            .request("initialize", Some(serde_json::to_value(&args)?))
            .await?;

        if self.inner.capabilities.set(caps.clone()).is_err() {
            tracing::warn!("Adapter initialized twice; keeping first capabilities");
        }
        Ok(self.capabilities())
    }

    /// Launch a program for debugging
    async fn launch(&self, args: LaunchArguments) -> Result<()> {
        self.request::<Value>("launch", Some(serde_json::to_value(&args)?))
            .await?;
        Ok(())
    }

    /// Attach to a running process
    async fn attach(&self, args: AttachArguments) -> Result<()> {
        self.request::<Value>("attach", Some(serde_json::to_value(&args)?))
            .await?;
        Ok(())
    }

    /// Signal that configuration is done
    async fn configuration_done(&self) -> Result<()> {
        self.request::<Value>("configurationDone", None).await?;
        Ok(())
    }

    /// Set breakpoints for a source file
    async fn set_breakpoints(
        &self,
        source: &Path,
        breakpoints: Vec<SourceBreakpoint>,
    ) -> Result<Vec<Breakpoint>> {
        let args = SetBreakpointsArguments {
            source: Source::from_path(source),
            breakpoints,
        };

        let response: SetBreakpointsResponseBody = self
            .request("setBreakpoints", Some(serde_json::to_value(&args)?))
            .await?;

        Ok(response.breakpoints)
    }

    /// Set function breakpoints
    async fn set_function_breakpoints(
        &self,
        breakpoints: Vec<FunctionBreakpoint>,
    ) -> Result<Vec<Breakpoint>> {
        let args = SetFunctionBreakpointsArguments { breakpoints };

        let response: SetBreakpointsResponseBody = self
            .request("setFunctionBreakpoints", Some(serde_json::to_value(&args)?))
            .await?;

        Ok(response.breakpoints)
    }

    /// Continue execution
    async fn continue_execution(&self, thread_id: i64) -> Result<bool> {
        let args = ContinueArguments {
            thread_id,
            single_thread: false,
        };

        let response: Option<ContinueResponseBody> = self
            .request("continue", Some(serde_json::to_value(&args)?))
            .await?;

        Ok(response.map_or(true, |r| r.all_threads_continued))
    }

    /// Pause execution
    async fn pause(&self, thread_id: i64) -> Result<()> {
        let args = PauseArguments { thread_id };
        self.request::<Value>("pause", Some(serde_json::to_value(&args)?))
            .await?;
        Ok(())
    }

    /// Step over (next)
    async fn next(&self, thread_id: i64) -> Result<()> {
        self.request::<Value>("next", Self::step_args(thread_id)?)
            .await?;
        Ok(())
    }

    /// Step into
    async fn step_in(&self, thread_id: i64) -> Result<()> {
        self.request::<Value>("stepIn", Self::step_args(thread_id)?)
            .await?;
        Ok(())
    }

    /// Step out
    async fn step_out(&self, thread_id: i64) -> Result<()> {
        self.request::<Value>("stepOut", Self::step_args(thread_id)?)
            .await?;
        Ok(())
    }

    /// Get threads
    async fn threads(&self) -> Result<Vec<Thread>> {
        let response: ThreadsResponseBody = self.request("threads", None).await?;
        Ok(response.threads)
    }

    /// Get stack trace
    async fn stack_trace(&self, thread_id: i64) -> Result<Vec<StackFrame>> {
        let args = StackTraceArguments {
            thread_id,
            start_frame: Some(0),
            levels: None,
        };

        let response: StackTraceResponseBody = self
            .request("stackTrace", Some(serde_json::to_value(&args)?))
            .await?;

        Ok(response.stack_frames)
    }

    /// Get scopes for a frame
    async fn scopes(&self, frame_id: i64) -> Result<Vec<Scope>> {
        let args = ScopesArguments { frame_id };

        let response: ScopesResponseBody = self
            .request("scopes", Some(serde_json::to_value(&args)?))
            .await?;

        Ok(response.scopes)
    }

    /// Get variables
    async fn variables(&self, variables_reference: i64) -> Result<Vec<Variable>> {
        let args = VariablesArguments {
            variables_reference,
        };

        let response: VariablesResponseBody = self
            .request("variables", Some(serde_json::to_value(&args)?))
            .await?;

        Ok(response.variables)
    }

    /// Evaluate an expression
    async fn evaluate(
        &self,
        expression: &str,
        frame_id: Option<i64>,
        context: Option<&str>,
    ) -> Result<EvaluateResponseBody> {
        let args = EvaluateArguments {
            expression: expression.to_string(),
            frame_id,
            context: context.map(str::to_string),
        };

        self.request("evaluate", Some(serde_json::to_value(&args)?))
            .await
    }

    /// Disconnect from the debug adapter
    async fn disconnect(&self, terminate_debuggee: bool) {
        let args = DisconnectArguments {
            restart: false,
            terminate_debuggee: Some(terminate_debuggee),
        };

        match serde_json::to_value(&args) {
            Ok(args) => self
                .request_with_timeout::<Value>("disconnect", Some(args), DISCONNECT_TIMEOUT)
                .await
                .best_effort("disconnect"),
            Err(e) => Err::<(), _>(Error::from(e)).best_effort("disconnect"),
        }
    }

    /// Terminate the debuggee
    async fn terminate(&self) -> Result<()> {
        if self.capabilities().supports_terminate_request {
            self.request::<Value>("terminate", None).await?;
        } else {
            tracing::debug!("Adapter lacks terminate support, disconnecting instead");
            self.disconnect(true).await;
        }
        Ok(())
    }

    fn capabilities(&self) -> Capabilities {
        self.inner.capabilities.get().cloned().unwrap_or_default()
    }

    fn take_notifications(&self) -> Option<NotificationReceiver> {
        lock(&self.notifications).take()
    }
}

impl Drop for DapClient {
    fn drop(&mut self) {
        if let Some(task) = lock(&self.reader_task).take() {
            task.abort();
        }
        // Best-effort since we can't await in drop
        if let Some(adapter) = lock(&self.inner.adapter).as_mut() {
            let _ = adapter.start_kill();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::VecDeque;
    use tokio::io::{AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};

    const TIMEOUT: Duration = Duration::from_secs(30);

    /// The adapter end of an in-memory transport
    struct FakeAdapter {
        reader: ReadHalf<DuplexStream>,
        writer: WriteHalf<DuplexStream>,
        decoder: FrameDecoder,
        queued: VecDeque<Value>,
        seq: i64,
    }

    impl FakeAdapter {
        async fn recv(&mut self) -> Value {
            loop {
                if let Some(message) = self.queued.pop_front() {
                    return message;
                }
                let mut buf = [0u8; 1024];
                let n = self.reader.read(&mut buf).await.unwrap();
                assert!(n > 0, "client closed the transport");
                self.queued.extend(self.decoder.feed(&buf[..n]));
            }
        }

        async fn send(&mut self, mut message: Value) {
            self.seq += 1;
            message["seq"] = json!(self.seq);
            let frame = codec::encode(&message).unwrap();
            self.writer.write_all(&frame).await.unwrap();
        }

        async fn respond(&mut self, request: &Value, body: Value) {
            self.send(json!({
                "type": "response",
                "request_seq": request["seq"],
                "success": true,
                "command": request["command"],
                "body": body
            }))
            .await;
        }
    }

    fn pair() -> (DapClient, FakeAdapter) {
        let (client_io, adapter_io) = tokio::io::duplex(64 * 1024);
        let (client_read, client_write) = tokio::io::split(client_io);
        let (reader, writer) = tokio::io::split(adapter_io);
        let client = DapClient::from_streams(client_read, client_write, TIMEOUT);
        let adapter = FakeAdapter {
            reader,
            writer,
            decoder: FrameDecoder::new(),
            queued: VecDeque::new(),
            seq: 1000,
        };
        (client, adapter)
    }

    async fn next_event(rx: &mut NotificationReceiver) -> Notification {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("notification in time")
            .expect("channel open")
    }

    #[tokio::test]
    async fn test_responses_in_reverse_order() {
        let (client, mut adapter) = pair();

        let fake = tokio::spawn(async move {
            let mut requests = Vec::new();
            for _ in 0..3 {
                requests.push(adapter.recv().await);
            }
            for request in requests.iter().rev() {
                let expr = request["arguments"]["expression"].clone();
                adapter.respond(request, json!({ "result": expr, "variablesReference": 0 })).await;
            }
            adapter
        });

        let (a, b, c) = tokio::join!(
            client.evaluate("a", None, None),
            client.evaluate("b", None, None),
            client.evaluate("c", None, None),
        );
        assert_eq!(a.unwrap().result, "a");
        assert_eq!(b.unwrap().result, "b");
        assert_eq!(c.unwrap().result, "c");
        assert_eq!(client.pending_requests(), 0);
        fake.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_then_late_response() {
        let (client, mut adapter) = pair();

        let err = client.threads().await.unwrap_err();
        assert!(matches!(err, Error::Timeout { ref command, .. } if command == "threads"));
        assert_eq!(client.pending_requests(), 0);

        // The late response is dropped; the next request still works
        let late = adapter.recv().await;
        adapter.respond(&late, json!({ "threads": [] })).await;

        let fake = tokio::spawn(async move {
            let request = adapter.recv().await;
            assert_eq!(request["command"], "threads");
            adapter
                .respond(&request, json!({ "threads": [{ "id": 1, "name": "main" }] }))
                .await;
            adapter
        });
        let threads = client.threads().await.unwrap();
        assert_eq!(threads, vec![Thread { id: 1, name: "main".to_string() }]);
        fake.await.unwrap();
    }

    #[tokio::test]
    async fn test_failure_without_message_names_command() {
        let (client, mut adapter) = pair();

        let fake = tokio::spawn(async move {
            let request = adapter.recv().await;
            adapter
                .send(json!({
                    "type": "response",
                    "request_seq": request["seq"],
                    "success": false,
                    "command": "pause"
                }))
                .await;
            adapter
        });

        let err = client.pause(1).await.unwrap_err();
        match err {
            Error::DapRequestFailed { command, message } => {
                assert_eq!(command, "pause");
                assert!(message.contains("pause"));
            }
            other => panic!("Expected request failure, got {:?}", other),
        }
        fake.await.unwrap();
    }

    #[tokio::test]
    async fn test_reverse_request_is_answered() {
        let (client, mut adapter) = pair();

        adapter
            .send(json!({
                "type": "request",
                "command": "runInTerminal",
                "arguments": { "args": ["/bin/sh"] }
            }))
            .await;
        let sent_seq = adapter.seq;

        let reply = adapter.recv().await;
        assert_eq!(reply["type"], "response");
        assert_eq!(reply["request_seq"], sent_seq);
        assert_eq!(reply["success"], false);
        assert_eq!(reply["command"], "runInTerminal");
        drop(client);
    }

    #[tokio::test]
    async fn test_events_are_translated() {
        let (client, mut adapter) = pair();
        let mut rx = client.take_notifications().unwrap();
        assert!(client.take_notifications().is_none());

        adapter
            .send(json!({ "type": "event", "event": "loadedSource", "body": {} }))
            .await;
        adapter
            .send(json!({
                "type": "event",
                "event": "stopped",
                "body": { "reason": "entry", "threadId": 1 }
            }))
            .await;

        match next_event(&mut rx).await {
            Notification::Event(Event::Stopped(body)) => assert_eq!(body.reason, "entry"),
            other => panic!("Expected stopped event, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_stop_rejects_pending() {
        let (client, mut adapter) = pair();
        let client = Arc::new(client);

        let waiting = {
            let client = client.clone();
            tokio::spawn(async move { client.stack_trace(1).await })
        };
        let request = adapter.recv().await;
        assert_eq!(request["command"], "stackTrace");

        client.stop().await;
        let err = waiting.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::SessionStopped(ref c) if c == "stackTrace"));
        assert_eq!(client.state(), ClientState::Disconnected);
        assert!(matches!(
            client.threads().await,
            Err(Error::InvalidState { .. })
        ));
    }

    #[tokio::test]
    async fn test_transport_close_fails_pending_and_notifies() {
        let (client, mut adapter) = pair();
        let client = Arc::new(client);
        let mut rx = client.take_notifications().unwrap();

        let waiting = {
            let client = client.clone();
            tokio::spawn(async move { client.threads().await })
        };
        adapter.recv().await;
        drop(adapter);

        let err = waiting.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::TransportClosed(_)));
        assert_eq!(
            next_event(&mut rx).await,
            Notification::Event(Event::Terminated(None))
        );
        assert!(matches!(next_event(&mut rx).await, Notification::Exit(_)));
    }

    #[tokio::test]
    async fn test_terminate_falls_back_to_disconnect() {
        let (client, mut adapter) = pair();

        let fake = tokio::spawn(async move {
            let init = adapter.recv().await;
            assert_eq!(init["arguments"]["adapterID"], "mock");
            adapter.respond(&init, json!({ "supportsConfigurationDoneRequest": true })).await;

            let next = adapter.recv().await;
            assert_eq!(next["command"], "disconnect");
            assert_eq!(next["arguments"]["terminateDebuggee"], true);
            adapter.respond(&next, Value::Null).await;
        });

        let caps = client.initialize("mock").await.unwrap();
        assert!(caps.supports_configuration_done_request);
        assert!(!caps.supports_terminate_request);
        client.terminate().await.unwrap();
        fake.await.unwrap();
    }

    #[tokio::test]
    async fn test_disconnect_swallows_failure() {
        let (client, adapter) = pair();
        drop(adapter);
        // Transport is gone; disconnect must still return
        client.disconnect(false).await;
    }
}
