//! Operation and notification contract shared by every debug backend
//!
//! A session consumer drives either a [`DapClient`](crate::dap::DapClient)
//! or a [`CdpAdapter`](crate::cdp::CdpAdapter) through [`DebugBackend`] and
//! reads one notification channel per session. Nothing in the contract
//! reveals which transport sits underneath.

use std::path::Path;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::common::{Error, Result};
use crate::dap::{
    AttachArguments, Breakpoint, Capabilities, EvaluateResponseBody, Event, FunctionBreakpoint,
    LaunchArguments, Scope, SourceBreakpoint, StackFrame, Thread, Variable,
};

/// Why a session's transport went away
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitReason {
    /// Debuggee or adapter exit code, when known
    pub code: Option<i32>,
    /// Transport error that ended the session, if it did not end cleanly
    pub error: Option<String>,
}

impl ExitReason {
    pub fn clean(code: Option<i32>) -> Self {
        Self { code, error: None }
    }
}

/// Item on a session's notification channel
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    Event(Event),
    /// Sent once, after the last event, when the transport closes
    Exit(ExitReason),
}

pub type NotificationSender = mpsc::UnboundedSender<Notification>;
pub type NotificationReceiver = mpsc::UnboundedReceiver<Notification>;

/// Evaluate context names understood by DAP
pub mod context {
    pub const WATCH: &str = "watch";
    pub const REPL: &str = "repl";
    pub const HOVER: &str = "hover";
}

#[async_trait]
pub trait DebugBackend: Send + Sync {
    /// Negotiate capabilities; called once per session
    async fn initialize(&self, adapter_id: &str) -> Result<Capabilities>;

    async fn launch(&self, args: LaunchArguments) -> Result<()>;

    async fn attach(&self, args: AttachArguments) -> Result<()>;

    async fn configuration_done(&self) -> Result<()>;

    /// Replace all breakpoints in `source` with `breakpoints`
    async fn set_breakpoints(
        &self,
        source: &Path,
        breakpoints: Vec<SourceBreakpoint>,
    ) -> Result<Vec<Breakpoint>>;

    async fn set_function_breakpoints(
        &self,
        _breakpoints: Vec<FunctionBreakpoint>,
    ) -> Result<Vec<Breakpoint>> {
        Err(Error::Unsupported("function breakpoints".to_string()))
    }

    /// Resume; returns whether all threads continued
    async fn continue_execution(&self, thread_id: i64) -> Result<bool>;

    async fn pause(&self, thread_id: i64) -> Result<()>;

    async fn next(&self, thread_id: i64) -> Result<()>;

    async fn step_in(&self, thread_id: i64) -> Result<()>;

    async fn step_out(&self, thread_id: i64) -> Result<()>;

    async fn threads(&self) -> Result<Vec<Thread>>;

    async fn stack_trace(&self, thread_id: i64) -> Result<Vec<StackFrame>>;

    async fn scopes(&self, frame_id: i64) -> Result<Vec<Scope>>;

    async fn variables(&self, variables_reference: i64) -> Result<Vec<Variable>>;

    async fn evaluate(
        &self,
        expression: &str,
        frame_id: Option<i64>,
        context: Option<&str>,
    ) -> Result<EvaluateResponseBody>;

    /// End the session; never fails
    async fn disconnect(&self, terminate_debuggee: bool);

    /// Terminate the debuggee, falling back to `disconnect`
    async fn terminate(&self) -> Result<()>;

    /// Capabilities negotiated by `initialize` (defaults before that)
    fn capabilities(&self) -> Capabilities;

    /// Take the notification receiver (can only be called once)
    fn take_notifications(&self) -> Option<NotificationReceiver>;
}
