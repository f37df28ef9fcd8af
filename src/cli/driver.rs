//! Non-interactive session driver
//!
//! Runs one debug session against any [`DebugBackend`]: initialize, launch
//! or attach, set breakpoints once the backend reports `initialized`, then
//! report every stop (location, locals, watch expressions) and continue
//! until the debuggee exits or the stop budget runs out.

use std::collections::{BTreeMap, VecDeque};
use std::path::PathBuf;
use std::time::Duration;

use crate::backend::{context, DebugBackend, ExitReason, Notification, NotificationReceiver};
use crate::common::{BestEffort, Error, Result};
use crate::dap::{
    AttachArguments, Breakpoint, Event, FunctionBreakpoint, LaunchArguments, SourceBreakpoint,
    StackFrame, StoppedEventBody, Variable,
};

/// Breakpoint location given on the command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BreakpointLocation {
    /// File and line number
    Line { file: PathBuf, line: u32 },
    /// Function name
    Function { name: String },
}

impl BreakpointLocation {
    /// Parse a location string like "file.js:42" or "main"
    pub fn parse(s: &str) -> Result<Self> {
        // Only the last ':' followed by digits splits file from line, so
        // Windows paths like "C:\src\app.js:10" keep their drive letter
        if let Some(colon_idx) = s.rfind(':') {
            let (file_part, line_part) = s.split_at(colon_idx);
            let line_str = &line_part[1..];

            if !line_str.is_empty() && line_str.chars().all(|c| c.is_ascii_digit()) {
                let line: u32 = line_str.parse().map_err(|_| {
                    Error::InvalidLocation(format!("invalid line number: {}", line_str))
                })?;
                if line == 0 || file_part.is_empty() {
                    return Err(Error::InvalidLocation(s.to_string()));
                }
                return Ok(Self::Line {
                    file: PathBuf::from(file_part),
                    line,
                });
            }
        }

        if s.trim().is_empty() {
            return Err(Error::InvalidLocation("empty location".to_string()));
        }
        Ok(Self::Function {
            name: s.to_string(),
        })
    }
}

impl std::fmt::Display for BreakpointLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Line { file, line } => write!(f, "{}:{}", file.display(), line),
            Self::Function { name } => write!(f, "{}", name),
        }
    }
}

/// How the session reaches its debuggee
#[derive(Debug, Clone)]
pub enum Start {
    Launch(LaunchArguments),
    Attach(AttachArguments),
}

#[derive(Debug, Clone)]
pub struct DriverOptions {
    pub adapter_id: String,
    pub breakpoints: Vec<BreakpointLocation>,
    /// Expressions evaluated in the top frame at every stop
    pub watches: Vec<String>,
    /// Disconnect after this many stops
    pub max_stops: usize,
    /// Longest wait for the next notification
    pub event_timeout: Duration,
}

/// Snapshot taken at a stop
#[derive(Debug, Clone, PartialEq)]
pub struct StopReport {
    pub reason: String,
    pub description: Option<String>,
    pub thread_id: i64,
    pub frame: Option<StackFrame>,
    pub locals: Vec<Variable>,
    /// `(expression, result)`; failed evaluations carry their error text
    pub watches: Vec<(String, String)>,
}

/// Something worth telling the user
#[derive(Debug, Clone, PartialEq)]
pub enum Report {
    Breakpoints(Vec<Breakpoint>),
    BreakpointChanged(Breakpoint),
    Stopped(StopReport),
    Output { category: String, text: String },
    Exited(i32),
    Terminated,
}

/// How a driven session ended
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Summary {
    pub stops: usize,
    pub exit_code: Option<i32>,
    pub transport_error: Option<String>,
}

/// Notifications with a lookahead buffer for events seen while waiting
struct Inbox {
    rx: NotificationReceiver,
    stash: VecDeque<Notification>,
    timeout: Duration,
}

impl Inbox {
    async fn next(&mut self) -> Result<Option<Notification>> {
        if let Some(notification) = self.stash.pop_front() {
            return Ok(Some(notification));
        }
        tokio::time::timeout(self.timeout, self.rx.recv())
            .await
            .map_err(|_| Error::timeout("next debug event", self.timeout))
    }

    /// Wait for `initialized`, keeping everything else for later
    async fn wait_initialized(&mut self) -> Result<()> {
        loop {
            match tokio::time::timeout(self.timeout, self.rx.recv()).await {
                Err(_) => return Err(Error::timeout("initialized event", self.timeout)),
                Ok(None) => {
                    return Err(Error::TransportClosed(
                        "session ended before initialization".to_string(),
                    ))
                }
                Ok(Some(Notification::Event(Event::Initialized))) => return Ok(()),
                Ok(Some(Notification::Exit(reason))) => {
                    return Err(Error::TransportClosed(
                        reason
                            .error
                            .unwrap_or_else(|| "session ended before initialization".to_string()),
                    ))
                }
                Ok(Some(other)) => self.stash.push_back(other),
            }
        }
    }
}

/// Drive a session to completion, reporting as it goes
pub async fn run(
    backend: &dyn DebugBackend,
    start: Start,
    options: &DriverOptions,
    mut report: impl FnMut(Report),
) -> Result<Summary> {
    let rx = backend
        .take_notifications()
        .ok_or_else(|| Error::Internal("notifications already taken".to_string()))?;
    let mut inbox = Inbox {
        rx,
        stash: VecDeque::new(),
        timeout: options.event_timeout,
    };

    let capabilities = backend.initialize(&options.adapter_id).await?;
    tracing::debug!(?capabilities, "Backend initialized");

    match start {
        Start::Launch(args) => backend.launch(args).await?,
        Start::Attach(args) => backend.attach(args).await?,
    }
    inbox.wait_initialized().await?;

    let placed = set_breakpoints(
        backend,
        &options.breakpoints,
        capabilities.supports_function_breakpoints,
    )
    .await?;
    if !placed.is_empty() {
        report(Report::Breakpoints(placed));
    }

    if capabilities.supports_configuration_done_request {
        backend.configuration_done().await?;
    }

    let mut summary = Summary::default();
    loop {
        let notification = match inbox.next().await {
            Ok(Some(notification)) => notification,
            Ok(None) => break,
            Err(e) => {
                backend.disconnect(true).await;
                return Err(e);
            }
        };

        match notification {
            Notification::Event(Event::Stopped(body)) => {
                let stop = inspect_stop(backend, body, &options.watches).await?;
                let thread_id = stop.thread_id;
                report(Report::Stopped(stop));
                summary.stops += 1;

                if summary.stops >= options.max_stops {
                    tracing::info!(stops = summary.stops, "Stop budget reached, ending session");
                    backend.disconnect(true).await;
                    break;
                }
                backend
                    .continue_execution(thread_id)
                    .await
                    .best_effort("continue after stop");
            }
            Notification::Event(Event::Output(body)) => report(Report::Output {
                category: body.category.unwrap_or_else(|| "console".to_string()),
                text: body.output,
            }),
            Notification::Event(Event::Breakpoint { breakpoint, .. }) => {
                report(Report::BreakpointChanged(breakpoint))
            }
            Notification::Event(Event::Exited(body)) => {
                summary.exit_code = Some(body.exit_code);
                report(Report::Exited(body.exit_code));
            }
            Notification::Event(Event::Terminated(_)) => {
                report(Report::Terminated);
                backend.disconnect(false).await;
                break;
            }
            Notification::Event(other) => {
                tracing::debug!(event = other.name(), "Event not reported");
            }
            Notification::Exit(ExitReason { code, error }) => {
                summary.exit_code = summary.exit_code.or(code);
                summary.transport_error = error;
                break;
            }
        }
    }

    Ok(summary)
}

/// Set breakpoints grouped by file; function breakpoints only if supported
async fn set_breakpoints(
    backend: &dyn DebugBackend,
    locations: &[BreakpointLocation],
    function_breakpoints: bool,
) -> Result<Vec<Breakpoint>> {
    let mut by_file: BTreeMap<PathBuf, Vec<SourceBreakpoint>> = BTreeMap::new();
    let mut functions = Vec::new();

    for location in locations {
        match location {
            BreakpointLocation::Line { file, line } => {
                let file = file.canonicalize().unwrap_or_else(|_| file.clone());
                by_file
                    .entry(file)
                    .or_default()
                    .push(SourceBreakpoint::at_line(*line));
            }
            BreakpointLocation::Function { name } => functions.push(FunctionBreakpoint {
                name: name.clone(),
                condition: None,
                hit_condition: None,
            }),
        }
    }

    let mut placed = Vec::new();
    for (file, breakpoints) in by_file {
        placed.extend(backend.set_breakpoints(&file, breakpoints).await?);
    }

    if !functions.is_empty() {
        if function_breakpoints {
            placed.extend(backend.set_function_breakpoints(functions).await?);
        } else {
            tracing::warn!(
                count = functions.len(),
                "Backend does not support function breakpoints; skipping"
            );
        }
    }
    Ok(placed)
}

/// Gather location, locals and watch results for a stop
async fn inspect_stop(
    backend: &dyn DebugBackend,
    body: StoppedEventBody,
    watches: &[String],
) -> Result<StopReport> {
    let thread_id = match body.thread_id {
        Some(id) => id,
        None => backend.threads().await?.first().map_or(1, |t| t.id),
    };

    let frame = backend
        .stack_trace(thread_id)
        .await?
        .into_iter()
        .next();

    let mut locals = Vec::new();
    if let Some(frame) = &frame {
        let scopes = backend.scopes(frame.id).await?;
        if let Some(scope) = scopes.iter().find(|s| !s.expensive) {
            locals = backend.variables(scope.variables_reference).await?;
        }
    }

    let mut results = Vec::with_capacity(watches.len());
    for expression in watches {
        let value = match backend
            .evaluate(expression, frame.as_ref().map(|f| f.id), Some(context::WATCH))
            .await
        {
            Ok(result) => result.result,
            Err(e) => format!("<error: {}>", e),
        };
        results.push((expression.clone(), value));
    }

    Ok(StopReport {
        reason: body.reason,
        description: body.description.or(body.text),
        thread_id,
        frame,
        locals,
        watches: results,
    })
}
