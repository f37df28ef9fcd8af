//! CLI command handling
//!
//! Builds the backend a command asks for, drives one session through it and
//! prints what happens.

pub mod driver;

use std::path::Path;
use std::time::Duration;

use serde_json::{json, Map, Value};

use crate::backend::DebugBackend;
use crate::cdp::CdpAdapter;
use crate::commands::{Commands, SessionArgs};
use crate::common::config::{Config, TransportMode};
use crate::common::{Error, Result};
use crate::dap::{AttachArguments, Breakpoint, DapClient, LaunchArguments, StackFrame};

use driver::{BreakpointLocation, DriverOptions, Report, Start, StopReport, Summary};

/// Dispatch a CLI command
pub async fn dispatch(command: Commands, config: &Config) -> Result<()> {
    match command {
        Commands::Dap {
            program,
            args,
            adapter,
            session,
        } => {
            let name = adapter.unwrap_or_else(|| config.defaults.adapter.clone());
            let adapter_config = config.get_adapter(&name).ok_or_else(|| {
                Error::Config(format!(
                    "Debug adapter '{}' is neither configured nor on PATH",
                    name
                ))
            })?;
            let adapter_id = adapter_config.adapter_id.clone().unwrap_or(name);

            let client = match adapter_config.transport {
                TransportMode::Stdio => {
                    DapClient::spawn(
                        &adapter_config.path,
                        &adapter_config.args,
                        config.timeouts.dap_request(),
                    )
                    .await?
                }
                TransportMode::Tcp => {
                    DapClient::spawn_tcp(
                        &adapter_config.path,
                        &adapter_config.args,
                        config.timeouts.connect(),
                        config.timeouts.dap_request(),
                    )
                    .await?
                }
            };

            let program = program.canonicalize().unwrap_or(program);
            let launch = LaunchArguments {
                program: program.display().to_string(),
                args,
                cwd: current_dir(),
                stop_on_entry: session.stop_on_entry,
                ..Default::default()
            };

            println!("Debugging {} with {}", program.display(), adapter_id);
            let result = drive(&client, &adapter_id, Start::Launch(launch), &session).await;
            client.stop().await;
            result
        }

        Commands::Node {
            script,
            args,
            runtime_args,
            session,
        } => {
            let adapter = CdpAdapter::from_config(config)?;
            let script = script.canonicalize().unwrap_or(script);

            let mut extra = Map::new();
            if !runtime_args.is_empty() {
                extra.insert("runtimeArgs".to_string(), json!(runtime_args));
            }
            let launch = LaunchArguments {
                program: script.display().to_string(),
                args,
                cwd: current_dir(),
                stop_on_entry: session.stop_on_entry,
                extra,
                ..Default::default()
            };

            println!("Debugging {} with node", script.display());
            drive(&adapter, "node", Start::Launch(launch), &session).await
        }

        Commands::Attach {
            host,
            port,
            ws_url,
            session,
        } => {
            let adapter = CdpAdapter::from_config(config)?;

            let mut extra = Map::new();
            extra.insert("stopOnEntry".to_string(), Value::Bool(session.stop_on_entry));
            if let Some(url) = &ws_url {
                extra.insert("webSocketDebuggerUrl".to_string(), json!(url));
            }
            let attach = AttachArguments {
                host: Some(host.clone()),
                port: Some(port),
                extra,
                ..Default::default()
            };

            match &ws_url {
                Some(url) => println!("Attaching to {}", url),
                None => println!("Attaching to inspector at {}:{}", host, port),
            }
            drive(&adapter, "node", Start::Attach(attach), &session).await
        }
    }
}

fn current_dir() -> Option<String> {
    std::env::current_dir()
        .ok()
        .map(|dir| dir.display().to_string())
}

/// Run the driver with the shared session flags and print its reports
async fn drive(
    backend: &dyn DebugBackend,
    adapter_id: &str,
    start: Start,
    session: &SessionArgs,
) -> Result<()> {
    let breakpoints = session
        .breakpoints
        .iter()
        .map(|location| BreakpointLocation::parse(location))
        .collect::<Result<Vec<_>>>()?;

    let options = DriverOptions {
        adapter_id: adapter_id.to_string(),
        breakpoints,
        watches: session.watches.clone(),
        max_stops: session.max_stops.max(1),
        event_timeout: Duration::from_secs(session.timeout),
    };

    let summary = driver::run(backend, start, &options, print_report).await?;
    print_summary(&summary);
    Ok(())
}

fn print_report(report: Report) {
    match report {
        Report::Breakpoints(breakpoints) => {
            println!("Breakpoints:");
            for bp in &breakpoints {
                print_breakpoint(bp);
            }
        }
        Report::BreakpointChanged(bp) => {
            print!("Breakpoint changed:");
            print_breakpoint(&bp);
        }
        Report::Stopped(stop) => print_stop(&stop),
        Report::Output { category, text } => {
            if category == "stderr" {
                eprint!("{}", text);
            } else {
                print!("{}", text);
            }
        }
        Report::Exited(code) => println!("Program exited with code {}", code),
        Report::Terminated => println!("Program terminated"),
    }
}

fn print_breakpoint(bp: &Breakpoint) {
    let id = bp.id.map(|id| id.to_string()).unwrap_or_else(|| "-".into());
    let status = if bp.verified { "✓" } else { "○" };
    let location = match (&bp.source, bp.line) {
        (Some(source), Some(line)) => {
            let file = source
                .path
                .as_deref()
                .or(source.name.as_deref())
                .unwrap_or("?");
            format!("{}:{}", file, line)
        }
        (_, Some(line)) => format!("line {}", line),
        _ => "(pending)".to_string(),
    };

    match &bp.message {
        Some(message) => println!("  {} {} {} ({})", status, id, location, message),
        None => println!("  {} {} {}", status, id, location),
    }
}

fn frame_location(frame: &StackFrame) -> String {
    let source = frame
        .source
        .as_ref()
        .and_then(|s| s.path.as_deref().or(s.name.as_deref()))
        .map(|p| {
            Path::new(p)
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| p.to_string())
        })
        .unwrap_or_else(|| "?".to_string());
    format!("{}:{}", source, frame.line)
}

fn print_stop(stop: &StopReport) {
    match stop.reason.as_str() {
        "breakpoint" => println!("Stopped at breakpoint"),
        "entry" => println!("Stopped at entry point"),
        "step" => println!("Step completed"),
        "pause" => println!("Paused"),
        "exception" => println!(
            "Stopped on exception: {}",
            stop.description.as_deref().unwrap_or("(no description)")
        ),
        other => println!("Stopped: {}", other),
    }

    if let Some(frame) = &stop.frame {
        println!("  in {} at {}", frame.name, frame_location(frame));
    }

    if !stop.locals.is_empty() {
        println!("Locals:");
        for var in &stop.locals {
            match &var.type_name {
                Some(t) => println!("  {} ({}) = {}", var.name, t, var.value),
                None => println!("  {} = {}", var.name, var.value),
            }
        }
    }

    for (expression, value) in &stop.watches {
        println!("  {} => {}", expression, value);
    }
    println!();
}

fn print_summary(summary: &Summary) {
    if let Some(error) = &summary.transport_error {
        println!("Session ended: {}", error);
    }
    println!(
        "Session finished after {} stop{}",
        summary.stops,
        if summary.stops == 1 { "" } else { "s" }
    );
}
