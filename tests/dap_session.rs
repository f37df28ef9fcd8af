//! End-to-end DAP sessions against the mock adapter binary

use std::path::Path;
use std::time::Duration;

use debug_bridge::backend::{DebugBackend, Notification};
use debug_bridge::cli::driver::{self, BreakpointLocation, DriverOptions, Report, Start};
use debug_bridge::dap::{DapClient, Event, LaunchArguments};
use debug_bridge::Error;
use serde_json::Value;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

fn mock_adapter() -> &'static Path {
    Path::new(env!("CARGO_BIN_EXE_mock_adapter"))
}

fn launch(stop_on_entry: bool) -> Start {
    Start::Launch(LaunchArguments {
        program: "/test/main.c".to_string(),
        stop_on_entry,
        ..Default::default()
    })
}

fn options(breakpoints: &[&str], watches: &[&str], max_stops: usize) -> DriverOptions {
    DriverOptions {
        adapter_id: "mock".to_string(),
        breakpoints: breakpoints
            .iter()
            .map(|b| BreakpointLocation::parse(b).unwrap())
            .collect(),
        watches: watches.iter().map(|w| w.to_string()).collect(),
        max_stops,
        event_timeout: Duration::from_secs(10),
    }
}

#[tokio::test]
async fn test_session_runs_to_exit() {
    let client = DapClient::spawn(mock_adapter(), &[], REQUEST_TIMEOUT)
        .await
        .unwrap();

    let mut reports = Vec::new();
    let summary = driver::run(
        &client,
        launch(false),
        &options(
            &["/test/main.c:7", "/test/main.c:3", "nope"],
            &["line", "missing"],
            10,
        ),
        |report| reports.push(report),
    )
    .await
    .unwrap();
    client.stop().await;

    assert_eq!(summary.stops, 2);
    assert_eq!(summary.exit_code, Some(0));
    assert_eq!(summary.transport_error, None);

    let Report::Breakpoints(placed) = &reports[0] else {
        panic!("expected breakpoints first, got {:?}", reports[0]);
    };
    assert_eq!(placed.len(), 3);
    assert!(placed[..2].iter().all(|bp| bp.verified));
    assert!(!placed[2].verified);

    let stops: Vec<_> = reports
        .iter()
        .filter_map(|r| match r {
            Report::Stopped(stop) => Some(stop),
            _ => None,
        })
        .collect();
    assert_eq!(stops.len(), 2);
    assert_eq!(stops[0].reason, "breakpoint");
    assert_eq!(stops[0].frame.as_ref().unwrap().line, 3);
    assert_eq!(stops[1].frame.as_ref().unwrap().line, 7);
    assert!(stops[0]
        .locals
        .iter()
        .any(|v| v.name == "line" && v.value == "3"));
    assert_eq!(stops[1].watches[0], ("line".to_string(), "7".to_string()));
    assert!(stops[1].watches[1].1.starts_with("<error:"));
    assert!(stops[1].watches[1].1.contains("undefined"));

    let outputs: Vec<&str> = reports
        .iter()
        .filter_map(|r| match r {
            Report::Output { text, .. } => Some(text.as_str()),
            _ => None,
        })
        .collect();
    assert!(outputs.contains(&"runInTerminal answered: success=false\n"));
    assert!(outputs.contains(&"hello from mock\n"));

    let tail = &reports[reports.len() - 2..];
    assert_eq!(tail, &[Report::Exited(0), Report::Terminated]);
}

#[tokio::test]
async fn test_stop_budget_ends_session() {
    let client = DapClient::spawn(mock_adapter(), &[], REQUEST_TIMEOUT)
        .await
        .unwrap();

    let mut stops = 0;
    let summary = driver::run(
        &client,
        launch(false),
        &options(&["/test/main.c:3", "/test/main.c:9"], &[], 1),
        |report| {
            if matches!(report, Report::Stopped(_)) {
                stops += 1;
            }
        },
    )
    .await
    .unwrap();

    assert_eq!(stops, 1);
    assert_eq!(summary.stops, 1);
    assert_eq!(summary.exit_code, None);
    client.stop().await;
}

#[tokio::test]
async fn test_stop_on_entry() {
    let client = DapClient::spawn(mock_adapter(), &[], REQUEST_TIMEOUT)
        .await
        .unwrap();

    let mut reasons = Vec::new();
    driver::run(&client, launch(true), &options(&[], &[], 1), |report| {
        if let Report::Stopped(stop) = report {
            reasons.push(stop.reason);
        }
    })
    .await
    .unwrap();

    assert_eq!(reasons, vec!["entry".to_string()]);
    client.stop().await;
}

#[tokio::test]
async fn test_rejected_request_without_message() {
    let client = DapClient::spawn(mock_adapter(), &[], REQUEST_TIMEOUT)
        .await
        .unwrap();
    client.initialize("mock").await.unwrap();

    let err = client.request::<Value>("restart", None).await.unwrap_err();
    match err {
        Error::DapRequestFailed { command, message } => {
            assert_eq!(command, "restart");
            assert_eq!(message, "restart request was rejected");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(client.pending_requests(), 0);
    client.stop().await;
}

#[tokio::test]
async fn test_tcp_transport() {
    let client = DapClient::spawn_tcp(
        mock_adapter(),
        &["--tcp".to_string()],
        Duration::from_secs(10),
        REQUEST_TIMEOUT,
    )
    .await
    .unwrap();

    let mut notifications = client.take_notifications().unwrap();
    let capabilities = client.initialize("mock").await.unwrap();
    assert!(capabilities.supports_configuration_done_request);

    client
        .launch(LaunchArguments {
            program: "/test/main.c".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();

    let first = tokio::time::timeout(Duration::from_secs(10), notifications.recv())
        .await
        .unwrap();
    assert_eq!(first, Some(Notification::Event(Event::Initialized)));

    let threads = client.threads().await.unwrap();
    assert_eq!(threads[0].name, "main");

    client.disconnect(true).await;
    client.stop().await;
}

#[tokio::test]
async fn test_adapter_exit_ends_notifications() {
    let client = DapClient::spawn(mock_adapter(), &[], REQUEST_TIMEOUT)
        .await
        .unwrap();
    let mut notifications = client.take_notifications().unwrap();
    client.initialize("mock").await.unwrap();

    // The mock exits right after answering disconnect
    client.disconnect(false).await;

    let mut saw_terminated = false;
    loop {
        let next = tokio::time::timeout(Duration::from_secs(10), notifications.recv())
            .await
            .unwrap();
        match next {
            Some(Notification::Event(Event::Terminated(_))) => saw_terminated = true,
            Some(Notification::Exit(_)) => break,
            Some(_) => {}
            None => panic!("channel closed without an exit notification"),
        }
    }
    assert!(saw_terminated);
    assert!(client.take_notifications().is_none());
}
