//! Mock DAP adapter binary for integration testing
//!
//! Speaks DAP over stdio (or one TCP connection with `--tcp`) and plays a
//! scripted debuggee: it stops once per breakpoint line in ascending
//! order, then prints a line of output, exits with code 0 and terminates.
//! After `launch` it sends a `runInTerminal` reverse request and reports
//! the client's answer as an output event.

use std::collections::BTreeSet;
use std::io::{self, Read, Write};
use std::net::TcpListener;

use debug_bridge::dap::codec::{encode, FrameDecoder};
use serde_json::{json, Value};

/// Exit code reported by the scripted debuggee
const EXIT_CODE: i32 = 0;

fn main() -> io::Result<()> {
    if std::env::args().any(|arg| arg == "--tcp") {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        println!("mock adapter listening at: {}", listener.local_addr()?);
        io::stdout().flush()?;
        let (stream, _) = listener.accept()?;
        let writer = stream.try_clone()?;
        serve(stream, writer)
    } else {
        serve(io::stdin().lock(), io::stdout().lock())
    }
}

fn serve<R: Read, W: Write>(mut reader: R, mut writer: W) -> io::Result<()> {
    let mut decoder = FrameDecoder::new();
    let mut state = MockState::default();
    let mut buf = [0u8; 4096];

    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            return Ok(());
        }
        for message in decoder.feed(&buf[..n]) {
            for outgoing in state.process_message(&message) {
                send_message(&mut writer, &outgoing)?;
            }
            if state.done {
                return Ok(());
            }
        }
    }
}

fn send_message<W: Write>(writer: &mut W, message: &Value) -> io::Result<()> {
    let frame = encode(message).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
    writer.write_all(&frame)?;
    writer.flush()
}

#[derive(Default)]
struct MockState {
    seq: i64,
    program: String,
    stop_on_entry: bool,
    /// `(line, breakpoint id)` still ahead of the debuggee
    breakpoints: BTreeSet<(u32, i64)>,
    next_breakpoint_id: i64,
    current_line: u32,
    run_in_terminal_seq: Option<i64>,
    done: bool,
}

impl MockState {
    fn next_seq(&mut self) -> i64 {
        self.seq += 1;
        self.seq
    }

    fn event(&mut self, name: &str, body: Value) -> Value {
        json!({
            "seq": self.next_seq(),
            "type": "event",
            "event": name,
            "body": body
        })
    }

    fn process_message(&mut self, message: &Value) -> Vec<Value> {
        match message.get("type").and_then(Value::as_str) {
            Some("request") => self.process_request(message),
            Some("response") => self.process_reverse_response(message),
            _ => Vec::new(),
        }
    }

    fn process_reverse_response(&mut self, message: &Value) -> Vec<Value> {
        let request_seq = message.get("request_seq").and_then(Value::as_i64);
        if request_seq.is_none() || request_seq != self.run_in_terminal_seq {
            return Vec::new();
        }
        let success = message
            .get("success")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        vec![self.event(
            "output",
            json!({
                "category": "console",
                "output": format!("runInTerminal answered: success={}\n", success)
            }),
        )]
    }

    fn process_request(&mut self, message: &Value) -> Vec<Value> {
        let command = message
            .get("command")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let request_seq = message.get("seq").and_then(Value::as_i64).unwrap_or(0);
        let arguments = message.get("arguments").cloned().unwrap_or(json!({}));

        let mut after = Vec::new();
        let outcome: Result<Value, String> = match command.as_str() {
            "initialize" => Ok(json!({
                "supportsConfigurationDoneRequest": true,
                "supportsFunctionBreakpoints": true,
                "supportsConditionalBreakpoints": true,
                "supportsEvaluateForHovers": true,
                "supportsTerminateRequest": true
            })),
            "launch" => {
                self.program = arguments
                    .get("program")
                    .and_then(Value::as_str)
                    .unwrap_or("main.c")
                    .to_string();
                self.stop_on_entry = arguments
                    .get("stopOnEntry")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);

                let seq = self.next_seq();
                self.run_in_terminal_seq = Some(seq);
                after.push(json!({
                    "seq": seq,
                    "type": "request",
                    "command": "runInTerminal",
                    "arguments": { "kind": "integrated", "args": [self.program] }
                }));
                after.push(self.event("initialized", Value::Null));
                Ok(Value::Null)
            }
            "setBreakpoints" => {
                let path = arguments
                    .pointer("/source/path")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
                    .to_string();
                let requested = arguments
                    .get("breakpoints")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();

                let mut placed = Vec::new();
                for bp in requested {
                    let line = bp.get("line").and_then(Value::as_u64).unwrap_or(1) as u32;
                    self.next_breakpoint_id += 1;
                    let id = self.next_breakpoint_id;
                    self.breakpoints.insert((line, id));
                    placed.push(json!({
                        "id": id,
                        "verified": true,
                        "line": line,
                        "source": { "path": path }
                    }));
                }
                Ok(json!({ "breakpoints": placed }))
            }
            "setFunctionBreakpoints" => {
                let requested = arguments
                    .get("breakpoints")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();
                let placed: Vec<Value> = requested
                    .iter()
                    .map(|bp| {
                        self.next_breakpoint_id += 1;
                        let name = bp.get("name").and_then(Value::as_str).unwrap_or("?");
                        json!({
                            "id": self.next_breakpoint_id,
                            "verified": false,
                            "message": format!("No function named {}", name)
                        })
                    })
                    .collect();
                Ok(json!({ "breakpoints": placed }))
            }
            "configurationDone" => {
                if self.stop_on_entry {
                    after.push(self.stopped("entry", None));
                } else {
                    after.extend(self.run_to_next_stop());
                }
                Ok(Value::Null)
            }
            "continue" => {
                after.extend(self.run_to_next_stop());
                Ok(json!({ "allThreadsContinued": true }))
            }
            "next" | "stepIn" | "stepOut" => {
                self.current_line += 1;
                after.push(self.stopped("step", None));
                Ok(Value::Null)
            }
            "pause" => {
                after.push(self.stopped("pause", None));
                Ok(Value::Null)
            }
            "threads" => Ok(json!({ "threads": [{ "id": 1, "name": "main" }] })),
            "stackTrace" => Ok(json!({
                "stackFrames": [
                    {
                        "id": 1,
                        "name": "main",
                        "source": { "name": "main.c", "path": self.program },
                        "line": self.current_line.max(1),
                        "column": 1
                    },
                    { "id": 2, "name": "__libc_start_main", "line": 0, "column": 0 }
                ],
                "totalFrames": 2
            })),
            "scopes" => Ok(json!({
                "scopes": [
                    { "name": "Locals", "variablesReference": 1000, "expensive": false },
                    { "name": "Globals", "variablesReference": 2000, "expensive": true }
                ]
            })),
            "variables" => {
                let reference = arguments
                    .get("variablesReference")
                    .and_then(Value::as_i64)
                    .unwrap_or(0);
                let variables = if reference == 1000 {
                    json!([
                        { "name": "line", "value": self.current_line.to_string(), "type": "int", "variablesReference": 0 },
                        { "name": "name", "value": "\"hello\"", "type": "const char*", "variablesReference": 0 }
                    ])
                } else {
                    json!([])
                };
                Ok(json!({ "variables": variables }))
            }
            "evaluate" => {
                let expression = arguments
                    .get("expression")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                match expression {
                    "line" => Ok(json!({
                        "result": self.current_line.to_string(),
                        "type": "int",
                        "variablesReference": 0
                    })),
                    "missing" => Err("identifier 'missing' is undefined".to_string()),
                    other => Ok(json!({
                        "result": format!("(eval result: {})", other),
                        "variablesReference": 0
                    })),
                }
            }
            "terminate" => {
                after.extend(self.finish());
                Ok(Value::Null)
            }
            "disconnect" => {
                self.done = true;
                Ok(Value::Null)
            }
            // Failure without a message, as some adapters send
            "restart" => Err(String::new()),
            other => Err(format!("Unknown command: {}", other)),
        };

        let mut response = json!({
            "seq": self.next_seq(),
            "type": "response",
            "request_seq": request_seq,
            "command": command,
        });
        match outcome {
            Ok(body) => {
                response["success"] = json!(true);
                if !body.is_null() {
                    response["body"] = body;
                }
            }
            Err(message) => {
                response["success"] = json!(false);
                if !message.is_empty() {
                    response["message"] = json!(message);
                }
            }
        }

        let mut outgoing = vec![response];
        outgoing.extend(after);
        outgoing
    }

    fn stopped(&mut self, reason: &str, breakpoint_id: Option<i64>) -> Value {
        let mut body = json!({
            "reason": reason,
            "threadId": 1,
            "allThreadsStopped": true
        });
        if let Some(id) = breakpoint_id {
            body["hitBreakpointIds"] = json!([id]);
        }
        self.event("stopped", body)
    }

    /// Advance to the next breakpoint past the current line, or run to exit
    fn run_to_next_stop(&mut self) -> Vec<Value> {
        let next = self
            .breakpoints
            .iter()
            .copied()
            .find(|(line, _)| *line > self.current_line);
        match next {
            Some((line, id)) => {
                self.current_line = line;
                vec![self.stopped("breakpoint", Some(id))]
            }
            None => self.finish(),
        }
    }

    fn finish(&mut self) -> Vec<Value> {
        vec![
            self.event(
                "output",
                json!({ "category": "stdout", "output": "hello from mock\n" }),
            ),
            self.event("exited", json!({ "exitCode": EXIT_CODE })),
            self.event("terminated", Value::Null),
        ]
    }
}
