//! Chrome DevTools Protocol message types
//!
//! Commands are `{id, method, params}`; the target answers with
//! `{id, result}` or `{id, error}` and pushes `{method, params}` events.
//! Only the events the adapter acts on get a variant in [`CdpEvent`];
//! everything else lands in [`CdpEvent::Other`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::common::{Error, Result};

/// Outgoing command
#[derive(Debug, Serialize)]
pub struct CdpCommand<'a> {
    pub id: i64,
    pub method: &'a str,
    pub params: Value,
}

/// Error object of a failed command
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CdpErrorBody {
    #[serde(default)]
    pub code: i64,
    pub message: String,
}

/// Raw inbound message before classification
#[derive(Debug, Deserialize)]
struct RawMessage {
    id: Option<i64>,
    method: Option<String>,
    #[serde(default)]
    params: Value,
    result: Option<Value>,
    error: Option<CdpErrorBody>,
}

/// Classified inbound message
#[derive(Debug, Clone, PartialEq)]
pub enum CdpMessage {
    Response {
        id: i64,
        result: std::result::Result<Value, CdpErrorBody>,
    },
    Event(CdpEvent),
}

impl CdpMessage {
    pub fn parse(text: &str) -> Result<Self> {
        let raw: RawMessage = serde_json::from_str(text)?;

        if let Some(id) = raw.id {
            let result = match raw.error {
                Some(error) => Err(error),
                None => Ok(raw.result.unwrap_or(Value::Null)),
            };
            return Ok(CdpMessage::Response { id, result });
        }

        let method = raw
            .method
            .ok_or_else(|| Error::CdpProtocol("message has neither id nor method".to_string()))?;
        Ok(CdpMessage::Event(CdpEvent::parse(&method, raw.params)?))
    }
}

/// Events the adapter translates
#[derive(Debug, Clone, PartialEq)]
pub enum CdpEvent {
    Paused(PausedParams),
    Resumed,
    ScriptParsed(ScriptParsedParams),
    BreakpointResolved(BreakpointResolvedParams),
    ConsoleApiCalled(ConsoleApiCalledParams),
    ExceptionThrown(ExceptionThrownParams),
    ExecutionContextCreated(ExecutionContextCreatedParams),
    ExecutionContextDestroyed(ExecutionContextDestroyedParams),
    Detached { reason: String },
    Other { method: String },
}

impl CdpEvent {
    fn parse(method: &str, params: Value) -> Result<Self> {
        let event = match method {
            "Debugger.paused" => CdpEvent::Paused(serde_json::from_value(params)?),
            "Debugger.resumed" => CdpEvent::Resumed,
            "Debugger.scriptParsed" => CdpEvent::ScriptParsed(serde_json::from_value(params)?),
            "Debugger.breakpointResolved" => {
                CdpEvent::BreakpointResolved(serde_json::from_value(params)?)
            }
            "Runtime.consoleAPICalled" => {
                CdpEvent::ConsoleApiCalled(serde_json::from_value(params)?)
            }
            "Runtime.exceptionThrown" => CdpEvent::ExceptionThrown(serde_json::from_value(params)?),
            "Runtime.executionContextCreated" => {
                CdpEvent::ExecutionContextCreated(serde_json::from_value(params)?)
            }
            "Runtime.executionContextDestroyed" => {
                CdpEvent::ExecutionContextDestroyed(serde_json::from_value(params)?)
            }
            "Inspector.detached" => CdpEvent::Detached {
                reason: params
                    .get("reason")
                    .and_then(Value::as_str)
                    .unwrap_or("detached")
                    .to_string(),
            },
            other => CdpEvent::Other {
                method: other.to_string(),
            },
        };
        Ok(event)
    }
}

/// Script position (0-based line and column)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub script_id: String,
    pub line_number: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_number: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PausedParams {
    pub call_frames: Vec<CallFrame>,
    pub reason: String,
    #[serde(default)]
    pub hit_breakpoints: Vec<String>,
    #[serde(default)]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallFrame {
    pub call_frame_id: String,
    pub function_name: String,
    pub location: Location,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub scope_chain: Vec<ScopeDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ScopeDescriptor {
    #[serde(rename = "type")]
    pub kind: String,
    pub object: RemoteObject,
    #[serde(default)]
    pub name: Option<String>,
}

impl ScopeDescriptor {
    /// DAP scope name: "Local", "Closure", "Global", ...
    pub fn display_name(&self) -> String {
        let mut chars = self.kind.chars();
        let title = match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => String::new(),
        };
        match &self.name {
            Some(name) if !name.is_empty() => format!("{}: {}", title, name),
            _ => title,
        }
    }

    /// The global scope is large and rarely interesting
    pub fn is_expensive(&self) -> bool {
        self.kind == "global"
    }
}

/// Mirror object of a value in the debuggee
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteObject {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub class_name: Option<String>,
    #[serde(default)]
    pub value: Option<Value>,
    #[serde(default)]
    pub unserializable_value: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub object_id: Option<String>,
}

impl RemoteObject {
    /// Text shown to the user for this value
    pub fn display(&self) -> String {
        if let Some(raw) = &self.unserializable_value {
            return raw.clone();
        }
        match (&self.value, self.kind.as_str()) {
            (Some(Value::String(s)), "string") => format!("{:?}", s),
            (Some(value), _) => value.to_string(),
            (None, "undefined") => "undefined".to_string(),
            (None, _) => self
                .description
                .clone()
                .unwrap_or_else(|| self.kind.clone()),
        }
    }

    /// Type shown next to the value
    pub fn type_name(&self) -> String {
        match (&self.subtype, &self.class_name) {
            (Some(subtype), _) if subtype == "null" => "null".to_string(),
            (_, Some(class)) => class.clone(),
            (Some(subtype), None) => subtype.clone(),
            (None, None) => self.kind.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyDescriptor {
    pub name: String,
    #[serde(default)]
    pub value: Option<RemoteObject>,
    #[serde(default)]
    pub get: Option<RemoteObject>,
    #[serde(default)]
    pub is_own: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptParsedParams {
    pub script_id: String,
    #[serde(default)]
    pub url: String,
    #[serde(default, rename = "sourceMapURL")]
    pub source_map_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakpointResolvedParams {
    pub breakpoint_id: String,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ConsoleApiCalledParams {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub args: Vec<RemoteObject>,
}

impl ConsoleApiCalledParams {
    /// Arguments joined the way a console prints them
    pub fn text(&self) -> String {
        self.args
            .iter()
            .map(|arg| match &arg.value {
                Some(Value::String(s)) => s.clone(),
                _ => arg.display(),
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// DAP output category for this console call
    pub fn category(&self) -> &'static str {
        match self.kind.as_str() {
            "error" | "warning" | "assert" | "trace" => "stderr",
            _ => "console",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ExecutionContextCreatedParams {
    pub context: ExecutionContextDescription,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionContextDescription {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub aux_data: Option<Value>,
}

impl ExecutionContextDescription {
    /// Main context of its frame, as opposed to `vm` or extension contexts
    pub fn is_default(&self) -> bool {
        self.aux_data
            .as_ref()
            .and_then(|data| data.get("isDefault"))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionContextDestroyedParams {
    pub execution_context_id: i64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionDetails {
    pub text: String,
    #[serde(default)]
    pub line_number: Option<u32>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub exception: Option<RemoteObject>,
}

impl ExceptionDetails {
    /// Best available description of the failure
    pub fn message(&self) -> String {
        self.exception
            .as_ref()
            .and_then(|e| e.description.clone())
            .unwrap_or_else(|| self.text.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionThrownParams {
    pub exception_details: ExceptionDetails,
}

// === Command results ===

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetBreakpointResult {
    pub breakpoint_id: String,
    #[serde(default)]
    pub locations: Vec<Location>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateResult {
    pub result: RemoteObject,
    #[serde(default)]
    pub exception_details: Option<ExceptionDetails>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GetPropertiesResult {
    pub result: Vec<PropertyDescriptor>,
}

/// Entry of the HTTP `/json` target list
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetInfo {
    #[serde(default)]
    pub id: String,
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub web_socket_debugger_url: Option<String>,
}

// === Translation helpers ===

/// CDP line or column (0-based) from a DAP one (1-based)
pub fn to_cdp_coordinate(dap: u32) -> u32 {
    dap.saturating_sub(1)
}

/// DAP line or column (1-based) from a CDP one (0-based)
pub fn to_dap_coordinate(cdp: u32) -> u32 {
    cdp + 1
}

/// Pause reason the target reported for its initial break
pub const BREAK_ON_START: &str = "Break on start";

/// Map a `Debugger.paused` reason onto a DAP stopped reason
///
/// `hit_breakpoint` is set when the pause hit one of the session's own
/// breakpoints; V8 can report that under the entry reason too.
pub fn stop_reason(reason: &str, hit_breakpoint: bool) -> String {
    match reason {
        "breakpoint" => "breakpoint",
        BREAK_ON_START | "other" | "debugCommand" if hit_breakpoint => "breakpoint",
        BREAK_ON_START => "entry",
        "exception" | "promiseRejection" | "assert" => "exception",
        "other" | "debugCommand" => "pause",
        passthrough => passthrough,
    }
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_response_and_error() {
        let ok = CdpMessage::parse(r#"{"id":3,"result":{"breakpointId":"1:9:0"}}"#).unwrap();
        assert_eq!(
            ok,
            CdpMessage::Response {
                id: 3,
                result: Ok(json!({ "breakpointId": "1:9:0" }))
            }
        );

        let failed =
            CdpMessage::parse(r#"{"id":4,"error":{"code":-32000,"message":"No frame"}}"#).unwrap();
        match failed {
            CdpMessage::Response { id: 4, result: Err(e) } => assert_eq!(e.message, "No frame"),
            other => panic!("Expected error response, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_paused_event() {
        let text = json!({
            "method": "Debugger.paused",
            "params": {
                "reason": "other",
                "hitBreakpoints": ["1:9:0:file:///app/main.js"],
                "callFrames": [{
                    "callFrameId": "cf-0",
                    "functionName": "main",
                    "url": "file:///app/main.js",
                    "location": { "scriptId": "42", "lineNumber": 9, "columnNumber": 4 },
                    "scopeChain": [{
                        "type": "local",
                        "object": { "type": "object", "objectId": "scope-1" }
                    }]
                }]
            }
        })
        .to_string();

        match CdpMessage::parse(&text).unwrap() {
            CdpMessage::Event(CdpEvent::Paused(params)) => {
                assert_eq!(params.call_frames.len(), 1);
                let frame = &params.call_frames[0];
                assert_eq!(frame.location.line_number, 9);
                assert_eq!(frame.scope_chain[0].display_name(), "Local");
                assert_eq!(params.hit_breakpoints, ["1:9:0:file:///app/main.js"]);
                assert_eq!(stop_reason(&params.reason, true), "breakpoint");
            }
            other => panic!("Expected paused event, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_method_is_other() {
        let parsed = CdpMessage::parse(r#"{"method":"Profiler.consoleProfileStarted","params":{}}"#)
            .unwrap();
        assert_eq!(
            parsed,
            CdpMessage::Event(CdpEvent::Other {
                method: "Profiler.consoleProfileStarted".to_string()
            })
        );
        assert!(CdpMessage::parse(r#"{"params":{}}"#).is_err());
    }

    #[test]
    fn test_parse_execution_context_events() {
        let created = json!({
            "method": "Runtime.executionContextCreated",
            "params": {
                "context": { "id": 1, "origin": "", "name": "main", "auxData": { "isDefault": true } }
            }
        })
        .to_string();
        match CdpMessage::parse(&created).unwrap() {
            CdpMessage::Event(CdpEvent::ExecutionContextCreated(params)) => {
                assert_eq!(params.context.id, 1);
                assert!(params.context.is_default());
            }
            other => panic!("Expected context created, got {:?}", other),
        }

        let sandbox = json!({
            "method": "Runtime.executionContextCreated",
            "params": { "context": { "id": 7, "origin": "", "name": "VM Context 1" } }
        })
        .to_string();
        match CdpMessage::parse(&sandbox).unwrap() {
            CdpMessage::Event(CdpEvent::ExecutionContextCreated(params)) => {
                assert!(!params.context.is_default())
            }
            other => panic!("Expected context created, got {:?}", other),
        }

        let destroyed = CdpMessage::parse(
            r#"{"method":"Runtime.executionContextDestroyed","params":{"executionContextId":7}}"#,
        )
        .unwrap();
        assert_eq!(
            destroyed,
            CdpMessage::Event(CdpEvent::ExecutionContextDestroyed(
                ExecutionContextDestroyedParams {
                    execution_context_id: 7
                }
            ))
        );
    }

    #[test]
    fn test_stop_reason_mapping() {
        assert_eq!(stop_reason(BREAK_ON_START, false), "entry");
        assert_eq!(stop_reason(BREAK_ON_START, true), "breakpoint");
        assert_eq!(stop_reason("other", false), "pause");
        assert_eq!(stop_reason("debugCommand", true), "breakpoint");
        assert_eq!(stop_reason("promiseRejection", false), "exception");
        assert_eq!(stop_reason("XHR", false), "XHR");
    }

    #[test]
    fn test_coordinate_conversion() {
        assert_eq!(to_cdp_coordinate(10), 9);
        assert_eq!(to_cdp_coordinate(5), 4);
        assert_eq!(to_dap_coordinate(9), 10);
        assert_eq!(to_cdp_coordinate(0), 0);
    }

    #[test]
    fn test_remote_object_display() {
        let string: RemoteObject =
            serde_json::from_value(json!({ "type": "string", "value": "hi" })).unwrap();
        assert_eq!(string.display(), "\"hi\"");
        assert_eq!(string.type_name(), "string");

        let array: RemoteObject = serde_json::from_value(json!({
            "type": "object", "subtype": "array", "className": "Array",
            "description": "Array(3)", "objectId": "o-1"
        }))
        .unwrap();
        assert_eq!(array.display(), "Array(3)");
        assert_eq!(array.type_name(), "Array");

        let nan: RemoteObject =
            serde_json::from_value(json!({ "type": "number", "unserializableValue": "NaN" }))
                .unwrap();
        assert_eq!(nan.display(), "NaN");
    }
}
