use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::skip_serializing_none;

/// DAP request envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct Request {
    pub seq: i64,
    #[serde(rename = "type")]
    pub kind: String,
    pub command: String,
    #[serde(default)]
    pub arguments: Value,
}

/// DAP response envelope.
#[skip_serializing_none]
#[derive(Debug, Serialize)]
pub struct Response {
    pub seq: i64,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub request_seq: i64,
    pub success: bool,
    pub command: String,
    pub message: Option<String>,
    pub body: Option<Value>,
}

/// DAP event envelope.
#[skip_serializing_none]
#[derive(Debug, Serialize)]
pub struct Event {
    pub seq: i64,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub event: &'static str,
    pub body: Option<Value>,
}

/// Error body of a failed response; the client renders `format`.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: ErrorMessage,
}

#[derive(Debug, Serialize)]
pub struct ErrorMessage {
    pub id: i64,
    pub format: String,
    #[serde(rename = "showUser")]
    pub show_user: bool,
}

/// What this adapter advertises in the `initialize` response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    pub supports_configuration_done_request: bool,
    pub supports_set_variable: bool,
    pub supports_conditional_breakpoints: bool,
    pub supports_hit_conditional_breakpoints: bool,
    pub supports_log_points: bool,
    pub supports_function_breakpoints: bool,
    pub supports_disassemble_request: bool,
    pub supports_read_memory_request: bool,
    pub supports_stepping_granularity: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Capabilities {
            supports_configuration_done_request: true,
            supports_set_variable: true,
            supports_conditional_breakpoints: true,
            supports_hit_conditional_breakpoints: true,
            supports_log_points: true,
            supports_function_breakpoints: true,
            supports_disassemble_request: true,
            supports_read_memory_request: true,
            supports_stepping_granularity: true,
        }
    }
}

#[skip_serializing_none]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Source {
    pub name: Option<String>,
    pub path: Option<String>,
}

/// One client-declared source breakpoint.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceBreakpoint {
    pub line: u32,
    pub condition: Option<String>,
    pub hit_condition: Option<String>,
    pub log_message: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetBreakpointsArguments {
    pub source: Source,
    #[serde(default)]
    pub breakpoints: Vec<SourceBreakpoint>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionBreakpoint {
    pub name: String,
    pub condition: Option<String>,
    pub hit_condition: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SetFunctionBreakpointsArguments {
    #[serde(default)]
    pub breakpoints: Vec<FunctionBreakpoint>,
}

/// A breakpoint row of a setBreakpoints response.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Breakpoint {
    pub id: Option<u64>,
    pub verified: bool,
    pub message: Option<String>,
    pub source: Option<Source>,
    pub line: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct BreakpointsBody {
    pub breakpoints: Vec<Breakpoint>,
}

#[derive(Debug, Serialize)]
pub struct ThreadsBody {
    pub threads: Vec<DapThread>,
}

#[derive(Debug, Serialize)]
pub struct DapThread {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackTraceArguments {
    pub thread_id: i64,
    pub start_frame: Option<u32>,
    pub levels: Option<u32>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DapStackFrame {
    pub id: i64,
    pub name: String,
    pub source: Option<Source>,
    pub line: u32,
    pub column: u32,
    pub instruction_pointer_reference: Option<String>,
}

#[skip_serializing_none]
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StackTraceBody {
    pub stack_frames: Vec<DapStackFrame>,
    pub total_frames: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopesArguments {
    pub frame_id: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Scope {
    pub name: &'static str,
    pub variables_reference: i64,
    pub expensive: bool,
}

#[derive(Debug, Serialize)]
pub struct ScopesBody {
    pub scopes: Vec<Scope>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariablesArguments {
    pub variables_reference: i64,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DapVariable {
    pub name: String,
    pub value: String,
    #[serde(rename = "type")]
    pub r#type: Option<String>,
    pub variables_reference: i64,
}

#[derive(Debug, Serialize)]
pub struct VariablesBody {
    pub variables: Vec<DapVariable>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetVariableArguments {
    pub variables_reference: i64,
    pub name: String,
    pub value: String,
}

#[derive(Debug, Serialize)]
pub struct SetVariableBody {
    pub value: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateArguments {
    pub expression: String,
    pub frame_id: Option<i64>,
    pub context: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateBody {
    pub result: String,
    pub variables_reference: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadExecutionArguments {
    pub thread_id: i64,
    /// "statement" (default) or "instruction"
    pub granularity: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisassembleArguments {
    pub memory_reference: String,
    pub offset: Option<i64>,
    pub instruction_offset: Option<i64>,
    pub instruction_count: u64,
    /// Fetch bound extension: disassemble no further than this address
    pub end_memory_reference: Option<String>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DisassembledInstruction {
    pub address: String,
    pub instruction_bytes: Option<String>,
    pub instruction: String,
    pub symbol: Option<String>,
    pub location: Option<Source>,
    pub line: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct DisassembleBody {
    pub instructions: Vec<DisassembledInstruction>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadMemoryArguments {
    pub memory_reference: String,
    pub offset: Option<i64>,
    pub count: u64,
}

#[skip_serializing_none]
#[derive(Debug, Serialize)]
pub struct ReadMemoryBody {
    pub address: String,
    pub data: Option<String>,
}

/// The `cdt-gdb-adapter/Memory` custom request.
#[derive(Debug, Clone, Deserialize)]
pub struct MemoryRequestArguments {
    pub address: String,
    pub length: u64,
    pub offset: Option<i64>,
}

/// Reply to the custom memory request: bare hex, not base64.
#[derive(Debug, Serialize)]
pub struct MemoryContentsBody {
    pub data: String,
    pub address: String,
}

#[skip_serializing_none]
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoppedEventBody {
    pub reason: String,
    pub thread_id: Option<i64>,
    pub all_threads_stopped: Option<bool>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContinuedEventBody {
    pub thread_id: i64,
    pub all_threads_continued: bool,
}

#[derive(Debug, Serialize)]
pub struct OutputEventBody {
    pub category: &'static str,
    pub output: String,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_request_decoding() {
        let request: Request = serde_json::from_str(
            r#"{"seq": 3, "type": "request", "command": "setBreakpoints",
                "arguments": {"source": {"path": "/tmp/empty.c"},
                "breakpoints": [{"line": 3, "hitCondition": "3"}]}}"#,
        )
        .unwrap();
        assert_eq!(request.command, "setBreakpoints");
        let args: SetBreakpointsArguments = serde_json::from_value(request.arguments).unwrap();
        assert_eq!(args.source.path.as_deref(), Some("/tmp/empty.c"));
        assert_eq!(args.breakpoints[0].hit_condition.as_deref(), Some("3"));
        assert!(args.breakpoints[0].condition.is_none());
    }

    #[test]
    fn test_response_skips_empty_fields() {
        let response = Response {
            seq: 1,
            kind: "response",
            request_seq: 3,
            success: true,
            command: "next".to_string(),
            message: None,
            body: None,
        };
        let encoded = serde_json::to_string(&response).unwrap();
        assert!(!encoded.contains("message"));
        assert!(!encoded.contains("body"));
    }

    #[test]
    fn test_capabilities_serialize_camel_case() {
        let encoded = serde_json::to_value(Capabilities::default()).unwrap();
        assert_eq!(encoded["supportsConfigurationDoneRequest"], true);
        assert_eq!(encoded["supportsLogPoints"], true);
        assert_eq!(encoded["supportsDisassembleRequest"], true);
    }
}
