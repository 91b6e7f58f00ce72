use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::{DisplayFromStr, serde_as, skip_serializing_none};

use crate::error::{AppError, AppResult};
use crate::mi::commands::BreakPointNumber;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct Enabled(pub bool);

impl<'de> Deserialize<'de> for Enabled {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s: String = serde::Deserialize::deserialize(deserializer)?;
        Ok(Enabled(s == "y"))
    }
}

/// A breakpoint row as gdb reports it in `-break-insert` and `-break-list`.
/// Unknown fields stay in the source tree; this view keeps what the
/// reconciler and the DAP responses need.
#[serde_as]
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakPoint {
    #[serde_as(as = "DisplayFromStr")]
    pub number: BreakPointNumber,
    pub r#type: Option<String>,
    #[serde(rename = "disp")]
    pub display: Option<String>,
    pub enabled: Enabled,
    #[serde(rename = "addr")]
    pub address: Option<String>,
    pub func: Option<String>,
    pub file: Option<String>,
    pub fullname: Option<String>,
    #[serde_as(as = "Option<DisplayFromStr>")]
    pub line: Option<u32>,
    #[serde_as(as = "Option<DisplayFromStr>")]
    pub times: Option<u64>,
    #[serde(rename = "original-location")]
    pub original_location: Option<String>,
    pub cond: Option<String>,
    #[serde(rename = "thread-groups")]
    pub thread_groups: Option<Vec<String>>,
}

impl BreakPoint {
    /// `-break-list` reply: `BreakpointTable={...,body=[bkpt={...},...]}`.
    pub fn list_from_value(results: &Value) -> AppResult<Vec<BreakPoint>> {
        let body = results
            .get("BreakpointTable")
            .and_then(|t| t.get("body"))
            .cloned()
            .unwrap_or_else(|| Value::Array(vec![]));
        Ok(serde_json::from_value(body)?)
    }
}

/// Normalized `-break-insert` reply: gdb returns a single `bkpt=` tuple, or
/// an array of tuples for a multi-location breakpoint. The first row is the
/// primary one either way.
#[derive(Debug, Clone)]
pub struct BreakInsertResponse {
    pub primary: BreakPoint,
    pub extras: Vec<BreakPoint>,
}

impl BreakInsertResponse {
    pub fn from_value(results: &Value) -> AppResult<BreakInsertResponse> {
        let bkpt = results
            .get("bkpt")
            .ok_or_else(|| AppError::MiProtocol("break-insert reply without bkpt".to_string()))?;
        match bkpt {
            Value::Array(rows) => {
                let mut rows: Vec<BreakPoint> = rows
                    .iter()
                    .map(|row| serde_json::from_value(row.clone()))
                    .collect::<Result<_, _>>()?;
                if rows.is_empty() {
                    return Err(AppError::MiProtocol(
                        "break-insert reply with empty bkpt list".to_string(),
                    ));
                }
                let primary = rows.remove(0);
                Ok(BreakInsertResponse {
                    primary,
                    extras: rows,
                })
            }
            single => Ok(BreakInsertResponse {
                primary: serde_json::from_value(single.clone())?,
                extras: vec![],
            }),
        }
    }
}

/// Stack frame information
#[serde_as]
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackFrame {
    /// Frame level
    #[serde_as(as = "DisplayFromStr")]
    pub level: u32,
    /// Function name
    pub func: Option<String>,
    /// File name
    pub file: Option<String>,
    /// Full name of the file
    pub fullname: Option<String>,
    /// Line number
    #[serde_as(as = "Option<DisplayFromStr>")]
    pub line: Option<u32>,
    /// Address
    #[serde(rename = "addr")]
    pub address: Option<String>,
    /// Arch
    pub arch: Option<String>,
}

impl StackFrame {
    /// `-stack-list-frames` reply: `stack=[frame={...},...]`.
    pub fn list_from_value(results: &Value) -> AppResult<Vec<StackFrame>> {
        let stack = results
            .get("stack")
            .cloned()
            .unwrap_or_else(|| Value::Array(vec![]));
        Ok(serde_json::from_value(stack)?)
    }
}

/// One row of `-thread-info`.
#[serde_as]
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadInfo {
    #[serde_as(as = "DisplayFromStr")]
    pub id: i64,
    #[serde(rename = "target-id")]
    pub target_id: Option<String>,
    pub name: Option<String>,
    pub state: Option<String>,
    pub details: Option<String>,
}

impl ThreadInfo {
    pub fn list_from_value(results: &Value) -> AppResult<Vec<ThreadInfo>> {
        let threads = results
            .get("threads")
            .cloned()
            .unwrap_or_else(|| Value::Array(vec![]));
        Ok(serde_json::from_value(threads)?)
    }
}

/// The adapter's view of a thread, kept current from `thread-created` /
/// `thread-exited` notifications and `-thread-info` refreshes.
#[derive(Debug, Clone)]
pub struct Thread {
    pub id: i64,
    pub name: String,
    pub running: bool,
}

impl From<&ThreadInfo> for Thread {
    fn from(info: &ThreadInfo) -> Thread {
        let name = info
            .name
            .clone()
            .or_else(|| info.target_id.clone())
            .unwrap_or_else(|| format!("Thread {}", info.id));
        Thread {
            id: info.id,
            name,
            running: info.state.as_deref() == Some("running"),
        }
    }
}

/// `-var-create` reply.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VarCreateResponse {
    pub name: String,
    pub numchild: Option<String>,
    pub value: Option<String>,
    pub r#type: Option<String>,
    #[serde(rename = "has_more")]
    pub has_more: Option<String>,
}

/// One entry of a `-var-update` changelist.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VarUpdateChange {
    pub name: String,
    pub value: Option<String>,
    pub in_scope: Option<String>,
    pub type_changed: Option<String>,
    pub new_type: Option<String>,
    pub new_num_children: Option<String>,
}

impl VarUpdateChange {
    pub fn list_from_value(results: &Value) -> AppResult<Vec<VarUpdateChange>> {
        let changelist = results
            .get("changelist")
            .cloned()
            .unwrap_or_else(|| Value::Array(vec![]));
        Ok(serde_json::from_value(changelist)?)
    }
}

/// One child row of `-var-list-children`.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VarChild {
    pub name: String,
    pub exp: Option<String>,
    pub numchild: Option<String>,
    pub value: Option<String>,
    pub r#type: Option<String>,
}

impl VarChild {
    pub fn list_from_value(results: &Value) -> AppResult<Vec<VarChild>> {
        let children = results
            .get("children")
            .cloned()
            .unwrap_or_else(|| Value::Array(vec![]));
        Ok(serde_json::from_value(children)?)
    }

    /// C++ access specifiers appear as pseudo children with no type and no
    /// value; their children are the real members.
    pub fn is_access_qualifier(&self) -> bool {
        self.r#type.is_none()
            && self.value.as_deref().unwrap_or("").is_empty()
            && matches!(
                self.exp.as_deref(),
                Some("public") | Some("protected") | Some("private")
            )
    }
}

/// One machine instruction of a `-data-disassemble` reply.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AsmInstruction {
    pub address: String,
    #[serde(rename = "func-name")]
    pub func_name: Option<String>,
    pub offset: Option<String>,
    pub opcodes: Option<String>,
    pub inst: String,
}

impl AsmInstruction {
    /// Opcode bytes covered by this instruction (two hex digits per byte).
    pub fn opcode_len(&self) -> u64 {
        match &self.opcodes {
            Some(op) => op.chars().filter(|c| c.is_ascii_hexdigit()).count() as u64 / 2,
            None => 0,
        }
    }
}

/// A source-line group of disassembled instructions.
#[serde_as]
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceAsmGroup {
    #[serde_as(as = "Option<DisplayFromStr>")]
    pub line: Option<u32>,
    pub file: Option<String>,
    pub fullname: Option<String>,
    #[serde(rename = "line_asm_insn", default)]
    pub instructions: Vec<AsmInstruction>,
}

impl SourceAsmGroup {
    /// `-data-disassemble` reply, normalized. In the mixed mode gdb nests
    /// instructions in `src_and_asm_line` groups; without line info it
    /// falls back to a flat instruction list, which is wrapped into a
    /// single group with an empty source header so consumers see one shape.
    pub fn list_from_value(results: &Value) -> AppResult<Vec<SourceAsmGroup>> {
        let insns = results
            .get("asm_insns")
            .cloned()
            .unwrap_or_else(|| Value::Array(vec![]));
        let rows = match &insns {
            Value::Array(rows) => rows,
            _ => {
                return Err(AppError::MiProtocol(
                    "asm_insns is not a list".to_string(),
                ));
            }
        };
        let grouped = rows
            .iter()
            .all(|row| row.get("line_asm_insn").is_some() || row.get("line").is_some());
        if !rows.is_empty() && grouped {
            Ok(serde_json::from_value(insns)?)
        } else {
            Ok(vec![SourceAsmGroup {
                line: None,
                file: None,
                fullname: None,
                instructions: serde_json::from_value(insns)?,
            }])
        }
    }
}

/// One region of a `-data-read-memory-bytes` reply.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryContents {
    pub begin: String,
    pub offset: Option<String>,
    pub end: Option<String>,
    /// Bare hex, two digits per byte
    pub contents: String,
}

impl MemoryContents {
    pub fn first_from_value(results: &Value) -> AppResult<MemoryContents> {
        let memory = results
            .get("memory")
            .and_then(|m| m.as_array())
            .and_then(|rows| rows.first())
            .ok_or_else(|| {
                AppError::MiProtocol("data-read-memory-bytes reply without memory".to_string())
            })?;
        Ok(serde_json::from_value(memory.clone())?)
    }
}

/// A `-stack-list-variables --simple-values` row.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalVariable {
    pub name: String,
    pub r#type: Option<String>,
    pub value: Option<String>,
}

impl LocalVariable {
    pub fn list_from_value(results: &Value) -> AppResult<Vec<LocalVariable>> {
        let variables = results
            .get("variables")
            .cloned()
            .unwrap_or_else(|| Value::Array(vec![]));
        Ok(serde_json::from_value(variables)?)
    }
}
