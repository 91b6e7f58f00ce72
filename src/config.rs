use serde::{Deserialize, Serialize};

#[derive(Debug)]
/// Server Configuration
pub struct Config {
    /// Fallback gdb executable when the launch request does not name one
    pub gdb_path: String,
    /// Directory for the rolling log file (stdout carries the DAP wire)
    pub log_dir: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gdb_path: std::env::var("GDB_PATH").unwrap_or_else(|_| "gdb".to_string()),
            log_dir: std::env::var("DAP_GDB_LOG_DIR").unwrap_or_else(|_| "logs".to_string()),
        }
    }
}

/// Arguments common to `launch` and `attach` requests.
///
/// Field names follow the client-facing camelCase keys; everything is
/// optional except what each request kind checks for itself (`program` for
/// launch, `processId` for attach).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TargetArguments {
    /// Path to the gdb executable
    pub gdb: Option<String>,
    /// Extra argv passed to gdb itself
    pub gdb_arguments: Vec<String>,
    /// Enable MI async mode (default true)
    pub gdb_async: Option<bool>,
    /// Enable non-stop mode (default false); forces async on
    pub gdb_non_stop: Option<bool>,
    /// Target executable (required for launch)
    pub program: Option<String>,
    /// Command-line arguments for the inferior
    pub arguments: Option<String>,
    /// PID to attach to (required for attach)
    pub process_id: Option<u32>,
    /// Raw MI commands issued after file load, before run
    pub init_commands: Vec<String>,
    /// Default all breakpoints to hardware breakpoints
    pub hardware_breakpoint: bool,
    /// Host gdb in a client terminal (not supported by this build)
    pub open_gdb_console: bool,
    /// Log notify records and MI traffic at a visible level
    pub verbose: bool,
    /// Override the log directory for this session
    pub log_file: Option<String>,
}

impl TargetArguments {
    pub fn gdb_async(&self) -> bool {
        // non-stop cannot work over a synchronous MI connection
        self.gdb_async.unwrap_or(true) || self.gdb_non_stop()
    }

    pub fn gdb_non_stop(&self) -> bool {
        self.gdb_non_stop.unwrap_or(false)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_non_stop_forces_async() {
        let args: TargetArguments =
            serde_json::from_str(r#"{"gdbAsync": false, "gdbNonStop": true}"#).unwrap();
        assert!(args.gdb_async());
        assert!(args.gdb_non_stop());
    }

    #[test]
    fn test_defaults() {
        let args: TargetArguments = serde_json::from_str(r#"{"program": "./a.out"}"#).unwrap();
        assert!(args.gdb_async());
        assert!(!args.gdb_non_stop());
        assert!(!args.hardware_breakpoint);
        assert_eq!(args.program.as_deref(), Some("./a.out"));
    }
}
