use std::fmt;

/// One formatted MI command: `-operation option... [--] parameter...`.
///
/// Constructors format every `-command` this adapter issues; they are
/// stateless and the response trees are decoded by the typed models in
/// [`crate::models`].
#[derive(Debug, Clone, Default)]
pub struct MiCommand {
    pub operation: String,
    pub options: Vec<String>,
    pub parameters: Vec<String>,
}

/// `-data-disassemble` mode argument.
pub enum DisassembleMode {
    DisassemblyOnly = 0,
    DisassemblyWithRawOpcodes = 2,
    // 1/3 are the deprecated spellings of the mixed modes; gdb >= 7.11
    // understands 4/5 and keeps source lines in program order.
    MixedSourceAndDisassemblyWithRawOpcodes = 5,
}

/// A gdb breakpoint number; `major.minor` identifies a child row of a
/// multi-location breakpoint.
#[derive(Debug, Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct BreakPointNumber {
    pub major: u64,
    pub minor: Option<u64>,
}

impl BreakPointNumber {
    pub fn is_child(&self) -> bool {
        self.minor.is_some()
    }
}

impl std::str::FromStr for BreakPointNumber {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(dot_pos) = s.find('.') {
            let major = s[..dot_pos].parse::<u64>().map_err(|e| e.to_string())?;
            let minor = s[dot_pos + 1..].parse::<u64>().map_err(|e| e.to_string())?;
            Ok(BreakPointNumber {
                major,
                minor: Some(minor),
            })
        } else {
            match s.parse::<u64>() {
                Ok(val) => Ok(BreakPointNumber {
                    major: val,
                    minor: None,
                }),
                Err(e) => Err(e.to_string()),
            }
        }
    }
}

impl fmt::Display for BreakPointNumber {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if let Some(minor) = self.minor {
            write!(f, "{}.{}", self.major, minor)
        } else {
            write!(f, "{}", self.major)
        }
    }
}

/// Escape an argument for the MI command line: backslash and double-quote
/// are backslash-prefixed, and the result is wrapped in double quotes when
/// it contains a space or when the caller forces quoting.
pub fn escape_arg(arg: &str, force_quotes: bool) -> String {
    let mut escaped = String::with_capacity(arg.len());
    for c in arg.chars() {
        if c == '\\' || c == '"' {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    if force_quotes || escaped.contains(' ') {
        format!("\"{}\"", escaped)
    } else {
        escaped
    }
}

pub fn standard_escape(arg: &str) -> String {
    escape_arg(arg, false)
}

/// `--thread N` when the id is defined and non-negative; negative ids mean
/// "current"/"all" and are omitted.
fn thread_opt(options: &mut Vec<String>, thread_id: Option<i64>) {
    if let Some(id) = thread_id {
        if id >= 0 {
            options.push("--thread".to_string());
            options.push(id.to_string());
        }
    }
}

fn frame_opt(options: &mut Vec<String>, frame_id: Option<i64>) {
    if let Some(id) = frame_id {
        if id >= 0 {
            options.push("--frame".to_string());
            options.push(id.to_string());
        }
    }
}

/// Source vs function location of a `-break-insert`. `modern` selects the
/// explicit-location flags available from gdb 8.1; older gdb gets the
/// classic linespec string.
#[derive(Debug, Clone)]
pub enum BreakPointLocation {
    Source {
        file: String,
        line: u32,
        modern: bool,
    },
    Function {
        name: String,
        modern: bool,
    },
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BreakPointFlags {
    pub temporary: bool,
    pub hardware: bool,
    pub ignore_count: Option<u64>,
    /// `-f`: create pending if the location cannot be resolved yet
    pub pending: bool,
}

impl MiCommand {
    fn new(operation: &str) -> MiCommand {
        MiCommand {
            operation: operation.to_string(),
            ..Default::default()
        }
    }

    /// Render with the command ticket prefixed, ready for the gdb stdin
    /// stream (newline excluded).
    pub fn render(&self, token: u64) -> String {
        let mut command = format!("{}{}", token, self.operation);
        for option in &self.options {
            command.push(' ');
            command.push_str(option);
        }
        if !self.parameters.is_empty() {
            if !self.options.is_empty() {
                command.push_str(" --");
            }
            for parameter in &self.parameters {
                command.push(' ');
                command.push_str(parameter);
            }
        }
        command
    }

    /// A command given verbatim by the client (`evaluate` in repl context).
    /// MI operations pass through; anything else runs on the console
    /// interpreter.
    pub fn raw(text: &str) -> MiCommand {
        if text.starts_with('-') {
            MiCommand::new(text)
        } else {
            Self::cli_exec(text)
        }
    }

    pub fn interpreter_exec(interpreter: &str, command: &str) -> MiCommand {
        MiCommand {
            operation: "-interpreter-exec".to_string(),
            options: vec![interpreter.to_string(), escape_arg(command, true)],
            parameters: vec![],
        }
    }

    pub fn cli_exec(command: &str) -> MiCommand {
        Self::interpreter_exec("console", command)
    }

    // -exec commands

    pub fn exec_arguments(args: &str) -> MiCommand {
        let mut cmd = MiCommand::new("-exec-arguments");
        cmd.options.push(args.to_string());
        cmd
    }

    pub fn exec_run() -> MiCommand {
        MiCommand::new("-exec-run")
    }

    pub fn exec_continue(thread_id: Option<i64>) -> MiCommand {
        let mut cmd = MiCommand::new("-exec-continue");
        thread_opt(&mut cmd.options, thread_id);
        cmd
    }

    pub fn exec_next(thread_id: Option<i64>) -> MiCommand {
        let mut cmd = MiCommand::new("-exec-next");
        thread_opt(&mut cmd.options, thread_id);
        cmd
    }

    pub fn exec_next_instruction(thread_id: Option<i64>) -> MiCommand {
        let mut cmd = MiCommand::new("-exec-next-instruction");
        thread_opt(&mut cmd.options, thread_id);
        cmd
    }

    pub fn exec_step(thread_id: Option<i64>) -> MiCommand {
        let mut cmd = MiCommand::new("-exec-step");
        thread_opt(&mut cmd.options, thread_id);
        cmd
    }

    pub fn exec_step_instruction(thread_id: Option<i64>) -> MiCommand {
        let mut cmd = MiCommand::new("-exec-step-instruction");
        thread_opt(&mut cmd.options, thread_id);
        cmd
    }

    pub fn exec_finish(thread_id: Option<i64>, frame_id: Option<i64>) -> MiCommand {
        let mut cmd = MiCommand::new("-exec-finish");
        thread_opt(&mut cmd.options, thread_id);
        frame_opt(&mut cmd.options, frame_id);
        cmd
    }

    /// Only effective in async mode; a synchronous gdb needs a SIGINT
    /// instead (see the backend's pause).
    pub fn exec_interrupt(thread_id: Option<i64>) -> MiCommand {
        let mut cmd = MiCommand::new("-exec-interrupt");
        match thread_id {
            Some(id) if id >= 0 => thread_opt(&mut cmd.options, Some(id)),
            _ => cmd.options.push("--all".to_string()),
        }
        cmd
    }

    // breakpoints

    pub fn break_insert(location: &BreakPointLocation, flags: BreakPointFlags) -> MiCommand {
        let mut cmd = MiCommand::new("-break-insert");
        if flags.temporary {
            cmd.options.push("-t".to_string());
        }
        if flags.hardware {
            cmd.options.push("-h".to_string());
        }
        if let Some(count) = flags.ignore_count {
            cmd.options.push("-i".to_string());
            cmd.options.push(count.to_string());
        }
        if flags.pending {
            cmd.options.push("-f".to_string());
        }
        match location {
            BreakPointLocation::Source {
                file,
                line,
                modern: true,
            } => {
                cmd.options.push("--source".to_string());
                cmd.options.push(escape_arg(file, false));
                cmd.options.push("--line".to_string());
                cmd.options.push(line.to_string());
            }
            BreakPointLocation::Source {
                file,
                line,
                modern: false,
            } => {
                cmd.options
                    .push(escape_arg(&format!("{}:{}", file, line), false));
            }
            BreakPointLocation::Function { name, modern: true } => {
                cmd.options.push("--function".to_string());
                cmd.options.push(escape_arg(name, false));
            }
            BreakPointLocation::Function {
                name,
                modern: false,
            } => {
                cmd.options.push(escape_arg(name, false));
            }
        }
        cmd
    }

    pub fn break_condition(number: u64, condition: &str) -> MiCommand {
        let mut cmd = MiCommand::new("-break-condition");
        cmd.options.push(number.to_string());
        cmd.options.push(condition.to_string());
        cmd
    }

    pub fn break_delete(breakpoint_numbers: &[u64]) -> MiCommand {
        let mut numbers = breakpoint_numbers.to_vec();
        numbers.sort_unstable();
        numbers.dedup();
        let mut cmd = MiCommand::new("-break-delete");
        cmd.options = numbers.into_iter().map(|n| n.to_string()).collect();
        cmd
    }

    pub fn break_list() -> MiCommand {
        MiCommand::new("-break-list")
    }

    // target

    pub fn target_attach(pid: u32) -> MiCommand {
        let mut cmd = MiCommand::new("-target-attach");
        cmd.options.push(pid.to_string());
        cmd
    }

    pub fn target_select(target_type: &str, parameters: &[String]) -> MiCommand {
        let mut cmd = MiCommand::new("-target-select");
        cmd.options.push(target_type.to_string());
        cmd.options
            .extend(parameters.iter().map(|p| escape_arg(p, false)));
        cmd
    }

    // threads and stack

    pub fn thread_info(thread_id: Option<i64>) -> MiCommand {
        let mut cmd = MiCommand::new("-thread-info");
        if let Some(id) = thread_id {
            if id >= 0 {
                cmd.options.push(id.to_string());
            }
        }
        cmd
    }

    pub fn stack_info_depth(thread_id: Option<i64>, max_depth: Option<u32>) -> MiCommand {
        let mut cmd = MiCommand::new("-stack-info-depth");
        thread_opt(&mut cmd.options, thread_id);
        if let Some(depth) = max_depth {
            cmd.options.push(depth.to_string());
        }
        cmd
    }

    pub fn stack_list_frames(
        thread_id: Option<i64>,
        low_frame: Option<u32>,
        high_frame: Option<u32>,
    ) -> MiCommand {
        let mut cmd = MiCommand::new("-stack-list-frames");
        thread_opt(&mut cmd.options, thread_id);
        if let (Some(low), Some(high)) = (low_frame, high_frame) {
            cmd.options.push(low.min(high).to_string());
            cmd.options.push(high.max(low).to_string());
        }
        cmd
    }

    pub fn stack_select_frame(frame_id: u32) -> MiCommand {
        let mut cmd = MiCommand::new("-stack-select-frame");
        cmd.options.push(frame_id.to_string());
        cmd
    }

    pub fn stack_list_variables(thread_id: Option<i64>, frame_id: Option<i64>) -> MiCommand {
        let mut cmd = MiCommand::new("-stack-list-variables");
        thread_opt(&mut cmd.options, thread_id);
        frame_opt(&mut cmd.options, frame_id);
        cmd.options.push("--simple-values".to_string());
        cmd
    }

    // data

    pub fn data_read_memory_bytes(address: &str, length: u64, offset: i64) -> MiCommand {
        let mut cmd = MiCommand::new("-data-read-memory-bytes");
        cmd.options.push("-o".to_string());
        cmd.options.push(offset.to_string());
        cmd.options.push(escape_arg(address, true));
        cmd.options.push(length.to_string());
        cmd
    }

    pub fn data_evaluate_expression(expression: &str) -> MiCommand {
        let mut cmd = MiCommand::new("-data-evaluate-expression");
        cmd.options.push(escape_arg(expression, true));
        cmd
    }

    pub fn data_disassemble(
        start_expr: &str,
        end_expr: &str,
        mode: DisassembleMode,
    ) -> MiCommand {
        MiCommand {
            operation: "-data-disassemble".to_string(),
            options: vec![
                "-s".to_string(),
                escape_arg(start_expr, true),
                "-e".to_string(),
                escape_arg(end_expr, true),
            ],
            parameters: vec![(mode as u8).to_string()],
        }
    }

    // symbols

    fn symbol_query(
        operation: &str,
        name: Option<&str>,
        type_: Option<&str>,
        max_results: Option<u32>,
        include_nondebug: bool,
    ) -> MiCommand {
        let mut cmd = MiCommand::new(operation);
        if let Some(name) = name {
            cmd.options.push("--name".to_string());
            cmd.options.push(escape_arg(name, false));
        }
        if let Some(type_) = type_ {
            cmd.options.push("--type".to_string());
            cmd.options.push(escape_arg(type_, false));
        }
        if let Some(max) = max_results {
            cmd.options.push("--max-results".to_string());
            cmd.options.push(max.to_string());
        }
        if include_nondebug {
            cmd.options.push("--include-nondebug".to_string());
        }
        cmd
    }

    pub fn symbol_info_variables(
        name: Option<&str>,
        type_: Option<&str>,
        max_results: Option<u32>,
        include_nondebug: bool,
    ) -> MiCommand {
        Self::symbol_query(
            "-symbol-info-variables",
            name,
            type_,
            max_results,
            include_nondebug,
        )
    }

    pub fn symbol_info_functions(
        name: Option<&str>,
        type_: Option<&str>,
        max_results: Option<u32>,
        include_nondebug: bool,
    ) -> MiCommand {
        Self::symbol_query(
            "-symbol-info-functions",
            name,
            type_,
            max_results,
            include_nondebug,
        )
    }

    // variable objects

    /// `-var-create - * "expr"`, optionally pinned to a thread/frame so the
    /// varobj evaluates in that context.
    pub fn var_create(
        thread_id: Option<i64>,
        frame_id: Option<i64>,
        expression: &str,
    ) -> MiCommand {
        let mut cmd = MiCommand::new("-var-create");
        thread_opt(&mut cmd.options, thread_id);
        frame_opt(&mut cmd.options, frame_id);
        cmd.options.push("-".to_string());
        cmd.options.push("*".to_string());
        cmd.options.push(escape_arg(expression, true));
        cmd
    }

    pub fn var_update(name: &str) -> MiCommand {
        let mut cmd = MiCommand::new("-var-update");
        cmd.options.push("--all-values".to_string());
        cmd.options.push(name.to_string());
        cmd
    }

    pub fn var_delete(name: &str, delete_children_only: bool) -> MiCommand {
        let mut cmd = MiCommand::new("-var-delete");
        if delete_children_only {
            cmd.options.push("-c".to_string());
        }
        cmd.options.push(name.to_string());
        cmd
    }

    pub fn var_list_children(name: &str, print_values: bool) -> MiCommand {
        let mut cmd = MiCommand::new("-var-list-children");
        cmd.options.push(
            if print_values {
                "--all-values"
            } else {
                "--no-values"
            }
            .to_string(),
        );
        cmd.options.push(name.to_string());
        cmd
    }

    pub fn var_assign(name: &str, value: &str) -> MiCommand {
        let mut cmd = MiCommand::new("-var-assign");
        cmd.options.push(name.to_string());
        cmd.options.push(escape_arg(value, false));
        cmd
    }

    pub fn var_info_path_expression(name: &str) -> MiCommand {
        let mut cmd = MiCommand::new("-var-info-path-expression");
        cmd.options.push(name.to_string());
        cmd
    }

    // gdb state

    pub fn gdb_set(parameter: &str) -> MiCommand {
        let mut cmd = MiCommand::new("-gdb-set");
        cmd.options
            .extend(parameter.split(' ').map(|p| p.to_string()));
        cmd
    }

    pub fn gdb_show(parameter: &str) -> MiCommand {
        let mut cmd = MiCommand::new("-gdb-show");
        cmd.options.push(parameter.to_string());
        cmd
    }

    pub fn gdb_exit() -> MiCommand {
        MiCommand::new("-gdb-exit")
    }

    pub fn enable_pretty_printing() -> MiCommand {
        MiCommand::new("-enable-pretty-printing")
    }

    // files

    pub fn file_exec_and_symbols(file: &str) -> MiCommand {
        let mut cmd = MiCommand::new("-file-exec-and-symbols");
        cmd.options.push(escape_arg(file, false));
        cmd
    }

    pub fn file_symbol_file(file: Option<&str>) -> MiCommand {
        let mut cmd = MiCommand::new("-file-symbol-file");
        if let Some(file) = file {
            cmd.options.push(escape_arg(file, false));
        }
        cmd
    }

    /// `add-symbol-file` has no MI spelling; it runs on the console
    /// interpreter.
    pub fn add_symbol_file(file: &str, address: Option<&str>) -> MiCommand {
        let command = match address {
            Some(addr) => format!("add-symbol-file {} {}", file, addr),
            None => format!("add-symbol-file {}", file),
        };
        Self::cli_exec(&command)
    }

    /// `load` (download to a remote target) likewise runs on the console
    /// interpreter.
    pub fn load(file: Option<&str>) -> MiCommand {
        match file {
            Some(file) => Self::cli_exec(&format!("load {}", file)),
            None => Self::cli_exec("load"),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_escape() {
        assert_eq!(standard_escape("a b"), "\"a b\"");
        assert_eq!(standard_escape("a\\b"), "a\\\\b");
        assert_eq!(escape_arg("c", false), "c");
        assert_eq!(escape_arg("c", true), "\"c\"");
        assert_eq!(standard_escape("say \"hi\""), "\"say \\\"hi\\\"\"");
    }

    #[test]
    fn test_render_with_token() {
        assert_eq!(MiCommand::exec_run().render(0), "0-exec-run");
        assert_eq!(
            MiCommand::exec_continue(Some(2)).render(41),
            "41-exec-continue --thread 2"
        );
        assert_eq!(
            MiCommand::data_disassemble(
                "0x400000",
                "0x400040",
                DisassembleMode::MixedSourceAndDisassemblyWithRawOpcodes
            )
            .render(9),
            "9-data-disassemble -s \"0x400000\" -e \"0x400040\" -- 5"
        );
    }

    #[test]
    fn test_negative_ids_are_omitted() {
        assert_eq!(MiCommand::exec_next(Some(-1)).render(1), "1-exec-next");
        assert_eq!(
            MiCommand::stack_list_variables(Some(-1), Some(-1)).render(2),
            "2-stack-list-variables --simple-values"
        );
        assert_eq!(
            MiCommand::exec_interrupt(Some(-1)).render(3),
            "3-exec-interrupt --all"
        );
        assert_eq!(
            MiCommand::exec_interrupt(Some(4)).render(5),
            "5-exec-interrupt --thread 4"
        );
    }

    #[test]
    fn test_break_insert_forms() {
        let modern = MiCommand::break_insert(
            &BreakPointLocation::Source {
                file: "dir with space/empty.c".to_string(),
                line: 3,
                modern: true,
            },
            BreakPointFlags {
                hardware: true,
                ..Default::default()
            },
        );
        assert_eq!(
            modern.render(0),
            "0-break-insert -h --source \"dir with space/empty.c\" --line 3"
        );

        let legacy = MiCommand::break_insert(
            &BreakPointLocation::Source {
                file: "empty.c".to_string(),
                line: 3,
                modern: false,
            },
            BreakPointFlags {
                temporary: true,
                ignore_count: Some(2),
                ..Default::default()
            },
        );
        assert_eq!(legacy.render(1), "1-break-insert -t -i 2 empty.c:3");

        let function = MiCommand::break_insert(
            &BreakPointLocation::Function {
                name: "main".to_string(),
                modern: true,
            },
            BreakPointFlags::default(),
        );
        assert_eq!(function.render(2), "2-break-insert --function main");
    }

    #[test]
    fn test_break_delete_sorts_and_dedups() {
        assert_eq!(
            MiCommand::break_delete(&[3, 1, 3, 2]).render(0),
            "0-break-delete 1 2 3"
        );
    }

    #[test]
    fn test_raw_passthrough() {
        assert_eq!(MiCommand::raw("-exec-next").render(5), "5-exec-next");
        assert_eq!(
            MiCommand::raw("info registers").render(6),
            "6-interpreter-exec console \"info registers\""
        );
    }

    #[test]
    fn test_memory_read() {
        assert_eq!(
            MiCommand::data_read_memory_bytes("&buf[2]", 10, 0).render(8),
            "8-data-read-memory-bytes -o 0 \"&buf[2]\" 10"
        );
    }
}
