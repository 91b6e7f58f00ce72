use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::io::AsyncWrite;
use tokio::sync::mpsc::{Receiver, Sender, channel};
use tracing::{debug, info, warn};

use crate::breakpoints::{
    function_breakpoint_matches, is_function_candidate, is_source_candidate, parse_hit_condition,
    reconcile, source_breakpoint_matches,
};
use crate::config::{Config, TargetArguments};
use crate::dap::protocol::{
    Breakpoint, BreakpointsBody, Capabilities, ContinuedEventBody, DapStackFrame, DapThread,
    DapVariable, DisassembleArguments, DisassembleBody, DisassembledInstruction, EvaluateArguments,
    EvaluateBody, MemoryContentsBody, MemoryRequestArguments, OutputEventBody,
    FunctionBreakpoint, ReadMemoryArguments, ReadMemoryBody, Request, ScopesArguments,
    ScopesBody, Scope, SetBreakpointsArguments, SetFunctionBreakpointsArguments, SetVariableArguments,
    SetVariableBody, Source, SourceBreakpoint, StackTraceArguments, StackTraceBody,
    StoppedEventBody, ThreadExecutionArguments, ThreadsBody, VariablesArguments, VariablesBody,
};
use crate::dap::transport::DapClient;
use crate::error::{AppError, AppResult};
use crate::mi::commands::{BreakPointFlags, BreakPointLocation, DisassembleMode, MiCommand};
use crate::mi::output::{AsyncClass, AsyncKind, OutOfBandRecord, ThreadEvent};
use crate::mi::{GdbBackend, GdbBuilder, MiEvent};
use crate::models::{
    BreakInsertResponse, BreakPoint, LocalVariable, MemoryContents, SourceAsmGroup, StackFrame,
    Thread, ThreadInfo, VarCreateResponse, VarChild,
};
use crate::utils::{hex_to_base64, parse_memory_reference};
use crate::vars::{VarManager, VarObj, VariableKey};

/// Opaque frame handle contents; the client holds the table index + 1.
#[derive(Debug, Clone, Copy)]
struct FrameHandle {
    thread_id: i64,
    frame_level: u32,
    /// Innermost stack depth at allocation time; part of the varobj key so
    /// recursion does not alias cached variable objects.
    stack_depth: u32,
}

/// Opaque variablesReference contents.
#[derive(Debug, Clone)]
enum VariableReference {
    /// The local scope of a frame
    Frame { frame_handle: usize },
    /// The children of a tracked variable object
    Object {
        frame_handle: usize,
        varobj_name: String,
    },
}

enum StepKind {
    Next,
    StepIn,
    StepOut,
    Continue,
}

/// The DAP-facing session: maps each request onto MI command sequences,
/// owns the opaque handle tables, tracks threads and run state, and routes
/// asynchronous stop records to client events.
pub struct DebugSession<W: AsyncWrite + Unpin> {
    client: DapClient<W>,
    config: Config,
    backend: Option<Arc<GdbBackend>>,
    events_tx: Sender<MiEvent>,
    vars: VarManager,
    target: TargetArguments,
    is_attach: bool,
    running: bool,
    threads: Vec<Thread>,
    frame_handles: Vec<FrameHandle>,
    variable_handles: Vec<VariableReference>,
    /// gdb breakpoint number -> log message emitted (with auto-continue)
    /// instead of stopping
    logpoints: HashMap<u64, String>,
    /// gdb breakpoint numbers that came from setFunctionBreakpoints
    function_breakpoints: HashSet<u64>,
    array_type: Regex,
    send_initialized: bool,
    terminated: bool,
    fatal: Option<String>,
}

impl<W: AsyncWrite + Unpin> DebugSession<W> {
    pub fn new(writer: W, config: Config) -> (Self, Receiver<MiEvent>) {
        let (events_tx, events_rx) = channel(100);
        let session = DebugSession {
            client: DapClient::new(writer),
            config,
            backend: None,
            events_tx,
            vars: VarManager::new(),
            target: TargetArguments::default(),
            is_attach: false,
            running: false,
            threads: Vec::new(),
            frame_handles: Vec::new(),
            variable_handles: Vec::new(),
            logpoints: HashMap::new(),
            function_breakpoints: HashSet::new(),
            array_type: Regex::new(r"\[\d+\]").expect("array pattern compiles"),
            send_initialized: false,
            terminated: false,
            fatal: None,
        };
        (session, events_rx)
    }

    /// Serve the session until the client disconnects or gdb cannot be
    /// started.
    pub async fn run(
        mut self,
        mut requests: Receiver<Request>,
        mut events: Receiver<MiEvent>,
    ) -> AppResult<()> {
        loop {
            tokio::select! {
                request = requests.recv() => match request {
                    Some(request) => self.handle_request(&mut events, request).await,
                    None => break,
                },
                event = events.recv() => match event {
                    Some(event) => self.handle_mi_event(event).await,
                    None => break,
                },
            }
            if self.terminated {
                break;
            }
        }
        if let Some(backend) = self.backend.take() {
            backend.shutdown().await;
        }
        match self.fatal {
            Some(message) => Err(AppError::Spawn(message)),
            None => Ok(()),
        }
    }

    async fn handle_request(&mut self, events: &mut Receiver<MiEvent>, request: Request) {
        debug!("request: {}", request.command);
        let result = match request.command.as_str() {
            "initialize" => self.handle_initialize(),
            "launch" => self.handle_launch(&request).await,
            "attach" => self.handle_attach(&request).await,
            "setBreakpoints" => self.handle_set_breakpoints(events, &request).await,
            "setFunctionBreakpoints" => {
                self.handle_set_function_breakpoints(events, &request).await
            }
            "configurationDone" => self.handle_configuration_done().await,
            "threads" => self.handle_threads().await,
            "stackTrace" => self.handle_stack_trace(&request).await,
            "scopes" => self.handle_scopes(&request),
            "variables" => self.handle_variables(&request).await,
            "setVariable" => self.handle_set_variable(&request).await,
            "evaluate" => self.handle_evaluate(&request).await,
            "next" => self.handle_execution(&request, StepKind::Next).await,
            "stepIn" => self.handle_execution(&request, StepKind::StepIn).await,
            "stepOut" => self.handle_execution(&request, StepKind::StepOut).await,
            "continue" => self.handle_execution(&request, StepKind::Continue).await,
            "pause" => self.handle_pause(&request).await,
            "disassemble" => self.handle_disassemble(&request).await,
            "readMemory" => self.handle_read_memory(&request).await,
            "cdt-gdb-adapter/Memory" => self.handle_memory_request(&request).await,
            "disconnect" => self.handle_disconnect().await,
            unknown => Err(AppError::Protocol(format!(
                "unsupported request: {}",
                unknown
            ))),
        };
        self.client.respond(&request, result).await;
        if self.send_initialized {
            self.send_initialized = false;
            self.client.send_bodyless_event("initialized").await;
        }
    }

    fn backend(&self) -> AppResult<Arc<GdbBackend>> {
        self.backend
            .clone()
            .ok_or_else(|| AppError::Protocol("the debug session is not launched".to_string()))
    }

    fn parse_args<T: DeserializeOwned>(request: &Request) -> AppResult<T> {
        serde_json::from_value(request.arguments.clone()).map_err(|e| {
            AppError::Protocol(format!("invalid {} arguments: {}", request.command, e))
        })
    }

    // startup

    fn handle_initialize(&mut self) -> AppResult<Value> {
        Ok(serde_json::to_value(Capabilities::default())?)
    }

    async fn handle_launch(&mut self, request: &Request) -> AppResult<Value> {
        let args: TargetArguments = Self::parse_args(request)?;
        let program = args
            .program
            .clone()
            .ok_or_else(|| AppError::Protocol("launch requires \"program\"".to_string()))?;
        self.spawn_backend(&args).await?;
        let backend = self.backend()?;
        backend
            .send_command(&MiCommand::file_exec_and_symbols(&program))
            .await?;
        if let Some(arguments) = &args.arguments {
            backend
                .send_command(&MiCommand::exec_arguments(arguments))
                .await?;
        }
        let init_commands: Vec<MiCommand> =
            args.init_commands.iter().map(|c| MiCommand::raw(c)).collect();
        backend.send_commands(&init_commands).await?;
        self.target = args;
        self.is_attach = false;
        self.send_initialized = true;
        Ok(Value::Null)
    }

    async fn handle_attach(&mut self, request: &Request) -> AppResult<Value> {
        let args: TargetArguments = Self::parse_args(request)?;
        let pid = args
            .process_id
            .ok_or_else(|| AppError::Protocol("attach requires \"processId\"".to_string()))?;
        self.spawn_backend(&args).await?;
        let backend = self.backend()?;
        let init_commands: Vec<MiCommand> =
            args.init_commands.iter().map(|c| MiCommand::raw(c)).collect();
        backend.send_commands(&init_commands).await?;
        backend
            .send_command(&MiCommand::target_attach(pid))
            .await?;
        self.target = args;
        self.is_attach = true;
        self.send_initialized = true;
        Ok(Value::Null)
    }

    async fn spawn_backend(&mut self, args: &TargetArguments) -> AppResult<()> {
        if self.backend.is_some() {
            return Err(AppError::Protocol("session already launched".to_string()));
        }
        if let Some(log_file) = &args.log_file {
            // the file sink is fixed at startup; point the client at the env
            // override instead of silently dropping the request
            info!(
                "logFile {} requested; set DAP_GDB_LOG_DIR before launching the adapter",
                log_file
            );
        }
        let mut builder = GdbBuilder::new(
            args.gdb
                .clone()
                .unwrap_or_else(|| self.config.gdb_path.clone()),
        );
        builder.extra_args = args.gdb_arguments.clone();
        builder.request_async = args.gdb_async();
        builder.request_non_stop = args.gdb_non_stop();
        match builder.try_spawn(self.events_tx.clone()).await {
            Ok(backend) => {
                if args.open_gdb_console {
                    if backend.supports_new_ui() {
                        warn!("openGdbConsole is not supported by this build; ignoring");
                    } else {
                        warn!(
                            "openGdbConsole requested but gdb {} lacks new-ui support; ignoring",
                            backend.version()
                        );
                    }
                }
                self.backend = Some(Arc::new(backend));
                Ok(())
            }
            Err(e) => {
                // a gdb that cannot start is fatal for the whole process
                self.fatal = Some(e.to_string());
                self.terminated = true;
                Err(e)
            }
        }
    }

    async fn handle_configuration_done(&mut self) -> AppResult<Value> {
        let backend = self.backend()?;
        if !self.is_attach {
            backend.send_command(&MiCommand::exec_run()).await?;
        }
        Ok(Value::Null)
    }

    async fn handle_disconnect(&mut self) -> AppResult<Value> {
        if let Some(backend) = self.backend.clone() {
            self.vars.clear(&backend).await;
            backend.shutdown().await;
        }
        self.terminated = true;
        Ok(Value::Null)
    }

    // breakpoints

    async fn handle_set_breakpoints(
        &mut self,
        events: &mut Receiver<MiEvent>,
        request: &Request,
    ) -> AppResult<Value> {
        let args: SetBreakpointsArguments = Self::parse_args(request)?;
        let file = args.source.path.clone().ok_or_else(|| {
            AppError::Protocol("setBreakpoints requires source.path".to_string())
        })?;
        let backend = self.backend()?;
        let was_running = self.running;
        if was_running {
            backend.pause(None).await?;
            self.wait_for_interrupt_stop(events).await?;
        }
        let result = self
            .reconcile_source_breakpoints(&backend, &file, &args.breakpoints)
            .await;
        if was_running {
            // the target resumes whether or not the reconcile went through
            if let Err(e) = backend.send_command(&MiCommand::exec_continue(None)).await {
                warn!("failed to resume after breakpoint update: {}", e);
            }
        }
        result
    }

    /// The interrupt issued for pause-around-modify is acknowledged by the
    /// next `signal-received` stop; it is consumed here so the client never
    /// sees it. Unrelated records arriving in between are routed normally.
    async fn wait_for_interrupt_stop(&mut self, events: &mut Receiver<MiEvent>) -> AppResult<()> {
        while let Some(event) = events.recv().await {
            if let MiEvent::OutOfBand(OutOfBandRecord::AsyncRecord {
                kind: AsyncKind::Exec,
                class: AsyncClass::Stopped,
                results,
                ..
            }) = &event
            {
                if results.get("reason").and_then(|r| r.as_str()) == Some("signal-received") {
                    self.running = false;
                    self.invalidate_handles();
                    return Ok(());
                }
            }
            if matches!(event, MiEvent::GdbExited) {
                self.handle_mi_event(event).await;
                return Err(AppError::Disconnected);
            }
            self.handle_mi_event(event).await;
        }
        Err(AppError::Disconnected)
    }

    async fn reconcile_source_breakpoints(
        &mut self,
        backend: &GdbBackend,
        file: &str,
        desired: &[SourceBreakpoint],
    ) -> AppResult<Value> {
        let table =
            BreakPoint::list_from_value(&backend.send_command(&MiCommand::break_list()).await?)?;
        let candidates: Vec<BreakPoint> = table
            .into_iter()
            .filter(|b| is_source_candidate(file, b, &self.function_breakpoints))
            .collect();
        let outcome = reconcile(desired, &candidates, |d, c| {
            source_breakpoint_matches(file, d, c)
        });

        // deletes go first so hardware breakpoint slots free up before the
        // inserts need them
        let delete_numbers: Vec<u64> = outcome.deletes.iter().map(|c| c.number.major).collect();
        let mut plan: Vec<(&SourceBreakpoint, Option<u64>, Option<u32>)> = outcome
            .plan
            .iter()
            .map(|entry| {
                (
                    entry.desired,
                    entry.matched.map(|c| c.number.major),
                    entry.matched.and_then(|c| c.line),
                )
            })
            .collect();
        if !delete_numbers.is_empty() {
            backend
                .send_command(&MiCommand::break_delete(&delete_numbers))
                .await?;
            for number in &delete_numbers {
                self.logpoints.remove(number);
            }
        }

        let modern = backend.supports_explicit_locations();
        let mut rows = Vec::with_capacity(plan.len());
        for (desired, matched_number, matched_line) in plan.drain(..) {
            match matched_number {
                Some(number) => {
                    self.note_logpoint(number, desired.log_message.as_deref());
                    rows.push(Breakpoint {
                        id: Some(number),
                        verified: true,
                        message: None,
                        source: Some(Source {
                            name: None,
                            path: Some(file.to_string()),
                        }),
                        line: matched_line.or(Some(desired.line)),
                    });
                }
                None => {
                    let location = BreakPointLocation::Source {
                        file: file.to_string(),
                        line: desired.line,
                        modern,
                    };
                    let row = self
                        .insert_breakpoint(
                            backend,
                            location,
                            desired.hit_condition.as_deref(),
                            desired.condition.as_deref(),
                            desired.log_message.as_deref(),
                            Some(desired.line),
                        )
                        .await;
                    rows.push(row);
                }
            }
        }
        Ok(serde_json::to_value(BreakpointsBody { breakpoints: rows })?)
    }

    /// Insert one breakpoint; a failure is reported in the row, never as a
    /// batch error.
    async fn insert_breakpoint(
        &mut self,
        backend: &GdbBackend,
        location: BreakPointLocation,
        hit_condition: Option<&str>,
        condition: Option<&str>,
        log_message: Option<&str>,
        line: Option<u32>,
    ) -> Breakpoint {
        let failed = |message: String| Breakpoint {
            id: None,
            verified: false,
            message: Some(message),
            source: None,
            line,
        };

        let mut flags = BreakPointFlags {
            hardware: self.target.hardware_breakpoint,
            ..Default::default()
        };
        if let Some(hit) = hit_condition {
            match parse_hit_condition(hit) {
                Ok(parsed) => {
                    flags.temporary = parsed.temporary;
                    if parsed.ignore_count > 0 {
                        flags.ignore_count = Some(parsed.ignore_count);
                    }
                }
                Err(message) => return failed(message),
            }
        }

        let inserted = backend
            .send_command(&MiCommand::break_insert(&location, flags))
            .await
            .and_then(|results| BreakInsertResponse::from_value(&results));
        let response = match inserted {
            Ok(response) => response,
            Err(e) => return failed(e.to_string()),
        };
        let number = response.primary.number.major;

        if let Some(condition) = condition.filter(|c| !c.is_empty()) {
            if let Err(e) = backend
                .send_command(&MiCommand::break_condition(number, condition))
                .await
            {
                // no point keeping an unguarded breakpoint the client asked
                // to guard
                let _ = backend
                    .send_command(&MiCommand::break_delete(&[number]))
                    .await;
                return failed(e.to_string());
            }
        }

        if matches!(location, BreakPointLocation::Function { .. }) {
            self.function_breakpoints.insert(number);
        }
        self.note_logpoint(number, log_message);
        Breakpoint {
            id: Some(number),
            verified: true,
            message: None,
            source: response.primary.fullname.clone().map(|path| Source {
                name: response.primary.file.clone(),
                path: Some(path),
            }),
            line: response.primary.line.or(line),
        }
    }

    fn note_logpoint(&mut self, number: u64, message: Option<&str>) {
        match message {
            Some(message) if !message.is_empty() => {
                self.logpoints.insert(number, message.to_string());
            }
            _ => {
                self.logpoints.remove(&number);
            }
        }
    }

    async fn handle_set_function_breakpoints(
        &mut self,
        events: &mut Receiver<MiEvent>,
        request: &Request,
    ) -> AppResult<Value> {
        let args: SetFunctionBreakpointsArguments = Self::parse_args(request)?;
        let backend = self.backend()?;
        let was_running = self.running;
        if was_running {
            backend.pause(None).await?;
            self.wait_for_interrupt_stop(events).await?;
        }
        let result = self
            .reconcile_function_breakpoints(&backend, &args.breakpoints)
            .await;
        if was_running {
            if let Err(e) = backend.send_command(&MiCommand::exec_continue(None)).await {
                warn!("failed to resume after breakpoint update: {}", e);
            }
        }
        result
    }

    async fn reconcile_function_breakpoints(
        &mut self,
        backend: &GdbBackend,
        desired: &[FunctionBreakpoint],
    ) -> AppResult<Value> {
        let table =
            BreakPoint::list_from_value(&backend.send_command(&MiCommand::break_list()).await?)?;
        let candidates: Vec<BreakPoint> = table
            .into_iter()
            .filter(|b| is_function_candidate(b, &self.function_breakpoints))
            .collect();
        let outcome = reconcile(desired, &candidates, function_breakpoint_matches);

        let delete_numbers: Vec<u64> = outcome.deletes.iter().map(|c| c.number.major).collect();
        let plan: Vec<(&FunctionBreakpoint, Option<u64>, Option<u32>)> = outcome
            .plan
            .iter()
            .map(|entry| {
                (
                    entry.desired,
                    entry.matched.map(|c| c.number.major),
                    entry.matched.and_then(|c| c.line),
                )
            })
            .collect();
        if !delete_numbers.is_empty() {
            backend
                .send_command(&MiCommand::break_delete(&delete_numbers))
                .await?;
            for number in &delete_numbers {
                self.function_breakpoints.remove(number);
                self.logpoints.remove(number);
            }
        }

        let modern = backend.supports_explicit_locations();
        let mut rows = Vec::with_capacity(plan.len());
        for (desired, matched_number, matched_line) in plan {
            match matched_number {
                Some(number) => rows.push(Breakpoint {
                    id: Some(number),
                    verified: true,
                    message: None,
                    source: None,
                    line: matched_line,
                }),
                None => {
                    let location = BreakPointLocation::Function {
                        name: desired.name.clone(),
                        modern,
                    };
                    let row = self
                        .insert_breakpoint(
                            backend,
                            location,
                            desired.hit_condition.as_deref(),
                            desired.condition.as_deref(),
                            None,
                            None,
                        )
                        .await;
                    rows.push(row);
                }
            }
        }
        Ok(serde_json::to_value(BreakpointsBody { breakpoints: rows })?)
    }

    // threads and stack

    async fn handle_threads(&mut self) -> AppResult<Value> {
        let backend = self.backend()?;
        // while the target runs the last known list is served; the next stop
        // refreshes it
        if !self.running {
            let results = backend.send_command(&MiCommand::thread_info(None)).await?;
            let infos = ThreadInfo::list_from_value(&results)?;
            if !infos.is_empty() {
                self.threads = infos.iter().map(Thread::from).collect();
            }
        }
        let threads = self
            .threads
            .iter()
            .map(|t| DapThread {
                id: t.id,
                name: t.name.clone(),
            })
            .collect();
        Ok(serde_json::to_value(ThreadsBody { threads })?)
    }

    async fn handle_stack_trace(&mut self, request: &Request) -> AppResult<Value> {
        let args: StackTraceArguments = Self::parse_args(request)?;
        let backend = self.backend()?;
        if self.running {
            return Err(AppError::Protocol("the target is running".to_string()));
        }

        let depth_results = backend
            .send_command(&MiCommand::stack_info_depth(Some(args.thread_id), None))
            .await?;
        let depth: u32 = depth_results
            .get("depth")
            .and_then(|d| d.as_str())
            .and_then(|d| d.parse().ok())
            .ok_or_else(|| AppError::MiProtocol("stack-info-depth without depth".to_string()))?;

        let start = args.start_frame.unwrap_or(0);
        let levels = match args.levels {
            Some(levels) if levels > 0 => levels,
            _ => depth.saturating_sub(start),
        };
        let high = start + levels.saturating_sub(1);
        let results = backend
            .send_command(&MiCommand::stack_list_frames(
                Some(args.thread_id),
                Some(start),
                Some(high),
            ))
            .await?;
        let frames = StackFrame::list_from_value(&results)?;

        let stack_frames = frames
            .iter()
            .map(|frame| {
                let id = self.add_frame_handle(args.thread_id, frame.level, depth);
                let name = frame
                    .func
                    .clone()
                    .or_else(|| frame.address.clone())
                    .unwrap_or_else(|| "??".to_string());
                let source = frame.fullname.clone().or_else(|| frame.file.clone()).map(
                    |path| Source {
                        name: frame.file.clone(),
                        path: Some(path),
                    },
                );
                DapStackFrame {
                    id,
                    name,
                    source,
                    line: frame.line.unwrap_or(0),
                    column: 1,
                    instruction_pointer_reference: frame.address.clone(),
                }
            })
            .collect();
        Ok(serde_json::to_value(StackTraceBody {
            stack_frames,
            total_frames: Some(depth),
        })?)
    }

    fn handle_scopes(&mut self, request: &Request) -> AppResult<Value> {
        let args: ScopesArguments = Self::parse_args(request)?;
        let frame_handle = self.frame_index(args.frame_id)?;
        let reference = self.add_variable_reference(VariableReference::Frame { frame_handle });
        Ok(serde_json::to_value(ScopesBody {
            scopes: vec![Scope {
                name: "Local",
                variables_reference: reference,
                expensive: false,
            }],
        })?)
    }

    // handle tables

    fn add_frame_handle(&mut self, thread_id: i64, frame_level: u32, stack_depth: u32) -> i64 {
        self.frame_handles.push(FrameHandle {
            thread_id,
            frame_level,
            stack_depth,
        });
        self.frame_handles.len() as i64
    }

    fn frame_index(&self, frame_id: i64) -> AppResult<usize> {
        let index = (frame_id - 1) as usize;
        if frame_id < 1 || index >= self.frame_handles.len() {
            return Err(AppError::Protocol(format!(
                "unknown or stale frame id {}",
                frame_id
            )));
        }
        Ok(index)
    }

    fn frame_handle(&self, index: usize) -> AppResult<FrameHandle> {
        self.frame_handles.get(index).copied().ok_or_else(|| {
            AppError::Protocol("stale frame reference; the target has resumed".to_string())
        })
    }

    fn add_variable_reference(&mut self, reference: VariableReference) -> i64 {
        self.variable_handles.push(reference);
        self.variable_handles.len() as i64
    }

    fn variable_reference(&self, id: i64) -> AppResult<VariableReference> {
        let index = (id - 1) as usize;
        if id < 1 || index >= self.variable_handles.len() {
            return Err(AppError::Protocol(format!(
                "unknown or stale variables reference {}",
                id
            )));
        }
        Ok(self.variable_handles[index].clone())
    }

    /// Frame and variable references die with every stop; the tables are
    /// reset wholesale, never collected entry by entry.
    fn invalidate_handles(&mut self) {
        self.frame_handles.clear();
        self.variable_handles.clear();
    }

    fn variable_key(&self, frame: &FrameHandle) -> VariableKey {
        VariableKey {
            frame_id: frame.frame_level as i64,
            thread_id: frame.thread_id,
            depth: frame.stack_depth,
        }
    }

    // variables

    async fn handle_variables(&mut self, request: &Request) -> AppResult<Value> {
        let args: VariablesArguments = Self::parse_args(request)?;
        match self.variable_reference(args.variables_reference)? {
            VariableReference::Frame { frame_handle } => {
                self.frame_variables(frame_handle).await
            }
            VariableReference::Object {
                frame_handle,
                varobj_name,
            } => self.object_variables(frame_handle, &varobj_name).await,
        }
    }

    async fn frame_variables(&mut self, frame_handle: usize) -> AppResult<Value> {
        let backend = self.backend()?;
        let frame = self.frame_handle(frame_handle)?;
        let key = self.variable_key(&frame);

        let tracked: Vec<VarObj> = self
            .vars
            .get_vars(key)
            .map(|list| {
                list.iter()
                    .filter(|v| v.is_var && !v.is_child)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        let mut dropped = false;
        for varobj in &tracked {
            if let Err(e) = self.vars.update_var(&backend, key, varobj).await {
                warn!("failed to update {}: {}; retrying via listing", varobj.name, e);
                let _ = self.vars.remove_var(&backend, key, &varobj.name).await;
                dropped = true;
            }
        }

        if tracked.is_empty() || dropped {
            let results = backend
                .send_command(&MiCommand::stack_list_variables(
                    Some(frame.thread_id),
                    Some(frame.frame_level as i64),
                ))
                .await?;
            for local in LocalVariable::list_from_value(&results)? {
                if self.vars.get_var(key, &local.name).is_some() {
                    continue;
                }
                let created = backend
                    .send_command(&MiCommand::var_create(
                        Some(frame.thread_id),
                        Some(frame.frame_level as i64),
                        &local.name,
                    ))
                    .await;
                match created {
                    Ok(results) => {
                        let response: VarCreateResponse = serde_json::from_value(results)?;
                        self.vars.add_var(key, &local.name, true, false, &response);
                    }
                    Err(e) => warn!("failed to create varobj for {}: {}", local.name, e),
                }
            }
        }

        let listing: Vec<VarObj> = self
            .vars
            .get_vars(key)
            .map(|list| {
                list.iter()
                    .filter(|v| v.is_var && !v.is_child)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        let mut variables = Vec::with_capacity(listing.len());
        for varobj in listing {
            let mut value = varobj.value.clone();
            if self.array_type.is_match(&varobj.r#type) {
                // arrays display as their address; the elements expand as
                // children
                let address = backend
                    .send_command(&MiCommand::data_evaluate_expression(&format!(
                        "&({})",
                        varobj.expression
                    )))
                    .await;
                match address {
                    Ok(results) => {
                        if let Some(v) = results.get("value").and_then(|v| v.as_str()) {
                            value = v.to_string();
                        }
                    }
                    Err(e) => debug!("failed to take address of {}: {}", varobj.expression, e),
                }
            }
            let numchild: u64 = varobj.numchild.parse().unwrap_or(0);
            let reference = if numchild > 0 {
                self.add_variable_reference(VariableReference::Object {
                    frame_handle,
                    varobj_name: varobj.name.clone(),
                })
            } else {
                0
            };
            variables.push(DapVariable {
                name: varobj.expression.clone(),
                value,
                r#type: (!varobj.r#type.is_empty()).then(|| varobj.r#type.clone()),
                variables_reference: reference,
            });
        }
        Ok(serde_json::to_value(VariablesBody { variables })?)
    }

    async fn object_variables(
        &mut self,
        frame_handle: usize,
        varobj_name: &str,
    ) -> AppResult<Value> {
        let backend = self.backend()?;
        let frame = self.frame_handle(frame_handle)?;
        let key = self.variable_key(&frame);

        let children = VarChild::list_from_value(
            &backend
                .send_command(&MiCommand::var_list_children(varobj_name, true))
                .await?,
        )?;

        // access labels are invisible to the user: splice their children in
        // as siblings
        let mut presented = Vec::with_capacity(children.len());
        for child in children {
            if child.is_access_qualifier() {
                let grandchildren = VarChild::list_from_value(
                    &backend
                        .send_command(&MiCommand::var_list_children(&child.name, true))
                        .await?,
                )?;
                presented.extend(grandchildren);
            } else {
                presented.push(child);
            }
        }

        let mut variables = Vec::with_capacity(presented.len());
        for child in presented {
            let exp = child.exp.clone().unwrap_or_else(|| child.name.clone());
            let numchild: u64 = child
                .numchild
                .as_deref()
                .and_then(|n| n.parse().ok())
                .unwrap_or(0);
            if exp.chars().all(|c| c.is_ascii_digit()) {
                // array element: anchor a tracked varobj to its path
                // expression so the handle stays stable across refreshes
                let path_results = backend
                    .send_command(&MiCommand::var_info_path_expression(&child.name))
                    .await?;
                let path = path_results
                    .get("path_expr")
                    .and_then(|p| p.as_str())
                    .ok_or_else(|| {
                        AppError::MiProtocol("var-info-path-expression without path".to_string())
                    })?
                    .to_string();
                let varobj = match self.vars.get_var(key, &path).cloned() {
                    Some(existing) => self.vars.update_var(&backend, key, &existing).await?,
                    None => {
                        let results = backend
                            .send_command(&MiCommand::var_create(
                                Some(frame.thread_id),
                                Some(frame.frame_level as i64),
                                &path,
                            ))
                            .await?;
                        let response: VarCreateResponse = serde_json::from_value(results)?;
                        self.vars.add_var(key, &path, false, true, &response)
                    }
                };
                let reference = if numchild > 0 {
                    self.add_variable_reference(VariableReference::Object {
                        frame_handle,
                        varobj_name: varobj.name.clone(),
                    })
                } else {
                    0
                };
                variables.push(DapVariable {
                    name: format!("[{}]", exp),
                    value: child.value.clone().unwrap_or_else(|| varobj.value.clone()),
                    r#type: child.r#type.clone(),
                    variables_reference: reference,
                });
            } else {
                let reference = if numchild > 0 {
                    self.add_variable_reference(VariableReference::Object {
                        frame_handle,
                        varobj_name: child.name.clone(),
                    })
                } else {
                    0
                };
                variables.push(DapVariable {
                    name: exp,
                    value: child.value.clone().unwrap_or_default(),
                    r#type: child.r#type.clone(),
                    variables_reference: reference,
                });
            }
        }
        Ok(serde_json::to_value(VariablesBody { variables })?)
    }

    async fn handle_set_variable(&mut self, request: &Request) -> AppResult<Value> {
        let args: SetVariableArguments = Self::parse_args(request)?;
        let backend = self.backend()?;
        let reference = self.variable_reference(args.variables_reference)?;

        let assigned = match reference {
            VariableReference::Frame { frame_handle } => {
                let frame = self.frame_handle(frame_handle)?;
                let key = self.variable_key(&frame);
                match self.vars.get_var(key, &args.name).cloned() {
                    Some(varobj) => {
                        let results = backend
                            .send_command(&MiCommand::var_assign(&varobj.name, &args.value))
                            .await?;
                        let _ = self.vars.update_var(&backend, key, &varobj).await;
                        results
                    }
                    None => {
                        // nothing tracked: assign through an expression
                        backend
                            .send_command(&MiCommand::data_evaluate_expression(&format!(
                                "{} = {}",
                                args.name, args.value
                            )))
                            .await?
                    }
                }
            }
            VariableReference::Object {
                frame_handle: _,
                varobj_name,
            } => {
                // the gdb child handle is the dotted path; array elements
                // present as "[N]" but their handle component is the bare
                // index
                let member = args.name.trim_matches(['[', ']']);
                let direct = format!("{}.{}", varobj_name, member);
                let mut result = backend
                    .send_command(&MiCommand::var_assign(&direct, &args.value))
                    .await;
                if result.is_err() {
                    // the member may sit behind an access label
                    for label in ["public", "protected", "private"] {
                        let path = format!("{}.{}.{}", varobj_name, label, member);
                        let retry = backend
                            .send_command(&MiCommand::var_assign(&path, &args.value))
                            .await;
                        if retry.is_ok() {
                            result = retry;
                            break;
                        }
                    }
                }
                result?
            }
        };

        let value = assigned
            .get("value")
            .and_then(|v| v.as_str())
            .unwrap_or(&args.value)
            .to_string();
        Ok(serde_json::to_value(SetVariableBody { value })?)
    }

    async fn handle_evaluate(&mut self, request: &Request) -> AppResult<Value> {
        let args: EvaluateArguments = Self::parse_args(request)?;
        let backend = self.backend()?;

        if args.context.as_deref() == Some("repl") {
            // the console output of the command arrives as stream records
            backend
                .send_command(&MiCommand::raw(&args.expression))
                .await?;
            return Ok(serde_json::to_value(EvaluateBody {
                result: String::new(),
                variables_reference: 0,
            })?);
        }

        let frame_id = args
            .frame_id
            .ok_or_else(|| AppError::Protocol("evaluate requires a frameId".to_string()))?;
        let frame_handle = self.frame_index(frame_id)?;
        let frame = self.frame_handle(frame_handle)?;
        let key = self.variable_key(&frame);

        let varobj = match self.vars.get_var(key, &args.expression).cloned() {
            Some(existing) => self.vars.update_var(&backend, key, &existing).await?,
            None => {
                let results = backend
                    .send_command(&MiCommand::var_create(
                        Some(frame.thread_id),
                        Some(frame.frame_level as i64),
                        &args.expression,
                    ))
                    .await?;
                let response: VarCreateResponse = serde_json::from_value(results)?;
                self.vars
                    .add_var(key, &args.expression, false, false, &response)
            }
        };

        let numchild: u64 = varobj.numchild.parse().unwrap_or(0);
        let reference = if numchild > 0 {
            self.add_variable_reference(VariableReference::Object {
                frame_handle,
                varobj_name: varobj.name.clone(),
            })
        } else {
            0
        };
        Ok(serde_json::to_value(EvaluateBody {
            result: varobj.value,
            variables_reference: reference,
        })?)
    }

    // execution control

    async fn handle_execution(&mut self, request: &Request, kind: StepKind) -> AppResult<Value> {
        let args: ThreadExecutionArguments = Self::parse_args(request)?;
        let backend = self.backend()?;
        let thread = Some(args.thread_id);
        let by_instruction = args.granularity.as_deref() == Some("instruction");
        let command = match kind {
            StepKind::Next if by_instruction => MiCommand::exec_next_instruction(thread),
            StepKind::Next => MiCommand::exec_next(thread),
            StepKind::StepIn if by_instruction => MiCommand::exec_step_instruction(thread),
            StepKind::StepIn => MiCommand::exec_step(thread),
            StepKind::StepOut => MiCommand::exec_finish(thread, None),
            StepKind::Continue => MiCommand::exec_continue(thread),
        };
        backend.send_command(&command).await?;
        Ok(Value::Null)
    }

    async fn handle_pause(&mut self, request: &Request) -> AppResult<Value> {
        let args: ThreadExecutionArguments = Self::parse_args(request)?;
        let backend = self.backend()?;
        // the resulting signal-received stop surfaces as the stopped event
        backend.pause(Some(args.thread_id)).await?;
        Ok(Value::Null)
    }

    // memory and disassembly

    async fn handle_memory_request(&mut self, request: &Request) -> AppResult<Value> {
        let args: MemoryRequestArguments = Self::parse_args(request)?;
        let backend = self.backend()?;
        let results = backend
            .send_command(&MiCommand::data_read_memory_bytes(
                &args.address,
                args.length,
                args.offset.unwrap_or(0),
            ))
            .await?;
        let memory = MemoryContents::first_from_value(&results)?;
        Ok(serde_json::to_value(MemoryContentsBody {
            data: memory.contents,
            address: memory.begin,
        })?)
    }

    async fn handle_read_memory(&mut self, request: &Request) -> AppResult<Value> {
        let args: ReadMemoryArguments = Self::parse_args(request)?;
        let backend = self.backend()?;
        if args.count == 0 {
            return Ok(serde_json::to_value(ReadMemoryBody {
                address: args.memory_reference,
                data: Some(String::new()),
            })?);
        }
        let results = backend
            .send_command(&MiCommand::data_read_memory_bytes(
                &args.memory_reference,
                args.count,
                args.offset.unwrap_or(0),
            ))
            .await?;
        let memory = MemoryContents::first_from_value(&results)?;
        Ok(serde_json::to_value(ReadMemoryBody {
            address: memory.begin,
            data: Some(hex_to_base64(&memory.contents)?),
        })?)
    }

    async fn handle_disassemble(&mut self, request: &Request) -> AppResult<Value> {
        let args: DisassembleArguments = Self::parse_args(request)?;
        let backend = self.backend()?;
        let base = parse_memory_reference(&args.memory_reference)?;
        let mut address = base.wrapping_add_signed(args.offset.unwrap_or(0));
        if args.instruction_offset.unwrap_or(0) < 0 {
            // disassembling backwards from an address is not a well-defined
            // operation on variable-length encodings
            warn!("negative instructionOffset is not supported; starting at the reference");
        }

        let count = args.instruction_count as usize;
        let mut end_reference = args.end_memory_reference.clone();
        let mut instructions: Vec<DisassembledInstruction> = Vec::with_capacity(count);

        while instructions.len() < count {
            let remaining = (count - instructions.len()) as u64;
            // the bound is used for the first fetch only; without one,
            // overshoot generously and trim
            let (end_expr, terminal) = match end_reference.take() {
                Some(reference) => (format!("{:#x}", parse_memory_reference(&reference)?), true),
                None => (format!("{:#x}", address + remaining * 16), false),
            };

            let fetched = backend
                .send_command(&MiCommand::data_disassemble(
                    &format!("{:#x}", address),
                    &end_expr,
                    DisassembleMode::MixedSourceAndDisassemblyWithRawOpcodes,
                ))
                .await
                .and_then(|results| SourceAsmGroup::list_from_value(&results));
            let groups = match fetched {
                Ok(groups) => groups,
                Err(e) => {
                    // keep the response shape: the remaining rows carry the
                    // error text
                    let message = e.to_string();
                    while instructions.len() < count {
                        instructions.push(DisassembledInstruction {
                            address: format!("{:#x}", address),
                            instruction_bytes: None,
                            instruction: message.clone(),
                            symbol: None,
                            location: None,
                            line: None,
                        });
                    }
                    break;
                }
            };

            let mut progressed: u64 = 0;
            for group in &groups {
                let location = group
                    .fullname
                    .clone()
                    .or_else(|| group.file.clone())
                    .map(|path| Source {
                        name: group.file.clone(),
                        path: Some(path),
                    });
                for instruction in &group.instructions {
                    progressed += instruction.opcode_len();
                    if instructions.len() < count {
                        instructions.push(DisassembledInstruction {
                            address: instruction.address.clone(),
                            instruction_bytes: instruction.opcodes.clone(),
                            instruction: instruction.inst.clone(),
                            symbol: instruction.func_name.clone(),
                            location: location.clone(),
                            line: group.line,
                        });
                    }
                }
            }

            if terminal || progressed == 0 {
                break;
            }
            address += progressed;
        }

        Ok(serde_json::to_value(DisassembleBody { instructions })?)
    }

    // asynchronous records

    async fn handle_mi_event(&mut self, event: MiEvent) {
        match event {
            MiEvent::OutOfBand(record) => self.handle_out_of_band(record).await,
            MiEvent::Stderr(line) => {
                self.client
                    .send_event(
                        "output",
                        OutputEventBody {
                            category: "stderr",
                            output: format!("{}\n", line),
                        },
                    )
                    .await;
            }
            MiEvent::GdbExited => {
                if !self.terminated {
                    self.client.send_bodyless_event("terminated").await;
                }
            }
        }
    }

    async fn handle_out_of_band(&mut self, record: OutOfBandRecord) {
        match record {
            OutOfBandRecord::StreamRecord { kind, data } => {
                self.client
                    .send_event(
                        "output",
                        OutputEventBody {
                            category: kind.category(),
                            output: data,
                        },
                    )
                    .await;
            }
            OutOfBandRecord::AsyncRecord {
                kind,
                class,
                results,
                ..
            } => match kind {
                AsyncKind::Exec => match class {
                    AsyncClass::Running => self.handle_running(&results).await,
                    AsyncClass::Stopped => self.handle_stopped(&results).await,
                    other => debug!("unhandled exec record {}: {}", other.as_str(), results),
                },
                AsyncKind::Status => debug!("status {}: {}", class.as_str(), results),
                AsyncKind::Notify => self.handle_notify(class, &results),
            },
        }
    }

    async fn handle_running(&mut self, results: &Value) {
        self.running = true;
        let which = results.get("thread-id").and_then(|t| t.as_str());
        let all = which.is_none_or(|t| t == "all");
        let mut thread_id = 1;
        for thread in &mut self.threads {
            if all || which == Some(thread.id.to_string().as_str()) {
                thread.running = true;
                if !all {
                    thread_id = thread.id;
                }
            }
        }
        self.client
            .send_event(
                "continued",
                ContinuedEventBody {
                    thread_id,
                    all_threads_continued: all,
                },
            )
            .await;
    }

    async fn handle_stopped(&mut self, results: &Value) {
        self.running = false;
        self.invalidate_handles();
        for thread in &mut self.threads {
            thread.running = false;
        }

        let reason = results.get("reason").and_then(|r| r.as_str());
        let thread_id = results
            .get("thread-id")
            .and_then(|t| t.as_str())
            .and_then(|t| t.parse::<i64>().ok());

        match reason {
            Some("exited") | Some("exited-normally") | Some("exited-signalled") => {
                self.client.send_bodyless_event("terminated").await;
            }
            Some("breakpoint-hit") => {
                let number = results
                    .get("bkptno")
                    .and_then(|n| n.as_str())
                    .and_then(|n| n.parse::<u64>().ok());
                if let Some(message) = number.and_then(|n| self.logpoints.get(&n)).cloned() {
                    // a logpoint writes and keeps going; the client never
                    // stops
                    self.client
                        .send_event(
                            "output",
                            OutputEventBody {
                                category: "console",
                                output: format!("{}\n", message),
                            },
                        )
                        .await;
                    if let Ok(backend) = self.backend() {
                        if let Err(e) =
                            backend.send_command(&MiCommand::exec_continue(None)).await
                        {
                            warn!("failed to continue after logpoint: {}", e);
                        }
                    }
                    return;
                }
                let reason = if number.is_some_and(|n| self.function_breakpoints.contains(&n)) {
                    "function breakpoint"
                } else {
                    "breakpoint"
                };
                self.emit_stopped(reason, thread_id).await;
            }
            Some("end-stepping-range") | Some("function-finished") => {
                self.emit_stopped("step", thread_id).await;
            }
            Some("signal-received") => {
                let signal = results
                    .get("signal-name")
                    .and_then(|s| s.as_str())
                    .unwrap_or("signal")
                    .to_string();
                self.emit_stopped(&signal, thread_id).await;
            }
            _ => self.emit_stopped("generic", thread_id).await,
        }
    }

    async fn emit_stopped(&mut self, reason: &str, thread_id: Option<i64>) {
        let all_threads_stopped = self
            .backend
            .as_ref()
            .map(|backend| !backend.non_stop_mode());
        self.client
            .send_event(
                "stopped",
                StoppedEventBody {
                    reason: reason.to_string(),
                    thread_id,
                    all_threads_stopped,
                },
            )
            .await;
    }

    fn handle_notify(&mut self, class: AsyncClass, results: &Value) {
        let verbose = self.target.verbose;
        let id = results
            .get("id")
            .and_then(|i| i.as_str())
            .and_then(|i| i.parse::<i64>().ok());
        match class {
            AsyncClass::Thread(ThreadEvent::Created) => {
                if let Some(id) = id {
                    self.threads.push(Thread {
                        id,
                        name: format!("Thread {}", id),
                        running: true,
                    });
                }
            }
            AsyncClass::Thread(ThreadEvent::Exited) => {
                if let Some(id) = id {
                    self.threads.retain(|t| t.id != id);
                }
            }
            AsyncClass::Thread(_)
            | AsyncClass::LibraryLoaded
            | AsyncClass::BreakPoint(_)
            | AsyncClass::CmdParamChanged => {
                if verbose {
                    info!("notify {}: {}", class.as_str(), results);
                } else {
                    debug!("notify {}: {}", class.as_str(), results);
                }
            }
            AsyncClass::Other(name) => warn!("unhandled notify record {}: {}", name, results),
            AsyncClass::Running | AsyncClass::Stopped => {
                warn!("unexpected notify record {}: {}", class.as_str(), results)
            }
        }
    }
}

#[cfg(test)]
mod test {
    use tokio::io::BufReader;

    use super::*;
    use crate::dap::transport::read_message;
    use crate::mi::output::Output;

    fn stop_results(line: &str) -> Value {
        match Output::parse(line).expect("record parses") {
            Output::OutOfBand(OutOfBandRecord::AsyncRecord { results, .. }) => results,
            other => panic!("expected async record, got {:?}", other),
        }
    }

    async fn drain_wire(wire: Vec<u8>) -> Vec<Value> {
        let mut reader = BufReader::new(wire.as_slice());
        let mut messages = Vec::new();
        while let Some(message) = read_message(&mut reader).await.unwrap() {
            messages.push(message);
        }
        messages
    }

    #[tokio::test]
    async fn test_breakpoint_stop_routing() {
        let mut wire = Vec::new();
        {
            let (mut session, _events) = DebugSession::new(&mut wire, Config::default());
            session.function_breakpoints.insert(3);
            session
                .handle_stopped(&stop_results(
                    "*stopped,reason=\"breakpoint-hit\",bkptno=\"1\",thread-id=\"1\"\n",
                ))
                .await;
            session
                .handle_stopped(&stop_results(
                    "*stopped,reason=\"breakpoint-hit\",bkptno=\"3\",thread-id=\"1\"\n",
                ))
                .await;
        }
        let messages = drain_wire(wire).await;
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["event"], "stopped");
        assert_eq!(messages[0]["body"]["reason"], "breakpoint");
        assert_eq!(messages[0]["body"]["threadId"], 1);
        assert_eq!(messages[1]["body"]["reason"], "function breakpoint");
    }

    #[tokio::test]
    async fn test_logpoint_emits_output_without_stopping() {
        let mut wire = Vec::new();
        {
            let (mut session, _events) = DebugSession::new(&mut wire, Config::default());
            session.logpoints.insert(2, "hit".to_string());
            session
                .handle_stopped(&stop_results(
                    "*stopped,reason=\"breakpoint-hit\",bkptno=\"2\",thread-id=\"1\"\n",
                ))
                .await;
        }
        let messages = drain_wire(wire).await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["event"], "output");
        assert_eq!(messages[0]["body"]["output"], "hit\n");
    }

    #[tokio::test]
    async fn test_step_signal_and_exit_routing() {
        let mut wire = Vec::new();
        {
            let (mut session, _events) = DebugSession::new(&mut wire, Config::default());
            session
                .handle_stopped(&stop_results(
                    "*stopped,reason=\"end-stepping-range\",thread-id=\"1\"\n",
                ))
                .await;
            session
                .handle_stopped(&stop_results(
                    "*stopped,reason=\"signal-received\",signal-name=\"SIGSEGV\",\
                     thread-id=\"1\"\n",
                ))
                .await;
            session
                .handle_stopped(&stop_results("*stopped,reason=\"exited-normally\"\n"))
                .await;
            session
                .handle_stopped(&stop_results(
                    "*stopped,reason=\"watchpoint-trigger\",thread-id=\"1\"\n",
                ))
                .await;
        }
        let messages = drain_wire(wire).await;
        assert_eq!(messages[0]["body"]["reason"], "step");
        assert_eq!(messages[1]["body"]["reason"], "SIGSEGV");
        assert_eq!(messages[2]["event"], "terminated");
        assert_eq!(messages[3]["body"]["reason"], "generic");
    }

    #[tokio::test]
    async fn test_handles_reset_on_stop() {
        let mut wire = Vec::new();
        let (mut session, _events) = DebugSession::new(&mut wire, Config::default());
        let frame_id = session.add_frame_handle(1, 0, 4);
        let frame_handle = session.frame_index(frame_id).unwrap();
        let reference =
            session.add_variable_reference(VariableReference::Frame { frame_handle });
        assert!(session.variable_reference(reference).is_ok());

        session
            .handle_stopped(&stop_results(
                "*stopped,reason=\"end-stepping-range\",thread-id=\"1\"\n",
            ))
            .await;
        assert!(session.frame_index(frame_id).is_err());
        assert!(session.variable_reference(reference).is_err());
        assert!(session.variable_reference(0).is_err());
    }

    #[tokio::test]
    async fn test_running_marks_threads_and_emits_continued() {
        let mut wire = Vec::new();
        {
            let (mut session, _events) = DebugSession::new(&mut wire, Config::default());
            session.threads.push(Thread {
                id: 1,
                name: "main".to_string(),
                running: false,
            });
            session
                .handle_running(&stop_results("*running,thread-id=\"all\"\n"))
                .await;
            assert!(session.running);
            assert!(session.threads[0].running);
        }
        let messages = drain_wire(wire).await;
        assert_eq!(messages[0]["event"], "continued");
        assert_eq!(messages[0]["body"]["allThreadsContinued"], true);
    }

    #[tokio::test]
    async fn test_thread_notifications_update_list() {
        let mut wire = Vec::new();
        let (mut session, _events) = DebugSession::new(&mut wire, Config::default());
        session.handle_notify(
            AsyncClass::Thread(ThreadEvent::Created),
            &stop_results("=thread-created,id=\"2\",group-id=\"i1\"\n"),
        );
        assert_eq!(session.threads.len(), 1);
        assert_eq!(session.threads[0].id, 2);
        assert!(session.threads[0].running);

        session.handle_notify(
            AsyncClass::Thread(ThreadEvent::Exited),
            &stop_results("=thread-exited,id=\"2\",group-id=\"i1\"\n"),
        );
        assert!(session.threads.is_empty());
    }
}
