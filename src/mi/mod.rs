pub mod commands;
pub mod output;

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::Mutex;
use tokio::sync::mpsc::Sender;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::error::{AppError, AppResult};
use crate::utils::version_at_least;
use commands::MiCommand;
use output::{
    AsyncClass, AsyncKind, Output, OutOfBandRecord, RecordBuffer, ResultClass, ResultRecord,
};

/// Everything the backend surfaces besides command completions: parsed
/// out-of-band records, gdb's own stderr, and process exit.
#[derive(Debug, Clone)]
pub enum MiEvent {
    OutOfBand(OutOfBandRecord),
    Stderr(String),
    GdbExited,
}

type PendingMap = Arc<StdMutex<HashMap<u64, oneshot::Sender<AppResult<ResultRecord>>>>>;

/// A builder struct for configuring and launching gdb before binding the MI
/// session to it.
pub struct GdbBuilder {
    /// Path to the gdb executable
    pub gdb_path: String,
    /// Extra arguments appended after `--interpreter=mi2`
    pub extra_args: Vec<String>,
    /// Request MI async mode (default on; forced on by non-stop)
    pub request_async: bool,
    /// Request non-stop mode (default off)
    pub request_non_stop: bool,
}

impl GdbBuilder {
    pub fn new(gdb_path: String) -> Self {
        GdbBuilder {
            gdb_path,
            extra_args: Vec::new(),
            request_async: true,
            request_non_stop: false,
        }
    }

    /// Launch gdb and negotiate modes. The spawned backend owns the gdb
    /// process; parsed out-of-band records, stderr lines and process exit
    /// are published on `events`.
    pub async fn try_spawn(self, events: Sender<MiEvent>) -> AppResult<GdbBackend> {
        let version = fetch_gdb_version(&self.gdb_path).await?;
        info!("gdb version {}", version);

        let mut command = Command::new(&self.gdb_path);
        command.arg("--interpreter=mi2").args(&self.extra_args);
        debug!("Starting GDB process with command: {:?}", command);

        let mut child = command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AppError::Spawn(format!("{}: {}", self.gdb_path, e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| AppError::Spawn("gdb has no stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::Spawn("gdb has no stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| AppError::Spawn("gdb has no stderr".to_string()))?;

        let pid = child.id();
        let pending: PendingMap = Arc::new(StdMutex::new(HashMap::new()));
        let is_running = Arc::new(AtomicBool::new(false));
        let disconnected = Arc::new(AtomicBool::new(false));

        tokio::spawn(process_output(
            stdout,
            pending.clone(),
            events.clone(),
            is_running.clone(),
            disconnected.clone(),
        ));
        tokio::spawn(process_stderr(stderr, events.clone()));

        let backend = GdbBackend {
            process: Mutex::new(child),
            pid,
            stdin: Mutex::new(stdin),
            current_command_token: AtomicU64::new(0),
            pending,
            is_running,
            disconnected,
            version,
            async_mode: AtomicBool::new(false),
            non_stop_mode: AtomicBool::new(false),
        };

        backend
            .negotiate_modes(self.request_async, self.request_non_stop)
            .await;
        Ok(backend)
    }
}

/// The MI session: owns the gdb subprocess and its parser, assigns command
/// tickets, and demultiplexes result records back to their callers.
pub struct GdbBackend {
    process: Mutex<Child>,
    pid: Option<u32>,
    stdin: Mutex<ChildStdin>,
    current_command_token: AtomicU64,
    pending: PendingMap,
    is_running: Arc<AtomicBool>,
    disconnected: Arc<AtomicBool>,
    version: String,
    async_mode: AtomicBool,
    non_stop_mode: AtomicBool,
}

impl GdbBackend {
    /// Pagination off, optional non-stop, optional MI async. Mode failures
    /// downgrade with a warning; after this the negotiated flags are fixed
    /// for the session.
    async fn negotiate_modes(&self, request_async: bool, request_non_stop: bool) {
        if let Err(e) = self.send_command(&MiCommand::gdb_set("pagination off")).await {
            warn!("failed to disable pagination: {}", e);
        }
        if let Err(e) = self.send_command(&MiCommand::enable_pretty_printing()).await {
            warn!("failed to enable pretty printing: {}", e);
        }

        if request_non_stop {
            match self.send_command(&MiCommand::gdb_set("non-stop on")).await {
                Ok(_) => self.non_stop_mode.store(true, Ordering::SeqCst),
                Err(e) => warn!("failed to enable non-stop mode: {}", e),
            }
        }

        // non-stop only works over an asynchronous MI connection
        if request_async || self.non_stop_mode() {
            let command = if self.version_at_least("7.8") {
                "mi-async on"
            } else {
                "target-async on"
            };
            match self.send_command(&MiCommand::gdb_set(command)).await {
                Ok(_) => self.async_mode.store(true, Ordering::SeqCst),
                Err(e) => warn!("failed to enable async mode: {}", e),
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    pub fn async_mode(&self) -> bool {
        self.async_mode.load(Ordering::SeqCst)
    }

    pub fn non_stop_mode(&self) -> bool {
        self.non_stop_mode.load(Ordering::SeqCst)
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn version_at_least(&self, minimum: &str) -> bool {
        version_at_least(&self.version, minimum)
    }

    /// Whether this gdb can host a separate console UI (`new-ui`, gdb 7.12).
    pub fn supports_new_ui(&self) -> bool {
        self.version_at_least("7.12")
    }

    /// gdb 8.1 understands explicit breakpoint locations
    /// (`--source`/`--line`/`--function`).
    pub fn supports_explicit_locations(&self) -> bool {
        self.version_at_least("8.1")
    }

    /// Send one MI command and wait for its result record. Safe to call
    /// concurrently: the ticket is assigned under the writer lock, so bytes
    /// reach gdb in ticket order and completions come back in the same
    /// order.
    pub async fn send_command_record(&self, command: &MiCommand) -> AppResult<ResultRecord> {
        if self.disconnected.load(Ordering::SeqCst) {
            return Err(AppError::Disconnected);
        }

        let (completion, response) = oneshot::channel();
        {
            let mut stdin = self.stdin.lock().await;
            let token = self.current_command_token.fetch_add(1, Ordering::SeqCst);
            self.pending
                .lock()
                .expect("pending map lock")
                .insert(token, completion);
            let line = format!("{}\n", command.render(token));
            debug!("Writing GDB command: {}", line.trim_end());
            if let Err(e) = stdin.write_all(line.as_bytes()).await {
                self.pending.lock().expect("pending map lock").remove(&token);
                warn!("failed to write to gdb: {}", e);
                return Err(AppError::Disconnected);
            }
            if stdin.flush().await.is_err() {
                self.pending.lock().expect("pending map lock").remove(&token);
                return Err(AppError::Disconnected);
            }
        }

        match response.await {
            Ok(result) => result,
            Err(_) => Err(AppError::Disconnected),
        }
    }

    /// Send one MI command and return the result tree.
    pub async fn send_command(&self, command: &MiCommand) -> AppResult<Value> {
        Ok(self.send_command_record(command).await?.results)
    }

    /// Send several commands in order; the first failure aborts the rest.
    pub async fn send_commands(&self, commands: &[MiCommand]) -> AppResult<()> {
        for command in commands {
            self.send_command(command).await?;
        }
        Ok(())
    }

    /// Interrupt the target. With async MI this is `-exec-interrupt`;
    /// a synchronous gdb only reacts to SIGINT.
    pub async fn pause(&self, thread_id: Option<i64>) -> AppResult<()> {
        if !self.is_running() {
            return Err(AppError::Protocol(
                "cannot interrupt: target is not running".to_string(),
            ));
        }
        if self.async_mode() {
            self.send_command(&MiCommand::exec_interrupt(thread_id))
                .await?;
            Ok(())
        } else {
            self.interrupt_execution()
        }
    }

    #[cfg(unix)]
    fn interrupt_execution(&self) -> AppResult<()> {
        use nix::sys::signal;
        use nix::unistd::Pid;
        let pid = self
            .pid
            .ok_or_else(|| AppError::Protocol("gdb pid unknown".to_string()))?;
        signal::kill(Pid::from_raw(pid as i32), signal::Signal::SIGINT)
            .map_err(|e| AppError::Protocol(format!("failed to signal gdb: {}", e)))
    }

    #[cfg(not(unix))]
    fn interrupt_execution(&self) -> AppResult<()> {
        Err(AppError::Protocol(
            "interrupting a synchronous gdb is not supported on this platform".to_string(),
        ))
    }

    /// Best-effort shutdown: ask gdb to exit, then make sure the process is
    /// gone.
    pub async fn shutdown(&self) {
        let _ = self.send_command(&MiCommand::gdb_exit()).await;
        let mut process = self.process.lock().await;
        let _ = process.kill().await;
    }
}

/// Reader task: drive the record buffer from gdb stdout, resolve result
/// records against the pending map, publish everything else as events.
async fn process_output<T: tokio::io::AsyncRead + Unpin>(
    mut stdout: T,
    pending: PendingMap,
    events: Sender<MiEvent>,
    is_running: Arc<AtomicBool>,
    disconnected: Arc<AtomicBool>,
) {
    let mut buffer = RecordBuffer::new();
    let mut chunk = [0u8; 4096];
    loop {
        match stdout.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                for record in buffer.feed(&chunk[..n]) {
                    match record {
                        Output::Result(record) => {
                            dispatch_result(&pending, record, &is_running);
                        }
                        Output::OutOfBand(record) => {
                            if let OutOfBandRecord::AsyncRecord {
                                kind: AsyncKind::Exec,
                                class,
                                ..
                            } = &record
                            {
                                match class {
                                    AsyncClass::Running => {
                                        is_running.store(true, Ordering::SeqCst)
                                    }
                                    AsyncClass::Stopped => {
                                        is_running.store(false, Ordering::SeqCst)
                                    }
                                    _ => {}
                                }
                            }
                            if events.send(MiEvent::OutOfBand(record)).await.is_err() {
                                return;
                            }
                        }
                        Output::Prompt => {}
                    }
                }
            }
        }
    }

    // gdb went away: fail everything still outstanding
    disconnected.store(true, Ordering::SeqCst);
    is_running.store(false, Ordering::SeqCst);
    let outstanding: Vec<_> = {
        let mut pending = pending.lock().expect("pending map lock");
        pending.drain().collect()
    };
    for (token, completion) in outstanding {
        debug!("failing outstanding command {} after gdb exit", token);
        let _ = completion.send(Err(AppError::Disconnected));
    }
    let _ = events.send(MiEvent::GdbExited).await;
}

fn dispatch_result(pending: &PendingMap, record: ResultRecord, is_running: &AtomicBool) {
    match record.class {
        ResultClass::Running => is_running.store(true, Ordering::SeqCst),
        // gdb sometimes claims to be running only to stop again without
        // telling anyone; an error result settles it
        ResultClass::Error => is_running.store(false, Ordering::SeqCst),
        _ => {}
    }
    let Some(token) = record.token else {
        debug!("untokenized result record: {:?}", record);
        return;
    };
    let completion = pending.lock().expect("pending map lock").remove(&token);
    let Some(completion) = completion else {
        warn!("result record for unknown token {}", token);
        return;
    };
    let result = match record.class {
        ResultClass::Error => Err(AppError::Mi(record.error_msg())),
        _ => Ok(record),
    };
    let _ = completion.send(result);
}

/// gdb's stderr is not MI; every line goes to the client as "stderr" output.
async fn process_stderr<T: tokio::io::AsyncRead + Unpin>(stderr: T, events: Sender<MiEvent>) {
    let mut reader = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = reader.next_line().await {
        if events.send(MiEvent::Stderr(line)).await.is_err() {
            return;
        }
    }
}

/// Probe `gdb --version`; the version is on the first line.
async fn fetch_gdb_version(gdb_path: &str) -> AppResult<String> {
    let output = Command::new(gdb_path)
        .arg("--version")
        .output()
        .await
        .map_err(|e| AppError::Spawn(format!("{}: {}", gdb_path, e)))?;
    if !output.status.success() {
        return Err(AppError::Spawn(format!(
            "{} --version exited with {}",
            gdb_path, output.status
        )));
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    parse_gdb_version_line(&stdout).ok_or_else(|| {
        AppError::Spawn(format!("could not parse gdb version from {}", gdb_path))
    })
}

fn parse_gdb_version_line(output: &str) -> Option<String> {
    let version_pattern =
        regex::Regex::new(r"\b(\d+(?:\.\d+)+)\b").expect("version pattern compiles");
    let first_line = output.lines().next()?;
    Some(version_pattern.captures(first_line)?[1].to_string())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_gdb_version_line() {
        assert_eq!(
            parse_gdb_version_line("GNU gdb (GDB) 12.1\nmore text\n").as_deref(),
            Some("12.1")
        );
        assert_eq!(
            parse_gdb_version_line("GNU gdb (Ubuntu 9.2-0ubuntu1~20.04) 9.2\n").as_deref(),
            Some("9.2")
        );
        assert_eq!(parse_gdb_version_line("nonsense\n"), None);
    }

    #[tokio::test]
    async fn test_dispatch_result_routes_tokens() {
        let pending: PendingMap = Arc::new(StdMutex::new(HashMap::new()));
        let is_running = AtomicBool::new(false);

        let (tx0, rx0) = oneshot::channel();
        let (tx1, rx1) = oneshot::channel();
        pending.lock().unwrap().insert(0, tx0);
        pending.lock().unwrap().insert(1, tx1);

        let error = match Output::parse("1^error,msg=\"bad\"\n").unwrap() {
            Output::Result(record) => record,
            _ => panic!("expected result record"),
        };
        dispatch_result(&pending, error, &is_running);

        // token 1 failed with its message, token 0 is untouched
        match rx1.await.unwrap() {
            Err(AppError::Mi(msg)) => assert_eq!(msg, "bad"),
            other => panic!("expected Mi error, got {:?}", other),
        }
        assert!(pending.lock().unwrap().contains_key(&0));

        let done = match Output::parse("0^done,value=\"1\"\n").unwrap() {
            Output::Result(record) => record,
            _ => panic!("expected result record"),
        };
        dispatch_result(&pending, done, &is_running);
        let record = rx0.await.unwrap().unwrap();
        assert_eq!(record.results["value"], "1");
    }
}
