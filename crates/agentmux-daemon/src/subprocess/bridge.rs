//! Process bridge: one spawned agent process exposed as event streams.
//!
//! stdout and stderr are read as raw chunks by two reader tasks feeding one
//! queue, so both appear on a single merged output stream. A supervisor task
//! owns the `Child`, waits for it (or kills it on request) and emits the exit
//! event once the readers have drained.

use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::observers::Observers;

/// Exit code reported when the real one is unknown (signal, wait failure).
pub const UNKNOWN_EXIT_CODE: i32 = 1;

/// How long the exit event waits for output readers after the process exits.
const READER_DRAIN_GRACE: Duration = Duration::from_millis(500);

const READ_BUFFER_SIZE: usize = 8 * 1024;

/// Optional terminal geometry capability of a process transport.
pub trait TerminalResize: Send + Sync {
    fn resize(&self, cols: u16, rows: u16) -> io::Result<()>;
}

/// What to spawn.
#[derive(Debug, Clone)]
pub struct ProcessCommand {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    /// Grace period between SIGINT and a forced kill.
    pub terminate_timeout: Duration,
}

impl ProcessCommand {
    pub fn new(program: impl Into<String>, args: Vec<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args,
            cwd: cwd.into(),
            terminate_timeout: Duration::from_secs(5),
        }
    }

    #[must_use]
    pub const fn with_terminate_timeout(mut self, timeout: Duration) -> Self {
        self.terminate_timeout = timeout;
        self
    }
}

/// Errors starting a process.
#[derive(Debug, thiserror::Error)]
pub enum SpawnError {
    #[error("Executable not found: {program}: {source}")]
    NotFound {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to spawn {program}: {source}")]
    Failed {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("Working directory is not a directory: {}", cwd.display())]
    InvalidCwd { cwd: PathBuf },

    #[error("Spawned process has no {0} pipe")]
    MissingPipe(&'static str),
}

impl SpawnError {
    fn from_io(program: &str, source: io::Error) -> Self {
        let program = program.to_string();
        if source.kind() == io::ErrorKind::NotFound {
            Self::NotFound { program, source }
        } else {
            Self::Failed { program, source }
        }
    }
}

enum BridgeEvent {
    Output(Bytes),
    Exit(i32),
}

/// Owns exactly one spawned process.
///
/// Events are queued from the moment of spawn and delivered to observers once
/// [`start`](Self::start) is called, so handlers registered in between see
/// every chunk. Dropping the bridge terminates the process.
pub struct ProcessBridge {
    pid: Option<u32>,
    stdin_tx: mpsc::UnboundedSender<Bytes>,
    kill_tx: watch::Sender<bool>,
    output: Arc<Observers<Bytes>>,
    exit: Arc<Observers<i32>>,
    pending: Mutex<Option<mpsc::UnboundedReceiver<BridgeEvent>>>,
    resizer: Option<Box<dyn TerminalResize>>,
}

impl std::fmt::Debug for ProcessBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessBridge")
            .field("pid", &self.pid)
            .field("exited", &self.has_exited())
            .finish_non_exhaustive()
    }
}

impl ProcessBridge {
    /// Spawn `command` with piped stdio. Must be called inside a Tokio runtime.
    pub fn spawn(command: &ProcessCommand) -> Result<Self, SpawnError> {
        // ENOENT from exec cannot tell a missing cwd from a missing binary.
        if !command.cwd.is_dir() {
            return Err(SpawnError::InvalidCwd {
                cwd: command.cwd.clone(),
            });
        }

        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .current_dir(&command.cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| SpawnError::from_io(&command.program, e))?;
        let pid = child.id();

        let stdin = child.stdin.take().ok_or(SpawnError::MissingPipe("stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or(SpawnError::MissingPipe("stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or(SpawnError::MissingPipe("stderr"))?;

        info!(
            program = %command.program,
            args = ?command.args,
            cwd = %command.cwd.display(),
            pid,
            "Spawned process"
        );

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let readers = [
            tokio::spawn(read_output(stdout, event_tx.clone(), pid, "stdout")),
            tokio::spawn(read_output(stderr, event_tx.clone(), pid, "stderr")),
        ];

        let (stdin_tx, stdin_rx) = mpsc::unbounded_channel();
        tokio::spawn(write_input(stdin, stdin_rx, pid));

        let (kill_tx, kill_rx) = watch::channel(false);
        tokio::spawn(supervise(
            child,
            kill_rx,
            readers,
            event_tx,
            command.terminate_timeout,
        ));

        Ok(Self {
            pid,
            stdin_tx,
            kill_tx,
            output: Arc::new(Observers::new()),
            exit: Arc::new(Observers::new()),
            pending: Mutex::new(Some(event_rx)),
            resizer: None,
        })
    }

    /// Register a handler for every output chunk (stdout and stderr).
    pub fn on_output(&self, handler: impl Fn(&Bytes) + Send + Sync + 'static) {
        self.output.register(handler);
    }

    /// Register a handler for the exit code. Called exactly once.
    pub fn on_exit(&self, handler: impl Fn(&i32) + Send + Sync + 'static) {
        self.exit.register(handler);
    }

    /// Begin delivering queued and future events. Later calls are no-ops.
    pub fn start(&self) {
        let taken = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(mut events) = taken else {
            return;
        };

        let output = Arc::clone(&self.output);
        let exit = Arc::clone(&self.exit);
        let pid = self.pid;
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    BridgeEvent::Output(chunk) => output.notify(&chunk),
                    BridgeEvent::Exit(code) => {
                        exit.notify_final(code);
                        return;
                    }
                }
            }
            warn!(pid, "Process event queue closed without exit status");
            exit.notify_final(UNKNOWN_EXIT_CODE);
        });
    }

    /// Queue bytes for the process's stdin. Ignored once the process is gone.
    pub fn write(&self, data: impl Into<Bytes>) {
        if self.stdin_tx.send(data.into()).is_err() {
            debug!(pid = self.pid, "Dropping input for exited process");
        }
    }

    /// Resize the terminal window, if the transport has one.
    ///
    /// Returns `false` without error when the transport has no geometry.
    pub fn resize(&self, cols: u16, rows: u16) -> bool {
        let Some(resizer) = &self.resizer else {
            return false;
        };
        match resizer.resize(cols, rows) {
            Ok(()) => true,
            Err(e) => {
                warn!(pid = self.pid, error = %e, "Terminal resize failed");
                false
            }
        }
    }

    /// Attach a terminal geometry capability.
    pub fn set_resizer(&mut self, resizer: Box<dyn TerminalResize>) {
        self.resizer = Some(resizer);
    }

    /// Terminate the process if it is still running. Idempotent.
    pub fn kill(&self) {
        // Fails only when the supervisor has already finished.
        let _ = self.kill_tx.send(true);
    }

    pub const fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Whether the exit event has been delivered.
    pub fn has_exited(&self) -> bool {
        self.exit.is_latched()
    }
}

async fn read_output<R>(
    mut reader: R,
    events: mpsc::UnboundedSender<BridgeEvent>,
    pid: Option<u32>,
    stream: &'static str,
) where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let chunk = Bytes::copy_from_slice(&buf[..n]);
                if events.send(BridgeEvent::Output(chunk)).is_err() {
                    break;
                }
            }
            Err(e) => {
                warn!(pid, stream, error = %e, "Output read failed");
                break;
            }
        }
    }
    debug!(pid, stream, "Output reader finished");
}

async fn write_input(
    mut stdin: ChildStdin,
    mut input: mpsc::UnboundedReceiver<Bytes>,
    pid: Option<u32>,
) {
    while let Some(data) = input.recv().await {
        if let Err(e) = stdin.write_all(&data).await {
            debug!(pid, error = %e, "Failed to write to stdin");
            break;
        }
        if let Err(e) = stdin.flush().await {
            debug!(pid, error = %e, "Failed to flush stdin");
            break;
        }
    }
}

async fn supervise(
    mut child: Child,
    mut kill_rx: watch::Receiver<bool>,
    mut readers: [JoinHandle<()>; 2],
    events: mpsc::UnboundedSender<BridgeEvent>,
    terminate_timeout: Duration,
) {
    let pid = child.id();
    let status = tokio::select! {
        status = child.wait() => status,
        // A dropped sender means the bridge is gone; treat it as a kill.
        () = kill_requested(&mut kill_rx) => terminate(&mut child, terminate_timeout).await,
    };

    let code = match status {
        Ok(status) => status.code().unwrap_or(UNKNOWN_EXIT_CODE),
        Err(e) => {
            error!(pid, error = %e, "Failed to wait for process");
            UNKNOWN_EXIT_CODE
        }
    };

    let drain = async {
        for reader in &mut readers {
            let _ = reader.await;
        }
    };
    if tokio::time::timeout(READER_DRAIN_GRACE, drain).await.is_err() {
        debug!(pid, "Output still open after exit, detaching readers");
        for reader in &readers {
            reader.abort();
        }
    }

    info!(pid, code, "Process exited");
    let _ = events.send(BridgeEvent::Exit(code));
}

async fn kill_requested(kill_rx: &mut watch::Receiver<bool>) {
    let _ = kill_rx.wait_for(|kill| *kill).await;
}

/// SIGINT first, then a forced kill after `timeout`.
async fn terminate(child: &mut Child, timeout: Duration) -> io::Result<std::process::ExitStatus> {
    let pid = child.id();
    #[cfg(unix)]
    {
        if let Some(pid) = pid {
            // SAFETY: pid belongs to our own un-reaped Child, so it cannot have
            // been recycled; kill(2) with SIGINT has no memory-safety impact.
            #[allow(unsafe_code)]
            #[allow(clippy::cast_possible_wrap)]
            let ret = unsafe { libc::kill(pid as i32, libc::SIGINT) };
            if ret != 0 {
                let err = io::Error::last_os_error();
                debug!(pid, error = %err, "Failed to send SIGINT");
            }
        }
    }

    match tokio::time::timeout(timeout, child.wait()).await {
        Ok(status) => status,
        Err(_) => {
            warn!(pid, "Timeout waiting for graceful shutdown, killing");
            child.kill().await?;
            child.wait().await
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::oneshot;

    fn sh(script: &str) -> ProcessCommand {
        ProcessCommand::new("sh", vec!["-c".into(), script.into()], std::env::temp_dir())
            .with_terminate_timeout(Duration::from_secs(1))
    }

    fn collect_until_exit(bridge: &ProcessBridge) -> mpsc::UnboundedReceiver<Result<Bytes, i32>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let out = tx.clone();
        bridge.on_output(move |chunk| {
            let _ = out.send(Ok(chunk.clone()));
        });
        bridge.on_exit(move |code| {
            let _ = tx.send(Err(*code));
        });
        rx
    }

    async fn drain(mut rx: mpsc::UnboundedReceiver<Result<Bytes, i32>>) -> (String, i32) {
        let mut output = Vec::new();
        let code = tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                match rx.recv().await.expect("bridge dropped events") {
                    Ok(chunk) => output.extend_from_slice(&chunk),
                    Err(code) => return code,
                }
            }
        })
        .await
        .expect("process did not exit");
        (String::from_utf8_lossy(&output).into_owned(), code)
    }

    #[tokio::test]
    async fn emits_output_then_exit() {
        let bridge = ProcessBridge::spawn(&ProcessCommand::new(
            "echo",
            vec!["hello".into()],
            std::env::temp_dir(),
        ))
        .unwrap();
        let rx = collect_until_exit(&bridge);
        bridge.start();

        let (output, code) = drain(rx).await;
        assert_eq!(output, "hello\n");
        assert_eq!(code, 0);
        assert!(bridge.has_exited());
    }

    #[tokio::test]
    async fn merges_stderr_into_output() {
        let bridge = ProcessBridge::spawn(&sh("echo out; echo err >&2; exit 3")).unwrap();
        let rx = collect_until_exit(&bridge);
        bridge.start();

        let (output, code) = drain(rx).await;
        assert!(output.contains("out\n"));
        assert!(output.contains("err\n"));
        assert_eq!(code, 3);
    }

    #[tokio::test]
    async fn forwards_input_to_stdin() {
        let bridge = ProcessBridge::spawn(&ProcessCommand::new(
            "cat",
            Vec::new(),
            std::env::temp_dir(),
        ))
        .unwrap();
        let (tx, rx) = oneshot::channel();
        let tx = Mutex::new(Some(tx));
        let seen = Arc::new(Mutex::new(String::new()));
        let seen_handler = Arc::clone(&seen);
        bridge.on_output(move |chunk| {
            let mut seen = seen_handler.lock().unwrap();
            seen.push_str(&String::from_utf8_lossy(chunk));
            if seen.contains("test-input")
                && let Some(tx) = tx.lock().unwrap().take()
            {
                let _ = tx.send(());
            }
        });
        bridge.start();
        bridge.write("test-input\n");

        tokio::time::timeout(Duration::from_secs(10), rx)
            .await
            .unwrap()
            .unwrap();
        bridge.kill();
    }

    #[tokio::test]
    async fn every_output_handler_sees_every_chunk() {
        let bridge = ProcessBridge::spawn(&sh("printf abc")).unwrap();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        for counter in [&first, &second] {
            let counter = Arc::clone(counter);
            bridge.on_output(move |chunk| {
                counter.fetch_add(chunk.len(), Ordering::SeqCst);
            });
        }
        let rx = collect_until_exit(&bridge);
        bridge.start();
        drain(rx).await;

        assert_eq!(first.load(Ordering::SeqCst), 3);
        assert_eq!(second.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn kill_is_idempotent_and_reports_exit_once() {
        let bridge = ProcessBridge::spawn(&sh("sleep 30")).unwrap();
        let exits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&exits);
        bridge.on_exit(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let rx = collect_until_exit(&bridge);
        bridge.start();

        bridge.kill();
        bridge.kill();
        let (_, code) = drain(rx).await;
        bridge.kill();

        assert_ne!(code, 0);
        assert_eq!(exits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn late_exit_handler_receives_code() {
        let bridge = ProcessBridge::spawn(&sh("exit 0")).unwrap();
        let rx = collect_until_exit(&bridge);
        bridge.start();
        drain(rx).await;

        let (tx, late) = oneshot::channel();
        let tx = Mutex::new(Some(tx));
        bridge.on_exit(move |code| {
            if let Some(tx) = tx.lock().unwrap().take() {
                let _ = tx.send(*code);
            }
        });
        assert_eq!(late.await.unwrap(), 0);
    }

    #[tokio::test]
    async fn write_after_exit_does_not_fail() {
        let bridge = ProcessBridge::spawn(&sh("exit 0")).unwrap();
        let rx = collect_until_exit(&bridge);
        bridge.start();
        drain(rx).await;
        bridge.write("ignored\n");
    }

    #[tokio::test]
    async fn missing_executable_is_not_found() {
        let result = ProcessBridge::spawn(&ProcessCommand::new(
            "/nonexistent/agentmux-agent",
            Vec::new(),
            std::env::temp_dir(),
        ));
        let err = result.unwrap_err();
        assert!(matches!(err, SpawnError::NotFound { .. }));
        assert!(
            err.to_string()
                .starts_with("Executable not found: /nonexistent/agentmux-agent: "),
            "{err}"
        );
    }

    #[tokio::test]
    async fn missing_working_directory_is_reported_as_such() {
        let result = ProcessBridge::spawn(&ProcessCommand::new(
            "sh",
            Vec::new(),
            "/nonexistent/agentmux-cwd",
        ));
        let err = result.unwrap_err();
        assert!(
            matches!(&err, SpawnError::InvalidCwd { cwd } if cwd == Path::new("/nonexistent/agentmux-cwd"))
        );
        assert_eq!(
            err.to_string(),
            "Working directory is not a directory: /nonexistent/agentmux-cwd"
        );
    }

    #[tokio::test]
    async fn resize_without_terminal_is_a_no_op() {
        let mut bridge = ProcessBridge::spawn(&sh("sleep 30")).unwrap();
        assert!(!bridge.resize(120, 40));

        struct Recording(Arc<Mutex<Vec<(u16, u16)>>>);
        impl TerminalResize for Recording {
            fn resize(&self, cols: u16, rows: u16) -> io::Result<()> {
                self.0.lock().unwrap().push((cols, rows));
                Ok(())
            }
        }
        let sizes = Arc::new(Mutex::new(Vec::new()));
        bridge.set_resizer(Box::new(Recording(Arc::clone(&sizes))));
        assert!(bridge.resize(100, 30));
        assert_eq!(*sizes.lock().unwrap(), vec![(100, 30)]);
        bridge.kill();
    }
}
