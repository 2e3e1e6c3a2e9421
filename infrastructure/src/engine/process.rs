//! Child-process execution engine.
//!
//! Runs the guest as a child process: its stdout is the shared byte channel
//! (terminal output interleaved with frames), its stdin receives keystrokes
//! and host frames.

use async_trait::async_trait;
use guestlink_application::{EngineError, EngineStatus, ExecutionEngine, OutputSink};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const READ_BUFFER: usize = 8192;
const EXIT_POLL: Duration = Duration::from_millis(50);

pub struct ProcessExecutionEngine {
    program: String,
    args: Vec<String>,
    output: std::sync::Mutex<Option<OutputSink>>,
    stdin: Mutex<Option<ChildStdin>>,
    child: Arc<Mutex<Option<Child>>>,
    status: Arc<std::sync::Mutex<EngineStatus>>,
}

impl ProcessExecutionEngine {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            output: std::sync::Mutex::new(None),
            stdin: Mutex::new(None),
            child: Arc::new(Mutex::new(None)),
            status: Arc::new(std::sync::Mutex::new(EngineStatus::Uninitialized)),
        }
    }

    /// Build from a command line: the first element is the program.
    pub fn from_command(command: &[String]) -> Result<Self, EngineError> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| EngineError::Spawn("empty command".to_string()))?;
        Ok(Self::new(program.clone(), args.to_vec()))
    }

    fn set_status(&self, status: EngineStatus) {
        *self.status.lock().unwrap_or_else(|e| e.into_inner()) = status;
    }

    fn spawn_reader(&self, mut stdout: ChildStdout, output: OutputSink) {
        let child = Arc::clone(&self.child);
        let status = Arc::clone(&self.status);

        tokio::spawn(async move {
            let mut buf = vec![0u8; READ_BUFFER];
            loop {
                match stdout.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => {
                        if output.send(buf[..n].to_vec()).is_err() {
                            debug!("Guest output receiver dropped");
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("Reading guest output failed: {}", e);
                        break;
                    }
                }
            }

            // stdout closed: the guest is exiting (or was stopped). The lock
            // is only held per poll so `stop` can always take the child.
            let exit = loop {
                match child.lock().await.as_mut().map(|c| c.try_wait()) {
                    None => break None,
                    Some(Ok(Some(code))) => break Some(code),
                    Some(Ok(None)) => {}
                    Some(Err(e)) => {
                        debug!("Waiting for guest failed: {}", e);
                        break None;
                    }
                }
                tokio::time::sleep(EXIT_POLL).await;
            };
            let mut status = status.lock().unwrap_or_else(|e| e.into_inner());
            if *status == EngineStatus::Running {
                *status = match exit {
                    Some(code) if !code.success() => {
                        warn!("Guest exited with {}", code);
                        EngineStatus::Failed
                    }
                    _ => EngineStatus::Stopped,
                };
                info!("Guest finished ({})", *status);
            }
        });
    }
}

#[async_trait]
impl ExecutionEngine for ProcessExecutionEngine {
    async fn init(&self, output: OutputSink) -> Result<(), EngineError> {
        if self.status() == EngineStatus::Running {
            return Err(EngineError::AlreadyRunning);
        }
        *self.output.lock().unwrap_or_else(|e| e.into_inner()) = Some(output);
        self.set_status(EngineStatus::Initialized);
        Ok(())
    }

    async fn start(&self) -> Result<(), EngineError> {
        match self.status() {
            EngineStatus::Uninitialized => return Err(EngineError::NotInitialized),
            EngineStatus::Running => return Err(EngineError::AlreadyRunning),
            _ => {}
        }
        // The reader task owns the only sender, so the receiver sees the end
        // of the stream once the guest exits. Restarting needs a fresh init.
        let output = self
            .output
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .ok_or(EngineError::NotInitialized)?;

        debug!("Starting guest: {} {:?}", self.program, self.args);
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        // Linux: the kernel sends SIGTERM to the guest if this process dies.
        #[cfg(target_os = "linux")]
        unsafe {
            cmd.pre_exec(|| {
                libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM);
                Ok(())
            });
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                self.set_status(EngineStatus::Failed);
                return Err(EngineError::Spawn(format!("{}: {}", self.program, e)));
            }
        };
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineError::Spawn("guest stdout not captured".to_string()))?;
        *self.stdin.lock().await = child.stdin.take();
        *self.child.lock().await = Some(child);

        self.set_status(EngineStatus::Running);
        self.spawn_reader(stdout, output);
        info!("Guest started: {}", self.program);
        Ok(())
    }

    async fn stop(&self) -> Result<(), EngineError> {
        if self.status() != EngineStatus::Running {
            return Err(EngineError::NotRunning);
        }
        self.set_status(EngineStatus::Stopped);
        // Closing stdin first lets well-behaved guests exit on their own.
        self.stdin.lock().await.take();
        if let Some(mut child) = self.child.lock().await.take() {
            let _ = child.start_kill();
            let _ = child.wait().await;
        }
        info!("Guest stopped");
        Ok(())
    }

    async fn send_input(&self, bytes: &[u8]) -> Result<(), EngineError> {
        let mut stdin = self.stdin.lock().await;
        let stdin = stdin.as_mut().ok_or(EngineError::NotRunning)?;
        stdin.write_all(bytes).await?;
        stdin.flush().await?;
        Ok(())
    }

    fn status(&self) -> EngineStatus {
        *self.status.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    async fn wait_for_status(engine: &ProcessExecutionEngine, expected: EngineStatus) {
        for _ in 0..100 {
            if engine.status() == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("engine stuck in {}", engine.status());
    }

    #[tokio::test]
    async fn guest_output_reaches_the_sink() {
        let engine = ProcessExecutionEngine::new("cat", vec![]);
        let (tx, mut rx) = mpsc::unbounded_channel();
        engine.init(tx).await.unwrap();
        engine.start().await.unwrap();
        assert_eq!(engine.status(), EngineStatus::Running);

        engine.send_input(b"ping\n").await.unwrap();
        let mut echoed = Vec::new();
        while echoed.len() < 5 {
            let chunk = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .unwrap()
                .unwrap();
            echoed.extend(chunk);
        }
        assert_eq!(echoed, b"ping\n");

        engine.stop().await.unwrap();
        assert_eq!(engine.status(), EngineStatus::Stopped);
        assert!(matches!(
            engine.send_input(b"x").await,
            Err(EngineError::NotRunning)
        ));
        let drained = tokio::time::timeout(Duration::from_secs(5), async {
            while rx.recv().await.is_some() {}
        })
        .await;
        assert!(drained.is_ok(), "output stream should end after the guest stops");
        assert!(matches!(engine.start().await, Err(EngineError::NotInitialized)));
    }

    #[tokio::test]
    async fn lifecycle_preconditions_are_enforced() {
        let engine = ProcessExecutionEngine::new("cat", vec![]);
        assert!(matches!(engine.start().await, Err(EngineError::NotInitialized)));
        assert!(matches!(engine.stop().await, Err(EngineError::NotRunning)));

        let (tx, _rx) = mpsc::unbounded_channel();
        engine.init(tx).await.unwrap();
        engine.start().await.unwrap();
        assert!(matches!(engine.start().await, Err(EngineError::AlreadyRunning)));
        engine.stop().await.unwrap();
    }

    #[tokio::test]
    async fn non_zero_exit_marks_failure() {
        let engine =
            ProcessExecutionEngine::new("sh", vec!["-c".into(), "echo bye; exit 3".into()]);
        let (tx, mut rx) = mpsc::unbounded_channel();
        engine.init(tx).await.unwrap();
        engine.start().await.unwrap();

        assert_eq!(rx.recv().await.unwrap(), b"bye\n");
        wait_for_status(&engine, EngineStatus::Failed).await;
    }

    #[tokio::test]
    async fn missing_program_fails_to_spawn() {
        let engine = ProcessExecutionEngine::new("/nonexistent/guest-binary", vec![]);
        let (tx, _rx) = mpsc::unbounded_channel();
        engine.init(tx).await.unwrap();
        assert!(matches!(engine.start().await, Err(EngineError::Spawn(_))));
        assert_eq!(engine.status(), EngineStatus::Failed);
    }

    #[tokio::test]
    async fn stop_returns_when_guest_closed_stdout_but_keeps_running() {
        let engine = ProcessExecutionEngine::new(
            "sh",
            vec!["-c".into(), "exec >&-; exec sleep 30".into()],
        );
        let (tx, mut rx) = mpsc::unbounded_channel();
        engine.init(tx).await.unwrap();
        engine.start().await.unwrap();

        // The reader sees end of output while the guest is still alive.
        assert!(
            tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .unwrap()
                .is_none()
        );
        tokio::time::sleep(EXIT_POLL * 2).await;

        tokio::time::timeout(Duration::from_secs(5), engine.stop())
            .await
            .expect("stop blocked behind the exit watcher")
            .unwrap();
        assert_eq!(engine.status(), EngineStatus::Stopped);
    }

    #[test]
    fn empty_command_is_rejected() {
        assert!(ProcessExecutionEngine::from_command(&[]).is_err());
    }
}
