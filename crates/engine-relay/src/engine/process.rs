//! A single running engine subprocess.
//!
//! Launching wires four tasks around the child: a writer draining request lines into stdin,
//! a stdout pump feeding the correlator, a stderr pump feeding the metadata record, and an
//! exit watcher that owns the `Child` and resolves with its exit status.

use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::correlator::RequestCorrelator;
use super::definition::EngineDefinition;
use super::metadata::{self, EngineMetadata};

/// How a process ended. Both fields are `None` if the status could not be collected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExitInfo {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl From<ExitStatus> for ExitInfo {
    fn from(status: ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
        }
    }
}

pub struct EngineProcess {
    name: String,
    generation: u64,
    pid: Option<u32>,
    started_at: DateTime<Utc>,
    correlator: Arc<RequestCorrelator>,
    exited: Arc<AtomicBool>,
    kill_switch: Mutex<Option<oneshot::Sender<()>>>,
}

pub(crate) struct Launched {
    pub process: Arc<EngineProcess>,
    pub exit: JoinHandle<ExitInfo>,
}

impl EngineProcess {
    /// Start `executable` in analysis mode for `definition`.
    ///
    /// Fails only if the OS refuses to start the process or a pipe was not captured.
    pub(crate) fn launch(
        definition: &EngineDefinition,
        executable: &Path,
        generation: u64,
        metadata: Arc<RwLock<EngineMetadata>>,
    ) -> std::io::Result<Launched> {
        let mut child = Command::new(executable)
            .args(definition.analysis_args())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;
        let pid = child.id();

        let stdin = child.stdin.take().ok_or_else(|| missing_pipe("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing_pipe("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| missing_pipe("stderr"))?;

        let name = definition.name.clone();
        let (line_tx, line_rx) = mpsc::unbounded_channel::<String>();
        let correlator = Arc::new(RequestCorrelator::new(&name, line_tx));

        let writer = tokio::spawn(write_lines(name.clone(), stdin, line_rx));

        let replies = {
            let correlator = correlator.clone();
            tokio::spawn(async move {
                pump_lines(stdout, |line| {
                    correlator.dispatch_line(line);
                })
                .await
            })
        };

        let diagnostics = {
            let name = name.clone();
            tokio::spawn(async move {
                pump_lines(stderr, |line| record_diagnostic(&name, line, &metadata)).await
            })
        };

        let exited = Arc::new(AtomicBool::new(false));
        let (kill_tx, kill_rx) = oneshot::channel();
        let exit = tokio::spawn(wait_for_exit(
            name.clone(),
            child,
            kill_rx,
            exited.clone(),
            correlator.clone(),
            vec![replies, diagnostics, writer],
        ));

        let process = Arc::new(EngineProcess {
            pid,
            name,
            generation,
            started_at: Utc::now(),
            correlator,
            exited,
            kill_switch: Mutex::new(Some(kill_tx)),
        });

        Ok(Launched { process, exit })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn correlator(&self) -> &Arc<RequestCorrelator> {
        &self.correlator
    }

    pub fn is_alive(&self) -> bool {
        !self.exited.load(Ordering::Acquire)
    }

    /// Ask the exit watcher to kill the child. Idempotent.
    pub fn kill(&self) {
        let switch = match self.kill_switch.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(switch) = switch {
            debug!("[{}] kill requested (generation {})", self.name, self.generation);
            let _ = switch.send(());
        }
    }
}

fn missing_pipe(which: &str) -> std::io::Error {
    std::io::Error::new(
        std::io::ErrorKind::BrokenPipe,
        format!("{} was not captured", which),
    )
}

fn record_diagnostic(name: &str, line: &str, metadata: &RwLock<EngineMetadata>) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }

    debug!("[{}] {}", name, line);
    if let Some(update) = metadata::parse_line(line) {
        info!("[{}] meta: {:?}", name, update);
        if let Ok(mut meta) = metadata.write() {
            meta.merge(update);
        }
    }
}

/// Feed each newline-terminated chunk of `reader` to `on_line` until EOF or a read error.
async fn pump_lines<R, F>(reader: R, mut on_line: F)
where
    R: AsyncRead + Unpin,
    F: FnMut(&str),
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::with_capacity(1024);
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                on_line(line.trim_end_matches(|c: char| c == '\n' || c == '\r'));
            }
            Err(e) => {
                debug!("pipe read error: {}", e);
                break;
            }
        }
    }
}

async fn write_lines(
    name: String,
    mut stdin: ChildStdin,
    mut lines: mpsc::UnboundedReceiver<String>,
) {
    while let Some(line) = lines.recv().await {
        if let Err(e) = stdin.write_all(line.as_bytes()).await {
            warn!("[{}] stdin write failed: {}", name, e);
            break;
        }
        if let Err(e) = stdin.flush().await {
            warn!("[{}] stdin flush failed: {}", name, e);
            break;
        }
    }
}

async fn wait_for_exit(
    name: String,
    mut child: Child,
    kill: oneshot::Receiver<()>,
    exited: Arc<AtomicBool>,
    correlator: Arc<RequestCorrelator>,
    pumps: Vec<JoinHandle<()>>,
) -> ExitInfo {
    let status = tokio::select! {
        status = child.wait() => status,
        _ = kill => {
            if let Err(e) = child.start_kill() {
                warn!("[{}] kill failed: {}", name, e);
            }
            child.wait().await
        }
    };

    exited.store(true, Ordering::Release);
    for pump in pumps {
        pump.abort();
    }
    correlator.fail_all();

    match status {
        Ok(status) => ExitInfo::from(status),
        Err(e) => {
            warn!("[{}] could not collect exit status: {}", name, e);
            ExitInfo::default()
        }
    }
}
