//! Snapshot Supervisor
//!
//! Owns at most one external capture process per camera. Processes are
//! spawned with `kill_on_drop` so a dropped job never outlives the bridge.

use std::collections::HashMap;
use std::process::Stdio;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// How often a waiting capture checks its process
const WAIT_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("[{uri}] Failed to spawn capture: {source}")]
    Spawn {
        uri: String,
        #[source]
        source: std::io::Error,
    },

    #[error("[{uri}] Snapshot timed out after {secs}s")]
    Timeout { uri: String, secs: u64 },

    #[error("[{uri}] Capture exited with {code:?}")]
    Failed { uri: String, code: Option<i32> },

    #[error("[{uri}] Capture was cancelled")]
    Cancelled { uri: String },

    #[error("[{uri}] Failed to poll capture: {source}")]
    Io {
        uri: String,
        #[source]
        source: std::io::Error,
    },
}

/// External program that captures one still frame.
///
/// `{uri}` in any argument is replaced with the camera name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl SnapshotCommand {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    fn command(&self, uri: &str) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(self.args.iter().map(|arg| arg.replace("{uri}", uri)))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .kill_on_drop(true);
        cmd
    }
}

struct Job {
    child: Child,
    /// A caller is blocked on this job's result
    awaited: bool,
}

/// Per-camera capture processes
pub struct SnapshotSupervisor {
    command: SnapshotCommand,
    timeout: Duration,
    jobs: Mutex<HashMap<String, Job>>,
}

impl SnapshotSupervisor {
    pub fn new(command: SnapshotCommand, timeout: Duration) -> Self {
        Self {
            command,
            timeout,
            jobs: Mutex::new(HashMap::new()),
        }
    }

    /// Start a capture unless one is still running; true if a process was spawned
    pub async fn spawn_if_idle(&self, uri: &str) -> Result<bool, SnapshotError> {
        let mut jobs = self.jobs.lock().await;
        self.start_locked(&mut jobs, uri)
    }

    fn start_locked(&self, jobs: &mut HashMap<String, Job>, uri: &str) -> Result<bool, SnapshotError> {
        if let Some(job) = jobs.get_mut(uri) {
            match job.child.try_wait() {
                Ok(None) => return Ok(false),
                Ok(Some(_)) | Err(_) => {
                    jobs.remove(uri);
                }
            }
        }

        let child = self
            .command
            .command(uri)
            .spawn()
            .map_err(|source| SnapshotError::Spawn {
                uri: uri.to_string(),
                source,
            })?;
        debug!("[{}] Capture started (pid {:?})", uri, child.id());
        jobs.insert(
            uri.to_string(),
            Job {
                child,
                awaited: false,
            },
        );
        Ok(true)
    }

    /// Replace a stale background capture with a fresh one.
    ///
    /// A capture someone is waiting on is left alone.
    pub async fn restart(&self, uri: &str) -> Result<bool, SnapshotError> {
        let mut jobs = self.jobs.lock().await;
        if jobs.get(uri).is_some_and(|job| !job.awaited) {
            if let Some(job) = jobs.remove(uri) {
                reap(uri, job).await;
            }
        }
        self.start_locked(&mut jobs, uri)
    }

    /// Start or reuse the capture for `uri` and mark it awaited in one step,
    /// so `restart` and `reap_finished` leave it to the caller.
    async fn claim(&self, uri: &str) -> Result<(), SnapshotError> {
        let mut jobs = self.jobs.lock().await;
        self.start_locked(&mut jobs, uri)?;
        if let Some(job) = jobs.get_mut(uri) {
            job.awaited = true;
        }
        Ok(())
    }

    /// Capture and wait for the result, killing the process on timeout
    pub async fn capture(&self, uri: &str) -> Result<(), SnapshotError> {
        self.claim(uri).await?;
        let deadline = Instant::now() + self.timeout;

        loop {
            {
                let mut jobs = self.jobs.lock().await;
                let job = jobs.get_mut(uri).ok_or_else(|| SnapshotError::Cancelled {
                    uri: uri.to_string(),
                })?;

                match job.child.try_wait() {
                    Ok(Some(status)) => {
                        jobs.remove(uri);
                        return if status.success() {
                            Ok(())
                        } else {
                            Err(SnapshotError::Failed {
                                uri: uri.to_string(),
                                code: status.code(),
                            })
                        };
                    }
                    Ok(None) if Instant::now() >= deadline => {
                        if let Some(job) = jobs.remove(uri) {
                            reap(uri, job).await;
                        }
                        return Err(SnapshotError::Timeout {
                            uri: uri.to_string(),
                            secs: self.timeout.as_secs(),
                        });
                    }
                    Ok(None) => {}
                    Err(source) => {
                        if let Some(job) = jobs.remove(uri) {
                            reap(uri, job).await;
                        }
                        return Err(SnapshotError::Io {
                            uri: uri.to_string(),
                            source,
                        });
                    }
                }
            }
            tokio::time::sleep(WAIT_POLL).await;
        }
    }

    /// Remove finished background captures, returning each with its success
    pub async fn reap_finished(&self) -> Vec<(String, bool)> {
        let mut jobs = self.jobs.lock().await;
        let mut finished = Vec::new();

        for (uri, job) in jobs.iter_mut() {
            if job.awaited {
                continue;
            }
            match job.child.try_wait() {
                Ok(Some(status)) => finished.push((uri.clone(), status.success())),
                Ok(None) => {}
                Err(e) => {
                    warn!("[{}] Failed to poll capture: {}", uri, e);
                    finished.push((uri.clone(), false));
                }
            }
        }
        for (uri, _) in &finished {
            jobs.remove(uri);
        }
        finished
    }

    /// Number of tracked captures
    pub async fn in_flight(&self) -> usize {
        self.jobs.lock().await.len()
    }

    /// Kill every capture
    pub async fn kill_all(&self) {
        let jobs: Vec<(String, Job)> = self.jobs.lock().await.drain().collect();
        if !jobs.is_empty() {
            info!("Stopping {} snapshot capture(s)", jobs.len());
        }
        for (uri, job) in jobs {
            reap(&uri, job).await;
        }
    }
}

async fn reap(uri: &str, mut job: Job) {
    match job.child.try_wait() {
        Ok(Some(_)) => {}
        _ => {
            if let Err(e) = job.child.kill().await {
                warn!("[{}] Failed to kill capture: {}", uri, e);
            }
        }
    }
}
