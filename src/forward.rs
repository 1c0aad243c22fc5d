use crate::error::CoreError;
use std::collections::HashMap;
use std::process::{ExitStatus, Stdio};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command as TokioCommand};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// Reported by a waiter task when its supervised process ends, whether the
/// process exited on its own, was killed by an explicit stop, or tripped
/// the stderr error pattern.
#[derive(Debug)]
pub struct ForwardExitEvent {
    pub pid: u32,
    pub result: Result<ExitStatus, String>,
}

struct TrackedForward {
    kill_tx: oneshot::Sender<()>,
}

/// Single authority over locally spawned `kubectl port-forward` processes.
///
/// The supervisor owns the pid-to-handle map; every spawned child is handed
/// to a waiter task that reports exit back over the event channel, and the
/// event loop feeds those reports into `handle_exit`. Start, stop, and exit
/// handling all run on the event-loop thread, so the map has exactly one
/// writer. Removal of an already-absent pid is a no-op on every path.
pub struct ForwardSupervisor {
    kubectl_bin: String,
    events_tx: mpsc::UnboundedSender<ForwardExitEvent>,
    processes: HashMap<u32, TrackedForward>,
}

impl ForwardSupervisor {
    pub fn new(kubectl_bin: impl Into<String>, events_tx: mpsc::UnboundedSender<ForwardExitEvent>) -> Self {
        Self {
            kubectl_bin: kubectl_bin.into(),
            events_tx,
            processes: HashMap::new(),
        }
    }

    /// Spawns a tunnel process for the given pod and port pair and tracks
    /// it under its pid. Duplicate detection by logical key happens one
    /// layer up, against the state store; the supervisor is keyed by pid.
    pub fn start(
        &mut self,
        context: &str,
        namespace: &str,
        pod: &str,
        local_port: u16,
        remote_port: u16,
    ) -> Result<u32, CoreError> {
        let child = TokioCommand::new(&self.kubectl_bin)
            .arg("--context")
            .arg(context)
            .arg("port-forward")
            .arg("-n")
            .arg(namespace)
            .arg(format!("pod/{pod}"))
            .arg(format!("{local_port}:{remote_port}"))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|error| CoreError::Launch {
                namespace: namespace.to_string(),
                pod: pod.to_string(),
                detail: error.to_string(),
            })?;

        self.track(child, namespace, pod)
    }

    fn track(&mut self, mut child: Child, namespace: &str, pod: &str) -> Result<u32, CoreError> {
        let Some(pid) = child.id() else {
            return Err(CoreError::Launch {
                namespace: namespace.to_string(),
                pod: pod.to_string(),
                detail: "process exited before a pid could be read".to_string(),
            });
        };

        let stderr = child.stderr.take();
        let (kill_tx, kill_rx) = oneshot::channel();
        let events_tx = self.events_tx.clone();
        tokio::spawn(async move {
            let result = supervise(child, stderr, kill_rx).await;
            let _ = events_tx.send(ForwardExitEvent { pid, result });
        });

        self.processes.insert(pid, TrackedForward { kill_tx });
        debug!("tracking port-forward pid={pid}");
        Ok(pid)
    }

    /// Stops a tunnel by pid. A tracked process is signalled through its
    /// waiter task; an untracked pid gets a best-effort OS-level kill.
    /// Either way the call reports success: the desired end state, no
    /// running tunnel, is already achieved when the process is gone.
    pub async fn stop(&mut self, pid: u32) {
        if let Some(entry) = self.processes.remove(&pid) {
            let _ = entry.kill_tx.send(());
            return;
        }

        debug!("stop requested for untracked pid={pid}, attempting os-level kill");
        let outcome = TokioCommand::new("kill")
            .arg(pid.to_string())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        if let Err(error) = outcome {
            debug!("os-level kill for pid={pid} could not run: {error}");
        }
    }

    /// Removes a pid whose process ended on its own. Called by the event
    /// loop for every `ForwardExitEvent`, including ones for processes an
    /// explicit stop already removed.
    pub fn handle_exit(&mut self, pid: u32) -> bool {
        self.processes.remove(&pid).is_some()
    }

    /// Snapshot of tracked processes. A pid is alive until its waiter task
    /// has finished, observed through the closed half of the kill channel.
    pub fn list_active(&self) -> Vec<(u32, bool)> {
        let mut entries: Vec<(u32, bool)> = self
            .processes
            .iter()
            .map(|(pid, entry)| (*pid, !entry.kill_tx.is_closed()))
            .collect();
        entries.sort_unstable_by_key(|(pid, _)| *pid);
        entries
    }

    /// Terminates every tracked process and clears the map. Called on
    /// application teardown; no tunnel may outlive the application.
    pub fn shutdown(&mut self) {
        let count = self.processes.len();
        for (pid, entry) in self.processes.drain() {
            debug!("terminating port-forward pid={pid} on shutdown");
            let _ = entry.kill_tx.send(());
        }
        if count > 0 {
            warn!("terminated {count} port-forward process(es) on shutdown");
        }
    }
}

/// Owns one child process until it ends. Terminates it when asked over the
/// kill channel, or when its stderr emits an error pattern, mirroring how
/// `kubectl port-forward` reports a broken tunnel while staying alive.
async fn supervise(
    mut child: Child,
    stderr: Option<ChildStderr>,
    mut kill_rx: oneshot::Receiver<()>,
) -> Result<ExitStatus, String> {
    let mut stderr_lines = stderr.map(|stream| BufReader::new(stream).lines());

    loop {
        tokio::select! {
            _ = &mut kill_rx => {
                let _ = child.start_kill();
                return child.wait().await.map_err(|error| format!("wait failed: {error}"));
            }
            line = next_stderr_line(&mut stderr_lines) => {
                match line {
                    Some(line) if line.contains("error") || line.contains("Error") => {
                        let _ = child.start_kill();
                        let _ = child.wait().await;
                        return Err(line);
                    }
                    Some(line) => {
                        debug!("port-forward stderr: {line}");
                    }
                    None => {
                        stderr_lines = None;
                    }
                }
            }
            status = child.wait() => {
                return status.map_err(|error| format!("wait failed: {error}"));
            }
        }
    }
}

async fn next_stderr_line(
    lines: &mut Option<tokio::io::Lines<BufReader<ChildStderr>>>,
) -> Option<String> {
    match lines {
        Some(lines) => lines.next_line().await.ok().flatten(),
        // Stream already drained; park forever and let the other select
        // arms decide the outcome.
        None => std::future::pending().await,
    }
}
