//! Supervisor-side bridge to the worker process.
//!
//! Owns the worker child, its stdin writer task, and the stdout reader
//! thread. Requests are correlated to responses by `request_id` through a
//! pending map of oneshot channels, so the host event loop never blocks on
//! the worker: callers await their own future while other coroutines keep
//! progressing.

use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::process::{ChildStdin, ChildStdout};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot, Mutex as TokioMutex};

use crate::cache_key::derive_cache_key;
use crate::error::ExecError;
use crate::ipc::{
    ConfigurationSnapshot, DecisionResult, WorkerRequest, WorkerResponse, UNKNOWN_REQUEST_ID,
};
use crate::process_manager::ProcessManager;
use crate::settings::ExecSettings;
use crate::transport::{JsonLinesReader, MessageReceiver, Received};

type PendingMap = Arc<TokioMutex<HashMap<String, oneshot::Sender<WorkerResponse>>>>;

/// One worker incarnation: the writer channel, the process handle, and the
/// in-flight requests awaiting this incarnation's responses. The map is
/// per-incarnation so a dying worker's drain can never touch requests
/// already routed to its replacement.
struct WorkerLink {
    /// Serialized request lines destined for the stdin writer task.
    cmd_tx: mpsc::UnboundedSender<String>,
    process: Arc<ProcessManager>,
    pending: PendingMap,
}

/// Owns one worker process and exposes the async request/response call.
pub struct WorkerSupervisor {
    settings: ExecSettings,
    link: TokioMutex<Option<WorkerLink>>,
    /// Cache keys of configurations the current worker has computed with.
    /// Cleared whenever a fresh worker is spawned.
    cached_keys: Arc<TokioMutex<HashSet<String>>>,
    next_id: AtomicU64,
    respawn_count: AtomicU32,
}

impl WorkerSupervisor {
    pub fn new(settings: ExecSettings) -> Self {
        Self {
            settings,
            link: TokioMutex::new(None),
            cached_keys: Arc::new(TokioMutex::new(HashSet::new())),
            next_id: AtomicU64::new(1),
            respawn_count: AtomicU32::new(0),
        }
    }

    /// Idempotent: a no-op while the held worker is alive, otherwise spawns a
    /// fresh process and rewires the IO tasks.
    pub async fn ensure_started(&self) -> Result<(), ExecError> {
        let mut link = self.link.lock().await;
        if let Some(ref held) = *link {
            if held.process.is_alive() {
                return Ok(());
            }
        }

        if let Some(stale) = link.take() {
            stale.process.kill();
            let count = self.respawn_count.fetch_add(1, Ordering::Relaxed) + 1;
            eprintln!("[SUPERVISOR] Worker found dead, respawning (respawn #{count})");
        }

        // A fresh worker starts with an empty model cache.
        self.cached_keys.lock().await.clear();

        let process = Arc::new(ProcessManager::spawn(&self.settings)?);
        let stdin = process.take_stdin().ok_or_else(|| ExecError::Spawn {
            reason: "worker stdin not available".to_string(),
        })?;
        let stdout = process.take_stdout().ok_or_else(|| ExecError::Spawn {
            reason: "worker stdout not available".to_string(),
        })?;

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<String>();
        tokio::spawn(stdin_writer_task(cmd_rx, stdin));

        let pending: PendingMap = Arc::new(TokioMutex::new(HashMap::new()));
        let (response_tx, response_rx) = mpsc::unbounded_channel::<Received<WorkerResponse>>();
        spawn_reader_thread(stdout, response_tx);
        tokio::spawn(response_dispatch_task(response_rx, pending.clone()));

        *link = Some(WorkerLink {
            cmd_tx,
            process,
            pending,
        });
        Ok(())
    }

    /// Run one decision on the worker and await its response.
    ///
    /// Starts (or restarts) the worker if needed. Fails with
    /// [`ExecError::WorkerExecution`] when the worker reports a failure and
    /// [`ExecError::WorkerDied`] when it dies before answering.
    pub async fn get_decision(
        &self,
        snapshot: ConfigurationSnapshot,
    ) -> Result<DecisionResult, ExecError> {
        self.ensure_started().await?;

        let request_id = self.next_id.fetch_add(1, Ordering::Relaxed).to_string();
        let cache_key = derive_cache_key(&snapshot.resolved_config);
        let request = WorkerRequest::Run {
            request_id: request_id.clone(),
            config: snapshot,
        };
        let line = serde_json::to_string(&request)?;

        let (cmd_tx, pending) = {
            let link = self.link.lock().await;
            match *link {
                Some(ref held) => (held.cmd_tx.clone(), held.pending.clone()),
                None => {
                    return Err(ExecError::LinkClosed {
                        reason: "worker not started".to_string(),
                    })
                }
            }
        };

        let (tx, rx) = oneshot::channel();
        pending.lock().await.insert(request_id.clone(), tx);

        if cmd_tx.send(line).is_err() {
            pending.lock().await.remove(&request_id);
            return Err(ExecError::LinkClosed {
                reason: "worker stdin closed".to_string(),
            });
        }

        // Suspends only this caller; the dispatch task resolves the future
        // when the matching response arrives, or drops it on worker death.
        let response = rx.await.map_err(|_| ExecError::WorkerDied)?;

        if response.success {
            let result = response.result.ok_or_else(|| ExecError::WorkerExecution {
                message: "success response carried no result".to_string(),
            })?;
            self.cached_keys.lock().await.insert(cache_key);
            Ok(result)
        } else {
            Err(ExecError::WorkerExecution {
                message: response
                    .error
                    .unwrap_or_else(|| "worker reported an unspecified failure".to_string()),
            })
        }
    }

    /// Whether the current worker already holds a loaded model for this
    /// configuration's cache key.
    pub async fn is_model_cached(&self, resolved_config: &Value) -> bool {
        if !self.is_worker_alive().await {
            return false;
        }
        let key = derive_cache_key(resolved_config);
        self.cached_keys.lock().await.contains(&key)
    }

    pub async fn is_worker_alive(&self) -> bool {
        self.link
            .lock()
            .await
            .as_ref()
            .map(|held| held.process.is_alive())
            .unwrap_or(false)
    }

    /// Ask the worker to exit, escalating to kill after the grace period.
    ///
    /// Idempotent, and safe to call with no worker ever started. The
    /// grace-period timeout is expected and handled here, never surfaced.
    pub async fn shutdown(&self) {
        let Some(link) = self.link.lock().await.take() else {
            return;
        };

        if link.process.is_alive() {
            let request = WorkerRequest::Shutdown {
                request_id: "shutdown".to_string(),
            };
            if let Ok(line) = serde_json::to_string(&request) {
                let _ = link.cmd_tx.send(line);
            }

            let process = link.process.clone();
            let grace = self.settings.shutdown_grace();
            let poll = self.settings.aliveness_poll();
            let exited = tokio::task::spawn_blocking(move || {
                let deadline = Instant::now() + grace;
                while Instant::now() < deadline {
                    if !process.is_alive() {
                        return true;
                    }
                    thread::sleep(poll);
                }
                false
            })
            .await
            .unwrap_or(false);

            if exited {
                eprintln!("[SUPERVISOR] Worker exited cleanly");
            } else {
                eprintln!("[SUPERVISOR] Graceful shutdown timed out, killing worker");
                link.process.kill();
            }
        }

        self.cached_keys.lock().await.clear();
        // Dropping the link closes the writer channel; the reader thread sees
        // EOF and the dispatch task fails any stragglers.
    }

    pub fn respawn_count(&self) -> u32 {
        self.respawn_count.load(Ordering::Relaxed)
    }
}

/// Task that writes request lines to the worker's stdin.
async fn stdin_writer_task(mut cmd_rx: mpsc::UnboundedReceiver<String>, mut stdin: ChildStdin) {
    while let Some(line) = cmd_rx.recv().await {
        if writeln!(stdin, "{line}").is_err() {
            eprintln!("[SUPERVISOR] Failed to write to worker stdin");
            break;
        }
        if stdin.flush().is_err() {
            eprintln!("[SUPERVISOR] Failed to flush worker stdin");
            break;
        }
    }
}

/// Pipe reads block, so a dedicated thread pulls responses off the worker's
/// stdout and hands them to the async dispatch task.
fn spawn_reader_thread(
    stdout: ChildStdout,
    response_tx: mpsc::UnboundedSender<Received<WorkerResponse>>,
) {
    thread::spawn(move || {
        let mut reader = JsonLinesReader::new(stdout);
        loop {
            let item: Received<WorkerResponse> = reader.receive();
            let closed = matches!(item, Received::Closed);
            if response_tx.send(item).is_err() || closed {
                break;
            }
        }
    });
}

/// Resolves pending futures by `request_id`. When the response stream closes
/// (worker death or shutdown), every still-pending caller observes a dropped
/// future and maps it to [`ExecError::WorkerDied`].
async fn response_dispatch_task(
    mut response_rx: mpsc::UnboundedReceiver<Received<WorkerResponse>>,
    pending: PendingMap,
) {
    while let Some(item) = response_rx.recv().await {
        match item {
            Received::Message(response) => {
                let waiter = pending.lock().await.remove(&response.request_id);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(response);
                    }
                    None => {
                        if response.request_id != UNKNOWN_REQUEST_ID {
                            eprintln!(
                                "[SUPERVISOR] No pending request for response id={}",
                                response.request_id
                            );
                        }
                    }
                }
            }
            Received::Malformed(error) => {
                eprintln!("[SUPERVISOR] Failed to parse worker response: {error}");
            }
            Received::Closed => break,
        }
    }
    pending.lock().await.clear();
    eprintln!("[SUPERVISOR] Worker response stream closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[tokio::test]
    async fn shutdown_without_a_worker_is_a_noop() {
        let supervisor = WorkerSupervisor::new(ExecSettings::default());
        supervisor.shutdown().await;
        supervisor.shutdown().await;
        assert!(!supervisor.is_worker_alive().await);
    }

    #[tokio::test]
    async fn spawn_failure_surfaces_as_spawn_error() {
        let settings = ExecSettings {
            worker_program: Some(PathBuf::from("/nonexistent/worker/binary")),
            ..ExecSettings::default()
        };
        let supervisor = WorkerSupervisor::new(settings);
        let err = supervisor.ensure_started().await.unwrap_err();
        assert!(matches!(err, ExecError::Spawn { .. }));
    }

    #[tokio::test]
    async fn uncached_config_reports_not_resident() {
        let supervisor = WorkerSupervisor::new(ExecSettings::default());
        let config = serde_json::json!({"instance": {"_target_": "kdma_baseline"}});
        assert!(!supervisor.is_model_cached(&config).await);
    }
}
