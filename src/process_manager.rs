//! Worker process lifecycle management.
//!
//! Spawns the worker as a child process (this binary re-entered with
//! `--worker` by default) and owns the kill/reap path. Restart policy lives
//! in the supervisor; a dead `ProcessManager` is replaced, not revived.

use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::Mutex;

use crate::error::ExecError;
use crate::settings::ExecSettings;

#[derive(Debug)]
pub struct ProcessManager {
    child: Mutex<Option<Child>>,
}

impl ProcessManager {
    /// Spawn a new worker process with piped stdin/stdout. The worker's
    /// stderr is inherited so its logs land next to ours.
    pub fn spawn(settings: &ExecSettings) -> Result<Self, ExecError> {
        let child = spawn_worker(settings)?;
        Ok(Self {
            child: Mutex::new(Some(child)),
        })
    }

    /// Take the child's stdin handle for writing requests.
    pub fn take_stdin(&self) -> Option<ChildStdin> {
        self.child
            .lock()
            .ok()
            .and_then(|mut guard| guard.as_mut().and_then(|c| c.stdin.take()))
    }

    /// Take the child's stdout handle for reading responses.
    pub fn take_stdout(&self) -> Option<ChildStdout> {
        self.child
            .lock()
            .ok()
            .and_then(|mut guard| guard.as_mut().and_then(|c| c.stdout.take()))
    }

    /// Whether the worker process is still running. Reaps the child as a
    /// side effect once it has exited.
    pub fn is_alive(&self) -> bool {
        if let Ok(mut guard) = self.child.lock() {
            if let Some(ref mut child) = *guard {
                return matches!(child.try_wait(), Ok(None));
            }
        }
        false
    }

    /// Kill the worker process immediately and reap it. The OS reclaims all
    /// of its memory, accelerator allocations included.
    pub fn kill(&self) {
        if let Ok(mut guard) = self.child.lock() {
            if let Some(ref mut child) = *guard {
                eprintln!("[PROCESS_MGR] Killing worker process");
                let _ = child.kill();
                let _ = child.wait();
            }
            *guard = None;
        }
    }
}

impl Drop for ProcessManager {
    fn drop(&mut self) {
        self.kill();
    }
}

/// Spawn a worker child process. Defaults to re-entering the current
/// executable; tests and embedders can point `worker_program` elsewhere.
fn spawn_worker(settings: &ExecSettings) -> Result<Child, ExecError> {
    let program = match settings.worker_program {
        Some(ref program) => program.clone(),
        None => std::env::current_exe().map_err(|e| ExecError::Spawn {
            reason: format!("cannot find own executable: {e}"),
        })?,
    };

    eprintln!(
        "[PROCESS_MGR] Spawning worker: {} {}",
        program.display(),
        settings.worker_args.join(" ")
    );

    Command::new(program)
        .args(&settings.worker_args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        // Worker-side failure responses include the capture-site trace.
        .env("RUST_BACKTRACE", "1")
        .spawn()
        .map_err(|e| ExecError::Spawn {
            reason: format!("failed to spawn worker: {e}"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn sleeper_settings() -> ExecSettings {
        // A plain `cat` blocks on its stdin pipe until we close it, which is
        // all these lifecycle tests need from a "worker".
        ExecSettings {
            worker_program: Some(PathBuf::from("cat")),
            worker_args: Vec::new(),
            ..ExecSettings::default()
        }
    }

    #[test]
    fn spawned_child_is_alive_until_killed() {
        let manager = ProcessManager::spawn(&sleeper_settings()).unwrap();
        assert!(manager.is_alive());

        manager.kill();
        assert!(!manager.is_alive());

        // Killing again is a no-op.
        manager.kill();
        assert!(!manager.is_alive());
    }

    #[test]
    fn pipe_handles_can_be_taken_once() {
        let manager = ProcessManager::spawn(&sleeper_settings()).unwrap();
        assert!(manager.take_stdin().is_some());
        assert!(manager.take_stdin().is_none());
        assert!(manager.take_stdout().is_some());
        assert!(manager.take_stdout().is_none());
        manager.kill();
    }

    #[test]
    fn spawn_fails_for_missing_program() {
        let settings = ExecSettings {
            worker_program: Some(PathBuf::from("/nonexistent/worker/binary")),
            ..ExecSettings::default()
        };
        let err = ProcessManager::spawn(&settings).unwrap_err();
        assert!(matches!(err, ExecError::Spawn { .. }));
    }
}
