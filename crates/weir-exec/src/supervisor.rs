//! Process supervisor.
//!
//! Launches the node's rendered script as a child process in the
//! execution-scoped working directory and blocks until it exits. The child
//! starts a new session so a single termination signal can reach it and
//! every descendant it spawned.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, error, info, warn};

use weir_core::config::WorkerConfig;
use weir_core::error::{Result, WeirError};
use weir_core::node::{LOG_STDERR, LOG_STDOUT, LOG_WORKER};

const FAILURE_MARKER_WIDTH: usize = 60;

/// Result of one execution attempt. A non-zero exit is a `Failed` outcome,
/// never a supervisor fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Success,
    Failed,
}

/// Run-as identity, resolved to numeric ids ahead of the fork boundary.
///
/// The lookup must not happen inside the child after the privilege drop,
/// where the name service may no longer be reachable.
#[derive(Debug, Clone)]
pub struct RunAsUser {
    pub name: String,
    pub uid: u32,
    pub gid: u32,
}

/// Resolve an OS user name to its numeric user/group ids.
#[cfg(unix)]
pub fn resolve_run_as(name: &str) -> Result<RunAsUser> {
    use std::ffi::CString;

    let c_name = CString::new(name)
        .map_err(|_| WeirError::Config(format!("invalid run-as user name `{}`", name)))?;

    let mut passwd: libc::passwd = unsafe { std::mem::zeroed() };
    let mut buf = vec![0u8; 4096];
    let mut result: *mut libc::passwd = std::ptr::null_mut();

    let rc = unsafe {
        libc::getpwnam_r(
            c_name.as_ptr(),
            &mut passwd,
            buf.as_mut_ptr() as *mut libc::c_char,
            buf.len(),
            &mut result,
        )
    };

    if rc != 0 {
        return Err(WeirError::Config(format!(
            "failed to look up run-as user `{}`: {}",
            name,
            std::io::Error::from_raw_os_error(rc)
        )));
    }
    if result.is_null() {
        return Err(WeirError::Config(format!("unknown run-as user `{}`", name)));
    }

    Ok(RunAsUser {
        name: name.to_string(),
        uid: passwd.pw_uid,
        gid: passwd.pw_gid,
    })
}

/// Cancellation handle for a launched attempt.
///
/// Holds the shared child pid slot; safe to clone into whatever task or
/// signal handler needs to reach the job.
#[derive(Clone)]
pub struct TerminateHandle {
    child_pid: Arc<AtomicI32>,
}

impl TerminateHandle {
    /// Best-effort SIGTERM to the child's whole process group.
    ///
    /// Cancellation races against natural exit; a group that is already
    /// gone is logged and swallowed, never escalated.
    pub fn terminate(&self) {
        let pid = self.child_pid.load(Ordering::SeqCst);
        if pid <= 0 {
            warn!("terminate requested but no job process was launched");
            return;
        }

        info!(pid, "sending SIGTERM to job process group");
        #[cfg(unix)]
        {
            let pgid = unsafe { libc::getpgid(pid) };
            if pgid < 0 {
                warn!(
                    pid,
                    error = %std::io::Error::last_os_error(),
                    "job process group already gone"
                );
                return;
            }
            if unsafe { libc::killpg(pgid, libc::SIGTERM) } != 0 {
                warn!(
                    pid,
                    error = %std::io::Error::last_os_error(),
                    "failed to signal job process group"
                );
            }
        }
    }
}

/// Launches and supervises one child process per execution attempt.
pub struct Supervisor {
    run_as: Option<RunAsUser>,
    child_pid: Arc<AtomicI32>,
}

impl Supervisor {
    /// Build a supervisor, resolving the optional run-as identity now so
    /// the child never performs the lookup.
    pub fn new(config: &WorkerConfig) -> Result<Self> {
        let run_as = match &config.user {
            #[cfg(unix)]
            Some(name) => Some(resolve_run_as(name)?),
            #[cfg(not(unix))]
            Some(name) => {
                return Err(WeirError::Config(format!(
                    "run-as user `{}` is not supported on this platform",
                    name
                )))
            }
            None => None,
        };

        Ok(Self {
            run_as,
            child_pid: Arc::new(AtomicI32::new(0)),
        })
    }

    pub fn terminate_handle(&self) -> TerminateHandle {
        TerminateHandle {
            child_pid: Arc::clone(&self.child_pid),
        }
    }

    /// Run the rendered script to completion.
    ///
    /// On any failure (non-zero exit, or a fault while launching) the
    /// cause is appended to the `worker` log in a delimited JOB FAILED
    /// block and the outcome is `Failed`. The caller always gets a
    /// structured outcome, never an unhandled fault.
    pub async fn run(
        &self,
        script: &Path,
        workdir: &Path,
        env: HashMap<String, String>,
        logs: &HashMap<String, PathBuf>,
    ) -> JobOutcome {
        match self.exec(script, workdir, env, logs).await {
            Ok(()) => JobOutcome::Success,
            Err(e) => {
                error!(error = %e, "job failed");
                if let Some(worker_log) = logs.get(LOG_WORKER) {
                    if let Err(log_err) = append_failure_marker(worker_log, &e.to_string()).await {
                        error!(error = %log_err, "failed to append failure marker to worker log");
                    }
                }
                JobOutcome::Failed
            }
        }
    }

    async fn exec(
        &self,
        script: &Path,
        workdir: &Path,
        env: HashMap<String, String>,
        logs: &HashMap<String, PathBuf>,
    ) -> Result<()> {
        let worker_log = require_log(logs, LOG_WORKER)?;
        let stdout_log = require_log(logs, LOG_STDOUT)?;
        let stderr_log = require_log(logs, LOG_STDERR)?;

        // The exact script that ran is always recoverable for postmortem,
        // independent of how the run ends.
        tokio::fs::copy(script, worker_log).await?;

        // Streams go straight to files; large output never accumulates in
        // the supervisor's address space.
        let stdout_file = std::fs::File::create(stdout_log)?;
        let stderr_file = std::fs::File::create(stderr_log)?;

        let mut command = Command::new("bash");
        command
            .arg(script)
            .current_dir(workdir)
            .env_clear()
            .envs(env)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout_file))
            .stderr(Stdio::from(stderr_file));

        #[cfg(unix)]
        {
            let run_as = self.run_as.clone();
            unsafe {
                command.pre_exec(move || {
                    // Group before user: dropping user first would forfeit
                    // the permission needed to change group.
                    if let Some(ident) = &run_as {
                        if libc::setgid(ident.gid) != 0 {
                            return Err(std::io::Error::last_os_error());
                        }
                        if libc::setuid(ident.uid) != 0 {
                            return Err(std::io::Error::last_os_error());
                        }
                    }
                    // Restore dispositions a restrictive parent may have
                    // set to ignore, then detach into a new session.
                    libc::signal(libc::SIGPIPE, libc::SIG_DFL);
                    libc::signal(libc::SIGXCPU, libc::SIG_DFL);
                    libc::signal(libc::SIGXFSZ, libc::SIG_DFL);
                    if libc::setsid() < 0 {
                        return Err(std::io::Error::last_os_error());
                    }
                    Ok(())
                });
            }
        }

        let mut child = command
            .spawn()
            .map_err(|e| WeirError::Launch(e.to_string()))?;
        if let Some(pid) = child.id() {
            self.child_pid.store(pid as i32, Ordering::SeqCst);
            debug!(pid, workdir = %workdir.display(), "job process launched");
        }

        let status = child
            .wait()
            .await
            .map_err(|e| WeirError::Execution(e.to_string()))?;
        if !status.success() {
            return Err(WeirError::Execution(format!(
                "process exited with {}",
                status
            )));
        }
        Ok(())
    }
}

fn require_log<'a>(logs: &'a HashMap<String, PathBuf>, name: &str) -> Result<&'a PathBuf> {
    logs.get(name)
        .ok_or_else(|| WeirError::Launch(format!("missing `{}` log slot", name)))
}

async fn append_failure_marker(worker_log: &Path, cause: &str) -> std::io::Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(worker_log)
        .await?;
    let bar = "#".repeat(FAILURE_MARKER_WIDTH);
    let block = format!("\n\n\n{}\nJOB FAILED\n{}\n{}", bar, bar, cause);
    file.write_all(block.as_bytes()).await?;
    file.flush().await
}
