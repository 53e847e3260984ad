//! Local connection module
//!
//! Runs programs directly on the current host and reads the local
//! filesystem. Commands are spawned from an argument vector; no shell is
//! involved, so arguments never need quoting.

use async_trait::async_trait;
use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg};
use std::fs;
use std::os::unix::fs::MetadataExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use sysinfo::{Pid, ProcessesToUpdate, System};
use tokio::process::Command;
use tracing::{debug, trace};
use walkdir::WalkDir;

use super::{
    CommandResult, Connection, ConnectionError, ConnectionResult, ExecuteOptions, FileStat,
    ProcessInfo,
};

/// Local connection for executing commands on the current host
#[derive(Debug, Clone)]
pub struct LocalConnection {
    /// Identifier for this connection
    identifier: String,
}

impl LocalConnection {
    /// Create a new local connection
    pub fn new() -> Self {
        let identifier = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "localhost".to_string());

        Self { identifier }
    }

    /// Create a local connection with a custom identifier
    pub fn with_identifier(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
        }
    }

    /// Build the command with options
    fn build_command(&self, argv: &[String], options: &ExecuteOptions) -> ConnectionResult<Command> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| ConnectionError::ExecutionFailed("Empty command".to_string()))?;

        let mut cmd = Command::new(program);
        cmd.args(args);

        if let Some(cwd) = &options.cwd {
            cmd.current_dir(cwd);
        }

        for (key, value) in &options.env {
            cmd.env(key, value);
        }

        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        Ok(cmd)
    }
}

impl Default for LocalConnection {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connection for LocalConnection {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    async fn execute(
        &self,
        argv: &[String],
        options: Option<ExecuteOptions>,
    ) -> ConnectionResult<CommandResult> {
        let options = options.unwrap_or_default();
        debug!(command = %argv.join(" "), "Executing local command");

        let mut cmd = self.build_command(argv, &options)?;

        let child = cmd.spawn().map_err(|e| {
            ConnectionError::ExecutionFailed(format!("Failed to spawn process: {}", e))
        })?;
        let pid = child.id();

        let output = if let Some(timeout_secs) = options.timeout {
            let timeout = tokio::time::Duration::from_secs(timeout_secs);
            match tokio::time::timeout(timeout, child.wait_with_output()).await {
                Ok(result) => result.map_err(|e| {
                    ConnectionError::ExecutionFailed(format!("Failed to wait for process: {}", e))
                })?,
                Err(_) => return Err(ConnectionError::Timeout(timeout_secs)),
            }
        } else {
            child.wait_with_output().await.map_err(|e| {
                ConnectionError::ExecutionFailed(format!("Failed to wait for process: {}", e))
            })?
        };

        let exit_code = output.status.code().unwrap_or(-1);
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        trace!(exit_code = %exit_code, stdout_len = %stdout.len(), stderr_len = %stderr.len(), "Command completed");

        let result = if output.status.success() {
            CommandResult::success(stdout, stderr)
        } else {
            CommandResult::failure(exit_code, stdout, stderr)
        };
        Ok(result.with_pid(pid))
    }

    async fn download_content(&self, path: &Path) -> ConnectionResult<Vec<u8>> {
        debug!(src = %path.display(), "Reading file content locally");

        fs::read(path).map_err(|e| {
            ConnectionError::TransferFailed(format!("Failed to read {}: {}", path.display(), e))
        })
    }

    async fn path_exists(&self, path: &Path) -> ConnectionResult<bool> {
        Ok(path.exists())
    }

    async fn is_directory(&self, path: &Path) -> ConnectionResult<bool> {
        Ok(path.is_dir())
    }

    async fn stat(&self, path: &Path) -> ConnectionResult<FileStat> {
        let metadata = fs::metadata(path).map_err(|e| {
            ConnectionError::TransferFailed(format!("Failed to stat {}: {}", path.display(), e))
        })?;

        Ok(FileStat {
            size: metadata.len(),
            mode: metadata.mode(),
            uid: metadata.uid(),
            gid: metadata.gid(),
            atime: metadata.atime(),
            mtime: metadata.mtime(),
            ctime: metadata.ctime(),
            is_dir: metadata.is_dir(),
            is_file: metadata.is_file(),
            is_symlink: metadata.is_symlink(),
        })
    }

    async fn list_dir(&self, path: &Path) -> ConnectionResult<Vec<PathBuf>> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(path)? {
            entries.push(entry?.path());
        }
        entries.sort();
        Ok(entries)
    }

    async fn walk_files(&self, path: &Path) -> ConnectionResult<Vec<PathBuf>> {
        Ok(WalkDir::new(path)
            .follow_links(true)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .collect())
    }

    async fn is_write_locked(&self, path: &Path) -> ConnectionResult<bool> {
        let file = fs::OpenOptions::new().read(true).write(true).open(path)?;
        let fd = file.as_raw_fd();

        // SAFETY: `flock` is a plain C struct for which all-zero is valid.
        let mut lock: libc::flock = unsafe { std::mem::zeroed() };
        lock.l_type = libc::F_WRLCK as libc::c_short;
        lock.l_whence = libc::SEEK_SET as libc::c_short;

        match fcntl(fd, FcntlArg::F_SETLK(&lock)) {
            Ok(_) => {
                lock.l_type = libc::F_UNLCK as libc::c_short;
                let _ = fcntl(fd, FcntlArg::F_SETLK(&lock));
                Ok(false)
            }
            Err(Errno::EAGAIN) | Err(Errno::EACCES) => Ok(true),
            Err(e) => Err(ConnectionError::IoError(std::io::Error::from(e))),
        }
    }

    async fn process_info(&self, pid: u32) -> ConnectionResult<ProcessInfo> {
        tokio::task::spawn_blocking(move || {
            let mut sys = System::new();
            let target = Pid::from_u32(pid);
            sys.refresh_processes(ProcessesToUpdate::Some(&[target]), true);

            let process = sys
                .process(target)
                .ok_or_else(|| ConnectionError::ProcessLookup(format!("process PID not found (pid={})", pid)))?;

            Ok(ProcessInfo {
                pid,
                name: process.name().to_string_lossy().to_string(),
                cmdline: process
                    .cmd()
                    .iter()
                    .map(|arg| arg.to_string_lossy().to_string())
                    .collect(),
                create_time: process.start_time(),
            })
        })
        .await
        .map_err(|e| ConnectionError::ProcessLookup(e.to_string()))?
    }

    async fn which(&self, program: &str) -> bool {
        which::which(program).is_ok()
    }
}
