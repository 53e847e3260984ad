//! Connection layer for host interaction.
//!
//! Every side effect a module performs goes through the [`Connection`] trait:
//! running a program, reading a file, probing a lock or looking up a process.
//! Production code uses [`LocalConnection`]; tests substitute a mock that
//! serves canned command results and a virtual filesystem.
//!
//! # Example
//!
//! ```rust,ignore
//! use zypperpkg::connection::{Connection, ExecuteOptions, LocalConnection};
//!
//! let conn = LocalConnection::new();
//! let argv = vec!["rpm".to_string(), "-qa".to_string()];
//! let opts = ExecuteOptions::new().with_env("LC_ALL", "C");
//! let result = conn.execute(&argv, Some(opts)).await?;
//! println!("{}", result.stdout);
//! ```

/// Local execution connection implementation.
pub mod local;

pub use local::LocalConnection;

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur during connection operations.
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// Command execution failed (not to be confused with non-zero exit code).
    #[error("Command execution failed: {0}")]
    ExecutionFailed(String),

    /// Reading a file failed.
    #[error("File transfer failed: {0}")]
    TransferFailed(String),

    /// Operation timed out.
    #[error("Connection timeout after {0} seconds")]
    Timeout(u64),

    /// Process lookup failed.
    #[error("Process lookup failed: {0}")]
    ProcessLookup(String),

    /// I/O error during connection operations.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Result type for connection operations.
pub type ConnectionResult<T> = Result<T, ConnectionError>;

/// The result of executing a command on a connection.
///
/// # Example
///
/// ```rust
/// use zypperpkg::connection::CommandResult;
///
/// let result = CommandResult::success("Hello".into(), String::new());
/// assert!(result.success);
/// assert_eq!(result.exit_code, 0);
///
/// let failed = CommandResult::failure(1, String::new(), "error".into());
/// assert!(!failed.success);
/// ```
#[derive(Debug, Clone)]
pub struct CommandResult {
    /// Exit code of the command (0 typically indicates success).
    pub exit_code: i32,
    /// Content written to standard output.
    pub stdout: String,
    /// Content written to standard error.
    pub stderr: String,
    /// Convenience flag: `true` if `exit_code == 0`.
    pub success: bool,
    /// Process id of the finished command, when the transport knows it.
    pub pid: Option<u32>,
}

impl CommandResult {
    /// Create a new successful command result
    pub fn success(stdout: String, stderr: String) -> Self {
        Self {
            exit_code: 0,
            stdout,
            stderr,
            success: true,
            pid: None,
        }
    }

    /// Create a new failed command result
    pub fn failure(exit_code: i32, stdout: String, stderr: String) -> Self {
        Self {
            exit_code,
            stdout,
            stderr,
            success: exit_code == 0,
            pid: None,
        }
    }

    /// Attach the process id
    pub fn with_pid(mut self, pid: Option<u32>) -> Self {
        self.pid = pid;
        self
    }

    /// Get the combined output (stdout + stderr)
    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// Options for command execution
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// Working directory for the command
    pub cwd: Option<String>,
    /// Environment variables to set
    pub env: HashMap<String, String>,
    /// Timeout in seconds (None for no timeout)
    pub timeout: Option<u64>,
}

impl ExecuteOptions {
    /// Create new execute options
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the working directory
    pub fn with_cwd(mut self, cwd: impl Into<String>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Add an environment variable
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set the timeout
    pub fn with_timeout(mut self, timeout: u64) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// File statistics
#[derive(Debug, Clone, Default)]
pub struct FileStat {
    /// File size in bytes
    pub size: u64,
    /// File mode (permissions)
    pub mode: u32,
    /// Owner UID
    pub uid: u32,
    /// Group GID
    pub gid: u32,
    /// Last access time (Unix timestamp)
    pub atime: i64,
    /// Last modification time (Unix timestamp)
    pub mtime: i64,
    /// Last status change time (Unix timestamp)
    pub ctime: i64,
    /// Is this a directory?
    pub is_dir: bool,
    /// Is this a regular file?
    pub is_file: bool,
    /// Is this a symbolic link?
    pub is_symlink: bool,
}

/// A running process as seen by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
    pub cmdline: Vec<String>,
    /// Start time in seconds since the epoch
    pub create_time: u64,
}

/// The main connection trait that all transport implementations must implement
#[async_trait]
pub trait Connection: Send + Sync {
    /// Get the connection identifier (hostname)
    fn identifier(&self) -> &str;

    /// Execute a program given as an argument vector. No shell is involved.
    async fn execute(
        &self,
        argv: &[String],
        options: Option<ExecuteOptions>,
    ) -> ConnectionResult<CommandResult>;

    /// Read a file's content
    async fn download_content(&self, path: &Path) -> ConnectionResult<Vec<u8>>;

    /// Check if a path exists
    async fn path_exists(&self, path: &Path) -> ConnectionResult<bool>;

    /// Check if a path is a directory
    async fn is_directory(&self, path: &Path) -> ConnectionResult<bool>;

    /// Get file stats (size, mode, times, etc.)
    async fn stat(&self, path: &Path) -> ConnectionResult<FileStat>;

    /// List the entries of a directory (not recursive)
    async fn list_dir(&self, path: &Path) -> ConnectionResult<Vec<PathBuf>>;

    /// List every regular file below a directory
    async fn walk_files(&self, path: &Path) -> ConnectionResult<Vec<PathBuf>>;

    /// Whether another process holds a write lock on the file.
    ///
    /// Tests with an exclusive, non-blocking `fcntl` lock and releases it
    /// immediately when it was granted.
    async fn is_write_locked(&self, path: &Path) -> ConnectionResult<bool>;

    /// Look up a running process
    async fn process_info(&self, pid: u32) -> ConnectionResult<ProcessInfo>;

    /// Whether a program can be found on the search path
    async fn which(&self, program: &str) -> bool;

    /// Read a file as UTF-8 text (lossy)
    async fn read_to_string(&self, path: &Path) -> ConnectionResult<String> {
        let bytes = self.download_content(path).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

/// Re-root an absolute path below `root`, the way `--root` does for zypper.
///
/// ```rust
/// use std::path::PathBuf;
/// use zypperpkg::connection::rooted;
///
/// assert_eq!(rooted(None, "/etc/zypp/locks"), PathBuf::from("/etc/zypp/locks"));
/// assert_eq!(
///     rooted(Some("/mnt"), "/etc/zypp/locks"),
///     PathBuf::from("/mnt/etc/zypp/locks")
/// );
/// ```
pub fn rooted(root: Option<&str>, path: &str) -> PathBuf {
    match root {
        Some(root) if !root.is_empty() => Path::new(root).join(path.trim_start_matches('/')),
        _ => PathBuf::from(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_result_failure_flag() {
        let ok_code = CommandResult::failure(0, "out".into(), String::new());
        assert!(ok_code.success);

        let failed = CommandResult::failure(104, String::new(), "err".into()).with_pid(Some(42));
        assert!(!failed.success);
        assert_eq!(failed.pid, Some(42));
        assert_eq!(failed.combined_output(), "err");
    }

    #[test]
    fn test_execute_options_builder() {
        let opts = ExecuteOptions::new()
            .with_env("ZYPP_READONLY_HACK", "1")
            .with_cwd("/tmp")
            .with_timeout(30);
        assert_eq!(opts.env.get("ZYPP_READONLY_HACK").map(String::as_str), Some("1"));
        assert_eq!(opts.cwd.as_deref(), Some("/tmp"));
        assert_eq!(opts.timeout, Some(30));
    }

    #[test]
    fn test_rooted_paths() {
        assert_eq!(
            rooted(Some("/srv/chroot/"), "/var/cache/zypp/packages/"),
            PathBuf::from("/srv/chroot/var/cache/zypp/packages/")
        );
        assert_eq!(rooted(Some(""), "/etc/zypp"), PathBuf::from("/etc/zypp"));
    }
}
