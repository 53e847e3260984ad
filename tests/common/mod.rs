//! Shared test utilities and fixtures for the zypperpkg test suite.
//!
//! This module provides:
//! - A mock [`Connection`] serving canned command results and a virtual filesystem
//! - Context builders for a SUSE host
//! - Small XML fixtures for zypper output
//!
//! # Usage
//!
//! ```rust,ignore
//! mod common;
//! use common::*;
//! ```

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{json, Value};

use zypperpkg::config::Config;
use zypperpkg::connection::{
    CommandResult, Connection, ConnectionError, ConnectionResult, ExecuteOptions, FileStat,
    ProcessInfo,
};
use zypperpkg::events::ChannelEventSink;
use zypperpkg::facts::Facts;
use zypperpkg::modules::ModuleContext;
use tokio::sync::mpsc;

// ============================================================================
// Mock Connection Implementation
// ============================================================================

/// One executed command as the mock saw it.
#[derive(Debug, Clone)]
pub struct ExecutedCommand {
    pub argv: Vec<String>,
    pub env: HashMap<String, String>,
}

impl ExecutedCommand {
    pub fn line(&self) -> String {
        self.argv.join(" ")
    }
}

/// A mock connection for testing purposes.
///
/// Command results are keyed by the space-joined argv. Several results for
/// the same command are served in order; the last one keeps being served.
///
/// # Example
///
/// ```rust,ignore
/// let mock = MockConnection::new("test-host");
/// mock.on("rpm -qa", CommandResult::success("vim\n".into(), String::new()));
///
/// let result = mock.execute(&argv(&["rpm", "-qa"]), None).await.unwrap();
/// assert!(result.success);
/// assert_eq!(mock.command_count(), 1);
/// ```
#[derive(Debug)]
pub struct MockConnection {
    identifier: String,
    commands_executed: RwLock<Vec<ExecutedCommand>>,
    command_results: RwLock<HashMap<String, VecDeque<CommandResult>>>,
    default_result: RwLock<CommandResult>,
    command_count: AtomicU32,
    virtual_filesystem: RwLock<HashMap<PathBuf, Vec<u8>>>,
    virtual_dirs: RwLock<HashSet<PathBuf>>,
    write_locked: RwLock<HashSet<PathBuf>>,
    processes: RwLock<HashMap<u32, ProcessInfo>>,
    programs: RwLock<HashSet<String>>,
    file_changes: RwLock<HashMap<String, Vec<(PathBuf, Option<Vec<u8>>)>>>,
}

impl MockConnection {
    /// Create a new mock connection with the given identifier.
    ///
    /// `zypper` and `rpm` are on the search path.
    pub fn new(identifier: impl Into<String>) -> Self {
        let programs = ["zypper", "rpm"].iter().map(|p| p.to_string()).collect();
        Self {
            identifier: identifier.into(),
            commands_executed: RwLock::new(Vec::new()),
            command_results: RwLock::new(HashMap::new()),
            default_result: RwLock::new(CommandResult::success(String::new(), String::new())),
            command_count: AtomicU32::new(0),
            virtual_filesystem: RwLock::new(HashMap::new()),
            virtual_dirs: RwLock::new(HashSet::new()),
            write_locked: RwLock::new(HashSet::new()),
            processes: RwLock::new(HashMap::new()),
            programs: RwLock::new(programs),
            file_changes: RwLock::new(HashMap::new()),
        }
    }

    /// Queue a result for a command line.
    pub fn on(&self, command: impl Into<String>, result: CommandResult) {
        self.command_results
            .write()
            .entry(command.into())
            .or_default()
            .push_back(result);
    }

    /// Queue a successful result with the given stdout.
    pub fn on_stdout(&self, command: impl Into<String>, stdout: impl Into<String>) {
        self.on(command, CommandResult::success(stdout.into(), String::new()));
    }

    /// Write (`Some`) or delete (`None`) a virtual file whenever `command` runs.
    pub fn on_file_change(
        &self,
        command: impl Into<String>,
        path: impl Into<PathBuf>,
        content: Option<&str>,
    ) {
        self.file_changes
            .write()
            .entry(command.into())
            .or_default()
            .push((path.into(), content.map(|c| c.as_bytes().to_vec())));
    }

    /// Set the default result for commands not explicitly configured.
    pub fn set_default_result(&self, result: CommandResult) {
        *self.default_result.write() = result;
    }

    /// Get the number of commands executed.
    pub fn command_count(&self) -> u32 {
        self.command_count.load(Ordering::SeqCst)
    }

    /// Get all commands that were executed.
    pub fn get_commands(&self) -> Vec<ExecutedCommand> {
        self.commands_executed.read().clone()
    }

    /// Space-joined command lines, in execution order.
    pub fn command_lines(&self) -> Vec<String> {
        self.commands_executed
            .read()
            .iter()
            .map(ExecutedCommand::line)
            .collect()
    }

    /// Executed command lines starting with `prefix`.
    pub fn commands_starting_with(&self, prefix: &str) -> Vec<String> {
        self.command_lines()
            .into_iter()
            .filter(|line| line.starts_with(prefix))
            .collect()
    }

    /// Add a virtual file to the mock filesystem.
    pub fn add_virtual_file(&self, path: impl Into<PathBuf>, content: impl Into<Vec<u8>>) {
        self.virtual_filesystem
            .write()
            .insert(path.into(), content.into());
    }

    /// Add an empty virtual directory.
    pub fn add_virtual_dir(&self, path: impl Into<PathBuf>) {
        self.virtual_dirs.write().insert(path.into());
    }

    /// Content of a virtual file, if present.
    pub fn virtual_file(&self, path: impl AsRef<Path>) -> Option<String> {
        self.virtual_filesystem
            .read()
            .get(path.as_ref())
            .map(|c| String::from_utf8_lossy(c).into_owned())
    }

    /// Mark a file as write-locked by another process.
    pub fn set_write_locked(&self, path: impl Into<PathBuf>, locked: bool) {
        let path = path.into();
        if locked {
            self.write_locked.write().insert(path);
        } else {
            self.write_locked.write().remove(&path);
        }
    }

    /// Register a running process.
    pub fn add_process(&self, process: ProcessInfo) {
        self.processes.write().insert(process.pid, process);
    }

    /// Remove a program from the search path.
    pub fn remove_program(&self, program: &str) {
        self.programs.write().remove(program);
    }

    fn is_virtual_dir(&self, path: &Path) -> bool {
        if self.virtual_dirs.read().iter().any(|d| d.starts_with(path)) {
            return true;
        }
        self.virtual_filesystem
            .read()
            .keys()
            .any(|f| f != path && f.starts_with(path))
    }
}

#[async_trait]
impl Connection for MockConnection {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    async fn execute(
        &self,
        argv: &[String],
        options: Option<ExecuteOptions>,
    ) -> ConnectionResult<CommandResult> {
        self.command_count.fetch_add(1, Ordering::SeqCst);
        let line = argv.join(" ");
        self.commands_executed.write().push(ExecutedCommand {
            argv: argv.to_vec(),
            env: options.map(|o| o.env).unwrap_or_default(),
        });

        if let Some(changes) = self.file_changes.read().get(&line) {
            let mut files = self.virtual_filesystem.write();
            for (path, content) in changes {
                match content {
                    Some(content) => files.insert(path.clone(), content.clone()),
                    None => files.remove(path),
                };
            }
        }

        let mut results = self.command_results.write();
        if let Some(queue) = results.get_mut(&line) {
            let result = if queue.len() > 1 {
                queue.pop_front()
            } else {
                queue.front().cloned()
            };
            if let Some(result) = result {
                return Ok(result);
            }
        }
        Ok(self.default_result.read().clone())
    }

    async fn download_content(&self, path: &Path) -> ConnectionResult<Vec<u8>> {
        self.virtual_filesystem
            .read()
            .get(path)
            .cloned()
            .ok_or_else(|| ConnectionError::TransferFailed(format!("{}: not found", path.display())))
    }

    async fn path_exists(&self, path: &Path) -> ConnectionResult<bool> {
        Ok(self.virtual_filesystem.read().contains_key(path) || self.is_virtual_dir(path))
    }

    async fn is_directory(&self, path: &Path) -> ConnectionResult<bool> {
        Ok(self.is_virtual_dir(path))
    }

    async fn stat(&self, path: &Path) -> ConnectionResult<FileStat> {
        if let Some(content) = self.virtual_filesystem.read().get(path) {
            return Ok(FileStat {
                size: content.len() as u64,
                mode: 0o644,
                is_file: true,
                ..FileStat::default()
            });
        }
        if self.is_virtual_dir(path) {
            return Ok(FileStat {
                mode: 0o755,
                is_dir: true,
                ..FileStat::default()
            });
        }
        Err(ConnectionError::TransferFailed(format!(
            "{}: not found",
            path.display()
        )))
    }

    async fn list_dir(&self, path: &Path) -> ConnectionResult<Vec<PathBuf>> {
        let mut entries: Vec<PathBuf> = self
            .virtual_filesystem
            .read()
            .keys()
            .filter(|f| f.parent() == Some(path))
            .cloned()
            .collect();
        entries.sort();
        Ok(entries)
    }

    async fn walk_files(&self, path: &Path) -> ConnectionResult<Vec<PathBuf>> {
        let mut entries: Vec<PathBuf> = self
            .virtual_filesystem
            .read()
            .keys()
            .filter(|f| f.starts_with(path))
            .cloned()
            .collect();
        entries.sort();
        Ok(entries)
    }

    async fn is_write_locked(&self, path: &Path) -> ConnectionResult<bool> {
        Ok(self.write_locked.read().contains(path))
    }

    async fn process_info(&self, pid: u32) -> ConnectionResult<ProcessInfo> {
        self.processes
            .read()
            .get(&pid)
            .cloned()
            .ok_or_else(|| ConnectionError::ProcessLookup(format!("no process {}", pid)))
    }

    async fn which(&self, program: &str) -> bool {
        self.programs.read().contains(program)
    }
}

// ============================================================================
// Context Builders
// ============================================================================

/// Facts of an x86_64 SLES 15 host.
pub fn suse_facts() -> Facts {
    Facts::new()
        .with("os", json!("SUSE"))
        .with("os_family", json!("Suse"))
        .with("osrelease", json!("15.5"))
        .with("osrelease_info", json!([15, 5]))
        .with("osarch", json!("x86_64"))
}

/// Configuration without lock waits or systemd scopes.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.zypper.lock_wait_secs = 0;
    config.zypper.systemd_scope = false;
    config.agent.cachedir = std::env::temp_dir().join("zypperpkg-tests");
    config
}

/// A SUSE context over `mock`.
pub fn suse_context(mock: Arc<MockConnection>) -> ModuleContext {
    ModuleContext::new(mock)
        .with_facts(suse_facts())
        .with_config(test_config())
}

/// A SUSE context whose events go to a channel.
pub fn suse_context_with_events(
    mock: Arc<MockConnection>,
) -> (ModuleContext, mpsc::UnboundedReceiver<(String, Value)>) {
    let (sink, rx) = ChannelEventSink::new();
    (suse_context(mock).with_events(Arc::new(sink)), rx)
}

/// Fresh mock plus a SUSE context over it.
pub fn setup() -> (Arc<MockConnection>, ModuleContext) {
    let mock = Arc::new(MockConnection::new("test-host"));
    let context = suse_context(Arc::clone(&mock));
    (mock, context)
}

/// Turn string literals into an argv.
pub fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|p| p.to_string()).collect()
}

// ============================================================================
// Fixtures
// ============================================================================

/// Wrap zypper XML children in a `<stream>` document.
pub fn xml_stream(body: &str) -> String {
    format!("<?xml version='1.0'?>\n<stream>\n{}\n</stream>\n", body)
}

/// One `rpm -qa --queryformat` line in the format the package list parser reads.
pub fn rpm_qa_line(name: &str, epoch: &str, version: &str, release: &str, arch: &str) -> String {
    format!(
        "{}_|-{}_|-{}_|-{}_|-{}_|-(none)_|-1700000000\n",
        name, epoch, version, release, arch
    )
}

/// The `rpm -qa` command line the package list issues, optionally rooted.
pub fn rpm_qa_command(root: Option<&str>) -> String {
    let query = format!(
        "{}\n",
        zypperpkg::pkg::rpm::QUERYFORMAT.replace("%{REPOID}", "(none)")
    );
    match root {
        Some(root) => format!("rpm --root {} -qa --queryformat {}", root, query),
        None => format!("rpm -qa --queryformat {}", query),
    }
}
