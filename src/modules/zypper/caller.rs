//! Zypper command wrapper
//!
//! Every zypper invocation goes through [`Zypper`]: it assembles the argv,
//! waits out a locked package manager, classifies the exit code and turns
//! failures into [`ModuleError::CommandExecution`].

use crate::connection::{CommandResult, ExecuteOptions};
use crate::modules::{ModuleContext, ModuleError, ModuleResult};
use crate::pkg::rpm::iso_utc;
use crate::xml::Document;
use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Exit codes that mean success, with their meaning.
pub const SUCCESS_EXIT_CODES: &[(i32, &str)] = &[
    (0, "Successful run of zypper with no special info."),
    (100, "Patches are available for installation."),
    (101, "Security patches are available for installation."),
    (102, "Installation successful, reboot required."),
    (
        103,
        "Installation successful, restart of the package manager itself required.",
    ),
];

/// Exit codes that are reported but not treated as errors.
pub const WARNING_EXIT_CODES: &[(i32, &str)] = &[
    (6, "No repositories are defined."),
    (7, "The ZYPP library is locked."),
    (
        106,
        "Some repository had to be disabled temporarily because it failed to refresh. \
         You should check your repository configuration (e.g. zypper ref -f).",
    ),
    (
        107,
        "Installation basically succeeded, but some of the packages %post install scripts \
         returned an error. These packages were successfully unpacked to disk and are \
         registered in the rpm database, but due to the failed install script they may not \
         work as expected. The failed scripts output might reveal what actually went wrong. \
         Any scripts output is also logged to /var/log/zypp/history.",
    ),
];

pub const LOCK_EXIT_CODE: i32 = 7;
/// Not affected by `--root`.
pub const ZYPPER_LOCK: &str = "/var/run/zypp.pid";
pub const RPM_LOCK: &str = "/var/lib/rpm/.rpm.lock";
pub const TAG_RELEASED: &str = "zypper/released";
pub const TAG_BLOCKED: &str = "zypper/blocked";

const XML_DIRECTIVES: &[&str] = &["-x", "--xmlout"];

fn exit_code_message(table: &[(i32, &'static str)], code: i32) -> Option<&'static str> {
    table.iter().find(|(c, _)| *c == code).map(|(_, msg)| *msg)
}

/// Whether `code` is one of the success codes
pub fn is_success_code(code: i32) -> bool {
    exit_code_message(SUCCESS_EXIT_CODES, code).is_some()
}

/// Classify an exit code, logging its meaning. Warnings are not errors.
pub fn is_error_code(code: i32) -> bool {
    if code != 0 {
        if let Some(msg) = exit_code_message(SUCCESS_EXIT_CODES, code) {
            info!("{}", msg);
        }
        if let Some(msg) = exit_code_message(WARNING_EXIT_CODES, code) {
            warn!("{}", msg);
        }
    }
    exit_code_message(SUCCESS_EXIT_CODES, code).is_none()
        && exit_code_message(WARNING_EXIT_CODES, code).is_none()
}

/// Collect the error lines of a failed call and join them.
pub fn extract_error_msg(xml_mode: bool, stdout: &str, stderr: &str) -> String {
    let mut lines = Vec::new();
    if !xml_mode {
        let msg = format!("{}{}", stderr.trim(), stdout.trim());
        if !msg.is_empty() {
            lines.push(msg);
        }
    } else {
        match Document::parse(stdout) {
            Ok(doc) => {
                for node in doc.elements_by_tag("message") {
                    if node.attr("type") == Some("error") {
                        lines.push(node.first_text().unwrap_or_default().to_string());
                    }
                }
            }
            Err(e) => {
                error!("{}", e);
                if !stderr.trim().is_empty() {
                    lines.push(stderr.trim().to_string());
                }
            }
        }
    }

    if lines.is_empty() {
        "Check Zypper's logs.".to_string()
    } else {
        lines.join("\n")
    }
}

/// Outcome of one zypper invocation.
#[derive(Debug, Clone)]
pub struct ZypperOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub pid: Option<u32>,
    /// Empty unless the exit code is an error
    pub error_msg: String,
    /// Parsed `--xmlout` document
    pub doc: Option<Document>,
}

impl ZypperOutput {
    /// The parsed XML document; fails for a call made without `xml()`.
    pub fn doc(&self) -> ModuleResult<&Document> {
        self.doc
            .as_ref()
            .ok_or_else(|| ModuleError::ParseError("zypper was not called in XML mode".into()))
    }

    /// `{retcode, stdout, stderr, pid}`
    pub fn to_json(&self) -> Value {
        json!({
            "retcode": self.exit_code,
            "stdout": self.stdout,
            "stderr": self.stderr,
            "pid": self.pid,
        })
    }
}

/// Builder for one zypper call.
///
/// ```rust,ignore
/// let out = Zypper::new(ctx).nolock().xml().call(&["se", "-xv", "vim"]).await?;
/// ```
#[derive(Debug, Clone)]
pub struct Zypper<'a> {
    context: &'a ModuleContext,
    xml: bool,
    nolock: bool,
    noraise: bool,
    refreshable: bool,
    no_repo_failure: bool,
    systemd_scope: bool,
    root: Option<String>,
}

impl<'a> Zypper<'a> {
    pub fn new(context: &'a ModuleContext) -> Self {
        Self {
            context,
            xml: false,
            nolock: false,
            noraise: false,
            refreshable: false,
            no_repo_failure: false,
            systemd_scope: false,
            root: None,
        }
    }

    /// Ask for `--xmlout` and parse the result
    pub fn xml(mut self) -> Self {
        self.xml = true;
        self
    }

    /// Read-only call that skips zypper's own lock
    pub fn nolock(mut self) -> Self {
        self.nolock = true;
        self
    }

    /// Never raise on an error exit code
    pub fn noraise(mut self) -> Self {
        self.noraise = true;
        self
    }

    /// Allow repository refresh; cancels `nolock`
    pub fn refreshable(mut self) -> Self {
        self.refreshable = true;
        self
    }

    pub fn no_repo_failure(mut self, ignore: bool) -> Self {
        self.no_repo_failure = ignore;
        self
    }

    pub fn systemd_scope(mut self, scope: bool) -> Self {
        self.systemd_scope = scope;
        self
    }

    pub fn root(mut self, root: Option<&str>) -> Self {
        self.root = root.filter(|r| !r.is_empty()).map(String::from);
        self
    }

    fn effective_nolock(&self) -> bool {
        self.nolock && !self.refreshable
    }

    /// The zypper argv for `args`, without a systemd scope prefix.
    pub fn command<S: AsRef<str>>(&self, args: &[S]) -> Vec<String> {
        let mut cmd = vec!["zypper".to_string(), "--non-interactive".to_string()];
        if self.xml {
            cmd.push("--xmlout".to_string());
        }
        if !self.refreshable && !args.iter().any(|a| a.as_ref() == "--no-refresh") {
            cmd.push("--no-refresh".to_string());
        }
        if let Some(root) = &self.root {
            cmd.push("--root".to_string());
            cmd.push(root.clone());
        }
        cmd.extend(args.iter().map(|a| a.as_ref().to_string()));
        cmd
    }

    /// Full argv as executed.
    pub fn argv<S: AsRef<str>>(&self, args: &[S]) -> Vec<String> {
        let mut argv = Vec::new();
        if self.systemd_scope {
            argv.push("systemd-run".to_string());
            argv.push("--scope".to_string());
        }
        argv.extend(self.command(args));
        argv
    }

    async fn is_rpm_lock(&self, exit_code: i32) -> bool {
        if exit_code <= 0 {
            return false;
        }
        let connection = &self.context.connection;
        let lock = Path::new(RPM_LOCK);
        if !connection.path_exists(lock).await.unwrap_or(false) {
            return false;
        }
        match connection.is_write_locked(lock).await {
            Ok(locked) => locked,
            Err(e) => {
                debug!(error = %e, "Unable to check the RPM lock");
                false
            }
        }
    }

    async fn blocking_process(&self) -> Value {
        let connection = &self.context.connection;
        let lock = Path::new(ZYPPER_LOCK);
        if !connection.path_exists(lock).await.unwrap_or(false) {
            return json!({
                "info": "Zypper is locked, but no Zypper lock has been found.",
                "success": false,
            });
        }

        let lookup = async {
            let content = connection.read_to_string(lock).await.map_err(|e| e.to_string())?;
            let pid: u32 = content
                .lines()
                .next()
                .unwrap_or_default()
                .trim()
                .parse()
                .map_err(|e: std::num::ParseIntError| e.to_string())?;
            connection.process_info(pid).await.map_err(|e| e.to_string())
        };

        match lookup.await {
            Ok(process) => json!({
                "pid": process.pid,
                "name": process.name,
                "cmdline": process.cmdline.join(" "),
                "create_time": process.create_time,
                "info": format!(
                    "Blocking process created at {}.",
                    iso_utc(process.create_time as i64, false)
                ),
                "success": true,
            }),
            Err(e) => json!({
                "info": format!("Unable to retrieve information about blocking process: {}", e),
                "success": false,
            }),
        }
    }

    async fn wait_for_lock(&self) {
        let secs = self.context.config.zypper.lock_wait_secs;
        tokio::time::sleep(Duration::from_secs(secs)).await;
    }

    async fn handle_zypper_lock(&self) {
        let data = self.blocking_process().await;
        if data["success"] == Value::Bool(true) {
            debug!("Collected data about blocking process.");
        } else {
            debug!("Unable to collect data about blocking process.");
        }
        debug!(data = %data, "Firing a Zypper blocked event");
        self.context.events.fire(TAG_BLOCKED, data);
        debug!(
            secs = self.context.config.zypper.lock_wait_secs,
            "Waiting for Zypper to get released"
        );
        self.wait_for_lock().await;
    }

    async fn handle_rpm_lock(&self) {
        let data = json!({"info": "RPM is temporarily locked.", "success": true});
        debug!(data = %data, "Firing an RPM blocked event");
        self.context.events.fire(TAG_BLOCKED, data);
        debug!(
            secs = self.context.config.zypper.lock_wait_secs,
            "Waiting for RPM to get released"
        );
        self.wait_for_lock().await;
    }

    async fn run_once(&self, argv: &[String], options: &ExecuteOptions) -> ModuleResult<CommandResult> {
        debug!(command = %argv.join(" "), "Calling Zypper");
        self.context
            .connection
            .execute(argv, Some(options.clone()))
            .await
            .map_err(|e| {
                warn!(error = %e, "Zypper did not run");
                ModuleError::command("No output result from Zypper?")
            })
    }

    /// Run zypper with `args`, waiting while the package manager is locked.
    pub async fn call<S: AsRef<str>>(self, args: &[S]) -> ModuleResult<ZypperOutput> {
        let argv = self.argv(args);
        let xml_mode = argv
            .iter()
            .any(|a| XML_DIRECTIVES.contains(&a.as_str()));

        let mut options = ExecuteOptions::new();
        if self.effective_nolock() {
            options = options.with_env("ZYPP_READONLY_HACK", "1");
        }

        let max_attempts = self.context.config.zypper.lock_max_attempts;
        let mut attempts: u32 = 0;
        let mut was_blocked = false;

        let result = loop {
            let result = self.run_once(&argv, &options).await?;
            let zypper_lock = result.exit_code == LOCK_EXIT_CODE;
            let rpm_lock = self.is_rpm_lock(result.exit_code).await;
            if !zypper_lock && !rpm_lock {
                break result;
            }

            attempts += 1;
            if let Some(max) = max_attempts {
                if attempts >= max {
                    return Err(ModuleError::command(format!(
                        "Zypper is locked after {} attempts",
                        attempts
                    )));
                }
            }

            if zypper_lock {
                self.handle_zypper_lock().await;
            }
            if rpm_lock {
                self.handle_rpm_lock().await;
            }
            was_blocked = true;
        };

        let error_msg = if is_error_code(result.exit_code) {
            extract_error_msg(xml_mode, &result.stdout, &result.stderr)
        } else {
            String::new()
        };

        if was_blocked {
            let info = if error_msg.is_empty() {
                "Zypper has been released".to_string()
            } else {
                error_msg.clone()
            };
            self.context.events.fire(
                TAG_RELEASED,
                json!({"success": error_msg.is_empty(), "info": info}),
            );
        }

        if !error_msg.is_empty() && !self.noraise && !self.no_repo_failure {
            return Err(ModuleError::command(format!(
                "Zypper command failure: {}",
                error_msg
            )));
        }

        let doc = if xml_mode {
            Some(Document::parse(&result.stdout)?)
        } else {
            None
        };

        Ok(ZypperOutput {
            exit_code: result.exit_code,
            stdout: result.stdout,
            stderr: result.stderr,
            pid: result.pid,
            error_msg,
            doc,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::LocalConnection;
    use std::sync::Arc;

    fn context() -> ModuleContext {
        ModuleContext::new(Arc::new(LocalConnection::new()))
    }

    #[test]
    fn test_exit_code_classification() {
        for code in [0, 100, 101, 102, 103, 6, 7, 106, 107] {
            assert!(!is_error_code(code), "{} is not an error", code);
        }
        for code in [1, 2, 3, 4, 5, 104, 105, 8] {
            assert!(is_error_code(code), "{} is an error", code);
        }
        assert!(is_success_code(102));
        assert!(!is_success_code(106));
    }

    #[test]
    fn test_argv_order() {
        let ctx = context();
        let argv = Zypper::new(&ctx)
            .xml()
            .root(Some("/mnt"))
            .systemd_scope(true)
            .argv(&["install", "vim"]);
        assert_eq!(
            argv,
            vec![
                "systemd-run",
                "--scope",
                "zypper",
                "--non-interactive",
                "--xmlout",
                "--no-refresh",
                "--root",
                "/mnt",
                "install",
                "vim"
            ]
        );
    }

    #[test]
    fn test_no_refresh_not_duplicated() {
        let ctx = context();
        let argv = Zypper::new(&ctx).argv(&["--no-refresh", "install", "vim"]);
        assert_eq!(
            argv,
            vec!["zypper", "--non-interactive", "--no-refresh", "install", "vim"]
        );

        let argv = Zypper::new(&ctx).refreshable().argv(&["refresh"]);
        assert_eq!(argv, vec!["zypper", "--non-interactive", "refresh"]);
    }

    #[test]
    fn test_refreshable_cancels_nolock() {
        let ctx = context();
        assert!(Zypper::new(&ctx).nolock().effective_nolock());
        assert!(!Zypper::new(&ctx).nolock().refreshable().effective_nolock());
        assert!(!Zypper::new(&ctx).refreshable().nolock().effective_nolock());
    }

    #[test]
    fn test_extract_error_msg_plain() {
        assert_eq!(
            extract_error_msg(false, " out \n", " err\n"),
            "errout".to_string()
        );
        assert_eq!(extract_error_msg(false, "", ""), "Check Zypper's logs.");
    }

    #[test]
    fn test_extract_error_msg_xml() {
        let stdout = r#"<?xml version='1.0'?>
<stream>
<message type="info">Loading repository data...</message>
<message type="error">Repository 'foo' is invalid.</message>
<message type="error">Please check the below error messages.</message>
</stream>"#;
        assert_eq!(
            extract_error_msg(true, stdout, ""),
            "Repository 'foo' is invalid.\nPlease check the below error messages."
        );
        assert_eq!(
            extract_error_msg(true, "not xml <", " broken stderr "),
            "broken stderr"
        );
        assert_eq!(extract_error_msg(true, "<stream/>", ""), "Check Zypper's logs.");
    }
}
