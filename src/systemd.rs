//! systemd detection
//!
//! Package transactions are wrapped in `systemd-run --scope` so that a
//! package upgrade restarting the agent's own service does not kill the
//! transaction. Scopes need a booted systemd of version 205 or newer.

use crate::modules::ModuleContext;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};
use std::path::Path;
use tracing::debug;

const BOOTED_KEY: &str = "systemd.booted";
const VERSION_KEY: &str = "systemd.version";

static VERSION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\w+ ([0-9]+)").expect("Invalid systemd version regex"));

/// Whether the host was booted with systemd
pub async fn booted(context: &ModuleContext) -> bool {
    if let Some(Value::Bool(cached)) = context.cache.get(BOOTED_KEY) {
        return cached;
    }
    let booted = context
        .connection
        .path_exists(Path::new("/run/systemd/system"))
        .await
        .unwrap_or(false);
    context.cache.insert(BOOTED_KEY, json!(booted));
    booted
}

/// Major version reported by `systemctl --version`
pub async fn version(context: &ModuleContext) -> Option<u64> {
    if let Some(cached) = context.cache.get(VERSION_KEY) {
        return cached.as_u64();
    }
    let argv = vec!["systemctl".to_string(), "--version".to_string()];
    let version = match context.connection.execute(&argv, None).await {
        Ok(result) if result.success => parse_version(&result.stdout),
        Ok(result) => {
            debug!(exit_code = %result.exit_code, "systemctl --version failed");
            None
        }
        Err(e) => {
            debug!(error = %e, "Unable to run systemctl");
            None
        }
    };
    context.cache.insert(VERSION_KEY, json!(version));
    version
}

fn parse_version(stdout: &str) -> Option<u64> {
    let first = stdout.lines().next()?;
    VERSION_RE
        .captures(first)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// `systemd-run --scope` is usable on this host
pub async fn has_scope(context: &ModuleContext) -> bool {
    if !booted(context).await {
        return false;
    }
    matches!(version(context).await, Some(v) if v >= 205)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_version() {
        assert_eq!(
            parse_version("systemd 249 (249.17+suse.227.g8d34d0a4ba)\n+PAM +AUDIT\n"),
            Some(249)
        );
        assert_eq!(parse_version("systemd 204\n"), Some(204));
        assert_eq!(parse_version(""), None);
        assert_eq!(parse_version("garbage"), None);
    }
}
