//! Host facts gathering for zypperpkg

use crate::config::Config;
use crate::connection::Connection;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::Path;
use tracing::{debug, warn};

/// Facts gathered from a host
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Facts {
    data: IndexMap<String, Value>,
}

impl Facts {
    /// Create empty facts
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a fact
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.data.insert(key.into(), value);
    }

    /// Builder form of [`Facts::set`]
    pub fn with(mut self, key: impl Into<String>, value: Value) -> Self {
        self.set(key, value);
        self
    }

    /// Get a fact
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Get a fact as a string
    pub fn get_string(&self, key: &str) -> Option<String> {
        match self.data.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }

    /// Get all facts
    pub fn all(&self) -> &IndexMap<String, Value> {
        &self.data
    }

    /// `os_family == "Suse"`
    pub fn is_suse(&self) -> bool {
        self.get_string("os_family").as_deref() == Some("Suse")
    }

    /// First element of `osrelease_info`
    pub fn os_major_release(&self) -> Option<u64> {
        self.data
            .get("osrelease_info")?
            .as_array()?
            .first()?
            .as_u64()
    }

    /// Gather facts through a connection, then apply config overrides
    pub async fn gather(connection: &dyn Connection, config: &Config) -> Self {
        let mut facts = Self::new();
        facts.set("id", json!(connection.identifier()));

        match connection
            .read_to_string(Path::new("/etc/os-release"))
            .await
        {
            Ok(content) => facts.apply_os_release(&content),
            Err(e) => debug!(error = %e, "Unable to read /etc/os-release"),
        }

        let argv: Vec<String> = ["rpm", "--eval", "%{_host_cpu}"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let osarch = match connection.execute(&argv, None).await {
            Ok(result) if result.success && !result.stdout.trim().is_empty() => {
                result.stdout.trim().to_string()
            }
            Ok(_) | Err(_) => {
                warn!("Unable to ask rpm for the host arch, using the build arch");
                std::env::consts::ARCH.to_string()
            }
        };
        facts.set("osarch", json!(osarch));

        for (key, value) in &config.grains {
            facts.set(key.clone(), value.clone());
        }
        if let Some(release) = config.grains.get("osrelease").and_then(Value::as_str) {
            if !config.grains.contains_key("osrelease_info") {
                facts.set("osrelease_info", json!(release_info(release)));
            }
        }

        facts
    }

    /// Fill `os`, `os_family`, `osrelease` and `osrelease_info`
    fn apply_os_release(&mut self, content: &str) {
        let fields: IndexMap<String, String> = content
            .lines()
            .filter_map(|line| line.split_once('='))
            .map(|(k, v)| {
                (
                    k.trim().to_string(),
                    v.trim().trim_matches('"').trim_matches('\'').to_string(),
                )
            })
            .collect();

        let id = fields.get("ID").cloned().unwrap_or_default();
        let id_like = fields.get("ID_LIKE").cloned().unwrap_or_default();
        let family = if id.contains("suse") || id_like.contains("suse") {
            "Suse".to_string()
        } else {
            fields.get("NAME").cloned().unwrap_or_else(|| id.clone())
        };
        self.set("os", json!(fields.get("NAME").cloned().unwrap_or(id)));
        self.set("os_family", json!(family));

        if let Some(version) = fields.get("VERSION_ID") {
            self.set("osrelease", json!(version));
            self.set("osrelease_info", json!(release_info(version)));
        }
    }
}

/// "15.5" -> [15, 5]; stops at the first non-numeric part
fn release_info(release: &str) -> Vec<u64> {
    release
        .split('.')
        .map_while(|part| part.parse().ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_os_release_suse() {
        let mut facts = Facts::new();
        facts.apply_os_release(
            "NAME=\"openSUSE Leap\"\nVERSION_ID=\"15.5\"\nID=\"opensuse-leap\"\nID_LIKE=\"suse opensuse\"\n",
        );
        assert!(facts.is_suse());
        assert_eq!(facts.get_string("osrelease").as_deref(), Some("15.5"));
        assert_eq!(facts.os_major_release(), Some(15));
        assert_eq!(facts.get_string("os").as_deref(), Some("openSUSE Leap"));
    }

    #[test]
    fn test_os_release_other() {
        let mut facts = Facts::new();
        facts.apply_os_release("NAME=Fedora\nID=fedora\nVERSION_ID=40\n");
        assert!(!facts.is_suse());
        assert_eq!(facts.get_string("os_family").as_deref(), Some("Fedora"));
        assert_eq!(facts.os_major_release(), Some(40));
    }

    #[test]
    fn test_release_info() {
        assert_eq!(release_info("12.3"), vec![12, 3]);
        assert_eq!(release_info("tumbleweed"), Vec::<u64>::new());
    }
}
