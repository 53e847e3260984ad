//! Shared package helpers used by the `pkg` and `lowpkg` modules.
//!
//! These cover target parsing, change reports and package list formatting,
//! the parts every package backend has in common.

pub mod rpm;
pub mod version;

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;
use tracing::{debug, warn};

use crate::modules::{ModuleError, ModuleResult};

/// Attributes kept for every installed package entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PkgAttrs {
    pub epoch: Option<String>,
    pub version: Option<String>,
    pub release: Option<String>,
    pub arch: Option<String>,
    pub install_date: Option<String>,
    pub install_date_time_t: Option<i64>,
}

/// Every attribute name a caller may request.
pub const VALID_ATTRS: &[&str] = &[
    "epoch",
    "version",
    "release",
    "arch",
    "install_date",
    "install_date_time_t",
];

impl PkgAttrs {
    fn get(&self, key: &str) -> Value {
        match key {
            "epoch" => self.epoch.clone().into(),
            "version" => self.version.clone().into(),
            "release" => self.release.clone().into(),
            "arch" => self.arch.clone().into(),
            "install_date" => self.install_date.clone().into(),
            "install_date_time_t" => self.install_date_time_t.into(),
            _ => Value::Null,
        }
    }
}

/// Installed packages keyed by name, each with one entry per installed version.
pub type PkgList = IndexMap<String, Vec<PkgAttrs>>;

/// Which attributes to report in a package list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttrSelection {
    All,
    List(Vec<String>),
}

impl AttrSelection {
    /// Read `attr`/`diff_attr` from a call argument: `"all"`, a comma
    /// separated string or a list.
    pub fn from_value(value: Option<&Value>) -> Option<Self> {
        match value? {
            Value::Null => None,
            Value::String(s) if s == "all" => Some(AttrSelection::All),
            Value::String(s) => Some(AttrSelection::List(
                s.split(',')
                    .map(|a| a.trim().to_string())
                    .filter(|a| !a.is_empty())
                    .collect(),
            )),
            Value::Array(items) => Some(AttrSelection::List(
                items
                    .iter()
                    .map(|v| match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect(),
            )),
            other => Some(AttrSelection::List(vec![other.to_string()])),
        }
    }

    fn requested(&self) -> Vec<&'static str> {
        match self {
            AttrSelection::All => VALID_ATTRS.to_vec(),
            AttrSelection::List(list) => VALID_ATTRS
                .iter()
                .copied()
                .filter(|a| *a == "version" || *a == "arch" || list.iter().any(|l| l == a))
                .collect(),
        }
    }
}

/// Compare two maps and report `{key: {old, new}}` for every difference.
///
/// A side that lacks the key reports an empty string.
pub fn compare_dicts(old: &Value, new: &Value) -> Value {
    let empty = Map::new();
    let old = old.as_object().unwrap_or(&empty);
    let new = new.as_object().unwrap_or(&empty);

    let mut ret = Map::new();
    for key in old.keys().chain(new.keys()) {
        if ret.contains_key(key) {
            continue;
        }
        let change = match (old.get(key), new.get(key)) {
            (None, Some(n)) => Some((Value::from(""), n.clone())),
            (Some(o), None) => Some((o.clone(), Value::from(""))),
            (Some(o), Some(n)) if o != n => Some((o.clone(), n.clone())),
            _ => None,
        };
        if let Some((o, n)) = change {
            let mut entry = Map::new();
            entry.insert("old".to_string(), o);
            entry.insert("new".to_string(), n);
            ret.insert(key.clone(), Value::Object(entry));
        }
    }
    Value::Object(ret)
}

static COMPARISON_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(<=>|!=|>=|<=|<<|>>|<|>|!|=|==)?\s?([^<>=]+)$").expect("Invalid comparison regex")
});

/// Split a leading comparison operator from a version string.
///
/// ```rust
/// use zypperpkg::pkg::split_comparison;
///
/// assert_eq!(split_comparison(">=1.2.3"), (">=".to_string(), "1.2.3".to_string()));
/// assert_eq!(split_comparison("1.2.3"), (String::new(), "1.2.3".to_string()));
/// ```
pub fn split_comparison(version: &str) -> (String, String) {
    match COMPARISON_RE.captures(version) {
        Some(caps) => (
            caps.get(1).map(|m| m.as_str().to_string()).unwrap_or_default(),
            caps.get(2).map(|m| m.as_str().to_string()).unwrap_or_default(),
        ),
        None => (String::new(), version.to_string()),
    }
}

/// `epoch:version-release` with empty parts omitted.
pub fn format_version(epoch: Option<&str>, version: Option<&str>, release: Option<&str>) -> String {
    let mut full = match epoch {
        Some(e) if !e.is_empty() => format!("{}:{}", e, version.unwrap_or("")),
        _ => version.unwrap_or("").to_string(),
    };
    if let Some(r) = release.filter(|r| !r.is_empty()) {
        full.push('-');
        full.push_str(r);
    }
    full
}

/// Render a package list as versions (string or list) or as attribute maps.
///
/// With attributes, a name that carries an arch suffix matching one of its
/// entries is reported under the bare name.
pub fn format_pkg_list(
    packages: &PkgList,
    versions_as_list: bool,
    attr: Option<&AttrSelection>,
) -> Value {
    let mut ret = Map::new();

    if let Some(attr) = attr {
        let requested = attr.requested();
        for (name, entries) in packages {
            let (base, arch) = rpm::parse_arch(name);
            let mut pkgname = None;
            let mut versions = Vec::with_capacity(entries.len());
            for entry in entries {
                let mut filtered = Map::new();
                for key in &requested {
                    filtered.insert((*key).to_string(), entry.get(key));
                }
                if arch.is_some() && entry.arch == arch {
                    pkgname = Some(base.clone());
                }
                versions.push(Value::Object(filtered));
            }
            let key = pkgname.unwrap_or_else(|| name.clone());
            match ret.get_mut(&key) {
                Some(Value::Array(existing)) => existing.extend(versions),
                _ => {
                    ret.insert(key, Value::Array(versions));
                }
            }
        }
        return Value::Object(ret);
    }

    for (name, entries) in packages {
        let versions: Vec<String> = entries
            .iter()
            .map(|e| {
                format_version(
                    e.epoch.as_deref(),
                    e.version.as_deref(),
                    e.release.as_deref(),
                )
            })
            .collect();
        let value = if versions_as_list {
            Value::from(versions)
        } else {
            Value::from(versions.join(","))
        };
        ret.insert(name.clone(), value);
    }
    Value::Object(ret)
}

/// How the parsed targets should be handed to the package manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    Repository,
    File,
    Advisory,
}

/// Result of [`parse_targets`]: names (or paths, or advisory ids) with an
/// optional version constraint each.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Targets {
    pub params: IndexMap<String, Option<String>>,
    pub kind: TargetKind,
}

/// Inputs accepted by [`parse_targets`].
#[derive(Debug, Clone, Default)]
pub struct TargetArgs<'a> {
    pub name: Option<&'a str>,
    pub pkgs: Option<&'a Value>,
    pub sources: Option<&'a Value>,
    pub advisory_ids: Option<&'a Value>,
    /// Host arch for name normalisation; `None` keeps names untouched.
    pub osarch: Option<&'a str>,
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Flatten a list of names and single-key maps into one ordered map.
fn repack_dictlist(list: &Value, what: &str) -> ModuleResult<IndexMap<String, Option<String>>> {
    let items = list.as_array().ok_or_else(|| {
        ModuleError::Invocation(format!("Invalid input: '{}' must be a list", what))
    })?;
    let mut ret = IndexMap::new();
    for item in items {
        match item {
            Value::Object(map) if map.len() == 1 => {
                for (k, v) in map {
                    ret.insert(k.clone(), scalar_to_string(v));
                }
            }
            Value::Object(_) => {
                return Err(ModuleError::Invocation(format!(
                    "Invalid input: '{}' entries must be single-key mappings",
                    what
                )))
            }
            Value::Array(_) => {
                return Err(ModuleError::Invocation(format!(
                    "Invalid input: nested list in '{}'",
                    what
                )))
            }
            Value::Null => {}
            other => {
                if let Some(name) = scalar_to_string(other) {
                    ret.insert(name, None);
                }
            }
        }
    }
    Ok(ret)
}

fn is_remote_source(src: &str) -> bool {
    url::Url::parse(src)
        .map(|u| u.scheme().len() > 1 && u.scheme() != "file")
        .unwrap_or(false)
}

/// Work out which packages a call targets.
///
/// Returns `Ok(None)` when nothing was targeted.
pub fn parse_targets(args: TargetArgs<'_>) -> ModuleResult<Option<Targets>> {
    let normalize = |name: &str| match args.osarch {
        Some(osarch) => rpm::normalize_name(name, osarch),
        None => name.to_string(),
    };

    if args.pkgs.is_some() && args.sources.is_some() {
        return Err(ModuleError::Invocation(
            "Only one of \"pkgs\" and \"sources\" can be used.".to_string(),
        ));
    }

    if let Some(advisories) = args.advisory_ids {
        if args.pkgs.is_some() {
            return Err(ModuleError::Invocation(
                "Cannot use \"advisory_ids\" and \"pkgs\" at the same time".to_string(),
            ));
        }
        let mut ids: Vec<String> = match advisories {
            Value::Array(items) => items.iter().filter_map(scalar_to_string).collect(),
            Value::String(s) => s
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            Value::Null => Vec::new(),
            other => vec![other.to_string()],
        };
        if ids.is_empty() {
            match args.name {
                Some(name) => ids.push(name.to_string()),
                None => return Ok(None),
            }
        }
        return Ok(Some(Targets {
            params: ids.into_iter().map(|id| (id, None)).collect(),
            kind: TargetKind::Advisory,
        }));
    }

    if let Some(pkgs) = args.pkgs {
        let packed = repack_dictlist(pkgs, "pkgs")?;
        if packed.is_empty() {
            return Ok(None);
        }
        let params = packed
            .into_iter()
            .map(|(name, ver)| (normalize(&name), ver))
            .collect();
        return Ok(Some(Targets {
            params,
            kind: TargetKind::Repository,
        }));
    }

    if let Some(sources) = args.sources {
        let packed = repack_dictlist(sources, "sources")?;
        if packed.is_empty() {
            return Ok(None);
        }
        let mut params = IndexMap::new();
        for (pkg_name, src) in packed {
            let src = src.unwrap_or_default();
            if is_remote_source(&src) || !Path::new(&src).is_absolute() {
                return Err(ModuleError::Invocation(format!(
                    "Path {} for package {} is either not absolute or an invalid protocol",
                    src, pkg_name
                )));
            }
            params.insert(src, None);
        }
        return Ok(Some(Targets {
            params,
            kind: TargetKind::File,
        }));
    }

    if let Some(name) = args.name {
        let params = name.split(',').map(|n| (normalize(n), None)).collect();
        return Ok(Some(Targets {
            params,
            kind: TargetKind::Repository,
        }));
    }

    debug!("No package sources provided");
    Ok(None)
}

/// Remove the refresh tag so the next state run refreshes again.
pub async fn clear_rtag(cachedir: &Path) -> std::io::Result<()> {
    let rtag = cachedir.join("pkg_refresh");
    match tokio::fs::remove_file(&rtag).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => {
            warn!(path = %rtag.display(), error = %e, "Unable to remove refresh tag");
            Err(e)
        }
    }
}
