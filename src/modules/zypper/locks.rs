//! Package locks: `list_locks`, `clean_locks`, `hold`, `unhold`, `list_holds`.

use super::caller::Zypper;
use super::catalog::{search, SearchOptions};
use super::packages::info_installed;
use crate::connection::rooted;
use crate::modules::lowpkg::InfoOptions;
use crate::modules::{value_to_string, ModuleContext, ModuleError, ModuleResult};
use indexmap::IndexMap;
use regex::Regex;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

pub const LOCKS: &str = "/etc/zypp/locks";

/// Parse the zypp locks file: blank-line separated `key: value` records,
/// keyed by `solvable_name`.
pub fn parse_locks(content: &str) -> IndexMap<String, IndexMap<String, String>> {
    let mut locks = IndexMap::new();
    for item in content.split("\n\n") {
        let mut lock: IndexMap<String, String> = IndexMap::new();
        for element in item.split('\n').filter(|e| !e.is_empty()) {
            if let Some((key, value)) = element.split_once(':') {
                lock.insert(key.trim().to_string(), value.trim().to_string());
            }
        }
        if let Some(name) = lock.shift_remove("solvable_name") {
            if !name.is_empty() {
                locks.insert(name, lock);
            }
        }
    }
    locks
}

/// Current locks; an unreadable or missing locks file means no locks.
pub async fn list_locks(
    context: &ModuleContext,
    root: Option<&str>,
) -> IndexMap<String, IndexMap<String, String>> {
    let path = rooted(root, LOCKS);
    match context.connection.read_to_string(&path).await {
        Ok(content) => parse_locks(&content),
        Err(e) => {
            debug!(path = %path.display(), error = %e, "No locks file");
            IndexMap::new()
        }
    }
}

/// Remove unused locks with `zypper cl`.
pub async fn clean_locks(context: &ModuleContext, root: Option<&str>) -> ModuleResult<Value> {
    let mut out = Map::new();
    out.insert("removed".to_string(), json!(0));

    let path = rooted(root, LOCKS);
    if !context.connection.path_exists(&path).await? {
        return Ok(Value::Object(out));
    }

    let zypper = Zypper::new(context).root(root).xml().call(&["cl"]).await?;
    for node in zypper.doc()?.elements_by_tag("message") {
        let text = node.first_text().unwrap_or_default().to_lowercase();
        if text.starts_with("removed") {
            let count = text.split(' ').nth(1).unwrap_or_default().to_string();
            out.insert("removed".to_string(), Value::String(count));
            break;
        }
    }
    Ok(Value::Object(out))
}

/// A hold target: a bare name or a single-key `{name: version}` map.
fn hold_targets(name: Option<&str>, pkgs: Option<&Value>) -> ModuleResult<Vec<(String, Option<String>)>> {
    let pkgs = pkgs.and_then(Value::as_array).filter(|p| !p.is_empty());
    let name = name.filter(|n| !n.is_empty());
    if name.is_none() && pkgs.is_none() {
        return Err(ModuleError::command("Name or packages must be specified."));
    }

    let mut targets = Vec::new();
    match pkgs {
        Some(pkgs) => {
            for pkg in pkgs {
                match pkg {
                    Value::Object(map) => {
                        if let Some((k, v)) = map.iter().next() {
                            let version = Some(value_to_string(v)).filter(|v| !v.is_empty());
                            targets.push((k.clone(), version));
                        }
                    }
                    other => targets.push((value_to_string(other), None)),
                }
            }
        }
        None => {
            if let Some(name) = name {
                targets.push((name.to_string(), None));
            }
        }
    }
    Ok(targets)
}

fn hold_result(name: &str) -> Map<String, Value> {
    let mut ret = Map::new();
    ret.insert("name".to_string(), json!(name));
    ret.insert("changes".to_string(), json!({}));
    ret.insert("result".to_string(), json!(true));
    ret.insert("comment".to_string(), json!(""));
    ret
}

/// Lock packages with `zypper al`.
pub async fn hold(
    context: &ModuleContext,
    name: Option<&str>,
    pkgs: Option<&Value>,
    root: Option<&str>,
) -> ModuleResult<Value> {
    let targets = hold_targets(name, pkgs)?;
    let locks = list_locks(context, root).await;

    let mut ret = Map::new();
    let mut added = Vec::new();
    for (target, version) in targets {
        let mut entry = hold_result(&target);
        if !locks.contains_key(&target) {
            added.push(match &version {
                Some(v) => format!("{}={}", target, v),
                None => target.clone(),
            });
            entry.insert("changes".to_string(), json!({"new": "hold", "old": ""}));
            entry.insert(
                "comment".to_string(),
                json!(format!("Package {} is now being held.", target)),
            );
        } else {
            entry.insert(
                "comment".to_string(),
                json!(format!("Package {} is already set to be held.", target)),
            );
        }
        ret.insert(target, Value::Object(entry));
    }

    if !added.is_empty() {
        let mut args = vec!["al".to_string()];
        args.extend(added);
        Zypper::new(context).root(root).call(&args).await?;
    }
    Ok(Value::Object(ret))
}

/// Release package locks with `zypper rl`.
pub async fn unhold(
    context: &ModuleContext,
    name: Option<&str>,
    pkgs: Option<&Value>,
    root: Option<&str>,
) -> ModuleResult<Value> {
    let targets = hold_targets(name, pkgs)?;
    let locks = list_locks(context, root).await;

    let mut ret = Map::new();
    let mut removed = Vec::new();
    for (target, version) in targets {
        let mut entry = hold_result(&target);
        match locks.get(&target) {
            Some(lock) => {
                let lock_ver = lock
                    .get("version")
                    .map(|v| v.trim_start_matches(['=', ' ']).to_string());
                if version.is_some() && lock_ver != version {
                    entry.insert("result".to_string(), json!(false));
                    entry.insert(
                        "comment".to_string(),
                        json!(format!(
                            "Unable to unhold package {} as it is held with the other version.",
                            target
                        )),
                    );
                } else {
                    removed.push(match lock_ver.as_deref() {
                        Some(v) if !v.is_empty() => format!("{}={}", target, v),
                        _ => target.clone(),
                    });
                    entry.insert("changes".to_string(), json!({"new": "", "old": "hold"}));
                    entry.insert(
                        "comment".to_string(),
                        json!(format!("Package {} is no longer held.", target)),
                    );
                }
            }
            None => {
                entry.insert(
                    "comment".to_string(),
                    json!(format!("Package {} was already unheld.", target)),
                );
            }
        }
        ret.insert(target, Value::Object(entry));
    }

    if !removed.is_empty() {
        let mut args = vec!["rl".to_string()];
        args.extend(removed);
        Zypper::new(context).root(root).call(&args).await?;
    }
    Ok(Value::Object(ret))
}

/// Anchored matcher for held names; alternations in `pattern` stay anchored.
fn hold_pattern(pattern: &str) -> ModuleResult<Regex> {
    Regex::new(&format!(r"^(?:{}-\S+)", pattern))
        .map_err(|e| ModuleError::Invocation(format!("Invalid pattern '{}': {}", pattern, e)))
}

/// Installed packages covered by a package lock, as `name-epoch:edition.*`
/// (or plain names when `full` is false), optionally filtered by `pattern`.
pub async fn list_holds(
    context: &ModuleContext,
    pattern: Option<&str>,
    full: bool,
    root: Option<&str>,
) -> ModuleResult<Vec<String>> {
    let locks = list_locks(context, root).await;
    let mut installed: IndexMap<String, Value> = IndexMap::new();

    for (solv_name, lock) in &locks {
        if lock.get("type").map(String::as_str).unwrap_or("package") != "package" {
            continue;
        }
        let options = SearchOptions {
            root: root.map(String::from),
            match_mode: if solv_name.contains('*') {
                None
            } else {
                Some("exact".to_string())
            },
            case_sensitive: lock
                .get("case_sensitive")
                .map(String::as_str)
                .unwrap_or("on")
                == "on",
            installed_only: true,
            details: true,
            ..SearchOptions::default()
        };
        let found = match search(context, solv_name, &options).await {
            Ok(found) => found,
            Err(e) => {
                debug!(lock = %solv_name, error = %e, "No installed package for lock");
                continue;
            }
        };
        for pkg in found.keys() {
            if installed.contains_key(pkg) {
                continue;
            }
            let info_options = InfoOptions {
                attr: Some(vec!["edition".to_string(), "epoch".to_string()]),
                all_versions: true,
                errors: None,
                root: root.map(String::from),
            };
            let info = info_installed(context, std::slice::from_ref(pkg), &info_options).await?;
            if let Value::Object(info) = info {
                installed.extend(info);
            }
        }
    }

    let pattern_re = pattern
        .filter(|p| !p.is_empty())
        .map(hold_pattern)
        .transpose()?;

    let mut ret: Vec<String> = Vec::new();
    for (pkg_name, editions) in &installed {
        let Some(editions) = editions.as_array() else {
            warn!(package = %pkg_name, "Unexpected package info shape");
            continue;
        };
        for info in editions {
            let held = if full {
                let epoch = info
                    .get("epoch")
                    .map(value_to_string)
                    .unwrap_or_else(|| "0".to_string());
                let edition = info.get("edition").map(value_to_string).unwrap_or_default();
                format!("{}-{}:{}.*", pkg_name, epoch, edition)
            } else {
                pkg_name.clone()
            };
            let matches = pattern_re.as_ref().map(|re| re.is_match(&held)).unwrap_or(true);
            if matches && !ret.contains(&held) {
                ret.push(held);
            }
        }
    }
    Ok(ret)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_hold_pattern_anchors_alternation() {
        let re = hold_pattern("emacs|vim").unwrap();
        assert!(re.is_match("vim-0:9.0-1.*"));
        assert!(re.is_match("emacs-0:29.1-1.*"));
        assert!(!re.is_match("gvim-0:9.0-1.*"));
        assert!(!re.is_match("vim"));

        let err = hold_pattern("vim(").unwrap_err();
        assert!(err.to_string().starts_with("Invalid pattern 'vim(':"));
    }

    const LOCKS_FILE: &str = "type: package\nmatch_type: glob\ncase_sensitive: on\nsolvable_name: vim\n\n\
type: package\nmatch_type: glob\ncase_sensitive: on\nsolvable_name: bash\nversion: = 5.1\n\n\
type: pattern\nsolvable_name: base\n";

    #[test]
    fn test_parse_locks() {
        let locks = parse_locks(LOCKS_FILE);
        assert_eq!(locks.keys().collect::<Vec<_>>(), vec!["vim", "bash", "base"]);
        assert_eq!(locks["bash"]["version"], "= 5.1");
        assert_eq!(locks["base"]["type"], "pattern");
        assert!(!locks["vim"].contains_key("solvable_name"));
    }

    #[test]
    fn test_parse_locks_empty() {
        assert!(parse_locks("").is_empty());
        assert!(parse_locks("type: package\n").is_empty());
    }

    #[test]
    fn test_hold_targets() {
        let err = hold_targets(None, None).unwrap_err();
        assert_eq!(err.to_string(), "Name or packages must be specified.");

        let pkgs = serde_json::json!(["vim", {"bash": "5.1"}]);
        assert_eq!(
            hold_targets(Some("ignored"), Some(&pkgs)).unwrap(),
            vec![
                ("vim".to_string(), None),
                ("bash".to_string(), Some("5.1".to_string()))
            ]
        );
        assert_eq!(
            hold_targets(Some("vim"), None).unwrap(),
            vec![("vim".to_string(), None)]
        );
    }
}
