//! Repository management: `list_repos`, `get_repo`, `del_repo`, `mod_repo`.
//!
//! Repository definitions are read straight from the `.repo` INI files zypper
//! keeps under `/etc/zypp/repos.d`; changes always go through zypper.

use super::caller::Zypper;
use super::truthy;
use crate::connection::rooted;
use crate::modules::{value_to_string, ModuleContext, ModuleError, ModuleParams, ModuleResult};
use futures::future::BoxFuture;
use futures::FutureExt;
use indexmap::IndexMap;
use serde_json::{Map, Value};
use tracing::{debug, warn};

pub const REPOS: &str = "/etc/zypp/repos.d";
pub const DEFAULT_PRIORITY: u32 = 99;

/// Sections of every `.repo` file, in file then section order.
pub type RepoSections = IndexMap<String, IndexMap<String, String>>;

/// Parse INI text into `sections`.
///
/// Keys are lower-cased. Indented lines continue the previous value.
pub fn parse_repo_ini(content: &str, sections: &mut RepoSections) {
    let mut current: Option<String> = None;
    let mut last_key: Option<String> = None;

    for raw in content.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }

        if line.starts_with('[') && line.ends_with(']') {
            let name = line[1..line.len() - 1].trim().to_string();
            sections.entry(name.clone()).or_default();
            current = Some(name);
            last_key = None;
            continue;
        }

        let Some(section) = current.as_ref().and_then(|s| sections.get_mut(s)) else {
            continue;
        };

        if raw.starts_with([' ', '\t']) {
            if let Some(value) = last_key.as_ref().and_then(|k| section.get_mut(k)) {
                value.push('\n');
                value.push_str(line);
                continue;
            }
        }

        let split = match (line.find('='), line.find(':')) {
            (Some(e), Some(c)) => Some(e.min(c)),
            (Some(e), None) => Some(e),
            (None, Some(c)) => Some(c),
            (None, None) => None,
        };
        if let Some(idx) = split {
            let key = line[..idx].trim().to_lowercase();
            let value = line[idx + 1..].trim().to_string();
            section.insert(key.clone(), value);
            last_key = Some(key);
        }
    }
}

/// Read every `.repo` file below `root`.
pub async fn configured_repos(
    context: &ModuleContext,
    root: Option<&str>,
) -> ModuleResult<RepoSections> {
    let dir = rooted(root, REPOS);
    let mut sections = RepoSections::new();
    let connection = &context.connection;

    if !connection.path_exists(&dir).await? {
        warn!("Repositories not found in {}", dir.display());
        return Ok(sections);
    }

    for path in connection.list_dir(&dir).await? {
        if path.extension().and_then(|e| e.to_str()) != Some("repo") {
            continue;
        }
        let content = connection.read_to_string(&path).await?;
        parse_repo_ini(&content, &mut sections);
    }
    Ok(sections)
}

/// One repository as a JSON object with `alias` added and flags typed.
pub fn repo_info(alias: &str, sections: &RepoSections) -> Map<String, Value> {
    let mut meta = Map::new();
    let Some(section) = sections.get(alias) else {
        return meta;
    };
    for (key, value) in section {
        meta.insert(key.clone(), Value::String(value.clone()));
    }
    meta.insert("alias".to_string(), Value::String(alias.to_string()));

    for value in meta.values_mut() {
        let typed = match value.as_str() {
            Some("0") => Value::Bool(false),
            Some("1") => Value::Bool(true),
            Some("NONE") => Value::Null,
            _ => continue,
        };
        *value = typed;
    }
    meta
}

/// Display one repository; `{}` when it does not exist.
pub async fn get_repo(
    context: &ModuleContext,
    repo: &str,
    root: Option<&str>,
) -> ModuleResult<Map<String, Value>> {
    let sections = configured_repos(context, root).await?;
    Ok(repo_info(repo, &sections))
}

/// Every configured repository keyed by alias.
pub async fn list_repos(context: &ModuleContext, root: Option<&str>) -> ModuleResult<Value> {
    let sections = configured_repos(context, root).await?;
    let mut all = Map::new();
    for alias in sections.keys() {
        all.insert(alias.clone(), Value::Object(repo_info(alias, &sections)));
    }
    Ok(Value::Object(all))
}

/// Remove a repository with `zypper rr`.
pub async fn del_repo(context: &ModuleContext, repo: &str, root: Option<&str>) -> ModuleResult<Value> {
    let sections = configured_repos(context, root).await?;
    if sections.contains_key(repo) {
        let out = Zypper::new(context)
            .root(root)
            .xml()
            .call(&["rr", "--loose-auth", "--loose-query", repo])
            .await?;
        let doc = out.doc()?;
        let messages = doc.elements_by_tag("message");
        if !doc.elements_by_tag("progress").is_empty() {
            if let Some(first) = messages.first() {
                let mut ret = Map::new();
                ret.insert(repo.to_string(), Value::Bool(true));
                ret.insert(
                    "message".to_string(),
                    Value::String(first.first_text().unwrap_or_default().to_string()),
                );
                return Ok(Value::Object(ret));
            }
        }
    }
    Err(ModuleError::command(format!(
        "Repository '{}' not found.",
        repo
    )))
}

fn parse_repo_url(url: &str) -> Option<url::Url> {
    url::Url::parse(url).ok().filter(|u| !u.scheme().is_empty())
}

/// Modify a repository, adding it first when it does not exist.
///
/// A changed `baseurl` cannot be edited in place, so the repository is
/// removed and added again with its merged settings.
pub fn mod_repo<'a>(
    context: &'a ModuleContext,
    repo: &'a str,
    kwargs: &'a ModuleParams,
) -> BoxFuture<'a, ModuleResult<Value>> {
    async move {
        let root_owned = context.root(kwargs)?;
        let root = root_owned.as_deref();
        let mut sections = configured_repos(context, root).await?;
        let mut added = false;

        if !sections.contains_key(repo) {
            let url = ["url", "mirrorlist", "baseurl"]
                .iter()
                .find_map(|key| kwargs.get(*key))
                .map(value_to_string)
                .unwrap_or_default();
            if url.is_empty() {
                return Err(ModuleError::command(format!(
                    "Repository '{}' not found, and neither 'baseurl' nor 'mirrorlist' was specified",
                    repo
                )));
            }
            let Some(new_url) = parse_repo_url(&url) else {
                return Err(ModuleError::command(format!(
                    "Repository '{}' not found and URL for baseurl/mirrorlist is malformed",
                    repo
                )));
            };

            for alias in sections.keys() {
                let meta = repo_info(alias, &sections);
                let Some(base) = meta.get("baseurl").and_then(Value::as_str) else {
                    continue;
                };
                if parse_repo_url(base).as_ref() == Some(&new_url) {
                    return Err(ModuleError::command(format!(
                        "Repository '{}' already exists as '{}'.",
                        repo, alias
                    )));
                }
            }

            Zypper::new(context)
                .root(root)
                .xml()
                .call(&["ar", url.as_str(), repo])
                .await?;

            sections = configured_repos(context, root).await?;
            if !sections.contains_key(repo) {
                return Err(ModuleError::command(format!(
                    "Failed add new repository '{}' for unspecified reason. Please check zypper logs.",
                    repo
                )));
            }
            added = true;
        }

        let mut info = repo_info(repo, &sections);
        if !added {
            if let Some(baseurl) = kwargs.get("baseurl") {
                if info.get("baseurl") != Some(baseurl) {
                    debug!(repo = %repo, "baseurl changed, re-adding repository");
                    for (key, value) in kwargs {
                        info.insert(key.clone(), value.clone());
                    }
                    info.entry("cache").or_insert(Value::Bool(false));
                    del_repo(context, repo, root).await?;
                    let merged: ModuleParams = info.into_iter().collect();
                    return mod_repo(context, repo, &merged).await;
                }
            }
        }

        let mut cmd_opt: Vec<String> = Vec::new();
        let mut global_cmd_opt: Vec<String> = Vec::new();
        let mut call_refresh = false;

        let flag = |key: &str, on: &str, off: &str| -> Option<String> {
            kwargs
                .get(key)
                .map(|v| if truthy(v) { on } else { off }.to_string())
        };
        cmd_opt.extend(flag("enabled", "--enable", "--disable"));
        cmd_opt.extend(flag("refresh", "--refresh", "--no-refresh"));
        cmd_opt.extend(flag("cache", "--keep-packages", "--no-keep-packages"));
        cmd_opt.extend(flag("gpgcheck", "--gpgcheck", "--no-gpgcheck"));

        if let Some(priority) = kwargs.get("priority") {
            let priority = match priority {
                Value::Null => DEFAULT_PRIORITY.to_string(),
                other => value_to_string(other),
            };
            cmd_opt.push(format!("--priority={}", priority));
        }
        if let Some(humanname) = kwargs.get("humanname") {
            warn!("Passing 'humanname' to 'mod_repo' is deprecated. Please use 'name' instead.");
            cmd_opt.push(format!("--name='{}'", value_to_string(humanname)));
        }
        if let Some(name) = kwargs.get("name") {
            cmd_opt.push("--name".to_string());
            cmd_opt.push(value_to_string(name));
        }
        if kwargs.get("gpgautoimport") == Some(&Value::Bool(true)) {
            global_cmd_opt.push("--gpg-auto-import-keys".to_string());
            call_refresh = true;
        }

        if !cmd_opt.is_empty() {
            let mut args = global_cmd_opt.clone();
            args.push("mr".to_string());
            args.extend(cmd_opt.iter().cloned());
            args.push(repo.to_string());
            Zypper::new(context)
                .root(root)
                .refreshable()
                .xml()
                .call(&args)
                .await?;
        }

        let mut comment = None;
        if call_refresh {
            // `--gpg-auto-import-keys` only takes effect on an explicit refresh
            let mut args = global_cmd_opt.clone();
            args.push("refresh".to_string());
            args.push(repo.to_string());
            Zypper::new(context).root(root).refreshable().xml().call(&args).await?;
        } else if !added && cmd_opt.is_empty() {
            comment = Some("Specified arguments did not result in modification of repo");
        }

        let mut ret = get_repo(context, repo, root).await?;
        if let Some(comment) = comment {
            ret.insert("comment".to_string(), Value::String(comment.to_string()));
        }
        Ok(Value::Object(ret))
    }
    .boxed()
}
