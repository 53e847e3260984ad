//! Catalog queries: patterns, patches, products, search, downloads and
//! capability lookups.

use super::caller::Zypper;
use super::packages::refresh_db;
use super::truthy;
use crate::connection::rooted;
use crate::modules::lowpkg;
use crate::modules::{value_to_string, ModuleContext, ModuleError, ModuleParams, ModuleResult, ParamExt};
use crate::pkg::rpm::iso_utc;
use crate::xml::Element;
use indexmap::IndexMap;
use serde_json::{json, Map, Value};
use std::path::Path;
use tracing::{debug, warn};

/// Visible or installed pattern/patch: `{installed, summary}`.
pub type SolvableSummary = IndexMap<String, Value>;

fn summaries(solvables: Vec<&Element>, installed_only: bool) -> SolvableSummary {
    let mut out = IndexMap::new();
    for element in solvables {
        let installed = element.attr("status") == Some("installed");
        if installed_only && !installed {
            continue;
        }
        out.insert(
            element.attr_or_empty("name").to_string(),
            json!({"installed": installed, "summary": element.attr_or_empty("summary")}),
        );
    }
    out
}

async fn visible_patterns(context: &ModuleContext, root: Option<&str>) -> ModuleResult<SolvableSummary> {
    let out = Zypper::new(context)
        .root(root)
        .nolock()
        .xml()
        .call(&["se", "-t", "pattern"])
        .await?;
    Ok(summaries(out.doc()?.elements_by_tag("solvable"), false))
}

/// Patterns zypper can see.
pub async fn list_patterns(
    context: &ModuleContext,
    refresh: bool,
    root: Option<&str>,
) -> ModuleResult<SolvableSummary> {
    if refresh {
        refresh_db(context, None, root).await?;
    }
    visible_patterns(context, root).await
}

/// Name from a `pattern() = name` capability line.
fn pattern_name(capability: &str) -> &str {
    capability.rsplit('=').next().unwrap_or_default().trim()
}

/// Installed patterns, including the ones zypper search cannot see.
///
/// Non-visible patterns are found through the `pattern()` capability of the
/// installed pattern packages.
pub async fn list_installed_patterns(
    context: &ModuleContext,
    root: Option<&str>,
) -> ModuleResult<SolvableSummary> {
    let argv = lowpkg::rpm_argv(root, &["-q", "--provides", "--whatprovides", "pattern()"]);
    // rpm exits 1 when nothing provides pattern(); that is not an error here
    let output = context.connection.execute(&argv, None).await?;

    let mut installed: Vec<String> = Vec::new();
    for line in output.stdout.lines() {
        if !line.starts_with("pattern() = ") {
            continue;
        }
        let name = pattern_name(line);
        // Aliased duplicates on older releases start with a dot
        if name.starts_with('.') || installed.iter().any(|n| n == name) {
            continue;
        }
        installed.push(name.to_string());
    }

    let mut patterns: SolvableSummary = visible_patterns(context, root)
        .await?
        .into_iter()
        .filter(|(_, v)| v["installed"] == Value::Bool(true))
        .collect();
    for name in installed {
        patterns
            .entry(name)
            .or_insert_with(|| json!({"installed": true, "summary": "Non-visible pattern"}));
    }
    Ok(patterns)
}

async fn patches(
    context: &ModuleContext,
    installed_only: bool,
    root: Option<&str>,
) -> ModuleResult<SolvableSummary> {
    let out = Zypper::new(context)
        .root(root)
        .nolock()
        .xml()
        .call(&["se", "-t", "patch"])
        .await?;
    Ok(summaries(out.doc()?.elements_by_tag("solvable"), installed_only))
}

pub async fn list_patches(
    context: &ModuleContext,
    refresh: bool,
    root: Option<&str>,
) -> ModuleResult<SolvableSummary> {
    if refresh {
        refresh_db(context, None, root).await?;
    }
    patches(context, false, root).await
}

pub async fn list_installed_patches(
    context: &ModuleContext,
    root: Option<&str>,
) -> ModuleResult<SolvableSummary> {
    patches(context, true, root).await
}

/// Switches accepted by [`search`], in the order zypper receives them.
pub const SEARCH_OPTIONS: &[(&str, &str)] = &[
    ("provides", "--provides"),
    ("recommends", "--recommends"),
    ("requires", "--requires"),
    ("suggests", "--suggests"),
    ("conflicts", "--conflicts"),
    ("obsoletes", "--obsoletes"),
    ("file_list", "--file-list"),
    ("search_descriptions", "--search-descriptions"),
    ("case_sensitive", "--case-sensitive"),
    ("installed_only", "--installed-only"),
    ("not_installed_only", "-u"),
    ("details", "--details"),
];

/// Options of [`search`]
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub root: Option<String>,
    pub refresh: bool,
    /// `exact`, `words` or `substrings`
    pub match_mode: Option<String>,
    pub provides: bool,
    pub recommends: bool,
    pub requires: bool,
    pub suggests: bool,
    pub conflicts: bool,
    pub obsoletes: bool,
    pub file_list: bool,
    pub search_descriptions: bool,
    pub case_sensitive: bool,
    pub installed_only: bool,
    pub not_installed_only: bool,
    pub details: bool,
}

impl SearchOptions {
    pub fn from_params(params: &ModuleParams, root: Option<String>) -> ModuleResult<Self> {
        let flag = |key: &str| params.get(key).map(truthy).unwrap_or(false);
        Ok(Self {
            root,
            refresh: flag("refresh"),
            match_mode: params.get_string("match")?,
            provides: flag("provides"),
            recommends: flag("recommends"),
            requires: flag("requires"),
            suggests: flag("suggests"),
            conflicts: flag("conflicts"),
            obsoletes: flag("obsoletes"),
            file_list: flag("file_list"),
            search_descriptions: flag("search_descriptions"),
            case_sensitive: flag("case_sensitive"),
            installed_only: flag("installed_only"),
            not_installed_only: flag("not_installed_only"),
            details: flag("details"),
        })
    }

    fn enabled(&self, option: &str) -> bool {
        match option {
            "provides" => self.provides,
            "recommends" => self.recommends,
            "requires" => self.requires,
            "suggests" => self.suggests,
            "conflicts" => self.conflicts,
            "obsoletes" => self.obsoletes,
            "file_list" => self.file_list,
            "search_descriptions" => self.search_descriptions,
            "case_sensitive" => self.case_sensitive,
            "installed_only" => self.installed_only,
            "not_installed_only" => self.not_installed_only,
            "details" => self.details,
            _ => false,
        }
    }

    /// `search` argv for `criteria`
    pub fn args(&self, criteria: &str) -> Vec<String> {
        let mut cmd = vec!["search".to_string()];
        match self.match_mode.as_deref() {
            Some("exact") => cmd.push("--match-exact".to_string()),
            Some("words") => cmd.push("--match-words".to_string()),
            Some("substrings") => cmd.push("--match-substrings".to_string()),
            _ => {}
        }
        for (option, switch) in SEARCH_OPTIONS {
            if self.enabled(option) {
                cmd.push((*switch).to_string());
            }
        }
        cmd.push(criteria.to_string());
        cmd
    }
}

/// Search packages; every solvable is reported with all its attributes.
pub async fn search(
    context: &ModuleContext,
    criteria: &str,
    options: &SearchOptions,
) -> ModuleResult<IndexMap<String, Map<String, Value>>> {
    let root = options.root.as_deref();
    if options.refresh {
        refresh_db(context, None, root).await?;
    }

    let out = Zypper::new(context)
        .root(root)
        .nolock()
        .noraise()
        .xml()
        .call(&options.args(criteria))
        .await?;
    let doc = out.doc()?;
    let solvables = doc.elements_by_tag("solvable");
    if solvables.is_empty() {
        return Err(ModuleError::command(format!(
            "No packages found matching '{}'",
            criteria
        )));
    }

    let mut found = IndexMap::new();
    for solvable in solvables {
        let attrs: Map<String, Value> = solvable
            .attributes
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        found.insert(solvable.attr_or_empty("name").to_string(), attrs);
    }
    Ok(found)
}

const OEM_PATH: &str = "/var/lib/suseRegister/OEM";

/// Installed (or, with `all`, every known) product.
pub async fn list_products(
    context: &ModuleContext,
    all: bool,
    refresh: bool,
    root: Option<&str>,
) -> ModuleResult<Vec<Map<String, Value>>> {
    if refresh {
        refresh_db(context, None, root).await?;
    }
    let oem_path = rooted(root, OEM_PATH);

    let mut cmd = Vec::new();
    if !all {
        cmd.push("--disable-repositories");
    }
    cmd.push("products");
    if !all {
        cmd.push("-i");
    }

    let out = Zypper::new(context).root(root).nolock().xml().call(&cmd).await?;
    let doc = out.doc()?;
    let Some(product_list) = doc.elements_by_tag("product-list").into_iter().next() else {
        return Ok(Vec::new());
    };

    let mut ret = Vec::new();
    for product in product_list.elements_by_tag("product") {
        let mut info = Map::new();
        for (key, value) in &product.attributes {
            if key == "isbase" || key == "installed" {
                info.insert(key.clone(), json!(value == "true" || value == "1"));
            } else if !value.is_empty() {
                info.insert(key.clone(), json!(value));
            }
        }

        if let Some(eol) = product.elements_by_tag("endoflife").first() {
            info.insert("eol".to_string(), json!(eol.attr_or_empty("text")));
            let eol_t: i64 = eol.attr("time_t").and_then(|t| t.parse().ok()).unwrap_or(0);
            info.insert("eol_t".to_string(), json!(eol_t));
        }

        let description = product
            .elements_by_tag("description")
            .first()
            .map(|d| d.text())
            .unwrap_or_default();
        let description: Vec<&str> = description.split('\n').map(str::trim).collect();
        info.insert("description".to_string(), json!(description.join(" ")));

        if let Some(productline) = info
            .get("productline")
            .and_then(Value::as_str)
            .filter(|p| !p.is_empty())
            .map(String::from)
        {
            let oem_file = oem_path.join(&productline);
            if let Ok(content) = context.connection.read_to_string(&oem_file).await {
                let release = content.lines().next().unwrap_or_default().trim();
                if !release.is_empty() {
                    info.insert("release".to_string(), json!(release));
                }
            }
        }
        ret.push(info);
    }
    Ok(ret)
}

/// Download packages to the zypper cache and keep those whose signature
/// verifies.
pub async fn download(
    context: &ModuleContext,
    packages: &[String],
    refresh: bool,
    root: Option<&str>,
) -> ModuleResult<Value> {
    if packages.is_empty() {
        return Err(ModuleError::Invocation("No packages specified".to_string()));
    }
    if refresh {
        refresh_db(context, None, root).await?;
    }

    let mut args = vec!["download".to_string()];
    args.extend(packages.iter().cloned());
    let out = Zypper::new(context).root(root).xml().call(&args).await?;

    let mut pkg_ret = Map::new();
    for result in out.doc()?.elements_by_tag("download-result") {
        let repo = result.elements_by_tag("repository");
        let localfile = result.elements_by_tag("localfile");
        let (Some(repo), Some(localfile)) = (repo.first(), localfile.first()) else {
            warn!("Incomplete download result");
            continue;
        };
        let path = localfile.attr_or_empty("path").to_string();
        let key = result
            .elements_by_tag("name")
            .first()
            .map(|n| n.text())
            .unwrap_or_default();

        let verified = lowpkg::checksum(context, std::slice::from_ref(&path), root)
            .await?
            .get(&path)
            .copied()
            .unwrap_or(false);
        if verified {
            pkg_ret.insert(
                key,
                json!({
                    "repository-name": repo.attr_or_empty("name"),
                    "repository-alias": repo.attr_or_empty("alias"),
                    "path": path,
                }),
            );
        } else {
            debug!(path = %path, "Downloaded package failed verification");
        }
    }

    if pkg_ret.is_empty() {
        return Err(ModuleError::command(format!(
            "Unable to download packages: {}",
            packages.join(", ")
        )));
    }

    let failed: Vec<&str> = packages
        .iter()
        .filter(|p| !pkg_ret.contains_key(p.as_str()))
        .map(String::as_str)
        .collect();
    if !failed.is_empty() {
        pkg_ret.insert(
            "_error".to_string(),
            json!(format!(
                "The following package(s) failed to download: {}",
                failed.join(", ")
            )),
        );
    }
    Ok(Value::Object(pkg_ret))
}

const CACHE_DIR: &str = "/var/cache/zypp/packages/";

/// Packages sitting in the zypper package cache.
pub async fn list_downloaded(context: &ModuleContext, root: Option<&str>) -> ModuleResult<Value> {
    let cache_dir = rooted(root, CACHE_DIR);
    let mut ret = Map::new();

    for path in context.connection.walk_files(&cache_dir).await? {
        if path.extension().and_then(|e| e.to_str()) != Some("rpm") {
            continue;
        }
        let path_str = path.to_string_lossy().to_string();
        let Some(info) = lowpkg::bin_pkg_info(context, &path_str).await? else {
            warn!(path = %path_str, "Unable to read cached package");
            continue;
        };
        let stat = context.connection.stat(&path).await?;

        let versions = ret
            .entry(info.name.clone())
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(versions) = versions {
            versions.insert(
                info.version.clone(),
                json!({
                    "path": path_str,
                    "size": stat.size,
                    "creation_date_time_t": stat.ctime,
                    "creation_date_time": iso_utc(stat.ctime, false),
                }),
            );
        }
    }
    Ok(Value::Object(ret))
}

/// Diff live files against the copies in their owning packages.
pub async fn diff(context: &ModuleContext, paths: &[String], root: Option<&str>) -> ModuleResult<Value> {
    let mut ret = Map::new();
    let mut pkg_to_paths: IndexMap<String, Vec<String>> = IndexMap::new();

    for path in paths {
        let owner = lowpkg::owner_of(context, path, root).await?;
        if owner.is_empty() {
            let exists = context.connection.path_exists(Path::new(path)).await?;
            ret.insert(
                path.clone(),
                json!(if exists { "Not managed" } else { "N/A" }),
            );
        } else {
            pkg_to_paths.entry(owner).or_default().push(path.clone());
        }
    }

    if !pkg_to_paths.is_empty() {
        let packages: Vec<String> = pkg_to_paths.keys().cloned().collect();
        let local = download(context, &packages, false, root).await?;
        for (pkg, files) in &pkg_to_paths {
            let Some(pkg_path) = local
                .get(pkg)
                .and_then(|p| p.get("path"))
                .and_then(Value::as_str)
            else {
                for file in files {
                    ret.insert(file.clone(), json!("N/A"));
                }
                continue;
            };
            for file in files {
                let changes = lowpkg::diff(context, pkg_path, file).await?;
                let value = if changes.is_empty() {
                    "Unchanged".to_string()
                } else {
                    changes
                };
                ret.insert(file.clone(), json!(value));
            }
        }
    }
    Ok(Value::Object(ret))
}

const PROVIDES_KEY: &str = "pkg.list_provides";

/// Map of capability to the packages providing it.
pub async fn list_provides(
    context: &ModuleContext,
    root: Option<&str>,
) -> ModuleResult<IndexMap<String, Vec<String>>> {
    if let Some(cached) = context.cache.get(PROVIDES_KEY) {
        if let Ok(provides) = serde_json::from_value::<IndexMap<String, Vec<String>>>(cached) {
            if !provides.is_empty() {
                return Ok(provides);
            }
        }
    }

    let argv = lowpkg::rpm_argv(root, &["-qa", "--queryformat", "%{PROVIDES}_|-%{NAME}\n"]);
    let output = context.connection.execute(&argv, None).await?;

    let mut ret: IndexMap<String, Vec<String>> = IndexMap::new();
    for line in output.stdout.lines() {
        let Some((provide, realname)) = line.split_once("_|-") else {
            continue;
        };
        if provide == realname {
            continue;
        }
        ret.entry(provide.to_string())
            .or_default()
            .push(realname.to_string());
    }

    context.cache.insert(PROVIDES_KEY, json!(ret));
    Ok(ret)
}

/// Replace capability names by the single package providing them.
pub async fn resolve_capabilities(
    context: &ModuleContext,
    pkgs: &[Value],
    resolve: bool,
    refresh: bool,
    root: Option<&str>,
) -> ModuleResult<Vec<Value>> {
    if refresh {
        refresh_db(context, None, root).await?;
    }

    let mut ret = Vec::with_capacity(pkgs.len());
    for pkg in pkgs {
        let (mut name, version) = match pkg {
            Value::Object(map) => match map.iter().next() {
                Some((k, v)) => (k.clone(), Some(value_to_string(v)).filter(|v| !v.is_empty())),
                None => continue,
            },
            other => (value_to_string(other), None),
        };

        if resolve {
            let exact = SearchOptions {
                root: root.map(String::from),
                match_mode: Some("exact".to_string()),
                ..SearchOptions::default()
            };
            if search(context, &name, &exact).await.is_err() {
                let provides = SearchOptions {
                    provides: true,
                    ..exact
                };
                match search(context, &name, &provides).await {
                    Ok(result) if result.len() == 1 => {
                        if let Some(provider) = result.keys().next() {
                            name = provider.clone();
                        }
                    }
                    Ok(result) if result.len() > 1 => {
                        warn!("Found ambiguous match for capability '{}'.", name);
                    }
                    Ok(_) => {}
                    Err(e) => debug!("Search failed with: {}", e),
                }
            }
        }

        ret.push(match version {
            Some(v) => json!({ name: v }),
            None => json!(name),
        });
    }
    Ok(ret)
}

/// Services `zypper ps` says need a restart.
pub async fn services_need_restart(
    context: &ModuleContext,
    root: Option<&str>,
) -> ModuleResult<Vec<String>> {
    let out = Zypper::new(context)
        .root(root)
        .nolock()
        .call(&["ps", "-sss"])
        .await?;
    Ok(out.stdout.split_whitespace().map(String::from).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_name() {
        assert_eq!(pattern_name("pattern() = base"), "base");
        assert_eq!(pattern_name("pattern() = microos_defaults "), "microos_defaults");
    }

    #[test]
    fn test_search_args() {
        let options = SearchOptions {
            match_mode: Some("exact".to_string()),
            details: true,
            installed_only: true,
            case_sensitive: true,
            ..SearchOptions::default()
        };
        assert_eq!(
            options.args("vim"),
            vec![
                "search",
                "--match-exact",
                "--case-sensitive",
                "--installed-only",
                "--details",
                "vim"
            ]
        );

        let mut params = ModuleParams::new();
        params.insert("provides".to_string(), json!(true));
        params.insert("not_installed_only".to_string(), json!(false));
        params.insert("match".to_string(), json!("words"));
        let options = SearchOptions::from_params(&params, None).unwrap();
        assert_eq!(
            options.args("libc.so.6"),
            vec!["search", "--match-words", "--provides", "libc.so.6"]
        );
    }
}
