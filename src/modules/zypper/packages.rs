//! Installed and available packages: queries, install, upgrade and removal.

use super::caller::{is_success_code, Zypper};
use super::catalog::{list_downloaded, list_installed_patches, list_installed_patterns, list_patches, list_products};
use super::{clean_cache, fnmatch, systemd_scope, truthy, wildcard};
use crate::modules::lowpkg::{self, rpm_argv, InfoOptions};
use crate::modules::{value_to_string, ModuleContext, ModuleError, ModuleParams, ModuleResult, ParamExt};
use crate::pkg::rpm::{parse_pkginfo, version_cmp, QUERYFORMAT};
use crate::pkg::version::sort_versions;
use crate::pkg::{
    clear_rtag, compare_dicts, format_pkg_list, parse_targets, split_comparison, AttrSelection,
    PkgAttrs, PkgList, TargetArgs, TargetKind,
};
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;
use tracing::{debug, info, trace, warn};

/// Targets handed to zypper per invocation.
pub const BATCH_SIZE: usize = 500;

/// Packages per `zypper info` call.
pub const INFO_BATCH_SIZE: usize = 200;

static INFO_SPLIT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Information for package*").expect("Invalid info split regex"));

static DOWNGRADE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^The selected package '([^']+)'.+has lower version")
        .expect("Invalid downgrade regex")
});

/// Available updates as `{name: edition}`.
pub async fn list_upgrades(
    context: &ModuleContext,
    refresh: bool,
    fromrepo: &[String],
    root: Option<&str>,
) -> ModuleResult<IndexMap<String, String>> {
    if refresh {
        refresh_db(context, None, root).await?;
    }

    let mut cmd = vec!["list-updates".to_string()];
    for repo in fromrepo {
        cmd.push("--repo".to_string());
        cmd.push(repo.clone());
    }
    if !fromrepo.is_empty() {
        debug!(repos = ?fromrepo, "Targeting repos");
    }

    let out = Zypper::new(context).root(root).nolock().xml().call(&cmd).await?;
    let mut ret = IndexMap::new();
    for update in out.doc()?.elements_by_tag("update") {
        if update.attr("kind") == Some("package") {
            ret.insert(
                update.attr_or_empty("name").to_string(),
                update.attr_or_empty("edition").to_string(),
            );
        }
    }
    Ok(ret)
}

/// `lowpkg.info` with `source_rpm` reported as `source`.
pub async fn info_installed(
    context: &ModuleContext,
    names: &[String],
    options: &InfoOptions,
) -> ModuleResult<Value> {
    fn translate(record: &Value) -> Value {
        match record {
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| {
                        let key = if k == "source_rpm" { "source" } else { k.as_str() };
                        (key.to_string(), v.clone())
                    })
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    let info = lowpkg::info(context, names, options).await?;
    let mut ret = Map::new();
    if let Value::Object(info) = info {
        for (name, records) in info {
            let translated = match &records {
                Value::Array(list) => Value::Array(list.iter().map(translate).collect()),
                single => translate(single),
            };
            ret.insert(name, translated);
        }
    }
    Ok(Value::Object(ret))
}

/// Parse `zypper info` output into `{name: {field: value}}`.
pub fn parse_info_output(output: &str) -> IndexMap<String, Map<String, Value>> {
    let mut ret = IndexMap::new();
    for chunk in INFO_SPLIT.split(output) {
        let mut nfo = Map::new();
        for line in chunk.split('\n').filter(|l| l.contains(':')) {
            if line.starts_with("-----") {
                continue;
            }
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim();
            if !value.is_empty() {
                nfo.insert(key.trim().to_lowercase(), json!(value));
            }
        }

        let Some(name) = nfo.remove("name").and_then(|n| n.as_str().map(String::from)) else {
            continue;
        };
        if name.is_empty() {
            continue;
        }
        if let Some(installed) = nfo.get("installed").and_then(Value::as_str) {
            let installed = installed.to_lowercase().starts_with("yes");
            nfo.insert("installed".to_string(), json!(installed));
        }
        ret.insert(name, nfo);
    }
    ret
}

fn sorted_unique(names: &[String]) -> Vec<String> {
    names
        .iter()
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// What zypper knows about packages available to this host.
pub async fn info_available(
    context: &ModuleContext,
    names: &[String],
    refresh: bool,
    root: Option<&str>,
) -> ModuleResult<IndexMap<String, Map<String, Value>>> {
    if names.is_empty() {
        return Ok(IndexMap::new());
    }
    let names = sorted_unique(names);

    if refresh {
        refresh_db(context, None, root).await?;
    }

    let mut output = String::new();
    for batch in names.chunks(INFO_BATCH_SIZE) {
        let mut args = vec!["info".to_string(), "-t".to_string(), "package".to_string()];
        args.extend(batch.iter().cloned());
        let out = Zypper::new(context).root(root).nolock().call(&args).await?;
        output.push_str(&out.stdout);
        output.push('\n');
    }
    trace!(length = output.len(), "zypper info output");
    Ok(parse_info_output(&output))
}

/// Newest installable version per name; `""` when already up to date.
///
/// A single name returns a bare string.
pub async fn latest_version(
    context: &ModuleContext,
    names: &[String],
    refresh: bool,
    root: Option<&str>,
) -> ModuleResult<Value> {
    if names.is_empty() {
        return Ok(json!({}));
    }
    let names = sorted_unique(names);
    let package_info = info_available(context, &names, refresh, root).await?;

    let mut ret = Map::new();
    for name in &names {
        let info = package_info.get(name);
        let status = info
            .and_then(|i| i.get("status"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_lowercase();
        let value = if status.contains("not installed") || status.contains("out-of-date") {
            info.and_then(|i| i.get("version")).cloned().unwrap_or(Value::Null)
        } else {
            json!("")
        };
        ret.insert(name.clone(), value);
    }

    if names.len() == 1 {
        if let Some(value) = ret.remove(&names[0]) {
            return Ok(value);
        }
    }
    Ok(Value::Object(ret))
}

pub async fn upgrade_available(
    context: &ModuleContext,
    name: &str,
    refresh: bool,
    root: Option<&str>,
) -> ModuleResult<bool> {
    let latest = latest_version(context, &[name.to_string()], refresh, root).await?;
    Ok(truthy(&latest))
}

/// Options of [`list_pkgs`]
#[derive(Debug, Clone)]
pub struct ListPkgsOptions {
    pub versions_as_list: bool,
    pub root: Option<String>,
    /// Extra solvable kinds: `product`, `pattern`, `patch`
    pub includes: Vec<String>,
    pub attr: Option<AttrSelection>,
    pub removed: bool,
    pub purge_desired: bool,
    pub use_context: bool,
}

impl Default for ListPkgsOptions {
    fn default() -> Self {
        Self {
            versions_as_list: false,
            root: None,
            includes: Vec::new(),
            attr: None,
            removed: false,
            purge_desired: false,
            use_context: true,
        }
    }
}

impl ListPkgsOptions {
    pub fn from_params(params: &ModuleParams, root: Option<String>) -> ModuleResult<Self> {
        Ok(Self {
            versions_as_list: params.get_bool_or("versions_as_list", false),
            root,
            includes: params.get_vec_string("includes")?.unwrap_or_default(),
            attr: AttrSelection::from_value(params.get("attr")),
            removed: params.get_bool_or("removed", false),
            purge_desired: params.get_bool_or("purge_desired", false),
            use_context: params.get_bool_or("use_context", true),
        })
    }

    fn context_key(&self) -> String {
        format!(
            "pkg.list_pkgs_{}_{:?}",
            self.root.as_deref().unwrap_or("None"),
            self.includes
        )
    }
}

fn split_pkgver(full: &str) -> (Option<String>, String, Option<String>) {
    let (epoch, rest) = match full.split_once(':') {
        Some((e, r)) => (Some(e.to_string()), r),
        None => (None, full),
    };
    match rest.split_once('-') {
        Some((v, r)) => (epoch, v.to_string(), Some(r.to_string())),
        None => (epoch, rest.to_string(), None),
    }
}

/// Parse `rpm -qa` output in [`QUERYFORMAT`] into a package list.
///
/// `gpg-pubkey` pseudo packages are dropped and every package's entries are
/// sorted by rpm order of `version-release`.
pub fn parse_rpm_list(output: &str, osarch: &str) -> PkgList {
    let mut pkgs: PkgList = IndexMap::new();
    for line in output.lines() {
        let Some(info) = parse_pkginfo(line, osarch) else {
            continue;
        };
        let (epoch, version, release) = split_pkgver(&info.version);
        pkgs.entry(info.name).or_default().push(PkgAttrs {
            epoch,
            version: Some(version),
            release,
            arch: Some(info.arch),
            install_date: info.install_date,
            install_date_time_t: info.install_date_time_t,
        });
    }

    pkgs.retain(|name, _| !name.starts_with("gpg-pubkey"));
    for entries in pkgs.values_mut() {
        entries.sort_by(|a, b| version_cmp(&edition(a), &edition(b), false));
    }
    pkgs
}

fn edition(attrs: &PkgAttrs) -> String {
    let version = attrs.version.as_deref().unwrap_or_default();
    match attrs.release.as_deref() {
        Some(release) => format!("{}-{}", version, release),
        None => version.to_string(),
    }
}

fn include_entry(version: Option<String>, arch: Option<String>) -> PkgAttrs {
    PkgAttrs {
        version,
        arch,
        ..PkgAttrs::default()
    }
}

async fn add_includes(
    context: &ModuleContext,
    pkgs: &mut PkgList,
    includes: &[String],
    root: Option<&str>,
) -> ModuleResult<()> {
    let field = |map: &Map<String, Value>, key: &str| {
        map.get(key)
            .map(value_to_string)
            .filter(|v| !v.is_empty())
    };

    for include in includes {
        match include.as_str() {
            "product" => {
                for product in list_products(context, false, false, root).await? {
                    let name = product.get("name").map(value_to_string).unwrap_or_default();
                    pkgs.insert(
                        format!("product:{}", name),
                        vec![PkgAttrs {
                            epoch: field(&product, "epoch"),
                            version: field(&product, "version"),
                            release: field(&product, "release"),
                            arch: field(&product, "arch"),
                            install_date: None,
                            install_date_time_t: None,
                        }],
                    );
                }
            }
            "pattern" | "patch" => {
                let elements = if include == "pattern" {
                    list_installed_patterns(context, root).await?
                } else {
                    list_installed_patches(context, root).await?
                };
                for element in elements.keys() {
                    let extended = format!("{}:{}", include, element);
                    let info =
                        info_available(context, std::slice::from_ref(&extended), false, root).await?;
                    let Some(info) = info.get(element) else {
                        warn!(solvable = %extended, "No information available");
                        continue;
                    };
                    pkgs.insert(
                        extended,
                        vec![include_entry(field(info, "version"), field(info, "arch"))],
                    );
                }
            }
            other => debug!(include = %other, "Ignoring unknown include type"),
        }
    }
    Ok(())
}

/// Installed packages, cached per root and include set.
pub async fn list_pkgs(context: &ModuleContext, options: &ListPkgsOptions) -> ModuleResult<Value> {
    if options.removed || options.purge_desired {
        return Ok(json!({}));
    }

    let key = options.context_key();
    if options.use_context {
        if let Some(cached) = context.cache.get(&key) {
            match serde_json::from_value::<PkgList>(cached) {
                Ok(pkgs) => {
                    return Ok(format_pkg_list(
                        &pkgs,
                        options.versions_as_list,
                        options.attr.as_ref(),
                    ))
                }
                Err(e) => debug!(key = %key, error = %e, "Discarding unreadable cache entry"),
            }
        }
    }

    let root = options.root.as_deref();
    let query = format!("{}\n", QUERYFORMAT.replace("%{REPOID}", "(none)"));
    let argv = rpm_argv(root, &["-qa", "--queryformat", query.as_str()]);
    let output = context.connection.execute(&argv, None).await?;
    trace!(length = output.stdout.len(), "rpm -qa output");

    let mut pkgs = parse_rpm_list(&output.stdout, &context.osarch());
    add_includes(context, &mut pkgs, &options.includes, root).await?;

    context.cache.insert(key, json!(pkgs));
    Ok(format_pkg_list(
        &pkgs,
        options.versions_as_list,
        options.attr.as_ref(),
    ))
}

async fn installed(
    context: &ModuleContext,
    root: Option<&str>,
    includes: &[String],
    attr: Option<&AttrSelection>,
) -> ModuleResult<Value> {
    let options = ListPkgsOptions {
        root: root.map(String::from),
        includes: includes.to_vec(),
        attr: attr.cloned(),
        ..ListPkgsOptions::default()
    };
    list_pkgs(context, &options).await
}

/// Installed version of each name; a single name returns a string.
///
/// Names may be globs. A name that is not installed yields `{}`.
pub async fn version(
    context: &ModuleContext,
    names: &[String],
    versions_as_list: bool,
    root: Option<&str>,
) -> ModuleResult<Value> {
    let mut ret = Map::new();
    let mut pkg_glob = false;

    if !names.is_empty() {
        let options = ListPkgsOptions {
            versions_as_list: true,
            root: root.map(String::from),
            ..ListPkgsOptions::default()
        };
        let pkgs = list_pkgs(context, &options).await?;
        let empty = Map::new();
        let pkgs = pkgs.as_object().unwrap_or(&empty);

        for name in names {
            if name.contains('*') {
                pkg_glob = true;
                for (pkg, versions) in pkgs {
                    if fnmatch(pkg, name) {
                        ret.insert(pkg.clone(), versions.clone());
                    }
                }
            } else {
                ret.insert(name.clone(), pkgs.get(name).cloned().unwrap_or_else(|| json!([])));
            }
        }
    }

    if !versions_as_list {
        for value in ret.values_mut() {
            if let Value::Array(list) = value {
                let joined: Vec<String> = list.iter().map(value_to_string).collect();
                *value = json!(joined.join(","));
            }
        }
    }

    let result = if ret.len() == 1 && !pkg_glob {
        ret.into_iter().next().map(|(_, v)| v).unwrap_or_else(|| json!(""))
    } else {
        Value::Object(ret)
    };
    if truthy(&result) {
        Ok(result)
    } else {
        Ok(json!({}))
    }
}

/// Every version the repositories offer, newest first.
///
/// `globs` filters on package names; `byrepo` groups the result per
/// repository.
pub async fn list_repo_pkgs(
    context: &ModuleContext,
    globs: &[String],
    fromrepo: Option<&str>,
    byrepo: bool,
    root: Option<&str>,
) -> ModuleResult<Value> {
    let fromrepo = fromrepo.filter(|r| !r.is_empty());
    let is_match = |name: &str| globs.is_empty() || globs.iter().any(|g| fnmatch(name, g));

    let mut args = vec!["se".to_string(), "-s".to_string()];
    args.extend(globs.iter().cloned());
    let out = Zypper::new(context).root(root).xml().call(&args).await?;

    let mut found: IndexMap<String, IndexMap<String, BTreeSet<String>>> = IndexMap::new();
    for solvable in out.doc()?.elements_by_tag("solvable") {
        let (Some(kind), Some(repo), Some(name), Some(edition)) = (
            solvable.attr("kind"),
            solvable.attr("repository"),
            solvable.attr("name"),
            solvable.attr("edition"),
        ) else {
            continue;
        };
        if kind != "package" || fromrepo.is_some_and(|r| r != repo) || !is_match(name) {
            continue;
        }
        found
            .entry(repo.to_string())
            .or_default()
            .entry(name.to_string())
            .or_default()
            .insert(edition.to_string());
    }

    let newest_first = |versions: Vec<String>| -> Value {
        let mut versions = versions;
        sort_versions(&mut versions);
        versions.reverse();
        json!(versions)
    };

    let mut ret = Map::new();
    if byrepo {
        for (repo, pkgs) in found {
            let mut per_repo = Map::new();
            for (name, versions) in pkgs {
                per_repo.insert(name, newest_first(versions.into_iter().collect()));
            }
            ret.insert(repo, Value::Object(per_repo));
        }
    } else {
        let mut merged: IndexMap<String, Vec<String>> = IndexMap::new();
        for pkgs in found.into_values() {
            for (name, versions) in pkgs {
                merged.entry(name).or_default().extend(versions);
            }
        }
        for (name, versions) in merged {
            ret.insert(name, newest_first(versions));
        }
    }
    Ok(Value::Object(ret))
}

/// Parse `zypper refresh` output into `{repo: refreshed}`.
pub fn parse_refresh_output(output: &str) -> IndexMap<String, bool> {
    let mut ret = IndexMap::new();
    for line in output.lines().filter(|l| !l.is_empty()) {
        let trimmed = line.trim();
        let Some(key) = line.split('\'').nth(1).map(str::trim) else {
            continue;
        };
        if trimmed.starts_with("Repository") && line.contains("is up to date") {
            ret.insert(key.to_string(), false);
        } else if trimmed.starts_with("Building") && line.contains("done") {
            ret.insert(key.to_string(), true);
        }
    }
    ret
}

/// Refresh the repositories; `force` defaults to `zypper.refreshdb_force`.
pub async fn refresh_db(
    context: &ModuleContext,
    force: Option<bool>,
    root: Option<&str>,
) -> ModuleResult<IndexMap<String, bool>> {
    clear_rtag(&context.config.agent.cachedir).await?;

    let mut args = vec!["refresh"];
    if force.unwrap_or(context.config.zypper.refreshdb_force) {
        args.push("--force");
    }
    let out = Zypper::new(context).root(root).refreshable().call(&args).await?;
    Ok(parse_refresh_output(&out.stdout))
}

/// Solvable kinds named by `kind:name` targets, sorted and unique.
pub fn find_types<S: AsRef<str>>(targets: &[S]) -> Vec<String> {
    targets
        .iter()
        .filter_map(|t| t.as_ref().split_once(':').map(|(kind, _)| kind.to_string()))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Options of [`install`]
#[derive(Debug, Clone, Default)]
pub struct InstallOptions {
    pub name: Option<String>,
    pub refresh: bool,
    pub fromrepo: Option<String>,
    pub pkgs: Option<Value>,
    pub sources: Option<Value>,
    pub downloadonly: bool,
    pub skip_verify: bool,
    pub version: Option<String>,
    pub ignore_repo_failure: bool,
    pub no_recommends: bool,
    pub root: Option<String>,
    pub resolve_capabilities: bool,
    pub diff_attr: Option<AttrSelection>,
    pub advisory_ids: Option<Value>,
}

impl InstallOptions {
    pub fn from_params(params: &ModuleParams, root: Option<String>) -> ModuleResult<Self> {
        Ok(Self {
            name: params.get_string("name")?,
            refresh: params.get_bool_or("refresh", false),
            fromrepo: params.get_string("fromrepo")?.filter(|r| !r.is_empty()),
            pkgs: params.get("pkgs").filter(|v| !v.is_null()).cloned(),
            sources: params.get("sources").filter(|v| !v.is_null()).cloned(),
            downloadonly: params.get_bool_or("downloadonly", false),
            skip_verify: params.get_bool_or("skip_verify", false),
            version: params.get_string("version")?.filter(|v| !v.is_empty()),
            ignore_repo_failure: params.get_bool_or("ignore_repo_failure", false),
            no_recommends: params.get_bool_or("no_recommends", false),
            root,
            resolve_capabilities: params.get_bool_or("resolve_capabilities", false),
            diff_attr: AttrSelection::from_value(params.get("diff_attr")),
            advisory_ids: params.get("advisory_ids").filter(|v| !v.is_null()).cloned(),
        })
    }

    /// `install` argv without targets
    pub fn command(&self) -> Vec<String> {
        let mut cmd = vec!["install".to_string(), "--auto-agree-with-licenses".to_string()];
        cmd.push(if self.resolve_capabilities { "--capability" } else { "--name" }.to_string());
        if !self.refresh {
            cmd.insert(0, "--no-refresh".to_string());
        }
        if self.skip_verify {
            cmd.insert(0, "--no-gpg-checks".to_string());
        }
        if self.downloadonly {
            cmd.push("--download-only".to_string());
        }
        if let Some(repo) = &self.fromrepo {
            cmd.extend([
                "--force".to_string(),
                "--force-resolution".to_string(),
                "--from".to_string(),
                repo.clone(),
            ]);
        }
        if self.no_recommends {
            cmd.push("--no-recommends".to_string());
        }
        cmd
    }
}

async fn snapshot(
    context: &ModuleContext,
    downloadonly: bool,
    root: Option<&str>,
    includes: &[String],
    attr: Option<&AttrSelection>,
) -> ModuleResult<Value> {
    if downloadonly {
        list_downloaded(context, root).await
    } else {
        installed(context, root, includes, attr).await
    }
}

/// Install packages, files or patches and report what changed.
pub async fn install(context: &ModuleContext, options: &InstallOptions) -> ModuleResult<Value> {
    let root = options.root.as_deref();
    if options.refresh {
        refresh_db(context, None, root).await?;
    }

    let osarch = context.osarch();
    let parsed = parse_targets(TargetArgs {
        name: options.name.as_deref(),
        pkgs: options.pkgs.as_ref(),
        sources: options.sources.as_ref(),
        advisory_ids: options.advisory_ids.as_ref(),
        osarch: Some(&osarch),
    })
    .map_err(|e| ModuleError::command(e.to_string()))?;
    let Some(parsed) = parsed else {
        return Ok(json!({}));
    };
    let mut params = parsed.params;

    if options.version.is_some() {
        match options.name.as_deref() {
            Some(name) if options.pkgs.is_none() && options.sources.is_none() => {
                if let Some(resolved) =
                    wildcard::resolve(context, name, options.version.as_deref(), root).await?
                {
                    params = IndexMap::from([(name.to_string(), Some(resolved))]);
                }
            }
            _ => warn!("\"version\" parameter will be ignored for multiple package targets"),
        }
    }

    let mut targets: Vec<String> = Vec::with_capacity(params.len());
    match parsed.kind {
        TargetKind::Repository => {
            for (param, version) in &params {
                let target = match version {
                    Some(version) => {
                        let (prefix, verstr) = split_comparison(version);
                        let prefix = if prefix.is_empty() { "=" } else { prefix.as_str() };
                        format!("{}{}{}", param, prefix, verstr)
                    }
                    None => param.clone(),
                };
                debug!(target = %target, "targeting package");
                targets.push(target);
            }
        }
        TargetKind::Advisory => {
            let patches = list_patches(context, false, root).await?;
            for advisory in params.keys() {
                if !patches.contains_key(advisory) {
                    return Err(ModuleError::command(format!(
                        "Advisory id \"{}\" not found",
                        advisory
                    )));
                }
                targets.push(advisory.clone());
            }
        }
        TargetKind::File => targets.extend(params.keys().cloned()),
    }

    let includes = find_types(&targets);
    let diff_attr = options.diff_attr.as_ref();
    let old = snapshot(context, options.downloadonly, root, &includes, diff_attr).await?;

    if let Some(repo) = &options.fromrepo {
        info!("Targeting repo '{}'", repo);
    }
    let cmd_install = options.command();

    // patch: is added this late so the includes above only see real packages
    if parsed.kind == TargetKind::Advisory {
        targets = targets.into_iter().map(|t| format!("patch:{}", t)).collect();
    }

    let scope = systemd_scope(context).await;
    let mut downgrades = Vec::new();
    for batch in targets.chunks(BATCH_SIZE) {
        let mut cmd = cmd_install.clone();
        cmd.extend(batch.iter().cloned());
        let out = Zypper::new(context)
            .no_repo_failure(options.ignore_repo_failure)
            .systemd_scope(scope)
            .root(root)
            .call(&cmd)
            .await?;
        for line in out.stdout.lines() {
            if let Some(caps) = DOWNGRADE.captures(line) {
                downgrades.push(caps[1].to_string());
            }
        }
    }

    for batch in downgrades.chunks(BATCH_SIZE) {
        let mut cmd = cmd_install.clone();
        cmd.push("--force".to_string());
        cmd.extend(batch.iter().cloned());
        Zypper::new(context)
            .no_repo_failure(options.ignore_repo_failure)
            .root(root)
            .call(&cmd)
            .await?;
    }

    clean_cache(context);
    let new = snapshot(context, options.downloadonly, root, &includes, diff_attr).await?;
    let ret = compare_dicts(&old, &new);

    if !includes.is_empty() {
        clean_cache(context);
    }
    Ok(ret)
}

/// Options of [`upgrade`]
#[derive(Debug, Clone)]
pub struct UpgradeOptions {
    pub name: Option<String>,
    pub pkgs: Option<Value>,
    pub refresh: bool,
    pub dryrun: bool,
    pub dist_upgrade: bool,
    pub fromrepo: Vec<String>,
    pub novendorchange: bool,
    pub skip_verify: bool,
    pub no_recommends: bool,
    pub root: Option<String>,
    pub diff_attr: Option<AttrSelection>,
}

impl Default for UpgradeOptions {
    fn default() -> Self {
        Self {
            name: None,
            pkgs: None,
            refresh: true,
            dryrun: false,
            dist_upgrade: false,
            fromrepo: Vec::new(),
            novendorchange: false,
            skip_verify: false,
            no_recommends: false,
            root: None,
            diff_attr: None,
        }
    }
}

impl UpgradeOptions {
    pub fn from_params(params: &ModuleParams, root: Option<String>) -> ModuleResult<Self> {
        Ok(Self {
            name: params.get_string("name")?,
            pkgs: params.get("pkgs").filter(|v| !v.is_null()).cloned(),
            refresh: params.get_bool_or("refresh", true),
            dryrun: params.get_bool_or("dryrun", false),
            dist_upgrade: params.get_bool_or("dist_upgrade", false),
            fromrepo: params.get_vec_string("fromrepo")?.unwrap_or_default(),
            novendorchange: params.get_bool_or("novendorchange", false),
            skip_verify: params.get_bool_or("skip_verify", false),
            no_recommends: params.get_bool_or("no_recommends", false),
            root,
            diff_attr: AttrSelection::from_value(params.get("diff_attr")),
        })
    }
}

/// Upgrade packages (or the distribution) and report what changed.
///
/// A dry run returns zypper's own report instead.
pub async fn upgrade(context: &ModuleContext, options: &UpgradeOptions) -> ModuleResult<Value> {
    let root = options.root.as_deref();
    let mut cmd = vec![
        if options.dist_upgrade { "dist-upgrade" } else { "update" }.to_string(),
        "--auto-agree-with-licenses".to_string(),
    ];
    if options.skip_verify {
        // --no-gpg-checks is a global option and goes before the command
        cmd.insert(0, "--no-gpg-checks".to_string());
    }

    if options.refresh {
        refresh_db(context, None, root).await?;
    }
    if options.dryrun {
        cmd.push("--dry-run".to_string());
    }
    for repo in &options.fromrepo {
        cmd.push(if options.dist_upgrade { "--from" } else { "--repo" }.to_string());
        cmd.push(repo.clone());
    }
    if !options.fromrepo.is_empty() {
        info!("Targeting repos: {:?}", options.fromrepo);
    }

    let scope = systemd_scope(context).await;
    if options.dist_upgrade {
        if options.novendorchange {
            if context.facts.os_major_release().is_some_and(|major| major > 11) {
                cmd.push("--no-allow-vendor-change".to_string());
                info!("Disabling vendor changes");
            } else {
                warn!("Disabling vendor changes is not supported on this Zypper version");
            }
        }
        if options.no_recommends {
            cmd.push("--no-recommends".to_string());
            info!("Disabling recommendations");
        }
        if options.dryrun {
            info!("Executing debugsolver and performing a dry-run dist-upgrade");
            let mut debug_cmd = cmd.clone();
            debug_cmd.push("--debug-solver".to_string());
            Zypper::new(context)
                .systemd_scope(scope)
                .root(root)
                .noraise()
                .call(&debug_cmd)
                .await?;
        }
    } else if options.name.is_some() || options.pkgs.is_some() {
        let osarch = context.osarch();
        let parsed = parse_targets(TargetArgs {
            name: options.name.as_deref(),
            pkgs: options.pkgs.as_ref(),
            osarch: Some(&osarch),
            ..TargetArgs::default()
        })
        .map_err(|e| ModuleError::command(e.to_string()))?;
        if let Some(parsed) = parsed {
            cmd.extend(parsed.params.into_keys());
        }
    }

    let diff_attr = options.diff_attr.as_ref();
    let old = installed(context, root, &[], diff_attr).await?;
    let out = Zypper::new(context)
        .systemd_scope(scope)
        .root(root)
        .noraise()
        .call(&cmd)
        .await?;
    clean_cache(context);
    let new = installed(context, root, &[], diff_attr).await?;
    let ret = compare_dicts(&old, &new);

    if !is_success_code(out.exit_code) {
        return Err(ModuleError::command_with_info(
            "Problem encountered upgrading packages",
            json!({
                "changes": ret,
                "result": {
                    "retcode": out.exit_code,
                    "stdout": out.stdout,
                    "stderr": out.stderr,
                    "pid": out.pid,
                },
            }),
        ));
    }

    if options.dryrun {
        return Ok(json!(format!("{}\n{}", out.stdout, out.stderr).trim()));
    }
    Ok(ret)
}

/// Uninstall packages; `remove` and `purge` behave the same with zypper.
pub async fn remove(
    context: &ModuleContext,
    name: Option<&str>,
    pkgs: Option<&Value>,
    root: Option<&str>,
) -> ModuleResult<Value> {
    let osarch = context.osarch();
    let parsed = parse_targets(TargetArgs {
        name,
        pkgs,
        osarch: Some(&osarch),
        ..TargetArgs::default()
    })
    .map_err(|e| ModuleError::command(e.to_string()))?;
    let params = parsed.map(|p| p.params).unwrap_or_default();

    let includes = find_types(&params.keys().collect::<Vec<_>>());
    let old = installed(context, root, &includes, None).await?;

    let mut targets = Vec::new();
    for (target, version) in &params {
        let Some(current) = old.get(target).map(value_to_string) else {
            continue;
        };
        match version.as_deref().filter(|v| !v.is_empty()) {
            Some(version) if current.split(',').any(|v| v == version) => {
                targets.push(format!("{}-{}", target, version));
            }
            Some(_) => debug!(target = %target, "Requested version is not installed"),
            None => targets.push(target.clone()),
        }
    }
    if targets.is_empty() {
        return Ok(json!({}));
    }

    let scope = systemd_scope(context).await;
    for batch in targets.chunks(BATCH_SIZE) {
        let mut args = vec!["remove".to_string()];
        args.extend(batch.iter().cloned());
        Zypper::new(context)
            .systemd_scope(scope)
            .root(root)
            .call(&args)
            .await?;
    }

    clean_cache(context);
    let new = installed(context, root, &includes, None).await?;
    Ok(compare_dicts(&old, &new))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_find_types() {
        let targets = ["vim", "patch:SUSE-2023-1", "pattern:base", "patch:SUSE-2023-2"];
        assert_eq!(find_types(&targets), vec!["patch", "pattern"]);
        assert!(find_types(&["vim", "bash"]).is_empty());
    }

    #[test]
    fn test_parse_info_output() {
        let output = "Loading repository data...\nReading installed packages...\n\n\
Information for package vim:\n----------------------------\n\
Repository     : Main Update Repository\nName           : vim\n\
Version        : 9.0.1894-150000.5.54.1\nArch           : x86_64\n\
Vendor         : SUSE LLC <https://www.suse.com/>\nInstalled      : Yes (automatically)\n\
Status         : out-of-date (version 9.0.1632-150000.5.51.1 installed)\n\
Summary        : Vi IMproved\n\n\
Information for package emacs:\n-----------------------------\n\
Name           : emacs\nVersion        : 27.2-150400.3.6.1\nInstalled      : No\n\
Status         : not installed\nDescription    : \n";
        let info = parse_info_output(output);
        assert_eq!(info.keys().collect::<Vec<_>>(), vec!["vim", "emacs"]);
        assert_eq!(info["vim"]["installed"], json!(true));
        assert_eq!(info["vim"]["vendor"], json!("SUSE LLC <https://www.suse.com/>"));
        assert_eq!(info["vim"]["repository"], json!("Main Update Repository"));
        assert_eq!(info["emacs"]["installed"], json!(false));
        assert!(!info["emacs"].contains_key("description"));
        assert!(!info["vim"].contains_key("name"));
    }

    #[test]
    fn test_parse_refresh_output() {
        let output = "Repository 'Main Repository' is up to date.\n\
Retrieving repository 'Update' metadata ...[done]\n\
Building repository 'Update' cache ..........[done]\n\
All repositories have been refreshed.\n";
        let ret = parse_refresh_output(output);
        assert_eq!(ret.get("Main Repository"), Some(&false));
        assert_eq!(ret.get("Update"), Some(&true));
        assert_eq!(ret.len(), 2);
    }

    #[test]
    fn test_parse_rpm_list() {
        let output = "bash_|-(none)_|-5.1_|-150000.1_|-x86_64_|-(none)_|-1700000000\n\
gpg-pubkey_|-(none)_|-39db7c82_|-5f68629b_|-(none)_|-(none)_|-1700000000\n\
kernel-default_|-(none)_|-5.14.21_|-150500.55.39.1_|-x86_64_|-(none)_|-1700000100\n\
kernel-default_|-(none)_|-5.14.21_|-150500.55.31.1_|-x86_64_|-(none)_|-1700000000\n\
glibc_|-(none)_|-2.31_|-150300.1_|-i586_|-(none)_|-1700000000\n\
perl-Foo_|-1_|-2.0_|-3_|-noarch_|-(none)_|-0\n";
        let pkgs = parse_rpm_list(output, "x86_64");

        assert!(!pkgs.contains_key("gpg-pubkey"));
        assert_eq!(pkgs["bash"][0].version.as_deref(), Some("5.1"));
        assert_eq!(pkgs["bash"][0].release.as_deref(), Some("150000.1"));
        assert_eq!(pkgs["kernel-default"].len(), 2);
        assert!(pkgs.contains_key("glibc.i586"));
        assert_eq!(pkgs["perl-Foo"][0].epoch.as_deref(), Some("1"));
        assert_eq!(pkgs["perl-Foo"][0].install_date, None);
    }

    #[test]
    fn test_parse_rpm_list_orders_by_rpm_version() {
        let output = "java-devel_|-(none)_|-10.0_|-1.1_|-x86_64_|-(none)_|-1700000000\n\
java-devel_|-(none)_|-9.0_|-2.1_|-x86_64_|-(none)_|-1700000000\n\
java-devel_|-(none)_|-9.0_|-10.1_|-x86_64_|-(none)_|-1700000000\n";
        let pkgs = parse_rpm_list(output, "x86_64");

        let editions: Vec<String> = pkgs["java-devel"].iter().map(edition).collect();
        assert_eq!(editions, vec!["9.0-2.1", "9.0-10.1", "10.0-1.1"]);
    }

    #[test]
    fn test_install_command() {
        let options = InstallOptions {
            skip_verify: true,
            downloadonly: true,
            fromrepo: Some("updates".to_string()),
            no_recommends: true,
            ..InstallOptions::default()
        };
        assert_eq!(
            options.command(),
            vec![
                "--no-gpg-checks",
                "--no-refresh",
                "install",
                "--auto-agree-with-licenses",
                "--name",
                "--download-only",
                "--force",
                "--force-resolution",
                "--from",
                "updates",
                "--no-recommends",
            ]
        );

        let options = InstallOptions {
            refresh: true,
            resolve_capabilities: true,
            ..InstallOptions::default()
        };
        assert_eq!(
            options.command(),
            vec!["install", "--auto-agree-with-licenses", "--capability"]
        );
    }

    #[test]
    fn test_context_key() {
        let options = ListPkgsOptions {
            includes: vec!["pattern".to_string()],
            ..ListPkgsOptions::default()
        };
        assert_eq!(options.context_key(), "pkg.list_pkgs_None_[\"pattern\"]");

        let options = ListPkgsOptions {
            root: Some("/mnt".to_string()),
            ..ListPkgsOptions::default()
        };
        assert_eq!(options.context_key(), "pkg.list_pkgs_/mnt_[]");
    }
}
