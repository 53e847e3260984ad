//! Zypper backend for the `pkg` virtual module.
//!
//! Functions are grouped by what they touch:
//!
//! - [`packages`]: installed/available packages, install, upgrade, removal
//! - [`repos`]: repository definitions
//! - [`locks`]: package locks
//! - [`catalog`]: patterns, patches, products, search, downloads
//!
//! Every zypper invocation goes through [`caller::Zypper`].

pub mod caller;
pub mod catalog;
pub mod locks;
pub mod packages;
pub mod repos;
pub mod wildcard;

use crate::modules::lowpkg::{InfoOptions, RpmModule};
use crate::modules::{
    CallArgs, Module, ModuleContext, ModuleError, ModuleParams, ModuleResult, ParamExt,
};
use crate::pkg::rpm;
use async_trait::async_trait;
use catalog::SearchOptions;
use packages::{InstallOptions, ListPkgsOptions, UpgradeOptions};
use serde_json::{json, Value};
use tracing::debug;

/// Truthiness of an argument value: null, false, zero and empty values are false.
pub(crate) fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Shell-style glob match; an invalid pattern only matches itself.
pub(crate) fn fnmatch(name: &str, pattern: &str) -> bool {
    match glob::Pattern::new(pattern) {
        Ok(p) => p.matches(name),
        Err(_) => name == pattern,
    }
}

/// Drop cached package and provides lists after the package set changed.
pub(crate) fn clean_cache(context: &ModuleContext) {
    let removed = context.cache.clear_prefix("pkg.list_pkgs")
        + context.cache.clear_prefix("pkg.list_provides");
    debug!(removed, "Cleaned package caches");
}

/// Whether transactions should run in a systemd scope.
pub(crate) async fn systemd_scope(context: &ModuleContext) -> bool {
    context.config.zypper.systemd_scope && crate::systemd::has_scope(context).await
}

/// `pkg` published functions, aliases included.
pub const FUNCTIONS: &[&str] = &[
    "add_lock",
    "available_version",
    "clean_locks",
    "del_repo",
    "diff",
    "download",
    "file_dict",
    "file_list",
    "get_repo",
    "hold",
    "info_available",
    "info_installed",
    "install",
    "latest_version",
    "list_downloaded",
    "list_holds",
    "list_installed_patches",
    "list_installed_patterns",
    "list_locks",
    "list_patches",
    "list_patterns",
    "list_pkgs",
    "list_products",
    "list_provides",
    "list_repo_pkgs",
    "list_repos",
    "list_updates",
    "list_upgrades",
    "mod_repo",
    "modified",
    "normalize_name",
    "owner",
    "parse_arch",
    "purge",
    "refresh_db",
    "remove",
    "remove_lock",
    "resolve_capabilities",
    "search",
    "services_need_restart",
    "unhold",
    "upgrade",
    "upgrade_available",
    "verify",
    "version",
    "version_cmp",
];

/// Zypper implementation of `pkg`
#[derive(Debug, Default)]
pub struct ZypperModule;

fn required_name(params: &ModuleParams, key: &str) -> ModuleResult<String> {
    params
        .get_string(key)?
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ModuleError::MissingParameter(key.to_string()))
}

#[async_trait]
impl Module for ZypperModule {
    fn name(&self) -> &'static str {
        "pkg"
    }

    fn description(&self) -> &'static str {
        "Manage packages, repositories and locks with zypper"
    }

    fn functions(&self) -> &'static [&'static str] {
        FUNCTIONS
    }

    async fn is_available(&self, context: &ModuleContext) -> ModuleResult<()> {
        if !context.facts.is_suse() {
            return Err(ModuleError::Unavailable(
                "Module zypper: non SUSE OS not supported by zypper package manager".to_string(),
            ));
        }
        if !context.connection.which("zypper").await {
            return Err(ModuleError::Unavailable(
                "Module zypper: zypper package manager not found".to_string(),
            ));
        }
        Ok(())
    }

    async fn call(
        &self,
        function: &str,
        args: CallArgs,
        context: &ModuleContext,
    ) -> ModuleResult<Value> {
        let kwargs = &args.kwargs;
        let root_owned = context.root(kwargs)?;
        let root = root_owned.as_deref();
        let names = args.positional_strings();

        match function {
            "list_upgrades" | "list_updates" => {
                let params = args.bind(&["refresh"]);
                let refresh = params.get_bool_or("refresh", true);
                let fromrepo = params.get_vec_string("fromrepo")?.unwrap_or_default();
                let ret = packages::list_upgrades(context, refresh, &fromrepo, root).await?;
                Ok(json!(ret))
            }
            "info_installed" => {
                let options = InfoOptions::from_params(kwargs, root_owned.clone())?;
                packages::info_installed(context, &names, &options).await
            }
            "info_available" => {
                let refresh = kwargs.get_bool_or("refresh", true);
                let ret = packages::info_available(context, &names, refresh, root).await?;
                Ok(json!(ret))
            }
            "parse_arch" => {
                let params = args.bind(&["name"]);
                let name = required_name(&params, "name")?;
                let (name, arch) = rpm::parse_arch(&name);
                Ok(json!({"name": name, "arch": arch}))
            }
            "normalize_name" => {
                let params = args.bind(&["name"]);
                let name = required_name(&params, "name")?;
                Ok(json!(rpm::normalize_name(&name, &context.osarch())))
            }
            "latest_version" | "available_version" => {
                let refresh = kwargs.get_bool_or("refresh", true);
                packages::latest_version(context, &names, refresh, root).await
            }
            "upgrade_available" => {
                let params = args.bind(&["name"]);
                let name = required_name(&params, "name")?;
                let refresh = params.get_bool_or("refresh", true);
                let ret = packages::upgrade_available(context, &name, refresh, root).await?;
                Ok(json!(ret))
            }
            "version" => {
                let versions_as_list = kwargs.get_bool_or("versions_as_list", false);
                packages::version(context, &names, versions_as_list, root).await
            }
            "version_cmp" | "verify" | "file_list" | "file_dict" | "modified" | "owner" => {
                RpmModule.call(function, args.clone(), context).await
            }
            "list_pkgs" => {
                let params = args.bind(&["versions_as_list"]);
                let options = ListPkgsOptions::from_params(&params, root_owned.clone())?;
                packages::list_pkgs(context, &options).await
            }
            "list_repo_pkgs" => {
                let fromrepo = kwargs.get_string("fromrepo")?;
                let byrepo = kwargs.get_bool_or("byrepo", false);
                packages::list_repo_pkgs(context, &names, fromrepo.as_deref(), byrepo, root).await
            }
            "list_repos" => repos::list_repos(context, root).await,
            "get_repo" => {
                let params = args.bind(&["repo"]);
                let repo = required_name(&params, "repo")?;
                Ok(Value::Object(repos::get_repo(context, &repo, root).await?))
            }
            "del_repo" => {
                let params = args.bind(&["repo"]);
                let repo = required_name(&params, "repo")?;
                repos::del_repo(context, &repo, root).await
            }
            "mod_repo" => {
                let params = args.bind(&["repo"]);
                let repo = match params.get_string("repo")?.filter(|r| !r.is_empty()) {
                    Some(repo) => repo,
                    None => required_name(&params, "alias")?,
                };
                let mut options = kwargs.clone();
                options.remove("repo");
                repos::mod_repo(context, &repo, &options).await
            }
            "refresh_db" => {
                let params = args.bind(&["force"]);
                let force = params.get_bool("force")?;
                Ok(json!(packages::refresh_db(context, force, root).await?))
            }
            "install" => {
                let params = args.bind(&["name", "refresh", "fromrepo", "pkgs", "sources"]);
                let options = InstallOptions::from_params(&params, root_owned.clone())?;
                packages::install(context, &options).await
            }
            "upgrade" => {
                let params = args.bind(&["name", "pkgs", "refresh", "dryrun", "dist_upgrade", "fromrepo"]);
                let options = UpgradeOptions::from_params(&params, root_owned.clone())?;
                packages::upgrade(context, &options).await
            }
            "remove" | "purge" => {
                let params = args.bind(&["name", "pkgs"]);
                let name = params.get_string("name")?;
                packages::remove(context, name.as_deref(), params.get("pkgs"), root).await
            }
            "list_locks" => Ok(json!(locks::list_locks(context, root).await)),
            "clean_locks" => locks::clean_locks(context, root).await,
            "hold" | "add_lock" => {
                let params = args.bind(&["name", "pkgs"]);
                let name = params.get_string("name")?;
                locks::hold(context, name.as_deref(), params.get("pkgs"), root).await
            }
            "unhold" | "remove_lock" => {
                let params = args.bind(&["name", "pkgs"]);
                let name = params.get_string("name")?;
                locks::unhold(context, name.as_deref(), params.get("pkgs"), root).await
            }
            "list_holds" => {
                let params = args.bind(&["pattern", "full"]);
                let pattern = params.get_string("pattern")?;
                let full = params.get_bool_or("full", true);
                Ok(json!(locks::list_holds(context, pattern.as_deref(), full, root).await?))
            }
            "list_patterns" => {
                let params = args.bind(&["refresh"]);
                let refresh = params.get_bool_or("refresh", false);
                Ok(json!(catalog::list_patterns(context, refresh, root).await?))
            }
            "list_installed_patterns" => {
                Ok(json!(catalog::list_installed_patterns(context, root).await?))
            }
            "search" => {
                let params = args.bind(&["criteria", "refresh"]);
                let criteria = required_name(&params, "criteria")?;
                let options = SearchOptions::from_params(&params, root_owned.clone())?;
                Ok(json!(catalog::search(context, &criteria, &options).await?))
            }
            "list_products" => {
                let params = args.bind(&["all", "refresh"]);
                let all = params.get_bool_or("all", false);
                let refresh = params.get_bool_or("refresh", false);
                Ok(json!(catalog::list_products(context, all, refresh, root).await?))
            }
            "download" => {
                let refresh = kwargs.get_bool_or("refresh", false);
                catalog::download(context, &names, refresh, root).await
            }
            "list_downloaded" => catalog::list_downloaded(context, root).await,
            "diff" => catalog::diff(context, &names, root).await,
            "list_patches" => {
                let params = args.bind(&["refresh"]);
                let refresh = params.get_bool_or("refresh", false);
                Ok(json!(catalog::list_patches(context, refresh, root).await?))
            }
            "list_installed_patches" => {
                Ok(json!(catalog::list_installed_patches(context, root).await?))
            }
            "list_provides" => Ok(json!(catalog::list_provides(context, root).await?)),
            "resolve_capabilities" => {
                let params = args.bind(&["pkgs", "refresh"]);
                let pkgs = match params.get("pkgs") {
                    Some(Value::Array(pkgs)) => pkgs.clone(),
                    Some(Value::Null) | None => Vec::new(),
                    Some(other) => vec![other.clone()],
                };
                let refresh = params.get_bool_or("refresh", false);
                let resolve = params.get_bool_or("resolve_capabilities", false);
                let ret =
                    catalog::resolve_capabilities(context, &pkgs, resolve, refresh, root).await?;
                Ok(json!(ret))
            }
            "services_need_restart" => {
                Ok(json!(catalog::services_need_restart(context, root).await?))
            }
            other => Err(ModuleError::NotFound(format!("pkg.{}", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truthy() {
        assert!(!truthy(&json!(null)));
        assert!(!truthy(&json!("")));
        assert!(!truthy(&json!({})));
        assert!(!truthy(&json!(0)));
        assert!(truthy(&json!("1.0")));
        assert!(truthy(&json!(["a"])));
        assert!(truthy(&json!(true)));
    }

    #[test]
    fn test_fnmatch() {
        assert!(fnmatch("python3-foo", "python3-*"));
        assert!(fnmatch("1.2.3.4-1.1", "1.2.3*"));
        assert!(!fnmatch("1.3.0", "1.2*"));
        assert!(fnmatch("[broken", "[broken"));
    }

    #[test]
    fn test_function_list_sorted() {
        let mut sorted = FUNCTIONS.to_vec();
        sorted.sort_unstable();
        assert_eq!(sorted, FUNCTIONS);
    }
}
