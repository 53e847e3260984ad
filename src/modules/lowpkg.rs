//! Low-level RPM functions published as `lowpkg.*`.
//!
//! Everything here talks to `rpm` directly and never to zypper, so these
//! functions work on any RPM based host and inside a `--root`.

use crate::modules::{
    CallArgs, Module, ModuleContext, ModuleError, ModuleParams, ModuleResult, ParamExt,
};
use crate::pkg::format_version;
use crate::pkg::rpm::{self, iso_utc, PkgInfo, QUERYFORMAT};
use async_trait::async_trait;
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Map, Value};
use similar::TextDiff;
use std::cmp::Ordering;
use std::path::Path;
use tracing::{debug, trace, warn};

/// `rpm --queryformat` fragment for every attribute `info` can report.
///
/// `description` runs to the end of the record, so it is always queried last.
const INFO_ATTRS: &[(&str, &str)] = &[
    ("name", "name: %{NAME}\n"),
    ("relocations", "relocations: %|PREFIXES?{[%{PREFIXES} ]}:{(not relocatable)}|\n"),
    ("version", "version: %{VERSION}\n"),
    ("vendor", "vendor: %{VENDOR}\n"),
    ("release", "release: %{RELEASE}\n"),
    ("epoch", "%|EPOCH?{epoch: %{EPOCH}\n}|"),
    ("build_date_time_t", "build_date_time_t: %{BUILDTIME}\n"),
    ("build_date", "build_date: %{BUILDTIME}\n"),
    (
        "install_date_time_t",
        "install_date_time_t: %|INSTALLTIME?{%{INSTALLTIME}}:{(not installed)}|\n",
    ),
    (
        "install_date",
        "install_date: %|INSTALLTIME?{%{INSTALLTIME}}:{(not installed)}|\n",
    ),
    ("build_host", "build_host: %{BUILDHOST}\n"),
    ("group", "group: %{GROUP}\n"),
    ("source_rpm", "source_rpm: %{SOURCERPM}\n"),
    ("size", "size: %{LONGSIZE}\n"),
    ("arch", "arch: %{ARCH}\n"),
    ("license", "%|LICENSE?{license: %{LICENSE}\n}|"),
    (
        "signature",
        "signature: %|DSAHEADER?{%{DSAHEADER:pgpsig}}:{%|RSAHEADER?{%{RSAHEADER:pgpsig}}:{%|SIGGPG?{%{SIGGPG:pgpsig}}:{%|SIGPGP?{%{SIGPGP:pgpsig}}:{(none)}|}|}|}|\n",
    ),
    ("packager", "%|PACKAGER?{packager: %{PACKAGER}\n}|"),
    ("url", "%|URL?{url: %{URL}\n}|"),
    ("summary", "summary: %{SUMMARY}\n"),
    ("edition", "edition: %|EPOCH?{%{EPOCH}:}|%{VERSION}-%{RELEASE}\n"),
    ("description", "description:\n%{DESCRIPTION}\n"),
];

const RECORD_SEPARATOR: &str = "-----";

const BROKEN_FIELD: &str = "N/A (broken)";

/// Options of [`info`]
#[derive(Debug, Clone, Default)]
pub struct InfoOptions {
    /// Attributes to report; `None` reports all of them
    pub attr: Option<Vec<String>>,
    /// Report every installed version as a list
    pub all_versions: bool,
    /// `report` or `ignore` for fields rpm could not decode
    pub errors: Option<String>,
    pub root: Option<String>,
}

impl InfoOptions {
    pub fn from_params(params: &ModuleParams, root: Option<String>) -> ModuleResult<Self> {
        Ok(Self {
            attr: params.get_vec_string("attr")?.filter(|a| !a.is_empty()),
            all_versions: params.get_bool_or("all_versions", false),
            errors: params.get_string("errors")?,
            root,
        })
    }

    fn queryformat(&self) -> String {
        let mut query: String = INFO_ATTRS
            .iter()
            .filter(|(name, _)| match &self.attr {
                Some(attr) => *name == "name" || attr.iter().any(|a| a == name),
                None => true,
            })
            .map(|(_, fragment)| *fragment)
            .collect();
        query.push_str(RECORD_SEPARATOR);
        query.push('\n');
        query
    }
}

/// `rpm [--root R] <args>`
pub fn rpm_argv<S: AsRef<str>>(root: Option<&str>, args: &[S]) -> Vec<String> {
    let mut argv = vec!["rpm".to_string()];
    if let Some(root) = root.filter(|r| !r.is_empty()) {
        argv.push("--root".to_string());
        argv.push(root.to_string());
    }
    argv.extend(args.iter().map(|a| a.as_ref().to_string()));
    argv
}

fn clean_field(value: &str, errors: Option<&str>) -> String {
    if !value.contains('\u{FFFD}') {
        return value.to_string();
    }
    match errors {
        Some("report") => BROKEN_FIELD.to_string(),
        Some("ignore") => value.replace('\u{FFFD}', ""),
        _ => value.to_string(),
    }
}

/// Parse one `info` record into its fields.
fn parse_info_record(record: &str, errors: Option<&str>) -> Map<String, Value> {
    let mut data = Map::new();
    let mut description: Option<Vec<&str>> = None;

    for line in record.lines() {
        if let Some(lines) = description.as_mut() {
            lines.push(line);
            continue;
        }
        if line == "description:" {
            description = Some(Vec::new());
            continue;
        }
        let Some((key, value)) = line.split_once(": ") else {
            continue;
        };
        let value = clean_field(value.trim(), errors);
        let value = match key {
            "build_date" | "install_date" => match value.parse::<i64>() {
                Ok(ts) => json!(iso_utc(ts, true)),
                Err(_) => json!(value),
            },
            "build_date_time_t" | "install_date_time_t" => match value.parse::<i64>() {
                Ok(ts) => json!(ts),
                Err(_) => json!(value),
            },
            _ => json!(value),
        };
        data.insert(key.to_string(), value);
    }

    if let Some(lines) = description {
        let text = lines.join("\n");
        data.insert(
            "description".to_string(),
            json!(clean_field(text.trim_end(), errors)),
        );
    }
    data
}

fn record_edition(record: &Map<String, Value>) -> String {
    if let Some(edition) = record.get("edition").and_then(Value::as_str) {
        return edition.to_string();
    }
    format_version(
        record.get("epoch").and_then(Value::as_str),
        record.get("version").and_then(Value::as_str),
        record.get("release").and_then(Value::as_str),
    )
}

/// Detailed information about installed packages, keyed by name.
///
/// Without `all_versions` each name maps to its newest installed version.
pub async fn info(
    context: &ModuleContext,
    packages: &[String],
    options: &InfoOptions,
) -> ModuleResult<Value> {
    let query = options.queryformat();
    let mut args = vec![
        if packages.is_empty() { "-qa" } else { "-q" }.to_string(),
        "--queryformat".to_string(),
        query,
    ];
    args.extend(packages.iter().cloned());
    let argv = rpm_argv(options.root.as_deref(), &args);

    let output = context.connection.execute(&argv, None).await?;
    if !output.success && output.stdout.trim().is_empty() {
        debug!(stderr = %output.stderr.trim(), "rpm info query returned nothing");
    }
    trace!(length = output.stdout.len(), "rpm info output");

    let keep_name = match &options.attr {
        Some(attr) => attr.iter().any(|a| a == "name"),
        None => true,
    };

    let mut ret: IndexMap<String, Vec<Map<String, Value>>> = IndexMap::new();
    for record in output.stdout.split(&format!("{}\n", RECORD_SEPARATOR)) {
        let mut data = parse_info_record(record, options.errors.as_deref());
        let Some(name) = data.get("name").and_then(Value::as_str).map(String::from) else {
            continue;
        };
        if !keep_name {
            data.remove("name");
        }
        ret.entry(name).or_default().push(data);
    }

    let mut out = Map::new();
    for (name, mut records) in ret {
        if options.all_versions {
            out.insert(name, Value::Array(records.into_iter().map(Value::Object).collect()));
            continue;
        }
        let mut newest = records.remove(0);
        for record in records {
            let cmp = rpm::version_cmp(&record_edition(&record), &record_edition(&newest), false);
            if cmp != Ordering::Less {
                newest = record;
            }
        }
        out.insert(name, Value::Object(newest));
    }
    Ok(Value::Object(out))
}

/// rpm style comparison, `-1`, `0` or `1`.
pub fn version_cmp(ver1: &str, ver2: &str, ignore_epoch: bool) -> i32 {
    match rpm::version_cmp(ver1, ver2, ignore_epoch) {
        Ordering::Less => -1,
        Ordering::Equal => 0,
        Ordering::Greater => 1,
    }
}

/// Files of the given packages, or of every package.
pub async fn file_list(
    context: &ModuleContext,
    packages: &[String],
    root: Option<&str>,
) -> ModuleResult<Value> {
    let mut args = vec![if packages.is_empty() { "-qla" } else { "-ql" }.to_string()];
    args.extend(packages.iter().cloned());
    let output = context.connection.execute(&rpm_argv(root, &args), None).await?;
    let files: Vec<&str> = output.stdout.lines().collect();
    Ok(json!({"errors": [], "files": files}))
}

/// Files of the given packages grouped per package.
pub async fn file_dict(
    context: &ModuleContext,
    packages: &[String],
    root: Option<&str>,
) -> ModuleResult<Value> {
    let mut args = vec![
        if packages.is_empty() { "-qa" } else { "-q" }.to_string(),
        "--queryformat".to_string(),
        "%{NAME} %{VERSION}\n".to_string(),
    ];
    args.extend(packages.iter().cloned());
    let output = context.connection.execute(&rpm_argv(root, &args), None).await?;

    let mut errors = Vec::new();
    let mut names = Vec::new();
    for line in output.stdout.lines() {
        if line.contains("is not installed") {
            errors.push(line.to_string());
            continue;
        }
        if let Some(name) = line.split_whitespace().next() {
            names.push(name.to_string());
        }
    }

    let mut pkgs = Map::new();
    for name in names {
        let files = context
            .connection
            .execute(&rpm_argv(root, &["-ql", name.as_str()]), None)
            .await?;
        let files: Vec<&str> = files.stdout.lines().collect();
        pkgs.insert(name, json!(files));
    }
    Ok(json!({"errors": errors, "packages": pkgs}))
}

/// Name of the package owning `path`; empty when nothing owns it.
pub async fn owner_of(context: &ModuleContext, path: &str, root: Option<&str>) -> ModuleResult<String> {
    let argv = rpm_argv(root, &["-qf", "--queryformat", "%{name}", path]);
    let output = context.connection.execute(&argv, None).await?;
    let name = output.stdout.trim();
    if name.to_lowercase().contains("not owned") || name.contains(' ') {
        return Ok(String::new());
    }
    Ok(name.to_string())
}

/// Owners of `paths`: a bare string for a single path, else a map.
pub async fn owner(context: &ModuleContext, paths: &[String], root: Option<&str>) -> ModuleResult<Value> {
    if paths.is_empty() {
        return Ok(json!(""));
    }
    let mut ret = Map::new();
    for path in paths {
        ret.insert(path.clone(), json!(owner_of(context, path, root).await?));
    }
    if ret.len() == 1 {
        if let Some((_, owner)) = ret.into_iter().next() {
            return Ok(owner);
        }
        return Ok(json!(""));
    }
    Ok(Value::Object(ret))
}

const FILE_TYPES: &[(char, &str)] = &[
    ('c', "config"),
    ('d', "doc"),
    ('g', "ghost"),
    ('l', "license"),
    ('r', "readme"),
];

const VERIFY_FLAGS: &[(usize, char, &str)] = &[
    (0, 'S', "size"),
    (1, 'M', "mode"),
    (2, '5', "md5sum"),
    (3, 'D', "device major/minor number"),
    (4, 'L', "readlink path"),
    (5, 'U', "user"),
    (6, 'G', "group"),
    (7, 'T', "mtime"),
    (8, 'P', "capabilities"),
];

/// Parse `rpm -V` output into `{file: {mismatch, type?, missing?}}`.
pub fn parse_verify(output: &str, ignore_types: &[String]) -> Map<String, Value> {
    let mut ret = Map::new();
    for raw in output.lines().filter(|l| !l.trim().is_empty()) {
        let missing = raw.starts_with("missing");
        let line: Vec<char> = if missing {
            format!(" {}", raw).chars().collect()
        } else {
            raw.chars().collect()
        };
        if line.len() < 13 {
            warn!(line = %raw, "Unexpected rpm verify line");
            continue;
        }
        let fname: String = line[13..].iter().collect();

        let mut entry = Map::new();
        let ftype = FILE_TYPES
            .iter()
            .find(|(flag, _)| line[11] == *flag)
            .map(|(_, name)| *name);
        if let Some(ftype) = ftype {
            if ignore_types.iter().any(|t| t == ftype) {
                continue;
            }
            entry.insert("type".to_string(), json!(ftype));
        }

        if missing {
            entry.insert("missing".to_string(), json!(true));
        } else {
            let mismatch: Vec<&str> = VERIFY_FLAGS
                .iter()
                .filter(|(idx, flag, _)| line.get(*idx) == Some(flag))
                .map(|(_, _, name)| *name)
                .collect();
            entry.insert("mismatch".to_string(), json!(mismatch));
        }
        ret.insert(fname, Value::Object(entry));
    }
    ret
}

/// Verify installed packages against the RPM database.
pub async fn verify(
    context: &ModuleContext,
    packages: &[String],
    ignore_types: &[String],
    verify_options: &[String],
    root: Option<&str>,
) -> ModuleResult<Value> {
    let mut args: Vec<String> = if packages.is_empty() {
        vec!["-Va".to_string()]
    } else {
        vec!["-V".to_string()]
    };
    args.extend(verify_options.iter().map(|o| format!("--{}", o)));
    args.extend(packages.iter().cloned());

    let output = context.connection.execute(&rpm_argv(root, &args), None).await?;
    if output.stdout.trim().is_empty() && output.exit_code != 0 {
        let mut msg = "Failed to verify package(s)".to_string();
        if !output.stderr.trim().is_empty() {
            msg.push_str(&format!(": {}", output.stderr.trim()));
        }
        return Err(ModuleError::command(msg));
    }
    Ok(Value::Object(parse_verify(&output.stdout, ignore_types)))
}

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("Invalid whitespace regex"));

const MODIFIED_KEYS: &[&str] = &[
    "size",
    "mode",
    "checksum",
    "device",
    "symlink",
    "owner",
    "group",
    "time",
    "capabilities",
];

/// Parse `rpm -Va` output into `{file: [changed attributes]}`.
pub fn parse_modified(output: &str) -> IndexMap<String, Vec<String>> {
    let mut data = IndexMap::new();
    for line in output.lines().filter(|l| !l.trim().is_empty()) {
        let fields: Vec<&str> = WHITESPACE.split(line.trim()).collect();
        let (changes, config, fname) = match fields.as_slice() {
            [changes, cfg, fname] => (*changes, Some(*cfg), *fname),
            [changes, fname] => (*changes, None, *fname),
            _ => {
                warn!(line = %line, "Unexpected rpm verify line");
                continue;
            }
        };

        let mut stats: Vec<String> = if changes == "missing" {
            vec!["missing".to_string()]
        } else {
            MODIFIED_KEYS
                .iter()
                .zip(changes.chars().chain(std::iter::repeat('.')))
                .filter(|(_, flag)| *flag != '.')
                .map(|(key, _)| key.to_string())
                .collect()
        };
        if config.is_some() {
            stats.push("config".to_string());
        }
        data.insert(fname.to_string(), stats);
    }
    data
}

/// Files changed since their package was installed.
///
/// Every flag narrows the result: `checksum=true` keeps files whose checksum
/// changed, `checksum=false` keeps the others.
pub async fn modified(
    context: &ModuleContext,
    packages: &[String],
    flags: &IndexMap<String, bool>,
    root: Option<&str>,
) -> ModuleResult<Value> {
    let mut args = vec!["-Va".to_string()];
    args.extend(packages.iter().cloned());
    let output = context.connection.execute(&rpm_argv(root, &args), None).await?;

    if output.exit_code > 1 {
        return Ok(json!({
            "retcode": output.exit_code,
            "stderr": output.stderr,
        }));
    }
    if output.exit_code == 0 {
        return Ok(json!({}));
    }

    let data = parse_modified(&output.stdout);
    let mut ret = Map::new();
    for (fname, stats) in data {
        let include = flags
            .iter()
            .filter(|(param, _)| !param.starts_with('_'))
            .all(|(param, wanted)| stats.contains(param) == *wanted);
        if include {
            ret.insert(fname, json!(stats));
        }
    }
    Ok(Value::Object(ret))
}

/// Verify the signature and digests of package files with `rpm -K`.
pub async fn checksum(
    context: &ModuleContext,
    paths: &[String],
    root: Option<&str>,
) -> ModuleResult<IndexMap<String, bool>> {
    if paths.is_empty() {
        return Err(ModuleError::command("No package files has been specified."));
    }
    let mut ret = IndexMap::new();
    for path in paths {
        let verified = if context.connection.path_exists(Path::new(path)).await? {
            let argv = rpm_argv(root, &["-K", "--quiet", path.as_str()]);
            context.connection.execute(&argv, None).await?.exit_code == 0
        } else {
            false
        };
        ret.insert(path.clone(), verified);
    }
    Ok(ret)
}

/// Name, version and arch of a package file.
///
/// `None` when rpm cannot read the file.
pub async fn bin_pkg_info(context: &ModuleContext, path: &str) -> ModuleResult<Option<PkgInfo>> {
    if !Path::new(path).is_absolute() {
        return Err(ModuleError::command(format!("Path '{}' is not absolute", path)));
    }
    if !context.connection.path_exists(Path::new(path)).await? {
        return Err(ModuleError::command(format!("Path '{}' does not exist", path)));
    }
    let query = QUERYFORMAT.replace("%{REPOID}", "none");
    let argv = rpm_argv(None, &["-qp", "--queryformat", query.as_str(), path]);
    let output = context.connection.execute(&argv, None).await?;
    Ok(rpm::parse_pkginfo(output.stdout.trim(), &context.osarch()))
}

/// Unified diff of the copy of `path` inside `package_path` against the
/// live file; empty when they match.
pub async fn diff(context: &ModuleContext, package_path: &str, path: &str) -> ModuleResult<String> {
    let script = format!(
        "rpm2cpio {} | cpio -i --quiet --to-stdout {}",
        shell_words::quote(package_path),
        shell_words::quote(&format!(".{}", path)),
    );
    let argv = vec!["sh".to_string(), "-c".to_string(), script];
    let packaged = context.connection.execute(&argv, None).await?;
    if !packaged.success {
        return Err(ModuleError::command(format!(
            "Unable to extract '{}' from '{}': {}",
            path,
            package_path,
            packaged.stderr.trim()
        )));
    }
    let live = context.connection.download_content(Path::new(path)).await?;

    let packaged = packaged.stdout;
    let live = match String::from_utf8(live) {
        Ok(text) => text,
        Err(_) => {
            return Ok(format!(
                "File '{}' is binary and its content has been modified.",
                path
            ))
        }
    };
    if packaged == live {
        return Ok(String::new());
    }
    if packaged.contains('\0') || live.contains('\0') {
        return Ok(format!(
            "File '{}' is binary and its content has been modified.",
            path
        ));
    }

    let from = format!("A {}", path);
    let to = format!("B {}", path);
    Ok(TextDiff::from_lines(packaged.as_str(), live.as_str())
        .unified_diff()
        .header(&from, &to)
        .to_string())
}

/// `lowpkg` published functions.
pub const FUNCTIONS: &[&str] = &[
    "bin_pkg_info",
    "checksum",
    "diff",
    "file_dict",
    "file_list",
    "info",
    "modified",
    "owner",
    "verify",
    "version_cmp",
];

/// RPM backend for the `lowpkg` virtual module
#[derive(Debug, Default)]
pub struct RpmModule;

#[async_trait]
impl Module for RpmModule {
    fn name(&self) -> &'static str {
        "lowpkg"
    }

    fn description(&self) -> &'static str {
        "Query and verify RPM packages"
    }

    fn functions(&self) -> &'static [&'static str] {
        FUNCTIONS
    }

    async fn is_available(&self, context: &ModuleContext) -> ModuleResult<()> {
        if context.connection.which("rpm").await {
            Ok(())
        } else {
            Err(ModuleError::Unavailable(
                "Module lowpkg: rpm not found".to_string(),
            ))
        }
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
            "info" => {
                let options = InfoOptions::from_params(kwargs, root_owned.clone())?;
                info(context, &names, &options).await
            }
            "version_cmp" => {
                let params = args.bind(&["ver1", "ver2", "ignore_epoch"]);
                let ver1 = params.get_string_required("ver1")?;
                let ver2 = params.get_string_required("ver2")?;
                let ignore_epoch = params.get_bool_or("ignore_epoch", false);
                Ok(json!(version_cmp(&ver1, &ver2, ignore_epoch)))
            }
            "file_list" => file_list(context, &names, root).await,
            "file_dict" => file_dict(context, &names, root).await,
            "owner" => owner(context, &names, root).await,
            "verify" => {
                let ignore_types = kwargs.get_vec_string("ignore_types")?.unwrap_or_default();
                let verify_options = kwargs.get_vec_string("verify_options")?.unwrap_or_default();
                verify(context, &names, &ignore_types, &verify_options, root).await
            }
            "modified" => {
                let mut flags = IndexMap::new();
                let mut keys: Vec<&String> = kwargs.keys().collect();
                keys.sort();
                for key in keys {
                    if key == "root" {
                        continue;
                    }
                    flags.insert(key.clone(), kwargs.get_bool_or(key, false));
                }
                modified(context, &names, &flags, root).await
            }
            "checksum" => {
                let ret = checksum(context, &names, root).await?;
                Ok(json!(ret))
            }
            "bin_pkg_info" => {
                let params = args.bind(&["path"]);
                let path = params.get_string_required("path")?;
                match bin_pkg_info(context, &path).await? {
                    Some(info) => Ok(json!({
                        "name": info.name,
                        "version": info.version,
                        "arch": info.arch,
                    })),
                    None => Ok(Value::Null),
                }
            }
            "diff" => {
                let params = args.bind(&["package_path", "path"]);
                let package_path = params.get_string_required("package_path")?;
                let path = params.get_string_required("path")?;
                Ok(json!(diff(context, &package_path, &path).await?))
            }
            other => Err(ModuleError::NotFound(format!("lowpkg.{}", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_rpm_argv_root() {
        assert_eq!(rpm_argv(None, &["-qa"]), vec!["rpm", "-qa"]);
        assert_eq!(
            rpm_argv(Some("/mnt"), &["-ql", "vim"]),
            vec!["rpm", "--root", "/mnt", "-ql", "vim"]
        );
    }

    #[test]
    fn test_queryformat_attr_selection() {
        let options = InfoOptions {
            attr: Some(vec!["version".to_string(), "description".to_string()]),
            ..InfoOptions::default()
        };
        let query = options.queryformat();
        assert!(query.starts_with("name: %{NAME}\nversion: %{VERSION}\n"));
        assert!(query.ends_with("description:\n%{DESCRIPTION}\n-----\n"));
        assert!(!query.contains("vendor"));
    }

    #[test]
    fn test_parse_info_record() {
        let record = "name: vim\nversion: 9.0\nrelease: 1.1\ninstall_date: 1700000000\n\
install_date_time_t: 1700000000\nvendor: SUSE LLC\ndescription:\nVi IMproved.\nSecond line.\n";
        let data = parse_info_record(record, None);
        assert_eq!(data["name"], json!("vim"));
        assert_eq!(data["install_date"], json!("2023-11-14T22:13:20Z"));
        assert_eq!(data["install_date_time_t"], json!(1700000000));
        assert_eq!(data["description"], json!("Vi IMproved.\nSecond line."));
    }

    #[test]
    fn test_broken_fields() {
        let record = "name: vim\nvendor: Bad\u{FFFD}Vendor\n";
        assert_eq!(
            parse_info_record(record, Some("report"))["vendor"],
            json!("N/A (broken)")
        );
        assert_eq!(
            parse_info_record(record, Some("ignore"))["vendor"],
            json!("BadVendor")
        );
        assert_eq!(
            parse_info_record(record, None)["vendor"],
            json!("Bad\u{FFFD}Vendor")
        );
    }

    #[test]
    fn test_version_cmp() {
        assert_eq!(version_cmp("0.2-001", "0.2.0.1-002", false), -1);
        assert_eq!(version_cmp("1:1.0-1", "2.0-1", false), 1);
        assert_eq!(version_cmp("1:1.0-1", "1.0-1", true), 0);
    }

    #[test]
    fn test_parse_verify() {
        let output = "S.5....T.  c /etc/ssh/sshd_config\n\
.M.......    /usr/bin/foo\n\
missing   d /usr/share/doc/foo/README\n";
        let ret = parse_verify(output, &[]);
        assert_eq!(
            ret["/etc/ssh/sshd_config"],
            json!({"type": "config", "mismatch": ["size", "md5sum", "mtime"]})
        );
        assert_eq!(ret["/usr/bin/foo"], json!({"mismatch": ["mode"]}));
        assert_eq!(
            ret["/usr/share/doc/foo/README"],
            json!({"type": "doc", "missing": true})
        );

        let ignored = parse_verify(output, &["config".to_string()]);
        assert!(!ignored.contains_key("/etc/ssh/sshd_config"));
    }

    #[test]
    fn test_parse_modified() {
        let output = "S.5....T.  c /etc/ssh/sshd_config\n.M......  /usr/bin/foo\n";
        let data = parse_modified(output);
        assert_eq!(
            data["/etc/ssh/sshd_config"],
            vec!["size", "checksum", "time", "config"]
        );
        assert_eq!(data["/usr/bin/foo"], vec!["mode"]);
    }
}
