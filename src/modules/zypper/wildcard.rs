//! Version wildcard resolution.
//!
//! Turns `1.2.3*` (optionally with an operator, `>=1.2*`) into the newest
//! concrete version zypper knows about, e.g. `>=1.2.3.4-1.1`.

use super::caller::Zypper;
use super::fnmatch;
use crate::modules::{ModuleContext, ModuleError, ModuleResult};
use crate::pkg::version::max_version;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;

/// Operators zypper accepts in a capability.
pub const Z_OP: &[&str] = &["<", "<=", "=", ">=", ">"];

static OPERATOR_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[<>=+]*").expect("Invalid operator regex"));

/// Split the operator off a version wildcard.
///
/// Returns `(operator, exact_glob)`; the operator is every `<`, `>`, `=`
/// and `+` of the input, wherever it appeared.
pub fn split_operator(version: &str) -> ModuleResult<(Option<String>, String)> {
    let exact = OPERATOR_CHARS.replace_all(version, "").to_string();
    let op = version.replace(&exact, "");
    if op.is_empty() {
        return Ok((None, exact));
    }
    if !Z_OP.contains(&op.as_str()) {
        return Err(ModuleError::command(format!(
            "Zypper do not supports operator \"{}\".",
            op
        )));
    }
    Ok((Some(op), exact))
}

/// Resolve `version` for `name` against the versions zypper can install.
///
/// `None` when there is no version to resolve or nothing matches.
pub async fn resolve(
    context: &ModuleContext,
    name: &str,
    version: Option<&str>,
    root: Option<&str>,
) -> ModuleResult<Option<String>> {
    let Some(version) = version.filter(|v| !v.is_empty()) else {
        return Ok(None);
    };
    let (op, exact) = split_operator(version)?;

    let available = available_versions(context, name, root).await?;
    let matching: Vec<String> = available
        .into_iter()
        .filter(|v| fnmatch(v, &exact))
        .collect();

    Ok(max_version(&matching).map(|v| format!("{}{}", op.as_deref().unwrap_or(""), v)))
}

async fn available_versions(
    context: &ModuleContext,
    name: &str,
    root: Option<&str>,
) -> ModuleResult<Vec<String>> {
    let out = Zypper::new(context)
        .root(root)
        .nolock()
        .xml()
        .call(&["se", "-xv", name])
        .await?;
    let doc = out.doc()?;
    let solvables = doc.elements_by_tag("solvable");
    if solvables.is_empty() {
        return Err(ModuleError::command(format!(
            "No packages found matching '{}'",
            name
        )));
    }

    let versions: BTreeSet<String> = solvables
        .iter()
        .filter_map(|s| s.attr("edition"))
        .filter(|e| !e.is_empty())
        .map(String::from)
        .collect();
    Ok(versions.into_iter().collect())
}
