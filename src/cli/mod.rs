//! CLI module for zypperpkg
//!
//! Argument parsing for the `zypperpkg` binary: call a `module.function`,
//! list the callable functions, or dump the gathered facts.

pub mod output;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::Value;
use std::path::PathBuf;
use zypperpkg::modules::CallArgs;

/// zypperpkg - Zypper package management functions
///
/// Runs `pkg.*` and `lowpkg.*` functions against the local host.
#[derive(Parser, Debug, Clone)]
#[command(name = "zypperpkg")]
#[command(version)]
#[command(about = "Zypper package management functions", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Verbosity level (-v, -vv, -vvv, -vvvv)
    #[arg(short = 'v', long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Output format
    #[arg(long, global = true, default_value = "human")]
    pub output: OutputFormat,

    /// Path to configuration file
    #[arg(short = 'c', long, global = true, env = "ZYPPERPKG_CONFIG")]
    pub config: Option<PathBuf>,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,
}

/// Output format for CLI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable output with colors
    #[default]
    Human,
    /// JSON output for scripting
    Json,
    /// YAML output
    Yaml,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Call a function, e.g. `pkg.install vim refresh=true`
    Call(CallCommand),

    /// List the functions available on this host
    Functions,

    /// Show the facts gathered for this host
    Facts,
}

/// Arguments for call command
#[derive(Parser, Debug, Clone)]
pub struct CallCommand {
    /// Function to call as `module.function`
    pub function: String,

    /// Positional arguments and `key=value` keyword arguments
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
}

impl CallCommand {
    /// Split the raw arguments into positional and keyword values.
    pub fn call_args(&self) -> Result<CallArgs> {
        let mut call_args = CallArgs::new();
        for raw in &self.args {
            match split_kwarg(raw) {
                Some((key, value)) => {
                    let parsed = parse_value(value)
                        .with_context(|| format!("Invalid value for '{}'", key))?;
                    call_args.kwargs.insert(key.to_string(), parsed);
                }
                None => call_args.args.push(parse_value(raw)?),
            }
        }
        Ok(call_args)
    }
}

/// `key=value` when the key looks like an identifier.
fn split_kwarg(raw: &str) -> Option<(&str, &str)> {
    let (key, value) = raw.split_once('=')?;
    let is_ident = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !key.starts_with(|c: char| c.is_ascii_digit());
    is_ident.then_some((key, value))
}

/// Parse an argument as a YAML scalar or collection.
///
/// `true`, `5` and `[a, b]` become typed values; anything YAML can not
/// read stays a plain string.
pub fn parse_value(raw: &str) -> Result<Value> {
    if raw.is_empty() {
        return Ok(Value::String(String::new()));
    }
    let yaml: serde_yaml::Value = match serde_yaml::from_str(raw) {
        Ok(yaml) => yaml,
        Err(_) => return Ok(Value::String(raw.to_string())),
    };
    match yaml {
        serde_yaml::Value::Null if raw != "null" && raw != "~" => Ok(Value::String(raw.to_string())),
        serde_yaml::Value::Tagged(_) => bail!("Tagged YAML values are not supported: {}", raw),
        other => serde_json::to_value(other).context("Unable to convert argument to JSON"),
    }
}

impl Cli {
    /// Parse command-line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }

    /// Get the effective verbosity level (0-4)
    pub fn verbosity(&self) -> u8 {
        self.verbose.min(4)
    }

    /// Check if JSON output is requested
    pub fn is_json(&self) -> bool {
        matches!(self.output, OutputFormat::Json)
    }
}

/// Environment variable helper functions
pub mod env {
    use std::env;

    /// Check if colors should be disabled
    pub fn no_color() -> bool {
        env::var("NO_COLOR").is_ok() || env::var("ZYPPERPKG_NO_COLOR").is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::try_parse_from(["zypperpkg", "call", "pkg.list_pkgs"]).unwrap();
        assert!(matches!(cli.command, Commands::Call(_)));
        assert_eq!(cli.output, OutputFormat::Human);
    }

    #[test]
    fn test_verbosity() {
        let cli = Cli::try_parse_from(["zypperpkg", "-vvvvvv", "functions"]).unwrap();
        assert_eq!(cli.verbosity(), 4);
    }

    #[test]
    fn test_output_format() {
        let cli = Cli::try_parse_from(["zypperpkg", "--output", "json", "facts"]).unwrap();
        assert!(cli.is_json());
    }

    #[test]
    fn test_call_args() {
        let cli = Cli::try_parse_from([
            "zypperpkg",
            "call",
            "pkg.install",
            "vim",
            "refresh=true",
            "pkgs=[foo, bar]",
            "version=1.2-3",
        ])
        .unwrap();
        let Commands::Call(call) = cli.command else {
            panic!("expected call");
        };
        let args = call.call_args().unwrap();
        assert_eq!(args.args, vec![json!("vim")]);
        assert_eq!(args.kwargs["refresh"], json!(true));
        assert_eq!(args.kwargs["pkgs"], json!(["foo", "bar"]));
        assert_eq!(args.kwargs["version"], json!("1.2-3"));
    }

    #[test]
    fn test_split_kwarg() {
        assert_eq!(split_kwarg("root=/mnt"), Some(("root", "/mnt")));
        assert_eq!(split_kwarg("vim>=8.0"), None);
        assert_eq!(split_kwarg("=x"), None);
        assert_eq!(split_kwarg("vim"), None);
    }

    #[test]
    fn test_parse_value() {
        assert_eq!(parse_value("").unwrap(), json!(""));
        assert_eq!(parse_value("null").unwrap(), Value::Null);
        assert_eq!(parse_value("{a: 1}").unwrap(), json!({"a": 1}));
        assert_eq!(parse_value("vim: [").unwrap(), json!("vim: ["));
    }
}
