//! Output formatting module for zypperpkg
//!
//! Renders function results and errors as colored text, JSON or YAML.

use super::OutputFormat;
use colored::Colorize;
use serde_json::Value;
use std::io::{self, Write};

/// Output formatter for different output modes
pub struct OutputFormatter {
    /// Use colored output
    use_color: bool,
    /// Selected output format
    format: OutputFormat,
    /// Verbosity level
    verbosity: u8,
}

impl OutputFormatter {
    /// Create a new output formatter
    pub fn new(use_color: bool, format: OutputFormat, verbosity: u8) -> Self {
        // Respect NO_COLOR environment variable
        let use_color = use_color && !super::env::no_color();

        Self {
            use_color,
            format,
            verbosity,
        }
    }

    fn is_human(&self) -> bool {
        matches!(self.format, OutputFormat::Human)
    }

    /// Print a function result
    pub fn result(&self, value: &Value) {
        println!("{}", self.render(value));
    }

    /// Render a value in the selected format
    pub fn render(&self, value: &Value) -> String {
        match self.format {
            OutputFormat::Json => {
                serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
            }
            OutputFormat::Yaml => serde_yaml::to_string(value)
                .map(|s| s.trim_end().to_string())
                .unwrap_or_else(|_| value.to_string()),
            OutputFormat::Human => {
                let mut out = String::new();
                self.render_human(value, 0, &mut out);
                out.trim_end().to_string()
            }
        }
    }

    fn render_human(&self, value: &Value, indent: usize, out: &mut String) {
        let pad = "    ".repeat(indent);
        match value {
            Value::Object(map) if map.is_empty() => out.push_str(&format!("{}{{}}\n", pad)),
            Value::Array(items) if items.is_empty() => out.push_str(&format!("{}[]\n", pad)),
            Value::Object(map) => {
                for (key, item) in map {
                    let key = if self.use_color {
                        key.cyan().to_string()
                    } else {
                        key.clone()
                    };
                    if is_scalar(item) {
                        out.push_str(&format!("{}{}: {}\n", pad, key, self.scalar(item)));
                    } else {
                        out.push_str(&format!("{}{}:\n", pad, key));
                        self.render_human(item, indent + 1, out);
                    }
                }
            }
            Value::Array(items) => {
                for item in items {
                    if is_scalar(item) {
                        out.push_str(&format!("{}- {}\n", pad, self.scalar(item)));
                    } else {
                        out.push_str(&format!("{}-\n", pad));
                        self.render_human(item, indent + 1, out);
                    }
                }
            }
            scalar => out.push_str(&format!("{}{}\n", pad, self.scalar(scalar))),
        }
    }

    fn scalar(&self, value: &Value) -> String {
        let text = match value {
            Value::String(s) => s.clone(),
            Value::Null => "None".to_string(),
            other => other.to_string(),
        };
        if !self.use_color {
            return text;
        }
        match value {
            Value::Bool(true) => text.green().to_string(),
            Value::Bool(false) => text.red().to_string(),
            Value::Null => text.dimmed().to_string(),
            _ => text,
        }
    }

    /// Print an error message with its structured payload
    pub fn error(&self, message: &str, info: Option<&Value>) {
        if !self.is_human() {
            let mut err = serde_json::json!({
                "type": "error",
                "message": message
            });
            if let Some(info) = info {
                err["info"] = info.clone();
            }
            eprintln!("{}", self.render(&err));
            return;
        }

        if self.use_color {
            eprintln!("{} {}", "ERROR:".red().bold(), message);
        } else {
            eprintln!("ERROR: {}", message);
        }
        if let Some(info) = info {
            eprintln!("{}", self.render(info));
        }
    }

    /// Print a warning message
    pub fn warning(&self, message: &str) {
        if !self.is_human() {
            return;
        }

        if self.use_color {
            eprintln!("{} {}", "WARNING:".yellow().bold(), message);
        } else {
            eprintln!("WARNING: {}", message);
        }
    }

    /// Print a debug message (requires higher verbosity)
    pub fn debug(&self, message: &str) {
        if self.verbosity < 2 || !self.is_human() {
            return;
        }

        if self.use_color {
            eprintln!("{} {}", "DEBUG:".magenta(), message);
        } else {
            eprintln!("DEBUG: {}", message);
        }
    }

    /// Print a list of items
    pub fn list(&self, items: &[String]) {
        if !self.is_human() {
            self.result(&Value::from(items.to_vec()));
            return;
        }
        for item in items {
            println!("{}", item);
        }
    }

    /// Flush output buffers
    pub fn flush(&self) {
        let _ = io::stdout().flush();
        let _ = io::stderr().flush();
    }
}

fn is_scalar(value: &Value) -> bool {
    match value {
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => true,
    }
}
