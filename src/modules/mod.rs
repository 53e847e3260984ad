//! Module system for zypperpkg
//!
//! This module provides the core traits, types, and registry for execution
//! modules. A module exposes a set of named functions under a virtual name
//! (`pkg`, `lowpkg`) and decides for itself whether it can run on a host.

pub mod lowpkg;
pub mod zypper;

use crate::cache::ContextCache;
use crate::config::Config;
use crate::connection::{Connection, ConnectionError};
use crate::error::{Error, Result};
use crate::events::{EventSink, LogEventSink};
use crate::facts::Facts;
use crate::xml::XmlError;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Errors that can occur during module execution
#[derive(Error, Debug)]
pub enum ModuleError {
    /// A command ran but failed. `info` carries partial changes and raw results.
    #[error("{message}")]
    CommandExecution {
        message: String,
        info: Option<Value>,
    },

    /// The function was called with unusable arguments.
    #[error("{0}")]
    Invocation(String),

    #[error("Function not found: {0}")]
    NotFound(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Missing required parameter: {0}")]
    MissingParameter(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("{0}")]
    Unavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

impl ModuleError {
    /// A command failure without extra payload.
    pub fn command(message: impl Into<String>) -> Self {
        Self::CommandExecution {
            message: message.into(),
            info: None,
        }
    }

    /// A command failure carrying structured details.
    pub fn command_with_info(message: impl Into<String>, info: Value) -> Self {
        Self::CommandExecution {
            message: message.into(),
            info: Some(info),
        }
    }

    /// Structured payload of a command failure.
    pub fn info(&self) -> Option<&Value> {
        match self {
            Self::CommandExecution { info, .. } => info.as_ref(),
            _ => None,
        }
    }
}

impl From<XmlError> for ModuleError {
    fn from(err: XmlError) -> Self {
        ModuleError::ParseError(err.to_string())
    }
}

/// Result type for module operations
pub type ModuleResult<T> = std::result::Result<T, ModuleError>;

/// Keyword parameters passed to a module function
pub type ModuleParams = HashMap<String, Value>;

/// Positional and keyword arguments of a function call.
#[derive(Debug, Clone, Default)]
pub struct CallArgs {
    pub args: Vec<Value>,
    pub kwargs: ModuleParams,
}

impl CallArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    pub fn with_kwarg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kwargs.insert(key.into(), value.into());
        self
    }

    /// Positional arguments rendered as strings.
    pub fn positional_strings(&self) -> Vec<String> {
        self.args.iter().map(value_to_string).collect()
    }

    /// Keyword view where leading positional arguments fill `names` in order.
    ///
    /// An explicit keyword wins over the positional value.
    pub fn bind(&self, names: &[&str]) -> ModuleParams {
        let mut params = self.kwargs.clone();
        for (name, value) in names.iter().zip(self.args.iter()) {
            params
                .entry((*name).to_string())
                .or_insert_with(|| value.clone());
        }
        params
    }
}

/// Render a scalar argument the way it was typed.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Everything a module function can reach while it runs
#[derive(Clone)]
pub struct ModuleContext {
    /// Transport for commands and file access
    pub connection: Arc<dyn Connection>,
    /// Facts about the target system
    pub facts: Facts,
    /// Agent configuration
    pub config: Arc<Config>,
    /// Per-run memo shared by every call on this context
    pub cache: Arc<ContextCache>,
    /// Where `zypper/*` events go
    pub events: Arc<dyn EventSink>,
}

impl std::fmt::Debug for ModuleContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleContext")
            .field("connection", &self.connection.identifier())
            .field("facts", &self.facts)
            .field("config", &self.config)
            .field("cache_keys", &self.cache.keys())
            .finish()
    }
}

impl ModuleContext {
    pub fn new(connection: Arc<dyn Connection>) -> Self {
        Self {
            connection,
            facts: Facts::new(),
            config: Arc::new(Config::default()),
            cache: Arc::new(ContextCache::new()),
            events: Arc::new(LogEventSink),
        }
    }

    pub fn with_facts(mut self, facts: Facts) -> Self {
        self.facts = facts;
        self
    }

    pub fn with_config(mut self, config: Config) -> Self {
        self.config = Arc::new(config);
        self
    }

    pub fn with_cache(mut self, cache: Arc<ContextCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Host architecture, as RPM names it.
    pub fn osarch(&self) -> String {
        self.facts
            .get_string("osarch")
            .unwrap_or_else(|| std::env::consts::ARCH.to_string())
    }

    /// `root` argument, falling back to the configured default root.
    pub fn root(&self, params: &ModuleParams) -> ModuleResult<Option<String>> {
        let root = params
            .get_string("root")?
            .filter(|r| !r.is_empty())
            .or_else(|| self.config.agent.root.clone());
        Ok(root)
    }
}

/// Trait that all modules must implement
#[async_trait]
pub trait Module: Send + Sync {
    /// Virtual name the functions are published under
    fn name(&self) -> &'static str;

    /// Returns a description of what the module does
    fn description(&self) -> &'static str;

    /// Names of every callable function, aliases included
    fn functions(&self) -> &'static [&'static str];

    /// Whether the module can run on this host; the error carries the reason
    async fn is_available(&self, context: &ModuleContext) -> ModuleResult<()>;

    /// Run one function
    async fn call(
        &self,
        function: &str,
        args: CallArgs,
        context: &ModuleContext,
    ) -> ModuleResult<Value>;
}

/// Helper trait for extracting parameters
pub trait ParamExt {
    fn get_string(&self, key: &str) -> ModuleResult<Option<String>>;
    fn get_string_required(&self, key: &str) -> ModuleResult<String>;
    fn get_bool(&self, key: &str) -> ModuleResult<Option<bool>>;
    fn get_bool_or(&self, key: &str, default: bool) -> bool;
    fn get_i64(&self, key: &str) -> ModuleResult<Option<i64>>;
    fn get_u32(&self, key: &str) -> ModuleResult<Option<u32>>;
    fn get_vec_string(&self, key: &str) -> ModuleResult<Option<Vec<String>>>;
}

impl ParamExt for ModuleParams {
    fn get_string(&self, key: &str) -> ModuleResult<Option<String>> {
        match self.get(key) {
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(Value::Null) | None => Ok(None),
            Some(v) => Ok(Some(v.to_string().trim_matches('"').to_string())),
        }
    }

    fn get_string_required(&self, key: &str) -> ModuleResult<String> {
        self.get_string(key)?
            .ok_or_else(|| ModuleError::MissingParameter(key.to_string()))
    }

    fn get_bool(&self, key: &str) -> ModuleResult<Option<bool>> {
        match self.get(key) {
            Some(Value::Bool(b)) => Ok(Some(*b)),
            Some(Value::String(s)) => match s.to_lowercase().as_str() {
                "true" | "yes" | "1" | "on" => Ok(Some(true)),
                "false" | "no" | "0" | "off" | "" => Ok(Some(false)),
                _ => Err(ModuleError::InvalidParameter(format!(
                    "{} must be a boolean",
                    key
                ))),
            },
            Some(Value::Number(n)) => Ok(Some(n.as_i64().map(|v| v != 0).unwrap_or(true))),
            Some(Value::Null) | None => Ok(None),
            Some(_) => Err(ModuleError::InvalidParameter(format!(
                "{} must be a boolean",
                key
            ))),
        }
    }

    fn get_bool_or(&self, key: &str, default: bool) -> bool {
        self.get_bool(key).ok().flatten().unwrap_or(default)
    }

    fn get_i64(&self, key: &str) -> ModuleResult<Option<i64>> {
        match self.get(key) {
            Some(Value::Number(n)) => n.as_i64().map(Some).ok_or_else(|| {
                ModuleError::InvalidParameter(format!("{} must be an integer", key))
            }),
            Some(Value::String(s)) => s
                .parse()
                .map(Some)
                .map_err(|_| ModuleError::InvalidParameter(format!("{} must be an integer", key))),
            Some(Value::Null) | None => Ok(None),
            Some(_) => Err(ModuleError::InvalidParameter(format!(
                "{} must be an integer",
                key
            ))),
        }
    }

    fn get_u32(&self, key: &str) -> ModuleResult<Option<u32>> {
        match self.get(key) {
            Some(Value::Number(n)) => n
                .as_u64()
                .and_then(|v| u32::try_from(v).ok())
                .map(Some)
                .ok_or_else(|| {
                    ModuleError::InvalidParameter(format!("{} must be a positive integer", key))
                }),
            Some(Value::String(s)) => s.parse().map(Some).map_err(|_| {
                ModuleError::InvalidParameter(format!("{} must be a positive integer", key))
            }),
            Some(Value::Null) | None => Ok(None),
            Some(_) => Err(ModuleError::InvalidParameter(format!(
                "{} must be a positive integer",
                key
            ))),
        }
    }

    fn get_vec_string(&self, key: &str) -> ModuleResult<Option<Vec<String>>> {
        match self.get(key) {
            Some(Value::Array(arr)) => Ok(Some(arr.iter().map(value_to_string).collect())),
            Some(Value::String(s)) => {
                // Handle comma-separated string
                Ok(Some(
                    s.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect(),
                ))
            }
            Some(Value::Null) | None => Ok(None),
            Some(_) => Err(ModuleError::InvalidParameter(format!(
                "{} must be an array",
                key
            ))),
        }
    }
}

/// Registry for looking up module functions by `module.function`
pub struct ModuleRegistry {
    modules: HashMap<String, Arc<dyn Module>>,
    /// Modules that passed their availability gate; `None` until loaded
    available: Option<HashSet<String>>,
}

impl ModuleRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            modules: HashMap::new(),
            available: None,
        }
    }

    /// Create a registry with all built-in modules
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(zypper::ZypperModule));
        registry.register(Arc::new(lowpkg::RpmModule));
        registry
    }

    /// Register a module
    pub fn register(&mut self, module: Arc<dyn Module>) {
        self.modules.insert(module.name().to_string(), module);
    }

    /// Get a module by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn Module>> {
        self.modules.get(name).cloned()
    }

    /// Check if a module is registered
    pub fn contains(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    /// Get all module names
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.modules.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Run every availability gate and remember which modules passed.
    ///
    /// Returns the modules that refused to load with their reasons.
    pub async fn load(&mut self, context: &ModuleContext) -> Vec<(String, String)> {
        let mut available = HashSet::new();
        let mut refused = Vec::new();
        for name in self.names().into_iter().map(String::from).collect::<Vec<_>>() {
            let Some(module) = self.get(&name) else {
                continue;
            };
            match module.is_available(context).await {
                Ok(()) => {
                    debug!(module = %name, "Module loaded");
                    available.insert(name);
                }
                Err(e) => {
                    info!(module = %name, reason = %e, "Module not loaded");
                    refused.push((name, e.to_string()));
                }
            }
        }
        self.available = Some(available);
        refused
    }

    fn is_loaded(&self, name: &str) -> bool {
        match &self.available {
            Some(set) => set.contains(name),
            None => self.modules.contains_key(name),
        }
    }

    /// Every callable `module.function`, sorted
    pub fn functions(&self) -> Vec<String> {
        let mut functions: Vec<String> = self
            .modules
            .iter()
            .filter(|(name, _)| self.is_loaded(name))
            .flat_map(|(name, module)| {
                module
                    .functions()
                    .iter()
                    .map(move |f| format!("{}.{}", name, f))
            })
            .collect();
        functions.sort();
        functions
    }

    /// Call a function by its full name, e.g. `pkg.install`
    pub async fn call(&self, full_name: &str, args: CallArgs, context: &ModuleContext) -> Result<Value> {
        let not_found = || Error::FunctionNotFound(full_name.to_string());
        let (module_name, function) = full_name.split_once('.').ok_or_else(not_found)?;
        if !self.is_loaded(module_name) {
            return Err(not_found());
        }
        let module = self.get(module_name).ok_or_else(not_found)?;
        if !module.functions().contains(&function) {
            return Err(not_found());
        }
        debug!(function = %full_name, args = ?args.args, "Calling module function");
        Ok(module.call(function, args, context).await?)
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}
