//! # zypperpkg - Zypper package management functions
//!
//! zypperpkg exposes package management for SUSE-family hosts as a set of
//! named functions, in the style of a remote-execution agent:
//!
//! - **`pkg.*`**: install, upgrade, remove, search and query packages, manage
//!   repositories and package locks, all through `zypper`
//! - **`lowpkg.*`**: query and verify the RPM database directly with `rpm`
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                           CLI Interface                              │
//! │                    (clap-based command parsing)                      │
//! └─────────────────────────────────────────────────────────────────────┘
//!                                    │
//!                                    ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                         Module Registry                              │
//! │         (availability gates, `module.function` dispatch)             │
//! └─────────────────────────────────────────────────────────────────────┘
//!                                    │
//!          ┌─────────────────────────┼─────────────────────────┐
//!          ▼                         ▼                         ▼
//! ┌─────────────────┐   ┌─────────────────────┐   ┌─────────────────────┐
//! │   pkg (zypper)  │   │    lowpkg (rpm)     │   │   Package helpers   │
//! │  caller, repos, │   │  info, verify,      │   │  targets, changes,  │
//! │  locks, search  │   │  owner, diff        │   │  version ordering   │
//! └─────────────────┘   └─────────────────────┘   └─────────────────────┘
//!          │                         │                         │
//!          └─────────────────────────┼─────────────────────────┘
//!                                    ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                         Connection                                   │
//! │            (command execution and file access on the host)           │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use zypperpkg::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let connection = Arc::new(LocalConnection::new());
//!     let facts = Facts::gather(connection.as_ref(), &Config::default()).await;
//!     let context = ModuleContext::new(connection).with_facts(facts);
//!
//!     let mut registry = ModuleRegistry::with_builtins();
//!     registry.load(&context).await;
//!
//!     let args = CallArgs::new().with_arg("vim");
//!     let changes = registry.call("pkg.install", args, &context).await?;
//!     println!("{}", changes);
//!     Ok(())
//! }
//! ```

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Re-export commonly used items in prelude
pub mod prelude {
    //! Convenient re-exports of commonly used types and traits.

    // Connection types
    pub use crate::connection::local::LocalConnection;
    pub use crate::connection::{
        CommandResult, Connection, ConnectionError, ConnectionResult, ExecuteOptions, FileStat,
    };

    // Error handling
    pub use crate::error::{Error, Result};

    // Configuration and facts
    pub use crate::config::Config;
    pub use crate::facts::Facts;

    // Module system
    pub use crate::modules::{
        CallArgs, Module, ModuleContext, ModuleError, ModuleParams, ModuleRegistry, ModuleResult,
    };

    // Caching and events
    pub use crate::cache::ContextCache;
    pub use crate::events::{EventSink, LogEventSink};
}

// ============================================================================
// Core Modules
// ============================================================================

/// Error types and result aliases for zypperpkg operations.
pub mod error;

/// Layered configuration (system, user, project, explicit file, environment).
pub mod config;

/// Host facts: OS family, release and architecture.
pub mod facts;

// ============================================================================
// Execution
// ============================================================================

/// Transport layer for running commands and reading files on the host.
pub mod connection;

/// Per-run cache shared by every function call of one context.
///
/// Package listings are expensive; functions that changed the package set
/// drop the cached entries again.
pub mod cache;

/// Events fired after package transactions.
pub mod events;

/// systemd checks used to decide on `systemd-run --scope`.
pub mod systemd;

// ============================================================================
// Package Management
// ============================================================================

/// Execution modules and the registry that dispatches `module.function`.
pub mod modules;

/// Package helpers shared by the modules: targets, change reports, versions.
pub mod pkg;

/// Read-only DOM for zypper's XML output.
pub mod xml;

/// Returns the current version of zypperpkg.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
