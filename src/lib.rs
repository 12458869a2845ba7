//! Dashpack - Compile dashboard UI modules into legacy script bundles
//!
//! This crate builds one self-contained script bundle per configured entry
//! for desktop hosts whose sandboxed script engine predates modern
//! JavaScript: no module system, no arrow functions, no block scoping and no
//! top-level wrapper around the registrations the host looks for.
//!
//! # Pipeline
//!
//! - Entries and module resolution (relative paths, `node_modules`, aliases)
//! - Per-file-type transform rules (TypeScript, JSX, CSS, JSON)
//! - Module table assembly with a tiny `require` runtime
//! - Output conformance checks for the language level the browser list selects
//! - Minification that keeps member-access syntax and top-level names
//! - Bracket rewriting of reserved-word property accesses
//! - Optional line-level source maps next to each bundle
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use dashpack::{Builder, Config, HashProvider};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load(None)?;
//!     let report = Builder::new(config, Arc::new(HashProvider::default()))
//!         .build()
//!         .await?;
//!
//!     for bundle in &report.published.bundles {
//!         println!("{} ({} bytes)", bundle.file, bundle.size);
//!     }
//!     Ok(())
//! }
//! ```

pub mod assembler;
pub mod builder;
pub mod cli;
pub mod compat;
pub mod config;
pub mod conformance;
pub mod entry;
pub mod errors;
pub mod externals;
pub mod graph;
pub mod hash;
pub mod linemap;
pub mod minify;
pub mod postprocess;
pub mod publish;
pub mod resolver;
pub mod transform;
pub mod typecheck;

// Re-export main types for convenience
pub use builder::{BuildReport, Builder};
pub use cli::BuildMode;
pub use compat::LanguageLevel;
pub use config::Config;
pub use errors::{DashpackError, Result};
pub use hash::HashProvider;

/// Current version of dashpack
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
