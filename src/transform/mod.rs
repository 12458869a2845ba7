//! Per-file-type transform dispatch.
//!
//! Every module is matched against the configured rules in order. The first
//! rule whose pattern matches (and whose exclusion does not) selects a chain of
//! handlers; each handler consumes the previous handler's [`Asset`].

mod ecma;
mod json;
mod modules;
mod script;
mod style;
mod typescript;

use std::fmt;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cli::BuildMode;
use crate::compat::LanguageLevel;
use crate::config::{RuleConfig, TransformConfig};
use crate::errors::{CodeLocation, DashpackError, Result};
use crate::externals::ExternalBinding;
use crate::linemap::LineTable;

pub use ecma::scan_requires;
pub(crate) use ecma::emit;

/// A transform step named in a rule's `use` list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandlerKind {
    TypeScript,
    Script,
    Css,
    Style,
    Json,
}

impl fmt::Display for HandlerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::TypeScript => "typescript",
            Self::Script => "script",
            Self::Css => "css",
            Self::Style => "style",
            Self::Json => "json",
        };
        write!(f, "{}", name)
    }
}

/// How a module is placed in its bundle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleRole {
    /// Emitted at the top level of the bundle, exports removed
    Entry,
    /// Wrapped in the module table
    Dependency,
}

/// What an import specifier points at, as seen by a handler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleRef {
    Internal { id: String, path: PathBuf },
    External(ExternalBinding),
}

/// Resolves specifiers to bundle module ids for handlers
pub trait ImportResolver: Send + Sync {
    fn resolve_import(&self, importer: &Path, specifier: &str) -> Result<ModuleRef>;
}

/// A bundled module another module depends on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleDependency {
    pub specifier: String,
    pub id: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetKind {
    /// File contents as read from disk
    Source,
    /// Plain script still carrying module syntax
    Script,
    /// Stylesheet text
    Stylesheet,
    /// Legacy module body, ready for assembly
    Module,
}

/// The value flowing through a handler chain
#[derive(Debug, Clone)]
pub struct Asset {
    pub path: PathBuf,
    pub kind: AssetKind,
    pub code: String,
    /// Line of the file on disk for each line of `code`
    pub lines: LineTable,
    pub dependencies: Vec<ModuleDependency>,
    pub externals: Vec<ExternalBinding>,
    /// Stylesheet `@import` specifiers not yet resolved
    pub style_imports: Vec<String>,
}

impl Asset {
    pub fn source(path: impl Into<PathBuf>, code: impl Into<String>) -> Self {
        let code = code.into();
        Self {
            path: path.into(),
            kind: AssetKind::Source,
            lines: LineTable::identity(&code),
            code,
            dependencies: Vec::new(),
            externals: Vec::new(),
            style_imports: Vec::new(),
        }
    }

    fn add_dependency(&mut self, dependency: ModuleDependency) {
        if !self.dependencies.iter().any(|d| d.specifier == dependency.specifier) {
            self.dependencies.push(dependency);
        }
    }

    fn add_external(&mut self, binding: ExternalBinding) {
        if !self.externals.contains(&binding) {
            self.externals.push(binding);
        }
    }
}

/// Everything a handler may consult
pub struct HandlerContext<'a> {
    pub role: ModuleRole,
    pub level: LanguageLevel,
    pub mode: BuildMode,
    pub options: &'a TransformConfig,
    pub imports: &'a dyn ImportResolver,
}

/// One step of a handler chain
pub trait Handler: Send + Sync {
    fn kind(&self) -> HandlerKind;

    fn apply(&self, asset: Asset, ctx: &HandlerContext<'_>) -> Result<Asset>;
}

fn handler_for(kind: HandlerKind) -> &'static dyn Handler {
    match kind {
        HandlerKind::TypeScript => &typescript::TypeScriptHandler,
        HandlerKind::Script => &script::ScriptHandler,
        HandlerKind::Css => &style::CssHandler,
        HandlerKind::Style => &style::StyleHandler,
        HandlerKind::Json => &json::JsonHandler,
    }
}

/// A handler was given an asset it cannot consume
fn unexpected_input(handler: HandlerKind, asset: &Asset) -> DashpackError {
    DashpackError::compile(
        CodeLocation::new(&asset.path),
        format!("handler '{}' cannot consume {:?} input", handler, asset.kind),
    )
}

struct CompiledRule {
    test: Regex,
    exclude: Option<Regex>,
    handlers: Vec<HandlerKind>,
}

/// Outcome of rule selection for one path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection<'a> {
    Handlers(&'a [HandlerKind]),
    /// Excluded vendored code, bundled as-is
    Passthrough,
}

/// Result of compiling one module
#[derive(Debug, Clone)]
pub struct CompiledSource {
    pub code: String,
    pub lines: LineTable,
    pub dependencies: Vec<ModuleDependency>,
    pub externals: Vec<ExternalBinding>,
    pub passthrough: bool,
}

pub struct TransformPipeline {
    rules: Vec<CompiledRule>,
    options: TransformConfig,
    level: LanguageLevel,
    mode: BuildMode,
}

impl TransformPipeline {
    pub fn new(
        rules: &[RuleConfig],
        options: &TransformConfig,
        level: LanguageLevel,
        mode: BuildMode,
    ) -> Result<Self> {
        let rules = rules
            .iter()
            .map(|rule| {
                let test = compile_pattern(&rule.test)?;
                let exclude = rule.exclude.as_deref().map(compile_pattern).transpose()?;
                Ok(CompiledRule {
                    test,
                    exclude,
                    handlers: rule.handlers.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            rules,
            options: options.clone(),
            level,
            mode,
        })
    }

    /// First matching rule wins; a rule's exclusion is checked before its pattern.
    pub fn select(&self, path: &Path) -> Result<Selection<'_>> {
        let subject = path_subject(path);
        let mut excluded = false;

        for rule in &self.rules {
            if rule.exclude.as_ref().is_some_and(|re| re.is_match(&subject)) {
                excluded |= rule.test.is_match(&subject);
                continue;
            }
            if rule.test.is_match(&subject) {
                return Ok(Selection::Handlers(&rule.handlers));
            }
        }

        if excluded {
            Ok(Selection::Passthrough)
        } else {
            Err(DashpackError::compile(
                CodeLocation::new(path),
                "no transform rule matches this file",
            ))
        }
    }

    /// Compile one module read from `path`
    pub fn compile(
        &self,
        path: &Path,
        source: String,
        role: ModuleRole,
        imports: &dyn ImportResolver,
    ) -> Result<CompiledSource> {
        match self.select(path)? {
            Selection::Passthrough => {
                debug!("Passing through {}", path.display());
                self.passthrough(path, source, imports)
            }
            Selection::Handlers(handlers) => {
                let ctx = HandlerContext {
                    role,
                    level: self.level,
                    mode: self.mode,
                    options: &self.options,
                    imports,
                };

                let mut asset = Asset::source(path, source);
                for kind in handlers {
                    debug!("Running {} handler on {}", kind, path.display());
                    asset = handler_for(*kind).apply(asset, &ctx)?;
                }

                if asset.kind != AssetKind::Module {
                    return Err(DashpackError::compile(
                        CodeLocation::new(path),
                        format!(
                            "handler chain [{}] does not produce a script module",
                            handlers.iter().map(|h| h.to_string()).collect::<Vec<_>>().join(", ")
                        ),
                    ));
                }

                Ok(CompiledSource {
                    code: asset.code,
                    lines: asset.lines,
                    dependencies: asset.dependencies,
                    externals: asset.externals,
                    passthrough: false,
                })
            }
        }
    }

    /// Vendored code is left untouched; only its `require` calls are recorded.
    fn passthrough(
        &self,
        path: &Path,
        source: String,
        imports: &dyn ImportResolver,
    ) -> Result<CompiledSource> {
        let mut asset = Asset::source(path, String::new());

        for specifier in scan_requires(path, &source)? {
            match imports.resolve_import(path, &specifier)? {
                ModuleRef::Internal { id, path } => asset.add_dependency(ModuleDependency {
                    specifier,
                    id,
                    path,
                }),
                ModuleRef::External(binding) => asset.add_external(binding),
            }
        }

        Ok(CompiledSource {
            lines: LineTable::identity(&source),
            code: source,
            dependencies: asset.dependencies,
            externals: asset.externals,
            passthrough: true,
        })
    }
}

fn compile_pattern(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| {
        DashpackError::configuration_with_source(format!("Invalid rule pattern '{}'", pattern), e)
    })
}

/// Rules always see forward slashes
fn path_subject(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
