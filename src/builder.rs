use std::path::Component;
use std::sync::Arc;
use std::time::Instant;

use indicatif::{ProgressBar, ProgressStyle};
use tokio::task::JoinSet;
use tracing::{debug, info};

use crate::assembler::Assembler;
use crate::cli::BuildMode;
use crate::compat::{CompatDescriptor, LanguageLevel};
use crate::config::Config;
use crate::conformance::ConformanceCheck;
use crate::entry::{EntryDescriptor, EntryRegistry};
use crate::errors::{DashpackError, Result};
use crate::externals::ExternalBindings;
use crate::graph::{ModuleCompiler, ModuleGraph, ModuleIds};
use crate::hash::HashProvider;
use crate::minify::Minifier;
use crate::postprocess::PostProcessor;
use crate::publish::{map_file_name, BuiltBundle, PublishSummary, Publisher};
use crate::resolver::ModuleResolver;
use crate::transform::TransformPipeline;
use crate::typecheck::ProjectTypeCheck;

/// Runs one build: every entry compiled, assembled, checked and published
pub struct Builder {
    config: Config,
    mode: BuildMode,
    hash: Arc<HashProvider>,
}

/// Result of a successful build
#[derive(Debug)]
pub struct BuildReport {
    pub mode: BuildMode,
    pub level: LanguageLevel,
    pub published: PublishSummary,
    pub elapsed_ms: u64,
}

/// Steps applied to an assembled bundle, shared by all entry tasks
struct Finisher {
    assembler: Assembler,
    conformance: ConformanceCheck,
    minifier: Minifier,
    post_processor: PostProcessor,
    /// `sourceRoot` of written maps; `None` when maps are off
    source_root: Option<String>,
}

impl Finisher {
    fn finish(&self, entry: EntryDescriptor, graph: &ModuleGraph) -> Result<BuiltBundle> {
        let bundle = self.assembler.assemble(&entry, graph)?;
        self.conformance.check(&entry.name, &bundle.code)?;

        let (code, map) = if self.minifier.is_enabled() {
            let minified = self.minifier.minify(&entry.name, &bundle.code)?;
            self.conformance.check(&entry.name, &minified.code)?;
            let map = bundle.map.remap(&minified.lines);
            (minified.code, map)
        } else {
            (bundle.code, bundle.map)
        };

        // bracket rewrites keep every line where it was, so the map still holds
        let mut code = self.post_processor.process(&entry.name, &code)?;
        self.conformance.check(&entry.name, &code)?;

        let source_map = match &self.source_root {
            Some(source_root) => {
                let map_file = map_file_name(&entry.bundle_file);
                let json = map.to_json(&entry.bundle_file, source_root)?;
                if !code.ends_with('\n') {
                    code.push('\n');
                }
                code.push_str(&format!("//# sourceMappingURL={}\n", map_file));
                Some(json)
            }
            None => None,
        };

        Ok(BuiltBundle {
            entry: entry.name,
            file_name: entry.bundle_file,
            code,
            source_map,
        })
    }
}

impl Builder {
    pub fn new(config: Config, hash: Arc<HashProvider>) -> Self {
        let mode = config.build.mode;
        Self { config, mode, hash }
    }

    /// Override the configured build mode
    pub fn with_mode(mut self, mode: BuildMode) -> Self {
        self.mode = mode;
        self
    }

    pub async fn build(&self) -> Result<BuildReport> {
        let start_time = Instant::now();

        self.config
            .validate()
            .map_err(|e| DashpackError::configuration(format!("{:#}", e)))?;

        let hash_function = &self.config.output.hash_function;
        if !self.hash.supports(hash_function) {
            return Err(DashpackError::configuration(format!(
                "Unsupported hash function: {}",
                hash_function
            )));
        }

        let compat = CompatDescriptor::load(&self.config.root)?;
        let level = compat.language_level();
        info!(
            "Building {} bundles ({}, {})",
            self.config.entries.len(),
            self.mode.as_str(),
            level
        );

        if self.config.transform.project_type_check {
            if let Some(check) = ProjectTypeCheck::detect(&self.config.root) {
                check.run().await?;
            }
        }

        let compiler = Arc::new(self.module_compiler(level)?);
        let finisher = Arc::new(Finisher {
            assembler: Assembler::new(self.mode, level)?,
            conformance: ConformanceCheck::new(level),
            minifier: Minifier::new(&self.config.minify, level),
            post_processor: PostProcessor::new(&self.config.post_process),
            source_root: self.config.output.source_map.then(|| self.source_root()),
        });

        let registry = EntryRegistry::from_config(&self.config);
        let mut publisher = Publisher::new(&self.config, self.mode, level, Arc::clone(&self.hash));
        debug!("Build id {}", publisher.build_id());

        let progress = progress_bar(registry.len() as u64);
        let mut tasks = JoinSet::new();
        for entry in registry.iter().cloned() {
            let compiler = Arc::clone(&compiler);
            let finisher = Arc::clone(&finisher);
            tasks.spawn(async move {
                let graph = ModuleGraph::build(&compiler, &entry).await?;
                let bundle = tokio::task::spawn_blocking(move || finisher.finish(entry, &graph)).await??;
                Ok::<_, DashpackError>(bundle)
            });
        }

        let mut built = 0;
        while let Some(joined) = tasks.join_next().await {
            let bundle = match joined.map_err(DashpackError::from).and_then(|result| result) {
                Ok(bundle) => bundle,
                Err(e) => {
                    // fail fast: nothing from this run is published
                    tasks.abort_all();
                    progress.abandon();
                    return Err(e);
                }
            };

            publisher.accept(&bundle)?;
            built += 1;
            progress.set_message(bundle.file_name.clone());
            progress.inc(1);
            info!("Built {} ({} bytes)", bundle.file_name, bundle.code.len());
        }
        progress.finish_and_clear();

        if built != registry.len() {
            return Err(DashpackError::assembly(
                "*",
                format!("built {} bundles for {} entries", built, registry.len()),
            ));
        }

        let published = publisher.commit()?;
        let elapsed_ms = start_time.elapsed().as_millis() as u64;
        info!("Build completed in {}ms", elapsed_ms);

        Ok(BuildReport {
            mode: self.mode,
            level,
            published,
            elapsed_ms,
        })
    }

    /// Where map sources (project-relative paths) live, seen from the output directory
    fn source_root(&self) -> String {
        let directory = &self.config.output.directory;
        let simple = directory
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if simple {
            let depth = directory
                .components()
                .filter(|c| matches!(c, Component::Normal(_)))
                .count();
            return "../".repeat(depth);
        }

        let root = std::fs::canonicalize(&self.config.root).unwrap_or_else(|_| self.config.root.clone());
        format!("{}/", root.to_string_lossy().replace('\\', "/").trim_end_matches('/'))
    }

    fn module_compiler(&self, level: LanguageLevel) -> Result<ModuleCompiler> {
        let externals = Arc::new(ExternalBindings::new(&self.config.externals)?);
        let resolver = ModuleResolver::new(&self.config.resolve, externals);
        let pipeline = TransformPipeline::new(&self.config.rules, &self.config.transform, level, self.mode)?;
        let ids = ModuleIds::new(
            &self.config.root,
            self.mode,
            Arc::clone(&self.hash),
            &self.config.output.hash_function,
            self.config.output.hash_digest_length,
        );
        Ok(ModuleCompiler::new(pipeline, resolver, ids))
    }
}

fn progress_bar(len: u64) -> ProgressBar {
    let progress = ProgressBar::new(len);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
    {
        progress.set_style(style.progress_chars("#>-"));
    }
    progress
}
