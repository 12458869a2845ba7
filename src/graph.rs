//! Per-entry module graphs over a shared compiled-module cache.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, trace};

use crate::cli::BuildMode;
use crate::entry::EntryDescriptor;
use crate::errors::{DashpackError, Result};
use crate::externals::ExternalBinding;
use crate::hash::HashProvider;
use crate::linemap::LineTable;
use crate::resolver::{ModuleResolver, ResolvedImport};
use crate::transform::{
    ImportResolver, ModuleDependency, ModuleRef, ModuleRole, TransformPipeline,
};

/// One module after its handler chain ran
#[derive(Debug, Clone)]
pub struct CompiledModule {
    pub id: String,
    pub path: PathBuf,
    /// Project-relative path, as named in source maps
    pub source_name: String,
    pub role: ModuleRole,
    pub code: String,
    /// Line of the module file for each line of `code`
    pub lines: LineTable,
    pub dependencies: Vec<ModuleDependency>,
    pub externals: Vec<ExternalBinding>,
    pub passthrough: bool,
}

/// Assigns the ids modules are registered under in a bundle
pub struct ModuleIds {
    root: PathBuf,
    mode: BuildMode,
    hash: Arc<HashProvider>,
    algorithm: String,
    digest_length: usize,
}

impl ModuleIds {
    pub fn new(
        root: &Path,
        mode: BuildMode,
        hash: Arc<HashProvider>,
        algorithm: &str,
        digest_length: usize,
    ) -> Self {
        Self {
            root: root.to_path_buf(),
            mode,
            hash,
            algorithm: algorithm.to_string(),
            digest_length,
        }
    }

    /// `./src/util.ts` in development, a digest of that path in production
    pub fn id_for(&self, path: &Path) -> Result<String> {
        let readable = self.relative_path(path);
        match self.mode {
            BuildMode::Development => Ok(readable),
            BuildMode::Production => {
                self.hash
                    .digest_hex(&self.algorithm, readable.as_bytes(), self.digest_length)
            }
        }
    }

    /// Project-relative path with forward slashes
    pub fn relative_path(&self, path: &Path) -> String {
        match path.strip_prefix(&self.root) {
            Ok(relative) => format!("./{}", relative.to_string_lossy().replace('\\', "/")),
            Err(_) => path.to_string_lossy().replace('\\', "/"),
        }
    }

    /// `src/util.ts`; kept readable in every mode
    pub fn source_name(&self, path: &Path) -> String {
        let relative = self.relative_path(path);
        match relative.strip_prefix("./") {
            Some(stripped) => stripped.to_string(),
            None => relative,
        }
    }
}

/// Bridges the resolver and id assignment for handlers
struct GraphImports<'a> {
    resolver: &'a ModuleResolver,
    ids: &'a ModuleIds,
}

impl ImportResolver for GraphImports<'_> {
    fn resolve_import(&self, importer: &Path, specifier: &str) -> Result<ModuleRef> {
        match self.resolver.resolve(importer, specifier)? {
            ResolvedImport::Module(path) => Ok(ModuleRef::Internal {
                id: self.ids.id_for(&path)?,
                path,
            }),
            ResolvedImport::External(binding) => Ok(ModuleRef::External(binding)),
        }
    }
}

type CacheKey = (PathBuf, ModuleRole);

/// Compiles modules at most once per (path, role), shared by all entries
pub struct ModuleCompiler {
    pipeline: TransformPipeline,
    resolver: ModuleResolver,
    ids: ModuleIds,
    cache: Mutex<HashMap<CacheKey, Arc<OnceCell<Arc<CompiledModule>>>>>,
}

impl ModuleCompiler {
    pub fn new(pipeline: TransformPipeline, resolver: ModuleResolver, ids: ModuleIds) -> Self {
        Self {
            pipeline,
            resolver,
            ids,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn ids(&self) -> &ModuleIds {
        &self.ids
    }

    /// Compile `path`, or wait for the worker already compiling it
    pub async fn compile(self: &Arc<Self>, path: &Path, role: ModuleRole) -> Result<Arc<CompiledModule>> {
        let cell = {
            let mut cache = self.cache.lock().await;
            cache
                .entry((path.to_path_buf(), role))
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };

        cell.get_or_try_init(|| {
            let compiler = Arc::clone(self);
            let path = path.to_path_buf();
            async move {
                tokio::task::spawn_blocking(move || compiler.compile_blocking(&path, role)).await?
            }
        })
        .await
        .cloned()
    }

    fn compile_blocking(&self, path: &Path, role: ModuleRole) -> Result<Arc<CompiledModule>> {
        debug!("Compiling {} as {:?}", path.display(), role);

        let source = std::fs::read_to_string(path)
            .map_err(|e| DashpackError::file_system_error("Failed to read module", path, e))?;

        let imports = GraphImports {
            resolver: &self.resolver,
            ids: &self.ids,
        };
        let compiled = self.pipeline.compile(path, source, role, &imports)?;

        Ok(Arc::new(CompiledModule {
            id: self.ids.id_for(path)?,
            path: path.to_path_buf(),
            source_name: self.ids.source_name(path),
            role,
            code: compiled.code,
            lines: compiled.lines,
            dependencies: compiled.dependencies,
            externals: compiled.externals,
            passthrough: compiled.passthrough,
        }))
    }
}

/// Everything one bundle contains
#[derive(Debug, Clone)]
pub struct ModuleGraph {
    pub entry: Arc<CompiledModule>,
    /// Bundled dependencies in discovery order
    pub modules: Vec<Arc<CompiledModule>>,
}

impl ModuleGraph {
    /// Walk the entry's dependencies breadth-first
    pub async fn build(compiler: &Arc<ModuleCompiler>, entry: &EntryDescriptor) -> Result<Self> {
        if !entry.source_path.is_file() {
            return Err(DashpackError::resolution(
                entry.name.clone(),
                entry.source_path.display().to_string(),
            ));
        }

        let root = compiler.compile(&entry.source_path, ModuleRole::Entry).await?;

        let mut seen: HashSet<PathBuf> = HashSet::from([entry.source_path.clone()]);
        let mut queue: VecDeque<Arc<CompiledModule>> = VecDeque::from([Arc::clone(&root)]);
        let mut modules = Vec::new();

        while let Some(module) = queue.pop_front() {
            for dependency in &module.dependencies {
                if dependency.path == entry.source_path {
                    return Err(DashpackError::assembly(
                        &entry.name,
                        format!(
                            "{} imports the entry module '{}'; entry modules cannot be dependencies",
                            compiler.ids().relative_path(&module.path),
                            dependency.specifier
                        ),
                    ));
                }
                if !seen.insert(dependency.path.clone()) {
                    continue;
                }

                trace!("{} -> {}", module.id, dependency.id);
                let compiled = compiler.compile(&dependency.path, ModuleRole::Dependency).await?;
                modules.push(Arc::clone(&compiled));
                queue.push_back(compiled);
            }
        }

        debug!("Entry '{}' bundles {} modules", entry.name, modules.len() + 1);
        Ok(Self { entry: root, modules })
    }

    /// Host globals required by passthrough modules, deduplicated
    pub fn passthrough_externals(&self) -> Vec<&ExternalBinding> {
        let mut externals: Vec<&ExternalBinding> = Vec::new();
        for module in self.modules.iter().filter(|m| m.passthrough) {
            for binding in &module.externals {
                if !externals.iter().any(|b| b.import_name == binding.import_name) {
                    externals.push(binding);
                }
            }
        }
        externals
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compat::LanguageLevel;
    use crate::config::Config;
    use crate::externals::ExternalBindings;
    use std::fs;
    use tempfile::TempDir;

    fn compiler(root: &Path, mode: BuildMode) -> Arc<ModuleCompiler> {
        let config = Config::default();
        let pipeline =
            TransformPipeline::new(&config.rules, &config.transform, LanguageLevel::Es5, mode).unwrap();
        let externals = Arc::new(ExternalBindings::new(&config.externals).unwrap());
        let resolver = ModuleResolver::new(&config.resolve, externals);
        let ids = ModuleIds::new(root, mode, Arc::new(HashProvider::default()), "md4", 20);
        Arc::new(ModuleCompiler::new(pipeline, resolver, ids))
    }

    fn write(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn entry(root: &Path, name: &str, source: &str) -> EntryDescriptor {
        EntryDescriptor {
            name: name.to_string(),
            source_path: root.join(source),
            bundle_file: format!("{}.bundle.js", name),
        }
    }

    #[test]
    fn test_module_ids_by_mode() {
        let hash = Arc::new(HashProvider::default());
        let dev = ModuleIds::new(Path::new("/p"), BuildMode::Development, hash.clone(), "md4", 20);
        assert_eq!(dev.id_for(Path::new("/p/src/a.ts")).unwrap(), "./src/a.ts");

        let prod = ModuleIds::new(Path::new("/p"), BuildMode::Production, hash, "md4", 20);
        let id = prod.id_for(Path::new("/p/src/a.ts")).unwrap();
        assert_eq!(id.len(), 20);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(prod.source_name(Path::new("/p/src/a.ts")), "src/a.ts");
    }

    #[tokio::test]
    async fn test_graph_collects_dependencies_once() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        write(&root.join("src/main.ts"), "import { a } from \"./a\";\nimport { b } from \"./b\";\nfunction OnNewShellUI() { return a + b; }\n");
        write(&root.join("src/a.ts"), "import { b } from \"./b\";\nexport const a = b + 1;\n");
        write(&root.join("src/b.ts"), "export const b = 1;\n");

        let compiler = compiler(root, BuildMode::Development);
        let graph = ModuleGraph::build(&compiler, &entry(root, "shellui", "src/main.ts")).await.unwrap();

        let ids: Vec<&str> = graph.modules.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["./src/a.ts", "./src/b.ts"]);
        assert_eq!(graph.entry.role, ModuleRole::Entry);
    }

    #[tokio::test]
    async fn test_shared_module_is_compiled_once() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        write(&root.join("src/one.ts"), "import { b } from \"./b\";\nvar one = b;\n");
        write(&root.join("src/two.ts"), "import { b } from \"./b\";\nvar two = b;\n");
        write(&root.join("src/b.ts"), "export const b = 1;\n");

        let compiler = compiler(root, BuildMode::Development);
        let first = entry(root, "one", "src/one.ts");
        let second = entry(root, "two", "src/two.ts");
        let (one, two) = tokio::join!(
            ModuleGraph::build(&compiler, &first),
            ModuleGraph::build(&compiler, &second),
        );

        let one = one.unwrap();
        let two = two.unwrap();
        assert!(Arc::ptr_eq(&one.modules[0], &two.modules[0]));
    }

    #[tokio::test]
    async fn test_importing_the_entry_is_assembly_error() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        write(&root.join("src/main.ts"), "import { helper } from \"./helper\";\nvar x = helper;\n");
        write(&root.join("src/helper.ts"), "import \"./main\";\nexport const helper = 1;\n");

        let compiler = compiler(root, BuildMode::Development);
        let err = ModuleGraph::build(&compiler, &entry(root, "main", "src/main.ts")).await.unwrap_err();
        assert!(matches!(err, DashpackError::Assembly { .. }));
    }

    #[tokio::test]
    async fn test_missing_entry_source_names_entry() {
        let dir = TempDir::new().unwrap();
        let compiler = compiler(dir.path(), BuildMode::Development);
        let err = ModuleGraph::build(&compiler, &entry(dir.path(), "gone", "src/gone.ts")).await.unwrap_err();
        match err {
            DashpackError::Resolution { importer, .. } => assert_eq!(importer, "gone"),
            other => panic!("unexpected {:?}", other),
        }
    }
}
