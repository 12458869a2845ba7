use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use crate::config::ResolveConfig;
use crate::errors::{DashpackError, Result};
use crate::externals::{ExternalBinding, ExternalBindings};

/// What an import specifier refers to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedImport {
    /// A file that becomes part of the bundle
    Module(PathBuf),
    /// A host global, never bundled
    External(ExternalBinding),
}

/// Resolves module specifiers to files
pub struct ModuleResolver {
    extensions: Vec<String>,
    alias_map: BTreeMap<String, String>,
    externals: Arc<ExternalBindings>,
}

impl ModuleResolver {
    pub fn new(config: &ResolveConfig, externals: Arc<ExternalBindings>) -> Self {
        Self {
            extensions: config.extensions.clone(),
            alias_map: config.alias.clone(),
            externals,
        }
    }

    /// Resolve `specifier` as imported from the file `importer`
    pub fn resolve(&self, importer: &Path, specifier: &str) -> Result<ResolvedImport> {
        if let Some(binding) = self.externals.get(specifier) {
            return Ok(ResolvedImport::External(binding.clone()));
        }

        let request = self.apply_alias(specifier);
        let base_dir = importer.parent().unwrap_or_else(|| Path::new("."));

        let resolved = if is_relative(&request) || Path::new(&request).is_absolute() {
            self.resolve_file_or_dir(&normalize(&base_dir.join(&request)))
        } else {
            self.resolve_package_request(base_dir, &request)
        };

        match resolved {
            Some(path) => {
                debug!("Resolved '{}' from {} to {}", specifier, importer.display(), path.display());
                Ok(ResolvedImport::Module(path))
            }
            None => Err(DashpackError::resolution(
                importer.display().to_string(),
                specifier,
            )),
        }
    }

    /// Check aliases first: exact key, or `key/subpath`
    fn apply_alias(&self, specifier: &str) -> String {
        if let Some(aliased) = self.alias_map.get(specifier) {
            return aliased.clone();
        }

        for (key, target) in &self.alias_map {
            if let Some(rest) = specifier.strip_prefix(key.as_str()) {
                if rest.starts_with('/') {
                    return format!("{}{}", target, rest);
                }
            }
        }

        specifier.to_string()
    }

    /// Bare specifier: walk node_modules directories up from the importer
    fn resolve_package_request(&self, base_dir: &Path, request: &str) -> Option<PathBuf> {
        let (package, subpath) = split_package_request(request);

        for dir in base_dir.ancestors() {
            let package_dir = dir.join("node_modules").join(package);
            if !package_dir.is_dir() {
                continue;
            }

            return match subpath {
                Some(subpath) => self.resolve_file_or_dir(&package_dir.join(subpath)),
                None => self.resolve_directory(&package_dir),
            };
        }

        None
    }

    fn resolve_file_or_dir(&self, path: &Path) -> Option<PathBuf> {
        self.resolve_file(path)
            .or_else(|| path.is_dir().then(|| self.resolve_directory(path)).flatten())
    }

    /// The exact path, then the path with each extension appended
    fn resolve_file(&self, path: &Path) -> Option<PathBuf> {
        if path.is_file() {
            return Some(path.to_path_buf());
        }

        self.extensions.iter().find_map(|ext| {
            let mut candidate = path.as_os_str().to_owned();
            candidate.push(ext);
            let candidate = PathBuf::from(candidate);
            candidate.is_file().then_some(candidate)
        })
    }

    /// package.json `browser` (string form) or `main`, then `index`
    fn resolve_directory(&self, dir: &Path) -> Option<PathBuf> {
        let manifest = dir.join("package.json");
        if let Ok(content) = std::fs::read_to_string(&manifest) {
            if let Ok(package) = serde_json::from_str::<serde_json::Value>(&content) {
                let main = package
                    .get("browser")
                    .and_then(|v| v.as_str())
                    .or_else(|| package.get("main").and_then(|v| v.as_str()));

                if let Some(main) = main {
                    let target = normalize(&dir.join(main));
                    if let Some(found) = self.resolve_file(&target) {
                        return Some(found);
                    }
                    if target.is_dir() && target != dir {
                        if let Some(found) = self.resolve_file(&target.join("index")) {
                            return Some(found);
                        }
                    }
                }
            }
        }

        self.resolve_file(&dir.join("index"))
    }
}

fn is_relative(request: &str) -> bool {
    request == "." || request == ".." || request.starts_with("./") || request.starts_with("../")
}

/// `@scope/pkg/sub/path` -> (`@scope/pkg`, Some(`sub/path`))
fn split_package_request(request: &str) -> (&str, Option<&str>) {
    let name_segments = if request.starts_with('@') { 2 } else { 1 };

    let mut split_at = None;
    let mut seen = 0;
    for (index, ch) in request.char_indices() {
        if ch == '/' {
            seen += 1;
            if seen == name_segments {
                split_at = Some(index);
                break;
            }
        }
    }

    match split_at {
        Some(index) => (&request[..index], Some(&request[index + 1..])),
        None => (request, None),
    }
}

/// Lexically resolve `.` and `..` components
pub fn normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    normalized.push("..");
                }
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn resolver(externals: &[(&str, &str)]) -> ModuleResolver {
        let table = externals
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ModuleResolver::new(
            &ResolveConfig::default(),
            Arc::new(ExternalBindings::new(&table).unwrap()),
        )
    }

    fn touch(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_extension_try_order() {
        let dir = TempDir::new().unwrap();
        let importer = dir.path().join("src/main.ts");
        touch(&importer, "");
        touch(&dir.path().join("src/util.ts"), "");
        touch(&dir.path().join("src/util.tsx"), "");
        touch(&dir.path().join("src/Base.dashboard.ts"), "");

        let r = resolver(&[]);
        assert_eq!(
            r.resolve(&importer, "./util").unwrap(),
            ResolvedImport::Module(dir.path().join("src/util.tsx"))
        );
        // dotted names get the extension appended, not replaced
        assert_eq!(
            r.resolve(&importer, "./Base.dashboard").unwrap(),
            ResolvedImport::Module(dir.path().join("src/Base.dashboard.ts"))
        );
    }

    #[test]
    fn test_alias_and_node_modules() {
        let dir = TempDir::new().unwrap();
        let importer = dir.path().join("src/deep/main.ts");
        touch(&importer, "");
        touch(&dir.path().join("node_modules/mocha/mocha.js"), "");
        touch(&dir.path().join("node_modules/mocha/package.json"), r#"{"main": "index.js"}"#);
        touch(&dir.path().join("node_modules/es6-promise/package.json"), r#"{"main": "dist/es6-promise"}"#);
        touch(&dir.path().join("node_modules/es6-promise/dist/es6-promise.js"), "");

        let r = resolver(&[]);
        assert_eq!(
            r.resolve(&importer, "mocha").unwrap(),
            ResolvedImport::Module(dir.path().join("node_modules/mocha/mocha.js"))
        );
        assert_eq!(
            r.resolve(&importer, "es6-promise").unwrap(),
            ResolvedImport::Module(dir.path().join("node_modules/es6-promise/dist/es6-promise.js"))
        );
    }

    #[test]
    fn test_externals_never_touch_filesystem() {
        let dir = TempDir::new().unwrap();
        let importer = dir.path().join("main.ts");
        touch(&dir.path().join("node_modules/MFiles/index.js"), "");

        let r = resolver(&[("MFiles", "MFiles")]);
        match r.resolve(&importer, "MFiles").unwrap() {
            ResolvedImport::External(binding) => assert_eq!(binding.expression, "MFiles"),
            other => panic!("expected external, got {:?}", other),
        }
    }

    #[test]
    fn test_unresolvable_names_importer_and_specifier() {
        let dir = TempDir::new().unwrap();
        let importer = dir.path().join("src/main.ts");
        touch(&importer, "");

        let err = resolver(&[]).resolve(&importer, "./missing").unwrap_err();
        match err {
            DashpackError::Resolution { importer: from, specifier } => {
                assert!(from.ends_with("main.ts"));
                assert_eq!(specifier, "./missing");
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_split_package_request() {
        assert_eq!(split_package_request("mocha"), ("mocha", None));
        assert_eq!(split_package_request("mocha/mocha.js"), ("mocha", Some("mocha.js")));
        assert_eq!(split_package_request("@scope/pkg/a/b"), ("@scope/pkg", Some("a/b")));
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize(Path::new("/a/./b/../c")), PathBuf::from("/a/c"));
    }
}
