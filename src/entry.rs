use std::path::{Path, PathBuf};

use crate::config::Config;

/// One named build target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryDescriptor {
    pub name: String,
    pub source_path: PathBuf,
    pub bundle_file: String,
}

/// The configured build targets, fixed for the run
#[derive(Debug, Clone)]
pub struct EntryRegistry {
    entries: Vec<EntryDescriptor>,
}

impl EntryRegistry {
    pub fn from_config(config: &Config) -> Self {
        let entries = config
            .entries
            .iter()
            .map(|(name, source)| EntryDescriptor {
                name: name.clone(),
                source_path: absolutize(&config.root, source),
                bundle_file: config.bundle_file_name(name),
            })
            .collect();

        Self { entries }
    }

    pub fn iter(&self) -> impl Iterator<Item = &EntryDescriptor> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn bundle_files(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.bundle_file.as_str()).collect()
    }
}

/// Join a configured path onto the project root, dropping `./` segments
pub fn absolutize(root: &Path, path: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    };
    crate::resolver::normalize(&joined)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_maps_names_to_bundles() {
        let mut config = Config::default();
        config.root = PathBuf::from("/project");

        let registry = EntryRegistry::from_config(&config);
        assert_eq!(registry.len(), 3);

        let sample = registry
            .iter()
            .find(|e| e.name == "Sample.dashboard")
            .unwrap();
        assert_eq!(sample.bundle_file, "Sample.dashboard.bundle.js");
        assert_eq!(
            sample.source_path,
            PathBuf::from("/project/src/dashboards/sample-dashboard/Sample.dashboard.tsx")
        );
    }

    #[test]
    fn test_bundle_names_are_unique() {
        let registry = EntryRegistry::from_config(&Config::default());
        let mut files = registry.bundle_files();
        files.sort();
        files.dedup();
        assert_eq!(files.len(), registry.len());
    }
}
