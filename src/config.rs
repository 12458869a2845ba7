use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::cli::BuildMode;
use crate::minify::MinifierConfig;
use crate::postprocess::{PostProcessRule, RewritePosition};
use crate::transform::HandlerKind;

/// File name looked up in the working directory and its parents
pub const CONFIG_FILE_NAME: &str = "dashpack.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Build profile
    #[serde(default)]
    pub build: BuildConfig,

    /// Named build targets: bundle name -> source module
    #[serde(default = "default_entries")]
    pub entries: BTreeMap<String, PathBuf>,

    /// Module resolution
    #[serde(default)]
    pub resolve: ResolveConfig,

    /// Transform rules, first match wins
    #[serde(default = "default_rules")]
    pub rules: Vec<RuleConfig>,

    /// Import names provided by the host at runtime: import name -> global expression
    #[serde(default = "default_externals")]
    pub externals: BTreeMap<String, String>,

    /// Source transform options
    #[serde(default)]
    pub transform: TransformConfig,

    /// Output configuration
    #[serde(default)]
    pub output: OutputConfig,

    /// Minifier configuration
    #[serde(default)]
    pub minify: MinifierConfig,

    /// Rewrites applied to the final bundle text
    #[serde(default = "default_post_process")]
    pub post_process: Vec<PostProcessRule>,

    /// Directory all relative paths are resolved against
    #[serde(skip)]
    pub root: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Default build mode, overridable with `--mode`
    #[serde(default)]
    pub mode: BuildMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolveConfig {
    /// Extensions tried, in order, for extension-less specifiers
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,

    /// Specifiers remapped before filesystem resolution
    #[serde(default = "default_aliases")]
    pub alias: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleConfig {
    /// Regex matched against the module path
    pub test: String,

    /// Handlers run in order
    #[serde(rename = "use")]
    pub handlers: Vec<HandlerKind>,

    /// Regex of paths this rule never applies to
    pub exclude: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformConfig {
    /// JSX factory for the classic runtime
    #[serde(default = "default_jsx_pragma")]
    pub jsx_pragma: String,

    /// JSX fragment factory
    #[serde(default = "default_jsx_pragma_frag")]
    pub jsx_pragma_frag: String,

    /// Type-check the project with its own `node_modules/.bin/tsc` when installed
    #[serde(default = "default_true")]
    pub project_type_check: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PublishMode {
    /// Stage every bundle and publish only when all entries succeeded
    #[default]
    Atomic,
    /// Write each bundle as soon as it is built
    Incremental,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Output directory
    #[serde(default = "default_output_dir")]
    pub directory: PathBuf,

    /// Bundle file name pattern, `[name]` is the entry name
    #[serde(default = "default_filename")]
    pub filename: String,

    /// Publication strategy
    #[serde(default)]
    pub publish: PublishMode,

    /// Remove bundles of entries that are no longer configured
    #[serde(default)]
    pub clean: bool,

    /// Hash function for module ids and content hashes
    #[serde(default = "default_hash_function")]
    pub hash_function: String,

    /// Hex characters kept from each digest
    #[serde(default = "default_hash_digest_length")]
    pub hash_digest_length: usize,

    /// Write dashpack-manifest.json next to the bundles
    #[serde(default)]
    pub manifest: bool,

    /// Write a line-level `<bundle>.map` next to each bundle
    #[serde(default)]
    pub source_map: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            build: BuildConfig::default(),
            entries: default_entries(),
            resolve: ResolveConfig::default(),
            rules: default_rules(),
            externals: default_externals(),
            transform: TransformConfig::default(),
            output: OutputConfig::default(),
            minify: MinifierConfig::default(),
            post_process: default_post_process(),
            root: PathBuf::from("."),
        }
    }
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            mode: BuildMode::Development,
        }
    }
}

impl Default for ResolveConfig {
    fn default() -> Self {
        Self {
            extensions: default_extensions(),
            alias: default_aliases(),
        }
    }
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            jsx_pragma: default_jsx_pragma(),
            jsx_pragma_frag: default_jsx_pragma_frag(),
            project_type_check: true,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: default_output_dir(),
            filename: default_filename(),
            publish: PublishMode::Atomic,
            clean: false,
            hash_function: default_hash_function(),
            hash_digest_length: default_hash_digest_length(),
            manifest: false,
            source_map: false,
        }
    }
}

impl Config {
    /// Load configuration from file or use defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::find_config_file()?,
        };

        if config_path.exists() {
            Self::from_file(&config_path)
        } else if path.is_some() {
            anyhow::bail!("Config file not found: {}", config_path.display())
        } else {
            let mut config = Config::default();
            config.root = std::env::current_dir()
                .context("Failed to get current directory")?;
            Ok(config)
        }
    }

    /// Parse a config file; its directory becomes the project root
    pub fn from_file(config_path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        config.root = match config_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => std::env::current_dir().context("Failed to get current directory")?,
        };

        Ok(config)
    }

    /// Initialize configuration file
    pub fn init(output_dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(output_dir)
            .with_context(|| format!("Failed to create directory: {}", output_dir.display()))?;

        let config_path = output_dir.join(CONFIG_FILE_NAME);
        if config_path.exists() {
            anyhow::bail!("Refusing to overwrite existing {}", config_path.display());
        }

        let content = toml::to_string_pretty(&Config::default())
            .context("Failed to serialize default configuration")?;

        std::fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;

        Ok(config_path)
    }

    /// Absolute path of the output directory
    pub fn output_dir(&self) -> PathBuf {
        self.root.join(&self.output.directory)
    }

    /// Bundle file name for an entry
    pub fn bundle_file_name(&self, entry_name: &str) -> String {
        self.output.filename.replace("[name]", entry_name)
    }

    /// Reject configurations no build could satisfy
    pub fn validate(&self) -> Result<()> {
        if self.entries.is_empty() {
            anyhow::bail!("No entries configured");
        }

        for name in self.entries.keys() {
            if name.trim().is_empty() || name.contains(['/', '\\']) {
                anyhow::bail!("Invalid entry name '{}'", name);
            }
        }

        if !self.output.filename.contains("[name]") {
            anyhow::bail!(
                "output.filename '{}' must contain [name] so every entry gets its own bundle",
                self.output.filename
            );
        }

        if self.rules.iter().any(|rule| rule.handlers.is_empty()) {
            anyhow::bail!("Every transform rule needs at least one handler");
        }

        Ok(())
    }

    /// Find configuration file in standard locations
    fn find_config_file() -> Result<PathBuf> {
        let current_dir = std::env::current_dir()
            .context("Failed to get current directory")?;

        // Look for dashpack.toml in current directory and parents
        let mut dir = current_dir.as_path();
        loop {
            let config_path = dir.join(CONFIG_FILE_NAME);
            if config_path.exists() {
                return Ok(config_path);
            }

            match dir.parent() {
                Some(parent) => dir = parent,
                None => break,
            }
        }

        // Look in config directory
        if let Some(config_dir) = dirs::config_dir() {
            let config_path = config_dir.join("dashpack").join("config.toml");
            if config_path.exists() {
                return Ok(config_path);
            }
        }

        // Return default path (may not exist)
        Ok(current_dir.join(CONFIG_FILE_NAME))
    }
}

// Default value functions
fn default_entries() -> BTreeMap<String, PathBuf> {
    BTreeMap::from([
        ("shellui".to_string(), PathBuf::from("./src/shellui.ts")),
        (
            "Base.dashboard".to_string(),
            PathBuf::from("./src/dashboards/base-dashboard/Base.dashboard.ts"),
        ),
        (
            "Sample.dashboard".to_string(),
            PathBuf::from("./src/dashboards/sample-dashboard/Sample.dashboard.tsx"),
        ),
    ])
}

fn default_extensions() -> Vec<String> {
    vec![".tsx".to_string(), ".ts".to_string(), ".js".to_string()]
}

fn default_aliases() -> BTreeMap<String, String> {
    BTreeMap::from([("mocha".to_string(), "mocha/mocha.js".to_string())])
}

fn default_rules() -> Vec<RuleConfig> {
    vec![
        RuleConfig {
            test: r"\.tsx?$".to_string(),
            handlers: vec![HandlerKind::TypeScript, HandlerKind::Script],
            exclude: Some("node_modules".to_string()),
        },
        RuleConfig {
            test: r"\.jsx?$".to_string(),
            handlers: vec![HandlerKind::Script],
            exclude: Some("node_modules".to_string()),
        },
        RuleConfig {
            test: r"\.css$".to_string(),
            handlers: vec![HandlerKind::Css, HandlerKind::Style],
            exclude: None,
        },
        RuleConfig {
            test: r"\.json$".to_string(),
            handlers: vec![HandlerKind::Json],
            exclude: None,
        },
    ]
}

fn default_externals() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("MFiles".to_string(), "MFiles".to_string()),
        ("ShellUIModule".to_string(), "ShellUIModule".to_string()),
        ("MFilesDashboard".to_string(), "window".to_string()),
    ])
}

fn default_post_process() -> Vec<PostProcessRule> {
    // es6-promise style polyfills define and call catch/finally via dot syntax
    vec![
        PostProcessRule::new("catch", RewritePosition::Call),
        PostProcessRule::new("finally", RewritePosition::Call),
        PostProcessRule::new("catch", RewritePosition::Any).on_object("Promise.prototype"),
        PostProcessRule::new("finally", RewritePosition::Any).on_object("Promise.prototype"),
    ]
}

fn default_jsx_pragma() -> String {
    "React.createElement".to_string()
}

fn default_jsx_pragma_frag() -> String {
    "React.Fragment".to_string()
}

fn default_true() -> bool {
    true
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./dist")
}

fn default_filename() -> String {
    "[name].bundle.js".to_string()
}

fn default_hash_function() -> String {
    crate::hash::LEGACY_ALGORITHM.to_string()
}

fn default_hash_digest_length() -> usize {
    20
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.entries.len(), 3);
        assert_eq!(config.externals.get("MFilesDashboard").map(String::as_str), Some("window"));
        assert_eq!(config.resolve.extensions, vec![".tsx", ".ts", ".js"]);
        assert_eq!(config.bundle_file_name("Sample.dashboard"), "Sample.dashboard.bundle.js");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let serialized = toml::to_string(&config).unwrap();
        let deserialized: Config = toml::from_str(&serialized).unwrap();

        assert_eq!(config.entries, deserialized.entries);
        assert_eq!(config.rules.len(), deserialized.rules.len());
        assert_eq!(config.post_process, deserialized.post_process);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [entries]
            "Sample.dashboard" = "src/Sample.dashboard.tsx"

            [output]
            publish = "incremental"
            "#,
        )
        .unwrap();

        assert_eq!(config.entries.len(), 1);
        assert_eq!(config.output.publish, PublishMode::Incremental);
        assert_eq!(config.output.filename, "[name].bundle.js");
        assert!(!config.output.source_map);
        assert!(config.transform.project_type_check);
        assert_eq!(config.rules.len(), 4);
    }

    #[test]
    fn test_config_init_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = Config::init(temp_dir.path()).unwrap();
        assert!(path.exists());
        assert!(Config::init(temp_dir.path()).is_err());

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.root, temp_dir.path());
    }

    #[test]
    fn test_validate_rejects_shared_filename() {
        let mut config = Config::default();
        config.output.filename = "bundle.js".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.entries.clear();
        assert!(config.validate().is_err());
    }
}
