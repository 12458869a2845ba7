use std::path::PathBuf;
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{generate, Shell};
use serde::{Deserialize, Serialize};

/// Compile dashboard UI modules into legacy script bundles
#[derive(Parser)]
#[command(
    name = "dashpack",
    version,
    about = "Compile dashboard UI modules into legacy script bundles",
    long_about = "dashpack compiles the configured entry modules (TypeScript, JavaScript, CSS) into legacy script bundles, one self-contained bundle per entry. Bundles contain no modern syntax, no module system and no top-level wrapper, so they run in the sandboxed script engine of the desktop host."
)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Build mode, overrides the configured default
    #[arg(short, long, global = true, env = "DASHPACK_MODE")]
    pub mode: Option<BuildMode>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build every configured entry (the default command)
    Build,

    /// Initialize dashpack configuration
    Init {
        /// Output directory for configuration
        #[arg(short, long, default_value = ".")]
        output_dir: PathBuf,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Clone, Copy, ValueEnum, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BuildMode {
    /// Readable module ids and module path comments
    #[value(name = "development")]
    #[default]
    Development,

    /// Hashed module ids
    #[value(name = "production")]
    Production,
}

impl BuildMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
        }
    }
}

pub fn generate_completions(shell: Shell) {
    let mut cmd = Cli::command();
    let bin_name = cmd.get_name().to_string();
    generate(shell, &mut cmd, bin_name, &mut std::io::stdout());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert()
    }

    #[test]
    fn test_default_values() {
        assert_eq!(BuildMode::default(), BuildMode::Development);
    }

    #[test]
    fn test_build_is_default_command() {
        let cli = Cli::try_parse_from(["dashpack"]).unwrap();
        assert!(cli.command.is_none());
        assert!(cli.mode.is_none());

        let cli = Cli::try_parse_from(["dashpack", "--mode", "production"]).unwrap();
        assert_eq!(cli.mode, Some(BuildMode::Production));
    }
}
