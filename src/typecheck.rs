//! Whole-program type checking with the project's own TypeScript compiler.
//!
//! When `node_modules/.bin/tsc` and a `tsconfig.json` are present, the build
//! runs `tsc --noEmit` once before any entry is compiled and fails on its
//! first diagnostic. Projects without a local compiler only get the checks
//! the TypeScript handler performs on each file.

use std::path::{Path, PathBuf};

use regex::Regex;
use tokio::process::Command;
use tracing::{debug, info};

use crate::errors::{CodeLocation, DashpackError, Result};

const TSCONFIG_FILE_NAME: &str = "tsconfig.json";

/// A locally installed `tsc` and the project it checks
#[derive(Debug, Clone)]
pub struct ProjectTypeCheck {
    root: PathBuf,
    tsc: PathBuf,
}

impl ProjectTypeCheck {
    /// `None` unless both the compiler and `tsconfig.json` exist under `root`
    pub fn detect(root: &Path) -> Option<Self> {
        if !root.join(TSCONFIG_FILE_NAME).is_file() {
            return None;
        }

        let bin = root.join("node_modules").join(".bin");
        let tsc = if cfg!(windows) {
            bin.join("tsc.cmd")
        } else {
            bin.join("tsc")
        };
        if !tsc.is_file() {
            debug!("No local TypeScript compiler at {}", tsc.display());
            return None;
        }

        Some(Self {
            root: root.to_path_buf(),
            tsc,
        })
    }

    pub async fn run(&self) -> Result<()> {
        info!("Type checking with {}", self.tsc.display());

        let output = Command::new(&self.tsc)
            .arg("--noEmit")
            .arg("--pretty")
            .arg("false")
            .arg("-p")
            .arg(&self.root)
            .current_dir(&self.root)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| DashpackError::file_system_error("Failed to run the TypeScript compiler", &self.tsc, e))?;

        if output.status.success() {
            return Ok(());
        }

        // tsc reports diagnostics on stdout
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if let Some(error) = first_diagnostic(&self.root, &stdout)? {
            return Err(error);
        }

        let detail = stdout
            .lines()
            .chain(stderr.lines())
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("tsc exited with {}", output.status));
        Err(DashpackError::compile(
            CodeLocation::new(self.root.join(TSCONFIG_FILE_NAME)),
            detail,
        ))
    }
}

/// First `file(line,col): error TSnnnn: message` line, as a compile error
fn first_diagnostic(root: &Path, output: &str) -> Result<Option<DashpackError>> {
    let pattern = Regex::new(r"^(.+)\((\d+),(\d+)\): error (TS\d+): (.*)$")
        .map_err(|e| DashpackError::configuration_with_source("Invalid diagnostic pattern", e))?;

    for line in output.lines() {
        let Some(caps) = pattern.captures(line.trim_end()) else {
            continue;
        };

        let file = root.join(&caps[1]);
        let mut location = CodeLocation::new(file);
        if let Ok(line) = caps[2].parse() {
            location = location.with_line(line);
        }
        if let Ok(column) = caps[3].parse() {
            location = location.with_column(column);
        }
        return Ok(Some(DashpackError::compile(
            location,
            format!("{} ({})", &caps[5], &caps[4]),
        )));
    }

    Ok(None)
}
