use std::path::PathBuf;
use thiserror::Error;

/// Main error type for dashpack
///
/// Every variant is fatal: a single error aborts the whole build.
#[derive(Error, Debug)]
pub enum DashpackError {
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Cannot resolve '{specifier}' imported from {importer}")]
    Resolution {
        importer: String,
        specifier: String,
    },

    #[error("Compile error in {location}: {message}")]
    Compile {
        location: CodeLocation,
        message: String,
    },

    #[error("Assembly error in bundle '{entry}': {message}{}", line_suffix(.line))]
    Assembly {
        entry: String,
        message: String,
        line: Option<usize>,
    },

    #[error("File system error: {message} ({})", .path.display())]
    FileSystem {
        message: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Build worker failed: {message}")]
    Worker { message: String },
}

/// Represents a location in source code
#[derive(Debug, Clone, PartialEq)]
pub struct CodeLocation {
    pub file: PathBuf,
    pub line: Option<usize>,
    pub column: Option<usize>,
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, DashpackError>;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ErrorCategory {
    Configuration,
    Resolution,
    Compile,
    Assembly,
    FileSystem,
    Worker,
}

fn line_suffix(line: &Option<usize>) -> String {
    match line {
        Some(line) => format!(" (line {})", line),
        None => String::new(),
    }
}

impl DashpackError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
            source: None,
        }
    }

    pub fn configuration_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Configuration {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn resolution(importer: impl Into<String>, specifier: impl Into<String>) -> Self {
        Self::Resolution {
            importer: importer.into(),
            specifier: specifier.into(),
        }
    }

    pub fn compile(location: CodeLocation, message: impl Into<String>) -> Self {
        Self::Compile {
            location,
            message: message.into(),
        }
    }

    pub fn assembly(entry: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Assembly {
            entry: entry.into(),
            message: message.into(),
            line: None,
        }
    }

    pub fn assembly_at(entry: impl Into<String>, message: impl Into<String>, line: usize) -> Self {
        Self::Assembly {
            entry: entry.into(),
            message: message.into(),
            line: Some(line),
        }
    }

    pub fn file_system_error(
        message: impl Into<String>,
        path: impl Into<PathBuf>,
        source: std::io::Error,
    ) -> Self {
        Self::FileSystem {
            message: message.into(),
            path: path.into(),
            source,
        }
    }

    /// Get error category for reporting
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Configuration { .. } => ErrorCategory::Configuration,
            Self::Resolution { .. } => ErrorCategory::Resolution,
            Self::Compile { .. } => ErrorCategory::Compile,
            Self::Assembly { .. } => ErrorCategory::Assembly,
            Self::FileSystem { .. } => ErrorCategory::FileSystem,
            Self::Worker { .. } => ErrorCategory::Worker,
        }
    }
}

impl From<std::io::Error> for DashpackError {
    fn from(err: std::io::Error) -> Self {
        Self::FileSystem {
            message: err.to_string(),
            path: PathBuf::new(),
            source: err,
        }
    }
}

impl From<tokio::task::JoinError> for DashpackError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Worker {
            message: err.to_string(),
        }
    }
}

impl CodeLocation {
    pub fn new(file: impl Into<PathBuf>) -> Self {
        Self {
            file: file.into(),
            line: None,
            column: None,
        }
    }

    pub fn with_line(mut self, line: usize) -> Self {
        self.line = Some(line);
        self
    }

    pub fn with_column(mut self, column: usize) -> Self {
        self.column = Some(column);
        self
    }
}

impl std::fmt::Display for CodeLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.file.display())?;
        if let Some(line) = self.line {
            write!(f, ":{}", line)?;
            if let Some(column) = self.column {
                write!(f, ":{}", column)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categories() {
        let err = DashpackError::resolution("src/a.ts", "./missing");
        assert_eq!(err.category(), ErrorCategory::Resolution);

        let err = DashpackError::configuration("no browserslist");
        assert_eq!(err.category(), ErrorCategory::Configuration);
    }

    #[test]
    fn test_code_location() {
        let loc = CodeLocation::new("test.ts")
            .with_line(10)
            .with_column(5);

        assert_eq!(loc.to_string(), "test.ts:10:5");
    }

    #[test]
    fn test_compile_error_message() {
        let err = DashpackError::compile(
            CodeLocation::new("src/a.ts").with_line(3).with_column(7),
            "Type 'string' is not assignable to type 'number'.",
        );
        assert_eq!(
            err.to_string(),
            "Compile error in src/a.ts:3:7: Type 'string' is not assignable to type 'number'."
        );
    }

    #[test]
    fn test_assembly_error_message() {
        let err = DashpackError::assembly_at("shellui", "arrow function in output", 12);
        assert_eq!(
            err.to_string(),
            "Assembly error in bundle 'shellui': arrow function in output (line 12)"
        );

        let err = DashpackError::assembly("shellui", "unparseable output");
        assert!(!err.to_string().contains("line"));
    }
}
