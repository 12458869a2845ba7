//! Import names bound to globals the host injects at runtime.

use std::collections::BTreeMap;

use regex::Regex;

use crate::errors::{DashpackError, Result};

/// One import name bound to a host global expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalBinding {
    pub import_name: String,
    pub expression: String,
}

impl ExternalBinding {
    /// The dotted segments of the global expression, e.g. `["window", "MFiles"]`
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.expression.split('.')
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExternalBindings {
    bindings: BTreeMap<String, ExternalBinding>,
}

impl ExternalBindings {
    /// Build the table, rejecting expressions that are not dotted identifier paths.
    pub fn new(table: &BTreeMap<String, String>) -> Result<Self> {
        let valid = Regex::new(r"^[A-Za-z_$][\w$]*(\.[A-Za-z_$][\w$]*)*$")
            .map_err(|e| DashpackError::configuration_with_source("Invalid externals pattern", e))?;

        let mut bindings = BTreeMap::new();
        for (import_name, expression) in table {
            let expression = expression.trim();
            if !valid.is_match(expression) {
                return Err(DashpackError::configuration(format!(
                    "External '{}' must map to a global expression such as `window` or `host.api`, got '{}'",
                    import_name, expression
                )));
            }
            bindings.insert(
                import_name.clone(),
                ExternalBinding {
                    import_name: import_name.clone(),
                    expression: expression.to_string(),
                },
            );
        }

        Ok(Self { bindings })
    }

    pub fn get(&self, import_name: &str) -> Option<&ExternalBinding> {
        self.bindings.get(import_name)
    }

    pub fn contains(&self, import_name: &str) -> bool {
        self.bindings.contains_key(import_name)
    }
}
