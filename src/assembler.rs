use std::collections::BTreeMap;

use handlebars::Handlebars;
use serde::Serialize;
use tracing::debug;

use crate::cli::BuildMode;
use crate::compat::LanguageLevel;
use crate::entry::EntryDescriptor;
use crate::errors::{DashpackError, Result};
use crate::graph::{CompiledModule, ModuleGraph};
use crate::linemap::{line_count, BundleMap};

const BUNDLE_TEMPLATE: &str = "bundle";
const SLOT_PREFIX: &str = "/*__dashpack_slot_";
const SLOT_SUFFIX: &str = "__*/";

/// Lays out one bundle: module table, require runtime, then the entry code
pub struct Assembler {
    handlebars: Handlebars<'static>,
    mode: BuildMode,
    level: LanguageLevel,
}

/// Template context for one bundle
#[derive(Debug, Serialize)]
struct BundleContext {
    bundle: String,
    version: &'static str,
    mode: &'static str,
    level: String,
    modules: Vec<ModuleSlot>,
    externals: Vec<ExternalSlot>,
    entry_comment: Option<String>,
    entry_code: String,
}

#[derive(Debug, Serialize)]
struct ModuleSlot {
    comment: Option<String>,
    /// Quoted id
    id: String,
    code: String,
    /// `{"specifier": "id"}` literal
    deps: String,
}

#[derive(Debug, Serialize)]
struct ExternalSlot {
    name: String,
    expression: String,
}

/// An assembled bundle and the module line behind each of its lines
#[derive(Debug)]
pub struct Bundle {
    pub code: String,
    pub map: BundleMap,
}

impl Assembler {
    pub fn new(mode: BuildMode, level: LanguageLevel) -> Result<Self> {
        let mut handlebars = Handlebars::new();
        handlebars.register_escape_fn(handlebars::no_escape);
        handlebars
            .register_template_string(BUNDLE_TEMPLATE, include_str!("../templates/bundle.hbs"))
            .map_err(|e| DashpackError::configuration_with_source("Invalid bundle template", e))?;

        Ok(Self {
            handlebars,
            mode,
            level,
        })
    }

    pub fn assemble(&self, entry: &EntryDescriptor, graph: &ModuleGraph) -> Result<Bundle> {
        // module code is rendered as a one-line marker and spliced in afterwards,
        // so every bundle line is known to come from the template or a module
        let modules = graph
            .modules
            .iter()
            .enumerate()
            .map(|(slot, module)| self.module_slot(entry, module, slot))
            .collect::<Result<Vec<_>>>()?;

        let externals = graph
            .passthrough_externals()
            .into_iter()
            .map(|binding| {
                Ok(ExternalSlot {
                    name: quote(entry, &binding.import_name)?,
                    expression: binding.expression.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let context = BundleContext {
            bundle: comment_text(&entry.bundle_file),
            version: crate::VERSION,
            mode: self.mode.as_str(),
            level: self.level.to_string(),
            modules,
            externals,
            entry_comment: self.comment_for(&graph.entry),
            entry_code: slot_marker(graph.modules.len()),
        };

        let layout = self
            .handlebars
            .render(BUNDLE_TEMPLATE, &context)
            .map_err(|e| DashpackError::assembly(&entry.name, format!("failed to render bundle: {}", e)))?;

        let slots: Vec<&CompiledModule> = graph
            .modules
            .iter()
            .map(|module| &**module)
            .chain(std::iter::once(&*graph.entry))
            .collect();
        let bundle = splice(&entry.name, &layout, &slots)?;

        debug!(
            "Assembled {} ({} modules, {} bytes)",
            entry.bundle_file,
            slots.len(),
            bundle.code.len()
        );
        Ok(bundle)
    }

    fn module_slot(&self, entry: &EntryDescriptor, module: &CompiledModule, slot: usize) -> Result<ModuleSlot> {
        let deps: BTreeMap<&str, &str> = module
            .dependencies
            .iter()
            .map(|d| (d.specifier.as_str(), d.id.as_str()))
            .collect();

        let deps = serde_json::to_string(&deps)
            .map_err(|e| DashpackError::assembly(&entry.name, format!("failed to encode dependency map: {}", e)))?;

        Ok(ModuleSlot {
            comment: self.comment_for(module),
            id: quote(entry, &module.id)?,
            code: slot_marker(slot),
            deps: escape_separators(&deps),
        })
    }

    /// Module path comments are a development aid only
    fn comment_for(&self, module: &CompiledModule) -> Option<String> {
        match self.mode {
            BuildMode::Development => Some(comment_text(&module.id)),
            BuildMode::Production => None,
        }
    }
}

fn slot_marker(slot: usize) -> String {
    format!("{}{}{}", SLOT_PREFIX, slot, SLOT_SUFFIX)
}

fn slot_index(line: &str) -> Option<usize> {
    line.strip_prefix(SLOT_PREFIX)?.strip_suffix(SLOT_SUFFIX)?.parse().ok()
}

/// Replace each marker line of `layout` with its module's code
fn splice(entry_name: &str, layout: &str, slots: &[&CompiledModule]) -> Result<Bundle> {
    let mut code = String::with_capacity(layout.len() + slots.iter().map(|m| m.code.len()).sum::<usize>());
    let mut map = BundleMap::default();

    for (n, line) in layout.split('\n').enumerate() {
        if n > 0 {
            code.push('\n');
        }
        match slot_index(line) {
            Some(slot) => {
                let module = slots.get(slot).ok_or_else(|| {
                    DashpackError::assembly(entry_name, format!("bundle template has no module for slot {}", slot))
                })?;
                let source = map.add_source(&module.source_name);
                map.push_lines(source, line_count(&module.code), &module.lines);
                code.push_str(&module.code);
            }
            None => {
                map.push_line(None);
                code.push_str(line);
            }
        }
    }

    Ok(Bundle { code, map })
}

fn quote(entry: &EntryDescriptor, value: &str) -> Result<String> {
    serde_json::to_string(value)
        .map(|quoted| escape_separators(&quoted))
        .map_err(|e| DashpackError::assembly(&entry.name, format!("failed to quote '{}': {}", value, e)))
}

fn escape_separators(literal: &str) -> String {
    literal.replace('\u{2028}', "\\u2028").replace('\u{2029}', "\\u2029")
}

/// Text that cannot terminate a block comment early
fn comment_text(text: &str) -> String {
    text.replace("*/", "*\\/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::externals::ExternalBinding;
    use crate::linemap::LineTable;
    use crate::transform::{ModuleDependency, ModuleRole};
    use std::path::PathBuf;
    use std::sync::Arc;

    fn module(id: &str, code: &str, role: ModuleRole) -> Arc<CompiledModule> {
        Arc::new(CompiledModule {
            id: id.to_string(),
            path: PathBuf::from(id),
            source_name: id.trim_start_matches("./").to_string(),
            role,
            code: code.to_string(),
            lines: LineTable::identity(code),
            dependencies: Vec::new(),
            externals: Vec::new(),
            passthrough: false,
        })
    }

    fn entry() -> EntryDescriptor {
        EntryDescriptor {
            name: "shellui".to_string(),
            source_path: PathBuf::from("/p/src/shellui.ts"),
            bundle_file: "shellui.bundle.js".to_string(),
        }
    }

    #[test]
    fn test_layout_order() {
        let mut dep = (*module("./src/util.ts", "exports.x = 1;", ModuleRole::Dependency)).clone();
        dep.dependencies.push(ModuleDependency {
            specifier: "./other".to_string(),
            id: "./src/other.ts".to_string(),
            path: PathBuf::from("/p/src/other.ts"),
        });
        let graph = ModuleGraph {
            entry: module("./src/shellui.ts", "function OnNewShellUI(shellUI) {}", ModuleRole::Entry),
            modules: vec![Arc::new(dep)],
        };

        let assembler = Assembler::new(BuildMode::Development, LanguageLevel::Es5).unwrap();
        let bundle = assembler.assemble(&entry(), &graph).unwrap().code;

        let table = bundle.find("var __dashpack_modules__").unwrap();
        let runtime = bundle.find("function __dashpack_require__").unwrap();
        let entry_code = bundle.find("function OnNewShellUI").unwrap();
        assert!(bundle.starts_with("/* shellui.bundle.js"));
        assert!(table < runtime && runtime < entry_code);
        assert!(bundle.contains("\"./src/util.ts\": [function (module, exports, require) {"));
        assert!(bundle.contains("{\"./other\":\"./src/other.ts\"}"));
        assert!(bundle.contains("/* ./src/util.ts */"));
        assert!(!bundle.contains("__dashpack_externals__"));
    }

    #[test]
    fn test_production_has_no_path_comments() {
        let graph = ModuleGraph {
            entry: module("abc", "var a = 1;", ModuleRole::Entry),
            modules: vec![module("def", "exports.b = 2;", ModuleRole::Dependency)],
        };
        let assembler = Assembler::new(BuildMode::Production, LanguageLevel::Es5).unwrap();
        let bundle = assembler.assemble(&entry(), &graph).unwrap().code;

        assert!(!bundle.contains("/* def */"));
        assert!(bundle.contains("\"def\": [function"));
    }

    #[test]
    fn test_passthrough_externals_table() {
        let mut vendored = (*module("./node_modules/lib/index.js", "module.exports = require(\"MFiles\");", ModuleRole::Dependency)).clone();
        vendored.passthrough = true;
        vendored.externals.push(ExternalBinding {
            import_name: "MFiles".to_string(),
            expression: "MFiles".to_string(),
        });
        let graph = ModuleGraph {
            entry: module("./src/main.js", "var lib = __dashpack_require__(\"./node_modules/lib/index.js\");", ModuleRole::Entry),
            modules: vec![Arc::new(vendored)],
        };

        let assembler = Assembler::new(BuildMode::Development, LanguageLevel::Es5).unwrap();
        let bundle = assembler.assemble(&entry(), &graph).unwrap().code;
        assert!(bundle.contains("\"MFiles\": function () { return MFiles; }"));
    }

    #[test]
    fn test_bundle_lines_map_to_module_lines() {
        let graph = ModuleGraph {
            entry: module("./src/shellui.ts", "var a = 1;\nfunction OnNewShellUI(shellUI) {}", ModuleRole::Entry),
            modules: vec![module("./src/util.ts", "exports.x = 1;\nexports.y = 2;", ModuleRole::Dependency)],
        };
        let assembler = Assembler::new(BuildMode::Development, LanguageLevel::Es5).unwrap();
        let bundle = assembler.assemble(&entry(), &graph).unwrap();

        assert!(!bundle.code.contains(SLOT_PREFIX));
        let lines: Vec<&str> = bundle.code.split('\n').collect();
        let at = |needle: &str| lines.iter().position(|l| l.contains(needle)).unwrap();

        assert_eq!(bundle.map.origin(at("exports.y = 2;")), Some(("src/util.ts", 1)));
        assert_eq!(bundle.map.origin(at("function OnNewShellUI")), Some(("src/shellui.ts", 1)));
        assert_eq!(bundle.map.origin(at("function __dashpack_require__")), None);
        assert_eq!(bundle.map.origin(0), None);
    }

    #[test]
    fn test_comment_text_cannot_close_comment() {
        assert_eq!(comment_text("a*/b"), "a*\\/b");
    }
}
