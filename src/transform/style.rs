use handlebars::Handlebars;
use regex::Regex;
use serde::Serialize;

use super::{
    unexpected_input, Asset, AssetKind, Handler, HandlerContext, HandlerKind, ModuleDependency,
    ModuleRef, ModuleRole,
};
use crate::cli::BuildMode;
use crate::errors::{CodeLocation, DashpackError, Result};
use crate::linemap::LineTable;

/// Reads a stylesheet and collects its `@import`s
pub struct CssHandler;

/// Turns a stylesheet into script that injects it at execution time
pub struct StyleHandler;

const STYLE_TEMPLATE: &str = "style";

impl Handler for CssHandler {
    fn kind(&self) -> HandlerKind {
        HandlerKind::Css
    }

    fn apply(&self, mut asset: Asset, ctx: &HandlerContext<'_>) -> Result<Asset> {
        if asset.kind != AssetKind::Source {
            return Err(unexpected_input(self.kind(), &asset));
        }

        let (imports, css) = extract_imports(&asset.code)?;

        let css = if ctx.mode == BuildMode::Production {
            minifier::css::minify(&css)
                .map_err(|e| {
                    DashpackError::compile(CodeLocation::new(&asset.path), format!("invalid stylesheet: {}", e))
                })?
                .to_string()
        } else {
            css
        };

        asset.kind = AssetKind::Stylesheet;
        asset.code = css;
        asset.style_imports = imports;
        Ok(asset)
    }
}

impl Handler for StyleHandler {
    fn kind(&self) -> HandlerKind {
        HandlerKind::Style
    }

    fn apply(&self, mut asset: Asset, ctx: &HandlerContext<'_>) -> Result<Asset> {
        match asset.kind {
            AssetKind::Stylesheet => {}
            // a bare `style` rule skips @import handling
            AssetKind::Source => {}
            _ => return Err(unexpected_input(self.kind(), &asset)),
        }

        let mut imports = Vec::new();
        for specifier in std::mem::take(&mut asset.style_imports) {
            match ctx.imports.resolve_import(&asset.path, &specifier)? {
                ModuleRef::Internal { id, path } => {
                    imports.push(js_string(&id)?);
                    asset.add_dependency(ModuleDependency { specifier, id, path });
                }
                ModuleRef::External(binding) => {
                    return Err(DashpackError::compile(
                        CodeLocation::new(&asset.path),
                        format!("stylesheet @import of host global '{}'", binding.import_name),
                    ));
                }
            }
        }

        asset.code = render_injection(&StyleContext {
            imports,
            css: js_string(&asset.code)?,
            exports: ctx.role == ModuleRole::Dependency,
        })?;
        // injection code has no line-for-line counterpart in the stylesheet
        asset.lines = LineTable::default();
        asset.kind = AssetKind::Module;
        Ok(asset)
    }
}

#[derive(Serialize)]
struct StyleContext {
    imports: Vec<String>,
    css: String,
    exports: bool,
}

fn render_injection(context: &StyleContext) -> Result<String> {
    let mut handlebars = Handlebars::new();
    handlebars.register_escape_fn(handlebars::no_escape);
    handlebars
        .register_template_string(STYLE_TEMPLATE, include_str!("../../templates/style.hbs"))
        .map_err(|e| DashpackError::configuration_with_source("Invalid style template", e))?;

    handlebars
        .render(STYLE_TEMPLATE, context)
        .map_err(|e| DashpackError::configuration_with_source("Failed to render style template", e))
}

/// Removes `@import` rules, returning their specifiers as module requests
fn extract_imports(css: &str) -> Result<(Vec<String>, String)> {
    let pattern = Regex::new(r#"@import\s+(?:url\(\s*)?["']?([^"')\s;]+)["']?\s*\)?[^;]*;"#)
        .map_err(|e| DashpackError::configuration_with_source("Invalid @import pattern", e))?;

    let mut imports = Vec::new();
    let stripped = pattern.replace_all(css, |caps: &regex::Captures<'_>| {
        let target = &caps[1];
        if target.contains("//") {
            // remote stylesheets stay as they are
            return caps[0].to_string();
        }
        imports.push(module_request(target));
        String::new()
    });

    Ok((imports, stripped.into_owned()))
}

/// Stylesheet paths are relative unless they start with `~`
fn module_request(target: &str) -> String {
    if let Some(package) = target.strip_prefix('~') {
        package.to_string()
    } else if target.starts_with('.') || target.starts_with('/') {
        target.to_string()
    } else {
        format!("./{}", target)
    }
}

/// A double-quoted script string literal, safe for legacy engines
pub(crate) fn js_string(value: &str) -> Result<String> {
    let quoted = serde_json::to_string(value)
        .map_err(|e| DashpackError::configuration_with_source("Failed to quote string", e))?;
    Ok(quoted.replace('\u{2028}', "\\u2028").replace('\u{2029}', "\\u2029"))
}
