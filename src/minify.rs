use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::json;
use swc_core::common::sync::Lrc;
use swc_core::common::{FileName, Globals, Mark, SourceMap, Spanned, GLOBALS};
use swc_core::ecma::ast::{EsVersion, Program};
use swc_core::ecma::minifier::optimize;
use swc_core::ecma::minifier::option::terser::TerserCompressorOptions;
use swc_core::ecma::minifier::option::{CompressOptions, ExtraOptions, MangleOptions, MinifyOptions};
use swc_core::ecma::parser::{lexer::Lexer, Parser, StringInput, Syntax};
use swc_core::ecma::transforms::base::{fixer::fixer, resolver};
use swc_core::ecma::transforms::compat::es3;
use tracing::debug;

use crate::compat::LanguageLevel;
use crate::errors::{DashpackError, Result};
use crate::linemap::LineTable;
use crate::transform::emit;

/// Minifier configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MinifierConfig {
    /// Run the minifier at all
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Dead code removal and expression simplification
    #[serde(default = "default_true")]
    pub compress: bool,

    /// Keep one statement per line instead of a single line
    #[serde(default = "default_true")]
    pub preserve_line_breaks: bool,

    /// Work around Internet Explorer 8 parser quirks: reserved words are only
    /// ever used as quoted keys and bracketed members
    #[serde(default = "default_true")]
    pub legacy_parser_mode: bool,

    /// Shorten local names; top-level names are never touched
    #[serde(default = "default_true")]
    pub mangle: bool,
}

impl Default for MinifierConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            compress: true,
            preserve_line_breaks: true,
            legacy_parser_mode: true,
            mangle: true,
        }
    }
}

fn default_true() -> bool {
    true
}

pub struct Minifier {
    config: MinifierConfig,
    level: LanguageLevel,
}

/// Minified code and the bundle line each of its lines came from
#[derive(Debug)]
pub struct Minified {
    pub code: String,
    pub lines: LineTable,
}

impl Minifier {
    pub fn new(config: &MinifierConfig, level: LanguageLevel) -> Self {
        Self {
            config: config.clone(),
            level,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Minify an assembled bundle. Member access syntax and top-level names are preserved.
    pub fn minify(&self, bundle_name: &str, code: &str) -> Result<Minified> {
        if !self.config.enabled {
            return Ok(Minified {
                code: code.to_string(),
                lines: LineTable::identity(code),
            });
        }

        let cm: Lrc<SourceMap> = Default::default();
        let fm = cm.new_source_file(FileName::Custom(bundle_name.to_string()).into(), code.to_string());

        let lexer = Lexer::new(
            Syntax::Es(Default::default()),
            EsVersion::Es5,
            StringInput::from(&*fm),
            None,
        );
        let mut parser = Parser::new_from(lexer);
        let script = parser.parse_script().map_err(|e| {
            DashpackError::assembly_at(
                bundle_name,
                format!("cannot minify: {}", e.kind().msg()),
                cm.lookup_char_pos(e.span().lo).line,
            )
        })?;

        let ie8 = self.config.legacy_parser_mode || self.level.is_ie8();
        let (minified, lines) = GLOBALS.set(&Globals::new(), || -> Result<(String, LineTable)> {
            let unresolved_mark = Mark::new();
            let top_level_mark = Mark::new();

            let mut program = Program::Script(script);
            program.mutate(resolver(unresolved_mark, top_level_mark, false));

            let options = MinifyOptions {
                compress: if self.config.compress {
                    Some(compress_options(&cm, bundle_name, ie8)?)
                } else {
                    None
                },
                mangle: if self.config.mangle {
                    Some(mangle_options(bundle_name)?)
                } else {
                    None
                },
                ..Default::default()
            };

            let mut program = optimize(
                program,
                cm.clone(),
                None,
                None,
                &options,
                &ExtraOptions {
                    unresolved_mark,
                    top_level_mark,
                    mangle_name_cache: None,
                },
            );
            // the compressor and mangler may drop quotes and rename the objects
            // post-processing rules look for, so quote reserved names here
            if ie8 {
                program.mutate(es3::es3(true));
            }
            program.mutate(fixer(None));

            emit(
                &cm,
                &fm,
                &program,
                Path::new(bundle_name),
                self.level.es_version(),
                !self.config.preserve_line_breaks,
            )
            .map_err(|e| DashpackError::assembly(bundle_name, e.to_string()))
        })?;

        debug!(
            "Minified {} from {} to {} bytes",
            bundle_name,
            code.len(),
            minified.len()
        );
        Ok(Minified {
            code: minified,
            lines,
        })
    }
}

fn compress_options(cm: &Lrc<SourceMap>, bundle_name: &str, ie8: bool) -> Result<CompressOptions> {
    let terser: TerserCompressorOptions = serde_json::from_value(json!({
        "defaults": true,
        "ecma": 5,
        "ie8": ie8,
        // `a.b` and `a["b"]` are never converted into each other
        "properties": false,
        // the host looks registrations up by their top-level names
        "toplevel": false,
        "unused": true,
        "dead_code": true,
    }))
    .map_err(|e| DashpackError::assembly(bundle_name, format!("invalid compress options: {}", e)))?;

    Ok(terser.into_config(cm.clone()))
}

fn mangle_options(bundle_name: &str) -> Result<MangleOptions> {
    serde_json::from_value(json!({ "topLevel": false }))
        .map_err(|e| DashpackError::assembly(bundle_name, format!("invalid mangle options: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const BUNDLE: &str = "var __dashpack_cache__ = {};\nfunction OnNewShellUI(shellUI) {\n    var registeredHandler = shellUI.Events.Register(1, function (dashboard) { return dashboard; });\n    return registeredHandler;\n}\nfunction unusedTopLevel() { return 1; }\n";

    #[test]
    fn test_top_level_names_survive() {
        let minifier = Minifier::new(&MinifierConfig::default(), LanguageLevel::Es5);
        let out = minifier.minify("shellui.bundle.js", BUNDLE).unwrap().code;

        assert!(out.contains("function OnNewShellUI("));
        assert!(out.contains("function unusedTopLevel("));
        assert!(out.contains("__dashpack_cache__"));
        assert!(!out.contains("registeredHandler"));
        assert!(out.contains(".Events.Register("));
    }

    #[test]
    fn test_bracket_access_is_kept() {
        let minifier = Minifier::new(&MinifierConfig::default(), LanguageLevel::Es5);
        let out = minifier
            .minify("a.bundle.js", "function run(p) { return p[\"finally\"](function () {}); }\n")
            .unwrap()
            .code;
        assert!(out.contains("[\"finally\"]"));
    }

    #[test]
    fn test_legacy_mode_quotes_reserved_names_after_mangling() {
        let polyfill = "var __dashpack_modules__ = {\n\"./node_modules/promise-lite/index.js\": [function (module, exports, require) {\nfunction Promise(resolver) { this.resolver = resolver; }\nPromise.prototype.catch = function (onRejected) { return this.then(null, onRejected); };\nPromise.prototype.finally = function (callback) { return this.then(callback, callback); };\nmodule.exports = Promise;\n}, {}]\n};\nfunction __dashpack_interop__(value) {\n    return value && value.__esModule ? value : { \"default\": value };\n}\n";

        for level in [LanguageLevel::Es3, LanguageLevel::Es5] {
            let out = Minifier::new(&MinifierConfig::default(), level)
                .minify("shellui.bundle.js", polyfill)
                .unwrap()
                .code;

            assert!(!out.contains(".catch"), "{}", out);
            assert!(!out.contains(".finally"), "{}", out);
            assert!(!out.contains("default:"), "{}", out);
            assert!(out.contains("catch"));
            assert!(out.contains("finally"));
            assert!(out.contains("function __dashpack_interop__("));
        }
    }

    #[test]
    fn test_lines_point_back_into_the_bundle() {
        let minifier = Minifier::new(&MinifierConfig::default(), LanguageLevel::Es5);
        let out = minifier.minify("shellui.bundle.js", BUNDLE).unwrap();

        let line = out
            .code
            .lines()
            .position(|l| l.contains("function unusedTopLevel("))
            .unwrap();
        assert_eq!(out.lines.get(line), Some(5));
    }

    #[test]
    fn test_line_breaks_are_configurable() {
        let config = MinifierConfig {
            preserve_line_breaks: false,
            ..Default::default()
        };
        let out = Minifier::new(&config, LanguageLevel::Es5).minify("a.bundle.js", BUNDLE).unwrap();
        assert_eq!(out.code.trim_end().lines().count(), 1);
        // the joined line starts with the first bundle line
        assert_eq!(out.lines.get(0), Some(0));
    }

    #[test]
    fn test_disabled_is_identity() {
        let config = MinifierConfig {
            enabled: false,
            ..Default::default()
        };
        let out = Minifier::new(&config, LanguageLevel::Es5).minify("a.bundle.js", BUNDLE).unwrap();
        assert_eq!(out.code, BUNDLE);
        assert_eq!(out.lines, LineTable::identity(BUNDLE));
    }
}
