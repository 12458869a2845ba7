use swc_core::common::comments::SingleThreadedComments;
use swc_core::common::sync::Lrc;
use swc_core::common::{Globals, Mark, SourceMap, GLOBALS};
use swc_core::ecma::ast::Program;
use swc_core::ecma::parser::{EsSyntax, Syntax};
use swc_core::ecma::transforms::base::helpers::{inject_helpers, Helpers, HELPERS};
use swc_core::ecma::transforms::base::{fixer::fixer, hygiene::hygiene, resolver};
use swc_core::ecma::transforms::compat::{
    es2015, es2016, es2017, es2018, es2019, es2020, es2021, es2022, es3,
};
use swc_core::ecma::transforms::react;
use tracing::debug;

use super::ecma::{emit, load_source, parse_module};
use super::modules::ModuleLowering;
use super::typescript::jsx_options;
use super::{unexpected_input, Asset, AssetKind, Handler, HandlerContext, HandlerKind};
use crate::compat::LanguageLevel;
use crate::errors::Result;

/// Lowers modern script into a legacy module body
pub struct ScriptHandler;

impl Handler for ScriptHandler {
    fn kind(&self) -> HandlerKind {
        HandlerKind::Script
    }

    fn apply(&self, asset: Asset, ctx: &HandlerContext<'_>) -> Result<Asset> {
        if !matches!(asset.kind, AssetKind::Source | AssetKind::Script) {
            return Err(unexpected_input(self.kind(), &asset));
        }

        let Asset {
            path,
            kind,
            code,
            lines: input_lines,
            ..
        } = asset;
        let jsx = kind == AssetKind::Source && path.extension().is_some_and(|ext| ext == "jsx");
        let jsx = if jsx { Some(jsx_options(ctx.options)?) } else { None };

        let cm: Lrc<SourceMap> = Default::default();
        let fm = load_source(&cm, &path, code);
        let module = parse_module(
            &cm,
            &fm,
            &path,
            Syntax::Es(EsSyntax {
                jsx: jsx.is_some(),
                ..Default::default()
            }),
        )?;

        let (code, lines, dependencies) = GLOBALS.set(&Globals::new(), || {
            HELPERS.set(&Helpers::new(false), || -> Result<_> {
                let unresolved_mark = Mark::new();
                let top_level_mark = Mark::new();

                let mut program = Program::Module(module);
                program.mutate(resolver(unresolved_mark, top_level_mark, false));

                if let Some(options) = jsx {
                    program.mutate(react::react(
                        cm.clone(),
                        None::<SingleThreadedComments>,
                        options,
                        top_level_mark,
                        unresolved_mark,
                    ));
                }

                let dependencies = match &mut program {
                    Program::Module(module) => {
                        ModuleLowering::new(&cm, &path, ctx.role, ctx.imports, unresolved_mark)
                            .lower(module)?
                    }
                    Program::Script(_) => Vec::new(),
                };

                program.mutate(es2022::es2022(Default::default(), unresolved_mark));
                program.mutate(es2021::es2021());
                program.mutate(es2020::es2020(Default::default(), unresolved_mark));
                program.mutate(es2019::es2019());
                program.mutate(es2018::es2018(Default::default()));
                program.mutate(es2017::es2017(Default::default(), unresolved_mark));
                program.mutate(es2016::es2016());
                program.mutate(es2015::es2015(
                    unresolved_mark,
                    None::<SingleThreadedComments>,
                    Default::default(),
                ));
                if ctx.level == LanguageLevel::Es3 {
                    program.mutate(es3::es3(true));
                }

                program.mutate(inject_helpers(unresolved_mark));
                program.mutate(hygiene());
                program.mutate(fixer(None));

                let (code, lines) = emit(&cm, &fm, &program, &path, ctx.level.es_version(), false)?;
                Ok((code, lines, dependencies))
            })
        })?;

        debug!(
            "Lowered {} ({} bundled dependencies)",
            path.display(),
            dependencies.len()
        );

        Ok(Asset {
            path,
            kind: AssetKind::Module,
            code,
            lines: lines.then(&input_lines),
            dependencies,
            externals: Vec::new(),
            style_imports: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::BuildMode;
    use crate::config::TransformConfig;
    use crate::errors::DashpackError;
    use crate::externals::ExternalBinding;
    use crate::transform::{ImportResolver, ModuleRef, ModuleRole};
    use std::path::{Path, PathBuf};

    /// Relative specifiers become `./<name>` ids; `MFiles` and `MFilesDashboard` are host globals
    struct FakeImports;

    impl ImportResolver for FakeImports {
        fn resolve_import(&self, importer: &Path, specifier: &str) -> Result<ModuleRef> {
            match specifier {
                "MFiles" => Ok(ModuleRef::External(ExternalBinding {
                    import_name: "MFiles".to_string(),
                    expression: "MFiles".to_string(),
                })),
                "MFilesDashboard" => Ok(ModuleRef::External(ExternalBinding {
                    import_name: "MFilesDashboard".to_string(),
                    expression: "window".to_string(),
                })),
                s if s.starts_with("./") => Ok(ModuleRef::Internal {
                    id: format!("{}.ts", s),
                    path: PathBuf::from(format!("/p/src/{}.ts", &s[2..])),
                }),
                _ => Err(DashpackError::resolution(importer.display().to_string(), specifier)),
            }
        }
    }

    fn lower(source: &str, role: ModuleRole, level: LanguageLevel) -> Result<Asset> {
        let options = TransformConfig::default();
        let ctx = HandlerContext {
            role,
            level,
            mode: BuildMode::Development,
            options: &options,
            imports: &FakeImports,
        };
        let mut asset = Asset::source("/p/src/main.js", source);
        asset.kind = AssetKind::Script;
        ScriptHandler.apply(asset, &ctx)
    }

    #[test]
    fn test_modern_syntax_is_lowered() {
        let asset = lower(
            "const double = (x) => x * 2;\nlet total = [1, 2].map(double);\nclass Widget { render() { return `n=${total}`; } }\n",
            ModuleRole::Entry,
            LanguageLevel::Es5,
        )
        .unwrap();

        assert!(!asset.code.contains("=>"));
        assert!(!asset.code.contains("const "));
        assert!(!asset.code.contains("let "));
        assert!(!asset.code.contains("class Widget"));
        assert!(asset.code.contains("var double"));
    }

    #[test]
    fn test_imports_become_require_calls() {
        let asset = lower(
            "import { format } from \"./format\";\nimport Base from \"./base\";\nexport function show(v) { return format(v) + Base.name; }\n",
            ModuleRole::Dependency,
            LanguageLevel::Es5,
        )
        .unwrap();

        assert!(asset.code.contains("__dashpack_require__(\"./format.ts\")"));
        assert!(asset.code.contains("__dashpack_interop__(__dashpack_require__(\"./base.ts\"))"));
        assert!(asset.code.contains("exports.show = show"));
        assert!(asset.code.contains("exports.__esModule = true"));
        assert!(asset.code.contains("(0, __dashpack_import_format__.format)(v)"));
        assert!(asset.code.contains("[\"default\"]"));
        assert_eq!(asset.dependencies.len(), 2);
        assert!(!asset.code.contains("import "));
        assert!(!asset.code.contains("export "));
    }

    #[test]
    fn test_exported_bindings_stay_in_sync() {
        let asset = lower(
            "export let counter = 0;\nexport function bump() { counter += 1; counter++; --counter; }\n",
            ModuleRole::Dependency,
            LanguageLevel::Es5,
        )
        .unwrap();

        assert!(asset.code.contains("exports.counter = counter += 1"));
        assert!(asset.code.contains("(exports.counter = ++counter) - 1"));
        assert!(asset.code.contains("exports.counter = --counter"));
        assert!(asset.code.contains("exports.bump = bump"));
    }

    #[test]
    fn test_renamed_exports_stay_in_sync() {
        let asset = lower(
            "var n = 1;\nvar pair = [0, 0];\nfunction set(v) { n = v; [n] = pair; }\nexport { n as value, set };\n",
            ModuleRole::Dependency,
            LanguageLevel::Es5,
        )
        .unwrap();

        assert!(asset.code.contains("exports.value = n = v"));
        assert!(asset.code.contains("exports.value = n"));
        assert!(!asset.code.contains("exports.n ="));
    }

    #[test]
    fn test_entry_assignments_are_not_exported() {
        let asset = lower(
            "export var state = 0;\nfunction OnNewShellUI() { state = 1; }\n",
            ModuleRole::Entry,
            LanguageLevel::Es5,
        )
        .unwrap();

        assert!(asset.code.contains("state = 1"));
        assert!(!asset.code.contains("exports"));
    }

    #[test]
    fn test_import_bindings_leave_entry_globals_alone() {
        let asset = lower(
            "import { greeting } from \"./text\";\nvar _text = \"host-visible\";\nfunction OnNewShellUI(shellUI) { shellUI.ShowMessage(greeting(_text)); }\n",
            ModuleRole::Entry,
            LanguageLevel::Es5,
        )
        .unwrap();

        assert!(asset.code.contains("var _text = \"host-visible\""));
        assert!(asset.code.contains("var __dashpack_import_text__ = __dashpack_require__(\"./text.ts\")"));
        assert!(asset.code.contains("(0, __dashpack_import_text__.greeting)(_text)"));
        assert!(!asset.code.contains("_text1"));
    }

    #[test]
    fn test_externals_bind_to_host_globals() {
        let asset = lower(
            "import * as MFilesDashboard from \"MFilesDashboard\";\nimport { CreateObject } from \"MFiles\";\nfunction OnNewDashboard(d) { MFilesDashboard.alert(CreateObject(d)); }\n",
            ModuleRole::Entry,
            LanguageLevel::Es5,
        )
        .unwrap();

        assert!(asset.code.contains("window.alert(MFiles.CreateObject(d))"));
        assert!(asset.code.contains("function OnNewDashboard(d)"));
        assert!(asset.dependencies.is_empty());
        assert!(!asset.code.contains("__dashpack_require__"));
    }

    #[test]
    fn test_entry_keeps_declarations_global() {
        let asset = lower(
            "export function OnNewShellUI(shellUI) { return shellUI; }\nexport default 42;\n",
            ModuleRole::Entry,
            LanguageLevel::Es5,
        )
        .unwrap();

        assert!(asset.code.contains("function OnNewShellUI(shellUI)"));
        assert!(!asset.code.contains("exports"));
    }

    #[test]
    fn test_dynamic_import_is_compile_error() {
        let err = lower("import(\"./lazy\").then(function (m) { m.run(); });\n", ModuleRole::Entry, LanguageLevel::Es5)
            .unwrap_err();
        match err {
            DashpackError::Compile { location, message } => {
                assert_eq!(location.line, Some(1));
                assert!(message.contains("import()"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_es3_quotes_reserved_members() {
        let asset = lower(
            "var p = { catch: 1 };\np.finally(function () {});\n",
            ModuleRole::Entry,
            LanguageLevel::Es3,
        )
        .unwrap();

        assert!(asset.code.contains("p[\"finally\"]"));
        assert!(asset.code.contains("\"catch\": 1"));
    }
}
