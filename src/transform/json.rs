use super::{unexpected_input, Asset, AssetKind, Handler, HandlerContext, HandlerKind, ModuleRole};
use crate::errors::{CodeLocation, DashpackError, Result};

/// Exposes a JSON document as the module's exports
pub struct JsonHandler;

impl Handler for JsonHandler {
    fn kind(&self) -> HandlerKind {
        HandlerKind::Json
    }

    fn apply(&self, mut asset: Asset, ctx: &HandlerContext<'_>) -> Result<Asset> {
        if asset.kind != AssetKind::Source {
            return Err(unexpected_input(self.kind(), &asset));
        }
        if ctx.role == ModuleRole::Entry {
            return Err(DashpackError::compile(
                CodeLocation::new(&asset.path),
                "a JSON document cannot be an entry module",
            ));
        }

        serde_json::from_str::<serde_json::Value>(&asset.code).map_err(|e| {
            DashpackError::compile(
                CodeLocation::new(&asset.path)
                    .with_line(e.line())
                    .with_column(e.column()),
                format!("invalid JSON: {}", e),
            )
        })?;

        // JSON allows the line separators raw; legacy script strings do not
        let literal = asset.code.trim_end().replace('\u{2028}', "\\u2028").replace('\u{2029}', "\\u2029");

        asset.code = format!("module.exports = {};\n", literal);
        asset.kind = AssetKind::Module;
        Ok(asset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::BuildMode;
    use crate::compat::LanguageLevel;
    use crate::config::TransformConfig;
    use crate::transform::{ImportResolver, ModuleRef};
    use std::path::Path;

    struct NoImports;

    impl ImportResolver for NoImports {
        fn resolve_import(&self, importer: &Path, specifier: &str) -> Result<ModuleRef> {
            Err(DashpackError::resolution(importer.display().to_string(), specifier))
        }
    }

    fn run(source: &str, role: ModuleRole) -> Result<Asset> {
        let options = TransformConfig::default();
        let ctx = HandlerContext {
            role,
            level: LanguageLevel::Es3,
            mode: BuildMode::Development,
            options: &options,
            imports: &NoImports,
        };
        JsonHandler.apply(Asset::source("/p/src/data.json", source), &ctx)
    }

    #[test]
    fn test_json_becomes_module_exports() {
        let asset = run("{ \"title\": \"Sample\", \"tiles\": [1, 2] }", ModuleRole::Dependency).unwrap();
        assert_eq!(asset.code, "module.exports = { \"title\": \"Sample\", \"tiles\": [1, 2] };\n");
    }

    #[test]
    fn test_invalid_json_reports_line() {
        let err = run("{\n  \"a\": ,\n}", ModuleRole::Dependency).unwrap_err();
        match err {
            DashpackError::Compile { location, .. } => assert_eq!(location.line, Some(2)),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_json_entry_is_rejected() {
        assert!(run("{}", ModuleRole::Entry).is_err());
    }
}
