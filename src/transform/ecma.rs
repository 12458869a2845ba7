//! Parsing, code generation and diagnostics shared by the script handlers.

use std::path::Path;

use swc_core::common::sync::Lrc;
use swc_core::common::{FileName, SourceFile, SourceMap, Span, Spanned};
use swc_core::ecma::ast::{
    CallExpr, Callee, EsVersion, Expr, Lit, Module, Program,
};
use swc_core::ecma::codegen::{text_writer::JsWriter, Config as CodegenConfig, Emitter};
use swc_core::ecma::parser::{lexer::Lexer, Parser, StringInput, Syntax};
use swc_core::ecma::visit::{Visit, VisitWith};

use crate::errors::{CodeLocation, DashpackError, Result};
use crate::linemap::LineTable;

/// Register `source` under `path` so spans map back to it
pub(crate) fn load_source(cm: &Lrc<SourceMap>, path: &Path, source: String) -> Lrc<SourceFile> {
    cm.new_source_file(FileName::Real(path.to_path_buf()).into(), source)
}

/// A compile error pointing at `span`
pub(crate) fn error_at(
    cm: &SourceMap,
    path: &Path,
    span: Span,
    message: impl Into<String>,
) -> DashpackError {
    let loc = cm.lookup_char_pos(span.lo);
    DashpackError::compile(
        CodeLocation::new(path)
            .with_line(loc.line)
            .with_column(loc.col.0 + 1),
        message,
    )
}

fn parser_for<'a>(fm: &'a SourceFile, syntax: Syntax, target: EsVersion) -> Parser<Lexer<'a>> {
    let lexer = Lexer::new(syntax, target, StringInput::from(fm), None);
    Parser::new_from(lexer)
}

/// Parse a module, turning the first syntax or early error into a compile error
pub(crate) fn parse_module(
    cm: &Lrc<SourceMap>,
    fm: &SourceFile,
    path: &Path,
    syntax: Syntax,
) -> Result<Module> {
    let mut parser = parser_for(fm, syntax, EsVersion::latest());

    let module = parser
        .parse_module()
        .map_err(|e| error_at(cm, path, e.span(), e.kind().msg()))?;

    if let Some(e) = parser.take_errors().into_iter().next() {
        return Err(error_at(cm, path, e.span(), e.kind().msg()));
    }

    Ok(module)
}

/// Parse a script or module, whichever the source is
pub(crate) fn parse_program(
    cm: &Lrc<SourceMap>,
    fm: &SourceFile,
    path: &Path,
    syntax: Syntax,
) -> Result<Program> {
    let mut parser = parser_for(fm, syntax, EsVersion::latest());

    let program = parser
        .parse_program()
        .map_err(|e| error_at(cm, path, e.span(), e.kind().msg()))?;

    if let Some(e) = parser.take_errors().into_iter().next() {
        return Err(error_at(cm, path, e.span(), e.kind().msg()));
    }

    Ok(program)
}

/// Generate code for `program`, parsed from `fm`, with the input line of each output line
pub(crate) fn emit(
    cm: &Lrc<SourceMap>,
    fm: &SourceFile,
    program: &Program,
    path: &Path,
    target: EsVersion,
    minify: bool,
) -> Result<(String, LineTable)> {
    let mut buf = Vec::new();
    let mut mappings = Vec::new();
    {
        let writer = JsWriter::new(cm.clone(), "\n", &mut buf, Some(&mut mappings));
        let mut emitter = Emitter {
            cfg: CodegenConfig::default()
                .with_target(target)
                .with_ascii_only(true)
                .with_minify(minify),
            cm: cm.clone(),
            comments: None,
            wr: writer,
        };

        emitter.emit_program(program).map_err(|e| {
            DashpackError::compile(CodeLocation::new(path), format!("code generation failed: {}", e))
        })?;
    }

    let code = String::from_utf8(buf).map_err(|e| {
        DashpackError::compile(CodeLocation::new(path), format!("generated code is not UTF-8: {}", e))
    })?;

    let generated: Vec<_> = mappings.iter().map(|(pos, at)| (*pos, at.line)).collect();
    Ok((code, LineTable::from_mappings(fm, &generated)))
}

/// A `require("literal")` call, if `call` is one
pub(crate) fn require_specifier(call: &CallExpr) -> Option<&str> {
    let Callee::Expr(callee) = &call.callee else {
        return None;
    };
    let Expr::Ident(ident) = &**callee else {
        return None;
    };
    if &*ident.sym != "require" || call.args.len() != 1 || call.args[0].spread.is_some() {
        return None;
    }
    match &*call.args[0].expr {
        Expr::Lit(Lit::Str(s)) => Some(&*s.value),
        _ => None,
    }
}

#[derive(Default)]
struct RequireScanner {
    specifiers: Vec<String>,
}

impl Visit for RequireScanner {
    fn visit_call_expr(&mut self, call: &CallExpr) {
        if let Some(specifier) = require_specifier(call) {
            if !self.specifiers.iter().any(|s| s == specifier) {
                self.specifiers.push(specifier.to_string());
            }
        }
        call.visit_children_with(self);
    }
}

/// The literal `require("…")` specifiers of a script, in source order
pub fn scan_requires(path: &Path, source: &str) -> Result<Vec<String>> {
    let cm: Lrc<SourceMap> = Default::default();
    let fm = load_source(&cm, path, source.to_string());
    let program = parse_program(&cm, &fm, path, Syntax::Es(Default::default()))?;

    let mut scanner = RequireScanner::default();
    program.visit_with(&mut scanner);
    Ok(scanner.specifiers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_requires_in_order() {
        let source = r#"
            var a = require("./a");
            var b = cond ? require("b") : require("./a");
            require(dynamic);
        "#;
        let found = scan_requires(Path::new("vendor.js"), source).unwrap();
        assert_eq!(found, vec!["./a", "b"]);
    }

    #[test]
    fn test_parse_error_has_location() {
        let cm: Lrc<SourceMap> = Default::default();
        let path = Path::new("broken.js");
        let fm = load_source(&cm, path, "var a = ;\n".to_string());
        let err = parse_module(&cm, &fm, path, Syntax::Es(Default::default())).unwrap_err();
        match err {
            DashpackError::Compile { location, .. } => {
                assert_eq!(location.line, Some(1));
                assert!(location.column.is_some());
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
