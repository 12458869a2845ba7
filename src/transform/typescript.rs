use std::path::Path;

use swc_core::common::comments::SingleThreadedComments;
use swc_core::common::sync::Lrc;
use swc_core::common::{Globals, Mark, SourceMap, Span, GLOBALS};
use swc_core::ecma::ast::{
    AssignPat, BindingIdent, ClassProp, EsVersion, Expr, Lit, Module, Pat, Program, TsKeywordTypeKind,
    TsType, TsTypeAnn, VarDeclarator,
};
use swc_core::ecma::parser::{Syntax, TsSyntax};
use swc_core::ecma::transforms::base::{fixer::fixer, resolver};
use swc_core::ecma::transforms::react;
use swc_core::ecma::transforms::typescript;
use swc_core::ecma::visit::{Visit, VisitWith};

use super::ecma::{emit, error_at, load_source, parse_module};
use super::{unexpected_input, Asset, AssetKind, Handler, HandlerContext, HandlerKind};
use crate::config::TransformConfig;
use crate::errors::{DashpackError, Result};

/// Type-checks literal initializers, strips types and compiles JSX
pub struct TypeScriptHandler;

impl Handler for TypeScriptHandler {
    fn kind(&self) -> HandlerKind {
        HandlerKind::TypeScript
    }

    fn apply(&self, asset: Asset, ctx: &HandlerContext<'_>) -> Result<Asset> {
        if asset.kind != AssetKind::Source {
            return Err(unexpected_input(self.kind(), &asset));
        }

        let Asset {
            path,
            code,
            lines: asset_lines,
            ..
        } = asset;
        let tsx = path.extension().is_some_and(|ext| ext == "tsx");

        let cm: Lrc<SourceMap> = Default::default();
        let fm = load_source(&cm, &path, code);
        let module = parse_module(
            &cm,
            &fm,
            &path,
            Syntax::Typescript(TsSyntax {
                tsx,
                decorators: true,
                ..Default::default()
            }),
        )?;

        check_literal_assignments(&cm, &path, &module)?;

        let jsx = if tsx { Some(jsx_options(ctx.options)?) } else { None };

        let (code, lines) = GLOBALS.set(&Globals::new(), || {
            let unresolved_mark = Mark::new();
            let top_level_mark = Mark::new();

            let mut program = Program::Module(module);
            program.mutate(resolver(unresolved_mark, top_level_mark, true));

            // JSX first, so the pragma import counts as a value use when types are stripped
            if let Some(options) = jsx {
                program.mutate(react::react(
                    cm.clone(),
                    None::<SingleThreadedComments>,
                    options,
                    top_level_mark,
                    unresolved_mark,
                ));
            }

            program.mutate(typescript::strip(unresolved_mark, top_level_mark));
            program.mutate(fixer(None));

            emit(&cm, &fm, &program, &path, EsVersion::latest(), false)
        })?;

        Ok(Asset {
            path,
            kind: AssetKind::Script,
            code,
            lines: lines.then(&asset_lines),
            dependencies: Vec::new(),
            externals: Vec::new(),
            style_imports: Vec::new(),
        })
    }
}

/// Classic-runtime JSX options built from the configured pragmas
pub(crate) fn jsx_options(options: &TransformConfig) -> Result<react::Options> {
    serde_json::from_value(serde_json::json!({
        "runtime": "classic",
        "pragma": options.jsx_pragma,
        "pragmaFrag": options.jsx_pragma_frag,
        "throwIfNamespace": true,
    }))
    .map_err(|e| DashpackError::configuration_with_source("Invalid JSX options", e))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Primitive {
    Number,
    String,
    Boolean,
}

impl Primitive {
    fn name(self) -> &'static str {
        match self {
            Self::Number => "number",
            Self::String => "string",
            Self::Boolean => "boolean",
        }
    }

    fn of_annotation(ann: &TsTypeAnn) -> Option<Self> {
        match &*ann.type_ann {
            TsType::TsKeywordType(keyword) => match keyword.kind {
                TsKeywordTypeKind::TsNumberKeyword => Some(Self::Number),
                TsKeywordTypeKind::TsStringKeyword => Some(Self::String),
                TsKeywordTypeKind::TsBooleanKeyword => Some(Self::Boolean),
                _ => None,
            },
            _ => None,
        }
    }

    fn of_expr(expr: &Expr) -> Option<(Self, Span)> {
        match expr {
            Expr::Lit(Lit::Num(n)) => Some((Self::Number, n.span)),
            Expr::Lit(Lit::Str(s)) => Some((Self::String, s.span)),
            Expr::Lit(Lit::Bool(b)) => Some((Self::Boolean, b.span)),
            Expr::Tpl(tpl) if tpl.exprs.is_empty() => Some((Self::String, tpl.span)),
            Expr::Paren(paren) => Self::of_expr(&paren.expr),
            _ => None,
        }
    }
}

/// Finds literal values assigned to a differently annotated primitive
struct LiteralAssignability {
    mismatch: Option<(Span, Primitive, Primitive)>,
}

impl LiteralAssignability {
    fn check(&mut self, ann: Option<&TsTypeAnn>, value: Option<&Expr>) {
        if self.mismatch.is_some() {
            return;
        }
        let (Some(ann), Some(value)) = (ann, value) else {
            return;
        };
        if let (Some(declared), Some((actual, span))) =
            (Primitive::of_annotation(ann), Primitive::of_expr(value))
        {
            if declared != actual {
                self.mismatch = Some((span, actual, declared));
            }
        }
    }
}

impl Visit for LiteralAssignability {
    fn visit_var_declarator(&mut self, decl: &VarDeclarator) {
        if let Pat::Ident(BindingIdent { type_ann, .. }) = &decl.name {
            self.check(type_ann.as_deref(), decl.init.as_deref());
        }
        decl.visit_children_with(self);
    }

    fn visit_class_prop(&mut self, prop: &ClassProp) {
        self.check(prop.type_ann.as_deref(), prop.value.as_deref());
        prop.visit_children_with(self);
    }

    fn visit_assign_pat(&mut self, pat: &AssignPat) {
        if let Pat::Ident(BindingIdent { type_ann, .. }) = &*pat.left {
            self.check(type_ann.as_deref(), Some(&pat.right));
        }
        pat.visit_children_with(self);
    }
}

fn check_literal_assignments(cm: &SourceMap, path: &Path, module: &Module) -> Result<()> {
    let mut checker = LiteralAssignability { mismatch: None };
    module.visit_with(&mut checker);

    match checker.mismatch {
        Some((span, actual, declared)) => Err(error_at(
            cm,
            path,
            span,
            format!(
                "Type '{}' is not assignable to type '{}'.",
                actual.name(),
                declared.name()
            ),
        )),
        None => Ok(()),
    }
}
