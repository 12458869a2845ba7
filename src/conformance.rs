//! Checks bundle text against the legacy host's output constraints.
//!
//! The host engine rejects arrow functions, block-scoped declarations and
//! module syntax, and only sees registrations made directly at the top level,
//! so a bundle wrapped in a self-invoking function would register nothing.

use std::fmt;

use swc_core::common::sync::Lrc;
use swc_core::common::{FileName, SourceMap, Span, Spanned};
use swc_core::ecma::ast::{
    ArrowExpr, Callee, EsVersion, Expr, MemberProp, ModuleItem, Program, Stmt, VarDecl, VarDeclKind,
};
use swc_core::ecma::parser::{lexer::Lexer, Parser, StringInput, Syntax};
use swc_core::ecma::visit::{Visit, VisitWith};
use tracing::debug;

use crate::compat::LanguageLevel;
use crate::errors::{DashpackError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Violation {
    ArrowFunction,
    BlockScopedDeclaration,
    ModuleSyntax,
    TopLevelWrapper,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::ArrowFunction => "arrow function in output",
            Self::BlockScopedDeclaration => "`let`/`const` declaration in output",
            Self::ModuleSyntax => "module syntax in output",
            Self::TopLevelWrapper => "top-level self-invoking wrapper in output",
        };
        write!(f, "{}", text)
    }
}

/// The fixed output constraint set, checked for one language level
pub struct ConformanceCheck {
    level: LanguageLevel,
}

impl ConformanceCheck {
    pub fn new(level: LanguageLevel) -> Self {
        Self { level }
    }

    /// Fails with the first violation, naming the bundle and line
    pub fn check(&self, bundle_name: &str, code: &str) -> Result<()> {
        let cm: Lrc<SourceMap> = Default::default();
        let fm = cm.new_source_file(FileName::Custom(bundle_name.to_string()).into(), code.to_string());

        let lexer = Lexer::new(
            Syntax::Es(Default::default()),
            EsVersion::latest(),
            StringInput::from(&*fm),
            None,
        );
        let mut parser = Parser::new_from(lexer);

        let program = parser.parse_program().map_err(|e| {
            let line = cm.lookup_char_pos(e.span().lo).line;
            DashpackError::assembly_at(
                bundle_name,
                format!("output is not valid script: {}", e.kind().msg()),
                line,
            )
        })?;

        let mut finder = ViolationFinder::default();
        match &program {
            Program::Module(module) => {
                if let Some(item) = module.body.iter().find(|item| matches!(item, ModuleItem::ModuleDecl(_))) {
                    finder.record(Violation::ModuleSyntax, item.span());
                }
                for item in &module.body {
                    if let ModuleItem::Stmt(stmt) = item {
                        finder.check_top_level(stmt);
                    }
                }
            }
            Program::Script(script) => {
                for stmt in &script.body {
                    finder.check_top_level(stmt);
                }
            }
        }
        program.visit_with(&mut finder);

        match finder.first {
            Some((violation, span)) => Err(DashpackError::assembly_at(
                bundle_name,
                violation.to_string(),
                cm.lookup_char_pos(span.lo).line,
            )),
            None => {
                debug!("{} conforms to {} output constraints", bundle_name, self.level);
                Ok(())
            }
        }
    }
}

#[derive(Default)]
struct ViolationFinder {
    first: Option<(Violation, Span)>,
}

impl ViolationFinder {
    fn record(&mut self, violation: Violation, span: Span) {
        // keep the earliest in the text
        match self.first {
            Some((_, existing)) if existing.lo <= span.lo => {}
            _ => self.first = Some((violation, span)),
        }
    }

    fn check_top_level(&mut self, stmt: &Stmt) {
        if let Stmt::Expr(expr_stmt) = stmt {
            if is_self_invoking(&expr_stmt.expr) {
                self.record(Violation::TopLevelWrapper, expr_stmt.span);
            }
        }
    }
}

impl Visit for ViolationFinder {
    fn visit_arrow_expr(&mut self, arrow: &ArrowExpr) {
        self.record(Violation::ArrowFunction, arrow.span);
        arrow.visit_children_with(self);
    }

    fn visit_var_decl(&mut self, decl: &VarDecl) {
        if decl.kind != VarDeclKind::Var {
            self.record(Violation::BlockScopedDeclaration, decl.span);
        }
        decl.visit_children_with(self);
    }
}

fn unwrap_wrappers(mut expr: &Expr) -> &Expr {
    loop {
        expr = match expr {
            Expr::Paren(paren) => &paren.expr,
            Expr::Unary(unary) => &unary.arg,
            Expr::Seq(seq) => match seq.exprs.last() {
                Some(last) => last,
                None => return expr,
            },
            _ => return expr,
        };
    }
}

/// A parameterless function invoked in place: `(function () {})()`, `!function () {}()`,
/// `(() => {})()` and the `.call`/`.apply` forms. Enum and namespace initializers
/// take their target as a parameter and are not wrappers.
fn is_self_invoking(expr: &Expr) -> bool {
    let Expr::Call(call) = unwrap_wrappers(expr) else {
        return false;
    };
    let Callee::Expr(callee) = &call.callee else {
        return false;
    };

    match unwrap_wrappers(callee) {
        Expr::Member(member) => {
            is_parameterless_function(unwrap_wrappers(&member.obj))
                && matches!(&member.prop, MemberProp::Ident(name) if &*name.sym == "call" || &*name.sym == "apply")
        }
        other => is_parameterless_function(other),
    }
}

fn is_parameterless_function(expr: &Expr) -> bool {
    match expr {
        Expr::Fn(f) => f.function.params.is_empty(),
        Expr::Arrow(arrow) => arrow.params.is_empty(),
        _ => false,
    }
}
