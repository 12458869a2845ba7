//! Lowers ES module syntax into the bundle's legacy module form.
//!
//! Imports become `__dashpack_require__` calls bound to private variables and
//! every reference to an imported binding is rewritten into a member access on
//! that variable. Dependency modules assign their exports onto `exports` and
//! keep them in sync whenever an exported binding is reassigned; the entry
//! module simply loses its export syntax so its declarations stay global.

use std::collections::HashMap;
use std::mem;
use std::path::Path;

use swc_core::common::util::take::Take;
use swc_core::common::{Mark, SourceMap, Span, SyntaxContext, DUMMY_SP};
use swc_core::ecma::ast::*;
use swc_core::ecma::utils::find_pat_ids;
use swc_core::ecma::visit::{VisitMut, VisitMutWith};

use super::ecma::{error_at, require_specifier};
use super::{ImportResolver, ModuleDependency, ModuleRef, ModuleRole};
use crate::errors::{DashpackError, Result};
use crate::externals::ExternalBinding;

pub const RUNTIME_REQUIRE: &str = "__dashpack_require__";
pub const RUNTIME_INTEROP: &str = "__dashpack_interop__";
pub const RUNTIME_EXPORT_STAR: &str = "__dashpack_export_star__";

/// How references to an imported binding are rewritten
#[derive(Clone)]
struct Replacement {
    expr: Expr,
    /// Call through `(0, expr)()` so the callee does not receive the module as `this`
    detach_this: bool,
}

enum Target {
    Internal(String),
    External(ExternalBinding),
}

pub(crate) struct ModuleLowering<'a> {
    cm: &'a SourceMap,
    path: &'a Path,
    role: ModuleRole,
    imports: &'a dyn ImportResolver,
    unresolved_mark: Mark,
    replacements: HashMap<Id, Replacement>,
    /// Exported local bindings and the names they are exported under
    live: HashMap<Id, Vec<String>>,
    dependencies: Vec<ModuleDependency>,
    error: Option<DashpackError>,
}

impl<'a> ModuleLowering<'a> {
    pub fn new(
        cm: &'a SourceMap,
        path: &'a Path,
        role: ModuleRole,
        imports: &'a dyn ImportResolver,
        unresolved_mark: Mark,
    ) -> Self {
        Self {
            cm,
            path,
            role,
            imports,
            unresolved_mark,
            replacements: HashMap::new(),
            live: HashMap::new(),
            dependencies: Vec::new(),
            error: None,
        }
    }

    /// Rewrite `module` in place; returns the bundled modules it depends on.
    pub fn lower(mut self, module: &mut Module) -> Result<Vec<ModuleDependency>> {
        let items = mem::take(&mut module.body);
        let is_es_module = items.iter().any(|item| matches!(item, ModuleItem::ModuleDecl(_)));
        let exporting = self.role == ModuleRole::Dependency;

        let mut requires = Vec::new();
        let mut hoisted = Vec::new();
        let mut body = Vec::new();
        let mut trailing = Vec::new();

        for item in items {
            let decl = match item {
                ModuleItem::Stmt(stmt) => {
                    body.push(stmt);
                    continue;
                }
                ModuleItem::ModuleDecl(decl) => decl,
            };

            match decl {
                ModuleDecl::Import(import) => {
                    if import.type_only {
                        continue;
                    }
                    self.lower_import(import, &mut requires)?;
                }

                ModuleDecl::ExportDecl(ExportDecl { decl, .. }) => {
                    let exported: Vec<Ident> = match &decl {
                        _ if !exporting => Vec::new(),
                        Decl::Fn(f) => {
                            self.track_live(&f.ident, &f.ident.sym);
                            hoisted.push(self.export_stmt(&f.ident.sym, Expr::Ident(f.ident.clone())));
                            Vec::new()
                        }
                        Decl::Class(c) => vec![c.ident.clone()],
                        Decl::Var(var) => find_pat_ids(&var.decls),
                        _ => Vec::new(),
                    };
                    body.push(Stmt::Decl(decl));
                    for name in exported {
                        let sym = name.sym.clone();
                        self.track_live(&name, &sym);
                        body.push(self.export_stmt(&sym, Expr::Ident(name)));
                    }
                }

                ModuleDecl::ExportDefaultDecl(ExportDefaultDecl { decl, .. }) => match decl {
                    DefaultDecl::Fn(FnExpr { ident, function }) => {
                        let ident = ident.unwrap_or_else(|| Ident::new_private("__dashpack_default__".into(), DUMMY_SP));
                        if exporting {
                            hoisted.push(self.export_stmt("default", Expr::Ident(ident.clone())));
                        }
                        body.push(Stmt::Decl(Decl::Fn(FnDecl {
                            ident,
                            declare: false,
                            function,
                        })));
                    }
                    DefaultDecl::Class(ClassExpr { ident: Some(ident), class }) => {
                        body.push(Stmt::Decl(Decl::Class(ClassDecl {
                            ident: ident.clone(),
                            declare: false,
                            class,
                        })));
                        if exporting {
                            body.push(self.export_stmt("default", Expr::Ident(ident)));
                        }
                    }
                    DefaultDecl::Class(class) => {
                        let expr = Expr::Class(class);
                        body.push(if exporting {
                            self.export_stmt("default", expr)
                        } else {
                            expr_stmt(expr)
                        });
                    }
                    DefaultDecl::TsInterfaceDecl(_) => {}
                },

                ModuleDecl::ExportDefaultExpr(ExportDefaultExpr { expr, .. }) => {
                    body.push(if exporting {
                        self.export_stmt("default", *expr)
                    } else {
                        expr_stmt(*expr)
                    });
                }

                ModuleDecl::ExportNamed(named) => {
                    if named.type_only {
                        continue;
                    }
                    self.lower_named_export(named, &mut requires, &mut trailing)?;
                }

                ModuleDecl::ExportAll(all) => {
                    if all.type_only {
                        continue;
                    }
                    match self.resolve(&all.src.value)? {
                        Target::Internal(id) => {
                            let module = self.require_call(&id);
                            requires.push(if exporting {
                                expr_stmt(self.call_runtime(
                                    RUNTIME_EXPORT_STAR,
                                    vec![module, Expr::Ident(self.global("exports"))],
                                ))
                            } else {
                                expr_stmt(module)
                            });
                        }
                        Target::External(binding) => {
                            if exporting {
                                let host = self.host_expr(&binding);
                                requires.push(expr_stmt(self.call_runtime(
                                    RUNTIME_EXPORT_STAR,
                                    vec![host, Expr::Ident(self.global("exports"))],
                                )));
                            }
                        }
                    }
                }

                ModuleDecl::TsImportEquals(d) => {
                    return Err(self.error(d.span, "`import x = require()` is not supported, use an import declaration"));
                }
                ModuleDecl::TsExportAssignment(d) => {
                    return Err(self.error(d.span, "`export =` is not supported, use an export declaration"));
                }
                ModuleDecl::TsNamespaceExport(d) => {
                    return Err(self.error(d.span, "`export as namespace` is not supported"));
                }
            }
        }

        let mut stmts = Vec::new();
        if exporting && is_es_module {
            stmts.push(self.export_stmt(
                "__esModule",
                Expr::Lit(Lit::Bool(Bool {
                    span: DUMMY_SP,
                    value: true,
                })),
            ));
        }
        stmts.extend(requires);
        stmts.extend(hoisted);
        stmts.extend(body);
        stmts.extend(trailing);

        stmts.visit_mut_with(&mut self);

        if let Some(error) = self.error.take() {
            return Err(error);
        }

        module.body = stmts.into_iter().map(ModuleItem::Stmt).collect();
        Ok(self.dependencies)
    }

    fn lower_import(&mut self, import: ImportDecl, requires: &mut Vec<Stmt>) -> Result<()> {
        let target = self.resolve(&import.src.value)?;

        match target {
            Target::Internal(id) => {
                if import.specifiers.is_empty() {
                    requires.push(expr_stmt(self.require_call(&id)));
                    return Ok(());
                }

                let binding = Ident::new_private(local_name(&import.src.value).into(), DUMMY_SP);
                let needs_interop = import
                    .specifiers
                    .iter()
                    .any(|s| matches!(s, ImportSpecifier::Default(_)));

                let mut init = self.require_call(&id);
                if needs_interop {
                    init = self.call_runtime(RUNTIME_INTEROP, vec![init]);
                }
                requires.push(var_stmt(binding.clone(), init));

                for specifier in import.specifiers {
                    let (local, replacement) = match specifier {
                        ImportSpecifier::Named(named) => {
                            let name = named
                                .imported
                                .as_ref()
                                .map(export_name)
                                .unwrap_or_else(|| named.local.sym.to_string());
                            (named.local, Replacement {
                                expr: member(Expr::Ident(binding.clone()), &name),
                                detach_this: true,
                            })
                        }
                        ImportSpecifier::Default(default) => (default.local, Replacement {
                            expr: member(Expr::Ident(binding.clone()), "default"),
                            detach_this: true,
                        }),
                        ImportSpecifier::Namespace(ns) => (ns.local, Replacement {
                            expr: Expr::Ident(binding.clone()),
                            detach_this: false,
                        }),
                    };
                    self.replacements.insert(local.to_id(), replacement);
                }
            }

            // host globals are referenced directly, nothing is emitted
            Target::External(external) => {
                for specifier in import.specifiers {
                    let (local, expr) = match specifier {
                        ImportSpecifier::Named(named) => {
                            let name = named
                                .imported
                                .as_ref()
                                .map(export_name)
                                .unwrap_or_else(|| named.local.sym.to_string());
                            (named.local, member(self.host_expr(&external), &name))
                        }
                        ImportSpecifier::Default(default) => (default.local, self.host_expr(&external)),
                        ImportSpecifier::Namespace(ns) => (ns.local, self.host_expr(&external)),
                    };
                    self.replacements.insert(local.to_id(), Replacement {
                        expr,
                        detach_this: false,
                    });
                }
            }
        }

        Ok(())
    }

    fn lower_named_export(
        &mut self,
        named: NamedExport,
        requires: &mut Vec<Stmt>,
        trailing: &mut Vec<Stmt>,
    ) -> Result<()> {
        let exporting = self.role == ModuleRole::Dependency;

        let source = match &named.src {
            Some(src) => Some(match self.resolve(&src.value)? {
                Target::Internal(id) => {
                    if !exporting {
                        requires.push(expr_stmt(self.require_call(&id)));
                        return Ok(());
                    }
                    let binding = Ident::new_private(local_name(&src.value).into(), DUMMY_SP);
                    requires.push(var_stmt(binding.clone(), self.require_call(&id)));
                    Expr::Ident(binding)
                }
                Target::External(binding) => self.host_expr(&binding),
            }),
            None => None,
        };

        if !exporting {
            return Ok(());
        }

        for specifier in named.specifiers {
            match specifier {
                ExportSpecifier::Named(ExportNamedSpecifier { orig, exported, is_type_only, .. }) => {
                    if is_type_only {
                        continue;
                    }
                    let exported_name = exported.as_ref().map(export_name).unwrap_or_else(|| export_name(&orig));
                    let value = match (&source, orig) {
                        (Some(module), orig) => member(module.clone(), &export_name(&orig)),
                        (None, ModuleExportName::Ident(local)) => {
                            self.track_live(&local, &exported_name);
                            Expr::Ident(local)
                        }
                        (None, ModuleExportName::Str(s)) => {
                            return Err(self.error(s.span, "string export names need a source module"));
                        }
                    };
                    trailing.push(self.export_stmt(&exported_name, value));
                }
                ExportSpecifier::Namespace(ExportNamespaceSpecifier { name, .. }) => {
                    if let Some(module) = &source {
                        trailing.push(self.export_stmt(&export_name(&name), module.clone()));
                    }
                }
                ExportSpecifier::Default(ExportDefaultSpecifier { exported }) => {
                    if let Some(module) = &source {
                        trailing.push(self.export_stmt(&exported.sym, member(module.clone(), "default")));
                    }
                }
            }
        }

        Ok(())
    }

    fn resolve(&mut self, specifier: &str) -> Result<Target> {
        match self.imports.resolve_import(self.path, specifier)? {
            ModuleRef::Internal { id, path } => {
                if !self.dependencies.iter().any(|d| d.specifier == specifier) {
                    self.dependencies.push(ModuleDependency {
                        specifier: specifier.to_string(),
                        id: id.clone(),
                        path,
                    });
                }
                Ok(Target::Internal(id))
            }
            ModuleRef::External(binding) => Ok(Target::External(binding)),
        }
    }

    fn error(&self, span: Span, message: impl Into<String>) -> DashpackError {
        error_at(self.cm, self.path, span, message)
    }

    /// An identifier that always refers to the enclosing scope, never renamed
    fn global(&self, name: &str) -> Ident {
        Ident::new(
            name.into(),
            DUMMY_SP,
            SyntaxContext::empty().apply_mark(self.unresolved_mark),
        )
    }

    fn host_expr(&self, binding: &ExternalBinding) -> Expr {
        let mut segments = binding.segments();
        let first = segments.next().unwrap_or_default();
        segments.fold(Expr::Ident(self.global(first)), |obj, segment| member(obj, segment))
    }

    fn call_runtime(&self, function: &str, args: Vec<Expr>) -> Expr {
        Expr::Call(CallExpr {
            span: DUMMY_SP,
            ctxt: SyntaxContext::empty(),
            callee: Callee::Expr(Box::new(Expr::Ident(self.global(function)))),
            args: args
                .into_iter()
                .map(|expr| ExprOrSpread {
                    spread: None,
                    expr: Box::new(expr),
                })
                .collect(),
            type_args: None,
        })
    }

    fn require_call(&self, id: &str) -> Expr {
        self.call_runtime(RUNTIME_REQUIRE, vec![str_lit(id)])
    }

    /// `exports.<name> = value`
    fn export_assign(&self, name: &str, value: Expr) -> Expr {
        let target = match member(Expr::Ident(self.global("exports")), name) {
            Expr::Member(m) => m,
            _ => unreachable!("member() always builds a member expression"),
        };
        Expr::Assign(AssignExpr {
            span: DUMMY_SP,
            op: AssignOp::Assign,
            left: AssignTarget::Simple(SimpleAssignTarget::Member(target)),
            right: Box::new(value),
        })
    }

    /// `exports.<name> = value;`
    fn export_stmt(&self, name: &str, value: Expr) -> Stmt {
        expr_stmt(self.export_assign(name, value))
    }

    fn track_live(&mut self, local: &Ident, exported: &str) {
        if self.role != ModuleRole::Dependency {
            return;
        }
        let names = self.live.entry(local.to_id()).or_default();
        if !names.iter().any(|n| n == exported) {
            names.push(exported.to_string());
        }
    }

    /// `exports.a = exports.b = value` for every name `local` is exported under
    fn sync_exports(&self, names: &[String], value: Expr) -> Expr {
        names
            .iter()
            .rev()
            .fold(value, |value, name| self.export_assign(name, value))
    }

    fn live_names(&self, ident: &Ident) -> Option<Vec<String>> {
        self.live.get(&ident.to_id()).cloned()
    }

    /// Exported names touched by a destructuring assignment target
    fn live_names_in(&self, pat: &AssignTargetPat) -> Vec<(Ident, Vec<String>)> {
        find_pat_ids::<_, Ident>(pat)
            .into_iter()
            .filter_map(|ident| self.live_names(&ident).map(|names| (ident, names)))
            .collect()
    }

    fn record(&mut self, error: DashpackError) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }
}

impl VisitMut for ModuleLowering<'_> {
    fn visit_mut_expr_stmt(&mut self, stmt: &mut ExprStmt) {
        stmt.visit_mut_children_with(self);

        // the statement value is discarded, so exports can follow the destructuring
        let mut inner = &*stmt.expr;
        while let Expr::Paren(paren) = inner {
            inner = &paren.expr;
        }
        let touched = match inner {
            Expr::Assign(AssignExpr {
                left: AssignTarget::Pat(pat),
                ..
            }) => self.live_names_in(pat),
            _ => return,
        };
        if touched.is_empty() {
            return;
        }

        let mut exprs = vec![Box::new((*stmt.expr).take())];
        for (ident, names) in touched {
            exprs.push(Box::new(self.sync_exports(&names, Expr::Ident(ident))));
        }
        stmt.expr = Box::new(Expr::Seq(SeqExpr {
            span: DUMMY_SP,
            exprs,
        }));
    }

    fn visit_mut_expr(&mut self, expr: &mut Expr) {
        match expr {
            // `x = v` becomes `exports.x = x = v`
            Expr::Assign(assign) => {
                assign.visit_mut_children_with(self);
                let names = match &assign.left {
                    AssignTarget::Simple(SimpleAssignTarget::Ident(binding)) => self.live_names(&binding.id),
                    _ => None,
                };
                if let Some(names) = names {
                    let value = expr.take();
                    *expr = self.sync_exports(&names, value);
                }
                return;
            }
            // `++x` becomes `exports.x = ++x`, `x++` becomes `(exports.x = ++x) - 1`
            Expr::Update(update) => {
                update.visit_mut_children_with(self);
                let names = match &*update.arg {
                    Expr::Ident(ident) => self.live_names(ident),
                    _ => None,
                };
                if let Some(names) = names {
                    let postfix = !update.prefix;
                    let op = update.op;
                    update.prefix = true;
                    let value = expr.take();
                    let synced = self.sync_exports(&names, value);
                    *expr = if postfix {
                        Expr::Bin(BinExpr {
                            span: DUMMY_SP,
                            op: match op {
                                UpdateOp::PlusPlus => BinaryOp::Sub,
                                UpdateOp::MinusMinus => BinaryOp::Add,
                            },
                            left: Box::new(synced),
                            right: Box::new(num_lit(1.0)),
                        })
                    } else {
                        synced
                    };
                }
                return;
            }
            Expr::Ident(ident) => {
                if let Some(replacement) = self.replacements.get(&ident.to_id()) {
                    *expr = replacement.expr.clone();
                    return;
                }
            }
            Expr::Call(call) => {
                let is_global_require = matches!(
                    &call.callee,
                    Callee::Expr(callee) if matches!(&**callee, Expr::Ident(i) if i.ctxt.outer() == self.unresolved_mark)
                );
                if is_global_require {
                    if let Some(specifier) = require_specifier(call).map(str::to_string) {
                        match self.resolve(&specifier) {
                            Ok(Target::Internal(id)) => *expr = self.require_call(&id),
                            Ok(Target::External(binding)) => *expr = self.host_expr(&binding),
                            Err(e) => self.record(e),
                        }
                        return;
                    }
                }
            }
            Expr::MetaProp(meta) if meta.kind == MetaPropKind::ImportMeta => {
                let err = self.error(meta.span, "`import.meta` is not supported in legacy bundles");
                self.record(err);
                return;
            }
            _ => {}
        }

        expr.visit_mut_children_with(self);
    }

    fn visit_mut_callee(&mut self, callee: &mut Callee) {
        match callee {
            Callee::Import(import) => {
                let err = self.error(import.span, "dynamic `import()` is not supported in legacy bundles");
                self.record(err);
                return;
            }
            Callee::Expr(expr) => {
                if let Expr::Ident(ident) = &**expr {
                    if let Some(replacement) = self.replacements.get(&ident.to_id()) {
                        let target = replacement.expr.clone();
                        **expr = if replacement.detach_this {
                            Expr::Seq(SeqExpr {
                                span: DUMMY_SP,
                                exprs: vec![Box::new(num_lit(0.0)), Box::new(target)],
                            })
                        } else {
                            target
                        };
                        return;
                    }
                }
            }
            Callee::Super(_) => {}
        }

        callee.visit_mut_children_with(self);
    }

    fn visit_mut_prop(&mut self, prop: &mut Prop) {
        if let Prop::Shorthand(ident) = prop {
            if let Some(replacement) = self.replacements.get(&ident.to_id()) {
                *prop = Prop::KeyValue(KeyValueProp {
                    key: PropName::Ident(IdentName::new(ident.sym.clone(), ident.span)),
                    value: Box::new(replacement.expr.clone()),
                });
                return;
            }
        }

        prop.visit_mut_children_with(self);
    }
}

fn export_name(name: &ModuleExportName) -> String {
    match name {
        ModuleExportName::Ident(ident) => ident.sym.to_string(),
        ModuleExportName::Str(s) => s.value.to_string(),
    }
}

/// `__dashpack_import_format__` for `./utils/format.ts`; the prefix keeps
/// clear of names an entry declares for the host
fn local_name(specifier: &str) -> String {
    let stem = specifier
        .rsplit('/')
        .find(|segment| !segment.is_empty() && *segment != "." && *segment != "..")
        .unwrap_or("module");
    let stem = stem.split('.').next().unwrap_or(stem);

    let mut name = String::from("__dashpack_import_");
    name.extend(stem.chars().map(|c| if c.is_ascii_alphanumeric() { c } else { '_' }));
    name.push_str("__");
    name
}

/// `obj.name`, or `obj["name"]` when `name` is not usable after a dot in ES3
fn member(obj: Expr, name: &str) -> Expr {
    let prop = if Ident::verify_symbol(name).is_ok() {
        MemberProp::Ident(IdentName::new(name.into(), DUMMY_SP))
    } else {
        MemberProp::Computed(ComputedPropName {
            span: DUMMY_SP,
            expr: Box::new(str_lit(name)),
        })
    };

    Expr::Member(MemberExpr {
        span: DUMMY_SP,
        obj: Box::new(obj),
        prop,
    })
}

fn str_lit(value: &str) -> Expr {
    Expr::Lit(Lit::Str(Str {
        span: DUMMY_SP,
        value: value.into(),
        raw: None,
    }))
}

fn num_lit(value: f64) -> Expr {
    Expr::Lit(Lit::Num(Number {
        span: DUMMY_SP,
        value,
        raw: None,
    }))
}

fn expr_stmt(expr: Expr) -> Stmt {
    Stmt::Expr(ExprStmt {
        span: DUMMY_SP,
        expr: Box::new(expr),
    })
}

fn var_stmt(name: Ident, init: Expr) -> Stmt {
    Stmt::Decl(Decl::Var(Box::new(VarDecl {
        span: DUMMY_SP,
        ctxt: SyntaxContext::empty(),
        kind: VarDeclKind::Var,
        declare: false,
        decls: vec![VarDeclarator {
            span: DUMMY_SP,
            name: Pat::Ident(name.into()),
            init: Some(Box::new(init)),
            definite: false,
        }],
    })))
}
