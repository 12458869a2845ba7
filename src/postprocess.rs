//! Final text rewrites for the legacy host's parser.
//!
//! Older engines reject reserved words used as dotted property names
//! (`promise.catch(...)`). Matching member accesses are rewritten to bracket
//! form by splicing the original text at the parsed spans, so string literals
//! and comments are never touched.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use swc_core::common::sync::Lrc;
use swc_core::common::{BytePos, FileName, SourceMap, Spanned};
use swc_core::ecma::ast::{CallExpr, Callee, EsVersion, Expr, MemberExpr, MemberProp};
use swc_core::ecma::parser::{lexer::Lexer, Parser, StringInput, Syntax};
use swc_core::ecma::visit::{Visit, VisitWith};
use tracing::debug;

use crate::errors::{DashpackError, Result};

/// Where a member access must appear for a rule to apply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RewritePosition {
    /// Only when the member is called: `p.catch(...)`
    Call,
    /// Every access
    Any,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostProcessRule {
    /// Property name written with dot syntax
    pub property: String,

    /// Dotted path the accessed object must be, e.g. `Promise.prototype`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object: Option<String>,

    #[serde(default = "default_position")]
    pub position: RewritePosition,
}

fn default_position() -> RewritePosition {
    RewritePosition::Any
}

impl PostProcessRule {
    pub fn new(property: impl Into<String>, position: RewritePosition) -> Self {
        Self {
            property: property.into(),
            object: None,
            position,
        }
    }

    pub fn on_object(mut self, object: impl Into<String>) -> Self {
        self.object = Some(object.into());
        self
    }

    fn matches(&self, member: &MemberExpr, called: bool) -> bool {
        let MemberProp::Ident(prop) = &member.prop else {
            return false;
        };
        if &*prop.sym != self.property.as_str() {
            return false;
        }
        if self.position == RewritePosition::Call && !called {
            return false;
        }
        match &self.object {
            Some(path) => {
                let segments: Vec<&str> = path.split('.').collect();
                is_path(&member.obj, &segments)
            }
            None => true,
        }
    }
}

/// `Promise.prototype` matches the segments `["Promise", "prototype"]`
fn is_path(expr: &Expr, segments: &[&str]) -> bool {
    match (expr, segments.split_last()) {
        (Expr::Ident(ident), Some((name, []))) => &*ident.sym == *name,
        (Expr::Member(member), Some((name, rest))) if !rest.is_empty() => {
            matches!(&member.prop, MemberProp::Ident(prop) if &*prop.sym == *name)
                && is_path(&member.obj, rest)
        }
        _ => false,
    }
}

pub struct PostProcessor {
    rules: Vec<PostProcessRule>,
}

impl PostProcessor {
    pub fn new(rules: &[PostProcessRule]) -> Self {
        Self {
            rules: rules.to_vec(),
        }
    }

    /// Rewrite every matching `.name` access in `code` to `['name']`
    pub fn process(&self, bundle_name: &str, code: &str) -> Result<String> {
        if self.rules.is_empty() {
            return Ok(code.to_string());
        }

        let cm: Lrc<SourceMap> = Default::default();
        let fm = cm.new_source_file(FileName::Custom(bundle_name.to_string()).into(), code.to_string());

        let lexer = Lexer::new(
            Syntax::Es(Default::default()),
            EsVersion::latest(),
            StringInput::from(&*fm),
            None,
        );
        let mut parser = Parser::new_from(lexer);
        let script = parser.parse_script().map_err(|e| {
            DashpackError::assembly_at(
                bundle_name,
                format!("cannot post-process: {}", e.kind().msg()),
                cm.lookup_char_pos(e.span().lo).line,
            )
        })?;

        let mut collector = SiteCollector {
            rules: &self.rules,
            code,
            start: fm.start_pos,
            edits: BTreeMap::new(),
        };
        script.visit_with(&mut collector);

        if collector.edits.is_empty() {
            return Ok(code.to_string());
        }

        let sites = collector.edits.len() / 2;
        let mut output = code.to_string();
        for (offset, (len, replacement)) in collector.edits.into_iter().rev() {
            output.replace_range(offset..offset + len, &replacement);
        }

        debug!("Rewrote {} member accesses in {}", sites, bundle_name);
        Ok(output)
    }
}

struct SiteCollector<'a> {
    rules: &'a [PostProcessRule],
    code: &'a str,
    start: BytePos,
    /// byte offset -> (replaced length, replacement)
    edits: BTreeMap<usize, (usize, String)>,
}

impl SiteCollector<'_> {
    fn offset(&self, pos: BytePos) -> usize {
        (pos.0 - self.start.0) as usize
    }

    fn consider(&mut self, member: &MemberExpr, called: bool) {
        if !self.rules.iter().any(|rule| rule.matches(member, called)) {
            return;
        }
        let MemberProp::Ident(prop) = &member.prop else {
            return;
        };

        let gap_start = self.offset(member.obj.span().hi);
        let name_start = self.offset(prop.span.lo);
        let name_end = self.offset(prop.span.hi);
        let Some(dot) = find_dot(&self.code[gap_start..name_start]) else {
            return;
        };

        self.edits.insert(gap_start + dot, (1, "[".to_string()));
        self.edits
            .insert(name_start, (name_end - name_start, format!("'{}']", prop.sym)));
    }
}

impl Visit for SiteCollector<'_> {
    fn visit_call_expr(&mut self, call: &CallExpr) {
        if let Callee::Expr(callee) = &call.callee {
            if let Expr::Member(member) = &**callee {
                self.consider(member, true);
            }
        }
        call.visit_children_with(self);
    }

    fn visit_member_expr(&mut self, member: &MemberExpr) {
        self.consider(member, false);
        member.visit_children_with(self);
    }
}

/// Offset of the `.` between an object and its property, skipping comments
fn find_dot(gap: &str) -> Option<usize> {
    let bytes = gap.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'.' => return Some(i),
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i += gap[i + 2..].find("*/").map_or(bytes.len(), |end| end + 4);
            }
            b'/' if bytes.get(i + 1) == Some(&b'/') => {
                i += gap[i..].find('\n').map_or(bytes.len(), |end| end + 1);
            }
            _ => i += 1,
        }
    }
    None
}
