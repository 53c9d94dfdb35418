/// Syntax-tree traversal for the static validator
///
/// One walk collects every violation (no short-circuiting); a second,
/// separate pass over the same tree infers semantic facts. Both passes
/// share the traversal below through the `NodeSink` seam.
use super::allowlist::{self, LIBRARY_ALIAS, LIBRARY_NAME, NETWORK_CTOR, VERSION_ATTR};
use super::{InferredFacts, Level, SourceSpan, ValidationMessage};
use rustpython_parser::ast::{self, Expr, Stmt};
use std::collections::{BTreeMap, HashSet};

pub(crate) struct Scan {
    pub messages: Vec<ValidationMessage>,
    pub inferred: InferredFacts,
}

/// Run the violation walk, then the facts pass.
pub(crate) fn scan(source: &str, suite: &[Stmt]) -> Scan {
    let mut violations = Violations {
        source,
        messages: Vec::new(),
        blocked_calls: HashSet::new(),
        saw_alias_import: false,
    };
    walk_suite(suite, &mut violations);

    let Violations {
        mut messages,
        blocked_calls,
        saw_alias_import,
        ..
    } = violations;

    if !saw_alias_import {
        messages.push(ValidationMessage {
            level: Level::Warn,
            text: format!("Missing 'import {} as {}'", LIBRARY_NAME, LIBRARY_ALIAS),
            at: None,
        });
    }

    let mut facts = Facts {
        blocked_calls: &blocked_calls,
        components: BTreeMap::new(),
        fluid: None,
    };
    walk_suite(suite, &mut facts);

    Scan {
        messages,
        inferred: InferredFacts {
            fluid: facts.fluid,
            components: facts.components,
        },
    }
}

/// 1-based line and 0-based column for a byte offset.
pub(crate) fn span_at(source: &str, offset: u32) -> SourceSpan {
    let clamped = (offset as usize).min(source.len());
    let mut line = 1u32;
    let mut line_start = 0usize;
    for (idx, byte) in source.bytes().enumerate().take(clamped) {
        if byte == b'\n' {
            line += 1;
            line_start = idx + 1;
        }
    }
    SourceSpan {
        line,
        col: (clamped - line_start) as u32,
    }
}

/// Byte-offset key identifying one call expression across both passes.
fn call_key(call: &ast::ExprCall) -> (u32, u32) {
    (
        u32::from(call.range.start()),
        u32::from(call.range.end()),
    )
}

/// Collects blocked-level violations and the import-alias observation.
struct Violations<'a> {
    source: &'a str,
    messages: Vec<ValidationMessage>,
    /// Source ranges of blocked call expressions, so the facts pass never
    /// counts a disallowed call toward `components`.
    blocked_calls: HashSet<(u32, u32)>,
    saw_alias_import: bool,
}

impl Violations<'_> {
    fn block(&mut self, text: String, offset: u32) {
        self.messages.push(ValidationMessage {
            level: Level::Blocked,
            text,
            at: Some(span_at(self.source, offset)),
        });
    }
}

impl NodeSink for Violations<'_> {
    fn on_stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Import(node) => {
                for alias in &node.names {
                    let root = alias.name.as_str().split('.').next().unwrap_or_default();
                    if root == LIBRARY_NAME {
                        if alias.asname.as_ref().map(|a| a.as_str()) == Some(LIBRARY_ALIAS) {
                            self.saw_alias_import = true;
                        }
                    } else {
                        self.block(
                            format!("Disallowed import '{}'", alias.name.as_str()),
                            u32::from(alias.range.start()),
                        );
                    }
                }
            }
            Stmt::ImportFrom(node) => {
                let level = node.level.as_ref().map_or(0, |l| l.to_u32());
                let module = node.module.as_ref().map(|m| m.as_str()).unwrap_or("");
                let root = module.split('.').next().unwrap_or_default();
                if level > 0 || root != LIBRARY_NAME {
                    let shown = if module.is_empty() {
                        ".".repeat(level.max(1) as usize)
                    } else {
                        module.to_string()
                    };
                    self.block(
                        format!("Disallowed import '{}'", shown),
                        u32::from(node.range.start()),
                    );
                }
            }
            _ => {}
        }
    }

    fn on_expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Call(call) => {
                if let Expr::Attribute(attr) = call.func.as_ref() {
                    if let Some(base) = attribute_base(attr) {
                        if (base == LIBRARY_ALIAS || base == LIBRARY_NAME)
                            && !allowlist::is_allowed_call(attr.attr.as_str())
                        {
                            self.blocked_calls.insert(call_key(call));
                            self.block(
                                format!("Disallowed call '{}.{}'", base, attr.attr.as_str()),
                                u32::from(call.range.start()),
                            );
                        }
                    }
                }
            }
            Expr::Attribute(attr) => {
                let name = attr.attr.as_str();
                if name.starts_with("__") && name != VERSION_ATTR {
                    self.block(
                        format!("Disallowed access to dunder '{}'", name),
                        u32::from(attr.range.start()),
                    );
                }
            }
            _ => {}
        }
    }
}

/// Counts recognized constructor calls and captures the declared fluid.
struct Facts<'a> {
    blocked_calls: &'a HashSet<(u32, u32)>,
    components: BTreeMap<String, u32>,
    fluid: Option<String>,
}

impl NodeSink for Facts<'_> {
    fn on_expr(&mut self, expr: &Expr) {
        let Expr::Call(call) = expr else {
            return;
        };
        if self.blocked_calls.contains(&call_key(call)) {
            return;
        }
        let Some(name) = call_name(call) else {
            return;
        };
        if let Some(kind) = allowlist::component_kind(name) {
            *self.components.entry(kind.to_string()).or_insert(0) += 1;
        }
        if name == NETWORK_CTOR {
            for keyword in &call.keywords {
                if keyword.arg.as_ref().map(|a| a.as_str()) != Some("fluid") {
                    continue;
                }
                // Only a literal string constant counts as a declared fluid.
                if let Expr::Constant(constant) = &keyword.value {
                    if let ast::Constant::Str(value) = &constant.value {
                        self.fluid = Some(value.clone());
                    }
                }
            }
        }
    }
}

/// Base name of a (possibly nested) attribute chain: `pp.plotting.draw`
/// resolves to `pp`.
fn attribute_base(attr: &ast::ExprAttribute) -> Option<&str> {
    let mut value: &Expr = &attr.value;
    loop {
        match value {
            Expr::Attribute(inner) => value = &inner.value,
            Expr::Name(name) => return Some(name.id.as_str()),
            _ => return None,
        }
    }
}

/// Called function name: bare `create_junction(...)` or the trailing
/// attribute of `pp.create_junction(...)`.
fn call_name(call: &ast::ExprCall) -> Option<&str> {
    match call.func.as_ref() {
        Expr::Name(name) => Some(name.id.as_str()),
        Expr::Attribute(attr) => Some(attr.attr.as_str()),
        _ => None,
    }
}

/// Pre-order traversal seam shared by the violation and facts passes.
trait NodeSink {
    fn on_stmt(&mut self, _stmt: &Stmt) {}
    fn on_expr(&mut self, _expr: &Expr) {}
}

fn walk_suite(suite: &[Stmt], sink: &mut dyn NodeSink) {
    for stmt in suite {
        walk_stmt(stmt, sink);
    }
}

fn walk_stmt(stmt: &Stmt, sink: &mut dyn NodeSink) {
    sink.on_stmt(stmt);
    match stmt {
        Stmt::FunctionDef(node) => {
            walk_arguments(&node.args, sink);
            for decorator in &node.decorator_list {
                walk_expr(decorator, sink);
            }
            if let Some(returns) = &node.returns {
                walk_expr(returns, sink);
            }
            walk_suite(&node.body, sink);
        }
        Stmt::AsyncFunctionDef(node) => {
            walk_arguments(&node.args, sink);
            for decorator in &node.decorator_list {
                walk_expr(decorator, sink);
            }
            if let Some(returns) = &node.returns {
                walk_expr(returns, sink);
            }
            walk_suite(&node.body, sink);
        }
        Stmt::ClassDef(node) => {
            for base in &node.bases {
                walk_expr(base, sink);
            }
            for keyword in &node.keywords {
                walk_expr(&keyword.value, sink);
            }
            for decorator in &node.decorator_list {
                walk_expr(decorator, sink);
            }
            walk_suite(&node.body, sink);
        }
        Stmt::Return(node) => {
            if let Some(value) = &node.value {
                walk_expr(value, sink);
            }
        }
        Stmt::Delete(node) => {
            for target in &node.targets {
                walk_expr(target, sink);
            }
        }
        Stmt::Assign(node) => {
            for target in &node.targets {
                walk_expr(target, sink);
            }
            walk_expr(&node.value, sink);
        }
        Stmt::AugAssign(node) => {
            walk_expr(&node.target, sink);
            walk_expr(&node.value, sink);
        }
        Stmt::AnnAssign(node) => {
            walk_expr(&node.target, sink);
            walk_expr(&node.annotation, sink);
            if let Some(value) = &node.value {
                walk_expr(value, sink);
            }
        }
        Stmt::For(node) => {
            walk_expr(&node.target, sink);
            walk_expr(&node.iter, sink);
            walk_suite(&node.body, sink);
            walk_suite(&node.orelse, sink);
        }
        Stmt::AsyncFor(node) => {
            walk_expr(&node.target, sink);
            walk_expr(&node.iter, sink);
            walk_suite(&node.body, sink);
            walk_suite(&node.orelse, sink);
        }
        Stmt::While(node) => {
            walk_expr(&node.test, sink);
            walk_suite(&node.body, sink);
            walk_suite(&node.orelse, sink);
        }
        Stmt::If(node) => {
            walk_expr(&node.test, sink);
            walk_suite(&node.body, sink);
            walk_suite(&node.orelse, sink);
        }
        Stmt::With(node) => {
            for item in &node.items {
                walk_expr(&item.context_expr, sink);
                if let Some(vars) = &item.optional_vars {
                    walk_expr(vars, sink);
                }
            }
            walk_suite(&node.body, sink);
        }
        Stmt::AsyncWith(node) => {
            for item in &node.items {
                walk_expr(&item.context_expr, sink);
                if let Some(vars) = &item.optional_vars {
                    walk_expr(vars, sink);
                }
            }
            walk_suite(&node.body, sink);
        }
        Stmt::Match(node) => {
            walk_expr(&node.subject, sink);
            for case in &node.cases {
                if let Some(guard) = &case.guard {
                    walk_expr(guard, sink);
                }
                walk_suite(&case.body, sink);
            }
        }
        Stmt::Raise(node) => {
            if let Some(exc) = &node.exc {
                walk_expr(exc, sink);
            }
            if let Some(cause) = &node.cause {
                walk_expr(cause, sink);
            }
        }
        Stmt::Try(node) => {
            walk_suite(&node.body, sink);
            for handler in &node.handlers {
                let ast::ExceptHandler::ExceptHandler(handler) = handler;
                if let Some(type_) = &handler.type_ {
                    walk_expr(type_, sink);
                }
                walk_suite(&handler.body, sink);
            }
            walk_suite(&node.orelse, sink);
            walk_suite(&node.finalbody, sink);
        }
        Stmt::TryStar(node) => {
            walk_suite(&node.body, sink);
            for handler in &node.handlers {
                let ast::ExceptHandler::ExceptHandler(handler) = handler;
                if let Some(type_) = &handler.type_ {
                    walk_expr(type_, sink);
                }
                walk_suite(&handler.body, sink);
            }
            walk_suite(&node.orelse, sink);
            walk_suite(&node.finalbody, sink);
        }
        Stmt::Assert(node) => {
            walk_expr(&node.test, sink);
            if let Some(msg) = &node.msg {
                walk_expr(msg, sink);
            }
        }
        Stmt::Expr(node) => walk_expr(&node.value, sink),
        Stmt::Import(_)
        | Stmt::ImportFrom(_)
        | Stmt::Global(_)
        | Stmt::Nonlocal(_)
        | Stmt::Pass(_)
        | Stmt::Break(_)
        | Stmt::Continue(_) => {}
        #[allow(unreachable_patterns)]
        _ => {}
    }
}

fn walk_expr(expr: &Expr, sink: &mut dyn NodeSink) {
    sink.on_expr(expr);
    match expr {
        Expr::BoolOp(node) => {
            for value in &node.values {
                walk_expr(value, sink);
            }
        }
        Expr::NamedExpr(node) => {
            walk_expr(&node.target, sink);
            walk_expr(&node.value, sink);
        }
        Expr::BinOp(node) => {
            walk_expr(&node.left, sink);
            walk_expr(&node.right, sink);
        }
        Expr::UnaryOp(node) => walk_expr(&node.operand, sink),
        Expr::Lambda(node) => {
            walk_arguments(&node.args, sink);
            walk_expr(&node.body, sink);
        }
        Expr::IfExp(node) => {
            walk_expr(&node.test, sink);
            walk_expr(&node.body, sink);
            walk_expr(&node.orelse, sink);
        }
        Expr::Dict(node) => {
            for key in node.keys.iter().flatten() {
                walk_expr(key, sink);
            }
            for value in &node.values {
                walk_expr(value, sink);
            }
        }
        Expr::Set(node) => {
            for elt in &node.elts {
                walk_expr(elt, sink);
            }
        }
        Expr::ListComp(node) => {
            walk_expr(&node.elt, sink);
            walk_comprehensions(&node.generators, sink);
        }
        Expr::SetComp(node) => {
            walk_expr(&node.elt, sink);
            walk_comprehensions(&node.generators, sink);
        }
        Expr::DictComp(node) => {
            walk_expr(&node.key, sink);
            walk_expr(&node.value, sink);
            walk_comprehensions(&node.generators, sink);
        }
        Expr::GeneratorExp(node) => {
            walk_expr(&node.elt, sink);
            walk_comprehensions(&node.generators, sink);
        }
        Expr::Await(node) => walk_expr(&node.value, sink),
        Expr::Yield(node) => {
            if let Some(value) = &node.value {
                walk_expr(value, sink);
            }
        }
        Expr::YieldFrom(node) => walk_expr(&node.value, sink),
        Expr::Compare(node) => {
            walk_expr(&node.left, sink);
            for comparator in &node.comparators {
                walk_expr(comparator, sink);
            }
        }
        Expr::Call(node) => {
            walk_expr(&node.func, sink);
            for arg in &node.args {
                walk_expr(arg, sink);
            }
            for keyword in &node.keywords {
                walk_expr(&keyword.value, sink);
            }
        }
        Expr::FormattedValue(node) => {
            walk_expr(&node.value, sink);
            if let Some(spec) = &node.format_spec {
                walk_expr(spec, sink);
            }
        }
        Expr::JoinedStr(node) => {
            for value in &node.values {
                walk_expr(value, sink);
            }
        }
        Expr::Attribute(node) => walk_expr(&node.value, sink),
        Expr::Subscript(node) => {
            walk_expr(&node.value, sink);
            walk_expr(&node.slice, sink);
        }
        Expr::Starred(node) => walk_expr(&node.value, sink),
        Expr::List(node) => {
            for elt in &node.elts {
                walk_expr(elt, sink);
            }
        }
        Expr::Tuple(node) => {
            for elt in &node.elts {
                walk_expr(elt, sink);
            }
        }
        Expr::Slice(node) => {
            if let Some(lower) = &node.lower {
                walk_expr(lower, sink);
            }
            if let Some(upper) = &node.upper {
                walk_expr(upper, sink);
            }
            if let Some(step) = &node.step {
                walk_expr(step, sink);
            }
        }
        Expr::Constant(_) | Expr::Name(_) => {}
        #[allow(unreachable_patterns)]
        _ => {}
    }
}

fn walk_comprehensions(generators: &[ast::Comprehension], sink: &mut dyn NodeSink) {
    for generator in generators {
        walk_expr(&generator.target, sink);
        walk_expr(&generator.iter, sink);
        for condition in &generator.ifs {
            walk_expr(condition, sink);
        }
    }
}

fn walk_arguments(args: &ast::Arguments, sink: &mut dyn NodeSink) {
    for arg in args
        .posonlyargs
        .iter()
        .chain(&args.args)
        .chain(&args.kwonlyargs)
    {
        if let Some(annotation) = &arg.def.annotation {
            walk_expr(annotation, sink);
        }
        if let Some(default) = &arg.default {
            walk_expr(default, sink);
        }
    }
    if let Some(vararg) = &args.vararg {
        if let Some(annotation) = &vararg.annotation {
            walk_expr(annotation, sink);
        }
    }
    if let Some(kwarg) = &args.kwarg {
        if let Some(annotation) = &kwarg.annotation {
            walk_expr(annotation, sink);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_at_counts_lines_and_columns() {
        let source = "a = 1\nb = 2\nc = 3\n";
        assert_eq!(span_at(source, 0), SourceSpan { line: 1, col: 0 });
        assert_eq!(span_at(source, 6), SourceSpan { line: 2, col: 0 });
        assert_eq!(span_at(source, 10), SourceSpan { line: 2, col: 4 });
    }

    #[test]
    fn span_at_clamps_past_end() {
        let source = "x = 1";
        let span = span_at(source, 400);
        assert_eq!(span.line, 1);
        assert_eq!(span.col, 5);
    }
}
