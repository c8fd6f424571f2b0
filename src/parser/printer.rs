//! Canonical source printer
//!
//! Output re-parses to an equal program (modulo positions) and printing is
//! idempotent. Compound sub-expressions are always parenthesized, `advance
//! time by` prints as `tick`, and an `else` holding a single `if` prints as
//! `else if`.

use std::fmt::Write;

use super::ast::*;
use crate::lexer::KeywordTable;
use crate::schema::FieldConstraint;

const INDENT: &str = "  ";

pub fn print_program(program: &Program) -> String {
    let mut printer = Printer::default();
    printer.program(program);
    printer.out
}

/// Render one expression the way it would appear on the right of `is`.
pub fn print_expr(expr: &Expr) -> String {
    let mut out = String::new();
    write_expr(expr, &mut out);
    out
}

#[derive(Default)]
struct Printer {
    out: String,
    level: usize,
}

impl Printer {
    fn line(&mut self, text: &str) {
        for _ in 0..self.level {
            self.out.push_str(INDENT);
        }
        self.out.push_str(text);
        self.out.push('\n');
    }

    fn indented(&mut self, f: impl FnOnce(&mut Self)) {
        self.level += 1;
        f(self);
        self.level -= 1;
    }

    fn program(&mut self, program: &Program) {
        if let Some(version) = &program.spec_version {
            self.line(&format!("spec is {}", quote(version)));
            self.out.push('\n');
        }
        for (i, decl) in program.declarations.iter().enumerate() {
            if i > 0 {
                self.out.push('\n');
            }
            self.decl(decl);
        }
    }

    /* ===================== declarations ===================== */

    fn decl(&mut self, decl: &Decl) {
        match decl {
            Decl::Use(d) => {
                if d.include {
                    self.line(&format!("include {}", quote(&d.module)));
                } else {
                    match &d.alias {
                        Some(alias) => self.line(&format!(
                            "use {} as {}",
                            quote(&d.module),
                            binding(alias)
                        )),
                        None => self.line(&format!("use {}", quote(&d.module))),
                    }
                }
            }
            Decl::Alias(d) => self.line(&format!(
                "alias {} is {}",
                quote(&d.name),
                type_name(&d.target.name)
            )),
            Decl::Record(d) => self.record(d),
            Decl::Flow(d) => self.flow(d),
            Decl::Tool(d) => {
                self.line(&format!("tool {}:", quote(&d.name)));
                self.indented(|p| {
                    if let Some(kind) = &d.kind {
                        p.line(&format!("kind is {}", quote(kind)));
                    }
                    if let Some(purity) = d.purity {
                        p.line(&format!("purity is {}", quote(purity_text(purity))));
                    }
                    for cap in &d.capabilities {
                        p.line(&format!("capability is {}", quote(&cap.name)));
                    }
                    p.params("input", &d.inputs);
                    p.params("output", &d.outputs);
                });
            }
            Decl::Ai(d) => {
                self.line(&format!("ai {}:", quote(&d.name)));
                self.indented(|p| {
                    if let Some(model) = &d.model {
                        p.line(&format!("model is {}", quote(model)));
                    }
                    if let Some(provider) = &d.provider {
                        p.line(&format!("provider is {}", quote(provider)));
                    }
                    if let Some(system) = &d.system_prompt {
                        p.line(&format!("system_prompt is {}", quote(system)));
                    }
                    if let Some(prompt) = &d.prompt {
                        p.line(&format!("prompt is {}", quote(&prompt.name)));
                    }
                    if !d.tools.is_empty() {
                        p.line("tools:");
                        p.indented(|p| {
                            for tool in &d.tools {
                                p.line(&format!("expose {}", quote(&tool.name)));
                            }
                        });
                    }
                });
            }
            Decl::Agent(d) => {
                self.line(&format!("agent {}:", quote(&d.name)));
                self.indented(|p| {
                    p.line(&format!("ai is {}", quote(&d.ai.name)));
                    if let Some(system) = &d.system_prompt {
                        p.line(&format!("system_prompt is {}", quote(system)));
                    }
                });
            }
            Decl::Team(d) => {
                self.line(&format!("team {}:", quote(&d.name)));
                self.indented(|p| {
                    for agent in &d.agents {
                        p.line(&format!("agent is {}", quote(&agent.name)));
                    }
                });
            }
            Decl::Policy(d) => {
                self.line(&format!("policy {}:", quote(&d.name)));
                self.indented(|p| {
                    for flow in &d.flows {
                        p.line(&format!("flow is {}", quote(&flow.name)));
                    }
                    for grant in &d.grants {
                        p.line(&format!("grant {}", quote(&grant.name)));
                    }
                });
            }
            Decl::Job(d) => {
                self.line(&format!("job {}:", quote(&d.name)));
                self.indented(|p| {
                    p.line(&format!("flow is {}", quote(&d.flow.name)));
                    if let Some(schedule) = &d.schedule {
                        p.line(&format!("schedule is {}", quote(schedule)));
                    }
                });
            }
            Decl::Prompt(d) => {
                self.line(&format!("prompt {}:", quote(&d.name)));
                self.indented(|p| {
                    if let Some(version) = &d.version {
                        p.line(&format!("version is {}", quote(version)));
                    }
                    p.line(&format!("text is {}", quote(&d.text)));
                });
            }
            Decl::Page(d) => {
                self.line(&format!("page {}:", quote(&d.name)));
                self.indented(|p| {
                    for item in &d.items {
                        p.page_item(item);
                    }
                });
            }
            Decl::Route(d) => {
                self.line(&format!("route {}:", quote(&d.name)));
                self.indented(|p| {
                    p.line(&format!("path is {}", quote(&d.path)));
                    p.line(&format!("method is {}", quote(&d.method)));
                    p.params("request", &d.request);
                    p.params("response", &d.response);
                    p.line(&format!("flow is {}", quote(&d.flow.name)));
                });
            }
        }
    }

    fn record(&mut self, d: &RecordDecl) {
        self.line(&format!("record {}:", quote(&d.name)));
        self.indented(|p| {
            for field in &d.fields {
                let mut text = format!(
                    "{} {}",
                    field_key(&field.name),
                    type_name(&field.type_ref.name)
                );
                for constraint in &field.constraints {
                    text.push_str(" must ");
                    text.push_str(&constraint_text(constraint));
                }
                p.line(&text);
            }
            if let Some(order) = &d.order_by {
                p.line(&format!("order by {}", field_key(&order.name)));
            }
        });
    }

    fn flow(&mut self, d: &FlowDecl) {
        self.line(&format!("{} {}:", d.kind.as_str(), quote(&d.name)));
        self.indented(|p| {
            if let Some(purity) = d.purity {
                p.line(&format!("purity is {}", quote(purity_text(purity))));
            }
            p.params("input", &d.inputs);
            p.params("output", &d.outputs);
            p.block(&d.body);
        });
    }

    fn params(&mut self, section: &str, params: &[ParamDecl]) {
        if params.is_empty() {
            return;
        }
        self.line(&format!("{}:", section));
        self.indented(|p| {
            for param in params {
                p.line(&format!(
                    "{} is {}",
                    field_key(&param.name),
                    type_name(&param.type_ref.name)
                ));
            }
        });
    }

    fn page_item(&mut self, item: &PageItem) {
        match item {
            PageItem::Title { value, .. } => self.line(&format!("title is {}", quote(value))),
            PageItem::Text { value, .. } => self.line(&format!("text is {}", quote(value))),
            PageItem::Form { record, .. } => self.line(&format!("form is {}", quote(&record.name))),
            PageItem::Table { record, .. } => {
                self.line(&format!("table is {}", quote(&record.name)))
            }
            PageItem::Button { label, flow, .. } => {
                self.line(&format!("button {}:", quote(label)));
                self.indented(|p| p.line(&format!("calls flow {}", quote(&flow.name))));
            }
        }
    }

    /* ===================== statements ===================== */

    fn block(&mut self, body: &[Stmt]) {
        for stmt in body {
            self.stmt(stmt);
        }
    }

    fn stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Let {
                name,
                value,
                constant,
                ..
            } => {
                let head = format!("let {} is", binding(name));
                if !self.block_value(&head, value) {
                    let suffix = if *constant { " constant" } else { "" };
                    self.line(&format!("{} {}{}", head, print_expr(value), suffix));
                }
            }
            Stmt::AsyncLet { name, call, .. } => {
                self.tool_call(&format!("let {} is async", binding(name)), call);
            }
            Stmt::Set { target, value, .. } => {
                let head = format!("set {} is", target_text(target));
                if !self.block_value(&head, value) {
                    self.line(&format!("{} {}", head, print_expr(value)));
                }
            }
            Stmt::SetWith { target, fields, .. } => {
                self.line(&format!("set {} with:", target_text(target)));
                self.indented(|p| p.fields(fields));
            }
            Stmt::If {
                condition,
                then_body,
                else_body,
                ..
            } => self.if_chain("if", condition, then_body, else_body),
            Stmt::Repeat { count, body, .. } => {
                self.line(&format!("repeat up to {} times:", print_expr(count)));
                self.indented(|p| p.block(body));
            }
            Stmt::ForEach {
                item,
                iterable,
                body,
                ..
            } => {
                self.line(&format!(
                    "for each {} in {}:",
                    binding(item),
                    print_expr(iterable)
                ));
                self.indented(|p| p.block(body));
            }
            Stmt::Match {
                subject,
                arms,
                otherwise,
                ..
            } => {
                self.line(&format!("match {}:", print_expr(subject)));
                self.indented(|p| {
                    for arm in arms {
                        p.line(&format!("when {}:", print_expr(&arm.pattern)));
                        p.indented(|p| p.block(&arm.body));
                    }
                    if let Some(body) = otherwise {
                        p.line("otherwise:");
                        p.indented(|p| p.block(body));
                    }
                });
            }
            Stmt::Parallel { tasks, .. } => {
                self.line("parallel:");
                self.indented(|p| {
                    for task in tasks {
                        p.line(&format!("run {}:", quote(&task.name)));
                        p.indented(|p| p.block(&task.body));
                    }
                });
            }
            Stmt::Await { name, .. } => self.line(&format!("await {}", binding(name))),
            Stmt::Return { value, .. } => self.line(&format!("return {}", print_expr(value))),
            Stmt::Yield { value, .. } => self.line(&format!("yield {}", print_expr(value))),
            Stmt::AdvanceTime { amount, .. } => {
                self.line(&format!("tick {}", print_expr(amount)))
            }
            Stmt::Save {
                record,
                value,
                binding: bound,
                ..
            } => {
                let mut text = format!("save {} with {}", quote(&record.name), print_expr(value));
                if let Some(name) = bound {
                    let _ = write!(text, " as {}", binding(name));
                }
                self.line(&text);
            }
            Stmt::Find {
                record,
                predicate,
                binding: bound,
                ..
            } => {
                let mut text = format!(
                    "find {} where {}",
                    quote(&record.name),
                    print_expr(predicate)
                );
                if let Some(name) = bound {
                    let _ = write!(text, " as {}", binding(name));
                }
                self.line(&text);
            }
            Stmt::Enqueue { job, .. } => self.line(&format!("enqueue job {}", quote(&job.name))),
        }
    }

    fn if_chain(&mut self, keyword: &str, condition: &Expr, then_body: &[Stmt], else_body: &[Stmt]) {
        self.line(&format!("{} {}:", keyword, print_expr(condition)));
        self.indented(|p| p.block(then_body));
        match else_body {
            [] => {}
            [Stmt::If {
                condition,
                then_body,
                else_body,
                ..
            }] => self.if_chain("else if", condition, then_body, else_body),
            body => {
                self.line("else:");
                self.indented(|p| p.block(body));
            }
        }
    }

    /// Print block-shaped values; false when `value` is a plain expression.
    fn block_value(&mut self, head: &str, value: &Expr) -> bool {
        match value {
            Expr::ToolCall(call) => {
                self.tool_call(head, call);
                true
            }
            Expr::CallFlow {
                kind,
                target,
                args,
                outputs,
                ..
            } => {
                self.line(&format!("{} call {} {}:", head, kind.as_str(), quote(target)));
                self.indented(|p| {
                    p.line("input:");
                    p.indented(|p| p.fields(args));
                    p.line("output:");
                    p.indented(|p| {
                        for output in outputs {
                            p.line(&field_key(&output.name));
                        }
                    });
                });
                true
            }
            _ => false,
        }
    }

    fn tool_call(&mut self, head: &str, call: &ToolCall) {
        self.line(&format!("{} {}:", head, call.tool));
        self.indented(|p| p.fields(&call.args));
    }

    fn fields(&mut self, fields: &[FieldAssign]) {
        for field in fields {
            self.line(&format!(
                "{} is {}",
                field_key(&field.name),
                print_expr(&field.value)
            ));
        }
    }
}

/* ===================== expressions ===================== */

fn write_expr(expr: &Expr, out: &mut String) {
    match expr {
        Expr::Literal { value, .. } => out.push_str(&literal_text(value)),
        Expr::List { items, .. } => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_expr(item, out);
            }
            out.push(']');
        }
        Expr::Record { fields, .. } => {
            out.push('{');
            for (i, field) in fields.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                out.push_str(&field_key(&field.name));
                out.push_str(": ");
                write_expr(&field.value, out);
            }
            out.push('}');
        }
        Expr::Name { name, .. } => out.push_str(&binding(name)),
        Expr::Root { root, .. } => out.push_str(root.as_str()),
        Expr::Attr { object, field, .. } => {
            write_operand(object, out);
            out.push('.');
            out.push_str(&word(field));
        }
        Expr::Index { object, index, .. } => {
            write_operand(object, out);
            out.push('[');
            write_expr(index, out);
            out.push(']');
        }
        Expr::Unary { op, operand, .. } => {
            out.push_str(match op {
                UnaryOp::Neg => "-",
                UnaryOp::Not => "not ",
            });
            write_operand(operand, out);
        }
        Expr::Binary {
            op, left, right, ..
        } => {
            write_operand(left, out);
            out.push(' ');
            out.push_str(binary_op_text(*op));
            out.push(' ');
            write_operand(right, out);
        }
        Expr::OneOf { value, options, .. } => {
            write_operand(value, out);
            out.push_str(" is one of ");
            write_operand(options, out);
        }
        Expr::Between {
            value,
            low,
            high,
            strict,
            ..
        } => {
            write_operand(value, out);
            out.push_str(if *strict {
                " is strictly between "
            } else {
                " is between "
            });
            write_operand(low, out);
            out.push_str(" and ");
            write_operand(high, out);
        }
        Expr::ToolCall(call) => {
            out.push_str(&call.tool);
            out.push(':');
        }
        Expr::CallFlow { kind, target, .. } => {
            let _ = write!(out, "call {} {}", kind.as_str(), quote(target));
        }
    }
}

/// Sub-expression: parenthesized when compound.
fn write_operand(expr: &Expr, out: &mut String) {
    let compound = matches!(
        expr,
        Expr::Unary { .. } | Expr::Binary { .. } | Expr::OneOf { .. } | Expr::Between { .. }
    );
    if compound {
        out.push('(');
        write_expr(expr, out);
        out.push(')');
    } else {
        write_expr(expr, out);
    }
}

fn binary_op_text(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Or => "or",
        BinaryOp::And => "and",
        BinaryOp::Eq => "==",
        BinaryOp::NotEq => "!=",
        BinaryOp::Gt => ">",
        BinaryOp::Lt => "<",
        BinaryOp::Gte => ">=",
        BinaryOp::Lte => "<=",
        BinaryOp::Add => "+",
        BinaryOp::Sub => "-",
        BinaryOp::Mul => "*",
        BinaryOp::Div => "/",
        BinaryOp::Mod => "%",
        BinaryOp::Pow => "**",
    }
}

fn literal_text(literal: &Literal) -> String {
    match literal {
        Literal::Null => "null".to_string(),
        Literal::Bool(b) => b.to_string(),
        Literal::Number(n) => n.to_string(),
        Literal::Text(s) => quote(s),
    }
}

fn constraint_text(constraint: &FieldConstraint) -> String {
    match constraint {
        FieldConstraint::Present => "be present".to_string(),
        FieldConstraint::Unique => "be unique".to_string(),
        FieldConstraint::GreaterThan(n) => format!("be greater than {}", n),
        FieldConstraint::LessThan(n) => format!("be less than {}", n),
        FieldConstraint::AtLeast(n) => format!("be at least {}", n),
        FieldConstraint::AtMost(n) => format!("be at most {}", n),
        FieldConstraint::Pattern(p) => format!("match pattern {}", quote(p)),
        FieldConstraint::MinLength(n) => format!("have length at least {}", n),
        FieldConstraint::MaxLength(n) => format!("have length at most {}", n),
    }
}

fn purity_text(purity: Purity) -> &'static str {
    match purity {
        Purity::Pure => "pure",
        Purity::Effectful => "effectful",
    }
}

fn target_text(target: &Target) -> String {
    let mut parts = Vec::with_capacity(target.path.len() + 1);
    let mut path = target.path.iter();
    match target.root {
        TargetRoot::State => parts.push("state".to_string()),
        TargetRoot::Local => {
            if let Some(first) = path.next() {
                parts.push(binding(first));
            }
        }
    }
    parts.extend(path.map(|p| word(p)));
    parts.join(".")
}

/* ===================== names and strings ===================== */

pub(crate) fn quote(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for ch in text.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_')
}

/// A bound name; reserved spellings need backticks.
fn binding(name: &str) -> String {
    if KeywordTable::standard().is_reserved(name) || !is_identifier(name) {
        format!("`{}`", name)
    } else {
        name.to_string()
    }
}

/// A word position where keywords are accepted as-is.
fn word(name: &str) -> String {
    if is_identifier(name) && !matches!(name, "true" | "false" | "null") {
        name.to_string()
    } else {
        format!("`{}`", name)
    }
}

/// Field names may also be quoted strings.
fn field_key(name: &str) -> String {
    if is_identifier(name) {
        word(name)
    } else {
        quote(name)
    }
}

/// Type names that are not plain words are written as strings.
fn type_name(name: &str) -> String {
    if is_identifier(name) && !KeywordTable::standard().is_reserved(name) {
        return name.to_string();
    }
    match KeywordTable::standard().lookup(name) {
        Some(k) if k.is_type() => name.to_string(),
        _ => quote(name),
    }
}
