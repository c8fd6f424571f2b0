//! Canonical intermediate representation
//!
//! The IR mirrors the AST with every cross-reference resolved and every type
//! normalized to a [`BaseType`]. Declaration tables are keyed by name in a
//! `BTreeMap`, so serialization order never depends on source order.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::capabilities::Capability;
use crate::schema::{BaseType, RecordSchema};

pub use crate::parser::ast::{BinaryOp, FlowKind, Literal, Purity, Span, TargetRoot, UnaryOp};

/* ===================== Program ===================== */

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Program {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec_version: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub modules: Vec<String>,
    pub aliases: BTreeMap<String, BaseType>,
    pub records: BTreeMap<String, RecordSchema>,
    pub flows: BTreeMap<String, Flow>,
    pub tools: BTreeMap<String, Tool>,
    pub ais: BTreeMap<String, Ai>,
    pub agents: BTreeMap<String, Agent>,
    pub teams: BTreeMap<String, Team>,
    pub policies: BTreeMap<String, Policy>,
    pub jobs: BTreeMap<String, Job>,
    pub prompts: BTreeMap<String, Prompt>,
    pub pages: BTreeMap<String, Page>,
    pub routes: BTreeMap<String, Route>,
}

impl Program {
    pub fn flow(&self, name: &str) -> Option<&Flow> {
        self.flows.get(name)
    }

    pub fn tool(&self, name: &str) -> Option<&Tool> {
        self.tools.get(name)
    }

    pub fn record(&self, name: &str) -> Option<&RecordSchema> {
        self.records.get(name)
    }

    /// Capabilities granted to `flow` by every policy that names it.
    pub fn policy_grants(&self, flow: &str) -> Vec<Capability> {
        let mut grants: Vec<Capability> = self
            .policies
            .values()
            .filter(|p| p.flows.iter().any(|f| f == flow))
            .flat_map(|p| p.grants.iter().copied())
            .collect();
        grants.sort();
        grants.dedup();
        grants
    }

    /// Compact JSON with object keys sorted at every level.
    pub fn canonical_json(&self) -> String {
        let tree = serde_json::to_value(self).unwrap_or(JsonValue::Null);
        let mut out = String::new();
        write_sorted(&tree, &mut out);
        out
    }

    /// Lowercase hex SHA-256 of [`Program::canonical_json`].
    pub fn hash(&self) -> String {
        format!("{:x}", Sha256::digest(self.canonical_json().as_bytes()))
    }
}

fn write_sorted(value: &JsonValue, out: &mut String) {
    match value {
        JsonValue::Object(map) => {
            let mut entries: Vec<(&String, &JsonValue)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (key, value)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&JsonValue::String(key.clone()).to_string());
                out.push(':');
                write_sorted(value, out);
            }
            out.push('}');
        }
        JsonValue::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_sorted(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/* ===================== Declarations ===================== */

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub field_type: BaseType,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flow {
    pub name: String,
    pub kind: FlowKind,
    pub purity: Purity,
    pub inputs: Vec<Param>,
    pub outputs: Vec<Param>,
    pub body: Vec<Stmt>,
    pub span: Span,
}

impl Flow {
    pub fn is_pure(&self) -> bool {
        self.purity == Purity::Pure
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Declared purity, or effectful when the tool needs any capability
    pub purity: Purity,
    pub capabilities: Vec<Capability>,
    pub inputs: Vec<Param>,
    pub outputs: Vec<Param>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ai {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    pub tools: Vec<String>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub name: String,
    pub ai: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Team {
    pub name: String,
    pub agents: Vec<String>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    pub name: String,
    pub flows: Vec<String>,
    pub grants: Vec<Capability>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub name: String,
    pub flow: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prompt {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub text: String,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub name: String,
    pub items: Vec<PageItem>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t")]
pub enum PageItem {
    Title { value: String, span: Span },
    Text { value: String, span: Span },
    Form { record: String, span: Span },
    Table { record: String, span: Span },
    Button { label: String, flow: String, span: Span },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub name: String,
    pub path: String,
    pub method: String,
    pub request: Vec<Param>,
    pub response: Vec<Param>,
    pub flow: String,
    pub span: Span,
}

/* ===================== Statements ===================== */

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldInit {
    pub name: String,
    pub value: Expr,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub root: TargetRoot,
    /// First element is the variable name for `Local` targets.
    pub path: Vec<String>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchArm {
    pub pattern: Expr,
    pub body: Vec<Stmt>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub name: String,
    pub body: Vec<Stmt>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool: String,
    pub args: Vec<FieldInit>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t")]
pub enum Stmt {
    Let {
        name: String,
        value: Expr,
        constant: bool,
        span: Span,
    },
    AsyncLet {
        name: String,
        call: ToolCall,
        span: Span,
    },
    Set {
        target: Target,
        value: Expr,
        span: Span,
    },
    SetWith {
        target: Target,
        fields: Vec<FieldInit>,
        span: Span,
    },
    If {
        condition: Expr,
        then_body: Vec<Stmt>,
        else_body: Vec<Stmt>,
        span: Span,
    },
    Repeat {
        count: Expr,
        body: Vec<Stmt>,
        span: Span,
    },
    ForEach {
        item: String,
        iterable: Expr,
        body: Vec<Stmt>,
        span: Span,
    },
    Match {
        subject: Expr,
        arms: Vec<MatchArm>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        otherwise: Option<Vec<Stmt>>,
        span: Span,
    },
    Parallel {
        tasks: Vec<Task>,
        span: Span,
    },
    Await {
        name: String,
        span: Span,
    },
    Return {
        value: Expr,
        span: Span,
    },
    Yield {
        value: Expr,
        span: Span,
    },
    AdvanceTime {
        amount: Expr,
        span: Span,
    },
    Save {
        record: String,
        value: Expr,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        binding: Option<String>,
        span: Span,
    },
    Find {
        record: String,
        predicate: Expr,
        binding: String,
        span: Span,
    },
    Enqueue {
        job: String,
        span: Span,
    },
}

impl Stmt {
    pub fn span(&self) -> Span {
        match self {
            Stmt::Let { span, .. }
            | Stmt::AsyncLet { span, .. }
            | Stmt::Set { span, .. }
            | Stmt::SetWith { span, .. }
            | Stmt::If { span, .. }
            | Stmt::Repeat { span, .. }
            | Stmt::ForEach { span, .. }
            | Stmt::Match { span, .. }
            | Stmt::Parallel { span, .. }
            | Stmt::Await { span, .. }
            | Stmt::Return { span, .. }
            | Stmt::Yield { span, .. }
            | Stmt::AdvanceTime { span, .. }
            | Stmt::Save { span, .. }
            | Stmt::Find { span, .. }
            | Stmt::Enqueue { span, .. } => *span,
        }
    }

    /// Nested statement bodies, in source order.
    pub fn children(&self) -> Vec<&[Stmt]> {
        match self {
            Stmt::If {
                then_body,
                else_body,
                ..
            } => vec![then_body.as_slice(), else_body.as_slice()],
            Stmt::Repeat { body, .. } | Stmt::ForEach { body, .. } => vec![body.as_slice()],
            Stmt::Match {
                arms, otherwise, ..
            } => {
                let mut bodies: Vec<&[Stmt]> = arms.iter().map(|a| a.body.as_slice()).collect();
                if let Some(otherwise) = otherwise {
                    bodies.push(otherwise.as_slice());
                }
                bodies
            }
            Stmt::Parallel { tasks, .. } => tasks.iter().map(|t| t.body.as_slice()).collect(),
            _ => Vec::new(),
        }
    }

    /// Expressions evaluated directly by this statement.
    pub fn exprs(&self) -> Vec<&Expr> {
        match self {
            Stmt::Let { value, .. }
            | Stmt::Set { value, .. }
            | Stmt::Return { value, .. }
            | Stmt::Yield { value, .. }
            | Stmt::Save { value, .. } => vec![value],
            Stmt::AsyncLet { call, .. } => call.args.iter().map(|a| &a.value).collect(),
            Stmt::SetWith { fields, .. } => fields.iter().map(|f| &f.value).collect(),
            Stmt::If { condition, .. } => vec![condition],
            Stmt::Repeat { count, .. } => vec![count],
            Stmt::ForEach { iterable, .. } => vec![iterable],
            Stmt::Match { subject, arms, .. } => {
                let mut exprs = vec![subject];
                exprs.extend(arms.iter().map(|a| &a.pattern));
                exprs
            }
            Stmt::AdvanceTime { amount, .. } => vec![amount],
            Stmt::Find { predicate, .. } => vec![predicate],
            Stmt::Parallel { .. } | Stmt::Await { .. } | Stmt::Enqueue { .. } => Vec::new(),
        }
    }
}

/* ===================== Expressions ===================== */

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t")]
pub enum Expr {
    Literal {
        value: Literal,
        span: Span,
    },
    List {
        items: Vec<Expr>,
        span: Span,
    },
    Record {
        fields: Vec<FieldInit>,
        span: Span,
    },
    /// A flow-local binding
    Local {
        name: String,
        span: Span,
    },
    /// The current frame's `input` record
    Input {
        span: Span,
    },
    /// The persisted application state record
    State {
        span: Span,
    },
    /// The caller identity record
    Identity {
        span: Span,
    },
    Attr {
        object: Box<Expr>,
        field: String,
        span: Span,
    },
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
        span: Span,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
        span: Span,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
        span: Span,
    },
    OneOf {
        value: Box<Expr>,
        options: Box<Expr>,
        span: Span,
    },
    Between {
        value: Box<Expr>,
        low: Box<Expr>,
        high: Box<Expr>,
        strict: bool,
        span: Span,
    },
    ToolCall(ToolCall),
    CallFlow {
        kind: FlowKind,
        flow: String,
        args: Vec<FieldInit>,
        outputs: Vec<String>,
        span: Span,
    },
}

impl Expr {
    pub fn span(&self) -> Span {
        match self {
            Expr::Literal { span, .. }
            | Expr::List { span, .. }
            | Expr::Record { span, .. }
            | Expr::Local { span, .. }
            | Expr::Input { span }
            | Expr::State { span }
            | Expr::Identity { span }
            | Expr::Attr { span, .. }
            | Expr::Index { span, .. }
            | Expr::Unary { span, .. }
            | Expr::Binary { span, .. }
            | Expr::OneOf { span, .. }
            | Expr::Between { span, .. }
            | Expr::CallFlow { span, .. } => *span,
            Expr::ToolCall(call) => call.span,
        }
    }

    /// Direct sub-expressions.
    pub fn children(&self) -> Vec<&Expr> {
        match self {
            Expr::Literal { .. }
            | Expr::Local { .. }
            | Expr::Input { .. }
            | Expr::State { .. }
            | Expr::Identity { .. } => Vec::new(),
            Expr::List { items, .. } => items.iter().collect(),
            Expr::Record { fields, .. } => fields.iter().map(|f| &f.value).collect(),
            Expr::Attr { object, .. } => vec![object.as_ref()],
            Expr::Index { object, index, .. } => vec![object.as_ref(), index.as_ref()],
            Expr::Unary { operand, .. } => vec![operand.as_ref()],
            Expr::Binary { left, right, .. } => vec![left.as_ref(), right.as_ref()],
            Expr::OneOf { value, options, .. } => vec![value.as_ref(), options.as_ref()],
            Expr::Between {
                value, low, high, ..
            } => vec![value.as_ref(), low.as_ref(), high.as_ref()],
            Expr::ToolCall(call) => call.args.iter().map(|a| &a.value).collect(),
            Expr::CallFlow { args, .. } => args.iter().map(|a| &a.value).collect(),
        }
    }
}

/// Visit `stmts` and every nested statement, depth first.
pub fn walk_stmts<'a>(stmts: &'a [Stmt], visit: &mut dyn FnMut(&'a Stmt)) {
    for stmt in stmts {
        visit(stmt);
        for body in stmt.children() {
            walk_stmts(body, visit);
        }
    }
}

/// Visit `expr` and every nested expression, depth first.
pub fn walk_expr<'a>(expr: &'a Expr, visit: &mut dyn FnMut(&'a Expr)) {
    visit(expr);
    for child in expr.children() {
        walk_expr(child, visit);
    }
}
