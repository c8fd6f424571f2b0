//! Abstract Syntax Tree node types

use serde::{Deserialize, Serialize};

use crate::schema::FieldConstraint;
use crate::value::Decimal;

/// Source position of a node (1-based).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Span {
    pub line: u32,
    pub column: u32,
    /// Index of the source file within a load; not part of the IR identity
    #[serde(skip)]
    pub source: u32,
}

impl Span {
    pub fn new(line: u32, column: u32) -> Self {
        Self {
            line,
            column,
            source: 0,
        }
    }

    pub fn in_source(mut self, source: u32) -> Self {
        self.source = source;
        self
    }
}

/// A quoted name that refers to some other declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Named {
    pub name: String,
    pub span: Span,
}

/* ===================== Program ===================== */

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec_version: Option<String>,
    pub declarations: Vec<Decl>,
}

impl Program {
    pub fn flows(&self) -> impl Iterator<Item = &FlowDecl> {
        self.declarations.iter().filter_map(|d| match d {
            Decl::Flow(f) => Some(f),
            _ => None,
        })
    }

    pub fn uses(&self) -> impl Iterator<Item = &UseDecl> {
        self.declarations.iter().filter_map(|d| match d {
            Decl::Use(u) => Some(u),
            _ => None,
        })
    }
}

/* ===================== Declarations ===================== */

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t")]
pub enum Decl {
    Use(UseDecl),
    Alias(AliasDecl),
    Record(RecordDecl),
    Flow(FlowDecl),
    Tool(ToolDecl),
    Ai(AiDecl),
    Agent(AgentDecl),
    Team(TeamDecl),
    Policy(PolicyDecl),
    Job(JobDecl),
    Prompt(PromptDecl),
    Page(PageDecl),
    Route(RouteDecl),
}

impl Decl {
    /// Declaration category and name, for duplicate detection.
    pub fn key(&self) -> (&'static str, &str) {
        match self {
            Decl::Use(d) => ("module", &d.module),
            Decl::Alias(d) => ("type alias", &d.name),
            Decl::Record(d) => ("record", &d.name),
            Decl::Flow(d) => ("flow", &d.name),
            Decl::Tool(d) => ("tool", &d.name),
            Decl::Ai(d) => ("ai", &d.name),
            Decl::Agent(d) => ("agent", &d.name),
            Decl::Team(d) => ("team", &d.name),
            Decl::Policy(d) => ("policy", &d.name),
            Decl::Job(d) => ("job", &d.name),
            Decl::Prompt(d) => ("prompt", &d.name),
            Decl::Page(d) => ("page", &d.name),
            Decl::Route(d) => ("route", &d.name),
        }
    }

    pub fn span(&self) -> Span {
        match self {
            Decl::Use(d) => d.span,
            Decl::Alias(d) => d.span,
            Decl::Record(d) => d.span,
            Decl::Flow(d) => d.span,
            Decl::Tool(d) => d.span,
            Decl::Ai(d) => d.span,
            Decl::Agent(d) => d.span,
            Decl::Team(d) => d.span,
            Decl::Policy(d) => d.span,
            Decl::Job(d) => d.span,
            Decl::Prompt(d) => d.span,
            Decl::Page(d) => d.span,
            Decl::Route(d) => d.span,
        }
    }
}

/// `use "module" [as alias]` or `include "module"`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UseDecl {
    pub module: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    pub include: bool,
    pub span: Span,
}

/// Type name as written in source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeRef {
    pub name: String,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AliasDecl {
    pub name: String,
    pub target: TypeRef,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordDecl {
    pub name: String,
    pub fields: Vec<FieldDecl>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_by: Option<Named>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDecl {
    pub name: String,
    pub type_ref: TypeRef,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub constraints: Vec<FieldConstraint>,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Purity {
    Pure,
    Effectful,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowKind {
    Flow,
    Pipeline,
}

impl FlowKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlowKind::Flow => "flow",
            FlowKind::Pipeline => "pipeline",
        }
    }
}

/// `name is type` line inside `input:` / `output:` / `request:` blocks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamDecl {
    pub name: String,
    pub type_ref: TypeRef,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowDecl {
    pub name: String,
    pub kind: FlowKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purity: Option<Purity>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<ParamDecl>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<ParamDecl>,
    pub body: Vec<Stmt>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDecl {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purity: Option<Purity>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub capabilities: Vec<Named>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<ParamDecl>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<ParamDecl>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiDecl {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<Named>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Named>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDecl {
    pub name: String,
    pub ai: Named,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamDecl {
    pub name: String,
    pub agents: Vec<Named>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyDecl {
    pub name: String,
    pub flows: Vec<Named>,
    pub grants: Vec<Named>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDecl {
    pub name: String,
    pub flow: Named,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptDecl {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub text: String,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageDecl {
    pub name: String,
    pub items: Vec<PageItem>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t")]
pub enum PageItem {
    Title { value: String, span: Span },
    Text { value: String, span: Span },
    Form { record: Named, span: Span },
    Table { record: Named, span: Span },
    Button { label: String, flow: Named, span: Span },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteDecl {
    pub name: String,
    pub path: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub request: Vec<ParamDecl>,
    pub response: Vec<ParamDecl>,
    pub flow: Named,
    pub span: Span,
}

/* ===================== Statements ===================== */

/// `name is expr` inside tool calls, call inputs, record literals and
/// `set … with:` blocks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldAssign {
    pub name: String,
    pub value: Expr,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetRoot {
    Local,
    State,
}

/// Assignment target: `name`, `name.a.b`, `state.a.b`
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
pub struct ParallelTask {
    pub name: String,
    pub body: Vec<Stmt>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool: String,
    pub args: Vec<FieldAssign>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t")]
pub enum Stmt {
    Let {
        name: String,
        value: Expr,
        #[serde(default)]
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
        fields: Vec<FieldAssign>,
        span: Span,
    },
    If {
        condition: Expr,
        then_body: Vec<Stmt>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
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
        tasks: Vec<ParallelTask>,
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
        record: Named,
        value: Expr,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        binding: Option<String>,
        span: Span,
    },
    Find {
        record: Named,
        predicate: Expr,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        binding: Option<String>,
        span: Span,
    },
    Enqueue {
        job: Named,
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
}

/* ===================== Expressions ===================== */

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "v")]
pub enum Literal {
    Null,
    Bool(bool),
    Number(Decimal),
    Text(String),
}

/// The per-run records reachable by keyword: `input`, `state`, `identity`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextRoot {
    Input,
    State,
    Identity,
}

impl ContextRoot {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContextRoot::Input => "input",
            ContextRoot::State => "state",
            ContextRoot::Identity => "identity",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    NotEq,
    Gt,
    Lt,
    Gte,
    Lte,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
}

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
        fields: Vec<FieldAssign>,
        span: Span,
    },
    /// A binding; backticked keywords land here too
    Name {
        name: String,
        span: Span,
    },
    Root {
        root: ContextRoot,
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
        target: String,
        args: Vec<FieldAssign>,
        outputs: Vec<Named>,
        span: Span,
    },
}

impl Expr {
    pub fn span(&self) -> Span {
        match self {
            Expr::Literal { span, .. }
            | Expr::List { span, .. }
            | Expr::Record { span, .. }
            | Expr::Name { span, .. }
            | Expr::Root { span, .. }
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
}
