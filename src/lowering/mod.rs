//! Lowering: AST to canonical IR
//!
//! One whole-program pass. Declarations are first collected into tables
//! (duplicates rejected, type aliases registered), then every declaration is
//! rewritten with resolved references and normalized types. The resulting
//! [`ir::Program`] is checked by the [`rules::RuleSet`] before it is
//! returned, so a program that lowers is ready to execute.
//!
//! Lowering is deterministic: the same AST always produces the same
//! [`ir::Program::canonical_json`] bytes.

pub mod error;
pub mod ir;
pub mod rules;
pub mod types;

#[cfg(test)]
mod tests;

pub use error::LoweringError;
pub use rules::{LoweringRule, RuleSet};
pub use types::TypeAliasTable;

use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use crate::capabilities::{Capability, CapabilityRegistry};
use crate::parser::ast::{self, ContextRoot, Decl, FlowKind, Named, Purity};
use crate::schema::{FieldSchema, RecordSchema};

/// Lower a parsed program with the standard rule set.
pub fn lower(program: &ast::Program) -> Result<ir::Program, LoweringError> {
    lower_with_rules(program, &RuleSet::standard())
}

pub fn lower_with_rules(
    program: &ast::Program,
    rules: &RuleSet,
) -> Result<ir::Program, LoweringError> {
    let lowered = Lowering::collect(program)?.build(program)?;
    rules.check(&lowered)?;
    debug!(
        flows = lowered.flows.len(),
        records = lowered.records.len(),
        "program lowered"
    );
    Ok(lowered)
}

/// Binding used by `find` when no `as` name is given: `Order` binds
/// `order_results`.
pub fn results_binding(record: &str) -> String {
    let slug: String = record
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("{}_results", slug)
}

/* ===================== Declaration tables ===================== */

struct Lowering {
    types: TypeAliasTable,
    flows: BTreeMap<String, FlowKind>,
    records: BTreeSet<String>,
    tools: BTreeSet<String>,
    ais: BTreeSet<String>,
    agents: BTreeSet<String>,
    jobs: BTreeSet<String>,
    prompts: BTreeSet<String>,
}

impl Lowering {
    fn collect(program: &ast::Program) -> Result<Self, LoweringError> {
        let mut seen: BTreeSet<(&'static str, &str)> = BTreeSet::new();
        let mut lowering = Lowering {
            types: TypeAliasTable::new(),
            flows: BTreeMap::new(),
            records: BTreeSet::new(),
            tools: BTreeSet::new(),
            ais: BTreeSet::new(),
            agents: BTreeSet::new(),
            jobs: BTreeSet::new(),
            prompts: BTreeSet::new(),
        };

        for decl in &program.declarations {
            let (what, name) = decl.key();
            if matches!(decl, Decl::Use(_)) {
                continue;
            }
            if !seen.insert((what, name)) {
                return Err(LoweringError::duplicate(what, name, decl.span()));
            }
            match decl {
                Decl::Alias(alias) => lowering.types.declare(alias)?,
                Decl::Flow(flow) => {
                    lowering.flows.insert(flow.name.clone(), flow.kind);
                }
                Decl::Record(record) => {
                    lowering.records.insert(record.name.clone());
                }
                Decl::Tool(tool) => {
                    lowering.tools.insert(tool.name.clone());
                }
                Decl::Ai(ai) => {
                    lowering.ais.insert(ai.name.clone());
                }
                Decl::Agent(agent) => {
                    lowering.agents.insert(agent.name.clone());
                }
                Decl::Job(job) => {
                    lowering.jobs.insert(job.name.clone());
                }
                Decl::Prompt(prompt) => {
                    lowering.prompts.insert(prompt.name.clone());
                }
                _ => {}
            }
        }
        Ok(lowering)
    }

    fn build(&self, program: &ast::Program) -> Result<ir::Program, LoweringError> {
        let mut out = ir::Program {
            spec_version: program.spec_version.clone(),
            aliases: self.types.resolved()?,
            ..ir::Program::default()
        };

        for decl in &program.declarations {
            match decl {
                Decl::Use(use_decl) => out.modules.push(use_decl.module.clone()),
                Decl::Alias(_) => {}
                Decl::Record(record) => {
                    out.records.insert(record.name.clone(), self.record(record)?);
                }
                Decl::Flow(flow) => {
                    out.flows.insert(flow.name.clone(), self.flow(flow)?);
                }
                Decl::Tool(tool) => {
                    out.tools.insert(tool.name.clone(), self.tool(tool)?);
                }
                Decl::Ai(ai) => {
                    out.ais.insert(ai.name.clone(), self.ai(ai)?);
                }
                Decl::Agent(agent) => {
                    self.require(&self.ais, "ai", &agent.ai)?;
                    out.agents.insert(
                        agent.name.clone(),
                        ir::Agent {
                            name: agent.name.clone(),
                            ai: agent.ai.name.clone(),
                            system_prompt: agent.system_prompt.clone(),
                            span: agent.span,
                        },
                    );
                }
                Decl::Team(team) => {
                    for agent in &team.agents {
                        self.require(&self.agents, "agent", agent)?;
                    }
                    out.teams.insert(
                        team.name.clone(),
                        ir::Team {
                            name: team.name.clone(),
                            agents: team.agents.iter().map(|a| a.name.clone()).collect(),
                            span: team.span,
                        },
                    );
                }
                Decl::Policy(policy) => {
                    for flow in &policy.flows {
                        self.require_flow(flow)?;
                    }
                    out.policies.insert(
                        policy.name.clone(),
                        ir::Policy {
                            name: policy.name.clone(),
                            flows: policy.flows.iter().map(|f| f.name.clone()).collect(),
                            grants: capabilities(&policy.grants)?,
                            span: policy.span,
                        },
                    );
                }
                Decl::Job(job) => {
                    self.require_flow(&job.flow)?;
                    out.jobs.insert(
                        job.name.clone(),
                        ir::Job {
                            name: job.name.clone(),
                            flow: job.flow.name.clone(),
                            schedule: job.schedule.clone(),
                            span: job.span,
                        },
                    );
                }
                Decl::Prompt(prompt) => {
                    out.prompts.insert(
                        prompt.name.clone(),
                        ir::Prompt {
                            name: prompt.name.clone(),
                            version: prompt.version.clone(),
                            text: prompt.text.clone(),
                            span: prompt.span,
                        },
                    );
                }
                Decl::Page(page) => {
                    out.pages.insert(page.name.clone(), self.page(page)?);
                }
                Decl::Route(route) => {
                    self.require_flow(&route.flow)?;
                    out.routes.insert(
                        route.name.clone(),
                        ir::Route {
                            name: route.name.clone(),
                            path: route.path.clone(),
                            method: route.method.clone(),
                            request: self.params(&route.request)?,
                            response: self.params(&route.response)?,
                            flow: route.flow.name.clone(),
                            span: route.span,
                        },
                    );
                }
            }
        }
        Ok(out)
    }

    fn require(
        &self,
        table: &BTreeSet<String>,
        what: &str,
        named: &Named,
    ) -> Result<(), LoweringError> {
        if table.contains(&named.name) {
            Ok(())
        } else {
            Err(LoweringError::unknown(what, &named.name, named.span))
        }
    }

    fn require_flow(&self, named: &Named) -> Result<(), LoweringError> {
        if self.flows.contains_key(&named.name) {
            Ok(())
        } else {
            Err(LoweringError::unknown("flow", &named.name, named.span))
        }
    }

    /* ===================== Declarations ===================== */

    fn record(&self, record: &ast::RecordDecl) -> Result<RecordSchema, LoweringError> {
        let mut fields = Vec::with_capacity(record.fields.len());
        for field in &record.fields {
            fields.push(FieldSchema {
                name: field.name.clone(),
                field_type: self.types.resolve(&field.type_ref)?,
                constraints: field.constraints.clone(),
            });
        }
        let mut schema = RecordSchema::new(record.name.clone(), fields);
        if let Some(order_by) = &record.order_by {
            if schema.field(&order_by.name).is_none() {
                return Err(LoweringError::unknown("field", &order_by.name, order_by.span));
            }
            schema.order_by = Some(order_by.name.clone());
        }
        Ok(schema)
    }

    fn params(&self, params: &[ast::ParamDecl]) -> Result<Vec<ir::Param>, LoweringError> {
        params
            .iter()
            .map(|p| {
                Ok(ir::Param {
                    name: p.name.clone(),
                    field_type: self.types.resolve(&p.type_ref)?,
                    span: p.span,
                })
            })
            .collect()
    }

    fn flow(&self, flow: &ast::FlowDecl) -> Result<ir::Flow, LoweringError> {
        Ok(ir::Flow {
            name: flow.name.clone(),
            kind: flow.kind,
            purity: flow.purity.unwrap_or(Purity::Effectful),
            inputs: self.params(&flow.inputs)?,
            outputs: self.params(&flow.outputs)?,
            body: self.stmts(&flow.body)?,
            span: flow.span,
        })
    }

    fn tool(&self, tool: &ast::ToolDecl) -> Result<ir::Tool, LoweringError> {
        let capabilities = capabilities(&tool.capabilities)?;
        let purity = tool.purity.unwrap_or(if capabilities.is_empty() {
            Purity::Pure
        } else {
            Purity::Effectful
        });
        Ok(ir::Tool {
            name: tool.name.clone(),
            kind: tool.kind.clone(),
            purity,
            capabilities,
            inputs: self.params(&tool.inputs)?,
            outputs: self.params(&tool.outputs)?,
            span: tool.span,
        })
    }

    fn ai(&self, ai: &ast::AiDecl) -> Result<ir::Ai, LoweringError> {
        if let Some(prompt) = &ai.prompt {
            self.require(&self.prompts, "prompt", prompt)?;
        }
        for tool in &ai.tools {
            self.require(&self.tools, "tool", tool)?;
        }
        Ok(ir::Ai {
            name: ai.name.clone(),
            model: ai.model.clone(),
            provider: ai.provider.clone(),
            system_prompt: ai.system_prompt.clone(),
            prompt: ai.prompt.as_ref().map(|p| p.name.clone()),
            tools: ai.tools.iter().map(|t| t.name.clone()).collect(),
            span: ai.span,
        })
    }

    fn page(&self, page: &ast::PageDecl) -> Result<ir::Page, LoweringError> {
        let mut items = Vec::with_capacity(page.items.len());
        for item in &page.items {
            items.push(match item {
                ast::PageItem::Title { value, span } => ir::PageItem::Title {
                    value: value.clone(),
                    span: *span,
                },
                ast::PageItem::Text { value, span } => ir::PageItem::Text {
                    value: value.clone(),
                    span: *span,
                },
                ast::PageItem::Form { record, span } => {
                    self.require(&self.records, "record", record)?;
                    ir::PageItem::Form {
                        record: record.name.clone(),
                        span: *span,
                    }
                }
                ast::PageItem::Table { record, span } => {
                    self.require(&self.records, "record", record)?;
                    ir::PageItem::Table {
                        record: record.name.clone(),
                        span: *span,
                    }
                }
                ast::PageItem::Button { label, flow, span } => {
                    self.require_flow(flow)?;
                    ir::PageItem::Button {
                        label: label.clone(),
                        flow: flow.name.clone(),
                        span: *span,
                    }
                }
            });
        }
        Ok(ir::Page {
            name: page.name.clone(),
            items,
            span: page.span,
        })
    }

    /* ===================== Statements ===================== */

    fn stmts(&self, stmts: &[ast::Stmt]) -> Result<Vec<ir::Stmt>, LoweringError> {
        stmts.iter().map(|s| self.stmt(s)).collect()
    }

    fn stmt(&self, stmt: &ast::Stmt) -> Result<ir::Stmt, LoweringError> {
        Ok(match stmt {
            ast::Stmt::Let {
                name,
                value,
                constant,
                span,
            } => ir::Stmt::Let {
                name: name.clone(),
                value: self.expr(value)?,
                constant: *constant,
                span: *span,
            },
            ast::Stmt::AsyncLet { name, call, span } => ir::Stmt::AsyncLet {
                name: name.clone(),
                call: self.tool_call(call)?,
                span: *span,
            },
            ast::Stmt::Set {
                target,
                value,
                span,
            } => ir::Stmt::Set {
                target: lower_target(target),
                value: self.expr(value)?,
                span: *span,
            },
            ast::Stmt::SetWith {
                target,
                fields,
                span,
            } => ir::Stmt::SetWith {
                target: lower_target(target),
                fields: self.fields(fields)?,
                span: *span,
            },
            ast::Stmt::If {
                condition,
                then_body,
                else_body,
                span,
            } => ir::Stmt::If {
                condition: self.expr(condition)?,
                then_body: self.stmts(then_body)?,
                else_body: self.stmts(else_body)?,
                span: *span,
            },
            ast::Stmt::Repeat { count, body, span } => ir::Stmt::Repeat {
                count: self.expr(count)?,
                body: self.stmts(body)?,
                span: *span,
            },
            ast::Stmt::ForEach {
                item,
                iterable,
                body,
                span,
            } => ir::Stmt::ForEach {
                item: item.clone(),
                iterable: self.expr(iterable)?,
                body: self.stmts(body)?,
                span: *span,
            },
            ast::Stmt::Match {
                subject,
                arms,
                otherwise,
                span,
            } => {
                let mut lowered = Vec::with_capacity(arms.len());
                for arm in arms {
                    lowered.push(ir::MatchArm {
                        pattern: self.expr(&arm.pattern)?,
                        body: self.stmts(&arm.body)?,
                        span: arm.span,
                    });
                }
                ir::Stmt::Match {
                    subject: self.expr(subject)?,
                    arms: lowered,
                    otherwise: match otherwise {
                        Some(body) => Some(self.stmts(body)?),
                        None => None,
                    },
                    span: *span,
                }
            }
            ast::Stmt::Parallel { tasks, span } => {
                let mut lowered = Vec::with_capacity(tasks.len());
                for task in tasks {
                    lowered.push(ir::Task {
                        name: task.name.clone(),
                        body: self.stmts(&task.body)?,
                        span: task.span,
                    });
                }
                ir::Stmt::Parallel {
                    tasks: lowered,
                    span: *span,
                }
            }
            ast::Stmt::Await { name, span } => ir::Stmt::Await {
                name: name.clone(),
                span: *span,
            },
            ast::Stmt::Return { value, span } => ir::Stmt::Return {
                value: self.expr(value)?,
                span: *span,
            },
            ast::Stmt::Yield { value, span } => ir::Stmt::Yield {
                value: self.expr(value)?,
                span: *span,
            },
            ast::Stmt::AdvanceTime { amount, span } => ir::Stmt::AdvanceTime {
                amount: self.expr(amount)?,
                span: *span,
            },
            ast::Stmt::Save {
                record,
                value,
                binding,
                span,
            } => {
                self.require(&self.records, "record", record)?;
                ir::Stmt::Save {
                    record: record.name.clone(),
                    value: self.expr(value)?,
                    binding: binding.clone(),
                    span: *span,
                }
            }
            ast::Stmt::Find {
                record,
                predicate,
                binding,
                span,
            } => {
                self.require(&self.records, "record", record)?;
                ir::Stmt::Find {
                    record: record.name.clone(),
                    predicate: self.expr(predicate)?,
                    binding: binding
                        .clone()
                        .unwrap_or_else(|| results_binding(&record.name)),
                    span: *span,
                }
            }
            ast::Stmt::Enqueue { job, span } => {
                self.require(&self.jobs, "job", job)?;
                ir::Stmt::Enqueue {
                    job: job.name.clone(),
                    span: *span,
                }
            }
        })
    }

    fn fields(&self, fields: &[ast::FieldAssign]) -> Result<Vec<ir::FieldInit>, LoweringError> {
        fields
            .iter()
            .map(|f| {
                Ok(ir::FieldInit {
                    name: f.name.clone(),
                    value: self.expr(&f.value)?,
                    span: f.span,
                })
            })
            .collect()
    }

    fn tool_call(&self, call: &ast::ToolCall) -> Result<ir::ToolCall, LoweringError> {
        if !self.tools.contains(&call.tool) {
            return Err(LoweringError::unknown("tool", &call.tool, call.span));
        }
        Ok(ir::ToolCall {
            tool: call.tool.clone(),
            args: self.fields(&call.args)?,
            span: call.span,
        })
    }

    /* ===================== Expressions ===================== */

    fn boxed(&self, expr: &ast::Expr) -> Result<Box<ir::Expr>, LoweringError> {
        Ok(Box::new(self.expr(expr)?))
    }

    fn expr(&self, expr: &ast::Expr) -> Result<ir::Expr, LoweringError> {
        Ok(match expr {
            ast::Expr::Literal { value, span } => ir::Expr::Literal {
                value: value.clone(),
                span: *span,
            },
            ast::Expr::List { items, span } => ir::Expr::List {
                items: items
                    .iter()
                    .map(|i| self.expr(i))
                    .collect::<Result<_, _>>()?,
                span: *span,
            },
            ast::Expr::Record { fields, span } => ir::Expr::Record {
                fields: self.fields(fields)?,
                span: *span,
            },
            ast::Expr::Name { name, span } => ir::Expr::Local {
                name: name.clone(),
                span: *span,
            },
            ast::Expr::Root { root, span } => match root {
                ContextRoot::Input => ir::Expr::Input { span: *span },
                ContextRoot::State => ir::Expr::State { span: *span },
                ContextRoot::Identity => ir::Expr::Identity { span: *span },
            },
            ast::Expr::Attr {
                object,
                field,
                span,
            } => ir::Expr::Attr {
                object: self.boxed(object)?,
                field: field.clone(),
                span: *span,
            },
            ast::Expr::Index {
                object,
                index,
                span,
            } => ir::Expr::Index {
                object: self.boxed(object)?,
                index: self.boxed(index)?,
                span: *span,
            },
            ast::Expr::Unary { op, operand, span } => ir::Expr::Unary {
                op: *op,
                operand: self.boxed(operand)?,
                span: *span,
            },
            ast::Expr::Binary {
                op,
                left,
                right,
                span,
            } => ir::Expr::Binary {
                op: *op,
                left: self.boxed(left)?,
                right: self.boxed(right)?,
                span: *span,
            },
            ast::Expr::OneOf {
                value,
                options,
                span,
            } => ir::Expr::OneOf {
                value: self.boxed(value)?,
                options: self.boxed(options)?,
                span: *span,
            },
            ast::Expr::Between {
                value,
                low,
                high,
                strict,
                span,
            } => ir::Expr::Between {
                value: self.boxed(value)?,
                low: self.boxed(low)?,
                high: self.boxed(high)?,
                strict: *strict,
                span: *span,
            },
            ast::Expr::ToolCall(call) => ir::Expr::ToolCall(self.tool_call(call)?),
            ast::Expr::CallFlow {
                kind,
                target,
                args,
                outputs,
                span,
            } => {
                match self.flows.get(target) {
                    Some(declared) if declared == kind => {}
                    _ => return Err(LoweringError::unknown(kind.as_str(), target, *span)),
                }
                ir::Expr::CallFlow {
                    kind: *kind,
                    flow: target.clone(),
                    args: self.fields(args)?,
                    outputs: outputs.iter().map(|o| o.name.clone()).collect(),
                    span: *span,
                }
            }
        })
    }
}

fn lower_target(target: &ast::Target) -> ir::Target {
    ir::Target {
        root: target.root,
        path: target.path.clone(),
        span: target.span,
    }
}

fn capabilities(names: &[Named]) -> Result<Vec<Capability>, LoweringError> {
    let registry = CapabilityRegistry::standard();
    let mut out = Vec::with_capacity(names.len());
    for named in names {
        let capability = registry
            .lookup(&named.name)
            .ok_or_else(|| LoweringError::unknown("capability", &named.name, named.span))?;
        if !out.contains(&capability) {
            out.push(capability);
        }
    }
    Ok(out)
}
