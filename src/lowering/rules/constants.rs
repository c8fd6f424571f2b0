//! Rule: Constants
//!
//! A binding introduced with `let … constant` cannot be rebound or
//! mutated later in the same flow.
//!
//! # Valid
//!
//! ```text
//! let rate is 3 constant
//! let total is rate * 2
//! ```
//!
//! # Invalid
//!
//! ```text
//! let rate is 3 constant
//! set rate is 4
//! let rate is 5
//! ```

use std::collections::BTreeSet;

use crate::lowering::ir::{walk_stmts, Program, Stmt, TargetRoot};
use crate::lowering::LoweringError;

use super::LoweringRule;

pub struct ConstantRule;

impl LoweringRule for ConstantRule {
    fn id(&self) -> &'static str {
        "constant"
    }

    fn description(&self) -> &'static str {
        "constants cannot be reassigned"
    }

    fn check(&self, program: &Program) -> Vec<LoweringError> {
        let mut errors = Vec::new();
        for flow in program.flows.values() {
            let mut constants: BTreeSet<&str> = BTreeSet::new();
            walk_stmts(&flow.body, &mut |stmt| {
                let rebound = match stmt {
                    Stmt::Let {
                        name,
                        constant: true,
                        ..
                    } => {
                        if constants.insert(name.as_str()) {
                            return;
                        }
                        Some(name.as_str())
                    }
                    Stmt::Let { name, .. }
                    | Stmt::AsyncLet { name, .. }
                    | Stmt::ForEach { item: name, .. } => Some(name.as_str()),
                    Stmt::Set { target, .. } | Stmt::SetWith { target, .. }
                        if target.root == TargetRoot::Local =>
                    {
                        target.path.first().map(String::as_str)
                    }
                    Stmt::Save {
                        binding: Some(name),
                        ..
                    }
                    | Stmt::Find { binding: name, .. } => Some(name.as_str()),
                    _ => None,
                };
                if let Some(name) = rebound.filter(|n| constants.contains(n)) {
                    errors.push(LoweringError::invalid_statement(
                        format!("Cannot change constant '{}'", name),
                        stmt.span(),
                    ));
                }
            });
        }
        errors
    }
}
