//! Whole-program checks over the lowered IR
//!
//! Each rule lives in its own file and implements [`LoweringRule`]. The
//! [`RuleSet`] runs them in a fixed order and reports the first error, so
//! lowering failures are deterministic.
//!
//! To add a rule, create a file here, implement the trait and list the rule
//! in [`RuleSet::standard`].

mod call_arity;
mod constants;
mod parallel;
mod purity;
mod routes;

pub use call_arity::CallArityRule;
pub use constants::ConstantRule;
pub use parallel::ParallelTaskRule;
pub use purity::PurityRule;
pub use routes::RouteRule;

use super::ir::Program;
use super::LoweringError;

/// A check over the whole lowered program.
pub trait LoweringRule: Send + Sync {
    /// Unique identifier for this rule (e.g., "purity")
    fn id(&self) -> &'static str;

    /// Human-readable description of what this rule checks
    fn description(&self) -> &'static str;

    /// Errors in program order; empty when the program passes.
    fn check(&self, program: &Program) -> Vec<LoweringError>;
}

pub struct RuleSet {
    rules: Vec<Box<dyn LoweringRule>>,
}

impl RuleSet {
    pub fn standard() -> Self {
        Self {
            rules: vec![
                Box::new(CallArityRule),
                Box::new(PurityRule),
                Box::new(ParallelTaskRule),
                Box::new(ConstantRule),
                Box::new(RouteRule),
            ],
        }
    }

    pub fn with_rules(rules: Vec<Box<dyn LoweringRule>>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[Box<dyn LoweringRule>] {
        &self.rules
    }

    /// Run every rule, failing with the first error found.
    pub fn check(&self, program: &Program) -> Result<(), LoweringError> {
        for rule in &self.rules {
            if let Some(error) = rule.check(program).into_iter().next() {
                return Err(error);
            }
        }
        Ok(())
    }

    /// Run every rule and collect all errors.
    pub fn check_all(&self, program: &Program) -> Vec<LoweringError> {
        self.rules.iter().flat_map(|r| r.check(program)).collect()
    }
}

impl Default for RuleSet {
    fn default() -> Self {
        Self::standard()
    }
}
