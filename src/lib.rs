//! # namel3ss core
//!
//! Source text goes through [`lexer`] → [`parser`] → [`lowering`] into a
//! canonical [`lowering::ir::Program`], which the [`executor`] runs against a
//! [`store`]. [`loader`] ties the front end together for multi-file
//! programs and [`application`] wires configuration, store and tools.

pub mod application;
pub mod capabilities;
pub mod cli;
pub mod config;
pub mod errors;
pub mod executor;
pub mod lexer;
pub mod loader;
pub mod lowering;
pub mod parser;
pub mod schema;
pub mod store;
pub mod value;

pub use application::{initialize, Application, InitBuilder, InitOptions};
pub use errors::{Diagnostic, Namel3ssError};
pub use executor::{Executor, FlowInvocation, FlowOutcome, RuntimeFault, ToolRegistry};
pub use loader::{load_program, SourceFile};
pub use value::{Record, Value};
