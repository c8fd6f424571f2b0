//! Rule: Routes
//!
//! Routes bind an HTTP path to a flow. The path must be absolute, the method
//! one of the standard verbs, and the request/response fields must line up
//! with the flow's declared inputs/outputs when the flow declares them.

use crate::lowering::ir::{Program, Route};
use crate::lowering::LoweringError;

use super::LoweringRule;

const METHODS: &[&str] = &["GET", "POST", "PUT", "PATCH", "DELETE"];

pub struct RouteRule;

impl LoweringRule for RouteRule {
    fn id(&self) -> &'static str {
        "route"
    }

    fn description(&self) -> &'static str {
        "routes must use an absolute path and match their flow's signature"
    }

    fn check(&self, program: &Program) -> Vec<LoweringError> {
        let mut errors = Vec::new();
        for route in program.routes.values() {
            check_route(program, route, &mut errors);
        }
        errors
    }
}

fn check_route(program: &Program, route: &Route, errors: &mut Vec<LoweringError>) {
    if !route.path.starts_with('/') {
        errors.push(LoweringError::invalid_declaration(
            format!("Route '{}' path must start with '/'", route.name),
            route.span,
        ));
    }
    if !METHODS.contains(&route.method.as_str()) {
        errors.push(LoweringError::invalid_declaration(
            format!("Route '{}' has unsupported method '{}'", route.name, route.method),
            route.span,
        ));
    }

    let Some(flow) = program.flow(&route.flow) else {
        return;
    };
    if !flow.inputs.is_empty() {
        for field in &route.request {
            if !flow.inputs.iter().any(|p| p.name == field.name) {
                errors.push(LoweringError::arity(
                    &flow.name,
                    format!(
                        "Route '{}' request field '{}' is not an input of flow '{}'",
                        route.name, field.name, flow.name
                    ),
                    field.span,
                ));
            }
        }
    }
    if !flow.outputs.is_empty() {
        for field in &route.response {
            let declared = flow.outputs.iter().find(|p| p.name == field.name);
            match declared {
                None => errors.push(LoweringError::arity(
                    &flow.name,
                    format!(
                        "Route '{}' response field '{}' is not an output of flow '{}'",
                        route.name, field.name, flow.name
                    ),
                    field.span,
                )),
                Some(output) if output.field_type != field.field_type => {
                    errors.push(LoweringError::invalid_type(
                        field.field_type.as_str(),
                        format!(
                            "Route '{}' response field '{}' is {} but flow '{}' returns {}",
                            route.name, field.name, field.field_type, flow.name, output.field_type
                        ),
                        field.span,
                    ))
                }
                Some(_) => {}
            }
        }
    }
}
