use super::condition::Condition;
use super::definition::SequenceFlow;
use super::variables::Variables;
use crate::error::{FlowError, FlowResult};

/// Pick the outgoing flow of an element
///
/// The first flow whose condition holds wins. Without a match the
/// unconditional (default) flow is taken; without one of those either, the
/// run cannot continue.
pub fn select_route<'a>(
    outgoing: &[&'a SequenceFlow],
    variables: &Variables,
) -> FlowResult<&'a SequenceFlow> {
    for flow in outgoing {
        if let Some(expression) = &flow.condition {
            if Condition::parse(expression)?.evaluate(variables) {
                return Ok(flow);
            }
        }
    }

    outgoing
        .iter()
        .find(|flow| flow.condition.is_none())
        .copied()
        .ok_or_else(|| {
            let source = outgoing.first().map(|f| f.source.as_str()).unwrap_or("?");
            FlowError::Engine(format!("No outgoing flow of '{source}' matches the current variables"))
        })
}
