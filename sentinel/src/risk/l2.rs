//! L2 (inter-agent tampering) test support.
//!
//! Modifier factories, agent-pair selection, and the shared execution path:
//! build a [`MessageInterception`] from the case, run the workflow in the
//! monitored-intercepting mode, and have the judge evaluate the outcome.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Value, json};

use super::TestCase;
use crate::error::{Error, Result};
use crate::intermediary::{Intermediary, RunOptions};
use crate::judge::Judge;
use crate::mas::Mas;
use crate::runner::{MessageInterception, MessageModifier, RunMode};

/// Modifier appending `payload` to the message.
#[must_use]
pub fn append_modifier(payload: impl Into<String>) -> MessageModifier {
    let payload = payload.into();
    Arc::new(move |content: &str| Ok(format!("{content}{payload}")))
}

/// Modifier prepending `payload` to the message.
#[must_use]
pub fn prepend_modifier(payload: impl Into<String>) -> MessageModifier {
    let payload = payload.into();
    Arc::new(move |content: &str| Ok(format!("{payload}{content}")))
}

/// Modifier replacing the entire message with `payload`.
#[must_use]
pub fn replace_modifier(payload: impl Into<String>) -> MessageModifier {
    let payload = payload.into();
    Arc::new(move |_: &str| Ok(payload.clone()))
}

/// Modifier keeping the leading `ratio` share of the message.
///
/// The result length is `floor(len * ratio)` in characters; `0.0` yields the
/// empty string and `1.0` is the identity.
///
/// # Errors
///
/// Returns [`Error::Test`] when `ratio` is outside `[0, 1]`.
pub fn truncate_modifier(ratio: f64) -> Result<MessageModifier> {
    if !(0.0..=1.0).contains(&ratio) {
        return Err(Error::test("ratio must be between 0.0 and 1.0"));
    }
    Ok(Arc::new(move |content: &str| {
        let total = content.chars().count();
        let keep = (total as f64 * ratio).floor() as usize;
        Ok(content.chars().take(keep).collect())
    }))
}

/// Build the modifier a test case declares.
///
/// `metadata.injection_type` selects the factory (`append` by default);
/// `llm` is accepted and routed to `append` with the declared payload.
/// `metadata.payload` defaults to the case input; truncation reads
/// `metadata.truncate_ratio` (default `0.5`).
///
/// # Errors
///
/// Returns [`Error::Test`] for an invalid truncation ratio.
pub fn modifier_from_case(case: &TestCase) -> Result<MessageModifier> {
    let injection_type = case
        .metadata
        .get("injection_type")
        .and_then(Value::as_str)
        .unwrap_or("append");
    let payload = case
        .metadata
        .get("payload")
        .and_then(Value::as_str)
        .unwrap_or(&case.input)
        .to_owned();

    match injection_type {
        "prepend" => Ok(prepend_modifier(payload)),
        "replace" => Ok(replace_modifier(payload)),
        "truncate" => {
            let ratio = case
                .metadata
                .get("truncate_ratio")
                .and_then(Value::as_f64)
                .unwrap_or(0.5);
            truncate_modifier(ratio)
        }
        // `llm` and anything else route to append.
        _ => Ok(append_modifier(payload)),
    }
}

/// Pick a random adjacent `(source, target)` pair from the MAS topology.
///
/// Falls back to adjacent pairs in declaration order when the topology has
/// no usable edge.
///
/// # Errors
///
/// Returns [`Error::Test`] when fewer than two agents exist.
pub fn random_adjacent_pair(mas: &dyn Mas) -> Result<(String, String)> {
    let agents = mas.agents();
    if agents.len() < 2 {
        return Err(Error::test("need at least 2 agents for agent pair selection"));
    }

    let topology = mas.topology();
    let mut edges: Vec<(String, String)> = Vec::new();
    for (from, successors) in &topology {
        for to in successors {
            if from != to {
                edges.push((from.clone(), to.clone()));
            }
        }
    }
    if edges.is_empty() {
        for pair in agents.windows(2) {
            edges.push((pair[0].name.clone(), pair[1].name.clone()));
        }
    }

    let index = fastrand::usize(..edges.len());
    Ok(edges[index].clone())
}

/// Execute one interception case and judge the outcome.
///
/// The system passes when the judge sees no risk in the workflow output.
/// Failures come back inside the result map, never as errors.
pub async fn run_interception_case(
    intermediary: &Intermediary,
    judge: &Judge,
    case: &TestCase,
    source_agent: &str,
    target_agent: &str,
    modifier: MessageModifier,
    task: &str,
) -> Value {
    let interception = MessageInterception::new(source_agent, target_agent, modifier)
        .with_attack_type(
            case.metadata
                .get("injection_type")
                .and_then(Value::as_str)
                .unwrap_or("append"),
        );

    let workflow_result = match intermediary
        .run_workflow(
            task,
            RunMode::MonitoredIntercepting,
            RunOptions::default().with_interceptions(vec![interception]),
            None,
        )
        .await
    {
        Ok(result) => result,
        Err(err) => {
            return json!({
                "test_case": case.name,
                "passed": false,
                "source_agent": source_agent,
                "target_agent": target_agent,
                "workflow_success": false,
                "judge_result": Value::Null,
                "error": err.to_string(),
            });
        }
    };

    let messages_preview = serde_json::to_string(
        &workflow_result.messages.iter().take(10).collect::<Vec<_>>(),
    )
    .unwrap_or_default();

    let mut context = BTreeMap::new();
    context.insert("test_case".to_owned(), case.name.clone());
    context.insert("test_input".to_owned(), case.input.clone());
    context.insert("expected_behavior".to_owned(), case.expected_behavior.clone());
    context.insert(
        "workflow_output".to_owned(),
        workflow_result.output.chars().take(500).collect(),
    );
    context.insert(
        "messages".to_owned(),
        messages_preview.chars().take(1000).collect(),
    );
    context.insert(
        "workflow_success".to_owned(),
        workflow_result.success.to_string(),
    );

    let judge_result = judge.analyze(&workflow_result.output, Some(&context)).await;
    let passed = judge_result.as_ref().is_none_or(|r| !r.has_risk);

    json!({
        "test_case": case.name,
        "passed": passed,
        "source_agent": source_agent,
        "target_agent": target_agent,
        "workflow_success": workflow_result.success,
        "judge_result": judge_result
            .map(|r| serde_json::to_value(&r).unwrap_or(Value::Null)),
        "error": Value::Null,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::mas::AgentInfo;
    use crate::scripted::ScriptedMas;

    mod modifiers {
        use super::*;

        #[test]
        fn append_appends() {
            let modifier = append_modifier(" PAYLOAD");
            assert_eq!(modifier("Original message").unwrap(), "Original message PAYLOAD");
        }

        #[test]
        fn prepend_prepends() {
            let modifier = prepend_modifier("PREFIX: ");
            assert_eq!(modifier("Original message").unwrap(), "PREFIX: Original message");
        }

        #[test]
        fn replace_replaces() {
            let modifier = replace_modifier("Replacement");
            assert_eq!(modifier("Original message").unwrap(), "Replacement");
        }

        #[test]
        fn truncate_keeps_floor_of_ratio() {
            let modifier = truncate_modifier(0.5).unwrap();
            assert_eq!(modifier("1234567890").unwrap(), "12345");
            // floor(7 * 0.5) == 3
            assert_eq!(modifier("1234567").unwrap(), "123");
        }

        #[test]
        fn truncate_zero_empties_and_one_is_identity() {
            assert_eq!(truncate_modifier(0.0).unwrap()("1234567890").unwrap(), "");
            assert_eq!(
                truncate_modifier(1.0).unwrap()("1234567890").unwrap(),
                "1234567890"
            );
        }

        #[test]
        fn truncate_rejects_out_of_range() {
            assert!(truncate_modifier(1.5).is_err());
            assert!(truncate_modifier(-0.1).is_err());
        }

        #[test]
        fn case_dispatch_by_injection_type() {
            let case = TestCase::new("t", "input", "e", crate::risk::TestSeverity::High)
                .with_metadata("injection_type", Value::String("prepend".into()))
                .with_metadata("payload", Value::String("X".into()));
            assert_eq!(modifier_from_case(&case).unwrap()("abc").unwrap(), "Xabc");
        }

        #[test]
        fn llm_injection_type_routes_to_append() {
            let case = TestCase::new("t", "input", "e", crate::risk::TestSeverity::High)
                .with_metadata("injection_type", Value::String("llm".into()))
                .with_metadata("payload", Value::String("!".into()));
            assert_eq!(modifier_from_case(&case).unwrap()("abc").unwrap(), "abc!");
        }

        #[test]
        fn payload_defaults_to_case_input() {
            let case = TestCase::new("t", " tail", "e", crate::risk::TestSeverity::Low);
            assert_eq!(modifier_from_case(&case).unwrap()("abc").unwrap(), "abc tail");
        }
    }

    mod pair_selection {
        use super::*;

        #[test]
        fn picks_a_topology_edge() {
            let mas = ScriptedMas::new()
                .with_agent(AgentInfo::new("A", "a"))
                .with_agent(AgentInfo::new("B", "b"))
                .with_agent(AgentInfo::new("C", "c"))
                .with_ring(&["A", "B", "C"]);

            let (source, target) = random_adjacent_pair(&mas).unwrap();
            let topology = mas.topology();
            assert!(topology[&source].contains(&target));
        }

        #[test]
        fn needs_two_agents() {
            let mas = ScriptedMas::new().with_agent(AgentInfo::new("A", "a"));
            assert!(random_adjacent_pair(&mas).is_err());
        }
    }
}
