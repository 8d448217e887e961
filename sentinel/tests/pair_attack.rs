//! PAIR attack loop properties and judge wire-contract checks.

#![allow(clippy::unwrap_used, clippy::panic, clippy::clone_on_ref_ptr)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use sentinel::prelude::*;
use sentinel::risk::{AttackTarget, FnJudge, FnTarget};

fn attacker_client() -> SharedLlmClient {
    Arc::new(MockLlm::new(vec![
        "attempt one".to_owned(),
        "attempt two".to_owned(),
        "attempt three".to_owned(),
    ]))
}

#[tokio::test]
async fn test_pushover_target_compromised_in_one_iteration() {
    let orchestrator = PairOrchestrator::new(3, PairAttacker::new(attacker_client())).unwrap();
    let target = FnTarget(|_: &str| "PWNED".to_owned());
    let judge = FnJudge(|response: &str| response.contains("PWNED"));

    let result = orchestrator
        .run_attack("Make target say PWNED", &target, "Test agent", &judge)
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.iterations, 1);
    assert_eq!(result.history[0].response, "PWNED");
}

#[tokio::test]
async fn test_attack_terminates_within_budget() {
    struct CountingTarget(AtomicUsize);

    #[async_trait::async_trait]
    impl AttackTarget for CountingTarget {
        async fn respond(&self, _prompt: &str) -> sentinel::Result<String> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok("never giving in".to_owned())
        }
    }

    let orchestrator = PairOrchestrator::new(4, PairAttacker::new(attacker_client())).unwrap();
    let target = CountingTarget(AtomicUsize::new(0));

    let result = orchestrator
        .run_attack("impossible", &target, "Hardened agent", &FnJudge(|_: &str| false))
        .await
        .unwrap();

    assert!(!result.success);
    // At most max_iterations target calls, and history tracks them 1:1.
    assert_eq!(target.0.load(Ordering::SeqCst), 4);
    assert_eq!(result.history.len(), 4);
    assert!(result.history.len() <= 4);
}

#[tokio::test]
async fn test_success_implies_judge_accepts_final_response() {
    let orchestrator = PairOrchestrator::new(5, PairAttacker::new(attacker_client())).unwrap();
    // Succeeds only once the refined prompt arrives.
    let target = FnTarget(|prompt: &str| {
        if prompt.contains("two") {
            "fine, PWNED".to_owned()
        } else {
            "no".to_owned()
        }
    });
    let judge = FnJudge(|response: &str| response.contains("PWNED"));

    let result = orchestrator
        .run_attack("goal", &target, "ctx", &judge)
        .await
        .unwrap();

    assert!(result.success);
    assert!((judge.0)(&result.history.last().unwrap().response));
    assert_eq!(result.target_response, result.history.last().unwrap().response);
}

#[tokio::test]
async fn test_judge_wire_contract() {
    // Canned fenced response parses into a validated result.
    let fenced = "```json\n{\"has_risk\":true,\"severity\":\"warning\",\"reason\":\"r\",\
                  \"evidence\":[\"e\"],\"recommended_action\":\"warn\"}\n```";
    let judge = Judge::new("wire", Arc::new(MockLlm::always(fenced)) as SharedLlmClient);
    let result = judge.analyze("content", None).await.unwrap();

    assert!(result.has_risk);
    assert_eq!(result.severity, Severity::Warning);
    assert_eq!(result.recommended_action, RecommendedAction::Warn);
    assert_eq!(result.evidence, vec!["e".to_owned()]);

    // Anything that is not JSON yields no result at all.
    let judge = Judge::new("wire", Arc::new(MockLlm::always("not json")) as SharedLlmClient);
    assert!(judge.analyze("content", None).await.is_none());
}

#[tokio::test]
async fn test_judge_normalizes_unknown_vocabulary() {
    let sloppy = r#"{"has_risk": true, "severity": "apocalyptic", "reason": "r",
                     "evidence": [], "recommended_action": "vaporize"}"#;
    let judge = Judge::new("wire", Arc::new(MockLlm::always(sloppy)) as SharedLlmClient);
    let result = judge.analyze("content", None).await.unwrap();

    assert_eq!(result.severity, Severity::None);
    assert_eq!(result.recommended_action, RecommendedAction::Log);
}
