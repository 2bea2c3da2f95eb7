mod common;

use serde_json::json;
use tokio::sync::watch;

use common::{Call, EngineOptions, RoutedReasoner, build_engine, finding, output, todo};
use revloop::aggregate::{MergeDecision, OverallSeverity};
use revloop::change::ChangeRequest;
use revloop::dispatch::SubworkerStatus;
use revloop::error::{Error, Result};
use revloop::phase::Phase;

fn change() -> ChangeRequest {
    ChangeRequest::new(
        "Add token cache",
        "Caches auth tokens per tenant.",
        "+fn cache_token(t: &str) {}\n",
    )
}

/// A well-behaved sub-worker: one git command, then one finding named after the todo.
fn subworker_reply(call: &Call) -> Result<String> {
    let todo_id = call.todo_id.clone().unwrap_or_default();
    match call.phase.as_str() {
        "intake" => output("intake", json!({"summary": format!("slice {todo_id}")}), "plan"),
        "plan" => output(
            "plan",
            json!({"commands": [{"command": "git", "args": ["log", "-1"]}]}),
            "act",
        ),
        "synthesize" => output(
            "synthesize",
            json!({"findings": [finding(
                &format!("{todo_id}-f"),
                &format!("issue in {todo_id}"),
                "warning"
            )]}),
            "done",
        ),
        other => Err(Error::Other(format!("unexpected sub-worker phase {other}"))),
    }
}

fn delegating_review(call: &Call) -> Result<String> {
    if call.subworker {
        return subworker_reply(call);
    }
    match call.phase.as_str() {
        "intake" => output(
            "intake",
            json!({"summary": "token cache", "risk_areas": ["eviction", "tenancy"]}),
            "plan",
        ),
        "plan" => output("plan", json!({"todos": [todo("t1"), todo("t2")]}), "act"),
        "synthesize" => output(
            "synthesize",
            json!({"findings": [finding("own", "cache never evicts", "critical")]}),
            "evaluate",
        ),
        "evaluate" => output("evaluate", json!({"assessment": "covered"}), "done"),
        other => Err(Error::Other(format!("unexpected review phase {other}"))),
    }
}

#[tokio::test]
async fn test_first_step_counts_one_iteration() {
    let reasoner = RoutedReasoner::new(delegating_review);
    let (engine, _) = build_engine(
        reasoner,
        EngineOptions {
            max_iterations: 1,
            ..Default::default()
        },
    );

    let report = engine.run(change()).await;

    // One step out of intake, then the budget stop.
    assert_eq!(report.final_phase, Phase::StoppedBudget);
    assert_eq!(
        report.stop_reason.as_deref(),
        Some("budget exceeded: 1 of 1 iterations used")
    );
    assert_eq!(report.iteration_count, 2);
    let frames = report.run_log.frames();
    assert_eq!(frames[0].state, Phase::Intake);
    assert_eq!(frames[0].decision, "next: plan");
    assert_eq!(frames.iter().filter(|f| f.state == Phase::Intake).count(), 1);
}

#[tokio::test]
async fn test_full_run_with_delegation() {
    let reasoner = RoutedReasoner::new(delegating_review);
    let (engine, sessions) = build_engine(reasoner, EngineOptions::default());

    let report = engine.run(change()).await;

    assert_eq!(report.final_phase, Phase::Done, "{:?}", report.stop_reason);
    assert!(report.stop_reason.is_none());
    assert_eq!(report.iteration_count, 5);

    assert_eq!(report.subworker_results.len(), 2);
    assert_eq!(report.subworker_results[0].todo_id, "t1");
    assert_eq!(report.subworker_results[1].todo_id, "t2");
    assert!(
        report
            .subworker_results
            .iter()
            .all(|r| r.status == SubworkerStatus::Done)
    );

    let titles: Vec<&str> = report.findings.iter().map(|f| f.title.as_str()).collect();
    assert_eq!(titles, vec!["cache never evicts", "issue in t1", "issue in t2"]);
    assert_eq!(report.severity, OverallSeverity::Critical);
    assert_eq!(report.gate.decision, MergeDecision::NeedsChanges);
    assert_eq!(report.exit_code(), 2);

    let states: Vec<Phase> = report.run_log.frames().iter().map(|f| f.state).collect();
    assert_eq!(
        states,
        vec![
            Phase::Intake,
            Phase::Plan,
            Phase::Act,
            Phase::Synthesize,
            Phase::Evaluate
        ]
    );

    // Sub-worker act runs tools, so each todo costs three reasoner calls.
    let calls = engine.executor().gateway().reasoner().calls();
    assert_eq!(calls.iter().filter(|c| c.subworker).count(), 6);
    assert_eq!(calls.iter().filter(|c| !c.subworker).count(), 4);
    assert_eq!(
        engine
            .executor()
            .tools()
            .runs
            .load(std::sync::atomic::Ordering::SeqCst),
        2
    );
    assert_eq!(sessions.live_count(), 0);
}

#[tokio::test]
async fn test_failed_subworker_is_isolated() {
    let reasoner = RoutedReasoner::new(|call| {
        if call.subworker && call.todo_id.as_deref() == Some("t2") {
            return Ok("I cannot help with that.".to_string());
        }
        delegating_review(call)
    });
    let (engine, _) = build_engine(reasoner, EngineOptions::default());

    let report = engine.run(change()).await;

    assert_eq!(report.final_phase, Phase::Done);
    let t2 = &report.subworker_results[1];
    assert_eq!(t2.status, SubworkerStatus::Blocked);
    assert!(t2.error.as_deref().unwrap().contains("stopped_human"));
    assert_eq!(report.subworker_results[0].status, SubworkerStatus::Done);
    assert!(report.findings.iter().all(|f| f.title != "issue in t2"));
    assert!(report.findings.iter().any(|f| f.title == "issue in t1"));
}

#[tokio::test]
async fn test_malformed_output_stops_for_a_human() {
    let reasoner = RoutedReasoner::new(|_| Ok("{\"phase\": \"intake\"".to_string()));
    let (engine, _) = build_engine(reasoner, EngineOptions::default());

    let report = engine.run(change()).await;

    assert_eq!(report.final_phase, Phase::StoppedHuman);
    assert!(report.stop_reason.as_deref().unwrap().starts_with("intake: malformed output"));
    assert_eq!(report.iteration_count, 1);
    // Structural failures are never retried.
    assert_eq!(engine.executor().gateway().reasoner().calls().len(), 1);
    assert_eq!(report.exit_code(), 1);
}

#[tokio::test]
async fn test_illegal_transition_stops_for_a_human() {
    let reasoner = RoutedReasoner::new(|call| match call.phase.as_str() {
        "intake" => output("intake", json!({"summary": "s", "risk_areas": []}), "evaluate"),
        _ => unreachable!(),
    });
    let (engine, _) = build_engine(reasoner, EngineOptions::default());

    let report = engine.run(change()).await;

    assert_eq!(report.final_phase, Phase::StoppedHuman);
    assert!(report.stop_reason.unwrap().contains("invalid transition intake -> evaluate"));
}

#[tokio::test]
async fn test_transient_failures_exhaust_retries() {
    let reasoner = RoutedReasoner::new(|_| Err(Error::ReasonerUnavailable("503".to_string())));
    let (engine, _) = build_engine(
        reasoner,
        EngineOptions {
            max_retries: 2,
            ..Default::default()
        },
    );

    let report = engine.run(change()).await;

    assert_eq!(report.final_phase, Phase::StoppedRetryExhausted);
    assert_eq!(
        report.stop_reason.as_deref(),
        Some("intake failed after 3 attempts: reasoner unavailable: 503")
    );
    assert_eq!(engine.executor().gateway().reasoner().calls().len(), 3);
    assert_eq!(report.run_log.frames()[0].attempts, 3);
}

#[tokio::test]
async fn test_endless_replanning_hits_the_budget() {
    let reasoner = RoutedReasoner::new(|call| match call.phase.as_str() {
        "intake" => output("intake", json!({"summary": "s", "risk_areas": []}), "plan"),
        "plan" => output("plan", json!({"todos": []}), "synthesize"),
        "synthesize" => output("synthesize", json!({"findings": []}), "evaluate"),
        "evaluate" => output("evaluate", json!({"assessment": "look again"}), "plan"),
        other => Err(Error::Other(format!("unexpected phase {other}"))),
    });
    let (engine, _) = build_engine(
        reasoner,
        EngineOptions {
            max_iterations: 6,
            ..Default::default()
        },
    );

    let report = engine.run(change()).await;

    assert_eq!(report.final_phase, Phase::StoppedBudget);
    assert_eq!(report.iteration_count, 7);
    assert!(report.stop_reason.as_ref().unwrap().contains("budget exceeded"));
    assert_eq!(report.gate.decision, MergeDecision::Approve);
    assert_eq!(report.exit_code(), 1);
}

#[tokio::test]
async fn test_operator_interrupt_keeps_partial_results() {
    let (tx, rx) = watch::channel(false);
    let reasoner = RoutedReasoner::new(move |call| match call.phase.as_str() {
        "intake" => output("intake", json!({"summary": "s", "risk_areas": []}), "plan"),
        "plan" => {
            let _ = tx.send(true);
            output("plan", json!({"todos": []}), "synthesize")
        }
        other => Err(Error::Other(format!("unexpected phase {other}"))),
    });
    let (engine, _) = build_engine(reasoner, EngineOptions::default());
    let engine = engine.with_shutdown(rx);

    let report = engine.run(change()).await;

    assert_eq!(report.final_phase, Phase::StoppedHuman);
    assert_eq!(report.stop_reason.as_deref(), Some("interrupted by operator"));
    assert_eq!(report.iteration_count, 3);
    assert_eq!(report.run_log.frames()[1].state, Phase::Plan);
}

#[tokio::test]
async fn test_blocking_finding_blocks_merge() {
    let reasoner = RoutedReasoner::new(|call| match call.phase.as_str() {
        "intake" => output("intake", json!({"summary": "s", "risk_areas": []}), "plan"),
        "plan" => output("plan", json!({"todos": []}), "synthesize"),
        "synthesize" => output(
            "synthesize",
            json!({"findings": [
                finding("a", "secret logged", "blocking"),
                finding("b", "naming", "warning"),
            ]}),
            "evaluate",
        ),
        "evaluate" => output("evaluate", json!({"assessment": "done"}), "done"),
        other => Err(Error::Other(format!("unexpected phase {other}"))),
    });
    let (engine, _) = build_engine(reasoner, EngineOptions::default());

    let report = engine.run(change()).await;

    assert_eq!(report.final_phase, Phase::Done);
    assert_eq!(report.severity, OverallSeverity::Blocking);
    assert_eq!(report.gate.decision, MergeDecision::Block);
    assert_eq!(report.gate.must_fix, vec!["secret logged"]);
    assert_eq!(report.exit_code(), 3);
}
