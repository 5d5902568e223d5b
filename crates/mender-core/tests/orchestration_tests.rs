use mender_core::simulator::{Check, Scenario, ScriptedPlanner, ScriptedTool};
use mender_core::{
    ChangeSet, DecisionKind, DecisionReason, FailureCategory, GateKind, InMemoryApplier, Issue,
    Objective, Orchestrator, OrchestratorConfig, ProposeError, RunBudget, Severity, Step,
    StyleGate, TestGate,
};
use mender_test_utils::{
    clean_change_set, orchestrator_with, setup_orchestrator, tabbed_change_set, FailingApplier,
    FixedGate, UnavailablePlanner,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;

#[tokio::test]
async fn test_first_pass_approves_without_healing() {
    let orchestrator = setup_orchestrator(clean_change_set());
    let decision = orchestrator
        .run(Objective::new("add a greeting helper"), RunBudget::default())
        .await;

    assert_eq!(decision.kind, DecisionKind::Approve);
    assert_eq!(decision.reason, DecisionReason::Validated { healing_attempts: 0 });
    assert_eq!(
        decision
            .trajectory
            .entries()
            .iter()
            .map(|e| e.step)
            .collect::<Vec<_>>(),
        vec![
            Step::Planning,
            Step::Executing,
            Step::Validating,
            Step::FinalDecision
        ]
    );
    assert!(decision.result.as_ref().is_some_and(|r| r.passed));
    assert_eq!(decision.unresolved, None);
}

#[tokio::test]
async fn test_applied_change_set_reaches_applier() {
    let applier = Arc::new(InMemoryApplier::new());
    let orchestrator = Orchestrator::new(
        OrchestratorConfig::default(),
        Arc::new(ScriptedPlanner::always(clean_change_set())),
        applier.clone(),
    )
    .unwrap();

    let decision = orchestrator.run(Objective::new("greet"), RunBudget::default()).await;

    assert!(decision.is_approved());
    assert_eq!(applier.last(), Some(clean_change_set()));
    assert_eq!(decision.change_set, Some(clean_change_set()));
}

#[tokio::test]
async fn test_security_failure_escalates_without_healing() {
    let budget = RunBudget::default().with_recovery_attempts(5);
    let decision = Scenario::Security
        .simulate(OrchestratorConfig::default(), budget)
        .await
        .unwrap();

    assert_eq!(decision.kind, DecisionKind::Escalate);
    assert_eq!(decision.trajectory.count(Step::SelfHealing), 0);
    assert_eq!(decision.healing_attempts, 0);
    assert_eq!(
        decision.reason,
        DecisionReason::NotRecoverable {
            category: FailureCategory::Security,
            strategy_id: "escalate-only".to_string(),
        }
    );
    let pattern = decision.unresolved.unwrap();
    assert_eq!(pattern.category, FailureCategory::Security);
    assert!((pattern.confidence - 1.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn test_security_rule_outside_security_gate_still_escalates() {
    let orchestrator = setup_orchestrator(clean_change_set()).with_gate(Arc::new(FixedGate::failing(
        "deps",
        GateKind::Operational,
        vec![Issue::new(
            "Cargo.lock",
            Severity::Critical,
            "vulnerable dependency",
            "CVE-2024-0001",
        )],
    )));
    let decision = orchestrator.run(Objective::new("bump deps"), RunBudget::default()).await;

    assert!(decision.is_escalated());
    assert_eq!(decision.unresolved.map(|p| p.category), Some(FailureCategory::Security));
    assert_eq!(decision.trajectory.count(Step::SelfHealing), 0);
}

#[tokio::test]
async fn test_blank_objective_is_rejected_before_planning() {
    let planner = Arc::new(ScriptedPlanner::always(clean_change_set()));
    let orchestrator = orchestrator_with(OrchestratorConfig::default(), planner.clone());
    let decision = orchestrator.run(Objective::new("\t \n"), RunBudget::default()).await;

    assert_eq!(decision.kind, DecisionKind::Reject);
    assert_eq!(decision.reason.code(), "invalid-objective");
    assert_eq!(decision.trajectory.len(), 1);
    assert!(planner.calls().is_empty());
}

#[tokio::test]
async fn test_quality_gates_select_subset() {
    let orchestrator = setup_orchestrator(tabbed_change_set());
    // lint would fail on tabs; only the test gate runs
    let objective = Objective::new("indent").with_quality_gates(["tests"]);
    let decision = orchestrator.run(objective, RunBudget::default()).await;

    assert!(decision.is_approved());
    let result = decision.result.unwrap();
    assert_eq!(result.reports.len(), 1);
    assert_eq!(result.reports[0].gate_name, "tests");
}

#[tokio::test]
async fn test_unknown_quality_gate_is_rejected() {
    let orchestrator = setup_orchestrator(clean_change_set());
    let objective = Objective::new("x").with_quality_gates(["fuzz"]);
    let decision = orchestrator.run(objective, RunBudget::default()).await;

    assert!(decision.is_rejected());
    assert_eq!(
        decision.reason,
        DecisionReason::InvalidObjective("unknown quality gate 'fuzz'".to_string())
    );
}

#[tokio::test]
async fn test_planning_exhaustion_escalates() {
    let planner = Arc::new(ScriptedPlanner::new([
        Err(ProposeError::Unusable("not json".to_string())),
        Ok(ChangeSet::new()),
        Err(ProposeError::Unusable("no files".to_string())),
    ]));
    let orchestrator = orchestrator_with(OrchestratorConfig::default(), planner.clone());
    let decision = orchestrator.run(Objective::new("x"), RunBudget::default()).await;

    assert!(decision.is_escalated());
    assert_eq!(decision.reason.code(), "planning-failed");
    assert_eq!(planner.calls().len(), 3);
    assert_eq!(decision.trajectory.count(Step::Executing), 0);
}

#[tokio::test]
async fn test_planning_retries_until_usable() {
    let planner = Arc::new(ScriptedPlanner::new([
        Err(ProposeError::Unusable("not json".to_string())),
        Ok(clean_change_set()),
    ]));
    let orchestrator = orchestrator_with(OrchestratorConfig::default(), planner.clone());
    let decision = orchestrator.run(Objective::new("x"), RunBudget::default()).await;

    assert!(decision.is_approved());
    assert_eq!(planner.calls().len(), 2);
    assert!(decision.trajectory.entries()[1]
        .description
        .contains("after 2 attempt(s)"));
}

#[tokio::test]
async fn test_unavailable_reasoning_is_fatal() {
    let planner = Arc::new(UnavailablePlanner::default());
    let orchestrator = orchestrator_with(OrchestratorConfig::default(), planner.clone());
    let decision = orchestrator.run(Objective::new("x"), RunBudget::default()).await;

    assert!(decision.is_escalated());
    assert_eq!(decision.reason.code(), "reasoning-unavailable");
    assert_eq!(planner.calls(), 1);
}

#[tokio::test]
async fn test_execution_failure_escalates() {
    let orchestrator = Orchestrator::new(
        OrchestratorConfig::default(),
        Arc::new(ScriptedPlanner::always(clean_change_set())),
        Arc::new(FailingApplier),
    )
    .unwrap()
    .with_gate(Arc::new(StyleGate::new(
        "lint",
        Arc::new(ScriptedTool::new(Check::Pass)),
    )));
    let decision = orchestrator.run(Objective::new("x"), RunBudget::default()).await;

    assert!(decision.is_escalated());
    assert_eq!(decision.reason.code(), "execution-failed");
    assert_eq!(decision.trajectory.count(Step::Validating), 0);
}

#[tokio::test]
async fn test_every_decision_ends_with_final_entry() {
    let objectives = [
        Objective::new("ok"),
        Objective::new(""),
        Objective::new("x").with_quality_gates(["nope"]),
    ];
    for objective in objectives {
        let orchestrator = setup_orchestrator(clean_change_set());
        let decision = orchestrator.run(objective, RunBudget::default()).await;
        let last = decision.trajectory.last().unwrap();
        assert_eq!(last.step, Step::FinalDecision);
        assert_eq!(last.success, Some(decision.is_approved()));
        assert!(last.description.starts_with(&decision.kind.to_string()));
        assert!(decision.trajectory.verify_integrity().is_ok());
    }
}

#[tokio::test]
async fn test_trajectory_is_reset_between_runs() {
    let orchestrator = setup_orchestrator(clean_change_set());
    let first = orchestrator.run(Objective::new("one"), RunBudget::default()).await;
    let second = orchestrator.run(Objective::new("two"), RunBudget::default()).await;

    assert_eq!(first.trajectory.len(), second.trajectory.len());
    assert_ne!(first.run_id, second.run_id);
    assert_eq!(orchestrator.trajectory(), second.trajectory);
}

#[tokio::test]
async fn test_decision_serializes_trajectory() {
    let decision = Scenario::SyntaxHeal
        .simulate(OrchestratorConfig::default(), RunBudget::default())
        .await
        .unwrap();
    let value: serde_json::Value = serde_json::from_str(&decision.to_json().unwrap()).unwrap();

    assert_eq!(value["decision"], "approve");
    assert_eq!(value["reason"]["code"], "validated");
    let steps: Vec<&str> = value["reasoning_trajectory"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["step"].as_str().unwrap())
        .collect();
    assert_eq!(
        steps,
        vec![
            "Planning",
            "Executing",
            "Validating",
            "Analyzing",
            "Self-Healing",
            "Revalidating",
            "Final Decision"
        ]
    );
}

#[tokio::test]
async fn test_test_gate_with_passing_tool_counts_in_result() {
    let orchestrator = Orchestrator::new(
        OrchestratorConfig::default(),
        Arc::new(ScriptedPlanner::always(clean_change_set())),
        Arc::new(InMemoryApplier::new()),
    )
    .unwrap()
    .with_gate(Arc::new(TestGate::new(
        "unit",
        Arc::new(ScriptedTool::new(Check::Pass)),
    )));
    let decision = orchestrator.run(Objective::new("x"), RunBudget::default()).await;

    let result = decision.result.unwrap();
    assert!(result.passed);
    assert_eq!(result.report("unit").map(|r| r.gate_kind), Some(GateKind::Test));
}
