//! Gate engine integration: checkpoint synthesis, decision records, and
//! integrate-boundary enforcement.

mod common;

use common::{core, drive_to_implemented, operator, planner, reviewer, seed_project, seed_task};
use tascade::models::{
    EvidenceRef, EvidenceRequirement, GateClass, GateCondition, GateOutcome, GateScope, Principal,
    RoleScope, TaskState,
};
use tascade::services::{NewGateDecision, NewGateRule};

fn review_rule(threshold: u32) -> NewGateRule {
    NewGateRule {
        name: "implemented backlog review".to_string(),
        gate_class: GateClass::ReviewGate,
        scope: GateScope::default(),
        condition: GateCondition::ImplementedBacklog { threshold },
        required_evidence: vec![EvidenceRequirement {
            kind: "check_run".to_string(),
            description: None,
        }],
        evidence_window_seconds: None,
    }
}

fn evidence(kind: &str, reference: &str) -> EvidenceRef {
    EvidenceRef {
        kind: kind.to_string(),
        reference: reference.to_string(),
        extras: Default::default(),
    }
}

#[tokio::test]
async fn rule_fires_and_synthesizes_one_checkpoint() {
    let (core, _clock) = core().await;
    let project = seed_project(&core, "alpha").await;
    let operator_p = operator(project.id);
    core.gates.create_rule(&operator_p, project.id, review_rule(1)).await.unwrap();

    seed_task(&core, project.id, "feature").await;
    drive_to_implemented(&core, project.id, "agent-a").await;

    let opened = core.gates.evaluate_project(project.id).await.unwrap();
    assert_eq!(opened.len(), 1);
    let checkpoint = &opened[0];
    assert_eq!(checkpoint.task_class.as_str(), "review_gate");
    assert_eq!(checkpoint.state, TaskState::Ready);

    // Re-evaluation does not open a second gate for the same rule.
    let again = core.gates.evaluate_project(project.id).await.unwrap();
    assert!(again.is_empty());

    let views = core.gates.list_checkpoints(&operator_p, project.id).await.unwrap();
    assert_eq!(views.len(), 1);
    assert_eq!(views[0].gate_task_id, checkpoint.id);
    assert_eq!(views[0].total_candidates, 1);
}

#[tokio::test]
async fn checkpoints_never_enter_the_general_pull_queue() {
    let (core, _clock) = core().await;
    let project = seed_project(&core, "alpha").await;
    core.gates
        .create_rule(&operator(project.id), project.id, review_rule(1))
        .await
        .unwrap();
    seed_task(&core, project.id, "feature").await;
    drive_to_implemented(&core, project.id, "agent-a").await;
    core.gates.evaluate_project(project.id).await.unwrap();

    // The checkpoint is Ready, yet invisible to agents pulling work.
    assert!(common::claim_one(&core, project.id, "agent-b").await.is_none());
}

#[tokio::test]
async fn integrate_is_refused_without_evidence_then_allowed_after_review() {
    let (core, _clock) = core().await;
    let project = seed_project(&core, "alpha").await;
    core.gates
        .create_rule(&operator(project.id), project.id, review_rule(1))
        .await
        .unwrap();
    seed_task(&core, project.id, "feature").await;
    let (task, _grant) = drive_to_implemented(&core, project.id, "agent-a").await;
    let opened = core.gates.evaluate_project(project.id).await.unwrap();
    let checkpoint = &opened[0];

    // Scenario: the implementing agent attempts integration with no
    // approving decision on record.
    let worker = common::agent(project.id, "agent-a");
    let err = core.lifecycle
        .request_integrate(&worker, task.id, None, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "GATE_EVIDENCE_REQUIRED");

    // Reviewer B approves with the required evidence.
    core.gates
        .record_decision(
            &reviewer(project.id),
            checkpoint.id,
            NewGateDecision {
                outcome: GateOutcome::Approved,
                reason: "checks green, scope reviewed".to_string(),
                evidence_refs: vec![evidence("check_run", "ci/run/77")],
            },
            None,
        )
        .await
        .unwrap();

    let task = core.lifecycle
        .request_integrate(&worker, task.id, None, None)
        .await
        .unwrap();
    assert_eq!(task.state, TaskState::Integrated);
}

#[tokio::test]
async fn self_review_cannot_unlock_integration() {
    let (core, _clock) = core().await;
    let project = seed_project(&core, "alpha").await;
    core.gates
        .create_rule(&operator(project.id), project.id, review_rule(1))
        .await
        .unwrap();
    seed_task(&core, project.id, "feature").await;
    let (task, _grant) = drive_to_implemented(&core, project.id, "agent-a").await;
    let opened = core.gates.evaluate_project(project.id).await.unwrap();

    // The claimant reviews their own work (a reviewer key sharing the
    // agent's actor identity).
    let self_reviewer = Principal {
        api_key_id: uuid::Uuid::new_v4(),
        project_id: Some(project.id),
        role_scopes: vec![RoleScope::Reviewer],
        actor_id: "agent-a".to_string(),
    };
    core.gates
        .record_decision(
            &self_reviewer,
            opened[0].id,
            NewGateDecision {
                outcome: GateOutcome::Approved,
                reason: "looks good to me".to_string(),
                evidence_refs: vec![evidence("check_run", "ci/run/78")],
            },
            None,
        )
        .await
        .unwrap();

    let err = core.lifecycle
        .request_integrate(&common::agent(project.id, "agent-a"), task.id, None, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "GATE_SELF_REVIEW");
}

#[tokio::test]
async fn approving_decisions_need_the_required_evidence_kinds() {
    let (core, _clock) = core().await;
    let project = seed_project(&core, "alpha").await;
    core.gates
        .create_rule(&operator(project.id), project.id, review_rule(1))
        .await
        .unwrap();
    seed_task(&core, project.id, "feature").await;
    drive_to_implemented(&core, project.id, "agent-a").await;
    let opened = core.gates.evaluate_project(project.id).await.unwrap();

    let err = core.gates
        .record_decision(
            &reviewer(project.id),
            opened[0].id,
            NewGateDecision {
                outcome: GateOutcome::Approved,
                reason: "approving without evidence".to_string(),
                evidence_refs: vec![evidence("screenshot", "img.png")],
            },
            None,
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "GATE_EVIDENCE_REQUIRED");

    // Rejections carry no evidence requirement.
    core.gates
        .record_decision(
            &reviewer(project.id),
            opened[0].id,
            NewGateDecision {
                outcome: GateOutcome::Rejected,
                reason: "needs more tests".to_string(),
                evidence_refs: Vec::new(),
            },
            None,
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn force_integration_is_admin_only_and_audited() {
    let (core, _clock) = core().await;
    let project = seed_project(&core, "alpha").await;
    core.gates
        .create_rule(&operator(project.id), project.id, review_rule(1))
        .await
        .unwrap();
    seed_task(&core, project.id, "feature").await;
    let (task, _grant) = drive_to_implemented(&core, project.id, "agent-a").await;

    // Non-admin force is refused even with a reason.
    let err = core.lifecycle
        .request_integrate(
            &common::agent(project.id, "agent-a"),
            task.id,
            Some("hotfix backfill"),
            None,
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "GATE_FORCE_REQUIRES_ADMIN");

    // Admin force with a reason succeeds and leaves a dedicated event.
    let task = core.lifecycle
        .request_integrate(&Principal::root(), task.id, Some("hotfix backfill"), None)
        .await
        .unwrap();
    assert_eq!(task.state, TaskState::Integrated);

    let events = core.events
        .events_for_entity(tascade::models::EventEntity::Gate, &task.id.to_string())
        .await
        .unwrap();
    assert!(events.iter().any(|e| e.event_type == "gate_forced_integration"));
}

#[tokio::test]
async fn milestone_completion_condition() {
    let (core, _clock) = core().await;
    let project = seed_project(&core, "alpha").await;
    let planner_p = planner(project.id);
    let phase = core.dag.create_phase(&planner_p, project.id, "build").await.unwrap();
    let milestone = core.dag.create_milestone(&planner_p, phase.id, "v1").await.unwrap();

    core.gates
        .create_rule(
            &operator(project.id),
            project.id,
            NewGateRule {
                name: "v1 milestone review".to_string(),
                gate_class: GateClass::MergeGate,
                scope: GateScope {
                    milestone_id: Some(milestone.id),
                    ..GateScope::default()
                },
                condition: GateCondition::MilestoneComplete { milestone_id: milestone.id },
                required_evidence: Vec::new(),
                evidence_window_seconds: None,
            },
        )
        .await
        .unwrap();

    let mut spec = common::task_spec("the one deliverable");
    spec.milestone_id = Some(milestone.id);
    core.dag.create_task(&planner_p, project.id, spec, None).await.unwrap();

    // Not complete yet: nothing fires.
    assert!(core.gates.evaluate_project(project.id).await.unwrap().is_empty());

    drive_to_implemented(&core, project.id, "agent-a").await;
    let opened = core.gates.evaluate_project(project.id).await.unwrap();
    assert_eq!(opened.len(), 1);
    assert_eq!(opened[0].task_class.as_str(), "merge_gate");
    assert_eq!(opened[0].milestone_id, Some(milestone.id));
}
