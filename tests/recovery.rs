mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;
use common::{Harness, Script};
use tokio_util::sync::CancellationToken;
use waypoint::agents::registry::AgentName;
use waypoint::errors::WaypointError;
use waypoint::pipeline::OrchestratorState;
use waypoint::session::state::AgentStatus;
use waypoint::session::store::SessionStore;

#[tokio::test]
async fn test_agent_left_running_by_a_crash_is_rerun() {
    let h = Harness::with_scripts(&[(AgentName::Recon, Script::AlwaysFail)]);
    let _ = h.orchestrator().await.run().await;

    // Simulate a process that died while recon was in flight.
    let store = h.store().await;
    let mut session = h.session().await;
    let record = session.agents.get_mut(&AgentName::Recon).unwrap();
    record.status = AgentStatus::Running;
    record.error = None;
    store.save(&session).await.unwrap();

    h.agent(AgentName::Recon).set_script(Script::Succeed);
    h.orchestrator().await.run().await.unwrap();

    assert_eq!(h.calls(AgentName::Recon), 4);
    assert_eq!(h.calls(AgentName::PreReconCode), 1);
    assert_eq!(h.calls(AgentName::PreReconTools), 1);
    let session = h.session().await;
    session.verify_invariants().unwrap();
    assert!(session.is_done());
}

#[tokio::test]
async fn test_crash_mid_analysis_reruns_only_unfinished_agents() {
    let unfinished = [AgentName::InjectionVuln, AgentName::XssVuln, AgentName::AuthVuln];
    let scripts: Vec<_> = unfinished.iter().map(|a| (*a, Script::AlwaysFail)).collect();
    let h = Harness::with_scripts(&scripts);
    assert!(h.orchestrator().await.run().await.is_err());

    // Two analysis agents finished, two were in flight and one never started.
    let store = h.store().await;
    let mut session = h.session().await;
    for (agent, status) in [
        (AgentName::InjectionVuln, AgentStatus::Running),
        (AgentName::XssVuln, AgentStatus::Running),
        (AgentName::AuthVuln, AgentStatus::NotStarted),
    ] {
        let record = session.agents.get_mut(&agent).unwrap();
        record.status = status;
        record.error = None;
    }
    store.save(&session).await.unwrap();
    let finished: Vec<_> = [AgentName::SsrfVuln, AgentName::AuthzVuln]
        .iter()
        .map(|a| session.checkpoints[a].commit_id.clone())
        .collect();

    for agent in unfinished {
        h.agent(agent).set_script(Script::Succeed);
    }
    h.orchestrator().await.run().await.unwrap();

    assert_eq!(h.calls(AgentName::SsrfVuln), 1);
    assert_eq!(h.calls(AgentName::AuthzVuln), 1);
    for agent in unfinished {
        assert_eq!(h.calls(agent), 4, "{}", agent);
    }
    let session = h.session().await;
    session.verify_invariants().unwrap();
    assert!(session.is_done());
    assert_eq!(session.checkpoints[&AgentName::SsrfVuln].commit_id, finished[0]);
    assert_eq!(session.checkpoints[&AgentName::AuthzVuln].commit_id, finished[1]);
}

#[tokio::test]
async fn test_failed_agent_is_retried_on_resume() {
    let h = Harness::with_scripts(&[(AgentName::AuthVuln, Script::AlwaysFail)]);
    assert!(h.orchestrator().await.run().await.is_err());

    h.agent(AgentName::AuthVuln).set_script(Script::Hypotheses(1));
    h.orchestrator().await.run().await.unwrap();

    assert_eq!(h.calls(AgentName::AuthVuln), 4);
    assert_eq!(h.calls(AgentName::AuthExploit), 1);
    assert_eq!(h.calls(AgentName::XssVuln), 1);
}

#[tokio::test]
async fn test_failed_agent_stays_failed_when_retry_disabled() {
    let h = Harness::with_scripts(&[(AgentName::AuthVuln, Script::AlwaysFail)]);
    assert!(h.orchestrator().await.run().await.is_err());

    h.agent(AgentName::AuthVuln).set_script(Script::Succeed);
    let mut config = h.config();
    config.retry_failed_on_resume = false;
    let err = h.orchestrator_with(config).await.run().await.unwrap_err();

    assert!(matches!(err, WaypointError::AgentsFailed { .. }));
    assert_eq!(h.calls(AgentName::AuthVuln), 3);
}

#[tokio::test]
async fn test_cancellation_returns_agent_to_not_started() {
    let h = Harness::with_scripts(&[(AgentName::PreReconCode, Script::Hang)]);
    let token = CancellationToken::new();
    let mut orchestrator = h.orchestrator().await.with_cancel_token(token.clone());

    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        token.cancel();
    });
    let err = orchestrator.run().await.unwrap_err();
    canceller.await.unwrap();

    assert!(matches!(err, WaypointError::Cancelled));
    assert_eq!(orchestrator.state(), OrchestratorState::Aborted);
    let session = h.session().await;
    session.verify_invariants().unwrap();
    assert_eq!(session.status(AgentName::PreReconCode), AgentStatus::NotStarted);
    assert!(session.checkpoints.is_empty());
}

#[tokio::test]
async fn test_checkpoint_failure_never_marks_completed() {
    let h = Harness::with_scripts(&[(AgentName::PreReconCode, Script::Fatal)]);
    assert!(h.orchestrator().await.run().await.is_err());
    assert!(h.session().await.baseline_commit.is_some());

    h.backend.fail_commits.store(true, Ordering::SeqCst);
    h.agent(AgentName::PreReconCode).set_script(Script::Succeed);
    let err = h.orchestrator().await.run().await.unwrap_err();
    assert!(matches!(err, WaypointError::AgentsFailed { .. }));
    assert_eq!(h.calls(AgentName::PreReconCode), 2);

    let session = h.session().await;
    session.verify_invariants().unwrap();
    assert_eq!(session.status(AgentName::PreReconCode), AgentStatus::Failed);
    assert!(session.record(AgentName::PreReconCode).unwrap().error.as_deref().unwrap().contains("disk full"));
}
