use std::sync::Arc;
use console::style;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use crate::agents::registry::AgentName;
use crate::agents::AgentRegistry;
use crate::cli::commands::{RunAgentArgs, RunArgs};
use crate::config::RunConfig;
use crate::errors::WaypointError;
use crate::llm::create_provider;
use crate::pipeline::{Orchestrator, PipelineEvent};
use crate::reporting::MarkdownReporter;
use crate::session::manager::session_id_for;
use crate::utils::formatting::{format_cost, format_duration};
use super::progress;
use tracing::{info, warn};

/// Cancel `token` on the first Ctrl-C. In-flight agents return to not-started.
fn cancel_on_interrupt(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping in-flight agents");
            token.cancel();
        }
    });
}

async fn build_orchestrator(
    config: &RunConfig,
) -> Result<(Orchestrator, Option<JoinHandle<()>>), WaypointError> {
    let llm = create_provider(&config.llm)?;
    let agents = AgentRegistry::standard(llm, config.scanners.clone())?;
    let reporter = Arc::new(MarkdownReporter::new(config.output_dir.clone()));

    let cancel = CancellationToken::new();
    cancel_on_interrupt(cancel.clone());

    let mut orchestrator = Orchestrator::new(config.clone(), agents, reporter)
        .await?
        .with_cancel_token(cancel);

    let progress = if config.disable_loader {
        None
    } else {
        let (tx, rx) = mpsc::unbounded_channel::<PipelineEvent>();
        orchestrator = orchestrator.with_event_channel(tx);
        Some(tokio::spawn(progress::drive(rx)))
    };
    Ok((orchestrator, progress))
}

fn session_id_of(config: &RunConfig) -> String {
    config
        .session_id
        .clone()
        .unwrap_or_else(|| session_id_for(&config.target))
}

/// Recovery steps for a stopped session: inspect, roll back, resume.
pub fn recovery_hint(session_id: &str, error: &WaypointError) -> Vec<String> {
    let agent = match error {
        WaypointError::AgentsFailed { agents, .. } => agents.first().cloned(),
        _ => None,
    };
    vec![
        format!("Session:  {}", session_id),
        format!("Inspect:  waypoint status --session {}", session_id),
        format!(
            "Recover:  waypoint rollback-to {} --session {}",
            agent.as_deref().unwrap_or("<agent>"),
            session_id
        ),
        "Resume:   re-run the same `waypoint run` command".to_string(),
    ]
}

pub fn print_recovery_hint(session_id: &str, error: &WaypointError) {
    eprintln!();
    for line in recovery_hint(session_id, error) {
        eprintln!("  {}", line);
    }
}

pub async fn handle_run(args: RunArgs) -> Result<(), WaypointError> {
    let config = RunConfig::resolve(args.overrides()).await?;
    let session_id = session_id_of(&config);
    info!(web_url = %config.target.web_url, repo = %config.target.repo_path.display(), session_id = %session_id, "Starting run");

    let (mut orchestrator, progress) = build_orchestrator(&config).await?;
    let result = orchestrator.run().await;
    drop(orchestrator);
    if let Some(handle) = progress {
        let _ = handle.await;
    }

    match result {
        Ok(outcome) => {
            let summary = &outcome.summary;
            println!();
            println!("{}", style("Assessment complete").green().bold());
            println!("  Report:     {}", outcome.report_path.display());
            println!("  Audit logs: {}", outcome.audit_logs_path.display());
            println!(
                "  Exploited:  {} of {} hypotheses",
                summary.exploited, summary.hypotheses
            );
            println!(
                "  Agents:     {} completed ({} skipped)",
                summary.agents_completed, summary.agents_skipped
            );
            println!(
                "  Cost:       {} over {}",
                format_cost(summary.total_cost_usd),
                format_duration(summary.total_duration_ms)
            );
            Ok(())
        }
        Err(e) => {
            print_recovery_hint(&session_id, &e);
            Err(e)
        }
    }
}

pub async fn handle_run_agent(args: RunAgentArgs) -> Result<(), WaypointError> {
    let agent: AgentName = args.agent.parse()?;
    let config = RunConfig::resolve(args.run.overrides()).await?;
    let session_id = session_id_of(&config);

    let (mut orchestrator, progress) = build_orchestrator(&config).await?;
    let result = orchestrator.run_agent(agent).await;
    drop(orchestrator);
    if let Some(handle) = progress {
        let _ = handle.await;
    }

    let result = result?;
    if let Some((_, error)) = result.failed.first() {
        let err = WaypointError::AgentsFailed { session_id: session_id.clone(), agents: vec![agent.to_string()] };
        eprintln!("{} {}: {}", style("✗").red(), agent, error);
        print_recovery_hint(&session_id, &err);
        return Err(err);
    }
    if !result.interrupted.is_empty() {
        return Err(WaypointError::Cancelled);
    }
    if result.skipped.contains(&agent) {
        println!("{} {} skipped: no hypotheses to exploit", style("-").dim(), agent);
    } else {
        println!(
            "{} {} completed ({})",
            style("✓").green(),
            agent,
            format_cost(result.total_cost_usd)
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hint_names_failed_agent() {
        let err = WaypointError::AgentsFailed { session_id: "s-1".into(), agents: vec!["xss-vuln".into()] };
        let hint = recovery_hint("s-1", &err);
        assert!(hint.iter().any(|l| l.contains("waypoint status --session s-1")));
        assert!(hint.iter().any(|l| l.contains("waypoint rollback-to xss-vuln --session s-1")));
    }

    #[test]
    fn test_every_abort_offers_status_and_rollback() {
        for err in [WaypointError::TargetUnreachable("https://a.test".into()), WaypointError::Cancelled] {
            let hint = recovery_hint("s-2", &err);
            assert!(hint.iter().any(|l| l.contains("waypoint status --session s-2")));
            assert!(hint.iter().any(|l| l.contains("waypoint rollback-to <agent> --session s-2")));
        }
    }
}
