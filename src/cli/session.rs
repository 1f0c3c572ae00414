use std::sync::Arc;
use console::style;
use crate::agents::registry::{AgentName, AGENT_REGISTRY};
use crate::audit::{AuditLog, AuditTrail};
use crate::cli::commands::{DiscardArgs, OutputArgs, RollbackArgs, SessionArgs};
use crate::config::credentials::Redactor;
use crate::config::resolved::resolve_target;
use crate::errors::WaypointError;
use crate::git::CheckpointManager;
use crate::models::VulnCategory;
use crate::pipeline::phase::{agents_in_phase, display_name};
use crate::pipeline::PhaseName;
use crate::session::manager::{session_id_for, SessionManager};
use crate::session::state::{AgentStatus, Session};
use crate::session::store::JsonSessionStore;
use crate::utils::formatting::{format_cost, format_duration, short_commit};
use tracing::warn;

async fn session_manager(output: &OutputArgs) -> Result<SessionManager, WaypointError> {
    let store = JsonSessionStore::open(output.output.join("sessions")).await?;
    Ok(SessionManager::new(Arc::new(store)))
}

/// Load the session named by `--session`, or derived from `--target`/`--repo`.
async fn locate(args: &SessionArgs) -> Result<(SessionManager, Session), WaypointError> {
    let id = match (&args.session, &args.target, &args.repo) {
        (Some(id), _, _) => id.clone(),
        (None, Some(url), Some(repo)) => session_id_for(&resolve_target(url, repo, args.config.clone())?),
        _ => {
            return Err(WaypointError::InvalidInvocation(
                "Name a session with --session <id> or --target <url> --repo <path>".into(),
            ))
        }
    };
    let manager = session_manager(&args.output).await?;
    let session = manager.load_session(&id).await?;
    Ok((manager, session))
}

fn status_label(session: &Session, agent: AgentName) -> String {
    match session.status(agent) {
        AgentStatus::Completed if session.is_skipped(agent) => style("skipped").dim().to_string(),
        AgentStatus::Completed => style("completed").green().to_string(),
        AgentStatus::Failed => style("failed").red().to_string(),
        AgentStatus::Running => style("running").yellow().to_string(),
        AgentStatus::NotStarted => style("not-started").dim().to_string(),
    }
}

pub async fn handle_status(args: SessionArgs) -> Result<(), WaypointError> {
    let (manager, session) = locate(&args).await?;

    println!("{} {}", style("Session").bold(), session.id);
    println!("  Target: {}", session.target.web_url);
    println!("  Repo:   {}", session.target.repo_path.display());
    println!(
        "  Phase:  {}",
        session.current_phase().map(display_name).unwrap_or("done")
    );

    for phase in PhaseName::ALL {
        println!("\n{}", style(display_name(phase)).cyan().bold());
        for def in agents_in_phase(phase) {
            let record = session.record(def.name);
            let mut line = format!("  {:<18} {}", def.name.as_str(), status_label(&session, def.name));
            if let Some(checkpoint) = session.checkpoints.get(&def.name) {
                line.push_str(&format!("  @{}", short_commit(&checkpoint.commit_id)));
            }
            if let Some(metrics) = record.and_then(|r| r.metrics.as_ref()) {
                line.push_str(&format!(
                    "  {} {} ({} attempts)",
                    format_duration(metrics.duration_ms),
                    format_cost(metrics.cost_usd.unwrap_or(0.0)),
                    metrics.attempt_count
                ));
            }
            println!("{}", line);
            if let Some(error) = record.and_then(|r| r.error.as_deref()) {
                println!("      {}", style(error).red());
            }
        }
    }

    println!("\n{}", style("Hypotheses").bold());
    for category in VulnCategory::ALL {
        let records = session.vulnerabilities_for(category);
        let exploited = records.iter().filter(|r| r.exploited).count();
        println!("  {:<28} {} recorded, {} exploited", category.display_name(), records.len(), exploited);
    }

    let blocked = session.blocked_agents();
    if !blocked.is_empty() {
        let names: Vec<&str> = blocked.iter().map(|d| d.name.as_str()).collect();
        println!("\n{} {}", style("Blocked:").red().bold(), names.join(", "));
        println!("  Recover with `waypoint rollback-to <agent> --session {}` or re-run", session.id);
    } else if let Some(next) = manager.next_agent(&session) {
        println!("\nNext agent: {}", next.name);
    }
    Ok(())
}

pub async fn handle_rollback(args: RollbackArgs, after: bool) -> Result<(), WaypointError> {
    let agent: AgentName = args.agent.parse()?;
    let (manager, mut session) = locate(&args.session).await?;
    let checkpoints = CheckpointManager::git();

    let reverted = if after {
        checkpoints.rollback_after_agent(&manager, &mut session, agent).await?
    } else {
        checkpoints.rollback_to_agent(&manager, &mut session, agent).await?
    };

    let session_dir = args.session.output.output.join(&session.id);
    match AuditTrail::initialize(&session_dir, &session.id, Redactor::new(Vec::<String>::new())).await {
        Ok(trail) => {
            let position = if after { "after" } else { "to before" };
            let names: Vec<&str> = reverted.iter().map(|a| a.as_str()).collect();
            if let Err(e) = trail
                .record_event(&format!("Rolled back {} {}; reverted: {}", position, agent, names.join(", ")))
                .await
            {
                warn!(error = %e, "Failed to log rollback");
            }
        }
        Err(e) => warn!(error = %e, "Audit trail unavailable, rollback not logged"),
    }

    println!(
        "{} Rolled back {} {}",
        style("✓").green(),
        if after { "to after" } else { "to before" },
        agent
    );
    if reverted.is_empty() {
        println!("  No agents reverted");
    } else {
        for name in &reverted {
            println!("  reverted {}", name);
        }
    }
    Ok(())
}

pub fn handle_list_agents() -> Result<(), WaypointError> {
    let mut current = None;
    for def in AGENT_REGISTRY.iter() {
        if current != Some(def.phase) {
            println!("{}", style(display_name(def.phase)).cyan().bold());
            current = Some(def.phase);
        }
        let prerequisites: Vec<&str> = def.prerequisites.iter().map(|p| p.as_str()).collect();
        println!(
            "  {:<18} group {}  after: {}",
            def.name.as_str(),
            def.concurrency_group,
            if prerequisites.is_empty() { "-".to_string() } else { prerequisites.join(", ") }
        );
    }
    Ok(())
}

pub async fn handle_sessions(args: OutputArgs) -> Result<(), WaypointError> {
    let manager = session_manager(&args).await?;
    let sessions = manager.list_sessions().await?;
    if sessions.is_empty() {
        println!("No sessions under {}", args.output.display());
        return Ok(());
    }
    for summary in sessions {
        let state = match summary.current_phase {
            None => style("done".to_string()).green(),
            Some(_) if summary.failed > 0 => style(format!("{} failed", summary.failed)).red(),
            Some(phase) => style(phase.to_string()).yellow(),
        };
        println!(
            "{}  {:>2}/{} agents  {}  {}  {}",
            summary.id,
            summary.completed,
            summary.total,
            state,
            summary.web_url,
            style(summary.updated_at.format("%Y-%m-%d %H:%M").to_string()).dim()
        );
    }
    Ok(())
}

pub async fn handle_discard(args: DiscardArgs) -> Result<(), WaypointError> {
    let manager = session_manager(&args.output).await?;
    if manager.discard_session(&args.session_id).await? {
        println!("{} Discarded session {}", style("✓").green(), args.session_id);
        Ok(())
    } else {
        Err(WaypointError::InvalidInvocation(format!("No session with id {}", args.session_id)))
    }
}
