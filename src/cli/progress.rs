use std::collections::HashMap;
use std::time::{Duration, Instant};
use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tokio::sync::mpsc;
use crate::agents::registry::{AgentName, AGENT_REGISTRY};
use crate::pipeline::PipelineEvent;
use crate::utils::formatting::{format_cost, format_duration};

/// Spinners per running agent plus an overall agent counter, fed by
/// [`PipelineEvent`]s.
pub struct RunProgress {
    multi: MultiProgress,
    overall: ProgressBar,
    agents: HashMap<AgentName, ProgressBar>,
    cost_usd: f64,
    start_time: Instant,
}

fn spinner_style(template: &str) -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template(template)
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

impl RunProgress {
    pub fn new() -> Self {
        let multi = MultiProgress::new();
        let overall = multi.add(ProgressBar::new(AGENT_REGISTRY.len() as u64));
        overall.set_style(
            ProgressStyle::default_bar()
                .template("  {bar:30.cyan/dark_gray} {pos}/{len} agents | {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("█▓░"),
        );
        overall.set_message("Starting");
        Self {
            multi,
            overall,
            agents: HashMap::new(),
            cost_usd: 0.0,
            start_time: Instant::now(),
        }
    }

    pub fn handle_event(&mut self, event: &PipelineEvent) {
        match event {
            PipelineEvent::RunStarted { session_id, web_url, resumed } => {
                let verb = if *resumed { "Resuming" } else { "Starting" };
                self.println(&format!(
                    "{} {} {}",
                    style(verb).bold(),
                    web_url,
                    style(format!("(session {})", session_id)).dim()
                ));
            }
            PipelineEvent::PhaseStarted { display_name, .. } => {
                self.overall.set_message(display_name.clone());
            }
            PipelineEvent::PhaseCompleted { display_name, .. } => {
                self.println(&format!("{} {}", style("✓").green(), display_name));
            }
            PipelineEvent::AgentStarted { agent } => {
                let bar = self.multi.insert_before(&self.overall, ProgressBar::new_spinner());
                bar.set_style(spinner_style("    {spinner:.yellow} {msg} {elapsed:.dim}"));
                bar.set_message(agent.to_string());
                bar.enable_steady_tick(Duration::from_millis(100));
                self.agents.insert(*agent, bar);
            }
            PipelineEvent::AgentCompleted { agent, duration_ms, cost_usd } => {
                self.finish_agent(*agent);
                self.cost_usd += cost_usd.unwrap_or(0.0);
                self.overall.inc(1);
                self.println(&format!(
                    "    {} {} {}",
                    style("✓").green(),
                    agent,
                    style(format!("{} {}", format_duration(*duration_ms), format_cost(cost_usd.unwrap_or(0.0)))).dim()
                ));
            }
            PipelineEvent::AgentSkipped { agent, reason } => {
                self.overall.inc(1);
                self.println(&format!("    {} {} {}", style("-").dim(), agent, style(reason).dim()));
            }
            PipelineEvent::AgentFailed { agent, error } => {
                self.finish_agent(*agent);
                self.println(&format!("    {} {} {}", style("✗").red(), agent, error));
            }
            PipelineEvent::AgentInterrupted { agent } => {
                self.finish_agent(*agent);
                self.println(&format!("    {} {} interrupted", style("!").yellow(), agent));
            }
            PipelineEvent::RunCompleted { summary } => {
                self.clear_agents();
                self.overall.finish_with_message(format!(
                    "Done: {} exploited of {} hypotheses | {} | {}",
                    summary.exploited,
                    summary.hypotheses,
                    format_cost(summary.total_cost_usd),
                    format_duration(self.start_time.elapsed().as_millis() as u64),
                ));
            }
            PipelineEvent::RunFailed { error } => {
                self.clear_agents();
                self.overall.abandon_with_message(format!("Stopped: {}", error));
            }
        }
    }

    fn finish_agent(&mut self, agent: AgentName) {
        if let Some(bar) = self.agents.remove(&agent) {
            bar.finish_and_clear();
        }
    }

    fn clear_agents(&mut self) {
        for (_, bar) in self.agents.drain() {
            bar.finish_and_clear();
        }
    }

    fn println(&self, line: &str) {
        let _ = self.multi.println(line);
    }
}

/// Consume events until the sender side is dropped.
pub async fn drive(mut rx: mpsc::UnboundedReceiver<PipelineEvent>) {
    let mut progress = RunProgress::new();
    while let Some(event) = rx.recv().await {
        progress.handle_event(&event);
    }
}
