use std::sync::Arc;
use std::time::{Duration, Instant};
use chrono::Utc;
use crate::audit::{AttemptOutcome, AttemptRecord, AuditLog};
use crate::errors::{RetryPolicy, WaypointError};
use crate::pipeline::state::AgentMetrics;
use crate::session::state::Session;
use super::agent::{Agent, AgentContext, AgentOutput, Usage};
use tracing::{error, info, warn};

/// Result of a successful `run_agent`.
#[derive(Debug, Clone)]
pub struct AgentRun {
    pub output: AgentOutput,
    pub metrics: AgentMetrics,
    pub attempts: u32,
}

/// Runs agents with bounded retry. Never touches session state.
pub struct AgentExecutor {
    policy: RetryPolicy,
    timeout: Duration,
    audit: Arc<dyn AuditLog>,
}

impl AgentExecutor {
    pub fn new(policy: RetryPolicy, timeout: Duration, audit: Arc<dyn AuditLog>) -> Self {
        Self { policy, timeout, audit }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub async fn run_agent(
        &self,
        agent: &dyn Agent,
        session: &Session,
        ctx: &AgentContext,
    ) -> Result<AgentRun, WaypointError> {
        let name = agent.name();
        let run_start = Instant::now();
        let mut total_usage = Usage::default();
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let attempt_ctx = ctx.for_attempt(attempt);
            let started_at = Utc::now();
            info!(agent = %name, attempt, session_id = %ctx.session_id, "Starting agent attempt");

            let raw = tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => Err(WaypointError::Cancelled),
                result = tokio::time::timeout(self.timeout, agent.execute(session, &attempt_ctx)) => {
                    match result {
                        Ok(inner) => inner,
                        Err(_) => Err(WaypointError::Timeout(format!(
                            "{} exceeded {}s",
                            name,
                            self.timeout.as_secs()
                        ))),
                    }
                }
            };

            let (usage, result) = match raw {
                Ok(output) if output.success => (Some(output.usage.clone()), Ok(output)),
                Ok(output) => {
                    let reason = output
                        .note
                        .clone()
                        .unwrap_or_else(|| "agent reported an unusable result".into());
                    (
                        Some(output.usage),
                        Err(WaypointError::OutputValidation(format!("{}: {}", name, reason))),
                    )
                }
                Err(e) => (None, Err(e)),
            };
            if let Some(usage) = &usage {
                total_usage.absorb(usage);
            }

            let outcome = match &result {
                Ok(_) => AttemptOutcome::Succeeded,
                Err(e) => AttemptOutcome::from_error(e),
            };
            let record = AttemptRecord {
                session_id: ctx.session_id.clone(),
                agent: name,
                attempt,
                started_at,
                finished_at: Utc::now(),
                exchanges: attempt_ctx.take_transcript(),
                usage,
                outcome,
            };
            if let Err(e) = self.audit.record_attempt(&record).await {
                warn!(agent = %name, attempt, error = %e, "Failed to write audit record");
            }

            let err = match result {
                Ok(output) => {
                    let metrics = AgentMetrics {
                        duration_ms: run_start.elapsed().as_millis() as u64,
                        cost_usd: total_usage.cost_usd,
                        input_tokens: total_usage.input_tokens,
                        output_tokens: total_usage.output_tokens,
                        model: total_usage.model.clone(),
                        attempt_count: attempt,
                    };
                    info!(
                        agent = %name,
                        attempt,
                        duration_ms = metrics.duration_ms,
                        cost_usd = metrics.cost_usd.unwrap_or(0.0),
                        "Agent completed successfully"
                    );
                    return Ok(AgentRun { output, metrics, attempts: attempt });
                }
                Err(e) => e,
            };

            if matches!(err, WaypointError::Cancelled) {
                warn!(agent = %name, attempt, "Agent attempt cancelled");
                return Err(err);
            }
            if !self.policy.is_retryable(&err) {
                error!(agent = %name, attempt, error = %err, "Non-retryable agent error");
                return Err(err);
            }
            if attempt >= self.policy.max_attempts {
                error!(agent = %name, attempts = attempt, error = %err, "Agent failed after exhausting retries");
                return Err(err);
            }

            let delay = self.policy.delay_for(attempt, &err);
            warn!(
                agent = %name,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Retrying after transient error"
            );
            tokio::select! {
                _ = ctx.cancel.cancelled() => return Err(WaypointError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use async_trait::async_trait;
    use tokio::sync::Mutex;
    use crate::agents::agent::AgentPayload;
    use crate::agents::registry::AgentName;
    use crate::audit::ExchangeRole;
    use crate::session::state::TargetDescriptor;

    #[derive(Default)]
    struct RecordingAudit {
        records: Mutex<Vec<AttemptRecord>>,
    }

    #[async_trait]
    impl AuditLog for RecordingAudit {
        async fn record_attempt(&self, record: &AttemptRecord) -> Result<(), WaypointError> {
            self.records.lock().await.push(record.clone());
            Ok(())
        }
    }

    /// Fails with `error` for the first `failures` calls, then succeeds.
    struct Flaky {
        calls: AtomicU32,
        failures: u32,
        error: fn() -> WaypointError,
    }

    #[async_trait]
    impl Agent for Flaky {
        fn name(&self) -> AgentName {
            AgentName::Recon
        }

        async fn execute(&self, _session: &Session, ctx: &AgentContext) -> Result<AgentOutput, WaypointError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            ctx.record(ExchangeRole::Prompt, format!("call {}", n));
            if n <= self.failures {
                return Err((self.error)());
            }
            Ok(AgentOutput::succeeded(
                AgentPayload::default(),
                Usage { cost_usd: Some(0.5), ..Default::default() },
            ))
        }
    }

    struct Slow;

    #[async_trait]
    impl Agent for Slow {
        fn name(&self) -> AgentName {
            AgentName::Recon
        }

        async fn execute(&self, _session: &Session, _ctx: &AgentContext) -> Result<AgentOutput, WaypointError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(AgentOutput::unusable("unreachable", Usage::default()))
        }
    }

    fn fixture() -> (Session, AgentContext) {
        let session = Session::new(
            "s-1".into(),
            TargetDescriptor { web_url: "https://a.test".into(), repo_path: "/tmp/r".into(), config_path: None },
            "fp".into(),
        );
        let ctx = AgentContext::new(&session, AgentName::Recon, "/tmp/r/deliverables".into(), String::new());
        (session, ctx)
    }

    fn executor(audit: Arc<RecordingAudit>, timeout: Duration) -> AgentExecutor {
        AgentExecutor::new(RetryPolicy::accelerated(3), timeout, audit)
    }

    #[tokio::test]
    async fn test_transient_failures_then_success() {
        let audit = Arc::new(RecordingAudit::default());
        let agent = Flaky { calls: AtomicU32::new(0), failures: 2, error: || WaypointError::Network("reset".into()) };
        let (session, ctx) = fixture();

        let run = executor(audit.clone(), Duration::from_secs(5)).run_agent(&agent, &session, &ctx).await.unwrap();
        assert_eq!(run.attempts, 3);
        assert_eq!(run.metrics.attempt_count, 3);
        assert_eq!(run.metrics.cost_usd, Some(0.5));

        let records = audit.records.lock().await;
        assert_eq!(records.len(), 3);
        assert!(records[2].outcome.is_success());
        assert_eq!(records[0].exchanges[0].content, "call 1");
    }

    #[tokio::test]
    async fn test_retry_bound_is_three_attempts() {
        let audit = Arc::new(RecordingAudit::default());
        let agent = Flaky { calls: AtomicU32::new(0), failures: 10, error: || WaypointError::LLMApi("500".into()) };
        let (session, ctx) = fixture();

        let err = executor(audit.clone(), Duration::from_secs(5)).run_agent(&agent, &session, &ctx).await.unwrap_err();
        assert!(matches!(err, WaypointError::LLMApi(_)));
        assert_eq!(agent.calls.load(Ordering::SeqCst), 3);
        assert_eq!(audit.records.lock().await.len(), 3);
    }

    #[tokio::test]
    async fn test_fatal_error_is_not_retried() {
        let audit = Arc::new(RecordingAudit::default());
        let agent = Flaky { calls: AtomicU32::new(0), failures: 10, error: || WaypointError::Authentication("bad key".into()) };
        let (session, ctx) = fixture();

        let err = executor(audit, Duration::from_secs(5)).run_agent(&agent, &session, &ctx).await.unwrap_err();
        assert!(matches!(err, WaypointError::Authentication(_)));
        assert_eq!(agent.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timeout_is_retried_then_reported() {
        let audit = Arc::new(RecordingAudit::default());
        let (session, ctx) = fixture();
        let err = executor(audit.clone(), Duration::from_millis(20)).run_agent(&Slow, &session, &ctx).await.unwrap_err();
        assert!(matches!(err, WaypointError::Timeout(_)));
        assert_eq!(audit.records.lock().await.len(), 3);
    }

    #[tokio::test]
    async fn test_cancellation_stops_attempt() {
        let audit = Arc::new(RecordingAudit::default());
        let (session, ctx) = fixture();
        let cancel = ctx.cancel.clone();
        let handle = tokio::spawn(async move {
            executor(audit, Duration::from_secs(30)).run_agent(&Slow, &session, &ctx).await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
        let result = handle.await.unwrap();
        assert!(matches!(result, Err(WaypointError::Cancelled)));
    }
}
