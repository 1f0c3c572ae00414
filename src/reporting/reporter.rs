use std::path::{Path, PathBuf};
use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use crate::agents::registry::AgentName;
use crate::errors::WaypointError;
use crate::models::VulnerabilityRecord;
use crate::pipeline::state::RunSummary;
use crate::session::state::Session;
use crate::utils::atomic::atomic_write;
use super::formatter::{format_finding_markdown, format_findings_table, format_run_summary};
use tracing::info;

pub const REPORT_FILE: &str = "comprehensive_security_assessment_report.md";
pub const FINDINGS_FILE: &str = "findings.json";

#[derive(Debug, Clone)]
pub struct ReportHandles {
    pub report_path: PathBuf,
    pub findings_path: PathBuf,
}

/// Produces the final deliverables once every agent has completed.
#[async_trait]
pub trait Reporter: Send + Sync {
    async fn generate_report(&self, session: &Session) -> Result<ReportHandles, WaypointError>;
}

#[derive(Serialize)]
struct FindingsFile<'a> {
    session_id: &'a str,
    target: &'a str,
    generated_at: String,
    findings: Vec<&'a VulnerabilityRecord>,
}

/// Markdown report plus machine-readable findings, written to
/// `<output>/<session-id>/`. Unexploited hypotheses never appear in either.
pub struct MarkdownReporter {
    output_dir: PathBuf,
}

impl MarkdownReporter {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self { output_dir: output_dir.into() }
    }

    fn render(session: &Session, findings: &[&VulnerabilityRecord], executive_summary: Option<&str>) -> String {
        let mut report = format!(
            "# Security Assessment Report\n\n- Target: {}\n- Assessment Date: {}\n",
            session.target.web_url,
            Utc::now().format("%Y-%m-%d"),
        );

        if let Some(summary) = executive_summary.map(str::trim).filter(|s| !s.is_empty()) {
            report.push_str("\n## Executive Summary\n\n");
            report.push_str(summary);
            report.push('\n');
        }

        report.push_str("\n## Proven Findings\n\n");
        report.push_str(&format_findings_table(findings));
        report.push_str("\n---\n\n");
        if findings.is_empty() {
            report.push_str("No exploitable vulnerabilities were proven during this assessment.\n");
        }
        for finding in findings {
            report.push_str(&format_finding_markdown(finding));
            report.push_str("\n---\n\n");
        }

        report.push_str("\n## Run\n\n");
        report.push_str(&format_run_summary(&RunSummary::from_session(session)));
        report
    }
}

async fn read_executive_summary(repo: &Path) -> Option<String> {
    let path = repo.join("deliverables").join(AgentName::Report.definition().deliverable);
    tokio::fs::read_to_string(path).await.ok()
}

#[async_trait]
impl Reporter for MarkdownReporter {
    async fn generate_report(&self, session: &Session) -> Result<ReportHandles, WaypointError> {
        let dir = self.output_dir.join(&session.id);
        tokio::fs::create_dir_all(&dir).await?;

        let findings: Vec<&VulnerabilityRecord> = session
            .vulnerabilities
            .values()
            .flatten()
            .filter(|r| r.is_reportable())
            .collect();
        let executive_summary = read_executive_summary(&session.target.repo_path).await;

        let report_path = dir.join(REPORT_FILE);
        let report = Self::render(session, &findings, executive_summary.as_deref());
        atomic_write(&report_path, &report).await?;

        let findings_path = dir.join(FINDINGS_FILE);
        let file = FindingsFile {
            session_id: &session.id,
            target: &session.target.web_url,
            generated_at: Utc::now().to_rfc3339(),
            findings,
        };
        atomic_write(&findings_path, &serde_json::to_string_pretty(&file)?).await?;

        info!(session_id = %session.id, path = %report_path.display(), exploited = file.findings.len(), "Final report written");
        Ok(ReportHandles { report_path, findings_path })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ExploitProof, VulnCategory};
    use crate::session::state::TargetDescriptor;
    use tempfile::TempDir;

    fn session(repo: &Path) -> Session {
        let mut s = Session::new(
            "sess".into(),
            TargetDescriptor { web_url: "https://shop.test".into(), repo_path: repo.to_path_buf(), config_path: None },
            "fp".into(),
        );
        let mut proven = VulnerabilityRecord::hypothesis(VulnCategory::Injection, "SQLi in /search");
        proven.id = "injection-1".into();
        proven.exploited = true;
        proven.proof = Some(ExploitProof {
            payload: "q=' OR 1=1--".into(),
            observed_response: "all products returned".into(),
            evidence: None,
        });
        let mut unproven = VulnerabilityRecord::hypothesis(VulnCategory::Injection, "Command injection in export");
        unproven.id = "injection-2".into();
        s.vulnerabilities.insert(VulnCategory::Injection, vec![proven, unproven]);
        s
    }

    #[tokio::test]
    async fn test_only_exploited_records_are_reported() {
        let repo = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let handles = MarkdownReporter::new(out.path())
            .generate_report(&session(repo.path()))
            .await
            .unwrap();

        let report = std::fs::read_to_string(&handles.report_path).unwrap();
        assert!(report.contains("SQLi in /search"));
        assert!(!report.contains("Command injection in export"));

        let findings: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&handles.findings_path).unwrap()).unwrap();
        let list = findings["findings"].as_array().unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0]["id"], "injection-1");
    }

    #[tokio::test]
    async fn test_executive_summary_is_merged() {
        let repo = TempDir::new().unwrap();
        std::fs::create_dir_all(repo.path().join("deliverables")).unwrap();
        std::fs::write(repo.path().join("deliverables/executive_summary.md"), "One critical issue.").unwrap();
        let out = TempDir::new().unwrap();
        let handles = MarkdownReporter::new(out.path())
            .generate_report(&session(repo.path()))
            .await
            .unwrap();
        let report = std::fs::read_to_string(&handles.report_path).unwrap();
        assert!(report.contains("## Executive Summary\n\nOne critical issue."));
        assert_eq!(handles.report_path, out.path().join("sess").join(REPORT_FILE));
    }
}
