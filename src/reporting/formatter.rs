use crate::models::{Confidence, VulnCategory, VulnerabilityRecord};
use crate::pipeline::state::RunSummary;
use crate::utils::formatting::{format_cost, format_duration};

pub fn format_finding_markdown(record: &VulnerabilityRecord) -> String {
    let mut out = format!(
        "### {}: {}\n\n**Category:** {}\n**Confidence:** {}\n",
        record.id,
        record.hypothesis,
        record.category.display_name(),
        confidence_label(record.confidence),
    );
    if let Some(evidence_ref) = &record.evidence_ref {
        out.push_str(&format!("**Source:** `{}`\n", evidence_ref));
    }
    if let Some(proof) = &record.proof {
        out.push_str(&format!(
            "\n**Payload:**\n```\n{}\n```\n\n**Observed response:**\n```\n{}\n```\n",
            proof.payload, proof.observed_response
        ));
        if let Some(evidence) = &proof.evidence {
            out.push_str(&format!("\n**Evidence:** {}\n", evidence));
        }
    }
    out
}

/// Per-category counts of proven findings.
pub fn format_findings_table(findings: &[&VulnerabilityRecord]) -> String {
    let mut out = String::from("| Category | Exploited |\n|---|---|\n");
    for category in VulnCategory::ALL {
        let count = findings.iter().filter(|f| f.category == category).count();
        out.push_str(&format!("| {} | {} |\n", category.display_name(), count));
    }
    out.push_str(&format!("| **Total** | **{}** |\n", findings.len()));
    out
}

pub fn format_run_summary(summary: &RunSummary) -> String {
    format!(
        "- Session: `{}`\n- Agents completed: {} ({} skipped, nothing to exploit)\n- Hypotheses: {}\n- Exploited: {}\n- Agent time: {}\n- Cost: {}\n",
        summary.session_id,
        summary.agents_completed,
        summary.agents_skipped,
        summary.hypotheses,
        summary.exploited,
        format_duration(summary.total_duration_ms),
        format_cost(summary.total_cost_usd),
    )
}

fn confidence_label(confidence: Confidence) -> &'static str {
    match confidence {
        Confidence::High => "High",
        Confidence::Medium => "Medium",
        Confidence::Low => "Low",
    }
}
