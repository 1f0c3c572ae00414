pub fn format_duration(ms: u64) -> String {
    if ms < 1000 {
        format!("{}ms", ms)
    } else if ms < 60_000 {
        format!("{:.1}s", ms as f64 / 1000.0)
    } else if ms < 3_600_000 {
        format!("{}m {}s", ms / 60_000, (ms % 60_000) / 1000)
    } else {
        format!("{}h {}m", ms / 3_600_000, (ms % 3_600_000) / 60_000)
    }
}

pub fn format_cost(usd: f64) -> String {
    let usd = usd.abs(); // avoid negative zero display
    if usd < 0.01 {
        format!("${:.4}", usd)
    } else {
        format!("${:.2}", usd)
    }
}

/// Short form of a commit id for status output.
pub fn short_commit(commit_id: &str) -> &str {
    commit_id.get(..8).unwrap_or(commit_id)
}
