const MAX_OUTPUT_CHARS: usize = 15_000;
const MAX_ERROR_CHARS: usize = 2_000;

/// Keep the head and tail of long tool/LLM output.
pub fn truncate_output(output: &str) -> String {
    let total = output.chars().count();
    if total <= MAX_OUTPUT_CHARS {
        return output.to_string();
    }
    let half = MAX_OUTPUT_CHARS / 2;
    let start: String = output.chars().take(half).collect();
    let end: String = output.chars().skip(total - half).collect();
    format!("{}\n\n... [truncated {} chars] ...\n\n{}", start, total - MAX_OUTPUT_CHARS, end)
}

pub fn truncate_error(error: &str) -> String {
    if error.chars().count() <= MAX_ERROR_CHARS {
        error.to_string()
    } else {
        let head: String = error.chars().take(MAX_ERROR_CHARS).collect();
        format!("{}...", head)
    }
}
