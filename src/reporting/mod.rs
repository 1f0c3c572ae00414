pub mod formatter;
pub mod reporter;

pub use reporter::{MarkdownReporter, ReportHandles, Reporter};
