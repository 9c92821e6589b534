//! Terminal rendering for the CLI.

use crate::batch::ProgressObserver;
use crate::record::{BatchResult, Record, RecordStatus};
use colored::Colorize;

/// Prints one status line per finished chat to stderr.
#[derive(Debug, Default)]
pub struct TerminalProgress;

impl ProgressObserver for TerminalProgress {
    fn on_start(&self, total: usize) {
        eprintln!("{}", format!("Found {} chats.", total).cyan());
    }

    fn on_record(&self, index: usize, total: usize, record: &Record) {
        let position = format!("[{}/{}]", index + 1, total);
        match record.status {
            RecordStatus::Ok => eprintln!("{} {} {}", position.dimmed(), "✓".green(), record.title),
            RecordStatus::Failed => eprintln!(
                "{} {} {}",
                position.dimmed(),
                "✗".red(),
                record.error_message.as_deref().unwrap_or_default()
            ),
        }
    }

    fn on_finish(&self, result: &BatchResult) {
        let line = format!(
            "Batch processing complete: {} ok, {} failed.",
            result.succeeded(),
            result.failed()
        );
        if result.failed() == 0 {
            eprintln!("{}", line.green());
        } else {
            eprintln!("{}", line.yellow());
        }
    }
}

/// Human-readable rendering of one record.
pub fn render_record(record: &Record) -> String {
    let mut out = String::new();

    if let Some(message) = &record.error_message {
        out.push_str(&format!("{} {}\n", "✗ Failed:".red().bold(), message));
        return out;
    }

    out.push_str(&format!("=== {} ===\n\n", record.title.bold()));
    out.push_str(&format!("{}\n", "📝 Summary:".bold()));
    out.push_str(&format!("  {}\n", record.summary));

    if !record.tags.is_empty() {
        out.push_str(&format!("\n{}\n", "🏷️  Tags:".bold()));
        out.push_str(&format!("  {}\n", record.tags.join(", ")));
    }

    if !record.bullets.is_empty() {
        out.push_str(&format!("\n{}\n", "📌 Key Points:".bold()));
        for point in &record.bullets {
            out.push_str(&format!("  • {}\n", point));
        }
    }

    if !record.action_items.is_empty() {
        out.push_str(&format!("\n{}\n", "✅ Action Items:".bold()));
        for item in &record.action_items {
            out.push_str(&format!("  • {}\n", item));
        }
    }

    out
}
