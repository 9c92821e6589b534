//! Splits a pasted blob of chats on five-dash delimiter lines.

use crate::record::Transcript;

/// Line that separates two chats in a batch paste.
pub const DELIMITER: &str = "-----";

/// Split raw pasted text into transcripts.
///
/// A line whose trimmed content is exactly [`DELIMITER`] ends the current
/// chat and is dropped. Segments are trimmed and empty ones skipped.
pub fn split(raw: &str) -> Vec<Transcript> {
    let mut transcripts = Vec::new();
    let mut current = String::new();

    for line in raw.lines() {
        if line.trim() == DELIMITER {
            push_segment(&mut transcripts, &current);
            current.clear();
        } else {
            current.push_str(line);
            current.push('\n');
        }
    }
    push_segment(&mut transcripts, &current);

    transcripts
}

fn push_segment(transcripts: &mut Vec<Transcript>, segment: &str) {
    let trimmed = segment.trim();
    if !trimmed.is_empty() {
        transcripts.push(Transcript::new(trimmed));
    }
}
