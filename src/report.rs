//! Renders a finalized run into a chat notification.

use serde::{Deserialize, Serialize};

use crate::aggregate::RunAggregate;

/// Body posted to the chat webhook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub text: String,
}

pub fn compile_report(aggregate: &RunAggregate) -> NotificationPayload {
    let mut text = format!(
        ":art: *Poster Generation Report*\n\
         Run finished for spreadsheet `{}`\n\
         \n\
         *Summary*\n\
         - :white_check_mark: Generated: {}\n\
         - :x: Failed: {}\n\
         - :warning: Skipped invalid rows: {}\n",
        aggregate.spreadsheet_id,
        aggregate.succeeded.len(),
        aggregate.failed.len(),
        aggregate.invalid_count,
    );

    if !aggregate.failed.is_empty() {
        let keys = aggregate
            .failed
            .keys()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(", ");
        text.push_str(&format!("\n*Failed keys:* `{keys}`\n"));
    }

    NotificationPayload { text }
}
