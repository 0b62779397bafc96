//! Plain-text rendering of the chat screen for a terminal.

use client_core::{MessageRow, RowAlignment, ScreenView};

pub const LOADING_LINE: &str = "Loading conversation...";
const USER_LABEL: &str = "you";
const ASSISTANT_LABEL: &str = "assistant";

/// Lines for one transcript row. User rows hug the right edge of `width`,
/// assistant rows the left.
pub fn render_row(row: &MessageRow, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    for (i, text) in row.content.lines().chain(empty_if_blank(&row.content)).enumerate() {
        let line = match (row.alignment, i) {
            (RowAlignment::Leading, 0) => format!("{ASSISTANT_LABEL}> {text}"),
            (RowAlignment::Leading, _) => {
                format!("{:indent$}{text}", "", indent = ASSISTANT_LABEL.len() + 2)
            }
            (RowAlignment::Trailing, 0) => right_align(&format!("{text} <{USER_LABEL}"), width),
            (RowAlignment::Trailing, _) => {
                right_align(&format!("{text}{:pad$}", "", pad = USER_LABEL.len() + 2), width)
            }
        };
        lines.push(line);
    }
    lines
}

pub fn render_view(view: &ScreenView, width: usize) -> Vec<String> {
    match view {
        ScreenView::Loading => vec![LOADING_LINE.to_string()],
        ScreenView::Ready { rows, sending, .. } => {
            let mut lines: Vec<String> =
                rows.iter().flat_map(|row| render_row(row, width)).collect();
            if *sending {
                lines.push(format!("{ASSISTANT_LABEL}> ..."));
            }
            lines
        }
    }
}

fn empty_if_blank(content: &str) -> Option<&str> {
    content.lines().next().is_none().then_some("")
}

fn right_align(text: &str, width: usize) -> String {
    format!("{text:>width$}")
}
