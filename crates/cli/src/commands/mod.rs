//! Subcommand implementations and the helpers they share.

pub mod conflicts;
pub mod patch;
pub mod versions;

use std::io::Read;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use comfy_table::{presets::UTF8_FULL, Cell, Color, ContentArrangement, Table};
use serde_json::Value;

use concord_core::clock::{format_instant, parse_instant};
use concord_core::config::AppConfig;
use concord_core::db::Database;
use concord_core::edit::TreeEdit;
use concord_core::tree_diff::{TreeDiff, TreeDiffOptions};

// ---------------------------------------------------------------------------
// diff
// ---------------------------------------------------------------------------

pub fn cmd_diff(config: &AppConfig, old: &str, new: &str, emit_equal: bool) -> Result<()> {
    let old = read_input(old)?;
    let new = read_input(new)?;
    let options = TreeDiffOptions {
        emit_equal: emit_equal || config.diff.emit_equal,
    };

    let diff = TreeDiff::compute_with(old.as_bytes(), new.as_bytes(), options)
        .context("failed to diff documents")?;

    if diff.edits.iter().all(TreeEdit::is_equal) {
        println!("Documents are identical.");
        return Ok(());
    }

    let mut table = new_table(vec!["Op", "Path", "Old", "New"]);
    for edit in &diff.edits {
        let (old_value, new_value) = match edit {
            TreeEdit::Equal { .. } => (None, None),
            TreeEdit::Insert { new_value, .. } => (None, Some(new_value)),
            TreeEdit::Delete { old_value, .. } => (Some(old_value), None),
            TreeEdit::Update {
                old_value,
                new_value,
                ..
            } => (Some(old_value), Some(new_value)),
        };
        table.add_row(vec![
            edit_cell(edit.kind()),
            Cell::new(edit.path().to_string()),
            Cell::new(value_preview(old_value)),
            Cell::new(value_preview(new_value)),
        ]);
    }

    println!("{table}");
    println!();
    println!("distance: {}", diff.distance);
    Ok(())
}

fn value_preview(value: Option<&Value>) -> String {
    value
        .map(|v| truncate(&v.to_string(), 40))
        .unwrap_or_else(|| "-".to_string())
}

// ---------------------------------------------------------------------------
// audit
// ---------------------------------------------------------------------------

pub fn cmd_audit(db: &Database, limit: u32, action: Option<&str>) -> Result<()> {
    let entries = match action {
        Some(action) => db.list_audit_log_by_action(action, limit),
        None => db.list_audit_log(limit),
    }
    .context("failed to list audit entries")?;

    if entries.is_empty() {
        println!("No audit log entries found.");
        return Ok(());
    }

    let mut table = new_table(vec!["Timestamp", "Action", "Subject", "Details", "OK"]);
    for entry in &entries {
        table.add_row(vec![
            Cell::new(&entry.created_at),
            Cell::new(&entry.action),
            Cell::new(short_id(entry.subject_id.as_deref().unwrap_or("-"))),
            Cell::new(truncate(entry.details.as_deref().unwrap_or(""), 50)),
            if entry.success {
                Cell::new("yes").fg(Color::Green)
            } else {
                Cell::new("no").fg(Color::Red)
            },
        ]);
    }

    println!("{table}");
    println!();
    println!("{} entries shown", entries.len());
    Ok(())
}

// ---------------------------------------------------------------------------
// Utilities
// ---------------------------------------------------------------------------

/// Resolve a content argument: `@path` reads a file, `-` reads stdin, and
/// anything else is taken literally.
pub fn read_input(arg: &str) -> Result<String> {
    if arg == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("failed to read stdin")?;
        return Ok(buf);
    }
    match arg.strip_prefix('@') {
        Some(path) => {
            std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path))
        }
        None => Ok(arg.to_string()),
    }
}

/// Parse an RFC 3339 timestamp or a bare `YYYY-MM-DD` date.
pub fn parse_time(s: &str) -> Result<DateTime<Utc>> {
    parse_instant(s).ok_or_else(|| {
        anyhow::anyhow!("invalid time '{}': expected RFC 3339 or YYYY-MM-DD", s)
    })
}

pub fn parse_optional_time(s: Option<&str>) -> Result<Option<DateTime<Utc>>> {
    s.map(parse_time).transpose()
}

pub fn format_optional(t: Option<DateTime<Utc>>) -> String {
    t.map(format_instant).unwrap_or_else(|| "-".to_string())
}

pub fn new_table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(header);
    table
}

pub fn edit_cell(kind: &str) -> Cell {
    match kind {
        "insert" => Cell::new(kind).fg(Color::Green),
        "delete" => Cell::new(kind).fg(Color::Red),
        "update" => Cell::new(kind).fg(Color::Yellow),
        _ => Cell::new(kind),
    }
}

/// First block of a UUID, enough to tell rows apart in a table.
pub fn short_id(id: &str) -> &str {
    id.split('-').next().unwrap_or(id)
}

pub fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
