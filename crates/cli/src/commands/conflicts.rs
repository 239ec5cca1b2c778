//! `concord resolve` and `concord conflicts ...`

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Subcommand;
use comfy_table::{Cell, Color};

use concord_core::config::AppConfig;
use concord_core::conflict::{ChainOutcome, ConflictReview, ResolutionChain};
use concord_core::db::Database;
use concord_core::models::PendingStatus;

use super::{new_table, read_input, short_id, truncate};

#[derive(Subcommand, Debug)]
pub enum ConflictsAction {
    /// List queued conflicts.
    List {
        /// Filter by status: pending, deferred, resolved.
        #[arg(short, long)]
        status: Option<String>,

        /// Number of results.
        #[arg(long, default_value = "20")]
        limit: u32,
    },
    /// Show details of a specific conflict.
    Show {
        /// Conflict ID.
        id: String,
    },
    /// Resolve a conflict with one of its candidates.
    Accept {
        /// Conflict ID.
        id: String,

        /// 0-based candidate index, as listed by `show`.
        #[arg(long)]
        candidate: usize,

        #[arg(long, default_value = "cli")]
        by: String,
    },
    /// Resolve a conflict with hand-written content.
    AcceptCustom {
        /// Conflict ID.
        id: String,

        /// Resolved content (`@file`, `-` for stdin, or literal text).
        content: String,

        #[arg(long, default_value = "cli")]
        by: String,
    },
    /// Postpone a decision.
    Defer {
        /// Conflict ID.
        id: String,

        #[arg(long, default_value = "cli")]
        by: String,
    },
}

pub fn cmd_resolve(
    db: Arc<Database>,
    config: &AppConfig,
    v1: &str,
    v2: &str,
    base: Option<&str>,
    context: &str,
) -> Result<()> {
    let v1 = read_input(v1)?;
    let v2 = read_input(v2)?;
    let base = base.map(read_input).transpose()?;

    let chain = ResolutionChain::with_builtins(db, &config.resolution.providers)
        .context("failed to build resolution chain")?
        .with_caching(config.resolution.cache_resolutions);

    let outcome = chain
        .attempt_resolve(&v1, &v2, base.as_deref(), context)
        .context("resolution failed")?;

    match outcome {
        ChainOutcome::Resolved {
            result,
            provider,
            cached,
        } => {
            eprintln!(
                "Resolved by {}{}",
                provider,
                if cached { " (cached)" } else { "" }
            );
            println!("{}", result);
        }
        ChainOutcome::CannotResolve {
            reasons,
            pending_conflict,
        } => {
            println!("Could not resolve automatically:");
            for declined in &reasons {
                println!("  {:<10} {}", declined.provider, declined.reason);
            }
            if let Some(id) = pending_conflict {
                println!();
                println!("Queued for review as {}", id);
                println!("  Inspect with: concord conflicts show {}", id);
            }
        }
    }

    Ok(())
}

pub fn run(db: Arc<Database>, config: &AppConfig, action: ConflictsAction) -> Result<()> {
    let review = ConflictReview::new(db).with_caching(config.resolution.cache_resolutions);

    match action {
        ConflictsAction::List { status, limit } => {
            let status = status.as_deref().map(parse_status).transpose()?;
            let conflicts = review
                .list(status, limit)
                .context("failed to list conflicts")?;

            if conflicts.is_empty() {
                println!("No conflicts found.");
                return Ok(());
            }

            let mut table = new_table(vec!["ID", "Status", "Context", "Candidates", "Created"]);
            for c in &conflicts {
                let status = match c.status {
                    PendingStatus::Pending => Cell::new(c.status).fg(Color::Yellow),
                    PendingStatus::Deferred => Cell::new(c.status),
                    PendingStatus::Resolved => Cell::new(c.status).fg(Color::Green),
                };
                table.add_row(vec![
                    Cell::new(short_id(&c.id)),
                    status,
                    Cell::new(truncate(&c.context, 38)),
                    Cell::new(c.candidates.len()),
                    Cell::new(&c.created_at),
                ]);
            }

            println!("{table}");
            println!();
            println!("{} conflict(s) shown", conflicts.len());
        }

        ConflictsAction::Show { id } => {
            let conflict = review
                .get(&id)
                .with_context(|| format!("failed to load conflict {}", id))?;

            println!("Conflict: {}", conflict.id);
            println!("==========={}", "=".repeat(conflict.id.len()));
            println!();
            println!("  Context      : {}", conflict.context);
            println!("  Status       : {}", conflict.status);
            println!("  Created at   : {}", conflict.created_at);

            if let Some(ref resolution) = conflict.resolution {
                println!("  Resolution   : {}", truncate(resolution, 60));
                println!(
                    "  Resolved at  : {}",
                    conflict.resolved_at.as_deref().unwrap_or("-")
                );
                println!(
                    "  Resolved by  : {}",
                    conflict.resolved_by.as_deref().unwrap_or("-")
                );
            }

            for (index, candidate) in conflict.candidates.iter().enumerate() {
                println!();
                println!("Candidate {} ({} bytes):", index, candidate.len());
                println!("{}", "-".repeat(40));
                println!("{}", preview(candidate));
            }
        }

        ConflictsAction::Accept { id, candidate, by } => {
            review
                .accept_candidate(&id, candidate, &by)
                .context("failed to resolve conflict")?;
            println!("Conflict {} resolved (accepted candidate {})", id, candidate);
        }

        ConflictsAction::AcceptCustom { id, content, by } => {
            let content = read_input(&content)?;
            review
                .accept_custom(&id, &content, &by)
                .context("failed to resolve conflict")?;
            println!("Conflict {} resolved with custom content", id);
        }

        ConflictsAction::Defer { id, by } => {
            review.defer(&id, &by).context("failed to defer conflict")?;
            println!("Conflict {} deferred", id);
        }
    }

    Ok(())
}

fn parse_status(s: &str) -> Result<PendingStatus> {
    match s {
        "pending" => Ok(PendingStatus::Pending),
        "deferred" => Ok(PendingStatus::Deferred),
        "resolved" => Ok(PendingStatus::Resolved),
        other => anyhow::bail!(
            "invalid status '{}': use pending, deferred or resolved",
            other
        ),
    }
}

fn preview(content: &str) -> String {
    if content.chars().count() > 1000 {
        let head: String = content.chars().take(1000).collect();
        format!("{}...\n[truncated, {} bytes total]", head, content.len())
    } else {
        content.to_string()
    }
}
