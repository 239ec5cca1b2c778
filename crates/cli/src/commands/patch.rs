//! `concord patch ...`

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Subcommand;
use comfy_table::Cell;

use concord_core::db::Database;
use concord_core::edit::encode_effect;
use concord_core::models::Patch;
use concord_core::patch::PatchEngine;

use super::{edit_cell, new_table, read_input, short_id, truncate};

#[derive(Subcommand, Debug)]
pub enum PatchAction {
    /// Store a patch from a JSON edit script.
    Create {
        /// Label of the version the patch applies to.
        #[arg(long)]
        base: String,
        /// Label of the version the patch produces.
        #[arg(long)]
        target: String,
        /// Edit script (`@file`, `-` for stdin, or literal JSON).
        effect: String,
    },
    /// Store a patch computed by diffing two texts.
    Diff {
        #[arg(long)]
        base: String,
        #[arg(long)]
        target: String,
        /// Old content (`@file`, `-` for stdin, or literal text).
        old: String,
        /// New content (`@file`, `-` for stdin, or literal text).
        new: String,
    },
    /// Apply a patch and print the result.
    Apply {
        /// Patch ID.
        id: String,
        /// Content to patch (`@file`, `-` for stdin, or literal text).
        content: String,
    },
    /// Store the inverse of a patch.
    Invert {
        id: String,
    },
    /// Store the composition of two sequential patches.
    Compose {
        first: String,
        second: String,
    },
    /// Reorder two independent patches that share a base.
    Commute {
        first: String,
        second: String,
    },
    /// Show a patch and its edit script.
    Show {
        id: String,

        /// Print the edit script as JSON instead of a table.
        #[arg(long)]
        json: bool,
    },
    /// List stored patches, newest first.
    List {
        #[arg(long, default_value = "20")]
        limit: u32,
    },
}

pub fn run(db: Arc<Database>, action: PatchAction) -> Result<()> {
    let engine = PatchEngine::new(db);

    match action {
        PatchAction::Create {
            base,
            target,
            effect,
        } => {
            let effect = read_input(&effect)?;
            let id = engine
                .create(&base, &target, &effect)
                .context("failed to create patch")?;
            println!("{}", id);
        }
        PatchAction::Diff {
            base,
            target,
            old,
            new,
        } => {
            let old = read_input(&old)?;
            let new = read_input(&new)?;
            let id = engine
                .create_from_contents(&base, &target, &old, &new)
                .context("failed to create patch from contents")?;
            println!("{}", id);
        }
        PatchAction::Apply { id, content } => {
            let content = read_input(&content)?;
            let result = engine
                .apply(&id, &content)
                .with_context(|| format!("failed to apply patch {}", id))?;
            println!("{}", result);
        }
        PatchAction::Invert { id } => {
            let inverse = engine
                .invert(&id)
                .with_context(|| format!("failed to invert patch {}", id))?;
            println!("{}", inverse);
        }
        PatchAction::Compose { first, second } => {
            let composed = engine
                .compose(&first, &second)
                .context("failed to compose patches")?;
            println!("{}", composed);
        }
        PatchAction::Commute { first, second } => {
            let pair = engine
                .commute(&first, &second)
                .context("failed to commute patches")?;
            println!("first' : {} ({} -> {})", pair.first.id, pair.first.base, pair.first.target);
            println!("second': {} ({} -> {})", pair.second.id, pair.second.base, pair.second.target);
        }
        PatchAction::Show { id, json } => {
            let patch = engine
                .get(&id)
                .with_context(|| format!("failed to load patch {}", id))?;
            if json {
                println!(
                    "{}",
                    encode_effect(&patch.effect).context("failed to encode edit script")?
                );
            } else {
                print_patch(&patch);
            }
        }
        PatchAction::List { limit } => {
            let patches = engine.list(limit).context("failed to list patches")?;
            if patches.is_empty() {
                println!("No patches found.");
                return Ok(());
            }

            let mut table = new_table(vec!["ID", "Base", "Target", "Ops", "Changes", "Created"]);
            for p in &patches {
                table.add_row(vec![
                    Cell::new(short_id(&p.id)),
                    Cell::new(&p.base),
                    Cell::new(&p.target),
                    Cell::new(p.effect.len()),
                    Cell::new(p.effect.iter().filter(|op| op.is_modification()).count()),
                    Cell::new(&p.created_at),
                ]);
            }
            println!("{table}");
            println!();
            println!("{} patch(es) shown", patches.len());
        }
    }

    Ok(())
}

fn print_patch(patch: &Patch) {
    println!("Patch: {}", patch.id);
    println!("======={}", "=".repeat(patch.id.len()));
    println!();
    println!("  Base        : {}", patch.base);
    println!("  Target      : {}", patch.target);
    println!("  Created at  : {}", patch.created_at);
    if !patch.dependencies.is_empty() {
        println!("  Depends on  : {}", patch.dependencies.join(", "));
    }
    println!();

    let mut table = new_table(vec!["Op", "Pos", "Content"]);
    for op in &patch.effect {
        table.add_row(vec![
            edit_cell(op.kind()),
            Cell::new(op.pos()),
            Cell::new(truncate(op.content(), 60)),
        ]);
    }
    println!("{table}");
}
