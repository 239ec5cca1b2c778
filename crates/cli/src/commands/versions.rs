//! `concord versions ...`

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Subcommand;
use comfy_table::{Cell, Color};

use concord_core::clock::format_instant;
use concord_core::db::Database;
use concord_core::models::TemporalVersion;
use concord_core::temporal::{TimeQuery, ValidInterval, VersionStore};

use super::{format_optional, new_table, parse_optional_time, parse_time, short_id};

#[derive(Subcommand, Debug)]
pub enum VersionsAction {
    /// Record a new current version.
    Record {
        /// Content hash of the version.
        content_hash: String,

        /// Free-form metadata stored with the version.
        #[arg(long, default_value = "{}")]
        metadata: String,

        /// Start of the valid interval (RFC 3339 or YYYY-MM-DD).
        #[arg(long)]
        valid_from: Option<String>,

        /// End of the valid interval, inclusive.
        #[arg(long)]
        valid_to: Option<String>,
    },
    /// Show the current version.
    Current,
    /// Show the version visible at an instant.
    AsOf {
        /// Look up by system time: what the store believed then.
        #[arg(long, conflicts_with = "valid", required_unless_present = "valid")]
        system: Option<String>,

        /// Look up by valid time: what was true then, as currently known.
        #[arg(long)]
        valid: Option<String>,
    },
    /// List versions whose interval overlaps a range.
    Between {
        start: String,
        end: String,

        /// Time axis: system or valid.
        #[arg(long, default_value = "valid")]
        dimension: String,
    },
    /// Record a correction of an earlier version.
    Supersede {
        /// ID of the version being corrected.
        id: String,

        /// Content hash of the correction.
        content_hash: String,

        /// Override the inherited valid interval start.
        #[arg(long)]
        valid_from: Option<String>,

        /// Override the inherited valid interval end.
        #[arg(long)]
        valid_to: Option<String>,
    },
    /// List every version of the store, oldest first.
    History,
    /// List all stores that have versions.
    Stores,
}

pub fn run(db: Arc<Database>, store_name: &str, action: VersionsAction) -> Result<()> {
    let store = VersionStore::new(db.clone(), store_name);

    match action {
        VersionsAction::Record {
            content_hash,
            metadata,
            valid_from,
            valid_to,
        } => {
            let valid = ValidInterval::new(
                parse_optional_time(valid_from.as_deref())?,
                parse_optional_time(valid_to.as_deref())?,
            )?;
            let id = store
                .record(&content_hash, &metadata, valid)
                .context("failed to record version")?;
            println!("{}", id);
        }

        VersionsAction::Current => match store.current().context("failed to read current version")? {
            Some(version) => print_version(&version),
            None => println!("Store '{}' has no versions.", store_name),
        },

        VersionsAction::AsOf { system, valid } => {
            let query = match (system, valid) {
                (Some(t), _) => TimeQuery::System(parse_time(&t)?),
                (None, Some(t)) => TimeQuery::Valid(parse_time(&t)?),
                (None, None) => anyhow::bail!("one of --system or --valid is required"),
            };
            let version = store.as_of(query).context("lookup failed")?;
            print_version(&version);
        }

        VersionsAction::Between {
            start,
            end,
            dimension,
        } => {
            let versions = store
                .between(parse_time(&start)?, parse_time(&end)?, &dimension)
                .context("range lookup failed")?;
            print_versions(store_name, &versions);
        }

        VersionsAction::Supersede {
            id,
            content_hash,
            valid_from,
            valid_to,
        } => {
            let valid_override = if valid_from.is_some() || valid_to.is_some() {
                Some(ValidInterval::new(
                    parse_optional_time(valid_from.as_deref())?,
                    parse_optional_time(valid_to.as_deref())?,
                )?)
            } else {
                None
            };
            let new_id = store
                .supersede(&id, &content_hash, valid_override)
                .with_context(|| format!("failed to supersede version {}", id))?;
            println!("{}", new_id);
        }

        VersionsAction::History => {
            let versions = store.history().context("failed to read history")?;
            print_versions(store_name, &versions);
        }

        VersionsAction::Stores => {
            let stores = db.list_temporal_stores().context("failed to list stores")?;
            if stores.is_empty() {
                println!("No stores found.");
            }
            for name in stores {
                println!("{}", name);
            }
        }
    }

    Ok(())
}

fn print_version(v: &TemporalVersion) {
    println!("Version: {}", v.id);
    println!("========={}", "=".repeat(v.id.len()));
    println!();
    println!("  Store        : {}", v.store);
    println!("  Content hash : {}", v.content_hash);
    println!("  Metadata     : {}", v.metadata);
    println!("  Valid from   : {}", format_optional(v.valid_from));
    println!("  Valid to     : {}", format_optional(v.valid_to));
    println!("  System from  : {}", format_instant(v.system_from));
    println!("  System to    : {}", format_optional(v.system_to));
    if let Some(ref superseded) = v.supersedes {
        println!("  Supersedes   : {}", superseded);
    }
}

fn print_versions(store_name: &str, versions: &[TemporalVersion]) {
    if versions.is_empty() {
        println!("No versions of '{}' found.", store_name);
        return;
    }

    let mut table = new_table(vec![
        "ID",
        "Hash",
        "Valid from",
        "Valid to",
        "System from",
        "System to",
        "Supersedes",
    ]);
    for v in versions {
        let system_to = if v.is_open() {
            Cell::new("current").fg(Color::Green)
        } else {
            Cell::new(format_optional(v.system_to))
        };
        table.add_row(vec![
            Cell::new(short_id(&v.id)),
            Cell::new(&v.content_hash),
            Cell::new(format_optional(v.valid_from)),
            Cell::new(format_optional(v.valid_to)),
            Cell::new(format_instant(v.system_from)),
            system_to,
            Cell::new(v.supersedes.as_deref().map(short_id).unwrap_or("-")),
        ]);
    }

    println!("{table}");
    println!();
    println!("{} version(s) shown", versions.len());
}
