//! End-to-end tests for replica convergence.
//!
//! These tests drive the public engines against a real on-disk SQLite
//! database in a temporary directory:
//! - patches diffed, inverted, composed and commuted
//! - divergent versions settled by the resolution chain and manual review
//! - a version store queried along both time axes
//!
//! Time-sensitive paths use a `FixedClock` so results are deterministic.

use std::sync::Arc;

use serde_json::json;
use tempfile::TempDir;

use concord_core::clock::{parse_instant, FixedClock};
use concord_core::config::AppConfig;
use concord_core::conflict::{ChainOutcome, ConflictReview, ResolutionChain, NO_CONFLICT};
use concord_core::db::Database;
use concord_core::errors::{ConflictError, PatchError, TemporalError};
use concord_core::models::PendingStatus;
use concord_core::patch::PatchEngine;
use concord_core::temporal::{TimeQuery, ValidInterval, VersionStore};
use concord_core::tree_diff::{self, TreeDiff};

// ===========================================================================
// Helpers
// ===========================================================================

fn open_db(dir: &TempDir) -> Arc<Database> {
    let db = Database::new(dir.path().join("data").join("concord.db")).expect("open database");
    db.initialize().expect("run migrations");
    Arc::new(db)
}

fn lines(content: &str) -> Vec<&str> {
    content.lines().collect()
}

// ===========================================================================
// Patches
// ===========================================================================

#[test]
fn test_patch_lifecycle_on_disk() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir);
    let engine = PatchEngine::new(db.clone());

    let v1 = "title\nintro\nbody\noutro";
    let v2 = "title\nintro\nnew body\noutro";
    let v3 = "title\nintro\nnew body\noutro\nappendix";

    let p1 = engine.create_from_contents("v1", "v2", v1, v2).unwrap();
    let p2 = engine.create_from_contents("v2", "v3", v2, v3).unwrap();

    // Inversion restores the original.
    let forward = engine.apply(&p1, v1).unwrap();
    assert_eq!(lines(&forward), lines(v2));
    let inverse = engine.invert(&p1).unwrap();
    assert_eq!(lines(&engine.apply(&inverse, &forward).unwrap()), lines(v1));

    // Composition equals sequential application.
    let composed = engine.compose(&p1, &p2).unwrap();
    let stepwise = engine.apply(&p2, &engine.apply(&p1, v1).unwrap()).unwrap();
    assert_eq!(engine.apply(&composed, v1).unwrap(), stepwise);
    assert_eq!(lines(&stepwise), lines(v3));

    // Non-sequential composition is refused.
    assert!(matches!(
        engine.compose(&p2, &p1),
        Err(PatchError::NonSequential { .. })
    ));

    // A patch does not apply to content it was not made for.
    assert!(matches!(
        engine.apply(&p1, "something\nelse"),
        Err(PatchError::IncompatibleContent { .. })
    ));

    // Everything survives a reopen.
    drop(engine);
    drop(db);
    let reopened = open_db(&dir);
    let patches = PatchEngine::new(reopened.clone()).list(100).unwrap();
    assert_eq!(patches.len(), 4);
    assert!(reopened.list_audit_log_by_action("patch.diff", 10).unwrap().len() == 2);
}

#[test]
fn test_commuted_patches_converge() {
    let dir = TempDir::new().unwrap();
    let engine = PatchEngine::new(open_db(&dir));

    let base = "a\nb\nc\nd\ne";
    let ours = engine
        .create_from_contents("base", "ours", base, "a\nB\nc\nd\ne")
        .unwrap();
    let theirs = engine
        .create_from_contents("base", "theirs", base, "a\nb\nc\nd\nE")
        .unwrap();

    let pair = engine.commute(&ours, &theirs).unwrap();
    assert_eq!(pair.first.target, pair.second.target);

    let ours_first = engine
        .apply(&pair.second.id, &engine.apply(&ours, base).unwrap())
        .unwrap();
    let theirs_first = engine
        .apply(&pair.first.id, &engine.apply(&theirs, base).unwrap())
        .unwrap();
    assert_eq!(ours_first, theirs_first);
    assert_eq!(lines(&ours_first), vec!["a", "B", "c", "d", "E"]);
}

#[test]
fn test_overlapping_patches_do_not_commute() {
    let dir = TempDir::new().unwrap();
    let engine = PatchEngine::new(open_db(&dir));

    let base = "a\nb\nc";
    let edit = engine
        .create_from_contents("base", "edit", base, "a\nB\nc")
        .unwrap();
    let removal = engine
        .create_from_contents("base", "removal", base, "a\nc")
        .unwrap();

    assert!(matches!(
        engine.commute(&edit, &removal),
        Err(PatchError::CannotCommute(_))
    ));
}

// ===========================================================================
// Tree diff
// ===========================================================================

#[test]
fn test_tree_diff_replays_structural_changes() {
    let before = json!({
        "name": "inventory",
        "items": [{"sku": "a1", "qty": 3}, {"sku": "b2", "qty": 1}],
        "tags": ["x"]
    });
    let after = json!({
        "name": "inventory",
        "items": [{"sku": "a1", "qty": 4}],
        "tags": ["x", "y"],
        "owner": "ops"
    });

    let diff = TreeDiff::compute(
        before.to_string().as_bytes(),
        after.to_string().as_bytes(),
    )
    .unwrap();
    assert!(!diff.is_identical());
    assert_eq!(tree_diff::apply(&before, &diff.edits).unwrap(), after);
}

// ===========================================================================
// Conflict resolution
// ===========================================================================

#[test]
fn test_chain_from_config_resolves_and_queues() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir);
    let config = AppConfig::default();
    let clock = Arc::new(FixedClock::at_millis(1_704_067_200_000));

    let chain = ResolutionChain::with_builtins(db.clone(), &config.resolution.providers)
        .unwrap()
        .with_caching(config.resolution.cache_resolutions)
        .with_clock(clock.clone());
    let names: Vec<String> = chain.providers().into_iter().map(|p| p.name).collect();
    assert_eq!(names, vec!["lww", "add-wins", "manual"]);

    // Timestamped payloads go to LWW.
    let older = json!({"_ts": 1000, "title": "draft"}).to_string();
    let newer = json!({"_ts": 2000, "title": "final"}).to_string();
    match chain.attempt_resolve(&older, &newer, None, "doc/title").unwrap() {
        ChainOutcome::Resolved { result, provider, cached } => {
            assert_eq!(result, newer);
            assert_eq!(provider, "lww");
            assert!(!cached);
        }
        other => panic!("expected resolution, got {:?}", other),
    }

    // Sets go to add-wins, with a concurrent removal losing to a concurrent add.
    let outcome = chain
        .attempt_resolve(r#"["a","b"]"#, r#"["a","b","c","d"]"#, Some(r#"["a","b","c"]"#), "tags")
        .unwrap();
    let ChainOutcome::Resolved { result, provider, .. } = outcome else {
        panic!("expected resolution");
    };
    assert_eq!(provider, "add-wins");
    let merged: Vec<String> = serde_json::from_str(&result).unwrap();
    assert!(merged.contains(&"c".to_string()));

    // A change on one side only is not a conflict at all.
    let outcome = chain
        .attempt_resolve(r#"["a"]"#, r#"["a","b"]"#, Some(r#"["a"]"#), "tags")
        .unwrap();
    assert!(matches!(outcome, ChainOutcome::Resolved { ref provider, ref result, .. }
        if provider == NO_CONFLICT && result == r#"["a","b"]"#));

    // Anything else is queued for review.
    let outcome = chain
        .attempt_resolve("left text", "right text", None, "doc/body")
        .unwrap();
    let ChainOutcome::CannotResolve { reasons, pending_conflict } = outcome else {
        panic!("expected the conflict to be queued");
    };
    assert_eq!(reasons.len(), 3);
    assert_eq!(reasons[2].provider, "manual");
    let pending_id = pending_conflict.expect("manual provider queues the conflict");

    let review = ConflictReview::new(db.clone()).with_clock(clock);
    let queued = review.list(Some(PendingStatus::Pending), 10).unwrap();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].id, pending_id);

    let accepted = review.accept_candidate(&pending_id, 1, "alice").unwrap();
    assert_eq!(accepted, "right text");
    assert_eq!(review.get(&pending_id).unwrap().status, PendingStatus::Resolved);
    assert!(matches!(
        review.accept_custom(&pending_id, "again", "bob"),
        Err(ConflictError::AlreadyResolved(_))
    ));

    // The human decision is reused for the same conflict.
    match chain
        .attempt_resolve("left text", "right text", None, "doc/body")
        .unwrap()
    {
        ChainOutcome::Resolved { result, provider, cached } => {
            assert_eq!(result, "right text");
            assert_eq!(provider, "manual");
            assert!(cached);
        }
        other => panic!("expected cached resolution, got {:?}", other),
    }
}

#[test]
fn test_provider_registrations_persist_across_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let db = open_db(&dir);
        ResolutionChain::with_builtins(db, &["add-wins".to_string()]).unwrap();
    }

    let db = open_db(&dir);
    let chain = ResolutionChain::with_builtins(db.clone(), &["add-wins".to_string()]).unwrap();
    assert_eq!(chain.providers().len(), 2);
    assert_eq!(db.list_providers().unwrap().len(), 2);
}

// ===========================================================================
// Bitemporal versions
// ===========================================================================

#[test]
fn test_version_store_time_travel() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir);
    let clock = Arc::new(FixedClock::at_millis(1_735_689_600_000));
    let store = VersionStore::new(db.clone(), "pricing").with_clock(clock.clone());

    assert!(store.current().unwrap().is_none());

    let first_half = ValidInterval::new(
        parse_instant("2024-01-01"),
        parse_instant("2024-06-30"),
    )
    .unwrap();
    let second_half = ValidInterval::new(
        parse_instant("2024-07-01"),
        parse_instant("2024-12-31"),
    )
    .unwrap();

    let h1 = store.record("h1", "{}", first_half).unwrap();
    let recorded_h1 = store.get(&h1).unwrap().system_from;
    clock.advance_millis(1_000);
    let h2 = store.record("h2", "{}", second_half).unwrap();

    assert!(store.get(&h1).unwrap().system_to.is_some());
    assert_eq!(store.current().unwrap().unwrap().id, h2);

    let march = parse_instant("2024-03-15").unwrap();
    let august = parse_instant("2024-08-01").unwrap();
    assert_eq!(store.as_of(TimeQuery::Valid(march)).unwrap().content_hash, "h1");
    assert_eq!(store.as_of(TimeQuery::Valid(august)).unwrap().content_hash, "h2");
    assert_eq!(
        store.as_of(TimeQuery::System(recorded_h1)).unwrap().id,
        h1
    );
    assert!(matches!(
        store.as_of(TimeQuery::System(parse_instant("2000-01-01").unwrap())),
        Err(TemporalError::NotFound(_))
    ));

    // Correct h1: exactly one version stays open and the interval carries over.
    clock.advance_millis(1_000);
    let fixed = store.supersede(&h1, "h1-fixed", None).unwrap();
    let history = store.history().unwrap();
    assert_eq!(history.len(), 3);
    assert_eq!(history.iter().filter(|v| v.is_open()).count(), 1);
    let correction = store.get(&fixed).unwrap();
    assert!(correction.is_open());
    assert_eq!(correction.supersedes.as_deref(), Some(h1.as_str()));
    assert_eq!(correction.valid_from, first_half.from);
    assert_eq!(correction.valid_to, first_half.to);
    assert_eq!(
        store.as_of(TimeQuery::Valid(march)).unwrap().content_hash,
        "h1-fixed"
    );

    let year_start = parse_instant("2024-01-01").unwrap();
    let year_end = parse_instant("2024-12-31").unwrap();
    assert_eq!(store.between(year_start, year_end, "valid").unwrap().len(), 3);
    assert!(matches!(
        store.between(year_start, year_end, "bad"),
        Err(TemporalError::InvalidDimension(_))
    ));

    assert_eq!(db.list_temporal_stores().unwrap(), vec!["pricing"]);
}
