//! Priority-ordered resolution chain.
//!
//! Providers are kept sorted by `(priority, registered_seq)` at registration
//! time, so an attempt is a straight walk down the list. The `manual`
//! provider is always registered and, because it queues the conflict
//! instead of resolving it, ends every walk that reaches it.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::builtin_provider;
use super::manual::Manual;
use super::provider::{ConflictResolutionProvider, ResolutionOutcome, ResolutionRequest};
use crate::clock::{format_instant, Clock, SystemClock};
use crate::db::Database;
use crate::errors::ConflictError;
use crate::models::{ProviderRecord, ResolutionRecord};

/// Provider tag reported when the two versions turn out not to conflict.
pub const NO_CONFLICT: &str = "no-conflict";

/// A provider's position in the chain, as reported by [`ResolutionChain::providers`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderInfo {
    pub name: String,
    pub category: String,
    pub priority: i32,
    pub registered_seq: i64,
}

/// One provider's reason for passing on a conflict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Declined {
    pub provider: String,
    pub reason: String,
}

/// Result of walking the whole chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ChainOutcome {
    Resolved {
        result: String,
        provider: String,
        /// Served from the resolution cache without consulting providers.
        cached: bool,
    },
    CannotResolve {
        reasons: Vec<Declined>,
        /// ID of the pending conflict queued for human review, if any.
        pending_conflict: Option<String>,
    },
}

struct Registered {
    seq: i64,
    provider: Box<dyn ConflictResolutionProvider>,
}

/// Runs registered providers in order until one resolves the conflict.
pub struct ResolutionChain {
    db: Arc<Database>,
    providers: Vec<Registered>,
    cache_resolutions: bool,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for ResolutionChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolutionChain")
            .field(
                "providers",
                &self
                    .providers
                    .iter()
                    .map(|r| r.provider.name())
                    .collect::<Vec<_>>(),
            )
            .field("cache_resolutions", &self.cache_resolutions)
            .finish()
    }
}

impl ResolutionChain {
    /// Create a chain holding only the `manual` provider.
    pub fn new(db: Arc<Database>) -> Result<Self, ConflictError> {
        let mut chain = Self {
            db,
            providers: Vec::new(),
            cache_resolutions: true,
            clock: Arc::new(SystemClock),
        };
        chain.register(Box::new(Manual))?;
        Ok(chain)
    }

    /// Create a chain with the named built-in providers registered in order.
    pub fn with_builtins(db: Arc<Database>, names: &[String]) -> Result<Self, ConflictError> {
        let mut chain = Self::new(db)?;
        for name in names {
            let provider = builtin_provider(name)
                .ok_or_else(|| ConflictError::UnknownProvider(name.clone()))?;
            chain.register(provider)?;
        }
        Ok(chain)
    }

    /// Enable or disable the resolution cache.
    pub fn with_caching(mut self, enabled: bool) -> Self {
        self.cache_resolutions = enabled;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Add a provider, or replace the one already registered under its name.
    ///
    /// A replaced provider keeps its original registration sequence, so
    /// re-registering never reorders providers of equal priority.
    pub fn register(
        &mut self,
        provider: Box<dyn ConflictResolutionProvider>,
    ) -> Result<(), ConflictError> {
        let name = provider.name().to_string();
        let known = self.db.list_providers()?;
        let seq = match known.iter().find(|p| p.name == name) {
            Some(existing) => existing.registered_seq,
            None => known.iter().map(|p| p.registered_seq).max().unwrap_or(0) + 1,
        };

        self.db.upsert_provider(&ProviderRecord {
            name: name.clone(),
            category: provider.category().to_string(),
            priority: provider.priority(),
            registered_seq: seq,
            updated_at: self.clock.now_rfc3339(),
        })?;

        self.providers.retain(|r| r.provider.name() != name);
        self.providers.push(Registered { seq, provider });
        self.providers
            .sort_by_key(|r| (r.provider.priority(), r.seq));

        info!(name = %name, seq, "registered resolution provider");
        Ok(())
    }

    /// Providers in the order they will be consulted.
    pub fn providers(&self) -> Vec<ProviderInfo> {
        self.providers
            .iter()
            .map(|r| ProviderInfo {
                name: r.provider.name().to_string(),
                category: r.provider.category().to_string(),
                priority: r.provider.priority(),
                registered_seq: r.seq,
            })
            .collect()
    }

    /// Try to merge two divergent versions.
    ///
    /// Versions that do not actually conflict (identical, or only one side
    /// changed from `base`) resolve immediately under [`NO_CONFLICT`] and
    /// are neither cached nor queued. A cached result for the same
    /// `(v1, v2, context)` is returned without consulting any provider.
    /// Otherwise the first provider to resolve wins and its result is
    /// cached before returning.
    pub fn attempt_resolve(
        &self,
        v1: &str,
        v2: &str,
        base: Option<&str>,
        context: &str,
    ) -> Result<ChainOutcome, ConflictError> {
        if let Some(result) = detect_no_conflict(v1, v2, base) {
            debug!(context, "versions do not conflict");
            return Ok(ChainOutcome::Resolved {
                result: result.to_string(),
                provider: NO_CONFLICT.to_string(),
                cached: false,
            });
        }

        let request = ResolutionRequest {
            v1,
            v2,
            base,
            context,
            requested_at: self.clock.now(),
        };
        let key = request.cache_key();

        if self.cache_resolutions {
            if let Some(record) = self.db.get_resolution_record(&key)? {
                debug!(key = %key, provider = %record.provider, "resolution cache hit");
                return Ok(ChainOutcome::Resolved {
                    result: record.result,
                    provider: record.provider,
                    cached: true,
                });
            }
        }

        let mut reasons = Vec::new();
        for registered in &self.providers {
            let provider = registered.provider.as_ref();
            match provider.attempt(&request, &self.db)? {
                ResolutionOutcome::Resolved { result } => {
                    info!(provider = provider.name(), context, "conflict resolved");
                    if self.cache_resolutions {
                        self.db.upsert_resolution_record(&ResolutionRecord {
                            key: key.clone(),
                            v1: v1.to_string(),
                            v2: v2.to_string(),
                            base: base.map(str::to_string),
                            context: context.to_string(),
                            result: result.clone(),
                            provider: provider.name().to_string(),
                            resolved_at: format_instant(request.requested_at),
                        })?;
                    }
                    self.db.record_audit(
                        "conflict.resolve",
                        Some(&key),
                        Some(&format!("provider={} context={}", provider.name(), context)),
                        true,
                    );
                    return Ok(ChainOutcome::Resolved {
                        result,
                        provider: provider.name().to_string(),
                        cached: false,
                    });
                }
                ResolutionOutcome::CannotResolve {
                    reason,
                    pending_conflict,
                } => {
                    debug!(provider = provider.name(), reason = %reason, "provider declined");
                    reasons.push(Declined {
                        provider: provider.name().to_string(),
                        reason,
                    });
                    if let Some(id) = pending_conflict {
                        self.db.record_audit(
                            "conflict.queue",
                            Some(&id),
                            Some(&format!("context={}", context)),
                            true,
                        );
                        return Ok(ChainOutcome::CannotResolve {
                            reasons,
                            pending_conflict: Some(id),
                        });
                    }
                }
            }
        }

        Ok(ChainOutcome::CannotResolve {
            reasons,
            pending_conflict: None,
        })
    }
}

/// The settled content when `v1` and `v2` do not really diverge.
fn detect_no_conflict<'a>(v1: &'a str, v2: &'a str, base: Option<&str>) -> Option<&'a str> {
    if v1 == v2 {
        return Some(v1);
    }
    match base {
        Some(b) if v1 == b => Some(v2),
        Some(b) if v2 == b => Some(v1),
        _ => None,
    }
}
