//! Conflict resolution for divergent versions of the same content.
//!
//! The conflict subsystem is responsible for:
//! 1. **Providers** -- pluggable merge strategies behind
//!    [`ConflictResolutionProvider`] (`lww`, `add-wins`, `manual`).
//! 2. **Chain** -- running providers in priority order, caching successes.
//! 3. **Review** -- settling conflicts the `manual` provider queued.

pub mod add_wins;
pub mod chain;
pub mod lww;
pub mod manual;
pub mod provider;
pub mod review;

pub use add_wins::AddWins;
pub use chain::{ChainOutcome, Declined, ProviderInfo, ResolutionChain, NO_CONFLICT};
pub use lww::LastWriterWins;
pub use manual::Manual;
pub use provider::{
    ConflictResolutionProvider, ResolutionOutcome, ResolutionRequest, PROVIDER_CATEGORY,
};
pub use review::ConflictReview;

/// Names accepted by [`builtin_provider`].
pub const BUILTIN_PROVIDERS: &[&str] = &[lww::LWW_NAME, add_wins::ADD_WINS_NAME, manual::MANUAL_NAME];

/// Look up a built-in provider by name.
pub fn builtin_provider(name: &str) -> Option<Box<dyn ConflictResolutionProvider>> {
    match name {
        lww::LWW_NAME => Some(Box::new(LastWriterWins)),
        add_wins::ADD_WINS_NAME => Some(Box::new(AddWins)),
        manual::MANUAL_NAME => Some(Box::new(Manual)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_lookup() {
        for name in BUILTIN_PROVIDERS {
            let provider = builtin_provider(name).unwrap();
            assert_eq!(provider.name(), *name);
            assert_eq!(provider.category(), PROVIDER_CATEGORY);
        }
        assert!(builtin_provider("multi-value").is_none());
    }

    #[test]
    fn test_builtin_priorities() {
        let priorities: Vec<i32> = BUILTIN_PROVIDERS
            .iter()
            .filter_map(|n| builtin_provider(n))
            .map(|p| p.priority())
            .collect();
        assert_eq!(priorities, vec![10, 20, 99]);
    }
}
