//! Nonce caching for transaction submission without a round-trip per send
//!
//! Handles:
//! - Local per-account nonce tracking
//! - Atomic allocation before any network call
//! - Returning a claimed nonce after a failed dispatch

use dashmap::DashMap;
use ethers::types::Address;
use tracing::{debug, warn};

/// Per-account nonce counters.
///
/// Each entry holds the last nonce handed out for an account, `0` meaning
/// unknown. Every operation runs under the entry's shard lock, so concurrent
/// increments and decrements on one account never lose an update, and
/// accounts in different shards never contend.
///
/// The cache is never seeded from the chain on its own. Callers that know
/// the account's pending nonce should [`set`](Self::set) it first.
#[derive(Debug, Default)]
pub struct NonceCache {
    entries: DashMap<Address, u64>,
}

impl NonceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last recorded nonce, or `0` when the account was never seen
    pub fn get(&self, account: &Address) -> u64 {
        self.entries.get(account).map(|n| *n).unwrap_or(0)
    }

    /// Overwrite the stored nonce
    pub fn set(&self, account: Address, nonce: u64) {
        self.entries.insert(account, nonce);
        debug!("Nonce for {:?} set to {}", account, nonce);
    }

    /// Allocate the next nonce. An unknown account starts at 1.
    ///
    /// Wraps to 0 after `u64::MAX`. EIP-2681 caps valid nonces below that
    /// value, so only a bogus [`set`](Self::set) reaches it.
    pub fn increment(&self, account: Address) -> u64 {
        let mut entry = self.entries.entry(account).or_insert(0);
        *entry = entry.wrapping_add(1);
        let nonce = *entry;
        drop(entry);

        if nonce == 0 {
            warn!("Nonce for {:?} wrapped past u64::MAX", account);
        }
        crate::metrics::record_nonce_allocated();
        debug!("Allocated nonce {} for {:?}", nonce, account);
        nonce
    }

    /// Step the counter back by one, saturating at zero
    pub fn decrement(&self, account: Address) -> u64 {
        let mut entry = self.entries.entry(account).or_insert(0);
        *entry = entry.saturating_sub(1);
        *entry
    }

    /// Return `nonce` to the pool if it is still the latest allocation.
    ///
    /// A plain [`decrement`](Self::decrement) after a concurrent allocation
    /// would hand the other caller's nonce out twice. This only steps back
    /// when no allocation happened in between and otherwise leaves the gap
    /// in place, reporting `false`.
    pub fn release(&self, account: Address, nonce: u64) -> bool {
        let mut entry = self.entries.entry(account).or_insert(0);
        let released = *entry == nonce && nonce > 0;
        if released {
            *entry -= 1;
        }
        let current = *entry;
        drop(entry);

        crate::metrics::record_nonce_rollback(released);
        if released {
            debug!("Released nonce {} for {:?}", nonce, account);
        } else {
            warn!(
                "Cannot release nonce {} for {:?}: cache moved on to {}, leaving a gap",
                nonce, account, current
            );
        }
        released
    }

    /// Number of accounts with a recorded nonce
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
