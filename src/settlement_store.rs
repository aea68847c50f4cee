//! In-memory idempotency ledger for settlement.
//!
//! Maps the fingerprint of a transaction envelope to either a pending marker (a
//! settlement is in flight) or the terminal [`SettleResponse`]. Claiming a fingerprint
//! is a single atomic DashMap entry operation, so at most one caller ever holds the
//! right to submit a given envelope.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::types::SettleResponse;

/// SHA-256 of the base64 envelope string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn of(envelope_xdr: &str) -> Self {
        Fingerprint(Sha256::digest(envelope_xdr.as_bytes()).into())
    }
}

impl Display for Fingerprint {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

type Outcome = Option<SettleResponse>;

#[derive(Debug)]
enum SettlementEntry {
    Pending {
        claim_id: u64,
        outcome: watch::Receiver<Outcome>,
    },
    Settled {
        response: SettleResponse,
        settled_at: Instant,
    },
}

/// Result of [`SettlementStore::claim`].
#[derive(Debug)]
pub enum Claim {
    /// The caller owns the fingerprint and must settle it.
    Acquired(SettlementGuard),
    /// Another caller is settling the same fingerprint.
    InFlight(InFlight),
    /// The fingerprint already reached a terminal state.
    Settled(SettleResponse),
}

#[derive(Debug, Clone)]
pub struct SettlementStore {
    entries: Arc<DashMap<Fingerprint, SettlementEntry>>,
    next_claim_id: Arc<AtomicU64>,
    ttl: Duration,
}

impl SettlementStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            next_claim_id: Arc::new(AtomicU64::new(0)),
            ttl,
        }
    }

    /// Atomically looks up `fingerprint`, inserting a pending marker if it is free.
    ///
    /// Terminal results older than the TTL are treated as absent.
    pub fn claim(&self, fingerprint: Fingerprint) -> Claim {
        match self.entries.entry(fingerprint) {
            Entry::Occupied(mut occupied) => {
                match occupied.get() {
                    SettlementEntry::Pending { outcome, .. } => {
                        return Claim::InFlight(InFlight {
                            outcome: outcome.clone(),
                        })
                    }
                    SettlementEntry::Settled {
                        response,
                        settled_at,
                    } if settled_at.elapsed() < self.ttl => {
                        return Claim::Settled(response.clone())
                    }
                    SettlementEntry::Settled { .. } => {}
                }
                let (guard, entry) = self.pending(fingerprint);
                occupied.insert(entry);
                Claim::Acquired(guard)
            }
            Entry::Vacant(vacant) => {
                let (guard, entry) = self.pending(fingerprint);
                vacant.insert(entry);
                Claim::Acquired(guard)
            }
        }
    }

    fn pending(&self, fingerprint: Fingerprint) -> (SettlementGuard, SettlementEntry) {
        let claim_id = self.next_claim_id.fetch_add(1, Ordering::Relaxed);
        let (sender, outcome) = watch::channel(None);
        let guard = SettlementGuard {
            entries: Arc::clone(&self.entries),
            fingerprint,
            claim_id,
            sender,
            completed: false,
        };
        (guard, SettlementEntry::Pending { claim_id, outcome })
    }

    /// Cached terminal result, if any.
    pub fn get(&self, fingerprint: &Fingerprint) -> Option<SettleResponse> {
        match self.entries.get(fingerprint)?.value() {
            SettlementEntry::Settled { response, .. } => Some(response.clone()),
            SettlementEntry::Pending { .. } => None,
        }
    }

    /// Drops terminal results older than the TTL. Pending entries are kept.
    /// Returns the number of entries removed.
    pub fn purge_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| match entry {
            SettlementEntry::Pending { .. } => true,
            SettlementEntry::Settled { settled_at, .. } => settled_at.elapsed() < self.ttl,
        });
        before.saturating_sub(self.entries.len())
    }

    /// Purges expired results every `every` until `cancel` fires.
    pub async fn run_purge(self, every: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let purged = self.purge_expired();
                    if purged > 0 {
                        tracing::debug!(purged, remaining = self.entries.len(), "Purged settlement cache");
                    }
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Exclusive right to settle one fingerprint.
///
/// [`SettlementGuard::complete`] records the terminal result and wakes waiters. Dropping
/// the guard without completing removes the pending marker, so the fingerprint can be
/// claimed again and waiters retry their claim. The coordinator keeps the guard in a
/// task of its own and drops it uncompleted only when nothing was submitted.
#[derive(Debug)]
pub struct SettlementGuard {
    entries: Arc<DashMap<Fingerprint, SettlementEntry>>,
    fingerprint: Fingerprint,
    claim_id: u64,
    sender: watch::Sender<Outcome>,
    completed: bool,
}

impl SettlementGuard {
    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    pub fn complete(mut self, response: SettleResponse) {
        self.entries.insert(
            self.fingerprint,
            SettlementEntry::Settled {
                response: response.clone(),
                settled_at: Instant::now(),
            },
        );
        self.sender.send_replace(Some(response));
        self.completed = true;
    }
}

impl Drop for SettlementGuard {
    fn drop(&mut self) {
        if self.completed {
            return;
        }
        let claim_id = self.claim_id;
        self.entries.remove_if(&self.fingerprint, |_, entry| {
            matches!(entry, SettlementEntry::Pending { claim_id: id, .. } if *id == claim_id)
        });
    }
}

/// Handle on a settlement running in another task.
#[derive(Debug)]
pub struct InFlight {
    outcome: watch::Receiver<Outcome>,
}

impl InFlight {
    /// Waits for the owner to finish. `None` means it gave up without a terminal
    /// result and the caller should claim again.
    pub async fn wait(mut self) -> Option<SettleResponse> {
        match self.outcome.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone(),
            Err(_) => None,
        }
    }
}
