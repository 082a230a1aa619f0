//! Address book: known addresses, their state, and their quality score.
//!
//! The book is consulted both when picking an outbound connection target
//! (highest score first) and when answering discovery requests (a random
//! sample). Blacklisted addresses stay in the book forever but are never
//! returned by the sampler.

use crate::{NetworkError, NetworkResult};
use parking_lot::Mutex;
use rand::seq::SliceRandom;
use std::collections::HashMap;
use tracing::debug;

/// Connection state of a book entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    /// Known but not connected; eligible for selection.
    Idle,
    /// Currently connected; excluded from selection.
    Active,
    /// Permanently excluded.
    Blacklisted,
}

/// Restricts which entries a sample may return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFilter {
    /// Any non-blacklisted entry.
    Any,
    /// Entries whose active flag matches: `IsActive(false)` selects idle
    /// entries, `IsActive(true)` selects connected ones.
    IsActive(bool),
}

impl AddressFilter {
    fn matches(&self, state: EntryState) -> bool {
        match self {
            AddressFilter::Any => true,
            AddressFilter::IsActive(active) => (state == EntryState::Active) == *active,
        }
    }
}

/// Orders the entries of a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleSort {
    /// Highest score first.
    ByPriority,
    /// Uniform shuffle.
    Random,
}

/// Directory of known peer addresses.
pub trait Book: Send + Sync + 'static {
    /// Add an address as an idle entry. No effect if already known,
    /// blacklisted or not.
    fn add(&self, addr: &str);

    /// Permanently exclude an address from selection.
    fn blacklist(&self, addr: &str);

    /// Mark an address as connected and count the success.
    fn connected(&self, addr: &str);

    /// Return an address to the idle state after a clean disconnect.
    fn disconnected(&self, addr: &str);

    /// Return an address to the idle state and count the failure.
    fn dropped(&self, addr: &str);

    /// Count a connection failure against an address.
    fn failed(&self, addr: &str);

    /// Return up to `count` addresses matching `filter`, ordered by `sort`.
    ///
    /// Fails with [`NetworkError::BookEmpty`] when no entry matches.
    fn sample(
        &self,
        count: usize,
        filter: AddressFilter,
        sort: SampleSort,
    ) -> NetworkResult<Vec<String>>;
}

#[derive(Debug, Clone)]
struct Entry {
    state: EntryState,
    success: u64,
    failure: u64,
}

impl Entry {
    fn new() -> Self {
        Self {
            state: EntryState::Idle,
            success: 0,
            failure: 0,
        }
    }

    /// Selection score. Active and blacklisted entries score zero; a
    /// spotless history scores one; otherwise the success/failure ratio
    /// scaled down by 100 and floored at one.
    fn score(&self) -> f64 {
        match self.state {
            EntryState::Active | EntryState::Blacklisted => 0.0,
            EntryState::Idle => {
                if self.failure == 0 {
                    1.0
                } else {
                    (self.success as f64 / self.failure as f64 / 100.0).max(1.0)
                }
            }
        }
    }
}

/// In-memory address book, the default implementation.
#[derive(Debug, Default)]
pub struct SimpleBook {
    entries: Mutex<HashMap<String, Entry>>,
}

impl SimpleBook {
    /// Create an empty book.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a book pre-seeded with idle entries.
    pub fn with_addresses<I, S>(addrs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let entries = addrs
            .into_iter()
            .map(|addr| (addr.into(), Entry::new()))
            .collect();
        Self {
            entries: Mutex::new(entries),
        }
    }

    /// Current state of an address, if known.
    pub fn state(&self, addr: &str) -> Option<EntryState> {
        self.entries.lock().get(addr).map(|e| e.state)
    }

    /// Success and failure counts for an address, if known.
    pub fn stats(&self, addr: &str) -> Option<(u64, u64)> {
        self.entries.lock().get(addr).map(|e| (e.success, e.failure))
    }

    /// Number of known addresses, blacklisted included.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the book holds no addresses at all.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl Book for SimpleBook {
    fn add(&self, addr: &str) {
        self.entries
            .lock()
            .entry(addr.to_string())
            .or_insert_with(Entry::new);
    }

    fn blacklist(&self, addr: &str) {
        let mut entries = self.entries.lock();
        let entry = entries.entry(addr.to_string()).or_insert_with(Entry::new);
        entry.state = EntryState::Blacklisted;
        debug!(addr = %addr, "blacklisted address");
    }

    fn connected(&self, addr: &str) {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get_mut(addr) {
            if entry.state == EntryState::Blacklisted {
                return;
            }
            entry.state = EntryState::Active;
            entry.success += 1;
        }
    }

    fn disconnected(&self, addr: &str) {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get_mut(addr) {
            if entry.state == EntryState::Active {
                entry.state = EntryState::Idle;
            }
        }
    }

    fn dropped(&self, addr: &str) {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get_mut(addr) {
            if entry.state != EntryState::Blacklisted {
                entry.state = EntryState::Idle;
            }
            entry.failure += 1;
        }
    }

    fn failed(&self, addr: &str) {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get_mut(addr) {
            if entry.state != EntryState::Blacklisted {
                entry.state = EntryState::Idle;
            }
            entry.failure += 1;
        }
    }

    fn sample(
        &self,
        count: usize,
        filter: AddressFilter,
        sort: SampleSort,
    ) -> NetworkResult<Vec<String>> {
        let entries = self.entries.lock();
        let mut candidates: Vec<(&String, &Entry)> = entries
            .iter()
            .filter(|(_, entry)| entry.state != EntryState::Blacklisted)
            .filter(|(_, entry)| filter.matches(entry.state))
            .collect();
        if candidates.is_empty() {
            return Err(NetworkError::BookEmpty);
        }
        match sort {
            SampleSort::ByPriority => {
                candidates.sort_by(|a, b| {
                    b.1.score()
                        .partial_cmp(&a.1.score())
                        .unwrap_or(std::cmp::Ordering::Equal)
                });
            }
            SampleSort::Random => {
                candidates.shuffle(&mut rand::thread_rng());
            }
        }
        candidates.truncate(count);
        Ok(candidates.into_iter().map(|(addr, _)| addr.clone()).collect())
    }
}
