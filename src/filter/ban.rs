//! Runtime IP bans: entries added by admission control, file reload, or an
//! admin command, each with an optional expiry that a near-expiry hit
//! extends, and opportunistically evicted as the table is walked rather
//! than on a separate timer.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

/// A hit against an entry whose expiry is within this window of now gets
/// pushed back out to `now + EXTEND_WINDOW`, to keep an active abuser
/// banned rather than let the ban lapse mid-attack. Whether this should
/// also bound the total ban lifetime is open upstream; this preserves the
/// "extend on every near-expiry hit" behavior as a tunable, not a cap.
const EXTEND_WINDOW: Duration = Duration::from_secs(300);

/// An entry untouched for longer than this, found while walking the table
/// for an unrelated lookup, is evicted as a stale sibling.
const STALE_AGE: Duration = Duration::from_secs(60);

/// `None` means permanent (the source's `expiry == 0`).
struct BannedEntry {
    expires_at: Option<Instant>,
}

/// The live ban table. `check_and_touch` is the single entry point: it
/// reports whether `addr` is currently banned, extending a near-expiry hit
/// by [`EXTEND_WINDOW`]. Each call also evicts at most one unrelated entry
/// that's gone stale, mirroring the one-sibling-per-lookup eviction the
/// original tree-walk performed.
#[derive(Default)]
pub struct BanTable {
    entries: HashMap<IpAddr, BannedEntry>,
}

impl BanTable {
    #[must_use]
    pub fn new() -> Self {
        Self { entries: HashMap::new() }
    }

    /// Insert or replace a ban. `expires_at = None` bans permanently.
    pub fn ban(&mut self, addr: IpAddr, expires_at: Option<Instant>) {
        self.entries.insert(addr, BannedEntry { expires_at });
    }

    /// Returns `true` if `addr` is currently banned.
    pub fn check_and_touch(&mut self, addr: &IpAddr) -> bool {
        let now = Instant::now();
        self.evict_one_stale_sibling(addr, now);

        let Some(entry) = self.entries.get_mut(addr) else {
            return false;
        };

        match entry.expires_at {
            None => true,
            Some(expiry) if expiry <= now => {
                self.entries.remove(addr);
                false
            }
            Some(expiry) => {
                if expiry <= now + EXTEND_WINDOW {
                    entry.expires_at = Some(now + EXTEND_WINDOW);
                }
                true
            }
        }
    }

    fn evict_one_stale_sibling(&mut self, skip: &IpAddr, now: Instant) {
        let stale = self.entries.iter().find_map(|(addr, entry)| {
            if addr == skip {
                return None;
            }
            match entry.expires_at {
                Some(expiry) if now.saturating_duration_since(expiry) > STALE_AGE => Some(*addr),
                _ => None,
            }
        });
        if let Some(addr) = stale {
            self.entries.remove(&addr);
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permanent_ban_always_matches() {
        let mut table = BanTable::new();
        let addr: IpAddr = "10.0.0.1".parse().unwrap();
        table.ban(addr, None);
        assert!(table.check_and_touch(&addr));
    }

    #[test]
    fn expired_ban_stops_matching() {
        let mut table = BanTable::new();
        let addr: IpAddr = "10.0.0.2".parse().unwrap();
        table.ban(addr, Some(Instant::now() - Duration::from_secs(1)));
        assert!(!table.check_and_touch(&addr));
        assert!(table.is_empty());
    }

    #[test]
    fn near_expiry_hit_extends_window() {
        let mut table = BanTable::new();
        let addr: IpAddr = "10.0.0.3".parse().unwrap();
        table.ban(addr, Some(Instant::now() + Duration::from_secs(200)));
        assert!(table.check_and_touch(&addr));
        let extended = table.entries.get(&addr).unwrap().expires_at.unwrap();
        assert!(extended > Instant::now() + Duration::from_secs(290));
    }

    #[test]
    fn unbanned_address_is_not_reported() {
        let mut table = BanTable::new();
        let addr: IpAddr = "10.0.0.4".parse().unwrap();
        assert!(!table.check_and_touch(&addr));
    }

    #[test]
    fn stale_sibling_evicted_on_unrelated_lookup() {
        let mut table = BanTable::new();
        let stale: IpAddr = "10.0.0.5".parse().unwrap();
        let other: IpAddr = "10.0.0.6".parse().unwrap();

        table.ban(stale, Some(Instant::now() - Duration::from_secs(120)));
        assert_eq!(table.len(), 1);

        assert!(!table.check_and_touch(&other));
        assert!(table.is_empty());
    }
}
