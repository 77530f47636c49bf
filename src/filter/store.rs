//! Aggregates the ban table and the allow/user-agent cache files behind one
//! lock, and implements the admission decision the accept loop and request
//! assembly consult.

use std::net::IpAddr;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use crate::config::Config;
use crate::error::CoreError;

use super::ban::BanTable;
use super::cache_file::{load_optional, CacheFile};

/// Default duration for a ban imposed by admission control (as opposed to
/// one read from the ban file with its own expiry, or a permanent one).
const DEFAULT_BAN_DURATION: Duration = Duration::from_secs(60 * 30);

struct Inner {
    bans: BanTable,
    ban_file: CacheFile,
    allow: CacheFile,
    agents: CacheFile,
}

impl Inner {
    /// Reread every backing list file that has changed on disk since it was
    /// last loaded. Called at the top of every admission lookup, not just
    /// from the standalone [`FilterStore::refresh`] entry point, so a static
    /// ban/allow/agent list edit takes effect without a restart.
    fn refresh_stale(&mut self) -> Result<(), CoreError> {
        self.ban_file.refresh_if_stale()?;
        self.allow.refresh_if_stale()?;
        self.agents.refresh_if_stale()?;
        Ok(())
    }
}

/// Thread-safe home for admission-control state: bans (read-write, mutated
/// on every admission check) and the ban-file/allow/user-agent lists
/// (read-mostly, refreshed from disk on mtime change).
pub struct FilterStore {
    inner: RwLock<Inner>,
}

impl FilterStore {
    pub fn load(config: &Config) -> Result<Self, CoreError> {
        let ban_file = load_optional(config.ban_file.as_deref())?;
        let allow = load_optional(config.allow_file.as_deref())?;
        let agents = load_optional(config.agent_file.as_deref())?;
        Ok(Self { inner: RwLock::new(Inner { bans: BanTable::new(), ban_file, allow, agents }) })
    }

    /// Ban `addr` for the standard duration (an admission failure, or an
    /// explicit admin action).
    pub fn ban(&self, addr: IpAddr) {
        self.inner.write().bans.ban(addr, Some(Instant::now() + DEFAULT_BAN_DURATION));
    }

    /// Ban `addr` until the process restarts.
    pub fn ban_permanently(&self, addr: IpAddr) {
        self.inner.write().bans.ban(addr, None);
    }

    /// Whether `addr` should be rejected outright: currently banned (either
    /// by the runtime ban table or a literal/glob entry in the ban file), or
    /// (when an allow list is configured) absent from it.
    pub fn is_denied(&self, addr: &IpAddr) -> bool {
        let mut inner = self.inner.write();
        if let Err(e) = inner.refresh_stale() {
            tracing::warn!(error = %e, "failed to refresh filter list files");
        }

        let candidate = addr.to_string();
        if inner.bans.check_and_touch(addr) {
            return true;
        }
        if inner.ban_file.contents().matches(&candidate) {
            return true;
        }
        let allow = &inner.allow;
        if !allow.contents().is_empty() && !allow.contents().matches(&candidate) {
            return true;
        }
        false
    }

    /// Whether `user_agent` is on the deny list.
    pub fn agent_denied(&self, user_agent: &str) -> bool {
        let mut inner = self.inner.write();
        if let Err(e) = inner.agents.refresh_if_stale() {
            tracing::warn!(error = %e, "failed to refresh agent list file");
        }
        inner.agents.contents().matches(user_agent)
    }

    /// Reread the ban/allow/agent list files if their mtimes have advanced.
    /// `is_denied`/`agent_denied` already do this on every lookup; this is
    /// exposed separately for a caller that wants to force a refresh without
    /// performing a lookup (e.g. an admin "reload lists" action).
    pub fn refresh(&self) -> Result<(), CoreError> {
        self.inner.write().refresh_stale()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_config() -> Config {
        serde_yaml::from_str("listeners: []\n").unwrap()
    }

    #[test]
    fn denied_after_ban() {
        let store = FilterStore::load(&empty_config()).unwrap();
        let addr: IpAddr = "10.0.0.9".parse().unwrap();
        assert!(!store.is_denied(&addr));
        store.ban(addr);
        assert!(store.is_denied(&addr));
    }
}
