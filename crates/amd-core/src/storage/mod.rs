//! Two-tier attribution persistence.
//!
//! The session tier lives as long as the browsing tab and has no expiry. The
//! durable tier is shared across tabs and is only trusted while the token
//! timestamp is younger than the configured TTL. Both tiers sit behind
//! [`StorageTier`] so the browser backends can be swapped for in-memory ones.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::util::unix_millis_now;

pub const PARTNER_KEY: &str = "amd_partner";
pub const TOKEN_KEY: &str = "amd_token";
pub const TOKEN_TS_KEY: &str = "amd_token_ts";
pub const QR_ACTIVE_KEY: &str = "amd_qr_active";

/// A string key/value store such as `sessionStorage` or `localStorage`.
pub trait StorageTier: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

/// Source of "now" in Unix milliseconds.
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> i64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        unix_millis_now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub const fn new(start_millis: i64) -> Self {
        Self {
            now: AtomicI64::new(start_millis),
        }
    }

    pub fn advance(&self, by: Duration) {
        let millis = i64::try_from(by.as_millis()).unwrap_or(i64::MAX);
        self.now.fetch_add(millis, Ordering::SeqCst);
    }

    pub fn set(&self, millis: i64) {
        self.now.store(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// In-memory tier. `unavailable()` builds one that fails every call, the way
/// storage behaves when the browser blocks it.
#[derive(Debug, Default)]
pub struct MemoryTier {
    values: Mutex<HashMap<String, String>>,
    unavailable: bool,
}

impl MemoryTier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unavailable() -> Self {
        Self {
            values: Mutex::default(),
            unavailable: true,
        }
    }

    fn values(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>> {
        if self.unavailable {
            return Err(Error::Storage("storage tier is unavailable".to_string()));
        }
        self.values
            .lock()
            .map_err(|_| Error::Storage("storage tier lock poisoned".to_string()))
    }
}

impl StorageTier for MemoryTier {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.values()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.values()?.remove(key);
        Ok(())
    }
}

/// Persistence adapter over the session and durable tiers.
///
/// Storage failures never surface: reads degrade to `""`, writes are dropped.
#[derive(Clone)]
pub struct AttributionStore {
    session: Arc<dyn StorageTier>,
    durable: Arc<dyn StorageTier>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl AttributionStore {
    pub fn new(
        session: Arc<dyn StorageTier>,
        durable: Arc<dyn StorageTier>,
        clock: Arc<dyn Clock>,
        ttl: Duration,
    ) -> Self {
        Self {
            session,
            durable,
            clock,
            ttl,
        }
    }

    /// Fresh in-memory tiers on the system clock.
    pub fn in_memory(ttl: Duration) -> Self {
        Self::new(
            Arc::new(MemoryTier::new()),
            Arc::new(MemoryTier::new()),
            Arc::new(SystemClock),
            ttl,
        )
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    /// Session tier first, then the durable tier while it is fresh.
    pub fn read(&self, key: &str) -> String {
        let session_value = trimmed(tier_get(self.session.as_ref(), key));
        if !session_value.is_empty() {
            return session_value;
        }
        if !self.durable_is_fresh() {
            return String::new();
        }
        trimmed(tier_get(self.durable.as_ref(), key))
    }

    /// Write a non-empty value to both tiers. Empty values are ignored; this
    /// never erases.
    pub fn write(&self, key: &str, value: &str) {
        let value = value.trim();
        if value.is_empty() {
            return;
        }
        tier_set(self.session.as_ref(), key, value);
        tier_set(self.durable.as_ref(), key, value);
        if key == TOKEN_KEY {
            let now = self.clock.now_millis().to_string();
            tier_set(self.durable.as_ref(), TOKEN_TS_KEY, &now);
        }
    }

    /// Erase partner, token, timestamp, and the active flag from both tiers.
    pub fn clear_all(&self) {
        for key in [PARTNER_KEY, TOKEN_KEY, TOKEN_TS_KEY, QR_ACTIVE_KEY] {
            tier_remove(self.session.as_ref(), key);
            tier_remove(self.durable.as_ref(), key);
        }
        tracing::debug!("Cleared stored attribution");
    }

    /// Store `partner`, dropping any token that was issued to someone else.
    pub fn switch_partner(&self, partner: &str) {
        let partner = partner.trim();
        if partner.is_empty() {
            return;
        }
        if self.read(PARTNER_KEY) != partner {
            tier_remove(self.session.as_ref(), TOKEN_KEY);
            tier_remove(self.durable.as_ref(), TOKEN_KEY);
        }
        self.write(PARTNER_KEY, partner);
    }

    /// Read the durable tier directly, honouring only the TTL.
    pub fn read_durable(&self, key: &str) -> String {
        if self.durable_is_fresh() {
            trimmed(tier_get(self.durable.as_ref(), key))
        } else {
            String::new()
        }
    }

    /// Copy a value into the session tier only.
    pub fn seed_session(&self, key: &str, value: &str) {
        if !value.is_empty() {
            tier_set(self.session.as_ref(), key, value);
        }
    }

    pub fn set_active(&self, active: bool) {
        if active {
            tier_set(self.session.as_ref(), QR_ACTIVE_KEY, "1");
        } else {
            tier_remove(self.session.as_ref(), QR_ACTIVE_KEY);
        }
    }

    pub fn is_active(&self) -> bool {
        tier_get(self.session.as_ref(), QR_ACTIVE_KEY).as_deref() == Some("1")
    }

    /// `now - token_ts <= ttl`, with a missing or unparsable stamp treated as stale.
    pub fn durable_is_fresh(&self) -> bool {
        let stamp = tier_get(self.durable.as_ref(), TOKEN_TS_KEY)
            .and_then(|value| value.trim().parse::<i64>().ok())
            .unwrap_or(0);
        if stamp <= 0 {
            return false;
        }
        let ttl = i64::try_from(self.ttl.as_millis()).unwrap_or(i64::MAX);
        self.clock.now_millis().saturating_sub(stamp) <= ttl
    }
}

fn trimmed(value: Option<String>) -> String {
    value.map(|value| value.trim().to_string()).unwrap_or_default()
}

fn tier_get(tier: &dyn StorageTier, key: &str) -> Option<String> {
    tier.get(key).unwrap_or_else(|error| {
        tracing::debug!(key, %error, "Storage read failed; treating as empty");
        None
    })
}

fn tier_set(tier: &dyn StorageTier, key: &str, value: &str) {
    if let Err(error) = tier.set(key, value) {
        tracing::debug!(key, %error, "Storage write dropped");
    }
}

fn tier_remove(tier: &dyn StorageTier, key: &str) {
    if let Err(error) = tier.remove(key) {
        tracing::debug!(key, %error, "Storage remove dropped");
    }
}
