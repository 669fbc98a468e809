//! Partner/token attribution resolver.
//!
//! URL parameters are the only way attribution is introduced. Storage only lets
//! it survive navigation to pages that do not carry the parameters.

use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::Result;
use crate::storage::{AttributionStore, PARTNER_KEY, TOKEN_KEY};
use crate::util::fingerprint;

pub const PARTNER_PARAM: &str = "partner";
pub const TOKEN_PARAM: &str = "token";

/// The URL of the current page view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageUrl(Url);

impl PageUrl {
    pub fn parse(value: &str) -> Result<Self> {
        Ok(Self(Url::parse(value.trim())?))
    }

    pub const fn as_url(&self) -> &Url {
        &self.0
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    pub fn path(&self) -> &str {
        self.0.path()
    }

    pub fn host(&self) -> &str {
        self.0.host_str().unwrap_or_default()
    }

    /// First value of a query parameter, trimmed; `""` when absent.
    pub fn param(&self, key: &str) -> String {
        self.0
            .query_pairs()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.trim().to_string())
            .unwrap_or_default()
    }

    /// Replace every occurrence of `key` with a single `key=value`.
    pub fn set_param(&mut self, key: &str, value: &str) {
        let retained = self.pairs_without(key);
        let mut pairs = self.0.query_pairs_mut();
        pairs.clear();
        for (name, existing) in &retained {
            pairs.append_pair(name, existing);
        }
        pairs.append_pair(key, value);
    }

    pub fn remove_param(&mut self, key: &str) {
        let retained = self.pairs_without(key);
        if retained.is_empty() {
            self.0.set_query(None);
            return;
        }
        self.0.query_pairs_mut().clear().extend_pairs(retained);
    }

    fn pairs_without(&self, key: &str) -> Vec<(String, String)> {
        self.0
            .query_pairs()
            .filter(|(name, _)| name != key)
            .map(|(name, value)| (name.into_owned(), value.into_owned()))
            .collect()
    }
}

impl fmt::Display for PageUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.as_str())
    }
}

/// Resolved identity for the current page view.
///
/// `""` is the canonical "absent" value. A token is never kept without a
/// partner.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribution {
    pub partner: String,
    pub token: String,
}

impl Attribution {
    pub fn new(partner: impl Into<String>, token: impl Into<String>) -> Self {
        let partner = partner.into().trim().to_string();
        let token = if partner.is_empty() {
            String::new()
        } else {
            token.into().trim().to_string()
        };
        Self { partner, token }
    }

    pub fn is_empty(&self) -> bool {
        self.partner.is_empty() && self.token.is_empty()
    }

    /// Partner and token both present: the visit came through the QR flow.
    pub fn is_hotel_qr(&self) -> bool {
        !self.partner.is_empty() && !self.token.is_empty()
    }
}

impl fmt::Debug for Attribution {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Attribution")
            .field("partner", &self.partner)
            .field(
                "token",
                &if self.token.is_empty() { "" } else { "[REDACTED]" },
            )
            .finish()
    }
}

/// Decides the authoritative attribution for a page view and keeps storage in
/// step with it.
#[derive(Clone)]
pub struct AttributionResolver {
    store: AttributionStore,
    reset_on_bare_visit: bool,
}

impl AttributionResolver {
    pub const fn new(store: AttributionStore, reset_on_bare_visit: bool) -> Self {
        Self {
            store,
            reset_on_bare_visit,
        }
    }

    pub const fn store(&self) -> &AttributionStore {
        &self.store
    }

    /// Compute `(partner, token)` for `page`.
    ///
    /// URL values always beat stored ones. A URL partner refreshes storage and
    /// marks attribution active for this tab.
    pub fn resolve(&self, page: &PageUrl) -> Attribution {
        let url_partner = page.param(PARTNER_PARAM);
        let url_token = if url_partner.is_empty() {
            String::new()
        } else {
            page.param(TOKEN_PARAM)
        };

        // A token is only ever stored next to the partner it arrived with.
        if !url_partner.is_empty() {
            self.store.switch_partner(&url_partner);
            self.store.set_active(true);
            self.store.write(TOKEN_KEY, &url_token);
        }

        let partner = first_non_empty(url_partner, || self.store.read(PARTNER_KEY));
        let token = first_non_empty(url_token, || self.store.read(TOKEN_KEY));
        if !partner.is_empty() || !token.is_empty() {
            return Attribution::new(partner, token);
        }

        if !self.store.durable_is_fresh() {
            return Attribution::default();
        }

        let partner = self.store.read_durable(PARTNER_KEY);
        let token = self.store.read_durable(TOKEN_KEY);
        self.store.seed_session(PARTNER_KEY, &partner);
        self.store.seed_session(TOKEN_KEY, &token);
        tracing::debug!(
            partner = fingerprint(&partner),
            "Re-seeded session attribution from durable tier"
        );
        Attribution::new(partner, token)
    }

    /// A page load without `partner` in the URL.
    ///
    /// Always deactivates link patching for the tab; clears storage as well
    /// when `reset_on_bare_visit` is set.
    pub fn begin_bare_visit(&self) {
        self.store.set_active(false);
        if self.reset_on_bare_visit {
            self.store.clear_all();
        }
    }

    pub fn is_active(&self) -> bool {
        self.store.is_active()
    }
}

fn first_non_empty(primary: String, fallback: impl FnOnce() -> String) -> String {
    if primary.is_empty() {
        fallback()
    } else {
        primary
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::storage::{ManualClock, MemoryTier, StorageTier, QR_ACTIVE_KEY, TOKEN_TS_KEY};

    const TTL: Duration = Duration::from_secs(3_600);

    struct Fixture {
        resolver: AttributionResolver,
        session: Arc<MemoryTier>,
        durable: Arc<MemoryTier>,
        clock: Arc<ManualClock>,
    }

    fn fixture(reset_on_bare_visit: bool) -> Fixture {
        let session = Arc::new(MemoryTier::new());
        let durable = Arc::new(MemoryTier::new());
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let store = AttributionStore::new(session.clone(), durable.clone(), clock.clone(), TTL);
        Fixture {
            resolver: AttributionResolver::new(store, reset_on_bare_visit),
            session,
            durable,
            clock,
        }
    }

    fn page(url: &str) -> PageUrl {
        PageUrl::parse(url).unwrap()
    }

    #[test]
    fn url_parameters_resolve_and_persist_to_both_tiers() {
        let f = fixture(false);
        let resolved = f
            .resolver
            .resolve(&page("https://amd-germancenter.com/?partner=HOTEL1&token=ABC"));

        assert_eq!(resolved, Attribution::new("HOTEL1", "ABC"));
        for tier in [&f.session, &f.durable] {
            assert_eq!(tier.get(PARTNER_KEY).unwrap().as_deref(), Some("HOTEL1"));
            assert_eq!(tier.get(TOKEN_KEY).unwrap().as_deref(), Some("ABC"));
        }
        assert_eq!(f.session.get(QR_ACTIVE_KEY).unwrap().as_deref(), Some("1"));
    }

    #[test]
    fn parameters_are_trimmed() {
        let f = fixture(false);
        let resolved = f
            .resolver
            .resolve(&page("https://amd-germancenter.com/?partner=%20HOTEL1%20&token=ABC+"));
        assert_eq!(resolved, Attribution::new("HOTEL1", "ABC"));
    }

    #[test]
    fn bare_url_without_storage_is_empty() {
        let f = fixture(false);
        let resolved = f.resolver.resolve(&page("https://amd-germancenter.com/en/"));
        assert_eq!(resolved, Attribution::default());
    }

    #[test]
    fn stale_durable_tier_is_ignored() {
        let f = fixture(false);
        f.resolver
            .resolve(&page("https://amd-germancenter.com/?partner=HOTEL1&token=ABC"));
        f.session.remove(PARTNER_KEY).unwrap();
        f.session.remove(TOKEN_KEY).unwrap();
        f.clock.advance(TTL + Duration::from_millis(1));

        let resolved = f.resolver.resolve(&page("https://amd-germancenter.com/en/"));
        assert_eq!(resolved, Attribution::default());
    }

    #[test]
    fn fresh_durable_tier_reseeds_session() {
        let f = fixture(false);
        f.resolver
            .resolve(&page("https://amd-germancenter.com/?partner=HOTEL1&token=ABC"));
        // New tab: empty session tier, shared durable tier.
        f.session.remove(PARTNER_KEY).unwrap();
        f.session.remove(TOKEN_KEY).unwrap();
        f.clock.advance(TTL - Duration::from_millis(1));

        let resolved = f.resolver.resolve(&page("https://amd-germancenter.com/en/tours"));
        assert_eq!(resolved, Attribution::new("HOTEL1", "ABC"));
        assert_eq!(f.session.get(TOKEN_KEY).unwrap().as_deref(), Some("ABC"));
    }

    #[test]
    fn url_partner_beats_stored_partner() {
        let f = fixture(false);
        f.resolver
            .resolve(&page("https://amd-germancenter.com/?partner=HOTEL1&token=ABC"));
        let resolved = f
            .resolver
            .resolve(&page("https://amd-germancenter.com/?partner=HOTEL2&token=XYZ"));
        assert_eq!(resolved, Attribution::new("HOTEL2", "XYZ"));
        assert_eq!(f.durable.get(PARTNER_KEY).unwrap().as_deref(), Some("HOTEL2"));
    }

    #[test]
    fn token_without_partner_is_dropped() {
        let f = fixture(false);
        let resolved = f
            .resolver
            .resolve(&page("https://amd-germancenter.com/?token=ABC"));
        assert_eq!(resolved, Attribution::default());
        assert!(!f.resolver.is_active());
        assert_eq!(f.durable.get(TOKEN_KEY).unwrap(), None);
    }

    #[test]
    fn new_partner_does_not_inherit_stored_token() {
        let f = fixture(false);
        f.resolver
            .resolve(&page("https://amd-germancenter.com/?partner=HOTEL1&token=ABC"));
        let resolved = f
            .resolver
            .resolve(&page("https://amd-germancenter.com/?partner=HOTEL2"));
        assert_eq!(resolved, Attribution::new("HOTEL2", ""));
        assert_eq!(f.session.get(TOKEN_KEY).unwrap(), None);
    }

    #[test]
    fn url_token_alone_never_joins_stored_partner() {
        let f = fixture(false);
        f.resolver
            .resolve(&page("https://amd-germancenter.com/?partner=HOTEL1&token=ABC"));
        let resolved = f
            .resolver
            .resolve(&page("https://amd-germancenter.com/en/?token=XYZ"));
        assert_eq!(resolved, Attribution::new("HOTEL1", "ABC"));
    }

    #[test]
    fn bare_visit_keeps_storage_unless_reset_is_configured() {
        let keep = fixture(false);
        keep.resolver
            .resolve(&page("https://amd-germancenter.com/?partner=HOTEL1&token=ABC"));
        keep.resolver.begin_bare_visit();
        assert!(!keep.resolver.is_active());
        assert_eq!(
            keep.resolver.resolve(&page("https://amd-germancenter.com/en/")),
            Attribution::new("HOTEL1", "ABC")
        );

        let reset = fixture(true);
        reset
            .resolver
            .resolve(&page("https://amd-germancenter.com/?partner=HOTEL1&token=ABC"));
        reset.resolver.begin_bare_visit();
        assert_eq!(
            reset.resolver.resolve(&page("https://amd-germancenter.com/en/")),
            Attribution::default()
        );
        assert_eq!(reset.durable.get(TOKEN_TS_KEY).unwrap(), None);
    }

    #[test]
    fn set_param_replaces_and_keeps_other_pairs() {
        let mut url = page("https://amd-germancenter.com/en/?qr=1&partner=OLD&lang=en#top");
        url.set_param(PARTNER_PARAM, "HOTEL1");
        url.remove_param("qr");
        assert_eq!(
            url.as_str(),
            "https://amd-germancenter.com/en/?lang=en&partner=HOTEL1#top"
        );
    }

    #[test]
    fn debug_redacts_token() {
        let debug = format!("{:?}", Attribution::new("HOTEL1", "secret-token"));
        assert!(debug.contains("HOTEL1"));
        assert!(!debug.contains("secret-token"));
    }
}
