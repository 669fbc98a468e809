//! One page view, from load to outbound links.
//!
//! A [`PageSession`] resolves attribution as soon as it is created, settles the
//! token through [`PageSession::start`], and then hands out everything the page
//! needs: patched links, navigation targets, lead context, and what to show in
//! the partner widgets.

use std::sync::Arc;

use crate::attribution::{Attribution, AttributionResolver, PageUrl};
use crate::config::SiteConfig;
use crate::lead::{FormData, LeadContext};
use crate::links::{Anchor, LinkPatcher, WatchedLinks};
use crate::storage::AttributionStore;
use crate::token::{TokenFlow, TokenIssuer, TokenOutcome};
use crate::util::sanitize_partner_id;

/// What the partner-related parts of the page should display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartnerPresentation {
    /// The agent id input; hidden once a token proves the partner.
    pub show_manual_partner_field: bool,
    /// Logo URLs to try in order. Empty unless this is a hotel QR visit.
    pub brand_logo_candidates: Vec<String>,
}

pub struct PageSession {
    config: Arc<SiteConfig>,
    resolver: AttributionResolver,
    flow: TokenFlow,
    page: PageUrl,
    attribution: Attribution,
}

impl PageSession {
    pub fn new(config: Arc<SiteConfig>, store: AttributionStore, page: PageUrl) -> Self {
        let resolver = AttributionResolver::new(store, config.reset_on_bare_visit);
        let attribution = resolver.resolve(&page);
        let flow = TokenFlow::from_config(&config);
        Self {
            config,
            resolver,
            flow,
            page,
            attribution,
        }
    }

    /// Settle the token for this page view.
    ///
    /// On [`TokenOutcome::Redirect`] the caller navigates away and the session
    /// is done.
    pub async fn start<I: TokenIssuer>(&mut self, issuer: &I) -> TokenOutcome {
        let outcome = self
            .flow
            .ensure(&self.resolver, &mut self.page, issuer)
            .await;
        if let TokenOutcome::Ready(attribution) = &outcome {
            self.attribution = attribution.clone();
        }
        tracing::debug!(
            active = self.resolver.is_active(),
            has_token = !self.attribution.token.is_empty(),
            "Page session started"
        );
        outcome
    }

    pub const fn attribution(&self) -> &Attribution {
        &self.attribution
    }

    /// The page URL, including any parameters the token flow added.
    pub const fn page(&self) -> &PageUrl {
        &self.page
    }

    pub fn is_active(&self) -> bool {
        self.resolver.is_active()
    }

    pub fn patcher(&self) -> LinkPatcher {
        LinkPatcher::new(&self.page, &self.config)
    }

    /// Patch `anchors` now and on every later change.
    pub fn watch_links(&self, anchors: Vec<Anchor>) -> WatchedLinks {
        WatchedLinks::new(
            self.patcher(),
            self.attribution.clone(),
            self.is_active(),
            anchors,
        )
    }

    /// Target for a `data-go` style button.
    pub fn navigation_url(&self, target: &str) -> String {
        self.patcher()
            .navigation_url(target, &self.attribution, self.is_active())
    }

    pub fn presentation(&self) -> PartnerPresentation {
        let brand_logo_candidates = if self.attribution.is_hotel_qr() {
            let base = self.config.partner_logo_base.trim_end_matches('/');
            let partner = sanitize_partner_id(&self.attribution.partner);
            ["svg", "png"]
                .iter()
                .map(|extension| format!("{base}/{partner}.{extension}"))
                .collect()
        } else {
            Vec::new()
        };
        PartnerPresentation {
            show_manual_partner_field: self.attribution.token.is_empty(),
            brand_logo_candidates,
        }
    }

    /// Drop a typed partner id the page should not have accepted.
    pub fn scrub_form(&self, form: &mut FormData) {
        if !self.presentation().show_manual_partner_field {
            form.clear_manual_partner();
        }
    }

    pub const fn lead_context<'a>(&'a self, locale: &'a str) -> LeadContext<'a> {
        LeadContext {
            page: &self.page,
            locale,
            attribution: &self.attribution,
        }
    }
}
