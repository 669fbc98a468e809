//! Outbound link patching.
//!
//! Anchors only ever carry attribution to the current origin or to the
//! allow-listed partner and main-site hosts, and only while attribution is
//! active for the tab.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use url::{Origin, Url};

use crate::attribution::{Attribution, PageUrl, PARTNER_PARAM, TOKEN_PARAM};
use crate::config::SiteConfig;

const SKIPPED_PREFIXES: [&str; 4] = ["#", "mailto:", "tel:", "javascript:"];

/// An `<a href>` as the patcher sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Anchor {
    pub href: String,
}

impl Anchor {
    pub fn new(href: impl Into<String>) -> Self {
        Self { href: href.into() }
    }
}

#[derive(Debug, Clone)]
pub struct LinkPatcher {
    base: Url,
    origin: Origin,
    pass_hosts: BTreeSet<String>,
    main_hosts: BTreeSet<String>,
}

impl LinkPatcher {
    pub fn new(current: &PageUrl, config: &SiteConfig) -> Self {
        Self {
            base: current.as_url().clone(),
            origin: current.as_url().origin(),
            pass_hosts: lowercase_hosts(&config.pass_hosts),
            main_hosts: lowercase_hosts(&config.main_hosts),
        }
    }

    /// Same origin, or an allow-listed partner/main-site host.
    pub fn is_eligible(&self, target: &Url) -> bool {
        if target.origin() == self.origin {
            return true;
        }
        let Some(host) = target.host_str() else {
            return false;
        };
        let host = host.to_ascii_lowercase();
        self.pass_hosts.contains(&host) || self.main_hosts.contains(&host)
    }

    /// Patch every eligible anchor in place. Returns how many changed.
    ///
    /// Applying this twice with the same attribution is the same as applying
    /// it once.
    pub fn patch(&self, anchors: &mut [Anchor], attribution: &Attribution, active: bool) -> usize {
        if attribution.is_empty() || !active {
            return 0;
        }
        let mut patched = 0;
        for anchor in anchors.iter_mut() {
            if let Some(href) = self.patch_href(&anchor.href, attribution) {
                anchor.href = href;
                patched += 1;
            }
        }
        patched
    }

    /// Target URL for a navigation button, carrying attribution when allowed.
    pub fn navigation_url(&self, target: &str, attribution: &Attribution, active: bool) -> String {
        if !active {
            return target.to_string();
        }
        self.add_params(target, attribution)
            .unwrap_or_else(|| target.to_string())
    }

    fn patch_href(&self, href: &str, attribution: &Attribution) -> Option<String> {
        let trimmed = href.trim();
        if trimmed.is_empty() {
            return None;
        }
        let lower = trimmed.to_ascii_lowercase();
        if SKIPPED_PREFIXES
            .iter()
            .any(|prefix| lower.starts_with(prefix))
        {
            return None;
        }

        let has_partner = trimmed.contains("partner=");
        let has_token = trimmed.contains("token=");
        if (attribution.partner.is_empty() || has_partner)
            && (attribution.token.is_empty() || has_token)
        {
            return None;
        }

        self.add_params(trimmed, attribution)
            .filter(|patched| patched != href)
    }

    /// Resolve `href` against the page and add the missing parameters,
    /// keeping the existing query and fragment.
    fn add_params(&self, href: &str, attribution: &Attribution) -> Option<String> {
        let mut url = self.base.join(href).ok()?;
        if !self.is_eligible(&url) {
            return None;
        }

        let missing: Vec<(&str, &str)> = [
            (PARTNER_PARAM, attribution.partner.as_str()),
            (TOKEN_PARAM, attribution.token.as_str()),
        ]
        .into_iter()
        .filter(|(key, value)| !value.is_empty() && !has_value(&url, key))
        .collect();
        if missing.is_empty() {
            return Some(url.to_string());
        }

        let retained: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(name, _)| !missing.iter().any(|(key, _)| name == key))
            .map(|(name, value)| (name.into_owned(), value.into_owned()))
            .collect();
        url.query_pairs_mut()
            .clear()
            .extend_pairs(retained)
            .extend_pairs(missing);
        Some(url.to_string())
    }
}

fn lowercase_hosts(hosts: &BTreeSet<String>) -> BTreeSet<String> {
    hosts
        .iter()
        .map(|host| host.trim().to_ascii_lowercase())
        .collect()
}

fn has_value(url: &Url, key: &str) -> bool {
    url.query_pairs()
        .any(|(name, value)| name == key && !value.is_empty())
}

/// A link collection that re-applies patching whenever it changes.
///
/// The attribution is captured when watching starts, the way a mutation
/// observer closes over the values it was created with.
#[derive(Debug, Clone)]
pub struct WatchedLinks {
    patcher: LinkPatcher,
    attribution: Attribution,
    active: bool,
    anchors: Vec<Anchor>,
}

impl WatchedLinks {
    pub fn new(
        patcher: LinkPatcher,
        attribution: Attribution,
        active: bool,
        anchors: Vec<Anchor>,
    ) -> Self {
        let mut watched = Self {
            patcher,
            attribution,
            active,
            anchors,
        };
        watched.repatch();
        watched
    }

    pub fn anchors(&self) -> &[Anchor] {
        &self.anchors
    }

    pub fn push(&mut self, anchor: Anchor) {
        self.anchors.push(anchor);
        self.repatch();
    }

    /// Swap the whole set, as after client-side navigation.
    pub fn replace(&mut self, anchors: Vec<Anchor>) {
        self.anchors = anchors;
        self.repatch();
    }

    /// Edit anchors directly; patching runs again afterwards.
    pub fn mutate(&mut self, edit: impl FnOnce(&mut Vec<Anchor>)) {
        edit(&mut self.anchors);
        self.repatch();
    }

    fn repatch(&mut self) -> usize {
        self.patcher
            .patch(&mut self.anchors, &self.attribution, self.active)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn patcher() -> LinkPatcher {
        let page =
            PageUrl::parse("https://amd-germancenter.com/?partner=HOTEL1&token=ABC").unwrap();
        LinkPatcher::new(&page, &SiteConfig::default())
    }

    fn hotel() -> Attribution {
        Attribution::new("HOTEL1", "ABC")
    }

    fn hrefs(anchors: &[Anchor]) -> Vec<&str> {
        anchors.iter().map(|anchor| anchor.href.as_str()).collect()
    }

    #[test]
    fn patches_partner_host_and_leaves_third_parties() {
        let mut anchors = vec![
            Anchor::new("https://tours.amd-germancenter.com/book"),
            Anchor::new("https://maps.google.com"),
            Anchor::new("https://evil.example.com/x"),
        ];

        let patched = patcher().patch(&mut anchors, &hotel(), true);

        assert_eq!(patched, 1);
        assert_eq!(
            hrefs(&anchors),
            vec![
                "https://tours.amd-germancenter.com/book?partner=HOTEL1&token=ABC",
                "https://maps.google.com",
                "https://evil.example.com/x",
            ]
        );
    }

    #[test]
    fn inactive_attribution_patches_nothing() {
        let mut anchors = vec![Anchor::new("https://tours.amd-germancenter.com/book")];
        assert_eq!(patcher().patch(&mut anchors, &hotel(), false), 0);
        assert_eq!(anchors[0].href, "https://tours.amd-germancenter.com/book");
    }

    #[test]
    fn patching_is_idempotent() {
        let mut once = vec![
            Anchor::new("/en/tours?sort=price#list"),
            Anchor::new("https://transfer.amd-germancenter.com/"),
            Anchor::new("https://www.amd-germancenter.com/ar/?partner=HOTEL1"),
        ];
        let patcher = patcher();
        patcher.patch(&mut once, &hotel(), true);
        let mut twice = once.clone();
        let second = patcher.patch(&mut twice, &hotel(), true);

        assert_eq!(second, 0);
        assert_eq!(once, twice);
        assert_eq!(
            hrefs(&once),
            vec![
                "https://amd-germancenter.com/en/tours?sort=price&partner=HOTEL1&token=ABC#list",
                "https://transfer.amd-germancenter.com/?partner=HOTEL1&token=ABC",
                "https://www.amd-germancenter.com/ar/?partner=HOTEL1&token=ABC",
            ]
        );
    }

    #[test]
    fn skips_non_navigational_hrefs() {
        let mut anchors = vec![
            Anchor::new(""),
            Anchor::new("#contact"),
            Anchor::new("MAILTO:info@amd-germancenter.com"),
            Anchor::new("tel:+4912345"),
            Anchor::new("JavaScript:void(0)"),
        ];
        let before = anchors.clone();
        assert_eq!(patcher().patch(&mut anchors, &hotel(), true), 0);
        assert_eq!(anchors, before);
    }

    #[test]
    fn existing_values_are_not_overwritten() {
        let mut anchors = vec![Anchor::new(
            "https://tours.amd-germancenter.com/book?partner=OTHER",
        )];
        patcher().patch(&mut anchors, &hotel(), true);
        assert_eq!(
            anchors[0].href,
            "https://tours.amd-germancenter.com/book?partner=OTHER&token=ABC"
        );
    }

    #[test]
    fn empty_attribution_is_a_no_op() {
        let mut anchors = vec![Anchor::new("/en/")];
        assert_eq!(
            patcher().patch(&mut anchors, &Attribution::default(), true),
            0
        );
        assert_eq!(anchors[0].href, "/en/");
    }

    #[test]
    fn partner_only_attribution_adds_partner() {
        let mut anchors = vec![Anchor::new("/de/transfer")];
        patcher().patch(&mut anchors, &Attribution::new("A001", ""), true);
        assert_eq!(
            anchors[0].href,
            "https://amd-germancenter.com/de/transfer?partner=A001"
        );
    }

    #[test]
    fn navigation_url_respects_allow_list() {
        let patcher = patcher();
        assert_eq!(
            patcher.navigation_url("https://tours.amd-germancenter.com/", &hotel(), true),
            "https://tours.amd-germancenter.com/?partner=HOTEL1&token=ABC"
        );
        assert_eq!(
            patcher.navigation_url("https://facebook.com/amd", &hotel(), true),
            "https://facebook.com/amd"
        );
        assert_eq!(
            patcher.navigation_url("https://tours.amd-germancenter.com/", &hotel(), false),
            "https://tours.amd-germancenter.com/"
        );
    }

    #[test]
    fn configured_hosts_match_regardless_of_case() {
        let page = PageUrl::parse("https://amd-germancenter.com/").unwrap();
        let config = SiteConfig {
            pass_hosts: ["Tours.AMD-GermanCenter.com".to_string()].into(),
            main_hosts: BTreeSet::new(),
            ..SiteConfig::default()
        };
        let patcher = LinkPatcher::new(&page, &config);
        let eligible = |url: &str| patcher.is_eligible(&Url::parse(url).unwrap());

        assert!(eligible("https://tours.amd-germancenter.com/"));
        assert!(eligible("https://TOURS.amd-germancenter.com/"));
        assert!(!eligible("https://transfer.amd-germancenter.com/"));
    }

    #[test]
    fn replaced_link_set_is_patched_again() {
        let mut watched = WatchedLinks::new(patcher(), hotel(), true, Vec::new());
        watched.replace(vec![
            Anchor::new("/ar/"),
            Anchor::new("tel:+4912345"),
        ]);

        assert_eq!(
            hrefs(watched.anchors()),
            vec![
                "https://amd-germancenter.com/ar/?partner=HOTEL1&token=ABC",
                "tel:+4912345",
            ]
        );
    }

    #[test]
    fn watched_links_patch_new_anchors_with_captured_attribution() {
        let mut watched = WatchedLinks::new(
            patcher(),
            hotel(),
            true,
            vec![Anchor::new("/en/")],
        );
        watched.push(Anchor::new("https://tours.amd-germancenter.com/book"));
        watched.mutate(|anchors| anchors.push(Anchor::new("https://maps.google.com")));

        assert_eq!(
            hrefs(watched.anchors()),
            vec![
                "https://amd-germancenter.com/en/?partner=HOTEL1&token=ABC",
                "https://tours.amd-germancenter.com/book?partner=HOTEL1&token=ABC",
                "https://maps.google.com",
            ]
        );
    }
}
