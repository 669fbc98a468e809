//! Lead records and the submission pipeline.

mod form;
mod lock;
pub mod rental;
mod submit;

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::attribution::{Attribution, PageUrl, PARTNER_PARAM};
use crate::error::{Error, Result};
use crate::util::{sanitize_partner_id, sha256_hex};

pub use form::FormData;
pub use lock::SubmissionLock;
pub use submit::{
    extract_reference_number, HttpLeadTransport, LeadSubmitter, LeadTransport, OutboundAction,
};

/// Service category a lead belongs to, derived from the page path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Service {
    Packages,
    #[default]
    Services,
    Tours,
    Transfer,
    CarRental,
}

impl Service {
    pub const ALL: [Self; 5] = [
        Self::Packages,
        Self::Services,
        Self::Tours,
        Self::Transfer,
        Self::CarRental,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Packages => "packages",
            Self::Services => "services",
            Self::Tours => "tours",
            Self::Transfer => "transfer",
            Self::CarRental => "car_rental",
        }
    }

    /// Detect the service from a URL path such as `/en/car-rental/`.
    pub fn from_path(path: &str) -> Self {
        let path = path.to_ascii_lowercase();
        let segments: Vec<&str> = path
            .split('/')
            .map(|segment| segment.trim_end_matches(".html"))
            .collect();
        let has = |names: &[&str]| segments.iter().any(|segment| names.contains(segment));

        if has(&["car-rental", "car_rental", "carrental", "rental", "mietwagen"]) {
            Self::CarRental
        } else if has(&["packages", "package", "pakete"]) {
            Self::Packages
        } else if has(&["tours", "tour", "touren"]) {
            Self::Tours
        } else if has(&["transfer", "transfers"]) {
            Self::Transfer
        } else {
            Self::Services
        }
    }

    /// Map any client-supplied value onto the known set; unknown values become
    /// [`Service::Services`].
    pub fn normalize(value: &str) -> Self {
        value.parse().unwrap_or_default()
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Service {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        let value = value.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|service| service.as_str() == value)
            .ok_or_else(|| Error::InvalidInput(format!("unknown service: {value}")))
    }
}

/// The messaging action a lead accompanies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    WhatsApp,
    Email,
}

impl Channel {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::WhatsApp => "whatsapp",
            Self::Email => "email",
        }
    }
}

/// Page-level inputs a lead is built from.
#[derive(Debug, Clone, Copy)]
pub struct LeadContext<'a> {
    pub page: &'a PageUrl,
    /// Document language, e.g. `de` or `en-GB`.
    pub locale: &'a str,
    pub attribution: &'a Attribution,
}

/// Attribution allowed onto an outgoing lead.
///
/// A token is only sent with the partner taken from the current URL (hotel
/// QR). A manually typed partner id (agent) is sent alone. Anything else sends
/// neither.
pub fn outgoing_attribution(
    url_partner: &str,
    resolved: &Attribution,
    manual_partner: &str,
) -> Attribution {
    let url_partner = url_partner.trim();
    if !url_partner.is_empty() && !resolved.token.is_empty() {
        return Attribution::new(url_partner, resolved.token.as_str());
    }
    let manual_partner = sanitize_partner_id(manual_partner);
    if !manual_partner.is_empty() {
        return Attribution::new(manual_partner, "");
    }
    Attribution::default()
}

/// Normalized lead payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadRecord {
    pub service: Service,
    pub channel: Channel,
    pub page_url: String,
    pub locale: String,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub message: String,
    /// The composed outgoing message.
    pub full_text: String,
    pub structured: Map<String, Value>,
    pub consent: bool,
    pub partner_id: String,
    pub token: String,
    pub idem_key: String,
}

impl LeadRecord {
    pub fn build(form: &FormData, channel: Channel, context: &LeadContext<'_>) -> Self {
        let locale = {
            let from_form = form.get(form::LOCALE_FIELDS);
            let value = if from_form.is_empty() {
                context.locale.trim().to_string()
            } else {
                from_form
            };
            if value.is_empty() {
                "de".to_string()
            } else {
                value.to_ascii_lowercase()
            }
        };
        let url_partner = context.page.param(PARTNER_PARAM);
        let attribution =
            outgoing_attribution(&url_partner, context.attribution, &form.manual_partner());

        let mut record = Self {
            service: Service::from_path(context.page.path()),
            channel,
            page_url: context.page.to_string(),
            locale,
            name: form.name(),
            email: form.email(),
            phone: form.phone(),
            message: form.message(),
            full_text: String::new(),
            structured: form.to_json(),
            consent: form.consent(),
            partner_id: attribution.partner,
            token: attribution.token,
            idem_key: String::new(),
        };
        record.idem_key = record.compute_idem_key();
        record
    }

    /// SHA-256 over service, locale, lowercased email, phone, page, structured
    /// fields, and message; stable across releases so the backend can
    /// deduplicate on it.
    pub fn compute_idem_key(&self) -> String {
        let email = self.email.to_lowercase();
        let structured = Value::Object(self.structured.clone()).to_string();
        let material = [
            self.service.as_str(),
            self.locale.as_str(),
            email.as_str(),
            self.phone.as_str(),
            self.page_url.as_str(),
            structured.as_str(),
            self.message.as_str(),
        ]
        .join("\u{1f}");
        let digest = sha256_hex(material.as_bytes());
        format!("lead_{}", &digest[..32])
    }

    /// JSON body for the lead endpoint.
    pub fn to_payload(&self) -> Value {
        let mut payload = serde_json::json!({
            "service": self.service.as_str(),
            "page": self.service.as_str(),
            "locale": self.locale,
            "lang": self.locale,
            "name": self.name,
            "email": self.email,
            "phone": self.phone,
            "message": self.message,
            "fullText": self.full_text,
            "structuredJson": Value::Object(self.structured.clone()),
            "acceptLegal": self.consent,
            "idemKey": self.idem_key,
            "sourceUrl": self.page_url,
            "pageUrl": self.page_url,
            "contactPreference": self.channel.as_str(),
        });
        if let Value::Object(fields) = &mut payload {
            if !self.partner_id.is_empty() {
                for key in ["partnerId", "partner", "pid"] {
                    fields.insert(key.to_string(), Value::String(self.partner_id.clone()));
                }
            }
            if !self.token.is_empty() {
                fields.insert("token".to_string(), Value::String(self.token.clone()));
            }
        }
        payload
    }
}

/// Reject forms that must not produce a submission.
///
/// A lead needs some way to reach the visitor; an explicit consent field must
/// be ticked; rental leads pass the rental checks.
pub fn validate_form(form: &FormData, service: Service, today: NaiveDate) -> Result<()> {
    if form.name().is_empty() && form.email().is_empty() && form.phone().is_empty() {
        return Err(Error::InvalidInput(
            "lead needs a name, email, or phone".to_string(),
        ));
    }
    if form.contains_any(form::CONSENT_FIELDS) && !form.consent() {
        return Err(Error::InvalidInput(
            "privacy policy and terms were not accepted".to_string(),
        ));
    }
    if service == Service::CarRental {
        rental::check(form, today)?;
    }
    Ok(())
}
