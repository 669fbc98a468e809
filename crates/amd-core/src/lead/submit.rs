use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;
use tokio::task::{JoinError, JoinHandle};
use url::Url;

use super::{validate_form, Channel, FormData, LeadContext, LeadRecord, Service, SubmissionLock};
use crate::attribution::PageUrl;
use crate::config::SiteConfig;
use crate::error::{Error, Result};
use crate::message::{self, Language};
use crate::storage::Clock;
use crate::util::compact_text;

const LEAD_HTTP_TIMEOUT_SECS: u64 = 10;

/// Response shapes seen from the backend, most specific first.
const REFERENCE_PATHS: [&[&str]; 6] = [
    &["upstream", "data", "refNr"],
    &["upstream", "refNr"],
    &["upstream", "data", "data", "refNr"],
    &["upstream", "result", "refNr"],
    &["data", "refNr"],
    &["refNr"],
];

/// Delivers a lead payload to the backend and returns its JSON reply.
///
/// Deliveries run on their own task so they outlive the wait for a reference.
pub trait LeadTransport: Send + Sync + 'static {
    fn send(&self, payload: &Value) -> impl Future<Output = Result<Value>> + Send;
}

#[derive(Debug, Clone)]
pub struct HttpLeadTransport {
    client: reqwest::Client,
    endpoint: Url,
}

impl HttpLeadTransport {
    pub fn new(endpoint: Url) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(LEAD_HTTP_TIMEOUT_SECS))
            .build()?;
        Ok(Self { client, endpoint })
    }

    /// Resolve the configured endpoint against the current page.
    pub fn for_page(config: &SiteConfig, page: &PageUrl) -> Result<Self> {
        Self::new(page.as_url().join(&config.lead_endpoint)?)
    }
}

impl LeadTransport for HttpLeadTransport {
    async fn send(&self, payload: &Value) -> Result<Value> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(payload)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(Error::Upstream(format!(
                "lead endpoint returned HTTP {}: {}",
                status.as_u16(),
                compact_text(&text)
            )));
        }

        let body: Value = serde_json::from_str(&text)?;
        if body.get("ok").and_then(Value::as_bool) == Some(false) {
            let message = body
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("lead endpoint reported failure");
            return Err(Error::Upstream(message.to_string()));
        }
        Ok(body)
    }
}

/// First reference number found along the known response shapes.
///
/// An `upstream` that arrived as a JSON string is parsed on the way.
pub fn extract_reference_number(response: &Value) -> Option<String> {
    REFERENCE_PATHS
        .iter()
        .find_map(|path| lookup(response, path))
}

fn lookup(value: &Value, path: &[&str]) -> Option<String> {
    let Some((head, rest)) = path.split_first() else {
        return match value {
            Value::String(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
            Value::Number(number) => Some(number.to_string()),
            _ => None,
        };
    };
    match value {
        Value::Object(fields) => lookup(fields.get(*head)?, rest),
        Value::String(text) => {
            let parsed: Value = serde_json::from_str(text).ok()?;
            parsed.is_object().then(|| lookup(&parsed, path)).flatten()
        }
        _ => None,
    }
}

/// What the page should do once a lead has been handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundAction {
    pub channel: Channel,
    /// `wa.me` link (open in a new context) or `mailto:` link (assign).
    pub url: String,
    pub text: String,
    /// Empty when the backend gave none.
    pub reference: String,
}

/// Builds, de-duplicates, and sends leads.
pub struct LeadSubmitter<T> {
    transport: Arc<T>,
    lock: SubmissionLock,
    clock: Arc<dyn Clock>,
    config: Arc<SiteConfig>,
}

impl<T: LeadTransport> LeadSubmitter<T> {
    pub fn new(transport: Arc<T>, config: Arc<SiteConfig>, clock: Arc<dyn Clock>) -> Self {
        Self {
            transport,
            lock: SubmissionLock::new(Arc::clone(&clock), config.submission_lock_window()),
            clock,
            config,
        }
    }

    /// Validate the form and build the record, composed message included.
    pub fn prepare(
        &self,
        form: &FormData,
        channel: Channel,
        context: &LeadContext<'_>,
    ) -> Result<LeadRecord> {
        let service = Service::from_path(context.page.path());
        validate_form(form, service, self.today())?;

        let mut record = LeadRecord::build(form, channel, context);
        let language = Language::from_locale(&record.locale);
        record.full_text = message::compose(language, record.service, form, &record.page_url);
        Ok(record)
    }

    /// Send a lead; resolves to the reference number or `""`.
    ///
    /// Never fails: invalid input, duplicates, and backend trouble all resolve
    /// to `""`.
    pub async fn submit(
        &self,
        form: &FormData,
        channel: Channel,
        context: &LeadContext<'_>,
    ) -> String {
        match self.prepare(form, channel, context) {
            Ok(record) => self.submit_record(&record).await,
            Err(error) => {
                tracing::warn!(%error, "Lead not submitted");
                String::new()
            }
        }
    }

    pub async fn submit_record(&self, record: &LeadRecord) -> String {
        match self.start_delivery(record) {
            Some(delivery) => settle(delivery.await, record.service),
            None => String::new(),
        }
    }

    /// Take the submission lock and send on a detached task.
    ///
    /// `None` for a duplicate inside the lock window.
    fn start_delivery(&self, record: &LeadRecord) -> Option<JoinHandle<String>> {
        if !self.lock.try_acquire(&record.idem_key) {
            tracing::debug!(idem_key = %record.idem_key, "Duplicate lead suppressed");
            return None;
        }

        let transport = Arc::clone(&self.transport);
        let payload = record.to_payload();
        let service = record.service;
        let channel = record.channel;
        let attributed = !record.partner_id.is_empty();
        Some(tokio::spawn(async move {
            match transport.send(&payload).await {
                Ok(response) => {
                    let reference = extract_reference_number(&response).unwrap_or_default();
                    tracing::info!(
                        service = service.as_str(),
                        channel = channel.as_str(),
                        has_reference = !reference.is_empty(),
                        attributed,
                        "Lead submitted"
                    );
                    reference
                }
                Err(error) => {
                    tracing::warn!(service = service.as_str(), %error, "Lead submission failed");
                    String::new()
                }
            }
        }))
    }

    /// Submit and produce the messaging action.
    ///
    /// Waits at most `reference_wait` for the backend; the action is returned
    /// either way and a late delivery keeps running in the background. Only
    /// input errors fail, before anything is sent.
    pub async fn dispatch(
        &self,
        form: &FormData,
        channel: Channel,
        context: &LeadContext<'_>,
    ) -> Result<OutboundAction> {
        let record = self.prepare(form, channel, context)?;
        let reference = match self.start_delivery(&record) {
            Some(delivery) => {
                match tokio::time::timeout(self.config.reference_wait(), delivery).await {
                    Ok(joined) => settle(joined, record.service),
                    Err(_) => {
                        tracing::warn!(
                            service = record.service.as_str(),
                            "Reference number did not arrive in time; delivery continues"
                        );
                        String::new()
                    }
                }
            }
            None => String::new(),
        };

        let language = Language::from_locale(&record.locale);
        let text = message::inject_reference(&record.full_text, &reference, language);
        let url = match channel {
            Channel::WhatsApp => message::whatsapp_url(&self.config.whatsapp_number, &text),
            Channel::Email => message::mailto_url(
                &self.config.email_address,
                &message::subject(language, record.service),
                &text,
            ),
        };
        Ok(OutboundAction {
            channel,
            url,
            text,
            reference,
        })
    }

    fn today(&self) -> NaiveDate {
        DateTime::from_timestamp_millis(self.clock.now_millis())
            .unwrap_or_else(Utc::now)
            .date_naive()
    }
}

fn settle(joined: std::result::Result<String, JoinError>, service: Service) -> String {
    joined.unwrap_or_else(|error| {
        tracing::warn!(service = service.as_str(), %error, "Lead delivery task failed");
        String::new()
    })
}
