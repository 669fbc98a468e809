//! Server-side normalization of lead bodies before they reach the backend.

use amd_core::util::sanitize_partner_id;
use amd_core::Service;
use serde_json::{Map, Value};

const PARTNER_KEYS: [&str; 3] = ["partnerId", "partner", "pid"];
const DEFAULT_LOCALE: &str = "en";
const DEFAULT_PAGE: &str = "services";

/// Turn an untrusted request body into the payload the backend accepts.
///
/// Bodies that are not a JSON object count as `{}`. Client-controlled
/// `secret` and `mode` never pass through; `action` travels as `clientAction`.
pub fn harden_lead(body: &[u8], secret: &str) -> Value {
    let mut payload = match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(fields)) => fields,
        _ => Map::new(),
    };

    payload.remove("mode");
    if let Some(action) = payload.remove("action") {
        payload.insert("clientAction".to_string(), action);
    }

    let service = payload
        .get("service")
        .map_or(Service::default(), |value| Service::normalize(&text_of(value)));
    payload.insert("service".to_string(), Value::from(service.as_str()));

    let locale = payload
        .get("locale")
        .map(text_of)
        .unwrap_or_default()
        .trim()
        .to_lowercase();
    payload.insert(
        "locale".to_string(),
        Value::from(non_empty_or(locale, DEFAULT_LOCALE)),
    );

    let page = payload
        .get("page")
        .map(text_of)
        .unwrap_or_default()
        .trim()
        .to_string();
    payload.insert(
        "page".to_string(),
        Value::from(non_empty_or(page, DEFAULT_PAGE)),
    );

    for key in PARTNER_KEYS {
        if let Some(value) = payload.get_mut(key) {
            if !value.is_null() {
                *value = Value::from(sanitize_partner_id(&text_of(value)));
            }
        }
    }

    payload.insert("secret".to_string(), Value::from(secret));
    Value::Object(payload)
}

/// String form of a JSON scalar; `null` is empty.
fn text_of(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn non_empty_or(value: String, default: &str) -> String {
    if value.is_empty() {
        default.to_string()
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn client_secret_and_mode_never_pass_through() {
        let body = json!({
            "secret": "guess",
            "mode": "qr_check",
            "action": "delete_all",
            "email": "a@b.com"
        });
        let payload = harden_lead(body.to_string().as_bytes(), "server-secret");

        assert_eq!(payload["secret"], "server-secret");
        assert!(payload.get("mode").is_none());
        assert!(payload.get("action").is_none());
        assert_eq!(payload["clientAction"], "delete_all");
        assert_eq!(payload["email"], "a@b.com");
    }

    #[test]
    fn fields_are_normalized() {
        let body = json!({
            "service": "Car-Rental",
            "locale": " DE ",
            "page": "  ",
            "partnerId": " HOT<EL>1 ",
            "pid": 42,
            "partner": null
        });
        let payload = harden_lead(body.to_string().as_bytes(), "s");

        assert_eq!(payload["service"], "car_rental");
        assert_eq!(payload["locale"], "de");
        assert_eq!(payload["page"], "services");
        assert_eq!(payload["partnerId"], "HOTEL1");
        assert_eq!(payload["pid"], "42");
        assert_eq!(payload["partner"], Value::Null);
    }

    #[test]
    fn garbage_body_becomes_defaults() {
        let bodies: [&[u8]; 3] = [b"not json", b"[1,2]", b""];
        for body in bodies {
            let payload = harden_lead(body, "s");
            assert_eq!(
                payload,
                json!({
                    "service": "services",
                    "locale": "en",
                    "page": "services",
                    "secret": "s"
                })
            );
        }
    }

    #[test]
    fn unknown_service_falls_back() {
        let payload = harden_lead(br#"{"service":"admin"}"#, "s");
        assert_eq!(payload["service"], "services");
    }
}
