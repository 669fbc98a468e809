//! Raw form fields with case-insensitive, multi-spelling lookup.

use serde_json::{Map, Value};

pub const NAME_FIELDS: &[&str] = &["name", "fullName", "full_name"];
pub const FIRST_NAME_FIELDS: &[&str] = &["firstName", "first_name", "vorname"];
pub const LAST_NAME_FIELDS: &[&str] = &["lastName", "last_name", "nachname"];
pub const EMAIL_FIELDS: &[&str] = &["email", "e-mail", "e_mail", "mail"];
pub const PHONE_FIELDS: &[&str] = &["phone", "tel", "telephone", "telefon", "mobile", "whatsapp"];
pub const MESSAGE_FIELDS: &[&str] = &["message", "notes", "note", "msg", "comment", "freeNotes"];
pub const PARTNER_FIELDS: &[&str] = &["partnerId", "partner_id", "agentId"];
pub const LOCALE_FIELDS: &[&str] = &["locale", "lang", "language"];
pub const CONSENT_FIELDS: &[&str] = &["acceptLegal", "accept_legal", "consent"];

/// Form fields in document order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormData {
    fields: Vec<(String, String)>,
}

impl FormData {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    /// Set a field, replacing any field with the same (case-insensitive) name.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        if let Some(slot) = self
            .fields
            .iter_mut()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(&name))
        {
            slot.1 = value;
        } else {
            self.fields.push((name, value));
        }
    }

    /// Drop every field named by one of `aliases`.
    pub fn remove(&mut self, aliases: &[&str]) {
        self.fields
            .retain(|(name, _)| !aliases.iter().any(|alias| name.eq_ignore_ascii_case(alias)));
    }

    /// First non-empty trimmed value among `aliases`, `""` otherwise.
    pub fn get(&self, aliases: &[&str]) -> String {
        aliases
            .iter()
            .find_map(|alias| {
                self.fields
                    .iter()
                    .find(|(name, value)| name.eq_ignore_ascii_case(alias) && !value.trim().is_empty())
                    .map(|(_, value)| value.trim().to_string())
            })
            .unwrap_or_default()
    }

    pub fn contains_any(&self, aliases: &[&str]) -> bool {
        self.fields
            .iter()
            .any(|(name, _)| aliases.iter().any(|alias| name.eq_ignore_ascii_case(alias)))
    }

    /// Full name, falling back to first + last name.
    pub fn name(&self) -> String {
        let name = self.get(NAME_FIELDS);
        if !name.is_empty() {
            return name;
        }
        format!(
            "{} {}",
            self.get(FIRST_NAME_FIELDS),
            self.get(LAST_NAME_FIELDS)
        )
        .trim()
        .to_string()
    }

    pub fn email(&self) -> String {
        self.get(EMAIL_FIELDS)
    }

    pub fn phone(&self) -> String {
        self.get(PHONE_FIELDS)
    }

    pub fn message(&self) -> String {
        self.get(MESSAGE_FIELDS)
    }

    pub fn manual_partner(&self) -> String {
        self.get(PARTNER_FIELDS)
    }

    pub fn clear_manual_partner(&mut self) {
        self.remove(PARTNER_FIELDS);
    }

    /// `true`/`1`/`on`/`yes` (a checked checkbox).
    pub fn consent(&self) -> bool {
        matches!(
            self.get(CONSENT_FIELDS).to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    /// Raw field map for `structuredJson`.
    pub fn to_json(&self) -> Map<String, Value> {
        self.fields
            .iter()
            .map(|(name, value)| (name.clone(), Value::String(value.trim().to_string())))
            .collect()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for FormData {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut form = Self::new();
        for (name, value) in iter {
            form.insert(name, value);
        }
        form
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_ignores_case_and_tries_aliases_in_order() {
        let form = FormData::new()
            .with("E-Mail", " a@b.com ")
            .with("Telefon", "")
            .with("Mobile", "123");
        assert_eq!(form.email(), "a@b.com");
        assert_eq!(form.phone(), "123");
        assert_eq!(form.message(), "");
    }

    #[test]
    fn name_falls_back_to_first_and_last() {
        let form: FormData = [("firstName", "Lina"), ("lastName", "Haddad")]
            .into_iter()
            .collect();
        assert_eq!(form.name(), "Lina Haddad");

        let form = FormData::new().with("lastName", "Haddad");
        assert_eq!(form.name(), "Haddad");
    }

    #[test]
    fn insert_replaces_case_insensitively() {
        let mut form = FormData::new().with("Email", "old@b.com");
        form.insert("email", "new@b.com");
        assert_eq!(form.iter().count(), 1);
        assert_eq!(form.email(), "new@b.com");
    }

    #[test]
    fn consent_accepts_checkbox_values() {
        assert!(FormData::new().with("acceptLegal", "on").consent());
        assert!(FormData::new().with("acceptLegal", "TRUE").consent());
        assert!(!FormData::new().with("acceptLegal", "").consent());
        assert!(!FormData::new().consent());
    }
}
