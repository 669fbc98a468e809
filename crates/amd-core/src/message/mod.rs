//! Outgoing WhatsApp/e-mail messages and reference-number injection.

use std::sync::LazyLock;

use regex::Regex;

use crate::lead::{FormData, Service};

static REFERENCE_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(Reference|Referenz|Ref\.?|رقم المرجع)\s*:").expect("valid reference regex")
});

/// Placeholders a template may carry until the backend returns a number.
pub const PENDING_PLACEHOLDERS: [&str; 3] = ["(pending)", "(ausstehend)", "(قيد الانتظار)"];

/// Fields printed on their own labelled lines, in this order.
const CONTACT_LABELS: [Label; 3] = [Label::Name, Label::Phone, Label::Email];

/// Fields that never appear as extra lines.
const HIDDEN_FIELDS: [&str; 14] = [
    "name",
    "fullname",
    "full_name",
    "firstname",
    "lastname",
    "email",
    "phone",
    "acceptlegal",
    "accept_legal",
    "consent",
    "partnerid",
    "partner_id",
    "locale",
    "lang",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    De,
    En,
    Ar,
}

impl Language {
    /// `ar*` and `en*` map to Arabic and English; everything else to German.
    pub fn from_locale(locale: &str) -> Self {
        let locale = locale.trim().to_ascii_lowercase();
        if locale.starts_with("ar") {
            Self::Ar
        } else if locale.starts_with("en") {
            Self::En
        } else {
            Self::De
        }
    }

    pub const fn reference_label(self) -> &'static str {
        match self {
            Self::De => "Referenz",
            Self::En => "Reference",
            Self::Ar => "رقم المرجع",
        }
    }

    const fn greeting(self) -> &'static str {
        match self {
            Self::De => "Hallo AMD German Center,",
            Self::En => "Hello AMD German Center,",
            Self::Ar => "مرحباً AMD German Center،",
        }
    }

    fn intro(self, service: Service) -> String {
        let subject = service_noun(self, service);
        match self {
            Self::De => format!("ich möchte ein Angebot anfragen ({subject}):"),
            Self::En => format!("I'd like to request an offer ({subject}):"),
            Self::Ar => format!("أرغب بطلب عرض ({subject}):"),
        }
    }

    const fn consent_line(self) -> &'static str {
        match self {
            Self::De => "Zustimmung: Datenschutz & AGB akzeptiert",
            Self::En => "Consent: Privacy policy & terms accepted",
            Self::Ar => "الموافقة: تم قبول سياسة الخصوصية والشروط",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Label {
    Name,
    Phone,
    Email,
    Page,
}

const fn label(language: Language, label: Label) -> &'static str {
    match (language, label) {
        (Language::De | Language::En, Label::Name) => "Name",
        (Language::De, Label::Phone) => "Telefon",
        (Language::En, Label::Phone) => "Phone",
        (Language::De, Label::Email) => "E-Mail",
        (Language::En, Label::Email) => "Email",
        (Language::De, Label::Page) => "Seite",
        (Language::En, Label::Page) => "Page",
        (Language::Ar, Label::Name) => "الاسم",
        (Language::Ar, Label::Phone) => "الهاتف",
        (Language::Ar, Label::Email) => "البريد",
        (Language::Ar, Label::Page) => "الصفحة",
    }
}

const fn service_noun(language: Language, service: Service) -> &'static str {
    match (language, service) {
        (Language::De, Service::Packages) => "Reisepaket",
        (Language::De, Service::Services) => "Service",
        (Language::De | Language::En, Service::Tours) => "Tour",
        (Language::De | Language::En, Service::Transfer) => "Transfer",
        (Language::De, Service::CarRental) => "Mietwagen",
        (Language::En, Service::Packages) => "Travel package",
        (Language::En, Service::Services) => "Services",
        (Language::En, Service::CarRental) => "Rental car",
        (Language::Ar, Service::Packages) => "باقة سياحية",
        (Language::Ar, Service::Services) => "خدمات",
        (Language::Ar, Service::Tours) => "جولة",
        (Language::Ar, Service::Transfer) => "نقل",
        (Language::Ar, Service::CarRental) => "تأجير سيارة",
    }
}

/// Localized labels for the well-known extra fields; others print raw.
fn field_label(language: Language, field: &str) -> String {
    let known = match (language, field.to_ascii_lowercase().as_str()) {
        (Language::De, "dob") => "Geburtsdatum",
        (Language::En, "dob") => "Date of birth",
        (Language::Ar, "dob") => "تاريخ الميلاد",
        (Language::De, "car") => "Wunschfahrzeug",
        (Language::En, "car") => "Car",
        (Language::Ar, "car") => "السيارة",
        (Language::De, "startdate") => "Mietbeginn",
        (Language::En, "startdate") => "Start date",
        (Language::Ar, "startdate") => "بداية الإيجار",
        (Language::De, "enddate") => "Mietende",
        (Language::En, "enddate") => "End date",
        (Language::Ar, "enddate") => "نهاية الإيجار",
        (Language::De, "message" | "notes") => "Wünsche",
        (Language::En, "message" | "notes") => "Notes",
        (Language::Ar, "message" | "notes") => "ملاحظات",
        _ => "",
    };
    if known.is_empty() {
        field.to_string()
    } else {
        known.to_string()
    }
}

/// Localized e-mail subject for a service.
pub fn subject(language: Language, service: Service) -> String {
    let noun = service_noun(language, service);
    match language {
        Language::De => format!("{noun} - Angebot anfordern"),
        Language::En => format!("{noun} - Offer Request"),
        Language::Ar => format!("طلب عرض - {noun}"),
    }
}

/// Compose the outgoing message: greeting, intro, labelled fields, consent,
/// page URL. Empty values print as `-`.
pub fn compose(language: Language, service: Service, form: &FormData, page_url: &str) -> String {
    let mut lines = vec![
        language.greeting().to_string(),
        language.intro(service),
        String::new(),
    ];

    let contact_values = [form.name(), form.phone(), form.email()];
    for (field, value) in CONTACT_LABELS.into_iter().zip(contact_values) {
        lines.push(format!("{}: {}", label(language, field), dash_if_empty(&value)));
    }
    for (name, value) in form.iter() {
        if HIDDEN_FIELDS.contains(&name.to_ascii_lowercase().as_str()) {
            continue;
        }
        lines.push(format!(
            "{}: {}",
            field_label(language, name),
            dash_if_empty(value.trim())
        ));
    }

    lines.push(String::new());
    if form.consent() {
        lines.push(language.consent_line().to_string());
    }
    lines.push(format!("{}: {page_url}", label(language, Label::Page)));
    let mut text = lines.join("\n");
    text.push('\n');
    text
}

fn dash_if_empty(value: &str) -> &str {
    if value.is_empty() {
        "-"
    } else {
        value
    }
}

/// Put `reference` into `message`.
///
/// Replaces the first pending placeholder if there is one, else an existing
/// reference line, else inserts a localized reference line after the
/// greeting. An empty reference leaves the message untouched.
pub fn inject_reference(message: &str, reference: &str, language: Language) -> String {
    let reference = reference.trim();
    if reference.is_empty() {
        return message.to_string();
    }

    if let Some(placeholder) = PENDING_PLACEHOLDERS
        .iter()
        .find(|placeholder| message.contains(*placeholder))
    {
        return message.replacen(placeholder, reference, 1);
    }

    let mut lines: Vec<String> = message.split('\n').map(str::to_string).collect();
    if let Some(line) = lines.iter_mut().find(|line| REFERENCE_LINE.is_match(line)) {
        let label = line
            .split_once(':')
            .map_or(language.reference_label(), |(label, _)| label.trim())
            .to_string();
        *line = format!("{label}: {reference}");
        return lines.join("\n");
    }

    let reference_line = format!("{}: {reference}", language.reference_label());
    if message.is_empty() {
        return reference_line;
    }
    lines.insert(1, reference_line);
    lines.join("\n")
}

/// `https://wa.me/<number>?text=<message>`
pub fn whatsapp_url(number: &str, text: &str) -> String {
    format!("https://wa.me/{number}?text={}", urlencoding::encode(text))
}

/// `mailto:<address>?subject=...&body=...`
pub fn mailto_url(address: &str, subject: &str, body: &str) -> String {
    format!(
        "mailto:{address}?subject={}&body={}",
        urlencoding::encode(subject),
        urlencoding::encode(body)
    )
}
