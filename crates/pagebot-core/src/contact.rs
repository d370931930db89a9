//! Contact details and names mentioned in chat

use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;

use crate::collaborators::ContactExtractor;
use crate::model::ContactInfo;

/// Philippine mobile numbers: 09XX XXX XXXX or +63 9XX XXX XXXX
const PHONE_PATTERN: &str = r"(?:\+?63|0)\s?9\d{2}[\s-]?\d{3}[\s-]?\d{4}";
const EMAIL_PATTERN: &str = r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}";
/// Introductions in English and Filipino followed by a capitalised name
const NAME_PATTERN: &str = r"(?i:my name is|this is|ako si|name ko ay|name ko is|pangalan ko ay|pangalan ko)\s+([A-Z][a-zA-Z'-]+(?:\s+[A-Z][a-zA-Z'-]+){0,2})";

pub struct RegexContactExtractor {
    phone: Regex,
    email: Regex,
    name: Regex,
}

impl RegexContactExtractor {
    pub fn new() -> Result<Self> {
        Ok(Self {
            phone: Regex::new(PHONE_PATTERN)?,
            email: Regex::new(EMAIL_PATTERN)?,
            name: Regex::new(NAME_PATTERN)?,
        })
    }

    pub fn find_contact(&self, text: &str) -> ContactInfo {
        ContactInfo {
            phone: self.phone.find(text).map(|m| normalize_phone(m.as_str())),
            email: self
                .email
                .find(text)
                .map(|m| m.as_str().to_lowercase()),
        }
    }

    pub fn find_name(&self, text: &str) -> Option<String> {
        self.name
            .captures(text)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string())
    }
}

/// Digits only, local `09...` form
fn normalize_phone(raw: &str) -> String {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    match digits.strip_prefix("63") {
        Some(rest) if rest.len() == 10 => format!("0{}", rest),
        _ => digits,
    }
}

#[async_trait]
impl ContactExtractor for RegexContactExtractor {
    async fn extract_contact(&self, text: &str) -> Result<ContactInfo> {
        Ok(self.find_contact(text))
    }

    async fn extract_name(&self, text: &str) -> Result<Option<String>> {
        Ok(self.find_name(text))
    }
}
