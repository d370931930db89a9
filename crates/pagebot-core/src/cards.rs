//! Catalog carousels
//!
//! Builds generic-template elements for products, properties and payment
//! methods and sends them. Senders return `false` instead of failing so the
//! dispatcher can fall through to the next strategy.

use pagebot_graph::payload::{truncate_chars, MAX_SUBTITLE_CHARS, MAX_TITLE_CHARS};
use pagebot_graph::{Button, CardElement};
use std::sync::Arc;
use tracing::{info, warn};

use crate::messenger::{log_send_failure, Messenger};
use crate::model::{PaymentMethod, Product, Property};

/// Platform carousel limit
pub const MAX_CARDS: usize = 10;
const SUBTITLE_SEPARATOR: &str = " • ";
const PRICE_ON_REQUEST: &str = "Price upon request";

#[derive(Debug, Clone)]
pub struct CardSettings {
    pub currency_symbol: String,
    /// Used for "View Details" links when a row has no URL of its own
    pub public_base_url: String,
}

impl Default for CardSettings {
    fn default() -> Self {
        Self {
            currency_symbol: "₱".to_string(),
            public_base_url: "http://localhost:3000".to_string(),
        }
    }
}

/// Format an amount with thousands grouping and two decimals, e.g. `₱1,250,000.00`
pub fn format_price(amount: Option<f64>, symbol: &str) -> String {
    let Some(amount) = amount.filter(|a| a.is_finite()) else {
        return PRICE_ON_REQUEST.to_string();
    };

    let cents = (amount.abs() * 100.0).round() as u64;
    let whole = (cents / 100).to_string();
    let fraction = cents % 100;

    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (i, digit) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }

    let sign = if amount < 0.0 && cents > 0 { "-" } else { "" };
    format!("{}{}{}.{:02}", sign, symbol, grouped, fraction)
}

/// Join the present subtitle parts, `None` if nothing is left
fn subtitle(parts: &[Option<String>]) -> Option<String> {
    let joined = parts
        .iter()
        .flatten()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .take(3)
        .collect::<Vec<_>>()
        .join(SUBTITLE_SEPARATOR);

    if joined.is_empty() {
        None
    } else {
        Some(truncate_chars(&joined, MAX_SUBTITLE_CHARS))
    }
}

fn details_url(own: Option<&str>, settings: &CardSettings, kind: &str, id: &uuid::Uuid) -> String {
    match own.filter(|u| !u.is_empty()) {
        Some(url) => url.to_string(),
        None => format!(
            "{}/{}/{}",
            settings.public_base_url.trim_end_matches('/'),
            kind,
            id
        ),
    }
}

pub fn product_elements(items: &[Product], settings: &CardSettings) -> Vec<CardElement> {
    items
        .iter()
        .take(MAX_CARDS)
        .map(|p| CardElement {
            title: truncate_chars(&p.name, MAX_TITLE_CHARS),
            subtitle: subtitle(&[
                Some(format_price(p.price, &settings.currency_symbol)),
                p.category.clone(),
                p.description.clone(),
            ]),
            image_url: p.image_url.clone(),
            buttons: vec![Button::link(
                "View Details",
                &details_url(p.product_url.as_deref(), settings, "products", &p.id),
            )],
        })
        .collect()
}

pub fn property_elements(items: &[Property], settings: &CardSettings) -> Vec<CardElement> {
    items
        .iter()
        .take(MAX_CARDS)
        .map(|p| {
            let kind = match (p.bedrooms, p.property_type.as_deref()) {
                (Some(beds), Some(kind)) => Some(format!("{}BR {}", beds, kind)),
                (Some(beds), None) => Some(format!("{}BR", beds)),
                (None, kind) => kind.map(str::to_string),
            };
            CardElement {
                title: truncate_chars(&p.title, MAX_TITLE_CHARS),
                subtitle: subtitle(&[
                    Some(format_price(p.price, &settings.currency_symbol)),
                    p.location.clone(),
                    kind,
                ]),
                image_url: p.image_url.clone(),
                buttons: vec![
                    Button::link(
                        "View Details",
                        &details_url(p.listing_url.as_deref(), settings, "properties", &p.id),
                    ),
                    Button::postback("Inquire", format!("INQUIRE_{}", p.id)),
                ],
            }
        })
        .collect()
}

pub fn payment_elements(items: &[PaymentMethod]) -> Vec<CardElement> {
    items
        .iter()
        .take(MAX_CARDS)
        .map(|m| {
            let mut buttons = vec![Button::postback("Pay Here", format!("PAY_{}", m.id))];
            if let Some(qr) = m.qr_code_url.as_deref().filter(|u| !u.is_empty()) {
                buttons.push(Button::link("View QR", qr));
            }
            CardElement {
                title: truncate_chars(&m.name, MAX_TITLE_CHARS),
                subtitle: subtitle(&[
                    m.account_name.clone(),
                    m.account_number.clone(),
                    m.instructions.clone(),
                ]),
                image_url: m.qr_code_url.clone(),
                buttons,
            }
        })
        .collect()
}

pub struct CardSender {
    messenger: Arc<dyn Messenger>,
    settings: CardSettings,
}

impl CardSender {
    pub fn new(messenger: Arc<dyn Messenger>, settings: CardSettings) -> Self {
        Self {
            messenger,
            settings,
        }
    }

    pub async fn send_products(&self, sender_id: &str, items: &[Product], page_id: &str) -> bool {
        let elements = product_elements(items, &self.settings);
        self.send("product cards", sender_id, elements, page_id)
            .await
    }

    pub async fn send_properties(
        &self,
        sender_id: &str,
        items: &[Property],
        page_id: &str,
    ) -> bool {
        let elements = property_elements(items, &self.settings);
        self.send("property cards", sender_id, elements, page_id)
            .await
    }

    pub async fn send_payment_methods(
        &self,
        sender_id: &str,
        items: &[PaymentMethod],
        page_id: &str,
    ) -> bool {
        let elements = payment_elements(items);
        self.send("payment cards", sender_id, elements, page_id)
            .await
    }

    async fn send(
        &self,
        what: &str,
        sender_id: &str,
        elements: Vec<CardElement>,
        page_id: &str,
    ) -> bool {
        if elements.is_empty() {
            warn!("No {} to send to {}", what, sender_id);
            return false;
        }

        let count = elements.len();
        match self.messenger.send_cards(page_id, sender_id, elements).await {
            Ok(()) => {
                info!("📤 Sent {} {} to {}", count, what, sender_id);
                true
            }
            Err(e) => {
                log_send_failure(what, sender_id, &e);
                false
            }
        }
    }
}
