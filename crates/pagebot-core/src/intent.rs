//! Keyword intent classification
//!
//! A cheap pre-filter deciding whether a message is a catalog query. Rows are
//! tested in table order and the first matching category wins.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentCategory {
    Product,
    Property,
    Payment,
    None,
}

impl IntentCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentCategory::Product => "product",
            IntentCategory::Property => "property",
            IntentCategory::Payment => "payment",
            IntentCategory::None => "none",
        }
    }
}

const PRODUCT_KEYWORDS: &[&str] = &[
    "product",
    "products",
    "item",
    "items",
    "catalog",
    "catalogue",
    "menu",
    "what do you sell",
    "what are you selling",
    "in stock",
    "ano benta",
    "ano ang benta",
    "paninda",
    "produkto",
];

const PROPERTY_KEYWORDS: &[&str] = &[
    "property",
    "properties",
    "condo",
    "house",
    "townhouse",
    "apartment",
    "bedroom",
    "for sale",
    "for rent",
    "house and lot",
    "lot only",
    "price range",
    "amortization",
    "monthly equity",
    "bahay",
    "lupa",
];

const PAYMENT_KEYWORDS: &[&str] = &[
    "gcash",
    "paymaya",
    "bank transfer",
    "bank details",
    "account number",
    "payment",
    "mode of payment",
    "how to pay",
    "bayad",
    "magbayad",
    "bpi",
    "bdo",
];

/// Ordered keyword table: (category, terms)
pub const DEFAULT_KEYWORD_TABLE: &[(IntentCategory, &[&str])] = &[
    (IntentCategory::Product, PRODUCT_KEYWORDS),
    (IntentCategory::Property, PROPERTY_KEYWORDS),
    (IntentCategory::Payment, PAYMENT_KEYWORDS),
];

#[derive(Debug, Clone)]
pub struct IntentClassifier {
    rows: Vec<(IntentCategory, Vec<String>)>,
}

impl IntentClassifier {
    /// Build from custom rows; terms are matched case-insensitively
    pub fn new<I, S>(rows: I) -> Self
    where
        I: IntoIterator<Item = (IntentCategory, Vec<S>)>,
        S: AsRef<str>,
    {
        Self {
            rows: rows
                .into_iter()
                .map(|(category, terms)| {
                    let terms = terms
                        .iter()
                        .map(|t| t.as_ref().trim().to_lowercase())
                        .filter(|t| !t.is_empty())
                        .collect();
                    (category, terms)
                })
                .collect(),
        }
    }

    pub fn classify(&self, text: &str) -> IntentCategory {
        let lowered = text.to_lowercase();
        self.rows
            .iter()
            .find(|(_, terms)| terms.iter().any(|term| lowered.contains(term.as_str())))
            .map(|(category, _)| *category)
            .unwrap_or(IntentCategory::None)
    }
}

impl Default for IntentClassifier {
    fn default() -> Self {
        Self::new(
            DEFAULT_KEYWORD_TABLE
                .iter()
                .map(|(category, terms)| (*category, terms.to_vec())),
        )
    }
}
