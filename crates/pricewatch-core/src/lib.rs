//! Core domain model and price normalization for pricewatch.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "pricewatch-core";

/// Registry identifier that fans a query out across every retailer.
pub const AGGREGATED_RETAILER: &str = "aggregated";

/// Scrape request decoded from a queue payload.
///
/// Payloads that omit `retailer` route to the aggregated strategy, so a
/// plain `{"query": "..."}` message still searches everything.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapeJob {
    #[serde(default = "default_retailer")]
    pub retailer: String,
    #[serde(default)]
    pub query: String,
}

fn default_retailer() -> String {
    AGGREGATED_RETAILER.to_string()
}

/// One offer extracted by a retailer strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapedItem {
    pub title: String,
    pub price: f64,
    pub source: String,
    pub url: String,
    pub image: String,
}

/// Canonical persisted product row, identified by `(source, url)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductRecord {
    pub title: String,
    pub price: f64,
    pub source: String,
    pub url: String,
    pub image: String,
    pub query: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProductRecord {
    pub fn from_item(item: &ScrapedItem, query: &str, at: DateTime<Utc>) -> Self {
        Self {
            title: item.title.clone(),
            price: item.price,
            source: item.source.clone(),
            url: item.url.clone(),
            image: item.image.clone(),
            query: query.to_string(),
            created_at: at,
            updated_at: at,
        }
    }
}

/// Best-effort conversion of a raw price string into an amount.
///
/// Understands `$1,299.99`, `1.299,99 €`, `"999"` and similar retailer
/// formats. Anything unparseable comes back as `0.0` rather than an error,
/// so a garbled price never sinks the rest of a result page.
pub fn normalize_price(raw: &str) -> f64 {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == ',')
        .collect();
    if cleaned.is_empty() {
        return 0.0;
    }

    let has_comma = cleaned.contains(',');
    let has_dot = cleaned.contains('.');
    let candidate = if has_comma && has_dot {
        // The rightmost separator is the decimal mark; the other is grouping.
        if cleaned.rfind(',') > cleaned.rfind('.') {
            cleaned.replace('.', "").replace(',', ".")
        } else {
            cleaned.replace(',', "")
        }
    } else if has_comma {
        // A lone comma with exactly two trailing digits is a decimal comma;
        // any other comma pattern is thousands grouping.
        let parts: Vec<&str> = cleaned.split(',').collect();
        if parts.len() == 2 && parts[1].len() == 2 {
            cleaned.replace(',', ".")
        } else {
            cleaned.replace(',', "")
        }
    } else {
        cleaned
    };

    match candidate.parse::<f64>() {
        Ok(value) => (value * 100.0).round() / 100.0,
        Err(_) => 0.0,
    }
}
