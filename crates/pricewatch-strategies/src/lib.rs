//! Retailer scrape strategies: the strategy contract, the registry that
//! routes jobs, the aggregated fan-out and the concrete retailer clients.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::future::join_all;
use pricewatch_core::{normalize_price, ScrapedItem, AGGREGATED_RETAILER};
use scraper::{ElementRef, Html, Selector};
use thiserror::Error;
use tracing::warn;

pub const CRATE_NAME: &str = "pricewatch-strategies";

const AMAZON_ORIGIN: &str = "https://www.amazon.com";
const DESKTOP_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";
const HTTP_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Error)]
pub enum StrategyError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("{0}")]
    Parse(String),
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("retailer identifier is empty")]
    EmptyIdentifier,
    #[error("unsupported retailer {requested:?} (supported: {})", .supported.join(", "))]
    UnsupportedRetailer {
        requested: String,
        supported: Vec<String>,
    },
}

/// One retailer's search capability.
///
/// `search` is total over the query string: a retailer that finds nothing
/// returns an empty batch, and only transport or extraction problems are
/// errors.
#[async_trait]
pub trait RetailerStrategy: Send + Sync {
    fn retailer(&self) -> &'static str;

    async fn search(&self, query: &str) -> Result<Vec<ScrapedItem>, StrategyError>;
}

/// Lookup table from retailer identifier to strategy.
///
/// Built once at startup and shared read-only; every concrete strategy is
/// registered under its own identifier plus a combined `aggregated` entry.
pub struct StrategyRegistry {
    strategies: HashMap<String, Arc<dyn RetailerStrategy>>,
}

impl StrategyRegistry {
    pub fn new(concrete: Vec<Arc<dyn RetailerStrategy>>) -> Self {
        let mut strategies: HashMap<String, Arc<dyn RetailerStrategy>> = HashMap::new();
        for strategy in &concrete {
            strategies.insert(strategy.retailer().to_string(), strategy.clone());
        }
        strategies.insert(
            AGGREGATED_RETAILER.to_string(),
            Arc::new(AggregatedStrategy::new(concrete)),
        );
        Self { strategies }
    }

    /// Route a retailer identifier to its strategy.
    ///
    /// Identifiers are matched case-insensitively with surrounding
    /// whitespace ignored. The job payload is the only routing input; query
    /// text is never inspected.
    pub fn resolve(&self, identifier: &str) -> Result<Arc<dyn RetailerStrategy>, ResolveError> {
        let wanted = identifier.trim().to_ascii_lowercase();
        if wanted.is_empty() {
            return Err(ResolveError::EmptyIdentifier);
        }
        self.strategies
            .get(&wanted)
            .cloned()
            .ok_or_else(|| ResolveError::UnsupportedRetailer {
                requested: wanted,
                supported: self.supported(),
            })
    }

    pub fn supported(&self) -> Vec<String> {
        let mut supported: Vec<String> = self.strategies.keys().cloned().collect();
        supported.sort();
        supported
    }
}

/// Registry over every production retailer strategy.
pub fn default_registry() -> Result<StrategyRegistry> {
    let amazon = AmazonStrategy::new().context("building amazon strategy")?;
    Ok(StrategyRegistry::new(vec![Arc::new(amazon)]))
}

/// Fans a query out to every registered retailer concurrently and merges
/// whatever comes back. A failing retailer is logged and skipped, never
/// propagated, so one bad site cannot empty the whole result set.
pub struct AggregatedStrategy {
    strategies: Vec<Arc<dyn RetailerStrategy>>,
}

impl AggregatedStrategy {
    pub fn new(strategies: Vec<Arc<dyn RetailerStrategy>>) -> Self {
        Self { strategies }
    }
}

#[async_trait]
impl RetailerStrategy for AggregatedStrategy {
    fn retailer(&self) -> &'static str {
        AGGREGATED_RETAILER
    }

    async fn search(&self, query: &str) -> Result<Vec<ScrapedItem>, StrategyError> {
        let searches = self.strategies.iter().map(|s| s.search(query));
        let outcomes = join_all(searches).await;

        let mut merged = Vec::new();
        for (strategy, outcome) in self.strategies.iter().zip(outcomes) {
            match outcome {
                Ok(items) => merged.extend(items),
                Err(err) => {
                    warn!(
                        retailer = strategy.retailer(),
                        error = %err,
                        "retailer search failed; skipping its results"
                    );
                }
            }
        }
        Ok(merged)
    }
}

/// Amazon search-results scraper over plain HTTPS.
pub struct AmazonStrategy {
    client: reqwest::Client,
}

impl AmazonStrategy {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(HTTP_TIMEOUT)
            .user_agent(DESKTOP_USER_AGENT)
            .build()
            .context("building amazon http client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl RetailerStrategy for AmazonStrategy {
    fn retailer(&self) -> &'static str {
        "amazon"
    }

    async fn search(&self, query: &str) -> Result<Vec<ScrapedItem>, StrategyError> {
        let response = self
            .client
            .get(format!("{AMAZON_ORIGIN}/s"))
            .query(&[("k", query)])
            .send()
            .await?
            .error_for_status()?;
        let body = response.text().await?;
        parse_amazon_results(&body)
    }
}

/// Extract product offers from an Amazon search-results document.
///
/// A card missing its title or price is skipped; only a malformed selector
/// fails the whole page.
pub fn parse_amazon_results(html: &str) -> Result<Vec<ScrapedItem>, StrategyError> {
    let document = Html::parse_document(html);
    let card_sel = parse_selector("[data-component-type='s-search-result']")?;
    let title_sel = parse_selector("h2 a span")?;
    let price_sel = parse_selector(".a-price .a-offscreen")?;
    let link_sel = parse_selector("h2 a")?;
    let image_sel = parse_selector("img.s-image")?;

    let mut items = Vec::new();
    for card in document.select(&card_sel) {
        let Some(title) = select_first_text(&card, &title_sel) else {
            continue;
        };
        let Some(raw_price) = select_first_text(&card, &price_sel) else {
            continue;
        };
        let url = select_first_attr(&card, &link_sel, "href")
            .map(|href| absolute_amazon_url(&href))
            .unwrap_or_default();
        let image = select_first_attr(&card, &image_sel, "src").unwrap_or_default();

        items.push(ScrapedItem {
            title,
            price: normalize_price(&raw_price),
            source: "amazon".to_string(),
            url,
            image,
        });
    }
    Ok(items)
}

fn parse_selector(selector: &str) -> Result<Selector, StrategyError> {
    Selector::parse(selector).map_err(|e| StrategyError::Parse(e.to_string()))
}

fn text_or_none(value: String) -> Option<String> {
    let trimmed = value.trim().to_string();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

fn select_first_text(scope: &ElementRef<'_>, selector: &Selector) -> Option<String> {
    scope
        .select(selector)
        .next()
        .and_then(|n| text_or_none(n.text().collect::<String>()))
}

fn select_first_attr(scope: &ElementRef<'_>, selector: &Selector, attr: &str) -> Option<String> {
    scope
        .select(selector)
        .next()
        .and_then(|n| n.value().attr(attr))
        .and_then(|s| text_or_none(s.to_string()))
}

fn absolute_amazon_url(href: &str) -> String {
    if href.starts_with("http") {
        href.to_string()
    } else {
        format!("{AMAZON_ORIGIN}{href}")
    }
}
