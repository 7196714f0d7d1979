use crate::models::StorePrices;
use anyhow::{bail, Result};
use thiserror::Error;

/// Stores searched when none are configured
pub const DEFAULT_STORES: [&str; 3] = ["Amazon", "Mercado Livre", "Magazine Luiza"];

/// A store the browser backend knows how to search
#[derive(Debug, Clone, PartialEq)]
pub struct Storefront {
    pub name: String,
    /// Search page URL with a `{query}` placeholder
    pub search_url: &'static str,
}

impl Storefront {
    /// Look up a store by name, ignoring case
    pub fn known(name: &str) -> Option<Self> {
        let search_url = match name.trim().to_lowercase().as_str() {
            "amazon" => "https://www.amazon.com.br/s?k={query}",
            "mercado livre" => "https://lista.mercadolivre.com.br/{query}",
            "magazine luiza" => "https://www.magazineluiza.com.br/busca/{query}/",
            _ => return None,
        };
        Some(Self {
            name: name.trim().to_string(),
            search_url,
        })
    }

    pub fn search_url_for(&self, item: &str) -> String {
        self.search_url
            .replace("{query}", &urlencoding::encode(item))
    }
}

pub fn default_stores() -> Vec<String> {
    DEFAULT_STORES.iter().map(|s| s.to_string()).collect()
}

/// The model answered, but not with anything readable as prices
#[derive(Debug, Error)]
#[error("unusable model response: {reason}")]
pub struct UnusableResponse {
    pub reason: String,
    pub raw: String,
}

/// Pull the JSON payload out of a reply that may wrap it in prose or a code fence
pub fn extract_json(response: &str) -> &str {
    let trimmed = response.trim();

    if let Some(start) = trimmed.find("```") {
        let after_fence = start + 3;
        let body_start = trimmed[after_fence..]
            .find('\n')
            .map(|i| after_fence + i + 1)
            .unwrap_or(after_fence);
        if let Some(end) = trimmed[body_start..].find("```") {
            return trimmed[body_start..body_start + end].trim();
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if end > start {
            return &trimmed[start..=end];
        }
    }

    trimmed
}

/// Parse a model reply into store prices
pub fn parse_store_prices(response: &str) -> Result<StorePrices> {
    let json = extract_json(response);
    let prices: StorePrices = match serde_json::from_str(json) {
        Ok(prices) => prices,
        Err(e) => {
            return Err(UnusableResponse {
                reason: format!("could not parse JSON: {}", e),
                raw: response.to_string(),
            }
            .into())
        }
    };

    if prices.is_empty() {
        return Err(UnusableResponse {
            reason: "no stores in response".to_string(),
            raw: response.to_string(),
        }
        .into());
    }

    Ok(prices)
}

/// Whether a failure message looks like provider throttling
pub fn is_rate_limited(message: &str) -> bool {
    message.to_lowercase().contains("rate limit")
}

/// Reject store lists the backends cannot work with
pub fn validate_stores(stores: &[String]) -> Result<()> {
    if stores.is_empty() {
        bail!("at least one store is required");
    }
    if let Some(blank) = stores.iter().find(|s| s.trim().is_empty()) {
        bail!("store names must not be blank: {:?}", blank);
    }
    Ok(())
}
