use crate::models::StorePrices;
use crate::scrapers::anthropic::{AnthropicClient, LlmConfig};
use crate::scrapers::traits::PriceFetcher;
use crate::scrapers::types::{parse_store_prices, validate_stores};
use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, info};

pub(crate) const SYSTEM_PROMPT: &str = "You are an assistant specialised in extracting product \
information from e-commerce sites. Reply with valid JSON only, without explanations.";

/// Asks the model directly for the price of an item on each store
pub struct LlmPriceFetcher {
    client: AnthropicClient,
    stores: Vec<String>,
}

impl LlmPriceFetcher {
    pub fn new(config: LlmConfig, stores: Vec<String>) -> Result<Self> {
        validate_stores(&stores)?;
        let client = AnthropicClient::new(config)?;
        info!(
            "LLM fetcher ready (model {}, stores: {})",
            client.model(),
            stores.join(", ")
        );
        Ok(Self { client, stores })
    }

    fn build_prompt(&self, item: &str) -> String {
        let example = self
            .stores
            .iter()
            .take(2)
            .map(|store| {
                format!(
                    "  \"{}\": {{\n    \"title\": \"product title\",\n    \"price\": \"R$ XX,XX\",\n    \"url\": \"product url\"\n  }}",
                    store
                )
            })
            .collect::<Vec<_>>()
            .join(",\n");

        format!(
            "Find the product '{item}' in these online stores: {stores}.\n\n\
             For each store, give:\n\
             1. The exact product title\n\
             2. The current price\n\
             3. The product URL\n\n\
             IMPORTANT: reply only with JSON in the following shape, without extra explanations:\n\n\
             {{\n{example},\n  ...\n}}\n\n\
             If the product is not found in a store, use null for that store.",
            item = item,
            stores = self.stores.join(", "),
            example = example,
        )
    }
}

#[async_trait]
impl PriceFetcher for LlmPriceFetcher {
    async fn fetch_prices(&self, item: &str) -> Result<StorePrices> {
        let prompt = self.build_prompt(item);
        let reply = self.client.complete(SYSTEM_PROMPT, &prompt).await?;
        debug!("Model reply for '{}': {} chars", item, reply.len());
        parse_store_prices(&reply)
    }

    fn source_name(&self) -> &'static str {
        "llm"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scrapers::anthropic::testing::{fake_messages_api, text_reply};
    use crate::scrapers::types::{default_stores, UnusableResponse};
    use axum::http::StatusCode;
    use std::time::Duration;

    fn config_for(base_url: String) -> LlmConfig {
        let mut config = LlmConfig::new("test-key");
        config.base_url = base_url;
        config.timeout = Duration::from_secs(5);
        config
    }

    #[tokio::test]
    async fn prompt_names_item_and_every_store() {
        let reply = r#"{"Amazon": {"title": "Dell Inspiron 15", "price": "R$ 3.299,00", "url": "https://amazon.com.br/x"}, "Mercado Livre": null, "Magazine Luiza": null}"#;
        let (base_url, seen) = fake_messages_api(StatusCode::OK, text_reply(reply)).await;
        let fetcher = LlmPriceFetcher::new(config_for(base_url), default_stores()).unwrap();

        let prices = fetcher.fetch_prices("notebook dell inspiron").await.unwrap();
        assert_eq!(prices.len(), 3);
        assert_eq!(prices["Amazon"].as_ref().unwrap().price, "R$ 3.299,00");
        assert!(prices["Mercado Livre"].is_none());

        let requests = seen.lock().unwrap();
        let prompt = requests[0]["messages"][0]["content"].as_str().unwrap();
        assert!(prompt.contains("'notebook dell inspiron'"));
        assert!(prompt.contains("Amazon, Mercado Livre, Magazine Luiza"));
        assert_eq!(requests[0]["system"], SYSTEM_PROMPT);
    }

    #[tokio::test]
    async fn prose_reply_becomes_unusable_response() {
        let (base_url, _) =
            fake_messages_api(StatusCode::OK, text_reply("Sorry, I cannot browse.")).await;
        let fetcher = LlmPriceFetcher::new(config_for(base_url), default_stores()).unwrap();

        let err = fetcher.fetch_prices("smart tv").await.unwrap_err();
        let unusable = err.downcast_ref::<UnusableResponse>().unwrap();
        assert_eq!(unusable.raw, "Sorry, I cannot browse.");
    }

    #[test]
    fn empty_store_list_is_rejected() {
        assert!(LlmPriceFetcher::new(LlmConfig::new("k"), Vec::new()).is_err());
    }
}
