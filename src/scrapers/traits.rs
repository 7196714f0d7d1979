use crate::models::StorePrices;
use anyhow::Result;
use async_trait::async_trait;

/// Common trait for everything that can look up prices for one item.
/// The batch loop only sees this, so new backends slot in without touching it.
#[async_trait]
pub trait PriceFetcher: Send + Sync {
    /// Find the item on every configured store
    async fn fetch_prices(&self, item: &str) -> Result<StorePrices>;

    /// Get the name of the fetch backend
    fn source_name(&self) -> &'static str;
}
