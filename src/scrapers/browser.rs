use crate::models::StorePrices;
use crate::scrapers::anthropic::{AnthropicClient, LlmConfig};
use crate::scrapers::llm::SYSTEM_PROMPT;
use crate::scrapers::traits::PriceFetcher;
use crate::scrapers::types::{parse_store_prices, validate_stores, Storefront};
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use headless_chrome::{Browser, LaunchOptions};
use reqwest::Url;
use scraper::{Html, Selector};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Links kept per page in the digest sent to the model
const MAX_LINKS: usize = 40;
/// Price-looking text fragments kept per page
const MAX_PRICE_SNIPPETS: usize = 40;
const MIN_LINK_TEXT: usize = 12;

const DISMISS_COOKIES_JS: &str = r#"
    const button = document.querySelector('button[id*="accept"], button[id*="cookie"], button[data-testid*="accept"]');
    if (button) button.click();
"#;

/// Drives headless Chrome through each store's search page and lets the
/// model pick the matching listing out of what the browser saw
pub struct BrowserAgentFetcher {
    browser: Browser,
    client: AnthropicClient,
    stores: Vec<Storefront>,
    settle: Duration,
}

impl BrowserAgentFetcher {
    /// Launch the browser. `settle` is how long each page gets to render.
    pub fn new(config: LlmConfig, stores: Vec<String>, settle: Duration) -> Result<Self> {
        validate_stores(&stores)?;
        let stores = stores
            .iter()
            .map(|name| {
                Storefront::known(name)
                    .with_context(|| format!("No search page known for store '{}'", name))
            })
            .collect::<Result<Vec<_>>>()?;

        info!("Launching headless Chrome...");

        let options = LaunchOptions::default_builder()
            .headless(true)
            .build()
            .context("Failed to build launch options")?;

        let browser = Browser::new(options).context("Failed to launch Chrome browser")?;
        let client = AnthropicClient::new(config)?;

        Ok(Self {
            browser,
            client,
            stores,
            settle,
        })
    }

    fn build_prompt(&self, item: &str, digests: &[(String, String)]) -> String {
        let names = self
            .stores
            .iter()
            .map(|s| s.name.as_str())
            .collect::<Vec<_>>()
            .join(", ");

        let mut prompt = format!(
            "A browser searched for '{}' on {}. Below is what each search page showed.\n\
             For each store, pick the listing that best matches the product and extract:\n\
             1. Product title\n\
             2. Current price\n\
             3. URL of the product page\n\n\
             Reply only with a JSON object keyed by store name, each value an object with \
             \"title\", \"price\" and \"url\", or null if the product is not on that page.\n",
            item, names
        );

        for (store, digest) in digests {
            prompt.push_str(&format!("\n=== {} ===\n{}\n", store, digest));
        }
        prompt
    }
}

#[async_trait]
impl PriceFetcher for BrowserAgentFetcher {
    async fn fetch_prices(&self, item: &str) -> Result<StorePrices> {
        let browser = self.browser.clone();
        let stores = self.stores.clone();
        let settle = self.settle;
        let query = item.to_string();

        let pages = tokio::task::spawn_blocking(move || {
            stores
                .into_iter()
                .map(|store| {
                    let url = store.search_url_for(&query);
                    let digest = capture_page(&browser, &url, settle)
                        .and_then(|html| page_digest(&html, &url));
                    (store.name, digest)
                })
                .collect::<Vec<_>>()
        })
        .await
        .context("Browser task panicked")?;

        let mut digests = Vec::with_capacity(pages.len());
        for (store, digest) in pages {
            match digest {
                Ok(digest) => digests.push((store, digest)),
                Err(e) => {
                    warn!("Could not load {} for '{}': {:#}", store, item, e);
                    digests.push((store, "(page could not be loaded)".to_string()));
                }
            }
        }

        if digests.iter().all(|(_, d)| d.starts_with("(page could not be loaded)")) {
            bail!("No store page could be loaded for '{}'", item);
        }

        let prompt = self.build_prompt(item, &digests);
        let reply = self.client.complete(SYSTEM_PROMPT, &prompt).await?;
        let mut prices = parse_store_prices(&reply)?;

        // Stores the model skipped count as "not found"
        for store in &self.stores {
            prices.entry(store.name.clone()).or_insert(None);
        }
        Ok(prices)
    }

    fn source_name(&self) -> &'static str {
        "browser"
    }
}

/// Open `url` in a fresh tab and return the rendered HTML
fn capture_page(browser: &Browser, url: &str, settle: Duration) -> Result<String> {
    debug!("Opening {}", url);
    let tab = browser.new_tab()?;

    tab.navigate_to(url)?;
    tab.wait_until_navigated()?;
    thread::sleep(settle);

    let _ = tab.evaluate(DISMISS_COOKIES_JS, false);

    let html = tab
        .evaluate("document.documentElement.outerHTML", false)?
        .value
        .and_then(|value| value.as_str().map(str::to_string))
        .unwrap_or_default();

    if let Err(e) = tab.close(true) {
        debug!("Failed to close tab for {}: {}", url, e);
    }

    if html.is_empty() {
        bail!("Page HTML is empty");
    }
    debug!("Captured {} bytes from {}", html.len(), url);
    Ok(html)
}

/// Reduce a search results page to the product links and price fragments
/// on it, small enough to fit in a prompt
pub fn page_digest(html: &str, page_url: &str) -> Result<String> {
    let document = Html::parse_document(html);
    let link_selector =
        Selector::parse("a[href]").map_err(|e| anyhow!("invalid link selector: {}", e))?;
    let base = Url::parse(page_url).ok();

    let mut lines = Vec::new();
    let mut seen = std::collections::HashSet::new();

    for link in document.select(&link_selector) {
        if lines.len() >= MAX_LINKS {
            break;
        }
        let text = collapse_whitespace(&link.text().collect::<String>());
        if text.chars().count() < MIN_LINK_TEXT {
            continue;
        }
        let href = link.value().attr("href").unwrap_or_default();
        let href = match base.as_ref().and_then(|b| b.join(href).ok()) {
            Some(url) => url.to_string(),
            None => href.to_string(),
        };
        if seen.insert(href.clone()) {
            lines.push(format!("- {} <{}>", text, href));
        }
    }

    let prices = document
        .root_element()
        .text()
        .map(collapse_whitespace)
        .filter(|t| t.contains("R$"))
        .take(MAX_PRICE_SNIPPETS)
        .collect::<Vec<_>>();

    if lines.is_empty() && prices.is_empty() {
        bail!("No product links or prices on page");
    }

    let mut digest = String::from("Links:\n");
    digest.push_str(&lines.join("\n"));
    digest.push_str("\nPrices seen:\n");
    digest.push_str(&prices.join(" | "));
    Ok(digest)
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
