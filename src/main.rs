mod api;
mod batch;
mod models;
mod scrapers;
mod storage;

use anyhow::{bail, Context, Result};
use batch::{BatchFetcher, BatchSettings, WebhookSink};
use clap::{Args, Parser, Subcommand, ValueEnum};
use models::PriceRecord;
use scrapers::types::default_stores;
use scrapers::{BrowserAgentFetcher, LlmConfig, LlmPriceFetcher, PriceFetcher};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Products looked up when no `--item` is given, in processing order
const DEFAULT_ITEMS: [&str; 3] = [
    "smartphone samsung galaxy s23",
    "notebook dell inspiron",
    "smart tv 50 polegadas",
];

#[derive(Parser, Debug)]
#[command(name = "price-scout", version, about = "Find product prices on e-commerce sites with an LLM")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Look up prices for every item, resuming from the last checkpoint
    Fetch(FetchArgs),
    /// Serve the price document over HTTP
    Serve(ServeArgs),
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum Backend {
    /// Ask the model directly
    Llm,
    /// Load store search pages in headless Chrome and let the model read them
    Browser,
}

#[derive(Args, Debug)]
struct FetchArgs {
    #[arg(long, value_enum, default_value_t = Backend::Llm)]
    backend: Backend,

    /// Product to look up (repeatable); replaces the built-in list
    #[arg(long = "item")]
    items: Vec<String>,

    /// Store to search (repeatable); defaults to Amazon, Mercado Livre, Magazine Luiza
    #[arg(long = "store")]
    stores: Vec<String>,

    #[arg(long, default_value = "product_prices_partial.json")]
    checkpoint: PathBuf,

    #[arg(long, default_value = "product_prices.json")]
    output: PathBuf,

    /// Shortest pause before each fetch, in seconds
    #[arg(long, default_value_t = 15.0)]
    min_delay: f64,

    /// Longest pause before each fetch, in seconds
    #[arg(long, default_value_t = 30.0)]
    max_delay: f64,

    /// Pause after a rate-limit failure, in seconds
    #[arg(long, default_value_t = 60)]
    backoff: u64,

    /// Seconds each store page gets to render (browser backend)
    #[arg(long, default_value_t = 5)]
    settle: u64,

    /// POST the final results here when the batch completes
    #[arg(long)]
    webhook_url: Option<String>,

    /// Override ANTHROPIC_MODEL
    #[arg(long)]
    model: Option<String>,
}

impl FetchArgs {
    fn batch_settings(&self) -> Result<BatchSettings> {
        for (name, secs) in [("--min-delay", self.min_delay), ("--max-delay", self.max_delay)] {
            if !secs.is_finite() || secs < 0.0 {
                bail!("{} must be a non-negative number of seconds, got {}", name, secs);
            }
        }
        if self.min_delay > self.max_delay {
            bail!(
                "--min-delay ({}) must not exceed --max-delay ({})",
                self.min_delay,
                self.max_delay
            );
        }
        if self.checkpoint == self.output {
            bail!("--checkpoint and --output must be different files");
        }

        Ok(BatchSettings {
            checkpoint_path: self.checkpoint.clone(),
            final_path: self.output.clone(),
            delay_range: (
                Duration::from_secs_f64(self.min_delay),
                Duration::from_secs_f64(self.max_delay),
            ),
            error_backoff: Duration::from_secs(self.backoff),
        })
    }

    fn items(&self) -> Vec<String> {
        if self.items.is_empty() {
            DEFAULT_ITEMS.iter().map(|s| s.to_string()).collect()
        } else {
            self.items.clone()
        }
    }

    fn stores(&self) -> Vec<String> {
        if self.stores.is_empty() {
            default_stores()
        } else {
            self.stores.clone()
        }
    }
}

#[derive(Args, Debug)]
struct ServeArgs {
    #[arg(long, default_value = "0.0.0.0:5000")]
    bind: SocketAddr,

    /// Price document to serve
    #[arg(long, default_value = "product_prices.json")]
    prices: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match Cli::parse().command {
        Command::Fetch(args) => fetch(args).await,
        Command::Serve(args) => api::serve(args.bind, args.prices).await,
    }
}

async fn fetch(args: FetchArgs) -> Result<()> {
    let settings = args.batch_settings()?;
    let items = args.items();
    let stores = args.stores();

    let mut llm = LlmConfig::from_env()?;
    if let Some(model) = &args.model {
        llm.model = model.clone();
    }

    info!("🛒 Price Scout");
    info!("==========================================");

    let fetcher: Box<dyn PriceFetcher> = match args.backend {
        Backend::Llm => Box::new(LlmPriceFetcher::new(llm, stores)?),
        Backend::Browser => Box::new(BrowserAgentFetcher::new(
            llm,
            stores,
            Duration::from_secs(args.settle),
        )?),
    };

    let sink = args
        .webhook_url
        .as_deref()
        .map(WebhookSink::new)
        .transpose()?;

    let batch = BatchFetcher::new(fetcher, settings);
    let checkpoint = batch.settings().checkpoint_path.clone();

    info!("Processing {} items...", items.len());

    let (store, report) = tokio::select! {
        result = batch.run(&items) => result.with_context(|| {
            format!("Batch stopped; partial results remain in {}", checkpoint.display())
        })?,
        _ = tokio::signal::ctrl_c() => {
            warn!(
                "Interrupted. Partial results are saved in {}",
                checkpoint.display()
            );
            return Ok(());
        }
    };

    info!(
        "\n✅ Done: {} fetched, {} failed, {} already processed\n",
        report.fetched, report.failed, report.skipped
    );

    if store.is_empty() {
        warn!("No results to show");
    }

    for (i, item) in items.iter().enumerate() {
        let Some(record) = store.get(item) else {
            continue;
        };
        println!("{}. {} ({})", i + 1, item, record.timestamp());
        if let Some(error) = record.error() {
            println!("   error: {}", error);
        } else if let PriceRecord::Found { stores, .. } = record {
            for (name, listing) in stores {
                match listing {
                    Some(listing) => println!("   {}: {} - {}", name, listing.price, listing.title),
                    None => println!("   {}: not found", name),
                }
            }
        } else {
            println!("   (record kept as found in checkpoint)");
        }
        println!();
    }

    if let Some(sink) = sink {
        sink.deliver(&store).await;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_fetch(args: &[&str]) -> FetchArgs {
        let argv = std::iter::once("price-scout")
            .chain(std::iter::once("fetch"))
            .chain(args.iter().copied());
        match Cli::try_parse_from(argv).unwrap().command {
            Command::Fetch(args) => args,
            other => panic!("expected fetch, got {:?}", other),
        }
    }

    #[test]
    fn fetch_defaults_match_built_in_configuration() {
        let args = parse_fetch(&[]);
        let settings = args.batch_settings().unwrap();

        assert_eq!(args.backend, Backend::Llm);
        assert_eq!(args.items(), DEFAULT_ITEMS.map(String::from).to_vec());
        assert_eq!(args.stores(), default_stores());
        assert_eq!(settings.checkpoint_path, PathBuf::from("product_prices_partial.json"));
        assert_eq!(settings.final_path, PathBuf::from("product_prices.json"));
        assert_eq!(
            settings.delay_range,
            (Duration::from_secs(15), Duration::from_secs(30))
        );
        assert_eq!(settings.error_backoff, Duration::from_secs(60));
    }

    #[test]
    fn items_and_stores_can_be_overridden() {
        let args = parse_fetch(&[
            "--backend", "browser", "--item", "geladeira", "--item", "fogão", "--store", "Amazon",
        ]);
        assert_eq!(args.backend, Backend::Browser);
        assert_eq!(args.items(), vec!["geladeira".to_string(), "fogão".to_string()]);
        assert_eq!(args.stores(), vec!["Amazon".to_string()]);
    }

    #[test]
    fn inverted_delay_range_is_rejected() {
        let args = parse_fetch(&["--min-delay", "40", "--max-delay", "10"]);
        assert!(args.batch_settings().is_err());
    }

    #[test]
    fn checkpoint_must_differ_from_output() {
        let args = parse_fetch(&["--checkpoint", "a.json", "--output", "a.json"]);
        assert!(args.batch_settings().is_err());
    }

    #[test]
    fn serve_defaults() {
        let cli = Cli::try_parse_from(["price-scout", "serve"]).unwrap();
        match cli.command {
            Command::Serve(args) => {
                assert_eq!(args.bind, "0.0.0.0:5000".parse::<SocketAddr>().unwrap());
                assert_eq!(args.prices, PathBuf::from("product_prices.json"));
            }
            other => panic!("expected serve, got {:?}", other),
        }
    }
}
