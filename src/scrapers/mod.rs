pub mod anthropic;
pub mod browser;
pub mod llm;
pub mod traits;
pub mod types;

pub use anthropic::LlmConfig;
pub use browser::BrowserAgentFetcher;
pub use llm::LlmPriceFetcher;
pub use traits::PriceFetcher;
