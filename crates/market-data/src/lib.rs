pub mod alpha_vantage;
mod http;
pub mod rate_limit;
pub mod resample;
pub mod service;
pub mod yahoo_finance;

pub use alpha_vantage::AlphaVantageClient;
pub use http::ProviderConfig;
pub use rate_limit::RateLimiter;
pub use service::{BatchOutcome, Fetched, MarketDataService};
pub use yahoo_finance::YahooFinanceClient;
