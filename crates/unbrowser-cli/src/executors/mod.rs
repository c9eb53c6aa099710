//! Concrete tier executors backed by plain HTTP.

pub mod browser;
pub mod html;
pub mod http;
pub mod intelligence;
pub mod lightweight;

pub use browser::UnavailableBrowser;
pub use http::HttpFetcher;
pub use intelligence::IntelligenceExecutor;
pub use lightweight::LightweightExecutor;
