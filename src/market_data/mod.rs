pub mod cache;
pub mod client;
pub mod stream;
pub mod types;

pub use client::MarketDataClient;
pub use stream::{run_stream, StreamEvent, SubscriptionSet};
