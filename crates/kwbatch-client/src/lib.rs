pub mod ads;
pub mod config;
pub mod credentials;
pub mod engine;
pub mod http;
pub mod oauth;
pub mod trends;

pub use ads::HttpBulkMetricsProvider;
pub use config::{AdsBridgeConfig, ClientConfig, TrendsBridgeConfig};
pub use credentials::EnvCredentialSupplier;
pub use engine::{EngineStore, HttpOrchestrator, build_orchestrator};
pub use trends::HttpTrendScoreProvider;
