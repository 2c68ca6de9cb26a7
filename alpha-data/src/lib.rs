//! # Alpha-Data
//! Resilient acquisition and aggregation of exchange market data for a dynamic allowlist of
//! assets. One [`Monitor`] cycle:
//! * Fetches the public 24h ticker snapshot and an internal allowlist concurrently, each source
//!   walking an ordered set of mirrors / methods until one answers 2xx.
//! * Caches every fetch result, failures included, per key with its own TTL. Concurrent misses on
//!   the same key share a single upstream request.
//! * Normalises the incompatible upstream schemas into strictly typed records, counting whatever
//!   had to be dropped.
//! * Joins the allowlist against the snapshot (exact, then fuzzy) and enriches what is left via
//!   capped, rate limited candlestick lookups.
//! * Derives volatility and scaled volume, then filters and ranks deterministically.
//!
//! ## Example
//! ```rust,no_run
//! use alpha_data::{config::MonitorConfig, monitor::Monitor};
//!
//! #[tokio::main]
//! async fn main() {
//!     let monitor = Monitor::new(MonitorConfig::default());
//!
//!     match monitor.run_cycle().await {
//!         Ok(report) => {
//!             for ranked in report.records {
//!                 println!(
//!                     "{} volatility={}% volume={}M",
//!                     ranked.symbol(),
//!                     ranked.metrics.volatility_pct.round_dp(2),
//!                     ranked.metrics.volume_millions.round_dp(2),
//!                 );
//!             }
//!         }
//!         Err(error) => eprintln!("cycle failed: {error}"),
//!     }
//! }
//! ```

/// Time-bounded, single-flight result cache.
pub mod cache;

/// [`MonitorConfig`](config::MonitorConfig) and environment overrides.
pub mod config;

/// Upstream endpoint catalogue expressed as ordered [`EndpointSet`](endpoint::EndpointSet)s.
pub mod endpoint;

/// Capped, rate limited per-symbol candlestick enrichment.
pub mod enrich;

/// All [`Error`](std::error::Error)s generated in Alpha-Data.
pub mod error;

/// Sequential failover across an [`EndpointSet`](endpoint::EndpointSet).
pub mod fetch;

/// Exact and fuzzy joining of allowlist entries against the market snapshot.
pub mod matcher;

/// Volatility and volume metrics, ranking and dedup.
pub mod metric;

/// Canonical record types shared by every stage.
pub mod model;

/// Full fetch, join, enrich and rank cycle.
pub mod monitor;

/// Upstream payload normalisation.
pub mod normalise;

pub use monitor::{Monitor, MonitorReport};
