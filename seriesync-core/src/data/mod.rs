//! Source adapters and normalization

pub mod circuit_breaker;
pub mod csv_source;
pub mod normalize;
pub mod provider;
pub mod yahoo;

pub use circuit_breaker::CircuitBreaker;
pub use csv_source::CsvSource;
pub use normalize::{normalize, NormalizeError};
pub use provider::{FetchError, RawObservation, SeriesSource, SourceKind};
pub use yahoo::{YahooConfig, YahooSource, MAX_RETRIES};
