//! Domain types for seriesync

pub mod observation;
pub mod series;

pub use observation::{format_date_key, parse_date_key, Observation, DATE_KEY_FORMAT};
pub use series::{SeriesDescriptor, SeriesId, SeriesIdError, MAX_SERIES_ID_LEN, REGISTRY_TABLE};
