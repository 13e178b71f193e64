//! Series registry: the ordered, append-only symbol → series id mapping.
//!
//! The registry is loaded from the store's registry table at startup and then
//! extended with the entries from configuration. Registration order is kept
//! and persisted, so `list()` is stable across runs.

use crate::domain::{SeriesDescriptor, SeriesId, SeriesIdError};
use thiserror::Error;

/// Registry conflicts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("series '{id}' is already registered for symbol '{existing}', refusing to remap it to '{requested}'")]
    DuplicateSeries {
        id: SeriesId,
        existing: String,
        requested: String,
    },

    #[error("symbol '{symbol}' is already registered as series '{existing}', refusing to register it again as '{requested}'")]
    DuplicateSymbol {
        symbol: String,
        existing: SeriesId,
        requested: SeriesId,
    },

    /// Storage identifiers are case-insensitive, so `spy` and `SPY` would share a table.
    #[error("series id '{requested}' differs from registered series '{existing}' only by case")]
    IdCollision { requested: SeriesId, existing: SeriesId },

    #[error("invalid series id: {0}")]
    InvalidSeriesId(#[from] SeriesIdError),
}

/// Result of a successful `register` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// The descriptor is new and was appended.
    Added,
    /// The identical symbol/id pair was already present; nothing changed.
    AlreadyPresent,
}

/// Ordered set of series descriptors.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SeriesRegistry {
    series: Vec<SeriesDescriptor>,
}

impl SeriesRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from descriptors in order, rejecting conflicts.
    pub fn from_descriptors(
        descriptors: impl IntoIterator<Item = SeriesDescriptor>,
    ) -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        for descriptor in descriptors {
            registry.register(descriptor)?;
        }
        Ok(registry)
    }

    /// Registered series in registration order.
    pub fn list(&self) -> &[SeriesDescriptor] {
        &self.series
    }

    pub fn get(&self, id: &SeriesId) -> Option<&SeriesDescriptor> {
        self.series.iter().find(|d| &d.id == id)
    }

    pub fn find_symbol(&self, symbol: &str) -> Option<&SeriesDescriptor> {
        self.series.iter().find(|d| d.symbol == symbol)
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    /// Register a descriptor.
    ///
    /// Re-registering an identical symbol/id pair is a no-op, so startup can
    /// replay the configured registry every run. A differing group tag on an
    /// existing pair is ignored: the first registration wins.
    pub fn register(&mut self, descriptor: SeriesDescriptor) -> Result<Registration, RegistryError> {
        if let Some(existing) = self.get(&descriptor.id) {
            if existing.symbol == descriptor.symbol {
                return Ok(Registration::AlreadyPresent);
            }
            return Err(RegistryError::DuplicateSeries {
                id: descriptor.id,
                existing: existing.symbol.clone(),
                requested: descriptor.symbol,
            });
        }

        if let Some(existing) = self
            .series
            .iter()
            .find(|d| d.id.as_str().eq_ignore_ascii_case(descriptor.id.as_str()))
        {
            return Err(RegistryError::IdCollision {
                requested: descriptor.id,
                existing: existing.id.clone(),
            });
        }

        if let Some(existing) = self.find_symbol(&descriptor.symbol) {
            return Err(RegistryError::DuplicateSymbol {
                symbol: descriptor.symbol,
                existing: existing.id.clone(),
                requested: descriptor.id,
            });
        }

        self.series.push(descriptor);
        Ok(Registration::Added)
    }

    /// Register every descriptor, returning those that were newly added.
    pub fn extend(
        &mut self,
        descriptors: impl IntoIterator<Item = SeriesDescriptor>,
    ) -> Result<Vec<SeriesDescriptor>, RegistryError> {
        let mut added = Vec::new();
        for descriptor in descriptors {
            if self.register(descriptor.clone())? == Registration::Added {
                added.push(descriptor);
            }
        }
        Ok(added)
    }

    /// The two benchmark indices synced when nothing else is configured.
    pub fn default_indices() -> Self {
        let defaults = [("^GSPC", "SyP_500", "US"), ("^IBEX", "IBEX_35", "ES")];
        let mut registry = Self::new();
        for (symbol, id, group) in defaults {
            let id = SeriesId::new(id).expect("built-in series ids are valid");
            registry.series.push(SeriesDescriptor::new(symbol, id).with_group(group));
        }
        registry
    }
}
