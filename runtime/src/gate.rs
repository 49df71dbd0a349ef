//! Minimum-field quality gate applied to every normalized record.

use crate::config::GateConfig;
use crate::error::{HarvestError, HarvestResult};
use crate::types::NormalizedRecord;

/// A record passes with a name plus one accepted secondary field.
#[derive(Debug, Clone, Default)]
pub struct QualityGate {
    config: GateConfig,
}

impl QualityGate {
    pub fn new(config: GateConfig) -> Self {
        Self { config }
    }

    pub fn check(&self, record: &NormalizedRecord) -> HarvestResult<()> {
        if self.passes(record) {
            Ok(())
        } else {
            Err(HarvestError::MissingCoreFields)
        }
    }

    pub fn passes(&self, record: &NormalizedRecord) -> bool {
        if record.name.as_deref().map_or(true, str::is_empty) {
            return false;
        }
        let has_price = record
            .price
            .as_ref()
            .is_some_and(|p| p.amount_minor_units.is_some() || p.ambiguous);
        let has_availability = record.availability.is_some();
        let has_external_id = record.external_id.is_some();

        (self.config.accept_price && has_price)
            || (self.config.accept_availability && has_availability)
            || (self.config.accept_external_id && has_external_id)
    }
}
