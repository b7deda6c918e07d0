//! Clinical datum adapters.
//!
//! Responsibilities:
//! - Define the adapter contract for one kind of clinical datum
//! - Dispatch by `attributeId` (JSON -> FHIR) and by Observation code (FHIR -> JSON)
//!
//! Notes:
//! - The registry is a fixed table built at construction. Dispatch never fails: anything without
//!   a specific adapter goes through [`GenericAdapter`].

mod generic;
mod tmb;

pub use generic::GenericAdapter;
pub use tmb::{TmbAdapter, TMB_ATTRIBUTE_ID};

use crate::context::DecodeContext;
use crate::specimen;
use crate::MtbResult;
use api_shared::ClinicalDatum;
use fhir::{Observation, Reference};

pub trait ClinicalDataAdapter: Send + Sync {
    /// Build the Observation for a datum. The caller sets `subject`.
    fn encode(&self, datum: &ClinicalDatum) -> MtbResult<Observation>;

    /// Build the Observation and link it to the datum's Specimen.
    fn encode_with_specimen(
        &self,
        datum: &ClinicalDatum,
        specimen: Reference,
    ) -> MtbResult<Observation> {
        let mut observation = self.encode(datum)?;
        observation.specimen = Some(specimen);
        Ok(observation)
    }

    fn decode(&self, observation: &Observation, ctx: &DecodeContext<'_>)
        -> MtbResult<ClinicalDatum>;

    /// True if this adapter produced the Observation.
    fn matches(&self, observation: &Observation) -> bool;
}

/// Sample id of the Specimen an Observation points at, if it points at one.
pub(crate) fn decode_sample_id(
    observation: &Observation,
    ctx: &DecodeContext<'_>,
) -> MtbResult<Option<String>> {
    observation
        .specimen
        .as_ref()
        .map(|reference| specimen::sample_id(reference, ctx))
        .transpose()
}

pub struct ClinicalDataRegistry {
    adapters: Vec<(&'static str, Box<dyn ClinicalDataAdapter>)>,
    generic: GenericAdapter,
}

impl Default for ClinicalDataRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ClinicalDataRegistry {
    pub fn new() -> Self {
        Self {
            adapters: vec![(TMB_ATTRIBUTE_ID, Box::new(TmbAdapter))],
            generic: GenericAdapter,
        }
    }

    pub fn has_adapter(&self, attribute_id: &str) -> bool {
        self.adapters.iter().any(|(id, _)| *id == attribute_id)
    }

    /// Adapter registered for `attribute_id`, else the generic adapter.
    pub fn adapter(&self, attribute_id: &str) -> &dyn ClinicalDataAdapter {
        self.adapters
            .iter()
            .find(|(id, _)| *id == attribute_id)
            .map(|(_, adapter)| adapter.as_ref())
            .unwrap_or(&self.generic)
    }

    /// Adapter whose coding matches the Observation, else the generic adapter.
    pub fn adapter_for_observation(&self, observation: &Observation) -> &dyn ClinicalDataAdapter {
        self.adapters
            .iter()
            .map(|(_, adapter)| adapter.as_ref())
            .find(|adapter| adapter.matches(observation))
            .unwrap_or(&self.generic)
    }
}
