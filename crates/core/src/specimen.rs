//! Specimen resolution between portal sample ids and FHIR Specimens.
//!
//! Responsibilities:
//! - Normalise the portal sample id and build the `TUMOR` Specimen keyed by `identifier=<system>|<id>`
//! - Add one conditional upsert per distinct sample to a transaction Bundle
//! - Recover the portal sample id from a Specimen reference
//!
//! Notes:
//! - A Bundle never carries two upserts for the same Specimen search key; later references reuse
//!   the first entry's full URL.

use crate::constants::SPECIMEN_TYPE_TUMOR;
use crate::context::DecodeContext;
use crate::sample_id::SampleIdRules;
use crate::{MtbError, MtbResult};
use fhir::{Bundle, CodeableConcept, Coding, Identifier, Reference, Specimen};
use uuid::Uuid;

pub const SPECIMEN_TYPE_SYSTEM: &str = "http://terminology.hl7.org/CodeSystem/v2-0487";

#[derive(Clone, Debug)]
pub struct SpecimenMapper {
    system: String,
}

impl SpecimenMapper {
    pub fn new(system: impl Into<String>) -> Self {
        Self {
            system: system.into(),
        }
    }

    pub fn system(&self) -> &str {
        &self.system
    }

    pub fn search_query(&self, identifier_value: &str) -> String {
        format!("identifier={}|{}", self.system, identifier_value)
    }

    pub fn to_resource(&self, patient_ref: &str, identifier_value: &str) -> Specimen {
        Specimen {
            id: None,
            identifier: vec![Identifier::new(&self.system, identifier_value)],
            specimen_type: Some(CodeableConcept::from_coding(Coding::new(
                SPECIMEN_TYPE_SYSTEM,
                SPECIMEN_TYPE_TUMOR,
                "Tumor",
            ))),
            subject: Some(Reference::to(patient_ref)),
        }
    }

    /// Add (or reuse) the Specimen upsert for a portal sample id and return a reference to it.
    pub fn add_to_bundle(
        &self,
        bundle: &mut Bundle,
        patient_ref: &str,
        sample_id: &str,
        rules: &SampleIdRules,
    ) -> Reference {
        let normalized = rules.normalize(sample_id);
        let query = self.search_query(&normalized);
        let specimen = self.to_resource(patient_ref, &normalized);

        let existing = bundle
            .entry_by_request_url(&format!("Specimen?{query}"))
            .and_then(|entry| entry.full_url.clone());
        let full_url = match existing {
            Some(full_url) => full_url,
            None => {
                let full_url = format!("urn:uuid:{}", Uuid::new_v4());
                bundle.add_conditional_upsert(full_url.clone(), specimen.clone(), &query);
                full_url
            }
        };
        Reference::embedded(full_url, specimen)
    }
}

/// Portal sample id of a referenced Specimen.
///
/// The Specimen comes from the reference itself, the Bundle being decoded, or an `_id` search on
/// the repository. The stored identifier value is rewritten by the outbound sample id rules.
///
/// # Errors
///
/// Returns [`MtbError::Mapping`] if the Specimen cannot be found or has no identifier value.
pub fn sample_id(reference: &Reference, ctx: &DecodeContext<'_>) -> MtbResult<String> {
    let resource = ctx.fetch(reference, "Specimen")?;
    let specimen = resource
        .as_specimen()
        .ok_or_else(|| MtbError::Mapping("specimen reference points at another resource".into()))?;
    let value = specimen
        .first_identifier_value()
        .ok_or_else(|| MtbError::Mapping("specimen without identifier value".into()))?;
    Ok(ctx.rules.denormalize(value))
}
