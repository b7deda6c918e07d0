//! Reasoning <-> FHIR.
//!
//! Responsibilities:
//! - Turn the clinical data of a recommendation into contained Observations listed in the
//!   efficacy Observation's `hasMember`, adding Specimen upserts as needed
//! - Turn its genetic alterations into upserted Observations listed in `derivedFrom`, with one
//!   Observation per (gene, patient) per request
//! - Rebuild the Reasoning from an efficacy Observation
//!
//! Notes:
//! - A failing element is logged and skipped; it never aborts the rest of the Reasoning.
//! - [`GeneticObservationIndex`] belongs to one request. Create a new one per submission.

use crate::clinical_data::ClinicalDataRegistry;
use crate::context::DecodeContext;
use crate::genetic_alteration;
use crate::sample_id::SampleIdRules;
use crate::specimen::SpecimenMapper;
use crate::{MtbError, MtbResult};
use api_shared::{ClinicalDatum, GeneticAlteration, Reasoning};
use fhir::{Bundle, Observation, Reference, Resource};
use std::collections::HashMap;
use uuid::Uuid;

/// Genetic Observations already placed in the Bundle of the current request, keyed by their
/// upsert search query (gene system, Entrez id and patient).
#[derive(Debug, Default)]
pub struct GeneticObservationIndex {
    entries: HashMap<String, Reference>,
}

impl GeneticObservationIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn get(&self, key: &str) -> Option<&Reference> {
        self.entries.get(key)
    }

    fn insert(&mut self, key: String, reference: Reference) {
        self.entries.insert(key, reference);
    }
}

pub struct ReasoningMapper {
    registry: ClinicalDataRegistry,
    specimens: SpecimenMapper,
}

impl ReasoningMapper {
    pub fn new(registry: ClinicalDataRegistry, specimens: SpecimenMapper) -> Self {
        Self {
            registry,
            specimens,
        }
    }

    pub fn specimens(&self) -> &SpecimenMapper {
        &self.specimens
    }

    /// Map a Reasoning onto `efficacy` and `bundle`.
    ///
    /// Clinical Observations are contained in `efficacy` and linked through `hasMember`. Genetic
    /// Observations are added to `bundle` (or reused from `index`). Returns the `derivedFrom`
    /// references to the genetic Observations.
    pub fn to_fhir(
        &self,
        reasoning: &Reasoning,
        patient_ref: &str,
        bundle: &mut Bundle,
        index: &mut GeneticObservationIndex,
        rules: &SampleIdRules,
        efficacy: &mut Observation,
    ) -> Vec<Reference> {
        for datum in &reasoning.clinical_data {
            match self.clinical_observation(datum, patient_ref, bundle, rules) {
                Ok(mut observation) => {
                    let local_id = format!("clinical-{}", efficacy.contained.len() + 1);
                    observation.id = Some(local_id.clone());
                    efficacy.contained.push(observation.into());
                    efficacy.has_member.push(Reference::to(format!("#{local_id}")));
                }
                Err(err) => tracing::warn!(
                    attribute_id = %datum.attribute_id,
                    error = %err,
                    "skipping clinical datum"
                ),
            }
        }

        let mut derived_from = Vec::with_capacity(reasoning.genetic_alterations.len());
        for alteration in &reasoning.genetic_alterations {
            match self.genetic_reference(alteration, patient_ref, bundle, index) {
                Ok(reference) => derived_from.push(reference),
                Err(err) => tracing::warn!(
                    entrez_gene_id = alteration.entrez_gene_id,
                    error = %err,
                    "skipping genetic alteration"
                ),
            }
        }
        derived_from
    }

    fn clinical_observation(
        &self,
        datum: &ClinicalDatum,
        patient_ref: &str,
        bundle: &mut Bundle,
        rules: &SampleIdRules,
    ) -> MtbResult<Observation> {
        let adapter = self.registry.adapter(&datum.attribute_id);
        let sample = datum
            .sample_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());

        let mut observation = match sample {
            Some(sample) => {
                let specimen = self
                    .specimens
                    .add_to_bundle(bundle, patient_ref, sample, rules);
                adapter.encode_with_specimen(datum, specimen)?
            }
            None => adapter.encode(datum)?,
        };
        observation.subject = Some(Reference::to(patient_ref));
        Ok(observation)
    }

    fn genetic_reference(
        &self,
        alteration: &GeneticAlteration,
        patient_ref: &str,
        bundle: &mut Bundle,
        index: &mut GeneticObservationIndex,
    ) -> MtbResult<Reference> {
        let query = genetic_alteration::search_query(alteration.entrez_gene_id, patient_ref);
        if let Some(existing) = index.get(&query) {
            tracing::debug!(
                entrez_gene_id = alteration.entrez_gene_id,
                "reusing genetic observation"
            );
            return Ok(existing.clone());
        }

        let mut observation = genetic_alteration::encode(alteration)?;
        observation.subject = Some(Reference::to(patient_ref));

        let full_url = format!("urn:uuid:{}", Uuid::new_v4());
        bundle.add_conditional_upsert(full_url.clone(), observation.clone(), &query);
        let reference = Reference::embedded(full_url, observation);
        index.insert(query, reference.clone());
        Ok(reference)
    }

    /// Rebuild the Reasoning behind an efficacy Observation.
    pub fn from_fhir(&self, efficacy: &Observation, ctx: &DecodeContext<'_>) -> Reasoning {
        let mut reasoning = Reasoning::default();

        for member in &efficacy.has_member {
            let contained = member
                .contained_id()
                .and_then(|local_id| efficacy.contained_resource(local_id));
            let decoded = match contained {
                Some(resource) => self.decode_clinical(resource, ctx),
                None => ctx
                    .fetch(member, "Observation")
                    .and_then(|resource| self.decode_clinical(&resource, ctx)),
            };
            match decoded {
                Ok(datum) => reasoning.clinical_data.push(datum),
                Err(err) => tracing::warn!(
                    member = ?member.reference,
                    error = %err,
                    "skipping clinical member"
                ),
            }
        }

        for source in &efficacy.derived_from {
            let decoded = ctx.fetch(source, "Observation").and_then(|resource| {
                let observation = resource.as_observation().ok_or_else(|| {
                    MtbError::Mapping("derivedFrom does not point at an Observation".into())
                })?;
                genetic_alteration::decode(observation)
            });
            match decoded {
                Ok(alteration) => reasoning.genetic_alterations.push(alteration),
                Err(err) => tracing::warn!(
                    source = ?source.reference,
                    error = %err,
                    "skipping genetic source"
                ),
            }
        }
        reasoning
    }

    fn decode_clinical(
        &self,
        resource: &Resource,
        ctx: &DecodeContext<'_>,
    ) -> MtbResult<ClinicalDatum> {
        let observation = resource.as_observation().ok_or_else(|| {
            MtbError::Mapping(format!(
                "hasMember points at a {}",
                resource.resource_type()
            ))
        })?;
        self.registry
            .adapter_for_observation(observation)
            .decode(observation, ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clinical_data::TMB_ATTRIBUTE_ID;
    use crate::repository::{FhirRepository, InMemoryRepository};
    use fhir::HttpVerb;
    use pretty_assertions::assert_eq;

    const SPECIMEN_SYSTEM: &str = "https://example.org/specimen";

    fn mapper() -> ReasoningMapper {
        ReasoningMapper::new(
            ClinicalDataRegistry::new(),
            SpecimenMapper::new(SPECIMEN_SYSTEM),
        )
    }

    fn reasoning() -> Reasoning {
        Reasoning {
            clinical_data: vec![
                ClinicalDatum {
                    attribute_id: "CANCER_TYPE".into(),
                    attribute_name: "Cancer type".into(),
                    value: Some("Melanoma".into()),
                    sample_id: Some("S-1".into()),
                },
                ClinicalDatum {
                    attribute_id: TMB_ATTRIBUTE_ID.into(),
                    attribute_name: "TMB".into(),
                    value: Some("not a number".into()),
                    sample_id: None,
                },
            ],
            genetic_alterations: vec![
                GeneticAlteration {
                    entrez_gene_id: 673,
                    hugo_gene_symbol: Some("BRAF".into()),
                    alteration: Some("V600E".into()),
                },
                GeneticAlteration {
                    entrez_gene_id: 7157,
                    hugo_gene_symbol: Some("TP53".into()),
                    alteration: None,
                },
            ],
        }
    }

    #[test]
    fn failing_alterations_are_skipped_and_clinical_data_kept() {
        let mapper = mapper();
        let mut bundle = Bundle::transaction();
        let mut index = GeneticObservationIndex::new();
        let mut efficacy = Observation::default();

        let derived = mapper.to_fhir(
            &reasoning(),
            "urn:uuid:patient",
            &mut bundle,
            &mut index,
            &SampleIdRules::default(),
            &mut efficacy,
        );

        // a non-numeric TMB is kept as a clinical finding
        assert_eq!(efficacy.contained.len(), 2);
        assert_eq!(efficacy.has_member[0].reference.as_deref(), Some("#clinical-1"));
        assert_eq!(efficacy.has_member[1].reference.as_deref(), Some("#clinical-2"));
        assert_eq!(derived.len(), 1);
        assert_eq!(index.len(), 1);
        // one Specimen and one genetic Observation
        assert_eq!(bundle.entry.len(), 2);
        assert!(bundle
            .entry
            .iter()
            .all(|e| e.request.as_ref().map(|r| r.method) == Some(HttpVerb::Put)));
    }

    #[test]
    fn same_gene_in_one_request_is_built_once() {
        let mapper = mapper();
        let mut bundle = Bundle::transaction();
        let mut index = GeneticObservationIndex::new();
        let rules = SampleIdRules::default();

        let mut first = Observation::default();
        let mut second = Observation::default();
        let a = mapper.to_fhir(&reasoning(), "urn:uuid:p", &mut bundle, &mut index, &rules, &mut first);
        let b = mapper.to_fhir(&reasoning(), "urn:uuid:p", &mut bundle, &mut index, &rules, &mut second);

        assert_eq!(a[0].reference, b[0].reference);
        let genetic_entries = bundle
            .entry
            .iter()
            .filter(|e| e.request.as_ref().is_some_and(|r| r.url.starts_with("Observation?")))
            .count();
        assert_eq!(genetic_entries, 1);
        let specimen_entries = bundle
            .entry
            .iter()
            .filter(|e| e.request.as_ref().is_some_and(|r| r.url.starts_with("Specimen?")))
            .count();
        assert_eq!(specimen_entries, 1);
    }

    #[test]
    fn reasoning_survives_a_repository_round_trip() {
        let mapper = mapper();
        let rules = SampleIdRules::default();
        let repository = InMemoryRepository::new();
        let mut bundle = Bundle::transaction();
        let mut index = GeneticObservationIndex::new();
        let mut efficacy = Observation {
            identifier: vec![fhir::Identifier::new("tr", "1")],
            ..Default::default()
        };

        let input = reasoning();
        let derived =
            mapper.to_fhir(&input, "Patient/1", &mut bundle, &mut index, &rules, &mut efficacy);
        efficacy.derived_from = derived;
        bundle.add_conditional_upsert("urn:uuid:efficacy", efficacy, "identifier=tr|1");
        repository.transaction(&bundle).unwrap();

        let stored = repository
            .search("Observation", &[("identifier", "tr|1")])
            .unwrap();
        let stored_efficacy = stored.resources().next().and_then(Resource::as_observation).unwrap();

        let ctx = DecodeContext::new(&rules, &repository);
        let decoded = mapper.from_fhir(stored_efficacy, &ctx);

        assert_eq!(decoded.clinical_data, input.clinical_data);
        assert_eq!(
            decoded.genetic_alterations,
            vec![input.genetic_alterations[0].clone()]
        );
    }
}
