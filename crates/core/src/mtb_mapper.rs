//! MTB records <-> FHIR.
//!
//! Responsibilities:
//! - Build the transaction Bundle for one patient's MTB list: Patient, one DiagnosticReport per
//!   MTB, one efficacy Observation per therapy recommendation, plus whatever the Reasoning needs
//! - Rebuild the MTB list from a patient record Bundle
//! - Build conditional delete Bundles
//! - Find therapy recommendations and PMIDs by genetic alteration
//!
//! Notes:
//! - Every entry is a conditional upsert keyed by a business identifier, so resubmitting the same
//!   MTB list updates resources in place.

use crate::clinical_data::ClinicalDataRegistry;
use crate::config::Settings;
use crate::constants::{
    LOINC_LEVEL_OF_EVIDENCE, LOINC_MASTER_PANEL, LOINC_MEDICATION_ASSESSED, LOINC_SYSTEM,
    LOINC_THERAPY_EFFICACY, MTB_STATE_EXTENSION, NCBI_GENE_SYSTEM, NCIT_SYSTEM, PUBMED_URL,
    RELATED_ARTIFACT_EXTENSION,
};
use crate::context::DecodeContext;
use crate::genetic_alteration;
use crate::reasoning::{GeneticObservationIndex, ReasoningMapper};
use crate::repository::FhirRepository;
use crate::sample_id::SampleIdRules;
use crate::specimen::{self, SpecimenMapper};
use crate::{MtbError, MtbResult};
use api_shared::{Deletions, GeneticAlteration, Mtb, Reference, TherapyRecommendation, Treatment};
use fhir::{
    Annotation, Bundle, CodeableConcept, Coding, DiagnosticReport, Extension, Identifier,
    Observation, ObservationComponent, ObservationStatus, Patient, RelatedArtifact, Resource,
};
use std::collections::HashSet;
use uuid::Uuid;

/// Identifier systems of the upsert search keys.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IdentifierSystems {
    pub patient: String,
    pub mtb: String,
    pub therapy_recommendation: String,
}

impl IdentifierSystems {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            patient: settings.patient_system.clone(),
            mtb: settings.mtb_system.clone(),
            therapy_recommendation: settings.therapy_recommendation_system.clone(),
        }
    }
}

impl Default for IdentifierSystems {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

fn identifier_query(system: &str, value: &str) -> String {
    format!("identifier={system}|{value}")
}

fn new_full_url() -> String {
    format!("urn:uuid:{}", Uuid::new_v4())
}

fn report_status(mtb: &Mtb) -> &'static str {
    if mtb.is_completed() {
        "final"
    } else {
        "partial"
    }
}

pub struct MtbFhirMapper {
    systems: IdentifierSystems,
    reasoning: ReasoningMapper,
    rules: SampleIdRules,
}

impl MtbFhirMapper {
    pub fn new(systems: IdentifierSystems, reasoning: ReasoningMapper, rules: SampleIdRules) -> Self {
        Self {
            systems,
            reasoning,
            rules,
        }
    }

    /// Mapper with the identifier systems, specimen system and sample id rules of `settings`.
    pub fn from_settings(settings: &Settings) -> MtbResult<Self> {
        let rules = SampleIdRules::from_settings(settings)
            .map_err(|e| MtbError::Config(format!("sample id rules: {e}")))?;
        let reasoning = ReasoningMapper::new(
            ClinicalDataRegistry::new(),
            SpecimenMapper::new(settings.specimen_system.as_str()),
        );
        Ok(Self::new(IdentifierSystems::from_settings(settings), reasoning, rules))
    }

    pub fn systems(&self) -> &IdentifierSystems {
        &self.systems
    }

    pub fn rules(&self) -> &SampleIdRules {
        &self.rules
    }

    pub fn patient_query(&self, patient_id: &str) -> String {
        identifier_query(&self.systems.patient, patient_id)
    }

    // ========================================================================
    // JSON -> FHIR
    // ========================================================================

    /// Build the transaction Bundle for one patient.
    ///
    /// # Arguments
    ///
    /// * `patient_id` - portal patient id
    /// * `mtbs` - the patient's MTB sessions
    /// * `index` - genetic Observations of this request; pass a fresh index per request
    ///
    /// # Errors
    ///
    /// Returns [`MtbError::InvalidInput`] if the patient, an MTB or a recommendation has no id.
    pub fn to_bundle(
        &self,
        patient_id: &str,
        mtbs: &[Mtb],
        index: &mut GeneticObservationIndex,
    ) -> MtbResult<Bundle> {
        if patient_id.trim().is_empty() {
            return Err(MtbError::InvalidInput("patient id cannot be empty".into()));
        }

        let mut bundle = Bundle::transaction();
        let patient_ref = new_full_url();
        bundle.add_conditional_upsert(
            patient_ref.clone(),
            Patient::with_identifier(&self.systems.patient, patient_id),
            &self.patient_query(patient_id),
        );

        for mtb in mtbs {
            if mtb.id.trim().is_empty() {
                return Err(MtbError::InvalidInput("MTB id cannot be empty".into()));
            }
            let report = self.report(mtb, &patient_ref, &mut bundle, index)?;
            bundle.add_conditional_upsert(
                new_full_url(),
                report,
                &identifier_query(&self.systems.mtb, &mtb.id),
            );
        }
        Ok(bundle)
    }

    fn report(
        &self,
        mtb: &Mtb,
        patient_ref: &str,
        bundle: &mut Bundle,
        index: &mut GeneticObservationIndex,
    ) -> MtbResult<DiagnosticReport> {
        let mut report = DiagnosticReport {
            identifier: vec![Identifier::new(&self.systems.mtb, &mtb.id)],
            status: report_status(mtb).to_string(),
            code: CodeableConcept::from_coding(Coding::new(
                LOINC_SYSTEM,
                LOINC_MASTER_PANEL,
                "Master HL7 genetic variant reporting panel",
            )),
            subject: Some(fhir::Reference::to(patient_ref)),
            effective_date_time: mtb.date.clone(),
            conclusion: mtb.general_recommendation.clone(),
            ..Default::default()
        };
        if let Some(state) = &mtb.mtb_state {
            report
                .extension
                .push(Extension::string(MTB_STATE_EXTENSION, state));
        }

        for sample in &mtb.samples {
            let reference =
                self.reasoning
                    .specimens()
                    .add_to_bundle(bundle, patient_ref, sample, &self.rules);
            report.specimen.push(reference);
        }

        for recommendation in &mtb.therapy_recommendations {
            if recommendation.id.trim().is_empty() {
                return Err(MtbError::InvalidInput(format!(
                    "therapy recommendation without id in MTB {}",
                    mtb.id
                )));
            }
            let efficacy = self.efficacy_observation(recommendation, patient_ref, bundle, index);
            let full_url = new_full_url();
            bundle.add_conditional_upsert(
                full_url.clone(),
                efficacy,
                &identifier_query(&self.systems.therapy_recommendation, &recommendation.id),
            );
            report.result.push(fhir::Reference::to(full_url));
        }
        Ok(report)
    }

    fn efficacy_observation(
        &self,
        recommendation: &TherapyRecommendation,
        patient_ref: &str,
        bundle: &mut Bundle,
        index: &mut GeneticObservationIndex,
    ) -> Observation {
        let mut observation = Observation {
            identifier: vec![Identifier::new(
                &self.systems.therapy_recommendation,
                &recommendation.id,
            )],
            status: ObservationStatus::Final,
            code: CodeableConcept::from_coding(Coding::new(
                LOINC_SYSTEM,
                LOINC_THERAPY_EFFICACY,
                "Therapy efficacy",
            )),
            subject: Some(fhir::Reference::to(patient_ref)),
            ..Default::default()
        };

        if let Some(level) = &recommendation.evidence_level {
            observation.component.push(ObservationComponent {
                code: CodeableConcept::from_coding(Coding::new(
                    LOINC_SYSTEM,
                    LOINC_LEVEL_OF_EVIDENCE,
                    "Level of evidence",
                )),
                value_string: Some(level.clone()),
                ..Default::default()
            });
        }

        for treatment in &recommendation.treatments {
            observation.component.push(ObservationComponent {
                code: CodeableConcept::from_coding(Coding::new(
                    LOINC_SYSTEM,
                    LOINC_MEDICATION_ASSESSED,
                    "Medication assessed",
                )),
                value_codeable_concept: Some(CodeableConcept::from_coding(Coding::new(
                    NCIT_SYSTEM,
                    &treatment.ncit_code,
                    &treatment.name,
                ))),
                ..Default::default()
            });
        }

        for reference in &recommendation.references {
            observation.extension.push(Extension::related_artifact(
                RELATED_ARTIFACT_EXTENSION,
                RelatedArtifact {
                    kind: "citation".into(),
                    label: None,
                    citation: reference.name.clone(),
                    url: Some(format!("{PUBMED_URL}{}", reference.pmid)),
                },
            ));
        }

        observation.note = recommendation
            .comments
            .iter()
            .map(|text| Annotation { text: text.clone() })
            .collect();

        if let Some(author) = &recommendation.author {
            observation.performer.push(fhir::Reference::display(author));
        }

        let derived_from = self.reasoning.to_fhir(
            &recommendation.reasoning,
            patient_ref,
            bundle,
            index,
            &self.rules,
            &mut observation,
        );
        observation.derived_from = derived_from;
        observation
    }

    /// Conditional deletes for MTB sessions and therapy recommendations.
    pub fn deletions_bundle(&self, deletions: &Deletions) -> Bundle {
        let mut bundle = Bundle::transaction();
        for id in &deletions.mtb {
            bundle.add_conditional_delete(
                "DiagnosticReport",
                &identifier_query(&self.systems.mtb, id),
            );
        }
        for id in &deletions.therapy_recommendation {
            bundle.add_conditional_delete(
                "Observation",
                &identifier_query(&self.systems.therapy_recommendation, id),
            );
        }
        bundle
    }

    // ========================================================================
    // FHIR -> JSON
    // ========================================================================

    /// Rebuild the MTB list from a Bundle holding a patient's record.
    ///
    /// References resolve against the Bundle first and fall back to the repository. A
    /// recommendation or specimen that cannot be decoded is logged and left out.
    pub fn from_bundle(&self, bundle: &Bundle, repository: &dyn FhirRepository) -> Vec<Mtb> {
        let ctx = DecodeContext::new(&self.rules, repository).with_bundle(bundle);

        bundle
            .resources()
            .filter_map(Resource::as_diagnostic_report)
            .filter_map(|report| {
                let id = report.identifier_value(&self.systems.mtb)?;
                Some(self.mtb(id, report, &ctx))
            })
            .collect()
    }

    fn mtb(&self, id: &str, report: &DiagnosticReport, ctx: &DecodeContext<'_>) -> Mtb {
        let mut mtb = Mtb {
            id: id.to_string(),
            date: report.effective_date_time.clone(),
            mtb_state: report.extension_string(MTB_STATE_EXTENSION).map(str::to_string),
            general_recommendation: report.conclusion.clone(),
            ..Default::default()
        };

        for reference in &report.specimen {
            match specimen::sample_id(reference, ctx) {
                Ok(sample) => mtb.samples.push(sample),
                Err(err) => tracing::warn!(mtb = %mtb.id, error = %err, "skipping specimen"),
            }
        }

        for reference in &report.result {
            let decoded = ctx.fetch(reference, "Observation").and_then(|resource| {
                let observation = resource.as_observation().ok_or_else(|| {
                    MtbError::Mapping("report result is not an Observation".into())
                })?;
                self.therapy_recommendation(observation, ctx)
            });
            match decoded {
                Ok(recommendation) => mtb.therapy_recommendations.push(recommendation),
                Err(err) => tracing::warn!(
                    mtb = %mtb.id,
                    error = %err,
                    "skipping therapy recommendation"
                ),
            }
        }
        mtb
    }

    fn therapy_recommendation(
        &self,
        observation: &Observation,
        ctx: &DecodeContext<'_>,
    ) -> MtbResult<TherapyRecommendation> {
        let id = observation
            .identifier_value(&self.systems.therapy_recommendation)
            .ok_or_else(|| {
                MtbError::Mapping("efficacy observation without recommendation id".into())
            })?;

        let evidence_level = observation
            .component(LOINC_SYSTEM, LOINC_LEVEL_OF_EVIDENCE)
            .and_then(|c| c.value_string.clone());

        let treatments = observation
            .components(LOINC_SYSTEM, LOINC_MEDICATION_ASSESSED)
            .filter_map(|c| c.value_codeable_concept.as_ref()?.coding_for(NCIT_SYSTEM))
            .map(|coding| Treatment {
                ncit_code: coding.code.clone().unwrap_or_default(),
                name: coding.display.clone().unwrap_or_default(),
            })
            .collect();

        let references = observation
            .extension
            .iter()
            .filter(|e| e.url == RELATED_ARTIFACT_EXTENSION)
            .filter_map(|e| e.value_related_artifact.as_ref())
            .filter_map(|artifact| {
                let pmid = artifact
                    .url
                    .as_deref()?
                    .strip_prefix(PUBMED_URL)?
                    .trim_end_matches('/')
                    .parse()
                    .ok()?;
                Some(Reference {
                    pmid,
                    name: artifact.citation.clone(),
                })
            })
            .collect();

        Ok(TherapyRecommendation {
            id: id.to_string(),
            evidence_level,
            reasoning: self.reasoning.from_fhir(observation, ctx),
            references,
            treatments,
            comments: observation.note.iter().map(|n| n.text.clone()).collect(),
            author: observation
                .performer
                .iter()
                .find_map(|p| p.display.clone()),
        })
    }

    // ========================================================================
    // Alteration queries
    // ========================================================================

    /// Therapy recommendations derived from any of the given alterations, across all patients.
    ///
    /// An alteration without protein change matches every alteration of the gene.
    pub fn therapy_recommendations_by_alteration(
        &self,
        alterations: &[GeneticAlteration],
        repository: &dyn FhirRepository,
    ) -> MtbResult<Vec<TherapyRecommendation>> {
        let mut seen = HashSet::new();
        let mut found = Vec::new();

        for wanted in alterations {
            let gene = format!("{NCBI_GENE_SYSTEM}|{}", wanted.entrez_gene_id);
            let genetic = repository.search("Observation", &[("component-value-concept", gene.as_str())])?;

            for observation in genetic.resources().filter_map(Resource::as_observation) {
                let Ok(stored) = genetic_alteration::decode(observation) else {
                    continue;
                };
                if !same_alteration(wanted, &stored) {
                    continue;
                }
                let Some(id) = observation.id.as_deref() else {
                    continue;
                };

                let source = format!("Observation/{id}");
                let efficacies = repository.search("Observation", &[("derived-from", source.as_str())])?;
                let ctx = DecodeContext::new(&self.rules, repository).with_bundle(&efficacies);

                for efficacy in efficacies.resources().filter_map(Resource::as_observation) {
                    let key = efficacy.id.clone().unwrap_or_default();
                    if !seen.insert(key) {
                        continue;
                    }
                    match self.therapy_recommendation(efficacy, &ctx) {
                        Ok(recommendation) => found.push(recommendation),
                        Err(err) => tracing::warn!(error = %err, "skipping therapy recommendation"),
                    }
                }
            }
        }
        Ok(found)
    }

    /// PMIDs cited by the recommendations of [`Self::therapy_recommendations_by_alteration`],
    /// first occurrence order.
    pub fn pmids_by_alteration(
        &self,
        alterations: &[GeneticAlteration],
        repository: &dyn FhirRepository,
    ) -> MtbResult<Vec<u64>> {
        let mut seen = HashSet::new();
        Ok(self
            .therapy_recommendations_by_alteration(alterations, repository)?
            .into_iter()
            .flat_map(|tr| tr.references)
            .map(|reference| reference.pmid)
            .filter(|pmid| seen.insert(*pmid))
            .collect())
    }
}

fn same_alteration(wanted: &GeneticAlteration, stored: &GeneticAlteration) -> bool {
    match (wanted.alteration.as_deref(), stored.alteration.as_deref()) {
        (None, _) => true,
        (Some(a), Some(b)) => a.trim().eq_ignore_ascii_case(b.trim()),
        (Some(_), None) => false,
    }
}
