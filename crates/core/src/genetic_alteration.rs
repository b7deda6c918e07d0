//! Genetic alteration <-> FHIR Observation.
//!
//! A genetic observation is a LOINC "genetic variant assessment" answered "Present", with the gene
//! (NCBI gene coding) and the protein change (free text) as components. Its upsert key combines
//! the gene coding with the patient reference, so the same gene is stored once per patient.

use crate::constants::{
    LOINC_AMINO_ACID_CHANGE, LOINC_ANSWER_PRESENT, LOINC_GENE_STUDIED, LOINC_SYSTEM,
    LOINC_VARIANT_ASSESSMENT, NCBI_GENE_SYSTEM, OBSERVATION_CATEGORY_SYSTEM,
};
use crate::{MtbError, MtbResult};
use api_shared::GeneticAlteration;
use fhir::{CodeableConcept, Coding, Observation, ObservationComponent, ObservationStatus};

/// Conditional upsert key of a genetic observation.
pub fn search_query(entrez_gene_id: u64, patient_ref: &str) -> String {
    format!("component-value-concept={NCBI_GENE_SYSTEM}|{entrez_gene_id}&subject={patient_ref}")
}

pub fn is_genetic_observation(observation: &Observation) -> bool {
    observation
        .code
        .has_coding(LOINC_SYSTEM, LOINC_VARIANT_ASSESSMENT)
}

/// Build the Observation for one alteration. The caller sets `subject`.
///
/// # Errors
///
/// Returns [`MtbError::Mapping`] if the alteration has no protein change.
pub fn encode(alteration: &GeneticAlteration) -> MtbResult<Observation> {
    let protein_change = alteration
        .alteration
        .as_deref()
        .filter(|a| !a.trim().is_empty())
        .ok_or_else(|| {
            MtbError::Mapping(format!(
                "gene {} has no protein change",
                alteration.entrez_gene_id
            ))
        })?;

    let gene = Coding {
        system: Some(NCBI_GENE_SYSTEM.to_string()),
        code: Some(alteration.entrez_gene_id.to_string()),
        display: alteration.hugo_gene_symbol.clone(),
    };

    Ok(Observation {
        status: ObservationStatus::Final,
        category: vec![CodeableConcept::from_coding(Coding::new(
            OBSERVATION_CATEGORY_SYSTEM,
            "laboratory",
            "Laboratory",
        ))],
        code: CodeableConcept::from_coding(Coding::new(
            LOINC_SYSTEM,
            LOINC_VARIANT_ASSESSMENT,
            "Genetic variant assessment",
        )),
        value_codeable_concept: Some(CodeableConcept::from_coding(Coding::new(
            LOINC_SYSTEM,
            LOINC_ANSWER_PRESENT,
            "Present",
        ))),
        component: vec![
            ObservationComponent {
                code: CodeableConcept::from_coding(Coding::new(
                    LOINC_SYSTEM,
                    LOINC_GENE_STUDIED,
                    "Gene studied [ID]",
                )),
                value_codeable_concept: Some(CodeableConcept::from_coding(gene)),
                ..Default::default()
            },
            ObservationComponent {
                code: CodeableConcept::from_coding(Coding::new(
                    LOINC_SYSTEM,
                    LOINC_AMINO_ACID_CHANGE,
                    "Amino acid change (pHGVS)",
                )),
                value_string: Some(protein_change.to_string()),
                ..Default::default()
            },
        ],
        ..Default::default()
    })
}

/// Recover gene id and protein change from a genetic observation.
///
/// # Errors
///
/// Returns [`MtbError::Mapping`] if either field is missing or the gene id is not numeric.
pub fn decode(observation: &Observation) -> MtbResult<GeneticAlteration> {
    let gene = observation
        .component(LOINC_SYSTEM, LOINC_GENE_STUDIED)
        .and_then(|c| c.value_codeable_concept.as_ref())
        .and_then(|concept| concept.coding_for(NCBI_GENE_SYSTEM))
        .ok_or_else(|| MtbError::Mapping("genetic observation without gene coding".into()))?;

    let entrez_gene_id = gene
        .code
        .as_deref()
        .and_then(|code| code.trim().parse::<u64>().ok())
        .ok_or_else(|| {
            MtbError::Mapping(format!("invalid Entrez gene id {:?}", gene.code))
        })?;

    let alteration = observation
        .component(LOINC_SYSTEM, LOINC_AMINO_ACID_CHANGE)
        .and_then(|c| c.value_string.clone())
        .ok_or_else(|| {
            MtbError::Mapping(format!(
                "genetic observation for gene {entrez_gene_id} without protein change"
            ))
        })?;

    Ok(GeneticAlteration {
        entrez_gene_id,
        hugo_gene_symbol: gene.display.clone(),
        alteration: Some(alteration),
    })
}
