//! Coding systems, codes and identifier systems used by the mappers.
//!
//! Values in the `HL7 v2` section are object identifiers written into `CWE.14`; the FHIR
//! section holds canonical system URIs.

// ============================================================================
// FHIR coding systems
// ============================================================================

pub const LOINC_SYSTEM: &str = "http://loinc.org";

/// NCBI gene; the search key of genetic observations is built on this URI.
pub const NCBI_GENE_SYSTEM: &str = "http://www.ncbi.nlm.nih.gov/gene";

pub const NCIT_SYSTEM: &str = "http://ncithesaurus-stage.nci.nih.gov";

pub const UCUM_SYSTEM: &str = "http://unitsofmeasure.org";

pub const PUBMED_URL: &str = "https://www.ncbi.nlm.nih.gov/pubmed/";

pub const RELATED_ARTIFACT_EXTENSION: &str =
    "http://hl7.org/fhir/StructureDefinition/workflow-relatedArtifact";

/// Extension on the MTB DiagnosticReport that keeps the portal's session state verbatim.
pub const MTB_STATE_EXTENSION: &str = "https://cbioportal.org/fhir/StructureDefinition/mtb-state";

/// Extension on a quantity Observation that keeps the value text as the portal sent it.
pub const VALUE_TEXT_EXTENSION: &str = "https://cbioportal.org/fhir/StructureDefinition/value-text";

pub const OBSERVATION_CATEGORY_SYSTEM: &str =
    "http://terminology.hl7.org/CodeSystem/observation-category";

// ============================================================================
// LOINC codes
// ============================================================================

/// Genetic variant assessment.
pub const LOINC_VARIANT_ASSESSMENT: &str = "69548-6";
/// Answer "Present" for the variant assessment.
pub const LOINC_ANSWER_PRESENT: &str = "LA9633-4";
pub const LOINC_GENE_STUDIED: &str = "48018-6";
pub const LOINC_AMINO_ACID_CHANGE: &str = "48005-3";
pub const LOINC_DISCRETE_GENETIC_VARIANT: &str = "81252-9";
pub const LOINC_CLINICAL_FINDING: &str = "75321-0";
pub const LOINC_TMB: &str = "94076-7";
/// Medication assessed.
pub const LOINC_MEDICATION_ASSESSED: &str = "51963-7";
/// Therapy efficacy observation.
pub const LOINC_THERAPY_EFFICACY: &str = "51961-1";
pub const LOINC_LEVEL_OF_EVIDENCE: &str = "93044-6";
pub const LOINC_MASTER_PANEL: &str = "81247-9";
pub const LOINC_DISCRETE_VARIANT_PANEL: &str = "81250-3";

// ============================================================================
// HL7 v2 coding system OIDs
// ============================================================================

pub const LOINC_OID: &str = "2.16.840.1.113883.6.1";
pub const HGNC_OID: &str = "2.16.840.1.113883.6.281";
pub const HGVS_OID: &str = "2.16.840.1.113883.6.282";
pub const NCBI_GENE_OID: &str = "2.16.840.1.113883.4.642.3.1041";
pub const PUBMED_OID: &str = "2.16.840.1.113883.13.191";
pub const NCIT_OID: &str = "2.16.840.1.113883.3.26.1.1";

// ============================================================================
// Defaults
// ============================================================================

pub const DEFAULT_PORT: u16 = 3001;
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0";
pub const DEFAULT_SETTINGS_FILE: &str = "settings.yaml";
pub const DEFAULT_PUBMED_BASE_URL: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils";
pub const DEFAULT_PATIENT_SYSTEM: &str = "https://cbioportal.org/patient/";
pub const DEFAULT_SPECIMEN_SYSTEM: &str = "https://cbioportal.org/specimen/";
pub const DEFAULT_MTB_SYSTEM: &str = "https://cbioportal.org/mtb/";
pub const DEFAULT_THERAPY_RECOMMENDATION_SYSTEM: &str =
    "https://cbioportal.org/therapyrecommendation/";

/// Specimen type written to FHIR and HL7 v2.
pub const SPECIMEN_TYPE_TUMOR: &str = "TUMOR";
