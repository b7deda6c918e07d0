#[derive(Debug, thiserror::Error)]
pub enum MtbError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("mapping error: {0}")]
    Mapping(String),

    #[error("no HGNC entry for Entrez gene id {0}")]
    GeneNotFound(u64),

    #[error("failed to resolve publication {pmid}: {reason}")]
    Publication { pmid: u64, reason: String },

    #[error("repository error: {0}")]
    Repository(String),

    #[error("HL7 v2 transport error: {0}")]
    Transport(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("FHIR error: {0}")]
    Fhir(#[from] fhir::FhirError),

    #[error("HL7 v2 error: {0}")]
    Hl7(#[from] hl7v2::Hl7Error),

    #[error("invalid sample id rule: {0}")]
    Regex(#[from] regex::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to deserialize YAML: {0}")]
    YamlDeserialization(#[from] serde_yaml::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type MtbResult<T> = std::result::Result<T, MtbError>;
