//! FHIR wire/boundary support for the MTB decision bridge.
//!
//! This crate provides **wire models** and **format helpers** for the FHIR R4 resources that the
//! bridge exchanges with the clinical repository:
//! - transaction and search-set `Bundle`s with conditional upsert entries
//! - `Patient`, `Specimen`, `Observation` and `DiagnosticReport`
//! - the shared datatypes those resources use (`Coding`, `Reference`, ...)
//!
//! This crate focuses on:
//! - JSON serialisation/deserialisation with FHIR field naming
//! - small structural helpers (search keys, reference resolution)
//!
//! It carries no mapping knowledge about MTB records; that lives in `mtb-core`.
//! Resource models are lenient on input: fields the bridge does not model are ignored, and
//! resource types it does not know are kept as raw JSON in [`Resource::Other`].

pub mod bundle;
pub mod datatypes;
pub mod diagnostic_report;
pub mod observation;
pub mod patient;
pub mod specimen;

use serde::{de::Error as _, ser::Error as _, Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

// Re-export facades
pub use bundle::{
    Bundle, BundleEntry, BundleEntryRequest, BundleEntryResponse, BundleLink, BundleType, HttpVerb,
};
pub use datatypes::{
    Annotation, CodeableConcept, Coding, Extension, Identifier, Quantity, Reference,
    RelatedArtifact,
};
pub use diagnostic_report::DiagnosticReport;
pub use observation::{Observation, ObservationComponent, ObservationStatus};
pub use patient::Patient;
pub use specimen::Specimen;

/// Errors returned by the `fhir` boundary crate.
#[derive(Debug, thiserror::Error)]
pub enum FhirError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("translation error: {0}")]
    Translation(String),
}

/// Type alias for Results that can fail with a [`FhirError`].
pub type FhirResult<T> = Result<T, FhirError>;

/// Any resource that can appear in a bundle entry or in `Observation.contained`.
///
/// Serialised with its `resourceType` discriminator. Unknown resource types (for example an
/// `OperationOutcome` returned by a server) are preserved untouched as [`Resource::Other`].
#[derive(Clone, Debug, PartialEq)]
pub enum Resource {
    Patient(Patient),
    Specimen(Specimen),
    Observation(Observation),
    DiagnosticReport(DiagnosticReport),
    Other(Value),
}

impl Resource {
    /// The FHIR `resourceType` of this resource.
    pub fn resource_type(&self) -> &str {
        match self {
            Resource::Patient(_) => "Patient",
            Resource::Specimen(_) => "Specimen",
            Resource::Observation(_) => "Observation",
            Resource::DiagnosticReport(_) => "DiagnosticReport",
            Resource::Other(value) => value
                .get("resourceType")
                .and_then(Value::as_str)
                .unwrap_or("Unknown"),
        }
    }

    /// Logical id assigned by the repository, if any.
    pub fn id(&self) -> Option<&str> {
        match self {
            Resource::Patient(r) => r.id.as_deref(),
            Resource::Specimen(r) => r.id.as_deref(),
            Resource::Observation(r) => r.id.as_deref(),
            Resource::DiagnosticReport(r) => r.id.as_deref(),
            Resource::Other(value) => value.get("id").and_then(Value::as_str),
        }
    }

    /// Business identifiers of the resource.
    pub fn identifiers(&self) -> &[Identifier] {
        match self {
            Resource::Patient(r) => &r.identifier,
            Resource::Specimen(r) => &r.identifier,
            Resource::Observation(r) => &r.identifier,
            Resource::DiagnosticReport(r) => &r.identifier,
            Resource::Other(_) => &[],
        }
    }

    /// The `subject` reference, for resources that have one.
    pub fn subject(&self) -> Option<&Reference> {
        match self {
            Resource::Specimen(r) => r.subject.as_ref(),
            Resource::Observation(r) => r.subject.as_ref(),
            Resource::DiagnosticReport(r) => r.subject.as_ref(),
            Resource::Patient(_) | Resource::Other(_) => None,
        }
    }

    pub fn as_observation(&self) -> Option<&Observation> {
        match self {
            Resource::Observation(obs) => Some(obs),
            _ => None,
        }
    }

    pub fn as_specimen(&self) -> Option<&Specimen> {
        match self {
            Resource::Specimen(specimen) => Some(specimen),
            _ => None,
        }
    }

    pub fn as_diagnostic_report(&self) -> Option<&DiagnosticReport> {
        match self {
            Resource::DiagnosticReport(report) => Some(report),
            _ => None,
        }
    }
}

impl From<Patient> for Resource {
    fn from(value: Patient) -> Self {
        Resource::Patient(value)
    }
}

impl From<Specimen> for Resource {
    fn from(value: Specimen) -> Self {
        Resource::Specimen(value)
    }
}

impl From<Observation> for Resource {
    fn from(value: Observation) -> Self {
        Resource::Observation(value)
    }
}

impl From<DiagnosticReport> for Resource {
    fn from(value: DiagnosticReport) -> Self {
        Resource::DiagnosticReport(value)
    }
}

impl Serialize for Resource {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let body = match self {
            Resource::Patient(r) => serde_json::to_value(r),
            Resource::Specimen(r) => serde_json::to_value(r),
            Resource::Observation(r) => serde_json::to_value(r),
            Resource::DiagnosticReport(r) => serde_json::to_value(r),
            Resource::Other(value) => return value.serialize(serializer),
        };
        let mut body = body.map_err(S::Error::custom)?;
        if let Value::Object(map) = &mut body {
            map.insert(
                "resourceType".to_string(),
                Value::String(self.resource_type().to_string()),
            );
        }
        body.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Resource {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        let resource_type = value
            .get("resourceType")
            .and_then(Value::as_str)
            .ok_or_else(|| D::Error::missing_field("resourceType"))?
            .to_owned();

        let parsed = match resource_type.as_str() {
            "Patient" => serde_json::from_value(value).map(Resource::Patient),
            "Specimen" => serde_json::from_value(value).map(Resource::Specimen),
            "Observation" => serde_json::from_value(value).map(Resource::Observation),
            "DiagnosticReport" => serde_json::from_value(value).map(Resource::DiagnosticReport),
            _ => return Ok(Resource::Other(value)),
        };
        parsed.map_err(|e| D::Error::custom(format!("{resource_type}: {e}")))
    }
}

/// Parse a single resource from JSON text.
///
/// Uses `serde_path_to_error` so that a schema mismatch names the failing path.
///
/// # Errors
///
/// Returns [`FhirError::Translation`] if the JSON does not describe a resource.
pub fn parse_resource(json_text: &str) -> FhirResult<Resource> {
    parse_json(json_text, "Resource")
}

/// Render a single resource as JSON text.
pub fn render_resource(resource: &Resource) -> FhirResult<String> {
    Ok(serde_json::to_string(resource)?)
}

pub(crate) fn parse_json<T>(json_text: &str, what: &str) -> FhirResult<T>
where
    T: serde::de::DeserializeOwned,
{
    let mut deserializer = serde_json::Deserializer::from_str(json_text);
    match serde_path_to_error::deserialize::<_, T>(&mut deserializer) {
        Ok(parsed) => Ok(parsed),
        Err(err) => {
            let path = err.path().to_string();
            let source = err.into_inner();
            let path = if path.is_empty() || path == "." {
                "<root>"
            } else {
                path.as_str()
            };
            Err(FhirError::Translation(format!(
                "{what} schema mismatch at {path}: {source}"
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn resource_round_trips_with_resource_type() {
        let specimen = Specimen {
            id: Some("s1".into()),
            identifier: vec![Identifier::new("https://example.org/specimen", "S-1")],
            ..Default::default()
        };
        let text = render_resource(&specimen.clone().into()).expect("render");
        assert!(text.contains("\"resourceType\":\"Specimen\""));

        let parsed = parse_resource(&text).expect("parse");
        assert_eq!(parsed, Resource::Specimen(specimen));
    }

    #[test]
    fn unknown_resource_types_are_preserved() {
        let raw = json!({"resourceType": "OperationOutcome", "issue": []});
        let parsed: Resource = serde_json::from_value(raw.clone()).expect("parse");
        assert_eq!(parsed.resource_type(), "OperationOutcome");
        assert_eq!(serde_json::to_value(&parsed).expect("render"), raw);
    }

    #[test]
    fn missing_resource_type_is_rejected() {
        let err = parse_resource(r#"{"id": "x"}"#).expect_err("should reject");
        match err {
            FhirError::Translation(msg) => assert!(msg.contains("resourceType")),
            other => panic!("expected Translation error, got {other:?}"),
        }
    }
}
