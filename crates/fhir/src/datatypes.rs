//! FHIR datatypes shared by the resource models.

use crate::Resource;
use serde::{Deserialize, Serialize};

/// A code from a terminology system.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Coding {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
}

impl Coding {
    pub fn new(system: impl Into<String>, code: impl Into<String>, display: impl Into<String>) -> Self {
        Self {
            system: Some(system.into()),
            code: Some(code.into()),
            display: Some(display.into()),
        }
    }

    /// True if this coding has exactly the given system and code.
    pub fn is(&self, system: &str, code: &str) -> bool {
        self.system.as_deref() == Some(system) && self.code.as_deref() == Some(code)
    }
}

/// A concept expressed by one or more codings and/or text.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeableConcept {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub coding: Vec<Coding>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl CodeableConcept {
    pub fn from_coding(coding: Coding) -> Self {
        Self {
            coding: vec![coding],
            text: None,
        }
    }

    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            coding: Vec::new(),
            text: Some(text.into()),
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn has_coding(&self, system: &str, code: &str) -> bool {
        self.coding.iter().any(|c| c.is(system, code))
    }

    /// First coding from the given system.
    pub fn coding_for(&self, system: &str) -> Option<&Coding> {
        self.coding
            .iter()
            .find(|c| c.system.as_deref() == Some(system))
    }
}

/// A business identifier: `system|value`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identifier {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl Identifier {
    pub fn new(system: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            system: Some(system.into()),
            value: Some(value.into()),
        }
    }

    /// Token form used in search parameters, `system|value`.
    pub fn token(&self) -> String {
        format!(
            "{}|{}",
            self.system.as_deref().unwrap_or_default(),
            self.value.as_deref().unwrap_or_default()
        )
    }
}

/// A reference from one resource to another.
///
/// `resource` is an in-memory link to the target, populated while a bundle is being built or when
/// a reference has been resolved against a bundle. It is never serialised; on the wire only
/// `reference` (a full URL, `Type/id` or a `#contained` id) is exchanged.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reference {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,

    #[serde(skip)]
    pub resource: Option<Box<Resource>>,
}

impl Reference {
    pub fn to(reference: impl Into<String>) -> Self {
        Self {
            reference: Some(reference.into()),
            ..Default::default()
        }
    }

    /// Reference that also carries the target resource in memory.
    pub fn embedded(reference: impl Into<String>, resource: impl Into<Resource>) -> Self {
        Self {
            reference: Some(reference.into()),
            display: None,
            resource: Some(Box::new(resource.into())),
        }
    }

    pub fn display(display: impl Into<String>) -> Self {
        Self {
            display: Some(display.into()),
            ..Default::default()
        }
    }

    /// Local id if this points at a contained resource (`#id`).
    pub fn contained_id(&self) -> Option<&str> {
        self.reference.as_deref().and_then(|r| r.strip_prefix('#'))
    }
}

/// A measured amount.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quantity {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

/// A free-text note.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Annotation {
    pub text: String,
}

/// Related resources such as citations.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelatedArtifact {
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub citation: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// An extension carrying either a string or a related artifact.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Extension {
    pub url: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_string: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_related_artifact: Option<RelatedArtifact>,
}

impl Extension {
    pub fn string(url: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            value_string: Some(value.into()),
            value_related_artifact: None,
        }
    }

    pub fn related_artifact(url: impl Into<String>, artifact: RelatedArtifact) -> Self {
        Self {
            url: url.into(),
            value_string: None,
            value_related_artifact: Some(artifact),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Specimen;

    #[test]
    fn reference_does_not_serialise_embedded_resource() {
        let reference = Reference::embedded("urn:uuid:1", Specimen::default());
        let json = serde_json::to_string(&reference).expect("render");
        assert_eq!(json, r#"{"reference":"urn:uuid:1"}"#);
    }

    #[test]
    fn contained_id_strips_hash() {
        assert_eq!(Reference::to("#clinical-0").contained_id(), Some("clinical-0"));
        assert_eq!(Reference::to("Observation/1").contained_id(), None);
    }

    #[test]
    fn identifier_token_joins_system_and_value() {
        let id = Identifier::new("https://example.org/specimen", "T-1");
        assert_eq!(id.token(), "https://example.org/specimen|T-1");
    }
}
