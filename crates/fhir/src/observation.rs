//! FHIR Observation wire model.
//!
//! Observations carry three kinds of MTB content:
//! - the efficacy observation of a therapy recommendation (members and derivations hang off it)
//! - genetic variant observations (gene and protein change as components)
//! - clinical finding observations, usually contained in the efficacy observation

use crate::datatypes::{
    Annotation, CodeableConcept, Extension, Identifier, Quantity, Reference,
};
use crate::Resource;
use serde::{Deserialize, Serialize};

/// Status of an observation result.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ObservationStatus {
    Registered,
    Preliminary,
    Final,
    Amended,
    Corrected,
    Cancelled,
    EnteredInError,
    #[default]
    Unknown,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Observation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub contained: Vec<Resource>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extension: Vec<Extension>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub identifier: Vec<Identifier>,

    #[serde(default)]
    pub status: ObservationStatus,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub category: Vec<CodeableConcept>,

    #[serde(default)]
    pub code: CodeableConcept,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<Reference>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub effective_date_time: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub performer: Vec<Reference>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_string: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_codeable_concept: Option<CodeableConcept>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_quantity: Option<Quantity>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub note: Vec<Annotation>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub specimen: Option<Reference>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub has_member: Vec<Reference>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub derived_from: Vec<Reference>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub component: Vec<ObservationComponent>,
}

/// Component results of an observation.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservationComponent {
    pub code: CodeableConcept,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_string: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_codeable_concept: Option<CodeableConcept>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_quantity: Option<Quantity>,
}

impl Observation {
    /// First component whose code carries the given system and code.
    pub fn component(&self, system: &str, code: &str) -> Option<&ObservationComponent> {
        self.component.iter().find(|c| c.code.has_coding(system, code))
    }

    /// All components whose code carries the given system and code.
    pub fn components<'a>(
        &'a self,
        system: &'a str,
        code: &'a str,
    ) -> impl Iterator<Item = &'a ObservationComponent> + 'a {
        self.component
            .iter()
            .filter(move |c| c.code.has_coding(system, code))
    }

    /// Contained resource with the given local id.
    pub fn contained_resource(&self, local_id: &str) -> Option<&Resource> {
        self.contained.iter().find(|r| r.id() == Some(local_id))
    }

    pub fn identifier_value(&self, system: &str) -> Option<&str> {
        self.identifier
            .iter()
            .find(|i| i.system.as_deref() == Some(system))
            .and_then(|i| i.value.as_deref())
    }
}
