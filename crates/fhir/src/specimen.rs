//! FHIR Specimen wire model.
//!
//! A specimen is keyed by its business identifier (`system|sampleId`); the repository-assigned
//! logical id is only used when a reference has to be looked up again.

use crate::datatypes::{CodeableConcept, Identifier, Reference};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Specimen {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub identifier: Vec<Identifier>,

    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub specimen_type: Option<CodeableConcept>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<Reference>,
}

impl Specimen {
    /// Value of the first identifier, which is where the sample id is kept.
    pub fn first_identifier_value(&self) -> Option<&str> {
        self.identifier.first().and_then(|i| i.value.as_deref())
    }
}
