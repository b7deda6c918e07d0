//! FHIR DiagnosticReport wire model.
//!
//! One report represents one MTB session: its results are the efficacy observations of the
//! therapy recommendations agreed in that session.

use crate::datatypes::{CodeableConcept, Extension, Identifier, Reference};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extension: Vec<Extension>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub identifier: Vec<Identifier>,

    /// `registered | partial | preliminary | final | amended | ...`
    #[serde(default)]
    pub status: String,

    #[serde(default)]
    pub code: CodeableConcept,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<Reference>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub effective_date_time: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub specimen: Vec<Reference>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub result: Vec<Reference>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub conclusion: Option<String>,
}

impl DiagnosticReport {
    pub fn identifier_value(&self, system: &str) -> Option<&str> {
        self.identifier
            .iter()
            .find(|i| i.system.as_deref() == Some(system))
            .and_then(|i| i.value.as_deref())
    }

    pub fn extension_string(&self, url: &str) -> Option<&str> {
        self.extension
            .iter()
            .find(|e| e.url == url)
            .and_then(|e| e.value_string.as_deref())
    }
}
