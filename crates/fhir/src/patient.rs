//! FHIR Patient wire model.
//!
//! The bridge only knows patients by the identifier the portal uses for them; the patient entry
//! of a transaction exists so that every other resource has a subject to point at.

use crate::datatypes::Identifier;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Patient {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub identifier: Vec<Identifier>,
}

impl Patient {
    /// Patient identified by `system|value`.
    pub fn with_identifier(system: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            id: None,
            identifier: vec![Identifier::new(system, value)],
        }
    }

    pub fn identifier_value(&self, system: &str) -> Option<&str> {
        self.identifier
            .iter()
            .find(|i| i.system.as_deref() == Some(system))
            .and_then(|i| i.value.as_deref())
    }
}
