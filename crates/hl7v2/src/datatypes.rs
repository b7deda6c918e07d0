//! Composite datatypes written into segment fields.

use crate::segment::Segment;
use crate::Hl7Result;

/// CWE component holding the coding system OID.
const CWE_CODING_SYSTEM_OID: usize = 14;

/// Coded with exceptions (`CWE`): identifier, text, coding system and coding system OID.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Cwe {
    pub identifier: String,
    pub text: String,
    pub coding_system: String,
    pub coding_system_oid: Option<String>,
}

impl Cwe {
    pub fn new(
        identifier: impl Into<String>,
        text: impl Into<String>,
        coding_system: impl Into<String>,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            text: text.into(),
            coding_system: coding_system.into(),
            coding_system_oid: None,
        }
    }

    pub fn with_oid(mut self, oid: impl Into<String>) -> Self {
        self.coding_system_oid = Some(oid.into());
        self
    }

    /// Write this value into a field repetition. Empty components are left untouched.
    pub fn write(&self, segment: &mut Segment, field: usize, repetition: usize) -> Hl7Result<()> {
        let components = [
            (1, self.identifier.as_str()),
            (2, self.text.as_str()),
            (3, self.coding_system.as_str()),
            (
                CWE_CODING_SYSTEM_OID,
                self.coding_system_oid.as_deref().unwrap_or_default(),
            ),
        ];
        for (component, value) in components {
            if !value.is_empty() {
                segment.set_repetition_component(field, repetition, component, value)?;
            }
        }
        Ok(())
    }

    /// Read a value back from a field repetition.
    pub fn read(segment: &Segment, field: usize, repetition: usize) -> Option<Self> {
        let identifier = segment.get_repetition(field, repetition, 1)?;
        Some(Self {
            identifier: identifier.to_string(),
            text: segment
                .get_repetition(field, repetition, 2)
                .unwrap_or_default()
                .to_string(),
            coding_system: segment
                .get_repetition(field, repetition, 3)
                .unwrap_or_default()
                .to_string(),
            coding_system_oid: segment
                .get_repetition(field, repetition, CWE_CODING_SYSTEM_OID)
                .map(str::to_string),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Encoding;

    #[test]
    fn writes_oid_into_component_fourteen() {
        let mut obx = Segment::new("OBX");
        Cwe::new("93044-6", "Level of evidence", "LN")
            .with_oid("2.16.840.1.113883.6.1")
            .write(&mut obx, 3, 0)
            .unwrap();

        assert_eq!(
            obx.encode(&Encoding::default()),
            "OBX|||93044-6^Level of evidence^LN^^^^^^^^^^^2.16.840.1.113883.6.1"
        );
        let back = Cwe::read(&obx, 3, 0).unwrap();
        assert_eq!(back.coding_system_oid.as_deref(), Some("2.16.840.1.113883.6.1"));
    }
}
