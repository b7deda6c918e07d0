use super::{decode_sample_id, ClinicalDataAdapter};
use crate::constants::{LOINC_CLINICAL_FINDING, LOINC_SYSTEM};
use crate::context::DecodeContext;
use crate::{MtbError, MtbResult};
use api_shared::ClinicalDatum;
use fhir::{CodeableConcept, Coding, Observation, ObservationStatus};

const SEPARATOR: &str = ": ";

/// Default adapter: the datum becomes a clinical finding with a `name: value` text.
///
/// The attribute id is kept in `code.text`. A value that is absent or the literal string `null`
/// is not written, so it decodes as absent.
#[derive(Clone, Copy, Debug, Default)]
pub struct GenericAdapter;

fn value_text(datum: &ClinicalDatum) -> String {
    match datum.value.as_deref() {
        None | Some("null") => datum.attribute_name.clone(),
        Some(value) => format!("{}{SEPARATOR}{value}", datum.attribute_name),
    }
}

impl ClinicalDataAdapter for GenericAdapter {
    fn encode(&self, datum: &ClinicalDatum) -> MtbResult<Observation> {
        Ok(Observation {
            status: ObservationStatus::Unknown,
            code: CodeableConcept::from_coding(Coding::new(
                LOINC_SYSTEM,
                LOINC_CLINICAL_FINDING,
                "Clinical finding",
            ))
            .with_text(&datum.attribute_id),
            value_string: Some(value_text(datum)),
            ..Default::default()
        })
    }

    fn decode(
        &self,
        observation: &Observation,
        ctx: &DecodeContext<'_>,
    ) -> MtbResult<ClinicalDatum> {
        let text = observation
            .value_string
            .as_deref()
            .ok_or_else(|| MtbError::Mapping("clinical finding without valueString".into()))?;

        let (attribute_name, value) = match text.split_once(SEPARATOR) {
            Some((name, value)) => (name.to_string(), Some(value.to_string())),
            None => (text.to_string(), None),
        };

        Ok(ClinicalDatum {
            attribute_id: observation.code.text.clone().unwrap_or_default(),
            attribute_name,
            value,
            sample_id: decode_sample_id(observation, ctx)?,
        })
    }

    fn matches(&self, observation: &Observation) -> bool {
        observation
            .code
            .has_coding(LOINC_SYSTEM, LOINC_CLINICAL_FINDING)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InMemoryRepository;
    use crate::sample_id::SampleIdRules;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn round_trip(datum: &ClinicalDatum) -> ClinicalDatum {
        let rules = SampleIdRules::default();
        let repository = InMemoryRepository::new();
        let ctx = DecodeContext::new(&rules, &repository);
        let obs = GenericAdapter.encode(datum).unwrap();
        GenericAdapter.decode(&obs, &ctx).unwrap()
    }

    #[test]
    fn encodes_name_and_value() {
        let datum = ClinicalDatum {
            attribute_id: "ECOG".into(),
            attribute_name: "ECOG status".into(),
            value: Some("1".into()),
            sample_id: None,
        };
        let obs = GenericAdapter.encode(&datum).unwrap();
        assert_eq!(obs.status, ObservationStatus::Unknown);
        assert_eq!(obs.value_string.as_deref(), Some("ECOG status: 1"));
        assert_eq!(obs.code.text.as_deref(), Some("ECOG"));
    }

    #[test]
    fn literal_null_value_is_dropped() {
        let datum = ClinicalDatum {
            attribute_id: "SMOKER".into(),
            attribute_name: "Smoker".into(),
            value: Some("null".into()),
            sample_id: None,
        };
        let decoded = round_trip(&datum);
        assert_eq!(decoded.attribute_name, "Smoker");
        assert_eq!(decoded.value, None);
    }

    #[test]
    fn text_without_separator_decodes_without_value() {
        let rules = SampleIdRules::default();
        let repository = InMemoryRepository::new();
        let ctx = DecodeContext::new(&rules, &repository);
        let obs = Observation {
            value_string: Some("Metastatic".into()),
            ..Default::default()
        };
        let decoded = GenericAdapter.decode(&obs, &ctx).unwrap();
        assert_eq!(decoded.attribute_name, "Metastatic");
        assert_eq!(decoded.value, None);
    }

    proptest! {
        #[test]
        fn round_trip_recovers_name_and_value(
            name in "[A-Za-z0-9 _()-]{1,24}",
            value in proptest::option::of("[ -~]{0,24}"),
        ) {
            let datum = ClinicalDatum {
                attribute_id: "ATTR".into(),
                attribute_name: name.clone(),
                value: value.clone(),
                sample_id: None,
            };
            let decoded = round_trip(&datum);
            let expected = value.filter(|v| v != "null");
            prop_assert_eq!(decoded.attribute_name, name);
            prop_assert_eq!(decoded.value, expected);
            prop_assert_eq!(decoded.attribute_id, "ATTR");
        }
    }
}
