use super::{decode_sample_id, ClinicalDataAdapter, GenericAdapter};
use crate::constants::{LOINC_SYSTEM, LOINC_TMB, UCUM_SYSTEM, VALUE_TEXT_EXTENSION};
use crate::context::DecodeContext;
use crate::{MtbError, MtbResult};
use api_shared::ClinicalDatum;
use fhir::{CodeableConcept, Coding, Extension, Observation, ObservationStatus, Quantity};

pub const TMB_ATTRIBUTE_ID: &str = "TMB_NONSYNONYMOUS";

const TMB_DISPLAY: &str = "Mutations/Megabase [# Ratio] in Tumor";
const PER_MEGABASE: &str = "/1e6";

/// Tumour mutational burden as a numeric `valueQuantity`.
///
/// The value text is kept verbatim in an extension so `7.0` does not come back as `7`. Values
/// that are absent, `null` or not a finite number are written as a generic clinical finding.
#[derive(Clone, Copy, Debug, Default)]
pub struct TmbAdapter;

fn finite_value(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

impl ClinicalDataAdapter for TmbAdapter {
    fn encode(&self, datum: &ClinicalDatum) -> MtbResult<Observation> {
        let Some((raw, value)) = datum
            .value
            .as_deref()
            .filter(|raw| *raw != "null")
            .and_then(|raw| finite_value(raw).map(|value| (raw, value)))
        else {
            tracing::debug!(value = ?datum.value, "TMB value is not numeric, writing a clinical finding");
            return GenericAdapter.encode(datum);
        };

        Ok(Observation {
            extension: vec![Extension::string(VALUE_TEXT_EXTENSION, raw)],
            status: ObservationStatus::Final,
            code: CodeableConcept::from_coding(Coding::new(LOINC_SYSTEM, LOINC_TMB, TMB_DISPLAY))
                .with_text(&datum.attribute_name),
            value_quantity: Some(Quantity {
                value: Some(value),
                unit: Some(PER_MEGABASE.into()),
                system: Some(UCUM_SYSTEM.into()),
                code: Some(PER_MEGABASE.into()),
            }),
            ..Default::default()
        })
    }

    fn decode(
        &self,
        observation: &Observation,
        ctx: &DecodeContext<'_>,
    ) -> MtbResult<ClinicalDatum> {
        let text = observation
            .extension
            .iter()
            .find(|e| e.url == VALUE_TEXT_EXTENSION)
            .and_then(|e| e.value_string.clone());
        let value = match text {
            Some(text) => text,
            None => observation
                .value_quantity
                .as_ref()
                .and_then(|q| q.value)
                .map(|v| v.to_string())
                .ok_or_else(|| MtbError::Mapping("TMB observation without quantity".into()))?,
        };

        Ok(ClinicalDatum {
            attribute_id: TMB_ATTRIBUTE_ID.into(),
            attribute_name: observation
                .code
                .text
                .clone()
                .unwrap_or_else(|| TMB_DISPLAY.into()),
            value: Some(value),
            sample_id: decode_sample_id(observation, ctx)?,
        })
    }

    fn matches(&self, observation: &Observation) -> bool {
        observation.code.has_coding(LOINC_SYSTEM, LOINC_TMB)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::LOINC_CLINICAL_FINDING;
    use crate::repository::InMemoryRepository;
    use crate::sample_id::SampleIdRules;

    fn tmb(value: Option<&str>) -> ClinicalDatum {
        ClinicalDatum {
            attribute_id: TMB_ATTRIBUTE_ID.into(),
            attribute_name: "TMB (nonsynonymous)".into(),
            value: value.map(Into::into),
            sample_id: None,
        }
    }

    #[test]
    fn numeric_value_becomes_quantity() {
        let obs = TmbAdapter.encode(&tmb(Some("7.25"))).unwrap();
        let quantity = obs.value_quantity.as_ref().unwrap();
        assert_eq!(quantity.value, Some(7.25));
        assert_eq!(quantity.code.as_deref(), Some("/1e6"));
        assert!(obs.value_string.is_none());
        assert!(TmbAdapter.matches(&obs));
    }

    #[test]
    fn value_text_is_returned_verbatim() {
        let rules = SampleIdRules::default();
        let repository = InMemoryRepository::new();
        let ctx = DecodeContext::new(&rules, &repository);

        for raw in ["7.0", "1e1", " 12 "] {
            let obs = TmbAdapter.encode(&tmb(Some(raw))).unwrap();
            let decoded = TmbAdapter.decode(&obs, &ctx).unwrap();
            assert_eq!(decoded.value.as_deref(), Some(raw));
            assert_eq!(decoded.attribute_name, "TMB (nonsynonymous)");
        }
    }

    #[test]
    fn quantity_without_value_text_is_formatted() {
        let rules = SampleIdRules::default();
        let repository = InMemoryRepository::new();
        let ctx = DecodeContext::new(&rules, &repository);

        let mut obs = TmbAdapter.encode(&tmb(Some("3.5"))).unwrap();
        obs.extension.clear();
        let decoded = TmbAdapter.decode(&obs, &ctx).unwrap();
        assert_eq!(decoded.value.as_deref(), Some("3.5"));
    }

    #[test]
    fn non_numeric_values_become_clinical_findings() {
        for value in [None, Some("null"), Some("high"), Some("NaN"), Some("inf")] {
            let obs = TmbAdapter.encode(&tmb(value)).unwrap();
            assert!(obs.code.has_coding(LOINC_SYSTEM, LOINC_CLINICAL_FINDING));
            assert!(!TmbAdapter.matches(&obs));
            assert!(obs.value_quantity.is_none());
            assert_eq!(obs.code.text.as_deref(), Some(TMB_ATTRIBUTE_ID));
        }
    }
}
