//! JSON payload model of MTB decisions.
//!
//! These types are the request and response bodies of the REST surface and the input of the
//! FHIR and HL7 v2 mappers. Field names follow the portal's camelCase JSON exactly; optional
//! fields are omitted on output when absent.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Top-level body of `GET|PUT /mtb/{patientId}`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CbioportalRest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default)]
    pub mtbs: Vec<Mtb>,
}

/// One molecular tumor board session for a patient.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Mtb {
    pub id: String,

    /// ISO date, `YYYY-MM-DD`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtb_state: Option<String>,

    #[serde(default)]
    pub samples: Vec<String>,

    #[serde(default)]
    pub therapy_recommendations: Vec<TherapyRecommendation>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub general_recommendation: Option<String>,
}

impl Mtb {
    /// True if the session has been completed; the state comparison ignores case.
    pub fn is_completed(&self) -> bool {
        self.mtb_state
            .as_deref()
            .is_some_and(|state| state.eq_ignore_ascii_case("completed"))
    }
}

/// A treatment decision agreed by the board, with its evidentiary basis.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TherapyRecommendation {
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence_level: Option<String>,

    #[serde(default)]
    pub reasoning: Reasoning,

    #[serde(default)]
    pub references: Vec<Reference>,

    #[serde(default)]
    pub treatments: Vec<Treatment>,

    /// Free-text comments; the portal sends these under `comment`.
    #[serde(default, rename = "comment", alias = "comments")]
    pub comments: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
}

/// Clinical and genetic findings a recommendation is based on.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Reasoning {
    #[serde(default)]
    pub clinical_data: Vec<ClinicalDatum>,

    #[serde(default)]
    pub genetic_alterations: Vec<GeneticAlteration>,
}

/// One structured or free-text clinical fact.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClinicalDatum {
    pub attribute_id: String,

    pub attribute_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_id: Option<String>,
}

/// A gene alteration identified by Entrez gene id and protein change.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct GeneticAlteration {
    pub entrez_gene_id: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hugo_gene_symbol: Option<String>,

    /// Protein change, e.g. `V600E`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alteration: Option<String>,
}

/// A literature reference backing a recommendation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Reference {
    pub pmid: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// A drug, identified by NCI Thesaurus code.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Treatment {
    pub ncit_code: String,

    pub name: String,
}

/// Body of `DELETE /mtb/{patientId}`: ids of sessions and recommendations to remove.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Deletions {
    #[serde(default)]
    pub mtb: Vec<String>,

    #[serde(default)]
    pub therapy_recommendation: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn parses_portal_payload() {
        let body = json!({
            "id": "P-0001",
            "mtbs": [{
                "id": "mtb_P-0001_1683021600",
                "date": "2023-05-02",
                "mtbState": "COMPLETED",
                "samples": ["P-0001-T01"],
                "generalRecommendation": "Re-biopsy after 3 months",
                "therapyRecommendations": [{
                    "id": "therapyRecommendation_P-0001_1",
                    "evidenceLevel": "2B",
                    "author": "dr.who",
                    "comment": ["first", "second"],
                    "references": [{"pmid": 12345}],
                    "treatments": [{"ncitCode": "C82386", "name": "Vemurafenib"}],
                    "reasoning": {
                        "geneticAlterations": [
                            {"entrezGeneId": 673, "hugoGeneSymbol": "BRAF", "alteration": "V600E"}
                        ],
                        "clinicalData": [
                            {"attributeId": "AGE", "attributeName": "Age", "value": "42"}
                        ]
                    }
                }]
            }]
        });

        let parsed: CbioportalRest = serde_json::from_value(body).expect("parse");
        let mtb = &parsed.mtbs[0];
        assert!(mtb.is_completed());
        let tr = &mtb.therapy_recommendations[0];
        assert_eq!(tr.comments, vec!["first".to_string(), "second".to_string()]);
        assert_eq!(tr.references[0].name, None);
        assert_eq!(tr.reasoning.genetic_alterations[0].entrez_gene_id, 673);
        assert_eq!(tr.reasoning.clinical_data[0].value.as_deref(), Some("42"));
    }

    #[test]
    fn comments_render_under_portal_field_name() {
        let tr = TherapyRecommendation {
            id: "tr1".into(),
            comments: vec!["note".into()],
            ..Default::default()
        };
        let value = serde_json::to_value(&tr).expect("render");
        assert_eq!(value["comment"], json!(["note"]));
        assert!(value.get("evidenceLevel").is_none());
    }

    #[test]
    fn mtb_state_comparison_ignores_case() {
        let state = |s: Option<&str>| Mtb {
            mtb_state: s.map(str::to_string),
            ..Default::default()
        };
        assert!(state(Some("completed")).is_completed());
        assert!(state(Some("COMPLETED")).is_completed());
        assert!(!state(Some("In Progress")).is_completed());
        assert!(!state(None).is_completed());
    }
}
