//! FHIR Bundle wire model.
//!
//! Responsibilities:
//! - Model transaction, transaction-response and search-set bundles
//! - Build conditional upsert (`PUT Type?query` + `ifNoneExist`) and conditional delete entries
//! - Resolve references against the entries of a bundle
//!
//! Notes:
//! - Conditional upsert is the idempotence mechanism of the bridge: the same search key is used as
//!   the request URL and as the "only if absent" condition, so resubmitting identical content does
//!   not create duplicates on the repository side.

use crate::{FhirResult, Resource};
use serde::{Deserialize, Serialize};

/// Indicates the purpose of a bundle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BundleType {
    Transaction,
    TransactionResponse,
    Searchset,
    Collection,
    Batch,
    BatchResponse,
}

/// HTTP verb of a bundle entry request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpVerb {
    Get,
    Post,
    Put,
    Delete,
}

/// A container for a collection of resources.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bundle {
    #[serde(default = "bundle_resource_type")]
    pub resource_type: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(rename = "type")]
    pub bundle_type: BundleType,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u32>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub link: Vec<BundleLink>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entry: Vec<BundleEntry>,
}

/// Paging link of a search-set bundle.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleLink {
    pub relation: String,
    pub url: String,
}

fn bundle_resource_type() -> String {
    "Bundle".to_string()
}

/// Entry in a bundle.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleEntry {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<Resource>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub request: Option<BundleEntryRequest>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<BundleEntryResponse>,
}

/// Request details for a transaction entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleEntryRequest {
    pub method: HttpVerb,

    pub url: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub if_none_exist: Option<String>,
}

/// Result of processing a transaction entry.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleEntryResponse {
    pub status: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl Bundle {
    pub fn new(bundle_type: BundleType) -> Self {
        Self {
            resource_type: bundle_resource_type(),
            id: None,
            bundle_type,
            total: None,
            link: Vec::new(),
            entry: Vec::new(),
        }
    }

    pub fn transaction() -> Self {
        Self::new(BundleType::Transaction)
    }

    /// Parse a bundle from JSON text, reporting the failing path on schema mismatch.
    pub fn parse(json_text: &str) -> FhirResult<Self> {
        crate::parse_json(json_text, "Bundle")
    }

    pub fn render(&self) -> FhirResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn render_pretty(&self) -> FhirResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Add a conditional upsert entry.
    ///
    /// The request is `PUT <Type>?<search_query>` with `ifNoneExist = <search_query>`.
    pub fn add_conditional_upsert(
        &mut self,
        full_url: impl Into<String>,
        resource: impl Into<Resource>,
        search_query: &str,
    ) {
        let resource = resource.into();
        let url = format!("{}?{}", resource.resource_type(), search_query);
        self.entry.push(BundleEntry {
            full_url: Some(full_url.into()),
            resource: Some(resource),
            request: Some(BundleEntryRequest {
                method: HttpVerb::Put,
                url,
                if_none_exist: Some(search_query.to_string()),
            }),
            response: None,
        });
    }

    /// Add a conditional delete entry: `DELETE <Type>?<search_query>`.
    pub fn add_conditional_delete(&mut self, resource_type: &str, search_query: &str) {
        self.entry.push(BundleEntry {
            full_url: None,
            resource: None,
            request: Some(BundleEntryRequest {
                method: HttpVerb::Delete,
                url: format!("{resource_type}?{search_query}"),
                if_none_exist: None,
            }),
            response: None,
        });
    }

    /// Entry whose request URL is exactly `url`.
    pub fn entry_by_request_url(&self, url: &str) -> Option<&BundleEntry> {
        self.entry
            .iter()
            .find(|e| e.request.as_ref().is_some_and(|r| r.url == url))
    }

    pub fn entry_by_request_url_mut(&mut self, url: &str) -> Option<&mut BundleEntry> {
        self.entry
            .iter_mut()
            .find(|e| e.request.as_ref().is_some_and(|r| r.url == url))
    }

    /// URL of the next page of a paged search result.
    pub fn next_link(&self) -> Option<&str> {
        self.link
            .iter()
            .find(|l| l.relation == "next")
            .map(|l| l.url.as_str())
    }

    pub fn resources(&self) -> impl Iterator<Item = &Resource> {
        self.entry.iter().filter_map(|e| e.resource.as_ref())
    }

    /// Resolve a reference string against the bundle entries.
    ///
    /// Matches the entry full URL exactly, a full URL ending in `/<reference>`, or a resource whose
    /// `Type/id` equals the reference.
    pub fn resolve(&self, reference: &str) -> Option<&Resource> {
        self.entry.iter().find_map(|e| {
            let resource = e.resource.as_ref()?;
            let by_url = e.full_url.as_deref().is_some_and(|url| {
                url == reference || url.ends_with(&format!("/{reference}"))
            });
            let by_id = resource
                .id()
                .is_some_and(|id| format!("{}/{}", resource.resource_type(), id) == reference);
            (by_url || by_id).then_some(resource)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Identifier, Specimen};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn conditional_upsert_uses_query_as_url_and_condition() {
        let mut bundle = Bundle::transaction();
        let specimen = Specimen {
            identifier: vec![Identifier::new("https://example.org/specimen", "T-1")],
            ..Default::default()
        };
        bundle.add_conditional_upsert(
            "urn:uuid:abc",
            specimen,
            "identifier=https://example.org/specimen|T-1",
        );

        let value = serde_json::to_value(&bundle).expect("render");
        assert_eq!(
            value["entry"][0]["request"],
            json!({
                "method": "PUT",
                "url": "Specimen?identifier=https://example.org/specimen|T-1",
                "ifNoneExist": "identifier=https://example.org/specimen|T-1"
            })
        );
        assert_eq!(value["type"], json!("transaction"));
        assert_eq!(value["resourceType"], json!("Bundle"));
    }

    #[test]
    fn resolve_matches_full_url_and_type_id() {
        let input = r#"{
            "resourceType": "Bundle",
            "type": "searchset",
            "entry": [
                {
                    "fullUrl": "http://fhir.example.org/fhir/Specimen/42",
                    "resource": {"resourceType": "Specimen", "id": "42"}
                },
                {
                    "fullUrl": "urn:uuid:0f9e",
                    "resource": {"resourceType": "Observation", "status": "final", "code": {}}
                }
            ]
        }"#;
        let bundle = Bundle::parse(input).expect("parse");

        assert!(bundle.resolve("Specimen/42").is_some());
        assert!(bundle.resolve("urn:uuid:0f9e").is_some());
        assert!(bundle.resolve("Specimen/43").is_none());
    }

    #[test]
    fn next_link_follows_paging() {
        let input = r#"{
            "resourceType": "Bundle",
            "type": "searchset",
            "link": [
                {"relation": "self", "url": "http://fhir.example.org/fhir/Observation?subject=Patient/1"},
                {"relation": "next", "url": "http://fhir.example.org/fhir?_getpages=abc&_getpagesoffset=20"}
            ]
        }"#;
        let bundle = Bundle::parse(input).expect("parse");
        assert_eq!(
            bundle.next_link(),
            Some("http://fhir.example.org/fhir?_getpages=abc&_getpagesoffset=20")
        );
        assert!(Bundle::transaction().next_link().is_none());
    }

    #[test]
    fn parse_reports_path_of_schema_mismatch() {
        let input = r#"{"resourceType": "Bundle", "type": "not-a-type"}"#;
        let err = Bundle::parse(input).expect_err("should reject bundle type");
        assert!(err.to_string().contains("type"));
    }
}
