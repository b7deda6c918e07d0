//! In-process FHIR repository.
//!
//! Responsibilities:
//! - Execute transaction Bundles with conditional upsert (`PUT Type?query`), plain `PUT Type/id`,
//!   `POST` and conditional `DELETE`
//! - Resolve `urn:uuid` placeholders, both in conditional URLs of later entries and in the
//!   references of stored resources
//! - Answer searches on `_id`, `identifier`, `subject`, `code`, `component-value-concept` and
//!   `derived-from`
//!
//! Notes:
//! - A transaction runs against a copy of the store and is committed only if every entry
//!   succeeds.
//! - Stored references never carry embedded resources, so reads behave like a remote server.

use super::{parse_query, FhirRepository, SearchParams};
use crate::{MtbError, MtbResult};
use fhir::{
    Bundle, BundleEntry, BundleEntryResponse, BundleType, CodeableConcept, HttpVerb, Reference,
    Resource,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Clone, Debug, Default)]
struct Store {
    resources: Vec<Resource>,
    next_id: u64,
}

impl Store {
    fn assign_id(&mut self) -> String {
        self.next_id += 1;
        self.next_id.to_string()
    }

    fn matching(&self, resource_type: &str, params: &[(String, String)]) -> MtbResult<Vec<usize>> {
        let mut found = Vec::new();
        for (idx, resource) in self.resources.iter().enumerate() {
            if resource.resource_type() != resource_type {
                continue;
            }
            let mut all = true;
            for (name, value) in params {
                if !param_matches(resource, name, value)? {
                    all = false;
                    break;
                }
            }
            if all {
                found.push(idx);
            }
        }
        Ok(found)
    }

    fn position_by_id(&self, resource_type: &str, id: &str) -> Option<usize> {
        self.resources
            .iter()
            .position(|r| r.resource_type() == resource_type && r.id() == Some(id))
    }
}

/// FHIR repository held in memory.
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    store: Mutex<Store>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored resources.
    pub fn len(&self) -> usize {
        self.lock().resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stored resources of one type, in insertion order.
    pub fn resources_of_type(&self, resource_type: &str) -> Vec<Resource> {
        self.lock()
            .resources
            .iter()
            .filter(|r| r.resource_type() == resource_type)
            .cloned()
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Store> {
        self.store
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl FhirRepository for InMemoryRepository {
    fn transaction(&self, bundle: &Bundle) -> MtbResult<Bundle> {
        if !matches!(bundle.bundle_type, BundleType::Transaction | BundleType::Batch) {
            return Err(MtbError::Repository(format!(
                "expected a transaction bundle, got {:?}",
                bundle.bundle_type
            )));
        }

        let mut guard = self.lock();
        let mut working = guard.clone();
        let mut placeholders: HashMap<String, String> = HashMap::new();
        let mut response = Bundle::new(BundleType::TransactionResponse);

        for entry in &bundle.entry {
            let request = entry
                .request
                .as_ref()
                .ok_or_else(|| MtbError::Repository("transaction entry without request".into()))?;
            let url = substitute_placeholders(&request.url, &placeholders);
            let (resource_type, query) = match url.split_once('?') {
                Some((resource_type, query)) => (resource_type.to_string(), Some(query)),
                None => (url.clone(), None),
            };

            let (status, location) = match request.method {
                HttpVerb::Put => {
                    let (status, id) = put(&mut working, entry, &resource_type, query)?;
                    let type_name = resource_type.split('/').next().unwrap_or_default();
                    let location = format!("{type_name}/{id}");
                    if let Some(full_url) = &entry.full_url {
                        placeholders.insert(full_url.clone(), location.clone());
                    }
                    (status, Some(location))
                }
                HttpVerb::Post => {
                    let (status, id) = post(&mut working, entry, &resource_type)?;
                    let location = format!("{resource_type}/{id}");
                    if let Some(full_url) = &entry.full_url {
                        placeholders.insert(full_url.clone(), location.clone());
                    }
                    (status, Some(location))
                }
                HttpVerb::Delete => {
                    delete(&mut working, &resource_type, query)?;
                    ("204 No Content", None)
                }
                HttpVerb::Get => {
                    return Err(MtbError::Repository(
                        "GET entries are not supported in transactions".into(),
                    ))
                }
            };

            response.entry.push(BundleEntry {
                response: Some(BundleEntryResponse {
                    status: status.to_string(),
                    location,
                }),
                ..Default::default()
            });
        }

        for resource in &mut working.resources {
            store_references(resource, &placeholders);
        }
        *guard = working;
        Ok(response)
    }

    fn search(&self, resource_type: &str, params: &SearchParams<'_>) -> MtbResult<Bundle> {
        let owned: Vec<(String, String)> = params
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect();
        let store = self.lock();
        let matches = store.matching(resource_type, &owned)?;

        let mut bundle = Bundle::new(BundleType::Searchset);
        for idx in matches {
            let resource = store.resources[idx].clone();
            bundle.entry.push(BundleEntry {
                full_url: resource
                    .id()
                    .map(|id| format!("{}/{}", resource.resource_type(), id)),
                resource: Some(resource),
                ..Default::default()
            });
        }
        bundle.total = u32::try_from(bundle.entry.len()).ok();
        Ok(bundle)
    }
}

// ============================================================================
// Entry handlers
// ============================================================================

fn put(
    store: &mut Store,
    entry: &BundleEntry,
    target: &str,
    query: Option<&str>,
) -> MtbResult<(&'static str, String)> {
    let mut resource = entry
        .resource
        .clone()
        .ok_or_else(|| MtbError::Repository(format!("PUT {target} without resource")))?;

    let (resource_type, explicit_id) = match query {
        Some(_) => (target, None),
        None => match target.split_once('/') {
            Some((resource_type, id)) => (resource_type, Some(id.to_string())),
            None => {
                return Err(MtbError::Repository(format!(
                    "PUT {target} needs an id or a search query"
                )))
            }
        },
    };
    if resource.resource_type() != resource_type {
        return Err(MtbError::Repository(format!(
            "PUT {target} carries a {} resource",
            resource.resource_type()
        )));
    }

    let existing = match (query, &explicit_id) {
        (Some(query), _) => {
            let matches = store.matching(resource_type, &parse_query(query))?;
            if matches.len() > 1 {
                return Err(MtbError::Repository(format!(
                    "412 Precondition Failed: {} {resource_type} resources match {query}",
                    matches.len()
                )));
            }
            matches.first().copied()
        }
        (None, Some(id)) => store.position_by_id(resource_type, id),
        (None, None) => None,
    };

    match existing {
        Some(idx) => {
            let id = store.resources[idx].id().unwrap_or_default().to_string();
            set_id(&mut resource, &id);
            store.resources[idx] = resource;
            Ok(("200 OK", id))
        }
        None => {
            let id = explicit_id.unwrap_or_else(|| store.assign_id());
            set_id(&mut resource, &id);
            store.resources.push(resource);
            Ok(("201 Created", id))
        }
    }
}

fn post(
    store: &mut Store,
    entry: &BundleEntry,
    resource_type: &str,
) -> MtbResult<(&'static str, String)> {
    let mut resource = entry
        .resource
        .clone()
        .ok_or_else(|| MtbError::Repository(format!("POST {resource_type} without resource")))?;

    if let Some(condition) = entry.request.as_ref().and_then(|r| r.if_none_exist.as_deref()) {
        if let Some(idx) = store
            .matching(resource_type, &parse_query(condition))?
            .first()
        {
            let id = store.resources[*idx].id().unwrap_or_default().to_string();
            return Ok(("200 OK", id));
        }
    }

    let id = store.assign_id();
    set_id(&mut resource, &id);
    store.resources.push(resource);
    Ok(("201 Created", id))
}

fn delete(store: &mut Store, target: &str, query: Option<&str>) -> MtbResult<()> {
    let doomed: Vec<usize> = match query {
        Some(query) => store.matching(target, &parse_query(query))?,
        None => match target.split_once('/') {
            Some((resource_type, id)) => store.position_by_id(resource_type, id).into_iter().collect(),
            None => {
                return Err(MtbError::Repository(format!(
                    "DELETE {target} needs an id or a search query"
                )))
            }
        },
    };
    for idx in doomed.into_iter().rev() {
        store.resources.remove(idx);
    }
    Ok(())
}

// ============================================================================
// Search parameters
// ============================================================================

fn param_matches(resource: &Resource, name: &str, value: &str) -> MtbResult<bool> {
    let matched = match name {
        "_id" => {
            let id = value.rsplit('/').next().unwrap_or(value);
            resource.id() == Some(id)
        }
        "identifier" => resource.identifiers().iter().any(|identifier| {
            match value.split_once('|') {
                Some((system, code)) => {
                    identifier.system.as_deref() == Some(system)
                        && identifier.value.as_deref() == Some(code)
                }
                None => identifier.value.as_deref() == Some(value),
            }
        }),
        "subject" | "patient" => {
            resource.subject().and_then(|r| r.reference.as_deref()) == Some(value)
        }
        "code" => match resource {
            Resource::Observation(obs) => token_matches(&obs.code, value),
            Resource::DiagnosticReport(report) => token_matches(&report.code, value),
            _ => false,
        },
        "component-value-concept" => resource.as_observation().is_some_and(|obs| {
            obs.component.iter().any(|c| {
                c.value_codeable_concept
                    .as_ref()
                    .is_some_and(|concept| token_matches(concept, value))
            })
        }),
        "derived-from" => resource.as_observation().is_some_and(|obs| {
            obs.derived_from
                .iter()
                .any(|r| r.reference.as_deref() == Some(value))
        }),
        other if other.starts_with('_') => true,
        other => {
            return Err(MtbError::Repository(format!(
                "unsupported search parameter: {other}"
            )))
        }
    };
    Ok(matched)
}

fn token_matches(concept: &CodeableConcept, token: &str) -> bool {
    match token.split_once('|') {
        Some((system, code)) => concept.has_coding(system, code),
        None => concept
            .coding
            .iter()
            .any(|c| c.code.as_deref() == Some(token)),
    }
}

// ============================================================================
// Resource helpers
// ============================================================================

fn substitute_placeholders(url: &str, placeholders: &HashMap<String, String>) -> String {
    placeholders
        .iter()
        .fold(url.to_string(), |acc, (placeholder, location)| {
            acc.replace(placeholder.as_str(), location)
        })
}

fn set_id(resource: &mut Resource, id: &str) {
    let slot = match resource {
        Resource::Patient(r) => &mut r.id,
        Resource::Specimen(r) => &mut r.id,
        Resource::Observation(r) => &mut r.id,
        Resource::DiagnosticReport(r) => &mut r.id,
        Resource::Other(value) => {
            if let Value::Object(map) = value {
                map.insert("id".into(), Value::String(id.to_string()));
            }
            return;
        }
    };
    *slot = Some(id.to_string());
}

fn store_reference(reference: &mut Reference, placeholders: &HashMap<String, String>) {
    reference.resource = None;
    if let Some(target) = reference
        .reference
        .as_ref()
        .and_then(|r| placeholders.get(r))
    {
        reference.reference = Some(target.clone());
    }
}

/// Resolve placeholders and drop embedded resources from every reference of a stored resource.
fn store_references(resource: &mut Resource, placeholders: &HashMap<String, String>) {
    match resource {
        Resource::Specimen(specimen) => {
            if let Some(subject) = specimen.subject.as_mut() {
                store_reference(subject, placeholders);
            }
        }
        Resource::Observation(obs) => {
            let singles = [obs.subject.as_mut(), obs.specimen.as_mut()];
            for reference in singles.into_iter().flatten() {
                store_reference(reference, placeholders);
            }
            for reference in obs
                .has_member
                .iter_mut()
                .chain(obs.derived_from.iter_mut())
                .chain(obs.performer.iter_mut())
            {
                store_reference(reference, placeholders);
            }
            for contained in &mut obs.contained {
                store_references(contained, placeholders);
            }
        }
        Resource::DiagnosticReport(report) => {
            if let Some(subject) = report.subject.as_mut() {
                store_reference(subject, placeholders);
            }
            for reference in report.specimen.iter_mut().chain(report.result.iter_mut()) {
                store_reference(reference, placeholders);
            }
        }
        Resource::Patient(_) | Resource::Other(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fhir::{Coding, Identifier, Observation, ObservationComponent, Patient, Specimen};
    use pretty_assertions::assert_eq;

    const PATIENT_SYSTEM: &str = "https://example.org/patient";
    const SPECIMEN_SYSTEM: &str = "https://example.org/specimen";

    fn patient_and_specimen_bundle(sample: &str) -> Bundle {
        let mut bundle = Bundle::transaction();
        bundle.add_conditional_upsert(
            "urn:uuid:patient",
            Patient::with_identifier(PATIENT_SYSTEM, "P-1"),
            &format!("identifier={PATIENT_SYSTEM}|P-1"),
        );
        let specimen = Specimen {
            identifier: vec![Identifier::new(SPECIMEN_SYSTEM, sample)],
            subject: Some(Reference::to("urn:uuid:patient")),
            ..Default::default()
        };
        bundle.add_conditional_upsert(
            "urn:uuid:specimen",
            specimen,
            &format!("identifier={SPECIMEN_SYSTEM}|{sample}"),
        );
        bundle
    }

    fn gene_observation(subject: &str) -> Observation {
        Observation {
            subject: Some(Reference::to(subject)),
            component: vec![ObservationComponent {
                code: CodeableConcept::from_coding(Coding::new("http://loinc.org", "48018-6", "Gene studied")),
                value_codeable_concept: Some(CodeableConcept::from_coding(Coding::new(
                    "http://www.ncbi.nlm.nih.gov/gene",
                    "673",
                    "BRAF",
                ))),
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    #[test]
    fn conditional_upsert_creates_then_updates() {
        let repository = InMemoryRepository::new();

        let first = repository
            .transaction(&patient_and_specimen_bundle("S-1"))
            .unwrap();
        assert_eq!(repository.len(), 2);
        assert_eq!(
            first.entry[0].response.as_ref().map(|r| r.status.as_str()),
            Some("201 Created")
        );

        let second = repository
            .transaction(&patient_and_specimen_bundle("S-1"))
            .unwrap();
        assert_eq!(repository.len(), 2);
        assert_eq!(
            second.entry[1].response.as_ref().map(|r| r.status.as_str()),
            Some("200 OK")
        );
    }

    #[test]
    fn placeholders_resolve_in_references_and_later_conditions() {
        let repository = InMemoryRepository::new();
        let query = "component-value-concept=http://www.ncbi.nlm.nih.gov/gene|673&subject=urn:uuid:patient";

        for _ in 0..2 {
            let mut bundle = patient_and_specimen_bundle("S-1");
            bundle.add_conditional_upsert("urn:uuid:gene", gene_observation("urn:uuid:patient"), query);
            repository.transaction(&bundle).unwrap();
        }

        let observations = repository.resources_of_type("Observation");
        assert_eq!(observations.len(), 1);
        let subject = observations[0].subject().and_then(|r| r.reference.clone());
        assert_eq!(subject.as_deref(), Some("Patient/1"));

        let specimens = repository.search("Specimen", &[("subject", "Patient/1")]).unwrap();
        assert_eq!(specimens.entry.len(), 1);
        assert_eq!(specimens.entry[0].full_url.as_deref(), Some("Specimen/2"));
    }

    #[test]
    fn ambiguous_condition_rolls_back_whole_transaction() {
        let repository = InMemoryRepository::new();
        let mut seed = Bundle::transaction();
        for n in 0..2 {
            let specimen = Specimen {
                identifier: vec![Identifier::new(SPECIMEN_SYSTEM, "dup")],
                ..Default::default()
            };
            seed.entry.push(BundleEntry {
                full_url: Some(format!("urn:uuid:{n}")),
                resource: Some(specimen.into()),
                request: Some(fhir::BundleEntryRequest {
                    method: HttpVerb::Post,
                    url: "Specimen".into(),
                    if_none_exist: None,
                }),
                response: None,
            });
        }
        repository.transaction(&seed).unwrap();
        assert_eq!(repository.len(), 2);

        let err = repository
            .transaction(&patient_and_specimen_bundle("dup"))
            .expect_err("two specimens match");
        assert!(matches!(err, MtbError::Repository(_)));
        assert_eq!(repository.len(), 2, "patient entry must be rolled back");
    }

    #[test]
    fn conditional_delete_removes_matches() {
        let repository = InMemoryRepository::new();
        repository
            .transaction(&patient_and_specimen_bundle("S-1"))
            .unwrap();

        let mut deletion = Bundle::transaction();
        deletion.add_conditional_delete("Specimen", &format!("identifier={SPECIMEN_SYSTEM}|S-1"));
        repository.transaction(&deletion).unwrap();

        assert!(repository.resources_of_type("Specimen").is_empty());
        assert_eq!(repository.len(), 1);
    }

    #[test]
    fn search_by_id_accepts_typed_reference() {
        let repository = InMemoryRepository::new();
        repository
            .transaction(&patient_and_specimen_bundle("S-1"))
            .unwrap();

        let found = repository.search("Specimen", &[("_id", "Specimen/2")]).unwrap();
        assert_eq!(found.total, Some(1));
        assert!(repository
            .search("Specimen", &[("unknown-param", "x")])
            .is_err());
    }

    #[test]
    fn rejects_non_transaction_bundles() {
        let repository = InMemoryRepository::new();
        let err = repository
            .transaction(&Bundle::new(BundleType::Searchset))
            .expect_err("searchset");
        assert!(matches!(err, MtbError::Repository(_)));
    }
}
