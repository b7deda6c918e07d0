//! Request-level operations behind the REST surface.
//!
//! Responsibilities:
//! - Store a patient's MTB list as one FHIR transaction and, when enabled, push the HL7 v2 pair
//! - Read a patient's MTB list back from the repository
//! - Delete MTB sessions and therapy recommendations
//! - Answer alteration queries
//!
//! Notes:
//! - Each call builds its own genetic Observation index; nothing is shared between requests.
//! - All collaborators are blocking. Async callers run these methods on a blocking thread.

use crate::config::Settings;
use crate::hl7v2_mapper::Hl7v2Mapper;
use crate::mtb_mapper::MtbFhirMapper;
use crate::reasoning::GeneticObservationIndex;
use crate::repository::{FhirRepository, HttpFhirRepository, InMemoryRepository};
use crate::resolvers::{HgncTable, PubmedClient};
use crate::transport::Hl7Sender;
use crate::{MtbError, MtbResult};
use api_shared::{CbioportalRest, Deletions, GeneticAlteration, Mtb, TherapyRecommendation};
use fhir::{Bundle, BundleType};
use hl7v2::MllpClient;
use std::sync::Arc;

/// Resource types that make up a patient's MTB record.
const RECORD_TYPES: [&str; 3] = ["DiagnosticReport", "Observation", "Specimen"];

fn check_transaction_response(response: &Bundle) -> MtbResult<()> {
    for entry in &response.entry {
        if let Some(status) = entry.response.as_ref().map(|r| r.status.as_str()) {
            if !status.trim_start().starts_with('2') {
                return Err(MtbError::Repository(format!(
                    "transaction entry answered {status}"
                )));
            }
        }
    }
    Ok(())
}

struct Hl7Outbound {
    mapper: Hl7v2Mapper,
    sender: Arc<dyn Hl7Sender>,
}

pub struct MtbService {
    mapper: MtbFhirMapper,
    repository: Arc<dyn FhirRepository>,
    hl7: Option<Hl7Outbound>,
}

impl MtbService {
    pub fn new(mapper: MtbFhirMapper, repository: Arc<dyn FhirRepository>) -> Self {
        Self {
            mapper,
            repository,
            hl7: None,
        }
    }

    /// Send the HL7 v2 message pair after every successful store.
    pub fn with_hl7(mut self, mapper: Hl7v2Mapper, sender: Arc<dyn Hl7Sender>) -> Self {
        self.hl7 = Some(Hl7Outbound { mapper, sender });
        self
    }

    /// Wire all collaborators from settings.
    ///
    /// Without `fhir_base_url` the service keeps resources in memory. Without `hgnc_path` gene
    /// lookups fail and the gene segment of each variant order stays empty.
    ///
    /// # Errors
    ///
    /// Returns [`MtbError::Config`] if sample id rules do not compile or the HGNC table cannot be
    /// read, and [`MtbError::Http`] if an HTTP client cannot be built.
    pub fn from_settings(settings: &Settings) -> MtbResult<Self> {
        let mapper = MtbFhirMapper::from_settings(settings)?;

        let repository: Arc<dyn FhirRepository> = match settings.fhir_base_url() {
            Some(url) => {
                tracing::info!(url, "using FHIR repository");
                Arc::new(HttpFhirRepository::new(url)?)
            }
            None => {
                tracing::warn!("no fhir_base_url configured, keeping resources in memory");
                Arc::new(InMemoryRepository::new())
            }
        };

        let mut service = Self::new(mapper, repository);

        if let Some(target) = settings.hl7v2_target() {
            let genes = match settings.hgnc_path.as_deref() {
                Some(path) => HgncTable::from_path(path)?,
                None => {
                    tracing::warn!("no hgnc_path configured, gene names will not be resolved");
                    HgncTable::default()
                }
            };
            let publications = PubmedClient::new(&settings.pubmed_base_url)?;
            let sender = MllpClient::new(&target.server, target.port);
            tracing::info!(address = %sender.address(), "HL7 v2 sending enabled");
            service = service.with_hl7(
                Hl7v2Mapper::new(Arc::new(genes), Arc::new(publications)),
                Arc::new(sender),
            );
        }
        Ok(service)
    }

    pub fn sends_hl7(&self) -> bool {
        self.hl7.is_some()
    }

    /// Store a patient's MTB list, then send the HL7 v2 pair if enabled.
    ///
    /// # Errors
    ///
    /// Returns [`MtbError::InvalidInput`] for missing ids, [`MtbError::Repository`] if the
    /// transaction is rejected, and [`MtbError::Transport`] if the HL7 v2 send fails. A failed
    /// send does not undo the stored transaction.
    pub fn put(&self, patient_id: &str, mtbs: &[Mtb]) -> MtbResult<()> {
        let mut index = GeneticObservationIndex::new();
        let bundle = self.mapper.to_bundle(patient_id, mtbs, &mut index)?;
        tracing::info!(
            patient = %patient_id,
            mtbs = mtbs.len(),
            entries = bundle.entry.len(),
            genetic_observations = index.len(),
            "storing MTB record"
        );

        let response = self.repository.transaction(&bundle)?;
        check_transaction_response(&response)?;

        if let Some(hl7) = &self.hl7 {
            hl7.mapper.send(patient_id, mtbs, hl7.sender.as_ref())?;
        }
        Ok(())
    }

    /// Read a patient's MTB list. An unknown patient has an empty list.
    pub fn read(&self, patient_id: &str) -> MtbResult<CbioportalRest> {
        let empty = CbioportalRest {
            id: Some(patient_id.to_string()),
            mtbs: Vec::new(),
        };

        let identifier = format!("{}|{patient_id}", self.mapper.systems().patient);
        let patients = self
            .repository
            .search("Patient", &[("identifier", identifier.as_str())])?;
        let Some(patient_ref) = patients
            .resources()
            .find_map(|patient| patient.id().map(|id| format!("Patient/{id}")))
        else {
            tracing::debug!(patient = %patient_id, "no stored record");
            return Ok(empty);
        };

        let mut record = Bundle::new(BundleType::Searchset);
        for resource_type in RECORD_TYPES {
            let found = self
                .repository
                .search(resource_type, &[("subject", patient_ref.as_str())])?;
            record.entry.extend(found.entry);
        }

        Ok(CbioportalRest {
            id: Some(patient_id.to_string()),
            mtbs: self.mapper.from_bundle(&record, self.repository.as_ref()),
        })
    }

    pub fn delete(&self, patient_id: &str, deletions: &Deletions) -> MtbResult<()> {
        let bundle = self.mapper.deletions_bundle(deletions);
        if bundle.entry.is_empty() {
            return Ok(());
        }
        tracing::info!(
            patient = %patient_id,
            mtbs = deletions.mtb.len(),
            therapy_recommendations = deletions.therapy_recommendation.len(),
            "deleting MTB entries"
        );
        let response = self.repository.transaction(&bundle)?;
        check_transaction_response(&response)
    }

    pub fn therapy_recommendations_by_alteration(
        &self,
        alterations: &[GeneticAlteration],
    ) -> MtbResult<Vec<TherapyRecommendation>> {
        self.mapper
            .therapy_recommendations_by_alteration(alterations, self.repository.as_ref())
    }

    pub fn pmids_by_alteration(&self, alterations: &[GeneticAlteration]) -> MtbResult<Vec<u64>> {
        self.mapper
            .pmids_by_alteration(alterations, self.repository.as_ref())
    }
}
