//! # MTB Core
//!
//! Mapping and reconciliation engine of the MTB decision bridge.
//!
//! This crate translates a patient's molecular tumor board decisions between three forms:
//! - the JSON model exchanged with the portal (`api-shared`)
//! - a FHIR transaction Bundle stored in the clinical repository (`fhir`)
//! - the HL7 v2 `ORU^R01`/`RDE^O11` pair pushed to hospital systems (`hl7v2`)
//!
//! External systems are reached through small traits ([`repository::FhirRepository`],
//! [`resolvers::GeneNameResolver`], [`resolvers::PublicationResolver`],
//! [`transport::Hl7Sender`]) so the mappers can be exercised against in-process stand-ins.
//!
//! **No API concerns**: HTTP routing and OpenAPI documents belong in `api-rest`.

pub mod clinical_data;
pub mod config;
pub mod constants;
pub mod context;
pub mod error;
pub mod genetic_alteration;
pub mod hl7v2_mapper;
pub mod mtb_mapper;
pub mod reasoning;
pub mod repository;
pub mod resolvers;
pub mod sample_id;
pub mod service;
pub mod specimen;
pub mod transport;

pub use config::Settings;
pub use error::{MtbError, MtbResult};
pub use service::MtbService;
