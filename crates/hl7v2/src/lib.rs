//! HL7 Version 2 wire support for the MTB decision bridge.
//!
//! This crate provides the outbound side of the HL7 v2 boundary:
//! - a positional segment model with ER7 ("pipe") encoding and parsing
//! - the group structure of `ORU^R01` (lab results) and `RDE^O11` (pharmacy orders)
//! - field position constants for the segments the bridge populates
//! - an MLLP client connection for transmitting messages and reading acknowledgements
//!
//! Like the `fhir` crate, this crate holds no MTB mapping knowledge; the bridge core decides
//! what goes into which field.

pub mod datatypes;
pub mod fields;
pub mod message;
pub mod mllp;
pub mod segment;

pub use datatypes::Cwe;
pub use message::{
    Acknowledgement, Message, MessageHeader, OrderObservation, OruR01, PatientResult, RdeO11,
    RdeOrder,
};
pub use mllp::MllpClient;
pub use segment::{Encoding, Segment};

/// HL7 version emitted in MSH-12.
pub const VERSION: &str = "2.8.1";

/// Errors returned by the `hl7v2` boundary crate.
#[derive(Debug, thiserror::Error)]
pub enum Hl7Error {
    #[error("invalid segment: {0}")]
    InvalidSegment(String),

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("field position {0} is out of range")]
    FieldOutOfRange(usize),

    #[error("MLLP framing error: {0}")]
    Framing(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Type alias for Results that can fail with an [`Hl7Error`].
pub type Hl7Result<T> = Result<T, Hl7Error>;
