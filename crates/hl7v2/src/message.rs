//! Message structures for `ORU^R01`, `RDE^O11` and inbound acknowledgements.
//!
//! Responsibilities:
//! - Keep the group nesting of the two outbound message types (patient result, order
//!   observation, specimen; pharmacy order)
//! - Flatten groups into segment order and encode them as ER7
//! - Parse inbound ER7 text (acknowledgements) into a flat segment list
//!
//! Notes:
//! - Groups own plain [`Segment`]s; populating fields is left to the caller so that a failure on
//!   one field does not prevent the rest of the message from being built.

use crate::fields::{msa, msh};
use crate::segment::{Encoding, Segment};
use crate::{Hl7Error, Hl7Result, VERSION};
use chrono::Local;
use uuid::Uuid;

/// Segment terminator of ER7 messages.
pub const SEGMENT_TERMINATOR: char = '\r';

// ============================================================================
// Header
// ============================================================================

/// The values placed in MSH for an outbound message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageHeader {
    pub message_code: String,
    pub trigger_event: String,
    pub message_structure: String,
    pub control_id: String,
    pub timestamp: String,
    pub processing_id: String,
}

impl MessageHeader {
    /// Header with a fresh control id, the current local time and production processing.
    pub fn quickstart(message_code: &str, trigger_event: &str, message_structure: &str) -> Self {
        Self {
            message_code: message_code.to_string(),
            trigger_event: trigger_event.to_string(),
            message_structure: message_structure.to_string(),
            control_id: Uuid::new_v4().simple().to_string(),
            timestamp: Local::now().format("%Y%m%d%H%M%S").to_string(),
            processing_id: "P".to_string(),
        }
    }

    pub fn to_segment(&self, encoding: &Encoding) -> Hl7Result<Segment> {
        let mut segment = Segment::new("MSH");
        segment.set(msh::FIELD_SEPARATOR, encoding.field.to_string())?;
        segment.set(msh::ENCODING_CHARACTERS, encoding.characters())?;
        segment.set(msh::DATE_TIME_OF_MESSAGE, self.timestamp.as_str())?;
        segment.set_component(msh::MESSAGE_TYPE, 1, self.message_code.as_str())?;
        segment.set_component(msh::MESSAGE_TYPE, 2, self.trigger_event.as_str())?;
        segment.set_component(msh::MESSAGE_TYPE, 3, self.message_structure.as_str())?;
        segment.set(msh::MESSAGE_CONTROL_ID, self.control_id.as_str())?;
        segment.set(msh::PROCESSING_ID, self.processing_id.as_str())?;
        segment.set(msh::VERSION_ID, VERSION)?;
        Ok(segment)
    }
}

// ============================================================================
// Flat message
// ============================================================================

/// A message as an ordered list of segments.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub encoding: Encoding,
    pub segments: Vec<Segment>,
}

impl Message {
    /// Parse ER7 text. Segments may be separated by `\r`, `\n` or `\r\n`.
    pub fn parse(text: &str) -> Hl7Result<Self> {
        let mut lines = text
            .split(['\r', '\n'])
            .map(str::trim_end)
            .filter(|line| !line.is_empty());

        let first = lines
            .next()
            .ok_or_else(|| Hl7Error::InvalidMessage("empty message".into()))?;
        if !first.starts_with("MSH") {
            return Err(Hl7Error::InvalidMessage(
                "message does not start with MSH".into(),
            ));
        }
        let encoding = Encoding::from_msh(first)?;

        let mut segments = vec![Segment::parse(first, &encoding)?];
        for line in lines {
            segments.push(Segment::parse(line, &encoding)?);
        }
        Ok(Self { encoding, segments })
    }

    /// Encode as ER7, each segment terminated by `\r`.
    pub fn encode(&self) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            out.push_str(&segment.encode(&self.encoding));
            out.push(SEGMENT_TERMINATOR);
        }
        out
    }

    pub fn segment(&self, name: &str) -> Option<&Segment> {
        self.segments.iter().find(|s| s.name() == name)
    }

    pub fn segments_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Segment> + 'a {
        self.segments.iter().filter(move |s| s.name() == name)
    }

    /// MSH-10.
    pub fn control_id(&self) -> Option<&str> {
        self.segment("MSH")?.get(msh::MESSAGE_CONTROL_ID, 1)
    }
}

// ============================================================================
// ORU^R01
// ============================================================================

/// `ORDER_OBSERVATION` group: an `OBR` with its notes, observations and specimens.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrderObservation {
    pub obr: Segment,
    pub notes: Vec<Segment>,
    pub observations: Vec<Segment>,
    pub specimens: Vec<Segment>,
}

impl Default for OrderObservation {
    fn default() -> Self {
        Self {
            obr: Segment::new("OBR"),
            notes: Vec::new(),
            observations: Vec::new(),
            specimens: Vec::new(),
        }
    }
}

impl OrderObservation {
    /// Append a new `NTE` and return it for population.
    pub fn add_note(&mut self) -> &mut Segment {
        self.notes.push(Segment::new("NTE"));
        let idx = self.notes.len() - 1;
        &mut self.notes[idx]
    }

    /// Append a new `OBX` and return it for population.
    pub fn add_observation(&mut self) -> &mut Segment {
        self.observations.push(Segment::new("OBX"));
        let idx = self.observations.len() - 1;
        &mut self.observations[idx]
    }

    /// Append a new `SPM` and return it for population.
    pub fn add_specimen(&mut self) -> &mut Segment {
        self.specimens.push(Segment::new("SPM"));
        let idx = self.specimens.len() - 1;
        &mut self.specimens[idx]
    }

    fn flatten<'a>(&'a self, out: &mut Vec<&'a Segment>) {
        out.push(&self.obr);
        out.extend(&self.notes);
        out.extend(&self.observations);
        out.extend(&self.specimens);
    }
}

/// `PATIENT_RESULT` group: a `PID` and its order observations.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PatientResult {
    pub pid: Segment,
    pub orders: Vec<OrderObservation>,
}

impl Default for PatientResult {
    fn default() -> Self {
        Self {
            pid: Segment::new("PID"),
            orders: Vec::new(),
        }
    }
}

impl PatientResult {
    /// Append a new order observation group and return it for population.
    pub fn add_order(&mut self) -> &mut OrderObservation {
        self.orders.push(OrderObservation::default());
        let idx = self.orders.len() - 1;
        &mut self.orders[idx]
    }

    /// Every `OBX` in every order of this patient result.
    pub fn observations_mut(&mut self) -> impl Iterator<Item = &mut Segment> {
        self.orders.iter_mut().flat_map(|o| o.observations.iter_mut())
    }
}

/// Unsolicited observation result message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OruR01 {
    pub header: MessageHeader,
    pub patient_results: Vec<PatientResult>,
}

impl Default for OruR01 {
    fn default() -> Self {
        Self::new()
    }
}

impl OruR01 {
    pub fn new() -> Self {
        Self {
            header: MessageHeader::quickstart("ORU", "R01", "ORU_R01"),
            patient_results: Vec::new(),
        }
    }

    /// Append a new patient result group and return it for population.
    pub fn add_patient_result(&mut self) -> &mut PatientResult {
        self.patient_results.push(PatientResult::default());
        let idx = self.patient_results.len() - 1;
        &mut self.patient_results[idx]
    }

    /// Total number of order observation groups across all patient results.
    pub fn order_count(&self) -> usize {
        self.patient_results.iter().map(|p| p.orders.len()).sum()
    }

    pub fn to_message(&self) -> Hl7Result<Message> {
        let encoding = Encoding::default();
        let mut segments = vec![self.header.to_segment(&encoding)?];
        let mut body = Vec::new();
        for result in &self.patient_results {
            body.push(&result.pid);
            for order in &result.orders {
                order.flatten(&mut body);
            }
        }
        segments.extend(body.into_iter().cloned());
        Ok(Message { encoding, segments })
    }
}

// ============================================================================
// RDE^O11
// ============================================================================

/// `ORDER` group of a pharmacy order: `ORC` plus the requested give code in `RXO`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RdeOrder {
    pub orc: Segment,
    pub rxo: Segment,
}

impl Default for RdeOrder {
    fn default() -> Self {
        Self {
            orc: Segment::new("ORC"),
            rxo: Segment::new("RXO"),
        }
    }
}

/// Pharmacy/treatment encoded order message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RdeO11 {
    pub header: MessageHeader,
    pub pid: Segment,
    pub orders: Vec<RdeOrder>,
}

impl Default for RdeO11 {
    fn default() -> Self {
        Self::new()
    }
}

impl RdeO11 {
    pub fn new() -> Self {
        Self {
            header: MessageHeader::quickstart("RDE", "O11", "RDE_O11"),
            pid: Segment::new("PID"),
            orders: Vec::new(),
        }
    }

    /// Append a new order group and return it for population.
    pub fn add_order(&mut self) -> &mut RdeOrder {
        self.orders.push(RdeOrder::default());
        let idx = self.orders.len() - 1;
        &mut self.orders[idx]
    }

    pub fn to_message(&self) -> Hl7Result<Message> {
        let encoding = Encoding::default();
        let mut segments = vec![self.header.to_segment(&encoding)?, self.pid.clone()];
        for order in &self.orders {
            segments.push(order.orc.clone());
            segments.push(order.rxo.clone());
        }
        Ok(Message { encoding, segments })
    }
}

// ============================================================================
// ACK
// ============================================================================

/// The `MSA` content of an acknowledgement.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Acknowledgement {
    pub code: String,
    pub control_id: Option<String>,
    pub text: Option<String>,
}

impl Acknowledgement {
    pub fn from_message(message: &Message) -> Hl7Result<Self> {
        let msa_segment = message
            .segment("MSA")
            .ok_or_else(|| Hl7Error::InvalidMessage("acknowledgement has no MSA segment".into()))?;
        let code = msa_segment
            .get(msa::ACKNOWLEDGMENT_CODE, 1)
            .ok_or_else(|| Hl7Error::InvalidMessage("MSA-1 is empty".into()))?;
        Ok(Self {
            code: code.to_string(),
            control_id: msa_segment
                .get(msa::MESSAGE_CONTROL_ID, 1)
                .map(str::to_string),
            text: msa_segment.get(msa::TEXT_MESSAGE, 1).map(str::to_string),
        })
    }

    /// `AA` (original mode) or `CA` (enhanced mode).
    pub fn is_accepted(&self) -> bool {
        matches!(self.code.as_str(), "AA" | "CA")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::{obr, obx, pid};
    use pretty_assertions::assert_eq;

    #[test]
    fn oru_flattens_groups_in_segment_order() {
        let mut oru = OruR01::new();
        oru.header.control_id = "ctrl".into();
        oru.header.timestamp = "20230502120000".into();

        let result = oru.add_patient_result();
        result.pid.set(pid::SET_ID, "1").unwrap();
        result.pid.set(pid::PATIENT_IDENTIFIER_LIST, "P-1").unwrap();
        let order = result.add_order();
        order.obr.set(obr::SET_ID, "1").unwrap();
        order.add_note().set(1, "1").unwrap();
        order.add_observation().set(obx::SET_ID, "1").unwrap();
        order.add_specimen().set(1, "1").unwrap();

        let text = oru.to_message().unwrap().encode();
        assert_eq!(
            text,
            "MSH|^~\\&|||||20230502120000||ORU^R01^ORU_R01|ctrl|P|2.8.1\r\
             PID|1||P-1\r\
             OBR|1\r\
             NTE|1\r\
             OBX|1\r\
             SPM|1\r"
        );
    }

    #[test]
    fn rde_places_single_pid_before_orders() {
        let mut rde = RdeO11::new();
        rde.pid.set(pid::PATIENT_IDENTIFIER_LIST, "P-1").unwrap();
        rde.add_order().orc.set(1, "NW").unwrap();

        let message = rde.to_message().unwrap();
        let names: Vec<&str> = message.segments.iter().map(Segment::name).collect();
        assert_eq!(names, vec!["MSH", "PID", "ORC", "RXO"]);
        assert_eq!(message.segment("MSH").unwrap().get(9, 3), Some("RDE_O11"));
    }

    #[test]
    fn parses_acknowledgement() {
        let ack = "MSH|^~\\&|||||20230502||ACK^R01^ACK|1|P|2.8.1\rMSA|AA|ctrl\r";
        let message = Message::parse(ack).unwrap();
        let parsed = Acknowledgement::from_message(&message).unwrap();
        assert!(parsed.is_accepted());
        assert_eq!(parsed.control_id.as_deref(), Some("ctrl"));
    }

    #[test]
    fn rejection_is_not_accepted() {
        let ack = "MSH|^~\\&|||||20230502||ACK|1|P|2.8.1\nMSA|AE|ctrl|bad segment\n";
        let parsed = Acknowledgement::from_message(&Message::parse(ack).unwrap()).unwrap();
        assert!(!parsed.is_accepted());
        assert_eq!(parsed.text.as_deref(), Some("bad segment"));
    }

    #[test]
    fn parse_rejects_message_without_msh() {
        let err = Message::parse("PID|1").expect_err("no MSH");
        assert!(matches!(err, Hl7Error::InvalidMessage(_)));
    }

    #[test]
    fn quickstart_control_ids_are_unique() {
        let a = MessageHeader::quickstart("ORU", "R01", "ORU_R01");
        let b = MessageHeader::quickstart("ORU", "R01", "ORU_R01");
        assert_ne!(a.control_id, b.control_id);
        assert_eq!(a.control_id.len(), 32);
    }
}
