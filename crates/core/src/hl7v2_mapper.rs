//! MTB records -> HL7 v2 `ORU^R01` and `RDE^O11`.
//!
//! Responsibilities:
//! - Build one lab-result message and one pharmacy-order message per patient submission
//! - Include completed MTB sessions only
//! - Send both messages, result first, over one connection
//!
//! Notes:
//! - Segment population failures (including failed gene or publication lookups) are logged and
//!   the message is still built. Only a failed send aborts the request.
//! - Per therapy recommendation the lab-result message gets its own `PATIENT_RESULT` group: a
//!   master panel order with specimens, notes, evidence and citations, followed by one
//!   discrete variant order per genetic alteration.

use crate::constants::{
    HGNC_OID, HGVS_OID, LOINC_AMINO_ACID_CHANGE, LOINC_ANSWER_PRESENT,
    LOINC_DISCRETE_GENETIC_VARIANT, LOINC_DISCRETE_VARIANT_PANEL, LOINC_GENE_STUDIED,
    LOINC_LEVEL_OF_EVIDENCE, LOINC_MASTER_PANEL, LOINC_OID, LOINC_VARIANT_ASSESSMENT,
    NCBI_GENE_OID, NCIT_OID, PUBMED_OID, SPECIMEN_TYPE_TUMOR,
};
use crate::resolvers::{GeneNameResolver, PublicationResolver};
use crate::transport::Hl7Sender;
use crate::{MtbError, MtbResult};
use api_shared::{GeneticAlteration, Mtb, Reference, TherapyRecommendation, Treatment};
use hl7v2::fields::{nte, obr, obx, orc, pid, rxo, spm};
use hl7v2::{Cwe, Hl7Result, Message, OrderObservation, OruR01, PatientResult, RdeO11, Segment};
use std::sync::Arc;

const LOINC: &str = "LN";
const LOCAL: &str = "L";
const RESULT_STATUS_FINAL: &str = "F";
const ORDER_CONTROL_NEW: &str = "NW";

fn loinc(code: &str, text: &str) -> Cwe {
    Cwe::new(code, text, LOINC).with_oid(LOINC_OID)
}

/// Log a failed segment population and carry on.
fn degrade<E: std::fmt::Display>(result: Result<(), E>, segment: &str) {
    if let Err(err) = result {
        tracing::warn!(segment, error = %err, "HL7 v2 segment left incomplete");
    }
}

/// `YYYY-MM-DD` -> `YYYYMMDD`.
pub fn hl7_date(date: &str) -> String {
    date.replace('-', "")
}

/// The message pair of one submission.
#[derive(Clone, Debug)]
pub struct Hl7Messages {
    pub oru: OruR01,
    pub rde: RdeO11,
}

impl Hl7Messages {
    /// Encodable `(ORU^R01, RDE^O11)` messages.
    pub fn to_messages(&self) -> MtbResult<(Message, Message)> {
        Ok((self.oru.to_message()?, self.rde.to_message()?))
    }
}

pub struct Hl7v2Mapper {
    genes: Arc<dyn GeneNameResolver>,
    publications: Arc<dyn PublicationResolver>,
}

impl Hl7v2Mapper {
    pub fn new(genes: Arc<dyn GeneNameResolver>, publications: Arc<dyn PublicationResolver>) -> Self {
        Self {
            genes,
            publications,
        }
    }

    /// Build the message pair for one patient.
    ///
    /// # Errors
    ///
    /// Returns [`MtbError::InvalidInput`] if the patient id is empty.
    pub fn build(&self, patient_id: &str, mtbs: &[Mtb]) -> MtbResult<Hl7Messages> {
        if patient_id.trim().is_empty() {
            return Err(MtbError::InvalidInput("patient id cannot be empty".into()));
        }

        let mut oru = OruR01::new();
        let mut rde = RdeO11::new();
        degrade(write_pid(&mut rde.pid, patient_id), "PID");

        for mtb in mtbs {
            if !mtb.is_completed() {
                tracing::debug!(mtb = %mtb.id, state = ?mtb.mtb_state, "skipping MTB that is not completed");
                continue;
            }
            for recommendation in &mtb.therapy_recommendations {
                let result = oru.add_patient_result();
                degrade(write_pid(&mut result.pid, patient_id), "PID");
                self.add_recommendation(result, mtb, recommendation);

                for treatment in &recommendation.treatments {
                    let order = rde.add_order();
                    degrade(
                        order.orc.set(orc::ORDER_CONTROL, ORDER_CONTROL_NEW),
                        "ORC",
                    );
                    degrade(write_treatment(&mut order.rxo, treatment), "RXO");
                }
            }
        }
        Ok(Hl7Messages { oru, rde })
    }

    /// Build the message pair and send `ORU^R01`, then `RDE^O11`.
    ///
    /// # Errors
    ///
    /// Returns [`MtbError::Transport`] if either send fails; nothing is retried.
    pub fn send(&self, patient_id: &str, mtbs: &[Mtb], sender: &dyn Hl7Sender) -> MtbResult<()> {
        let (oru, rde) = self.build(patient_id, mtbs)?.to_messages()?;
        tracing::info!(patient = %patient_id, "sending HL7 v2 result and pharmacy order");
        sender.send(&oru)?;
        sender.send(&rde)?;
        Ok(())
    }

    fn add_recommendation(
        &self,
        result: &mut PatientResult,
        mtb: &Mtb,
        recommendation: &TherapyRecommendation,
    ) {
        let master = result.add_order();
        degrade(write_master_panel(&mut master.obr, mtb, recommendation), "OBR");

        for (position, sample) in mtb.samples.iter().enumerate() {
            let specimen = master.add_specimen();
            degrade(write_specimen(specimen, position + 1, sample), "SPM");
        }

        degrade(write_notes(master, mtb, recommendation), "NTE");

        let evidence = master.add_observation();
        degrade(
            write_evidence(evidence, recommendation.evidence_level.as_deref()),
            "OBX",
        );

        for reference in &recommendation.references {
            match self.citation(reference) {
                Ok(citation) => {
                    let set_id = master.observations.len() + 1;
                    let segment = master.add_observation();
                    degrade(write_citation(segment, set_id, &citation), "OBX");
                }
                Err(err) => tracing::warn!(pmid = reference.pmid, error = %err, "skipping citation"),
            }
        }

        for alteration in &recommendation.reasoning.genetic_alterations {
            let set_id = result.orders.len() + 1;
            let order = result.add_order();
            self.write_variant_order(order, set_id, alteration);
        }

        if let Some(author) = recommendation.author.as_deref() {
            for observation in result.observations_mut() {
                degrade(write_responsible_observer(observation, author), "OBX");
            }
        }
    }

    fn citation(&self, reference: &Reference) -> MtbResult<Cwe> {
        let text = match reference.name.as_deref() {
            Some(name) => name.to_string(),
            None => self.publications.resolve(reference.pmid)?,
        };
        Ok(Cwe::new(reference.pmid.to_string(), text, "").with_oid(PUBMED_OID))
    }

    fn write_variant_order(
        &self,
        order: &mut OrderObservation,
        set_id: usize,
        alteration: &GeneticAlteration,
    ) {
        degrade(
            write_order_header(
                &mut order.obr,
                set_id,
                &loinc(LOINC_DISCRETE_VARIANT_PANEL, "Discrete genetic variant panel"),
            ),
            "OBR",
        );

        let assessment = order.add_observation();
        degrade(
            write_coded_observation(
                assessment,
                1,
                &loinc(LOINC_VARIANT_ASSESSMENT, "Genetic variant assessment"),
                &loinc(LOINC_ANSWER_PRESENT, "Present"),
            ),
            "OBX",
        );

        let protein_change = format!(
            "p.{}",
            alteration.alteration.as_deref().unwrap_or_default()
        );
        let hgvs = order.add_observation();
        degrade(
            write_coded_observation(
                hgvs,
                2,
                &loinc(LOINC_AMINO_ACID_CHANGE, "Amino acid change (pHGVS)"),
                &Cwe::new(&protein_change, &protein_change, "").with_oid(HGVS_OID),
            ),
            "OBX",
        );

        let entrez_id = alteration.entrez_gene_id.to_string();
        let entrez = order.add_observation();
        degrade(
            write_coded_observation(
                entrez,
                3,
                &loinc(LOINC_DISCRETE_GENETIC_VARIANT, "Discrete genetic variant"),
                &Cwe::new(&entrez_id, &entrez_id, "").with_oid(NCBI_GENE_OID),
            ),
            "OBX",
        );

        let gene = order.add_observation();
        let written = self
            .genes
            .resolve(alteration.entrez_gene_id)
            .and_then(|hgnc| {
                write_coded_observation(
                    gene,
                    4,
                    &loinc(LOINC_GENE_STUDIED, "Gene studied [ID]"),
                    &Cwe::new(hgnc.hgnc_id, hgnc.symbol, "").with_oid(HGNC_OID),
                )
                .map_err(MtbError::from)
            });
        degrade(written, "OBX");
    }
}

// ============================================================================
// Segment writers
// ============================================================================

fn write_pid(segment: &mut Segment, patient_id: &str) -> Hl7Result<()> {
    segment.set(pid::SET_ID, "1")?;
    segment.set(pid::PATIENT_IDENTIFIER_LIST, patient_id)
}

fn write_order_header(segment: &mut Segment, set_id: usize, service: &Cwe) -> Hl7Result<()> {
    segment.set(obr::SET_ID, set_id.to_string())?;
    service.write(segment, obr::UNIVERSAL_SERVICE_IDENTIFIER, 0)
}

fn write_master_panel(
    segment: &mut Segment,
    mtb: &Mtb,
    recommendation: &TherapyRecommendation,
) -> Hl7Result<()> {
    write_order_header(
        segment,
        1,
        &loinc(LOINC_MASTER_PANEL, "Master HL7 genetic variant reporting panel"),
    )?;
    segment.set(obr::RESULT_STATUS, RESULT_STATUS_FINAL)?;
    segment.set(obr::FILLER_ORDER_NUMBER, recommendation.id.as_str())?;
    if let Some(date) = mtb.date.as_deref() {
        segment.set(obr::OBSERVATION_DATE_TIME, hl7_date(date))?;
    }
    // The MTB id replaces the recommendation id as filler order number.
    segment.set(obr::FILLER_ORDER_NUMBER, mtb.id.as_str())
}

fn write_specimen(segment: &mut Segment, set_id: usize, sample: &str) -> Hl7Result<()> {
    segment.set(spm::SET_ID, set_id.to_string())?;
    segment.set_component(spm::SPECIMEN_ID, 2, sample)?;
    segment.set_component(spm::SPECIMEN_TYPE, 1, SPECIMEN_TYPE_TUMOR)?;
    segment.set_component(spm::SPECIMEN_TYPE, 2, "Tumor")
}

fn write_notes(
    order: &mut OrderObservation,
    mtb: &Mtb,
    recommendation: &TherapyRecommendation,
) -> Hl7Result<()> {
    let general = order.add_note();
    general.set(nte::SET_ID, "1")?;
    general.set(nte::SOURCE_OF_COMMENT, LOCAL)?;
    Cwe::new("GI", "General Instructions", "").write(general, nte::COMMENT_TYPE, 0)?;
    if let Some(text) = mtb.general_recommendation.as_deref() {
        general.set(nte::COMMENT, text)?;
    }

    let reasons = order.add_note();
    reasons.set(nte::SET_ID, "2")?;
    reasons.set(nte::SOURCE_OF_COMMENT, LOCAL)?;
    Cwe::new("1R", "Primary Reason", "").write(reasons, nte::COMMENT_TYPE, 0)?;
    for (idx, comment) in recommendation.comments.iter().enumerate() {
        reasons.set_repetition_component(nte::COMMENT, idx, 1, comment.as_str())?;
    }
    Ok(())
}

fn write_evidence(segment: &mut Segment, level: Option<&str>) -> Hl7Result<()> {
    segment.set(obx::SET_ID, "1")?;
    segment.set(obx::VALUE_TYPE, "ST")?;
    loinc(LOINC_LEVEL_OF_EVIDENCE, "Level of evidence").write(
        segment,
        obx::OBSERVATION_IDENTIFIER,
        0,
    )?;
    segment.set(obx::OBSERVATION_VALUE, level.unwrap_or_default())
}

fn write_citation(segment: &mut Segment, set_id: usize, citation: &Cwe) -> Hl7Result<()> {
    write_coded_observation(
        segment,
        set_id,
        &Cwe::new("REF", "Literature reference", LOCAL),
        citation,
    )
}

fn write_coded_observation(
    segment: &mut Segment,
    set_id: usize,
    identifier: &Cwe,
    value: &Cwe,
) -> Hl7Result<()> {
    segment.set(obx::SET_ID, set_id.to_string())?;
    segment.set(obx::VALUE_TYPE, "CWE")?;
    identifier.write(segment, obx::OBSERVATION_IDENTIFIER, 0)?;
    value.write(segment, obx::OBSERVATION_VALUE, 0)
}

fn write_responsible_observer(segment: &mut Segment, author: &str) -> Hl7Result<()> {
    segment.insert_repetition(obx::RESPONSIBLE_OBSERVER, 0)?;
    segment.set_repetition_component(obx::RESPONSIBLE_OBSERVER, 0, 1, author)
}

fn write_treatment(segment: &mut Segment, treatment: &Treatment) -> Hl7Result<()> {
    Cwe::new(&treatment.ncit_code, &treatment.name, "")
        .with_oid(NCIT_OID)
        .write(segment, rxo::REQUESTED_GIVE_CODE, 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolvers::HgncGene;
    use api_shared::Reasoning;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    struct StubGenes;

    impl GeneNameResolver for StubGenes {
        fn resolve(&self, entrez_gene_id: u64) -> MtbResult<HgncGene> {
            match entrez_gene_id {
                673 => Ok(HgncGene {
                    hgnc_id: "HGNC:1097".into(),
                    symbol: "BRAF".into(),
                }),
                other => Err(MtbError::GeneNotFound(other)),
            }
        }
    }

    struct StubPublications;

    impl PublicationResolver for StubPublications {
        fn resolve(&self, pmid: u64) -> MtbResult<String> {
            Ok(format!("Title of {pmid}"))
        }
    }

    #[derive(Default)]
    struct RecordingSender {
        sent: Mutex<Vec<String>>,
        fail: bool,
    }

    impl Hl7Sender for RecordingSender {
        fn send(&self, message: &Message) -> MtbResult<()> {
            if self.fail {
                return Err(MtbError::Transport("receiver down".into()));
            }
            let kind = message
                .segment("MSH")
                .and_then(|msh| msh.get(hl7v2::fields::msh::MESSAGE_TYPE, 1))
                .unwrap_or_default()
                .to_string();
            self.sent.lock().unwrap().push(kind);
            Ok(())
        }
    }

    fn mapper() -> Hl7v2Mapper {
        Hl7v2Mapper::new(Arc::new(StubGenes), Arc::new(StubPublications))
    }

    fn recommendation() -> TherapyRecommendation {
        TherapyRecommendation {
            id: "tr_1".into(),
            evidence_level: Some("2B".into()),
            reasoning: Reasoning {
                clinical_data: Vec::new(),
                genetic_alterations: vec![
                    GeneticAlteration {
                        entrez_gene_id: 673,
                        hugo_gene_symbol: Some("BRAF".into()),
                        alteration: Some("V600E".into()),
                    },
                    GeneticAlteration {
                        entrez_gene_id: 999_999,
                        hugo_gene_symbol: None,
                        alteration: Some("X1Y".into()),
                    },
                ],
            },
            references: vec![Reference {
                pmid: 12345,
                name: None,
            }],
            treatments: vec![
                Treatment {
                    ncit_code: "C64768".into(),
                    name: "Vemurafenib".into(),
                },
                Treatment {
                    ncit_code: "C2653".into(),
                    name: "Cobimetinib".into(),
                },
            ],
            comments: vec!["first".into(), "second".into()],
            author: Some("dr.house".into()),
        }
    }

    fn mtb(id: &str, state: Option<&str>) -> Mtb {
        Mtb {
            id: id.into(),
            date: Some("2023-05-02".into()),
            mtb_state: state.map(str::to_string),
            samples: vec!["S-1".into(), "S-2".into()],
            therapy_recommendations: vec![recommendation()],
            general_recommendation: Some("Consider targeted therapy".into()),
        }
    }

    #[test]
    fn only_completed_mtbs_produce_orders() {
        let mtbs = vec![
            mtb("a", Some("completed")),
            mtb("b", Some("In Progress")),
            mtb("c", None),
            mtb("d", Some("COMPLETED")),
        ];
        let messages = mapper().build("P-1", &mtbs).unwrap();

        let masters: Vec<&str> = messages
            .oru
            .patient_results
            .iter()
            .filter_map(|r| r.orders[0].obr.get(obr::FILLER_ORDER_NUMBER, 1))
            .collect();
        assert_eq!(masters, vec!["a", "d"]);
        // two completed MTBs with two treatments each
        assert_eq!(messages.rde.orders.len(), 4);
    }

    #[test]
    fn master_panel_carries_date_specimens_and_notes() {
        let messages = mapper().build("P-1", &[mtb("mtb_1", Some("COMPLETED"))]).unwrap();
        let result = &messages.oru.patient_results[0];
        assert_eq!(result.pid.get(pid::PATIENT_IDENTIFIER_LIST, 1), Some("P-1"));

        let master = &result.orders[0];
        assert_eq!(master.obr.get(obr::SET_ID, 1), Some("1"));
        assert_eq!(master.obr.get(obr::OBSERVATION_DATE_TIME, 1), Some("20230502"));
        assert_eq!(master.obr.get(obr::FILLER_ORDER_NUMBER, 1), Some("mtb_1"));
        assert_eq!(master.obr.get(obr::RESULT_STATUS, 1), Some("F"));
        assert_eq!(
            master.obr.get(obr::UNIVERSAL_SERVICE_IDENTIFIER, 1),
            Some("81247-9")
        );

        let set_ids: Vec<&str> = master
            .specimens
            .iter()
            .filter_map(|s| s.get(spm::SET_ID, 1))
            .collect();
        assert_eq!(set_ids, vec!["1", "2"]);
        assert_eq!(master.specimens[1].get(spm::SPECIMEN_ID, 2), Some("S-2"));
        assert_eq!(master.specimens[0].get(spm::SPECIMEN_TYPE, 1), Some("TUMOR"));

        assert_eq!(master.notes[0].get(nte::COMMENT_TYPE, 2), Some("General Instructions"));
        assert_eq!(master.notes[0].get(nte::COMMENT, 1), Some("Consider targeted therapy"));
        assert_eq!(master.notes[1].get(nte::COMMENT_TYPE, 1), Some("1R"));
        assert_eq!(master.notes[1].get_repetition(nte::COMMENT, 1, 1), Some("second"));
    }

    #[test]
    fn evidence_and_citation_use_resolved_title() {
        let messages = mapper().build("P-1", &[mtb("mtb_1", Some("COMPLETED"))]).unwrap();
        let master = &messages.oru.patient_results[0].orders[0];

        let evidence = &master.observations[0];
        assert_eq!(evidence.get(obx::OBSERVATION_IDENTIFIER, 1), Some("93044-6"));
        assert_eq!(evidence.get(obx::VALUE_TYPE, 1), Some("ST"));
        assert_eq!(evidence.get(obx::OBSERVATION_VALUE, 1), Some("2B"));

        let citation = &master.observations[1];
        assert_eq!(citation.get(obx::SET_ID, 1), Some("2"));
        assert_eq!(citation.get(obx::OBSERVATION_VALUE, 1), Some("12345"));
        assert_eq!(citation.get(obx::OBSERVATION_VALUE, 2), Some("Title of 12345"));
        assert_eq!(
            citation.get(obx::OBSERVATION_VALUE, 14),
            Some("2.16.840.1.113883.13.191")
        );
    }

    #[test]
    fn variant_orders_follow_master_and_degrade_on_unknown_gene() {
        let messages = mapper().build("P-1", &[mtb("mtb_1", Some("COMPLETED"))]).unwrap();
        let result = &messages.oru.patient_results[0];
        assert_eq!(result.orders.len(), 3);

        let braf = &result.orders[1];
        assert_eq!(braf.obr.get(obr::SET_ID, 1), Some("2"));
        assert_eq!(braf.obr.get(obr::UNIVERSAL_SERVICE_IDENTIFIER, 1), Some("81250-3"));
        let values: Vec<Option<&str>> = braf
            .observations
            .iter()
            .map(|o| o.get(obx::OBSERVATION_VALUE, 1))
            .collect();
        assert_eq!(
            values,
            vec![Some("LA9633-4"), Some("p.V600E"), Some("673"), Some("HGNC:1097")]
        );
        assert_eq!(braf.observations[3].get(obx::OBSERVATION_VALUE, 2), Some("BRAF"));

        let unknown = &result.orders[2];
        assert_eq!(unknown.observations.len(), 4);
        assert_eq!(unknown.observations[3].get(obx::OBSERVATION_VALUE, 1), None);
    }

    #[test]
    fn author_is_stamped_on_every_observation() {
        let messages = mapper().build("P-1", &[mtb("mtb_1", Some("COMPLETED"))]).unwrap();
        let result = &messages.oru.patient_results[0];
        for order in &result.orders {
            for observation in &order.observations {
                assert_eq!(observation.get(obx::RESPONSIBLE_OBSERVER, 1), Some("dr.house"));
            }
        }
    }

    #[test]
    fn each_treatment_gets_its_own_pharmacy_order() {
        let messages = mapper().build("P-1", &[mtb("mtb_1", Some("COMPLETED"))]).unwrap();
        assert_eq!(messages.rde.pid.get(pid::PATIENT_IDENTIFIER_LIST, 1), Some("P-1"));

        let drugs: Vec<(Option<&str>, Option<&str>)> = messages
            .rde
            .orders
            .iter()
            .map(|order| {
                assert_eq!(order.orc.get(orc::ORDER_CONTROL, 1), Some("NW"));
                (
                    order.rxo.get(rxo::REQUESTED_GIVE_CODE, 1),
                    order.rxo.get(rxo::REQUESTED_GIVE_CODE, 2),
                )
            })
            .collect();
        assert_eq!(
            drugs,
            vec![
                (Some("C64768"), Some("Vemurafenib")),
                (Some("C2653"), Some("Cobimetinib")),
            ]
        );
    }

    #[test]
    fn sends_result_before_pharmacy_order() {
        let sender = RecordingSender::default();
        mapper()
            .send("P-1", &[mtb("mtb_1", Some("COMPLETED"))], &sender)
            .unwrap();
        assert_eq!(*sender.sent.lock().unwrap(), vec!["ORU", "RDE"]);
    }

    #[test]
    fn transport_failure_is_fatal() {
        let sender = RecordingSender {
            fail: true,
            ..Default::default()
        };
        let err = mapper()
            .send("P-1", &[mtb("mtb_1", Some("COMPLETED"))], &sender)
            .expect_err("send fails");
        assert!(matches!(err, MtbError::Transport(_)));
    }
}
