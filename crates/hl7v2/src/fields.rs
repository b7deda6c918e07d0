//! Field positions of the segments the bridge reads and writes.
//!
//! Positions are 1-based, matching the `SEG-n` notation of the HL7 v2.8.1 standard.

pub mod msh {
    pub const FIELD_SEPARATOR: usize = 1;
    pub const ENCODING_CHARACTERS: usize = 2;
    pub const DATE_TIME_OF_MESSAGE: usize = 7;
    pub const MESSAGE_TYPE: usize = 9;
    pub const MESSAGE_CONTROL_ID: usize = 10;
    pub const PROCESSING_ID: usize = 11;
    pub const VERSION_ID: usize = 12;
}

pub mod msa {
    pub const ACKNOWLEDGMENT_CODE: usize = 1;
    pub const MESSAGE_CONTROL_ID: usize = 2;
    pub const TEXT_MESSAGE: usize = 3;
}

pub mod pid {
    pub const SET_ID: usize = 1;
    pub const PATIENT_IDENTIFIER_LIST: usize = 3;
}

pub mod orc {
    pub const ORDER_CONTROL: usize = 1;
}

pub mod obr {
    pub const SET_ID: usize = 1;
    pub const FILLER_ORDER_NUMBER: usize = 3;
    pub const UNIVERSAL_SERVICE_IDENTIFIER: usize = 4;
    pub const OBSERVATION_DATE_TIME: usize = 7;
    pub const RESULT_STATUS: usize = 25;
}

pub mod obx {
    pub const SET_ID: usize = 1;
    pub const VALUE_TYPE: usize = 2;
    pub const OBSERVATION_IDENTIFIER: usize = 3;
    pub const OBSERVATION_VALUE: usize = 5;
    pub const RESPONSIBLE_OBSERVER: usize = 16;
}

pub mod spm {
    pub const SET_ID: usize = 1;
    pub const SPECIMEN_ID: usize = 2;
    pub const SPECIMEN_TYPE: usize = 4;
}

pub mod nte {
    pub const SET_ID: usize = 1;
    pub const SOURCE_OF_COMMENT: usize = 2;
    pub const COMMENT: usize = 3;
    pub const COMMENT_TYPE: usize = 4;
}

pub mod rxo {
    pub const REQUESTED_GIVE_CODE: usize = 1;
}
