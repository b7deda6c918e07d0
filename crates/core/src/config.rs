//! Runtime configuration.
//!
//! Settings are read once at process startup from a YAML file and then passed into the services.
//! Request handling never reads the environment or the settings file again.

use crate::constants::{
    DEFAULT_BIND_ADDRESS, DEFAULT_MTB_SYSTEM, DEFAULT_PATIENT_SYSTEM, DEFAULT_PORT,
    DEFAULT_PUBMED_BASE_URL, DEFAULT_SETTINGS_FILE, DEFAULT_SPECIMEN_SYSTEM,
    DEFAULT_THERAPY_RECOMMENDATION_SYSTEM,
};
use crate::{MtbError, MtbResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable naming the settings file when no CLI argument is given.
pub const SETTINGS_ENV_VAR: &str = "MTB_SETTINGS";

/// One ordered `(pattern, replacement)` rewrite of a sample id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegexRule {
    pub pattern: String,
    pub replacement: String,
}

/// Outbound HL7 v2 connection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hl7v2Settings {
    #[serde(default)]
    pub send_v2: bool,

    #[serde(default)]
    pub server: String,

    pub port: u16,
}

/// Bridge settings resolved at startup.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub port: u16,
    pub bind_address: String,

    /// FHIR repository base URL; empty selects the in-memory repository.
    pub fhir_base_url: Option<String>,

    /// HGNC complete-set TSV used to resolve gene names.
    pub hgnc_path: Option<PathBuf>,

    pub pubmed_base_url: String,

    pub patient_system: String,
    pub specimen_system: String,
    pub mtb_system: String,
    pub therapy_recommendation_system: String,

    pub hl7v2: Option<Hl7v2Settings>,

    /// Portal sample id -> repository identifier value.
    pub sample_id_rules: Vec<RegexRule>,

    /// Repository identifier value -> portal sample id.
    pub sample_id_reverse_rules: Vec<RegexRule>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            fhir_base_url: None,
            hgnc_path: None,
            pubmed_base_url: DEFAULT_PUBMED_BASE_URL.to_string(),
            patient_system: DEFAULT_PATIENT_SYSTEM.to_string(),
            specimen_system: DEFAULT_SPECIMEN_SYSTEM.to_string(),
            mtb_system: DEFAULT_MTB_SYSTEM.to_string(),
            therapy_recommendation_system: DEFAULT_THERAPY_RECOMMENDATION_SYSTEM.to_string(),
            hl7v2: None,
            sample_id_rules: Vec::new(),
            sample_id_reverse_rules: Vec::new(),
        }
    }
}

impl Settings {
    /// Parse settings from YAML text and validate them.
    ///
    /// # Errors
    ///
    /// Returns [`MtbError::Config`] naming the offending key if the YAML does not match the
    /// settings schema, or if validation fails.
    pub fn from_yaml_str(text: &str) -> MtbResult<Self> {
        let deserializer = serde_yaml::Deserializer::from_str(text);
        let settings: Settings = serde_path_to_error::deserialize(deserializer).map_err(|err| {
            let path = err.path().to_string();
            MtbError::Config(format!("{path}: {}", err.into_inner()))
        })?;
        settings.validate()?;
        Ok(settings)
    }

    /// Read and validate a settings file.
    pub fn load(path: &Path) -> MtbResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            MtbError::Config(format!("cannot read settings file {}: {e}", path.display()))
        })?;
        Self::from_yaml_str(&text)
    }

    /// Resolve the settings path: explicit argument, then the environment value, then the
    /// default file name.
    pub fn resolve_path(argument: Option<String>, env_value: Option<String>) -> PathBuf {
        argument
            .or(env_value)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SETTINGS_FILE))
    }

    pub fn validate(&self) -> MtbResult<()> {
        for rule in self
            .sample_id_rules
            .iter()
            .chain(self.sample_id_reverse_rules.iter())
        {
            regex::Regex::new(&rule.pattern).map_err(|e| {
                MtbError::Config(format!("invalid sample id pattern {:?}: {e}", rule.pattern))
            })?;
        }

        let systems = [
            ("patient_system", &self.patient_system),
            ("specimen_system", &self.specimen_system),
            ("mtb_system", &self.mtb_system),
            (
                "therapy_recommendation_system",
                &self.therapy_recommendation_system,
            ),
        ];
        for (key, value) in systems {
            if value.trim().is_empty() {
                return Err(MtbError::Config(format!("{key} cannot be empty")));
            }
        }

        if let Some(hl7) = &self.hl7v2 {
            if hl7.send_v2 && hl7.server.trim().is_empty() {
                return Err(MtbError::Config(
                    "hl7v2.server is required when hl7v2.send_v2 is enabled".into(),
                ));
            }
        }
        Ok(())
    }

    /// The FHIR repository base URL, if a remote repository is configured.
    pub fn fhir_base_url(&self) -> Option<&str> {
        self.fhir_base_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }

    /// The HL7 v2 connection, if sending is enabled.
    pub fn hl7v2_target(&self) -> Option<&Hl7v2Settings> {
        self.hl7v2.as_ref().filter(|hl7| hl7.send_v2)
    }
}
