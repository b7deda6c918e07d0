use anyhow::{bail, Context};
use api_shared::CbioportalRest;
use clap::{Parser, Subcommand};
use hl7v2::MllpClient;
use mtb_core::config::SETTINGS_ENV_VAR;
use mtb_core::hl7v2_mapper::Hl7v2Mapper;
use mtb_core::mtb_mapper::MtbFhirMapper;
use mtb_core::reasoning::GeneticObservationIndex;
use mtb_core::resolvers::{HgncTable, PubmedClient};
use mtb_core::Settings;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "mtb")]
#[command(about = "MTB decision bridge CLI")]
struct Cli {
    /// Settings file (default: $MTB_SETTINGS, then settings.yaml if present)
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the FHIR transaction Bundle for a JSON payload
    Bundle {
        /// JSON body as sent to PUT /mtb/{patientId}
        payload: PathBuf,
        /// Patient id (default: the payload's id)
        #[arg(long)]
        patient: Option<String>,
    },
    /// Print the HL7 v2 ORU^R01 and RDE^O11 messages for a JSON payload
    Hl7 {
        payload: PathBuf,
        #[arg(long)]
        patient: Option<String>,
    },
    /// Send the HL7 v2 messages for a JSON payload
    Send {
        payload: PathBuf,
        #[arg(long)]
        patient: Option<String>,
        /// Receiver host (default: hl7v2.server from settings)
        #[arg(long)]
        host: Option<String>,
        /// Receiver port (default: hl7v2.port from settings)
        #[arg(long)]
        port: Option<u16>,
    },
}

fn load_settings(explicit: Option<PathBuf>) -> anyhow::Result<Settings> {
    let path = Settings::resolve_path(
        explicit.map(|p| p.to_string_lossy().into_owned()),
        std::env::var(SETTINGS_ENV_VAR).ok(),
    );
    if !path.exists() {
        tracing::debug!(path = %path.display(), "no settings file, using defaults");
        return Ok(Settings::default());
    }
    Ok(Settings::load(&path)?)
}

fn load_payload(path: &Path) -> anyhow::Result<CbioportalRest> {
    let file = File::open(path).with_context(|| format!("cannot open {}", path.display()))?;
    serde_json::from_reader(file).with_context(|| format!("invalid payload {}", path.display()))
}

fn patient_id(explicit: Option<String>, payload: &CbioportalRest) -> anyhow::Result<String> {
    match explicit.or_else(|| payload.id.clone()) {
        Some(id) if !id.trim().is_empty() => Ok(id),
        _ => bail!("no patient id: pass --patient or set \"id\" in the payload"),
    }
}

fn render_bundle(settings: &Settings, patient: &str, payload: &CbioportalRest) -> anyhow::Result<String> {
    let mapper = MtbFhirMapper::from_settings(settings)?;
    let bundle = mapper.to_bundle(patient, &payload.mtbs, &mut GeneticObservationIndex::new())?;
    Ok(bundle.render_pretty()?)
}

fn hl7_mapper(settings: &Settings) -> anyhow::Result<Hl7v2Mapper> {
    let genes = match settings.hgnc_path.as_deref() {
        Some(path) => HgncTable::from_path(path)?,
        None => HgncTable::default(),
    };
    let publications = PubmedClient::new(&settings.pubmed_base_url)?;
    Ok(Hl7v2Mapper::new(Arc::new(genes), Arc::new(publications)))
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive("mtb=info".parse()?))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Bundle { payload, patient }) => {
            let settings = load_settings(cli.settings)?;
            let payload = load_payload(&payload)?;
            let patient = patient_id(patient, &payload)?;
            println!("{}", render_bundle(&settings, &patient, &payload)?);
        }
        Some(Commands::Hl7 { payload, patient }) => {
            let settings = load_settings(cli.settings)?;
            let payload = load_payload(&payload)?;
            let patient = patient_id(patient, &payload)?;
            let (oru, rde) = hl7_mapper(&settings)?
                .build(&patient, &payload.mtbs)?
                .to_messages()?;
            for message in [oru, rde] {
                println!("{}\n", message.encode().replace('\r', "\n").trim_end());
            }
        }
        Some(Commands::Send {
            payload,
            patient,
            host,
            port,
        }) => {
            let settings = load_settings(cli.settings)?;
            let payload = load_payload(&payload)?;
            let patient = patient_id(patient, &payload)?;

            let configured = settings.hl7v2.clone();
            let Some(host) = host.or_else(|| configured.as_ref().map(|c| c.server.clone())) else {
                bail!("no receiver: pass --host or configure hl7v2.server");
            };
            let Some(port) = port.or_else(|| configured.as_ref().map(|c| c.port)) else {
                bail!("no receiver port: pass --port or configure hl7v2.port");
            };

            let client = MllpClient::new(&host, port);
            hl7_mapper(&settings)?.send(&patient, &payload.mtbs, &client)?;
            println!("Sent ORU^R01 and RDE^O11 to {}", client.address());
        }
        None => {
            println!("Use 'mtb --help' for commands");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const PAYLOAD: &str = r#"{
        "id": "P-1",
        "mtbs": [{
            "id": "mtb_1",
            "mtbState": "COMPLETED",
            "samples": ["S-1"],
            "therapyRecommendations": [{
                "id": "tr_1",
                "reasoning": {"geneticAlterations": [{"entrezGeneId": 673, "alteration": "V600E"}]}
            }]
        }]
    }"#;

    fn payload_file() -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(PAYLOAD.as_bytes()).unwrap();
        file
    }

    #[test]
    fn patient_id_prefers_argument_over_payload() {
        let file = payload_file();
        let payload = load_payload(file.path()).unwrap();
        assert_eq!(patient_id(None, &payload).unwrap(), "P-1");
        assert_eq!(patient_id(Some("P-2".into()), &payload).unwrap(), "P-2");

        let anonymous = CbioportalRest::default();
        assert!(patient_id(None, &anonymous).is_err());
    }

    #[test]
    fn bundle_is_rendered_as_transaction() {
        let file = payload_file();
        let payload = load_payload(file.path()).unwrap();
        let rendered = render_bundle(&Settings::default(), "P-1", &payload).unwrap();

        let bundle = fhir::Bundle::parse(&rendered).unwrap();
        assert_eq!(bundle.bundle_type, fhir::BundleType::Transaction);
        assert!(rendered.contains("component-value-concept=http://www.ncbi.nlm.nih.gov/gene|673"));
    }

    #[test]
    fn missing_payload_names_the_file() {
        let err = load_payload(Path::new("/nonexistent/payload.json")).expect_err("missing");
        assert!(err.to_string().contains("/nonexistent/payload.json"));
    }
}
