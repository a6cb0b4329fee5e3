use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use lab_extract::config::{self, ExtractionConfig};
use lab_extract::pipeline::vocabulary::LabVocabulary;
use lab_extract::{LabReportProcessor, RawInput};

#[derive(Parser, Debug)]
#[command(name = "lab-extract")]
#[command(version, about = "Extract structured lab parameters from report photos, scans and digital files", long_about = None)]
struct Cli {
    /// Directory holding lab_vocabulary.json (default: $LAB_EXTRACT_RESOURCES or resources/, else the bundled copy)
    #[arg(long, global = true)]
    vocabulary_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Process one upload and print the result envelope as JSON
    Extract {
        /// Input file (PDF, PNG, JPG, JSON, CSV or TXT)
        file: PathBuf,

        /// Declared media type; guessed from the file name when omitted
        #[arg(long)]
        media_type: Option<String>,

        /// JSON file overriding extraction tunables
        #[arg(long)]
        config: Option<PathBuf>,

        /// Pretty-print the envelope
        #[arg(long)]
        pretty: bool,
    },

    /// Show the loaded vocabulary version and its canonical parameters
    Vocabulary,
}

fn main() -> Result<()> {
    lab_extract::init_tracing();
    let cli = Cli::parse();
    let vocabulary = Arc::new(load_vocabulary(cli.vocabulary_dir.as_deref())?);

    match cli.command {
        Commands::Extract {
            file,
            media_type,
            config: config_path,
            pretty,
        } => {
            let extraction_config = match config_path {
                Some(path) => ExtractionConfig::from_json_file(&path)?.with_env_overrides(),
                None => ExtractionConfig::from_env(),
            };
            let bytes = std::fs::read(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let file_name = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| file.display().to_string());

            tracing::info!("{} v{}", config::APP_NAME, config::APP_VERSION);
            let processor = LabReportProcessor::with_defaults(extraction_config, vocabulary);
            let result = processor.process(RawInput::new(bytes, media_type.as_deref(), &file_name));

            let json = if pretty {
                serde_json::to_string_pretty(&result)?
            } else {
                serde_json::to_string(&result)?
            };
            println!("{json}");
        }
        Commands::Vocabulary => {
            println!("Vocabulary version: {}", vocabulary.version);
            for parameter in vocabulary.parameters() {
                println!("  {:<24} {}", parameter.key, parameter.display_name);
            }
        }
    }

    Ok(())
}

fn load_vocabulary(dir: Option<&Path>) -> Result<LabVocabulary> {
    match dir {
        Some(dir) => LabVocabulary::load(dir)
            .with_context(|| format!("Failed to load vocabulary from {}", dir.display())),
        None => match LabVocabulary::load(&config::resources_dir()) {
            Ok(vocabulary) => Ok(vocabulary),
            Err(e) => {
                tracing::debug!(error = %e, "No vocabulary on disk, using the bundled copy");
                LabVocabulary::bundled().context("Bundled vocabulary is invalid")
            }
        },
    }
}
