mod pipeline;
mod run;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use stemkit_core::config::RuntimeConfig;
use stemkit_core::pipeline::SeparationRequest;
use stemkit_core::{BackendPreference, OutputFormat, Runtime};

/// Stemkit - prepare audio and split it into stems
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Runtime config file (defaults to $STEMKIT_CONFIG or the user config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Give up on a task after this many seconds
    #[arg(long, default_value = "600", global = true)]
    timeout_sec: u64,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Decode and normalise an input to the canonical 44.1 kHz stereo WAV
    Prepare {
        input: PathBuf,

        #[arg(long)]
        work_dir: PathBuf,

        #[arg(long, default_value = stemkit_core::DEFAULT_PREPARE_PREFIX)]
        prefix: String,
    },

    /// Separate an input into one file per stem
    Separate {
        input: PathBuf,

        /// Model file handed to the inference engine
        #[arg(long)]
        model: PathBuf,

        /// Canonical input from a previous `prepare`; decoded instead of INPUT
        #[arg(long)]
        prepared: Option<PathBuf>,

        #[arg(long)]
        output_dir: PathBuf,

        #[arg(long, default_value = stemkit_core::DEFAULT_SEPARATION_PREFIX)]
        prefix: String,

        #[arg(long, value_enum, default_value = "wav")]
        format: FormatArg,

        #[arg(long, default_value = "auto", value_parser = parse_backend)]
        backend: BackendPreference,

        /// <= 0 uses the model default
        #[arg(long, default_value = "-1", allow_hyphen_values = true)]
        chunk_size: i32,

        /// <= 0 uses the model default
        #[arg(long, default_value = "-1", allow_hyphen_values = true)]
        overlap: i32,
    },

    /// Prepare once, separate once per backend, verify the stems and write a JSON report
    Pipeline {
        input: PathBuf,

        #[arg(long)]
        model: PathBuf,

        /// Comma-separated backends, e.g. cpu,vulkan
        #[arg(long)]
        backends: String,

        /// JSON report path; task output goes next to it under runtime/
        #[arg(long)]
        report: PathBuf,

        /// Minimum size of each stem file
        #[arg(long, default_value = "1000")]
        min_bytes: u64,

        /// Allowed stem duration deviation from the prepared input
        #[arg(long, default_value = "300")]
        duration_tolerance_ms: u64,

        #[arg(long, default_value = "-1", allow_hyphen_values = true)]
        chunk_size: i32,

        #[arg(long, default_value = "-1", allow_hyphen_values = true)]
        overlap: i32,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum FormatArg {
    Wav,
    Flac,
    Mp3,
}

impl From<FormatArg> for OutputFormat {
    fn from(format: FormatArg) -> Self {
        match format {
            FormatArg::Wav => OutputFormat::Wav,
            FormatArg::Flac => OutputFormat::Flac,
            FormatArg::Mp3 => OutputFormat::Mp3,
        }
    }
}

fn parse_backend(name: &str) -> Result<BackendPreference, String> {
    BackendPreference::from_name(name).ok_or_else(|| format!("unsupported backend name: {}", name))
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();
    let runtime = match &cli.config {
        Some(path) => Runtime::new(RuntimeConfig::load(path)),
        None => Runtime::from_config_file(),
    };
    let timeout = Duration::from_secs(cli.timeout_sec);

    match cli.command {
        Commands::Prepare {
            input,
            work_dir,
            prefix,
        } => {
            let result = run::prepare(&runtime, &input, &work_dir, &prefix, timeout)?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Commands::Separate {
            input,
            model,
            prepared,
            output_dir,
            prefix,
            format,
            backend,
            chunk_size,
            overlap,
        } => {
            let request = SeparationRequest {
                input_path: Some(input),
                prepared_input_path: prepared,
                output_dir,
                output_prefix: prefix,
                output_format: format.into(),
                chunk_size: Some(chunk_size),
                overlap: Some(overlap),
            };
            let result = run::separate(&runtime, &model, backend, request, timeout)?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Commands::Pipeline {
            input,
            model,
            backends,
            report,
            min_bytes,
            duration_tolerance_ms,
            chunk_size,
            overlap,
        } => {
            let options = pipeline::PipelineOptions {
                model,
                input,
                backends: pipeline::parse_backends(&backends)?,
                report,
                min_bytes,
                duration_tolerance_ms,
                chunk_size,
                overlap,
                timeout,
            };
            let report = pipeline::run(&runtime, &options);
            pipeline::write_report(&options.report, &report)
                .with_context(|| format!("Failed to write report {:?}", options.report))?;
            if !report.success {
                for error in &report.errors {
                    log::error!("{}", error);
                }
                bail!("pipeline failed with {} error(s)", report.errors.len());
            }
            log::info!("Pipeline succeeded");
        }
    }

    Ok(())
}
