//! End-to-end smoke run: prepare, separate per backend, verify, report
//!
//! Every failure is collected into the report rather than aborting, so one
//! run documents every backend. A failed Vulkan run is retried on CPU and
//! recorded as a degraded fallback with a warning.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{bail, Context, Result};
use serde::Serialize;
use stemkit_core::pipeline::SeparationRequest;
use stemkit_core::result::{PrepareResult, SeparationResult};
use stemkit_core::{BackendPreference, OutputFormat, Runtime};

use crate::run;

#[derive(Debug)]
pub struct PipelineOptions {
    pub model: PathBuf,
    pub input: PathBuf,
    pub backends: Vec<BackendPreference>,
    pub report: PathBuf,
    pub min_bytes: u64,
    pub duration_tolerance_ms: u64,
    pub chunk_size: i32,
    pub overlap: i32,
    pub timeout: Duration,
}

#[derive(Debug, Serialize)]
pub struct Report {
    pub timestamp_unix_ms: u64,
    pub model: String,
    pub input: String,
    pub backends: Vec<String>,
    pub min_bytes: u64,
    pub duration_tolerance_ms: u64,
    pub timeout_sec: u64,
    pub chunk_size: i32,
    pub overlap: i32,
    pub prepare: Option<PrepareResult>,
    pub runs: Vec<BackendRun>,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
    pub success: bool,
}

#[derive(Debug, Serialize)]
pub struct BackendRun {
    pub backend: String,
    pub status: String,
    pub result: SeparationResult,
    pub metrics: Vec<FileMetrics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_from: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileMetrics {
    pub path: String,
    pub size_bytes: u64,
    pub duration_ms: u64,
    pub duration_delta_ms: u64,
}

/// Parse a comma-separated backend list, dropping duplicates
pub fn parse_backends(raw: &str) -> Result<Vec<BackendPreference>> {
    let mut backends = Vec::new();
    for name in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let Some(backend) = BackendPreference::from_name(name) else {
            bail!("unsupported backend name: {}", name);
        };
        if !backends.contains(&backend) {
            backends.push(backend);
        }
    }
    if backends.is_empty() {
        bail!("empty backend list");
    }
    Ok(backends)
}

pub fn run(runtime: &Runtime, options: &PipelineOptions) -> Report {
    let mut report = Report {
        timestamp_unix_ms: SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0),
        model: options.model.display().to_string(),
        input: options.input.display().to_string(),
        backends: options.backends.iter().map(|b| b.name().to_string()).collect(),
        min_bytes: options.min_bytes,
        duration_tolerance_ms: options.duration_tolerance_ms,
        timeout_sec: options.timeout.as_secs(),
        chunk_size: options.chunk_size,
        overlap: options.overlap,
        prepare: None,
        runs: Vec::new(),
        warnings: Vec::new(),
        errors: Vec::new(),
        success: false,
    };

    for (path, what) in [(&options.model, "model"), (&options.input, "input audio")] {
        if !path.exists() {
            report.errors.push(format!("{} not found: {}", what, path.display()));
        }
    }
    if report.errors.is_empty() {
        if let Err(e) = run_all(runtime, options, &mut report) {
            report.errors.push(format!("{:#}", e));
        }
    }

    report.success = report.errors.is_empty();
    report
}

fn run_all(runtime: &Runtime, options: &PipelineOptions, report: &mut Report) -> Result<()> {
    let run_root = options
        .report
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join("runtime");
    let prepare = run::prepare(
        runtime,
        &options.input,
        &run_root.join("prepare"),
        "integration",
        options.timeout,
    )?;
    if prepare.duration_ms == 0 {
        bail!("invalid prepare duration_ms: 0");
    }
    let prepared = PathBuf::from(&prepare.canonical_input_file);
    let expected_ms = prepare.duration_ms;
    report.prepare = Some(prepare);

    for &backend in &options.backends {
        match run_backend(runtime, options, &run_root, &prepared, backend, expected_ms) {
            Ok(run) => report.runs.push(run),
            Err(e) if backend == BackendPreference::Vulkan => {
                let warning = format!("Vulkan run failed, fallback to CPU: {:#}", e);
                log::warn!("{}", warning);
                report.warnings.push(warning);
                match run_backend(runtime, options, &run_root, &prepared, BackendPreference::Cpu, expected_ms) {
                    Ok(mut run) => {
                        run.status = "degraded_cpu_fallback".to_string();
                        run.fallback_from = Some("vulkan".to_string());
                        run.fallback_reason = Some(format!("{:#}", e));
                        report.runs.push(run);
                    }
                    Err(fallback) => report
                        .errors
                        .push(format!("vulkan fallback cpu failed: {:#}", fallback)),
                }
            }
            Err(e) => report.errors.push(format!("{} run failed: {:#}", backend.name(), e)),
        }
    }
    Ok(())
}

fn run_backend(
    runtime: &Runtime,
    options: &PipelineOptions,
    run_root: &Path,
    prepared: &Path,
    backend: BackendPreference,
    expected_ms: u64,
) -> Result<BackendRun> {
    log::info!("Separating with backend {}", backend.name());
    let request = SeparationRequest {
        input_path: Some(options.input.clone()),
        prepared_input_path: Some(prepared.to_path_buf()),
        output_dir: run_root.join(format!("job_{}", backend.name())),
        output_prefix: format!("integration_{}", backend.name()),
        output_format: OutputFormat::Wav,
        chunk_size: Some(options.chunk_size),
        overlap: Some(options.overlap),
    };
    let result = run::separate(runtime, &options.model, backend, request, options.timeout)?;
    let metrics = verify_outputs(
        &result.files,
        options.min_bytes,
        expected_ms,
        options.duration_tolerance_ms,
    )?;
    Ok(BackendRun {
        backend: backend.name().to_string(),
        status: "success".to_string(),
        result,
        metrics,
        fallback_from: None,
        fallback_reason: None,
    })
}

/// Check every stem exists, is large enough and matches the expected duration
pub fn verify_outputs(
    files: &[String],
    min_bytes: u64,
    expected_ms: u64,
    tolerance_ms: u64,
) -> Result<Vec<FileMetrics>> {
    if files.is_empty() {
        bail!("job returned empty output file list");
    }

    let mut metrics = Vec::with_capacity(files.len());
    for file in files {
        let path = Path::new(file);
        let size_bytes = std::fs::metadata(path)
            .with_context(|| format!("output file not found: {}", file))?
            .len();
        if size_bytes < min_bytes {
            bail!("output file too small: {} size={} min={}", file, size_bytes, min_bytes);
        }

        let duration_ms = wav_duration_ms(path)?;
        let duration_delta_ms = duration_ms.abs_diff(expected_ms);
        if duration_delta_ms > tolerance_ms {
            bail!(
                "duration mismatch for {}: actual={}ms expected={}ms delta={}ms tolerance={}ms",
                file,
                duration_ms,
                expected_ms,
                duration_delta_ms,
                tolerance_ms
            );
        }

        metrics.push(FileMetrics {
            path: file.clone(),
            size_bytes,
            duration_ms,
            duration_delta_ms,
        });
    }
    Ok(metrics)
}

fn wav_duration_ms(path: &Path) -> Result<u64> {
    let reader = hound::WavReader::open(path)
        .with_context(|| format!("not a readable WAV file: {}", path.display()))?;
    let rate = reader.spec().sample_rate;
    if rate == 0 {
        bail!("invalid WAV metadata: {}", path.display());
    }
    Ok((reader.duration() as f64 * 1000.0 / rate as f64).round() as u64)
}

pub fn write_report(path: &Path, report: &Report) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(report)?)?;
    log::info!("Report written to {:?}", path);
    Ok(())
}
