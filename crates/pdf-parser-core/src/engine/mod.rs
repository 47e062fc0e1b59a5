//! Engine adapter trait and the five backend implementations.

pub mod cermine;
pub mod grobid;
#[cfg(test)]
pub(crate) mod mock;
pub mod pdffigures;
pub mod pdffigures2;
pub mod scienceparse;

use std::collections::HashSet;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use thiserror::Error;

use crate::capability::Operation;
use crate::scratch::file_stem;
use crate::{Backend, ParseOptions, ParseStats, Settings};

pub use cermine::Cermine;
pub use grobid::Grobid;
pub use pdffigures::PdfFigures;
pub use pdffigures2::PdfFigures2;
pub use scienceparse::ScienceParse;

/// Readiness of an engine, decided once by the probe run at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Health {
    #[default]
    Unknown,
    Healthy,
    Unhealthy,
}

impl Health {
    pub fn is_healthy(self) -> bool {
        matches!(self, Health::Healthy)
    }

    pub(crate) fn from_probe(ok: bool) -> Self {
        if ok { Health::Healthy } else { Health::Unhealthy }
    }
}

/// Why a single job or batch did not produce its output.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("service answered HTTP {0}")]
    Status(reqwest::StatusCode),
    #[error("service still overloaded after {0} attempts")]
    Busy(u32),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{program} exited with status {code:?}: {stderr}")]
    Exit {
        program: String,
        code: Option<i32>,
        stderr: String,
    },
    #[error("operation {0:?} does not apply to this engine")]
    Operation(Operation),
    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub type EngineFuture<'a> = Pin<Box<dyn Future<Output = ParseStats> + Send + 'a>>;

/// Uniform contract over the external extraction engines.
///
/// Both processing methods return immediately with empty stats when the
/// engine is unhealthy. Neither fails: per-job problems are logged and
/// reported in [`ParseStats::failed`].
pub trait ExtractionEngine: Send + Sync {
    fn backend(&self) -> Backend;

    fn health(&self) -> Health;

    /// Worker count used when the caller asks for "auto" (0).
    fn default_workers(&self) -> usize;

    /// Whether directory inputs are shuffled before being grouped.
    fn shuffles_inputs(&self) -> bool {
        false
    }

    /// Run the engine on exactly one input. `processed` is 1 on success.
    fn process_one<'a>(
        &'a self,
        input: &'a Path,
        output_dir: &'a Path,
        op: Operation,
        options: &'a ParseOptions,
    ) -> EngineFuture<'a>;

    /// Run the engine on many inputs with `workers` concurrent units of
    /// work. `processed` counts every input an attempt was made for.
    fn process_many<'a>(
        &'a self,
        inputs: Vec<PathBuf>,
        output_dir: &'a Path,
        op: Operation,
        workers: usize,
        options: &'a ParseOptions,
    ) -> EngineFuture<'a>;
}

/// Build the adapter for `backend`, running its readiness probe.
pub async fn build_engine(backend: Backend, settings: &Settings) -> Box<dyn ExtractionEngine> {
    let timeout = settings.probe_timeout;
    let scratch_root = settings.scratch_root.clone();
    match backend {
        Backend::Grobid => Box::new(Grobid::connect(&settings.grobid, timeout).await),
        Backend::ScienceParse => {
            Box::new(ScienceParse::connect(&settings.scienceparse, timeout).await)
        }
        Backend::Cermine => Box::new(Cermine::connect(&settings.java, scratch_root, timeout).await),
        Backend::PdfFigures => {
            Box::new(PdfFigures::connect(&settings.pdffigures, scratch_root, timeout).await)
        }
        Backend::PdfFigures2 => {
            Box::new(PdfFigures2::connect(&settings.java, scratch_root, timeout).await)
        }
    }
}

/// `http://host:port`, unless `host` already carries a scheme.
pub(crate) fn base_url(host: &str, port: u16) -> String {
    let host = host.trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        format!("{host}:{port}")
    } else {
        format!("http://{host}:{port}")
    }
}

/// `{stem}.{engine}.{suffix}` inside `output_dir`.
pub fn artifact_path(output_dir: &Path, input: &Path, backend: Backend, suffix: &str) -> PathBuf {
    output_dir.join(format!("{}.{}.{}", file_stem(input), backend, suffix))
}

/// Number of CPUs, at least 1.
pub(crate) fn cpu_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Stats for a `process_one` call: 1 on success, 0 and a failure otherwise.
pub(crate) fn single_outcome(
    backend: Backend,
    input: &Path,
    result: Result<(), EngineError>,
) -> ParseStats {
    match result {
        Ok(()) => ParseStats::done(1),
        Err(e) => {
            tracing::warn!(backend = %backend, input = %input.display(), error = %e, "PDF parse failed");
            ParseStats::failure(input)
        }
    }
}

/// Stats for one job inside `process_many`: always counted as attempted.
pub(crate) fn attempted_outcome(
    backend: Backend,
    input: &Path,
    result: Result<(), EngineError>,
) -> ParseStats {
    let mut stats = single_outcome(backend, input, result);
    stats.processed = 1;
    stats
}

/// What happened to one engine invocation over a group of inputs.
pub(crate) struct BatchRun {
    pub invocation: Result<(), EngineError>,
    /// Stems of inputs whose artifacts reached the output directory.
    pub placed: HashSet<String>,
}

impl BatchRun {
    pub(crate) fn failed(error: EngineError) -> Self {
        Self {
            invocation: Err(error),
            placed: HashSet::new(),
        }
    }

    /// Every input counts as attempted. When the invocation failed, inputs
    /// without an artifact are reported as failed.
    pub(crate) fn into_stats(self, backend: Backend, inputs: &[PathBuf]) -> ParseStats {
        let mut stats = ParseStats::done(inputs.len());
        if let Err(e) = self.invocation {
            tracing::warn!(
                backend = %backend,
                batch = inputs.len(),
                error = %e,
                "engine exited abnormally"
            );
            stats.failed = inputs
                .iter()
                .filter(|input| !self.placed.contains(&file_stem(input)))
                .cloned()
                .collect();
        }
        stats
    }

    /// `process_one` semantics for a batch of one.
    pub(crate) fn into_single_stats(self, backend: Backend, input: &Path) -> ParseStats {
        let stats = self.into_stats(backend, &[input.to_path_buf()]);
        if stats.failed.is_empty() {
            stats
        } else {
            ParseStats::failure(input)
        }
    }
}
