//! The public entry point: one engine, validated paths, one dispatch.

use std::io::ErrorKind;
use std::path::Path;

use crate::dispatch::dispatch;
use crate::engine::{ExtractionEngine, Health, build_engine};
use crate::{Backend, Kind, ParseError, ParseOptions, ParseStats, Settings, resolve};

/// A resolved backend with its probed engine.
///
/// Engine health is decided when the parser is built and does not change
/// afterwards; build a new parser to re-probe.
pub struct Parser {
    engine: Box<dyn ExtractionEngine>,
}

impl Parser {
    /// Resolve `backend` by name and build its engine.
    pub async fn new(backend: &str, settings: &Settings) -> Result<Self, ParseError> {
        let backend: Backend = backend.parse()?;
        Ok(Self::with_backend(backend, settings).await)
    }

    pub async fn with_backend(backend: Backend, settings: &Settings) -> Self {
        Self::from_engine(build_engine(backend, settings).await)
    }

    /// Wrap an already-built engine.
    pub fn from_engine(engine: Box<dyn ExtractionEngine>) -> Self {
        Self { engine }
    }

    pub fn backend(&self) -> Backend {
        self.engine.backend()
    }

    pub fn health(&self) -> Health {
        self.engine.health()
    }

    /// Extract `kind` from `input` (a PDF or a directory of PDFs) into
    /// `output_dir`, creating it when missing.
    ///
    /// `threads` is the worker count for directory inputs; 0 picks the
    /// engine default.
    pub async fn parse(
        &self,
        kind: &str,
        input: &Path,
        output_dir: &Path,
        threads: usize,
        options: &ParseOptions,
    ) -> Result<ParseStats, ParseError> {
        let kind: Kind = kind.parse()?;
        let backend = self.backend();
        resolve(backend, kind)?;

        if !input.exists() {
            tracing::error!(input = %input.display(), "input path not found");
            return Err(ParseError::InputNotFound(input.to_path_buf()));
        }
        check_output_dir(output_dir)?;

        tracing::info!("start parsing {kind} using {backend}");
        let stats = dispatch(self.engine.as_ref(), kind, input, output_dir, threads, options).await?;
        tracing::info!(
            processed = stats.processed,
            failed = stats.failed.len(),
            "finished parsing {kind} using {backend}"
        );
        Ok(stats)
    }
}

/// Create `dir` if needed and make sure files can be written in it.
pub fn check_output_dir(dir: &Path) -> Result<(), ParseError> {
    if dir.exists() && !dir.is_dir() {
        return Err(ParseError::OutputIsFile(dir.to_path_buf()));
    }
    if let Err(e) = std::fs::create_dir_all(dir) {
        return Err(match e.kind() {
            ErrorKind::PermissionDenied => ParseError::OutputPermissionDenied(dir.to_path_buf()),
            ErrorKind::AlreadyExists | ErrorKind::NotADirectory => {
                ParseError::OutputIsFile(dir.to_path_buf())
            }
            _ => ParseError::OutputInvalid {
                path: dir.to_path_buf(),
                source: e,
            },
        });
    }
    tempfile::NamedTempFile::new_in(dir)
        .map(drop)
        .map_err(|_| ParseError::OutputNotWritable(dir.to_path_buf()))
}
