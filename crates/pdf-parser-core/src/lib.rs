//! Multi-backend PDF extraction: engine adapters, dispatch, and output
//! reconciliation.
//!
//! A [`Parser`] resolves a backend identifier to an [`ExtractionEngine`],
//! validates the input and output paths, and hands the work to the
//! [`dispatch`] layer. Engines are external (a GROBID or Science Parse
//! server, the CERMINE and pdffigures2 jars, the pdffigures binary); this
//! crate only orchestrates them and places their output under
//! `{stem}.{engine}.{suffix}` names.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

pub mod capability;
pub mod config_file;
pub mod dispatch;
pub mod engine;
pub mod parser;
pub mod pool;
pub mod scratch;
mod subprocess;

// Re-export for convenience
pub use capability::{Operation, resolve};
pub use engine::{EngineError, ExtractionEngine, Health, build_engine};
pub use parser::Parser;

/// The category of content requested from an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Text,
    Figure,
}

impl Kind {
    pub fn as_str(self) -> &'static str {
        match self {
            Kind::Text => "text",
            Kind::Figure => "figure",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Kind {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "text" => Ok(Kind::Text),
            "figure" => Ok(Kind::Figure),
            other => Err(ParseError::UnknownKind(other.to_string())),
        }
    }
}

/// Identifier of an extraction backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    Grobid,
    ScienceParse,
    Cermine,
    PdfFigures,
    PdfFigures2,
}

impl Backend {
    pub const ALL: [Backend; 5] = [
        Backend::Grobid,
        Backend::ScienceParse,
        Backend::Cermine,
        Backend::PdfFigures,
        Backend::PdfFigures2,
    ];

    /// Canonical name, also used as the engine segment of output file names.
    pub fn as_str(self) -> &'static str {
        match self {
            Backend::Grobid => "grobid",
            Backend::ScienceParse => "scienceparse",
            Backend::Cermine => "cermine",
            Backend::PdfFigures => "pdffigures",
            Backend::PdfFigures2 => "pdffigures2",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Backend {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        Backend::ALL
            .into_iter()
            .find(|b| b.as_str().eq_ignore_ascii_case(name))
            .ok_or_else(|| ParseError::UnknownBackend(name.to_string()))
    }
}

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("parser backend is not valid: {0}")]
    UnknownBackend(String),
    #[error("unknown content type: {0}")]
    UnknownKind(String),
    #[error("backend {backend} could not parse for type \"{kind}\"")]
    UnsupportedKind { backend: Backend, kind: Kind },
    #[error("input path not found: {}", .0.display())]
    InputNotFound(PathBuf),
    #[error("cannot read input directory {}: {source}", path.display())]
    InputUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot create output dir {}: permission denied", .0.display())]
    OutputPermissionDenied(PathBuf),
    #[error("a file exists with the same name as the output dir: {}", .0.display())]
    OutputIsFile(PathBuf),
    #[error("the output dir has no write permission: {}", .0.display())]
    OutputNotWritable(PathBuf),
    #[error("output dir is not valid: {}: {source}", path.display())]
    OutputInvalid {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Outcome of a dispatch.
///
/// `processed` keeps the historical meaning: for a single file it is 1 only
/// when the job succeeded, for a directory it is the number of inputs an
/// attempt was made for. `failed` lists the inputs whose job is known to
/// have failed (bad HTTP status, write error, engine exit without output).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParseStats {
    pub processed: usize,
    pub failed: Vec<PathBuf>,
}

impl ParseStats {
    pub fn succeeded(&self) -> usize {
        self.processed.saturating_sub(self.failed.len())
    }

    pub fn merge(&mut self, other: ParseStats) {
        self.processed += other.processed;
        self.failed.extend(other.failed);
    }

    pub(crate) fn done(processed: usize) -> Self {
        Self {
            processed,
            failed: Vec::new(),
        }
    }

    pub(crate) fn failure(input: &Path) -> Self {
        Self {
            processed: 0,
            failed: vec![input.to_path_buf()],
        }
    }
}

/// Per-call options forwarded to the engine.
#[derive(Debug, Clone, Default)]
pub struct ParseOptions {
    /// Re-process inputs whose output already exists (GROBID).
    pub force: bool,
    pub generate_ids: bool,
    pub consolidate_header: bool,
    pub consolidate_citations: bool,
    /// Ask GROBID for element coordinates (see [`GrobidSettings::coordinates`]).
    pub tei_coordinates: bool,
    /// Override the engine's default for shuffling directory inputs.
    pub shuffle: Option<bool>,
}

/// GROBID server connection and retry policy.
#[derive(Debug, Clone)]
pub struct GrobidSettings {
    pub host: String,
    pub port: u16,
    /// Delay between attempts while the server answers 503.
    pub sleep: Duration,
    /// Give up after this many 503 answers. `None` retries forever.
    pub max_busy_retries: Option<u32>,
    pub coordinates: Vec<String>,
}

impl Default for GrobidSettings {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 8070,
            sleep: Duration::from_secs(5),
            max_busy_retries: None,
            coordinates: ["persName", "figure", "ref", "biblStruct", "formula"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScienceParseSettings {
    pub host: String,
    pub port: u16,
    /// Attempts at writing a result file before the job counts as failed.
    pub write_retries: u32,
}

impl Default for ScienceParseSettings {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 8080,
            write_retries: 3,
        }
    }
}

/// Java runtime and the jars of the Java-based engines.
#[derive(Debug, Clone)]
pub struct JavaSettings {
    pub java: PathBuf,
    pub cermine_jar: PathBuf,
    pub pdffigures2_jar: PathBuf,
}

impl Default for JavaSettings {
    fn default() -> Self {
        Self {
            java: PathBuf::from("java"),
            cermine_jar: PathBuf::from("jar/cermine-1.13.jar"),
            pdffigures2_jar: PathBuf::from("jar/pdffigures2-0.1.0.jar"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PdfFiguresSettings {
    pub binary: PathBuf,
}

impl Default for PdfFiguresSettings {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("bin/pdffigures"),
        }
    }
}

/// Construction-time settings for every engine.
#[derive(Debug, Clone)]
pub struct Settings {
    pub grobid: GrobidSettings,
    pub scienceparse: ScienceParseSettings,
    pub java: JavaSettings,
    pub pdffigures: PdfFiguresSettings,
    /// Parent of per-job scratch directories. System temp dir when `None`.
    pub scratch_root: Option<PathBuf>,
    /// Timeout of the readiness probe run when an engine is built.
    pub probe_timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            grobid: GrobidSettings::default(),
            scienceparse: ScienceParseSettings::default(),
            java: JavaSettings::default(),
            pdffigures: PdfFiguresSettings::default(),
            scratch_root: None,
            probe_timeout: Duration::from_secs(2),
        }
    }
}
