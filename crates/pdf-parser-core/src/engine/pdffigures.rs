//! pdffigures (the original C++ tool) adapter, one process per document.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::process::Command;

use super::pdffigures2::FIGURE_DATA;
use super::{BatchRun, EngineError, EngineFuture, ExtractionEngine, Health, cpu_count};
use crate::capability::Operation;
use crate::scratch::{ScratchDir, file_stem, list_entries, move_path, split_extension};
use crate::{Backend, ParseOptions, ParseStats, PdfFiguresSettings, pool, subprocess};

/// File name prefix handed to the binary for every output it writes.
const PREFIX: &str = "prefix";

#[derive(Debug, Clone)]
pub struct PdfFigures {
    binary: PathBuf,
    scratch_root: Option<PathBuf>,
    health: Health,
}

impl PdfFigures {
    pub async fn connect(
        settings: &PdfFiguresSettings,
        scratch_root: Option<PathBuf>,
        probe_timeout: Duration,
    ) -> Self {
        let ok = subprocess::probe(&settings.binary, &["--help"], probe_timeout).await;
        if !ok {
            tracing::error!(
                binary = %settings.binary.display(),
                "pdffigures cannot run with your environment. \
                 Please check whether the dependencies \"leptonica\" and \"poppler\" have been installed"
            );
        }
        Self {
            binary: settings.binary.clone(),
            scratch_root,
            health: Health::from_probe(ok),
        }
    }

    async fn run_file(
        &self,
        input: &Path,
        output_dir: &Path,
        flags: &'static [&'static str],
    ) -> BatchRun {
        let scratch = match ScratchDir::create(self.scratch_root.as_deref()) {
            Ok(scratch) => scratch,
            Err(e) => return BatchRun::failed(e.into()),
        };

        let prefix = scratch.path().join(PREFIX);
        let mut cmd = Command::new(&self.binary);
        for flag in flags {
            cmd.arg(flag).arg(&prefix);
        }
        cmd.arg(input);
        let invocation = subprocess::run(&mut cmd).await;

        let stem = file_stem(input);
        let output_dir = output_dir.to_path_buf();
        let reconciled = tokio::task::spawn_blocking(move || {
            let placed = reconcile(scratch.path(), &output_dir, &stem)
                .map(|placed| placed.then_some(stem).into_iter().collect::<HashSet<_>>());
            scratch.close();
            placed
        })
        .await;

        match reconciled {
            Ok(Ok(placed)) => BatchRun { invocation, placed },
            Ok(Err(e)) => BatchRun::failed(e.into()),
            Err(e) => BatchRun::failed(EngineError::Join(e)),
        }
    }
}

/// Move one document's figures from `scratch` into
/// `<stem>.pdffigures.figure/`.
///
/// On a first pass, a scratch directory holding one file or less means no
/// figures were found; nothing is created and `false` is returned. Once the
/// figure directory exists, whatever is left in scratch is moved. Returns
/// whether anything was moved.
pub fn reconcile(scratch: &Path, output_dir: &Path, stem: &str) -> io::Result<bool> {
    let entries = list_entries(scratch)?;
    let dir = output_dir.join(format!("{stem}.pdffigures.figure"));
    if !dir.is_dir() && entries.len() <= 1 {
        return Ok(false);
    }

    fs::create_dir_all(&dir)?;
    let mut moved = false;
    for path in entries {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        match split_extension(name) {
            Some((_, "json")) => {
                move_path(&path, &dir.join(FIGURE_DATA))?;
                moved = true;
            }
            Some((_, "png")) => {
                let Some((_, figure)) = name.split_once('-') else {
                    continue;
                };
                move_path(&path, &dir.join(figure))?;
                moved = true;
            }
            _ => {}
        }
    }
    Ok(moved)
}

impl ExtractionEngine for PdfFigures {
    fn backend(&self) -> Backend {
        Backend::PdfFigures
    }

    fn health(&self) -> Health {
        self.health
    }

    fn default_workers(&self) -> usize {
        cpu_count()
    }

    fn process_one<'a>(
        &'a self,
        input: &'a Path,
        output_dir: &'a Path,
        op: Operation,
        _options: &'a ParseOptions,
    ) -> EngineFuture<'a> {
        Box::pin(async move {
            if !self.health.is_healthy() {
                return ParseStats::default();
            }
            let run = match op {
                Operation::Flags(flags) => self.run_file(input, output_dir, flags).await,
                other => BatchRun::failed(EngineError::Operation(other)),
            };
            run.into_single_stats(Backend::PdfFigures, input)
        })
    }

    fn process_many<'a>(
        &'a self,
        inputs: Vec<PathBuf>,
        output_dir: &'a Path,
        op: Operation,
        workers: usize,
        _options: &'a ParseOptions,
    ) -> EngineFuture<'a> {
        Box::pin(async move {
            if !self.health.is_healthy() {
                return ParseStats::default();
            }
            let Operation::Flags(flags) = op else {
                tracing::error!(?op, "operation does not apply to pdffigures");
                return ParseStats::default();
            };

            let engine = Arc::new(self.clone());
            let output_dir: Arc<Path> = Arc::from(output_dir);
            pool::run(inputs, workers, move |input: PathBuf| {
                let engine = Arc::clone(&engine);
                let output_dir = Arc::clone(&output_dir);
                async move {
                    engine
                        .run_file(&input, &output_dir, flags)
                        .await
                        .into_stats(Backend::PdfFigures, std::slice::from_ref(&input))
                }
            })
            .await
        })
    }
}
