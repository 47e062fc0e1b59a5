//! CERMINE adapter: batched `java -cp cermine.jar ContentExtractor` runs.
//!
//! A batch's PDFs are copied into one scratch directory and CERMINE is
//! pointed at it. It writes `<stem>.cermxml` and `<stem>.images/` next to
//! each input, which [`reconcile`] moves to `<stem>.cermine.xml` and
//! `<stem>.cermine.figure/`.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::process::Command;

use super::{BatchRun, EngineError, EngineFuture, ExtractionEngine, Health, cpu_count};
use crate::capability::Operation;
use crate::dispatch::batch_size;
use crate::scratch::{ScratchDir, list_entries, move_path, split_extension};
use crate::{Backend, JavaSettings, ParseOptions, ParseStats, pool, subprocess};

const CONTENT_EXTRACTOR: &str = "pl.edu.icm.cermine.ContentExtractor";

/// Upper bound on concurrent CERMINE processes; each one is memory hungry.
const MAX_DEFAULT_WORKERS: usize = 30;

#[derive(Debug, Clone)]
pub struct Cermine {
    java: PathBuf,
    jar: PathBuf,
    scratch_root: Option<PathBuf>,
    health: Health,
}

impl Cermine {
    pub async fn connect(
        java: &JavaSettings,
        scratch_root: Option<PathBuf>,
        probe_timeout: Duration,
    ) -> Self {
        let ok = subprocess::probe(&java.java, &["-version"], probe_timeout).await;
        if !ok {
            tracing::error!(java = %java.java.display(), "No java in your environment");
        }
        Self {
            java: java.java.clone(),
            jar: java.cermine_jar.clone(),
            scratch_root,
            health: Health::from_probe(ok),
        }
    }

    /// Run CERMINE once over `inputs` and reconcile into `output_dir`.
    async fn run_batch(&self, inputs: &[PathBuf], output_dir: &Path, outputs: &str) -> BatchRun {
        tracing::debug!(
            count = inputs.len(),
            first = ?inputs.iter().take(3).collect::<Vec<_>>(),
            "one CERMINE batch"
        );

        let scratch = match ScratchDir::create(self.scratch_root.as_deref()) {
            Ok(scratch) => scratch,
            Err(e) => return BatchRun::failed(e.into()),
        };
        for input in inputs {
            let Some(name) = input.file_name() else {
                continue;
            };
            if let Err(e) = tokio::fs::copy(input, scratch.path().join(name)).await {
                return BatchRun::failed(e.into());
            }
        }

        let mut cmd = Command::new(&self.java);
        cmd.arg("-cp")
            .arg(&self.jar)
            .arg(CONTENT_EXTRACTOR)
            .arg("-path")
            .arg(scratch.path())
            .arg("-outputs")
            .arg(outputs);
        let invocation = subprocess::run(&mut cmd).await;

        let output_dir = output_dir.to_path_buf();
        let reconciled = tokio::task::spawn_blocking(move || {
            let placed = reconcile(scratch.path(), &output_dir);
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

/// Move CERMINE's raw output from `scratch` into `output_dir`.
///
/// Returns the stems whose artifacts were placed. Empty image directories
/// and anything unrecognized (including the input PDFs) stay behind.
pub fn reconcile(scratch: &Path, output_dir: &Path) -> io::Result<HashSet<String>> {
    let mut placed = HashSet::new();
    for path in list_entries(scratch)? {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some((stem, ext)) = split_extension(name) else {
            continue;
        };
        match ext {
            "cermxml" if path.is_file() => {
                move_path(&path, &output_dir.join(format!("{stem}.cermine.xml")))?;
                placed.insert(stem.to_string());
            }
            "images" if path.is_dir() => {
                if fs::read_dir(&path)?.next().is_none() {
                    continue;
                }
                move_path(&path, &output_dir.join(format!("{stem}.cermine.figure")))?;
                placed.insert(stem.to_string());
            }
            _ => {}
        }
    }
    Ok(placed)
}

impl ExtractionEngine for Cermine {
    fn backend(&self) -> Backend {
        Backend::Cermine
    }

    fn health(&self) -> Health {
        self.health
    }

    /// One CERMINE process keeps about two cores busy.
    fn default_workers(&self) -> usize {
        (cpu_count() / 2).clamp(1, MAX_DEFAULT_WORKERS)
    }

    fn shuffles_inputs(&self) -> bool {
        true
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
                Operation::Output(outputs) => {
                    self.run_batch(std::slice::from_ref(&input.to_path_buf()), output_dir, outputs)
                        .await
                }
                other => BatchRun::failed(EngineError::Operation(other)),
            };
            run.into_single_stats(Backend::Cermine, input)
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
            let Operation::Output(outputs) = op else {
                tracing::error!(?op, "operation does not apply to CERMINE");
                return ParseStats::default();
            };

            let size = batch_size(inputs.len(), workers);
            let batches: Vec<Vec<PathBuf>> = inputs.chunks(size.max(1)).map(<[_]>::to_vec).collect();
            tracing::debug!(batches = batches.len(), batch_size = size, "CERMINE batches");

            let engine = Arc::new(self.clone());
            let output_dir: Arc<Path> = Arc::from(output_dir);
            pool::run(batches, workers, move |batch: Vec<PathBuf>| {
                let engine = Arc::clone(&engine);
                let output_dir = Arc::clone(&output_dir);
                async move {
                    engine
                        .run_batch(&batch, &output_dir, outputs)
                        .await
                        .into_stats(Backend::Cermine, &batch)
                }
            })
            .await
        })
    }
}
