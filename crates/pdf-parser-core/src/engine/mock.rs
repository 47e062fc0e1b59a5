//! Mock engine for testing the dispatch and orchestration layers.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::{EngineFuture, ExtractionEngine, Health, artifact_path};
use crate::capability::Operation;
use crate::{Backend, ParseOptions, ParseStats, pool};

/// One recorded `process_many` call.
#[derive(Debug, Clone)]
pub struct ManyCall {
    pub inputs: Vec<PathBuf>,
    pub workers: usize,
    pub op: Operation,
}

/// A hand-rolled [`ExtractionEngine`] that writes `{stem}.{backend}.txt`
/// for every input and records how it was called.
pub struct MockEngine {
    backend: Backend,
    health: Health,
    default_workers: usize,
    shuffles: bool,
    one_calls: AtomicUsize,
    many_calls: Mutex<Vec<ManyCall>>,
}

impl MockEngine {
    pub fn new(backend: Backend) -> Self {
        Self {
            backend,
            health: Health::Healthy,
            default_workers: 4,
            shuffles: false,
            one_calls: AtomicUsize::new(0),
            many_calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_health(mut self, health: Health) -> Self {
        self.health = health;
        self
    }

    pub fn with_default_workers(mut self, workers: usize) -> Self {
        self.default_workers = workers;
        self
    }

    pub fn with_shuffle(mut self) -> Self {
        self.shuffles = true;
        self
    }

    pub fn one_calls(&self) -> usize {
        self.one_calls.load(Ordering::SeqCst)
    }

    pub fn many_calls(&self) -> Vec<ManyCall> {
        self.many_calls.lock().unwrap().clone()
    }
}

async fn write_artifact(backend: Backend, input: PathBuf, output_dir: PathBuf) -> ParseStats {
    let target = artifact_path(&output_dir, &input, backend, "txt");
    match tokio::fs::write(&target, b"mock").await {
        Ok(()) => ParseStats::done(1),
        Err(_) => ParseStats {
            processed: 1,
            failed: vec![input],
        },
    }
}

impl ExtractionEngine for MockEngine {
    fn backend(&self) -> Backend {
        self.backend
    }

    fn health(&self) -> Health {
        self.health
    }

    fn default_workers(&self) -> usize {
        self.default_workers
    }

    fn shuffles_inputs(&self) -> bool {
        self.shuffles
    }

    fn process_one<'a>(
        &'a self,
        input: &'a Path,
        output_dir: &'a Path,
        _op: Operation,
        _options: &'a ParseOptions,
    ) -> EngineFuture<'a> {
        self.one_calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move {
            if !self.health.is_healthy() {
                return ParseStats::default();
            }
            write_artifact(self.backend, input.to_path_buf(), output_dir.to_path_buf()).await
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
        self.many_calls.lock().unwrap().push(ManyCall {
            inputs: inputs.clone(),
            workers,
            op,
        });
        Box::pin(async move {
            if !self.health.is_healthy() {
                return ParseStats::default();
            }
            let backend = self.backend;
            let output_dir = output_dir.to_path_buf();
            pool::run(inputs, workers, move |input| {
                write_artifact(backend, input, output_dir.clone())
            })
            .await
        })
    }
}
