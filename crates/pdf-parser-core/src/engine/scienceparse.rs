//! Science Parse server adapter.
//!
//! The document goes to the server as a raw `application/pdf` body and the
//! JSON answer is written next to the other outputs. The server has no
//! dedicated health route, so any HTTP answer counts as alive.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::CONTENT_TYPE;

use super::{
    EngineError, EngineFuture, ExtractionEngine, Health, artifact_path, attempted_outcome,
    base_url, single_outcome,
};
use crate::capability::Operation;
use crate::{Backend, ParseOptions, ParseStats, ScienceParseSettings, pool};

const DEFAULT_WORKERS: usize = 16;

#[derive(Debug, Clone)]
pub struct ScienceParse {
    url: String,
    client: reqwest::Client,
    write_retries: u32,
    health: Health,
}

impl ScienceParse {
    pub async fn connect(settings: &ScienceParseSettings, probe_timeout: Duration) -> Self {
        let mut engine = Self {
            url: base_url(&settings.host, settings.port),
            client: reqwest::Client::new(),
            write_retries: settings.write_retries.max(1),
            health: Health::Unknown,
        };
        engine.health = engine.probe(probe_timeout).await;
        engine
    }

    async fn probe(&self, timeout: Duration) -> Health {
        match self.client.get(&self.url).timeout(timeout).send().await {
            Ok(_) => Health::Healthy,
            Err(e) => {
                tracing::error!(url = %self.url, error = %e, "cannot connect to Science Parse");
                Health::Unhealthy
            }
        }
    }

    pub fn output_path(output_dir: &Path, input: &Path) -> PathBuf {
        artifact_path(output_dir, input, Backend::ScienceParse, "json")
    }

    async fn convert(&self, input: &Path, output_dir: &Path, route: &str) -> Result<(), EngineError> {
        let pdf = tokio::fs::read(input).await?;
        let resp = self
            .client
            .post(format!("{}/{}", self.url, route))
            .header(CONTENT_TYPE, "application/pdf")
            .body(pdf)
            .send()
            .await?;
        if resp.status() != StatusCode::OK {
            return Err(EngineError::Status(resp.status()));
        }
        let parsed: serde_json::Value = resp.json().await?;
        let rendered = serde_json::to_vec_pretty(&parsed)?;

        let output = Self::output_path(output_dir, input);
        let mut attempt = 1;
        loop {
            match tokio::fs::write(&output, &rendered).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < self.write_retries => {
                    tracing::error!(output = %output.display(), error = %e, attempt, "could not write out result file");
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

impl ExtractionEngine for ScienceParse {
    fn backend(&self) -> Backend {
        Backend::ScienceParse
    }

    fn health(&self) -> Health {
        self.health
    }

    fn default_workers(&self) -> usize {
        DEFAULT_WORKERS
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
            let result = match op {
                Operation::Route(route) => self.convert(input, output_dir, route).await,
                other => Err(EngineError::Operation(other)),
            };
            single_outcome(Backend::ScienceParse, input, result)
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
            let Operation::Route(route) = op else {
                tracing::error!(?op, "operation does not apply to Science Parse");
                return ParseStats::default();
            };

            let engine = Arc::new(self.clone());
            let output_dir: Arc<Path> = Arc::from(output_dir);
            pool::run(inputs, workers, move |input: PathBuf| {
                let engine = Arc::clone(&engine);
                let output_dir = Arc::clone(&output_dir);
                async move {
                    let result = engine.convert(&input, &output_dir, route).await;
                    attempted_outcome(Backend::ScienceParse, &input, result)
                }
            })
            .await
        })
    }
}
