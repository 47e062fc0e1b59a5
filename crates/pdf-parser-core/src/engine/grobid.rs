//! GROBID network service adapter.
//!
//! Each document is posted as multipart form data. A 503 means the server's
//! queue is full: the request is resent after a fixed delay (forever unless
//! `max_busy_retries` is set). Any other non-200 status fails the job.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::ACCEPT;
use reqwest::multipart::{Form, Part};

use super::{
    EngineError, EngineFuture, ExtractionEngine, Health, artifact_path, attempted_outcome,
    base_url, single_outcome,
};
use crate::capability::Operation;
use crate::{Backend, GrobidSettings, ParseOptions, ParseStats, pool};

/// The GROBID server is usually a large shared machine; keep it busy.
const DEFAULT_WORKERS: usize = 112;

#[derive(Debug, Clone)]
pub struct Grobid {
    url: String,
    client: reqwest::Client,
    sleep: Duration,
    max_busy_retries: Option<u32>,
    coordinates: Vec<String>,
    health: Health,
}

impl Grobid {
    /// Build the adapter and probe `/api/isalive`.
    pub async fn connect(settings: &GrobidSettings, probe_timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .pool_idle_timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        let mut grobid = Self {
            url: base_url(&settings.host, settings.port),
            client,
            sleep: settings.sleep,
            max_busy_retries: settings.max_busy_retries,
            coordinates: settings.coordinates.clone(),
            health: Health::Unknown,
        };
        grobid.health = grobid.probe(probe_timeout).await;
        grobid
    }

    async fn probe(&self, timeout: Duration) -> Health {
        let check_url = format!("{}/api/isalive", self.url);
        match self.client.get(&check_url).timeout(timeout).send().await {
            Ok(resp) if resp.status() == StatusCode::OK => {
                tracing::info!(url = %self.url, "GROBID server is up and running");
                Health::Healthy
            }
            Ok(resp) => {
                tracing::error!(url = %self.url, status = %resp.status(), "GROBID server does not appear");
                Health::Unhealthy
            }
            Err(e) => {
                tracing::error!(url = %self.url, error = %e, "cannot connect to GROBID");
                Health::Unhealthy
            }
        }
    }

    pub fn output_path(output_dir: &Path, input: &Path) -> PathBuf {
        artifact_path(output_dir, input, Backend::Grobid, "xml")
    }

    fn form(&self, file_name: &str, pdf: &[u8], options: &ParseOptions) -> Result<Form, EngineError> {
        let part = Part::bytes(pdf.to_vec())
            .file_name(file_name.to_string())
            .mime_str("application/pdf")?;
        let mut form = Form::new().part("input", part);
        if options.generate_ids {
            form = form.text("generateIDs", "1");
        }
        if options.consolidate_header {
            form = form.text("consolidateHeader", "1");
        }
        if options.consolidate_citations {
            form = form.text("consolidateCitations", "1");
        }
        if options.tei_coordinates {
            for element in &self.coordinates {
                form = form.text("teiCoordinates", element.clone());
            }
        }
        Ok(form)
    }

    /// Post `input` until the server stops answering 503.
    async fn request(
        &self,
        input: &Path,
        route: &str,
        options: &ParseOptions,
    ) -> Result<Vec<u8>, EngineError> {
        let pdf = tokio::fs::read(input).await?;
        let file_name = input
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let url = format!("{}/api/{}", self.url, route);

        let mut busy = 0u32;
        loop {
            let resp = self
                .client
                .post(&url)
                .header(ACCEPT, "application/xml")
                .multipart(self.form(&file_name, &pdf, options)?)
                .send()
                .await?;

            match resp.status() {
                StatusCode::OK => return Ok(resp.bytes().await?.to_vec()),
                StatusCode::SERVICE_UNAVAILABLE => {
                    busy += 1;
                    if let Some(max) = self.max_busy_retries
                        && busy > max
                    {
                        return Err(EngineError::Busy(busy));
                    }
                    tracing::debug!(input = %input.display(), attempt = busy, "GROBID busy, waiting");
                    tokio::time::sleep(self.sleep).await;
                }
                status => return Err(EngineError::Status(status)),
            }
        }
    }

    async fn convert(
        &self,
        input: &Path,
        output_dir: &Path,
        route: &str,
        options: &ParseOptions,
    ) -> Result<(), EngineError> {
        let output = Self::output_path(output_dir, input);
        if !options.force && tokio::fs::try_exists(&output).await.unwrap_or(false) {
            tracing::debug!(output = %output.display(), "already parsed, skipping");
            return Ok(());
        }

        let body = self.request(input, route, options).await?;
        tokio::fs::write(&output, &body).await.map_err(|e| {
            tracing::error!(output = %output.display(), "could not write out result file");
            EngineError::Io(e)
        })
    }
}

impl ExtractionEngine for Grobid {
    fn backend(&self) -> Backend {
        Backend::Grobid
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
        options: &'a ParseOptions,
    ) -> EngineFuture<'a> {
        Box::pin(async move {
            if !self.health.is_healthy() {
                return ParseStats::default();
            }
            let result = match op {
                Operation::Route(route) => self.convert(input, output_dir, route, options).await,
                other => Err(EngineError::Operation(other)),
            };
            single_outcome(Backend::Grobid, input, result)
        })
    }

    fn process_many<'a>(
        &'a self,
        inputs: Vec<PathBuf>,
        output_dir: &'a Path,
        op: Operation,
        workers: usize,
        options: &'a ParseOptions,
    ) -> EngineFuture<'a> {
        Box::pin(async move {
            if !self.health.is_healthy() {
                return ParseStats::default();
            }
            let Operation::Route(route) = op else {
                tracing::error!(?op, "operation does not apply to GROBID");
                return ParseStats::default();
            };

            let engine = Arc::new(self.clone());
            let output_dir: Arc<Path> = Arc::from(output_dir);
            let options = Arc::new(options.clone());
            pool::run(inputs, workers, move |input: PathBuf| {
                let engine = Arc::clone(&engine);
                let output_dir = Arc::clone(&output_dir);
                let options = Arc::clone(&options);
                async move {
                    let result = engine.convert(&input, &output_dir, route, &options).await;
                    attempted_outcome(Backend::Grobid, &input, result)
                }
            })
            .await
        })
    }
}
