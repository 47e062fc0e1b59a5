//! pdffigures2 adapter: batched `java -jar pdffigures2.jar -e` runs.
//!
//! Inputs are copied into scratch under numeric ids (`0.pdf`, `1.pdf`, ...)
//! so that the engine's output names can be mapped back to the source
//! documents during reconciliation.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::process::Command;

use super::{BatchRun, EngineError, EngineFuture, ExtractionEngine, Health, cpu_count};
use crate::capability::Operation;
use crate::dispatch::batch_size;
use crate::scratch::{ScratchDir, file_stem, list_entries, move_path, split_extension};
use crate::{Backend, JavaSettings, ParseOptions, ParseStats, pool, subprocess};

/// Name of the rewritten figure metadata inside a `.figure` directory.
pub const FIGURE_DATA: &str = "figure-data.json";

/// What the engine was asked to produce, which decides how scratch is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Text,
    Figure,
}

impl Mode {
    pub fn from_flags(flags: &[&str]) -> Self {
        if flags.contains(&"-g") {
            Mode::Text
        } else {
            Mode::Figure
        }
    }
}

#[derive(Debug, Clone)]
pub struct PdfFigures2 {
    java: PathBuf,
    jar: PathBuf,
    scratch_root: Option<PathBuf>,
    health: Health,
}

impl PdfFigures2 {
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
            jar: java.pdffigures2_jar.clone(),
            scratch_root,
            health: Health::from_probe(ok),
        }
    }

    async fn run_batch(
        &self,
        inputs: &[PathBuf],
        output_dir: &Path,
        flags: &'static [&'static str],
    ) -> BatchRun {
        tracing::debug!(
            count = inputs.len(),
            first = ?inputs.iter().take(3).collect::<Vec<_>>(),
            "one pdffigures2 batch"
        );

        let scratch = match ScratchDir::create(self.scratch_root.as_deref()) {
            Ok(scratch) => scratch,
            Err(e) => return BatchRun::failed(e.into()),
        };
        let mut mapping = HashMap::with_capacity(inputs.len());
        for (id, input) in inputs.iter().enumerate() {
            let target = scratch.path().join(format!("{id}.pdf"));
            if let Err(e) = tokio::fs::copy(input, target).await {
                return BatchRun::failed(e.into());
            }
            mapping.insert(id.to_string(), file_stem(input));
        }

        let prefix = scratch.prefix_arg();
        let mut cmd = Command::new(&self.java);
        cmd.arg("-jar").arg(&self.jar).arg("-e");
        for flag in flags {
            cmd.arg(flag).arg(&prefix);
        }
        cmd.arg(&prefix);
        let invocation = subprocess::run(&mut cmd).await;

        let mode = Mode::from_flags(flags);
        let output_dir = output_dir.to_path_buf();
        let reconciled = tokio::task::spawn_blocking(move || {
            let placed = reconcile(scratch.path(), &output_dir, &mapping, mode);
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

/// Move pdffigures2 output from `scratch` into `output_dir`.
///
/// `mapping` takes scratch ids to source stems; artifacts with unknown ids
/// are left alone. Returns the stems that got an artifact.
pub fn reconcile(
    scratch: &Path,
    output_dir: &Path,
    mapping: &HashMap<String, String>,
    mode: Mode,
) -> io::Result<HashSet<String>> {
    match mode {
        Mode::Text => reconcile_text(scratch, output_dir, mapping),
        Mode::Figure => reconcile_figures(scratch, output_dir, mapping),
    }
}

fn reconcile_text(
    scratch: &Path,
    output_dir: &Path,
    mapping: &HashMap<String, String>,
) -> io::Result<HashSet<String>> {
    let mut placed = HashSet::new();
    for path in list_entries(scratch)? {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some((id, "json")) = split_extension(name) else {
            continue;
        };
        let Some(stem) = mapping.get(id) else {
            continue;
        };
        move_path(&path, &output_dir.join(format!("{stem}.pdffigures2.json")))?;
        placed.insert(stem.clone());
    }
    Ok(placed)
}

fn reconcile_figures(
    scratch: &Path,
    output_dir: &Path,
    mapping: &HashMap<String, String>,
) -> io::Result<HashSet<String>> {
    let mut created: HashMap<String, PathBuf> = HashMap::new();
    let mut touched = HashSet::new();

    let mut figure_dir = |stem: &str| -> io::Result<PathBuf> {
        let dir = output_dir.join(format!("{stem}.pdffigures2.figure"));
        if !dir.exists() {
            fs::create_dir_all(&dir)?;
            created.insert(stem.to_string(), dir.clone());
        }
        Ok(dir)
    };

    for path in list_entries(scratch)? {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some((base, ext)) = split_extension(name) else {
            continue;
        };
        match ext {
            "json" => {
                let Some(stem) = mapping.get(base) else {
                    continue;
                };
                let raw = fs::read(&path)?;
                let data = match rewrite_render_urls(&raw) {
                    Ok(data) => data,
                    Err(e) => {
                        // Images already moved stay; the sidecar is dropped with scratch.
                        tracing::warn!(
                            file = %path.display(),
                            stem = %stem,
                            error = %e,
                            "unreadable figure data, keeping images without it"
                        );
                        continue;
                    }
                };
                let dir = figure_dir(stem)?;
                fs::write(dir.join(FIGURE_DATA), data)?;
                fs::remove_file(&path)?;
                touched.insert(stem.clone());
            }
            "png" => {
                let Some((id, figure)) = name.split_once('-') else {
                    continue;
                };
                let Some(stem) = mapping.get(id) else {
                    continue;
                };
                let dir = figure_dir(stem)?;
                move_path(&path, &dir.join(figure))?;
                touched.insert(stem.clone());
            }
            _ => {}
        }
    }

    // A directory made here without any image has no figures.
    for (stem, dir) in created {
        if !holds_images(&dir)? {
            fs::remove_dir_all(&dir)?;
            touched.remove(&stem);
        }
    }
    Ok(touched)
}

fn holds_images(dir: &Path) -> io::Result<bool> {
    Ok(list_entries(dir)?.iter().any(|path| {
        path.file_name()
            .and_then(|n| n.to_str())
            .and_then(split_extension)
            .is_some_and(|(_, ext)| ext == "png")
    }))
}

/// Reduce every entry's `renderURL` to the image's name inside the figure
/// directory: `/tmp/x/0-Figure1-1.png` becomes `Figure1-1.png`.
fn rewrite_render_urls(raw: &[u8]) -> Result<Vec<u8>, serde_json::Error> {
    let mut data: Value = serde_json::from_slice(raw)?;
    if let Value::Array(items) = &mut data {
        for item in items {
            let Some(url) = item.get("renderURL").and_then(Value::as_str) else {
                continue;
            };
            let base = Path::new(url)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| url.to_string());
            let renamed = match base.split_once('-') {
                Some((_, rest)) => rest.to_string(),
                None => base,
            };
            item["renderURL"] = Value::String(renamed);
        }
    }
    serde_json::to_vec(&data)
}

impl ExtractionEngine for PdfFigures2 {
    fn backend(&self) -> Backend {
        Backend::PdfFigures2
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
                Operation::Flags(flags) => {
                    let batch = [input.to_path_buf()];
                    self.run_batch(&batch, output_dir, flags).await
                }
                other => BatchRun::failed(EngineError::Operation(other)),
            };
            run.into_single_stats(Backend::PdfFigures2, input)
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
                tracing::error!(?op, "operation does not apply to pdffigures2");
                return ParseStats::default();
            };

            let size = batch_size(inputs.len(), workers);
            let batches: Vec<Vec<PathBuf>> = inputs.chunks(size).map(<[_]>::to_vec).collect();
            tracing::debug!(batches = batches.len(), batch_size = size, "pdffigures2 batches");

            let engine = Arc::new(self.clone());
            let output_dir: Arc<Path> = Arc::from(output_dir);
            pool::run(batches, workers, move |batch: Vec<PathBuf>| {
                let engine = Arc::clone(&engine);
                let output_dir = Arc::clone(&output_dir);
                async move {
                    engine
                        .run_batch(&batch, &output_dir, flags)
                        .await
                        .into_stats(Backend::PdfFigures2, &batch)
                }
            })
            .await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn mapping(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(id, stem)| (id.to_string(), stem.to_string()))
            .collect()
    }

    #[test]
    fn mode_follows_flags() {
        assert_eq!(Mode::from_flags(&["-g"]), Mode::Text);
        assert_eq!(Mode::from_flags(&["-d", "-m"]), Mode::Figure);
    }

    #[test]
    fn text_json_is_renamed_by_mapping() {
        let scratch = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        fs::write(scratch.path().join("0.json"), "{}").unwrap();
        fs::write(scratch.path().join("1.json"), "{}").unwrap();
        fs::write(scratch.path().join("7.json"), "{}").unwrap();
        fs::write(scratch.path().join("0.pdf"), "%PDF").unwrap();

        let map = mapping(&[("0", "alpha"), ("1", "beta")]);
        let placed = reconcile(scratch.path(), out.path(), &map, Mode::Text).unwrap();

        assert_eq!(placed.len(), 2);
        assert!(out.path().join("alpha.pdffigures2.json").is_file());
        assert!(out.path().join("beta.pdffigures2.json").is_file());
        // Unknown id stays in scratch.
        assert!(scratch.path().join("7.json").exists());
    }

    #[test]
    fn figure_sidecar_points_at_renamed_images() {
        let scratch = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let render = scratch.path().join("0-Figure1-1.png");
        let sidecar = json!([{
            "name": "1",
            "figType": "Figure",
            "renderURL": render.to_string_lossy(),
        }]);
        fs::write(scratch.path().join("0.json"), sidecar.to_string()).unwrap();
        fs::write(&render, "png").unwrap();

        let map = mapping(&[("0", "paper")]);
        let placed = reconcile(scratch.path(), out.path(), &map, Mode::Figure).unwrap();

        assert_eq!(placed, HashSet::from(["paper".to_string()]));
        let dir = out.path().join("paper.pdffigures2.figure");
        let data: Value =
            serde_json::from_slice(&fs::read(dir.join(FIGURE_DATA)).unwrap()).unwrap();
        let url = data[0]["renderURL"].as_str().unwrap();
        assert_eq!(url, "Figure1-1.png");
        assert!(dir.join(url).is_file());
        assert_eq!(data[0]["figType"], "Figure");
    }

    #[test]
    fn figure_dir_without_images_is_removed() {
        let scratch = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        fs::write(scratch.path().join("0.json"), "[]").unwrap();

        let map = mapping(&[("0", "empty")]);
        let placed = reconcile(scratch.path(), out.path(), &map, Mode::Figure).unwrap();

        assert!(placed.is_empty());
        assert!(!out.path().join("empty.pdffigures2.figure").exists());
    }

    #[test]
    fn malformed_sidecar_keeps_images() {
        let scratch = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        fs::write(scratch.path().join("0.json"), "{not json").unwrap();
        fs::write(scratch.path().join("0-Figure1-1.png"), "png").unwrap();

        let map = mapping(&[("0", "paper")]);
        let placed = reconcile(scratch.path(), out.path(), &map, Mode::Figure).unwrap();

        assert_eq!(placed, HashSet::from(["paper".to_string()]));
        let dir = out.path().join("paper.pdffigures2.figure");
        assert!(dir.join("Figure1-1.png").is_file());
        assert!(!dir.join(FIGURE_DATA).exists());
    }

    #[test]
    fn figure_reconcile_is_idempotent() {
        let scratch = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        fs::write(
            scratch.path().join("0.json"),
            json!([{"renderURL": "/x/0-Table1-1.png"}]).to_string(),
        )
        .unwrap();
        fs::write(scratch.path().join("0-Table1-1.png"), "png").unwrap();
        fs::write(scratch.path().join("0-Figure2-1.png"), "png").unwrap();
        let map = mapping(&[("0", "doc")]);
        let dir = out.path().join("doc.pdffigures2.figure");

        // Simulate an interrupted first pass that got one image out.
        fs::create_dir_all(&dir).unwrap();
        move_path(
            &scratch.path().join("0-Figure2-1.png"),
            &dir.join("Figure2-1.png"),
        )
        .unwrap();

        reconcile(scratch.path(), out.path(), &map, Mode::Figure).unwrap();
        let mut first: Vec<_> = fs::read_dir(&dir)
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        first.sort();

        reconcile(scratch.path(), out.path(), &map, Mode::Figure).unwrap();
        let mut second: Vec<_> = fs::read_dir(&dir)
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        second.sort();

        assert_eq!(first, second);
        assert_eq!(first, vec!["Figure2-1.png", "Table1-1.png", FIGURE_DATA]);
    }

    #[test]
    fn render_url_without_id_prefix_keeps_basename() {
        let raw = json!([{"renderURL": "plain.png"}, {"caption": "no url"}]).to_string();
        let data: Value = serde_json::from_slice(&rewrite_render_urls(raw.as_bytes()).unwrap()).unwrap();
        assert_eq!(data[0]["renderURL"], "plain.png");
        assert_eq!(data[1]["caption"], "no url");
    }
}
