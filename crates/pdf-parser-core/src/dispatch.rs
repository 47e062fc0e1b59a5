//! Routes a request to `process_one` or `process_many`.

use std::path::{Path, PathBuf};

use crate::capability::resolve;
use crate::engine::ExtractionEngine;
use crate::{Kind, ParseError, ParseOptions, ParseStats};

/// Largest group handed to one batch-engine invocation.
pub const MAX_BATCH_SIZE: usize = 100;

/// Size of each batch for `total` inputs spread over `workers`: about two
/// batches per worker, at most [`MAX_BATCH_SIZE`], never zero.
pub fn batch_size(total: usize, workers: usize) -> usize {
    let slots = workers.max(1) * 2;
    total.div_ceil(slots).clamp(1, MAX_BATCH_SIZE)
}

/// `hint`, or the engine's default when `hint` is 0 ("auto").
pub fn resolve_workers(hint: usize, engine_default: usize) -> usize {
    if hint == 0 { engine_default.max(1) } else { hint }
}

/// Immediate children of `dir` with a `.pdf` extension, sorted.
pub fn list_pdfs(dir: &Path) -> Result<Vec<PathBuf>, ParseError> {
    let unreadable = |source| ParseError::InputUnreadable {
        path: dir.to_path_buf(),
        source,
    };
    let mut pdfs = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(unreadable)? {
        let path = entry.map_err(unreadable)?.path();
        if path.extension().is_some_and(|ext| ext == "pdf") && path.is_file() {
            pdfs.push(path);
        }
    }
    pdfs.sort();
    Ok(pdfs)
}

/// Run `engine` over `input` (a file or a directory of PDFs).
///
/// The kind is resolved before anything else so an unsupported request
/// touches neither the filesystem nor the network.
pub async fn dispatch(
    engine: &dyn ExtractionEngine,
    kind: Kind,
    input: &Path,
    output_dir: &Path,
    threads: usize,
    options: &ParseOptions,
) -> Result<ParseStats, ParseError> {
    let backend = engine.backend();
    let op = resolve(backend, kind)?;

    if !engine.health().is_healthy() {
        tracing::error!(backend = %backend, "engine is not available, nothing processed");
        return Ok(ParseStats::default());
    }

    if input.is_file() {
        return Ok(engine.process_one(input, output_dir, op, options).await);
    }

    let mut pdfs = list_pdfs(input)?;
    if options.shuffle.unwrap_or(engine.shuffles_inputs()) {
        fastrand::shuffle(&mut pdfs);
    }
    let workers = resolve_workers(threads, engine.default_workers());
    tracing::info!(backend = %backend, workers, "{} PDF files to process", pdfs.len());

    Ok(engine
        .process_many(pdfs, output_dir, op, workers, options)
        .await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Health;
    use crate::engine::mock::MockEngine;
    use crate::{Backend, Operation};
    use std::fs;

    fn pdf_dir(names: &[&str]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for name in names {
            fs::write(dir.path().join(name), "%PDF").unwrap();
        }
        dir
    }

    #[test]
    fn batch_size_policy() {
        assert_eq!(batch_size(250, 5), 25);
        assert_eq!(batch_size(10_000, 4), MAX_BATCH_SIZE);
        assert_eq!(batch_size(3, 8), 1);
        assert_eq!(batch_size(0, 8), 1);
        assert_eq!(batch_size(7, 0), 4);
    }

    #[test]
    fn auto_workers_use_engine_default() {
        assert_eq!(resolve_workers(0, 16), 16);
        assert_eq!(resolve_workers(3, 16), 3);
        assert_eq!(resolve_workers(0, 0), 1);
    }

    #[test]
    fn only_top_level_pdfs_are_listed() {
        let dir = pdf_dir(&["b.pdf", "a.pdf", "notes.txt", "upper.PDF"]);
        fs::create_dir(dir.path().join("nested.pdf")).unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub").join("deep.pdf"), "%PDF").unwrap();

        let pdfs = list_pdfs(dir.path()).unwrap();

        assert_eq!(
            pdfs,
            vec![dir.path().join("a.pdf"), dir.path().join("b.pdf")]
        );
    }

    #[tokio::test]
    async fn single_file_goes_to_process_one() {
        let input = pdf_dir(&["paper.pdf"]);
        let out = tempfile::tempdir().unwrap();
        let engine = MockEngine::new(Backend::Grobid);

        let stats = dispatch(
            &engine,
            Kind::Text,
            &input.path().join("paper.pdf"),
            out.path(),
            0,
            &ParseOptions::default(),
        )
        .await
        .unwrap();

        assert_eq!(stats, ParseStats::done(1));
        assert_eq!(engine.one_calls(), 1);
        assert!(engine.many_calls().is_empty());
        assert!(out.path().join("paper.grobid.txt").exists());
    }

    #[tokio::test]
    async fn directory_goes_to_process_many_with_resolved_workers() {
        let input = pdf_dir(&["a.pdf", "b.pdf", "c.pdf", "skip.txt"]);
        let out = tempfile::tempdir().unwrap();
        let engine = MockEngine::new(Backend::Cermine).with_default_workers(7);

        let stats = dispatch(
            &engine,
            Kind::Figure,
            input.path(),
            out.path(),
            0,
            &ParseOptions {
                shuffle: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        assert_eq!(stats.processed, 3);
        let calls = engine.many_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].workers, 7);
        assert_eq!(calls[0].op, Operation::Output("images"));
        assert_eq!(calls[0].inputs.len(), 3);
        assert!(out.path().join("b.cermine.txt").exists());
    }

    #[tokio::test]
    async fn shuffled_listing_keeps_the_same_inputs() {
        let names: Vec<String> = (0..20).map(|i| format!("{i:02}.pdf")).collect();
        let input = pdf_dir(&names.iter().map(String::as_str).collect::<Vec<_>>());
        let out = tempfile::tempdir().unwrap();
        let engine = MockEngine::new(Backend::Cermine).with_shuffle();

        dispatch(&engine, Kind::Text, input.path(), out.path(), 2, &ParseOptions::default())
            .await
            .unwrap();

        let mut seen = engine.many_calls()[0].inputs.clone();
        seen.sort();
        assert_eq!(seen, list_pdfs(input.path()).unwrap());
        assert_eq!(engine.many_calls()[0].workers, 2);
    }

    #[tokio::test]
    async fn unsupported_kind_fails_before_any_work() {
        let engine = MockEngine::new(Backend::Grobid);
        let err = dispatch(
            &engine,
            Kind::Figure,
            Path::new("/does/not/exist"),
            Path::new("/nowhere"),
            0,
            &ParseOptions::default(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, ParseError::UnsupportedKind { .. }));
        assert_eq!(engine.one_calls(), 0);
        assert!(engine.many_calls().is_empty());
    }

    #[tokio::test]
    async fn unhealthy_engine_processes_nothing() {
        let input = pdf_dir(&["a.pdf"]);
        let out = tempfile::tempdir().unwrap();
        let engine = MockEngine::new(Backend::Grobid).with_health(Health::Unhealthy);

        let stats = dispatch(&engine, Kind::Text, input.path(), out.path(), 0, &ParseOptions::default())
            .await
            .unwrap();

        assert_eq!(stats, ParseStats::default());
        assert!(engine.many_calls().is_empty());
        assert_eq!(fs::read_dir(out.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn empty_directory_processes_nothing() {
        let input = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let engine = MockEngine::new(Backend::Grobid);

        let stats = dispatch(&engine, Kind::Text, input.path(), out.path(), 0, &ParseOptions::default())
            .await
            .unwrap();

        assert_eq!(stats.processed, 0);
    }
}
