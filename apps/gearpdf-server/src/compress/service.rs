//! Compression service
//!
//! Runs a [`Compressor`] for one job under the shared concurrency limit and
//! a per-job deadline. Every job has a target size: the requested one, or
//! three quarters of the input. The primary compressor walks down the DPI
//! ladder and keeps the first result that fits, or the smallest one seen.
//! When that still misses the target, or the primary fails, an optional
//! second stage works through the image re-encoding ladder.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::time::Instant;

use super::provider::Compressor;
use super::types::{
    dpi_ladder, image_ladder_start, CompressedDocument, CompressionJob, CompressionSettings,
    IMAGE_LADDER,
};
use crate::error::{AppError, ProcessingError};

#[derive(Clone)]
pub struct CompressionService {
    inner: Arc<CompressionServiceInner>,
}

struct CompressionServiceInner {
    compressor: Arc<dyn Compressor>,
    /// Runs when the primary misses the target or fails
    second_stage: Option<Arc<dyn Compressor>>,
    /// One permit per job allowed to run
    permits: Semaphore,
    timeout: Duration,
}

/// A successful run of a compressor
struct Attempt {
    size: u64,
    dpi: Option<u32>,
}

impl CompressionService {
    pub fn new(
        compressor: Arc<dyn Compressor>,
        second_stage: Option<Arc<dyn Compressor>>,
        max_concurrent_jobs: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(CompressionServiceInner {
                compressor,
                second_stage,
                permits: Semaphore::new(max_concurrent_jobs.max(1)),
                timeout,
            }),
        }
    }

    pub fn compressor(&self) -> &dyn Compressor {
        self.inner.compressor.as_ref()
    }

    pub fn second_stage(&self) -> Option<&dyn Compressor> {
        self.inner.second_stage.as_deref()
    }

    pub fn timeout(&self) -> Duration {
        self.inner.timeout
    }

    /// Run a job to completion
    pub async fn run(&self, job: &CompressionJob) -> Result<CompressedDocument, AppError> {
        let original_size = tokio::fs::metadata(&job.input_path).await?.len();

        let _permit = self
            .inner
            .permits
            .acquire()
            .await
            .map_err(|_| ProcessingError::Unavailable("service is shutting down".to_string()))?;

        let deadline = Instant::now() + self.inner.timeout;
        let target = job.target_size.unwrap_or(original_size.saturating_mul(3) / 4);

        let searched = self.search(job, target, deadline).await;
        let best = match self.inner.second_stage.as_deref() {
            Some(stage) => {
                self.second_pass(stage, job, searched, original_size, target, deadline)
                    .await?
            }
            None => searched?,
        };

        let document = if best.size >= original_size {
            tracing::info!(
                job_id = %job.id,
                original_size,
                compressed_size = best.size,
                "Compression did not shrink the file, returning original"
            );
            CompressedDocument {
                path: job.input_path.clone(),
                original_size,
                compressed_size: original_size,
                profile: job.profile,
                dpi: None,
                kept_original: true,
            }
        } else {
            CompressedDocument {
                path: job.output_path.clone(),
                original_size,
                compressed_size: best.size,
                profile: job.profile,
                dpi: best.dpi,
                kept_original: false,
            }
        };

        tracing::info!(
            job_id = %job.id,
            profile = %job.profile,
            dpi = ?document.dpi,
            target,
            original_size = document.original_size,
            compressed_size = document.compressed_size,
            reduction = format!("{:.1}%", document.reduction_percent()),
            "Compression complete"
        );

        Ok(document)
    }

    /// Walk the profile's DPI ladder until an output fits `target` bytes.
    /// Profiles with no ladder get one run of the plain preset.
    async fn search(
        &self,
        job: &CompressionJob,
        target: u64,
        deadline: Instant,
    ) -> Result<Attempt, AppError> {
        let compressor = self.inner.compressor.as_ref();
        let ladder = dpi_ladder(job.profile);

        if ladder.is_empty() {
            let settings = CompressionSettings::new(job.profile);
            return self
                .attempt(compressor, job, &job.input_path, &job.output_path, settings, deadline)
                .await;
        }

        let mut best: Option<Attempt> = None;
        let mut last_error: Option<AppError> = None;

        for dpi in ladder {
            let path = job.attempt_path(dpi);
            let settings = CompressionSettings::with_dpi(job.profile, dpi);

            match self
                .attempt(compressor, job, &job.input_path, &path, settings, deadline)
                .await
            {
                Ok(attempt) => {
                    let fits = attempt.size <= target;
                    let smaller = best.as_ref().map_or(true, |b| attempt.size < b.size);

                    if fits || smaller {
                        tokio::fs::rename(&path, &job.output_path).await?;
                        best = Some(attempt);
                    } else {
                        let _ = tokio::fs::remove_file(&path).await;
                    }

                    if fits {
                        break;
                    }
                }
                // Out of time, or no tool to run: settle for what we have
                Err(AppError::Processing(
                    e @ (ProcessingError::Timeout(_) | ProcessingError::Unavailable(_)),
                )) => {
                    let _ = tokio::fs::remove_file(&path).await;
                    last_error = Some(e.into());
                    break;
                }
                Err(AppError::Processing(e)) => {
                    tracing::debug!(job_id = %job.id, dpi, error = %e, "DPI attempt failed");
                    last_error = Some(e.into());
                    let _ = tokio::fs::remove_file(&path).await;
                }
                Err(e) => return Err(e),
            }
        }

        match (best, last_error) {
            (Some(best), _) => Ok(best),
            (None, Some(e)) => Err(e),
            (None, None) => Err(ProcessingError::NoOutput.into()),
        }
    }

    /// Hand the job to `stage` when the search missed the target or failed.
    /// The stage starts from the search output when that beat the input.
    async fn second_pass(
        &self,
        stage: &dyn Compressor,
        job: &CompressionJob,
        searched: Result<Attempt, AppError>,
        original_size: u64,
        target: u64,
        deadline: Instant,
    ) -> Result<Attempt, AppError> {
        let first = match searched {
            Ok(best) if best.size <= target => return Ok(best),
            Ok(best) => Ok(best),
            Err(AppError::Processing(e)) if !matches!(e, ProcessingError::Timeout(_)) => {
                tracing::info!(job_id = %job.id, error = %e, "Primary compressor failed, trying {}", stage.name());
                Err(e)
            }
            Err(e) => return Err(e),
        };

        if Instant::now() >= deadline {
            return first.map_err(Into::into);
        }

        let (source, baseline, dpi) = match &first {
            Ok(best) if best.size < original_size => (job.output_path.clone(), best.size, best.dpi),
            _ => (job.input_path.clone(), original_size, None),
        };

        let refined_path = job.scratch_path("refined");
        let refined = self
            .refine(stage, job, &source, &refined_path, baseline, target, deadline)
            .await?;

        match (refined, first) {
            (Some(size), first) if size < baseline || first.is_err() => {
                tokio::fs::rename(&refined_path, &job.output_path).await?;
                Ok(Attempt { size, dpi })
            }
            (refined, first) => {
                if refined.is_some() {
                    let _ = tokio::fs::remove_file(&refined_path).await;
                }
                first.map_err(Into::into)
            }
        }
    }

    /// Run `stage` down the image ladder from `source`, keeping the smallest
    /// output at `best_path`. Stops once the target is met, when a step
    /// changes nothing (no images it can shrink) or on the first failure.
    #[allow(clippy::too_many_arguments)]
    async fn refine(
        &self,
        stage: &dyn Compressor,
        job: &CompressionJob,
        source: &Path,
        best_path: &Path,
        baseline: u64,
        target: u64,
        deadline: Instant,
    ) -> Result<Option<u64>, AppError> {
        let mut best: Option<u64> = None;
        let mut previous: Option<u64> = None;
        let start = image_ladder_start(baseline, target);

        for (index, step) in IMAGE_LADDER.iter().enumerate().skip(start) {
            let path = job.scratch_path(&format!("pass-{}", index));
            let settings = CompressionSettings::with_images(job.profile, (*step).into());

            match self.attempt(stage, job, source, &path, settings, deadline).await {
                Ok(attempt) => {
                    if best.map_or(true, |b| attempt.size < b) {
                        tokio::fs::rename(&path, best_path).await?;
                        best = Some(attempt.size);
                    } else {
                        let _ = tokio::fs::remove_file(&path).await;
                    }

                    if attempt.size <= target || previous == Some(attempt.size) {
                        break;
                    }
                    previous = Some(attempt.size);
                }
                Err(AppError::Processing(e)) => {
                    tracing::debug!(job_id = %job.id, step = index, error = %e, "Image pass failed");
                    let _ = tokio::fs::remove_file(&path).await;
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        Ok(best)
    }

    /// One run of `compressor` from `input` to `output`, bounded by `deadline`
    async fn attempt(
        &self,
        compressor: &dyn Compressor,
        job: &CompressionJob,
        input: &Path,
        output: &Path,
        settings: CompressionSettings,
        deadline: Instant,
    ) -> Result<Attempt, AppError> {
        let compress = compressor.compress(input, output, &settings);

        match tokio::time::timeout_at(deadline, compress).await {
            Ok(result) => result?,
            Err(_) => {
                tracing::warn!(
                    job_id = %job.id,
                    compressor = compressor.name(),
                    dpi = ?settings.image_dpi,
                    "Compression timed out"
                );
                return Err(ProcessingError::Timeout(self.inner.timeout).into());
            }
        }

        let size = match tokio::fs::metadata(output).await {
            Ok(meta) if meta.len() > 0 => meta.len(),
            _ => return Err(ProcessingError::NoOutput.into()),
        };

        tracing::debug!(
            job_id = %job.id,
            compressor = compressor.name(),
            dpi = ?settings.image_dpi,
            images = ?settings.images,
            size,
            "Compression attempt finished"
        );

        Ok(Attempt {
            size,
            dpi: settings.image_dpi,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compress::{CompressionProfile, ImageRecompression};
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tempfile::TempDir;
    use uuid::Uuid;

    /// Writes an output whose size depends on the requested DPI
    struct SizedByDpi {
        calls: Mutex<Vec<Option<u32>>>,
    }

    impl SizedByDpi {
        fn new() -> Self {
            Self { calls: Mutex::new(Vec::new()) }
        }

        fn calls(&self) -> Vec<Option<u32>> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Compressor for SizedByDpi {
        fn name(&self) -> &str {
            "sized-by-dpi"
        }

        async fn is_available(&self) -> bool {
            true
        }

        async fn compress(
            &self,
            _input: &Path,
            output: &Path,
            settings: &CompressionSettings,
        ) -> Result<(), ProcessingError> {
            self.calls.lock().unwrap().push(settings.image_dpi);
            let size = settings.image_dpi.unwrap_or(100) as usize * 10;
            tokio::fs::write(output, vec![b'x'; size]).await.unwrap();
            Ok(())
        }
    }

    /// Writes `percent` of its input, recording where it read from
    struct Shrinks {
        percent: usize,
        seen: Mutex<Vec<(PathBuf, Option<ImageRecompression>)>>,
    }

    impl Shrinks {
        fn by(percent: usize) -> Self {
            Self { percent, seen: Mutex::new(Vec::new()) }
        }
    }

    #[async_trait]
    impl Compressor for Shrinks {
        fn name(&self) -> &str {
            "shrinks"
        }

        async fn is_available(&self) -> bool {
            true
        }

        async fn compress(
            &self,
            input: &Path,
            output: &Path,
            settings: &CompressionSettings,
        ) -> Result<(), ProcessingError> {
            self.seen.lock().unwrap().push((input.to_path_buf(), settings.images));
            let len = tokio::fs::metadata(input).await.unwrap().len() as usize;
            tokio::fs::write(output, vec![b's'; len * self.percent / 100]).await.unwrap();
            Ok(())
        }
    }

    struct Sleeper;

    #[async_trait]
    impl Compressor for Sleeper {
        fn name(&self) -> &str {
            "sleeper"
        }

        async fn is_available(&self) -> bool {
            true
        }

        async fn compress(&self, _: &Path, _: &Path, _: &CompressionSettings) -> Result<(), ProcessingError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }
    }

    struct AlwaysFails {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Compressor for AlwaysFails {
        fn name(&self) -> &str {
            "always-fails"
        }

        async fn is_available(&self) -> bool {
            false
        }

        async fn compress(&self, _: &Path, _: &Path, _: &CompressionSettings) -> Result<(), ProcessingError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(ProcessingError::Failed { code: Some(1), stderr: "boom".to_string() })
        }
    }

    struct Missing {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Compressor for Missing {
        fn name(&self) -> &str {
            "missing"
        }

        async fn is_available(&self) -> bool {
            false
        }

        async fn compress(&self, _: &Path, _: &Path, _: &CompressionSettings) -> Result<(), ProcessingError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(ProcessingError::Unavailable("gs not found".to_string()))
        }
    }

    fn service(compressor: Arc<dyn Compressor>) -> CompressionService {
        CompressionService::new(compressor, None, 2, Duration::from_secs(5))
    }

    fn job_in(
        dir: &TempDir,
        profile: CompressionProfile,
        input_size: usize,
        target_size: Option<u64>,
    ) -> CompressionJob {
        let input = dir.path().join("input.pdf");
        std::fs::write(&input, vec![b'i'; input_size]).unwrap();
        CompressionJob::new(Uuid::new_v4(), input, dir.path().join("output.pdf"), profile, target_size)
    }

    #[tokio::test]
    async fn test_default_target_is_three_quarters_of_input() {
        let dir = TempDir::new().unwrap();
        let compressor = Arc::new(SizedByDpi::new());

        // 5000 bytes in: 150 dpi gives 1500, well under 3750
        let job = job_in(&dir, CompressionProfile::Ebook, 5000, None);
        let doc = service(compressor.clone()).run(&job).await.unwrap();
        assert_eq!(doc.compressed_size, 1500);
        assert_eq!(doc.dpi, Some(150));
        assert_eq!(doc.path, job.output_path);
        assert_eq!(compressor.calls(), vec![Some(150)]);

        // 1800 bytes in: target 1350 is first met at 125 dpi
        let dir = TempDir::new().unwrap();
        let compressor = Arc::new(SizedByDpi::new());
        let job = job_in(&dir, CompressionProfile::Ebook, 1800, None);
        let doc = service(compressor.clone()).run(&job).await.unwrap();
        assert_eq!(doc.compressed_size, 1250);
        assert_eq!(compressor.calls(), vec![Some(150), Some(125)]);
    }

    #[tokio::test]
    async fn test_search_stops_at_first_fit() {
        let dir = TempDir::new().unwrap();
        let compressor = Arc::new(SizedByDpi::new());

        // 150 dpi -> 1500 bytes is the first output within 1600
        let job = job_in(&dir, CompressionProfile::Printer, 5000, Some(1600));
        let doc = service(compressor.clone()).run(&job).await.unwrap();

        assert_eq!(doc.dpi, Some(150));
        assert_eq!(doc.compressed_size, 1500);
        assert_eq!(compressor.calls(), vec![Some(200), Some(175), Some(150)]);
        assert_eq!(std::fs::metadata(&job.output_path).unwrap().len(), 1500);

        // Scratch files are moved or removed
        assert!(!job.attempt_path(200).exists());
        assert!(!job.attempt_path(175).exists());
    }

    #[tokio::test]
    async fn test_ladder_never_exceeds_profile_resolution() {
        let dir = TempDir::new().unwrap();
        let compressor = Arc::new(SizedByDpi::new());

        let job = job_in(&dir, CompressionProfile::Ebook, 5000, Some(10));
        let doc = service(compressor.clone()).run(&job).await.unwrap();

        assert_eq!(compressor.calls(), vec![Some(150), Some(125), Some(100), Some(75)]);
        // Target unreachable: the smallest output wins
        assert_eq!(doc.dpi, Some(75));
        assert_eq!(doc.compressed_size, 750);
    }

    #[tokio::test]
    async fn test_screen_profile_runs_preset_once() {
        let dir = TempDir::new().unwrap();
        let compressor = Arc::new(SizedByDpi::new());

        let job = job_in(&dir, CompressionProfile::Screen, 5000, Some(10));
        let doc = service(compressor.clone()).run(&job).await.unwrap();

        assert_eq!(compressor.calls(), vec![None]);
        assert_eq!(doc.dpi, None);
        assert_eq!(doc.compressed_size, 1000);
    }

    #[tokio::test]
    async fn test_keeps_original_when_not_smaller() {
        let dir = TempDir::new().unwrap();

        let job = job_in(&dir, CompressionProfile::Ebook, 500, None);
        let doc = service(Arc::new(SizedByDpi::new())).run(&job).await.unwrap();

        assert!(doc.kept_original);
        assert_eq!(doc.path, job.input_path);
        assert_eq!(doc.compressed_size, 500);
        assert_eq!(doc.dpi, None);
    }

    #[tokio::test]
    async fn test_timeout() {
        let dir = TempDir::new().unwrap();
        let service = CompressionService::new(Arc::new(Sleeper), None, 1, Duration::from_millis(50));

        let err = service
            .run(&job_in(&dir, CompressionProfile::Ebook, 100, None))
            .await
            .unwrap_err();
        match err {
            AppError::Processing(e @ ProcessingError::Timeout(_)) => {
                assert!(e.to_string().ends_with("50ms"), "{}", e);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_search_surfaces_last_error() {
        let dir = TempDir::new().unwrap();
        let compressor = Arc::new(AlwaysFails { calls: AtomicUsize::new(0) });

        let err = service(compressor.clone())
            .run(&job_in(&dir, CompressionProfile::Ebook, 100, Some(10)))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Processing(ProcessingError::Failed { .. })));
        assert_eq!(
            compressor.calls.load(Ordering::SeqCst),
            dpi_ladder(CompressionProfile::Ebook).len()
        );
    }

    #[tokio::test]
    async fn test_missing_tool_stops_search() {
        let dir = TempDir::new().unwrap();
        let compressor = Arc::new(Missing { calls: AtomicUsize::new(0) });

        let err = service(compressor.clone())
            .run(&job_in(&dir, CompressionProfile::Printer, 100, None))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Processing(ProcessingError::Unavailable(_))));
        assert_eq!(compressor.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_second_stage_continues_from_search_output() {
        let dir = TempDir::new().unwrap();
        let stage = Arc::new(Shrinks::by(50));
        let service = CompressionService::new(
            Arc::new(SizedByDpi::new()),
            Some(stage.clone()),
            1,
            Duration::from_secs(5),
        );

        // Search bottoms out at 750 bytes, above the 500 byte target
        let job = job_in(&dir, CompressionProfile::Ebook, 5000, Some(500));
        let doc = service.run(&job).await.unwrap();

        assert_eq!(doc.compressed_size, 375);
        assert_eq!(doc.dpi, Some(75));
        assert_eq!(std::fs::metadata(&job.output_path).unwrap().len(), 375);

        let seen = stage.seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, job.output_path);
        assert_eq!(seen[0].1, Some(ImageRecompression { scale_percent: 100, quality: 95 }));

        // Only input and output remain
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 2);
    }

    #[tokio::test]
    async fn test_second_stage_skipped_when_target_met() {
        let dir = TempDir::new().unwrap();
        let stage = Arc::new(Shrinks::by(50));
        let service = CompressionService::new(
            Arc::new(SizedByDpi::new()),
            Some(stage.clone()),
            1,
            Duration::from_secs(5),
        );

        service
            .run(&job_in(&dir, CompressionProfile::Ebook, 5000, None))
            .await
            .unwrap();
        assert!(stage.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_second_stage_replaces_missing_tool() {
        let dir = TempDir::new().unwrap();
        let stage = Arc::new(Shrinks::by(60));
        let service = CompressionService::new(
            Arc::new(Missing { calls: AtomicUsize::new(0) }),
            Some(stage.clone()),
            1,
            Duration::from_secs(5),
        );

        let job = job_in(&dir, CompressionProfile::Ebook, 1000, None);
        let doc = service.run(&job).await.unwrap();

        assert_eq!(doc.compressed_size, 600);
        assert_eq!(doc.dpi, None);
        assert!(!doc.kept_original);
        assert_eq!(stage.seen.lock().unwrap()[0].0, job.input_path);
    }

    #[tokio::test]
    async fn test_second_stage_without_gain_keeps_original() {
        let dir = TempDir::new().unwrap();
        let stage = Arc::new(Shrinks::by(100));
        let service = CompressionService::new(
            Arc::new(AlwaysFails { calls: AtomicUsize::new(0) }),
            Some(stage.clone()),
            1,
            Duration::from_secs(5),
        );

        let job = job_in(&dir, CompressionProfile::Ebook, 1000, None);
        let doc = service.run(&job).await.unwrap();

        assert!(doc.kept_original);
        assert_eq!(doc.path, job.input_path);
        // Second identical result ends the image ladder
        assert_eq!(stage.seen.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_missing_input_is_io_error() {
        let dir = TempDir::new().unwrap();

        let job = CompressionJob::new(
            Uuid::new_v4(),
            dir.path().join("missing.pdf"),
            dir.path().join("output.pdf"),
            CompressionProfile::Screen,
            None,
        );
        let result = service(Arc::new(SizedByDpi::new())).run(&job).await;
        assert!(matches!(result, Err(AppError::Io(_))));
    }
}
