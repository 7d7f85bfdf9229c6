//! Shared fakes and harness for the integration tests.
//!
//! The fake engines write small text files instead of media. Every rendered
//! file records the source it came from and the window it covers, so outputs
//! of two runs can be compared byte for byte.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::sync::Semaphore;

use media_jobs::engines::{
    EditPlan, EngineSet, FetchChain, FetchStrategy, MediaEngine, MediaInfo, RenderOptions,
    TimeWindow, TranscriptionEngine,
};
use media_jobs::job::{JobInput, JobRecord, JobStatus};
use media_jobs::lifecycle::{JobEvent, JobLifecycleManager};
use media_jobs::pipeline::ProcessorRegistry;
use media_jobs::policy::{PolicyConfig, QualityTier, ResourcePolicy};
use media_jobs::scheduler::{Scheduler, SchedulerConfig};
use media_jobs::store::{FileJobRepository, JobMutator, JobRepository};
use media_jobs::subtitles::{Cue, Transcript};
use media_jobs::telemetry::{ScriptedProbe, TelemetrySample};
use media_jobs::{Error, Result};

/// Plenty of memory on a four core host.
pub fn ample_sample() -> TelemetrySample {
    TelemetrySample::from_mib(16384, 12288, 4)
}

/// Available memory below the default emergency floor.
pub fn emergency_sample() -> TelemetrySample {
    TelemetrySample::from_mib(16384, 256, 4)
}

/// Key used to mark a window in fake outputs.
fn window_key(window: &TimeWindow) -> String {
    format!("{:.3}-{:.3}", window.start, window.end)
}

/// Writes `fake://<name>` locations as a file holding the location.
pub struct FakeFetch;

#[async_trait]
impl FetchStrategy for FakeFetch {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn supports(&self, location: &str) -> bool {
        location.starts_with("fake://")
    }

    async fn fetch(&self, location: &str, dest_dir: &Path, stem: &str) -> Result<PathBuf> {
        let path = dest_dir.join(format!("{stem}.mp4"));
        tokio::fs::write(&path, location).await?;
        Ok(path)
    }
}

/// Media engine that writes one line per rendered window.
pub struct FakeMedia {
    infos: Mutex<HashMap<String, MediaInfo>>,
    default_info: MediaInfo,
    failures: Mutex<HashMap<String, usize>>,
    gate: Option<Arc<Semaphore>>,
    empty_concat: AtomicBool,
    pub renders: AtomicUsize,
}

impl FakeMedia {
    pub fn new(default_duration: f64) -> Self {
        Self {
            infos: Mutex::new(HashMap::new()),
            default_info: MediaInfo {
                duration_secs: default_duration,
                has_video: true,
                has_audio: true,
            },
            failures: Mutex::new(HashMap::new()),
            gate: None,
            empty_concat: AtomicBool::new(false),
            renders: AtomicUsize::new(0),
        }
    }

    /// Renders wait for a permit from `gate` before writing.
    pub fn gated(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn with_info(self, location: &str, info: MediaInfo) -> Self {
        self.infos.lock().insert(location.to_string(), info);
        self
    }

    /// The next render of the window starting at `start` fails recoverably.
    /// Calls accumulate.
    pub fn fail_once_at(&self, start: f64) {
        *self.failures.lock().entry(format!("{start:.3}")).or_default() += 1;
    }

    /// Concatenation produces an empty file.
    pub fn produce_empty_output(&self) {
        self.empty_concat.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl MediaEngine for FakeMedia {
    async fn probe(&self, input: &Path) -> Result<MediaInfo> {
        let content = tokio::fs::read_to_string(input).await?;
        Ok(self
            .infos
            .lock()
            .get(content.trim())
            .cloned()
            .unwrap_or_else(|| self.default_info.clone()))
    }

    async fn render(
        &self,
        input: &Path,
        window: TimeWindow,
        plan: &EditPlan,
        _options: &RenderOptions,
        output: &Path,
    ) -> Result<()> {
        if let Some(gate) = &self.gate {
            gate.acquire()
                .await
                .map_err(|e| Error::Other(e.to_string()))?
                .forget();
        }
        if take_failure(&self.failures, &format!("{:.3}", window.start)) {
            return Err(Error::Collaborator(format!(
                "transient failure at {}",
                window_key(&window)
            )));
        }

        let source = tokio::fs::read_to_string(input).await?;
        let tag = match plan {
            EditPlan::Cut => "cut".to_string(),
            EditPlan::ExtractAudio => "audio".to_string(),
            EditPlan::BurnSubtitles { subtitles, .. } => {
                let subs = tokio::fs::read_to_string(subtitles).await?;
                format!("burn[{}]", subs.lines().count())
            }
            EditPlan::MixAudio {
                music_offset,
                fade_in,
                fade_out,
                ..
            } => format!("mix@{music_offset:.3} in={fade_in} out={fade_out}"),
        };
        let first_line = source.lines().next().unwrap_or_default();
        self.renders.fetch_add(1, Ordering::SeqCst);
        tokio::fs::write(
            output,
            format!("{first_line}|{}|{tag}\n", window_key(&window)),
        )
        .await?;
        Ok(())
    }

    async fn concat(&self, segments: &[PathBuf], output: &Path) -> Result<()> {
        let mut merged = String::new();
        if !self.empty_concat.load(Ordering::SeqCst) {
            for segment in segments {
                merged.push_str(&tokio::fs::read_to_string(segment).await?);
            }
        }
        tokio::fs::write(output, merged).await?;
        Ok(())
    }
}

/// Consume one scheduled failure for `key`.
fn take_failure(failures: &Mutex<HashMap<String, usize>>, key: &str) -> bool {
    let mut failures = failures.lock();
    match failures.get_mut(key) {
        Some(left) if *left > 0 => {
            *left -= 1;
            true
        }
        _ => false,
    }
}

/// Transcriber returning one cue per audio window, in window-local time.
#[derive(Default)]
pub struct FakeTranscriber {
    failures: Mutex<HashMap<String, usize>>,
    pub calls: AtomicUsize,
}

impl FakeTranscriber {
    /// The next transcription of the window starting at `start` fails
    /// recoverably. Calls accumulate.
    pub fn fail_once_at(&self, start: f64) {
        *self.failures.lock().entry(format!("{start:.3}")).or_default() += 1;
    }
}

#[async_trait]
impl TranscriptionEngine for FakeTranscriber {
    async fn transcribe(
        &self,
        audio: &Path,
        _language: &str,
        _tier: QualityTier,
        _threads: usize,
    ) -> Result<Transcript> {
        let content = tokio::fs::read_to_string(audio).await?;
        let window = content.split('|').nth(1).unwrap_or_default().to_string();
        let start = window.split('-').next().unwrap_or_default();
        if take_failure(&self.failures, start) {
            return Err(Error::Collaborator(format!("decoder hiccup at {window}")));
        }

        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Transcript::new(vec![Cue {
            start: 0.25,
            end: 0.75,
            text: format!("words {window}"),
            words: Vec::new(),
        }]))
    }
}

/// File repository whose next `update_job` calls can be made to fail.
pub struct FlakyRepository {
    inner: FileJobRepository,
    failing_updates: AtomicUsize,
}

impl FlakyRepository {
    pub fn new(inner: FileJobRepository) -> Self {
        Self {
            inner,
            failing_updates: AtomicUsize::new(0),
        }
    }

    /// The next `count` updates fail with an I/O error.
    pub fn fail_next_updates(&self, count: usize) {
        self.failing_updates.store(count, Ordering::SeqCst);
    }
}

#[async_trait]
impl JobRepository for FlakyRepository {
    async fn create_job(&self, input: JobInput) -> Result<JobRecord> {
        self.inner.create_job(input).await
    }

    async fn get_job(&self, id: &str) -> Result<JobRecord> {
        self.inner.get_job(id).await
    }

    async fn update_job(&self, id: &str, mutate: JobMutator) -> Result<JobRecord> {
        let failing = self
            .failing_updates
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(Error::Io(std::io::Error::other("disk hiccup")));
        }
        self.inner.update_job(id, mutate).await
    }

    async fn delete_job(&self, id: &str) -> Result<()> {
        self.inner.delete_job(id).await
    }

    async fn list_jobs(&self) -> Result<Vec<JobRecord>> {
        self.inner.list_jobs().await
    }
}

/// A lifecycle manager and scheduler over fake engines in a temp dir.
pub struct Harness {
    pub dir: TempDir,
    pub lifecycle: Arc<JobLifecycleManager>,
    pub scheduler: Arc<Scheduler>,
    pub repo: Arc<FlakyRepository>,
    pub probe: Arc<ScriptedProbe>,
    pub media: Arc<FakeMedia>,
    pub transcriber: Arc<FakeTranscriber>,
}

pub struct HarnessBuilder {
    policy: PolicyConfig,
    scheduler: SchedulerConfig,
    sample: TelemetrySample,
    media: FakeMedia,
}

impl HarnessBuilder {
    pub fn policy(mut self, policy: PolicyConfig) -> Self {
        self.policy = policy;
        self
    }

    pub fn sample(mut self, sample: TelemetrySample) -> Self {
        self.sample = sample;
        self
    }

    pub fn media(mut self, media: FakeMedia) -> Self {
        self.media = media;
        self
    }

    pub fn pipeline_timeout_secs(mut self, secs: u64) -> Self {
        self.scheduler.pipeline_timeout_secs = secs;
        self
    }

    pub fn retry_interval_ms(mut self, ms: u64) -> Self {
        self.scheduler.retry_interval_ms = ms;
        self
    }

    pub async fn build(self) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let repo = FileJobRepository::open(dir.path().join("jobs")).await.unwrap();
        let repo = Arc::new(FlakyRepository::new(repo));
        let lifecycle = Arc::new(JobLifecycleManager::new(
            repo.clone(),
            dir.path().join("tmp"),
            dir.path().join("outputs"),
        ));

        let probe = Arc::new(ScriptedProbe::fixed(self.sample));
        let media = Arc::new(self.media);
        let transcriber = Arc::new(FakeTranscriber::default());
        let engines = EngineSet {
            fetcher: FetchChain::new().with_strategy(Arc::new(FakeFetch)),
            media: media.clone(),
            transcriber: transcriber.clone(),
        };
        let scheduler = Arc::new(Scheduler::new(
            self.scheduler,
            lifecycle.clone(),
            probe.clone(),
            Arc::new(ResourcePolicy::new(self.policy)),
            ProcessorRegistry::standard(),
            engines,
        ));

        Harness {
            dir,
            lifecycle,
            scheduler,
            repo,
            probe,
            media,
            transcriber,
        }
    }
}

impl Harness {
    pub fn builder() -> HarnessBuilder {
        HarnessBuilder {
            policy: PolicyConfig::default(),
            scheduler: SchedulerConfig::default(),
            sample: ample_sample(),
            media: FakeMedia::new(100.0),
        }
    }

    /// One worker, 30 second windows, sequential segments.
    pub async fn fixed() -> Harness {
        Self::builder()
            .policy(PolicyConfig::fixed(1, 30, QualityTier::Tiny))
            .build()
            .await
    }

    /// Tick the scheduler until `id` reaches a terminal state.
    pub async fn run_to_end(&self, id: &str) -> JobRecord {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            self.scheduler.tick().await.unwrap();
            let record = self.lifecycle.status(id).await.unwrap();
            if record.status.is_terminal() {
                return record;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "job {id} stuck in {}",
                record.status
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Poll until `id` has `status`, without ticking.
    pub async fn wait_for(&self, id: &str, status: JobStatus) -> JobRecord {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            let record = self.lifecycle.status(id).await.unwrap();
            if record.status == status {
                return record;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "job {id} never reached {status}, still {}",
                record.status
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

/// Progress percentages reported for `id`, in order, from already buffered
/// events.
pub fn drain_progress(rx: &mut tokio::sync::broadcast::Receiver<JobEvent>, id: &str) -> Vec<u8> {
    let mut seen = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let JobEvent::Progress {
            job_id, percent, ..
        } = event
            && job_id == id
        {
            seen.push(percent);
        }
    }
    seen
}
