//! Export: render every frame of a scene and encode it.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;

use montage_common::config::RenderDefaults;
use montage_common::error::{MontageError, MontageResult};
use montage_project_model::project::{ExportFormat, Project};

use crate::encoder::{EncodeSettings, EncoderSink, FfmpegSink};
use crate::media::FfmpegTools;
use crate::renderer::Renderer;
use crate::scene::Scene;
use crate::text::FontBook;

/// Output parameters for an export.
#[derive(Debug, Clone)]
pub struct ExportSettings {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Video bitrate in bits per second.
    pub bitrate: u64,
    pub format: ExportFormat,
    pub tools: FfmpegTools,
}

impl ExportSettings {
    /// Settings from the application's render defaults.
    pub fn from_defaults(render: &RenderDefaults) -> Self {
        let format = ExportFormat::parse(&render.format).unwrap_or_else(|| {
            tracing::warn!(format = %render.format, "Unknown export format, using mp4");
            ExportFormat::Mp4
        });
        Self {
            width: render.width,
            height: render.height,
            fps: render.fps,
            bitrate: render.bitrate,
            format,
            tools: FfmpegTools::from_config(render),
        }
    }

    /// Settings for a project: its canvas, frame rate, and export config.
    pub fn for_project(project: &Project, render: &RenderDefaults) -> Self {
        Self {
            width: project.canvas_size.width,
            height: project.canvas_size.height,
            fps: project.fps,
            bitrate: project.export.bitrate,
            format: project.export.format,
            tools: FfmpegTools::from_config(render),
        }
    }
}

/// Progress report for an export.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportProgress {
    /// Fraction complete in `[0.0, 1.0]`.
    pub progress: f64,

    /// Frames rendered and encoded so far.
    pub frames_rendered: u64,

    /// Total frames to render.
    pub total_frames: u64,

    /// Estimated time remaining in seconds.
    pub eta_secs: f64,
}

/// An encoded video held in memory.
#[derive(Debug, Clone)]
pub struct ExportOutput {
    pub data: Arc<Vec<u8>>,
    pub mime_type: String,
}

impl ExportOutput {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Write the container bytes to `path`, creating parent directories.
    pub async fn save(&self, path: &Path) -> MontageResult<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, self.data.as_slice()).await?;
        Ok(())
    }
}

/// Events emitted while exporting. Every export ends with exactly one of
/// `Complete`, `Error`, or `Cancelled`.
#[derive(Debug, Clone)]
pub enum ExportEvent {
    Progress(ExportProgress),
    Complete(ExportOutput),
    Error(String),
    Cancelled,
}

impl ExportEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExportEvent::Progress(_))
    }
}

/// How an export ended when no error was raised.
#[derive(Debug, Clone)]
pub enum ExportOutcome {
    Completed(ExportOutput),
    Cancelled,
    /// The encoder finished without producing any bytes.
    Failed,
}

/// Lifecycle of an [`Exporter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportState {
    Idle,
    Running,
    Completed,
    Cancelled,
    Failed,
}

/// Shared cancellation flag for a running export.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    /// Request cancellation. Takes effect before the next frame starts.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Drives a [`Renderer`] across a scene and feeds an encoder.
pub struct Exporter {
    renderer: Renderer,
    settings: ExportSettings,
    cancel: CancelHandle,
    state: ExportState,
    events: Option<mpsc::UnboundedSender<ExportEvent>>,
}

impl std::fmt::Debug for Exporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Exporter")
            .field("settings", &self.settings)
            .field("state", &self.state)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

impl Exporter {
    pub fn new(settings: ExportSettings, fonts: Arc<FontBook>) -> MontageResult<Self> {
        let renderer = Renderer::new(settings.width, settings.height, settings.fps, fonts)?;
        Ok(Self {
            renderer,
            settings,
            cancel: CancelHandle::default(),
            state: ExportState::Idle,
            events: None,
        })
    }

    /// Receive events for subsequent exports. Replaces any earlier receiver.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<ExportEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.events = Some(tx);
        rx
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Request cancellation of the running export. Idempotent.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn state(&self) -> ExportState {
        self.state
    }

    pub fn settings(&self) -> &ExportSettings {
        &self.settings
    }

    pub fn renderer(&self) -> &Renderer {
        &self.renderer
    }

    /// Return to `Idle` and clear any pending cancellation.
    pub fn reset(&mut self) {
        self.state = ExportState::Idle;
        self.cancel.clear();
    }

    /// Export through an `ffmpeg` encoder.
    pub async fn export(&mut self, scene: &mut Scene) -> MontageResult<ExportOutcome> {
        let mut sink = FfmpegSink::new(
            self.settings.tools.clone(),
            EncodeSettings {
                width: self.renderer.width(),
                height: self.renderer.height(),
                fps: self.renderer.fps(),
                bitrate: self.settings.bitrate,
                format: self.settings.format,
            },
        );
        self.export_to(scene, &mut sink).await
    }

    /// Export into any encoder sink.
    pub async fn export_to(
        &mut self,
        scene: &mut Scene,
        sink: &mut dyn EncoderSink,
    ) -> MontageResult<ExportOutcome> {
        if self.state != ExportState::Idle {
            let err = MontageError::render(format!(
                "Exporter is {:?}; reset it before exporting again",
                self.state
            ));
            self.emit(ExportEvent::Error(err.to_string()));
            return Err(err);
        }

        self.state = ExportState::Running;
        let result = self.run(scene, sink).await;
        self.state = match &result {
            Ok(ExportOutcome::Completed(_)) => ExportState::Completed,
            Ok(ExportOutcome::Cancelled) => ExportState::Cancelled,
            Ok(ExportOutcome::Failed) | Err(_) => ExportState::Failed,
        };
        result
    }

    async fn run(
        &mut self,
        scene: &mut Scene,
        sink: &mut dyn EncoderSink,
    ) -> MontageResult<ExportOutcome> {
        let fps = self.renderer.fps();
        let total_frames = scene.frame_count(fps);
        let frame_duration = 1.0 / fps as f64;

        tracing::info!(
            duration = scene.duration(),
            fps,
            total_frames,
            width = self.renderer.width(),
            height = self.renderer.height(),
            mime_type = sink.mime_type(),
            "Starting export"
        );

        if let Err(err) = sink.start().await {
            return Err(self.fail(sink, err).await);
        }

        let started = Instant::now();
        for frame in 0..total_frames {
            if self.cancel.is_cancelled() {
                sink.abort().await;
                tracing::info!(frame, total_frames, "Export cancelled");
                self.emit(ExportEvent::Cancelled);
                return Ok(ExportOutcome::Cancelled);
            }

            if let Err(err) = self.renderer.render(scene, frame).await {
                return Err(self.fail(sink, err).await);
            }
            let timestamp = frame as f64 * frame_duration;
            if let Err(err) = sink.add(self.renderer.frame(), timestamp, frame_duration).await {
                return Err(self.fail(sink, err).await);
            }

            self.emit(ExportEvent::Progress(progress_report(
                frame,
                total_frames,
                started.elapsed().as_secs_f64(),
            )));
        }

        let data = match sink.finalize().await {
            Ok(data) => data,
            Err(err) => return Err(self.fail(sink, err).await),
        };

        self.emit(ExportEvent::Progress(ExportProgress {
            progress: 1.0,
            frames_rendered: total_frames,
            total_frames,
            eta_secs: 0.0,
        }));

        let Some(data) = data.filter(|d| !d.is_empty()) else {
            tracing::warn!(total_frames, "Encoder produced no output");
            self.emit(ExportEvent::Error("Export produced no output".to_string()));
            return Ok(ExportOutcome::Failed);
        };

        let output = ExportOutput {
            data: Arc::new(data),
            mime_type: sink.mime_type().to_string(),
        };
        tracing::info!(
            bytes = output.len(),
            elapsed_secs = started.elapsed().as_secs_f64(),
            "Export complete"
        );
        self.emit(ExportEvent::Complete(output.clone()));
        Ok(ExportOutcome::Completed(output))
    }

    async fn fail(&self, sink: &mut dyn EncoderSink, err: MontageError) -> MontageError {
        tracing::error!(error = %err, "Export failed");
        sink.abort().await;
        self.emit(ExportEvent::Error(err.to_string()));
        err
    }

    fn emit(&self, event: ExportEvent) {
        if let Some(tx) = &self.events {
            // A dropped receiver just means nobody is listening.
            let _ = tx.send(event);
        }
    }
}

/// Progress after `frame` (0-based) of `total_frames` has been encoded.
fn progress_report(frame: u64, total_frames: u64, elapsed_secs: f64) -> ExportProgress {
    let frames_rendered = frame + 1;
    let progress = if total_frames == 0 {
        0.0
    } else {
        frame as f64 / total_frames as f64
    };
    let per_frame = elapsed_secs / frames_rendered as f64;
    let eta_secs = (per_frame * total_frames.saturating_sub(frames_rendered) as f64).max(0.0);

    ExportProgress {
        progress,
        frames_rendered,
        total_frames,
        eta_secs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_report() {
        let p = progress_report(0, 10, 1.0);
        assert_eq!(p.progress, 0.0);
        assert_eq!(p.frames_rendered, 1);
        assert!((p.eta_secs - 9.0).abs() < 1e-9);

        let p = progress_report(9, 10, 5.0);
        assert!((p.progress - 0.9).abs() < 1e-9);
        assert_eq!(p.eta_secs, 0.0);
    }

    #[test]
    fn test_cancel_handle_is_shared() {
        let handle = CancelHandle::default();
        let clone = handle.clone();
        clone.cancel();
        clone.cancel();
        assert!(handle.is_cancelled());
        handle.clear();
        assert!(!clone.is_cancelled());
    }

    #[test]
    fn test_settings_from_defaults() {
        let render = RenderDefaults {
            format: "webm".to_string(),
            ..RenderDefaults::default()
        };
        let settings = ExportSettings::from_defaults(&render);
        assert_eq!(settings.format, ExportFormat::Webm);
        assert_eq!(settings.bitrate, 4_000_000);
        assert_eq!((settings.width, settings.height, settings.fps), (1280, 720, 30));

        let render = RenderDefaults {
            format: "gif".to_string(),
            ..RenderDefaults::default()
        };
        assert_eq!(ExportSettings::from_defaults(&render).format, ExportFormat::Mp4);
    }

    #[test]
    fn test_settings_for_project() {
        let project = Project::new("p", 1920, 1080, 60);
        let settings = ExportSettings::for_project(&project, &RenderDefaults::default());
        assert_eq!((settings.width, settings.height, settings.fps), (1920, 1080, 60));
        assert_eq!(settings.format, ExportFormat::Mp4);
    }

    #[test]
    fn test_terminal_events() {
        assert!(ExportEvent::Cancelled.is_terminal());
        assert!(ExportEvent::Error("x".to_string()).is_terminal());
        assert!(!ExportEvent::Progress(progress_report(0, 1, 0.0)).is_terminal());
    }

    #[tokio::test]
    async fn test_output_save() {
        let dir = std::env::temp_dir().join("montage_test_export_output");
        let _ = std::fs::remove_dir_all(&dir);
        let path = dir.join("nested").join("out.mp4");
        let output = ExportOutput {
            data: Arc::new(vec![1, 2, 3]),
            mime_type: "video/mp4".to_string(),
        };
        output.save(&path).await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), vec![1, 2, 3]);
        std::fs::remove_dir_all(&dir).ok();
    }
}
