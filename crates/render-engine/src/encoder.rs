//! Encoder sinks: where rendered frames go to become a video file.

use std::process::Stdio;

use async_trait::async_trait;
use image::RgbaImage;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::task::JoinHandle;

use montage_common::error::{MontageError, MontageResult};
use montage_project_model::project::ExportFormat;

use crate::media::FfmpegTools;

/// Consumer of rendered frames that produces a muxed container.
#[async_trait]
pub trait EncoderSink: Send {
    /// Mime type of the produced container.
    fn mime_type(&self) -> &str;

    /// Open the container with a single video track.
    async fn start(&mut self) -> MontageResult<()>;

    /// Encode one frame. `timestamp` and `duration` are in seconds.
    ///
    /// Resolves once the encoder has accepted the frame.
    async fn add(&mut self, frame: &RgbaImage, timestamp: f64, duration: f64) -> MontageResult<()>;

    /// Flush and close the container, returning its bytes.
    async fn finalize(&mut self) -> MontageResult<Option<Vec<u8>>>;

    /// Tear down without producing output. Safe to call at any point.
    async fn abort(&mut self);
}

/// Settings for one encode.
#[derive(Debug, Clone)]
pub struct EncodeSettings {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Target video bitrate in bits per second.
    pub bitrate: u64,
    pub format: ExportFormat,
}

struct EncoderProcess {
    child: Child,
    stdin: Option<ChildStdin>,
    stdout_task: JoinHandle<std::io::Result<Vec<u8>>>,
    stderr_task: JoinHandle<String>,
}

/// Pipes raw RGBA frames into an `ffmpeg` process and collects the
/// container it writes to stdout.
pub struct FfmpegSink {
    tools: FfmpegTools,
    settings: EncodeSettings,
    process: Option<EncoderProcess>,
    last_timestamp: Option<f64>,
    frames: u64,
}

impl std::fmt::Debug for FfmpegSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FfmpegSink")
            .field("settings", &self.settings)
            .field("running", &self.process.is_some())
            .field("frames", &self.frames)
            .finish()
    }
}

impl FfmpegSink {
    pub fn new(tools: FfmpegTools, settings: EncodeSettings) -> Self {
        Self {
            tools,
            settings,
            process: None,
            last_timestamp: None,
            frames: 0,
        }
    }

    /// Full ffmpeg argument list for the configured encode.
    pub fn ffmpeg_args(&self) -> Vec<String> {
        let s = &self.settings;
        let mut args: Vec<String> = [
            "-hide_banner",
            "-loglevel",
            "error",
            "-f",
            "rawvideo",
            "-pix_fmt",
            "rgba",
            "-video_size",
        ]
        .iter()
        .map(|a| a.to_string())
        .collect();
        args.push(format!("{}x{}", s.width, s.height));
        args.extend(["-framerate".to_string(), s.fps.to_string()]);
        args.extend(["-i".to_string(), "pipe:0".to_string(), "-an".to_string()]);
        args.extend(codec_args(s.format, s.bitrate));
        args.push("pipe:1".to_string());
        args
    }
}

fn codec_args(format: ExportFormat, bitrate: u64) -> Vec<String> {
    let video_bitrate = bitrate.max(1).to_string();

    match format {
        ExportFormat::Mp4 => vec![
            "-c:v".to_string(),
            "libx264".to_string(),
            "-preset".to_string(),
            "medium".to_string(),
            "-pix_fmt".to_string(),
            "yuv420p".to_string(),
            "-vf".to_string(),
            "pad=ceil(iw/2)*2:ceil(ih/2)*2".to_string(),
            "-b:v".to_string(),
            video_bitrate,
            "-movflags".to_string(),
            "frag_keyframe+empty_moov".to_string(),
            "-f".to_string(),
            "mp4".to_string(),
        ],
        ExportFormat::Webm => vec![
            "-c:v".to_string(),
            "libvpx-vp9".to_string(),
            "-pix_fmt".to_string(),
            "yuv420p".to_string(),
            "-b:v".to_string(),
            video_bitrate,
            "-f".to_string(),
            "webm".to_string(),
        ],
    }
}

#[async_trait]
impl EncoderSink for FfmpegSink {
    fn mime_type(&self) -> &str {
        self.settings.format.mime_type()
    }

    async fn start(&mut self) -> MontageResult<()> {
        if self.process.is_some() {
            return Err(MontageError::encode("Encoder already started"));
        }

        let args = self.ffmpeg_args();
        tracing::debug!(args = ?args, "Running ffmpeg");

        let mut child = Command::new(&self.tools.ffmpeg)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| MontageError::encode(format!("Failed to start ffmpeg: {e}")))?;

        tracing::info!(
            pid = child.id(),
            width = self.settings.width,
            height = self.settings.height,
            fps = self.settings.fps,
            bitrate = self.settings.bitrate,
            format = ?self.settings.format,
            "ffmpeg encoder started"
        );

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| MontageError::encode("Failed to capture ffmpeg stdin"))?;
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| MontageError::encode("Failed to capture ffmpeg stdout"))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| MontageError::encode("Failed to capture ffmpeg stderr"))?;

        // Both pipes are drained concurrently so ffmpeg never blocks on a full buffer.
        let stdout_task = tokio::spawn(async move {
            let mut data = Vec::new();
            stdout.read_to_end(&mut data).await?;
            Ok(data)
        });
        let stderr_task = tokio::spawn(async move {
            let mut output = String::new();
            match stderr.read_to_string(&mut output).await {
                Ok(_) => output,
                Err(err) => format!("<failed to read ffmpeg stderr: {err}>"),
            }
        });

        self.process = Some(EncoderProcess {
            child,
            stdin: Some(stdin),
            stdout_task,
            stderr_task,
        });
        self.last_timestamp = None;
        self.frames = 0;
        Ok(())
    }

    async fn add(&mut self, frame: &RgbaImage, timestamp: f64, _duration: f64) -> MontageResult<()> {
        let (width, height) = (self.settings.width, self.settings.height);
        if frame.width() != width || frame.height() != height {
            return Err(MontageError::encode(format!(
                "Frame is {}x{}, encoder expects {width}x{height}",
                frame.width(),
                frame.height()
            )));
        }
        if let Some(last) = self.last_timestamp {
            if timestamp <= last {
                return Err(MontageError::encode(format!(
                    "Non-increasing timestamp {timestamp:.6}s after {last:.6}s"
                )));
            }
        }

        let stdin = self
            .process
            .as_mut()
            .and_then(|p| p.stdin.as_mut())
            .ok_or_else(|| MontageError::encode("Encoder is not running"))?;
        stdin
            .write_all(frame.as_raw())
            .await
            .map_err(|e| MontageError::encode(format!("Failed writing frame to ffmpeg: {e}")))?;

        self.last_timestamp = Some(timestamp);
        self.frames += 1;
        Ok(())
    }

    async fn finalize(&mut self) -> MontageResult<Option<Vec<u8>>> {
        let mut process = self
            .process
            .take()
            .ok_or_else(|| MontageError::encode("Encoder is not running"))?;

        if let Some(mut stdin) = process.stdin.take() {
            stdin
                .shutdown()
                .await
                .map_err(|e| MontageError::encode(format!("Failed closing ffmpeg stdin: {e}")))?;
        }

        let status = process
            .child
            .wait()
            .await
            .map_err(|e| MontageError::encode(format!("Failed to wait on ffmpeg: {e}")))?;

        let stderr_output = process
            .stderr_task
            .await
            .unwrap_or_else(|_| "<failed to join stderr reader>".to_string());

        if !status.success() {
            process.stdout_task.abort();
            return Err(MontageError::encode(format!(
                "ffmpeg encode failed (status {status}): {}",
                stderr_output.trim()
            )));
        }

        let data = process
            .stdout_task
            .await
            .map_err(|e| MontageError::encode(format!("ffmpeg output reader failed: {e}")))?
            .map_err(|e| MontageError::encode(format!("Failed reading ffmpeg output: {e}")))?;

        tracing::info!(frames = self.frames, bytes = data.len(), "ffmpeg encoder finished");
        Ok((!data.is_empty()).then_some(data))
    }

    async fn abort(&mut self) {
        let Some(mut process) = self.process.take() else {
            return;
        };
        drop(process.stdin.take());
        if let Err(err) = process.child.kill().await {
            tracing::warn!(error = %err, "Failed to kill ffmpeg encoder");
        }
        process.stdout_task.abort();
        process.stderr_task.abort();
        tracing::debug!(frames = self.frames, "ffmpeg encoder aborted");
    }
}
