//! Media decoding through the `ffmpeg` and `ffprobe` executables.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use image::RgbaImage;
use serde::Deserialize;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout, Command};
use tokio::task::JoinHandle;

use montage_common::config::RenderDefaults;
use montage_common::error::{MontageError, MontageResult};
use montage_project_model::project::locator_path;

use crate::video::MediaHandle;

/// Locations of the external media tools.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FfmpegTools {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
}

impl Default for FfmpegTools {
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
        }
    }
}

impl FfmpegTools {
    pub fn from_config(render: &RenderDefaults) -> Self {
        Self {
            ffmpeg: render.ffmpeg_path.clone(),
            ffprobe: render.ffprobe_path.clone(),
        }
    }
}

/// First line of `<binary> -version`, or `None` if it cannot be run.
pub async fn tool_version(binary: &Path) -> Option<String> {
    let output = Command::new(binary)
        .arg("-version")
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .await
        .ok()?;

    if !output.status.success() {
        return None;
    }

    let raw = String::from_utf8(output.stdout).ok()?;
    raw.lines().next().map(|line| line.trim().to_string())
}

/// Stream facts reported by `ffprobe`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeInfo {
    /// Display width, after container rotation is applied.
    pub width: u32,
    /// Display height, after container rotation is applied.
    pub height: u32,
    /// `None` for still images.
    pub duration: Option<f64>,
    /// Average frame rate, when the stream declares one.
    pub frame_rate: Option<f64>,
}

/// Frame rate assumed when a stream does not declare one.
const FALLBACK_FRAME_RATE: f64 = 30.0;

impl ProbeInfo {
    pub fn frame_rate_or_default(&self) -> f64 {
        self.frame_rate.unwrap_or(FALLBACK_FRAME_RATE)
    }

    fn frame_len(&self) -> usize {
        self.width as usize * self.height as usize * 4
    }
}

#[derive(Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
    duration: Option<String>,
    avg_frame_rate: Option<String>,
    r_frame_rate: Option<String>,
    #[serde(default)]
    tags: ProbeTags,
    #[serde(default)]
    side_data_list: Vec<ProbeSideData>,
}

#[derive(Deserialize, Default)]
struct ProbeTags {
    rotate: Option<String>,
}

#[derive(Deserialize)]
struct ProbeSideData {
    rotation: Option<f64>,
}

#[derive(Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

impl ProbeStream {
    /// Rotation in degrees, normalized to `[0, 360)`.
    fn rotation(&self) -> i64 {
        let degrees = self
            .side_data_list
            .iter()
            .find_map(|side| side.rotation)
            .or_else(|| self.tags.rotate.as_deref().and_then(|r| r.trim().parse().ok()))
            .unwrap_or(0.0);
        (degrees.round() as i64).rem_euclid(360)
    }
}

/// `"30000/1001"` style rational, rejecting `0/0`.
fn parse_rate(raw: &str) -> Option<f64> {
    let rate = match raw.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num / den
        }
        None => raw.trim().parse().ok()?,
    };
    (rate.is_finite() && rate > 0.0).then_some(rate)
}

/// Parse `ffprobe -of json` output for the first video stream.
pub fn parse_probe_output(json: &str) -> MontageResult<ProbeInfo> {
    let output: ProbeOutput = serde_json::from_str(json)?;
    let stream = output
        .streams
        .first()
        .ok_or_else(|| MontageError::media("No video stream found"))?;

    let (coded_width, coded_height) = match (stream.width, stream.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
        _ => return Err(MontageError::media("Video stream has no dimensions")),
    };
    // ffmpeg applies the display rotation when decoding.
    let (width, height) = match stream.rotation() {
        90 | 270 => (coded_height, coded_width),
        _ => (coded_width, coded_height),
    };

    let parse_secs = |raw: &Option<String>| {
        raw.as_deref()
            .and_then(|s| s.parse::<f64>().ok())
            .filter(|d| d.is_finite() && *d > 0.0)
    };
    let duration = parse_secs(&stream.duration)
        .or_else(|| output.format.as_ref().and_then(|f| parse_secs(&f.duration)));

    let frame_rate = stream
        .avg_frame_rate
        .as_deref()
        .and_then(parse_rate)
        .or_else(|| stream.r_frame_rate.as_deref().and_then(parse_rate));

    Ok(ProbeInfo {
        width,
        height,
        duration,
        frame_rate,
    })
}

/// Probe a media file.
pub async fn probe(ffprobe: &Path, path: &Path) -> MontageResult<ProbeInfo> {
    let output = Command::new(ffprobe)
        .args([
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-show_streams",
            "-show_format",
            "-of",
            "json",
        ])
        .arg(path)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| MontageError::media(format!("Failed to start ffprobe: {e}")))?;

    if !output.status.success() {
        return Err(MontageError::media(format!(
            "ffprobe failed on {} (status {}): {}",
            path.display(),
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    parse_probe_output(&String::from_utf8_lossy(&output.stdout))
}

/// Forward distance (seconds) a running decoder is walked before it is
/// restarted at the seek target instead.
pub const TIME_FORWARD: f64 = 0.5;

const TIME_EPSILON: f64 = 1e-6;

/// Arguments for an `ffmpeg` decode of `path` starting at `start`, emitting
/// raw RGBA frames of exactly `info.width` x `info.height` at a constant rate.
pub fn decode_args(path: &Path, start: f64, info: &ProbeInfo, still: bool) -> Vec<String> {
    let mut args: Vec<String> = ["-hide_banner", "-loglevel", "error", "-nostdin"]
        .iter()
        .map(|a| a.to_string())
        .collect();
    if !still {
        args.extend(["-ss".to_string(), format!("{start:.6}")]);
    }
    args.extend(["-i".to_string(), path.display().to_string(), "-an".to_string()]);

    let mut filter = format!("scale={}:{}", info.width, info.height);
    if still {
        args.extend(["-frames:v".to_string(), "1".to_string()]);
    } else {
        filter = format!("fps={},{filter}", info.frame_rate_or_default());
    }
    args.extend(["-vf".to_string(), filter]);
    args.extend(
        ["-f", "rawvideo", "-pix_fmt", "rgba", "pipe:1"]
            .iter()
            .map(|a| a.to_string()),
    );
    args
}

/// A running `ffmpeg` decode, read one frame at a time.
struct FrameStream {
    child: Child,
    stdout: ChildStdout,
    stderr_task: JoinHandle<String>,
    start: f64,
    /// Frames read so far.
    read: u64,
}

impl FrameStream {
    fn spawn(ffmpeg: &Path, args: &[String], start: f64) -> MontageResult<Self> {
        let mut child = Command::new(ffmpeg)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| MontageError::media(format!("Failed to start ffmpeg: {e}")))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| MontageError::media("Failed to capture ffmpeg stdout"))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| MontageError::media("Failed to capture ffmpeg stderr"))?;
        let stderr_task = tokio::spawn(async move {
            let mut output = String::new();
            match stderr.read_to_string(&mut output).await {
                Ok(_) => output,
                Err(err) => format!("<failed to read ffmpeg stderr: {err}>"),
            }
        });

        Ok(Self {
            child,
            stdout,
            stderr_task,
            start,
            read: 0,
        })
    }

    /// Next frame, or `None` once the decoder has no more output.
    async fn next_frame(&mut self, len: usize) -> MontageResult<Option<Vec<u8>>> {
        let mut buf = vec![0u8; len];
        match self.stdout.read_exact(&mut buf).await {
            Ok(_) => {
                self.read += 1;
                Ok(Some(buf))
            }
            Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => Ok(None),
            Err(err) => Err(MontageError::media(format!("Failed reading ffmpeg output: {err}"))),
        }
    }

    /// Wait for the process after its output ran dry and report a failure.
    async fn finish(mut self) -> MontageResult<()> {
        let status = self
            .child
            .wait()
            .await
            .map_err(|e| MontageError::media(format!("Failed to wait on ffmpeg: {e}")))?;
        let stderr = self
            .stderr_task
            .await
            .unwrap_or_else(|_| "<failed to join stderr reader>".to_string());
        if status.success() {
            return Ok(());
        }
        Err(MontageError::media(format!(
            "ffmpeg decode failed (status {status}): {}",
            stderr.trim()
        )))
    }

    async fn stop(mut self) {
        if let Err(err) = self.child.kill().await {
            tracing::debug!(error = %err, "Failed to kill ffmpeg decoder");
        }
        self.stderr_task.abort();
    }
}

/// A media file decoded by a long-running `ffmpeg` process.
///
/// Small forward seeks read ahead on the running decoder. Backward seeks
/// and jumps further than [`TIME_FORWARD`] restart it at the target.
pub struct FfmpegMedia {
    path: PathBuf,
    ffmpeg: PathBuf,
    info: ProbeInfo,
    stream: Option<FrameStream>,
    /// Media time of the current frame.
    frame_time: Option<f64>,
    frame: Option<RgbaImage>,
    /// Media time at which decoding ran out of frames.
    end: Option<f64>,
    restarts: u64,
}

impl std::fmt::Debug for FfmpegMedia {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FfmpegMedia")
            .field("path", &self.path)
            .field("info", &self.info)
            .field("frame_time", &self.frame_time)
            .field("streaming", &self.stream.is_some())
            .field("restarts", &self.restarts)
            .finish()
    }
}

impl FfmpegMedia {
    /// Open a locator (`file://` URL or path) and probe it.
    pub async fn open(locator: &str, tools: &FfmpegTools) -> MontageResult<Self> {
        let path = locator_path(locator);
        if !path.exists() {
            return Err(MontageError::FileNotFound { path });
        }

        let info = probe(&tools.ffprobe, &path).await?;
        tracing::debug!(
            path = %path.display(),
            width = info.width,
            height = info.height,
            duration = ?info.duration,
            frame_rate = ?info.frame_rate,
            "Opened media"
        );

        Ok(Self::with_info(path, tools.ffmpeg.clone(), info))
    }

    fn with_info(path: PathBuf, ffmpeg: PathBuf, info: ProbeInfo) -> Self {
        Self {
            path,
            ffmpeg,
            info,
            stream: None,
            frame_time: None,
            frame: None,
            end: None,
            restarts: 0,
        }
    }

    pub fn info(&self) -> ProbeInfo {
        self.info
    }

    /// Number of times a decoder process was started.
    pub fn decoder_starts(&self) -> u64 {
        self.restarts
    }

    fn is_still(&self) -> bool {
        self.info.duration.is_none()
    }

    fn frame_interval(&self) -> f64 {
        1.0 / self.info.frame_rate_or_default()
    }

    fn covers(&self, target: f64) -> bool {
        self.frame.is_some()
            && self.frame_time.is_some_and(|t| {
                target + TIME_EPSILON >= t && target + TIME_EPSILON < t + self.frame_interval()
            })
    }

    fn store(&mut self, raw: Vec<u8>, time: f64) -> MontageResult<()> {
        let frame = RgbaImage::from_raw(self.info.width, self.info.height, raw).ok_or_else(|| {
            MontageError::media(format!(
                "Decoded frame from {} does not match {}x{}",
                self.path.display(),
                self.info.width,
                self.info.height
            ))
        })?;
        self.frame = Some(frame);
        self.frame_time = Some(time);
        Ok(())
    }

    async fn stop_stream(&mut self) {
        if let Some(stream) = self.stream.take() {
            stream.stop().await;
        }
    }

    /// The decoder ran dry at `time`: hold the previous frame if there is one.
    async fn exhausted(&mut self, stream: FrameStream, time: f64) -> MontageResult<()> {
        stream.finish().await?;
        if self.frame.is_none() {
            return Err(MontageError::media(format!(
                "No frame at {time:.3}s in {}",
                self.path.display()
            )));
        }
        // Container durations can run past the last decodable frame.
        tracing::debug!(time, path = %self.path.display(), "No frame at seek target, holding previous");
        self.end = Some(time);
        Ok(())
    }

    /// Read forward on the running decoder until a frame covers `target`.
    async fn walk(&mut self, target: f64) -> MontageResult<()> {
        let interval = self.frame_interval();
        let len = self.info.frame_len();
        loop {
            let Some(stream) = self.stream.as_mut() else {
                return Ok(());
            };
            let time = stream.start + stream.read as f64 * interval;
            match stream.next_frame(len).await? {
                Some(raw) => {
                    self.store(raw, time)?;
                    if self.covers(target) {
                        return Ok(());
                    }
                }
                None => {
                    let Some(stream) = self.stream.take() else {
                        return Ok(());
                    };
                    return self.exhausted(stream, time).await;
                }
            }
        }
    }

    async fn restart(&mut self, target: f64) -> MontageResult<()> {
        self.stop_stream().await;
        self.end = None;

        let still = self.is_still();
        let args = decode_args(&self.path, target, &self.info, still);
        tracing::trace!(args = ?args, "Starting ffmpeg decoder");
        self.stream = Some(FrameStream::spawn(&self.ffmpeg, &args, target)?);
        self.restarts += 1;

        self.walk(target).await?;
        if still {
            self.stop_stream().await;
        }
        Ok(())
    }
}

#[async_trait]
impl MediaHandle for FfmpegMedia {
    /// Stills have no intrinsic end.
    fn duration(&self) -> f64 {
        self.info.duration.unwrap_or(f64::INFINITY)
    }

    async fn seek(&mut self, time: f64) -> MontageResult<()> {
        if self.is_still() {
            if self.frame.is_none() {
                self.restart(0.0).await?;
            }
            return Ok(());
        }

        let target = time.max(0.0);
        if self.covers(target) {
            return Ok(());
        }

        let forward = self.frame_time.is_some_and(|t| target >= t);
        if forward && self.end.is_some_and(|end| target + TIME_EPSILON >= end) {
            return Ok(());
        }
        let ahead = forward && self.frame_time.is_some_and(|t| target < t + TIME_FORWARD);
        if ahead && self.stream.is_some() {
            return self.walk(target).await;
        }
        self.restart(target).await
    }

    fn current_frame(&self) -> Option<&RgbaImage> {
        self.frame.as_ref()
    }
}
