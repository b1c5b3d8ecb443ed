//! Video nodes and the media handle contract they draw from.

use async_trait::async_trait;
use image::RgbaImage;
use serde::Deserialize;

use montage_common::error::{MontageError, MontageResult};

use crate::media::{FfmpegMedia, FfmpegTools};
use crate::node::RenderContext;

/// Tolerance on the lower edge of a clip's visible range (seconds).
pub const VIDEO_EPSILON: f64 = 1.0 / 1000.0;

/// A seekable source of decoded frames.
#[async_trait]
pub trait MediaHandle: Send {
    /// Intrinsic duration in seconds, `f64::INFINITY` for stills.
    fn duration(&self) -> f64;

    /// Move to `time` (seconds). Resolves once the frame at `time` is
    /// available from [`MediaHandle::current_frame`].
    async fn seek(&mut self, time: f64) -> MontageResult<()>;

    /// Frame decoded by the last successful seek.
    fn current_frame(&self) -> Option<&RgbaImage>;
}

/// Placement of a clip on the timeline.
#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize)]
#[serde(default)]
pub struct VideoParams {
    /// Untrimmed duration. Falls back to the media's intrinsic duration.
    pub duration: Option<f64>,
    /// Timeline time at which the clip starts.
    pub time_offset: f64,
    pub trim_start: f64,
    pub trim_end: f64,
}

/// Draws the frame of its media that corresponds to the render time.
pub struct VideoNode {
    params: VideoParams,
    locator: Option<String>,
    tools: FfmpegTools,
    handle: Option<Box<dyn MediaHandle>>,
}

impl std::fmt::Debug for VideoNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoNode")
            .field("params", &self.params)
            .field("locator", &self.locator)
            .field("open", &self.handle.is_some())
            .finish()
    }
}

impl VideoNode {
    /// A node over an already opened media handle.
    pub fn from_handle(handle: Box<dyn MediaHandle>, params: VideoParams) -> Self {
        Self {
            params,
            locator: None,
            tools: FfmpegTools::default(),
            handle: Some(handle),
        }
    }

    /// A node whose media is opened on first use.
    pub fn from_locator(locator: impl Into<String>, tools: FfmpegTools, params: VideoParams) -> Self {
        Self {
            params,
            locator: Some(locator.into()),
            tools,
            handle: None,
        }
    }

    pub fn params(&self) -> &VideoParams {
        &self.params
    }

    pub fn locator(&self) -> Option<&str> {
        self.locator.as_deref()
    }

    async fn handle(&mut self) -> MontageResult<&mut Box<dyn MediaHandle>> {
        if self.handle.is_none() {
            let locator = self
                .locator
                .as_deref()
                .ok_or_else(|| MontageError::media("Video node has no media source"))?;
            let media = FfmpegMedia::open(locator, &self.tools).await?;
            self.handle = Some(Box::new(media));
        }
        self.handle
            .as_mut()
            .ok_or_else(|| MontageError::media("Video media is not open"))
    }

    /// Clip duration, querying the media when it was not given.
    pub async fn duration(&mut self) -> MontageResult<f64> {
        if let Some(duration) = self.params.duration {
            return Ok(duration);
        }
        let duration = self.handle().await?.duration();
        self.params.duration = Some(duration);
        Ok(duration)
    }

    /// Seek the media to `time` in media-local seconds.
    pub async fn seek(&mut self, time: f64) -> MontageResult<()> {
        self.handle().await?.seek(time).await
    }

    /// Media-local time for a timeline time.
    pub fn video_time(&self, time: f64) -> f64 {
        time - self.params.time_offset + self.params.trim_start
    }

    /// Whether media-local time `video_time` falls in the visible range.
    pub fn is_in_range(&self, video_time: f64, duration: f64) -> bool {
        video_time >= self.params.trim_start - VIDEO_EPSILON
            && video_time < duration - self.params.trim_end
    }

    pub(crate) async fn draw(&mut self, ctx: &mut RenderContext<'_>, time: f64) -> MontageResult<()> {
        let duration = self.duration().await?;
        let video_time = self.video_time(time);
        if !self.is_in_range(video_time, duration) {
            return Ok(());
        }

        let handle = self.handle().await?;
        handle.seek(video_time).await?;

        match handle.current_frame() {
            Some(frame) => {
                let (w, h) = (ctx.surface.width() as f64, ctx.surface.height() as f64);
                ctx.surface.draw_image(frame, 0.0, 0.0, w, h);
            }
            None => tracing::trace!(video_time, "No decoded frame after seek"),
        }
        Ok(())
    }
}
