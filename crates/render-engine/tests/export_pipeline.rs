use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use image::{Rgba, RgbaImage};
use tokio::sync::mpsc::UnboundedReceiver;

use montage_common::error::{MontageError, MontageResult};
use montage_project_model::project::{ExportFormat, Project};
use montage_render_engine::surface::{DrawState, FontSpec, TextAlign, TextBaseline};
use montage_render_engine::{
    CancelHandle, EncoderSink, ExportEvent, ExportOutcome, ExportSettings, ExportState, Exporter,
    FfmpegTools, FontBook, MediaHandle, Node, NodeKind, Render, RenderContext, Renderer, Scene,
    SceneBuilder, Surface, TextNode, VideoNode, VideoParams,
};

const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);
const GREEN: Rgba<u8> = Rgba([0, 255, 0, 255]);
const BLUE: Rgba<u8> = Rgba([0, 0, 255, 255]);
const BLACK: Rgba<u8> = Rgba([0, 0, 0, 255]);

/// Shared log of what an in-memory sink saw.
#[derive(Debug, Default)]
struct SinkLog {
    started: bool,
    timestamps: Vec<f64>,
    durations: Vec<f64>,
    finalized: bool,
    aborted: bool,
}

/// Encoder double that keeps frames in memory.
struct MemorySink {
    log: Arc<Mutex<SinkLog>>,
    output: Option<Vec<u8>>,
    cancel_after: Option<(usize, CancelHandle)>,
    fail_at: Option<usize>,
}

impl MemorySink {
    fn new(log: Arc<Mutex<SinkLog>>) -> Self {
        Self {
            log,
            output: Some(vec![0x00, 0x00, 0x00, 0x18, b'f', b't', b'y', b'p']),
            cancel_after: None,
            fail_at: None,
        }
    }
}

#[async_trait]
impl EncoderSink for MemorySink {
    fn mime_type(&self) -> &str {
        "video/mp4"
    }

    async fn start(&mut self) -> MontageResult<()> {
        self.log.lock().unwrap().started = true;
        Ok(())
    }

    async fn add(&mut self, _frame: &RgbaImage, timestamp: f64, duration: f64) -> MontageResult<()> {
        let mut log = self.log.lock().unwrap();
        let index = log.timestamps.len();
        if self.fail_at == Some(index) {
            return Err(MontageError::encode("encoder rejected frame"));
        }
        log.timestamps.push(timestamp);
        log.durations.push(duration);
        if let Some((k, handle)) = &self.cancel_after {
            if index == *k {
                handle.cancel();
            }
        }
        Ok(())
    }

    async fn finalize(&mut self) -> MontageResult<Option<Vec<u8>>> {
        self.log.lock().unwrap().finalized = true;
        Ok(self.output.take())
    }

    async fn abort(&mut self) {
        self.log.lock().unwrap().aborted = true;
    }
}

/// Media double producing solid frames and recording seeks.
struct SolidMedia {
    duration: f64,
    color: Rgba<u8>,
    seeks: Arc<Mutex<Vec<f64>>>,
    fail: bool,
    frame: Option<RgbaImage>,
}

impl SolidMedia {
    fn new(duration: f64, color: Rgba<u8>) -> Self {
        Self {
            duration,
            color,
            seeks: Arc::default(),
            fail: false,
            frame: None,
        }
    }
}

#[async_trait]
impl MediaHandle for SolidMedia {
    fn duration(&self) -> f64 {
        self.duration
    }

    async fn seek(&mut self, time: f64) -> MontageResult<()> {
        if self.fail {
            return Err(MontageError::media(format!("cannot decode at {time}")));
        }
        self.seeks.lock().unwrap().push(time);
        self.frame = Some(RgbaImage::from_pixel(2, 2, self.color));
        Ok(())
    }

    fn current_frame(&self) -> Option<&RgbaImage> {
        self.frame.as_ref()
    }
}

/// Surface double that records text draws and the state they used.
#[derive(Default)]
struct RecordingSurface {
    state: DrawState,
    stack: Vec<DrawState>,
    texts: Vec<(String, DrawState)>,
}

impl Surface for RecordingSurface {
    fn width(&self) -> u32 {
        64
    }

    fn height(&self) -> u32 {
        64
    }

    fn state(&self) -> &DrawState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut DrawState {
        &mut self.state
    }

    fn save(&mut self) {
        self.stack.push(self.state.clone());
    }

    fn restore(&mut self) {
        if let Some(state) = self.stack.pop() {
            self.state = state;
        }
    }

    fn fill_rect(&mut self, _x: f64, _y: f64, _width: f64, _height: f64) {}

    fn fill_text(&mut self, text: &str, _x: f64, _y: f64) {
        self.texts.push((text.to_string(), self.state.clone()));
    }

    fn draw_image(&mut self, _image: &RgbaImage, _x: f64, _y: f64, _width: f64, _height: f64) {}
}

fn fonts() -> Arc<FontBook> {
    Arc::new(FontBook::new())
}

fn settings(fps: u32) -> ExportSettings {
    ExportSettings {
        width: 8,
        height: 8,
        fps,
        bitrate: 4_000_000,
        format: ExportFormat::Mp4,
        tools: FfmpegTools::default(),
    }
}

fn drain(rx: &mut UnboundedReceiver<ExportEvent>) -> Vec<ExportEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn terminal_count(events: &[ExportEvent]) -> usize {
    events.iter().filter(|e| e.is_terminal()).count()
}

fn title(time_start: f64, duration: f64) -> TextNode {
    TextNode {
        text: "Title".to_string(),
        font: FontSpec::default(),
        text_align: TextAlign::Center,
        text_baseline: TextBaseline::Middle,
        color: Rgba([10, 20, 30, 255]),
        opacity: 0.4,
        x: 32.0,
        y: 32.0,
        time_start,
        duration,
    }
}

fn video(media: SolidMedia, params: VideoParams) -> Node {
    Node::video(VideoNode::from_handle(Box::new(media), params))
}

fn color_scene(duration: f64, color: Rgba<u8>) -> Scene {
    let mut scene = Scene::new(duration);
    scene.add(Node::color(color));
    scene
}

#[tokio::test]
async fn rendering_is_deterministic_across_renderers() {
    let build = || {
        let mut scene = Scene::new(2.0);
        scene
            .add(Node::color(RED))
            .add(video(
                SolidMedia::new(1.0, BLUE),
                VideoParams {
                    time_offset: 0.5,
                    ..Default::default()
                },
            ))
            .add(Node::text(title(0.0, 2.0)))
            .add(Node::timecode());
        scene
    };

    let mut first = Renderer::new(16, 9, 30, fonts()).unwrap();
    let mut second = Renderer::new(16, 9, 30, fonts()).unwrap();
    let (mut a, mut b) = (build(), build());
    for frame in [0, 20, 45] {
        first.render(&mut a, frame).await.unwrap();
        second.render(&mut b, frame).await.unwrap();
        assert_eq!(first.frame(), second.frame(), "frame {frame} differs");
    }
}

#[test]
fn frame_count_rounds_up() {
    assert_eq!(Scene::new(2.5).frame_count(30), 75);
    assert_eq!(Scene::new(2.51).frame_count(30), 76);
}

#[tokio::test]
async fn later_siblings_composite_over_earlier() {
    let mut renderer = Renderer::new(4, 4, 30, fonts()).unwrap();
    let mut scene = Scene::new(1.0);
    scene.add(Node::color(RED)).add(Node::color(BLUE));
    renderer.render(&mut scene, 0).await.unwrap();
    assert!(renderer.frame().pixels().all(|p| *p == BLUE));
}

#[tokio::test]
async fn text_draws_only_inside_its_window() {
    let mut node = Node::text(title(2.0, 3.0));
    for (time, drawn) in [(1.999, false), (2.0, true), (3.5, true), (4.999, true), (5.0, false)] {
        let mut surface = RecordingSurface::default();
        let mut ctx = RenderContext {
            surface: &mut surface,
            fps: 30,
        };
        node.render(&mut ctx, time).await.unwrap();
        assert_eq!(!surface.texts.is_empty(), drawn, "at t={time}");
    }
}

#[tokio::test]
async fn text_state_is_scoped_to_the_draw() {
    let mut surface = RecordingSurface::default();
    surface.state.fill = GREEN;
    surface.state.global_alpha = 0.9;

    let mut node = Node::text(title(0.0, 1.0));
    let mut ctx = RenderContext {
        surface: &mut surface,
        fps: 30,
    };
    node.render(&mut ctx, 0.5).await.unwrap();

    let (text, used) = &surface.texts[0];
    assert_eq!(text, "Title");
    assert!((used.global_alpha - 0.4).abs() < 1e-6);
    assert_eq!(used.fill, Rgba([10, 20, 30, 255]));
    assert_eq!(used.text_align, TextAlign::Center);
    assert_eq!(used.text_baseline, TextBaseline::Middle);

    assert_eq!(surface.state.fill, GREEN);
    assert!((surface.state.global_alpha - 0.9).abs() < 1e-6);
    assert!(surface.stack.is_empty());
}

#[tokio::test]
async fn time_offset_shifts_subtree_time() {
    let media = SolidMedia::new(5.0, GREEN);
    let seeks = media.seeks.clone();
    let mut scene = Scene::new(20.0);
    scene.add(Node::time_offset(10.0).with_child(video(media, VideoParams::default())));

    let mut renderer = Renderer::new(4, 4, 1, fonts()).unwrap();

    renderer.render(&mut scene, 12).await.unwrap();
    assert!(renderer.frame().pixels().all(|p| *p == GREEN));
    assert_eq!(*seeks.lock().unwrap(), vec![2.0]);

    renderer.render(&mut scene, 3).await.unwrap();
    assert!(renderer.frame().pixels().all(|p| *p == BLACK));
    assert_eq!(seeks.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn video_seeks_to_trimmed_media_time() {
    let media = SolidMedia::new(10.0, GREEN);
    let seeks = media.seeks.clone();
    let mut scene = Scene::new(10.0);
    scene.add(video(
        media,
        VideoParams {
            duration: None,
            time_offset: 2.0,
            trim_start: 1.0,
            trim_end: 3.0,
        },
    ));

    let mut renderer = Renderer::new(4, 4, 2, fonts()).unwrap();
    // t = 1.5, 2.0, 5.5, 8.0
    for frame in [3, 4, 11, 16] {
        renderer.render(&mut scene, frame).await.unwrap();
    }
    // Visible for t in [2, 8): media time 1.0 and 4.5.
    assert_eq!(*seeks.lock().unwrap(), vec![1.0, 4.5]);
}

#[tokio::test]
async fn export_completes_with_sequential_timestamps() {
    let log = Arc::new(Mutex::new(SinkLog::default()));
    let mut sink = MemorySink::new(log.clone());
    let mut exporter = Exporter::new(settings(30), fonts()).unwrap();
    let mut rx = exporter.subscribe();

    let mut scene = color_scene(2.5, RED);
    let outcome = exporter.export_to(&mut scene, &mut sink).await.unwrap();

    let ExportOutcome::Completed(output) = outcome else {
        panic!("expected completed export");
    };
    assert_eq!(output.mime_type, "video/mp4");
    assert_eq!(output.len(), 8);
    assert_eq!(exporter.state(), ExportState::Completed);

    let log = log.lock().unwrap();
    assert!(log.started && log.finalized && !log.aborted);
    assert_eq!(log.timestamps.len(), 75);
    assert_eq!(log.timestamps[0], 0.0);
    let step = 1.0 / 30.0;
    for pair in log.timestamps.windows(2) {
        assert!(pair[1] > pair[0]);
        assert!(pair[1] - pair[0] <= step + 1e-9);
    }
    assert!(log.durations.iter().all(|d| (d - step).abs() < 1e-12));

    let events = drain(&mut rx);
    assert_eq!(terminal_count(&events), 1);
    assert!(matches!(events.last(), Some(ExportEvent::Complete(_))));
    let progress: Vec<f64> = events
        .iter()
        .filter_map(|e| match e {
            ExportEvent::Progress(p) => Some(p.progress),
            _ => None,
        })
        .collect();
    assert_eq!(progress.len(), 76);
    assert_eq!(progress[0], 0.0);
    assert_eq!(*progress.last().unwrap(), 1.0);
    assert!(progress.windows(2).all(|w| w[1] >= w[0]));
}

#[tokio::test]
async fn cancel_stops_at_frame_boundary() {
    let log = Arc::new(Mutex::new(SinkLog::default()));
    let mut exporter = Exporter::new(settings(10), fonts()).unwrap();
    let mut rx = exporter.subscribe();
    let mut sink = MemorySink::new(log.clone());
    sink.cancel_after = Some((3, exporter.cancel_handle()));

    let mut scene = color_scene(5.0, RED);
    let outcome = exporter.export_to(&mut scene, &mut sink).await.unwrap();

    assert!(matches!(outcome, ExportOutcome::Cancelled));
    assert_eq!(exporter.state(), ExportState::Cancelled);

    let log = log.lock().unwrap();
    // Frame 3 finished; frame 4 never started.
    assert_eq!(log.timestamps.len(), 4);
    assert!(log.aborted);
    assert!(!log.finalized);

    let events = drain(&mut rx);
    assert_eq!(terminal_count(&events), 1);
    assert!(matches!(events.last(), Some(ExportEvent::Cancelled)));
    assert_eq!(events.len(), 5);
}

#[tokio::test]
async fn cancel_before_start_renders_nothing() {
    let log = Arc::new(Mutex::new(SinkLog::default()));
    let mut exporter = Exporter::new(settings(10), fonts()).unwrap();
    exporter.cancel();
    exporter.cancel();

    let mut scene = color_scene(1.0, RED);
    let outcome = exporter
        .export_to(&mut scene, &mut MemorySink::new(log.clone()))
        .await
        .unwrap();
    assert!(matches!(outcome, ExportOutcome::Cancelled));
    assert!(log.lock().unwrap().timestamps.is_empty());

    exporter.reset();
    assert_eq!(exporter.state(), ExportState::Idle);
    let outcome = exporter
        .export_to(&mut scene, &mut MemorySink::new(Arc::default()))
        .await
        .unwrap();
    assert!(matches!(outcome, ExportOutcome::Completed(_)));
}

#[tokio::test]
async fn missing_output_is_a_failed_outcome() {
    let log = Arc::new(Mutex::new(SinkLog::default()));
    let mut sink = MemorySink::new(log.clone());
    sink.output = None;

    let mut exporter = Exporter::new(settings(10), fonts()).unwrap();
    let mut rx = exporter.subscribe();
    let mut scene = color_scene(0.5, RED);
    let outcome = exporter.export_to(&mut scene, &mut sink).await.unwrap();

    assert!(matches!(outcome, ExportOutcome::Failed));
    assert_eq!(exporter.state(), ExportState::Failed);

    let events = drain(&mut rx);
    assert_eq!(terminal_count(&events), 1);
    assert!(matches!(events.last(), Some(ExportEvent::Error(_))));
    assert!(!events.iter().any(|e| matches!(e, ExportEvent::Complete(_))));
}

#[tokio::test]
async fn encoder_error_aborts_and_reports_once() {
    let log = Arc::new(Mutex::new(SinkLog::default()));
    let mut sink = MemorySink::new(log.clone());
    sink.fail_at = Some(2);

    let mut exporter = Exporter::new(settings(10), fonts()).unwrap();
    let mut rx = exporter.subscribe();
    let mut scene = color_scene(1.0, RED);
    let err = exporter.export_to(&mut scene, &mut sink).await.unwrap_err();

    assert!(matches!(err, MontageError::Encode { .. }));
    assert_eq!(exporter.state(), ExportState::Failed);
    {
        let log = log.lock().unwrap();
        assert!(log.aborted);
        assert!(!log.finalized);
        assert_eq!(log.timestamps.len(), 2);
    }

    let events = drain(&mut rx);
    assert_eq!(terminal_count(&events), 1);
    assert!(matches!(events.last(), Some(ExportEvent::Error(msg)) if msg.contains("rejected")));

    // Reuse requires a reset, and the refusal is reported on the channel.
    let again_log = Arc::new(Mutex::new(SinkLog::default()));
    let again = exporter
        .export_to(&mut scene, &mut MemorySink::new(again_log.clone()))
        .await;
    assert!(again.is_err());
    assert!(!again_log.lock().unwrap().started);
    let events = drain(&mut rx);
    assert_eq!(events.len(), 1);
    assert!(matches!(&events[0], ExportEvent::Error(msg) if msg.contains("reset")));
}

#[tokio::test]
async fn seek_failure_fails_the_export() {
    let log = Arc::new(Mutex::new(SinkLog::default()));
    let mut media = SolidMedia::new(5.0, GREEN);
    media.fail = true;
    let mut scene = Scene::new(1.0);
    scene.add(video(media, VideoParams::default()));

    let mut exporter = Exporter::new(settings(10), fonts()).unwrap();
    let mut rx = exporter.subscribe();
    let err = exporter
        .export_to(&mut scene, &mut MemorySink::new(log.clone()))
        .await
        .unwrap_err();

    assert!(matches!(err, MontageError::Media { .. }));
    assert!(log.lock().unwrap().aborted);
    let events = drain(&mut rx);
    assert_eq!(terminal_count(&events), 1);
    assert!(matches!(events.last(), Some(ExportEvent::Error(_))));
}

fn sample_project() -> Project {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("..")
        .join("fixtures")
        .join("sample-project")
        .join("project.json");
    Project::load(path).expect("fixture project should load")
}

#[test]
fn sample_project_builds_with_dangling_media_skipped() {
    let project = sample_project();
    assert!((project.duration() - 7.5).abs() < 1e-9);

    let scene = SceneBuilder::default().build_project(&project);
    let kinds: Vec<_> = scene.root().children().iter().map(Node::kind_name).collect();
    // Main track at the bottom, b-roll over it, titles on top; the dangling
    // b-roll reference and the muted music track produce nothing.
    assert_eq!(kinds, ["video", "video", "text", "timecode"]);
    assert_eq!(scene.frame_count(project.fps), 225);

    let NodeKind::Video(broll) = &scene.root().children()[1].kind else {
        panic!("expected b-roll video");
    };
    assert_eq!(broll.locator(), Some("/media/montage/city.mp4"));
    assert_eq!(broll.params().time_offset, 2.0);

    let NodeKind::Text(title) = &scene.root().children()[2].kind else {
        panic!("expected title text");
    };
    assert_eq!((title.x, title.y), (640.0, 160.0));
    assert_eq!(title.font.weight, 700);
}

#[test]
fn sample_project_validation_reports_dangling_media() {
    let issues = sample_project().validate();
    assert!(issues
        .iter()
        .any(|i| i.contains("references missing media media-deleted")));
}
