//! Show project information.

use std::path::PathBuf;

use serde::Serialize;

use montage_project_model::timeline::TimelineElement;

use super::load_project;

#[derive(Serialize)]
struct ProjectSummary<'a> {
    name: &'a str,
    id: &'a str,
    width: u32,
    height: u32,
    fps: u32,
    duration_secs: f64,
    total_frames: u64,
    format: &'a str,
    bitrate: u64,
    tracks: Vec<TrackSummary<'a>>,
    media_items: usize,
    issues: Vec<String>,
}

#[derive(Serialize)]
struct TrackSummary<'a> {
    name: &'a str,
    kind: String,
    elements: usize,
    muted: bool,
    main: bool,
}

pub fn run(path: PathBuf, json: bool) -> anyhow::Result<()> {
    let p = load_project(&path)?;

    let duration = p.duration();
    let summary = ProjectSummary {
        name: &p.name,
        id: &p.id,
        width: p.canvas_size.width,
        height: p.canvas_size.height,
        fps: p.fps,
        duration_secs: duration,
        total_frames: montage_render_engine::scene::frame_count(duration, p.fps),
        format: p.export.format.extension(),
        bitrate: p.export.bitrate,
        tracks: p
            .tracks
            .iter()
            .map(|t| TrackSummary {
                name: &t.name,
                kind: format!("{:?}", t.track_type).to_lowercase(),
                elements: t.elements.len(),
                muted: t.muted,
                main: t.is_main,
            })
            .collect(),
        media_items: p.media_items.len(),
        issues: p.validate(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("Project: {}", p.name);
    println!("  ID: {}", p.id);
    println!("  Created: {}", p.created_at);
    println!("  Modified: {}", p.modified_at);
    println!();

    println!("Canvas:");
    println!(
        "  Resolution: {}x{} @ {}fps",
        summary.width, summary.height, summary.fps
    );
    println!(
        "  Duration: {:.2}s ({} frames)",
        summary.duration_secs, summary.total_frames
    );
    println!();

    println!("Tracks (top to bottom):");
    for track in &p.tracks {
        println!(
            "  {} [{:?}]{}{}",
            track.name,
            track.track_type,
            if track.is_main { " (main)" } else { "" },
            if track.muted { " (muted)" } else { "" }
        );
        for element in &track.elements {
            let label = match element {
                TimelineElement::Media(m) => format!("media {}", m.media_id),
                TimelineElement::Text(t) => format!("text {:?}", t.content),
            };
            println!(
                "    {:>7.2}s - {:>7.2}s  {}",
                element.start_time(),
                element.end_time(),
                label
            );
        }
    }
    println!();

    println!("Media items: {}", summary.media_items);
    println!();

    println!("Export config:");
    println!("  Format: {:?}", p.export.format);
    println!("  Bitrate: {} bit/s", p.export.bitrate);

    if !summary.issues.is_empty() {
        println!();
        println!("Issues:");
        for issue in &summary.issues {
            println!("  [WARN] {issue}");
        }
    }

    Ok(())
}
