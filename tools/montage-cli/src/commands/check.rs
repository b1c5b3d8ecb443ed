//! Check system capabilities.

use montage_common::config::{config_file_path, AppConfig};
use montage_render_engine::media::{tool_version, FfmpegTools};
use montage_render_engine::text::FontBook;

pub async fn run(config: &AppConfig) -> anyhow::Result<()> {
    println!("Montage System Check");
    println!("{}", "=".repeat(50));

    let path = config_file_path();
    if path.exists() {
        println!("[OK] Config: {}", path.display());
    } else {
        println!("[--] Config: {} (not found, using defaults)", path.display());
    }

    let tools = FfmpegTools::from_config(&config.render);
    let mut all_required_ok = true;
    for (name, binary) in [("ffmpeg", &tools.ffmpeg), ("ffprobe", &tools.ffprobe)] {
        match tool_version(binary).await {
            Some(version) => println!("[OK] {name}: {version}"),
            None => {
                all_required_ok = false;
                println!("[FAIL] {name}: not runnable at {}", binary.display());
            }
        }
    }

    match FontBook::from_config(&config.fonts) {
        Ok(fonts) if fonts.is_empty() => {
            println!("[WARN] Fonts: none configured; text and timecode will not be drawn")
        }
        Ok(fonts) => println!("[OK] Fonts: {} face(s) loaded", fonts.len()),
        Err(e) => {
            all_required_ok = false;
            println!("[FAIL] Fonts: {e}");
        }
    }

    println!();
    if all_required_ok {
        println!("All required capabilities are available. Montage is ready.");
    } else {
        println!("Some required capabilities are missing. See above for fixes.");
    }

    Ok(())
}
