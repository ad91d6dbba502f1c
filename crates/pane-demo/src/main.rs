//! pane-demo: headless driver walkthrough
//!
//! Opens a window on the headless window system, uploads a generated
//! gradient into a texture, paints it from the window's draw loop and saves
//! the presented frame as a PNG.
//!
//! Usage: `pane-demo [OUTPUT.png]`. Set `PANE_CONFIG` to a JSON driver
//! configuration to override the defaults.

use anyhow::{Context, Result, bail};
use glam::{IVec2, UVec2};
use pane_driver::pane_gl::{Color, Rect};
use pane_driver::{
    Buffer, DrawOp, DriverConfig, HeadlessWindowSystem, Screen, WindowEvent, WindowOptions,
    WindowSize,
};
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

const FRAME_TIMEOUT: Duration = Duration::from_secs(10);

fn main() -> Result<()> {
    // Initialize logging
    FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .compact()
        .init();

    let output = env::args().nth(1).unwrap_or_else(|| "pane-demo.png".to_string());
    let config = load_config()?;
    info!("pane-demo starting...");

    let platform = Arc::new(HeadlessWindowSystem::new());
    let screen = Screen::new(platform.clone(), config)?;
    let window = screen.new_window(WindowOptions::with_title("pane demo"))?;
    let size = window.size()?;
    info!("Opened {} ({}x{})", window.id(), size.x, size.y);

    let gradient = gradient_buffer(&screen, UVec2::new(64, 64));
    let texture = Arc::new(screen.new_texture_for(&window, gradient.size())?);
    texture.upload(IVec2::ZERO, &gradient, gradient.bounds())?;

    {
        let texture = texture.clone();
        window.set_painter(move |frame| {
            let bounds = frame.bounds();
            frame.clear(Color::from_hex(0x202830));

            // Header band
            let band = Rect::new(0, 0, bounds.max.x, bounds.max.y / 8);
            frame.fill(band, Color::from_hex(0x3c78d8), DrawOp::Src)?;

            // The gradient stretched over the left half, and unscaled on the right
            let left = Rect::new(16, band.max.y + 16, bounds.max.x / 2 - 8, bounds.max.y - 16);
            frame.scale(left, &texture, texture.bounds(), DrawOp::Over)?;
            let right = IVec2::new(bounds.max.x / 2 + 8, band.max.y + 16);
            frame.copy(right, &texture, texture.bounds(), DrawOp::Over)?;

            // Half-transparent overlay
            let overlay = Rect::from_origin_size(right + IVec2::splat(32), UVec2::splat(48));
            frame.fill(overlay, Color::rgba(0.5, 0.0, 0.0, 0.5), DrawOp::Over)
        })?;
    }

    let presented = window.frames_presented()?;
    window.send_draw_request()?;
    wait_for_present(&window, presented)?;

    let frame = platform
        .presented_frame(window.id())
        .context("window presented no frame")?;
    frame
        .save(&output)
        .with_context(|| format!("failed to write {output}"))?;
    info!("Saved {}x{} frame to {}", frame.width(), frame.height(), output);

    // The painter holds the other texture handle
    window.clear_painter()?;
    if let Ok(tex) = Arc::try_unwrap(texture) {
        tex.release();
    }

    window.close()?;
    while let Some(event) = window.next_event() {
        if let WindowEvent::DrawFailed(reason) = event {
            warn!("A draw failed: {}", reason);
        }
    }
    info!("pane-demo shutting down");
    Ok(())
}

fn load_config() -> Result<DriverConfig> {
    match env::var("PANE_CONFIG") {
        Ok(path) => {
            info!("Loading configuration from {}", path);
            Ok(DriverConfig::from_json_file(&path)?)
        }
        Err(_) => Ok(DriverConfig {
            default_window_size: WindowSize::new(320, 240),
            ..DriverConfig::default()
        }),
    }
}

/// Opaque red-to-blue gradient, brightening downwards.
fn gradient_buffer(screen: &Screen, size: UVec2) -> Buffer {
    let mut buf = screen.new_buffer(size);
    for y in 0..size.y {
        for x in 0..size.x {
            let t = x as f32 / (size.x - 1).max(1) as f32;
            let v = y as f32 / (size.y - 1).max(1) as f32;
            let color = Color::rgb(1.0 - t, v * 0.6, t);
            buf.set_pixel(IVec2::new(x as i32, y as i32), color);
        }
    }
    buf
}

fn wait_for_present(window: &pane_driver::Window, before: u64) -> Result<()> {
    let deadline = std::time::Instant::now() + FRAME_TIMEOUT;
    while window.frames_presented()? <= before {
        if let Some(WindowEvent::DrawFailed(reason)) = window.try_next_event() {
            bail!("draw failed: {reason}");
        }
        if std::time::Instant::now() >= deadline {
            bail!("no frame presented within {:?}", FRAME_TIMEOUT);
        }
        window.wait_drawn(Duration::from_millis(20))?;
    }
    Ok(())
}
