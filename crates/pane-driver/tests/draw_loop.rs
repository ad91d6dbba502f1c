//! Per-window draw loops: coalescing, presenting, resizing, shutdown.

mod common;

use common::{TIMEOUT, headless, wait_until};
use crossbeam_channel::{RecvTimeoutError, unbounded};
use glam::{Affine2, IVec2, UVec2, Vec2};
use image::RgbaImage;
use pane_driver::pane_gl::{Color, Rect};
use pane_driver::{
    DrawOp, DriverError, Frame, HeadlessWindowSystem, PumpState, Window, WindowEvent,
    WindowOptions,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

const RED: [u8; 4] = [255, 0, 0, 255];
const BLUE: [u8; 4] = [0, 0, 255, 255];

/// Wait out the draw triggered by the window being mapped.
fn settle(window: &Window) {
    assert!(wait_until(TIMEOUT, || window.frames_drawn().unwrap() >= 1));
    assert!(wait_until(TIMEOUT, || window.frames_presented().unwrap() >= 1));
}

fn assert_red_square(image: &RgbaImage, square: Rect, elsewhere: [u8; 4]) {
    for (x, y, px) in image.enumerate_pixels() {
        let expected = if square.contains(IVec2::new(x as i32, y as i32)) {
            RED
        } else {
            elsewhere
        };
        assert_eq!(px.0, expected, "pixel ({x}, {y})");
    }
}

#[test]
fn test_draw_requests_coalesce_while_drawing() {
    let (_platform, screen) = headless(8, 8);
    let window = screen.new_window(WindowOptions::default()).unwrap();
    settle(&window);

    let draws = Arc::new(AtomicUsize::new(0));
    let (entered_tx, entered_rx) = unbounded();
    let (release_tx, release_rx) = unbounded::<()>();
    {
        let draws = draws.clone();
        window
            .set_painter(move |_frame| {
                draws.fetch_add(1, Ordering::SeqCst);
                let _ = entered_tx.send(());
                let _ = release_rx.recv_timeout(TIMEOUT);
                Ok(())
            })
            .unwrap();
    }

    window.send_draw_request().unwrap();
    entered_rx.recv_timeout(TIMEOUT).unwrap();

    // The painter is blocked; only the first of these stays pending
    let accepted = (0..10)
        .filter(|_| window.send_draw_request().unwrap())
        .count();
    assert_eq!(accepted, 1);

    release_tx.send(()).unwrap();
    entered_rx.recv_timeout(TIMEOUT).unwrap();
    release_tx.send(()).unwrap();

    assert!(wait_until(TIMEOUT, || window.frames_drawn().unwrap() == 3));
    thread::sleep(Duration::from_millis(50));
    assert_eq!(draws.load(Ordering::SeqCst), 2);
    assert!(entered_rx.try_recv().is_err());
}

#[test]
fn test_request_after_draw_is_not_lost() {
    let (_platform, screen) = headless(8, 8);
    let window = screen.new_window(WindowOptions::default()).unwrap();
    settle(&window);

    for expected in 2..5 {
        window.send_draw_request().unwrap();
        assert!(wait_until(TIMEOUT, || window.frames_drawn().unwrap() == expected));
    }
}

#[test]
fn test_draws_run_on_named_loop_thread() {
    let (_platform, screen) = headless(8, 8);
    let window = screen.new_window(WindowOptions::default()).unwrap();
    settle(&window);

    let (name_tx, name_rx) = unbounded();
    window
        .set_painter(move |_frame| {
            let _ = name_tx.send(thread::current().name().map(str::to_string));
            Ok(())
        })
        .unwrap();
    window.send_draw_request().unwrap();

    let name = name_rx.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(name, Some(format!("draw-loop-{}", window.id().0)));
}

#[test]
fn test_painted_frame_is_presented() {
    let (platform, screen) = headless(4, 4);
    let window = screen.new_window(WindowOptions::default()).unwrap();
    settle(&window);

    let tex = Arc::new(screen.new_texture(UVec2::new(4, 4)).unwrap());
    let mut buf = screen.new_buffer(UVec2::new(2, 2));
    buf.fill(buf.bounds(), Color::RED);
    tex.upload(IVec2::new(1, 1), &buf, buf.bounds()).unwrap();

    {
        let tex = tex.clone();
        window
            .set_painter(move |frame| {
                frame.clear(Color::BLUE);
                frame.draw(Affine2::IDENTITY, &tex, tex.bounds(), DrawOp::Over)
            })
            .unwrap();
    }
    let presented = window.frames_presented().unwrap();
    window.send_draw_request().unwrap();
    assert!(wait_until(TIMEOUT, || window.frames_presented().unwrap() > presented));

    let frame = platform.presented_frame(window.id()).unwrap();
    assert_red_square(&frame, Rect::new(1, 1, 3, 3), BLUE);
}

/// Install `painter`, request a frame and return what was presented.
fn present_with<F>(platform: &HeadlessWindowSystem, window: &Window, painter: F) -> RgbaImage
where
    F: FnMut(&mut Frame<'_, '_>) -> pane_driver::Result<()> + Send + 'static,
{
    window.set_painter(painter).unwrap();
    let presented = window.frames_presented().unwrap();
    window.send_draw_request().unwrap();
    assert!(wait_until(TIMEOUT, || window.frames_presented().unwrap() > presented));
    platform.presented_frame(window.id()).unwrap()
}

#[test]
fn test_frame_copy_and_scale() {
    let (platform, screen) = headless(4, 4);
    let window = screen.new_window(WindowOptions::default()).unwrap();
    settle(&window);

    let square = Arc::new(screen.new_texture(UVec2::new(4, 4)).unwrap());
    let solid = Arc::new(screen.new_texture(UVec2::new(2, 2)).unwrap());
    let mut buf = screen.new_buffer(UVec2::new(2, 2));
    buf.fill(buf.bounds(), Color::RED);
    square.upload(IVec2::new(1, 1), &buf, buf.bounds()).unwrap();
    solid.upload(IVec2::ZERO, &buf, buf.bounds()).unwrap();

    // Unscaled copy of the red block to the top-right corner
    let frame = {
        let square = square.clone();
        present_with(&platform, &window, move |frame| {
            frame.clear(Color::BLUE);
            frame.copy(IVec2::new(2, 0), &square, Rect::new(1, 1, 3, 3), DrawOp::Over)
        })
    };
    assert_red_square(&frame, Rect::new(2, 0, 4, 2), BLUE);

    // The 2x2 texture stretched over the top half
    let frame = {
        let solid = solid.clone();
        present_with(&platform, &window, move |frame| {
            frame.clear(Color::BLUE);
            frame.scale(Rect::new(0, 0, 4, 2), &solid, solid.bounds(), DrawOp::Src)
        })
    };
    assert_red_square(&frame, Rect::new(0, 0, 4, 2), BLUE);
}

#[test]
fn test_publish_presents_once_per_signal() {
    let (platform, screen) = headless(4, 4);
    let window = screen.new_window(WindowOptions::default()).unwrap();
    settle(&window);

    let before = platform.present_count(window.id());
    assert!(window.publish().unwrap());
    assert!(wait_until(TIMEOUT, || platform.present_count(window.id()) == before + 1));

    thread::sleep(Duration::from_millis(50));
    assert_eq!(platform.present_count(window.id()), before + 1);
    assert_eq!(window.frames_presented().unwrap(), before + 1);
}

#[test]
fn test_uploaded_square_draws_at_transformed_location() {
    let (_platform, screen) = headless(4, 4);
    let window = screen.new_window(WindowOptions::default()).unwrap();
    settle(&window);

    let tex = screen.new_texture(UVec2::new(4, 4)).unwrap();
    let mut buf = screen.new_buffer(UVec2::new(2, 2));
    buf.fill(buf.bounds(), Color::RED);
    tex.upload(IVec2::new(1, 1), &buf, buf.bounds()).unwrap();

    let full = window.bounds().unwrap();
    window.fill(full, Color::BLUE, DrawOp::Src).unwrap();
    window
        .draw(Affine2::IDENTITY, &tex, tex.bounds(), DrawOp::Over)
        .unwrap();
    assert_red_square(&window.read_pixels(full).unwrap(), Rect::new(1, 1, 3, 3), BLUE);

    // Only the red part, shifted one pixel right and down
    window.fill(full, Color::BLUE, DrawOp::Src).unwrap();
    window
        .draw(
            Affine2::from_translation(Vec2::new(1.0, 1.0)),
            &tex,
            Rect::new(1, 1, 3, 3),
            DrawOp::Over,
        )
        .unwrap();
    assert_red_square(&window.read_pixels(full).unwrap(), Rect::new(2, 2, 4, 4), BLUE);
}

#[test]
fn test_window_upload_copies_buffer() {
    let (_platform, screen) = headless(4, 4);
    let window = screen.new_window(WindowOptions::default()).unwrap();
    settle(&window);

    let mut buf = screen.new_buffer(UVec2::new(3, 3));
    buf.fill(Rect::new(1, 1, 3, 3), Color::RED);

    window
        .fill(window.bounds().unwrap(), Color::BLUE, DrawOp::Src)
        .unwrap();
    window
        .upload(IVec2::new(0, 0), &buf, Rect::new(1, 1, 3, 3))
        .unwrap();

    let image = window.read_pixels(window.bounds().unwrap()).unwrap();
    assert_red_square(&image, Rect::new(0, 0, 2, 2), BLUE);
}

#[test]
fn test_read_empty_rect_returns_empty_image() {
    let (_platform, screen) = headless(4, 4);
    let window = screen.new_window(WindowOptions::default()).unwrap();
    settle(&window);

    for rect in [Rect::new(100, 0, 100, 4), Rect::new(0, 2, 4, 2)] {
        let image = window.read_pixels(rect).unwrap();
        assert!(image.as_raw().is_empty(), "{rect:?}");
    }
    assert!(window.read_pixels(Rect::new(0, 0, 5, 4)).is_err());
}

#[test]
fn test_wait_drawn_waits_for_a_new_frame() {
    let (_platform, screen) = headless(4, 4);
    let window = screen.new_window(WindowOptions::default()).unwrap();
    settle(&window);
    assert_eq!(window.next_event_timeout(TIMEOUT), Some(WindowEvent::Mapped));
    assert!(wait_until(TIMEOUT, || window.pump_state().unwrap() == PumpState::Idle));

    // Earlier frames do not count
    assert!(!window.wait_drawn(Duration::from_millis(50)).unwrap());

    let drawn = window.frames_drawn().unwrap();
    window.send_draw_request().unwrap();
    assert!(window.wait_drawn_since(drawn, TIMEOUT).unwrap());
    assert_eq!(window.frames_drawn().unwrap(), drawn + 1);
}

#[test]
fn test_resize_redraws_at_new_size() {
    let (platform, screen) = headless(4, 4);
    let window = screen.new_window(WindowOptions::default()).unwrap();
    settle(&window);

    let (size_tx, size_rx) = unbounded();
    window
        .set_painter(move |frame| {
            let _ = size_tx.send(frame.size());
            Ok(())
        })
        .unwrap();

    platform.resize(window.id(), UVec2::new(6, 2)).unwrap();

    assert_eq!(size_rx.recv_timeout(TIMEOUT).unwrap(), UVec2::new(6, 2));
    assert_eq!(window.size().unwrap(), UVec2::new(6, 2));
    assert!(wait_until(TIMEOUT, || {
        platform
            .presented_frame(window.id())
            .is_some_and(|f| f.dimensions() == (6, 2))
    }));
}

#[test]
fn test_paint_event_triggers_draw() {
    let (platform, screen) = headless(4, 4);
    let window = screen.new_window(WindowOptions::default()).unwrap();
    settle(&window);

    platform.request_paint(window.id());
    assert!(wait_until(TIMEOUT, || window.frames_drawn().unwrap() >= 2));

    let mut seen = Vec::new();
    while let Some(event) = window.next_event_timeout(TIMEOUT) {
        let paint = event == WindowEvent::Paint;
        seen.push(event);
        if paint {
            break;
        }
    }
    assert_eq!(seen, vec![WindowEvent::Mapped, WindowEvent::Paint]);
}

#[test]
fn test_painter_error_is_reported() {
    let (_platform, screen) = headless(4, 4);
    let window = screen.new_window(WindowOptions::default()).unwrap();
    settle(&window);
    while window.try_next_event().is_some() {}

    window
        .set_painter(|_frame| Err(DriverError::InvalidSize { width: 0, height: 0 }))
        .unwrap();
    window.send_draw_request().unwrap();

    let event = window.next_event_timeout(TIMEOUT).unwrap();
    assert!(matches!(event, WindowEvent::DrawFailed(msg) if msg.contains("0x0")));
    assert_eq!(window.frames_drawn().unwrap(), 1);
}

#[test]
fn test_close_stops_draw_loop() {
    let (_platform, screen) = headless(4, 4);
    let window = screen.new_window(WindowOptions::default()).unwrap();
    settle(&window);

    // The painter lives exactly as long as the window's draw loop state
    let (alive_tx, alive_rx) = unbounded::<()>();
    window
        .set_painter(move |_frame| {
            let _alive = &alive_tx;
            Ok(())
        })
        .unwrap();

    window.close().unwrap();

    assert_eq!(
        alive_rx.recv_timeout(TIMEOUT),
        Err(RecvTimeoutError::Disconnected)
    );
}

#[test]
fn test_close_from_painter_does_not_deadlock() {
    let (platform, screen) = headless(4, 4);
    let window = screen.new_window(WindowOptions::default()).unwrap();
    settle(&window);

    let handle = window.clone();
    window
        .set_painter(move |_frame| {
            let _ = handle.close();
            Ok(())
        })
        .unwrap();
    window.send_draw_request().unwrap();

    assert!(wait_until(TIMEOUT, || !window.is_open()));
    assert!(wait_until(TIMEOUT, || !platform.is_open(window.id())));
}
