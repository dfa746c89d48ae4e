//! Webcam overlay compositor
//!
//! Without a webcam the screen track passes through untouched. With one, a
//! draw loop paints the screen frame and the mirrored webcam frame onto a
//! canvas at the session fps and publishes the result as a new track.

use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::canvas::{Canvas, Rect};
use crate::capture::{video_track, OwnedVideoTrack, VideoFeed, VideoFrame, VideoTrack};
use crate::recorder::settings::{WebcamOverlay, WebcamPosition};
use crate::utils::CancelToken;

/// Gap between the overlay and the canvas edges
pub const WEBCAM_PADDING: i32 = 30;

/// Where the webcam overlay lands on a canvas of the given size
pub fn webcam_region(canvas_width: u32, canvas_height: u32, overlay: &WebcamOverlay) -> Rect {
    let size = (canvas_width as f32 * overlay.size_percent / 100.0).round() as u32;
    let size = size.clamp(1, canvas_width.min(canvas_height).max(1));

    let right = canvas_width as i32 - size as i32 - WEBCAM_PADDING;
    let bottom = canvas_height as i32 - size as i32 - WEBCAM_PADDING;
    let (x, y) = match overlay.position {
        WebcamPosition::TopLeft => (WEBCAM_PADDING, WEBCAM_PADDING),
        WebcamPosition::TopRight => (right, WEBCAM_PADDING),
        WebcamPosition::BottomLeft => (WEBCAM_PADDING, bottom),
        WebcamPosition::BottomRight => (right, bottom),
    };

    Rect { x, y, size }
}

/// Paint one composite frame
pub fn render_frame(
    canvas: &mut Canvas,
    screen: &VideoFrame,
    webcam: Option<&VideoFrame>,
    overlay: &WebcamOverlay,
) {
    canvas.draw_fill(screen);

    if let Some(webcam) = webcam {
        let region = webcam_region(canvas.width(), canvas.height(), overlay);
        canvas.draw_shadow(region, overlay.shape);
        canvas.draw_mirrored(webcam, region, overlay.shape);
        canvas.draw_border(region, overlay.shape);
    }
}

/// Running draw loop and the composite track it owns
pub struct DrawLoop {
    cancel: CancelToken,
    handle: JoinHandle<()>,
    track: OwnedVideoTrack,
}

impl DrawLoop {
    /// Cancel the loop, wait for it to exit and end the composite track
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            tracing::warn!("Compositor draw loop ended abnormally: {}", e);
        }
        self.track.stop();
        tracing::debug!("Compositor stopped");
    }
}

/// Result of [`compose`]
pub struct CompositeOutput {
    pub track: VideoTrack,
    /// Present only when a webcam is overlaid
    pub draw_loop: Option<DrawLoop>,
}

/// Overlay `webcam` on `screen`, or return `screen` itself when there is no webcam
pub fn compose(
    screen: &VideoTrack,
    webcam: Option<&VideoTrack>,
    overlay: WebcamOverlay,
    fps: u32,
) -> CompositeOutput {
    let Some(webcam) = webcam else {
        return CompositeOutput {
            track: screen.clone(),
            draw_loop: None,
        };
    };

    let (track, feed) = video_track("composite");
    let cancel = CancelToken::new();
    let handle = tokio::spawn(draw_loop(
        screen.clone(),
        webcam.clone(),
        feed,
        overlay,
        fps.max(1),
        cancel.clone(),
    ));

    tracing::info!("Compositing webcam over {} at {}fps", screen.label(), fps);

    CompositeOutput {
        track: track.handle(),
        draw_loop: Some(DrawLoop {
            cancel,
            handle,
            track,
        }),
    }
}

async fn draw_loop(
    screen: VideoTrack,
    webcam: VideoTrack,
    feed: VideoFeed,
    overlay: WebcamOverlay,
    fps: u32,
    cancel: CancelToken,
) {
    let mut ticker = tokio::time::interval(Duration::from_secs_f64(1.0 / fps as f64));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let started = Instant::now();
    let mut canvas: Option<Canvas> = None;

    loop {
        ticker.tick().await;
        if cancel.is_cancelled() || screen.is_ended() {
            break;
        }

        let Some(frame) = screen.latest() else {
            continue;
        };
        let canvas = canvas.get_or_insert_with(|| {
            tracing::debug!("Composite canvas {}x{}", frame.width, frame.height);
            Canvas::new(frame.width, frame.height)
        });

        let webcam_frame = webcam.latest();
        render_frame(canvas, &frame, webcam_frame.as_deref(), &overlay);

        if !feed.push(canvas.snapshot(started.elapsed().as_millis() as u64)) {
            break;
        }
    }

    feed.end();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::settings::WebcamShape;

    #[test]
    fn test_webcam_region_corners() {
        let overlay = |position| WebcamOverlay {
            position,
            size_percent: 15.0,
            shape: WebcamShape::Circle,
        };

        let r = webcam_region(1920, 1080, &overlay(WebcamPosition::BottomRight));
        assert_eq!(r, Rect { x: 1602, y: 762, size: 288 });

        let r = webcam_region(1920, 1080, &overlay(WebcamPosition::TopLeft));
        assert_eq!((r.x, r.y), (30, 30));

        let r = webcam_region(1920, 1080, &overlay(WebcamPosition::TopRight));
        assert_eq!((r.x, r.y), (1602, 30));

        let r = webcam_region(1920, 1080, &overlay(WebcamPosition::BottomLeft));
        assert_eq!((r.x, r.y), (30, 762));
    }

    #[test]
    fn test_compose_without_webcam_is_identity() {
        let (screen, _feed) = video_track("screen:0");
        let output = compose(&screen.handle(), None, WebcamOverlay::default(), 30);
        assert!(output.track.same_track(&screen.handle()));
        assert!(output.draw_loop.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_compose_with_webcam_publishes_new_track() {
        let (screen, screen_feed) = video_track("screen:0");
        let (webcam, webcam_feed) = video_track("webcam");
        screen_feed.push(VideoFrame::solid(400, 300, [0, 255, 0, 255]));
        webcam_feed.push(VideoFrame::solid(64, 48, [255, 0, 0, 255]));

        let overlay = WebcamOverlay {
            position: WebcamPosition::TopLeft,
            size_percent: 25.0,
            shape: WebcamShape::Square,
        };
        let output = compose(&screen.handle(), Some(&webcam.handle()), overlay, 10);
        assert!(!output.track.same_track(&screen.handle()));

        let mut rx = output.track.subscribe().unwrap();
        rx.changed().await.unwrap();
        let frame = rx.borrow_and_update().clone().unwrap();
        assert_eq!((frame.width, frame.height), (400, 300));
        // Region is 100px at (30, 30)
        assert_eq!(frame.pixel(80, 80), [255, 0, 0, 255]);
        assert_eq!(frame.pixel(300, 250), [0, 255, 0, 255]);

        let track = output.track.clone();
        output.draw_loop.unwrap().stop().await;
        assert!(track.is_ended());
        assert!(!screen.is_ended());
    }
}
