use image::imageops::FilterType;
use image::{DynamicImage, Rgba, RgbaImage};

use crate::printer::JobState;

const BAR_BACKGROUND: Rgba<u8> = Rgba([0, 0, 0, 255]);
const BAR_BUILDING: Rgba<u8> = Rgba([76, 175, 80, 255]);
const BAR_SUSPENDED: Rgba<u8> = Rgba([255, 193, 7, 255]);
const BAR_COMPLETED: Rgba<u8> = Rgba([33, 150, 243, 255]);
const BAR_OTHER: Rgba<u8> = Rgba([158, 158, 158, 255]);

/// Job progress drawn onto a frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Overlay {
    /// Percent, 0-100.
    pub progress: f64,
    pub state: JobState,
}

/// Rescales frames and draws the progress overlay.
#[derive(Debug, Clone, Copy)]
pub struct FrameProcessor {
    scale: f64,
    annotate: bool,
}

impl FrameProcessor {
    pub fn new(scale: f64, keep_original: bool) -> Self {
        Self {
            scale,
            annotate: !keep_original,
        }
    }

    pub fn process(&self, frame: DynamicImage, overlay: Option<&Overlay>) -> RgbaImage {
        let frame = self.rescale(frame);
        let mut rgba = frame.into_rgba8();

        if self.annotate {
            if let Some(overlay) = overlay {
                draw_progress_bar(&mut rgba, overlay);
            }
        }

        rgba
    }

    fn rescale(&self, frame: DynamicImage) -> DynamicImage {
        if (self.scale - 1.0).abs() < f64::EPSILON {
            return frame;
        }

        let width = ((frame.width() as f64 * self.scale).round() as u32).max(1);
        let height = ((frame.height() as f64 * self.scale).round() as u32).max(1);
        frame.resize_exact(width, height, FilterType::Triangle)
    }
}

fn bar_color(state: JobState) -> Rgba<u8> {
    match state {
        JobState::Building => BAR_BUILDING,
        JobState::Completed => BAR_COMPLETED,
        s if s.is_suspended() => BAR_SUSPENDED,
        _ => BAR_OTHER,
    }
}

/// Bottom strip: dark track with the filled share in the state color.
fn draw_progress_bar(image: &mut RgbaImage, overlay: &Overlay) {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return;
    }

    let bar_height = (height / 30).max(4).min(height);
    let top = height - bar_height;
    let fraction = (overlay.progress / 100.0).clamp(0.0, 1.0);
    let filled = (width as f64 * fraction).round() as u32;
    let color = bar_color(overlay.state);

    for y in top..height {
        for x in 0..width {
            let pixel = if x < filled { color } else { BAR_BACKGROUND };
            image.put_pixel(x, y, pixel);
        }
    }
}
