//! Overlay drawn on frames sent to display consumers.

use image::{Rgb, RgbImage};
use imageproc::{
    drawing::{draw_filled_circle_mut, draw_hollow_rect_mut},
    rect::Rect,
};

use crate::fusion::{FusionReport, Presentation, TrackedTarget};

pub const RECONFIRMED_COLOR: Rgb<u8> = Rgb([0, 0, 255]);
pub const WARM_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
pub const COOLING_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const IDLE_COLOR: Rgb<u8> = Rgb([255, 200, 0]);

const GLYPH_ADVANCE: i32 = 6;
const GLYPH_HEIGHT: i32 = 7;

/// Draw the target box and status text for `report` onto `frame`.
pub fn annotate(frame: &mut RgbImage, report: &FusionReport) {
    if let Some(target) = &report.target {
        draw_target(frame, target);
    }

    let (status, color) = match &report.target {
        Some(target) => (
            format!(
                "TRACKING {:.1}/{:.1}S",
                target.time_since_detection, report.timeout_seconds
            ),
            presentation_color(target.presentation),
        ),
        None => ("WAITING FOR TARGET".to_string(), IDLE_COLOR),
    };
    draw_text_block(frame, 4, 4, &status, color);

    let footer = format!("FRAME {:06}  FPS {:4.1}", report.frame_index, report.fps);
    let footer_width = text_width(&footer);
    let x = (frame.width() as i32 - footer_width - 6).max(0);
    let y = (frame.height() as i32 - GLYPH_HEIGHT - 6).max(0);
    draw_text_block(frame, x, y, &footer, TEXT_COLOR);
}

pub fn presentation_color(presentation: Presentation) -> Rgb<u8> {
    match presentation {
        Presentation::Reconfirmed => RECONFIRMED_COLOR,
        Presentation::Warm => WARM_COLOR,
        Presentation::Cooling { .. } => COOLING_COLOR,
    }
}

pub fn target_label(target: &TrackedTarget) -> String {
    match target.presentation {
        Presentation::Reconfirmed => format!("DET {} {:.2}", target.class, target.confidence),
        Presentation::Warm => format!("TRK {}", target.class),
        Presentation::Cooling { remaining } => format!("TRK [{remaining:.1}S]"),
    }
}

fn draw_target(frame: &mut RgbImage, target: &TrackedTarget) {
    let color = presentation_color(target.presentation);
    let thickness = match target.presentation {
        Presentation::Reconfirmed => 3,
        _ => 2,
    };
    let bbox = target.bbox;
    for inset in 0..thickness {
        let width = bbox.width() - 2 * inset;
        let height = bbox.height() - 2 * inset;
        if width <= 0 || height <= 0 {
            break;
        }
        let rect = Rect::at(bbox.x1 + inset, bbox.y1 + inset).of_size(width as u32, height as u32);
        draw_hollow_rect_mut(frame, rect, color);
    }
    draw_filled_circle_mut(frame, target.center, 4, color);

    let label_y = (bbox.y1 - GLYPH_HEIGHT - 6).max(0);
    draw_text_block(frame, bbox.x1.max(0), label_y, &target_label(target), color);
}

/// Text on a darkened backdrop.
fn draw_text_block(frame: &mut RgbImage, x: i32, y: i32, text: &str, color: Rgb<u8>) {
    shade(frame, x - 2, y - 2, text_width(text) + 3, GLYPH_HEIGHT + 4);
    draw_text(frame, x, y, text, color);
}

fn text_width(text: &str) -> i32 {
    text.chars().count() as i32 * GLYPH_ADVANCE
}

fn shade(frame: &mut RgbImage, x: i32, y: i32, width: i32, height: i32) {
    let (frame_w, frame_h) = (frame.width() as i32, frame.height() as i32);
    for py in y.max(0)..(y + height).min(frame_h) {
        for px in x.max(0)..(x + width).min(frame_w) {
            let pixel = frame.get_pixel_mut(px as u32, py as u32);
            for channel in pixel.0.iter_mut() {
                *channel /= 3;
            }
        }
    }
}

fn draw_text(frame: &mut RgbImage, x: i32, y: i32, text: &str, color: Rgb<u8>) {
    let (frame_w, frame_h) = (frame.width() as i32, frame.height() as i32);
    let mut cursor = x;
    for ch in text.chars().flat_map(char::to_uppercase) {
        if let Some(rows) = glyph(ch) {
            for (row, bits) in rows.iter().enumerate() {
                let py = y + row as i32;
                if !(0..frame_h).contains(&py) {
                    continue;
                }
                for col in 0..5 {
                    let px = cursor + col;
                    if bits >> (4 - col) & 1 == 1 && (0..frame_w).contains(&px) {
                        frame.put_pixel(px as u32, py as u32, color);
                    }
                }
            }
        }
        cursor += GLYPH_ADVANCE;
    }
}

/// 5x7 bitmap glyphs, one byte per row, most significant of the low five bits
/// on the left.
fn glyph(ch: char) -> Option<[u8; 7]> {
    let rows = match ch {
        'A' => [0x0E, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'B' => [0x1E, 0x11, 0x11, 0x1E, 0x11, 0x11, 0x1E],
        'C' => [0x0E, 0x11, 0x10, 0x10, 0x10, 0x11, 0x0E],
        'D' => [0x1C, 0x12, 0x11, 0x11, 0x11, 0x12, 0x1C],
        'E' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x1F],
        'F' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x10],
        'G' => [0x0E, 0x11, 0x10, 0x17, 0x11, 0x11, 0x0F],
        'H' => [0x11, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'I' => [0x0E, 0x04, 0x04, 0x04, 0x04, 0x04, 0x0E],
        'J' => [0x07, 0x02, 0x02, 0x02, 0x02, 0x12, 0x0C],
        'K' => [0x11, 0x12, 0x14, 0x18, 0x14, 0x12, 0x11],
        'L' => [0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x1F],
        'M' => [0x11, 0x1B, 0x15, 0x15, 0x11, 0x11, 0x11],
        'N' => [0x11, 0x11, 0x19, 0x15, 0x13, 0x11, 0x11],
        'O' => [0x0E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'P' => [0x1E, 0x11, 0x11, 0x1E, 0x10, 0x10, 0x10],
        'Q' => [0x0E, 0x11, 0x11, 0x11, 0x15, 0x12, 0x0D],
        'R' => [0x1E, 0x11, 0x11, 0x1E, 0x14, 0x12, 0x11],
        'S' => [0x0F, 0x10, 0x10, 0x0E, 0x01, 0x01, 0x1E],
        'T' => [0x1F, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04],
        'U' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'V' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x0A, 0x04],
        'W' => [0x11, 0x11, 0x11, 0x15, 0x15, 0x15, 0x0A],
        'X' => [0x11, 0x11, 0x0A, 0x04, 0x0A, 0x11, 0x11],
        'Y' => [0x11, 0x11, 0x0A, 0x04, 0x04, 0x04, 0x04],
        'Z' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x10, 0x1F],
        '0' => [0x0E, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0E],
        '1' => [0x04, 0x0C, 0x04, 0x04, 0x04, 0x04, 0x0E],
        '2' => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x08, 0x1F],
        '3' => [0x1E, 0x01, 0x01, 0x0E, 0x01, 0x01, 0x1E],
        '4' => [0x02, 0x06, 0x0A, 0x12, 0x1F, 0x02, 0x02],
        '5' => [0x1F, 0x10, 0x1E, 0x01, 0x01, 0x11, 0x0E],
        '6' => [0x06, 0x08, 0x10, 0x1E, 0x11, 0x11, 0x0E],
        '7' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08],
        '8' => [0x0E, 0x11, 0x11, 0x0E, 0x11, 0x11, 0x0E],
        '9' => [0x0E, 0x11, 0x11, 0x0F, 0x01, 0x02, 0x0C],
        '.' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x0C, 0x0C],
        ':' => [0x00, 0x0C, 0x0C, 0x00, 0x0C, 0x0C, 0x00],
        '-' => [0x00, 0x00, 0x00, 0x1F, 0x00, 0x00, 0x00],
        '_' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x1F],
        '/' => [0x01, 0x02, 0x02, 0x04, 0x08, 0x08, 0x10],
        '[' => [0x0E, 0x08, 0x08, 0x08, 0x08, 0x08, 0x0E],
        ']' => [0x0E, 0x02, 0x02, 0x02, 0x02, 0x02, 0x0E],
        '%' => [0x11, 0x12, 0x04, 0x08, 0x12, 0x11, 0x00],
        ' ' => [0x00; 7],
        _ => return None,
    };
    Some(rows)
}
