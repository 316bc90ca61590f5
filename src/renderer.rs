// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 叠加层渲染 (纯函数)
//!
//! 先把整个图层清成全透明, 再为每条轨迹画框和 "ID: n" 标签。

use ab_glyph::{FontArc, PxScale};
use image::{Rgba, RgbaImage};
use imageproc::drawing::{
    draw_filled_circle_mut, draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut,
};
use imageproc::rect::Rect;
use serde::{Deserialize, Serialize};

use crate::detection::tracker::id_to_color;
use crate::detection::types::TrackBox;

const TRANSPARENT: Rgba<u8> = Rgba([0, 0, 0, 0]);

/// 叠加层样式
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayStyle {
    pub stroke_color: [u8; 4], // 框颜色 (RGBA)
    pub line_width: u32,       // 线宽
    pub per_id_colors: bool,   // 每个ID不同颜色
    pub label_background: [u8; 4],
    pub label_width: u32,
    pub label_height: u32,
    pub font_size: f32,
    pub center_dot: bool, // 在框中心画白点
    pub center_dot_radius: i32,
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self {
            stroke_color: [0, 255, 0, 255],
            line_width: 2,
            per_id_colors: false,
            label_background: [0, 0, 0, 255],
            label_width: 60,
            label_height: 20,
            font_size: 16.0,
            center_dot: false,
            center_dot_radius: 3,
        }
    }
}

impl OverlayStyle {
    fn color_for(&self, id: u32) -> Rgba<u8> {
        if self.per_id_colors {
            let [r, g, b] = id_to_color(id);
            Rgba([r, g, b, 255])
        } else {
            Rgba(self.stroke_color)
        }
    }
}

/// 在透明图层上绘制所有轨迹
pub fn render(
    tracks: &[TrackBox],
    surface: &mut RgbaImage,
    style: &OverlayStyle,
    font: Option<&FontArc>,
) {
    for px in surface.pixels_mut() {
        *px = TRANSPARENT;
    }

    for track in tracks {
        let color = style.color_for(track.id);
        let x = track.x1.round() as i32;
        let y = track.y1.round() as i32;
        let w = (track.x2 - track.x1).round().max(0.0) as u32;
        let h = (track.y2 - track.y1).round().max(0.0) as u32;

        // 边框 (向内加粗)
        for i in 0..style.line_width {
            let (wi, hi) = (w.saturating_sub(2 * i), h.saturating_sub(2 * i));
            if wi == 0 || hi == 0 {
                break;
            }
            draw_hollow_rect_mut(
                surface,
                Rect::at(x + i as i32, y + i as i32).of_size(wi, hi),
                color,
            );
        }

        // 标签底板 (框上方)
        let label_y = y - style.label_height as i32 - 2;
        if style.label_width > 0 && style.label_height > 0 {
            draw_filled_rect_mut(
                surface,
                Rect::at(x, label_y).of_size(style.label_width, style.label_height),
                Rgba(style.label_background),
            );
        }
        if let Some(font) = font {
            draw_text_mut(
                surface,
                color,
                x + 4,
                label_y + 2,
                PxScale::from(style.font_size),
                font,
                &format!("ID: {}", track.id),
            );
        }

        if style.center_dot {
            let (cx, cy) = track.bbox().center();
            draw_filled_circle_mut(
                surface,
                (cx.round() as i32, cy.round() as i32),
                style.center_dot_radius,
                Rgba([255, 255, 255, 255]),
            );
        }
    }
}

/// 把叠加层合成到帧上 (alpha 混合)
pub fn composite(frame: &mut RgbaImage, overlay: &RgbaImage) {
    image::imageops::overlay(frame, overlay, 0, 0);
}
