use std::sync::Arc;

use base64::Engine;
use tiny_skia::{
    FillRule, FilterQuality, Paint, PathBuilder, Pixmap, PixmapPaint, Transform,
};
use ttf_parser::OutlineBuilder;

use crate::debug::DebugLogger;
use crate::error::OffprintError;
use crate::font::FontRegistry;
use crate::html::RenderNode;
use crate::pages::{PAGE_CANVAS_HEIGHT, PAGE_CANVAS_WIDTH};
use crate::sanitize::SafeRenderTree;
use crate::style::{
    Declaration, ElementProfile, StyleRule, parse_css_color, resolved_style,
    serialize_declarations,
};
use crate::types::Color;

/// One captured page as tightly packed 8-bit RGB rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub rgb: Vec<u8>,
}

/// Turns a sanitized page tree into pixels. Swapped for a stub in
/// tests that exercise assembly without a raster pass.
pub trait Rasterizer: Send + Sync {
    fn rasterize(&self, tree: &SafeRenderTree, scale: f32) -> Result<Frame, OffprintError>;
}

/// CPU rasterizer for the absolutely positioned box model report
/// templates use: background fills, borders, unshaped glyph-outline
/// text, and inline raster images.
pub struct SkiaRasterizer {
    fonts: Arc<FontRegistry>,
    default_font: String,
    debug: Option<Arc<DebugLogger>>,
}

#[derive(Clone, Copy)]
enum TextAlign {
    Left,
    Center,
    Right,
}

#[derive(Clone, Copy)]
struct Inherited {
    color: Color,
    font_size: f32,
    align: TextAlign,
}

impl SkiaRasterizer {
    pub fn new(fonts: Arc<FontRegistry>) -> Self {
        Self {
            fonts,
            default_font: "Helvetica".to_string(),
            debug: None,
        }
    }

    pub fn with_default_font(mut self, name: impl Into<String>) -> Self {
        self.default_font = name.into();
        self
    }

    pub(crate) fn with_debug(mut self, debug: Option<Arc<DebugLogger>>) -> Self {
        self.debug = debug;
        self
    }

    fn counter(&self, key: &str) {
        if let Some(debug) = &self.debug {
            debug.increment(key, 1);
        }
    }

    fn walk(
        &self,
        pixmap: &mut Pixmap,
        rules: &[StyleRule],
        node: &RenderNode,
        origin: (f32, f32),
        parent_width: f32,
        inherited: Inherited,
        is_root: bool,
        scale: f32,
    ) {
        self.counter("raster.nodes");
        let resolved = {
            let profile = ElementProfile {
                tag: &node.tag,
                classes: &node.classes,
                is_root,
                style_text: serialize_declarations(&node.inline),
            };
            resolved_style(rules, &profile, &node.inline)
        };

        let left = resolved.get("left").and_then(|v| px_value(v)).unwrap_or(0.0);
        let top = resolved.get("top").and_then(|v| px_value(v)).unwrap_or(0.0);
        let width = resolved
            .get("width")
            .and_then(|v| px_value(v))
            .unwrap_or((parent_width - left).max(0.0));
        let height = resolved
            .get("height")
            .and_then(|v| px_value(v))
            .unwrap_or(0.0);
        let x = origin.0 + left;
        let y = origin.1 + top;

        let mut style = inherited;
        if let Some(color) = resolved.get("color").and_then(|v| parse_css_color(v)) {
            style.color = color;
        }
        if let Some(size) = resolved.get("font-size").and_then(|v| px_value(v)) {
            if size > 0.0 {
                style.font_size = size;
            }
        }
        if let Some(align) = resolved.get("text-align") {
            style.align = match align.trim() {
                "center" => TextAlign::Center,
                "right" => TextAlign::Right,
                _ => TextAlign::Left,
            };
        }

        if width > 0.0 && height > 0.0 {
            if let Some(background) = background_color(&resolved) {
                fill_rect(pixmap, x, y, width, height, background, scale);
            }
            if let Some((border_width, border_color)) = border_spec(&resolved) {
                draw_border(pixmap, x, y, width, height, border_width, border_color, scale);
            }
            if node.tag == "img" {
                if let Some(src) = &node.src {
                    if !self.draw_image(pixmap, src, x, y, width, height, scale) {
                        self.counter("raster.image_failed");
                    }
                }
            }
        }

        if let Some(text) = &node.text {
            self.draw_text(pixmap, text, x, y, width, style, scale);
        }

        for child in &node.children {
            self.walk(pixmap, rules, child, (x, y), width, style, false, scale);
        }
    }

    fn draw_text(
        &self,
        pixmap: &mut Pixmap,
        text: &str,
        x: f32,
        y: f32,
        width: f32,
        style: Inherited,
        scale: f32,
    ) {
        let Some(font) = self.fonts.resolve(&self.default_font) else {
            self.counter("raster.text_skipped");
            return;
        };
        let Ok(face) = ttf_parser::Face::parse(&font.data, 0) else {
            self.counter("raster.text_skipped");
            return;
        };
        let upem = face.units_per_em().max(1) as f32;
        let font_size = style.font_size;
        let glyph_scale = font_size * scale / upem;

        let text_width = self
            .fonts
            .measure_text_width(&self.default_font, font_size, text);
        let start_x = match style.align {
            TextAlign::Left => x,
            TextAlign::Center => x + (width - text_width) / 2.0,
            TextAlign::Right => x + width - text_width,
        };
        let ascent = face.ascender() as f32 / upem * font_size;
        let baseline_y = (y + ascent) * scale;

        let paint = fill_paint(style.color);
        let mut pen_x = start_x * scale;
        for ch in text.chars() {
            let Some(glyph) = face.glyph_index(ch) else {
                pen_x += font_size * 0.6 * scale;
                self.counter("raster.glyph_missing");
                continue;
            };
            let mut builder = GlyphPathBuilder::new(pen_x, baseline_y, glyph_scale);
            if face.outline_glyph(glyph, &mut builder).is_some() {
                if let Some(path) = builder.finish() {
                    pixmap.fill_path(
                        &path,
                        &paint,
                        FillRule::Winding,
                        Transform::identity(),
                        None,
                    );
                }
            }
            let advance = face
                .glyph_hor_advance(glyph)
                .map(|units| units as f32 * glyph_scale)
                .unwrap_or(font_size * 0.6 * scale);
            pen_x += advance;
        }
    }

    fn draw_image(
        &self,
        pixmap: &mut Pixmap,
        source: &str,
        x: f32,
        y: f32,
        width: f32,
        height: f32,
        scale: f32,
    ) -> bool {
        let Some(image) = load_image_pixmap(source) else {
            return false;
        };
        let src_w = image.width() as f32;
        let src_h = image.height() as f32;
        if src_w <= 0.0 || src_h <= 0.0 {
            return false;
        }
        let transform = Transform::from_row(
            width * scale / src_w,
            0.0,
            0.0,
            height * scale / src_h,
            x * scale,
            y * scale,
        );
        let mut paint = PixmapPaint::default();
        paint.quality = FilterQuality::Bilinear;
        pixmap.draw_pixmap(0, 0, image.as_ref(), &paint, transform, None);
        true
    }
}

impl Rasterizer for SkiaRasterizer {
    fn rasterize(&self, tree: &SafeRenderTree, scale: f32) -> Result<Frame, OffprintError> {
        if !scale.is_finite() || scale <= 0.0 {
            return Err(OffprintError::InvalidConfiguration(format!(
                "raster scale must be finite and positive, got {scale}"
            )));
        }
        let (canvas_width, canvas_height) = canvas_size(&tree.root);
        let width_px = (canvas_width * scale).round().max(1.0) as u32;
        let height_px = (canvas_height * scale).round().max(1.0) as u32;
        let mut pixmap = Pixmap::new(width_px, height_px).ok_or_else(|| {
            OffprintError::Render(format!(
                "cannot allocate {width_px}x{height_px} capture surface"
            ))
        })?;
        pixmap.fill(tiny_skia::Color::from_rgba8(255, 255, 255, 255));

        let inherited = Inherited {
            color: Color::BLACK,
            font_size: 16.0,
            align: TextAlign::Left,
        };
        self.walk(
            &mut pixmap,
            &tree.rules,
            &tree.root,
            (0.0, 0.0),
            canvas_width,
            inherited,
            true,
            scale,
        );
        Ok(pixmap_to_frame(&pixmap))
    }
}

/// Canvas geometry comes from the root's own width and height styles;
/// templates without them capture at the standard page canvas.
fn canvas_size(root: &RenderNode) -> (f32, f32) {
    let width = inline_px(&root.inline, "width").unwrap_or(PAGE_CANVAS_WIDTH);
    let height = inline_px(&root.inline, "height").unwrap_or(PAGE_CANVAS_HEIGHT);
    (width.max(1.0), height.max(1.0))
}

fn inline_px(declarations: &[Declaration], property: &str) -> Option<f32> {
    declarations
        .iter()
        .find(|declaration| declaration.property == property)
        .and_then(|declaration| px_value(&declaration.value))
}

fn px_value(value: &str) -> Option<f32> {
    let value = value.trim();
    let number = value.strip_suffix("px").unwrap_or(value).trim();
    let parsed: f32 = number.parse().ok()?;
    parsed.is_finite().then_some(parsed)
}

fn background_color(resolved: &std::collections::HashMap<String, String>) -> Option<Color> {
    if let Some(value) = resolved.get("background-color") {
        return parse_css_color(value);
    }
    resolved
        .get("background")
        .and_then(|value| parse_css_color(value))
}

/// Border width and color from the shorthand, with the standalone
/// properties taking precedence where present.
fn border_spec(resolved: &std::collections::HashMap<String, String>) -> Option<(f32, Color)> {
    let mut width = None;
    let mut color = None;
    if let Some(shorthand) = resolved.get("border") {
        for token in shorthand.split_whitespace() {
            if width.is_none() {
                if let Some(parsed) = px_value(token) {
                    width = Some(parsed);
                    continue;
                }
            }
            if let Some(parsed) = parse_css_color(token) {
                color = Some(parsed);
            }
        }
    }
    if let Some(value) = resolved.get("border-width") {
        width = px_value(value).or(width);
    }
    if let Some(value) = resolved.get("border-color") {
        color = parse_css_color(value).or(color);
    }
    match (width, color) {
        (Some(width), Some(color)) if width > 0.0 => Some((width, color)),
        _ => None,
    }
}

fn fill_rect(pixmap: &mut Pixmap, x: f32, y: f32, width: f32, height: f32, color: Color, scale: f32) {
    let Some(rect) = tiny_skia::Rect::from_xywh(x * scale, y * scale, width * scale, height * scale)
    else {
        return;
    };
    let path = PathBuilder::from_rect(rect);
    pixmap.fill_path(
        &path,
        &fill_paint(color),
        FillRule::Winding,
        Transform::identity(),
        None,
    );
}

fn draw_border(
    pixmap: &mut Pixmap,
    x: f32,
    y: f32,
    width: f32,
    height: f32,
    border_width: f32,
    color: Color,
    scale: f32,
) {
    let edge = border_width.min(width / 2.0).min(height / 2.0);
    if edge <= 0.0 {
        return;
    }
    fill_rect(pixmap, x, y, width, edge, color, scale);
    fill_rect(pixmap, x, y + height - edge, width, edge, color, scale);
    fill_rect(pixmap, x, y, edge, height, color, scale);
    fill_rect(pixmap, x + width - edge, y, edge, height, color, scale);
}

fn fill_paint(color: Color) -> Paint<'static> {
    let mut paint = Paint::default();
    paint.set_color(to_sk_color(color));
    paint.anti_alias = true;
    paint
}

fn to_sk_color(color: Color) -> tiny_skia::Color {
    tiny_skia::Color::from_rgba(
        color.r.clamp(0.0, 1.0),
        color.g.clamp(0.0, 1.0),
        color.b.clamp(0.0, 1.0),
        1.0,
    )
    .unwrap_or(tiny_skia::Color::WHITE)
}

/// The capture surface starts opaque and every paint is opaque, so
/// dropping the alpha channel loses nothing.
fn pixmap_to_frame(pixmap: &Pixmap) -> Frame {
    let mut rgb = Vec::with_capacity(pixmap.width() as usize * pixmap.height() as usize * 3);
    for pixel in pixmap.data().chunks_exact(4) {
        rgb.extend_from_slice(&pixel[..3]);
    }
    Frame {
        width: pixmap.width(),
        height: pixmap.height(),
        rgb,
    }
}

/// PNG bytes for a frame, used by the per-page dump option.
pub(crate) fn encode_frame_png(frame: &Frame) -> Result<Vec<u8>, OffprintError> {
    let mut pixmap = Pixmap::new(frame.width.max(1), frame.height.max(1))
        .ok_or_else(|| OffprintError::Render("cannot allocate dump surface".to_string()))?;
    for (source, target) in frame.rgb.chunks_exact(3).zip(pixmap.data_mut().chunks_exact_mut(4)) {
        target[..3].copy_from_slice(source);
        target[3] = 255;
    }
    pixmap
        .encode_png()
        .map_err(|error| OffprintError::Render(format!("png encode failed: {error}")))
}

fn load_image_pixmap(source: &str) -> Option<Pixmap> {
    let bytes;
    let mime;
    if let Some((parsed_mime, data)) = parse_data_uri(source) {
        bytes = data;
        mime = Some(parsed_mime);
    } else {
        bytes = std::fs::read(source).ok()?;
        mime = None;
    }
    decode_image_to_pixmap(&bytes, mime.as_deref())
}

fn decode_image_to_pixmap(data: &[u8], mime: Option<&str>) -> Option<Pixmap> {
    let guessed_format = if let Some(mime) = mime {
        if mime.contains("png") {
            Some(image::ImageFormat::Png)
        } else if mime.contains("jpeg") || mime.contains("jpg") {
            Some(image::ImageFormat::Jpeg)
        } else {
            None
        }
    } else {
        image::guess_format(data).ok()
    };
    let decoded = if let Some(format) = guessed_format {
        image::load_from_memory_with_format(data, format).ok()?
    } else {
        image::load_from_memory(data).ok()?
    };
    let rgba = decoded.to_rgba8();
    let (width, height) = rgba.dimensions();
    let mut pixmap = Pixmap::new(width, height)?;
    for (source, target) in rgba
        .as_raw()
        .chunks_exact(4)
        .zip(pixmap.data_mut().chunks_exact_mut(4))
    {
        let alpha = source[3];
        target[0] = premul_u8(source[0], alpha);
        target[1] = premul_u8(source[1], alpha);
        target[2] = premul_u8(source[2], alpha);
        target[3] = alpha;
    }
    Some(pixmap)
}

fn premul_u8(channel: u8, alpha: u8) -> u8 {
    let product = (channel as u16) * (alpha as u16) + 127;
    ((product + (product >> 8)) >> 8) as u8
}

fn parse_data_uri(uri: &str) -> Option<(String, Vec<u8>)> {
    if !uri.starts_with("data:") {
        return None;
    }
    let (header, payload) = uri.split_once(',')?;
    let mime = header
        .trim_start_matches("data:")
        .split(';')
        .next()
        .filter(|value| !value.is_empty())
        .unwrap_or("application/octet-stream")
        .to_string();
    let data = if header.contains(";base64") {
        base64::engine::general_purpose::STANDARD
            .decode(payload)
            .ok()?
    } else {
        payload.as_bytes().to_vec()
    };
    Some((mime, data))
}

struct GlyphPathBuilder {
    builder: PathBuilder,
    origin_x: f32,
    origin_y: f32,
    scale: f32,
}

impl GlyphPathBuilder {
    fn new(origin_x: f32, origin_y: f32, scale: f32) -> Self {
        Self {
            builder: PathBuilder::new(),
            origin_x,
            origin_y,
            scale,
        }
    }

    fn finish(self) -> Option<tiny_skia::Path> {
        self.builder.finish()
    }
}

// Glyph outlines are y-up in font units while the capture surface is
// y-down, so every point flips around the baseline.
impl OutlineBuilder for GlyphPathBuilder {
    fn move_to(&mut self, x: f32, y: f32) {
        self.builder.move_to(
            self.origin_x + x * self.scale,
            self.origin_y - y * self.scale,
        );
    }

    fn line_to(&mut self, x: f32, y: f32) {
        self.builder.line_to(
            self.origin_x + x * self.scale,
            self.origin_y - y * self.scale,
        );
    }

    fn quad_to(&mut self, x1: f32, y1: f32, x: f32, y: f32) {
        self.builder.quad_to(
            self.origin_x + x1 * self.scale,
            self.origin_y - y1 * self.scale,
            self.origin_x + x * self.scale,
            self.origin_y - y * self.scale,
        );
    }

    fn curve_to(&mut self, x1: f32, y1: f32, x2: f32, y2: f32, x: f32, y: f32) {
        self.builder.cubic_to(
            self.origin_x + x1 * self.scale,
            self.origin_y - y1 * self.scale,
            self.origin_x + x2 * self.scale,
            self.origin_y - y2 * self.scale,
            self.origin_x + x * self.scale,
            self.origin_y - y * self.scale,
        );
    }

    fn close(&mut self) {
        self.builder.close();
    }
}
