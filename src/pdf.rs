use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::Path;

use lopdf::{Dictionary, Document, Object, ObjectId, Stream, dictionary};

use crate::debug::DebugLogger;
use crate::error::OffprintError;
use crate::raster::Frame;
use crate::types::{Pt, Rect, Size};

#[derive(Debug, Clone, Default)]
pub struct PdfWriteSummary {
    pub pages_written: usize,
    pub images_embedded: usize,
    pub output_bytes: usize,
}

/// Aspect-preserving placement of a `frame_width` x `frame_height`
/// bitmap on `page`: the wider side spans the page, the other axis is
/// centered. Ratio math runs at milli-point precision, so the two
/// margins agree to within a thousandth of a point.
pub fn letterbox_rect(frame_width: u32, frame_height: u32, page: Size) -> Rect {
    if frame_width == 0 || frame_height == 0 {
        return Rect {
            x: Pt::ZERO,
            y: Pt::ZERO,
            width: page.width,
            height: page.height,
        };
    }
    let frame_w = frame_width as i64;
    let frame_h = frame_height as i64;
    let page_w = page.width.to_milli_i64();
    let page_h = page.height.to_milli_i64();
    // frame_ar >= page_ar without dividing: fw * ph >= fh * pw.
    if frame_w.saturating_mul(page_h) >= frame_h.saturating_mul(page_w) {
        let height = page.width.mul_ratio(frame_h, frame_w);
        Rect {
            x: Pt::ZERO,
            y: (page.height - height) / 2,
            width: page.width,
            height,
        }
    } else {
        let width = page.height.mul_ratio(frame_w, frame_h);
        Rect {
            x: (page.width - width) / 2,
            y: Pt::ZERO,
            width,
            height: page.height,
        }
    }
}

/// Writes one PDF page per frame. Identical frames share one image
/// XObject. The document is serialized in memory and lands on disk in
/// a single write, so a failure mid-build leaves no partial file.
pub fn write_frames_pdf(
    frames: &[Frame],
    page: Size,
    out_path: &Path,
    debug: Option<&DebugLogger>,
) -> Result<PdfWriteSummary, OffprintError> {
    if frames.is_empty() {
        return Err(OffprintError::EmptyCaptureSet);
    }

    let mut doc = Document::with_version("1.7");
    let pages_id = doc.new_object_id();
    let mut image_ids: HashMap<u64, ObjectId> = HashMap::new();
    let mut kids: Vec<Object> = Vec::new();

    let page_w = page.width.to_f32();
    let page_h = page.height.to_f32();

    for frame in frames {
        let key = frame_key(frame);
        let image_id = match image_ids.get(&key) {
            Some(id) => *id,
            None => {
                let id = doc.add_object(image_xobject(frame));
                image_ids.insert(key, id);
                id
            }
        };

        let placement = letterbox_rect(frame.width, frame.height, page);
        let content = page_content(page_w, page_h, placement);
        let content_id = doc.add_object(Stream::new(Dictionary::new(), content.into_bytes()));
        let resources_id = doc.add_object(dictionary! {
            "XObject" => dictionary! { "Im1" => image_id },
        });
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), page_w.into(), page_h.into()],
        });
        kids.push(page_id.into());
    }

    let pages_written = kids.len();
    let images_embedded = image_ids.len();
    let pages = dictionary! {
        "Type" => "Pages",
        "Kids" => kids,
        "Count" => pages_written as i64,
    };
    doc.objects.insert(pages_id, Object::Dictionary(pages));
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.compress();

    let mut bytes: Vec<u8> = Vec::new();
    doc.save_to(&mut bytes).map_err(lopdf_err)?;
    std::fs::write(out_path, &bytes)?;

    if let Some(debug) = debug {
        debug.increment("pdf.pages_written", pages_written as u64);
        debug.increment("pdf.images_embedded", images_embedded as u64);
    }
    Ok(PdfWriteSummary {
        pages_written,
        images_embedded,
        output_bytes: bytes.len(),
    })
}

fn frame_key(frame: &Frame) -> u64 {
    let mut hasher = DefaultHasher::new();
    frame.width.hash(&mut hasher);
    frame.height.hash(&mut hasher);
    frame.rgb.hash(&mut hasher);
    hasher.finish()
}

fn image_xobject(frame: &Frame) -> Stream {
    Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => frame.width as i64,
            "Height" => frame.height as i64,
            "ColorSpace" => "DeviceRGB",
            "BitsPerComponent" => 8,
        },
        frame.rgb.clone(),
    )
}

// White page fill first so letterbox margins read as paper, then the
// image placed through a cm matrix. PDF user space is y-up, so the
// vertical offset measures from the bottom edge.
fn page_content(page_w: f32, page_h: f32, placement: Rect) -> String {
    let x = placement.x.to_f32();
    let width = placement.width.to_f32();
    let height = placement.height.to_f32();
    let y = page_h - placement.y.to_f32() - height;
    format!(
        "q\n1 1 1 rg\n0 0 {page_w:.2} {page_h:.2} re\nf\nQ\nq\n{width:.2} 0 0 {height:.2} {x:.2} {y:.2} cm\n/Im1 Do\nQ\n"
    )
}

fn lopdf_err(err: std::io::Error) -> OffprintError {
    OffprintError::Pdf(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid_frame(width: u32, height: u32, rgb: (u8, u8, u8)) -> Frame {
        let mut data = Vec::with_capacity((width * height * 3) as usize);
        for _ in 0..width * height {
            data.extend_from_slice(&[rgb.0, rgb.1, rgb.2]);
        }
        Frame {
            width,
            height,
            rgb: data,
        }
    }

    #[test]
    fn wide_frame_spans_width_with_equal_vertical_margins() {
        let page = Size {
            width: Pt::from_i32(100),
            height: Pt::from_i32(100),
        };
        let rect = letterbox_rect(200, 100, page);
        assert_eq!(rect.x, Pt::ZERO);
        assert_eq!(rect.width, Pt::from_i32(100));
        assert_eq!(rect.height, Pt::from_i32(50));
        let bottom = page.height - rect.y - rect.height;
        assert_eq!(rect.y, bottom);
        assert_eq!(rect.y, Pt::from_i32(25));
    }

    #[test]
    fn tall_frame_spans_height_with_equal_horizontal_margins() {
        let page = Size {
            width: Pt::from_i32(100),
            height: Pt::from_i32(100),
        };
        let rect = letterbox_rect(100, 200, page);
        assert_eq!(rect.y, Pt::ZERO);
        assert_eq!(rect.height, Pt::from_i32(100));
        assert_eq!(rect.width, Pt::from_i32(50));
        assert_eq!(rect.x, Pt::from_i32(25));
    }

    #[test]
    fn supersampled_report_canvas_nearly_fills_landscape_a4() {
        let page = Size::a4_landscape();
        let rect = letterbox_rect(1684, 1190, page);
        assert_eq!(rect.x, Pt::ZERO);
        assert_eq!(rect.width, page.width);
        let bottom = page.height - rect.y - rect.height;
        assert!((rect.y - bottom).abs().to_milli_i64() <= 1);
        assert!(rect.y.to_f32() < 0.5);
    }

    #[test]
    fn degenerate_frame_falls_back_to_full_page() {
        let page = Size::a4_landscape();
        let rect = letterbox_rect(0, 100, page);
        assert_eq!(rect.width, page.width);
        assert_eq!(rect.height, page.height);
    }

    #[test]
    fn one_page_per_frame_lands_in_the_output() {
        let dir = std::env::temp_dir().join("offprint_pdf_pages");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("three_pages.pdf");
        let frames = vec![
            solid_frame(4, 2, (255, 0, 0)),
            solid_frame(4, 2, (0, 255, 0)),
            solid_frame(2, 4, (0, 0, 255)),
        ];
        let summary =
            write_frames_pdf(&frames, Size::a4_landscape(), &path, None).unwrap();
        assert_eq!(summary.pages_written, 3);
        assert_eq!(summary.images_embedded, 3);
        assert!(summary.output_bytes > 0);

        let doc = Document::load(&path).unwrap();
        assert_eq!(doc.get_pages().len(), 3);
    }

    #[test]
    fn identical_frames_share_one_image_xobject() {
        let dir = std::env::temp_dir().join("offprint_pdf_dedup");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("dedup.pdf");
        let frames = vec![
            solid_frame(4, 4, (10, 20, 30)),
            solid_frame(4, 4, (10, 20, 30)),
            solid_frame(4, 4, (10, 20, 30)),
        ];
        let summary =
            write_frames_pdf(&frames, Size::a4_landscape(), &path, None).unwrap();
        assert_eq!(summary.pages_written, 3);
        assert_eq!(summary.images_embedded, 1);
    }

    #[test]
    fn empty_frame_list_is_rejected_before_any_write() {
        let dir = std::env::temp_dir().join("offprint_pdf_empty");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("never_written.pdf");
        let _ = std::fs::remove_file(&path);
        let result = write_frames_pdf(&[], Size::a4_landscape(), &path, None);
        assert!(matches!(result, Err(OffprintError::EmptyCaptureSet)));
        assert!(!path.exists());
    }

    #[test]
    fn media_box_matches_landscape_a4() {
        let dir = std::env::temp_dir().join("offprint_pdf_mediabox");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("mediabox.pdf");
        let frames = vec![solid_frame(8, 4, (0, 0, 0))];
        write_frames_pdf(&frames, Size::a4_landscape(), &path, None).unwrap();

        let doc = Document::load(&path).unwrap();
        let (_, page_id) = doc.get_pages().into_iter().next().unwrap();
        let page = doc.get_object(page_id).and_then(Object::as_dict).unwrap();
        let media_box = page.get(b"MediaBox").and_then(Object::as_array).unwrap();
        let width = media_box[2].as_float().unwrap();
        let height = media_box[3].as_float().unwrap();
        assert!((width - 841.89).abs() < 0.01);
        assert!((height - 595.28).abs() < 0.01);
    }
}
