use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::debug::DebugLogger;
use crate::error::OffprintError;
use crate::insights::DateRange;
use crate::metrics::{AssembleSummary, PageMetrics};
use crate::pages::{CaptureHandle, ReportPageSet};
use crate::pdf::write_frames_pdf;
use crate::raster::{Frame, Rasterizer, encode_frame_png};
use crate::sanitize::sanitize;
use crate::types::Size;

pub const DEFAULT_SUPERSAMPLE: f32 = 2.0;

#[derive(Debug, Clone)]
pub struct AssembleOptions {
    /// Raster scale applied to every capture.
    pub supersample: f32,
    pub page_size: Size,
    /// When set, each captured frame is also written there as
    /// `page_NN.png` for inspection.
    pub dump_frames_dir: Option<PathBuf>,
}

impl Default for AssembleOptions {
    fn default() -> Self {
        Self {
            supersample: DEFAULT_SUPERSAMPLE,
            page_size: Size::a4_landscape(),
            dump_frames_dir: None,
        }
    }
}

/// Captures every handle in `order` and writes one PDF. Each capture
/// runs the color normalization pass on a clone of the mounted tree,
/// then rasterizes it; entries that are `None` or no longer resolve
/// are skipped without producing a blank page. All frames are in hand
/// before the output file is opened, so a capture failure leaves no
/// partial document behind.
pub fn assemble_document(
    set: &ReportPageSet,
    order: &[Option<CaptureHandle>],
    rasterizer: &dyn Rasterizer,
    options: &AssembleOptions,
    out_path: &Path,
    debug: Option<&DebugLogger>,
) -> Result<AssembleSummary, OffprintError> {
    let started = Instant::now();
    let mut frames: Vec<Frame> = Vec::new();
    let mut pages: Vec<PageMetrics> = Vec::new();
    let mut pages_skipped = 0usize;

    for (index, entry) in order.iter().enumerate() {
        let page_number = index + 1;
        let Some(handle) = entry else {
            pages_skipped += 1;
            log_skip(debug, page_number, "unmounted");
            continue;
        };
        let Some(tree) = set.resolve(*handle) else {
            pages_skipped += 1;
            log_skip(debug, page_number, "stale_handle");
            continue;
        };

        let sanitize_started = Instant::now();
        let safe = sanitize(tree, debug);
        let sanitize_ms = sanitize_started.elapsed().as_secs_f64() * 1000.0;

        let raster_started = Instant::now();
        let frame = rasterizer.rasterize(&safe, options.supersample)?;
        let raster_ms = raster_started.elapsed().as_secs_f64() * 1000.0;

        if let Some(debug) = debug {
            debug.log_span_ms("sanitize", Some(page_number), sanitize_ms);
            debug.log_span_ms("rasterize", Some(page_number), raster_ms);
        }
        if let Some(dir) = &options.dump_frames_dir {
            std::fs::create_dir_all(dir)?;
            let png = encode_frame_png(&frame)?;
            std::fs::write(dir.join(format!("page_{page_number:02}.png")), png)?;
        }

        pages.push(PageMetrics {
            page_number,
            sanitize_ms,
            raster_ms,
            frame_width: frame.width,
            frame_height: frame.height,
        });
        frames.push(frame);
    }

    if frames.is_empty() {
        return Err(OffprintError::EmptyCaptureSet);
    }
    let written = write_frames_pdf(&frames, options.page_size, out_path, debug)?;

    let total_ms = started.elapsed().as_secs_f64() * 1000.0;
    if let Some(debug) = debug {
        debug.emit_summary("assemble");
        debug.flush();
    }
    Ok(AssembleSummary {
        pages,
        pages_written: written.pages_written,
        pages_skipped,
        output_bytes: written.output_bytes,
        total_ms,
    })
}

fn log_skip(debug: Option<&DebugLogger>, page_number: usize, reason: &str) {
    if let Some(debug) = debug {
        debug.increment("assemble.page_skipped", 1);
        debug.log_json(&format!(
            "{{\"event\":\"page_skipped\",\"page\":{page_number},\"reason\":\"{reason}\"}}"
        ));
    }
}

/// Deterministic output name: `{id}_Report_{from}_to_{to}.pdf` with a
/// selected range, `{id}_Report.pdf` without one.
pub fn report_file_name(page_id: &str, range: Option<&DateRange>) -> String {
    match range {
        Some(range) => format!(
            "{page_id}_Report_{}_to_{}.pdf",
            range.from.format("%Y-%m-%d"),
            range.to.format("%Y-%m-%d")
        ),
        None => format!("{page_id}_Report.pdf"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::chunk_daily_metrics;
    use crate::insights::{DailyMetric, InsightsPayload};
    use crate::sanitize::SafeRenderTree;
    use chrono::NaiveDate;

    /// Hashes the page text into a solid frame so assembled output is
    /// a pure function of page content.
    struct StubRasterizer;

    impl Rasterizer for StubRasterizer {
        fn rasterize(&self, tree: &SafeRenderTree, scale: f32) -> Result<Frame, OffprintError> {
            let text = tree.root.collected_text();
            let mut seed = 7u8;
            for byte in text.bytes() {
                seed = seed.wrapping_mul(31).wrapping_add(byte);
            }
            let width = (4.0 * scale) as u32;
            let height = (2.0 * scale) as u32;
            Ok(Frame {
                width,
                height,
                rgb: vec![seed; (width * height * 3) as usize],
            })
        }
    }

    struct FailingRasterizer;

    impl Rasterizer for FailingRasterizer {
        fn rasterize(&self, _tree: &SafeRenderTree, _scale: f32) -> Result<Frame, OffprintError> {
            Err(OffprintError::Render("no surface".to_string()))
        }
    }

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn sample_payload(days: usize) -> InsightsPayload {
        let daily_metrics = (0..days)
            .map(|i| DailyMetric {
                date: date("2025-06-01") + chrono::Days::new(i as u64),
                impression: 100 + i as u64,
                engagement: 10 + i as u64,
                reach: 80 + i as u64,
                follow: i as u64,
            })
            .collect();
        InsightsPayload {
            impression_count: 1200,
            engagement_count: 340,
            reach: 900,
            follow_count: 25,
            daily_metrics,
            ..InsightsPayload::default()
        }
    }

    fn mounted_set(days: usize) -> ReportPageSet {
        let payload = sample_payload(days);
        let chunks = chunk_daily_metrics(&payload.daily_metrics, 10).unwrap();
        let mut set = ReportPageSet::new("Wingman Creative");
        set.mount(
            "Acme Coffee",
            "2025-06-01 to 2025-06-30",
            date("2025-07-04"),
            Some(&payload),
            &chunks,
        );
        set
    }

    fn out_path(dir_name: &str, file_name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(dir_name);
        std::fs::create_dir_all(&dir).unwrap();
        dir.join(file_name)
    }

    #[test]
    fn assembles_one_pdf_page_per_mounted_page() {
        let set = mounted_set(5);
        let order = set.capture_order();
        let path = out_path("offprint_assemble_basic", "report.pdf");
        let summary = assemble_document(
            &set,
            &order,
            &StubRasterizer,
            &AssembleOptions::default(),
            &path,
            None,
        )
        .unwrap();
        assert_eq!(summary.pages_written, 4);
        assert_eq!(summary.pages_skipped, 0);
        assert_eq!(summary.pages.len(), 4);
        assert_eq!(summary.pages[0].page_number, 1);
        assert_eq!(summary.pages[0].frame_width, 8);
        assert_eq!(summary.pages[0].frame_height, 4);

        let doc = lopdf::Document::load(&path).unwrap();
        assert_eq!(doc.get_pages().len(), 4);
    }

    #[test]
    fn skipped_entries_produce_identical_output_to_their_absence() {
        let set = mounted_set(3);
        let order = set.capture_order();
        assert_eq!(order.len(), 4);

        let with_gap = vec![order[0], None, order[2]];
        let without_gap = vec![order[0], order[2]];

        let path_a = out_path("offprint_assemble_skip", "with_gap.pdf");
        let path_b = out_path("offprint_assemble_skip", "without_gap.pdf");
        let summary_a = assemble_document(
            &set,
            &with_gap,
            &StubRasterizer,
            &AssembleOptions::default(),
            &path_a,
            None,
        )
        .unwrap();
        let summary_b = assemble_document(
            &set,
            &without_gap,
            &StubRasterizer,
            &AssembleOptions::default(),
            &path_b,
            None,
        )
        .unwrap();

        assert_eq!(summary_a.pages_written, 2);
        assert_eq!(summary_a.pages_skipped, 1);
        assert_eq!(summary_b.pages_skipped, 0);
        let bytes_a = std::fs::read(&path_a).unwrap();
        let bytes_b = std::fs::read(&path_b).unwrap();
        assert_eq!(bytes_a, bytes_b);
    }

    #[test]
    fn stale_handles_are_skipped_not_fatal() {
        let mut set = mounted_set(3);
        let stale_order = set.capture_order();
        let payload = sample_payload(3);
        let chunks = chunk_daily_metrics(&payload.daily_metrics, 10).unwrap();
        set.mount(
            "Acme Coffee",
            "All time",
            date("2025-07-04"),
            Some(&payload),
            &chunks,
        );

        let mut order = set.capture_order();
        order.push(stale_order[0]);
        let path = out_path("offprint_assemble_stale", "report.pdf");
        let summary = assemble_document(
            &set,
            &order,
            &StubRasterizer,
            &AssembleOptions::default(),
            &path,
            None,
        )
        .unwrap();
        assert_eq!(summary.pages_written, 4);
        assert_eq!(summary.pages_skipped, 1);
    }

    #[test]
    fn cover_only_mount_writes_a_single_page() {
        let mut set = ReportPageSet::new("Wingman Creative");
        set.mount("Acme Coffee", "All time", date("2025-07-04"), None, &[]);
        let order = set.capture_order();
        assert_eq!(order.len(), 4);

        let path = out_path("offprint_assemble_cover", "report.pdf");
        let summary = assemble_document(
            &set,
            &order,
            &StubRasterizer,
            &AssembleOptions::default(),
            &path,
            None,
        )
        .unwrap();
        assert_eq!(summary.pages_written, 1);
        assert_eq!(summary.pages_skipped, 3);
    }

    #[test]
    fn all_entries_skipped_is_an_empty_capture_set() {
        let set = mounted_set(3);
        let path = out_path("offprint_assemble_empty", "never.pdf");
        let _ = std::fs::remove_file(&path);
        let result = assemble_document(
            &set,
            &[None, None],
            &StubRasterizer,
            &AssembleOptions::default(),
            &path,
            None,
        );
        assert!(matches!(result, Err(OffprintError::EmptyCaptureSet)));
        assert!(!path.exists());
    }

    #[test]
    fn raster_failure_leaves_no_output_file() {
        let set = mounted_set(3);
        let order = set.capture_order();
        let path = out_path("offprint_assemble_fail", "never.pdf");
        let _ = std::fs::remove_file(&path);
        let result = assemble_document(
            &set,
            &order,
            &FailingRasterizer,
            &AssembleOptions::default(),
            &path,
            None,
        );
        assert!(matches!(result, Err(OffprintError::Render(_))));
        assert!(!path.exists());
    }

    #[test]
    fn chunked_mount_assembles_one_page_per_chunk() {
        let payload = sample_payload(25);
        let chunks = chunk_daily_metrics(&payload.daily_metrics, 10).unwrap();
        assert_eq!(chunks.len(), 3);
        let mut set = ReportPageSet::new("Wingman Creative");
        set.mount(
            "Acme Coffee",
            "2025-06-01 to 2025-06-25",
            date("2025-07-04"),
            Some(&payload),
            &chunks,
        );

        let path = out_path("offprint_assemble_chunks", "report.pdf");
        let summary = assemble_document(
            &set,
            &set.capture_order(),
            &StubRasterizer,
            &AssembleOptions::default(),
            &path,
            None,
        )
        .unwrap();
        // Cover + summary + trend + three table chunks.
        assert_eq!(summary.pages_written, 6);
    }

    #[test]
    fn dump_frames_writes_one_png_per_page() {
        let set = mounted_set(3);
        let dump_dir = std::env::temp_dir().join("offprint_assemble_dump_frames");
        let _ = std::fs::remove_dir_all(&dump_dir);
        let options = AssembleOptions {
            dump_frames_dir: Some(dump_dir.clone()),
            ..AssembleOptions::default()
        };
        let path = out_path("offprint_assemble_dump", "report.pdf");
        assemble_document(&set, &set.capture_order(), &StubRasterizer, &options, &path, None)
            .unwrap();
        for page in 1..=4 {
            assert!(dump_dir.join(format!("page_{page:02}.png")).exists());
        }
    }

    #[test]
    fn file_name_includes_range_when_selected() {
        let range = DateRange::new(date("2025-06-01"), date("2025-06-30"));
        assert_eq!(
            report_file_name("facebook1", Some(&range)),
            "facebook1_Report_2025-06-01_to_2025-06-30.pdf"
        );
        assert_eq!(report_file_name("facebook1", None), "facebook1_Report.pdf");
    }
}
