use chrono::NaiveDate;

use crate::chunk::MetricsChunk;
use crate::html::{RenderTree, escape_html, parse_template};
use crate::insights::{DailyMetric, InsightsPayload, SeriesPoint};

/// Logical capture canvas, CSS pixels. Every report page renders at
/// this fixed geometry regardless of output page size.
pub const PAGE_CANVAS_WIDTH: f32 = 842.0;
pub const PAGE_CANVAS_HEIGHT: f32 = 595.0;

/// Shared utility classes for the page templates. The capture pass
/// re-parses this per page, so the sheet stays small.
const REPORT_SHEET: &str = "\
.report-page { background-color: #ffffff; }\n\
.text-blue-500 { color: #3b82f6; }\n\
.text-green-500 { color: #10b981; }\n\
.text-orange-500 { color: #f97316; }\n\
.text-purple-500 { color: #8b5cf6; }\n\
.text-gray-400 { color: #9ca3af; }\n\
.text-gray-500 { color: #6b7280; }\n\
.text-gray-700 { color: #374151; }\n\
.text-gray-800 { color: #1f2937; }\n\
.bg-white { background-color: #ffffff; }\n\
.bg-gray-50 { background-color: #f9fafb; }\n\
.tile-impressions { background-color: #e8f0fe; }\n\
.tile-reach { background-color: #e6f9f0; }\n\
.tile-engagement { background-color: #fff7ed; }\n\
.tile-followers { background-color: #f3e8ff; }\n\
.border-gray-200 { border-color: #e5e7eb; }\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportPageKind {
    Cover,
    Summary,
    Trend,
    Table,
    TableChunk {
        page_number: usize,
        total_pages: usize,
    },
}

/// Ticket for capturing one mounted page. Handles from an earlier
/// mount carry a stale generation and resolve to nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureHandle {
    slot: usize,
    generation: u64,
}

#[derive(Debug)]
struct PageSlot {
    kind: ReportPageKind,
    tree: RenderTree,
}

/// The mounted report pages for the current payload. Remounting (new
/// payload, new chunking) rebuilds every slot and invalidates all
/// previously issued handles.
pub struct ReportPageSet {
    brand: String,
    generation: u64,
    slots: Vec<PageSlot>,
}

impl ReportPageSet {
    pub fn new(brand: impl Into<String>) -> Self {
        Self {
            brand: brand.into(),
            generation: 0,
            slots: Vec::new(),
        }
    }

    /// Rebuilds the page slots. The cover always mounts; the summary,
    /// trend, and tabular pages mount only when a payload exists. One
    /// chunk or none yields a single unchunked tabular page, more
    /// yield one page per chunk with a position indicator.
    pub fn mount(
        &mut self,
        company: &str,
        range_line: &str,
        generated_on: NaiveDate,
        payload: Option<&InsightsPayload>,
        chunks: &[MetricsChunk],
    ) {
        self.generation += 1;
        self.slots.clear();
        self.slots.push(PageSlot {
            kind: ReportPageKind::Cover,
            tree: cover_page(&self.brand, company, range_line),
        });
        let Some(payload) = payload else {
            return;
        };
        let report_date = generated_on.format("%b %d, %Y").to_string();
        self.slots.push(PageSlot {
            kind: ReportPageKind::Summary,
            tree: summary_page(&self.brand, &report_date, payload),
        });
        self.slots.push(PageSlot {
            kind: ReportPageKind::Trend,
            tree: trend_page(&self.brand, &report_date, payload),
        });
        if chunks.len() > 1 {
            for chunk in chunks {
                self.slots.push(PageSlot {
                    kind: ReportPageKind::TableChunk {
                        page_number: chunk.page_number,
                        total_pages: chunk.total_pages,
                    },
                    tree: table_page(
                        &self.brand,
                        &report_date,
                        &chunk.records,
                        Some((chunk.page_number, chunk.total_pages)),
                    ),
                });
            }
        } else {
            self.slots.push(PageSlot {
                kind: ReportPageKind::Table,
                tree: table_page(&self.brand, &report_date, &payload.daily_metrics, None),
            });
        }
    }

    /// Drops all slots, as when the host view unmounts.
    pub fn unmount(&mut self) {
        self.generation += 1;
        self.slots.clear();
    }

    pub fn is_mounted(&self) -> bool {
        !self.slots.is_empty()
    }

    pub fn page_count(&self) -> usize {
        self.slots.len()
    }

    /// Export order with one entry per expected page. Unmounted pages
    /// appear as `None` so the assembler can skip them while keeping
    /// the fixed order. With no payload the three data pages are the
    /// `None` entries.
    pub fn capture_order(&self) -> Vec<Option<CaptureHandle>> {
        let mut order: Vec<Option<CaptureHandle>> = self
            .slots
            .iter()
            .enumerate()
            .map(|(slot, _)| {
                Some(CaptureHandle {
                    slot,
                    generation: self.generation,
                })
            })
            .collect();
        if self.slots.len() == 1 {
            order.extend([None, None, None]);
        }
        order
    }

    pub fn resolve(&self, handle: CaptureHandle) -> Option<&RenderTree> {
        if handle.generation != self.generation {
            return None;
        }
        self.slots.get(handle.slot).map(|slot| &slot.tree)
    }

    pub fn kind_of(&self, handle: CaptureHandle) -> Option<ReportPageKind> {
        if handle.generation != self.generation {
            return None;
        }
        self.slots.get(handle.slot).map(|slot| slot.kind)
    }
}

fn page_shell(body: &str) -> RenderTree {
    parse_template(&format!(
        "<!DOCTYPE html><html><head><style>{REPORT_SHEET}</style></head><body>\
         <div class=\"report-page bg-white\" style=\"left: 0px; top: 0px; \
         width: 842px; height: 595px\">{body}</div></body></html>"
    ))
}

fn cover_page(brand: &str, company: &str, range_line: &str) -> RenderTree {
    let company = escape_html(company);
    let range_line = escape_html(range_line);
    let brand = escape_html(brand);
    page_shell(&format!(
        "<div style=\"left: 650px; top: 0px; width: 192px; height: 192px; \
         background-color: #f97316\"></div>\
         <div style=\"left: 0px; top: 451px; width: 144px; height: 144px; \
         background-color: #ec4899\"></div>\
         <div class=\"text-gray-800\" style=\"left: 48px; top: 96px; width: 560px; \
         height: 56px; font-size: 40px\">Social Media Insights</div>\
         <div class=\"text-gray-500\" style=\"left: 48px; top: 176px; width: 560px; \
         height: 28px; font-size: 20px\">{range_line}</div>\
         <div class=\"text-gray-800\" style=\"left: 48px; top: 232px; width: 560px; \
         height: 40px; font-size: 28px\">{company}</div>\
         <div class=\"text-gray-800\" style=\"left: 0px; top: 515px; width: 842px; \
         height: 36px; font-size: 24px; text-align: center\">{brand}</div>"
    ))
}

fn summary_page(brand: &str, report_date: &str, payload: &InsightsPayload) -> RenderTree {
    let tiles = [
        ("tile-impressions", "text-blue-500", "Impressions", payload.impression_count),
        ("tile-reach", "text-green-500", "Reach", payload.reach),
        ("tile-engagement", "text-orange-500", "Engagement", payload.engagement_count),
        ("tile-followers", "text-purple-500", "Followers", payload.follow_count),
    ];
    let mut body = String::new();
    body.push_str(&page_sides());
    body.push_str(&page_headline("Facebook Page Insights"));
    for (index, (tile_class, value_class, label, value)) in tiles.iter().enumerate() {
        let left = 48 + index * 190;
        body.push_str(&format!(
            "<div class=\"{tile_class}\" style=\"left: {left}px; top: 140px; width: 176px; \
             height: 100px\">\
             <div class=\"{value_class}\" style=\"left: 0px; top: 20px; width: 176px; \
             height: 36px; font-size: 28px; text-align: center\">{value}</div>\
             <div class=\"text-gray-500\" style=\"left: 0px; top: 62px; width: 176px; \
             height: 20px; font-size: 14px; text-align: center\">{label}</div>\
             </div>"
        ));
    }
    body.push_str(&chart_box(
        268,
        "Impressions Over Time",
        &payload.impressions_over_time,
        "#2563eb",
    ));
    body.push_str(&page_footer(brand, report_date));
    page_shell(&body)
}

fn trend_page(brand: &str, report_date: &str, payload: &InsightsPayload) -> RenderTree {
    let mut body = String::new();
    body.push_str(&page_sides());
    body.push_str(&page_headline("Facebook Page Insights - Reach"));
    body.push_str(&chart_box(
        160,
        "Reach Over Time",
        &payload.reach_over_time,
        "#10b981",
    ));
    body.push_str(&page_footer(brand, report_date));
    page_shell(&body)
}

fn table_page(
    brand: &str,
    report_date: &str,
    records: &[DailyMetric],
    indicator: Option<(usize, usize)>,
) -> RenderTree {
    let mut body = String::new();
    body.push_str(&page_sides());
    body.push_str(&page_headline("Facebook Page Insights - Daily Metrics"));
    if let Some((page_number, total_pages)) = indicator {
        body.push_str(&format!(
            "<div class=\"text-gray-500\" style=\"left: 594px; top: 52px; width: 200px; \
             height: 18px; font-size: 12px; text-align: right\">Page {page_number} of \
             {total_pages}</div>"
        ));
    }
    body.push_str(
        "<div class=\"bg-white\" style=\"left: 48px; top: 140px; width: 746px; height: 380px; \
         border: 1px solid #e5e7eb\">\
         <div class=\"text-gray-700\" style=\"left: 16px; top: 12px; width: 300px; height: 22px; \
         font-size: 15px\">Daily Metrics</div>",
    );
    if records.is_empty() {
        body.push_str(
            "<div class=\"text-gray-400\" style=\"left: 16px; top: 180px; width: 714px; \
             height: 24px; font-size: 14px; text-align: center\">No daily metrics data \
             available.</div>",
        );
    } else {
        body.push_str(&metrics_table(records));
    }
    body.push_str("</div>");
    body.push_str(&page_footer(brand, report_date));
    page_shell(&body)
}

const TABLE_COLUMNS: [(&str, usize, usize); 5] = [
    ("Date", 16, 170),
    ("Impressions", 186, 140),
    ("Engagements", 326, 140),
    ("Reach", 466, 140),
    ("Follows", 606, 124),
];

fn metrics_table(records: &[DailyMetric]) -> String {
    let mut out = String::new();
    out.push_str(
        "<div class=\"bg-gray-50\" style=\"left: 16px; top: 44px; width: 714px; \
         height: 28px\"></div>",
    );
    for (label, left, width) in TABLE_COLUMNS {
        let align = if left == 16 { "left" } else { "right" };
        out.push_str(&format!(
            "<div class=\"text-gray-700\" style=\"left: {left}px; top: 49px; width: {width}px; \
             height: 18px; font-size: 13px; text-align: {align}\">{label}</div>"
        ));
    }
    for (row, record) in records.iter().enumerate() {
        let row_top = 72 + row * 30;
        if row % 2 == 1 {
            out.push_str(&format!(
                "<div class=\"bg-gray-50\" style=\"left: 16px; top: {row_top}px; width: 714px; \
                 height: 30px\"></div>"
            ));
        }
        let cells = [
            record.date.format("%Y-%m-%d").to_string(),
            record.impression.to_string(),
            record.engagement.to_string(),
            record.reach.to_string(),
            record.follow.to_string(),
        ];
        for ((_, left, width), value) in TABLE_COLUMNS.iter().zip(cells) {
            let align = if *left == 16 { "left" } else { "right" };
            let text_top = row_top + 7;
            out.push_str(&format!(
                "<div class=\"text-gray-700\" style=\"left: {left}px; top: {text_top}px; \
                 width: {width}px; height: 17px; font-size: 13px; text-align: \
                 {align}\">{value}</div>"
            ));
        }
    }
    out
}

/// Left brand rail and top-right accent shared by the data pages.
fn page_sides() -> String {
    "<div style=\"left: 0px; top: 0px; width: 8px; height: 595px; \
     background-color: #ff6a3a\"></div>\
     <div style=\"left: 682px; top: 0px; width: 160px; height: 160px; \
     background-color: #ffb86c\"></div>"
        .to_string()
}

fn page_headline(subtitle: &str) -> String {
    format!(
        "<div class=\"text-gray-800\" style=\"left: 48px; top: 40px; width: 600px; \
         height: 44px; font-size: 34px\">Social Media Insights</div>\
         <div class=\"text-gray-700\" style=\"left: 48px; top: 94px; width: 600px; \
         height: 26px; font-size: 18px\">{subtitle}</div>"
    )
}

fn page_footer(brand: &str, report_date: &str) -> String {
    let brand = escape_html(brand);
    format!(
        "<div class=\"text-gray-800\" style=\"left: 0px; top: 524px; width: 842px; \
         height: 24px; font-size: 17px; text-align: center\">{brand}</div>\
         <div class=\"text-gray-500\" style=\"left: 0px; top: 552px; width: 842px; \
         height: 16px; font-size: 11px; text-align: center\">Report Date: \
         {report_date}</div>"
    )
}

/// Chart box with a bottom-aligned bar strip. Bars scale against the
/// series maximum; an empty or all-zero series renders a placeholder
/// line instead.
fn chart_box(top: usize, title: &str, series: &[SeriesPoint], bar_color: &str) -> String {
    let mut out = format!(
        "<div class=\"bg-white\" style=\"left: 48px; top: {top}px; width: 746px; height: 240px; \
         border: 1px solid #e5e7eb\">\
         <div class=\"text-gray-700\" style=\"left: 16px; top: 12px; width: 400px; \
         height: 22px; font-size: 15px\">{title}</div>"
    );
    let max = series.iter().map(|point| point.value).max().unwrap_or(0);
    if max == 0 {
        out.push_str(
            "<div class=\"text-gray-400\" style=\"left: 16px; top: 110px; width: 714px; \
             height: 22px; font-size: 14px; text-align: center\">No data available</div>",
        );
        out.push_str("</div>");
        return out;
    }
    let plot_width = 714.0_f32;
    let plot_height = 160.0_f32;
    let step = plot_width / series.len() as f32;
    let bar_width = (step * 0.6).max(1.0);
    for (index, point) in series.iter().enumerate() {
        if point.value == 0 {
            continue;
        }
        let bar_height = (point.value as f32 / max as f32 * plot_height).max(1.0);
        let left = 16.0 + index as f32 * step + (step - bar_width) / 2.0;
        let bar_top = 44.0 + (plot_height - bar_height);
        out.push_str(&format!(
            "<div style=\"left: {left:.1}px; top: {bar_top:.1}px; width: {bar_width:.1}px; \
             height: {bar_height:.1}px; background-color: {bar_color}\"></div>"
        ));
    }
    if let (Some(first), Some(last)) = (series.first(), series.last()) {
        out.push_str(&format!(
            "<div class=\"text-gray-400\" style=\"left: 16px; top: 212px; width: 200px; \
             height: 14px; font-size: 10px\">{}</div>\
             <div class=\"text-gray-400\" style=\"left: 530px; top: 212px; width: 200px; \
             height: 14px; font-size: 10px; text-align: right\">{}</div>",
            first.date.format("%Y-%m-%d"),
            last.date.format("%Y-%m-%d"),
        ));
    }
    out.push_str("</div>");
    out
}
