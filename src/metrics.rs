#[derive(Debug, Clone, Default)]
pub struct PageMetrics {
    pub page_number: usize,
    pub sanitize_ms: f64,
    pub raster_ms: f64,
    pub frame_width: u32,
    pub frame_height: u32,
}

#[derive(Debug, Clone, Default)]
pub struct AssembleSummary {
    pub pages: Vec<PageMetrics>,
    pub pages_written: usize,
    pub pages_skipped: usize,
    pub output_bytes: usize,
    pub total_ms: f64,
}
