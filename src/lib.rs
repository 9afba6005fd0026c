mod assemble;
mod chunk;
mod debug;
mod error;
mod font;
mod html;
mod insights;
mod metrics;
mod pages;
mod pdf;
mod raster;
mod report;
mod sanitize;
mod session;
mod storage;
mod style;
mod types;

pub use assemble::{AssembleOptions, DEFAULT_SUPERSAMPLE, assemble_document, report_file_name};
pub use chunk::{DEFAULT_CHUNK_SIZE, MetricsChunk, chunk_daily_metrics};
use debug::DebugLogger;
pub use error::OffprintError;
pub use font::{FontRegistry, RegisteredFont};
pub use html::{RenderNode, RenderTree, StylesheetSource, parse_template};
pub use insights::{
    DailyMetric, DateRange, InsightsClient, InsightsError, InsightsErrorKind, InsightsPayload,
    PairedPoint, SeriesPoint,
};
pub use metrics::{AssembleSummary, PageMetrics};
pub use pages::{
    CaptureHandle, PAGE_CANVAS_HEIGHT, PAGE_CANVAS_WIDTH, ReportPageKind, ReportPageSet,
};
pub use pdf::{PdfWriteSummary, letterbox_rect, write_frames_pdf};
pub use raster::{Frame, Rasterizer, SkiaRasterizer};
pub use report::{
    FETCH_FAILED_MESSAGE, FilterBar, FilterPanel, RANGE_REQUIRED_MESSAGE, ReportScreen, ScreenPhase,
};
pub use sanitize::{
    SafeRenderTree, UNSUPPORTED_COLOR_FUNCTIONS, contains_unsupported_color, fallback_color_for,
    sanitize,
};
pub use session::{
    ANALYTICS_KEY, Clock, DEFAULT_PAGE_ID, GUARDED_ROUTE_PREFIX, LoadOutcome, ManualClock,
    RouteTransition, SESSION_KEY, SESSION_TTL_MS, SessionStore, SystemClock,
};
use std::path::PathBuf;
use std::sync::Arc;
pub use storage::{MemoryScope, StorageScope};
pub use style::{
    Declaration, ElementProfile, SimpleSelector, StyleRule, parse_css_color, parse_inline_style,
    parse_stylesheet_rules, resolved_style, serialize_declarations,
};
pub use types::{Color, Pt, Rect, Size};

/// Shared wiring for the report pipeline: storage scopes, clock, font
/// registry, rasterizer, and debug sink, configured once through the
/// builder. Screens and stores handed out by one engine all observe
/// the same persisted state.
pub struct Offprint {
    durable: Arc<dyn StorageScope>,
    session: Arc<dyn StorageScope>,
    clock: Arc<dyn Clock>,
    rasterizer: Arc<dyn Rasterizer>,
    debug: Option<Arc<DebugLogger>>,
    brand: String,
    chunk_size: usize,
    session_ttl_ms: u64,
    route_prefix: String,
    supersample: f32,
    page_size: Size,
    dump_frames_dir: Option<PathBuf>,
}

#[derive(Clone)]
pub struct OffprintBuilder {
    brand: String,
    chunk_size: usize,
    session_ttl_ms: u64,
    route_prefix: String,
    durable: Option<Arc<dyn StorageScope>>,
    session: Option<Arc<dyn StorageScope>>,
    clock: Option<Arc<dyn Clock>>,
    font_dirs: Vec<PathBuf>,
    font_files: Vec<PathBuf>,
    default_font: String,
    supersample: f32,
    page_size: Size,
    dump_frames_dir: Option<PathBuf>,
    debug_path: Option<PathBuf>,
}

impl std::fmt::Debug for Offprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Offprint").finish_non_exhaustive()
    }
}

impl Offprint {
    pub fn builder() -> OffprintBuilder {
        OffprintBuilder::new()
    }

    /// A session store over the configured scopes and clock. Every
    /// store from the same engine reads and writes the same records.
    pub fn session_store(&self) -> SessionStore {
        SessionStore::new(
            self.durable.clone(),
            self.session.clone(),
            self.clock.clone(),
        )
        .with_ttl_ms(self.session_ttl_ms)
        .with_route_prefix(self.route_prefix.clone())
        .with_debug(self.debug.clone())
    }

    /// A report screen for `company`, backed by this engine's store,
    /// rasterizer, and debug sink. `client` performs the analytics
    /// fetches.
    pub fn report_screen(&self, client: Arc<dyn InsightsClient>, company: &str) -> ReportScreen {
        ReportScreen::new(
            self.session_store(),
            client,
            self.rasterizer.clone(),
            self.assemble_options(),
            self.chunk_size,
            &self.brand,
            company,
            self.debug.clone(),
        )
    }

    fn assemble_options(&self) -> AssembleOptions {
        AssembleOptions {
            supersample: self.supersample,
            page_size: self.page_size,
            dump_frames_dir: self.dump_frames_dir.clone(),
        }
    }
}

impl OffprintBuilder {
    pub fn new() -> Self {
        Self {
            brand: "Wingman Creative".to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            session_ttl_ms: SESSION_TTL_MS,
            route_prefix: GUARDED_ROUTE_PREFIX.to_string(),
            durable: None,
            session: None,
            clock: None,
            font_dirs: Vec::new(),
            font_files: Vec::new(),
            default_font: "Helvetica".to_string(),
            supersample: DEFAULT_SUPERSAMPLE,
            page_size: Size::a4_landscape(),
            dump_frames_dir: None,
            debug_path: None,
        }
    }

    // Brand line on the cover and every page footer.
    pub fn brand(mut self, brand: impl Into<String>) -> Self {
        self.brand = brand.into();
        self
    }

    // Rows per table sub-page.
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size;
        self
    }

    pub fn session_ttl_ms(mut self, ttl_ms: u64) -> Self {
        self.session_ttl_ms = ttl_ms;
        self
    }

    pub fn route_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.route_prefix = prefix.into();
        self
    }

    // Backend for the durable analytics record. Defaults to a fresh
    // in-memory scope.
    pub fn durable_scope(mut self, scope: Arc<dyn StorageScope>) -> Self {
        self.durable = Some(scope);
        self
    }

    // Backend for the session marker. Defaults to a fresh in-memory
    // scope.
    pub fn session_scope(mut self, scope: Arc<dyn StorageScope>) -> Self {
        self.session = Some(scope);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn register_font_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.font_dirs.push(path.into());
        self
    }

    pub fn register_font_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.font_files.push(path.into());
        self
    }

    // Face used where a template names no registered family.
    pub fn default_font(mut self, name: impl Into<String>) -> Self {
        self.default_font = name.into();
        self
    }

    pub fn supersample(mut self, scale: f32) -> Self {
        self.supersample = scale;
        self
    }

    pub fn page_size(mut self, size: Size) -> Self {
        self.page_size = size;
        self
    }

    // Write each captured frame as `page_NN.png` for inspection.
    pub fn dump_frames_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.dump_frames_dir = Some(path.into());
        self
    }

    // Enable debug logging to a JSONL file.
    pub fn debug_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.debug_path = Some(path.into());
        self
    }

    pub fn build(self) -> Result<Offprint, OffprintError> {
        if self.chunk_size == 0 {
            return Err(OffprintError::InvalidConfiguration(
                "chunk_size must be >= 1".to_string(),
            ));
        }
        if !self.supersample.is_finite() || self.supersample <= 0.0 {
            return Err(OffprintError::InvalidConfiguration(
                "supersample must be a finite positive scale".to_string(),
            ));
        }
        if self.session_ttl_ms == 0 {
            return Err(OffprintError::InvalidConfiguration(
                "session_ttl_ms must be > 0".to_string(),
            ));
        }
        let mut registry = FontRegistry::new();
        for dir in &self.font_dirs {
            registry.register_dir(dir);
        }
        for file in &self.font_files {
            registry.register_file(file);
        }
        let debug = if let Some(path) = self.debug_path {
            Some(Arc::new(DebugLogger::new(path)?))
        } else {
            None
        };
        let rasterizer = Arc::new(
            SkiaRasterizer::new(Arc::new(registry))
                .with_default_font(self.default_font)
                .with_debug(debug.clone()),
        );
        Ok(Offprint {
            durable: self.durable.unwrap_or_else(|| Arc::new(MemoryScope::new())),
            session: self.session.unwrap_or_else(|| Arc::new(MemoryScope::new())),
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            rasterizer,
            debug,
            brand: self.brand,
            chunk_size: self.chunk_size,
            session_ttl_ms: self.session_ttl_ms,
            route_prefix: self.route_prefix,
            supersample: self.supersample,
            page_size: self.page_size,
            dump_frames_dir: self.dump_frames_dir,
        })
    }
}

impl Default for OffprintBuilder {
    fn default() -> Self {
        Self::new()
    }
}
