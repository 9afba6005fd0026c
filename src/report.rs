use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::NaiveDate;

use crate::assemble::{AssembleOptions, assemble_document, report_file_name};
use crate::chunk::chunk_daily_metrics;
use crate::debug::{DebugLogger, json_escape};
use crate::error::OffprintError;
use crate::insights::{DateRange, InsightsClient};
use crate::metrics::AssembleSummary;
use crate::pages::ReportPageSet;
use crate::raster::Rasterizer;
use crate::session::{LoadOutcome, SessionStore};

pub const FETCH_FAILED_MESSAGE: &str = "Failed to load analytics data. Please try again.";
pub const RANGE_REQUIRED_MESSAGE: &str = "Please select a valid date range";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterPanel {
    PageList,
    DatePicker,
}

/// Filter bar selection plus dropdown bookkeeping. `apply` closes
/// every open panel before the selection is handed back, so the caller
/// never fetches behind an open dropdown.
#[derive(Debug, Clone)]
pub struct FilterBar {
    selected_page_id: String,
    selected_range: Option<DateRange>,
    page_list_open: bool,
    date_picker_open: bool,
}

impl FilterBar {
    pub fn new(page_id: impl Into<String>, range: Option<DateRange>) -> Self {
        Self {
            selected_page_id: page_id.into(),
            selected_range: range,
            page_list_open: false,
            date_picker_open: false,
        }
    }

    pub fn toggle(&mut self, panel: FilterPanel) {
        match panel {
            FilterPanel::PageList => self.page_list_open = !self.page_list_open,
            FilterPanel::DatePicker => self.date_picker_open = !self.date_picker_open,
        }
    }

    pub fn is_open(&self, panel: FilterPanel) -> bool {
        match panel {
            FilterPanel::PageList => self.page_list_open,
            FilterPanel::DatePicker => self.date_picker_open,
        }
    }

    pub fn any_panel_open(&self) -> bool {
        self.page_list_open || self.date_picker_open
    }

    /// Picking a page closes the page list, like clicking an entry.
    pub fn choose_page(&mut self, page_id: impl Into<String>) {
        self.selected_page_id = page_id.into();
        self.page_list_open = false;
    }

    pub fn set_range(&mut self, range: Option<DateRange>) {
        self.selected_range = range;
    }

    pub fn selected_page_id(&self) -> &str {
        &self.selected_page_id
    }

    pub fn selected_range(&self) -> Option<DateRange> {
        self.selected_range
    }

    /// Closes all panels, then returns the selection.
    pub fn apply(&mut self) -> (String, Option<DateRange>) {
        self.page_list_open = false;
        self.date_picker_open = false;
        (self.selected_page_id.clone(), self.selected_range)
    }

    fn sync_selection(&mut self, page_id: &str, range: Option<DateRange>) {
        self.selected_page_id = page_id.to_string();
        self.selected_range = range;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScreenPhase {
    /// Mounted with nothing fetched yet.
    Empty,
    Loading,
    Ready,
    /// Dismissable inline message under the filter bar.
    Failed(String),
}

/// The mounted report view: filter bar, fetch state machine, mounted
/// page set, and the export trigger. One screen is active at a time;
/// the session store behind it is the only shared state.
pub struct ReportScreen {
    store: SessionStore,
    client: Arc<dyn InsightsClient>,
    pages: ReportPageSet,
    rasterizer: Arc<dyn Rasterizer>,
    options: AssembleOptions,
    chunk_size: usize,
    company: String,
    filter: FilterBar,
    phase: ScreenPhase,
    is_downloading: bool,
    debug: Option<Arc<DebugLogger>>,
}

impl ReportScreen {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: SessionStore,
        client: Arc<dyn InsightsClient>,
        rasterizer: Arc<dyn Rasterizer>,
        options: AssembleOptions,
        chunk_size: usize,
        brand: &str,
        company: &str,
        debug: Option<Arc<DebugLogger>>,
    ) -> Self {
        let filter = FilterBar::new(store.selected_page_id(), store.selected_range());
        Self {
            store,
            client,
            pages: ReportPageSet::new(brand),
            rasterizer,
            options,
            chunk_size: chunk_size.max(1),
            company: company.to_string(),
            filter,
            phase: ScreenPhase::Empty,
            is_downloading: false,
            debug,
        }
    }

    pub fn phase(&self) -> &ScreenPhase {
        &self.phase
    }

    pub fn is_downloading(&self) -> bool {
        self.is_downloading
    }

    pub fn filter(&self) -> &FilterBar {
        &self.filter
    }

    pub fn filter_mut(&mut self) -> &mut FilterBar {
        &mut self.filter
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn pages(&self) -> &ReportPageSet {
        &self.pages
    }

    /// First navigation into the view. Restores any persisted state
    /// and mounts the pages that the restored payload supports.
    pub fn open(&mut self, path: &str) -> LoadOutcome {
        self.navigate(path)
    }

    /// Feeds one route change through the session store, then
    /// re-reads whatever survived the transition.
    pub fn navigate(&mut self, path: &str) -> LoadOutcome {
        self.store.navigate(path);
        let outcome = self.store.load_persisted();
        self.filter
            .sync_selection(self.store.selected_page_id(), self.store.selected_range());
        self.phase = if self.store.payload().is_some() {
            ScreenPhase::Ready
        } else {
            ScreenPhase::Empty
        };
        self.remount_pages();
        outcome
    }

    /// Query-parameter overrides take precedence over persisted
    /// selection and always force a refetch, even when they match the
    /// persisted values exactly.
    pub fn apply_query_params(
        &mut self,
        page: Option<&str>,
        start: Option<&str>,
        end: Option<&str>,
    ) -> bool {
        if !self.store.apply_url_overrides(page, start, end) {
            return false;
        }
        self.filter
            .sync_selection(self.store.selected_page_id(), self.store.selected_range());
        self.fetch();
        true
    }

    /// Confirms the filter bar selection. Panels close before any
    /// other effect; a missing range surfaces the inline message
    /// without fetching.
    pub fn apply_filters(&mut self) {
        let (page_id, range) = self.filter.apply();
        let Some(range) = range else {
            self.phase = ScreenPhase::Failed(RANGE_REQUIRED_MESSAGE.to_string());
            return;
        };
        self.store.set_selection(&page_id, Some(range));
        self.fetch();
    }

    /// Refetches with the current selection.
    pub fn refresh(&mut self) {
        self.fetch();
    }

    /// Clears an inline failure message. The view falls back to its
    /// data-bearing state when a payload is still present.
    pub fn dismiss_error(&mut self) {
        if matches!(self.phase, ScreenPhase::Failed(_)) {
            self.phase = if self.store.payload().is_some() {
                ScreenPhase::Ready
            } else {
                ScreenPhase::Empty
            };
        }
    }

    fn fetch(&mut self) {
        let Some(range) = self.store.selected_range() else {
            self.phase = ScreenPhase::Failed(RANGE_REQUIRED_MESSAGE.to_string());
            return;
        };
        self.phase = ScreenPhase::Loading;
        let page_id = self.store.selected_page_id().to_string();
        match self.client.fetch(&page_id, Some(&range)) {
            Ok(payload) => {
                self.store.save(&page_id, range, payload);
                self.phase = ScreenPhase::Ready;
            }
            Err(error) => {
                if let Some(debug) = &self.debug {
                    debug.increment("fetch.failed", 1);
                    debug.log_json(&format!(
                        "{{\"event\":\"fetch.failed\",\"page\":\"{}\",\"message\":\"{}\"}}",
                        json_escape(&page_id),
                        json_escape(&error.message)
                    ));
                }
                self.store.clear_payload();
                self.phase = ScreenPhase::Failed(FETCH_FAILED_MESSAGE.to_string());
            }
        }
        self.remount_pages();
    }

    fn remount_pages(&mut self) {
        let range_line = match self.store.selected_range() {
            Some(range) => format!(
                "{} to {}",
                range.from.format("%Y-%m-%d"),
                range.to.format("%Y-%m-%d")
            ),
            None => "All time".to_string(),
        };
        let payload = self.store.payload().cloned();
        // chunk_size is clamped to 1 at construction, so chunking
        // cannot fail here.
        let chunks = match payload.as_ref() {
            Some(payload) => {
                chunk_daily_metrics(&payload.daily_metrics, self.chunk_size).unwrap_or_default()
            }
            None => Vec::new(),
        };
        self.pages.mount(
            &self.company,
            &range_line,
            self.today(),
            payload.as_ref(),
            &chunks,
        );
        if let Some(debug) = &self.debug {
            debug.log_json(&format!(
                "{{\"event\":\"pages.mounted\",\"pages\":{},\"chunks\":{}}}",
                self.pages.page_count(),
                chunks.len()
            ));
        }
    }

    fn today(&self) -> NaiveDate {
        chrono::DateTime::from_timestamp_millis(self.store.now_millis() as i64)
            .map(|moment| moment.date_naive())
            .unwrap_or_default()
    }

    /// Exports the mounted pages as one PDF under `out_dir`, named
    /// from the current selection. `is_downloading` is observable for
    /// the duration and resets whether or not assembly succeeds.
    pub fn export(&mut self, out_dir: &Path) -> Result<(PathBuf, AssembleSummary), OffprintError> {
        self.is_downloading = true;
        let result = self.export_inner(out_dir);
        self.is_downloading = false;
        result
    }

    fn export_inner(
        &mut self,
        out_dir: &Path,
    ) -> Result<(PathBuf, AssembleSummary), OffprintError> {
        self.remount_pages();
        let file_name = report_file_name(
            self.store.selected_page_id(),
            self.store.selected_range().as_ref(),
        );
        std::fs::create_dir_all(out_dir)?;
        let path = out_dir.join(file_name);
        let order = self.pages.capture_order();
        let summary = assemble_document(
            &self.pages,
            &order,
            self.rasterizer.as_ref(),
            &self.options,
            &path,
            self.debug.as_deref(),
        )?;
        Ok((path, summary))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::insights::{DailyMetric, InsightsError, InsightsPayload};
    use crate::raster::Frame;
    use crate::sanitize::SafeRenderTree;
    use crate::session::ManualClock;
    use crate::storage::MemoryScope;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    const ROUTE: &str = "/facebook-campaign-analytics";

    struct StubClient {
        calls: AtomicU32,
        fail: bool,
        days: usize,
    }

    impl StubClient {
        fn ok(days: usize) -> Self {
            Self {
                calls: AtomicU32::new(0),
                fail: false,
                days,
            }
        }

        fn failing() -> Self {
            Self {
                calls: AtomicU32::new(0),
                fail: true,
                days: 0,
            }
        }

        fn call_count(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl InsightsClient for StubClient {
        fn fetch(
            &self,
            _page_id: &str,
            _range: Option<&DateRange>,
        ) -> Result<InsightsPayload, InsightsError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(InsightsError::transport("socket closed"));
            }
            Ok(sample_payload(self.days))
        }
    }

    struct FlakyClient {
        remaining_failures: Mutex<u32>,
        days: usize,
    }

    impl InsightsClient for FlakyClient {
        fn fetch(
            &self,
            _page_id: &str,
            _range: Option<&DateRange>,
        ) -> Result<InsightsPayload, InsightsError> {
            let mut remaining = self.remaining_failures.lock().unwrap();
            if *remaining > 0 {
                *remaining -= 1;
                return Err(InsightsError::rejected("success flag false"));
            }
            Ok(sample_payload(self.days))
        }
    }

    struct StubRasterizer;

    impl Rasterizer for StubRasterizer {
        fn rasterize(&self, tree: &SafeRenderTree, scale: f32) -> Result<Frame, OffprintError> {
            let mut seed = 3u8;
            for byte in tree.root.collected_text().bytes() {
                seed = seed.wrapping_mul(17).wrapping_add(byte);
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

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn sample_payload(days: usize) -> InsightsPayload {
        let daily_metrics = (0..days)
            .map(|i| DailyMetric {
                date: date("2025-06-01") + chrono::Days::new(i as u64),
                impression: 50 + i as u64,
                engagement: 5 + i as u64,
                reach: 40 + i as u64,
                follow: i as u64,
            })
            .collect();
        InsightsPayload {
            impression_count: 500,
            engagement_count: 100,
            reach: 400,
            follow_count: 12,
            daily_metrics,
            ..InsightsPayload::default()
        }
    }

    fn screen_with(client: Arc<dyn InsightsClient>) -> ReportScreen {
        let store = SessionStore::new(
            Arc::new(MemoryScope::new()),
            Arc::new(MemoryScope::new()),
            Arc::new(ManualClock::new(1_750_000_000_000)),
        );
        ReportScreen::new(
            store,
            client,
            Arc::new(StubRasterizer),
            AssembleOptions::default(),
            10,
            "Wingman Creative",
            "Acme Coffee",
            None,
        )
    }

    fn select_june(screen: &mut ReportScreen, days: u32) {
        let range = DateRange::new(date("2025-06-01"), {
            date("2025-06-01") + chrono::Days::new((days - 1) as u64)
        });
        screen.filter_mut().set_range(Some(range));
    }

    #[test]
    fn apply_closes_panels_before_anything_else() {
        let mut bar = FilterBar::new("facebook1", None);
        bar.toggle(FilterPanel::PageList);
        bar.toggle(FilterPanel::DatePicker);
        assert!(bar.any_panel_open());
        let (page, range) = bar.apply();
        assert!(!bar.any_panel_open());
        assert_eq!(page, "facebook1");
        assert!(range.is_none());
    }

    #[test]
    fn choosing_a_page_closes_the_page_list() {
        let mut bar = FilterBar::new("facebook1", None);
        bar.toggle(FilterPanel::PageList);
        bar.choose_page("facebook2");
        assert!(!bar.is_open(FilterPanel::PageList));
        assert_eq!(bar.selected_page_id(), "facebook2");
    }

    #[test]
    fn missing_range_fails_inline_without_fetching() {
        let client = Arc::new(StubClient::ok(5));
        let mut screen = screen_with(client.clone());
        screen.open(ROUTE);
        screen.filter_mut().toggle(FilterPanel::DatePicker);
        screen.apply_filters();
        assert_eq!(
            *screen.phase(),
            ScreenPhase::Failed(RANGE_REQUIRED_MESSAGE.to_string())
        );
        assert_eq!(client.call_count(), 0);
        assert!(!screen.filter().any_panel_open());
    }

    #[test]
    fn successful_apply_reaches_ready_with_mounted_pages() {
        let client = Arc::new(StubClient::ok(5));
        let mut screen = screen_with(client.clone());
        screen.open(ROUTE);
        assert_eq!(*screen.phase(), ScreenPhase::Empty);
        assert_eq!(screen.pages().page_count(), 1);

        select_june(&mut screen, 5);
        screen.apply_filters();
        assert_eq!(*screen.phase(), ScreenPhase::Ready);
        assert_eq!(client.call_count(), 1);
        // Cover, summary, trend, one unchunked table.
        assert_eq!(screen.pages().page_count(), 4);
        assert!(screen.store().payload().is_some());
    }

    #[test]
    fn large_payload_mounts_one_table_page_per_chunk() {
        let client = Arc::new(StubClient::ok(25));
        let mut screen = screen_with(client);
        screen.open(ROUTE);
        select_june(&mut screen, 25);
        screen.apply_filters();
        // Cover, summary, trend, three chunk tables.
        assert_eq!(screen.pages().page_count(), 6);
    }

    #[test]
    fn failed_fetch_surfaces_message_and_drops_payload() {
        let client = Arc::new(StubClient::failing());
        let mut screen = screen_with(client);
        screen.open(ROUTE);
        select_june(&mut screen, 5);
        screen.apply_filters();
        assert_eq!(
            *screen.phase(),
            ScreenPhase::Failed(FETCH_FAILED_MESSAGE.to_string())
        );
        assert!(screen.store().payload().is_none());
        assert_eq!(screen.pages().page_count(), 1);
    }

    #[test]
    fn dismissing_error_returns_to_empty_without_payload() {
        let client = Arc::new(StubClient::failing());
        let mut screen = screen_with(client);
        screen.open(ROUTE);
        select_june(&mut screen, 5);
        screen.apply_filters();
        screen.dismiss_error();
        assert_eq!(*screen.phase(), ScreenPhase::Empty);
    }

    #[test]
    fn dismissing_error_keeps_ready_when_payload_survives() {
        let client = Arc::new(StubClient::ok(5));
        let mut screen = screen_with(client);
        screen.open(ROUTE);
        select_june(&mut screen, 5);
        screen.apply_filters();
        assert_eq!(*screen.phase(), ScreenPhase::Ready);

        // A range cleared back out of the bar fails inline but leaves
        // the fetched payload alone.
        screen.filter_mut().set_range(None);
        screen.apply_filters();
        assert_eq!(
            *screen.phase(),
            ScreenPhase::Failed(RANGE_REQUIRED_MESSAGE.to_string())
        );
        screen.dismiss_error();
        assert_eq!(*screen.phase(), ScreenPhase::Ready);
        assert!(screen.store().payload().is_some());
    }

    #[test]
    fn recovery_after_transient_failure() {
        let client = Arc::new(FlakyClient {
            remaining_failures: Mutex::new(1),
            days: 5,
        });
        let mut screen = screen_with(client);
        screen.open(ROUTE);
        select_june(&mut screen, 5);
        screen.apply_filters();
        assert!(matches!(screen.phase(), ScreenPhase::Failed(_)));
        screen.refresh();
        assert_eq!(*screen.phase(), ScreenPhase::Ready);
        assert_eq!(screen.pages().page_count(), 4);
    }

    #[test]
    fn query_params_override_and_force_refetch() {
        let client = Arc::new(StubClient::ok(5));
        let mut screen = screen_with(client.clone());
        screen.open(ROUTE);
        let applied = screen.apply_query_params(
            Some("facebook2"),
            Some("2025-06-01"),
            Some("2025-06-15"),
        );
        assert!(applied);
        assert_eq!(client.call_count(), 1);
        assert_eq!(screen.store().selected_page_id(), "facebook2");
        assert_eq!(screen.filter().selected_page_id(), "facebook2");
        assert_eq!(*screen.phase(), ScreenPhase::Ready);
    }

    #[test]
    fn incomplete_query_params_change_nothing() {
        let client = Arc::new(StubClient::ok(5));
        let mut screen = screen_with(client.clone());
        screen.open(ROUTE);
        let applied = screen.apply_query_params(Some("facebook2"), Some("2025-06-01"), None);
        assert!(!applied);
        assert_eq!(client.call_count(), 0);
        assert_eq!(screen.store().selected_page_id(), "facebook1");
    }

    #[test]
    fn export_writes_named_pdf_and_resets_downloading() {
        let client = Arc::new(StubClient::ok(5));
        let mut screen = screen_with(client);
        screen.open(ROUTE);
        select_june(&mut screen, 5);
        screen.apply_filters();

        let out_dir = std::env::temp_dir().join("offprint_report_export");
        let (path, summary) = screen.export(&out_dir).unwrap();
        assert!(!screen.is_downloading());
        assert_eq!(
            path.file_name().unwrap().to_string_lossy(),
            "facebook1_Report_2025-06-01_to_2025-06-05.pdf"
        );
        assert_eq!(summary.pages_written, 4);
        assert!(path.exists());
    }

    #[test]
    fn export_without_range_uses_plain_name() {
        let client = Arc::new(StubClient::ok(5));
        let mut screen = screen_with(client);
        screen.open(ROUTE);
        let out_dir = std::env::temp_dir().join("offprint_report_export_plain");
        let (path, summary) = screen.export(&out_dir).unwrap();
        assert_eq!(
            path.file_name().unwrap().to_string_lossy(),
            "facebook1_Report.pdf"
        );
        assert_eq!(summary.pages_written, 1);
        assert_eq!(summary.pages_skipped, 3);
    }

    #[test]
    fn navigating_away_unmounts_data_pages() {
        let client = Arc::new(StubClient::ok(5));
        let mut screen = screen_with(client);
        screen.open(ROUTE);
        select_june(&mut screen, 5);
        screen.apply_filters();
        assert_eq!(screen.pages().page_count(), 4);

        screen.navigate("/dashboard");
        assert_eq!(*screen.phase(), ScreenPhase::Empty);
        assert!(screen.store().payload().is_none());
        assert_eq!(screen.pages().page_count(), 1);
    }

    #[test]
    fn reopening_within_session_restores_ready_state() {
        let durable = Arc::new(MemoryScope::new());
        let session = Arc::new(MemoryScope::new());
        let clock = Arc::new(ManualClock::new(1_750_000_000_000));
        let client: Arc<dyn InsightsClient> = Arc::new(StubClient::ok(5));

        let store = SessionStore::new(durable.clone(), session.clone(), clock.clone());
        let mut screen = ReportScreen::new(
            store,
            client.clone(),
            Arc::new(StubRasterizer),
            AssembleOptions::default(),
            10,
            "Wingman Creative",
            "Acme Coffee",
            None,
        );
        screen.open(ROUTE);
        select_june(&mut screen, 5);
        screen.apply_filters();
        drop(screen);

        clock.advance(60_000);
        let store = SessionStore::new(durable, session, clock);
        let mut screen = ReportScreen::new(
            store,
            client,
            Arc::new(StubRasterizer),
            AssembleOptions::default(),
            10,
            "Wingman Creative",
            "Acme Coffee",
            None,
        );
        let outcome = screen.open(ROUTE);
        assert_eq!(outcome, LoadOutcome::Restored);
        assert_eq!(*screen.phase(), ScreenPhase::Ready);
        assert_eq!(screen.pages().page_count(), 4);
        assert_eq!(screen.filter().selected_page_id(), "facebook1");
        assert!(screen.filter().selected_range().is_some());
    }
}
