use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::debug::DebugLogger;
use crate::insights::{DateRange, InsightsPayload};
use crate::storage::StorageScope;

/// Lifetime of a browsing session and of a persisted analytics payload.
pub const SESSION_TTL_MS: u64 = 30 * 60 * 1000;

/// Session-scoped key holding the session marker record.
pub const SESSION_KEY: &str = "facebookCampaignSession";

/// Durable key holding the persisted analytics state.
pub const ANALYTICS_KEY: &str = "facebookCampaignAnalytics";

/// Page selected when no persisted or URL-provided choice exists.
pub const DEFAULT_PAGE_ID: &str = "facebook1";

/// Route family whose screens share the persisted analytics state.
pub const GUARDED_ROUTE_PREFIX: &str = "/facebook-campaign-analytics";

/// Millisecond clock. Swapped for a manual clock in tests so TTL
/// boundaries can be probed exactly.
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> u64;
}

/// Wall clock backed by the system time.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// Test clock advanced by hand.
pub struct ManualClock {
    millis: Mutex<u64>,
}

impl ManualClock {
    pub fn new(start_millis: u64) -> Self {
        Self {
            millis: Mutex::new(start_millis),
        }
    }

    pub fn advance(&self, delta_millis: u64) {
        if let Ok(mut millis) = self.millis.lock() {
            *millis += delta_millis;
        }
    }

    pub fn set(&self, now_millis: u64) {
        if let Ok(mut millis) = self.millis.lock() {
            *millis = now_millis;
        }
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.millis.lock().map(|millis| *millis).unwrap_or(0)
    }
}

/// One route change as seen by the store. `previous` is `None` on the
/// initial mount of the host view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteTransition {
    pub previous: Option<String>,
    pub next: String,
}

/// Result of [`SessionStore::load_persisted`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Outside the guarded route family or no valid session; nothing read.
    Skipped,
    /// No persisted record existed.
    Nothing,
    /// The persisted record failed to parse; both scopes were cleared.
    Corrupt,
    /// The payload exceeded its lifetime and was discarded; the
    /// persisted page and range selections were kept.
    StalePayload,
    /// Page, range, and payload restored verbatim.
    Restored,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SessionRecord {
    id: String,
    timestamp: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AnalyticsRecord {
    #[serde(rename = "campaignData")]
    campaign_data: Option<InsightsPayload>,
    #[serde(rename = "selectedPage")]
    selected_page: String,
    #[serde(rename = "selectedRange")]
    selected_range: Option<DateRange>,
    timestamp: u64,
}

enum SessionRead {
    Missing,
    Corrupt,
    Expired,
    Valid(SessionRecord),
}

// Distinguishes sessions minted in the same millisecond, even across
// store instances.
static SESSION_SEQ: AtomicU64 = AtomicU64::new(0);

/// Owns the in-memory analytics selection and mirrors it into the two
/// storage scopes. Persistence only happens inside the guarded route
/// family while a valid session marker exists; everything else reads
/// and writes memory only.
pub struct SessionStore {
    durable: Arc<dyn StorageScope>,
    session: Arc<dyn StorageScope>,
    clock: Arc<dyn Clock>,
    debug: Option<Arc<DebugLogger>>,
    ttl_ms: u64,
    route_prefix: String,
    current_path: Option<String>,
    selected_page_id: String,
    selected_range: Option<DateRange>,
    payload: Option<InsightsPayload>,
}

impl SessionStore {
    pub fn new(
        durable: Arc<dyn StorageScope>,
        session: Arc<dyn StorageScope>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            durable,
            session,
            clock,
            debug: None,
            ttl_ms: SESSION_TTL_MS,
            route_prefix: GUARDED_ROUTE_PREFIX.to_string(),
            current_path: None,
            selected_page_id: DEFAULT_PAGE_ID.to_string(),
            selected_range: None,
            payload: None,
        }
    }

    pub fn with_ttl_ms(mut self, ttl_ms: u64) -> Self {
        self.ttl_ms = ttl_ms;
        self
    }

    pub fn with_route_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.route_prefix = prefix.into();
        self
    }

    pub(crate) fn with_debug(mut self, debug: Option<Arc<DebugLogger>>) -> Self {
        self.debug = debug;
        self
    }

    pub fn selected_page_id(&self) -> &str {
        &self.selected_page_id
    }

    pub fn selected_range(&self) -> Option<DateRange> {
        self.selected_range
    }

    pub fn payload(&self) -> Option<&InsightsPayload> {
        self.payload.as_ref()
    }

    /// Drops the in-memory payload without touching either storage
    /// scope, as after a failed refetch.
    pub fn clear_payload(&mut self) {
        self.payload = None;
    }

    pub fn current_path(&self) -> Option<&str> {
        self.current_path.as_deref()
    }

    pub fn now_millis(&self) -> u64 {
        self.clock.now_millis()
    }

    /// Id of the live session marker, if one exists and parses.
    pub fn session_id(&self) -> Option<String> {
        let raw = self.session.get(SESSION_KEY)?;
        let record: SessionRecord = serde_json::from_str(&raw).ok()?;
        Some(record.id)
    }

    pub fn set_selection(&mut self, page_id: &str, range: Option<DateRange>) {
        self.selected_page_id = non_empty_or_default(page_id);
        self.selected_range = range;
    }

    /// Feeds one route change into the store. Equivalent to
    /// `apply_transition` with the previously observed path.
    pub fn navigate(&mut self, next: &str) {
        let transition = RouteTransition {
            previous: self.current_path.clone(),
            next: next.to_string(),
        };
        self.apply_transition(&transition);
    }

    /// Applies the session rules for one route transition:
    /// entering the route family from outside discards everything and
    /// mints a fresh session; leaving it discards everything; moving
    /// within one side is a no-op. The initial mount keeps a still
    /// valid session alive and otherwise starts clean.
    pub fn apply_transition(&mut self, transition: &RouteTransition) {
        let entering = self.is_guarded(&transition.next);
        if let Some(debug) = self.debug.clone() {
            debug.log_json(&format!(
                "{{\"event\":\"route.transition\",\"previous\":{},\"next\":\"{}\",\"guarded\":{}}}",
                match &transition.previous {
                    Some(path) => format!("\"{}\"", crate::debug::json_escape(path)),
                    None => "null".to_string(),
                },
                crate::debug::json_escape(&transition.next),
                entering
            ));
        }
        match &transition.previous {
            None => {
                if entering {
                    self.ensure_session();
                } else {
                    self.clear_all();
                }
            }
            Some(previous) => {
                let was_inside = self.is_guarded(previous);
                if was_inside && !entering {
                    self.clear_all();
                } else if !was_inside && entering {
                    self.clear_all();
                    self.start_session();
                }
                // Same-side moves (including query-only changes) are inert.
            }
        }
        self.current_path = Some(transition.next.clone());
    }

    /// Restores persisted analytics state into memory. Only consulted
    /// inside the route family with a valid session; a corrupt record
    /// wipes both scopes, and a payload past its lifetime is dropped
    /// while the persisted page and range selections survive.
    pub fn load_persisted(&mut self) -> LoadOutcome {
        if !self.currently_guarded() || !self.session_is_valid() {
            return LoadOutcome::Skipped;
        }
        self.refresh_session();
        let Some(raw) = self.durable.get(ANALYTICS_KEY) else {
            return LoadOutcome::Nothing;
        };
        let record: AnalyticsRecord = match serde_json::from_str(&raw) {
            Ok(record) => record,
            Err(_) => {
                self.counter("storage.corrupt");
                self.clear_all();
                return LoadOutcome::Corrupt;
            }
        };
        self.selected_page_id = non_empty_or_default(&record.selected_page);
        self.selected_range = record.selected_range;
        let now = self.clock.now_millis();
        if now.saturating_sub(record.timestamp) >= self.ttl_ms {
            self.counter("payload.stale_discard");
            self.payload = None;
            return LoadOutcome::StalePayload;
        }
        self.payload = record.campaign_data;
        if self.payload.is_some() {
            LoadOutcome::Restored
        } else {
            LoadOutcome::Nothing
        }
    }

    /// Records a fetched payload in memory and, when the current route
    /// is guarded by a valid session, persists it with a fresh
    /// timestamp. The in-memory copy is updated regardless so an
    /// unguarded caller still sees its own data.
    pub fn save(&mut self, page_id: &str, range: DateRange, payload: InsightsPayload) {
        self.selected_page_id = non_empty_or_default(page_id);
        self.selected_range = Some(range);
        self.payload = Some(payload);
        if !self.currently_guarded() || !self.session_is_valid() {
            self.counter("save.skipped");
            return;
        }
        self.refresh_session();
        let record = AnalyticsRecord {
            campaign_data: self.payload.clone(),
            selected_page: self.selected_page_id.clone(),
            selected_range: self.selected_range,
            timestamp: self.clock.now_millis(),
        };
        if let Ok(raw) = serde_json::to_string(&record) {
            self.durable.set(ANALYTICS_KEY, &raw);
            self.counter("save.persisted");
        }
    }

    /// Applies URL-supplied page and range parameters. All three must
    /// be present and both dates must parse as `YYYY-MM-DD`, otherwise
    /// nothing changes. On success the selection is overridden and the
    /// caller must refetch; any in-memory payload no longer matches.
    pub fn apply_url_overrides(
        &mut self,
        page: Option<&str>,
        start: Option<&str>,
        end: Option<&str>,
    ) -> bool {
        let (Some(page), Some(start), Some(end)) = (page, start, end) else {
            return false;
        };
        let (Ok(from), Ok(to)) = (
            start.parse::<chrono::NaiveDate>(),
            end.parse::<chrono::NaiveDate>(),
        ) else {
            self.counter("overrides.invalid_date");
            return false;
        };
        self.selected_page_id = non_empty_or_default(page);
        self.selected_range = Some(DateRange::new(from, to));
        self.counter("overrides.applied");
        true
    }

    /// Removes both storage records and resets the in-memory selection
    /// to its defaults.
    pub fn clear_all(&mut self) {
        self.session.remove(SESSION_KEY);
        self.durable.remove(ANALYTICS_KEY);
        self.selected_page_id = DEFAULT_PAGE_ID.to_string();
        self.selected_range = None;
        self.payload = None;
        self.counter("session.cleared");
    }

    fn currently_guarded(&self) -> bool {
        self.current_path
            .as_deref()
            .is_some_and(|path| self.is_guarded(path))
    }

    fn is_guarded(&self, path: &str) -> bool {
        let path = path.split(['?', '#']).next().unwrap_or(path);
        path.starts_with(&self.route_prefix)
    }

    fn ensure_session(&mut self) {
        match self.read_session() {
            SessionRead::Valid(_) => self.refresh_session(),
            _ => {
                self.clear_all();
                self.start_session();
            }
        }
    }

    fn start_session(&mut self) {
        let now = self.clock.now_millis();
        let seq = SESSION_SEQ.fetch_add(1, Ordering::Relaxed) + 1;
        let record = SessionRecord {
            id: format!("{now}-{seq}"),
            timestamp: now,
        };
        if let Ok(raw) = serde_json::to_string(&record) {
            self.session.set(SESSION_KEY, &raw);
        }
        self.counter("session.created");
    }

    fn refresh_session(&mut self) {
        if let SessionRead::Valid(record) = self.read_session() {
            let refreshed = SessionRecord {
                id: record.id,
                timestamp: self.clock.now_millis(),
            };
            if let Ok(raw) = serde_json::to_string(&refreshed) {
                self.session.set(SESSION_KEY, &raw);
                self.counter("session.refreshed");
            }
        }
    }

    /// Checks the session marker, purging it when expired and wiping
    /// both scopes when it fails to parse.
    fn session_is_valid(&mut self) -> bool {
        match self.read_session() {
            SessionRead::Valid(_) => true,
            SessionRead::Expired => {
                self.session.remove(SESSION_KEY);
                self.counter("session.expired");
                false
            }
            SessionRead::Corrupt => {
                self.counter("storage.corrupt");
                self.clear_all();
                false
            }
            SessionRead::Missing => false,
        }
    }

    fn read_session(&self) -> SessionRead {
        let Some(raw) = self.session.get(SESSION_KEY) else {
            return SessionRead::Missing;
        };
        let Ok(record) = serde_json::from_str::<SessionRecord>(&raw) else {
            return SessionRead::Corrupt;
        };
        let now = self.clock.now_millis();
        if now.saturating_sub(record.timestamp) >= self.ttl_ms {
            SessionRead::Expired
        } else {
            SessionRead::Valid(record)
        }
    }

    fn counter(&self, key: &str) {
        if let Some(debug) = &self.debug {
            debug.increment(key, 1);
        }
    }
}

fn non_empty_or_default(page_id: &str) -> String {
    if page_id.trim().is_empty() {
        DEFAULT_PAGE_ID.to_string()
    } else {
        page_id.to_string()
    }
}
