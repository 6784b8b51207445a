//! The query module provides the builder through which consumers describe
//! what to fetch from a collection, and the run/abort surface that hands the
//! finalized description to a worker job.
//!
//! A `QueryMaker` is bound to one collection. The backend-specific
//! translation lives behind the `QueryStrategy` trait (`sql::SqlStrategy`
//! for relational sources, `memory::MemoryStrategy` for device snapshots),
//! injected at construction, so there is exactly one concrete maker and one
//! concrete job type.

use std::ops::{BitOr, BitOrAssign};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};

use tracing::{debug, warn};

use crate::clientlib::ThreadRegistrar;
use crate::collection::RemovalSignal;
use crate::errors::{Result, ViolaExpectedError};
use crate::job::{Job, JobShared, QueryHandle, QueryOutcome, WorkerPool};
use crate::meta::EntityList;
use crate::registry::EntityRegistry;

/// The entity kind a query produces. Selected once per maker; the first
/// selection wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryKind {
    Track,
    Artist,
    Album,
    Genre,
    Composer,
    Year,
}

impl QueryKind {
    pub fn table(self) -> Tables {
        match self {
            QueryKind::Track => Tables::TRACKS,
            QueryKind::Artist => Tables::ARTISTS,
            QueryKind::Album => Tables::ALBUMS,
            QueryKind::Genre => Tables::GENRES,
            QueryKind::Composer => Tables::COMPOSERS,
            QueryKind::Year => Tables::YEARS,
        }
    }
}

/// Set of linked tables, accumulated implicitly as builder methods touch
/// them. Table presence drives the translator's join plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Tables(u32);

impl Tables {
    pub const NONE: Tables = Tables(0);
    pub const TRACKS: Tables = Tables(1);
    pub const ARTISTS: Tables = Tables(1 << 1);
    pub const ALBUMS: Tables = Tables(1 << 2);
    pub const GENRES: Tables = Tables(1 << 3);
    pub const COMPOSERS: Tables = Tables(1 << 4);
    pub const YEARS: Tables = Tables(1 << 5);

    const ALL: [Tables; 6] =
        [Tables::TRACKS, Tables::ARTISTS, Tables::ALBUMS, Tables::GENRES, Tables::COMPOSERS, Tables::YEARS];

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, other: Tables) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersects(self, other: Tables) -> bool {
        self.0 & other.0 != 0
    }

    pub fn remove(&mut self, other: Tables) {
        self.0 &= !other.0;
    }

    /// Decompose into single-table members, in a fixed deterministic order.
    pub fn members(self) -> Vec<Tables> {
        Tables::ALL.iter().copied().filter(|t| self.contains(*t)).collect()
    }

    /// True when `self` is one of the single-table constants.
    pub fn is_single(self) -> bool {
        self.0 != 0 && self.0 & (self.0 - 1) == 0
    }
}

impl BitOr for Tables {
    type Output = Tables;
    fn bitor(self, rhs: Tables) -> Tables {
        Tables(self.0 | rhs.0)
    }
}

impl BitOrAssign for Tables {
    fn bitor_assign(&mut self, rhs: Tables) {
        self.0 |= rhs.0;
    }
}

/// Abstract column selector, resolved against a table by the translator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Value {
    Id,
    Name,
    Url,
    Title,
    TrackNumber,
    DiscNumber,
    Length,
    Bitrate,
    SampleRate,
    Comment,
    PlayCount,
    Score,
    AddedAt,
}

impl Value {
    /// Numeric-typed values compare by raw value; everything else compares
    /// case-insensitively. `AddedAt` is an RFC3339 string, which orders
    /// chronologically as raw text.
    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            Value::Id
                | Value::TrackNumber
                | Value::DiscNumber
                | Value::Length
                | Value::Bitrate
                | Value::SampleRate
                | Value::PlayCount
                | Value::Score
                | Value::AddedAt
        )
    }
}

/// (table, column) identifier pair for a valid (table, value) combination,
/// or None when the combination does not resolve to a column.
pub(crate) fn column_ident(table: Tables, value: Value) -> Option<(&'static str, &'static str)> {
    let table_ident = match table {
        Tables::TRACKS => "tracks",
        Tables::ARTISTS => "artists",
        Tables::ALBUMS => "albums",
        Tables::GENRES => "genres",
        Tables::COMPOSERS => "composers",
        Tables::YEARS => "years",
        _ => return None,
    };
    let value_ident = match (table, value) {
        (Tables::TRACKS, Value::Id) => "id",
        (Tables::TRACKS, Value::Url) => "url",
        (Tables::TRACKS, Value::Title) => "title",
        (Tables::TRACKS, Value::TrackNumber) => "tracknumber",
        (Tables::TRACKS, Value::DiscNumber) => "discnumber",
        (Tables::TRACKS, Value::Length) => "length",
        (Tables::TRACKS, Value::Bitrate) => "bitrate",
        (Tables::TRACKS, Value::SampleRate) => "samplerate",
        (Tables::TRACKS, Value::Comment) => "comment",
        (Tables::TRACKS, Value::PlayCount) => "playcount",
        (Tables::TRACKS, Value::Score) => "score",
        (Tables::TRACKS, Value::AddedAt) => "added_at",
        (Tables::TRACKS, _) => return None,
        (_, Value::Id) => "id",
        (_, Value::Name) => "name",
        _ => return None,
    };
    Some((table_ident, value_ident))
}

/// Aggregate wrapper applied to a sort value. The translated column is
/// aliased `<function><table><value>` and ORDER BY references the alias.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Function {
    Count,
    Min,
    Max,
    Avg,
    Sum,
}

impl Function {
    pub fn sql_name(self) -> &'static str {
        match self {
            Function::Count => "COUNT",
            Function::Min => "MIN",
            Function::Max => "MAX",
            Function::Avg => "AVG",
            Function::Sum => "SUM",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NumberComparison {
    Equals,
    GreaterThan,
    LessThan,
}

/// Album restriction carried by the query: all albums, only compilations
/// (no stored album artist), or only normal albums.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AlbumMode {
    #[default]
    AllAlbums,
    OnlyCompilations,
    OnlyNormalAlbums,
}

/// One AND'd predicate group. Contains/Excludes span a table set (OR'd and
/// AND'd across the set respectively); Number targets a single column.
#[derive(Debug, Clone)]
pub enum FilterTerm {
    Contains { tables: Tables, text: String },
    Excludes { tables: Tables, text: String },
    Number { table: Tables, value: Value, n: i64, comparison: NumberComparison },
}

/// Exact-equality predicate over a table set's display columns.
#[derive(Debug, Clone)]
pub struct MatchTerm {
    pub tables: Tables,
    pub text: String,
}

#[derive(Debug, Clone)]
pub enum SortKey {
    Column { table: Tables, value: Value, descending: bool },
    Function { function: Function, table: Tables, value: Value, descending: bool },
    Random,
}

/// The dialect-agnostic, reusable description of what to fetch. Frozen from
/// the job's perspective once `run()` snapshots it.
#[derive(Debug, Clone)]
pub struct QueryDescription {
    pub kind: Option<QueryKind>,
    pub linked: Tables,
    pub filters: Vec<FilterTerm>,
    pub matches: Vec<MatchTerm>,
    pub sorts: Vec<SortKey>,
    pub group: Option<(Tables, Value)>,
    pub album_mode: AlbumMode,
    pub distinct: bool,
    pub max_results: i64,
    pub unknown_label: String,
}

impl QueryDescription {
    pub(crate) fn new(unknown_label: String) -> QueryDescription {
        QueryDescription {
            kind: None,
            linked: Tables::NONE,
            filters: Vec::new(),
            matches: Vec::new(),
            sorts: Vec::new(),
            group: None,
            album_mode: AlbumMode::AllAlbums,
            distinct: false,
            max_results: -1,
            unknown_label,
        }
    }

    /// Bare description for a given kind, as used by full scans.
    pub(crate) fn for_kind(kind: QueryKind, unknown_label: String) -> QueryDescription {
        let mut desc = QueryDescription::new(unknown_label);
        desc.select_kind(kind);
        desc
    }

    fn select_kind(&mut self, kind: QueryKind) -> bool {
        if self.kind.is_some() {
            return false;
        }
        self.kind = Some(kind);
        self.linked |= kind.table();
        // non-track kinds deduplicate result rows at the backend
        self.distinct = kind != QueryKind::Track;
        if kind == QueryKind::Track {
            self.linked |= Tables::ARTISTS | Tables::ALBUMS | Tables::GENRES | Tables::COMPOSERS | Tables::YEARS;
        }
        true
    }

    /// Whether a contains-filter on `text` should also match empty display
    /// columns: the localized "Unknown" bucket treats absence as a match.
    pub fn filter_matches_unknown(&self, text: &str) -> bool {
        self.unknown_label.to_lowercase().contains(&text.to_lowercase())
    }

    /// Exact-match analogue: only the full label triggers the empty match.
    pub fn match_is_unknown(&self, text: &str) -> bool {
        text == self.unknown_label
    }
}

/// Lifecycle of one query maker, observable for diagnostics and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryState {
    Idle,
    Configured,
    Queued,
    Executing,
    Completed,
    Aborted,
}

/// Backend capability interface: translate a description, execute it, and
/// demarshal through the registry. Implementations must observe the abort
/// flag between the backend call and any registry mutation.
pub trait QueryStrategy: Send + Sync {
    /// Render the translated form of the description: SQL text for
    /// relational backends, a traversal summary for in-memory ones.
    fn build_query(&self, desc: &QueryDescription) -> Result<String>;

    /// Execute and demarshal. `Ok(None)` means the abort flag was observed
    /// before any results were committed to the registry.
    fn execute(
        &self,
        desc: &QueryDescription,
        registry: &EntityRegistry,
        abort: &AtomicBool,
    ) -> Result<Option<EntityList>>;

    /// Whether the underlying backend connection is still usable.
    fn is_connected(&self) -> bool {
        true
    }
}

pub struct QueryMaker {
    desc: QueryDescription,
    strategy: Arc<dyn QueryStrategy>,
    registry: Arc<EntityRegistry>,
    pool: Arc<WorkerPool>,
    registrar: Option<Arc<ThreadRegistrar>>,
    removal: Arc<RemovalSignal>,
    collection_id: String,
    shared: Arc<JobShared>,
}

impl std::fmt::Debug for QueryMaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryMaker")
            .field("desc", &self.desc)
            .field("collection_id", &self.collection_id)
            .finish_non_exhaustive()
    }
}

impl QueryMaker {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        strategy: Arc<dyn QueryStrategy>,
        registry: Arc<EntityRegistry>,
        pool: Arc<WorkerPool>,
        registrar: Option<Arc<ThreadRegistrar>>,
        removal: Arc<RemovalSignal>,
        collection_id: String,
        unknown_label: String,
    ) -> QueryMaker {
        QueryMaker {
            desc: QueryDescription::new(unknown_label),
            strategy,
            registry,
            pool,
            registrar,
            removal,
            collection_id,
            shared: Arc::new(JobShared { abort: AtomicBool::new(false), state: Mutex::new(QueryState::Idle) }),
        }
    }

    pub fn state(&self) -> QueryState {
        *self.shared.state.lock().unwrap()
    }

    pub fn description(&self) -> &QueryDescription {
        &self.desc
    }

    pub fn collection_id(&self) -> &str {
        &self.collection_id
    }

    fn set_state(&self, state: QueryState) {
        *self.shared.state.lock().unwrap() = state;
    }

    fn select_kind(&mut self, kind: QueryKind) -> &mut Self {
        if !self.desc.select_kind(kind) {
            warn!(requested = ?kind, selected = ?self.desc.kind, "query kind already selected; ignoring");
            return self;
        }
        if self.state() == QueryState::Idle {
            self.set_state(QueryState::Configured);
        }
        self
    }

    pub fn start_track_query(&mut self) -> &mut Self {
        self.select_kind(QueryKind::Track)
    }

    pub fn start_artist_query(&mut self) -> &mut Self {
        self.select_kind(QueryKind::Artist)
    }

    pub fn start_album_query(&mut self) -> &mut Self {
        self.select_kind(QueryKind::Album)
    }

    pub fn start_genre_query(&mut self) -> &mut Self {
        self.select_kind(QueryKind::Genre)
    }

    pub fn start_composer_query(&mut self) -> &mut Self {
        self.select_kind(QueryKind::Composer)
    }

    pub fn start_year_query(&mut self) -> &mut Self {
        self.select_kind(QueryKind::Year)
    }

    /// Append one OR-group of case-insensitive substring predicates over the
    /// display columns of `tables`. Separate calls AND together.
    pub fn add_filter(&mut self, tables: Tables, text: &str) -> &mut Self {
        if text.is_empty() || tables.is_empty() {
            return self;
        }
        self.desc.filters.push(FilterTerm::Contains { tables, text: text.to_string() });
        self.desc.linked |= tables;
        self
    }

    /// Negated `add_filter`: rows whose display columns all avoid `text`.
    pub fn exclude_filter(&mut self, tables: Tables, text: &str) -> &mut Self {
        if text.is_empty() || tables.is_empty() {
            return self;
        }
        self.desc.filters.push(FilterTerm::Excludes { tables, text: text.to_string() });
        self.desc.linked |= tables;
        self
    }

    /// Exact-equality match over the display columns of `tables`. Matching
    /// the configured "Unknown" label additionally matches empty columns.
    pub fn add_match(&mut self, tables: Tables, text: &str) -> &mut Self {
        if tables.is_empty() {
            return self;
        }
        self.desc.matches.push(MatchTerm { tables, text: text.to_string() });
        self.desc.linked |= tables;
        self
    }

    pub fn add_number_filter(
        &mut self,
        table: Tables,
        value: Value,
        n: i64,
        comparison: NumberComparison,
    ) -> &mut Self {
        if column_ident(table, value).is_none() || !(value.is_numeric() || table == Tables::YEARS) {
            warn!(?table, ?value, "number filter on a non-numeric or unknown column; ignoring");
            return self;
        }
        self.desc.filters.push(FilterTerm::Number { table, value, n, comparison });
        self.desc.linked |= table;
        self
    }

    /// Append a sort key. Numeric columns sort by raw value, text columns
    /// case-insensitively.
    pub fn order_by(&mut self, table: Tables, value: Value, descending: bool) -> &mut Self {
        if column_ident(table, value).is_none() {
            warn!(?table, ?value, "sort on unknown column; ignoring");
            return self;
        }
        self.desc.sorts.push(SortKey::Column { table, value, descending });
        self.desc.linked |= table;
        self
    }

    /// Append an aggregate sort key; the aggregate joins the select list
    /// under a `<function><table><value>` alias.
    pub fn order_by_function(
        &mut self,
        function: Function,
        table: Tables,
        value: Value,
        descending: bool,
    ) -> &mut Self {
        if column_ident(table, value).is_none() {
            warn!(?table, ?value, "aggregate sort on unknown column; ignoring");
            return self;
        }
        self.desc.sorts.push(SortKey::Function { function, table, value, descending });
        self.desc.linked |= table;
        self
    }

    pub fn order_by_random(&mut self) -> &mut Self {
        self.desc.sorts.push(SortKey::Random);
        self
    }

    pub fn group_by(&mut self, table: Tables, value: Value) -> &mut Self {
        if column_ident(table, value).is_none() {
            warn!(?table, ?value, "group by unknown column; ignoring");
            return self;
        }
        self.desc.group = Some((table, value));
        self.desc.linked |= table;
        self
    }

    pub fn set_album_mode(&mut self, mode: AlbumMode) -> &mut Self {
        if mode != AlbumMode::AllAlbums {
            self.desc.linked |= Tables::ALBUMS;
        }
        self.desc.album_mode = mode;
        self
    }

    /// Truncate results to `n` entities; negative means unlimited.
    pub fn limit_max_result_size(&mut self, n: i64) -> &mut Self {
        self.desc.max_results = n;
        self
    }

    /// Return to the initial, kind-unselected state. Idempotent. Rejected
    /// while a job is queued or executing.
    pub fn reset(&mut self) -> Result<&mut Self> {
        {
            let mut state = self.shared.state.lock().unwrap();
            if matches!(*state, QueryState::Queued | QueryState::Executing) {
                return Err(ViolaExpectedError::QueryInFlight.into());
            }
            *state = QueryState::Idle;
        }
        self.desc = QueryDescription::new(self.desc.unknown_label.clone());
        Ok(self)
    }

    /// The translated query text, for diagnostics.
    pub fn build_query(&self) -> Result<String> {
        if self.desc.kind.is_none() {
            return Err(ViolaExpectedError::QueryNotConfigured.into());
        }
        self.strategy.build_query(&self.desc)
    }

    /// Submit the query to the worker pool. Returns immediately; the
    /// outcome arrives through the returned handle. A second `run()` while
    /// a job is in flight is rejected with `QueryInFlight`.
    pub fn run(&mut self) -> Result<QueryHandle> {
        let (job, handle) = self.prepare_job()?;
        debug!(collection_id = %self.collection_id, job_id = %job.job_id(), "queueing query job");
        self.pool.spawn(move || job.execute());
        Ok(handle)
    }

    /// Execute on the calling thread instead of the pool and return the
    /// result list directly. Same translation, demarshal, and error
    /// recovery as `run()`.
    pub fn run_blocking(&mut self) -> Result<EntityList> {
        let kind = self.desc.kind.ok_or(ViolaExpectedError::QueryNotConfigured)?;
        let (job, handle) = self.prepare_job()?;
        job.execute();
        match handle.wait()? {
            QueryOutcome::Completed(list) => Ok(list),
            QueryOutcome::Aborted => Ok(EntityList::empty(kind)),
        }
    }

    fn prepare_job(&mut self) -> Result<(Job, QueryHandle)> {
        let kind = self.desc.kind.ok_or(ViolaExpectedError::QueryNotConfigured)?;
        {
            let mut state = self.shared.state.lock().unwrap();
            if matches!(*state, QueryState::Queued | QueryState::Executing) {
                return Err(ViolaExpectedError::QueryInFlight.into());
            }
            *state = QueryState::Queued;
        }
        self.shared.abort.store(false, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel();
        let job = Job::new(
            self.desc.clone(),
            kind,
            Arc::clone(&self.strategy),
            Arc::clone(&self.registry),
            Arc::clone(&self.shared),
            self.registrar.clone(),
            Arc::clone(&self.removal),
            self.collection_id.clone(),
            tx,
        );
        Ok((job, QueryHandle::new(kind, rx)))
    }

    /// Best-effort cooperative cancellation. Prevents result delivery and
    /// registry mutation; does not interrupt a backend call in progress.
    pub fn abort_query(&self) {
        self.shared.abort.store(true, Ordering::SeqCst);
    }
}
