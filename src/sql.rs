//! The sql module translates query descriptions into SQL, owns the SQLite
//! driver for the local library database, and demarshals relational result
//! rows into registry entities.
//!
//! Translation is a pure function of the description: the linked-table set
//! picks the join plan, filter groups render as `AND ( 0 OR ... )` blocks
//! inside one `AND ( 1 ... )` envelope, and every text literal passes
//! through the driver's escape function before interpolation. Raw results
//! come back as a flat row-major list of column values with a fixed column
//! count per entity kind.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::clientlib::ClientLibrary;
use crate::config::Config;
use crate::errors::{Result, ViolaError};
use crate::meta::{CompilationPolicy, EntityList, TrackData};
use crate::query::{
    column_ident, AlbumMode, FilterTerm, Function, NumberComparison, QueryDescription, QueryKind, QueryStrategy,
    SortKey, Tables, Value,
};
use crate::registry::{EntityRegistry, RegistryMaps};

static LIBRARY_SCHEMA: &str = include_str!("schema.sql");

/// Opaque relational backend executor. The translator hands it finished
/// query text; it hands back rows. Implementations are collection-scoped
/// and must be callable from any thread that has passed through the
/// `ThreadRegistrar` for their client library (if any).
pub trait SqlDriver: Send + Sync {
    /// Escape a text literal for single-quoted interpolation.
    fn escape(&self, text: &str) -> String;

    /// Dialect's random-ordering function.
    fn random_function(&self) -> &'static str {
        "RANDOM()"
    }

    /// Execute `sql` and return the result set as a flat, row-major list of
    /// column values.
    fn query(&self, sql: &str) -> Result<Vec<Option<String>>>;

    fn is_connected(&self) -> bool;

    fn disconnect(&self);

    /// The native client library backing this driver, when it requires
    /// per-thread registration.
    fn client_library(&self) -> Option<Arc<dyn ClientLibrary>> {
        None
    }
}

/// Driver over a local SQLite database. SQLite needs no per-thread client
/// registration; connection access is serialized through a mutex instead.
pub struct SqliteDriver {
    conn: Mutex<Option<Connection>>,
}

impl SqliteDriver {
    pub fn open(path: &Path) -> Result<SqliteDriver> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;
            PRAGMA journal_mode = WAL;
            PRAGMA busy_timeout = 15000;
            ",
        )?;
        Ok(SqliteDriver { conn: Mutex::new(Some(conn)) })
    }

    pub fn open_in_memory() -> Result<SqliteDriver> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(SqliteDriver { conn: Mutex::new(Some(conn)) })
    }

    pub fn from_connection(conn: Connection) -> SqliteDriver {
        SqliteDriver { conn: Mutex::new(Some(conn)) }
    }

    /// Run a batch of statements (schema setup, test seeding).
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        let guard = self.conn.lock().unwrap();
        let conn = guard.as_ref().ok_or_else(|| ViolaError::Backend("connection closed".to_string()))?;
        conn.execute_batch(sql)?;
        Ok(())
    }
}

impl SqlDriver for SqliteDriver {
    fn escape(&self, text: &str) -> String {
        text.replace('\'', "''")
    }

    fn query(&self, sql: &str) -> Result<Vec<Option<String>>> {
        let guard = self.conn.lock().unwrap();
        let conn = guard.as_ref().ok_or_else(|| ViolaError::Backend("connection closed".to_string()))?;
        let mut stmt = conn.prepare(sql)?;
        let column_count = stmt.column_count();
        let mut rows = stmt.query([])?;
        let mut flat = Vec::new();
        while let Some(row) = rows.next()? {
            for i in 0..column_count {
                let value: rusqlite::types::Value = row.get(i)?;
                flat.push(match value {
                    rusqlite::types::Value::Null => None,
                    rusqlite::types::Value::Integer(n) => Some(n.to_string()),
                    rusqlite::types::Value::Real(f) => Some(f.to_string()),
                    rusqlite::types::Value::Text(s) => Some(s),
                    rusqlite::types::Value::Blob(_) => None,
                });
            }
        }
        Ok(flat)
    }

    fn is_connected(&self) -> bool {
        self.conn.lock().unwrap().is_some()
    }

    fn disconnect(&self) {
        *self.conn.lock().unwrap() = None;
    }
}

/// Connect to the library database with the standard pragmas.
pub fn connect(c: &Config) -> Result<Connection> {
    let conn = Connection::open(&c.library_database_path)?;
    conn.execute_batch(
        "
        PRAGMA foreign_keys = ON;
        PRAGMA journal_mode = WAL;
        PRAGMA busy_timeout = 15000;
        ",
    )?;
    Ok(conn)
}

/// Create the library database if missing, or nuke and recreate it when the
/// stored schema hash no longer matches the schema on disk. The database is
/// a cache over the music sources, not source-of-truth, so recreation is
/// always safe.
pub fn maybe_create_database(c: &Config) -> Result<()> {
    let mut hasher = Sha256::new();
    hasher.update(LIBRARY_SCHEMA.as_bytes());
    let schema_hash = format!("{:x}", hasher.finalize());

    let config_hash_fields = serde_json::json!({
        "unknown_label": c.unknown_label,
    });
    let mut hasher = Sha256::new();
    hasher.update(serde_json::to_string(&config_hash_fields)?.as_bytes());
    let config_hash = format!("{:x}", hasher.finalize());

    {
        let conn = connect(c)?;
        let exists: bool = conn.query_row(
            "SELECT EXISTS(
                SELECT * FROM sqlite_master
                WHERE type = 'table' AND name = '_schema_hash'
            )",
            [],
            |row| row.get(0),
        )?;

        if exists {
            use rusqlite::OptionalExtension;
            let result: Option<(String, String, String)> = conn
                .query_row("SELECT schema_hash, config_hash, version FROM _schema_hash", [], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
                })
                .optional()?;

            if let Some((db_schema_hash, db_config_hash, db_version)) = result {
                if db_schema_hash == schema_hash
                    && db_config_hash == config_hash
                    && db_version == crate::common::VERSION
                {
                    return Ok(());
                }
            }
        }
    }

    if c.library_database_path.exists() {
        info!("library database schema changed; recreating");
        std::fs::remove_file(&c.library_database_path)?;
    }

    let conn = connect(c)?;
    conn.execute_batch(LIBRARY_SCHEMA)?;
    conn.execute_batch(
        "
        CREATE TABLE _schema_hash (
            schema_hash TEXT
          , config_hash TEXT
          , version TEXT
          , PRIMARY KEY (schema_hash, config_hash, version)
        )
        ",
    )?;
    conn.execute(
        "INSERT INTO _schema_hash (schema_hash, config_hash, version) VALUES (?1, ?2, ?3)",
        rusqlite::params![schema_hash, config_hash, crate::common::VERSION],
    )?;

    Ok(())
}

const TRACK_RETURN_VALUES: &str = "tracks.id, tracks.url, tracks.title, tracks.tracknumber, \
     tracks.discnumber, tracks.length, tracks.bitrate, tracks.samplerate, tracks.comment, \
     tracks.playcount, tracks.score, tracks.added_at, artists.id, artists.name, albums.id, \
     albums.name, albumartists.id, albumartists.name, genres.id, genres.name, composers.id, \
     composers.name, years.id, years.name";

/// Result-set column count per entity kind; the demarshaler chunks the flat
/// row list by this.
pub fn column_count(kind: QueryKind) -> usize {
    match kind {
        QueryKind::Track => 24,
        QueryKind::Album => 4,
        QueryKind::Artist | QueryKind::Genre | QueryKind::Composer | QueryKind::Year => 2,
    }
}

fn return_values(kind: QueryKind) -> &'static str {
    match kind {
        QueryKind::Track => TRACK_RETURN_VALUES,
        QueryKind::Artist => "artists.name, artists.id",
        QueryKind::Album => "albums.name, albums.id, albumartists.id, albumartists.name",
        QueryKind::Genre => "genres.name, genres.id",
        QueryKind::Composer => "composers.name, composers.id",
        QueryKind::Year => "years.name, years.id",
    }
}

fn column(table: Tables, value: Value) -> String {
    match column_ident(table, value) {
        Some((table_ident, value_ident)) => format!("{table_ident}.{value_ident}"),
        // builder methods validate pairs before accepting them
        None => unreachable!("unvalidated column pair: {table:?}/{value:?}"),
    }
}

/// Display column used by text filters and matches for each table.
fn display_column(table: Tables) -> Option<&'static str> {
    match table {
        Tables::TRACKS => Some("tracks.title"),
        Tables::ARTISTS => Some("artists.name"),
        Tables::ALBUMS => Some("albums.name"),
        Tables::GENRES => Some("genres.name"),
        Tables::COMPOSERS => Some("composers.name"),
        Tables::YEARS => Some("years.name"),
        _ => None,
    }
}

/// Case-insensitive substring condition. `%`/`_`/`/` in the needle are
/// escaped so they match literally, with `/` declared as the escape
/// character.
fn like_condition(driver: &dyn SqlDriver, text: &str) -> String {
    let escaped = driver.escape(text).replace('/', "//").replace('%', "/%").replace('_', "/_");
    format!("LIKE '%{escaped}%' ESCAPE '/'")
}

fn append_dimension_joins(from: &mut String, tables: Tables, exclude: Tables) {
    let mut tables = tables;
    tables.remove(exclude);
    tables.remove(Tables::TRACKS);
    if tables.contains(Tables::ARTISTS) {
        from.push_str(" LEFT JOIN artists ON tracks.artist = artists.id");
    }
    if tables.contains(Tables::ALBUMS) {
        from.push_str(" LEFT JOIN albums ON tracks.album = albums.id");
    }
    if tables.contains(Tables::GENRES) {
        from.push_str(" LEFT JOIN genres ON tracks.genre = genres.id");
    }
    if tables.contains(Tables::COMPOSERS) {
        from.push_str(" LEFT JOIN composers ON tracks.composer = composers.id");
    }
    if tables.contains(Tables::YEARS) {
        from.push_str(" LEFT JOIN years ON tracks.year = years.id");
    }
}

/// Build the FROM clause. The queried kind's own table anchors the query;
/// any other linked table first pulls in `tracks` as the join spine, then
/// the remaining dimension tables hang off it.
fn link_tables(kind: QueryKind, linked: Tables) -> String {
    let mut from = String::new();
    match kind {
        QueryKind::Track => {
            from.push_str("tracks");
            from.push_str(" LEFT JOIN artists ON tracks.artist = artists.id");
            from.push_str(" LEFT JOIN albums ON tracks.album = albums.id");
            from.push_str(" LEFT JOIN artists AS albumartists ON albums.artist = albumartists.id");
            from.push_str(" LEFT JOIN genres ON tracks.genre = genres.id");
            from.push_str(" LEFT JOIN composers ON tracks.composer = composers.id");
            from.push_str(" LEFT JOIN years ON tracks.year = years.id");
        }
        QueryKind::Artist => {
            from.push_str("artists");
            let mut remaining = linked;
            remaining.remove(Tables::ARTISTS);
            if !remaining.is_empty() {
                from.push_str(" INNER JOIN tracks ON tracks.artist = artists.id");
                append_dimension_joins(&mut from, remaining, Tables::ARTISTS);
            }
        }
        QueryKind::Album => {
            from.push_str("albums LEFT JOIN artists AS albumartists ON albums.artist = albumartists.id");
            let mut remaining = linked;
            remaining.remove(Tables::ALBUMS);
            if !remaining.is_empty() {
                from.push_str(" INNER JOIN tracks ON tracks.album = albums.id");
                append_dimension_joins(&mut from, remaining, Tables::ALBUMS);
            }
        }
        QueryKind::Genre => {
            from.push_str("genres");
            let mut remaining = linked;
            remaining.remove(Tables::GENRES);
            if !remaining.is_empty() {
                from.push_str(" INNER JOIN tracks ON tracks.genre = genres.id");
                append_dimension_joins(&mut from, remaining, Tables::GENRES);
            }
        }
        QueryKind::Composer => {
            from.push_str("composers");
            let mut remaining = linked;
            remaining.remove(Tables::COMPOSERS);
            if !remaining.is_empty() {
                from.push_str(" INNER JOIN tracks ON tracks.composer = composers.id");
                append_dimension_joins(&mut from, remaining, Tables::COMPOSERS);
            }
        }
        QueryKind::Year => {
            from.push_str("years");
            let mut remaining = linked;
            remaining.remove(Tables::YEARS);
            if !remaining.is_empty() {
                from.push_str(" INNER JOIN tracks ON tracks.year = years.id");
                append_dimension_joins(&mut from, remaining, Tables::YEARS);
            }
        }
    }
    from
}

fn match_condition(term: &crate::query::MatchTerm, desc: &QueryDescription, driver: &dyn SqlDriver) -> String {
    let mut clause = String::from("AND ( 0 ");
    for table in term.tables.members() {
        let Some(col) = display_column(table) else { continue };
        clause.push_str(&format!("OR {col} = '{}' ", driver.escape(&term.text)));
        if desc.match_is_unknown(&term.text) {
            clause.push_str(&format!("OR {col} = '' "));
        }
    }
    clause.push_str(") ");
    clause
}

fn filter_condition(term: &FilterTerm, desc: &QueryDescription, driver: &dyn SqlDriver) -> String {
    match term {
        FilterTerm::Contains { tables, text } => {
            let mut clause = String::from("AND ( 0 ");
            let like = like_condition(driver, text);
            for table in tables.members() {
                let Some(col) = display_column(table) else { continue };
                clause.push_str(&format!("OR {col} {like} "));
                if desc.filter_matches_unknown(text) {
                    clause.push_str(&format!("OR {col} = '' "));
                }
            }
            clause.push_str(") ");
            clause
        }
        FilterTerm::Excludes { tables, text } => {
            let mut clause = String::from("AND ( 1 ");
            let like = like_condition(driver, text);
            for table in tables.members() {
                let Some(col) = display_column(table) else { continue };
                clause.push_str(&format!("AND {col} NOT {like} "));
                if desc.filter_matches_unknown(text) {
                    clause.push_str(&format!("AND {col} <> '' "));
                }
            }
            clause.push_str(") ");
            clause
        }
        FilterTerm::Number { table, value, n, comparison } => {
            let op = match comparison {
                NumberComparison::Equals => "=",
                NumberComparison::GreaterThan => ">",
                NumberComparison::LessThan => "<",
            };
            format!("AND ( {} {op} {n} ) ", column(*table, *value))
        }
    }
}

/// Alias for an aggregate sort column: `<function><table><value>`.
fn function_alias(function: Function, table: Tables, value: Value) -> String {
    let (table_ident, value_ident) = column_ident(table, value).expect("unvalidated aggregate column");
    format!("{}{}{}", function.sql_name().to_lowercase(), table_ident, value_ident)
}

/// Compose the full SELECT for a description against a relational driver.
pub fn build_select(desc: &QueryDescription, driver: &dyn SqlDriver) -> Result<String> {
    let kind = desc.kind.ok_or(crate::errors::ViolaExpectedError::QueryNotConfigured)?;

    let mut linked = desc.linked;
    if desc.album_mode != AlbumMode::AllAlbums {
        linked |= Tables::ALBUMS;
    }

    let mut query = String::from("SELECT ");
    if desc.distinct {
        query.push_str("DISTINCT ");
    }
    query.push_str(return_values(kind));
    for sort in &desc.sorts {
        if let SortKey::Function { function, table, value, .. } = sort {
            query.push_str(&format!(
                ", {}({}) AS {}",
                function.sql_name(),
                column(*table, *value),
                function_alias(*function, *table, *value)
            ));
        }
    }

    query.push_str(" FROM ");
    query.push_str(&link_tables(kind, linked));

    query.push_str(" WHERE 1 ");
    match desc.album_mode {
        AlbumMode::OnlyCompilations => query.push_str("AND albums.artist IS NULL "),
        AlbumMode::OnlyNormalAlbums => query.push_str("AND albums.artist IS NOT NULL "),
        AlbumMode::AllAlbums => {}
    }
    for term in &desc.matches {
        query.push_str(&match_condition(term, desc, driver));
    }
    if !desc.filters.is_empty() {
        query.push_str("AND ( 1 ");
        for term in &desc.filters {
            query.push_str(&filter_condition(term, desc, driver));
        }
        query.push_str(") ");
    }

    if let Some((table, value)) = desc.group {
        query.push_str(&format!("GROUP BY {} ", column(table, value)));
    }

    if !desc.sorts.is_empty() {
        let keys: Vec<String> = desc
            .sorts
            .iter()
            .map(|sort| match sort {
                SortKey::Column { table, value, descending } => {
                    let col = column(*table, *value);
                    let numeric = value.is_numeric() || *table == Tables::YEARS;
                    let expr = if numeric { col } else { format!("LOWER({col})") };
                    if *descending {
                        format!("{expr} DESC")
                    } else {
                        expr
                    }
                }
                SortKey::Function { function, table, value, descending } => {
                    let alias = function_alias(*function, *table, *value);
                    if *descending {
                        format!("{alias} DESC")
                    } else {
                        alias
                    }
                }
                SortKey::Random => driver.random_function().to_string(),
            })
            .collect();
        query.push_str(&format!("ORDER BY {} ", keys.join(", ")));
    }

    if desc.max_results >= 0 {
        query.push_str(&format!("LIMIT {} OFFSET 0 ", desc.max_results));
    }

    Ok(query.trim_end().to_string())
}

fn text(chunk: &[Option<String>], i: usize) -> &str {
    chunk.get(i).and_then(|v| v.as_deref()).unwrap_or("")
}

fn int(chunk: &[Option<String>], i: usize) -> i64 {
    text(chunk, i).parse().unwrap_or(0)
}

fn float(chunk: &[Option<String>], i: usize) -> f64 {
    text(chunk, i).parse().unwrap_or(0.0)
}

/// Demarshal one flat result set into entities, resolving every reference
/// through `maps`. This is the shared core for both incremental batches and
/// detached full-scan builds.
pub(crate) fn demarshal_into(
    kind: QueryKind,
    rows: &[Option<String>],
    maps: &mut RegistryMaps,
    policy: &dyn CompilationPolicy,
) -> EntityList {
    let cols = column_count(kind);
    let row_count = rows.len() / cols;
    match kind {
        QueryKind::Track => {
            let mut tracks = Vec::with_capacity(row_count);
            for chunk in rows.chunks_exact(cols) {
                let artist = maps.artist(int(chunk, 12), text(chunk, 13));
                let album_artist = match chunk.get(17).and_then(|v| v.as_deref()) {
                    Some(name) => Some(maps.artist(int(chunk, 16), name)),
                    None => None,
                };
                let album = maps.album(int(chunk, 14), text(chunk, 15), album_artist.as_ref());
                let genre = maps.genre(int(chunk, 18), text(chunk, 19));
                let composer = maps.composer(int(chunk, 20), text(chunk, 21));
                let year = maps.year(int(chunk, 22), text(chunk, 23));
                let data = TrackData {
                    id: int(chunk, 0),
                    url: text(chunk, 1).to_string(),
                    title: text(chunk, 2).to_string(),
                    track_number: int(chunk, 3) as i32,
                    disc_number: int(chunk, 4) as i32,
                    length_seconds: int(chunk, 5) as i32,
                    bitrate: int(chunk, 6) as i32,
                    sample_rate: int(chunk, 7) as i32,
                    comment: text(chunk, 8).to_string(),
                    play_count: int(chunk, 9) as i32,
                    score: float(chunk, 10),
                    added_at: text(chunk, 11).to_string(),
                };
                tracks.push(maps.track(policy, data, &artist, &album, &genre, &composer, &year));
            }
            EntityList::Tracks(tracks)
        }
        QueryKind::Artist => {
            let mut artists = Vec::with_capacity(row_count);
            for chunk in rows.chunks_exact(cols) {
                artists.push(maps.artist(int(chunk, 1), text(chunk, 0)));
            }
            EntityList::Artists(artists)
        }
        QueryKind::Album => {
            let mut albums = Vec::with_capacity(row_count);
            for chunk in rows.chunks_exact(cols) {
                let album_artist = match chunk.get(3).and_then(|v| v.as_deref()) {
                    Some(name) => Some(maps.artist(int(chunk, 2), name)),
                    None => None,
                };
                albums.push(maps.album(int(chunk, 1), text(chunk, 0), album_artist.as_ref()));
            }
            EntityList::Albums(albums)
        }
        QueryKind::Genre => {
            let mut genres = Vec::with_capacity(row_count);
            for chunk in rows.chunks_exact(cols) {
                genres.push(maps.genre(int(chunk, 1), text(chunk, 0)));
            }
            EntityList::Genres(genres)
        }
        QueryKind::Composer => {
            let mut composers = Vec::with_capacity(row_count);
            for chunk in rows.chunks_exact(cols) {
                composers.push(maps.composer(int(chunk, 1), text(chunk, 0)));
            }
            EntityList::Composers(composers)
        }
        QueryKind::Year => {
            let mut years = Vec::with_capacity(row_count);
            for chunk in rows.chunks_exact(cols) {
                years.push(maps.year(int(chunk, 1), text(chunk, 0)));
            }
            EntityList::Years(years)
        }
    }
}

/// Strategy adapter gluing a relational driver into the query machinery.
pub struct SqlStrategy {
    driver: Arc<dyn SqlDriver>,
}

impl SqlStrategy {
    pub fn new(driver: Arc<dyn SqlDriver>) -> SqlStrategy {
        SqlStrategy { driver }
    }
}

impl QueryStrategy for SqlStrategy {
    fn build_query(&self, desc: &QueryDescription) -> Result<String> {
        build_select(desc, self.driver.as_ref())
    }

    fn execute(
        &self,
        desc: &QueryDescription,
        registry: &EntityRegistry,
        abort: &AtomicBool,
    ) -> Result<Option<EntityList>> {
        let kind = desc.kind.ok_or(crate::errors::ViolaExpectedError::QueryNotConfigured)?;
        if abort.load(Ordering::SeqCst) {
            return Ok(None);
        }
        let sql = build_select(desc, self.driver.as_ref())?;
        debug!(%sql, "executing query");
        let rows = self.driver.query(&sql)?;
        // the backend call may have blocked for a while; give the abort one
        // last chance before touching the registry
        if abort.load(Ordering::SeqCst) {
            return Ok(None);
        }
        let mut batch = registry.batch();
        let (maps, policy) = batch.parts();
        Ok(Some(demarshal_into(kind, &rows, maps, policy)))
    }

    fn is_connected(&self) -> bool {
        self.driver.is_connected()
    }
}

/// Re-enumerate every track in the backend and atomically replace the
/// registry's maps with the freshly built graph. Readers observe either the
/// old complete graph or the new one, never a mix.
pub(crate) fn scan_all_tracks(
    driver: &dyn SqlDriver,
    registry: &EntityRegistry,
    unknown_label: &str,
    abort: &AtomicBool,
) -> Result<usize> {
    let desc = QueryDescription::for_kind(QueryKind::Track, unknown_label.to_string());
    let sql = build_select(&desc, driver)?;
    let rows = driver.query(&sql)?;
    if abort.load(Ordering::SeqCst) {
        return Ok(0);
    }
    let mut maps = RegistryMaps::default();
    let list = demarshal_into(QueryKind::Track, &rows, &mut maps, registry.compilation_policy());
    let track_count = list.len();
    registry.replace_all(maps);
    debug!(track_count, "full scan rebuilt registry");
    Ok(track_count)
}
