//! Shared test fixtures: seeded collections over throwaway SQLite files and
//! canned device record snapshots.

use std::sync::{Arc, Once};

use tempfile::TempDir;

use crate::collection::SqlCollection;
use crate::config::DeviceSource;
use crate::job::WorkerPool;
use crate::memory::DeviceRecord;
use crate::sql::SqliteDriver;

static INIT: Once = Once::new();

pub fn init() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
            )
            .with_test_writer()
            .try_init();
    });
}

pub fn pool() -> Arc<WorkerPool> {
    Arc::new(WorkerPool::new(2).expect("failed to build worker pool"))
}

pub const DB_FILENAME: &str = "library.sqlite3";

/// Three tracks, two artists: ("Song A", bob, "Basement Tapes"),
/// ("Song B", bob, "Basement Tapes"), ("Song C", Alice, "Foothills").
const SCENARIO_SEED: &str = r#"
INSERT INTO artists (id, name) VALUES (1, 'Alice'), (2, 'bob');
INSERT INTO albums (id, name, artist) VALUES (1, 'Foothills', 1), (2, 'Basement Tapes', 2);
INSERT INTO genres (id, name) VALUES (1, 'Rock');
INSERT INTO composers (id, name) VALUES (1, 'Clara');
INSERT INTO years (id, name) VALUES (1, '1999');
INSERT INTO tracks
       (id, url                   , title   , artist, album, genre, composer, year, tracknumber, discnumber, length, bitrate, samplerate, comment, playcount, score, added_at)
VALUES (1 , 'file:///music/a.flac', 'Song A', 2     , 2    , 1    , 1       , 1   , 10         , 1         , 120   , 192    , 44100     , ''     , 3        , 0.8  , '2023-01-01T00:00:00Z')
     , (2 , 'file:///music/b.flac', 'Song B', 2     , 2    , 1    , 1       , 1   , 2          , 1         , 240   , 256    , 44100     , ''     , 1        , 0.5  , '2023-01-02T00:00:00Z')
     , (3 , 'file:///music/c.flac', 'Song C', 1     , 1    , 1    , 1       , 1   , 1          , 1         , 180   , 320    , 48000     , ''     , 7        , 0.9  , '2023-01-03T00:00:00Z');
"#;

/// Richer fixture: the scenario trio plus an unknown-everything track and a
/// two-artist "Mixtape" album with no stored artist.
const FULL_SEED: &str = r#"
INSERT INTO artists (id, name) VALUES (1, 'Alice'), (2, 'bob'), (3, ''), (4, 'Zed');
INSERT INTO albums (id, name, artist) VALUES (1, 'Foothills', 1), (2, 'Basement Tapes', 2), (3, '', NULL), (4, 'Mixtape', NULL), (5, 'Zenith', 4);
INSERT INTO genres (id, name) VALUES (1, 'Rock'), (2, 'Jazz'), (3, '');
INSERT INTO composers (id, name) VALUES (1, 'Clara'), (2, 'Dmitri'), (3, '');
INSERT INTO years (id, name) VALUES (1, '1999'), (2, '2003'), (3, '');
INSERT INTO tracks
       (id, url                   , title     , artist, album, genre, composer, year, tracknumber, discnumber, length, bitrate, samplerate, comment    , playcount, score, added_at)
VALUES (1 , 'file:///music/a.flac', 'Song A'  , 2     , 2    , 1    , 1       , 1   , 10         , 1         , 120   , 192    , 44100     , ''         , 3        , 0.8  , '2023-01-01T00:00:00Z')
     , (2 , 'file:///music/b.flac', 'Song B'  , 2     , 2    , 1    , 2       , 2   , 2          , 1         , 240   , 256    , 44100     , 'live take', 1        , 0.5  , '2023-01-02T00:00:00Z')
     , (3 , 'file:///music/c.flac', 'Song C'  , 1     , 1    , 2    , 1       , 2   , 1          , 1         , 180   , 320    , 48000     , ''         , 7        , 0.9  , '2023-01-03T00:00:00Z')
     , (4 , 'file:///music/d.flac', 'Song D'  , 3     , 3    , 3    , 3       , 3   , 0          , 0         , 95    , 128    , 22050     , ''         , 0        , 0.0  , '2023-01-04T00:00:00Z')
     , (5 , 'file:///music/e.flac', 'Duet One', 1     , 4    , 1    , 1       , 1   , 1          , 1         , 200   , 192    , 44100     , ''         , 2        , 0.1  , '2023-01-05T00:00:00Z')
     , (6 , 'file:///music/f.flac', 'Duet Two', 2     , 4    , 2    , 2       , 2   , 2          , 1         , 210   , 192    , 44100     , ''         , 2        , 0.2  , '2023-01-06T00:00:00Z')
     , (7 , 'file:///music/g.flac', 'Song E'  , 4     , 5    , 1    , 1       , 1   , 5          , 1         , 150   , 192    , 44100     , ''         , 4        , 0.4  , '2023-01-07T00:00:00Z');
"#;

fn collection_with_seed(seed: &str, pool: Arc<WorkerPool>) -> (Arc<SqlCollection>, TempDir) {
    init();
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let db_path = temp_dir.path().join(DB_FILENAME);
    let driver = SqliteDriver::open(&db_path).expect("failed to open database");
    driver.execute_batch(include_str!("schema.sql")).expect("failed to create schema");
    driver.execute_batch(seed).expect("failed to seed database");
    let collection = SqlCollection::new(
        &format!("sql://{}", db_path.display()),
        "Test Library",
        Arc::new(driver),
        pool,
        "Unknown",
    );
    (collection, temp_dir)
}

pub fn scenario_collection() -> (Arc<SqlCollection>, TempDir) {
    collection_with_seed(SCENARIO_SEED, pool())
}

pub fn scenario_collection_with_pool(pool: Arc<WorkerPool>) -> (Arc<SqlCollection>, TempDir) {
    collection_with_seed(SCENARIO_SEED, pool)
}

pub fn seeded_collection() -> (Arc<SqlCollection>, TempDir) {
    collection_with_seed(FULL_SEED, pool())
}

pub fn device_source() -> DeviceSource {
    DeviceSource { id: "ipod-1".to_string(), name: "Test iPod".to_string() }
}

fn record(
    url: &str,
    title: &str,
    artist: &str,
    album: &str,
    genre: &str,
    year: &str,
    track_number: i32,
) -> DeviceRecord {
    DeviceRecord {
        url: url.to_string(),
        title: title.to_string(),
        artist: artist.to_string(),
        album: album.to_string(),
        genre: genre.to_string(),
        composer: String::new(),
        year: year.to_string(),
        track_number,
        disc_number: 1,
        length_seconds: 180,
        bitrate: 192,
        sample_rate: 44100,
        comment: String::new(),
        play_count: 0,
    }
}

/// Device mirror of the full fixture, including a compilation album and an
/// unknown-artist track.
pub fn device_records() -> Vec<DeviceRecord> {
    vec![
        record("ipod:///a.mp3", "Song A", "bob", "Basement Tapes", "Rock", "1999", 10),
        record("ipod:///b.mp3", "Song B", "bob", "Basement Tapes", "Rock", "2003", 2),
        record("ipod:///c.mp3", "Song C", "Alice", "Foothills", "Jazz", "2003", 1),
        record("ipod:///d.mp3", "Song D", "", "", "", "", 0),
        record("ipod:///e.mp3", "Duet One", "Alice", "Mixtape", "Rock", "1999", 1),
        record("ipod:///f.mp3", "Duet Two", "bob", "Mixtape", "Jazz", "2003", 2),
    ]
}
