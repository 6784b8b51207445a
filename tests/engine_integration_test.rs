use std::sync::Arc;

use tempfile::TempDir;

use viola::collection::{Collection, DeviceCollection, ScanOutcome, SqlCollection};
use viola::config::Config;
use viola::job::{QueryOutcome, WorkerPool};
use viola::memory::DeviceRecord;
use viola::meta::EntityList;
use viola::query::{Tables, Value};
use viola::sql::SqliteDriver;

const SEED: &str = r#"
INSERT INTO artists (id, name) VALUES (1, 'Alice'), (2, 'bob');
INSERT INTO albums (id, name, artist) VALUES (1, 'Foothills', 1), (2, 'Basement Tapes', 2);
INSERT INTO genres (id, name) VALUES (1, 'Rock');
INSERT INTO composers (id, name) VALUES (1, 'Clara');
INSERT INTO years (id, name) VALUES (1, '1999');
INSERT INTO tracks
       (id, url                   , title   , artist, album, genre, composer, year, tracknumber, added_at)
VALUES (1 , 'file:///music/a.flac', 'Song A', 2     , 2    , 1    , 1       , 1   , 10         , '2023-01-01T00:00:00Z')
     , (2 , 'file:///music/b.flac', 'Song B', 2     , 2    , 1    , 1       , 1   , 2          , '2023-01-02T00:00:00Z')
     , (3 , 'file:///music/c.flac', 'Song C', 1     , 1    , 1    , 1       , 1   , 1          , '2023-01-03T00:00:00Z');
"#;

fn write_config(temp_dir: &TempDir) -> Config {
    let db_path = temp_dir.path().join("library.sqlite3");
    let config_path = temp_dir.path().join("config.toml");
    std::fs::write(
        &config_path,
        format!(
            r#"
            library_database_path = "{}"
            max_workers = 2

            [[device_sources]]
            id = "ipod-1"
            name = "Test iPod"
            "#,
            db_path.display()
        ),
    )
    .unwrap();
    Config::parse(Some(&config_path)).unwrap()
}

fn completed(outcome: QueryOutcome) -> EntityList {
    match outcome {
        QueryOutcome::Completed(list) => list,
        QueryOutcome::Aborted => panic!("query was aborted"),
    }
}

#[test]
fn test_open_scan_and_query_local_library() {
    let temp_dir = TempDir::new().unwrap();
    let config = write_config(&temp_dir);
    let pool = Arc::new(WorkerPool::new(config.max_workers).unwrap());

    // first open bootstraps the schema
    let collection = SqlCollection::open(&config, Arc::clone(&pool)).unwrap();
    match collection.start_full_scan().wait().unwrap() {
        ScanOutcome::Completed { track_count } => assert_eq!(track_count, 0),
        ScanOutcome::Failed => panic!("scan failed"),
    }

    // seed some library content behind the scenes and rescan
    let seeder = SqliteDriver::open(&config.library_database_path).unwrap();
    seeder.execute_batch(SEED).unwrap();
    match collection.start_full_scan().wait().unwrap() {
        ScanOutcome::Completed { track_count } => assert_eq!(track_count, 3),
        ScanOutcome::Failed => panic!("scan failed"),
    }

    let mut qm = collection.query_maker();
    qm.start_artist_query().order_by(Tables::ARTISTS, Value::Name, false);
    let list = completed(qm.run().unwrap().wait().unwrap());
    match &list {
        EntityList::Artists(artists) => {
            assert_eq!(artists.len(), 2);
            assert_eq!(artists[0].name(), "Alice");
            assert_eq!(artists[1].name(), "bob");
            assert_eq!(artists[0].tracks().len(), 1);
            assert_eq!(artists[1].tracks().len(), 2);
        }
        other => panic!("expected artists, got {other:?}"),
    }

    // the uniform supertype view preserves order
    let data = list.as_data();
    assert_eq!(data[0].name(), "Alice");

    // filtered track query across artist and album display columns
    let mut qm = collection.query_maker();
    qm.start_track_query()
        .add_filter(Tables::ARTISTS | Tables::ALBUMS, "foo")
        .order_by(Tables::TRACKS, Value::Title, false);
    let list = completed(qm.run().unwrap().wait().unwrap());
    match list {
        EntityList::Tracks(tracks) => {
            assert_eq!(tracks.len(), 1);
            assert_eq!(tracks[0].title(), "Song C");
            assert_eq!(tracks[0].album().name(), "Foothills");
        }
        other => panic!("expected tracks, got {other:?}"),
    }
}

#[test]
fn test_reopen_keeps_database_when_schema_unchanged() {
    let temp_dir = TempDir::new().unwrap();
    let config = write_config(&temp_dir);
    let pool = Arc::new(WorkerPool::new(2).unwrap());

    {
        let collection = SqlCollection::open(&config, Arc::clone(&pool)).unwrap();
        let seeder = SqliteDriver::open(&config.library_database_path).unwrap();
        seeder.execute_batch(SEED).unwrap();
        collection.disconnect();
    }

    // same schema hash: reopening must not wipe the data
    let collection = SqlCollection::open(&config, pool).unwrap();
    match collection.start_full_scan().wait().unwrap() {
        ScanOutcome::Completed { track_count } => assert_eq!(track_count, 3),
        ScanOutcome::Failed => panic!("scan failed"),
    }
}

#[test]
fn test_device_collection_from_config_source() {
    let temp_dir = TempDir::new().unwrap();
    let config = write_config(&temp_dir);
    let pool = Arc::new(WorkerPool::new(2).unwrap());

    let records = vec![
        DeviceRecord {
            url: "ipod:///1.mp3".to_string(),
            title: "Portable One".to_string(),
            artist: "Alice".to_string(),
            album: "Roadtrip".to_string(),
            genre: "Rock".to_string(),
            year: "2001".to_string(),
            track_number: 1,
            ..DeviceRecord::default()
        },
        DeviceRecord {
            url: "ipod:///2.mp3".to_string(),
            title: "Portable Two".to_string(),
            artist: "bob".to_string(),
            album: "Roadtrip".to_string(),
            genre: "Rock".to_string(),
            year: "2001".to_string(),
            track_number: 2,
            ..DeviceRecord::default()
        },
    ];
    let collection =
        DeviceCollection::new(&config.device_sources[0], records, pool, &config.unknown_label);
    assert_eq!(collection.collection_id(), "device://ipod-1");

    let mut qm = collection.query_maker();
    qm.start_album_query();
    let list = completed(qm.run().unwrap().wait().unwrap());
    match list {
        EntityList::Albums(albums) => {
            assert_eq!(albums.len(), 1);
            assert_eq!(albums[0].name(), "Roadtrip");
            // two distinct artists and no stored album artist: compilation
            assert!(albums[0].is_compilation());
        }
        other => panic!("expected albums, got {other:?}"),
    }
}
