use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use rusqlite::Connection;

use crate::collection::{Collection, ScanOutcome, SqlCollection};
use crate::job::{QueryOutcome, WorkerPool};
use crate::meta::EntityList;
use crate::query::{AlbumMode, Function, NumberComparison, Tables, Value};
use crate::testing;

fn scan(collection: &SqlCollection) -> usize {
    match collection.start_full_scan().wait().unwrap() {
        ScanOutcome::Completed { track_count } => track_count,
        ScanOutcome::Failed => panic!("full scan failed"),
    }
}

fn completed(outcome: QueryOutcome) -> EntityList {
    match outcome {
        QueryOutcome::Completed(list) => list,
        QueryOutcome::Aborted => panic!("query was aborted"),
    }
}

fn artist_names(list: &EntityList) -> Vec<String> {
    match list {
        EntityList::Artists(artists) => artists.iter().map(|a| a.name().to_string()).collect(),
        other => panic!("expected artists, got {other:?}"),
    }
}

fn album_names(list: &EntityList) -> Vec<String> {
    match list {
        EntityList::Albums(albums) => albums.iter().map(|a| a.name().to_string()).collect(),
        other => panic!("expected albums, got {other:?}"),
    }
}

fn track_titles(list: &EntityList) -> Vec<String> {
    match list {
        EntityList::Tracks(tracks) => tracks.iter().map(|t| t.title().to_string()).collect(),
        other => panic!("expected tracks, got {other:?}"),
    }
}

#[test]
fn test_artist_scenario_three_tracks_two_artists() {
    let (collection, _tmp) = testing::scenario_collection();
    assert_eq!(scan(&collection), 3);

    let mut qm = collection.query_maker();
    qm.start_artist_query().order_by(Tables::ARTISTS, Value::Name, false);
    let list = completed(qm.run().unwrap().wait().unwrap());

    assert_eq!(artist_names(&list), vec!["Alice", "bob"]);

    let alice = collection.registry().find_artist("Alice").unwrap();
    let bob = collection.registry().find_artist("bob").unwrap();
    assert_eq!(alice.tracks().len(), 1);
    assert_eq!(bob.tracks().len(), 2);

    // the query result is the same shared instance the registry owns
    if let EntityList::Artists(artists) = &list {
        assert!(Arc::ptr_eq(&artists[0], &alice));
        assert!(Arc::ptr_eq(&artists[1], &bob));
    }
}

#[test]
fn test_limit_one_returns_alphabetically_first() {
    let (collection, _tmp) = testing::scenario_collection();
    scan(&collection);

    let mut qm = collection.query_maker();
    qm.start_artist_query().order_by(Tables::ARTISTS, Value::Name, false).limit_max_result_size(1);
    let list = completed(qm.run().unwrap().wait().unwrap());

    assert_eq!(artist_names(&list), vec!["Alice"]);
}

#[test]
fn test_dedup_tracks_share_artist_instance() {
    let (collection, _tmp) = testing::scenario_collection();
    scan(&collection);

    let mut qm = collection.query_maker();
    qm.start_track_query();
    let list = completed(qm.run().unwrap().wait().unwrap());

    let bob = collection.registry().find_artist("bob").unwrap();
    if let EntityList::Tracks(tracks) = &list {
        let bobs: Vec<_> = tracks.iter().filter(|t| t.artist().name() == "bob").collect();
        assert_eq!(bobs.len(), 2);
        for track in bobs {
            assert!(Arc::ptr_eq(track.artist(), &bob));
        }
    } else {
        panic!("expected tracks");
    }
}

#[test]
fn test_filter_matches_either_artist_or_album() {
    let (collection, _tmp) = testing::seeded_collection();

    // "foo" hits only via the album name Foothills
    let mut qm = collection.query_maker();
    qm.start_track_query()
        .add_filter(Tables::ARTISTS | Tables::ALBUMS, "foo")
        .order_by(Tables::TRACKS, Value::Title, false);
    let list = completed(qm.run().unwrap().wait().unwrap());
    assert_eq!(track_titles(&list), vec!["Song C"]);

    // two filters AND together
    let mut qm = collection.query_maker();
    qm.start_track_query()
        .add_filter(Tables::ARTISTS | Tables::ALBUMS, "foo")
        .add_filter(Tables::ARTISTS, "ali")
        .order_by(Tables::TRACKS, Value::Title, false);
    let list = completed(qm.run().unwrap().wait().unwrap());
    assert_eq!(track_titles(&list), vec!["Song C"]);

    let mut qm = collection.query_maker();
    qm.start_track_query()
        .add_filter(Tables::ARTISTS | Tables::ALBUMS, "basement")
        .order_by(Tables::TRACKS, Value::Title, false);
    let list = completed(qm.run().unwrap().wait().unwrap());
    assert_eq!(track_titles(&list), vec!["Song A", "Song B"]);
}

#[test]
fn test_exclude_filter() {
    let (collection, _tmp) = testing::seeded_collection();

    let mut qm = collection.query_maker();
    qm.start_track_query()
        .exclude_filter(Tables::ALBUMS, "mixtape")
        .order_by(Tables::TRACKS, Value::Title, false);
    let list = completed(qm.run().unwrap().wait().unwrap());
    assert_eq!(track_titles(&list), vec!["Song A", "Song B", "Song C", "Song D", "Song E"]);
}

#[test]
fn test_number_filter() {
    let (collection, _tmp) = testing::seeded_collection();

    let mut qm = collection.query_maker();
    qm.start_track_query()
        .add_number_filter(Tables::TRACKS, Value::PlayCount, 2, NumberComparison::GreaterThan)
        .order_by(Tables::TRACKS, Value::Title, false);
    let list = completed(qm.run().unwrap().wait().unwrap());
    assert_eq!(track_titles(&list), vec!["Song A", "Song C", "Song E"]);
}

#[test]
fn test_numeric_sort_orders_by_value_not_lexicographically() {
    let (collection, _tmp) = testing::scenario_collection();

    let mut qm = collection.query_maker();
    qm.start_track_query().order_by(Tables::TRACKS, Value::TrackNumber, false);
    let list = completed(qm.run().unwrap().wait().unwrap());

    // tracknumbers 10, 2, 1 must come back 1, 2, 10
    assert_eq!(track_titles(&list), vec!["Song C", "Song B", "Song A"]);
}

#[test]
fn test_text_sort_is_case_insensitive() {
    let (collection, _tmp) = testing::seeded_collection();

    let mut qm = collection.query_maker();
    qm.start_artist_query().order_by(Tables::ARTISTS, Value::Name, false);
    let list = completed(qm.run().unwrap().wait().unwrap());

    // a raw byte sort would put Zed before bob
    assert_eq!(artist_names(&list), vec!["", "Alice", "bob", "Zed"]);
}

#[test]
fn test_unknown_match_includes_empty_columns() {
    let (collection, _tmp) = testing::seeded_collection();

    let mut qm = collection.query_maker();
    qm.start_track_query().add_match(Tables::ARTISTS, "Unknown");
    let list = completed(qm.run().unwrap().wait().unwrap());
    assert_eq!(track_titles(&list), vec!["Song D"]);
}

#[test]
fn test_genre_query_with_filter() {
    let (collection, _tmp) = testing::seeded_collection();

    let mut qm = collection.query_maker();
    qm.start_genre_query().add_filter(Tables::GENRES, "ja");
    let list = completed(qm.run().unwrap().wait().unwrap());
    match list {
        EntityList::Genres(genres) => {
            assert_eq!(genres.len(), 1);
            assert_eq!(genres[0].name(), "Jazz");
        }
        other => panic!("expected genres, got {other:?}"),
    }
}

#[test]
fn test_aggregate_sort_by_track_count() {
    let (collection, _tmp) = testing::seeded_collection();

    let mut qm = collection.query_maker();
    qm.start_artist_query()
        .group_by(Tables::ARTISTS, Value::Id)
        .order_by_function(Function::Count, Tables::TRACKS, Value::Id, true);
    let list = completed(qm.run().unwrap().wait().unwrap());

    // bob has three tracks, more than anyone else
    assert_eq!(artist_names(&list)[0], "bob");
}

#[test]
fn test_album_modes() {
    let (collection, _tmp) = testing::seeded_collection();

    let mut qm = collection.query_maker();
    qm.start_album_query()
        .set_album_mode(AlbumMode::OnlyCompilations)
        .order_by(Tables::ALBUMS, Value::Name, false);
    let list = completed(qm.run().unwrap().wait().unwrap());
    assert_eq!(album_names(&list), vec!["", "Mixtape"]);

    let mut qm = collection.query_maker();
    qm.start_album_query()
        .set_album_mode(AlbumMode::OnlyNormalAlbums)
        .order_by(Tables::ALBUMS, Value::Name, false);
    let list = completed(qm.run().unwrap().wait().unwrap());
    assert_eq!(album_names(&list), vec!["Basement Tapes", "Foothills", "Zenith"]);
}

#[test]
fn test_compilation_flag_after_scan() {
    let (collection, _tmp) = testing::seeded_collection();
    scan(&collection);

    let mixtape = collection.registry().find_album("Mixtape", None).unwrap();
    assert!(mixtape.is_compilation());
    assert!(mixtape.album_artist().is_none());

    let basement = collection.registry().find_album("Basement Tapes", Some("bob")).unwrap();
    assert!(!basement.is_compilation());
    assert_eq!(basement.album_artist().unwrap().name(), "bob");
}

#[test]
fn test_abort_race_before_execution_touches_nothing() {
    testing::init();
    // a single-worker pool occupied by a blocker keeps the query job queued
    let pool = Arc::new(WorkerPool::new(1).unwrap());
    let (collection, _tmp) = testing::scenario_collection_with_pool(Arc::clone(&pool));

    let gate = Arc::new((Mutex::new(false), Condvar::new()));
    let blocker_gate = Arc::clone(&gate);
    pool.spawn(move || {
        let (lock, cvar) = &*blocker_gate;
        let mut released = lock.lock().unwrap();
        while !*released {
            released = cvar.wait(released).unwrap();
        }
    });

    let mut qm = collection.query_maker();
    qm.start_artist_query();
    let handle = qm.run().unwrap();
    qm.abort_query();

    {
        let (lock, cvar) = &*gate;
        *lock.lock().unwrap() = true;
        cvar.notify_all();
    }

    assert!(matches!(handle.wait().unwrap(), QueryOutcome::Aborted));
    assert_eq!(collection.registry().artist_count(), 0);
    assert_eq!(collection.registry().track_count(), 0);
}

#[test]
fn test_disconnect_delivers_empty_results_and_fires_removal_once() {
    let (collection, _tmp) = testing::scenario_collection();
    let removal_rx = collection.subscribe_removal();

    collection.disconnect();

    let mut qm = collection.query_maker();
    qm.start_artist_query();
    let list = completed(qm.run().unwrap().wait().unwrap());
    assert!(list.is_empty());

    assert_eq!(removal_rx.recv_timeout(Duration::from_secs(5)).unwrap(), collection.collection_id());
    assert!(removal_rx.recv_timeout(Duration::from_millis(100)).is_err());
}

#[test]
fn test_full_scan_batch_swaps_registry() {
    let (collection, tmp) = testing::scenario_collection();
    assert_eq!(scan(&collection), 3);
    assert_eq!(collection.registry().artist_count(), 2);
    let old_bob = collection.registry().find_artist("bob").unwrap();

    // a new track lands in the database behind the collection's back
    let conn = Connection::open(tmp.path().join(testing::DB_FILENAME)).unwrap();
    conn.execute_batch(
        "INSERT INTO artists (id, name) VALUES (3, 'Carol');
         INSERT INTO tracks (id, url, title, artist, album, genre, composer, year, tracknumber, added_at)
         VALUES (4, 'file:///music/x.flac', 'Song X', 3, 1, 1, 1, 1, 2, '2023-02-01T00:00:00Z');",
    )
    .unwrap();

    assert_eq!(scan(&collection), 4);
    assert_eq!(collection.registry().artist_count(), 3);

    // the rescan rebuilt the graph; old instances are replaced wholesale
    let new_bob = collection.registry().find_artist("bob").unwrap();
    assert!(!Arc::ptr_eq(&old_bob, &new_bob));
    assert!(collection.registry().find_artist("Carol").is_some());
}

#[test]
fn test_run_blocking_returns_results_directly() {
    let (collection, _tmp) = testing::scenario_collection();

    let mut qm = collection.query_maker();
    qm.start_track_query().order_by(Tables::TRACKS, Value::Title, false);
    let list = qm.run_blocking().unwrap();
    assert_eq!(track_titles(&list), vec!["Song A", "Song B", "Song C"]);
}

#[test]
fn test_queries_on_different_makers_run_concurrently() {
    let (collection, _tmp) = testing::seeded_collection();

    let mut makers: Vec<_> = (0..4)
        .map(|_| {
            let mut qm = collection.query_maker();
            qm.start_artist_query().order_by(Tables::ARTISTS, Value::Name, false);
            qm
        })
        .collect();
    let handles: Vec<_> = makers.iter_mut().map(|qm| qm.run().unwrap()).collect();

    for handle in handles {
        let list = completed(handle.wait().unwrap());
        assert_eq!(artist_names(&list), vec!["", "Alice", "bob", "Zed"]);
    }
}
