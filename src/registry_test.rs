use std::sync::Arc;

use crate::meta::{CompilationPolicy, DistinctArtistPolicy, TrackData, VariousArtistsLabelPolicy};
use crate::registry::{EntityRegistry, RegistryMaps};

fn track_data(url: &str, title: &str) -> TrackData {
    TrackData { url: url.to_string(), title: title.to_string(), ..TrackData::default() }
}

#[test]
fn test_same_natural_key_resolves_to_same_instance() {
    let registry = EntityRegistry::default();
    let mut batch = registry.batch();
    let first = batch.artist(1, "Ella");
    let second = batch.artist(99, "Ella");
    assert!(Arc::ptr_eq(&first, &second));
    // the first sighting's id sticks
    assert_eq!(second.id(), 1);
}

#[test]
fn test_albums_key_off_artist() {
    let registry = EntityRegistry::default();
    let mut batch = registry.batch();
    let ella = batch.artist(1, "Ella");
    let louis = batch.artist(2, "Louis");

    let hits_ella = batch.album(1, "Greatest Hits", Some(&ella));
    let hits_louis = batch.album(2, "Greatest Hits", Some(&louis));
    let hits_ella_again = batch.album(3, "Greatest Hits", Some(&ella));
    let hits_nobody = batch.album(4, "Greatest Hits", None);

    assert!(!Arc::ptr_eq(&hits_ella, &hits_louis));
    assert!(Arc::ptr_eq(&hits_ella, &hits_ella_again));
    assert!(!Arc::ptr_eq(&hits_ella, &hits_nobody));
}

#[test]
fn test_track_wires_cross_references_once() {
    let registry = EntityRegistry::default();
    let mut batch = registry.batch();
    let artist = batch.artist(1, "Ella");
    let album = batch.album(1, "Songbook", Some(&artist));
    let genre = batch.genre(1, "Jazz");
    let composer = batch.composer(1, "Gershwin");
    let year = batch.year(1, "1959");

    let track = batch.track(track_data("file:///t1", "Summertime"), &artist, &album, &genre, &composer, &year);
    let again = batch.track(track_data("file:///t1", "Summertime"), &artist, &album, &genre, &composer, &year);

    assert!(Arc::ptr_eq(&track, &again));
    assert!(Arc::ptr_eq(track.artist(), &artist));
    assert!(Arc::ptr_eq(track.album(), &album));
    assert_eq!(artist.tracks().len(), 1);
    assert_eq!(album.tracks().len(), 1);
    assert_eq!(genre.tracks().len(), 1);
    assert_eq!(composer.tracks().len(), 1);
    assert_eq!(year.tracks().len(), 1);
}

#[test]
fn test_distinct_artist_policy_flags_mixed_albums() {
    let registry = EntityRegistry::default();
    let mut batch = registry.batch();
    let ella = batch.artist(1, "Ella");
    let louis = batch.artist(2, "Louis");
    let album = batch.album(1, "Duets", None);
    let genre = batch.genre(1, "Jazz");
    let composer = batch.composer(1, "");
    let year = batch.year(1, "1957");

    batch.track(track_data("file:///d1", "Cheek to Cheek"), &ella, &album, &genre, &composer, &year);
    assert!(!album.is_compilation());
    // a single consistent artist is promoted to album artist
    assert_eq!(album.album_artist().unwrap().name(), "Ella");

    batch.track(track_data("file:///d2", "Summertime"), &louis, &album, &genre, &composer, &year);
    assert!(album.is_compilation());
    assert!(album.album_artist().is_none());
}

#[test]
fn test_explicit_album_artist_survives_guest_tracks() {
    let registry = EntityRegistry::default();
    let mut batch = registry.batch();
    let ella = batch.artist(1, "Ella");
    let louis = batch.artist(2, "Louis");
    let album = batch.album(1, "Songbook", Some(&ella));
    let genre = batch.genre(1, "Jazz");
    let composer = batch.composer(1, "");
    let year = batch.year(1, "1959");

    batch.track(track_data("file:///s1", "Night and Day"), &ella, &album, &genre, &composer, &year);
    batch.track(track_data("file:///s2", "Dream a Little"), &louis, &album, &genre, &composer, &year);

    assert!(!album.is_compilation());
    assert_eq!(album.album_artist().unwrap().name(), "Ella");
}

#[test]
fn test_various_artists_label_policy() {
    let policy = VariousArtistsLabelPolicy { label: "Various Artists".to_string() };
    assert!(policy.is_compilation(Some("various artists"), &[]));
    assert!(!policy.is_compilation(Some("Ella"), &["Ella".to_string(), "Louis".to_string()]));
    assert!(!policy.is_compilation(None, &["Ella".to_string(), "Louis".to_string()]));
}

#[test]
fn test_distinct_artist_policy_ignores_empty_names() {
    let policy = DistinctArtistPolicy;
    assert!(!policy.is_compilation(None, &["".to_string(), "Ella".to_string()]));
    assert!(policy.is_compilation(None, &["Louis".to_string(), "Ella".to_string()]));
}

#[test]
fn test_replace_all_swaps_the_whole_graph() {
    let registry = EntityRegistry::default();
    {
        let mut batch = registry.batch();
        batch.artist(1, "Ella");
        batch.artist(2, "Louis");
    }
    assert_eq!(registry.artist_count(), 2);
    let old_ella = registry.find_artist("Ella").unwrap();

    let mut maps = RegistryMaps::default();
    maps.artist(10, "Ella");
    registry.replace_all(maps);

    assert_eq!(registry.artist_count(), 1);
    let new_ella = registry.find_artist("Ella").unwrap();
    assert!(!Arc::ptr_eq(&old_ella, &new_ella));
    assert!(registry.find_artist("Louis").is_none());
}

#[test]
fn test_clear_empties_every_map() {
    let registry = EntityRegistry::default();
    {
        let mut batch = registry.batch();
        let artist = batch.artist(1, "Ella");
        let album = batch.album(1, "Songbook", Some(&artist));
        let genre = batch.genre(1, "Jazz");
        let composer = batch.composer(1, "");
        let year = batch.year(1, "1959");
        batch.track(track_data("file:///t", "Summertime"), &artist, &album, &genre, &composer, &year);
    }
    assert_eq!(registry.track_count(), 1);

    registry.clear();
    assert_eq!(registry.track_count(), 0);
    assert_eq!(registry.artist_count(), 0);
    assert_eq!(registry.album_count(), 0);
    assert_eq!(registry.genre_count(), 0);
    assert_eq!(registry.composer_count(), 0);
    assert_eq!(registry.year_count(), 0);
}

#[test]
fn test_next_entity_id_is_monotonic() {
    let registry = EntityRegistry::default();
    let a = registry.next_entity_id();
    let b = registry.next_entity_id();
    assert!(b > a);
}
