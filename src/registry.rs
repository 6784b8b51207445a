//! The registry module is the per-collection deduplicating store of shared
//! entities. It is the single source of truth for entity identity: within
//! one collection, demarshaling two rows that name the same artist yields
//! the same `Arc<Artist>`, never a second equal-by-value instance.
//!
//! All mutation happens through a `RegistryBatch`, which holds the
//! registry-wide write lock for the duration of one result batch so that
//! readers never observe a partially-populated entity graph. Full rescans
//! instead build a detached `RegistryMaps` off-line and swap it in whole.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, RwLock, RwLockWriteGuard};

use crate::meta::{
    Album, Artist, CompilationPolicy, Composer, DistinctArtistPolicy, Genre, Track, TrackData, Year,
};

/// Albums key off (name, album artist name); compilations and albums with
/// no stored artist share the `None` bucket for a given name.
pub type AlbumKey = (String, Option<String>);

/// The entity maps themselves, separable from the registry so a full scan
/// can populate a fresh set without holding the lock.
#[derive(Default)]
pub struct RegistryMaps {
    tracks: HashMap<String, Arc<Track>>,
    artists: HashMap<String, Arc<Artist>>,
    albums: HashMap<AlbumKey, Arc<Album>>,
    genres: HashMap<String, Arc<Genre>>,
    composers: HashMap<String, Arc<Composer>>,
    years: HashMap<String, Arc<Year>>,
}

impl RegistryMaps {
    pub fn artist(&mut self, id: i64, name: &str) -> Arc<Artist> {
        if let Some(artist) = self.artists.get(name) {
            return Arc::clone(artist);
        }
        let artist = Arc::new(Artist::new(id, name.to_string()));
        self.artists.insert(name.to_string(), Arc::clone(&artist));
        artist
    }

    pub fn album(&mut self, id: i64, name: &str, album_artist: Option<&Arc<Artist>>) -> Arc<Album> {
        let key: AlbumKey = (name.to_string(), album_artist.map(|a| a.name().to_string()));
        if let Some(album) = self.albums.get(&key) {
            return Arc::clone(album);
        }
        let album = Arc::new(Album::new(id, name.to_string(), album_artist.map(Arc::clone)));
        self.albums.insert(key, Arc::clone(&album));
        album
    }

    pub fn genre(&mut self, id: i64, name: &str) -> Arc<Genre> {
        if let Some(genre) = self.genres.get(name) {
            return Arc::clone(genre);
        }
        let genre = Arc::new(Genre::new(id, name.to_string()));
        self.genres.insert(name.to_string(), Arc::clone(&genre));
        genre
    }

    pub fn composer(&mut self, id: i64, name: &str) -> Arc<Composer> {
        if let Some(composer) = self.composers.get(name) {
            return Arc::clone(composer);
        }
        let composer = Arc::new(Composer::new(id, name.to_string()));
        self.composers.insert(name.to_string(), Arc::clone(&composer));
        composer
    }

    pub fn year(&mut self, id: i64, name: &str) -> Arc<Year> {
        if let Some(year) = self.years.get(name) {
            return Arc::clone(year);
        }
        let year = Arc::new(Year::new(id, name.to_string()));
        self.years.insert(name.to_string(), Arc::clone(&year));
        year
    }

    /// Get-or-create a track and wire its cross-references. Wiring happens
    /// only on first sight of the url; a re-queried track returns the
    /// existing instance untouched.
    #[allow(clippy::too_many_arguments)]
    pub fn track(
        &mut self,
        policy: &dyn CompilationPolicy,
        data: TrackData,
        artist: &Arc<Artist>,
        album: &Arc<Album>,
        genre: &Arc<Genre>,
        composer: &Arc<Composer>,
        year: &Arc<Year>,
    ) -> Arc<Track> {
        if let Some(track) = self.tracks.get(&data.url) {
            return Arc::clone(track);
        }
        let url = data.url.clone();
        let track = Arc::new(Track::new(
            data,
            Arc::clone(artist),
            Arc::clone(album),
            Arc::clone(genre),
            Arc::clone(composer),
            Arc::clone(year),
        ));
        artist.link_track(&track);
        album.link_track(&track);
        album.observe_track_artist(artist, policy);
        genre.link_track(&track);
        composer.link_track(&track);
        year.link_track(&track);
        self.tracks.insert(url, Arc::clone(&track));
        track
    }
}

pub struct EntityRegistry {
    maps: RwLock<RegistryMaps>,
    policy: Box<dyn CompilationPolicy>,
    next_id: AtomicI64,
}

impl Default for EntityRegistry {
    fn default() -> Self {
        EntityRegistry::new(Box::new(DistinctArtistPolicy))
    }
}

impl EntityRegistry {
    pub fn new(policy: Box<dyn CompilationPolicy>) -> EntityRegistry {
        EntityRegistry {
            maps: RwLock::new(RegistryMaps::default()),
            policy,
            next_id: AtomicI64::new(1),
        }
    }

    pub fn compilation_policy(&self) -> &dyn CompilationPolicy {
        self.policy.as_ref()
    }

    /// Synthetic ids for backends that have none (device snapshots).
    pub fn next_entity_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Open a write batch. The registry lock is held until the batch drops,
    /// so demarshal one result set per batch and do not park on it.
    pub fn batch(&self) -> RegistryBatch<'_> {
        RegistryBatch { maps: self.maps.write().unwrap(), policy: self.policy.as_ref() }
    }

    /// Atomically replace every map, e.g. after a full rescan. Concurrent
    /// readers see either the old complete graph or the new one.
    pub fn replace_all(&self, maps: RegistryMaps) {
        *self.maps.write().unwrap() = maps;
    }

    pub fn clear(&self) {
        self.replace_all(RegistryMaps::default());
    }

    pub fn track_count(&self) -> usize {
        self.maps.read().unwrap().tracks.len()
    }

    pub fn artist_count(&self) -> usize {
        self.maps.read().unwrap().artists.len()
    }

    pub fn album_count(&self) -> usize {
        self.maps.read().unwrap().albums.len()
    }

    pub fn genre_count(&self) -> usize {
        self.maps.read().unwrap().genres.len()
    }

    pub fn composer_count(&self) -> usize {
        self.maps.read().unwrap().composers.len()
    }

    pub fn year_count(&self) -> usize {
        self.maps.read().unwrap().years.len()
    }

    pub fn find_track(&self, url: &str) -> Option<Arc<Track>> {
        self.maps.read().unwrap().tracks.get(url).cloned()
    }

    pub fn find_artist(&self, name: &str) -> Option<Arc<Artist>> {
        self.maps.read().unwrap().artists.get(name).cloned()
    }

    pub fn find_album(&self, name: &str, album_artist: Option<&str>) -> Option<Arc<Album>> {
        let key: AlbumKey = (name.to_string(), album_artist.map(|s| s.to_string()));
        self.maps.read().unwrap().albums.get(&key).cloned()
    }

    pub fn find_genre(&self, name: &str) -> Option<Arc<Genre>> {
        self.maps.read().unwrap().genres.get(name).cloned()
    }

    pub fn find_composer(&self, name: &str) -> Option<Arc<Composer>> {
        self.maps.read().unwrap().composers.get(name).cloned()
    }

    pub fn find_year(&self, name: &str) -> Option<Arc<Year>> {
        self.maps.read().unwrap().years.get(name).cloned()
    }

    pub fn all_tracks(&self) -> Vec<Arc<Track>> {
        self.maps.read().unwrap().tracks.values().cloned().collect()
    }

    pub fn all_artists(&self) -> Vec<Arc<Artist>> {
        self.maps.read().unwrap().artists.values().cloned().collect()
    }

    pub fn all_albums(&self) -> Vec<Arc<Album>> {
        self.maps.read().unwrap().albums.values().cloned().collect()
    }
}

/// A write transaction over the registry. Construction acquires the
/// exclusive lock; every lookup within the batch is get-or-insert.
pub struct RegistryBatch<'a> {
    maps: RwLockWriteGuard<'a, RegistryMaps>,
    policy: &'a dyn CompilationPolicy,
}

impl RegistryBatch<'_> {
    /// Raw access for the demarshalers, which share their row-resolution
    /// code with the detached full-scan path.
    pub(crate) fn parts(&mut self) -> (&mut RegistryMaps, &dyn CompilationPolicy) {
        (&mut self.maps, self.policy)
    }

    pub fn artist(&mut self, id: i64, name: &str) -> Arc<Artist> {
        self.maps.artist(id, name)
    }

    pub fn album(&mut self, id: i64, name: &str, album_artist: Option<&Arc<Artist>>) -> Arc<Album> {
        self.maps.album(id, name, album_artist)
    }

    pub fn genre(&mut self, id: i64, name: &str) -> Arc<Genre> {
        self.maps.genre(id, name)
    }

    pub fn composer(&mut self, id: i64, name: &str) -> Arc<Composer> {
        self.maps.composer(id, name)
    }

    pub fn year(&mut self, id: i64, name: &str) -> Arc<Year> {
        self.maps.year(id, name)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn track(
        &mut self,
        data: TrackData,
        artist: &Arc<Artist>,
        album: &Arc<Album>,
        genre: &Arc<Genre>,
        composer: &Arc<Composer>,
        year: &Arc<Year>,
    ) -> Arc<Track> {
        self.maps.track(self.policy, data, artist, album, genre, composer, year)
    }
}
