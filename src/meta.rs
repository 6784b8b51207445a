//! The meta module defines the shared domain entities: tracks, artists,
//! albums, genres, composers and years.
//!
//! Every entity is reference-counted and owned by its collection's
//! `EntityRegistry`; two entities with the same natural key within one
//! collection are always the same `Arc` instance. Cross-references from a
//! track down to its album/artist/etc. are strong, while the reverse edges
//! (an artist's tracks) are weak, so the graph never forms ownership cycles.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, Weak};

/// Scalar metadata for one track, as read from a backend row or device
/// record. The registry combines this with resolved entity references to
/// build the shared `Track`.
#[derive(Debug, Clone, Default)]
pub struct TrackData {
    pub id: i64,
    pub url: String,
    pub title: String,
    pub track_number: i32,
    pub disc_number: i32,
    pub length_seconds: i32,
    pub bitrate: i32,
    pub sample_rate: i32,
    pub comment: String,
    pub play_count: i32,
    pub score: f64,
    pub added_at: String,
}

#[derive(Debug)]
pub struct Track {
    data: TrackData,
    artist: Arc<Artist>,
    album: Arc<Album>,
    genre: Arc<Genre>,
    composer: Arc<Composer>,
    year: Arc<Year>,
}

impl Track {
    pub(crate) fn new(
        data: TrackData,
        artist: Arc<Artist>,
        album: Arc<Album>,
        genre: Arc<Genre>,
        composer: Arc<Composer>,
        year: Arc<Year>,
    ) -> Track {
        Track { data, artist, album, genre, composer, year }
    }

    pub fn id(&self) -> i64 {
        self.data.id
    }

    pub fn url(&self) -> &str {
        &self.data.url
    }

    pub fn title(&self) -> &str {
        &self.data.title
    }

    pub fn track_number(&self) -> i32 {
        self.data.track_number
    }

    pub fn disc_number(&self) -> i32 {
        self.data.disc_number
    }

    pub fn length_seconds(&self) -> i32 {
        self.data.length_seconds
    }

    pub fn bitrate(&self) -> i32 {
        self.data.bitrate
    }

    pub fn sample_rate(&self) -> i32 {
        self.data.sample_rate
    }

    pub fn comment(&self) -> &str {
        &self.data.comment
    }

    pub fn play_count(&self) -> i32 {
        self.data.play_count
    }

    pub fn score(&self) -> f64 {
        self.data.score
    }

    pub fn added_at(&self) -> &str {
        &self.data.added_at
    }

    pub fn artist(&self) -> &Arc<Artist> {
        &self.artist
    }

    pub fn album(&self) -> &Arc<Album> {
        &self.album
    }

    pub fn genre(&self) -> &Arc<Genre> {
        &self.genre
    }

    pub fn composer(&self) -> &Arc<Composer> {
        &self.composer
    }

    pub fn year(&self) -> &Arc<Year> {
        &self.year
    }
}

#[derive(Debug)]
pub struct Artist {
    id: i64,
    name: String,
    tracks: RwLock<Vec<Weak<Track>>>,
}

impl Artist {
    pub(crate) fn new(id: i64, name: String) -> Artist {
        Artist { id, name, tracks: RwLock::new(Vec::new()) }
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Tracks attributed to this artist, in demarshal order. Back-references
    /// accumulate as track rows are processed; an artist returned by a pure
    /// artist query has no tracks until track rows have been seen.
    pub fn tracks(&self) -> Vec<Arc<Track>> {
        self.tracks.read().unwrap().iter().filter_map(Weak::upgrade).collect()
    }

    pub(crate) fn link_track(&self, track: &Arc<Track>) {
        self.tracks.write().unwrap().push(Arc::downgrade(track));
    }
}

#[derive(Debug)]
pub struct Album {
    id: i64,
    name: String,
    album_artist: RwLock<Option<Arc<Artist>>>,
    /// True when the backend stored an album artist; a stored artist is
    /// never demoted by mixed track attributions.
    explicit_artist: bool,
    track_artist_names: RwLock<Vec<String>>,
    compilation: AtomicBool,
    tracks: RwLock<Vec<Weak<Track>>>,
}

impl Album {
    pub(crate) fn new(id: i64, name: String, album_artist: Option<Arc<Artist>>) -> Album {
        let explicit_artist = album_artist.is_some();
        Album {
            id,
            name,
            album_artist: RwLock::new(album_artist),
            explicit_artist,
            track_artist_names: RwLock::new(Vec::new()),
            compilation: AtomicBool::new(false),
            tracks: RwLock::new(Vec::new()),
        }
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn album_artist(&self) -> Option<Arc<Artist>> {
        self.album_artist.read().unwrap().clone()
    }

    /// Whether this album has been flagged as a compilation by the active
    /// `CompilationPolicy`. The flag is recomputed as track rows demarshal.
    pub fn is_compilation(&self) -> bool {
        self.compilation.load(Ordering::SeqCst)
    }

    pub fn tracks(&self) -> Vec<Arc<Track>> {
        self.tracks.read().unwrap().iter().filter_map(Weak::upgrade).collect()
    }

    pub(crate) fn link_track(&self, track: &Arc<Track>) {
        self.tracks.write().unwrap().push(Arc::downgrade(track));
    }

    /// Record one more track-level artist attribution and re-evaluate the
    /// compilation flag. When no album artist was stored and exactly one
    /// non-empty track artist has been seen, that artist is promoted to
    /// album artist; a later, different attribution demotes it again.
    pub(crate) fn observe_track_artist(&self, artist: &Arc<Artist>, policy: &dyn CompilationPolicy) {
        let names: Vec<String> = {
            let mut names = self.track_artist_names.write().unwrap();
            if !names.iter().any(|n| n == artist.name()) {
                names.push(artist.name().to_string());
            }
            names.clone()
        };

        let distinct_nonempty = names.iter().filter(|n| !n.is_empty()).count();
        if !self.explicit_artist {
            let mut album_artist = self.album_artist.write().unwrap();
            if distinct_nonempty == 1 && !artist.name().is_empty() {
                if album_artist.is_none() {
                    *album_artist = Some(Arc::clone(artist));
                }
            } else if distinct_nonempty > 1 {
                *album_artist = None;
            }
        }

        let album_artist_name = self.album_artist.read().unwrap().as_ref().map(|a| a.name().to_string());
        let compilation = policy.is_compilation(album_artist_name.as_deref(), &names);
        self.compilation.store(compilation, Ordering::SeqCst);
    }
}

#[derive(Debug)]
pub struct Genre {
    id: i64,
    name: String,
    tracks: RwLock<Vec<Weak<Track>>>,
}

impl Genre {
    pub(crate) fn new(id: i64, name: String) -> Genre {
        Genre { id, name, tracks: RwLock::new(Vec::new()) }
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tracks(&self) -> Vec<Arc<Track>> {
        self.tracks.read().unwrap().iter().filter_map(Weak::upgrade).collect()
    }

    pub(crate) fn link_track(&self, track: &Arc<Track>) {
        self.tracks.write().unwrap().push(Arc::downgrade(track));
    }
}

#[derive(Debug)]
pub struct Composer {
    id: i64,
    name: String,
    tracks: RwLock<Vec<Weak<Track>>>,
}

impl Composer {
    pub(crate) fn new(id: i64, name: String) -> Composer {
        Composer { id, name, tracks: RwLock::new(Vec::new()) }
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tracks(&self) -> Vec<Arc<Track>> {
        self.tracks.read().unwrap().iter().filter_map(Weak::upgrade).collect()
    }

    pub(crate) fn link_track(&self, track: &Arc<Track>) {
        self.tracks.write().unwrap().push(Arc::downgrade(track));
    }
}

#[derive(Debug)]
pub struct Year {
    id: i64,
    name: String,
    tracks: RwLock<Vec<Weak<Track>>>,
}

impl Year {
    pub(crate) fn new(id: i64, name: String) -> Year {
        Year { id, name, tracks: RwLock::new(Vec::new()) }
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    /// Year names are the digit string from the tag ("1994"); they sort
    /// numerically everywhere despite being stored as text.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tracks(&self) -> Vec<Arc<Track>> {
        self.tracks.read().unwrap().iter().filter_map(Weak::upgrade).collect()
    }

    pub(crate) fn link_track(&self, track: &Arc<Track>) {
        self.tracks.write().unwrap().push(Arc::downgrade(track));
    }
}

/// Uniform "data pointer" view over any entity, for consumers that render
/// heterogeneous results generically.
#[derive(Debug, Clone)]
pub enum Entity {
    Track(Arc<Track>),
    Artist(Arc<Artist>),
    Album(Arc<Album>),
    Genre(Arc<Genre>),
    Composer(Arc<Composer>),
    Year(Arc<Year>),
}

impl Entity {
    pub fn name(&self) -> &str {
        match self {
            Entity::Track(t) => t.title(),
            Entity::Artist(a) => a.name(),
            Entity::Album(a) => a.name(),
            Entity::Genre(g) => g.name(),
            Entity::Composer(c) => c.name(),
            Entity::Year(y) => y.name(),
        }
    }
}

/// Typed result list emitted on query completion.
#[derive(Debug, Clone)]
pub enum EntityList {
    Tracks(Vec<Arc<Track>>),
    Artists(Vec<Arc<Artist>>),
    Albums(Vec<Arc<Album>>),
    Genres(Vec<Arc<Genre>>),
    Composers(Vec<Arc<Composer>>),
    Years(Vec<Arc<Year>>),
}

impl EntityList {
    pub fn empty(kind: crate::query::QueryKind) -> EntityList {
        use crate::query::QueryKind;
        match kind {
            QueryKind::Track => EntityList::Tracks(Vec::new()),
            QueryKind::Artist => EntityList::Artists(Vec::new()),
            QueryKind::Album => EntityList::Albums(Vec::new()),
            QueryKind::Genre => EntityList::Genres(Vec::new()),
            QueryKind::Composer => EntityList::Composers(Vec::new()),
            QueryKind::Year => EntityList::Years(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            EntityList::Tracks(v) => v.len(),
            EntityList::Artists(v) => v.len(),
            EntityList::Albums(v) => v.len(),
            EntityList::Genres(v) => v.len(),
            EntityList::Composers(v) => v.len(),
            EntityList::Years(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flatten into the uniform supertype, preserving order.
    pub fn as_data(&self) -> Vec<Entity> {
        match self {
            EntityList::Tracks(v) => v.iter().cloned().map(Entity::Track).collect(),
            EntityList::Artists(v) => v.iter().cloned().map(Entity::Artist).collect(),
            EntityList::Albums(v) => v.iter().cloned().map(Entity::Album).collect(),
            EntityList::Genres(v) => v.iter().cloned().map(Entity::Genre).collect(),
            EntityList::Composers(v) => v.iter().cloned().map(Entity::Composer).collect(),
            EntityList::Years(v) => v.iter().cloned().map(Entity::Year).collect(),
        }
    }
}

/// Policy deciding when an album counts as a compilation. The right
/// heuristic varies by backend, so collections take this as a pluggable
/// strategy instead of a fixed rule.
pub trait CompilationPolicy: Send + Sync {
    /// `album_artist` is the explicitly stored album artist, if any;
    /// `track_artists` is the distinct set of track-level artist names
    /// observed so far (possibly including the empty name).
    fn is_compilation(&self, album_artist: Option<&str>, track_artists: &[String]) -> bool;
}

/// Flags an album once two distinct non-empty track artists have been
/// observed without an explicitly stored album artist.
#[derive(Debug, Default)]
pub struct DistinctArtistPolicy;

impl CompilationPolicy for DistinctArtistPolicy {
    fn is_compilation(&self, album_artist: Option<&str>, track_artists: &[String]) -> bool {
        if album_artist.is_some_and(|a| !a.is_empty()) {
            return false;
        }
        track_artists.iter().filter(|n| !n.is_empty()).count() > 1
    }
}

/// Flags an album when its stored album artist carries an explicit
/// "various artists" label.
#[derive(Debug)]
pub struct VariousArtistsLabelPolicy {
    pub label: String,
}

impl CompilationPolicy for VariousArtistsLabelPolicy {
    fn is_compilation(&self, album_artist: Option<&str>, _track_artists: &[String]) -> bool {
        album_artist.is_some_and(|a| a.eq_ignore_ascii_case(&self.label))
    }
}
