//! The memory module evaluates query descriptions directly over an
//! in-memory record snapshot, for backends that have no query language:
//! mounted media devices and service catalogs expose their track lists as
//! `DeviceRecord`s and get the same filter/match/sort/limit semantics the
//! SQL translator provides, evaluated as plain predicates.

use std::cmp::Ordering as CmpOrdering;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use tracing::warn;

use crate::errors::{Result, ViolaError};
use crate::meta::{CompilationPolicy, EntityList, TrackData};
use crate::query::{
    AlbumMode, FilterTerm, NumberComparison, QueryDescription, QueryKind, QueryStrategy, SortKey, Tables, Value,
};
use crate::registry::{EntityRegistry, RegistryMaps};

/// One track as enumerated from a device or service backend. Field names
/// follow the shared entity model; everything is by-value since the native
/// store owns nothing we can reference.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceRecord {
    pub url: String,
    pub title: String,
    pub artist: String,
    pub album: String,
    pub genre: String,
    pub composer: String,
    pub year: String,
    pub track_number: i32,
    pub disc_number: i32,
    pub length_seconds: i32,
    pub bitrate: i32,
    pub sample_rate: i32,
    pub comment: String,
    pub play_count: i32,
}

fn display_text(record: &DeviceRecord, table: Tables) -> Option<&str> {
    match table {
        Tables::TRACKS => Some(&record.title),
        Tables::ARTISTS => Some(&record.artist),
        Tables::ALBUMS => Some(&record.album),
        Tables::GENRES => Some(&record.genre),
        Tables::COMPOSERS => Some(&record.composer),
        Tables::YEARS => Some(&record.year),
        _ => None,
    }
}

fn numeric_value(record: &DeviceRecord, table: Tables, value: Value) -> Option<i64> {
    match (table, value) {
        (Tables::TRACKS, Value::TrackNumber) => Some(record.track_number as i64),
        (Tables::TRACKS, Value::DiscNumber) => Some(record.disc_number as i64),
        (Tables::TRACKS, Value::Length) => Some(record.length_seconds as i64),
        (Tables::TRACKS, Value::Bitrate) => Some(record.bitrate as i64),
        (Tables::TRACKS, Value::SampleRate) => Some(record.sample_rate as i64),
        (Tables::TRACKS, Value::PlayCount) => Some(record.play_count as i64),
        (Tables::YEARS, Value::Name) => record.year.parse().ok().or(Some(0)),
        _ => None,
    }
}

fn text_value<'a>(record: &'a DeviceRecord, table: Tables, value: Value) -> Option<&'a str> {
    match (table, value) {
        (Tables::TRACKS, Value::Title) => Some(&record.title),
        (Tables::TRACKS, Value::Url) => Some(&record.url),
        (Tables::TRACKS, Value::Comment) => Some(&record.comment),
        (Tables::ARTISTS, Value::Name) => Some(&record.artist),
        (Tables::ALBUMS, Value::Name) => Some(&record.album),
        (Tables::GENRES, Value::Name) => Some(&record.genre),
        (Tables::COMPOSERS, Value::Name) => Some(&record.composer),
        (Tables::YEARS, Value::Name) => Some(&record.year),
        _ => None,
    }
}

fn filter_term_matches(term: &FilterTerm, desc: &QueryDescription, record: &DeviceRecord) -> bool {
    match term {
        FilterTerm::Contains { tables, text } => {
            let needle = text.to_lowercase();
            let unknown = desc.filter_matches_unknown(text);
            tables.members().into_iter().any(|table| {
                display_text(record, table).is_some_and(|field| {
                    field.to_lowercase().contains(&needle) || (unknown && field.is_empty())
                })
            })
        }
        FilterTerm::Excludes { tables, text } => {
            let needle = text.to_lowercase();
            let unknown = desc.filter_matches_unknown(text);
            tables.members().into_iter().all(|table| {
                display_text(record, table).is_none_or(|field| {
                    !field.to_lowercase().contains(&needle) && !(unknown && field.is_empty())
                })
            })
        }
        FilterTerm::Number { table, value, n, comparison } => {
            let Some(actual) = numeric_value(record, *table, *value) else { return false };
            match comparison {
                NumberComparison::Equals => actual == *n,
                NumberComparison::GreaterThan => actual > *n,
                NumberComparison::LessThan => actual < *n,
            }
        }
    }
}

fn record_matches(desc: &QueryDescription, record: &DeviceRecord, registry: &EntityRegistry) -> bool {
    match desc.album_mode {
        AlbumMode::AllAlbums => {}
        AlbumMode::OnlyCompilations | AlbumMode::OnlyNormalAlbums => {
            let compilation = registry
                .find_album(&record.album, None)
                .map(|album| album.is_compilation())
                .unwrap_or(false);
            let want_compilation = desc.album_mode == AlbumMode::OnlyCompilations;
            if compilation != want_compilation {
                return false;
            }
        }
    }

    for term in &desc.matches {
        let unknown = desc.match_is_unknown(&term.text);
        let hit = term.tables.members().into_iter().any(|table| {
            display_text(record, table)
                .is_some_and(|field| field == term.text || (unknown && field.is_empty()))
        });
        if !hit {
            return false;
        }
    }

    desc.filters.iter().all(|term| filter_term_matches(term, desc, record))
}

fn compare_records(desc: &QueryDescription, a: &DeviceRecord, b: &DeviceRecord) -> CmpOrdering {
    for sort in &desc.sorts {
        let (table, value, descending) = match sort {
            SortKey::Column { table, value, descending } => (*table, *value, *descending),
            SortKey::Function { .. } | SortKey::Random => {
                // aggregate and random ordering need a relational backend
                continue;
            }
        };
        let ordering = if value.is_numeric() || table == Tables::YEARS {
            let left = numeric_value(a, table, value).unwrap_or(0);
            let right = numeric_value(b, table, value).unwrap_or(0);
            left.cmp(&right)
        } else {
            let left = text_value(a, table, value).unwrap_or("").to_lowercase();
            let right = text_value(b, table, value).unwrap_or("").to_lowercase();
            left.cmp(&right)
        };
        let ordering = if descending { ordering.reverse() } else { ordering };
        if ordering != CmpOrdering::Equal {
            return ordering;
        }
    }
    CmpOrdering::Equal
}

fn truncate<T>(items: &mut Vec<T>, max_results: i64) {
    if max_results >= 0 && items.len() > max_results as usize {
        items.truncate(max_results as usize);
    }
}

/// Build the full entity graph for a set of records into `maps`. Used both
/// for track-query demarshal and for registry (re)construction on mount and
/// rescan.
pub(crate) fn demarshal_records_into(
    records: &[DeviceRecord],
    maps: &mut RegistryMaps,
    policy: &dyn CompilationPolicy,
    registry: &EntityRegistry,
) -> EntityList {
    let mut tracks = Vec::with_capacity(records.len());
    // device stores have no own notion of library addition time
    let added_at = crate::common::now_rfc3339();
    for record in records {
        let artist = maps.artist(registry.next_entity_id(), &record.artist);
        // device stores carry no album artist; attribution is inferred from
        // the track artists as they accumulate
        let album = maps.album(registry.next_entity_id(), &record.album, None);
        let genre = maps.genre(registry.next_entity_id(), &record.genre);
        let composer = maps.composer(registry.next_entity_id(), &record.composer);
        let year = maps.year(registry.next_entity_id(), &record.year);
        let data = TrackData {
            id: registry.next_entity_id(),
            url: record.url.clone(),
            title: record.title.clone(),
            track_number: record.track_number,
            disc_number: record.disc_number,
            length_seconds: record.length_seconds,
            bitrate: record.bitrate,
            sample_rate: record.sample_rate,
            comment: record.comment.clone(),
            play_count: record.play_count,
            score: 0.0,
            added_at: added_at.clone(),
        };
        tracks.push(maps.track(policy, data, &artist, &album, &genre, &composer, &year));
    }
    EntityList::Tracks(tracks)
}

/// Strategy evaluating descriptions over a device/service record snapshot.
/// The registry graph is pre-built on mount, so non-track queries resolve
/// entities that already carry their track back-references.
pub struct MemoryStrategy {
    records: Arc<RwLock<Vec<DeviceRecord>>>,
    connected: Arc<AtomicBool>,
}

impl MemoryStrategy {
    pub(crate) fn new(records: Arc<RwLock<Vec<DeviceRecord>>>, connected: Arc<AtomicBool>) -> MemoryStrategy {
        MemoryStrategy { records, connected }
    }
}

impl QueryStrategy for MemoryStrategy {
    fn build_query(&self, desc: &QueryDescription) -> Result<String> {
        let kind = desc.kind.ok_or(crate::errors::ViolaExpectedError::QueryNotConfigured)?;
        Ok(format!(
            "memory traversal: kind={kind:?} matches={} filters={} sorts={} limit={}",
            desc.matches.len(),
            desc.filters.len(),
            desc.sorts.len(),
            desc.max_results,
        ))
    }

    fn execute(
        &self,
        desc: &QueryDescription,
        registry: &EntityRegistry,
        abort: &AtomicBool,
    ) -> Result<Option<EntityList>> {
        let kind = desc.kind.ok_or(crate::errors::ViolaExpectedError::QueryNotConfigured)?;
        if !self.connected.load(Ordering::SeqCst) {
            return Err(ViolaError::Backend("device store is detached".to_string()));
        }
        if abort.load(Ordering::SeqCst) {
            return Ok(None);
        }

        if desc.sorts.iter().any(|s| matches!(s, SortKey::Function { .. } | SortKey::Random)) {
            warn!("aggregate/random ordering is not supported for device collections; ignoring");
        }

        let mut matched: Vec<DeviceRecord> = {
            let records = self.records.read().unwrap();
            records.iter().filter(|r| record_matches(desc, r, registry)).cloned().collect()
        };
        matched.sort_by(|a, b| compare_records(desc, a, b));

        if abort.load(Ordering::SeqCst) {
            return Ok(None);
        }

        let list = match kind {
            QueryKind::Track => {
                truncate(&mut matched, desc.max_results);
                let mut batch = registry.batch();
                let (maps, policy) = batch.parts();
                demarshal_records_into(&matched, maps, policy, registry)
            }
            QueryKind::Artist | QueryKind::Album | QueryKind::Genre | QueryKind::Composer | QueryKind::Year => {
                let table = kind.table();
                let mut seen = HashSet::new();
                let mut names: Vec<&str> = Vec::new();
                for record in &matched {
                    let name = display_text(record, table).unwrap_or("");
                    if seen.insert(name) {
                        names.push(name);
                    }
                }
                let mut names: Vec<String> = names.into_iter().map(|s| s.to_string()).collect();
                truncate(&mut names, desc.max_results);

                let mut batch = registry.batch();
                match kind {
                    QueryKind::Artist => EntityList::Artists(
                        names.iter().map(|n| batch.artist(registry.next_entity_id(), n)).collect(),
                    ),
                    QueryKind::Album => EntityList::Albums(
                        names.iter().map(|n| batch.album(registry.next_entity_id(), n, None)).collect(),
                    ),
                    QueryKind::Genre => EntityList::Genres(
                        names.iter().map(|n| batch.genre(registry.next_entity_id(), n)).collect(),
                    ),
                    QueryKind::Composer => EntityList::Composers(
                        names.iter().map(|n| batch.composer(registry.next_entity_id(), n)).collect(),
                    ),
                    QueryKind::Year => EntityList::Years(
                        names.iter().map(|n| batch.year(registry.next_entity_id(), n)).collect(),
                    ),
                    QueryKind::Track => unreachable!(),
                }
            }
        };
        Ok(Some(list))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
