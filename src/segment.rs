//! The top level driver that incrementally parses a segment.

use std::collections::HashMap;
use std::num::NonZeroU64;

use crate::block::BlockEntry;
use crate::cluster::{self, Cluster};
use crate::cues::{CuePoint, Cues};
use crate::ebml::{
    self, collect_children, expect_master, find_string, find_unsigned, try_find_date,
    try_find_float, try_find_string, try_find_unsigned, ElementData, UNKNOWN_DATA_SIZE,
};
use crate::element_id::{lookup, ElementId};
use crate::reader::MkvReader;
use crate::tracks::{TrackKind, Tracks};
use crate::{EbmlHeader, ParserError, Result};

/// The timestamp scale used when the Info element does not declare one.
const DEFAULT_TIMESTAMP_SCALE: u64 = 1_000_000;

/// A stable handle to a cluster owned by a segment.
///
/// Handles stay valid while the segment exists, even when more clusters
/// are discovered later.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct ClusterId(pub(crate) usize);

/// A stable handle to a block entry within a cluster.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct EntryRef {
    cluster: ClusterId,
    index: usize,
}

impl EntryRef {
    /// The cluster the entry belongs to.
    pub fn cluster(&self) -> ClusterId {
        self.cluster
    }

    /// The index of the entry within its cluster.
    pub fn index(&self) -> usize {
        self.index
    }
}

/// A handle to a loaded cue point.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CueIndex(pub(crate) usize);

/// The outcome of speculatively parsing one cluster.
///
/// A probe carries everything a later [`Segment::add_cluster`] call needs
/// to commit the cluster without reading again.
#[derive(Clone, Copy, Debug)]
pub struct ClusterProbe {
    cluster_pos: u64,
    payload_start: u64,
    payload_size: u64,
    next_pos: u64,
    timecode: u64,
}

impl ClusterProbe {
    /// The absolute position of the parsed cluster element.
    pub fn cluster_position(&self) -> u64 {
        self.cluster_pos
    }

    /// The absolute position right after the parsed cluster.
    pub fn next_position(&self) -> u64 {
        self.next_pos
    }
}

/// An entry in the seek head.
#[derive(Clone, Copy, Debug)]
pub(crate) struct SeekEntry {
    id: ElementId,
    offset: u64,
}

impl SeekEntry {
    pub(crate) fn new(fields: &[(ElementId, ElementData)]) -> Result<SeekEntry> {
        let id: u32 = find_unsigned(fields, ElementId::SeekId)?.try_into()?;
        let id = lookup(id);
        let offset = find_unsigned(fields, ElementId::SeekPosition)?;

        Ok(Self { id, offset })
    }
}

/// The Info element of a segment.
#[derive(Clone, Debug)]
pub struct Info {
    timestamp_scale: NonZeroU64,
    duration: Option<f64>,
    date_utc: Option<i64>,
    title: Option<String>,
    muxing_app: String,
    writing_app: String,
}

impl Info {
    pub(crate) fn new(fields: &[(ElementId, ElementData)]) -> Result<Info> {
        let timestamp_scale = try_find_unsigned(fields, ElementId::TimestampScale)?;
        let duration = try_find_float(fields, ElementId::Duration)?;
        let date_utc = try_find_date(fields, ElementId::DateUtc)?;
        let title = try_find_string(fields, ElementId::Title)?;
        let muxing_app = find_string(fields, ElementId::MuxingApp)?;
        let writing_app = find_string(fields, ElementId::WritingApp)?;

        let timestamp_scale = timestamp_scale.unwrap_or(DEFAULT_TIMESTAMP_SCALE);
        let timestamp_scale = NonZeroU64::new(timestamp_scale)
            .ok_or(ParserError::NonZeroValueIsZero(ElementId::TimestampScale))?;

        Ok(Self {
            timestamp_scale,
            duration,
            date_utc,
            title,
            muxing_app,
            writing_app,
        })
    }

    /// Timestamp scale in nanoseconds per raw timecode unit (1,000,000
    /// means all timestamps of the segment are expressed in milliseconds).
    pub fn timestamp_scale(&self) -> NonZeroU64 {
        self.timestamp_scale
    }

    /// Duration of the segment in raw timecode units.
    pub fn duration(&self) -> Option<f64> {
        self.duration
    }

    /// The date and time the segment was created by the muxing application.
    pub fn date_utc(&self) -> Option<i64> {
        self.date_utc
    }

    /// General name of the segment.
    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    /// Muxing application or library.
    pub fn muxing_app(&self) -> &str {
        &self.muxing_app
    }

    /// Writing application.
    pub fn writing_app(&self) -> &str {
        &self.writing_app
    }
}

/// The top level payload container of a Matroska file.
///
/// A segment parses lazily: [`Segment::parse_headers`] consumes the
/// elements before the first cluster (following seek head offsets where
/// present), after which clusters are committed one at a time through
/// [`Segment::load_cluster`] or on demand through the seeking and
/// iteration calls. Every operation that touches the reader can report
/// [`ParserError::InsufficientData`]; such a call can be retried
/// unchanged once more bytes are available.
///
/// A segment is single threaded by construction: all lazy loading runs
/// behind `&mut self`.
#[derive(Clone, Debug)]
pub struct Segment<R> {
    reader: R,
    start: u64,
    size: Option<u64>,
    pos: u64,
    headers_parsed: bool,
    seek_head: HashMap<ElementId, u64>,
    info: Option<Info>,
    tracks: Option<Tracks>,
    cues: Option<Cues>,
    clusters: Vec<Cluster>,
    confirmed: Vec<ClusterId>,
    preloaded: Vec<ClusterId>,
}

impl<R: MkvReader> Segment<R> {
    /// Parses the EBML document header at the start of the reader and
    /// creates the segment that follows it.
    pub fn open(mut reader: R) -> Result<(EbmlHeader, Self)> {
        let (header, pos) = ebml::parse_ebml_header(&mut reader, 0)?;
        let segment = Self::new(reader, pos)?;
        Ok((header, segment))
    }

    /// Creates a segment from a reader and the position right after the
    /// EBML document header, skipping over leading Void elements.
    pub fn new(mut reader: R, pos: u64) -> Result<Self> {
        let mut pos = pos;
        loop {
            let (id, size, data_pos) = ebml::parse_element_header(&mut reader, pos)?;
            if id == ElementId::Segment {
                let size = if size == UNKNOWN_DATA_SIZE {
                    None
                } else {
                    Some(size)
                };
                return Ok(Self {
                    reader,
                    start: data_pos,
                    size,
                    pos: data_pos,
                    headers_parsed: false,
                    seek_head: HashMap::new(),
                    info: None,
                    tracks: None,
                    cues: None,
                    clusters: Vec::new(),
                    confirmed: Vec::new(),
                    preloaded: Vec::new(),
                });
            }
            if size == UNKNOWN_DATA_SIZE {
                return Err(ParserError::InvalidDataSize);
            }
            log::debug!("skipping {id:?} element in front of the segment");
            pos = data_pos
                .checked_add(size)
                .ok_or(ParserError::InvalidDataSize)?;
        }
    }

    /// The absolute position of the segment payload.
    pub fn payload_start(&self) -> u64 {
        self.start
    }

    /// The size of the segment payload. `None` for a live segment whose
    /// size is unknown.
    pub fn payload_size(&self) -> Option<u64> {
        self.size
    }

    fn payload_end(&self) -> Option<u64> {
        self.size.map(|size| self.start + size)
    }

    /// The end of the scannable range: the declared payload end, or the
    /// known total of the reader.
    fn scan_limit(&mut self) -> Option<u64> {
        if let Some(end) = self.payload_end() {
            return Some(end);
        }
        self.reader.length().0
    }

    /// Returns `true` once the end of the segment payload has been
    /// consumed. Never `true` while the payload size is unknown.
    fn at_payload_end(&mut self) -> bool {
        match self.scan_limit() {
            Some(limit) => self.pos >= limit,
            None => false,
        }
    }

    /// Parses the top level elements in front of the first cluster.
    ///
    /// Elements are dispatched by ID; a seek head is followed to the
    /// Info, Tracks and Cues elements it points to, even when they lie
    /// behind the clusters. Unknown elements are skipped by their
    /// declared size and never fail the parse. The call is restartable:
    /// after an [`ParserError::InsufficientData`] error it continues with
    /// the first element that has not been committed yet.
    pub fn parse_headers(&mut self) -> Result<()> {
        while !self.headers_parsed {
            if self.at_payload_end() {
                self.headers_parsed = true;
                break;
            }
            let (id, size, data_pos) = ebml::parse_element_header(&mut self.reader, self.pos)?;
            if id == ElementId::Cluster {
                self.headers_parsed = true;
                break;
            }
            if size == UNKNOWN_DATA_SIZE {
                return Err(ParserError::InvalidDataSize);
            }
            let next = data_pos
                .checked_add(size)
                .ok_or(ParserError::InvalidDataSize)?;
            match id {
                ElementId::SeekHead => self.parse_seek_head(data_pos, size)?,
                ElementId::Info => {
                    let fields = collect_children(&mut self.reader, data_pos, size)?;
                    self.info = Some(Info::new(&fields)?);
                }
                ElementId::Tracks => {
                    self.tracks = Some(Tracks::parse(&mut self.reader, data_pos, size)?);
                }
                ElementId::Cues => {
                    if self.cues.is_none() {
                        self.cues = Some(Cues::new(data_pos, size));
                    }
                }
                _ => log::debug!("skipping {id:?} element at the segment top level"),
            }
            self.pos = next;
        }
        Ok(())
    }

    /// Parses a seek head and immediately follows its entries to the
    /// elements that have not been seen yet.
    fn parse_seek_head(&mut self, start: u64, size: u64) -> Result<()> {
        let children = collect_children(&mut self.reader, start, size)?;
        let mut entries = Vec::new();
        for (id, data) in &children {
            if *id == ElementId::Seek {
                if let ElementData::Location { offset, size } = data {
                    let fields = collect_children(&mut self.reader, *offset, *size)?;
                    if let Ok(entry) = SeekEntry::new(&fields) {
                        entries.push(entry);
                    }
                }
            }
        }

        for entry in entries {
            let target = self
                .start
                .checked_add(entry.offset)
                .ok_or(ParserError::InvalidDataSize)?;
            self.seek_head.insert(entry.id, target);
            match entry.id {
                ElementId::Info if self.info.is_none() => {
                    let (data_pos, size) =
                        expect_master(&mut self.reader, target, ElementId::Info)?;
                    if size == UNKNOWN_DATA_SIZE {
                        return Err(ParserError::InvalidDataSize);
                    }
                    let fields = collect_children(&mut self.reader, data_pos, size)?;
                    self.info = Some(Info::new(&fields)?);
                }
                ElementId::Tracks if self.tracks.is_none() => {
                    let (data_pos, size) =
                        expect_master(&mut self.reader, target, ElementId::Tracks)?;
                    if size == UNKNOWN_DATA_SIZE {
                        return Err(ParserError::InvalidDataSize);
                    }
                    self.tracks = Some(Tracks::parse(&mut self.reader, data_pos, size)?);
                }
                ElementId::Cues if self.cues.is_none() => {
                    let (data_pos, size) =
                        expect_master(&mut self.reader, target, ElementId::Cues)?;
                    if size == UNKNOWN_DATA_SIZE {
                        return Err(ParserError::InvalidDataSize);
                    }
                    self.cues = Some(Cues::new(data_pos, size));
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Speculatively parses the next cluster without mutating the
    /// committed cluster index or the consumed position.
    ///
    /// Returns `Ok(None)` when the payload holds no further cluster. A
    /// cluster of unknown declared size has its extent resolved by
    /// scanning for the next sibling level element. The returned probe is
    /// committed with [`Segment::add_cluster`]. A Cues element that first
    /// shows up between clusters is registered on the way; that discovery
    /// is idempotent across retries.
    pub fn parse_cluster(&mut self) -> Result<Option<ClusterProbe>> {
        self.parse_headers()?;

        let mut pos = self.pos;
        loop {
            if let Some(limit) = self.scan_limit() {
                if pos >= limit {
                    return Ok(None);
                }
            }
            let (id, size, data_pos) = ebml::parse_element_header(&mut self.reader, pos)?;
            if id == ElementId::Cluster {
                let limit = self.scan_limit();
                let (payload_size, next_pos) = if size == UNKNOWN_DATA_SIZE {
                    let end = cluster::resolve_extent(&mut self.reader, data_pos, limit)?;
                    (end - data_pos, end)
                } else {
                    let end = data_pos
                        .checked_add(size)
                        .ok_or(ParserError::InvalidDataSize)?;
                    (size, end)
                };
                let timecode =
                    cluster::read_timecode(&mut self.reader, data_pos, Some(data_pos + payload_size))?;
                return Ok(Some(ClusterProbe {
                    cluster_pos: pos,
                    payload_start: data_pos,
                    payload_size,
                    next_pos,
                    timecode,
                }));
            }
            if size == UNKNOWN_DATA_SIZE {
                return Err(ParserError::InvalidDataSize);
            }
            if id == ElementId::Cues && self.cues.is_none() {
                self.cues = Some(Cues::new(data_pos, size));
            } else {
                log::debug!("skipping {id:?} element between clusters");
            }
            pos = data_pos
                .checked_add(size)
                .ok_or(ParserError::InvalidDataSize)?;
        }
    }

    /// Commits a previously parsed cluster into the cluster index.
    ///
    /// A cluster preloaded through the seek index at the same position is
    /// promoted instead of being duplicated. Returns `false` without any
    /// effect when the probed position was already consumed, which makes
    /// retry loops idempotent.
    pub fn add_cluster(&mut self, probe: ClusterProbe) -> bool {
        if probe.cluster_pos < self.pos {
            return false;
        }

        let id = match self
            .preloaded
            .iter()
            .position(|&id| self.clusters[id.0].position() == probe.cluster_pos)
        {
            Some(index) => self.preloaded.remove(index),
            None => {
                let id = ClusterId(self.clusters.len());
                self.clusters.push(Cluster::preloaded(probe.cluster_pos));
                id
            }
        };
        self.clusters[id.0].confirm(
            probe.payload_start,
            probe.payload_size,
            probe.next_pos,
            probe.timecode,
        );
        self.confirmed.push(id);
        self.pos = probe.next_pos;
        true
    }

    /// Parses and commits clusters until one has been added or the input
    /// is exhausted. Returns the committed cluster.
    pub fn load_cluster(&mut self) -> Result<Option<ClusterId>> {
        match self.parse_cluster()? {
            Some(probe) => {
                if self.add_cluster(probe) {
                    Ok(self.confirmed.last().copied())
                } else {
                    Ok(None)
                }
            }
            None => Ok(None),
        }
    }

    /// Parses the headers and all clusters of the segment.
    pub fn load(&mut self) -> Result<()> {
        self.parse_headers()?;
        while self.load_cluster()?.is_some() {}
        Ok(())
    }

    /// The number of bytes of the segment payload that the incremental
    /// driver has not consumed yet. `None` while the payload size is
    /// unknown.
    pub fn unparsed(&self) -> Option<u64> {
        self.payload_end().map(|end| end.saturating_sub(self.pos))
    }

    /// The segment information, once the headers have been parsed.
    pub fn info(&self) -> Option<&Info> {
        self.info.as_ref()
    }

    /// The track table, once the headers have been parsed.
    pub fn tracks(&self) -> Option<&Tracks> {
        self.tracks.as_ref()
    }

    /// The absolute positions of the top level elements the seek head
    /// announced, keyed by element.
    pub fn seek_head(&self) -> &HashMap<ElementId, u64> {
        &self.seek_head
    }

    /// The timestamp scale of the segment in nanoseconds per raw unit.
    pub fn timestamp_scale(&self) -> u64 {
        self.info
            .as_ref()
            .map_or(DEFAULT_TIMESTAMP_SCALE, |info| info.timestamp_scale().get())
    }

    /// The duration of the segment in nanoseconds, if declared.
    pub fn duration_ns(&self) -> Option<u64> {
        let duration = self.info.as_ref()?.duration()?;
        Some((duration * self.timestamp_scale() as f64) as u64)
    }

    /// The number of clusters committed so far.
    pub fn cluster_count(&self) -> usize {
        self.confirmed.len()
    }

    /// Returns a cluster by its handle.
    pub fn cluster(&self, id: ClusterId) -> Option<&Cluster> {
        self.clusters.get(id.0)
    }

    /// The first cluster of the segment, parsing it if necessary.
    pub fn first_cluster(&mut self) -> Result<Option<ClusterId>> {
        if let Some(&first) = self.confirmed.first() {
            return Ok(Some(first));
        }
        self.load_cluster()
    }

    /// The cluster following the given one in file order, parsing or
    /// preloading it if necessary.
    pub fn next_cluster(&mut self, id: ClusterId) -> Result<Option<ClusterId>> {
        if let Some(index) = self.confirmed.iter().position(|&c| c == id) {
            if index + 1 < self.confirmed.len() {
                return Ok(Some(self.confirmed[index + 1]));
            }
            return self.load_cluster();
        }

        // A preloaded cluster: resolve its end first.
        let limit = self.scan_limit();
        let end = {
            let (clusters, reader) = (&mut self.clusters, &mut self.reader);
            let Some(cluster) = clusters.get_mut(id.0) else {
                return Ok(None);
            };
            cluster.load_header(reader, limit)?;
            match cluster.end() {
                Some(end) => end,
                None => {
                    cluster.load_entries(reader, limit)?;
                    match cluster.end() {
                        Some(end) => end,
                        None => return Ok(None),
                    }
                }
            }
        };
        if let Some(payload_end) = self.payload_end() {
            if end >= payload_end {
                return Ok(None);
            }
        }
        Ok(Some(self.cluster_at_pos(end)))
    }

    /// Finds or creates the cluster at the given absolute position.
    fn cluster_at_pos(&mut self, pos: u64) -> ClusterId {
        let index = self
            .confirmed
            .partition_point(|&id| self.clusters[id.0].position() < pos);
        if let Some(&id) = self.confirmed.get(index) {
            if self.clusters[id.0].position() == pos {
                return id;
            }
        }
        let index = self
            .preloaded
            .partition_point(|&id| self.clusters[id.0].position() < pos);
        if let Some(&id) = self.preloaded.get(index) {
            if self.clusters[id.0].position() == pos {
                return id;
            }
        }

        let id = ClusterId(self.clusters.len());
        self.clusters.push(Cluster::preloaded(pos));
        self.preloaded.insert(index, id);
        id
    }

    /// Finds the confirmed cluster with the greatest time at or before
    /// the given time, or the first cluster when the time lies before it.
    pub fn find_cluster(&self, time_ns: u64) -> Option<ClusterId> {
        let scale = self.timestamp_scale();
        let index = self.confirmed.partition_point(|&id| {
            self.clusters[id.0]
                .timecode()
                .unwrap_or(0)
                .saturating_mul(scale)
                <= time_ns
        });
        if index == 0 {
            self.confirmed.first().copied()
        } else {
            Some(self.confirmed[index - 1])
        }
    }

    /// Builds the block entry list of a cluster if that has not happened
    /// yet.
    fn load_entries(&mut self, id: ClusterId) -> Result<()> {
        let limit = self.scan_limit();
        let (clusters, reader) = (&mut self.clusters, &mut self.reader);
        if let Some(cluster) = clusters.get_mut(id.0) {
            cluster.load_entries(reader, limit)?;
        }
        Ok(())
    }

    /// The first block entry of a cluster, loading the entry list on
    /// first access.
    pub fn first_entry(&mut self, id: ClusterId) -> Result<Option<EntryRef>> {
        self.load_entries(id)?;
        let Some(cluster) = self.clusters.get(id.0) else {
            return Ok(None);
        };
        Ok(match cluster.entry_count() {
            Some(count) if count > 0 => Some(EntryRef {
                cluster: id,
                index: 0,
            }),
            _ => None,
        })
    }

    /// The last block entry of a cluster, loading the entry list on first
    /// access.
    pub fn last_entry(&mut self, id: ClusterId) -> Result<Option<EntryRef>> {
        self.load_entries(id)?;
        let Some(cluster) = self.clusters.get(id.0) else {
            return Ok(None);
        };
        Ok(match cluster.entry_count() {
            Some(count) if count > 0 => Some(EntryRef {
                cluster: id,
                index: count - 1,
            }),
            _ => None,
        })
    }

    /// The entry following the given one within the same cluster, in file
    /// order.
    pub fn next_entry(&mut self, entry: EntryRef) -> Result<Option<EntryRef>> {
        self.load_entries(entry.cluster)?;
        let Some(cluster) = self.clusters.get(entry.cluster.0) else {
            return Ok(None);
        };
        Ok(match cluster.entry_count() {
            Some(count) if entry.index + 1 < count => Some(EntryRef {
                cluster: entry.cluster,
                index: entry.index + 1,
            }),
            _ => None,
        })
    }

    /// Resolves an entry handle into the block entry it refers to.
    pub fn entry(&self, entry: EntryRef) -> Option<&BlockEntry> {
        self.clusters.get(entry.cluster.0)?.entry(entry.index)
    }

    /// The absolute, scaled time of a block entry in nanoseconds.
    pub fn entry_time_ns(&self, entry: EntryRef) -> Option<u64> {
        let cluster = self.clusters.get(entry.cluster.0)?;
        let timecode = cluster.timecode()?;
        let block = cluster.entry(entry.index)?.block();
        Some(
            block
                .absolute_timecode(timecode)
                .saturating_mul(self.timestamp_scale()),
        )
    }

    /// Finds an entry of the given track inside a cluster.
    ///
    /// Without a target time the track's first entry is returned. With a
    /// target, the entry to start decoding at to reach that time.
    pub fn entry_for_track(
        &mut self,
        id: ClusterId,
        track: u64,
        time_ns: Option<u64>,
    ) -> Result<Option<EntryRef>> {
        self.load_entries(id)?;
        let scale = self.timestamp_scale();
        let Some(cluster) = self.clusters.get(id.0) else {
            return Ok(None);
        };
        Ok(cluster
            .entry_for(track, time_ns, scale)
            .map(|index| EntryRef { cluster: id, index }))
    }

    /// The keyframe entry of the given track with the greatest time
    /// inside a cluster. Used to seek backwards to a decodable starting
    /// point.
    pub fn max_key_entry(&mut self, id: ClusterId, track: u64) -> Result<Option<EntryRef>> {
        self.load_entries(id)?;
        let scale = self.timestamp_scale();
        let Some(cluster) = self.clusters.get(id.0) else {
            return Ok(None);
        };
        Ok(cluster
            .max_key(track, None, scale)
            .map(|index| EntryRef { cluster: id, index }))
    }

    /// The first entry of the given track, scanning clusters in file
    /// order.
    pub fn first_track_entry(&mut self, track: u64) -> Result<Option<EntryRef>> {
        let Some(mut id) = self.first_cluster()? else {
            return Ok(None);
        };
        loop {
            if let Some(entry) = self.entry_for_track(id, track, None)? {
                return Ok(Some(entry));
            }
            match self.next_cluster(id)? {
                Some(next) => id = next,
                None => return Ok(None),
            }
        }
    }

    /// The entry of the given track that follows the given entry in file
    /// order, crossing cluster boundaries as needed.
    pub fn next_track_entry(&mut self, track: u64, current: EntryRef) -> Result<Option<EntryRef>> {
        let mut entry = current;
        loop {
            match self.next_entry(entry)? {
                Some(next) => {
                    entry = next;
                    if let Some(block_entry) = self.entry(entry) {
                        if block_entry.block().track() == track {
                            return Ok(Some(entry));
                        }
                    }
                }
                None => {
                    let mut id = entry.cluster;
                    loop {
                        match self.next_cluster(id)? {
                            Some(next) => {
                                if let Some(first) = self.entry_for_track(next, track, None)? {
                                    return Ok(Some(first));
                                }
                                id = next;
                            }
                            None => return Ok(None),
                        }
                    }
                }
            }
        }
    }

    /// The confirmed cluster preceding the given one, if any.
    fn prev_confirmed(&self, id: ClusterId) -> Option<ClusterId> {
        let index = self.confirmed.iter().position(|&c| c == id)?;
        if index == 0 {
            None
        } else {
            Some(self.confirmed[index - 1])
        }
    }

    /// Makes sure clusters covering the given time have been parsed.
    fn parse_until(&mut self, time_ns: u64) -> Result<()> {
        if self.confirmed.is_empty() && self.load_cluster()?.is_none() {
            return Ok(());
        }
        let scale = self.timestamp_scale();
        loop {
            let Some(&last) = self.confirmed.last() else {
                return Ok(());
            };
            let time = self.clusters[last.0]
                .timecode()
                .unwrap_or(0)
                .saturating_mul(scale);
            if time > time_ns {
                return Ok(());
            }
            if self.load_cluster()?.is_none() {
                return Ok(());
            }
        }
    }

    /// Seeks a track to the given time by scanning clusters.
    ///
    /// A video track seeks to the nearest keyframe at or before the time,
    /// walking backwards across clusters when necessary; other tracks
    /// seek to the nearest entry at or before it, since their frames are
    /// independently decodable.
    pub fn seek_track(&mut self, track: u64, time_ns: u64) -> Result<Option<EntryRef>> {
        let needs_key = match self.tracks.as_ref().and_then(|tracks| tracks.by_number(track)) {
            Some(track) => matches!(track.kind(), TrackKind::Video(_)),
            None => return Ok(None),
        };

        self.parse_until(time_ns)?;
        let Some(start) = self.find_cluster(time_ns) else {
            return Ok(None);
        };
        let scale = self.timestamp_scale();

        let mut id = start;
        loop {
            self.load_entries(id)?;
            let found = match self.clusters.get(id.0) {
                Some(cluster) if needs_key => cluster.max_key(track, Some(time_ns), scale),
                Some(cluster) => cluster.entry_for(track, Some(time_ns), scale),
                None => None,
            };
            if let Some(index) = found {
                return Ok(Some(EntryRef { cluster: id, index }));
            }
            match self.prev_confirmed(id) {
                Some(prev) => id = prev,
                None => break,
            }
        }

        // Nothing at or before the target: fall forward to the first
        // usable entry of the track.
        let mut id = start;
        loop {
            self.load_entries(id)?;
            let found = match self.clusters.get(id.0) {
                Some(cluster) if needs_key => cluster.entries().and_then(|entries| {
                    entries
                        .iter()
                        .position(|entry| entry.block().track() == track && entry.block().is_key())
                }),
                Some(cluster) => cluster.entry_for(track, None, scale),
                None => None,
            };
            if let Some(index) = found {
                return Ok(Some(EntryRef { cluster: id, index }));
            }
            match self.next_cluster(id)? {
                Some(next) => id = next,
                None => return Ok(None),
            }
        }
    }

    /// Returns `true` once a Cues element has been discovered.
    pub fn has_cues(&self) -> bool {
        self.cues.is_some()
    }

    /// The number of cue points parsed and discovered so far, if a Cues
    /// element is present.
    pub fn cue_point_counts(&self) -> Option<(usize, usize)> {
        self.cues
            .as_ref()
            .map(|cues| (cues.loaded_count(), cues.preloaded_count()))
    }

    /// Finds the cue point with the greatest time at or before the given
    /// time that indexes the given track.
    ///
    /// Pending cue points are parsed as the search needs them. Returns
    /// `None` when no Cues element is present, in which case callers fall
    /// back to scanning clusters linearly.
    pub fn find_cue(&mut self, time_ns: u64, track: u64) -> Result<Option<CueIndex>> {
        let scale = self.timestamp_scale();
        let Some(cues) = self.cues.as_mut() else {
            return Ok(None);
        };
        Ok(cues
            .find(&mut self.reader, time_ns, track, scale)?
            .map(CueIndex))
    }

    /// Resolves a cue handle into the loaded cue point.
    pub fn cue_point(&self, index: CueIndex) -> Option<&CuePoint> {
        self.cues.as_ref()?.point(index.0)
    }

    /// Resolves a cue point's position for the given track into the block
    /// entry it refers to, preloading the addressed cluster when it has
    /// not been parsed yet.
    pub fn cue_block(&mut self, index: CueIndex, track: u64) -> Result<Option<EntryRef>> {
        let Some(position) = self
            .cue_point(index)
            .and_then(|point| point.position_for(track))
            .copied()
        else {
            return Ok(None);
        };

        let cluster_pos = self
            .start
            .checked_add(position.cluster_position())
            .ok_or(ParserError::InvalidDataSize)?;
        let id = self.cluster_at_pos(cluster_pos);
        self.load_entries(id)?;
        let scale = self.timestamp_scale();
        let Some(cluster) = self.clusters.get(id.0) else {
            return Ok(None);
        };

        let mut seen = 0_u64;
        if let Some(entries) = cluster.entries() {
            for (index, entry) in entries.iter().enumerate() {
                if entry.block().track() == track {
                    seen += 1;
                    if seen == position.block() {
                        return Ok(Some(EntryRef { cluster: id, index }));
                    }
                }
            }
        }
        // The block number was out of range: use the track's first entry.
        log::warn!("cue point addresses a block that is not in its cluster");
        Ok(cluster
            .entry_for(track, None, scale)
            .map(|index| EntryRef { cluster: id, index }))
    }

    /// Seeks a track to the given time, going through the seek index when
    /// one is present and falling back to a linear cluster scan.
    pub fn seek(&mut self, track: u64, time_ns: u64) -> Result<Option<EntryRef>> {
        if self.has_cues() {
            if let Some(index) = self.find_cue(time_ns, track)? {
                if let Some(entry) = self.cue_block(index, track)? {
                    return Ok(Some(entry));
                }
            }
        }
        self.seek_track(track, time_ns)
    }
}
