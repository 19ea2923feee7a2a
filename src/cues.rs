//! The cue based seek index of a segment.

use crate::ebml::{
    self, collect_children, find_unsigned, try_find_unsigned, ElementData, UNKNOWN_DATA_SIZE,
};
use crate::element_id::ElementId;
use crate::reader::MkvReader;
use crate::{ParserError, Result};

/// The position of one track within a cue point.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TrackPosition {
    track: u64,
    cluster_position: u64,
    block: u64,
}

impl TrackPosition {
    /// The number of the track this position belongs to.
    pub fn track(&self) -> u64 {
        self.track
    }

    /// The position of the cluster, relative to the segment payload.
    pub fn cluster_position(&self) -> u64 {
        self.cluster_position
    }

    /// The 1-based number of the block within its cluster.
    pub fn block(&self) -> u64 {
        self.block
    }

    fn parse(fields: &[(ElementId, ElementData)]) -> Result<Self> {
        let track = find_unsigned(fields, ElementId::CueTrack)?;
        let cluster_position = find_unsigned(fields, ElementId::CueClusterPosition)?;
        let block = try_find_unsigned(fields, ElementId::CueBlockNumber)?.unwrap_or(1);
        Ok(Self {
            track,
            cluster_position,
            block,
        })
    }
}

/// A single point in the seek index, mapping a time to the positions to
/// start reading from.
#[derive(Clone, Debug)]
pub struct CuePoint {
    timecode: u64,
    track_positions: Vec<TrackPosition>,
}

impl CuePoint {
    /// The absolute but unscaled time of the cue point.
    pub fn timecode(&self) -> u64 {
        self.timecode
    }

    /// The track positions of the cue point.
    pub fn track_positions(&self) -> &[TrackPosition] {
        &self.track_positions
    }

    /// Finds the position entry for the given track, if the point has one.
    pub fn position_for(&self, track: u64) -> Option<&TrackPosition> {
        self.track_positions
            .iter()
            .find(|position| position.track == track)
    }

    fn parse<R: MkvReader>(r: &mut R, start: u64, size: u64) -> Result<Self> {
        let fields = collect_children(r, start, size)?;
        let timecode = find_unsigned(&fields, ElementId::CueTime)?;
        let mut track_positions = Vec::new();
        for (id, data) in &fields {
            if *id == ElementId::CueTrackPositions {
                if let ElementData::Location { offset, size } = data {
                    let children = collect_children(r, *offset, *size)?;
                    track_positions.push(TrackPosition::parse(&children)?);
                }
            }
        }
        if track_positions.is_empty() {
            return Err(ParserError::MissingElement(ElementId::CueTrackPositions));
        }
        Ok(Self {
            timecode,
            track_positions,
        })
    }
}

/// One slot of the cue index: the payload span is recorded cheaply during
/// preloading, the point itself is parsed on demand.
#[derive(Clone, Debug)]
struct CueSlot {
    pos: u64,
    size: u64,
    point: Option<CuePoint>,
}

/// The lazily loaded cue index of a segment.
///
/// Loading happens in two phases: a preload pass records the offset of
/// every cue point without parsing it, and single points are then parsed
/// front to back as searches need them. Once a point is loaded it stays
/// loaded.
#[derive(Clone, Debug)]
pub(crate) struct Cues {
    start: u64,
    size: u64,
    slots: Vec<CueSlot>,
    preloaded: bool,
    loaded: usize,
}

impl Cues {
    pub(crate) fn new(start: u64, size: u64) -> Self {
        Self {
            start,
            size,
            slots: Vec::new(),
            preloaded: false,
            loaded: 0,
        }
    }

    /// Records the payload span of every cue point child.
    ///
    /// The collected slots are committed in one step, so a retry after an
    /// [`ParserError::InsufficientData`] error rescans identically.
    fn preload<R: MkvReader>(&mut self, r: &mut R) -> Result<()> {
        if self.preloaded {
            return Ok(());
        }
        let end = self
            .start
            .checked_add(self.size)
            .ok_or(ParserError::InvalidDataSize)?;
        let mut slots = Vec::new();
        let mut pos = self.start;
        while pos < end {
            let (id, size, data_pos) = ebml::parse_element_header(r, pos)?;
            if size == UNKNOWN_DATA_SIZE {
                return Err(ParserError::InvalidDataSize);
            }
            let data_end = data_pos
                .checked_add(size)
                .ok_or(ParserError::InvalidDataSize)?;
            if data_end > end {
                return Err(ParserError::ElementOverflow);
            }
            if id == ElementId::CuePoint {
                slots.push(CueSlot {
                    pos: data_pos,
                    size,
                    point: None,
                });
            } else {
                log::debug!("skipping {id:?} element inside the cues");
            }
            pos = data_end;
        }
        log::debug!("preloaded {} cue points", slots.len());
        self.slots = slots;
        self.preloaded = true;
        Ok(())
    }

    /// Parses the next pending cue point. Returns `false` once all points
    /// are loaded.
    fn load_one<R: MkvReader>(&mut self, r: &mut R) -> Result<bool> {
        if self.loaded >= self.slots.len() {
            return Ok(false);
        }
        let slot = &self.slots[self.loaded];
        let point = CuePoint::parse(r, slot.pos, slot.size)?;
        if self.loaded > 0 {
            if let Some(previous) = self.slots[self.loaded - 1].point.as_ref() {
                if point.timecode <= previous.timecode {
                    log::warn!("cue points are not strictly ascending in time");
                }
            }
        }
        self.slots[self.loaded].point = Some(point);
        self.loaded += 1;
        Ok(true)
    }

    /// Finds the cue point with the greatest time at or before `time_ns`
    /// whose positions include the given track.
    ///
    /// Pending points are loaded as the search needs them; loading is
    /// monotonic and never rolled back.
    pub(crate) fn find<R: MkvReader>(
        &mut self,
        r: &mut R,
        time_ns: u64,
        track: u64,
        scale: u64,
    ) -> Result<Option<usize>> {
        self.preload(r)?;

        // Load until the loaded prefix reaches past the target time.
        while self.loaded < self.slots.len() {
            if self.loaded > 0 {
                if let Some(point) = self.slots[self.loaded - 1].point.as_ref() {
                    if point.timecode.saturating_mul(scale) > time_ns {
                        break;
                    }
                }
            }
            self.load_one(r)?;
        }

        for index in (0..self.loaded).rev() {
            if let Some(point) = self.slots[index].point.as_ref() {
                if point.timecode.saturating_mul(scale) <= time_ns
                    && point.position_for(track).is_some()
                {
                    return Ok(Some(index));
                }
            }
        }
        Ok(None)
    }

    /// Returns a cue point by index, if it has been loaded.
    pub(crate) fn point(&self, index: usize) -> Option<&CuePoint> {
        self.slots.get(index)?.point.as_ref()
    }

    /// The number of cue points parsed so far.
    pub(crate) fn loaded_count(&self) -> usize {
        self.loaded
    }

    /// The number of cue points discovered by the preload pass.
    pub(crate) fn preloaded_count(&self) -> usize {
        self.slots.len()
    }
}
