//! A time grouped container of block entries.

use crate::block::{Block, BlockEntry, BlockGroup};
use crate::ebml::{self, UNKNOWN_DATA_SIZE};
use crate::element_id::{is_segment_level, lookup, ElementId};
use crate::reader::MkvReader;
use crate::{ParserError, Result};

/// A time bounded group of block entries inside a segment.
///
/// The absolute timecode is parsed eagerly, since it is needed to place
/// the cluster on the time line. The block entry list is only built on
/// first access.
#[derive(Clone, Debug)]
pub struct Cluster {
    element_pos: u64,
    payload_start: Option<u64>,
    payload_size: Option<u64>,
    end_pos: Option<u64>,
    timecode: Option<u64>,
    entries: Option<Vec<BlockEntry>>,
}

impl Cluster {
    /// Creates a cluster whose position is known but whose header has not
    /// been read yet, e.g. one discovered through the seek index.
    pub(crate) fn preloaded(element_pos: u64) -> Self {
        Self {
            element_pos,
            payload_start: None,
            payload_size: None,
            end_pos: None,
            timecode: None,
            entries: None,
        }
    }

    /// Fills in the facts a successful speculative parse has determined.
    pub(crate) fn confirm(
        &mut self,
        payload_start: u64,
        payload_size: u64,
        end_pos: u64,
        timecode: u64,
    ) {
        self.payload_start = Some(payload_start);
        self.payload_size = Some(payload_size);
        self.end_pos = Some(end_pos);
        self.timecode = Some(timecode);
    }

    /// The absolute position of the cluster element.
    pub fn position(&self) -> u64 {
        self.element_pos
    }

    /// The payload size of the cluster, once known.
    ///
    /// For a cluster of unknown declared size this is only resolved after
    /// its extent has been scanned.
    pub fn size(&self) -> Option<u64> {
        self.payload_size
    }

    /// The absolute raw timecode of the cluster, once known.
    pub fn timecode(&self) -> Option<u64> {
        self.timecode
    }

    /// Position just past the end of the cluster element, once known.
    pub(crate) fn end(&self) -> Option<u64> {
        self.end_pos
    }

    /// Returns `true` once the block entry list has been built.
    pub fn is_loaded(&self) -> bool {
        self.entries.is_some()
    }

    /// The block entries of the cluster, in file order, once loaded.
    pub fn entries(&self) -> Option<&[BlockEntry]> {
        self.entries.as_deref()
    }

    /// Returns a single block entry by index, once loaded.
    pub fn entry(&self, index: usize) -> Option<&BlockEntry> {
        self.entries.as_ref()?.get(index)
    }

    /// The number of block entries, once loaded.
    pub fn entry_count(&self) -> Option<usize> {
        self.entries.as_ref().map(Vec::len)
    }

    /// Reads the cluster's element header and timecode if that has not
    /// happened yet.
    ///
    /// `limit` bounds the scan for clusters of unknown size: the end of
    /// the segment payload, or the known total of the reader.
    pub(crate) fn load_header<R: MkvReader>(&mut self, r: &mut R, limit: Option<u64>) -> Result<()> {
        if self.payload_start.is_some() && self.timecode.is_some() {
            return Ok(());
        }

        let (id, size, data_pos) = ebml::parse_element_header(r, self.element_pos)?;
        if id != ElementId::Cluster {
            return Err(ParserError::UnexpectedElement {
                expected: ElementId::Cluster,
                found: id,
            });
        }

        let payload_size = if size == UNKNOWN_DATA_SIZE {
            None
        } else {
            Some(size)
        };
        let payload_end = match payload_size {
            Some(size) => Some(
                data_pos
                    .checked_add(size)
                    .ok_or(ParserError::InvalidDataSize)?,
            ),
            None => None,
        };
        let timecode = read_timecode(r, data_pos, payload_end.or(limit))?;

        self.payload_start = Some(data_pos);
        self.payload_size = payload_size;
        self.end_pos = payload_end;
        self.timecode = Some(timecode);
        Ok(())
    }

    /// Scans the cluster's children once and builds the ordered block
    /// entry list.
    ///
    /// Nothing is committed when the scan fails, so a retry after an
    /// [`ParserError::InsufficientData`] error starts from the identical
    /// state. For a cluster of unknown declared size the scan also
    /// resolves the cluster's end.
    pub(crate) fn load_entries<R: MkvReader>(
        &mut self,
        r: &mut R,
        limit: Option<u64>,
    ) -> Result<()> {
        if self.entries.is_some() {
            return Ok(());
        }
        self.load_header(r, limit)?;
        let Some(start) = self.payload_start else {
            return Err(ParserError::InsufficientData);
        };

        let mut entries = Vec::new();
        let mut pos = start;
        let mut resolved_end = self.end_pos;
        loop {
            if let Some(end) = resolved_end {
                if pos >= end {
                    break;
                }
            } else if limit.map_or(false, |l| pos >= l) {
                resolved_end = Some(pos);
                break;
            }

            let (raw_id, id_len) = ebml::parse_element_id(r, pos)?;
            let id = lookup(raw_id);
            if resolved_end.is_none() && is_segment_level(id) {
                // The next sibling ends this cluster of unknown size.
                resolved_end = Some(pos);
                break;
            }

            let (size, size_len) = ebml::parse_data_size(r, pos + id_len)?;
            if size == UNKNOWN_DATA_SIZE {
                return Err(ParserError::InvalidDataSize);
            }
            let data_pos = pos + id_len + size_len;
            let data_end = data_pos
                .checked_add(size)
                .ok_or(ParserError::InvalidDataSize)?;
            if let Some(end) = resolved_end {
                if data_end > end {
                    return Err(ParserError::ElementOverflow);
                }
            }

            match id {
                ElementId::SimpleBlock => {
                    entries.push(BlockEntry::SimpleBlock(Block::parse(r, data_pos, size)?));
                }
                ElementId::BlockGroup => {
                    entries.push(BlockEntry::BlockGroup(BlockGroup::parse(r, data_pos, size)?));
                }
                ElementId::Timestamp | ElementId::PrevSize | ElementId::Void | ElementId::Crc32 => {
                }
                _ => {
                    log::debug!("skipping {id:?} element inside a cluster");
                }
            }
            pos = data_end;
        }

        if self.end_pos.is_none() {
            self.end_pos = resolved_end;
            self.payload_size = resolved_end.map(|end| end - start);
        }
        self.entries = Some(entries);
        Ok(())
    }

    /// Finds the index of an entry of the given track, once loaded.
    ///
    /// Without a target time the first entry of the track is returned.
    /// With a target the last entry at or before it is returned, falling
    /// forward to the first entry after it when the target precedes the
    /// track's first entry in this cluster.
    pub(crate) fn entry_for(&self, track: u64, time_ns: Option<u64>, scale: u64) -> Option<usize> {
        let entries = self.entries.as_ref()?;
        let timecode = self.timecode?;
        let mut result = None;
        for (index, entry) in entries.iter().enumerate() {
            let block = entry.block();
            if block.track() != track {
                continue;
            }
            let Some(target) = time_ns else {
                return Some(index);
            };
            let time = block.absolute_timecode(timecode).saturating_mul(scale);
            if time <= target {
                result = Some(index);
            } else {
                if result.is_none() {
                    result = Some(index);
                }
                break;
            }
        }
        result
    }

    /// Finds the keyframe entry of the given track with the greatest
    /// time, once loaded. With a limit, entries after it are ignored.
    ///
    /// Used for seeking backwards to a decodable starting point.
    pub(crate) fn max_key(&self, track: u64, limit_ns: Option<u64>, scale: u64) -> Option<usize> {
        let entries = self.entries.as_ref()?;
        let timecode = self.timecode?;
        for (index, entry) in entries.iter().enumerate().rev() {
            let block = entry.block();
            if block.track() != track || !block.is_key() {
                continue;
            }
            if let Some(limit) = limit_ns {
                let time = block.absolute_timecode(timecode).saturating_mul(scale);
                if time > limit {
                    continue;
                }
            }
            return Some(index);
        }
        None
    }
}

/// Scans the children of a cluster payload for the mandatory timecode.
///
/// The timecode has to appear before the first block entry.
pub(crate) fn read_timecode<R: MkvReader>(
    r: &mut R,
    payload_start: u64,
    end: Option<u64>,
) -> Result<u64> {
    let mut pos = payload_start;
    loop {
        if end.map_or(false, |e| pos >= e) {
            return Err(ParserError::MissingElement(ElementId::Timestamp));
        }
        let (raw_id, id_len) = ebml::parse_element_id(r, pos)?;
        let id = lookup(raw_id);
        if is_segment_level(id) {
            return Err(ParserError::MissingElement(ElementId::Timestamp));
        }
        let (size, size_len) = ebml::parse_data_size(r, pos + id_len)?;
        if size == UNKNOWN_DATA_SIZE {
            return Err(ParserError::InvalidDataSize);
        }
        let data_pos = pos + id_len + size_len;
        match id {
            ElementId::Timestamp => return ebml::parse_unsigned(r, data_pos, size),
            ElementId::SimpleBlock | ElementId::BlockGroup => {
                return Err(ParserError::MissingElement(ElementId::Timestamp));
            }
            _ => {}
        }
        pos = data_pos
            .checked_add(size)
            .ok_or(ParserError::InvalidDataSize)?;
    }
}

/// Determines the end of a cluster of unknown declared size by scanning
/// its children until the next sibling level element or the end of the
/// input.
pub(crate) fn resolve_extent<R: MkvReader>(
    r: &mut R,
    payload_start: u64,
    limit: Option<u64>,
) -> Result<u64> {
    let mut pos = payload_start;
    loop {
        if limit.map_or(false, |l| pos >= l) {
            return Ok(pos);
        }
        let (raw_id, id_len) = ebml::parse_element_id(r, pos)?;
        let id = lookup(raw_id);
        if is_segment_level(id) {
            return Ok(pos);
        }
        let (size, size_len) = ebml::parse_data_size(r, pos + id_len)?;
        if size == UNKNOWN_DATA_SIZE {
            return Err(ParserError::InvalidDataSize);
        }
        pos = pos
            .checked_add(id_len + size_len + size)
            .ok_or(ParserError::InvalidDataSize)?;
    }
}
