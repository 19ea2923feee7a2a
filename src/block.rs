//! Parses blocks inside a cluster.

use crate::ebml::{
    collect_children, parse_i16, parse_svint, parse_u8, parse_vint, ElementData,
};
use crate::element_id::ElementId;
use crate::reader::MkvReader;
use crate::{ParserError, Result};

/// The lacing mode of a block.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Lacing {
    /// One frame per block.
    None,
    /// Variable sized frames with 255 run length coded sizes.
    Xiph,
    /// Equally sized frames, only the frame count is stored.
    FixedSize,
    /// Variable sized frames with delta coded sizes.
    Ebml,
}

impl From<u8> for Lacing {
    fn from(d: u8) -> Self {
        match d {
            1 => Lacing::Xiph,
            2 => Lacing::FixedSize,
            3 => Lacing::Ebml,
            _ => Lacing::None,
        }
    }
}

/// The byte span of a single coded frame.
///
/// Frames are never loaded eagerly. The caller reads the bytes through
/// the reader when it needs them.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Frame {
    /// Absolute offset of the frame data.
    pub pos: u64,
    /// Length of the frame data in bytes.
    pub len: u64,
}

impl Frame {
    /// Reads the frame's bytes into the given buffer, which must be
    /// exactly [`Frame::len`] bytes long.
    ///
    /// # Errors
    ///
    /// Fails with an [`ParserError::InvalidBlock`] error on a buffer size
    /// mismatch, otherwise with whatever the reader reports.
    pub fn read<R: MkvReader>(&self, r: &mut R, buffer: &mut [u8]) -> Result<()> {
        if buffer.len() as u64 != self.len {
            return Err(ParserError::InvalidBlock("frame buffer size mismatch"));
        }
        r.read(self.pos, buffer)
    }
}

/// A block holding one or more laced frames of a single track.
#[derive(Clone, Debug)]
pub struct Block {
    track: u64,
    timecode: i16,
    keyframe: bool,
    lacing: Lacing,
    frames: Vec<Frame>,
}

impl Block {
    /// Parses a block from its payload span.
    ///
    /// The keyframe flag is taken from the flags byte, which is only
    /// meaningful for simple blocks. For a block inside a block group the
    /// caller overrides it based on the group's reference information.
    pub(crate) fn parse<R: MkvReader>(r: &mut R, start: u64, size: u64) -> Result<Self> {
        let end = start.checked_add(size).ok_or(ParserError::InvalidDataSize)?;

        let (track, track_len) = parse_vint(r, start)?;
        if track == 0 {
            return Err(ParserError::InvalidBlock("zero track number"));
        }
        let mut pos = start + track_len;
        if end.saturating_sub(pos) < 3 {
            return Err(ParserError::InvalidBlock("block header is truncated"));
        }

        let timecode = parse_i16(r, pos)?;
        pos += 2;

        let flags = parse_u8(r, pos)?;
        pos += 1;
        let keyframe = (flags & 0x80) != 0;
        let lacing = Lacing::from((flags & 0x06) >> 1);

        let mut frames = Vec::new();
        if lacing == Lacing::None {
            frames.push(Frame {
                pos,
                len: end - pos,
            });
        } else {
            let frame_count = u64::from(parse_u8(r, pos)?) + 1;
            pos += 1;

            match lacing {
                Lacing::Xiph => {
                    // All but the last size are stored as runs of 255.
                    let mut sizes = Vec::with_capacity(frame_count as usize);
                    for _ in 0..frame_count - 1 {
                        let mut frame_size: u64 = 0;
                        loop {
                            let value = parse_u8(r, pos)?;
                            pos += 1;
                            frame_size += u64::from(value);
                            if value != 255 {
                                break;
                            }
                        }
                        sizes.push(frame_size);
                    }
                    push_sized_frames(&mut frames, &sizes, pos, end)?;
                }
                Lacing::Ebml => {
                    // The first size is unsigned, the rest are deltas.
                    let mut sizes = Vec::with_capacity(frame_count as usize);
                    if frame_count > 1 {
                        let (first, len) = parse_vint(r, pos)?;
                        pos += len;
                        sizes.push(first);
                        let mut last = first as i64;
                        for _ in 1..frame_count - 1 {
                            let (delta, len) = parse_svint(r, pos)?;
                            pos += len;
                            last += delta;
                            if last < 0 {
                                return Err(ParserError::InvalidBlock(
                                    "negative laced frame size",
                                ));
                            }
                            sizes.push(last as u64);
                        }
                    }
                    push_sized_frames(&mut frames, &sizes, pos, end)?;
                }
                Lacing::FixedSize => {
                    let data_size = end.saturating_sub(pos);
                    if data_size % frame_count != 0 {
                        return Err(ParserError::InvalidBlock(
                            "fixed size lacing with uneven frame sizes",
                        ));
                    }
                    let frame_len = data_size / frame_count;
                    for i in 0..frame_count {
                        frames.push(Frame {
                            pos: pos + i * frame_len,
                            len: frame_len,
                        });
                    }
                }
                Lacing::None => { /* Unreachable */ }
            }
        }

        Ok(Self {
            track,
            timecode,
            keyframe,
            lacing,
            frames,
        })
    }

    /// The number of the track this block belongs to.
    pub fn track(&self) -> u64 {
        self.track
    }

    /// The timecode of the block, relative to its cluster, in raw units.
    pub fn relative_timecode(&self) -> i16 {
        self.timecode
    }

    /// The absolute timecode of the block in raw units, given the
    /// timecode of the owning cluster.
    pub fn absolute_timecode(&self, cluster_timecode: u64) -> u64 {
        cluster_timecode.saturating_add_signed(i64::from(self.timecode))
    }

    /// Returns `true` if the block only contains keyframes.
    pub fn is_key(&self) -> bool {
        self.keyframe
    }

    pub(crate) fn set_key(&mut self, keyframe: bool) {
        self.keyframe = keyframe;
    }

    /// The lacing mode of the block.
    pub fn lacing(&self) -> Lacing {
        self.lacing
    }

    /// The number of frames inside the block.
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// The frame spans of the block, in coding order.
    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    /// Returns a single frame span by index.
    pub fn frame(&self, index: usize) -> Option<&Frame> {
        self.frames.get(index)
    }
}

/// Lays out frames with explicit sizes and deduces the last one from the
/// remaining payload.
fn push_sized_frames(
    frames: &mut Vec<Frame>,
    sizes: &[u64],
    mut pos: u64,
    end: u64,
) -> Result<()> {
    for &len in sizes {
        frames.push(Frame { pos, len });
        pos = pos
            .checked_add(len)
            .ok_or(ParserError::InvalidBlock("laced frame sizes overflow"))?;
    }
    let last = end
        .checked_sub(pos)
        .ok_or(ParserError::InvalidBlock("laced frame sizes exceed block"))?;
    frames.push(Frame { pos, len: last });
    Ok(())
}

/// A block wrapped in a group that carries container level metadata.
///
/// The format permits multiple ranked blocks per group, but this parser
/// keeps exactly one: additional Block children are skipped. The group
/// level reference timecodes are exposed without being interpreted.
#[derive(Clone, Debug)]
pub struct BlockGroup {
    block: Block,
    prev_timecode: Option<i64>,
    next_timecode: Option<i64>,
    duration: Option<u64>,
}

impl BlockGroup {
    pub(crate) fn parse<R: MkvReader>(r: &mut R, start: u64, size: u64) -> Result<Self> {
        let fields = collect_children(r, start, size)?;

        let mut block_location = None;
        let mut duration = None;
        let mut prev_timecode = None;
        let mut next_timecode = None;

        for (id, data) in &fields {
            match (id, data) {
                (ElementId::Block, ElementData::Location { offset, size }) => {
                    if block_location.is_none() {
                        block_location = Some((*offset, *size));
                    } else {
                        log::warn!("ignoring additional block inside a block group");
                    }
                }
                (ElementId::BlockDuration, ElementData::Unsigned(value)) => {
                    duration = Some(*value);
                }
                (ElementId::ReferenceBlock, ElementData::Signed(value)) => {
                    if *value < 0 {
                        prev_timecode = Some(*value);
                    } else {
                        next_timecode = Some(*value);
                    }
                }
                _ => {}
            }
        }

        let (block_pos, block_size) =
            block_location.ok_or(ParserError::MissingElement(ElementId::Block))?;
        let mut block = Block::parse(r, block_pos, block_size)?;
        // A grouped block without references is independently decodable.
        block.set_key(prev_timecode.is_none() && next_timecode.is_none());

        Ok(Self {
            block,
            prev_timecode,
            next_timecode,
            duration,
        })
    }

    /// The single block cached for this group.
    pub fn block(&self) -> &Block {
        &self.block
    }

    /// The timecode of the referenced earlier block, relative to this
    /// block's time, if any.
    pub fn prev_timecode(&self) -> Option<i64> {
        self.prev_timecode
    }

    /// The timecode of the referenced later block, relative to this
    /// block's time, if any.
    pub fn next_timecode(&self) -> Option<i64> {
        self.next_timecode
    }

    /// The duration of the group in raw timecode units, if declared.
    pub fn duration(&self) -> Option<u64> {
        self.duration
    }
}

/// A single entry in the block list of a cluster.
#[derive(Clone, Debug)]
pub enum BlockEntry {
    /// A bare block without container level metadata.
    SimpleBlock(Block),
    /// A block wrapped in a group with reference information.
    BlockGroup(BlockGroup),
}

impl BlockEntry {
    /// The underlying block of the entry.
    pub fn block(&self) -> &Block {
        match self {
            Self::SimpleBlock(block) => block,
            Self::BlockGroup(group) => group.block(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_block_without_lacing() {
        // Track 1, relative timecode 8, keyframe, 4 bytes of data.
        let mut data = vec![0x81, 0x00, 0x08, 0x80];
        data.extend_from_slice(&[1, 2, 3, 4]);
        let mut r: &[u8] = &data;
        let block = Block::parse(&mut r, 0, data.len() as u64).unwrap();
        assert_eq!(block.track(), 1);
        assert_eq!(block.relative_timecode(), 8);
        assert!(block.is_key());
        assert_eq!(block.lacing(), Lacing::None);
        assert_eq!(block.frames(), &[Frame { pos: 4, len: 4 }]);
    }

    #[test]
    fn test_fixed_size_lacing() {
        // Track 1, three frames of 100 bytes each.
        let mut data = vec![0x81, 0x00, 0x00, 0x04, 0x02];
        data.extend_from_slice(&[0_u8; 300]);
        let mut r: &[u8] = &data;
        let block = Block::parse(&mut r, 0, data.len() as u64).unwrap();
        assert_eq!(block.lacing(), Lacing::FixedSize);
        assert_eq!(block.frame_count(), 3);
        assert_eq!(
            block.frames(),
            &[
                Frame { pos: 5, len: 100 },
                Frame { pos: 105, len: 100 },
                Frame { pos: 205, len: 100 },
            ]
        );
    }

    #[test]
    fn test_fixed_size_lacing_uneven() {
        let mut data = vec![0x81, 0x00, 0x00, 0x04, 0x02];
        data.extend_from_slice(&[0_u8; 301]);
        let mut r: &[u8] = &data;
        assert!(matches!(
            Block::parse(&mut r, 0, data.len() as u64),
            Err(ParserError::InvalidBlock(_))
        ));
    }

    #[test]
    fn test_xiph_lacing() {
        // Three frames: 255 + 45 = 300 bytes, 255 bytes, rest (100 bytes).
        let mut data = vec![0x81, 0x00, 0x00, 0x02, 0x02];
        data.extend_from_slice(&[255, 45, 255, 0]);
        data.extend_from_slice(&[0_u8; 655]);
        let mut r: &[u8] = &data;
        let block = Block::parse(&mut r, 0, data.len() as u64).unwrap();
        assert_eq!(block.lacing(), Lacing::Xiph);
        assert_eq!(block.frame_count(), 3);
        let lengths: Vec<u64> = block.frames().iter().map(|f| f.len).collect();
        assert_eq!(lengths, vec![300, 255, 100]);
        let total: u64 = lengths.iter().sum();
        assert_eq!(total, 655);
    }

    #[test]
    fn test_ebml_lacing() {
        // Three frames: 800, 500 and the rest (300 bytes).
        // 800 -> 0x4320, delta -300 -> 0x5ED3.
        let mut data = vec![0x81, 0x00, 0x00, 0x06, 0x02];
        data.extend_from_slice(&[0x43, 0x20, 0x5E, 0xD3]);
        data.extend_from_slice(&[0_u8; 1600]);
        let mut r: &[u8] = &data;
        let block = Block::parse(&mut r, 0, data.len() as u64).unwrap();
        assert_eq!(block.lacing(), Lacing::Ebml);
        assert_eq!(block.frame_count(), 3);
        let lengths: Vec<u64> = block.frames().iter().map(|f| f.len).collect();
        assert_eq!(lengths, vec![800, 500, 300]);
    }

    #[test]
    fn test_frame_read() {
        let mut data = vec![0x81, 0x00, 0x00, 0x00];
        data.extend_from_slice(&[9, 8, 7]);
        let mut r: &[u8] = &data;
        let block = Block::parse(&mut r, 0, data.len() as u64).unwrap();
        let frame = block.frames()[0];
        let mut buffer = vec![0_u8; frame.len as usize];
        frame.read(&mut r, &mut buffer).unwrap();
        assert_eq!(buffer, vec![9, 8, 7]);
    }
}
