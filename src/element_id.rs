//! Element IDs defined by the EBML and Matroska specifications.

use std::collections::HashMap;

use once_cell::sync::Lazy;

/// The supported Element ID.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[allow(missing_docs)]
pub enum ElementId {
    Unknown,
    Ebml,
    EbmlVersion,
    EbmlReadVersion,
    EbmlMaxIdLength,
    EbmlMaxSizeLength,
    DocType,
    DocTypeVersion,
    DocTypeReadVersion,
    Void,
    Crc32,
    Segment,
    SeekHead,
    Seek,
    SeekId,
    SeekPosition,
    Info,
    TimestampScale,
    Duration,
    DateUtc,
    Title,
    MuxingApp,
    WritingApp,
    Cluster,
    Timestamp,
    PrevSize,
    SimpleBlock,
    BlockGroup,
    Block,
    BlockDuration,
    ReferenceBlock,
    Tracks,
    TrackEntry,
    TrackNumber,
    TrackUid,
    TrackType,
    FlagLacing,
    DefaultDuration,
    Name,
    Language,
    CodecId,
    CodecPrivate,
    CodecName,
    Video,
    PixelWidth,
    PixelHeight,
    FrameRate,
    Audio,
    SamplingFrequency,
    Channels,
    BitDepth,
    Cues,
    CuePoint,
    CueTime,
    CueTrackPositions,
    CueTrack,
    CueClusterPosition,
    CueRelativePosition,
    CueBlockNumber,
    Chapters,
    Tags,
}

/// The types of elements an EBML file can have.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum ElementType {
    /// Unknown element.
    Unknown,
    /// An element that contains other EBML elements as children.
    Master,
    /// Unsigned integer,
    Unsigned,
    /// Signed integer,
    Signed,
    /// Float,
    Float,
    /// Date,
    Date,
    /// String
    String,
    /// Binary
    Binary,
}

pub(crate) static ID_TO_ELEMENT_ID: Lazy<HashMap<u32, ElementId>> = Lazy::new(|| {
    let mut m = HashMap::new();
    m.insert(0x1A45DFA3, ElementId::Ebml);
    m.insert(0x4286, ElementId::EbmlVersion);
    m.insert(0x42F7, ElementId::EbmlReadVersion);
    m.insert(0x42F2, ElementId::EbmlMaxIdLength);
    m.insert(0x42F3, ElementId::EbmlMaxSizeLength);
    m.insert(0x4282, ElementId::DocType);
    m.insert(0x4287, ElementId::DocTypeVersion);
    m.insert(0x4285, ElementId::DocTypeReadVersion);
    m.insert(0xEC, ElementId::Void);
    m.insert(0xBF, ElementId::Crc32);
    m.insert(0x18538067, ElementId::Segment);
    m.insert(0x114D9B74, ElementId::SeekHead);
    m.insert(0x4DBB, ElementId::Seek);
    // This is a binary in the spec, but we convert the IDs to u32.
    m.insert(0x53AB, ElementId::SeekId);
    m.insert(0x53AC, ElementId::SeekPosition);
    m.insert(0x1549A966, ElementId::Info);
    m.insert(0x2AD7B1, ElementId::TimestampScale);
    m.insert(0x4489, ElementId::Duration);
    m.insert(0x4461, ElementId::DateUtc);
    m.insert(0x7BA9, ElementId::Title);
    m.insert(0x4D80, ElementId::MuxingApp);
    m.insert(0x5741, ElementId::WritingApp);
    m.insert(0x1F43B675, ElementId::Cluster);
    m.insert(0xE7, ElementId::Timestamp);
    m.insert(0xAB, ElementId::PrevSize);
    m.insert(0xA3, ElementId::SimpleBlock);
    m.insert(0xA0, ElementId::BlockGroup);
    m.insert(0xA1, ElementId::Block);
    m.insert(0x9B, ElementId::BlockDuration);
    m.insert(0xFB, ElementId::ReferenceBlock);
    m.insert(0x1654AE6B, ElementId::Tracks);
    m.insert(0xAE, ElementId::TrackEntry);
    m.insert(0xD7, ElementId::TrackNumber);
    m.insert(0x73C5, ElementId::TrackUid);
    m.insert(0x83, ElementId::TrackType);
    m.insert(0x9C, ElementId::FlagLacing);
    m.insert(0x23E383, ElementId::DefaultDuration);
    m.insert(0x536E, ElementId::Name);
    m.insert(0x22B59C, ElementId::Language);
    m.insert(0x86, ElementId::CodecId);
    m.insert(0x63A2, ElementId::CodecPrivate);
    m.insert(0x258688, ElementId::CodecName);
    m.insert(0xE0, ElementId::Video);
    m.insert(0xB0, ElementId::PixelWidth);
    m.insert(0xBA, ElementId::PixelHeight);
    m.insert(0x2383E3, ElementId::FrameRate);
    m.insert(0xE1, ElementId::Audio);
    m.insert(0xB5, ElementId::SamplingFrequency);
    m.insert(0x9F, ElementId::Channels);
    m.insert(0x6264, ElementId::BitDepth);
    m.insert(0x1C53BB6B, ElementId::Cues);
    m.insert(0xBB, ElementId::CuePoint);
    m.insert(0xB3, ElementId::CueTime);
    m.insert(0xB7, ElementId::CueTrackPositions);
    m.insert(0xF7, ElementId::CueTrack);
    m.insert(0xF1, ElementId::CueClusterPosition);
    m.insert(0xF0, ElementId::CueRelativePosition);
    m.insert(0x5378, ElementId::CueBlockNumber);
    m.insert(0x1043A770, ElementId::Chapters);
    m.insert(0x1254C367, ElementId::Tags);
    m
});

pub(crate) static ELEMENT_ID_TO_TYPE: Lazy<HashMap<ElementId, ElementType>> = Lazy::new(|| {
    let mut m = HashMap::new();
    m.insert(ElementId::Ebml, ElementType::Master);
    m.insert(ElementId::EbmlVersion, ElementType::Unsigned);
    m.insert(ElementId::EbmlReadVersion, ElementType::Unsigned);
    m.insert(ElementId::EbmlMaxIdLength, ElementType::Unsigned);
    m.insert(ElementId::EbmlMaxSizeLength, ElementType::Unsigned);
    m.insert(ElementId::DocType, ElementType::String);
    m.insert(ElementId::DocTypeVersion, ElementType::Unsigned);
    m.insert(ElementId::DocTypeReadVersion, ElementType::Unsigned);
    m.insert(ElementId::Void, ElementType::Binary);
    m.insert(ElementId::Crc32, ElementType::Binary);
    m.insert(ElementId::Segment, ElementType::Master);
    m.insert(ElementId::SeekHead, ElementType::Master);
    m.insert(ElementId::Seek, ElementType::Master);
    // This is a binary in the spec, but we convert the IDs to u32.
    m.insert(ElementId::SeekId, ElementType::Unsigned);
    m.insert(ElementId::SeekPosition, ElementType::Unsigned);
    m.insert(ElementId::Info, ElementType::Master);
    m.insert(ElementId::TimestampScale, ElementType::Unsigned);
    m.insert(ElementId::Duration, ElementType::Float);
    m.insert(ElementId::DateUtc, ElementType::Date);
    m.insert(ElementId::Title, ElementType::String);
    m.insert(ElementId::MuxingApp, ElementType::String);
    m.insert(ElementId::WritingApp, ElementType::String);
    m.insert(ElementId::Cluster, ElementType::Master);
    m.insert(ElementId::Timestamp, ElementType::Unsigned);
    m.insert(ElementId::PrevSize, ElementType::Unsigned);
    m.insert(ElementId::SimpleBlock, ElementType::Binary);
    m.insert(ElementId::BlockGroup, ElementType::Master);
    m.insert(ElementId::Block, ElementType::Binary);
    m.insert(ElementId::BlockDuration, ElementType::Unsigned);
    m.insert(ElementId::ReferenceBlock, ElementType::Signed);
    m.insert(ElementId::Tracks, ElementType::Master);
    m.insert(ElementId::TrackEntry, ElementType::Master);
    m.insert(ElementId::TrackNumber, ElementType::Unsigned);
    m.insert(ElementId::TrackUid, ElementType::Unsigned);
    m.insert(ElementId::TrackType, ElementType::Unsigned);
    m.insert(ElementId::FlagLacing, ElementType::Unsigned);
    m.insert(ElementId::DefaultDuration, ElementType::Unsigned);
    m.insert(ElementId::Name, ElementType::String);
    m.insert(ElementId::Language, ElementType::String);
    m.insert(ElementId::CodecId, ElementType::String);
    m.insert(ElementId::CodecPrivate, ElementType::Binary);
    m.insert(ElementId::CodecName, ElementType::String);
    m.insert(ElementId::Video, ElementType::Master);
    m.insert(ElementId::PixelWidth, ElementType::Unsigned);
    m.insert(ElementId::PixelHeight, ElementType::Unsigned);
    m.insert(ElementId::FrameRate, ElementType::Float);
    m.insert(ElementId::Audio, ElementType::Master);
    m.insert(ElementId::SamplingFrequency, ElementType::Float);
    m.insert(ElementId::Channels, ElementType::Unsigned);
    m.insert(ElementId::BitDepth, ElementType::Unsigned);
    m.insert(ElementId::Cues, ElementType::Master);
    m.insert(ElementId::CuePoint, ElementType::Master);
    m.insert(ElementId::CueTime, ElementType::Unsigned);
    m.insert(ElementId::CueTrackPositions, ElementType::Master);
    m.insert(ElementId::CueTrack, ElementType::Unsigned);
    m.insert(ElementId::CueClusterPosition, ElementType::Unsigned);
    m.insert(ElementId::CueRelativePosition, ElementType::Unsigned);
    m.insert(ElementId::CueBlockNumber, ElementType::Unsigned);
    m.insert(ElementId::Chapters, ElementType::Master);
    m.insert(ElementId::Tags, ElementType::Master);
    m
});

/// Maps a raw element ID (marker bits retained) to the known element IDs.
pub(crate) fn lookup(id: u32) -> ElementId {
    *ID_TO_ELEMENT_ID.get(&id).unwrap_or(&ElementId::Unknown)
}

/// Returns `true` for elements that only occur at the top level of a
/// segment. Finding one of them ends an element of unknown size.
pub(crate) fn is_segment_level(id: ElementId) -> bool {
    matches!(
        id,
        ElementId::Ebml
            | ElementId::Segment
            | ElementId::SeekHead
            | ElementId::Info
            | ElementId::Tracks
            | ElementId::Cluster
            | ElementId::Cues
            | ElementId::Chapters
            | ElementId::Tags
    )
}
