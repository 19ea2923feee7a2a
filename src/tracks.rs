//! The track table of a segment.

use std::num::NonZeroU64;

use crate::block::BlockEntry;
use crate::ebml::{
    collect_children, find_string, find_unsigned, parse_binary, try_find_float,
    try_find_location, try_find_string, try_find_unsigned, ElementData,
};
use crate::element_id::ElementId;
use crate::reader::MkvReader;
use crate::{ParserError, Result};

/// The type specific data of a video track.
#[derive(Clone, Debug)]
pub struct VideoInfo {
    pixel_width: u64,
    pixel_height: u64,
    frame_rate: Option<f64>,
}

impl VideoInfo {
    /// Width of the encoded video frames in pixels.
    pub fn pixel_width(&self) -> u64 {
        self.pixel_width
    }

    /// Height of the encoded video frames in pixels.
    pub fn pixel_height(&self) -> u64 {
        self.pixel_height
    }

    /// Number of frames per second, if declared.
    pub fn frame_rate(&self) -> Option<f64> {
        self.frame_rate
    }
}

/// The type specific data of an audio track.
#[derive(Clone, Debug)]
pub struct AudioInfo {
    sampling_frequency: f64,
    channels: u64,
    bit_depth: Option<u64>,
}

impl AudioInfo {
    /// Sampling frequency in Hz.
    pub fn sampling_frequency(&self) -> f64 {
        self.sampling_frequency
    }

    /// Number of channels.
    pub fn channels(&self) -> u64 {
        self.channels
    }

    /// Bits per sample, if declared.
    pub fn bit_depth(&self) -> Option<u64> {
        self.bit_depth
    }
}

/// The closed set of track variants.
#[derive(Clone, Debug)]
pub enum TrackKind {
    /// A video track.
    Video(VideoInfo),
    /// An audio track.
    Audio(AudioInfo),
    /// Any other track type, carrying the raw track type value.
    Other(u64),
}

/// A single track descriptor.
#[derive(Clone, Debug)]
pub struct Track {
    number: NonZeroU64,
    uid: u64,
    codec_id: String,
    codec_private: Option<Vec<u8>>,
    name: Option<String>,
    language: Option<String>,
    lacing: bool,
    default_duration: Option<u64>,
    kind: TrackKind,
}

impl Track {
    pub(crate) fn parse<R: MkvReader>(r: &mut R, start: u64, size: u64) -> Result<Self> {
        let fields = collect_children(r, start, size)?;

        let number = find_unsigned(&fields, ElementId::TrackNumber)?;
        let number = NonZeroU64::new(number)
            .ok_or(ParserError::NonZeroValueIsZero(ElementId::TrackNumber))?;
        let uid = try_find_unsigned(&fields, ElementId::TrackUid)?.unwrap_or(0);
        let track_type = find_unsigned(&fields, ElementId::TrackType)?;
        let codec_id = find_string(&fields, ElementId::CodecId)?;
        let name = try_find_string(&fields, ElementId::Name)?;
        let language = try_find_string(&fields, ElementId::Language)?;
        let lacing = try_find_unsigned(&fields, ElementId::FlagLacing)?.unwrap_or(1) != 0;
        let default_duration = try_find_unsigned(&fields, ElementId::DefaultDuration)?;

        let codec_private = match try_find_location(&fields, ElementId::CodecPrivate)? {
            Some((offset, size)) => Some(parse_binary(r, offset, size)?),
            None => None,
        };

        let kind = match track_type {
            1 => {
                let (offset, size) = try_find_location(&fields, ElementId::Video)?
                    .ok_or(ParserError::MissingElement(ElementId::Video))?;
                let video = collect_children(r, offset, size)?;
                TrackKind::Video(VideoInfo {
                    pixel_width: find_unsigned(&video, ElementId::PixelWidth)?,
                    pixel_height: find_unsigned(&video, ElementId::PixelHeight)?,
                    frame_rate: try_find_float(&video, ElementId::FrameRate)?,
                })
            }
            2 => {
                let audio = match try_find_location(&fields, ElementId::Audio)? {
                    Some((offset, size)) => collect_children(r, offset, size)?,
                    None => Vec::new(),
                };
                TrackKind::Audio(AudioInfo {
                    sampling_frequency: try_find_float(&audio, ElementId::SamplingFrequency)?
                        .unwrap_or(8000.0),
                    channels: try_find_unsigned(&audio, ElementId::Channels)?.unwrap_or(1),
                    bit_depth: try_find_unsigned(&audio, ElementId::BitDepth)?,
                })
            }
            other => TrackKind::Other(other),
        };

        Ok(Self {
            number,
            uid,
            codec_id,
            codec_private,
            name,
            language,
            lacing,
            default_duration,
            kind,
        })
    }

    /// The unique, non zero number of the track.
    pub fn number(&self) -> NonZeroU64 {
        self.number
    }

    /// The unique identifier of the track.
    pub fn uid(&self) -> u64 {
        self.uid
    }

    /// The ID of the codec the track is encoded with.
    pub fn codec_id(&self) -> &str {
        &self.codec_id
    }

    /// Codec specific private data, passed through as an opaque blob.
    pub fn codec_private(&self) -> Option<&[u8]> {
        self.codec_private.as_deref()
    }

    /// A human readable track name.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// The language of the track.
    pub fn language(&self) -> Option<&str> {
        self.language.as_deref()
    }

    /// Returns `true` if the blocks of this track may use lacing.
    pub fn lacing(&self) -> bool {
        self.lacing
    }

    /// The default duration of one frame in nanoseconds, if declared.
    pub fn default_duration(&self) -> Option<u64> {
        self.default_duration
    }

    /// The variant of the track.
    pub fn kind(&self) -> &TrackKind {
        &self.kind
    }

    /// Returns `true` for a video track.
    pub fn is_video(&self) -> bool {
        matches!(self.kind, TrackKind::Video(_))
    }

    /// Returns `true` for an audio track.
    pub fn is_audio(&self) -> bool {
        matches!(self.kind, TrackKind::Audio(_))
    }

    /// Returns `true` if the block entry belongs to this track.
    pub fn vet_entry(&self, entry: &BlockEntry) -> bool {
        entry.block().track() == self.number.get()
    }
}

/// The ordered table of all tracks of a segment.
#[derive(Clone, Debug)]
pub struct Tracks {
    entries: Vec<Track>,
}

impl Tracks {
    pub(crate) fn parse<R: MkvReader>(r: &mut R, start: u64, size: u64) -> Result<Self> {
        let children = collect_children(r, start, size)?;
        let mut entries: Vec<Track> = Vec::new();
        for (id, data) in &children {
            if *id == ElementId::TrackEntry {
                if let ElementData::Location { offset, size } = data {
                    let track = Track::parse(r, *offset, *size)?;
                    if entries.iter().any(|entry| entry.number() == track.number()) {
                        return Err(ParserError::DuplicateTrackNumber(track.number().get()));
                    }
                    entries.push(track);
                }
            }
        }
        Ok(Self { entries })
    }

    /// The number of tracks in the table.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the table contains no tracks.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The tracks in the order they appear in the file.
    pub fn entries(&self) -> &[Track] {
        &self.entries
    }

    /// Returns a track by its positional index.
    pub fn get(&self, index: usize) -> Option<&Track> {
        self.entries.get(index)
    }

    /// Returns a track by its unique track number.
    pub fn by_number(&self, number: u64) -> Option<&Track> {
        self.entries
            .iter()
            .find(|track| track.number().get() == number)
    }
}
