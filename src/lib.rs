#![warn(missing_docs)]
#![deny(clippy::panic)]
#![deny(clippy::unwrap_used)]
//! A parser that provides seekable, lazy access into Matroska and WebM
//! container files.
//!
//! The parser exposes the structure of a container — its tracks, the
//! time ordered block entries inside its clusters and the cue based seek
//! index — without decoding any audio or video payload. Frames are
//! returned as byte spans that the caller reads through the same
//! [`MkvReader`] the parser reads from.
//!
//! Parsing is incremental: headers first, clusters one at a time, block
//! lists and cue points only when they are touched. Every operation that
//! reads can report [`ParserError::InsufficientData`], which means the
//! bytes are not available *yet*. The identical call can be retried once
//! more data has arrived, which makes the parser usable on growing files
//! and network streams.
//!
//! ```no_run
//! # fn main() -> Result<(), matroska_parser::ParserError> {
//! use matroska_parser::Segment;
//!
//! let data = std::fs::read("media.webm")?;
//! let (_header, mut segment) = Segment::open(data)?;
//! segment.parse_headers()?;
//!
//! if let Some(id) = segment.first_cluster()? {
//!     if let Some(entry) = segment.first_entry(id)? {
//!         println!("first block at {:?} ns", segment.entry_time_ns(entry));
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use crate::ebml::{find_string, find_unsigned, try_find_unsigned, ElementData};
use crate::element_id::ElementId as Id;

mod block;
mod cluster;
mod cues;
mod ebml;
mod element_id;
mod error;
mod reader;
mod segment;
mod tracks;

pub use block::{Block, BlockEntry, BlockGroup, Frame, Lacing};
pub use cluster::Cluster;
pub use cues::{CuePoint, TrackPosition};
pub use element_id::ElementId;
pub use error::ParserError;
pub use reader::MkvReader;
pub use segment::{ClusterId, ClusterProbe, CueIndex, EntryRef, Info, Segment};
pub use tracks::{AudioInfo, Track, TrackKind, Tracks, VideoInfo};

pub(crate) type Result<T> = std::result::Result<T, ParserError>;

/// The EBML header of the file.
#[derive(Clone, Debug)]
pub struct EbmlHeader {
    version: Option<u64>,
    read_version: Option<u64>,
    max_id_length: u64,
    max_size_length: u64,
    doc_type: String,
    doc_type_version: u64,
    doc_type_read_version: u64,
}

impl EbmlHeader {
    pub(crate) fn new(fields: &[(Id, ElementData)]) -> Result<Self> {
        let version = try_find_unsigned(fields, Id::EbmlVersion)?;
        let read_version = try_find_unsigned(fields, Id::EbmlReadVersion)?;
        let max_id_length = try_find_unsigned(fields, Id::EbmlMaxIdLength)?;
        let max_size_length = try_find_unsigned(fields, Id::EbmlMaxSizeLength)?;
        let doc_type = find_string(fields, Id::DocType)?;
        let doc_type_version = find_unsigned(fields, Id::DocTypeVersion)?;
        let doc_type_read_version = find_unsigned(fields, Id::DocTypeReadVersion)?;

        Ok(Self {
            version,
            read_version,
            max_id_length: max_id_length.unwrap_or(4),
            max_size_length: max_size_length.unwrap_or(8),
            doc_type,
            doc_type_version,
            doc_type_read_version,
        })
    }

    /// The EBML version used to create the file.
    pub fn version(&self) -> Option<u64> {
        self.version
    }

    /// The minimum EBML version a parser has to support to read this file.
    pub fn read_version(&self) -> Option<u64> {
        self.read_version
    }

    /// The maximum length of the IDs you'll find in this file (4 or less in Matroska).
    pub fn max_id_length(&self) -> u64 {
        self.max_id_length
    }

    /// The maximum length of the sizes you'll find in this file (8 or less in Matroska).
    pub fn max_size_length(&self) -> u64 {
        self.max_size_length
    }

    /// A string that describes the type of document that follows this EBML header ('matroska' / 'webm').
    pub fn doc_type(&self) -> &str {
        &self.doc_type
    }

    /// The version of DocType interpreter used to create the file.
    pub fn doc_type_version(&self) -> u64 {
        self.doc_type_version
    }

    /// The minimum DocType version an interpreter has to support to read this file.
    pub fn doc_type_read_version(&self) -> u64 {
        self.doc_type_read_version
    }
}
