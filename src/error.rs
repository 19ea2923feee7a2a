//! Parser errors.

use std::num::TryFromIntError;
use std::string::FromUtf8Error;

use thiserror::Error;

use crate::element_id::ElementId;

/// Errors that can occur when parsing Matroska files.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ParserError {
    /// An I/O error reported by the underlying reader. Fatal.
    #[error("reader error: {0}")]
    Io(#[from] std::io::Error),
    /// The requested bytes are not yet available from the reader.
    ///
    /// This outcome is retryable: once more bytes have arrived, the
    /// identical call can be re-issued. No committed state has been
    /// mutated when an operation returns it.
    #[error("not enough data available yet")]
    InsufficientData,
    /// An invalid EBML element ID was found.
    #[error("invalid EBML element ID")]
    InvalidElementId,
    /// An invalid EBML data size was found.
    #[error("invalid EBML data size")]
    InvalidDataSize,
    /// A different element than the expected one was found.
    #[error("unexpected element: expected {expected:?}, found {found:?}")]
    UnexpectedElement {
        /// The element that was expected at this position.
        expected: ElementId,
        /// The element that was actually found.
        found: ElementId,
    },
    /// An element did not have the data type its ID declares.
    #[error("element {0:?} had an unexpected data type")]
    UnexpectedDataType(ElementId),
    /// An unsigned or signed integer had an invalid length.
    #[error("an integer field had the wrong size: {0}")]
    WrongIntegerSize(u64),
    /// A float had an invalid length.
    #[error("a float field had the wrong size: {0}")]
    WrongFloatSize(u64),
    /// A child element extends past the end of its parent.
    #[error("element extends past the end of its parent")]
    ElementOverflow,
    /// A mandatory element could not be found.
    #[error("could not find the mandatory element: {0:?}")]
    MissingElement(ElementId),
    /// An element that must not be zero was zero.
    #[error("element that must not be zero was zero: {0:?}")]
    NonZeroValueIsZero(ElementId),
    /// Two tracks share the same track number.
    #[error("duplicate track number: {0}")]
    DuplicateTrackNumber(u64),
    /// A block or its lacing data is malformed.
    #[error("invalid block: {0}")]
    InvalidBlock(&'static str),
    /// The file is not a supported Matroska or WebM file.
    #[error("unsupported DocType: {0}")]
    UnsupportedDocType(String),
    /// The file needs a parser of a higher version.
    #[error("unsupported DocTypeReadVersion: {0}")]
    UnsupportedDocTypeReadVersion(u64),
    /// A string was not properly UTF-8 encoded.
    #[error("string is not UTF-8 encoded: {0}")]
    StringNotUtf8(#[from] FromUtf8Error),
    /// A value could not be converted into the expected integer width.
    #[error("integer conversion failed: {0}")]
    IntegerConversion(#[from] TryFromIntError),
}

impl ParserError {
    /// Returns `true` if the operation can be retried once more bytes are
    /// available from the reader.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::InsufficientData)
    }
}
