//! The byte source abstraction the parser reads from.

use crate::{ParserError, Result};

/// A random access byte source for the parser.
///
/// The parser addresses all reads by absolute position, so a reader never
/// has to track a cursor. Two outcomes are distinguished for a failed
/// read: [`ParserError::InsufficientData`] means the requested range is
/// not available *yet* and the identical call can be retried once more
/// bytes have arrived (a growing file, a network stream), while
/// [`ParserError::Io`] is a hard failure that is propagated unchanged.
///
/// Implementations for `&[u8]` and `Vec<u8>` are provided. File or
/// network backed readers are supplied by the host application.
pub trait MkvReader {
    /// Reads `buffer.len()` bytes starting at `position`.
    ///
    /// # Errors
    ///
    /// Returns [`ParserError::InsufficientData`] if the range is not yet
    /// available and [`ParserError::Io`] if the underlying source failed.
    fn read(&mut self, position: u64, buffer: &mut [u8]) -> Result<()>;

    /// Returns the total length of the source and the number of bytes
    /// currently available.
    ///
    /// A total of `None` signals a live or still growing source whose
    /// final length is not known yet.
    fn length(&mut self) -> (Option<u64>, u64);
}

impl MkvReader for &[u8] {
    fn read(&mut self, position: u64, buffer: &mut [u8]) -> Result<()> {
        let end = position
            .checked_add(buffer.len() as u64)
            .ok_or(ParserError::InsufficientData)?;
        if end > self.len() as u64 {
            return Err(ParserError::InsufficientData);
        }
        let start = position as usize;
        buffer.copy_from_slice(&self[start..start + buffer.len()]);
        Ok(())
    }

    fn length(&mut self) -> (Option<u64>, u64) {
        (Some(self.len() as u64), self.len() as u64)
    }
}

impl MkvReader for Vec<u8> {
    fn read(&mut self, position: u64, buffer: &mut [u8]) -> Result<()> {
        let mut slice: &[u8] = self.as_slice();
        slice.read(position, buffer)
    }

    fn length(&mut self) -> (Option<u64>, u64) {
        (Some(self.len() as u64), self.len() as u64)
    }
}
