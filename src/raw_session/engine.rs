//! Decode engine capability interface
//!
//! A [`DecodeEngine`] is the narrow, synchronous contract a [`Session`]
//! drives. Implementations own their native state exclusively and are never
//! entered concurrently.
//!
//! [`Session`]: crate::raw_session::Session

mod rawloader_engine;
mod thumbnail;
mod xmp;
#[cfg(libraw_ffi)]
mod libraw_sys;
#[cfg(libraw_ffi)]
mod libraw_engine;

use std::path::Path;

use crate::raw_session::metadata::Metadata;
use crate::raw_session::status::StatusCode;

pub use rawloader_engine::RawloaderEngine;
#[cfg(libraw_ffi)]
pub use libraw_engine::LibRawEngine;

/// Engine used by [`Session::new`](crate::raw_session::Session::new).
#[cfg(libraw_ffi)]
pub type DefaultEngine = LibRawEngine;

/// Engine used by [`Session::new`](crate::raw_session::Session::new).
#[cfg(not(libraw_ffi))]
pub type DefaultEngine = RawloaderEngine;

/// Synchronous decode operations with LibRaw's return-code convention.
///
/// Every call either completes or reports a [`StatusCode`]; ordering misuse
/// (e.g. `unpack` before an open) must come back as
/// [`StatusCode::OUT_OF_ORDER_CALL`], never as a panic.
pub trait DecodeEngine: Send + 'static {
    /// Loads a file. `bigfile_size` is an engine tuning value passed through
    /// unchanged.
    fn open_file(&mut self, path: &Path, bigfile_size: Option<i64>) -> StatusCode;

    /// Loads an in-memory source. The engine keeps the buffer until recycle.
    fn open_buffer(&mut self, data: Vec<u8>) -> StatusCode;

    fn unpack(&mut self) -> StatusCode;

    fn unpack_thumb(&mut self) -> StatusCode;

    /// Best-effort metadata snapshot; may be partial before `unpack`.
    fn metadata(&self) -> Metadata;

    /// Thumbnail bytes produced by the last successful `unpack_thumb`.
    fn thumbnail(&self) -> Option<Vec<u8>>;

    /// Embedded XMP packet, if the source carries one.
    fn xmp(&self) -> Option<Vec<u8>>;

    /// Writes a TIFF rendition of the loaded source to `path`.
    fn extract_tiff(&mut self, path: &Path) -> StatusCode;

    /// Non-fatal data anomalies seen during the most recent `unpack`.
    fn error_count(&self) -> u32;

    /// Frees everything tied to the loaded source. Idempotent.
    fn recycle(&mut self);

    /// Closes only the input stream, keeping decoded state.
    fn recycle_datastream(&mut self);

    fn camera_count(&self) -> usize;

    fn camera_list(&self) -> Vec<String>;

    fn strerror(&self, code: StatusCode) -> String {
        code.description().into_owned()
    }

    fn version(&self) -> String;

    /// Packed as `(major << 16) | (minor << 8) | patch`.
    fn version_number(&self) -> u32;
}
