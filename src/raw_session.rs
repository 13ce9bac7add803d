//! RAW decode session module
//!
//! A [`Session`] wraps one decode engine handle and drives it through the
//! open → unpack → extract → recycle lifecycle. Engines report LibRaw-style
//! [`StatusCode`]s; the session adds argument validation, lifecycle guards and
//! the asynchronous calling convention.

pub mod common;
pub mod status;
pub mod metadata;
pub mod engine;
pub mod rendition;
pub mod session;
pub mod conversions;

pub use common::{
    SessionError,
    Result,
};

pub use status::{
    StatusCode,
    StatusKind,
    strerror,
};

pub use metadata::Metadata;

pub use engine::{
    DecodeEngine,
    DefaultEngine,
    RawloaderEngine,
};

#[cfg(libraw_ffi)]
pub use engine::LibRawEngine;

pub use rendition::{
    TiffCompression,
    RenditionConfig,
    RenditionConfigBuilder,
    TiffWriter,
    StandardTiffWriter,
};

pub use session::{
    Session,
    SessionConfig,
    SessionConfigBuilder,
    SessionState,
};

pub use conversions::{
    ProcessOptions,
    ProcessedRaw,
    process_raw_image,
    convert_file_to_tiff,
};
