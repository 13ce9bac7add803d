//! TIFF rendition module
//!
//! Sensor data produced by the pure-Rust engine is demosaiced on the CPU and
//! written as a 16-bit TIFF. LibRaw builds its own renditions and does not go
//! through here.

mod writer;
mod standard_tiff_writer;
mod cpu_debayer;
pub mod types;

pub use writer::TiffWriter;
pub use standard_tiff_writer::StandardTiffWriter;
pub use cpu_debayer::CpuDebayer;
pub use types::{
    RawImageData,
    RgbImageData,
    TiffCompression,
    RenditionConfig,
    RenditionConfigBuilder,
};
