use std::io::Write;
use crate::raw_session::common::error::ConversionError;
use crate::raw_session::rendition::types::{RawImageData, RgbImageData, RenditionConfig};

pub trait TiffWriter {
    /// Writes the single-channel CFA mosaic as Gray16.
    fn write_mosaic(&self, image: &RawImageData, output: &mut dyn Write, config: &RenditionConfig) -> Result<(), ConversionError>;
    fn write_rgb(&self, image: &RgbImageData, output: &mut dyn Write, config: &RenditionConfig) -> Result<(), ConversionError>;
}
