use std::io::{Cursor, Write};
use tiff::encoder::{colortype, compression::DeflateLevel, Compression, TiffEncoder};
use tiff::tags::Predictor;
use tracing::debug;
use crate::raw_session::common::error::ConversionError;
use crate::raw_session::rendition::types::{RawImageData, RgbImageData, RenditionConfig, TiffCompression};
use crate::raw_session::rendition::writer::TiffWriter;

pub struct StandardTiffWriter;

fn encoder<'a>(buffer: &'a mut Vec<u8>, config: &RenditionConfig) -> Result<TiffEncoder<Cursor<&'a mut Vec<u8>>>, ConversionError> {
    let compression = match config.compression {
        TiffCompression::None => Compression::Uncompressed,
        TiffCompression::Lzw => Compression::Lzw,
        TiffCompression::DeflateFast => Compression::Deflate(DeflateLevel::Fast),
        TiffCompression::DeflateBalanced => Compression::Deflate(DeflateLevel::Balanced),
        TiffCompression::DeflateBest => Compression::Deflate(DeflateLevel::Best),
    };

    let mut encoder = TiffEncoder::new(Cursor::new(buffer))
        .map_err(|e| ConversionError::EncodeError(e.to_string()))?
        .with_compression(compression);

    if let Some(predictor_val) = config.predictor {
        let predictor = match predictor_val {
            2 => Predictor::Horizontal,
            _ => Predictor::None,
        };
        encoder = encoder.with_predictor(predictor);
    }

    Ok(encoder)
}

impl TiffWriter for StandardTiffWriter {
    fn write_mosaic(&self, image: &RawImageData, output: &mut dyn Write, config: &RenditionConfig) -> Result<(), ConversionError> {
        debug!("Encoding Gray16 TIFF: {}x{}", image.width, image.height);

        let mut buffer = Vec::new();
        encoder(&mut buffer, config)?
            .write_image::<colortype::Gray16>(
                image.width as u32,
                image.height as u32,
                &image.data,
            )
            .map_err(|e| ConversionError::EncodeError(e.to_string()))?;

        output.write_all(&buffer)?;
        Ok(())
    }

    fn write_rgb(&self, image: &RgbImageData, output: &mut dyn Write, config: &RenditionConfig) -> Result<(), ConversionError> {
        debug!("Encoding RGB16 TIFF: {}x{}", image.width, image.height);

        let mut buffer = Vec::new();
        encoder(&mut buffer, config)?
            .write_image::<colortype::RGB16>(
                image.width as u32,
                image.height as u32,
                &image.data,
            )
            .map_err(|e| ConversionError::EncodeError(e.to_string()))?;

        output.write_all(&buffer)?;
        Ok(())
    }
}
