//! Pure-Rust decode engine built on the rawloader library.
//!
//! rawloader decodes a file in one pass, so `open_*` already parses the whole
//! container (metadata becomes available immediately) and `unpack` only
//! materialises the sensor samples. Status codes follow LibRaw's convention so
//! the engine is interchangeable with the LibRaw engine.

use std::io::Cursor;
use std::path::Path;

use rawloader::{RawImage, RawImageData as RawloaderImageData};
use serde_json::json;
use tracing::{debug, warn};

use super::thumbnail::extract_embedded_jpeg;
use super::xmp::find_xmp_packet;
use super::DecodeEngine;
use crate::raw_session::common::error::{ConversionError, Result};
use crate::raw_session::metadata::Metadata;
use crate::raw_session::rendition::{CpuDebayer, RawImageData, RenditionConfig, StandardTiffWriter, TiffWriter};
use crate::raw_session::status::StatusCode;

const VERSION: (u32, u32, u32) = (0, 37, 1);

/// Default bit depth when no white level information is available from the RAW file.
const DEFAULT_BITS_PER_SAMPLE: u32 = 16;

/// The bit width of the u16 data type, used for calculating actual bits per sample.
const U16_BITS: u32 = 16;

pub struct RawloaderEngine {
    config: RenditionConfig,
    /// Input datastream; released by `recycle_datastream`.
    source: Option<Vec<u8>>,
    /// Identified container, present from a successful open until recycle.
    image: Option<RawImage>,
    xmp: Option<Vec<u8>>,
    raw: Option<RawImageData>,
    thumbnail: Option<Vec<u8>>,
    data_errors: u32,
}

impl Default for RawloaderEngine {
    fn default() -> Self {
        Self::with_config(RenditionConfig::default())
    }
}

impl RawloaderEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: RenditionConfig) -> Self {
        Self {
            config,
            source: None,
            image: None,
            xmp: None,
            raw: None,
            thumbnail: None,
            data_errors: 0,
        }
    }

    /// Infallible; shares the signature of the native engine's constructor.
    pub fn from_config(config: &RenditionConfig) -> Result<Self> {
        Ok(Self::with_config(config.clone()))
    }

    pub fn config(&self) -> &RenditionConfig {
        &self.config
    }

    fn open_bytes(&mut self, bytes: Vec<u8>) -> StatusCode {
        self.recycle();

        let image = match rawloader::decode(&mut Cursor::new(&bytes)) {
            Ok(image) => image,
            Err(e) => {
                debug!("rawloader could not identify source: {}", e);
                return StatusCode::FILE_UNSUPPORTED;
            }
        };

        debug!(
            make = %image.clean_make,
            model = %image.clean_model,
            width = image.width,
            height = image.height,
            "Identified RAW container"
        );

        self.xmp = find_xmp_packet(&bytes).map(<[u8]>::to_vec);
        self.image = Some(image);
        self.source = Some(bytes);
        StatusCode::SUCCESS
    }

    /// Converts rawloader's samples to u16 and derives the effective bit depth
    /// from the white level. Returns the data and the anomaly count.
    fn materialise(image: &RawImage) -> (RawImageData, u32) {
        let mut anomalies = 0;

        // Integer data is cast directly, float data (normalized 0.0-1.0) is scaled to u16 range
        let mut data: Vec<u16> = match &image.data {
            RawloaderImageData::Integer(values) => values.iter().map(|&v| v as u16).collect(),
            RawloaderImageData::Float(values) => {
                values.iter().map(|&v| (v * u16::MAX as f32) as u16).collect()
            }
        };

        let expected = image.width * image.height * image.cpp;
        if data.len() < expected {
            warn!("Sensor data short by {} samples, padding with zeros", expected - data.len());
            anomalies += 1;
            data.resize(expected, 0);
        }

        anomalies += image.whitelevels.iter().filter(|&&w| w == 0).count() as u32;

        let max_white_level = image.whitelevels.iter().max().copied().unwrap_or(u16::MAX);
        let bits_per_sample = if max_white_level == 0 {
            DEFAULT_BITS_PER_SAMPLE
        } else {
            // e.g. 4095 (0xFFF) -> 12 bits, 16383 (0x3FFF) -> 14 bits
            U16_BITS - max_white_level.leading_zeros()
        };

        let raw = RawImageData {
            width: image.width,
            height: image.height,
            cpp: image.cpp,
            data,
            bits_per_sample,
            black_levels: image.blacklevels,
            white_levels: image.whitelevels,
            wb_coeffs: image.wb_coeffs,
            cam_to_xyz: image.cam_to_xyz_normalized(),
            cfa: image.cfa.name.clone(),
        };
        (raw, anomalies)
    }

    fn render(&self, raw: &RawImageData) -> std::result::Result<Vec<u8>, ConversionError> {
        if self.config.validate_dimensions && (raw.width == 0 || raw.height == 0) {
            return Err(ConversionError::InvalidDimensions(raw.width, raw.height));
        }

        let demosaic = match raw.cpp {
            3 => true,
            // Monochrome sensor: the mosaic already is the image.
            1 if raw.cfa.is_empty() => false,
            _ => self.config.debayer,
        };

        let mut buffer = Vec::new();
        let writer = StandardTiffWriter;
        if demosaic {
            if raw.cpp == 1 && CpuDebayer::cfa_pattern(&raw.cfa).is_none() {
                return Err(ConversionError::UnsupportedCfa(raw.cfa.clone()));
            }
            let rgb = CpuDebayer::new()
                .process(raw)
                .map_err(|e| ConversionError::DebayerError(e.to_string()))?;
            writer.write_rgb(&rgb, &mut buffer, &self.config)?;
        } else {
            writer.write_mosaic(raw, &mut buffer, &self.config)?;
        }
        Ok(buffer)
    }

    /// LibRaw-style `colors` and `cdesc`. Three-colour sensors report "RGBG"
    /// whatever their layout, as LibRaw does.
    fn colour_description(image: &RawImage) -> (usize, String) {
        if image.cpp == 3 {
            return (3, "RGBG".to_string());
        }
        if image.is_monochrome() {
            return (1, String::new());
        }
        let present: String = "RGBE".chars().filter(|&c| image.cfa.name.contains(c)).collect();
        match present.len() {
            3 => (3, "RGBG".to_string()),
            n => (n, present),
        }
    }

    fn status_for(err: &ConversionError) -> StatusCode {
        match err {
            ConversionError::IoError(e) => StatusCode::from(e),
            ConversionError::OutputWriteError { source, .. } => StatusCode::from(source),
            ConversionError::EncodeError(_) => StatusCode::UNSPECIFIED_ERROR,
            ConversionError::UnsupportedCfa(_) => StatusCode::NOT_IMPLEMENTED,
            ConversionError::DebayerError(_) | ConversionError::InvalidDimensions(..) => {
                StatusCode::DATA_ERROR
            }
        }
    }
}

impl DecodeEngine for RawloaderEngine {
    fn open_file(&mut self, path: &Path, bigfile_size: Option<i64>) -> StatusCode {
        if let Some(size) = bigfile_size {
            debug!("bigfile_size={} has no effect, rawloader reads sources whole", size);
        }
        match std::fs::read(path) {
            Ok(bytes) => self.open_bytes(bytes),
            Err(e) => {
                self.recycle();
                debug!("Failed to read {}: {}", path.display(), e);
                StatusCode::from(&e)
            }
        }
    }

    fn open_buffer(&mut self, data: Vec<u8>) -> StatusCode {
        self.open_bytes(data)
    }

    fn unpack(&mut self) -> StatusCode {
        let Some(image) = &self.image else {
            return StatusCode::OUT_OF_ORDER_CALL;
        };
        if self.source.is_none() {
            return StatusCode::INPUT_CLOSED;
        }

        let (raw, anomalies) = Self::materialise(image);
        self.data_errors = anomalies;
        self.raw = Some(raw);
        StatusCode::SUCCESS
    }

    fn unpack_thumb(&mut self) -> StatusCode {
        if self.image.is_none() {
            return StatusCode::OUT_OF_ORDER_CALL;
        }
        let Some(source) = &self.source else {
            return StatusCode::INPUT_CLOSED;
        };

        match extract_embedded_jpeg(source) {
            Some(jpeg) => {
                self.thumbnail = Some(jpeg);
                StatusCode::SUCCESS
            }
            None => StatusCode::NO_THUMBNAIL,
        }
    }

    fn metadata(&self) -> Metadata {
        let Some(image) = &self.image else {
            return Metadata::new();
        };

        let [top, right, bottom, left] = image.crops;
        let (colors, cdesc) = Self::colour_description(image);
        let mut metadata = Metadata::new();
        metadata.insert("idata", json!({
            "make": image.clean_make,
            "model": image.clean_model,
            "raw_make": image.make,
            "raw_model": image.model,
            "colors": colors,
            "cpp": image.cpp,
            "cdesc": cdesc,
            "cfa": image.cfa.name,
            "xmplen": self.xmp.as_ref().map_or(0, Vec::len),
        }));
        metadata.insert("sizes", json!({
            "raw_width": image.width,
            "raw_height": image.height,
            "width": image.width.saturating_sub(left + right),
            "height": image.height.saturating_sub(top + bottom),
            "top_margin": top,
            "left_margin": left,
            "flip": image.orientation.to_u16(),
        }));
        metadata.insert("color", json!({
            "black": image.blacklevels.iter().min().copied().unwrap_or(0),
            "maximum": image.whitelevels.iter().max().copied().unwrap_or(0),
            "cblack": image.blacklevels,
            "linear_max": image.whitelevels,
            "cam_mul": image.wb_coeffs,
            "cam_xyz": image.xyz_to_cam,
        }));
        metadata.insert("thumbnail", json!({
            "tlength": self.thumbnail.as_ref().map_or(0, Vec::len),
        }));
        metadata.insert("rawdata", json!({
            "unpacked": self.raw.is_some(),
            "bits_per_sample": self.raw.as_ref().map(|r| r.bits_per_sample),
        }));
        metadata
    }

    fn thumbnail(&self) -> Option<Vec<u8>> {
        self.thumbnail.clone()
    }

    fn xmp(&self) -> Option<Vec<u8>> {
        self.xmp.clone()
    }

    fn extract_tiff(&mut self, path: &Path) -> StatusCode {
        if self.image.is_none() {
            return StatusCode::OUT_OF_ORDER_CALL;
        }
        if self.raw.is_none() {
            let status = self.unpack();
            if !status.is_success() {
                return status;
            }
        }
        let Some(raw) = &self.raw else {
            return StatusCode::OUT_OF_ORDER_CALL;
        };

        let rendered = self.render(raw).and_then(|tiff| {
            std::fs::write(path, tiff).map_err(|source| ConversionError::OutputWriteError {
                path: path.to_path_buf(),
                source,
            })
        });
        match rendered {
            Ok(()) => StatusCode::SUCCESS,
            Err(e) => {
                warn!("TIFF rendition to {} failed: {}", path.display(), e);
                Self::status_for(&e)
            }
        }
    }

    fn error_count(&self) -> u32 {
        self.data_errors
    }

    fn recycle(&mut self) {
        self.source = None;
        self.image = None;
        self.xmp = None;
        self.raw = None;
        self.thumbnail = None;
        self.data_errors = 0;
    }

    fn recycle_datastream(&mut self) {
        self.source = None;
    }

    fn camera_count(&self) -> usize {
        0
    }

    fn camera_list(&self) -> Vec<String> {
        Vec::new()
    }

    fn version(&self) -> String {
        let (major, minor, patch) = VERSION;
        format!("{}.{}.{}-rawloader", major, minor, patch)
    }

    fn version_number(&self) -> u32 {
        let (major, minor, patch) = VERSION;
        (major << 16) | (minor << 8) | patch
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calls_before_open_are_out_of_order() {
        let mut engine = RawloaderEngine::new();
        assert_eq!(engine.unpack(), StatusCode::OUT_OF_ORDER_CALL);
        assert_eq!(engine.unpack_thumb(), StatusCode::OUT_OF_ORDER_CALL);
        assert_eq!(engine.extract_tiff(Path::new("unused.tiff")), StatusCode::OUT_OF_ORDER_CALL);
        assert!(engine.metadata().is_empty());
        assert_eq!(engine.thumbnail(), None);
    }

    #[test]
    fn test_missing_file_reports_errno() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = RawloaderEngine::new();
        let status = engine.open_file(&dir.path().join("missing.ARW"), None);
        assert_eq!(status.kind(), crate::raw_session::StatusKind::Os);
        assert_eq!(engine.error_count(), 0);
    }

    #[test]
    fn test_garbage_buffer_is_unsupported() {
        let mut engine = RawloaderEngine::new();
        assert_eq!(engine.open_buffer(b"definitely not a raw file".to_vec()), StatusCode::FILE_UNSUPPORTED);
        assert_eq!(engine.unpack(), StatusCode::OUT_OF_ORDER_CALL);
    }

    #[test]
    fn test_recycle_is_idempotent() {
        let mut engine = RawloaderEngine::new();
        engine.recycle();
        engine.recycle_datastream();
        engine.recycle();
        assert!(engine.metadata().is_empty());
    }

    const XTRANS: [u8; 36] = [
        1, 1, 0, 1, 1, 2,
        1, 1, 2, 1, 1, 0,
        2, 0, 1, 0, 2, 1,
        1, 1, 2, 1, 1, 0,
        1, 1, 0, 1, 1, 2,
        0, 2, 1, 2, 0, 1,
    ];

    const XMP_PACKET: &[u8] = b"<?xpacket begin=\"\" id=\"W5M0MpCehiHzreSzNTczkc9d\"?>\
        <x:xmpmeta xmlns:x=\"adobe:ns:meta/\"><rdf:RDF/></x:xmpmeta><?xpacket end=\"r\"?>";

    enum Field {
        Short(u16),
        Shorts(Vec<u16>),
        Long(u32),
        Ascii(&'static str),
        Bytes(Vec<u8>),
        /// Offset of the n-th blob appended after the IFD.
        BlobAt(usize),
    }

    impl Field {
        fn encode(&self) -> (u16, u32, Vec<u8>) {
            match self {
                Field::Short(v) => (3, 1, v.to_le_bytes().to_vec()),
                Field::Shorts(v) => (3, v.len() as u32, v.iter().flat_map(|s| s.to_le_bytes()).collect()),
                Field::Long(v) => (4, 1, v.to_le_bytes().to_vec()),
                Field::Ascii(text) => {
                    let mut bytes = text.as_bytes().to_vec();
                    bytes.push(0);
                    (2, bytes.len() as u32, bytes)
                }
                Field::Bytes(bytes) => (1, bytes.len() as u32, bytes.clone()),
                Field::BlobAt(_) => (4, 1, vec![0; 4]),
            }
        }
    }

    /// Single-IFD little-endian TIFF. Values over four bytes follow the IFD,
    /// then the blobs in order.
    fn little_endian_tiff(fields: &[(u16, Field)], blobs: &[&[u8]]) -> Vec<u8> {
        let ifd_end = 8 + 2 + 12 * fields.len() + 4;
        let encoded: Vec<_> = fields.iter().map(|(_, field)| field.encode()).collect();

        let mut spill = Vec::new();
        let mut spilled_at = Vec::new();
        for (_, _, bytes) in &encoded {
            if bytes.len() > 4 {
                spilled_at.push(Some(ifd_end + spill.len()));
                spill.extend_from_slice(bytes);
                if spill.len() % 2 == 1 {
                    spill.push(0);
                }
            } else {
                spilled_at.push(None);
            }
        }

        let mut blob_at = Vec::new();
        let mut next = ifd_end + spill.len();
        for blob in blobs {
            blob_at.push(next);
            next += blob.len();
        }

        let mut file = vec![0x49, 0x49, 0x2A, 0x00];
        file.extend_from_slice(&8u32.to_le_bytes());
        file.extend_from_slice(&(fields.len() as u16).to_le_bytes());
        for (((tag, field), (typ, count, bytes)), spilled) in fields.iter().zip(&encoded).zip(&spilled_at) {
            file.extend_from_slice(&tag.to_le_bytes());
            file.extend_from_slice(&typ.to_le_bytes());
            file.extend_from_slice(&count.to_le_bytes());
            let value = match (field, spilled) {
                (Field::BlobAt(i), _) => (blob_at[*i] as u32).to_le_bytes(),
                (_, Some(at)) => (*at as u32).to_le_bytes(),
                (_, None) => {
                    let mut inline = [0u8; 4];
                    inline[..bytes.len()].copy_from_slice(bytes);
                    inline
                }
            };
            file.extend_from_slice(&value);
        }
        file.extend_from_slice(&0u32.to_le_bytes());
        file.extend(spill);
        for blob in blobs {
            file.extend_from_slice(blob);
        }
        file
    }

    /// Baseline JPEG header (SOF0, 16x16, one component) around filler bytes.
    fn preview_jpeg() -> Vec<u8> {
        let mut jpeg = vec![0xFF, 0xD8, 0xFF, 0xC0, 0x00, 0x0B, 8, 0x00, 0x10, 0x00, 0x10, 1, 1, 0x11, 0];
        jpeg.resize(298, 0x5A);
        jpeg.extend_from_slice(&[0xFF, 0xD9]);
        jpeg
    }

    /// Uncompressed 16-bit CFA DNG from camera "Synth S1" with a 12-bit white
    /// level, an embedded JPEG preview and an XMP packet.
    fn synthetic_dng(width: u32, height: u32, cfa: &[u8]) -> Vec<u8> {
        let pixels: Vec<u8> = (0..width * height)
            .flat_map(|i| ((i * 50 % 4000) as u16).to_le_bytes())
            .collect();
        let jpeg = preview_jpeg();
        let repeat = if cfa.len() == 36 { 6 } else { 2 };

        let fields: &[(u16, Field)] = &[
            (0x00FE, Field::Long(0)),
            (0x0100, Field::Long(width)),
            (0x0101, Field::Long(height)),
            (0x0102, Field::Short(16)),
            (0x0103, Field::Short(1)),
            (0x0106, Field::Short(32803)),
            (0x010F, Field::Ascii("Synth")),
            (0x0110, Field::Ascii("S1")),
            (0x0111, Field::BlobAt(2)),
            (0x0112, Field::Short(1)),
            (0x0115, Field::Short(1)),
            (0x0117, Field::Long(pixels.len() as u32)),
            (0x0201, Field::BlobAt(1)),
            (0x0202, Field::Long(jpeg.len() as u32)),
            (0x828D, Field::Shorts(vec![repeat, repeat])),
            (0x828E, Field::Bytes(cfa.to_vec())),
            (0xC612, Field::Bytes(vec![1, 4, 0, 0])),
            (0xC61D, Field::Long(4095)),
        ];
        little_endian_tiff(fields, &[XMP_PACKET, &jpeg, &pixels])
    }

    fn bayer_dng() -> Vec<u8> {
        synthetic_dng(8, 8, &[0, 1, 1, 2])
    }

    #[test]
    fn test_dng_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("rendition.tiff");
        let mut engine = RawloaderEngine::new();

        assert_eq!(engine.open_buffer(bayer_dng()), StatusCode::SUCCESS);
        assert_eq!(engine.unpack(), StatusCode::SUCCESS);
        assert_eq!(engine.error_count(), 0);

        assert_eq!(engine.unpack_thumb(), StatusCode::SUCCESS);
        assert_eq!(engine.thumbnail(), Some(preview_jpeg()));
        assert_eq!(engine.xmp().as_deref(), Some(XMP_PACKET));

        assert_eq!(engine.extract_tiff(&output), StatusCode::SUCCESS);
        let tiff = std::fs::read(&output).unwrap();
        assert_eq!(&tiff[..4], &[0x49, 0x49, 0x2A, 0x00]);
        assert!(tiff.len() > 8 * 8 * 3 * 2);
    }

    #[test]
    fn test_dng_metadata() {
        let mut engine = RawloaderEngine::new();
        assert_eq!(engine.open_buffer(bayer_dng()), StatusCode::SUCCESS);
        assert_eq!(engine.unpack(), StatusCode::SUCCESS);
        let metadata = engine.metadata();

        assert_eq!(metadata.str_at("idata.make"), Some("Synth"));
        assert_eq!(metadata.str_at("idata.model"), Some("S1"));
        assert_eq!(metadata.str_at("idata.cfa"), Some("RGGB"));
        assert_eq!(metadata.str_at("idata.cdesc"), Some("RGBG"));
        assert_eq!(metadata.path("idata.colors"), Some(&json!(3)));
        assert_eq!(metadata.path("idata.xmplen"), Some(&json!(XMP_PACKET.len())));
        assert_eq!(metadata.path("sizes.flip"), Some(&json!(1)));
        assert_eq!(metadata.path("sizes.width"), Some(&json!(8)));
        assert_eq!(metadata.path("color.maximum"), Some(&json!(4095)));
        assert_eq!(metadata.path("rawdata.bits_per_sample"), Some(&json!(12)));
    }

    #[test]
    fn test_extract_tiff_reports_write_failure_errno() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = RawloaderEngine::new();
        assert_eq!(engine.open_buffer(bayer_dng()), StatusCode::SUCCESS);

        let status = engine.extract_tiff(&dir.path().join("missing").join("out.tiff"));
        assert_eq!(status.kind(), crate::raw_session::StatusKind::Os);
    }

    #[test]
    fn test_xtrans_needs_mosaic_output() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = RawloaderEngine::new();
        assert_eq!(engine.open_buffer(synthetic_dng(12, 12, &XTRANS)), StatusCode::SUCCESS);
        assert_eq!(engine.metadata().str_at("idata.cdesc"), Some("RGBG"));
        assert_eq!(engine.extract_tiff(&dir.path().join("rgb.tiff")), StatusCode::NOT_IMPLEMENTED);

        let mosaic = RenditionConfig::builder().debayer(false).build();
        let mut engine = RawloaderEngine::with_config(mosaic);
        assert_eq!(engine.open_buffer(synthetic_dng(12, 12, &XTRANS)), StatusCode::SUCCESS);
        assert_eq!(engine.extract_tiff(&dir.path().join("cfa.tiff")), StatusCode::SUCCESS);
    }

    #[test]
    fn test_version_number_packing() {
        let engine = RawloaderEngine::new();
        assert_eq!(engine.version_number(), 37 << 8 | 1);
        assert_eq!(engine.version(), "0.37.1-rawloader");
        assert_eq!(engine.camera_count(), engine.camera_list().len());
    }
}
