//! Rendition data and configuration types

/// Sensor data materialised by the pure-Rust engine's `unpack`.
#[derive(Debug, Clone)]
pub struct RawImageData {
    /// Width of the image in pixels
    pub width: usize,
    /// Height of the image in pixels
    pub height: usize,
    /// Components per pixel: 1 for CFA data, 3 for linear RGB
    pub cpp: usize,
    /// Sensor samples, `width * height * cpp` of them
    pub data: Vec<u16>,
    /// Actual bits per sample from the sensor (e.g., 12, 14, or 16)
    pub bits_per_sample: u32,
    pub black_levels: [u16; 4],
    pub white_levels: [u16; 4],
    /// White balance multipliers, R G B (G2)
    pub wb_coeffs: [f32; 4],
    /// Camera to XYZ matrix, 3x4 with the fourth column for the second green
    pub cam_to_xyz: [[f32; 4]; 3],
    /// CFA pattern name as reported by the decoder, e.g. "RGGB"
    pub cfa: String,
}

/// RGB image data after debayering
#[derive(Debug, Clone)]
pub struct RgbImageData {
    pub width: usize,
    pub height: usize,
    /// RGB pixel data interleaved [R, G, B, R, G, B, ...]
    pub data: Vec<u16>,
}

/// TIFF compression methods
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TiffCompression {
    /// No compression (fastest, largest file)
    None,
    /// LZW compression (slow, good compression)
    Lzw,
    /// Deflate compression - fast level
    DeflateFast,
    /// Deflate compression - balanced
    DeflateBalanced,
    /// Deflate compression - best compression (slower)
    DeflateBest,
}

/// How `extract_tiff` renders sensor data in the pure-Rust engine
#[derive(Debug, Clone)]
pub struct RenditionConfig {
    pub compression: TiffCompression,
    /// Predictor value for compression (2 for horizontal differencing)
    pub predictor: Option<u16>,
    /// Reject zero-sized images before encoding
    pub validate_dimensions: bool,
    /// Demosaic to RGB (true) or write the grayscale CFA mosaic (false)
    pub debayer: bool,
}

impl Default for RenditionConfig {
    fn default() -> Self {
        Self {
            compression: TiffCompression::None,
            predictor: None,
            validate_dimensions: true,
            debayer: true,
        }
    }
}

impl RenditionConfig {
    pub fn builder() -> RenditionConfigBuilder {
        RenditionConfigBuilder::default()
    }
}

/// Starts from [`RenditionConfig::default`] and overrides field by field.
#[derive(Debug, Clone, Default)]
pub struct RenditionConfigBuilder(RenditionConfig);

impl RenditionConfigBuilder {
    pub fn compression(mut self, compression: TiffCompression) -> Self {
        self.0.compression = compression;
        self
    }

    pub fn predictor(mut self, predictor: Option<u16>) -> Self {
        self.0.predictor = predictor;
        self
    }

    pub fn validate_dimensions(mut self, validate: bool) -> Self {
        self.0.validate_dimensions = validate;
        self
    }

    pub fn debayer(mut self, enable: bool) -> Self {
        self.0.debayer = enable;
        self
    }

    pub fn build(self) -> RenditionConfig {
        self.0
    }
}
