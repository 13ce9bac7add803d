use anyhow::Result;
use tracing::debug;
use std::io::Cursor;
use bayer::{BayerDepth, CFA, Demosaic, RasterDepth, RasterMut};
use crate::raw_session::rendition::types::{RawImageData, RgbImageData};

/// Standard XYZ to sRGB (D65) matrix
const XYZ_TO_SRGB: [[f32; 3]; 3] = [
    [ 3.2404542, -1.5371385, -0.4985314],
    [-0.9692660,  1.8760108,  0.0415560],
    [ 0.0556434, -0.2040259,  1.0572252],
];

pub struct CpuDebayer;

impl CpuDebayer {
    pub fn new() -> Self {
        Self
    }

    /// Only 2x2 Bayer layouts are demosaiced. X-Trans (6x6) and other
    /// repeats are rejected rather than rendered with the wrong colours.
    pub fn cfa_pattern(name: &str) -> Option<CFA> {
        match name {
            "BGGR" => Some(CFA::BGGR),
            "GBRG" => Some(CFA::GBRG),
            "GRBG" => Some(CFA::GRBG),
            "RGGB" => Some(CFA::RGGB),
            _ => None,
        }
    }

    /// Green-normalised white balance; unknown coefficients fall back to 1.0.
    fn white_balance(coeffs: &[f32; 4]) -> [f32; 3] {
        let green = coeffs[1];
        if !green.is_finite() || green == 0.0 {
            return [1.0; 3];
        }
        let scale = |c: f32| if c.is_finite() && c > 0.0 { c / green } else { 1.0 };
        [scale(coeffs[0]), 1.0, scale(coeffs[2])]
    }

    fn cam_to_srgb(cam_to_xyz: &[[f32; 4]; 3]) -> [[f32; 3]; 3] {
        let mut out = [[0.0f32; 3]; 3];
        for r in 0..3 {
            for c in 0..3 {
                out[r][c] = (0..3).map(|k| XYZ_TO_SRGB[r][k] * cam_to_xyz[k][c]).sum();
            }
        }
        // An all-zero matrix means the decoder had no colour data for this camera.
        if out.iter().flatten().all(|v| *v == 0.0 || !v.is_finite()) {
            return [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];
        }
        out
    }

    fn demosaic(&self, raw_image: &RawImageData) -> Result<Vec<u16>> {
        let width = raw_image.width;
        let height = raw_image.height;
        let Some(cfa) = Self::cfa_pattern(&raw_image.cfa) else {
            anyhow::bail!("no 2x2 Bayer demosaic for CFA pattern {:?}", raw_image.cfa);
        };

        let bayer_bytes: Vec<u8> = raw_image.data.iter()
            .flat_map(|&val| val.to_le_bytes())
            .collect();

        let mut output_buf = vec![0u8; width * height * 3 * 2];
        let mut cursor = Cursor::new(&bayer_bytes[..]);

        debug!("Running demosaic with CFA={}, algo=Linear, {}x{}", raw_image.cfa, width, height);

        let mut output_raster = RasterMut::new(width, height, RasterDepth::Depth16, &mut output_buf);
        bayer::run_demosaic(
            &mut cursor,
            BayerDepth::Depth16LE,
            cfa,
            Demosaic::Linear,
            &mut output_raster,
        ).map_err(|e| anyhow::anyhow!("Demosaic failed: {:?}", e))?;

        Ok(output_buf
            .chunks_exact(2)
            .map(|b| u16::from_le_bytes([b[0], b[1]]))
            .collect())
    }

    /// Black level -> white balance -> camera matrix -> sRGB, 16-bit output.
    pub fn process(&self, raw_image: &RawImageData) -> Result<RgbImageData> {
        let width = raw_image.width;
        let height = raw_image.height;

        let interleaved = match raw_image.cpp {
            1 => self.demosaic(raw_image)?,
            3 => raw_image.data.clone(),
            other => anyhow::bail!("cannot render {} components per pixel", other),
        };

        let black_level = raw_image.black_levels[0] as f32;
        let white_level = raw_image.white_levels[0] as f32;
        let range = (white_level - black_level).max(1.0);
        let wb = Self::white_balance(&raw_image.wb_coeffs);
        let matrix = Self::cam_to_srgb(&raw_image.cam_to_xyz);

        let data = interleaved
            .chunks_exact(3)
            .flat_map(|px| {
                let lin: [f32; 3] = std::array::from_fn(|i| {
                    ((px[i] as f32 - black_level).max(0.0) / range) * wb[i]
                });
                std::array::from_fn::<u16, 3, _>(|r| {
                    let v = matrix[r][0] * lin[0] + matrix[r][1] * lin[1] + matrix[r][2] * lin[2];
                    (v * 65535.0).clamp(0.0, 65535.0) as u16
                })
            })
            .collect();

        Ok(RgbImageData { width, height, data })
    }
}
