//! Decode engine backed by the native LibRaw C API.
//!
//! Built only with the `libraw` feature. Targets the LibRaw 0.20 C interface.

use std::ffi::{CStr, CString, c_char, c_int, c_void};
use std::path::Path;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, Ordering};

use serde_json::{Value, json};
use tracing::{debug, warn};

use super::DecodeEngine;
use super::libraw_sys::*;
use crate::raw_session::common::error::{Result, SessionError};
use crate::raw_session::metadata::Metadata;
use crate::raw_session::rendition::{RenditionConfig, TiffCompression};
use crate::raw_session::status::StatusCode;

/// LibRaw data-error callback; counts non-fatal anomalies.
unsafe extern "C" fn count_data_error(data: *mut c_void, _file: *const c_char, _offset: c_int) {
    if let Some(counter) = unsafe { data.cast::<AtomicU32>().as_ref() } {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Decodes a NUL-terminated fixed-size C string field.
fn text(field: &[c_char]) -> String {
    let bytes: Vec<u8> = field.iter().take_while(|&&c| c != 0).map(|&c| c as u8).collect();
    String::from_utf8_lossy(&bytes).into_owned()
}

fn flag(c: c_char) -> String {
    match c as u8 {
        0 => String::new(),
        b => (b as char).to_string(),
    }
}

fn iparams_json(idata: &libraw_iparams_t) -> Value {
    json!({
        "make": text(&idata.make),
        "model": text(&idata.model),
        "software": text(&idata.software),
        "normalized_make": text(&idata.normalized_make),
        "normalized_model": text(&idata.normalized_model),
        "raw_count": idata.raw_count,
        "dng_version": idata.dng_version,
        "is_foveon": idata.is_foveon,
        "colors": idata.colors,
        "filters": idata.filters,
        "xtrans": idata.xtrans,
        "xtrans_abs": idata.xtrans_abs,
        "cdesc": text(&idata.cdesc),
        "xmplen": idata.xmplen,
    })
}

fn sizes_json(sizes: &libraw_image_sizes_t) -> Value {
    json!({
        "raw_height": sizes.raw_height,
        "raw_width": sizes.raw_width,
        "height": sizes.height,
        "width": sizes.width,
        "top_margin": sizes.top_margin,
        "left_margin": sizes.left_margin,
        "iheight": sizes.iheight,
        "iwidth": sizes.iwidth,
        "raw_pitch": sizes.raw_pitch,
        "pixel_aspect": sizes.pixel_aspect,
        "flip": sizes.flip,
        "mask": sizes.mask,
    })
}

fn dng_color_json(dng: &libraw_dng_color_t) -> Value {
    json!({
        "parsedfields": dng.parsedfields,
        "illuminant": dng.illuminant,
        "calibration": dng.calibration,
        "colormatrix": dng.colormatrix,
        "forwardmatrix": dng.forwardmatrix,
    })
}

fn colordata_json(color: &libraw_colordata_t) -> Value {
    let levels = &color.dng_levels;
    json!({
        "black": color.black,
        "data_maximum": color.data_maximum,
        "maximum": color.maximum,
        "linear_max": color.linear_max,
        "fmaximum": color.fmaximum,
        "fnorm": color.fnorm,
        "white": color.white,
        "cam_mul": color.cam_mul,
        "pre_mul": color.pre_mul,
        "cmatrix": color.cmatrix,
        "ccm": color.ccm,
        "rgb_cam": color.rgb_cam,
        "cam_xyz": color.cam_xyz,
        "flash_used": color.flash_used,
        "canon_ev": color.canon_ev,
        "model2": text(&color.model2),
        "UniqueCameraModel": text(&color.UniqueCameraModel),
        "LocalizedCameraModel": text(&color.LocalizedCameraModel),
        "profile_length": color.profile_length,
        "black_stat": color.black_stat,
        "dng_color": color.dng_color.iter().map(dng_color_json).collect::<Vec<_>>(),
        "dng_levels": {
            "parsedfields": levels.parsedfields,
            "dng_black": levels.dng_black,
            "dng_whitelevel": levels.dng_whitelevel,
            "default_crop": levels.default_crop,
            "preview_colorspace": levels.preview_colorspace,
            "analogbalance": levels.analogbalance,
        },
        // 256 and 64 rows: past serde's fixed-size array impls.
        "WB_Coeffs": color.WB_Coeffs.as_slice(),
        "WBCT_Coeffs": color.WBCT_Coeffs.as_slice(),
        "P1_color": color.P1_color.iter().map(|p| p.romm_cam).collect::<Vec<_>>(),
    })
}

fn other_json(other: &libraw_imgother_t) -> Value {
    let gps = &other.parsed_gps;
    json!({
        "iso_speed": other.iso_speed,
        "shutter": other.shutter,
        "aperture": other.aperture,
        "focal_len": other.focal_len,
        "timestamp": other.timestamp,
        "shot_order": other.shot_order,
        "gpsdata": other.gpsdata,
        "desc": text(&other.desc),
        "artist": text(&other.artist),
        "parsed_gps": {
            "latitude": gps.latitude,
            "longitude": gps.longtitude,
            "gpstimestamp": gps.gpstimestamp,
            "altitude": gps.altitude,
            "altref": flag(gps.altref),
            "latref": flag(gps.latref),
            "longref": flag(gps.longref),
            "gpsstatus": flag(gps.gpsstatus),
            "gpsparsed": gps.gpsparsed != 0,
        },
    })
}

fn lens_json(lens: &libraw_lensinfo_t) -> Value {
    let mn = &lens.makernotes;
    json!({
        "MinFocal": lens.MinFocal,
        "MaxFocal": lens.MaxFocal,
        "MaxAp4MinFocal": lens.MaxAp4MinFocal,
        "MaxAp4MaxFocal": lens.MaxAp4MaxFocal,
        "EXIF_MaxAp": lens.EXIF_MaxAp,
        "LensMake": text(&lens.LensMake),
        "Lens": text(&lens.Lens),
        "LensSerial": text(&lens.LensSerial),
        "InternalLensSerial": text(&lens.InternalLensSerial),
        "FocalLengthIn35mmFormat": lens.FocalLengthIn35mmFormat,
        "dng": {
            "MinFocal": lens.dng.MinFocal,
            "MaxFocal": lens.dng.MaxFocal,
            "MaxAp4MinFocal": lens.dng.MaxAp4MinFocal,
            "MaxAp4MaxFocal": lens.dng.MaxAp4MaxFocal,
        },
        "makernotes": {
            "LensID": mn.LensID,
            "Lens": text(&mn.Lens),
            "LensFormat": mn.LensFormat,
            "LensMount": mn.LensMount,
            "CamID": mn.CamID,
            "CameraFormat": mn.CameraFormat,
            "CameraMount": mn.CameraMount,
            "body": text(&mn.body),
            "FocalType": mn.FocalType,
            "LensFeatures_pre": text(&mn.LensFeatures_pre),
            "LensFeatures_suf": text(&mn.LensFeatures_suf),
            "MinFocal": mn.MinFocal,
            "MaxFocal": mn.MaxFocal,
            "MaxAp4MinFocal": mn.MaxAp4MinFocal,
            "MaxAp4MaxFocal": mn.MaxAp4MaxFocal,
            "MinAp4MinFocal": mn.MinAp4MinFocal,
            "MinAp4MaxFocal": mn.MinAp4MaxFocal,
            "MaxAp": mn.MaxAp,
            "MinAp": mn.MinAp,
            "CurFocal": mn.CurFocal,
            "CurAp": mn.CurAp,
            "MaxAp4CurFocal": mn.MaxAp4CurFocal,
            "MinAp4CurFocal": mn.MinAp4CurFocal,
            "MinFocusDistance": mn.MinFocusDistance,
            "FocusRangeIndex": mn.FocusRangeIndex,
            "LensFStops": mn.LensFStops,
            "TeleconverterID": mn.TeleconverterID,
            "Teleconverter": text(&mn.Teleconverter),
            "AdapterID": mn.AdapterID,
            "Adapter": text(&mn.Adapter),
            "AttachmentID": mn.AttachmentID,
            "Attachment": text(&mn.Attachment),
            "FocalLengthIn35mmFormat": mn.FocalLengthIn35mmFormat,
        },
    })
}

fn makernotes_json(makernotes: &libraw_makernotes_t) -> Value {
    let (common, canon, nikon) = (&makernotes.common, &makernotes.canon, &makernotes.nikon);
    json!({
        "common": {
            "FlashEC": common.FlashEC,
            "FlashGN": common.FlashGN,
            "CameraTemperature": common.CameraTemperature,
            "SensorTemperature": common.SensorTemperature,
            "SensorTemperature2": common.SensorTemperature2,
            "LensTemperature": common.LensTemperature,
            "AmbientTemperature": common.AmbientTemperature,
            "BatteryTemperature": common.BatteryTemperature,
            "exifAmbientTemperature": common.exifAmbientTemperature,
            "exifHumidity": common.exifHumidity,
            "exifPressure": common.exifPressure,
            "exifWaterDepth": common.exifWaterDepth,
            "exifAcceleration": common.exifAcceleration,
            "exifCameraElevationAngle": common.exifCameraElevationAngle,
            "real_ISO": common.real_ISO,
            "exifExposureIndex": common.exifExposureIndex,
            "ColorSpace": common.ColorSpace,
            "firmware": text(&common.firmware),
        },
        "canon": {
            "ColorDataVer": canon.ColorDataVer,
            "ColorDataSubVer": canon.ColorDataSubVer,
            "SpecularWhiteLevel": canon.SpecularWhiteLevel,
            "NormalWhiteLevel": canon.NormalWhiteLevel,
            "ChannelBlackLevel": canon.ChannelBlackLevel,
            "AverageBlackLevel": canon.AverageBlackLevel,
            "MeteringMode": canon.MeteringMode,
            "SpotMeteringMode": canon.SpotMeteringMode,
            "FlashMeteringMode": canon.FlashMeteringMode,
            "FlashExposureLock": canon.FlashExposureLock,
            "ExposureMode": canon.ExposureMode,
            "AESetting": canon.AESetting,
            "ImageStabilization": canon.ImageStabilization,
            "FlashMode": canon.FlashMode,
            "FlashActivity": canon.FlashActivity,
            "FlashBits": canon.FlashBits,
            "ManualFlashOutput": canon.ManualFlashOutput,
            "FlashOutput": canon.FlashOutput,
            "FlashGuideNumber": canon.FlashGuideNumber,
            "ContinuousDrive": canon.ContinuousDrive,
            "SensorWidth": canon.SensorWidth,
            "SensorHeight": canon.SensorHeight,
            "AFMicroAdjMode": canon.AFMicroAdjMode,
            "AFMicroAdjValue": canon.AFMicroAdjValue,
            "MakernotesFlip": canon.MakernotesFlip,
            "RecordMode": canon.RecordMode,
            "SRAWQuality": canon.SRAWQuality,
            "wbi": canon.wbi,
        },
        "nikon": {
            "ExposureBracketValue": nikon.ExposureBracketValue,
            "ActiveDLighting": nikon.ActiveDLighting,
            "ShootingMode": nikon.ShootingMode,
            "ImageStabilization": nikon.ImageStabilization,
            "VibrationReduction": nikon.VibrationReduction,
            "VRMode": nikon.VRMode,
            "FocusMode": text(&nikon.FocusMode),
            "AFPoint": nikon.AFPoint,
            "AFPointsInFocus": nikon.AFPointsInFocus,
            "ContrastDetectAF": nikon.ContrastDetectAF,
            "AFAreaMode": nikon.AFAreaMode,
            "PhaseDetectAF": nikon.PhaseDetectAF,
            "PrimaryAFPoint": nikon.PrimaryAFPoint,
            "AFPointsUsed": nikon.AFPointsUsed,
            "AFImageWidth": nikon.AFImageWidth,
            "AFImageHeight": nikon.AFImageHeight,
            "AFAreaXPposition": nikon.AFAreaXPposition,
            "AFAreaYPosition": nikon.AFAreaYPosition,
            "AFAreaWidth": nikon.AFAreaWidth,
            "AFAreaHeight": nikon.AFAreaHeight,
            "ContrastDetectAFInFocus": nikon.ContrastDetectAFInFocus,
            "FlashSetting": text(&nikon.FlashSetting),
            "FlashType": text(&nikon.FlashType),
            "FlashExposureCompensation": nikon.FlashExposureCompensation,
            "ExternalFlashExposureComp": nikon.ExternalFlashExposureComp,
            "FlashExposureBracketValue": nikon.FlashExposureBracketValue,
            "FlashMode": nikon.FlashMode,
            "FlashSource": nikon.FlashSource,
            "FlashFirmware": nikon.FlashFirmware,
            "ExternalFlashFlags": nikon.ExternalFlashFlags,
            "FlashControlCommanderMode": nikon.FlashControlCommanderMode,
            "FlashOutputAndCompensation": nikon.FlashOutputAndCompensation,
            "FlashFocalLength": nikon.FlashFocalLength,
            "FlashGNDistance": nikon.FlashGNDistance,
            "FlashGroupControlMode": nikon.FlashGroupControlMode,
            "FlashGroupOutputAndCompensation": nikon.FlashGroupOutputAndCompensation,
            "FlashColorFilter": nikon.FlashColorFilter,
            "NEFCompression": nikon.NEFCompression,
            "ExposureMode": nikon.ExposureMode,
            "nMEshots": nikon.nMEshots,
            "MEgainOn": nikon.MEgainOn,
            "ME_WB": nikon.ME_WB,
            "AFFineTune": nikon.AFFineTune,
            "AFFineTuneIndex": nikon.AFFineTuneIndex,
            "AFFineTuneAdj": nikon.AFFineTuneAdj,
        },
    })
}

pub struct LibRawEngine {
    handle: NonNull<libraw_data_t>,
    /// LibRaw reads `open_buffer` sources in place; the bytes live here until recycle.
    buffer: Option<Vec<u8>>,
    /// Boxed so the address handed to the data-error callback never moves.
    data_errors: Box<AtomicU32>,
    raw_unpacked: bool,
}

// The handle is only ever touched through `&mut self` or `&self` behind the
// session's mutex, and LibRaw processors are not bound to a thread.
unsafe impl Send for LibRawEngine {}

impl LibRawEngine {
    pub fn new() -> Result<Self> {
        Self::from_config(&RenditionConfig::default())
    }

    pub fn from_config(config: &RenditionConfig) -> Result<Self> {
        let handle = NonNull::new(unsafe { libraw_init(0) })
            .ok_or_else(|| SessionError::EngineInit("libraw_init returned null".to_string()))?;

        let data_errors = Box::new(AtomicU32::new(0));
        let counter = (&*data_errors as *const AtomicU32).cast_mut().cast::<c_void>();

        unsafe {
            libraw_set_dataerror_handler(handle.as_ptr(), Some(count_data_error), counter);
            libraw_set_output_tif(handle.as_ptr(), 1);
            libraw_set_output_bps(handle.as_ptr(), 16);
            (*handle.as_ptr()).params.no_interpolation = c_int::from(!config.debayer);
        }

        if config.compression != TiffCompression::None || config.predictor.is_some() {
            debug!("LibRaw writes uncompressed TIFF, compression settings ignored");
        }

        debug!(version = %Self::version_text(), "Initialized LibRaw processor");

        Ok(Self {
            handle,
            buffer: None,
            data_errors,
            raw_unpacked: false,
        })
    }

    fn version_text() -> String {
        unsafe { CStr::from_ptr(libraw_version()) }
            .to_string_lossy()
            .into_owned()
    }

    fn data(&self) -> &libraw_data_t {
        unsafe { self.handle.as_ref() }
    }

    fn c_path(path: &Path) -> Option<CString> {
        CString::new(path.to_string_lossy().as_bytes()).ok()
    }
}

impl DecodeEngine for LibRawEngine {
    fn open_file(&mut self, path: &Path, bigfile_size: Option<i64>) -> StatusCode {
        self.recycle();
        let Some(c_path) = Self::c_path(path) else {
            return StatusCode::IO_ERROR;
        };

        let code = match bigfile_size {
            Some(size) => unsafe { libraw_open_file_ex(self.handle.as_ptr(), c_path.as_ptr(), size) },
            None => unsafe { libraw_open_file(self.handle.as_ptr(), c_path.as_ptr()) },
        };
        StatusCode::new(code)
    }

    fn open_buffer(&mut self, data: Vec<u8>) -> StatusCode {
        self.recycle();
        let buffer = self.buffer.insert(data);
        let code = unsafe { libraw_open_buffer(self.handle.as_ptr(), buffer.as_ptr() as _, buffer.len()) };
        if code != 0 {
            self.buffer = None;
        }
        StatusCode::new(code)
    }

    fn unpack(&mut self) -> StatusCode {
        self.data_errors.store(0, Ordering::Relaxed);
        let status = StatusCode::new(unsafe { libraw_unpack(self.handle.as_ptr()) });
        self.raw_unpacked = status.is_success();
        status
    }

    fn unpack_thumb(&mut self) -> StatusCode {
        StatusCode::new(unsafe { libraw_unpack_thumb(self.handle.as_ptr()) })
    }

    fn metadata(&self) -> Metadata {
        let d = self.data();
        let shooting = &d.shootinginfo;

        let mut metadata = Metadata::new();
        metadata.insert("idata", iparams_json(&d.idata));
        metadata.insert("sizes", sizes_json(&d.sizes));
        metadata.insert("color", colordata_json(&d.color));
        metadata.insert("other", other_json(&d.other));
        metadata.insert("lens", lens_json(&d.lens));
        metadata.insert("makernotes", makernotes_json(&d.makernotes));
        metadata.insert("shootinginfo", json!({
            "DriveMode": shooting.DriveMode,
            "FocusMode": shooting.FocusMode,
            "MeteringMode": shooting.MeteringMode,
            "AFPoint": shooting.AFPoint,
            "ExposureMode": shooting.ExposureMode,
            "ImageStabilization": shooting.ImageStabilization,
            "BodySerial": text(&shooting.BodySerial),
            "InternalBodySerial": text(&shooting.InternalBodySerial),
        }));
        metadata.insert("thumbnail", json!({
            "tformat": d.thumbnail.tformat as i64,
            "twidth": d.thumbnail.twidth,
            "theight": d.thumbnail.theight,
            "tlength": d.thumbnail.tlength,
            "tcolors": d.thumbnail.tcolors,
        }));
        metadata.insert("params", json!({
            "half_size": d.params.half_size,
            "use_camera_wb": d.params.use_camera_wb,
            "use_camera_matrix": d.params.use_camera_matrix,
            "output_color": d.params.output_color,
            "output_bps": d.params.output_bps,
            "output_tiff": d.params.output_tiff,
            "user_flip": d.params.user_flip,
            "bright": d.params.bright,
            "no_interpolation": d.params.no_interpolation,
        }));
        metadata.insert("rawdata", json!({
            "iparams": iparams_json(&d.rawdata.iparams),
            "sizes": sizes_json(&d.rawdata.sizes),
            "ioparams": {
                "mix_green": d.rawdata.ioparams.mix_green,
                "raw_color": d.rawdata.ioparams.raw_color,
                "zero_is_bad": d.rawdata.ioparams.zero_is_bad,
                "shrink": d.rawdata.ioparams.shrink,
                "fuji_width": d.rawdata.ioparams.fuji_width,
            },
            "color": colordata_json(&d.rawdata.color),
        }));
        metadata.insert("progress_flags", json!(d.progress_flags));
        metadata.insert("process_warnings", json!(d.process_warnings));
        metadata
    }

    fn thumbnail(&self) -> Option<Vec<u8>> {
        let thumb = &self.data().thumbnail;
        if thumb.thumb.is_null() || thumb.tlength == 0 {
            return None;
        }
        let bytes = unsafe { std::slice::from_raw_parts(thumb.thumb.cast::<u8>(), thumb.tlength as usize) };
        Some(bytes.to_vec())
    }

    fn xmp(&self) -> Option<Vec<u8>> {
        let idata = &self.data().idata;
        if idata.xmpdata.is_null() || idata.xmplen == 0 {
            return None;
        }
        let bytes = unsafe { std::slice::from_raw_parts(idata.xmpdata.cast::<u8>(), idata.xmplen as usize) };
        Some(bytes.to_vec())
    }

    fn extract_tiff(&mut self, path: &Path) -> StatusCode {
        let Some(c_path) = Self::c_path(path) else {
            return StatusCode::IO_ERROR;
        };
        if !self.raw_unpacked {
            let status = self.unpack();
            if !status.is_success() {
                return status;
            }
        }

        let status = StatusCode::new(unsafe { libraw_dcraw_process(self.handle.as_ptr()) });
        if !status.is_success() {
            warn!("dcraw_process failed: {}", status);
            return status;
        }

        unsafe { libraw_set_output_tif(self.handle.as_ptr(), 1) };
        StatusCode::new(unsafe { libraw_dcraw_ppm_tiff_writer(self.handle.as_ptr(), c_path.as_ptr()) })
    }

    fn error_count(&self) -> u32 {
        self.data_errors.load(Ordering::Relaxed)
    }

    fn recycle(&mut self) {
        unsafe { libraw_recycle(self.handle.as_ptr()) };
        self.buffer = None;
        self.raw_unpacked = false;
        self.data_errors.store(0, Ordering::Relaxed);
    }

    fn recycle_datastream(&mut self) {
        unsafe { libraw_recycle_datastream(self.handle.as_ptr()) };
        self.buffer = None;
    }

    fn camera_count(&self) -> usize {
        usize::try_from(unsafe { libraw_cameraCount() }).unwrap_or(0)
    }

    fn camera_list(&self) -> Vec<String> {
        let list = unsafe { libraw_cameraList() };
        if list.is_null() {
            return Vec::new();
        }
        (0..self.camera_count())
            .map_while(|i| {
                let name = unsafe { *list.add(i) };
                (!name.is_null()).then(|| unsafe { CStr::from_ptr(name) }.to_string_lossy().into_owned())
            })
            .collect()
    }

    fn strerror(&self, code: StatusCode) -> String {
        unsafe { CStr::from_ptr(libraw_strerror(code.code())) }
            .to_string_lossy()
            .into_owned()
    }

    fn version(&self) -> String {
        Self::version_text()
    }

    fn version_number(&self) -> u32 {
        u32::try_from(unsafe { libraw_versionNumber() }).unwrap_or(0)
    }
}

impl Drop for LibRawEngine {
    fn drop(&mut self) {
        unsafe { libraw_close(self.handle.as_ptr()) };
    }
}
