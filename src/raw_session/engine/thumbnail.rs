//! Embedded JPEG preview extraction.
//!
//! Most RAW formats are TIFF containers that carry one or more JPEG previews,
//! referenced from IFD0, its SubIFDs or the IFD chain. The largest valid JPEG
//! wins. Non-TIFF containers fall back to a marker scan.
//!
//! Full-resolution sensor data is often stored as a lossless JPEG strip (CR2
//! IFD3, compressed DNG). Those strips are never previews: strips in IFDs
//! marked as full-resolution images are skipped, and every candidate must
//! carry a baseline, extended or progressive SOF marker.

// TIFF constants
const TIFF_MAGIC_LE: [u8; 4] = [0x49, 0x49, 0x2A, 0x00]; // II + 42
const TIFF_MAGIC_BE: [u8; 4] = [0x4D, 0x4D, 0x00, 0x2A]; // MM + 42

// TIFF tag IDs
const TAG_NEW_SUBFILE_TYPE: u16 = 0x00FE;
const TAG_COMPRESSION: u16 = 0x0103;
const TAG_STRIP_OFFSETS: u16 = 0x0111;
const TAG_STRIP_BYTE_COUNTS: u16 = 0x0117;
const TAG_SUBIFD: u16 = 0x014A;
const TAG_JPEG_OFFSET: u16 = 0x0201;
const TAG_JPEG_LENGTH: u16 = 0x0202;
const TAG_CR2_SLICE: u16 = 0xC640;

const TYPE_SHORT: u16 = 3;
const COMPRESSION_JPEG_OLD: u32 = 6;
const COMPRESSION_JPEG: u32 = 7;

const MAX_IFDS: usize = 16;
const MAX_IFD_ENTRIES: u16 = 1000;
const MIN_SCANNED_PREVIEW: usize = 50_000;

const JPEG_START: [u8; 2] = [0xFF, 0xD8];
const JPEG_END: [u8; 2] = [0xFF, 0xD9];

// JPEG markers
const MARKER_SOS: u8 = 0xDA;
const MARKER_EOI: u8 = 0xD9;
const MARKER_DHT: u8 = 0xC4;
const MARKER_JPG: u8 = 0xC8;
const MARKER_DAC: u8 = 0xCC;

struct IfdEntry {
    tag: u16,
    typ: u16,
    count: u32,
    /// Offset of the 4-byte value/offset field inside the file.
    field_pos: usize,
}

struct TiffView<'a> {
    bytes: &'a [u8],
    little_endian: bool,
}

impl<'a> TiffView<'a> {
    fn new(bytes: &'a [u8]) -> Option<Self> {
        let header = bytes.get(..4)?;
        let little_endian = if header == TIFF_MAGIC_LE {
            true
        } else if header == TIFF_MAGIC_BE {
            false
        } else {
            return None;
        };
        Some(Self { bytes, little_endian })
    }

    fn u16_at(&self, pos: usize) -> Option<u16> {
        let b: [u8; 2] = self.bytes.get(pos..pos.checked_add(2)?)?.try_into().ok()?;
        Some(if self.little_endian { u16::from_le_bytes(b) } else { u16::from_be_bytes(b) })
    }

    fn u32_at(&self, pos: usize) -> Option<u32> {
        let b: [u8; 4] = self.bytes.get(pos..pos.checked_add(4)?)?.try_into().ok()?;
        Some(if self.little_endian { u32::from_le_bytes(b) } else { u32::from_be_bytes(b) })
    }

    /// Scalar value of a single-count entry; SHORTs sit in the first two bytes.
    fn value(&self, entry: &IfdEntry) -> Option<u32> {
        if entry.typ == TYPE_SHORT {
            self.u16_at(entry.field_pos).map(u32::from)
        } else {
            self.u32_at(entry.field_pos)
        }
    }

    fn ifd(&self, offset: u32) -> Option<(Vec<IfdEntry>, u32)> {
        let start = offset as usize;
        let entry_count = self.u16_at(start)?;
        if entry_count > MAX_IFD_ENTRIES {
            return None;
        }

        let entries = (0..entry_count as usize)
            .map(|i| {
                let pos = start + 2 + i * 12;
                Some(IfdEntry {
                    tag: self.u16_at(pos)?,
                    typ: self.u16_at(pos + 2)?,
                    count: self.u32_at(pos + 4)?,
                    field_pos: pos + 8,
                })
            })
            .collect::<Option<Vec<_>>>()?;

        let next = self.u32_at(start + 2 + entry_count as usize * 12).unwrap_or(0);
        Some((entries, next))
    }

    fn subifd_offsets(&self, entry: &IfdEntry) -> Vec<u32> {
        if entry.count == 1 {
            return self.value(entry).into_iter().collect();
        }
        let Some(array) = self.u32_at(entry.field_pos) else {
            return Vec::new();
        };
        (0..entry.count.min(MAX_IFDS as u32) as usize)
            .filter_map(|i| self.u32_at(array as usize + i * 4))
            .collect()
    }

    fn jpeg_slice(&self, offset: u32, length: u32) -> Option<&'a [u8]> {
        let start = offset as usize;
        let data = self.bytes.get(start..start.checked_add(length as usize)?)?;
        is_displayable_jpeg(data).then_some(data)
    }

    fn candidates_in(&self, entries: &[IfdEntry]) -> Vec<&'a [u8]> {
        let find = |tag: u16| {
            entries
                .iter()
                .find(|e| e.tag == tag && e.count == 1)
                .and_then(|e| self.value(e))
        };

        let mut found = Vec::new();
        if let (Some(offset), Some(length)) = (find(TAG_JPEG_OFFSET), find(TAG_JPEG_LENGTH)) {
            found.extend(self.jpeg_slice(offset, length));
        }

        let is_jpeg = matches!(find(TAG_COMPRESSION), Some(COMPRESSION_JPEG | COMPRESSION_JPEG_OLD));
        let is_sensor_data =
            find(TAG_NEW_SUBFILE_TYPE) == Some(0) || entries.iter().any(|e| e.tag == TAG_CR2_SLICE);
        if is_jpeg && !is_sensor_data {
            if let (Some(offset), Some(length)) = (find(TAG_STRIP_OFFSETS), find(TAG_STRIP_BYTE_COUNTS)) {
                found.extend(self.jpeg_slice(offset, length));
            }
        }
        found
    }

    fn previews(&self) -> Vec<&'a [u8]> {
        let mut previews = Vec::new();
        let mut visited = Vec::new();
        let mut pending = self.u32_at(4).into_iter().collect::<Vec<_>>();

        while let Some(offset) = pending.pop() {
            if offset == 0 || visited.contains(&offset) || visited.len() >= MAX_IFDS {
                continue;
            }
            visited.push(offset);

            let Some((entries, next)) = self.ifd(offset) else {
                continue;
            };
            previews.extend(self.candidates_in(&entries));
            for entry in entries.iter().filter(|e| e.tag == TAG_SUBIFD) {
                pending.extend(self.subifd_offsets(entry));
            }
            pending.push(next);
        }
        previews
    }
}

/// Returns the first start-of-frame marker of a JPEG stream, walking the
/// marker segments that precede it.
fn sof_marker(jpeg: &[u8]) -> Option<u8> {
    if jpeg.get(..2)? != JPEG_START {
        return None;
    }
    let mut pos = 2;
    loop {
        if *jpeg.get(pos)? != 0xFF {
            return None;
        }
        while *jpeg.get(pos)? == 0xFF {
            pos += 1;
        }
        let marker = jpeg[pos];
        pos += 1;
        match marker {
            0x01 | 0xD0..=0xD7 => continue,
            MARKER_SOS | MARKER_EOI => return None,
            MARKER_DHT | MARKER_JPG | MARKER_DAC => {}
            0xC0..=0xCF => return Some(marker),
            _ => {}
        }
        let length = u16::from_be_bytes([*jpeg.get(pos)?, *jpeg.get(pos + 1)?]);
        pos += length as usize;
    }
}

/// SOF0 (baseline), SOF1 (extended) or SOF2 (progressive). Lossless and
/// arithmetic-coded streams hold sensor data, not something a viewer shows.
fn is_displayable_jpeg(jpeg: &[u8]) -> bool {
    matches!(sof_marker(jpeg), Some(0xC0..=0xC2))
}

/// Scan for an SOI..EOI run large enough to be a preview rather than an
/// EXIF thumbnail nested inside one.
fn scan_for_jpeg(bytes: &[u8]) -> Option<&[u8]> {
    let mut i = 0;
    while i + 3 < bytes.len() {
        if bytes[i..i + 2] == JPEG_START && bytes[i + 2] == 0xFF {
            let run = bytes[i + 2..]
                .windows(2)
                .enumerate()
                .filter(|(_, w)| *w == JPEG_END)
                .map(|(j, _)| &bytes[i..i + 2 + j + 2])
                .find(|jpeg| jpeg.len() > MIN_SCANNED_PREVIEW && is_displayable_jpeg(jpeg));
            if run.is_some() {
                return run;
            }
        }
        i += 1;
    }
    None
}

/// Returns the largest embedded JPEG preview, or `None` if the file has none.
pub(crate) fn extract_embedded_jpeg(bytes: &[u8]) -> Option<Vec<u8>> {
    let from_ifds = TiffView::new(bytes)
        .map(|view| view.previews())
        .unwrap_or_default()
        .into_iter()
        .max_by_key(|jpeg| jpeg.len());

    from_ifds.or_else(|| scan_for_jpeg(bytes)).map(<[u8]>::to_vec)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// SOI, a one-component 16x16 frame header with the given SOF marker,
    /// `fill` bytes standing in for scan data, and EOI.
    fn jpeg_with_sof(len: usize, sof: u8, fill: u8) -> Vec<u8> {
        let mut jpeg = vec![0xFF, 0xD8, 0xFF, sof, 0x00, 0x0B, 8, 0x00, 0x10, 0x00, 0x10, 1, 1, 0x11, 0];
        jpeg.resize(len - 2, fill);
        jpeg.extend_from_slice(&JPEG_END);
        jpeg
    }

    fn fake_jpeg(len: usize, fill: u8) -> Vec<u8> {
        jpeg_with_sof(len, 0xC0, fill)
    }

    /// Compression, strip offset and strip length, plus any extra entries.
    fn strip_ifd(compression: u32, offset: u32, length: u32, extra: &[Vec<u8>], next: u32) -> Vec<u8> {
        let mut entries = extra.to_vec();
        entries.push(entry(TAG_COMPRESSION, TYPE_SHORT, compression));
        entries.push(entry(TAG_STRIP_OFFSETS, 4, offset));
        entries.push(entry(TAG_STRIP_BYTE_COUNTS, 4, length));
        entries.sort_by_key(|e| u16::from_le_bytes([e[0], e[1]]));
        ifd(&entries, next)
    }

    fn ifd_len(entries: usize) -> u32 {
        2 + 12 * entries as u32 + 4
    }

    fn entry(tag: u16, typ: u16, value: u32) -> Vec<u8> {
        let mut e = Vec::new();
        e.extend_from_slice(&tag.to_le_bytes());
        e.extend_from_slice(&typ.to_le_bytes());
        e.extend_from_slice(&1u32.to_le_bytes());
        e.extend_from_slice(&value.to_le_bytes());
        e
    }

    fn ifd(entries: &[Vec<u8>], next: u32) -> Vec<u8> {
        let mut out = (entries.len() as u16).to_le_bytes().to_vec();
        for e in entries {
            out.extend_from_slice(e);
        }
        out.extend_from_slice(&next.to_le_bytes());
        out
    }

    /// IFD0 references a small JPEG directly and a SubIFD with a larger one.
    fn tiff_with_two_previews() -> (Vec<u8>, Vec<u8>, Vec<u8>) {
        let small = fake_jpeg(64, 0x11);
        let large = fake_jpeg(256, 0x22);

        // header(8) + IFD0 with 3 entries (2 + 36 + 4 = 42) + SubIFD with 2 entries (2 + 24 + 4 = 30)
        let ifd0_at = 8u32;
        let subifd_at = ifd0_at + 42;
        let small_at = subifd_at + 30;
        let large_at = small_at + small.len() as u32;

        let mut file = TIFF_MAGIC_LE.to_vec();
        file.extend_from_slice(&ifd0_at.to_le_bytes());
        file.extend(ifd(
            &[
                entry(TAG_SUBIFD, 4, subifd_at),
                entry(TAG_JPEG_OFFSET, 4, small_at),
                entry(TAG_JPEG_LENGTH, 4, small.len() as u32),
            ],
            0,
        ));
        file.extend(ifd(
            &[
                entry(TAG_JPEG_OFFSET, 4, large_at),
                entry(TAG_JPEG_LENGTH, 4, large.len() as u32),
            ],
            0,
        ));
        file.extend_from_slice(&small);
        file.extend_from_slice(&large);
        (file, small, large)
    }

    #[test]
    fn test_largest_preview_wins() {
        let (file, _small, large) = tiff_with_two_previews();
        assert_eq!(extract_embedded_jpeg(&file), Some(large));
    }

    #[test]
    fn test_strip_preview_needs_jpeg_compression() {
        let jpeg = fake_jpeg(40, 0x33);
        let data_at = 8 + 2 + 3 * 12 + 4;

        let build = |compression: u32| {
            let mut file = TIFF_MAGIC_LE.to_vec();
            file.extend_from_slice(&8u32.to_le_bytes());
            file.extend(ifd(
                &[
                    entry(TAG_COMPRESSION, TYPE_SHORT, compression),
                    entry(TAG_STRIP_OFFSETS, 4, data_at),
                    entry(TAG_STRIP_BYTE_COUNTS, 4, jpeg.len() as u32),
                ],
                0,
            ));
            file.extend_from_slice(&jpeg);
            file
        };

        assert_eq!(extract_embedded_jpeg(&build(COMPRESSION_JPEG)), Some(jpeg.clone()));
        assert_eq!(extract_embedded_jpeg(&build(1)), None);
    }

    #[test]
    fn test_lossless_raw_strip_is_not_a_preview() {
        // CR2 layout: IFD0 holds the baseline preview strip, a later IFD the
        // larger lossless sensor strip.
        let preview = fake_jpeg(202, 0x11);
        let mut sensor = vec![0xFF, 0xD8, 0xFF, MARKER_DHT];
        sensor.resize(2000, 0x22);
        sensor.extend_from_slice(&JPEG_END);

        let ifd0_at = 8u32;
        let ifd1_at = ifd0_at + ifd_len(3);
        let preview_at = ifd1_at + ifd_len(3);
        let sensor_at = preview_at + preview.len() as u32;

        let mut file = TIFF_MAGIC_LE.to_vec();
        file.extend_from_slice(&ifd0_at.to_le_bytes());
        file.extend(strip_ifd(COMPRESSION_JPEG_OLD, preview_at, preview.len() as u32, &[], ifd1_at));
        file.extend(strip_ifd(COMPRESSION_JPEG_OLD, sensor_at, sensor.len() as u32, &[], 0));
        file.extend_from_slice(&preview);
        file.extend_from_slice(&sensor);

        assert_eq!(extract_embedded_jpeg(&file), Some(preview));
    }

    #[test]
    fn test_full_resolution_ifd_strips_are_skipped() {
        // A lossless SOF3 stream, and a baseline-looking stream in an IFD
        // flagged as the full-resolution image or as a sliced CR2 raw.
        let preview = fake_jpeg(100, 0x11);
        let lossless = jpeg_with_sof(400, 0xC3, 0x22);
        let flagged = fake_jpeg(500, 0x33);
        let sliced = fake_jpeg(600, 0x44);

        let ifd0_at = 8u32;
        let ifd1_at = ifd0_at + ifd_len(4);
        let ifd2_at = ifd1_at + ifd_len(3);
        let ifd3_at = ifd2_at + ifd_len(4);
        let preview_at = ifd3_at + ifd_len(4);
        let lossless_at = preview_at + preview.len() as u32;
        let flagged_at = lossless_at + lossless.len() as u32;
        let sliced_at = flagged_at + flagged.len() as u32;

        let mut file = TIFF_MAGIC_LE.to_vec();
        file.extend_from_slice(&ifd0_at.to_le_bytes());
        file.extend(strip_ifd(
            COMPRESSION_JPEG_OLD,
            preview_at,
            preview.len() as u32,
            &[entry(TAG_NEW_SUBFILE_TYPE, 4, 1)],
            ifd1_at,
        ));
        file.extend(strip_ifd(COMPRESSION_JPEG, lossless_at, lossless.len() as u32, &[], ifd2_at));
        file.extend(strip_ifd(
            COMPRESSION_JPEG,
            flagged_at,
            flagged.len() as u32,
            &[entry(TAG_NEW_SUBFILE_TYPE, 4, 0)],
            ifd3_at,
        ));
        file.extend(strip_ifd(
            COMPRESSION_JPEG_OLD,
            sliced_at,
            sliced.len() as u32,
            &[entry(TAG_CR2_SLICE, TYPE_SHORT, 1)],
            0,
        ));
        file.extend_from_slice(&preview);
        file.extend_from_slice(&lossless);
        file.extend_from_slice(&flagged);
        file.extend_from_slice(&sliced);

        assert_eq!(extract_embedded_jpeg(&file), Some(preview));
    }

    #[test]
    fn test_sof_marker_walks_segments() {
        let mut jpeg = vec![0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x04, 0xAA, 0xBB, 0xFF, 0xFF, 0xC2, 0x00, 0x02];
        jpeg.extend_from_slice(&JPEG_END);
        assert_eq!(sof_marker(&jpeg), Some(0xC2));
        assert!(is_displayable_jpeg(&jpeg));

        assert_eq!(sof_marker(&jpeg_with_sof(64, 0xC3, 0)), Some(0xC3));
        assert!(!is_displayable_jpeg(&jpeg_with_sof(64, 0xC3, 0)));
        assert_eq!(sof_marker(&[0xFF, 0xD8, 0xFF, 0xDA, 0x00, 0x02]), None);
        assert_eq!(sof_marker(&[0xFF, 0xD8, 0xFF, 0xE1, 0xFF, 0xFF]), None);
    }

    #[test]
    fn test_out_of_bounds_reference_is_ignored() {
        let mut file = TIFF_MAGIC_LE.to_vec();
        file.extend_from_slice(&8u32.to_le_bytes());
        file.extend(ifd(
            &[
                entry(TAG_JPEG_OFFSET, 4, 10_000),
                entry(TAG_JPEG_LENGTH, 4, 500),
            ],
            0,
        ));
        assert_eq!(extract_embedded_jpeg(&file), None);
    }

    #[test]
    fn test_self_referencing_ifd_chain_terminates() {
        let mut file = TIFF_MAGIC_LE.to_vec();
        file.extend_from_slice(&8u32.to_le_bytes());
        file.extend(ifd(&[], 8));
        assert_eq!(extract_embedded_jpeg(&file), None);
    }

    #[test]
    fn test_marker_scan_for_non_tiff_containers() {
        let preview = fake_jpeg(MIN_SCANNED_PREVIEW + 10, 0x44);
        let mut file = b"FUJIFILMCCD-RAW 0201".to_vec();
        file.extend_from_slice(&preview);
        file.extend_from_slice(&[0u8; 32]);
        assert_eq!(extract_embedded_jpeg(&file), Some(preview));
    }

    #[test]
    fn test_garbage_has_no_preview() {
        assert_eq!(extract_embedded_jpeg(b"not a raw file at all"), None);
        assert_eq!(extract_embedded_jpeg(&[]), None);
    }
}
