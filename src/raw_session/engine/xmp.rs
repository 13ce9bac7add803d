//! Locates the XMP packet embedded in a RAW container.

const PACKET_BEGIN: &[u8] = b"<?xpacket begin";
const PACKET_END: &[u8] = b"<?xpacket end";
const PI_CLOSE: &[u8] = b"?>";
const META_OPEN: &[u8] = b"<x:xmpmeta";
const META_CLOSE: &[u8] = b"</x:xmpmeta>";

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from >= haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|pos| pos + from)
}

/// Returns the first complete XMP packet, wrapper included. Falls back to a
/// bare `<x:xmpmeta>` element when the packet wrapper is missing.
pub(crate) fn find_xmp_packet(bytes: &[u8]) -> Option<&[u8]> {
    if let Some(start) = find(bytes, PACKET_BEGIN, 0) {
        if let Some(end_pi) = find(bytes, PACKET_END, start) {
            if let Some(close) = find(bytes, PI_CLOSE, end_pi) {
                return Some(&bytes[start..close + PI_CLOSE.len()]);
            }
        }
    }

    let start = find(bytes, META_OPEN, 0)?;
    let close = find(bytes, META_CLOSE, start)?;
    Some(&bytes[start..close + META_CLOSE.len()])
}

#[cfg(test)]
mod tests {
    use super::*;

    const PACKET: &str = "<?xpacket begin=\"\u{feff}\" id=\"W5M0MpCehiHzreSzNTczkc9d\"?>\
        <x:xmpmeta xmlns:x=\"adobe:ns:meta/\"><rdf:RDF/></x:xmpmeta>\
        <?xpacket end=\"w\"?>";

    #[test]
    fn test_packet_found_inside_binary_data() {
        let mut file = vec![0u8, 0x4d, 0x4d, 0x00, 0x2a];
        file.extend_from_slice(PACKET.as_bytes());
        file.extend_from_slice(&[0xff, 0xd8, 0x00]);

        assert_eq!(find_xmp_packet(&file), Some(PACKET.as_bytes()));
    }

    #[test]
    fn test_bare_xmpmeta_fallback() {
        let body = b"junk<x:xmpmeta xmlns:x=\"adobe:ns:meta/\"></x:xmpmeta>junk";
        let packet = find_xmp_packet(body).unwrap();
        assert!(packet.starts_with(b"<x:xmpmeta"));
        assert!(packet.ends_with(b"</x:xmpmeta>"));
    }

    #[test]
    fn test_absent_or_unterminated_packet() {
        assert_eq!(find_xmp_packet(b"no metadata here"), None);
        assert_eq!(find_xmp_packet(b"<x:xmpmeta never closed"), None);
        assert_eq!(find_xmp_packet(b""), None);
    }
}
