use rand::RngExt;

/// Generate a random RFC4122 v4 GUID as raw 16 bytes
pub fn generate_guid_bytes() -> [u8; 16] {
    let mut bytes = [0u8; 16];
    let mut rng = rand::rng();
    rng.fill(&mut bytes);
    // RFC4122 v4, with the version nibble in the little-endian Data3 field
    bytes[7] = (bytes[7] & 0x0f) | 0x40;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;
    bytes
}

/// Format on-disk CLSID bytes as `XXXXXXXX-XXXX-XXXX-XXXX-XXXXXXXXXXXX`.
///
/// The first three groups are stored little-endian (mixed-endian GUID layout),
/// the last two groups are stored in byte order.
pub fn format_clsid(bytes: &[u8; 16]) -> String {
    format!(
        "{:08X}-{:04X}-{:04X}-{:02X}{:02X}-{:02X}{:02X}{:02X}{:02X}{:02X}{:02X}",
        u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
        u16::from_le_bytes([bytes[4], bytes[5]]),
        u16::from_le_bytes([bytes[6], bytes[7]]),
        bytes[8],
        bytes[9],
        bytes[10],
        bytes[11],
        bytes[12],
        bytes[13],
        bytes[14],
        bytes[15],
    )
}

/// Parse a canonical GUID string into on-disk CLSID bytes.
///
/// Accepts `XXXXXXXX-XXXX-XXXX-XXXX-XXXXXXXXXXXX`, optionally wrapped in braces.
/// Hex digits may be upper or lower case.
///
/// # Examples
///
/// ```
/// use flacfb::common::id::parse_clsid;
/// let bytes = parse_clsid("00020906-0000-0000-C000-000000000046").unwrap();
/// assert_eq!(&bytes[0..4], &[0x06, 0x09, 0x02, 0x00]);
/// assert_eq!(bytes[15], 0x46);
/// ```
pub fn parse_clsid(text: &str) -> Option<[u8; 16]> {
    let text = text.trim();
    let text = match (text.strip_prefix('{'), text.ends_with('}')) {
        (Some(inner), true) => &inner[..inner.len() - 1],
        (None, false) => text,
        _ => return None,
    };

    let groups: Vec<&str> = text.split('-').collect();
    if groups.len() != 5
        || groups
            .iter()
            .zip([8usize, 4, 4, 4, 12])
            .any(|(group, width)| group.len() != width)
    {
        return None;
    }

    let data1 = u32::from_str_radix(groups[0], 16).ok()?;
    let data2 = u16::from_str_radix(groups[1], 16).ok()?;
    let data3 = u16::from_str_radix(groups[2], 16).ok()?;

    let mut bytes = [0u8; 16];
    bytes[0..4].copy_from_slice(&data1.to_le_bytes());
    bytes[4..6].copy_from_slice(&data2.to_le_bytes());
    bytes[6..8].copy_from_slice(&data3.to_le_bytes());

    let tail = format!("{}{}", groups[3], groups[4]);
    for (i, slot) in bytes[8..].iter_mut().enumerate() {
        *slot = u8::from_str_radix(tail.get(i * 2..i * 2 + 2)?, 16).ok()?;
    }
    Some(bytes)
}
