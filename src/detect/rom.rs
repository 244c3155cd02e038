use crate::config::{HTML_SNIFF_BYTES, MIN_ROM_SIZE};
use crate::error::VerificationError;

#[derive(Debug, PartialEq)]
pub enum RomFormat {
    Gba,
    Unknown,
}

/// Offset of the fixed header byte in a GBA cartridge header.
const GBA_FIXED_OFFSET: usize = 0xB2;
const GBA_FIXED_VALUE: u8 = 0x96;
/// Header checksum covers 0xA0..=0xBC and is stored at 0xBD.
const GBA_CHECKSUM_OFFSET: usize = 0xBD;

/// Check that `data` plausibly is a ROM image rather than an error response.
///
/// This is a heuristic: content that passes may still be corrupt.
pub fn validate(data: &[u8], name: &str) -> Result<(), VerificationError> {
    if data.len() < MIN_ROM_SIZE {
        return Err(VerificationError::TooSmall {
            name: name.to_string(),
            len: data.len(),
        });
    }

    if looks_like_html(data) {
        return Err(VerificationError::LooksLikeHtml {
            name: name.to_string(),
        });
    }

    Ok(())
}

/// Lossily decode the first bytes and look for markup an error page would start with.
pub fn looks_like_html(data: &[u8]) -> bool {
    let prefix = &data[..data.len().min(HTML_SNIFF_BYTES)];
    let text = String::from_utf8_lossy(prefix).to_lowercase();
    text.contains("<html") || text.contains("<!doctype")
}

/// Sniff the cartridge format from header bytes.
pub fn detect_format(data: &[u8]) -> RomFormat {
    if data.len() > GBA_CHECKSUM_OFFSET && data[GBA_FIXED_OFFSET] == GBA_FIXED_VALUE {
        return RomFormat::Gba;
    }
    RomFormat::Unknown
}

/// Compute the GBA header complement checksum over 0xA0..=0xBC.
/// Returns `None` if the header is truncated.
pub fn gba_header_checksum(data: &[u8]) -> Option<u8> {
    if data.len() <= GBA_CHECKSUM_OFFSET {
        return None;
    }
    let sum = data[0xA0..GBA_CHECKSUM_OFFSET]
        .iter()
        .fold(0u8, |acc, b| acc.wrapping_sub(*b));
    Some(sum.wrapping_sub(0x19))
}

/// Whether the stored header checksum matches the computed one.
pub fn gba_checksum_ok(data: &[u8]) -> bool {
    gba_header_checksum(data).is_some_and(|c| c == data[GBA_CHECKSUM_OFFSET])
}
