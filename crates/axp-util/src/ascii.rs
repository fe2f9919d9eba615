//! ASCII <-> UTF-16LE conversion for VHDX on-disk text fields (the 512-byte
//! creator string carried in the file identifier region).

/// Errors from ASCII/UTF-16 conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvertError {
    /// Input contained a byte outside the 7-bit ASCII range.
    NotAscii,
    /// The destination buffer is too small to hold the converted text.
    TooBig,
}

/// Encodes `text` (which must be ASCII) as UTF-16LE code units into `out`,
/// zero-padding any remaining slots.
pub fn ascii_to_utf16(text: &str, out: &mut [u16]) -> Result<(), ConvertError> {
    if !text.is_ascii() {
        return Err(ConvertError::NotAscii);
    }
    if text.len() > out.len() {
        return Err(ConvertError::TooBig);
    }
    let mut bytes = text.bytes();
    for slot in out.iter_mut() {
        *slot = u16::from(bytes.next().unwrap_or(0));
    }
    Ok(())
}

/// Decodes a UTF-16LE buffer back to an ASCII `String`, stopping at the
/// first NUL code unit or the first unit outside the ASCII range.
#[must_use]
pub fn utf16_to_ascii(units: &[u16]) -> String {
    units
        .iter()
        .take_while(|&&u| u != 0 && u < 0x80)
        .map(|&u| u as u8 as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let mut buf = [0u16; 32];
        ascii_to_utf16("Digital Alpha AXP Emulator", &mut buf).unwrap();
        assert_eq!(utf16_to_ascii(&buf), "Digital Alpha AXP Emulator");
    }

    #[test]
    fn rejects_non_ascii() {
        let mut buf = [0u16; 8];
        assert_eq!(
            ascii_to_utf16("caf\u{e9}", &mut buf),
            Err(ConvertError::NotAscii)
        );
    }

    #[test]
    fn rejects_overflow() {
        let mut buf = [0u16; 2];
        assert_eq!(
            ascii_to_utf16("too long", &mut buf),
            Err(ConvertError::TooBig)
        );
    }

    #[test]
    fn trailing_zero_padding_is_not_decoded() {
        let mut buf = [0u16; 16];
        ascii_to_utf16("hi", &mut buf).unwrap();
        assert_eq!(utf16_to_ascii(&buf), "hi");
    }
}
