use std::ops::Range;

use crate::error::StoreError;

/// Bytes covered by the four record fields.
pub const RECORD_LEN: usize = 168;

/// Size of the store image the firmware reserves; everything past
/// [`RECORD_LEN`] is unused.
pub const DEFAULT_STORE_CAPACITY: usize = 512;

/// Fill pattern of never-written flash.
pub const ERASED_BYTE: u8 = 0xFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Ssid,
    Password,
    SignalCode,
    BrandCode,
}

impl Field {
    pub const ALL: [Field; 4] = [
        Field::Ssid,
        Field::Password,
        Field::SignalCode,
        Field::BrandCode,
    ];

    pub const fn offset(self) -> usize {
        match self {
            Self::Ssid => 0,
            Self::Password => 32,
            Self::SignalCode => 96,
            Self::BrandCode => 160,
        }
    }

    pub const fn max_len(self) -> usize {
        match self {
            Self::Ssid => 32,
            Self::Password => 64,
            Self::SignalCode => 64,
            Self::BrandCode => 8,
        }
    }

    pub const fn range(self) -> Range<usize> {
        self.offset()..self.offset() + self.max_len()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ssid => "ssid",
            Self::Password => "password",
            Self::SignalCode => "signal code",
            Self::BrandCode => "brand code",
        }
    }

    /// Rejects values that would spill into the next field.
    pub fn check_len(self, value: &[u8]) -> Result<(), StoreError> {
        if value.len() > self.max_len() {
            return Err(StoreError::FieldOverflow {
                field: self.as_str(),
                max: self.max_len(),
                len: value.len(),
            });
        }
        Ok(())
    }
}

/// Span cleared before credentials are rewritten.
pub const CREDENTIAL_SPAN: Range<usize> = Field::Ssid.offset()..Field::SignalCode.offset();

/// Span cleared before a learned command is rewritten.
pub const SIGNAL_SPAN: Range<usize> = Field::SignalCode.offset()..RECORD_LEN;

/// Reads field bytes as text, stopping at the first zero or erased byte.
pub fn decode_text(raw: &[u8]) -> String {
    let end = raw
        .iter()
        .position(|byte| *byte == 0 || *byte == ERASED_BYTE)
        .unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fields_tile_the_record_without_overlap() {
        let mut covered = [0_u8; RECORD_LEN];
        for field in Field::ALL {
            for index in field.range() {
                covered[index] += 1;
            }
        }
        assert!(covered.iter().all(|count| *count == 1));
        assert_eq!(Field::BrandCode.range().end, RECORD_LEN);
    }

    #[test]
    fn spans_match_field_boundaries() {
        assert_eq!(CREDENTIAL_SPAN, 0..96);
        assert_eq!(SIGNAL_SPAN, 96..168);
    }

    #[test]
    fn decode_stops_at_zero_or_erased_fill() {
        assert_eq!(decode_text(b"home\0\0\0"), "home");
        assert_eq!(decode_text(&[b'a', b'b', 0xFF, b'c']), "ab");
        assert_eq!(decode_text(&[0xFF; 32]), "");
        assert_eq!(decode_text(b"full"), "full");
    }

    #[test]
    fn overflow_is_rejected() {
        assert!(Field::BrandCode.check_len(b"12345678").is_ok());
        assert_eq!(
            Field::BrandCode.check_len(b"123456789"),
            Err(StoreError::FieldOverflow {
                field: "brand code",
                max: 8,
                len: 9,
            })
        );
    }
}
