use crate::{
    error::{CredentialError, StoreError},
    layout::{decode_text, Field, CREDENTIAL_SPAN, SIGNAL_SPAN},
    store::NonVolatileStore,
};

/// Protocol identifiers as reported by the IR decoder.
pub mod protocol {
    pub const UNUSED: u32 = 0;
    pub const RC5: u32 = 1;
    pub const RC6: u32 = 2;
    pub const NEC: u32 = 3;
    pub const SONY: u32 = 4;
    pub const PANASONIC: u32 = 5;
    pub const JVC: u32 = 6;
    pub const SAMSUNG: u32 = 7;
    pub const WHYNTER: u32 = 8;
    pub const AIWA_RC_T501: u32 = 9;
    pub const LG: u32 = 10;
    pub const SANYO: u32 = 11;
    pub const MITSUBISHI: u32 = 12;
    pub const DISH: u32 = 13;
    pub const SHARP: u32 = 14;
    pub const COOLIX: u32 = 15;
    pub const DAIKIN: u32 = 16;
    pub const DENON: u32 = 17;

    pub fn name(id: u32) -> &'static str {
        match id {
            UNUSED => "UNUSED",
            RC5 => "RC5",
            RC6 => "RC6",
            NEC => "NEC",
            SONY => "SONY",
            PANASONIC => "PANASONIC",
            JVC => "JVC",
            SAMSUNG => "SAMSUNG",
            WHYNTER => "WHYNTER",
            AIWA_RC_T501 => "AIWA_RC_T501",
            LG => "LG",
            SANYO => "SANYO",
            MITSUBISHI => "MITSUBISHI",
            DISH => "DISH",
            SHARP => "SHARP",
            COOLIX => "COOLIX",
            DAIKIN => "DAIKIN",
            DENON => "DENON",
            _ => "UNKNOWN",
        }
    }
}

/// Value the receiver reports for a protocol it could not identify.
pub const PROTOCOL_SENTINEL: u32 = u32::MAX;

/// One decode result from the IR receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapturedSignal {
    pub value: u64,
    pub protocol: u32,
}

impl CapturedSignal {
    /// True when either half carries the receiver's all-ones error fill.
    pub fn is_sentinel(&self) -> bool {
        self.value == u64::MAX
            || self.value == u64::from(u32::MAX)
            || self.protocol == PROTOCOL_SENTINEL
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CredentialRecord {
    pub ssid: String,
    pub password: String,
}

impl CredentialRecord {
    /// Validates a submitted pair before anything touches the store.
    pub fn new(
        ssid: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self, CredentialError> {
        let record = Self {
            ssid: ssid.into(),
            password: password.into(),
        };
        if record.ssid.is_empty() {
            return Err(CredentialError::EmptySsid);
        }
        if record.password.is_empty() {
            return Err(CredentialError::EmptyPassword);
        }
        Field::Ssid
            .check_len(record.ssid.as_bytes())
            .map_err(CredentialError::TooLong)?;
        Field::Password
            .check_len(record.password.as_bytes())
            .map_err(CredentialError::TooLong)?;
        Ok(record)
    }

    pub fn load(store: &impl NonVolatileStore) -> Result<Self, StoreError> {
        Ok(Self {
            ssid: read_text(store, Field::Ssid)?,
            password: read_text(store, Field::Password)?,
        })
    }

    /// Clears both credential fields, writes the new pair and commits once.
    /// A failed commit leaves the previous pair in place.
    pub fn persist(&self, store: &mut impl NonVolatileStore) -> Result<(), StoreError> {
        Field::Ssid.check_len(self.ssid.as_bytes())?;
        Field::Password.check_len(self.password.as_bytes())?;

        store.update(|store| {
            store.clear_range(CREDENTIAL_SPAN.start, CREDENTIAL_SPAN.end)?;
            store.write_field(Field::Ssid.offset(), self.ssid.as_bytes())?;
            store.write_field(Field::Password.offset(), self.password.as_bytes())
        })
    }
}

/// Learned command as stored: hex value text plus protocol text.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SignalRecord {
    pub signal_code: String,
    pub brand_code: String,
}

impl SignalRecord {
    pub fn from_capture(capture: &CapturedSignal) -> Self {
        Self {
            signal_code: format!("{:x}", capture.value),
            brand_code: format!("{:x}", capture.protocol),
        }
    }

    pub fn load(store: &impl NonVolatileStore) -> Result<Self, StoreError> {
        Ok(Self {
            signal_code: read_text(store, Field::SignalCode)?,
            brand_code: read_text(store, Field::BrandCode)?,
        })
    }

    pub fn persist(&self, store: &mut impl NonVolatileStore) -> Result<(), StoreError> {
        Field::SignalCode.check_len(self.signal_code.as_bytes())?;
        Field::BrandCode.check_len(self.brand_code.as_bytes())?;

        store.update(|store| {
            store.clear_range(SIGNAL_SPAN.start, SIGNAL_SPAN.end)?;
            store.write_field(Field::SignalCode.offset(), self.signal_code.as_bytes())?;
            store.write_field(Field::BrandCode.offset(), self.brand_code.as_bytes())
        })
    }

    pub fn is_empty(&self) -> bool {
        self.signal_code.is_empty() && self.brand_code.is_empty()
    }

    /// Brand text is read back as decimal; the ids with transmitters bound
    /// are below ten, where hex and decimal spell the same.
    pub fn decode(&self) -> LearnedCommand {
        LearnedCommand {
            value: parse_hex_prefix(&self.signal_code),
            protocol: parse_decimal_prefix(&self.brand_code),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LearnedCommand {
    pub value: u64,
    pub protocol: u32,
}

fn read_text(store: &impl NonVolatileStore, field: Field) -> Result<String, StoreError> {
    let raw = store.read_field(field.offset(), field.max_len())?;
    Ok(decode_text(raw))
}

/// Parses leading hex digits (optionally `0x`-prefixed), saturating on
/// overflow. Text without digits yields zero.
pub fn parse_hex_prefix(text: &str) -> u64 {
    let trimmed = text.trim_start();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);

    let mut value: u64 = 0;
    for ch in digits.chars() {
        let Some(digit) = ch.to_digit(16) else {
            break;
        };
        value = match value.checked_mul(16).and_then(|v| v.checked_add(u64::from(digit))) {
            Some(next) => next,
            None => return u64::MAX,
        };
    }
    value
}

/// Parses leading decimal digits. Negative, overflowing or digit-free text
/// yields zero, which no transmitter is bound to.
pub fn parse_decimal_prefix(text: &str) -> u32 {
    let trimmed = text.trim_start();
    if trimmed.starts_with('-') {
        return 0;
    }
    let digits = trimmed.strip_prefix('+').unwrap_or(trimmed);

    let mut value: u32 = 0;
    for ch in digits.chars() {
        let Some(digit) = ch.to_digit(10) else {
            break;
        };
        value = match value.checked_mul(10).and_then(|v| v.checked_add(digit)) {
            Some(next) => next,
            None => return 0,
        };
    }
    value
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn credentials_survive_power_cycle() {
        let mut store = MemoryStore::default();
        let record = CredentialRecord::new("home", "secret").unwrap();
        record.persist(&mut store).unwrap();

        store.power_cycle();
        assert_eq!(CredentialRecord::load(&store).unwrap(), record);
    }

    #[test]
    fn credentials_at_full_field_width_round_trip() {
        let mut store = MemoryStore::default();
        let record = CredentialRecord::new("s".repeat(32), "p".repeat(64)).unwrap();
        record.persist(&mut store).unwrap();

        store.power_cycle();
        assert_eq!(CredentialRecord::load(&store).unwrap(), record);
    }

    #[test]
    fn credential_validation() {
        assert_eq!(
            CredentialRecord::new("", "secret"),
            Err(CredentialError::EmptySsid)
        );
        assert_eq!(
            CredentialRecord::new("home", ""),
            Err(CredentialError::EmptyPassword)
        );
        assert!(matches!(
            CredentialRecord::new("s".repeat(33), "secret"),
            Err(CredentialError::TooLong(StoreError::FieldOverflow { max: 32, .. }))
        ));
        assert!(matches!(
            CredentialRecord::new("home", "p".repeat(65)),
            Err(CredentialError::TooLong(StoreError::FieldOverflow { max: 64, .. }))
        ));
    }

    #[test]
    fn never_written_store_loads_empty_records() {
        let store = MemoryStore::default();
        assert_eq!(CredentialRecord::load(&store).unwrap(), CredentialRecord::default());
        let signal = SignalRecord::load(&store).unwrap();
        assert!(signal.is_empty());
        assert_eq!(signal.decode(), LearnedCommand::default());
    }

    #[test]
    fn signal_writes_leave_credentials_untouched() {
        for ssid_len in [1, 7, 32] {
            for pass_len in [1, 20, 64] {
                for signal_len in [1, 8, 16, 64] {
                    for brand_len in [1, 8] {
                        let mut store = MemoryStore::default();
                        let creds =
                            CredentialRecord::new("s".repeat(ssid_len), "p".repeat(pass_len))
                                .unwrap();
                        creds.persist(&mut store).unwrap();
                        let before = store.read_field(0, 96).unwrap().to_vec();

                        let signal = SignalRecord {
                            signal_code: "f".repeat(signal_len),
                            brand_code: "3".repeat(brand_len),
                        };
                        signal.persist(&mut store).unwrap();

                        assert_eq!(store.read_field(0, 96).unwrap(), before.as_slice());
                        assert_eq!(SignalRecord::load(&store).unwrap(), signal);
                    }
                }
            }
        }
    }

    #[test]
    fn credential_writes_leave_signal_untouched() {
        for signal_len in [1, 16, 64] {
            let mut store = MemoryStore::default();
            let signal = SignalRecord {
                signal_code: "a".repeat(signal_len),
                brand_code: "7".to_string(),
            };
            signal.persist(&mut store).unwrap();
            let before = store.read_field(96, 72).unwrap().to_vec();

            for (ssid_len, pass_len) in [(1, 1), (32, 64), (10, 3)] {
                CredentialRecord::new("s".repeat(ssid_len), "p".repeat(pass_len))
                    .unwrap()
                    .persist(&mut store)
                    .unwrap();
                assert_eq!(store.read_field(96, 72).unwrap(), before.as_slice());
            }
        }
    }

    #[test]
    fn shorter_signal_leaves_no_residue() {
        let mut store = MemoryStore::default();
        SignalRecord {
            signal_code: "20df10ef20df10ef".to_string(),
            brand_code: "12345678".to_string(),
        }
        .persist(&mut store)
        .unwrap();

        SignalRecord {
            signal_code: "ab".to_string(),
            brand_code: "3".to_string(),
        }
        .persist(&mut store)
        .unwrap();
        store.power_cycle();

        let raw = store.read_field(96, 72).unwrap();
        assert_eq!(&raw[..2], b"ab");
        assert!(raw[2..64].iter().all(|b| *b == 0));
        assert_eq!(&raw[64..65], b"3");
        assert!(raw[65..].iter().all(|b| *b == 0));
    }

    #[test]
    fn shorter_ssid_leaves_no_residue() {
        let mut store = MemoryStore::default();
        CredentialRecord::new("a-much-longer-network", "longpassword")
            .unwrap()
            .persist(&mut store)
            .unwrap();
        CredentialRecord::new("home", "pw")
            .unwrap()
            .persist(&mut store)
            .unwrap();

        let raw = store.read_field(0, 96).unwrap();
        assert!(raw[4..32].iter().all(|b| *b == 0));
        assert!(raw[34..96].iter().all(|b| *b == 0));
    }

    #[test]
    fn persist_commits_exactly_once() {
        let mut store = MemoryStore::default();
        CredentialRecord::new("home", "secret")
            .unwrap()
            .persist(&mut store)
            .unwrap();
        assert_eq!(store.commit_count(), 1);
    }

    #[test]
    fn failed_persist_reads_back_previous_record() {
        let mut store = MemoryStore::default();
        let old = SignalRecord {
            signal_code: "20df10ef".into(),
            brand_code: "3".into(),
        };
        old.persist(&mut store).unwrap();

        store.fail_commits(true);
        SignalRecord {
            signal_code: "e0e040bf".into(),
            brand_code: "7".into(),
        }
        .persist(&mut store)
        .unwrap_err();

        assert_eq!(SignalRecord::load(&store).unwrap(), old);
        assert_eq!(store.image(), store.durable_image());
    }

    #[test]
    fn capture_encoding_is_lowercase_hex() {
        let record = SignalRecord::from_capture(&CapturedSignal {
            value: 0x20DF_10EF,
            protocol: protocol::NEC,
        });
        assert_eq!(record.signal_code, "20df10ef");
        assert_eq!(record.brand_code, "3");

        let wide = SignalRecord::from_capture(&CapturedSignal {
            value: 0xE0E0_40BF,
            protocol: 0x0000_0FFE,
        });
        assert_eq!(wide.brand_code, "ffe");
    }

    #[test]
    fn sentinel_detection() {
        let valid = CapturedSignal {
            value: 0x20DF_10EF,
            protocol: protocol::NEC,
        };
        assert!(!valid.is_sentinel());
        assert!(CapturedSignal { value: u64::MAX, ..valid }.is_sentinel());
        assert!(CapturedSignal { value: 0xFFFF_FFFF, ..valid }.is_sentinel());
        assert!(CapturedSignal { protocol: u32::MAX, ..valid }.is_sentinel());
    }

    #[test]
    fn decode_parses_hex_value_and_decimal_brand() {
        let record = SignalRecord {
            signal_code: "20df10ef".to_string(),
            brand_code: "3".to_string(),
        };
        assert_eq!(
            record.decode(),
            LearnedCommand {
                value: 0x20DF_10EF,
                protocol: 3,
            }
        );
    }

    #[test]
    fn prefix_parsers_mirror_stream_extraction() {
        assert_eq!(parse_hex_prefix("0x1F"), 0x1F);
        assert_eq!(parse_hex_prefix("  abcz12"), 0xABC);
        assert_eq!(parse_hex_prefix(""), 0);
        assert_eq!(parse_hex_prefix("zz"), 0);
        assert_eq!(parse_hex_prefix(&"f".repeat(17)), u64::MAX);

        assert_eq!(parse_decimal_prefix("99"), 99);
        assert_eq!(parse_decimal_prefix("7abc"), 7);
        assert_eq!(parse_decimal_prefix("+12"), 12);
        assert_eq!(parse_decimal_prefix("-3"), 0);
        assert_eq!(parse_decimal_prefix(""), 0);
        assert_eq!(parse_decimal_prefix("99999999999"), 0);
    }
}
