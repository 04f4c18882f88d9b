//! Pulse-distance framing for the two protocols the bridge can replay.
//!
//! Timings are raw microsecond arrays that alternate mark and space,
//! starting with a mark, the same shape the RMT peripheral consumes.

use crate::record::{protocol, CapturedSignal, PROTOCOL_SENTINEL};

const BIT_MARK_US: u16 = 560;
const ONE_SPACE_US: u16 = 1_690;
const ZERO_SPACE_US: u16 = 560;
const FRAME_BITS: usize = 32;

const NEC_HEADER_MARK_US: u16 = 9_000;
const NEC_HEADER_SPACE_US: u16 = 4_500;
const NEC_REPEAT_SPACE_US: u16 = 2_250;

const SAMSUNG_HEADER_MARK_US: u16 = 4_500;
const SAMSUNG_HEADER_SPACE_US: u16 = 4_500;

/// Percent a measured duration may stray from the nominal one.
const TOLERANCE_PERCENT: u32 = 30;

/// Shortest burst train worth reporting; anything shorter is noise.
const MIN_FRAME_TIMINGS: usize = 4;

/// NEC frame carrying the low 32 bits of `value`, most significant first.
pub fn encode_nec(value: u64) -> Vec<u16> {
    encode(NEC_HEADER_MARK_US, NEC_HEADER_SPACE_US, value)
}

pub fn encode_samsung(value: u64) -> Vec<u16> {
    encode(SAMSUNG_HEADER_MARK_US, SAMSUNG_HEADER_SPACE_US, value)
}

/// Encoder for `protocol`, if the bridge can transmit it.
pub fn encoder(protocol: u32) -> Option<fn(u64) -> Vec<u16>> {
    match protocol {
        protocol::NEC => Some(encode_nec),
        protocol::SAMSUNG => Some(encode_samsung),
        _ => None,
    }
}

fn encode(header_mark: u16, header_space: u16, value: u64) -> Vec<u16> {
    let mut raw = Vec::with_capacity(3 + FRAME_BITS * 2);
    raw.push(header_mark);
    raw.push(header_space);
    for bit in (0..FRAME_BITS).rev() {
        raw.push(BIT_MARK_US);
        raw.push(if value >> bit & 1 == 1 {
            ONE_SPACE_US
        } else {
            ZERO_SPACE_US
        });
    }
    raw.push(BIT_MARK_US);
    raw
}

/// Decodes one received burst train.
///
/// An NEC repeat burst decodes to the all-ones value, and a train that
/// matches neither protocol decodes to the unknown protocol id, both of
/// which the learning loop discards. Returns `None` for stray noise.
pub fn decode(raw: &[u16]) -> Option<CapturedSignal> {
    if raw.len() < MIN_FRAME_TIMINGS {
        return None;
    }

    let (header_mark, header_space) = (raw[0], raw[1]);
    if matches(header_mark, NEC_HEADER_MARK_US) {
        if matches(header_space, NEC_REPEAT_SPACE_US) {
            return Some(CapturedSignal {
                value: u64::from(u32::MAX),
                protocol: protocol::NEC,
            });
        }
        if matches(header_space, NEC_HEADER_SPACE_US) {
            if let Some(value) = decode_bits(&raw[2..]) {
                return Some(CapturedSignal {
                    value,
                    protocol: protocol::NEC,
                });
            }
        }
    } else if matches(header_mark, SAMSUNG_HEADER_MARK_US)
        && matches(header_space, SAMSUNG_HEADER_SPACE_US)
    {
        if let Some(value) = decode_bits(&raw[2..]) {
            return Some(CapturedSignal {
                value,
                protocol: protocol::SAMSUNG,
            });
        }
    }

    Some(CapturedSignal {
        value: u64::from(u32::MAX),
        protocol: PROTOCOL_SENTINEL,
    })
}

fn decode_bits(body: &[u16]) -> Option<u64> {
    // 32 mark/space pairs, then the stop mark.
    if body.len() < FRAME_BITS * 2 + 1 {
        return None;
    }

    let mut value = 0_u64;
    for pair in body[..FRAME_BITS * 2].chunks_exact(2) {
        if !matches(pair[0], BIT_MARK_US) {
            return None;
        }
        let bit = if matches(pair[1], ONE_SPACE_US) {
            1
        } else if matches(pair[1], ZERO_SPACE_US) {
            0
        } else {
            return None;
        };
        value = value << 1 | bit;
    }

    matches(body[FRAME_BITS * 2], BIT_MARK_US).then_some(value)
}

fn matches(measured: u16, nominal: u16) -> bool {
    let measured = u32::from(measured) * 100;
    let nominal = u32::from(nominal);
    measured >= nominal * (100 - TOLERANCE_PERCENT)
        && measured <= nominal * (100 + TOLERANCE_PERCENT)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn jitter(raw: &[u16]) -> Vec<u16> {
        raw.iter()
            .enumerate()
            .map(|(index, duration)| {
                // Receivers stretch marks and shorten spaces.
                if index % 2 == 0 {
                    duration + duration / 10
                } else {
                    duration - duration / 10
                }
            })
            .collect()
    }

    #[test]
    fn nec_frame_shape() {
        let raw = encode_nec(0x20DF_10EF);
        assert_eq!(raw.len(), 2 + FRAME_BITS * 2 + 1);
        assert_eq!(&raw[..2], &[9_000, 4_500]);
        // 0x2 = 0010: first three bits.
        assert_eq!(&raw[2..8], &[560, 560, 560, 560, 560, 1_690]);
        assert_eq!(raw.last(), Some(&560));
    }

    #[test]
    fn jittered_frames_decode_to_their_protocol() {
        assert_eq!(
            decode(&jitter(&encode_nec(0x20DF_10EF))),
            Some(CapturedSignal {
                value: 0x20DF_10EF,
                protocol: protocol::NEC,
            })
        );
        assert_eq!(
            decode(&jitter(&encode_samsung(0xE0E0_40BF))),
            Some(CapturedSignal {
                value: 0xE0E0_40BF,
                protocol: protocol::SAMSUNG,
            })
        );
    }

    #[test]
    fn nec_repeat_decodes_to_sentinel() {
        let capture = decode(&[9_000, 2_250, 560, 40_000]).unwrap();
        assert!(capture.is_sentinel());
    }

    #[test]
    fn unknown_train_decodes_to_sentinel() {
        let capture = decode(&[3_000, 3_000, 500, 500, 500, 500]).unwrap();
        assert_eq!(capture.protocol, PROTOCOL_SENTINEL);
        assert!(capture.is_sentinel());

        let mut truncated = encode_nec(0x1234_5678);
        truncated.truncate(20);
        assert!(decode(&truncated).unwrap().is_sentinel());
    }

    #[test]
    fn noise_is_ignored() {
        assert_eq!(decode(&[]), None);
        assert_eq!(decode(&[120, 80]), None);
    }

    #[test]
    fn only_bound_protocols_have_encoders() {
        assert!(encoder(protocol::NEC).is_some());
        assert!(encoder(protocol::SAMSUNG).is_some());
        assert!(encoder(protocol::SONY).is_none());
    }
}
