//! G.711 µ-law companding.
//!
//! USRP µ-law voice frames carry one companded byte per sample; these
//! routines move between that representation and linear 16-bit PCM.

const BIAS: i32 = 0x84;
const CLIP: i32 = 32_635;

/// Compands one linear sample to µ-law.
#[must_use]
pub fn encode(sample: i16) -> u8 {
    let mut pcm = i32::from(sample);
    let sign = if pcm < 0 {
        pcm = -pcm;
        0x80u8
    } else {
        0
    };

    pcm = pcm.min(CLIP) + BIAS;

    let seg = ((pcm >> 7) & 0xff) as u8;
    let exponent = if seg == 0 {
        0
    } else {
        7 - seg.leading_zeros()
    };
    let mantissa = ((pcm >> (exponent + 3)) & 0x0f) as u8;

    !(sign | ((exponent as u8) << 4) | mantissa)
}

/// Expands one µ-law byte to a linear sample.
#[must_use]
pub fn decode(byte: u8) -> i16 {
    let u = !byte;
    let exponent = u32::from((u >> 4) & 0x07);
    let mantissa = i32::from(u & 0x0f);

    let magnitude = (((mantissa << 3) + BIAS) << exponent) - BIAS;

    if u & 0x80 != 0 {
        -magnitude as i16
    } else {
        magnitude as i16
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_is_0xff() {
        assert_eq!(encode(0), 0xff);
        assert_eq!(decode(0xff), 0);
    }

    #[test]
    fn companding_error_is_bounded() {
        // µ-law quantisation error grows with magnitude; the relative
        // error stays within one quantisation step across the range.
        for &sample in &[1i16, -1, 100, -100, 1000, -1000, 10_000, -10_000, 32_000, -32_000] {
            let out = decode(encode(sample));
            let step = 1i32 << ((i32::from(sample).unsigned_abs().max(1).ilog2()).saturating_sub(4));
            assert!(
                (i32::from(out) - i32::from(sample)).abs() <= step.max(8),
                "sample {} decoded to {}",
                sample,
                out,
            );
        }
    }

    #[test]
    fn decoded_levels_are_stable() {
        // Re-companding a decoded level must not drift. Codewords 0x7f and
        // 0xff both name zero, so compare decoded values rather than bytes.
        for byte in 0u16..=255 {
            let byte = byte as u8;
            let level = decode(byte);
            assert_eq!(decode(encode(level)), level, "codeword {:#04x}", byte);
        }
    }

    #[test]
    fn extremes_clip_cleanly() {
        assert_eq!(encode(i16::MAX), encode(32_635));
        assert_eq!(encode(i16::MIN), encode(-32_635));
    }
}
