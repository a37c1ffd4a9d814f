//! 80-bit extended precision <-> f64 conversion for fld/fstp m80.
//!
//! Layout: 64-bit significand with an explicit integer bit, then a 16-bit
//! word holding the sign and a 15-bit exponent biased by 16383.

const EXT80_BIAS: i32 = 16383;
const F64_BIAS: i32 = 1023;

#[must_use]
pub fn ext80_from_f64(v: f64) -> [u8; 10] {
    let bits = v.to_bits();
    let sign = ((bits >> 63) as u16) << 15;
    let exp = ((bits >> 52) & 0x7ff) as i32;
    let frac = bits & ((1u64 << 52) - 1);

    let (exp_ext, mant) = match exp {
        0x7ff if frac == 0 => (0x7fff, 1u64 << 63),
        // Quiet the NaN and keep the top payload bits.
        0x7ff => (0x7fff, (3u64 << 62) | (frac << 11)),
        0 if frac == 0 => (0, 0),
        0 => {
            // f64 subnormals are normal in the wider format.
            let top = 63 - frac.leading_zeros() as i32;
            let unbiased = top - 1074;
            ((unbiased + EXT80_BIAS) as u16, frac << (63 - top))
        }
        _ => ((exp - F64_BIAS + EXT80_BIAS) as u16, (1u64 << 63) | (frac << 11)),
    };

    let mut out = [0u8; 10];
    out[..8].copy_from_slice(&mant.to_le_bytes());
    out[8..].copy_from_slice(&(sign | exp_ext).to_le_bytes());
    out
}

#[must_use]
pub fn f64_from_ext80(bytes: [u8; 10]) -> f64 {
    let mut mant_bytes = [0u8; 8];
    mant_bytes.copy_from_slice(&bytes[..8]);
    let mant = u64::from_le_bytes(mant_bytes);
    let sign_exp = u16::from_le_bytes([bytes[8], bytes[9]]);
    let negative = sign_exp & 0x8000 != 0;
    let exp = i32::from(sign_exp & 0x7fff);

    let magnitude = if exp == 0 && mant == 0 {
        0.0
    } else if exp == 0x7fff {
        if mant << 1 == 0 {
            f64::INFINITY
        } else {
            f64::NAN
        }
    } else {
        // Pseudo-denormals use the minimum exponent.
        let unbiased = if exp == 0 { 1 - EXT80_BIAS } else { exp - EXT80_BIAS };
        let m = mant as f64 / (1u64 << 63) as f64;
        // Two steps so results in the f64 subnormal range survive.
        let half = unbiased / 2;
        m * 2f64.powi(half) * 2f64.powi(unbiased - half)
    };
    if negative {
        -magnitude
    } else {
        magnitude
    }
}
