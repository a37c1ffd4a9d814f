//! Numeric kernels behind the x87 assists.

/// Result of a partial remainder step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PartialRemainder {
    pub value: f64,
    /// Low three bits of the integer quotient.
    pub quotient: u8,
    /// False when the reduction stopped early and must be repeated (C2).
    pub complete: bool,
}

/// Largest exponent difference reduced in one fprem step.
const FPREM_MAX_EXP_DIFF: i32 = 63;

/// Math library used by the x87 assists, over doubles.
pub trait X87Math {
    fn f2xm1(&self, x: f64) -> f64;
    fn fyl2x(&self, x: f64, y: f64) -> f64;
    fn fyl2xp1(&self, x: f64, y: f64) -> f64;
    fn fpatan(&self, y: f64, x: f64) -> f64;
    fn fsin(&self, x: f64) -> f64;
    fn fcos(&self, x: f64) -> f64;
    fn fsincos(&self, x: f64) -> (f64, f64);
    fn fptan(&self, x: f64) -> f64;
    fn fsqrt(&self, x: f64) -> f64;
    fn fscale(&self, x: f64, scale: f64) -> f64;
    /// `(exponent, significand)` with the significand in `[1, 2)`.
    fn fxtract(&self, x: f64) -> (f64, f64);
    /// Truncating remainder (fprem).
    fn fprem(&self, x: f64, y: f64) -> PartialRemainder;
    /// Round-to-nearest remainder (fprem1).
    fn fprem1(&self, x: f64, y: f64) -> PartialRemainder;
}

/// [`X87Math`] on top of the host's `f64` routines.
#[derive(Debug, Clone, Copy, Default)]
pub struct SoftX87;

fn exponent(x: f64) -> i32 {
    ((x.to_bits() >> 52) & 0x7ff) as i32
}

impl SoftX87 {
    fn partial_remainder(x: f64, y: f64, nearest: bool) -> PartialRemainder {
        if x.is_nan() || y.is_nan() || x.is_infinite() || y == 0.0 {
            return PartialRemainder {
                value: f64::NAN,
                quotient: 0,
                complete: true,
            };
        }
        if y.is_infinite() || x == 0.0 {
            return PartialRemainder {
                value: x,
                quotient: 0,
                complete: true,
            };
        }

        let diff = exponent(x) - exponent(y);
        if diff > FPREM_MAX_EXP_DIFF {
            // Reduce by y scaled to within FPREM_MAX_EXP_DIFF binades of x.
            let n = diff - 32;
            let scaled = y * 2f64.powi(n);
            let q = (x / scaled).trunc();
            return PartialRemainder {
                value: x - q * scaled,
                quotient: 0,
                complete: false,
            };
        }

        let mut r = x % y;
        let mut q = ((x - r) / y).abs().round();
        if nearest {
            let half = y.abs() / 2.0;
            if r.abs() > half || (r.abs() == half && q % 2.0 != 0.0) {
                r -= y.abs().copysign(r);
                q += 1.0;
            }
        }
        PartialRemainder {
            value: r,
            quotient: (q % 8.0) as u8,
            complete: true,
        }
    }
}

impl X87Math for SoftX87 {
    fn f2xm1(&self, x: f64) -> f64 {
        (x * core::f64::consts::LN_2).exp_m1()
    }

    fn fyl2x(&self, x: f64, y: f64) -> f64 {
        y * x.log2()
    }

    fn fyl2xp1(&self, x: f64, y: f64) -> f64 {
        y * (x.ln_1p() / core::f64::consts::LN_2)
    }

    fn fpatan(&self, y: f64, x: f64) -> f64 {
        y.atan2(x)
    }

    fn fsin(&self, x: f64) -> f64 {
        x.sin()
    }

    fn fcos(&self, x: f64) -> f64 {
        x.cos()
    }

    fn fsincos(&self, x: f64) -> (f64, f64) {
        x.sin_cos()
    }

    fn fptan(&self, x: f64) -> f64 {
        x.tan()
    }

    fn fsqrt(&self, x: f64) -> f64 {
        x.sqrt()
    }

    fn fscale(&self, x: f64, scale: f64) -> f64 {
        x * scale.trunc().exp2()
    }

    fn fxtract(&self, x: f64) -> (f64, f64) {
        if x == 0.0 {
            return (f64::NEG_INFINITY, x);
        }
        if x.is_infinite() {
            return (f64::INFINITY, x);
        }
        if x.is_nan() {
            return (x, x);
        }
        // Normalize subnormals first so the exponent field is meaningful.
        let (x, bias) = if exponent(x) == 0 { (x * 2f64.powi(64), 64) } else { (x, 0) };
        let exp = exponent(x) - 1023 - bias;
        let significand = f64::from_bits((x.to_bits() & !(0x7ffu64 << 52)) | (1023u64 << 52));
        (f64::from(exp), significand)
    }

    fn fprem(&self, x: f64, y: f64) -> PartialRemainder {
        Self::partial_remainder(x, y, false)
    }

    fn fprem1(&self, x: f64, y: f64) -> PartialRemainder {
        Self::partial_remainder(x, y, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fxtract_splits_exponent_and_significand() {
        assert_eq!(SoftX87.fxtract(12.0), (3.0, 1.5));
        assert_eq!(SoftX87.fxtract(-0.375), (-2.0, -1.5));
        let tiny = f64::MIN_POSITIVE / 4.0;
        assert_eq!(SoftX87.fxtract(tiny), (-1024.0, 1.0));
        assert_eq!(SoftX87.fxtract(0.0).0, f64::NEG_INFINITY);
    }

    #[test]
    fn fprem_reports_quotient_bits() {
        let r = SoftX87.fprem(17.0, 5.0);
        assert_eq!(r, PartialRemainder { value: 2.0, quotient: 3, complete: true });

        // Truncating remainder keeps the dividend's sign; fprem1 rounds.
        assert_eq!(SoftX87.fprem(-7.0, 2.0).value, -1.0);
        let r1 = SoftX87.fprem1(7.0, 2.0);
        assert_eq!((r1.value, r1.quotient), (-1.0, 4));
    }

    #[test]
    fn fprem_reduces_huge_ratios_in_steps() {
        let r = SoftX87.fprem(2f64.powi(200), 3.0);
        assert!(!r.complete);
        assert!(r.value.abs() < 2f64.powi(200));
    }

    #[test]
    fn exponential_kernels() {
        assert!((SoftX87.f2xm1(1.0) - 1.0).abs() < 1e-15);
        assert_eq!(SoftX87.fscale(3.0, 2.7), 12.0);
        assert_eq!(SoftX87.fyl2x(8.0, 2.0), 6.0);
        assert!((SoftX87.fyl2xp1(1.0, 1.0) - 1.0).abs() < 1e-15);
    }
}
