/*
   Copyright 2018 Ilya Epifanov

   Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
   http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
   http://opensource.org/licenses/MIT>, at your option. This file may not be
   copied, modified, or distributed except according to those terms.
*/
//! Fixed-point encoding of `a + b / c` ratios into the P1/P2/P3 parameter
//! fields shared by the feedback (PLL) and output Multisynth blocks.
//!
//! See AN619, section 3.2 and 4.1.

/// Largest value the 20-bit numerator and denominator fields can hold.
pub const MULTISYNTH_C_MAX: u32 = 0x000F_FFFF;

const P1_MASK: u64 = 0x0003_FFFF;
const P2_MASK: u64 = 0x000F_FFFF;
const P3_MASK: u32 = 0x000F_FFFF;

/// A ratio `int + num / denom`, used both as a PLL multiplier and as a
/// Multisynth divider.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Fraction {
    pub int: u32,
    pub num: u32,
    pub denom: u32,
}

impl Fraction {
    pub const fn new(int: u32, num: u32, denom: u32) -> Self {
        Fraction { int, num, denom }
    }

    pub const fn integer(int: u32) -> Self {
        Fraction::new(int, 0, 1)
    }

    /// `dividend / divisor` split into quotient and exact remainder.
    ///
    /// `divisor` must be non-zero.
    pub fn ratio(dividend: u32, divisor: u32) -> Self {
        Fraction::new(dividend / divisor, dividend % divisor, divisor)
    }

    /// Halves numerator and denominator until the denominator fits the
    /// 20-bit field. Truncation shifts the ratio slightly.
    pub fn fit_denominator(mut self) -> Self {
        while self.denom > MULTISYNTH_C_MAX {
            self.num /= 2;
            self.denom /= 2;
        }
        self
    }

    pub fn is_integer(&self) -> bool {
        self.num == 0
    }

    /// `x * (int + num / denom)`, truncated toward zero.
    ///
    /// `denom` must be non-zero.
    pub fn scale(&self, x: u32) -> u64 {
        let denom = self.denom as u64;
        x as u64 * (self.int as u64 * denom + self.num as u64) / denom
    }
}

/// Packed Multisynth parameters, each already masked to its field width.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SynthParams {
    pub p1: u32,
    pub p2: u32,
    pub p3: u32,
}

impl From<Fraction> for SynthParams {
    /// `denom` must be non-zero. An integer part below 4 wraps P1 instead of
    /// panicking.
    fn from(frac: Fraction) -> Self {
        let num = frac.num as u64;
        let denom = frac.denom as u64;
        let floor = 128 * num / denom;

        let p1 = (128 * frac.int as u64 + floor).wrapping_sub(512) & P1_MASK;
        let p2 = (128 * num - denom * floor) & P2_MASK;

        SynthParams {
            p1: p1 as u32,
            p2: p2 as u32,
            p3: frac.denom & P3_MASK,
        }
    }
}

impl SynthParams {
    /// The 8 consecutive register bytes starting at a block's base address.
    pub fn registers(&self) -> [u8; 8] {
        let (p1, p2, p3) = (self.p1, self.p2, self.p3);
        [
            ((p3 & 0x0000_FF00) >> 8) as u8,
            p3 as u8,
            ((p1 & 0x0003_0000) >> 16) as u8,
            ((p1 & 0x0000_FF00) >> 8) as u8,
            p1 as u8,
            (((p3 & 0x000F_0000) >> 12) | ((p2 & 0x000F_0000) >> 16)) as u8,
            ((p2 & 0x0000_FF00) >> 8) as u8,
            p2 as u8,
        ]
    }

    /// P1[17:16], which shares its register with the R-divider bits.
    pub fn p1_high_bits(&self) -> u8 {
        ((self.p1 >> 16) & 0x03) as u8
    }
}

#[cfg(test)]
impl SynthParams {
    pub fn from_registers(regs: [u8; 8]) -> Self {
        let r = |i: usize| regs[i] as u32;
        SynthParams {
            p1: ((r(2) & 0x03) << 16) | (r(3) << 8) | r(4),
            p2: ((r(5) & 0x0F) << 16) | (r(6) << 8) | r(7),
            p3: ((r(5) & 0xF0) << 12) | (r(0) << 8) | r(1),
        }
    }

    pub fn fraction(&self) -> Fraction {
        let shifted = (self.p1 as u64 + 512) & P1_MASK;
        let floor = shifted % 128;
        let num = (self.p2 as u64 + self.p3 as u64 * floor) / 128;
        Fraction::new((shifted / 128) as u32, num as u32, self.p3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packs_integer_multiplier() {
        let params = SynthParams::from(Fraction::integer(32));
        assert_eq!(
            params,
            SynthParams {
                p1: 3584,
                p2: 0,
                p3: 1,
            }
        );
        assert_eq!(
            params.registers(),
            [0x00, 0x01, 0x00, 0x0E, 0x00, 0x00, 0x00, 0x00]
        );
    }

    #[test]
    fn packs_fractional_multiplier() {
        let params = SynthParams::from(Fraction::new(24, 2, 3));
        assert_eq!(
            params,
            SynthParams {
                p1: 2645,
                p2: 1,
                p3: 3,
            }
        );
        assert_eq!(
            params.registers(),
            [0x00, 0x03, 0x00, 0x0A, 0x55, 0x00, 0x00, 0x01]
        );
    }

    #[test]
    fn splits_high_bits_across_shared_byte() {
        let params = SynthParams::from(Fraction::new(900, 0xF_FFFE, 0xF_FFFF));
        assert_eq!(params.p1, 0x1_C07F);
        assert_eq!(params.p2, 0xF_FF7F);
        assert_eq!(params.p1_high_bits(), 0x01);
        assert_eq!(
            params.registers(),
            [0xFF, 0xFF, 0x01, 0xC0, 0x7F, 0xFF, 0xFF, 0x7F]
        );
    }

    #[test]
    fn zero_integer_part_wraps_p1() {
        let params = SynthParams::from(Fraction::new(0, 0, 875_000));
        assert_eq!(params.p1, 0x3_FE00);
        assert_eq!(&params.registers()[2..5], &[0x03, 0xFE, 0x00]);
    }

    fn assert_decodes_back(frac: Fraction) {
        let regs = SynthParams::from(frac).registers();
        assert_eq!(SynthParams::from_registers(regs).fraction(), frac);
    }

    #[test]
    fn registers_decode_back_to_fraction() {
        let ints = [0, 3, 4, 90, 900];
        let denoms = [1, 2, 3, 127, 128, 129, MULTISYNTH_C_MAX];
        for &int in ints.iter() {
            for &denom in denoms.iter() {
                let nums = [0, 1, denom / 3, denom / 2, denom - 1];
                for &num in nums.iter().filter(|&&num| num < denom) {
                    assert_decodes_back(Fraction::new(int, num, denom));
                }
            }
        }
    }

    #[test]
    fn resolved_ratios_decode_back() {
        let samples = [
            Fraction::new(24, 2, 3),
            Fraction::new(114, 250_000, 875_000),
            Fraction::new(44, 856_480, 856_481),
            Fraction::new(0, 0, 875_000),
            Fraction::new(1800, MULTISYNTH_C_MAX - 1, MULTISYNTH_C_MAX),
        ];
        for &frac in samples.iter() {
            assert_decodes_back(frac);
        }
    }

    #[test]
    fn ratio_keeps_exact_remainder() {
        assert_eq!(
            Fraction::ratio(800_000_000, 7_000_000),
            Fraction::new(114, 2_000_000, 7_000_000)
        );
        assert_eq!(
            Fraction::ratio(0, 7_000_000),
            Fraction::new(0, 0, 7_000_000)
        );
    }

    #[test]
    fn fit_denominator_halves_until_field_fits() {
        assert_eq!(
            Fraction::new(114, 2_000_000, 7_000_000).fit_denominator(),
            Fraction::new(114, 250_000, 875_000)
        );
        assert_eq!(
            Fraction::new(44, 13_703_690, 13_703_704).fit_denominator(),
            Fraction::new(44, 856_480, 856_481)
        );

        let fitted = Fraction::new(1, u32::MAX - 1, u32::MAX).fit_denominator();
        assert!(fitted.denom <= MULTISYNTH_C_MAX);
        assert!(fitted.num <= fitted.denom);
    }

    #[test]
    fn fit_denominator_leaves_small_fractions_alone() {
        let frac = Fraction::new(8, 3, MULTISYNTH_C_MAX);
        assert_eq!(frac.fit_denominator(), frac);
    }

    #[test]
    fn scale_truncates_toward_zero() {
        assert_eq!(Fraction::integer(32).scale(25_000_000), 800_000_000);
        assert_eq!(Fraction::new(24, 2, 3).scale(25_000_000), 616_666_666);
    }

    #[test]
    fn integer_mode_follows_numerator() {
        assert!(Fraction::integer(8).is_integer());
        assert!(Fraction::new(8, 0, 875_000).is_integer());
        assert!(!Fraction::new(24, 2, 3).is_integer());
    }
}
