/*
   Copyright 2018 Ilya Epifanov

   Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
   http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
   http://opensource.org/licenses/MIT>, at your option. This file may not be
   copied, modified, or distributed except according to those terms.
*/
/*!
A platform agnostic frequency synthesis driver for the [Si5351], based on the
[`embedded-hal`] traits.

## The Device

The Silicon Labs [Si5351] is an any-frequency CMOS clock generator with two
PLLs and fractional output dividers. This driver programs the first three
outputs.

The device has an I²C interface. The driver only ever writes to it, one
register per transfer.

## Usage

Instantiate the device on an I²C bus and initialize it:

```ignore
# extern crate si5351_synth;
use si5351_synth::{Si5351, Si5351Device, CrystalLoad};

# fn main() {
let mut clock = Si5351Device::new(i2c, false, 25_000_000);
clock.init(CrystalLoad::_10)?;
# }
```

Or, if you have an [Adafruit module]:

```ignore
let mut clock = Si5351Device::new_adafruit_module(i2c);
clock.init_adafruit_module()?;
```

Lock a PLL once, then tune outputs against it as often as needed:

```ignore
use si5351_synth::{ClockOutput, PLL};

clock.setup_pll_int(PLL::A, 32)?;
clock.set_frequency(ClockOutput::Clk0, PLL::A, 7_000_000)?;
clock.enable_outputs(true)?;
```

Reprogramming a PLL changes its VCO frequency; outputs fed by it keep their
old dividers until `set_frequency` is called for them again.

Calls into the device must be serialized. See [`dispatch`] for a queue that
funnels requests from interrupt handlers to a single consumer.

[Si5351]: https://www.silabs.com/documents/public/data-sheets/Si5351-B.pdf
[`embedded-hal`]: https://github.com/japaric/embedded-hal
[Adafruit module]: https://www.adafruit.com/product/2045
*/
//#![deny(missing_docs)]
#![no_std]

#[cfg(test)]
extern crate std;

#[macro_use]
extern crate bitflags;
use embedded_hal as hal;

use crate::hal::blocking::i2c::Write;
use core::convert::TryFrom;

pub mod dispatch;
pub mod fraction;
#[cfg(test)]
mod mock;

pub use crate::fraction::{Fraction, SynthParams, MULTISYNTH_C_MAX};

/// Lowest output frequency covered by R-divider staging.
pub const CLKOUT_MIN_FREQ: u32 = 4_000;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    CommunicationError,
    InvalidParameter,
}

#[derive(Debug, Copy, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CrystalLoad {
    _6,
    _8,
    _10,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PLL {
    A,
    B,
}

#[derive(Debug, Copy, Clone)]
pub enum FeedbackMultisynth {
    MSNA,
    MSNB,
}

#[derive(Debug, Copy, Clone)]
pub enum Multisynth {
    MS0,
    MS1,
    MS2,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ClockOutput {
    Clk0 = 0,
    Clk1,
    Clk2,
}

/// R-divider stage, dividing a Multisynth output by `2^n`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OutputDivider {
    Div1 = 0,
    Div2,
    Div4,
    Div8,
    Div16,
    Div32,
    Div64,
    Div128,
}

/// Last programmed state of one PLL.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PllState {
    /// 0 until the PLL is configured.
    pub vco_hz: u32,
}

const ADDRESS: u8 = 0b0110_0000;

impl PLL {
    pub fn multisynth(&self) -> FeedbackMultisynth {
        match *self {
            PLL::A => FeedbackMultisynth::MSNA,
            PLL::B => FeedbackMultisynth::MSNB,
        }
    }
}

trait FractionalMultisynth {
    fn base_addr(&self) -> u8;
}

impl FractionalMultisynth for FeedbackMultisynth {
    fn base_addr(&self) -> u8 {
        match *self {
            FeedbackMultisynth::MSNA => 26,
            FeedbackMultisynth::MSNB => 34,
        }
    }
}

impl FractionalMultisynth for Multisynth {
    fn base_addr(&self) -> u8 {
        match *self {
            Multisynth::MS0 => 42,
            Multisynth::MS1 => 50,
            Multisynth::MS2 => 58,
        }
    }
}

impl Multisynth {
    /// Parameter register 3 of the block, holding R-divider bits 6:4.
    fn output_divider_addr(&self) -> u8 {
        self.base_addr() + 2
    }
}

#[derive(Debug, Copy, Clone)]
enum Register {
    OutputEnable = 3,
    Clk0 = 16,
    Clk1 = 17,
    Clk2 = 18,
    Clk3 = 19,
    Clk4 = 20,
    Clk5 = 21,
    Clk6 = 22,
    Clk7 = 23,
    PLLReset = 177,
    CrystalLoad = 183,
}

impl Register {
    pub fn addr(&self) -> u8 {
        *self as u8
    }
}

bitflags! {
    struct CrystalLoadBits: u8 {
        const RESERVED = 0b00_010010;
        const CL_6 = 0b01_000000;
        const CL_8 = 0b10_000000;
        const CL_10 = 0b11_000000;
    }
}

bitflags! {
    struct ClockControlBits: u8 {
        const CLK_PDN = 0b1000_0000;
        const MS_INT = 0b0100_0000;
        const MS_SRC = 0b0010_0000;
        const CLK_SRC_MS = 0b0000_1100;
        const CLK_DRV_8 = 0b0000_0011;
    }
}

bitflags! {
    struct PLLResetBits: u8 {
        const PLLB_RST = 0b1000_0000;
        const PLLA_RST = 0b0010_0000;
    }
}

impl ClockOutput {
    fn register(self) -> Register {
        match self {
            ClockOutput::Clk0 => Register::Clk0,
            ClockOutput::Clk1 => Register::Clk1,
            ClockOutput::Clk2 => Register::Clk2,
        }
    }

    pub fn multisynth(&self) -> Multisynth {
        match *self {
            ClockOutput::Clk0 => Multisynth::MS0,
            ClockOutput::Clk1 => Multisynth::MS1,
            ClockOutput::Clk2 => Multisynth::MS2,
        }
    }
}

impl OutputDivider {
    fn bits(&self) -> u8 {
        *self as u8
    }

    /// Picks the stage that lifts `freq` back above 512 kHz.
    ///
    /// Each band `[4 kHz * 2^k, 4 kHz * 2^(k+1))` maps to `2^(7-k)`.
    /// Frequencies below 4 kHz fall through undivided.
    pub fn for_frequency(freq: u32) -> OutputDivider {
        match freq / CLKOUT_MIN_FREQ {
            1 => OutputDivider::Div128,
            2..=3 => OutputDivider::Div64,
            4..=7 => OutputDivider::Div32,
            8..=15 => OutputDivider::Div16,
            16..=31 => OutputDivider::Div8,
            32..=63 => OutputDivider::Div4,
            64..=127 => OutputDivider::Div2,
            _ => OutputDivider::Div1,
        }
    }

    pub fn denominator(&self) -> u32 {
        1 << self.bits()
    }
}

fn i2c_error<E>(_: E) -> Error {
    Error::CommunicationError
}

fn check_fraction(num: u32, denom: u32) -> Result<(), Error> {
    if denom == 0 || denom > MULTISYNTH_C_MAX || num > MULTISYNTH_C_MAX {
        return Err(Error::InvalidParameter);
    }
    Ok(())
}

/// Si5351 driver
pub struct Si5351Device<I2C> {
    i2c: I2C,
    address: u8,
    xtal_freq: u32,
    pll_a: PllState,
    pll_b: PllState,
}

pub trait Si5351 {
    fn init_adafruit_module(&mut self) -> Result<(), Error>;
    fn init(&mut self, xtal_load: CrystalLoad) -> Result<(), Error>;

    /// Programs the feedback divider of `pll` to `mult + num / denom` and
    /// resets both PLLs.
    fn setup_pll(&mut self, pll: PLL, mult: u8, num: u32, denom: u32) -> Result<(), Error>;
    fn setup_pll_int(&mut self, pll: PLL, mult: u8) -> Result<(), Error>;

    /// Programs the output divider of `clk` to `div + num / denom` and routes
    /// it from `pll`, powered up at 8 mA drive.
    fn setup_multisynth(
        &mut self,
        clk: ClockOutput,
        pll: PLL,
        div: u32,
        num: u32,
        denom: u32,
    ) -> Result<(), Error>;
    fn setup_multisynth_int(&mut self, clk: ClockOutput, pll: PLL, div: u32) -> Result<(), Error>;

    /// Writes the R-divider stage of `clk`.
    ///
    /// Must follow `setup_multisynth` for the same output, which would
    /// otherwise overwrite it. This write also clears P1[17:16]; prefer
    /// `set_frequency`, which preserves them.
    fn set_output_divider(&mut self, clk: ClockOutput, r_div: OutputDivider) -> Result<(), Error>;

    /// Tunes `clk` to `freq` Hz against the VCO frequency last programmed
    /// into `pll`.
    fn set_frequency(&mut self, clk: ClockOutput, pll: PLL, freq: u32) -> Result<(), Error>;

    /// Enables or disables all outputs at once.
    fn enable_outputs(&mut self, enabled: bool) -> Result<(), Error>;

    fn vco_frequency(&self, pll: PLL) -> u32;
}

impl<I2C, E> Si5351Device<I2C>
where
    I2C: Write<Error = E>,
{
    /// Creates a new driver from a I2C peripheral
    pub fn new(i2c: I2C, address_bit: bool, xtal_freq: u32) -> Self {
        Si5351Device {
            i2c,
            address: ADDRESS | if address_bit { 1 } else { 0 },
            xtal_freq,
            pll_a: PllState::default(),
            pll_b: PllState::default(),
        }
    }

    pub fn new_adafruit_module(i2c: I2C) -> Self {
        Si5351Device::new(i2c, false, 25_000_000)
    }

    /// Destroys the driver and returns the I2C peripheral.
    pub fn release(self) -> I2C {
        self.i2c
    }

    pub fn pll_state(&self, pll: PLL) -> PllState {
        match pll {
            PLL::A => self.pll_a,
            PLL::B => self.pll_b,
        }
    }

    fn pll_state_mut(&mut self, pll: PLL) -> &mut PllState {
        match pll {
            PLL::A => &mut self.pll_a,
            PLL::B => &mut self.pll_b,
        }
    }

    fn write_ms_config<MS: FractionalMultisynth>(
        &mut self,
        ms: MS,
        frac: Fraction,
    ) -> Result<SynthParams, Error> {
        let params = SynthParams::from(frac);
        let base = ms.base_addr();
        for (offset, &byte) in params.registers().iter().enumerate() {
            self.write_raw(base + offset as u8, byte)?;
        }
        Ok(params)
    }

    fn configure_multisynth(
        &mut self,
        clk: ClockOutput,
        pll: PLL,
        frac: Fraction,
    ) -> Result<SynthParams, Error> {
        check_fraction(frac.num, frac.denom)?;

        let params = self.write_ms_config(clk.multisynth(), frac)?;

        let ms_src = match pll {
            PLL::A => ClockControlBits::empty(),
            PLL::B => ClockControlBits::MS_SRC,
        };
        let ms_int = if frac.is_integer() {
            ClockControlBits::MS_INT
        } else {
            ClockControlBits::empty()
        };
        let base = ClockControlBits::CLK_SRC_MS | ClockControlBits::CLK_DRV_8;

        self.write_register(clk.register(), (base | ms_src | ms_int).bits())?;

        Ok(params)
    }

    fn write_output_divider(
        &mut self,
        ms: Multisynth,
        r_div: OutputDivider,
        p1_high: u8,
    ) -> Result<(), Error> {
        self.write_raw(
            ms.output_divider_addr(),
            ((r_div.bits() & 0x07) << 4) | (p1_high & 0x03),
        )
    }

    fn reset_plls(&mut self) -> Result<(), Error> {
        self.write_register(
            Register::PLLReset,
            (PLLResetBits::PLLA_RST | PLLResetBits::PLLB_RST).bits(),
        )
    }

    fn write_register(&mut self, reg: Register, byte: u8) -> Result<(), Error> {
        self.write_raw(reg.addr(), byte)
    }

    fn write_raw(&mut self, addr: u8, byte: u8) -> Result<(), Error> {
        self.i2c
            .write(self.address, &[addr, byte])
            .map_err(i2c_error)
    }
}

impl<I2C, E> Si5351 for Si5351Device<I2C>
where
    I2C: Write<Error = E>,
{
    fn init_adafruit_module(&mut self) -> Result<(), Error> {
        self.init(CrystalLoad::_10)
    }

    fn init(&mut self, xtal_load: CrystalLoad) -> Result<(), Error> {
        self.enable_outputs(false)?;

        const CLK_REGS: [Register; 8] = [
            Register::Clk0,
            Register::Clk1,
            Register::Clk2,
            Register::Clk3,
            Register::Clk4,
            Register::Clk5,
            Register::Clk6,
            Register::Clk7,
        ];
        for &reg in CLK_REGS.iter() {
            self.write_register(reg, ClockControlBits::CLK_PDN.bits())?;
        }

        self.write_register(
            Register::CrystalLoad,
            (CrystalLoadBits::RESERVED
                | match xtal_load {
                    CrystalLoad::_6 => CrystalLoadBits::CL_6,
                    CrystalLoad::_8 => CrystalLoadBits::CL_8,
                    CrystalLoad::_10 => CrystalLoadBits::CL_10,
                })
            .bits(),
        )?;

        Ok(())
    }

    fn setup_pll(&mut self, pll: PLL, mult: u8, num: u32, denom: u32) -> Result<(), Error> {
        check_fraction(num, denom)?;

        let frac = Fraction::new(mult.into(), num, denom);
        let vco_hz =
            u32::try_from(frac.scale(self.xtal_freq)).map_err(|_| Error::InvalidParameter)?;

        self.write_ms_config(pll.multisynth(), frac)?;
        self.reset_plls()?;

        self.pll_state_mut(pll).vco_hz = vco_hz;

        #[cfg(feature = "defmt")]
        defmt::debug!("PLL {}: fVCO = {} Hz", pll, vco_hz);

        Ok(())
    }

    fn setup_pll_int(&mut self, pll: PLL, mult: u8) -> Result<(), Error> {
        self.setup_pll(pll, mult, 0, 1)
    }

    fn setup_multisynth(
        &mut self,
        clk: ClockOutput,
        pll: PLL,
        div: u32,
        num: u32,
        denom: u32,
    ) -> Result<(), Error> {
        self.configure_multisynth(clk, pll, Fraction::new(div, num, denom))?;
        Ok(())
    }

    fn setup_multisynth_int(&mut self, clk: ClockOutput, pll: PLL, div: u32) -> Result<(), Error> {
        self.setup_multisynth(clk, pll, div, 0, 1)
    }

    fn set_output_divider(&mut self, clk: ClockOutput, r_div: OutputDivider) -> Result<(), Error> {
        self.write_output_divider(clk.multisynth(), r_div, 0)
    }

    fn set_frequency(&mut self, clk: ClockOutput, pll: PLL, freq: u32) -> Result<(), Error> {
        if freq == 0 {
            return Err(Error::InvalidParameter);
        }

        let r_div = OutputDivider::for_frequency(freq);
        let scaled = freq * r_div.denominator();

        // An unconfigured PLL reads 0 Hz and yields a zero divider.
        let vco_hz = self.vco_frequency(pll);
        let ms = Fraction::ratio(vco_hz, scaled).fit_denominator();

        #[cfg(feature = "defmt")]
        defmt::debug!("{}: {} Hz = {} / ({} * {})", clk, freq, vco_hz, ms, r_div);

        let params = self.configure_multisynth(clk, pll, ms)?;
        self.write_output_divider(clk.multisynth(), r_div, params.p1_high_bits())?;

        Ok(())
    }

    fn enable_outputs(&mut self, enabled: bool) -> Result<(), Error> {
        #[cfg(feature = "defmt")]
        defmt::debug!("outputs enabled: {}", enabled);

        self.write_register(Register::OutputEnable, if enabled { 0x00 } else { 0xFF })
    }

    fn vco_frequency(&self, pll: PLL) -> u32 {
        self.pll_state(pll).vco_hz
    }
}
