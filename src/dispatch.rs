/*
   Copyright 2018 Ilya Epifanov

   Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
   http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
   http://opensource.org/licenses/MIT>, at your option. This file may not be
   copied, modified, or distributed except according to those terms.
*/
/*!
Serialized delivery of frequency changes to the device.

Reprogramming an output takes ten separate register writes. If a knob
interrupt re-enters `set_frequency` halfway through, the chip ends up with a
mix of old and new fields. Producers (encoder interrupt, BLE, console) should
therefore never touch the device; they `try_send` a [`FrequencyRequest`] into
a [`RequestChannel`], and a single consumer owning the device applies them
with [`drain`] or [`serve`].

```ignore
static REQUESTS: RequestChannel<CriticalSectionRawMutex, 4> = Channel::new();
const TUNING: FrequencyStep = FrequencyStep::new(7_000_000, 10);

// encoder interrupt
let _ = REQUESTS.try_send(TUNING.request(ClockOutput::Clk0, PLL::A, position));

// tuner task
let err = serve(&mut clock, REQUESTS.receiver()).await;
```
*/

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::channel::{Channel, Receiver};

use crate::{ClockOutput, Error, Si5351, PLL};

/// One `set_frequency` call, captured for later.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FrequencyRequest {
    pub clk: ClockOutput,
    pub pll: PLL,
    pub freq: u32,
}

pub type RequestChannel<M, const N: usize> = Channel<M, FrequencyRequest, N>;

impl FrequencyRequest {
    pub const fn new(clk: ClockOutput, pll: PLL, freq: u32) -> Self {
        FrequencyRequest { clk, pll, freq }
    }

    pub fn apply<D: Si5351>(&self, device: &mut D) -> Result<(), Error> {
        device.set_frequency(self.clk, self.pll, self.freq)
    }
}

/// Maps a rotary encoder position to `center + position * step` Hz.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FrequencyStep {
    pub center: u32,
    pub step: u32,
}

impl FrequencyStep {
    pub const fn new(center: u32, step: u32) -> Self {
        FrequencyStep { center, step }
    }

    /// Saturates at `0` and `u32::MAX`.
    pub fn frequency(&self, position: i32) -> u32 {
        let freq = i64::from(self.center) + i64::from(position) * i64::from(self.step);
        freq.max(0).min(i64::from(u32::MAX)) as u32
    }

    pub fn request(&self, clk: ClockOutput, pll: PLL, position: i32) -> FrequencyRequest {
        FrequencyRequest::new(clk, pll, self.frequency(position))
    }
}

/// Applies every queued request in order without waiting.
///
/// Returns how many were applied, or the first error. Requests behind a
/// failed one stay queued.
pub fn drain<D, M, const N: usize>(
    device: &mut D,
    requests: &Receiver<'_, M, FrequencyRequest, N>,
) -> Result<usize, Error>
where
    D: Si5351,
    M: RawMutex,
{
    let mut applied = 0;
    while let Ok(request) = requests.try_receive() {
        request.apply(device)?;
        applied += 1;
    }
    Ok(applied)
}

/// Consumer loop. Waits for requests and applies them one at a time; only
/// returns once a request fails.
pub async fn serve<D, M, const N: usize>(
    device: &mut D,
    requests: Receiver<'_, M, FrequencyRequest, N>,
) -> Error
where
    D: Si5351,
    M: RawMutex,
{
    loop {
        let request = requests.receive().await;
        if let Err(err) = request.apply(device) {
            #[cfg(feature = "defmt")]
            defmt::warn!("{} failed: {}", request, err);
            return err;
        }
    }
}
