//! Recording I²C bus for unit tests.

use crate::hal::blocking::i2c::Write;
use std::vec::Vec;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BusFault;

/// Records every write; optionally fails the n-th one (0-based).
#[derive(Debug, Default)]
pub struct MockI2c {
    writes: Vec<(u8, Vec<u8>)>,
    fail_at: Option<usize>,
    attempts: usize,
}

impl MockI2c {
    pub fn new() -> Self {
        MockI2c::default()
    }

    pub fn failing_at(n: usize) -> Self {
        MockI2c {
            fail_at: Some(n),
            ..MockI2c::default()
        }
    }

    /// `(register, value)` pairs in write order.
    pub fn registers(&self) -> Vec<(u8, u8)> {
        self.writes
            .iter()
            .map(|(_, bytes)| {
                assert_eq!(bytes.len(), 2, "expected single register write");
                (bytes[0], bytes[1])
            })
            .collect()
    }

    /// Values written to `base..base + 8`, in write order.
    pub fn block(&self, base: u8) -> [u8; 8] {
        let mut out = [0u8; 8];
        let regs = self.registers();
        let start = regs
            .iter()
            .position(|&(reg, _)| reg == base)
            .expect("block not written");
        for (i, &(reg, value)) in regs[start..start + 8].iter().enumerate() {
            assert_eq!(reg, base + i as u8);
            out[i] = value;
        }
        out
    }

    pub fn addresses(&self) -> Vec<u8> {
        self.writes.iter().map(|(address, _)| *address).collect()
    }

    pub fn clear(&mut self) {
        self.writes.clear();
    }
}

impl Write for MockI2c {
    type Error = BusFault;

    fn write(&mut self, address: u8, bytes: &[u8]) -> Result<(), Self::Error> {
        let attempt = self.attempts;
        self.attempts += 1;
        if self.fail_at == Some(attempt) {
            return Err(BusFault);
        }
        self.writes.push((address, bytes.to_vec()));
        Ok(())
    }
}
