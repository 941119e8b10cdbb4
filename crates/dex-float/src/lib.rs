//! Lossy mantissa/exponent ("float") encoding of on-chain amounts.
//!
//! Grounded in `operator/float.py`: an amount that has to travel in the
//! block's DA bytes is represented as `mantissa * base^exponent` rather than
//! its full-precision integer, trading a few bits of amount for smaller
//! calldata. Rounding always goes down — `round(x) <= x` — so settlement
//! never credits more than a party actually sent.
//!
//! Only the three encodings wired into the executor (`Float24`, `Float16`,
//! `Float12`) are exposed; the source also defines `Float28`/`Float8` but
//! nothing in the transaction set uses them, so they are left out here too.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FloatError {
    #[error("value {value} has no representable float below it at this precision")]
    Unrepresentable { value: u128 },
}

/// A fixed `(numBitsExponent, numBitsMantissa, base)` float encoding.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FloatEncoding {
    pub num_bits_exponent: u32,
    pub num_bits_mantissa: u32,
    pub base: u128,
}

impl FloatEncoding {
    const fn new(num_bits_exponent: u32, num_bits_mantissa: u32) -> Self {
        Self {
            num_bits_exponent,
            num_bits_mantissa,
            base: 10,
        }
    }

    fn max_exponent(&self) -> u32 {
        (1u32 << self.num_bits_exponent) - 1
    }

    fn max_mantissa(&self) -> u128 {
        (1u128 << self.num_bits_mantissa) - 1
    }

    /// Total bit width of the packed `(exponent, mantissa)` pair, as it
    /// appears in the DA byte stream.
    pub fn num_bits(&self) -> u32 {
        self.num_bits_exponent + self.num_bits_mantissa
    }

    /// Smallest `(exponent, mantissa)` such that `mantissa * base^exponent`
    /// is the largest representable value `<= value` (round-down).
    pub fn to_float(&self, value: u128) -> Result<(u32, u128), FloatError> {
        let max_mantissa = self.max_mantissa();
        let max_exponent = self.max_exponent();

        let mut exponent = 0u32;
        let mut divisor = 1u128;
        loop {
            let mantissa = value / divisor;
            if mantissa <= max_mantissa {
                return Ok((exponent, mantissa));
            }
            if exponent == max_exponent {
                return Err(FloatError::Unrepresentable { value });
            }
            exponent += 1;
            divisor = divisor.saturating_mul(self.base);
        }
    }

    pub fn from_float(&self, exponent: u32, mantissa: u128) -> u128 {
        mantissa.saturating_mul(self.base.saturating_pow(exponent))
    }

    /// `round(x) = fromFloat(toFloat(x))`. Idempotent, and `round(x) <= x`.
    pub fn round(&self, value: u128) -> Result<u128, FloatError> {
        let (exponent, mantissa) = self.to_float(value)?;
        Ok(self.from_float(exponent, mantissa))
    }
}

pub const FLOAT24: FloatEncoding = FloatEncoding::new(5, 19);
pub const FLOAT16: FloatEncoding = FloatEncoding::new(5, 11);
pub const FLOAT12: FloatEncoding = FloatEncoding::new(5, 7);

pub fn round_float24(value: u128) -> Result<u128, FloatError> {
    FLOAT24.round(value)
}

pub fn round_float16(value: u128) -> Result<u128, FloatError> {
    FLOAT16.round(value)
}

pub fn round_float12(value: u128) -> Result<u128, FloatError> {
    FLOAT12.round(value)
}
