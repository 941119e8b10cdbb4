//! Scalar field arithmetic for the rollup state engine.
//!
//! `Field` wraps the BN254 (alt_bn128) scalar field, matching the
//! `SNARK_SCALAR_FIELD` used by `ethsnarks`/Loopring's circuit. Every hash,
//! tree node, and leaf value in the state engine lives in this field; native
//! integer quantities (balances, amounts, nonces) only pass through it at
//! hash-oracle call sites and DA-float rounding, per the engine's big-integer
//! design note: `F` arithmetic and native integer arithmetic are kept
//! separate, not blurred into a single numeric type.

use ark_ff::{BigInteger, Field as ArkField, PrimeField, Zero as ArkZero, One as ArkOne};
use num_bigint::BigUint;
use serde::{de::Error as DeError, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::ops::{Add, Mul, Neg, Sub};

#[derive(Debug, thiserror::Error)]
pub enum FieldError {
    #[error("not a valid base-10 integer: {0:?}")]
    InvalidDecimal(String),
}

/// An element of the BN254 scalar field.
#[derive(Copy, Clone, PartialEq, Eq, Default, Hash)]
pub struct Field(pub ark_bn254::Fr);

impl Field {
    pub fn zero() -> Self {
        Self(ark_bn254::Fr::zero())
    }

    pub fn one() -> Self {
        Self(ark_bn254::Fr::one())
    }

    pub fn is_zero(&self) -> bool {
        ArkZero::is_zero(&self.0)
    }

    pub fn from_u64(value: u64) -> Self {
        Self(ark_bn254::Fr::from(value))
    }

    pub fn from_u128(value: u128) -> Self {
        Self(ark_bn254::Fr::from_le_bytes_mod_order(&value.to_le_bytes()))
    }

    /// Reduce an arbitrary-length little-endian byte string into the field.
    /// Used to fold addresses (`owner: u160`) and public key limbs in.
    pub fn from_le_bytes_mod_order(bytes: &[u8]) -> Self {
        Self(ark_bn254::Fr::from_le_bytes_mod_order(bytes))
    }

    /// Parse a canonical base-10 string, as used throughout the block
    /// input/output JSON (`§6.1`/`§6.2`) and the state snapshot (`§6.3`).
    pub fn from_decimal_str(s: &str) -> Result<Self, FieldError> {
        let digits = BigUint::parse_bytes(s.as_bytes(), 10)
            .ok_or_else(|| FieldError::InvalidDecimal(s.to_string()))?;
        Ok(Self(ark_bn254::Fr::from_le_bytes_mod_order(&digits.to_bytes_le())))
    }

    pub fn to_decimal_string(&self) -> String {
        let bytes = self.0.into_repr().to_bytes_le();
        BigUint::from_bytes_le(&bytes).to_string()
    }

    /// Multiplicative inverse, or `None` for zero.
    pub fn inverse(&self) -> Option<Field> {
        ArkField::inverse(&self.0).map(Field)
    }

    pub fn square(&self) -> Field {
        Field(ArkField::square(&self.0))
    }
}

impl fmt::Debug for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Field({})", self.to_decimal_string())
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_decimal_string())
    }
}

impl Add for Field {
    type Output = Field;
    fn add(self, rhs: Field) -> Field {
        Field(self.0 + rhs.0)
    }
}

impl Sub for Field {
    type Output = Field;
    fn sub(self, rhs: Field) -> Field {
        Field(self.0 - rhs.0)
    }
}

impl Mul for Field {
    type Output = Field;
    fn mul(self, rhs: Field) -> Field {
        Field(self.0 * rhs.0)
    }
}

impl Neg for Field {
    type Output = Field;
    fn neg(self) -> Field {
        Field(-self.0)
    }
}

impl From<u64> for Field {
    fn from(value: u64) -> Self {
        Field::from_u64(value)
    }
}

impl Serialize for Field {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_decimal_string())
    }
}

impl<'de> Deserialize<'de> for Field {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Field::from_decimal_str(&s).map_err(DeError::custom)
    }
}
