//! Legacy MiMC-7 oracle.
//!
//! Early Loopring trees were keyed with MiMC rather than Poseidon. It is
//! kept here as a second `HashOracle` implementation for anyone replaying
//! pre-Poseidon state snapshots, but `dex-state` never constructs trees with
//! it — see the REDESIGN FLAGS note on hash selection.

use dex_field::Field;
use sha3::{
    digest::{ExtendableOutput, Update, XofReader},
    Shake128,
};

const ROUNDS: usize = 91;

pub struct Mimc7 {
    round_constants: Vec<Field>,
}

impl Mimc7 {
    pub fn new() -> Self {
        let mut hasher = Shake128::default();
        hasher.update(b"zeratul.dex.mimc7.v1.round_constants");
        let mut reader = hasher.finalize_xof();
        let mut round_constants = Vec::with_capacity(ROUNDS);
        let mut buf = [0u8; 32];
        for i in 0..ROUNDS {
            if i == 0 {
                round_constants.push(Field::zero());
                continue;
            }
            reader.read(&mut buf);
            round_constants.push(Field::from_le_bytes_mod_order(&buf));
        }
        Self { round_constants }
    }

    /// 2-ary Feistel-less MiMC permutation, `hash(x, key) = cipher(x, key) + x + key`.
    pub fn hash(&self, left: Field, right: Field) -> Field {
        let mut x = left;
        for rc in &self.round_constants {
            let t = x + right + *rc;
            let t3 = t * t * t;
            x = t3;
        }
        x + left + right
    }
}

impl Default for Mimc7 {
    fn default() -> Self {
        Self::new()
    }
}
