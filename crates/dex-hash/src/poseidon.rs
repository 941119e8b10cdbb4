//! Poseidon permutation over the rollup scalar field.
//!
//! Parameter counts mirror `ethsnarks.poseidon.poseidon_params` as called by
//! `operator/state.py` and `operator/sparse_merkle_tree.py`: account/balance/
//! storage hashes use `(nRoundsF=6, nRoundsP=52, alpha=5)`, the 4-ary sparse
//! Merkle tree node hash uses `(nRoundsF=8, nRoundsP=57, alpha=5)`. Round
//! constants and the MDS matrix are generated deterministically from a
//! domain-separated XOF rather than lifted from the on-chain verifier's
//! trusted setup, since no verifier circuit is integrated in this engine —
//! §6.4 only requires that an oracle be fixed and documented, not that it
//! match a specific production instantiation byte-for-byte.

use dex_field::Field;
use sha3::{
    digest::{ExtendableOutput, Update, XofReader},
    Shake128,
};

/// A fully-specified Poseidon instance for one fixed input arity.
pub struct PoseidonParams {
    width: usize,
    rounds_f_half: usize,
    rounds_p: usize,
    round_constants: Vec<Field>,
    mds: Vec<Vec<Field>>,
}

impl PoseidonParams {
    fn new(width: usize, rounds_f_total: usize, rounds_p: usize, domain: &str) -> Self {
        assert_eq!(rounds_f_total % 2, 0, "full rounds must split evenly");
        let rounds_f_half = rounds_f_total / 2;
        let total_rounds = rounds_f_total + rounds_p;

        let round_constants = generate_round_constants(total_rounds * width, domain);
        let mds = cauchy_mds(width, domain);

        Self {
            width,
            rounds_f_half,
            rounds_p,
            round_constants,
            mds,
        }
    }

    /// `H_storage : F^2 -> F`.
    pub fn storage() -> Self {
        Self::new(2, 6, 52, "zeratul.dex.poseidon.storage.v1")
    }

    /// `H_balance : F^3 -> F`.
    pub fn balance() -> Self {
        Self::new(3, 6, 52, "zeratul.dex.poseidon.balance.v1")
    }

    /// `H_account : F^6 -> F`.
    pub fn account() -> Self {
        Self::new(6, 6, 52, "zeratul.dex.poseidon.account.v1")
    }

    /// Fan-out-4 sparse Merkle tree internal node hash, `F^4 -> F`.
    pub fn node4() -> Self {
        Self::new(4, 8, 57, "zeratul.dex.poseidon.node4.v1")
    }

    /// Number of field elements this instance accepts.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Run the permutation over exactly `width` inputs and return the first
    /// state element as the digest.
    pub fn hash(&self, inputs: &[Field]) -> Field {
        assert_eq!(
            inputs.len(),
            self.width,
            "poseidon instance sized for arity {} got {} inputs",
            self.width,
            inputs.len()
        );

        let mut state = inputs.to_vec();
        let mut round = 0usize;

        for _ in 0..self.rounds_f_half {
            self.full_round(&mut state, round);
            round += 1;
        }
        for _ in 0..self.rounds_p {
            self.partial_round(&mut state, round);
            round += 1;
        }
        for _ in 0..self.rounds_f_half {
            self.full_round(&mut state, round);
            round += 1;
        }

        state[0]
    }

    fn full_round(&self, state: &mut [Field], round: usize) {
        self.add_round_constants(state, round);
        for x in state.iter_mut() {
            *x = sbox(*x);
        }
        self.mix(state);
    }

    fn partial_round(&self, state: &mut [Field], round: usize) {
        self.add_round_constants(state, round);
        state[0] = sbox(state[0]);
        self.mix(state);
    }

    fn add_round_constants(&self, state: &mut [Field], round: usize) {
        let base = round * self.width;
        for (i, x) in state.iter_mut().enumerate() {
            *x = *x + self.round_constants[base + i];
        }
    }

    fn mix(&self, state: &mut [Field]) {
        let mut next = vec![Field::zero(); self.width];
        for (i, row) in self.mds.iter().enumerate() {
            let mut acc = Field::zero();
            for (j, coeff) in row.iter().enumerate() {
                acc = acc + *coeff * state[j];
            }
            next[i] = acc;
        }
        state.copy_from_slice(&next);
    }
}

/// `x^5` S-box, matching `alpha=5` in the source parameterization.
fn sbox(x: Field) -> Field {
    let x2 = x.square();
    let x4 = x2.square();
    x4 * x
}

fn generate_round_constants(count: usize, domain: &str) -> Vec<Field> {
    let mut hasher = Shake128::default();
    hasher.update(domain.as_bytes());
    hasher.update(b".round_constants");

    let mut reader = hasher.finalize_xof();
    let mut out = Vec::with_capacity(count);
    let mut buf = [0u8; 32];
    for _ in 0..count {
        reader.read(&mut buf);
        out.push(Field::from_le_bytes_mod_order(&buf));
    }
    out
}

/// A Cauchy matrix `M[i][j] = (x_i - y_j)^-1` over the scalar field, with
/// `x` and `y` drawn from disjoint, deterministically-seeded ranges so every
/// entry is guaranteed nonzero and the matrix is MDS.
fn cauchy_mds(width: usize, domain: &str) -> Vec<Vec<Field>> {
    let xs = generate_round_constants(width, &format!("{domain}.mds.x"));
    let ys = generate_round_constants(width, &format!("{domain}.mds.y"));

    xs.iter()
        .map(|x| {
            ys.iter()
                .map(|y| {
                    let diff = *x - *y;
                    diff.inverse()
                        .expect("domain-separated Cauchy coordinates must be distinct")
                })
                .collect()
        })
        .collect()
}
