use hex::encode;
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use sha2::{Digest, Sha256};

/// Source of one candidate nonce per loop iteration.
///
/// Implementations make no claim that the nonce solves any difficulty target.
pub trait NonceOracle: Send {
    fn next(&mut self) -> u32;
}

/// Measures a single simulated qubit prepared with a Hadamard gate.
///
/// The state (|0> + |1>)/sqrt(2) collapses to 0 or 1 with equal probability,
/// so every nonce is 0 or 1. This is a placeholder, not a proof-of-work search.
pub struct QubitOracle {
    rng: StdRng,
}

impl QubitOracle {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Default for QubitOracle {
    fn default() -> Self {
        Self::new()
    }
}

impl NonceOracle for QubitOracle {
    fn next(&mut self) -> u32 {
        let amplitude = std::f64::consts::FRAC_1_SQRT_2;
        let p_one = amplitude * amplitude;
        u32::from(self.rng.gen_bool(p_one))
    }
}

/// The two header inputs that a search strategy controls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub nonce: u32,
    /// Display-order hex.
    pub merkle_root: String,
}

pub trait CandidateGenerator: Send {
    fn next_candidate(&mut self) -> Candidate;
}

/// Pairs a nonce oracle with a merkle root hashed from random bytes.
/// No transactions are committed to.
pub struct PlaceholderGenerator<O> {
    oracle: O,
    rng: StdRng,
}

impl<O: NonceOracle> PlaceholderGenerator<O> {
    pub fn new(oracle: O) -> Self {
        Self {
            oracle,
            rng: StdRng::from_entropy(),
        }
    }
}

impl<O: NonceOracle> CandidateGenerator for PlaceholderGenerator<O> {
    fn next_candidate(&mut self) -> Candidate {
        let nonce = self.oracle.next();

        let mut seed = [0u8; 32];
        self.rng.fill_bytes(&mut seed);
        let merkle_root = encode(Sha256::digest(seed));

        Candidate { nonce, merkle_root }
    }
}
