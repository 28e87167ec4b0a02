//! Deterministic Random Number Generators
//!
//! Two generators live here:
//! - [`SineRandom`]: the seeded sine generator used for crate placement. Every
//!   participant can evaluate it, but only the host does (once per match).
//! - [`DeterministicRng`]: Xorshift128+ used for power-up rolls, seeded from the
//!   room code so replays of the same room roll the same sequence.

use serde::{Serialize, Deserialize};
use crate::core::hash::hash_with_domain;

// =============================================================================
// SINE RANDOM (map generation)
// =============================================================================

/// Seeded pseudo-random source of the form `frac(sin(seed) * 10000)`.
///
/// The seed is advanced by one before each draw.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SineRandom {
    seed: u64,
}

impl SineRandom {
    /// Create from an explicit seed.
    pub const fn new(seed: u64) -> Self {
        Self { seed }
    }

    /// Create from a room identifier: seed is the sum of its character codes.
    pub fn from_room_code(room_code: &str) -> Self {
        Self::new(room_code_seed(room_code))
    }

    /// Advance the seed and return a value in `[0, 1)`.
    #[inline]
    pub fn next_f64(&mut self) -> f64 {
        self.seed = self.seed.wrapping_add(1);
        let x = (self.seed as f64).sin() * 10000.0;
        x - x.floor()
    }

    /// Current seed (number of draws plus the initial seed).
    pub fn seed(&self) -> u64 {
        self.seed
    }
}

/// Sum of the character codes of a room identifier.
pub fn room_code_seed(room_code: &str) -> u64 {
    room_code.chars().map(|c| c as u64).sum()
}

// =============================================================================
// XORSHIFT128+ (power-up rolls)
// =============================================================================

/// Deterministic PRNG using Xorshift128+ algorithm.
///
/// Given the same seed, this RNG produces the exact same sequence on any
/// platform.
///
/// # Example
///
/// ```
/// use bomb_arena::core::rng::DeterministicRng;
///
/// let mut a = DeterministicRng::new(12345);
/// let mut b = DeterministicRng::new(12345);
/// assert_eq!(a.next_u64(), b.next_u64());
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeterministicRng {
    state: [u64; 2],
}

impl Default for DeterministicRng {
    fn default() -> Self {
        Self::new(0)
    }
}

impl DeterministicRng {
    /// Create a new RNG from a 64-bit seed.
    ///
    /// Uses SplitMix64 to initialize the internal state, ensuring
    /// good distribution even from weak seeds.
    pub fn new(seed: u64) -> Self {
        let mut s = seed;
        let state0 = splitmix64(&mut s);
        let state1 = splitmix64(&mut s);

        // Ensure state is never all zeros
        let state = if state0 == 0 && state1 == 0 {
            [1, 1]
        } else {
            [state0, state1]
        };

        Self { state }
    }

    /// Create RNG for a room.
    pub fn for_room(room_code: &str) -> Self {
        Self::new(derive_room_seed(room_code))
    }

    /// Generate the next 64-bit random value.
    #[inline]
    pub fn next_u64(&mut self) -> u64 {
        let s0 = self.state[0];
        let mut s1 = self.state[1];
        let result = s0.wrapping_add(s1);

        s1 ^= s0;
        self.state[0] = s0.rotate_left(24) ^ s1 ^ (s1 << 16);
        self.state[1] = s1.rotate_left(37);

        result
    }

    /// Generate a random integer in range [0, max).
    #[inline]
    pub fn next_int(&mut self, max: u32) -> u32 {
        if max == 0 {
            return 0;
        }
        (self.next_u64() % max as u64) as u32
    }

    /// Generate a float in `[0, 1)` from the upper 53 bits.
    #[inline]
    pub fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Generate a random boolean that is true with the given probability.
    #[inline]
    pub fn next_bool(&mut self, probability: f64) -> bool {
        self.next_f64() < probability
    }

    /// Pick an index from a weight table. Returns 0 for an empty or all-zero table.
    pub fn pick_weighted(&mut self, weights: &[u32]) -> usize {
        let total: u32 = weights.iter().sum();
        if total == 0 {
            return 0;
        }

        let mut roll = self.next_int(total);
        for (idx, weight) in weights.iter().enumerate() {
            if roll < *weight {
                return idx;
            }
            roll -= *weight;
        }
        weights.len() - 1
    }

    /// Get current state (for checkpointing/debugging).
    pub fn state(&self) -> [u64; 2] {
        self.state
    }

    /// Restore from saved state.
    pub fn set_state(&mut self, state: [u64; 2]) {
        self.state = state;
    }
}

/// SplitMix64 for seed initialization.
#[inline]
fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

/// Derive a 64-bit seed from a room code.
pub fn derive_room_seed(room_code: &str) -> u64 {
    let hash = hash_with_domain(b"BOMB_ARENA_ROOM_SEED_V1", room_code.as_bytes());

    let mut seed = [0u8; 8];
    seed.copy_from_slice(&hash[0..8]);
    u64::from_le_bytes(seed)
}

// =============================================================================
// TESTS
// =============================================================================
