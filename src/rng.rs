//! Internal random number generator based on PCG32.
//!
//! The only randomness this crate needs is the per-session identity
//! token, so a minimal PCG-XSH-RR generator replaces a `rand` dependency.

/// Default increment constant from the PCG reference implementation.
const PCG_DEFAULT_INCREMENT: u64 = 1442695040888963407;

/// Standard multiplier for 64-bit state PCG.
const PCG_MULTIPLIER: u64 = 6364136223846793005;

/// A minimal PCG-XSH-RR generator with 64-bit state and 32-bit output.
#[derive(Debug, Clone)]
pub struct Pcg32 {
    state: u64,
}

impl Pcg32 {
    /// Creates a generator from a seed.
    #[must_use]
    pub const fn new(seed: u64) -> Self {
        // Initialize state to 0, advance once, add the seed, advance again.
        let mut state: u64 = 0;
        state = state
            .wrapping_mul(PCG_MULTIPLIER)
            .wrapping_add(PCG_DEFAULT_INCREMENT);
        state = state.wrapping_add(seed);
        state = state
            .wrapping_mul(PCG_MULTIPLIER)
            .wrapping_add(PCG_DEFAULT_INCREMENT);
        Self { state }
    }

    /// Creates a generator seeded from the wall clock. Good enough for
    /// identity tokens; not suitable for anything cryptographic.
    #[must_use]
    pub fn from_time() -> Self {
        let nanos = web_time::SystemTime::now()
            .duration_since(web_time::SystemTime::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        Self::new((nanos as u64) ^ ((nanos >> 64) as u64))
    }

    /// Generates the next 32-bit value.
    pub fn next_u32(&mut self) -> u32 {
        let old_state = self.state;
        self.state = old_state
            .wrapping_mul(PCG_MULTIPLIER)
            .wrapping_add(PCG_DEFAULT_INCREMENT);
        // XSH-RR output function: xor-shift, then random rotate
        let xorshifted = (((old_state >> 18) ^ old_state) >> 27) as u32;
        let rot = (old_state >> 59) as u32;
        xorshifted.rotate_right(rot)
    }

    /// Generates the next 64-bit value from two 32-bit draws.
    pub fn next_u64(&mut self) -> u64 {
        (u64::from(self.next_u32()) << 32) | u64::from(self.next_u32())
    }
}

/// Generates a fresh session identity token, e.g. `client_9f8a3c21d4e07b56`.
#[must_use]
pub fn session_token() -> String {
    let mut rng = Pcg32::from_time();
    format!("client_{:016x}", rng.next_u64())
}
