//! MT19937 Mersenne Twister PRNG
//!
//! Bit-exact replica of the reference `mt19937ar.c` generator, so a run can be
//! replayed from its seed on any platform.
//!
//! # Algorithm
//!
//! 624-word state, refilled in one twist every 624 draws, output tempered with
//! the reference shift/mask constants.
//!
//! # Example
//!
//! ```rust
//! use fifotest::generator::Mt19937;
//!
//! let mut rng = Mt19937::new(42);
//! let len = rng.next_range(1, 1024);
//! assert!((1..=1024).contains(&len));
//! ```

use rand::RngCore;

/// Mersenne Twister (MT19937, 32-bit)
///
/// The only source of randomness in a link test. Whoever holds `&mut Mt19937`
/// is the single writer of the sequence at that point of the round.
#[derive(Clone)]
pub struct Mt19937 {
    state: [u32; Self::N],
    index: usize,
}

impl Mt19937 {
    /// State size in words
    const N: usize = 624;

    /// Middle word offset
    const M: usize = 397;

    /// Twist matrix coefficient
    const MATRIX_A: u32 = 0x9908_B0DF;

    /// Most significant bit
    const UPPER_MASK: u32 = 0x8000_0000;

    /// Least significant 31 bits
    const LOWER_MASK: u32 = 0x7FFF_FFFF;

    /// Seeding multiplier from `init_genrand`
    const INIT_MULTIPLIER: u32 = 1_812_433_253;

    /// Create a generator seeded exactly like `init_genrand(seed)`.
    pub fn new(seed: u32) -> Self {
        let mut state = [0u32; Self::N];
        state[0] = seed;
        for i in 1..Self::N {
            let prev = state[i - 1];
            state[i] = Self::INIT_MULTIPLIER
                .wrapping_mul(prev ^ (prev >> 30))
                .wrapping_add(i as u32);
        }
        Self {
            state,
            index: Self::N,
        }
    }

    /// Regenerate the whole state block.
    fn twist(&mut self) {
        for i in 0..Self::N {
            let y = (self.state[i] & Self::UPPER_MASK)
                | (self.state[(i + 1) % Self::N] & Self::LOWER_MASK);
            let mut next = self.state[(i + Self::M) % Self::N] ^ (y >> 1);
            if y & 1 != 0 {
                next ^= Self::MATRIX_A;
            }
            self.state[i] = next;
        }
        self.index = 0;
    }

    /// Next tempered 32-bit output, equivalent to `genrand_int32()`.
    pub fn next_u32(&mut self) -> u32 {
        if self.index >= Self::N {
            self.twist();
        }

        let mut y = self.state[self.index];
        self.index += 1;

        y ^= y >> 11;
        y ^= (y << 7) & 0x9D2C_5680;
        y ^= (y << 15) & 0xEFC6_0000;
        y ^ (y >> 18)
    }

    /// Next byte of the stream (low 8 bits of one draw).
    #[inline]
    pub fn next_byte(&mut self) -> u8 {
        self.next_u32() as u8
    }

    /// Integer in `[lo, hi]` (both inclusive), one draw.
    ///
    /// Scales the draw into the span by multiply-and-shift, the integer form of
    /// `lo + span * real` with `real` in `[0, 1)`.
    ///
    /// # Panics
    ///
    /// Panics if `lo > hi`.
    pub fn next_range(&mut self, lo: u32, hi: u32) -> u32 {
        assert!(lo <= hi, "next_range: lo ({lo}) > hi ({hi})");
        let span = u64::from(hi - lo) + 1;
        lo + ((span * u64::from(self.next_u32())) >> 32) as u32
    }
}

impl std::fmt::Debug for Mt19937 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mt19937")
            .field("index", &self.index)
            .finish_non_exhaustive()
    }
}

impl RngCore for Mt19937 {
    fn next_u32(&mut self) -> u32 {
        Mt19937::next_u32(self)
    }

    fn next_u64(&mut self) -> u64 {
        let hi = u64::from(Mt19937::next_u32(self));
        let lo = u64::from(Mt19937::next_u32(self));
        (hi << 32) | lo
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        for chunk in dest.chunks_mut(4) {
            let word = Mt19937::next_u32(self).to_le_bytes();
            chunk.copy_from_slice(&word[..chunk.len()]);
        }
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}
