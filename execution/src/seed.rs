//! Seeded randomness and commit-reveal for round outcomes.
//!
//! Every round's randomness is derived from a salt, the game, and the round
//! index alone, so any observer holding the salt replays the exact same draws.
//!
//! ## Derivation
//!
//! ```text
//! reveal[n] = sha256(salt || game || n || "reveal")
//! commit[n] = sha256(reveal[n])
//! draw[n,k] = sha256(reveal[n] || k)
//! ```
//!
//! When the salt is public (browser observers) the commitment adds nothing;
//! when a server keeps the salt private it publishes `commit[n]` while betting
//! is open and `reveal[n]` once the round resolves, and anyone can check that
//! the outcome was fixed before stakes closed.

use commonware_cryptography::sha256::Sha256;
use commonware_cryptography::Hasher;
use fortune_types::GameKind;

/// Length of commit and reveal values in bytes.
pub const COMMIT_REVEAL_LEN: usize = 32;

/// Published commitment to a round's randomness.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoundCommitment {
    pub round_index: u64,
    /// Published before betting closes.
    pub commit: [u8; COMMIT_REVEAL_LEN],
    /// Disclosed once the round resolves.
    pub reveal: [u8; COMMIT_REVEAL_LEN],
}

impl RoundCommitment {
    pub fn new(salt: &str, game: GameKind, round_index: u64) -> Self {
        let reveal = derive_reveal(salt, game, round_index);
        Self {
            round_index,
            commit: compute_commit(&reveal),
            reveal,
        }
    }

    pub fn verify(&self) -> bool {
        verify_commit_reveal(&self.commit, &self.reveal)
    }
}

fn derive_reveal(salt: &str, game: GameKind, round_index: u64) -> [u8; COMMIT_REVEAL_LEN] {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(&[game as u8]);
    hasher.update(&round_index.to_be_bytes());
    hasher.update(b"reveal");
    hasher.finalize().0
}

/// `commit = sha256(reveal)`
pub fn compute_commit(reveal: &[u8; COMMIT_REVEAL_LEN]) -> [u8; COMMIT_REVEAL_LEN] {
    let mut hasher = Sha256::new();
    hasher.update(reveal);
    hasher.finalize().0
}

pub fn verify_commit_reveal(
    commit: &[u8; COMMIT_REVEAL_LEN],
    reveal: &[u8; COMMIT_REVEAL_LEN],
) -> bool {
    compute_commit(reveal) == *commit
}

/// Verify a commit-reveal pair received as raw bytes (e.g. decoded from hex).
pub fn verify_commit_reveal_slices(
    commit: &[u8],
    reveal: &[u8],
) -> Result<[u8; COMMIT_REVEAL_LEN], CommitRevealError> {
    let commit: [u8; COMMIT_REVEAL_LEN] = commit
        .try_into()
        .map_err(|_| CommitRevealError::InvalidCommitLength(commit.len()))?;
    let reveal: [u8; COMMIT_REVEAL_LEN] = reveal
        .try_into()
        .map_err(|_| CommitRevealError::InvalidRevealLength(reveal.len()))?;
    if verify_commit_reveal(&commit, &reveal) {
        Ok(reveal)
    } else {
        Err(CommitRevealError::VerificationFailed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitRevealError {
    InvalidCommitLength(usize),
    InvalidRevealLength(usize),
    VerificationFailed,
}

impl std::fmt::Display for CommitRevealError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidCommitLength(len) => {
                write!(f, "invalid commit length: {} (expected 32)", len)
            }
            Self::InvalidRevealLength(len) => {
                write!(f, "invalid reveal length: {} (expected 32)", len)
            }
            Self::VerificationFailed => write!(f, "commit-reveal verification failed"),
        }
    }
}

impl std::error::Error for CommitRevealError {}

/// Deterministic stream of draws for one round.
#[derive(Clone, Debug)]
pub struct RoundRng {
    reveal: [u8; COMMIT_REVEAL_LEN],
    counter: u32,
}

impl RoundRng {
    pub fn new(salt: &str, game: GameKind, round_index: u64) -> Self {
        Self::from_reveal(derive_reveal(salt, game, round_index))
    }

    pub fn from_reveal(reveal: [u8; COMMIT_REVEAL_LEN]) -> Self {
        Self { reveal, counter: 0 }
    }

    pub fn next_u64(&mut self) -> u64 {
        let mut hasher = Sha256::new();
        hasher.update(&self.reveal);
        hasher.update(&self.counter.to_be_bytes());
        let digest = hasher.finalize().0;
        self.counter = self.counter.wrapping_add(1);
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        u64::from_be_bytes(bytes)
    }

    pub fn next_u32(&mut self) -> u32 {
        (self.next_u64() >> 32) as u32
    }

    /// Uniform draw in `[0, 1)` with 53 bits of precision.
    pub fn next_unit(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Uniform draw in `[low, high]`.
    pub fn next_in_range(&mut self, low: u64, high: u64) -> u64 {
        if high <= low {
            return low;
        }
        let span = high - low;
        if span == u64::MAX {
            return self.next_u64();
        }
        low + self.next_u64() % (span + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commitment_deterministic() {
        let a = RoundCommitment::new("salt", GameKind::Wheel, 7);
        let b = RoundCommitment::new("salt", GameKind::Wheel, 7);
        assert_eq!(a, b);
        assert!(a.verify());
    }

    #[test]
    fn test_commitment_separates_rounds_games_and_salts() {
        let base = RoundCommitment::new("salt", GameKind::Wheel, 7);
        assert_ne!(base.reveal, RoundCommitment::new("salt", GameKind::Wheel, 8).reveal);
        assert_ne!(base.reveal, RoundCommitment::new("salt", GameKind::Crash, 7).reveal);
        assert_ne!(base.reveal, RoundCommitment::new("other", GameKind::Wheel, 7).reveal);
    }

    #[test]
    fn test_tampered_reveal_fails() {
        let pair = RoundCommitment::new("salt", GameKind::Crash, 42);
        let mut bad_reveal = pair.reveal;
        bad_reveal[0] ^= 0xFF;
        assert!(!verify_commit_reveal(&pair.commit, &bad_reveal));
    }

    #[test]
    fn test_verify_slices() {
        let pair = RoundCommitment::new("salt", GameKind::Crash, 1);
        assert_eq!(
            verify_commit_reveal_slices(&pair.commit, &pair.reveal),
            Ok(pair.reveal)
        );
        assert_eq!(
            verify_commit_reveal_slices(&[0u8; 16], &pair.reveal),
            Err(CommitRevealError::InvalidCommitLength(16))
        );
        assert_eq!(
            verify_commit_reveal_slices(&pair.commit, &[0u8; 8]),
            Err(CommitRevealError::InvalidRevealLength(8))
        );
        assert_eq!(
            verify_commit_reveal_slices(&[0u8; 32], &[1u8; 32]),
            Err(CommitRevealError::VerificationFailed)
        );
    }

    #[test]
    fn test_rng_replays() {
        let mut a = RoundRng::new("salt", GameKind::Wheel, 99);
        let mut b = RoundRng::new("salt", GameKind::Wheel, 99);
        for _ in 0..32 {
            assert_eq!(a.next_u64(), b.next_u64());
        }
    }

    #[test]
    fn test_unit_draws_in_range() {
        let mut rng = RoundRng::new("salt", GameKind::Wheel, 0);
        for _ in 0..10_000 {
            let draw = rng.next_unit();
            assert!((0.0..1.0).contains(&draw));
        }
    }

    #[test]
    fn test_next_in_range_bounds() {
        let mut rng = RoundRng::new("salt", GameKind::Crash, 3);
        for _ in 0..1_000 {
            let value = rng.next_in_range(1_000, 3_000);
            assert!((1_000..=3_000).contains(&value));
        }
        assert_eq!(rng.next_in_range(5, 5), 5);
        assert_eq!(rng.next_in_range(9, 2), 9);
    }
}
