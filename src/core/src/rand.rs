//! Deterministic randomness, seeded by the invocation id.
//!
//! Replayed invocations observe the same sequence of values without
//! journaling them. The generator is a fixed, portable algorithm on purpose:
//! the values must be stable across SDK builds and platforms.

use rand::RngCore;
use rand_xoshiro::rand_core::SeedableRng;
use rand_xoshiro::Xoshiro256StarStar;
use restate_sdk_types::identifiers::InvocationId;
use uuid::Uuid;

#[derive(Debug)]
pub(crate) struct DeterministicRandom {
    rng: Xoshiro256StarStar,
}

impl DeterministicRandom {
    pub(crate) fn new(invocation_id: &InvocationId) -> Self {
        Self {
            rng: Xoshiro256StarStar::seed_from_u64(fold_id(invocation_id.as_bytes())),
        }
    }

    /// Uniformly distributed f64 in `[0, 1)`, like `Math.random()`.
    pub(crate) fn random(&mut self) -> f64 {
        let bits = self.rng.next_u64() >> 11;
        bits as f64 * (1.0 / (1u64 << 53) as f64)
    }

    /// Pseudo-random v4 uuid drawn from the deterministic generator.
    pub(crate) fn uuid(&mut self) -> Uuid {
        let mut bytes = [0u8; 16];
        self.rng.fill_bytes(&mut bytes);
        uuid::Builder::from_random_bytes(bytes).into_uuid()
    }
}

/// FNV-1a over the raw invocation id bytes. The seed expander behind
/// `seed_from_u64` takes care of turning this into a well-distributed state.
fn fold_id(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for b in bytes {
        hash ^= *b as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    use bytes::Bytes;

    fn test_id(raw: &'static [u8]) -> InvocationId {
        InvocationId::new(Bytes::from_static(raw), "inv-test")
    }

    #[test]
    fn same_id_same_sequence() {
        let mut a = DeterministicRandom::new(&test_id(b"id-1"));
        let mut b = DeterministicRandom::new(&test_id(b"id-1"));

        for _ in 0..16 {
            assert_eq!(a.random().to_bits(), b.random().to_bits());
        }
        assert_eq!(a.uuid(), b.uuid());
    }

    #[test]
    fn different_ids_diverge() {
        let mut a = DeterministicRandom::new(&test_id(b"id-1"));
        let mut b = DeterministicRandom::new(&test_id(b"id-2"));

        assert_ne!(a.uuid(), b.uuid());
    }

    #[test]
    fn random_is_in_unit_interval() {
        let mut r = DeterministicRandom::new(&test_id(b"id-3"));
        for _ in 0..1000 {
            let v = r.random();
            assert!((0.0..1.0).contains(&v));
        }
    }

    #[test]
    fn uuid_is_v4() {
        let mut r = DeterministicRandom::new(&test_id(b"id-4"));
        assert_eq!(r.uuid().get_version_num(), 4);
    }
}
