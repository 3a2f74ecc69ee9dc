//! Shared workload synthesis for the integration tests.

use coopsched::rng::XorShift64;
use std::hint::black_box;
use std::time::{Duration, Instant};

/// Size of one checksum block.
pub const BLOCK_LEN: usize = 64 * 1024;

/// A pseudo-random block for checksum workloads, deterministic per seed.
pub fn make_block(seed: u64) -> Vec<u8> {
    let mut rng = XorShift64::new(seed);
    (0..BLOCK_LEN).map(|_| rng.next_u64() as u8).collect()
}

/// One unit of checksum-shaped CPU work (FNV-1a over the block),
/// a few tens of microseconds on current hardware.
pub fn checksum_block(block: &[u8]) -> u64 {
    let mut hash = 0xcbf29ce484222325u64;
    for &b in block {
        hash ^= u64::from(b);
        hash = hash.wrapping_mul(0x100000001b3);
    }
    black_box(hash)
}

/// Burn roughly `amount` of wall-clock CPU on this thread.
pub fn burn_cpu(amount: Duration) {
    let start = Instant::now();
    while start.elapsed() < amount {
        black_box((0..64u64).fold(0u64, |a, b| a.wrapping_add(b.wrapping_mul(b))));
    }
}
