//! Busy call chain - a deep, CPU-burning stack to profile
//!
//! `main → level_1 → ... → level_20 → spin`, where `spin` hashes in a tight
//! loop. Every sample should show the whole chain, so this is a quick check
//! that unwinding and symbolization work end to end.
//!
//! Run with: cargo run --release --example busy-chain -- [SECONDS]
//! Profile with: sudo powerscope -F 1000 -- ./target/release/examples/busy-chain 10

use std::hint::black_box;
use std::time::{Duration, Instant};

#[inline(never)]
fn spin(deadline: Instant) -> u64 {
    let mut state = 0x9e37_79b9_7f4a_7c15_u64;
    while Instant::now() < deadline {
        for _ in 0..10_000 {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
        }
        black_box(state);
    }
    state
}

macro_rules! chain {
    ($name:ident => $next:ident) => {
        #[inline(never)]
        fn $name(deadline: Instant) -> u64 {
            black_box($next(deadline)).wrapping_add(1)
        }
    };
}

chain!(level_20 => spin);
chain!(level_19 => level_20);
chain!(level_18 => level_19);
chain!(level_17 => level_18);
chain!(level_16 => level_17);
chain!(level_15 => level_16);
chain!(level_14 => level_15);
chain!(level_13 => level_14);
chain!(level_12 => level_13);
chain!(level_11 => level_12);
chain!(level_10 => level_11);
chain!(level_9 => level_10);
chain!(level_8 => level_9);
chain!(level_7 => level_8);
chain!(level_6 => level_7);
chain!(level_5 => level_6);
chain!(level_4 => level_5);
chain!(level_3 => level_4);
chain!(level_2 => level_3);
chain!(level_1 => level_2);

fn main() {
    let seconds = std::env::args().nth(1).and_then(|s| s.parse().ok()).unwrap_or(10);
    println!("🔥 busy-chain: burning CPU for {seconds}s (pid {})", std::process::id());

    let result = level_1(Instant::now() + Duration::from_secs(seconds));
    println!("✓ done ({result:x})");
}
