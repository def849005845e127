// Copyright (c) 2023 Octavian Oncescu
// Copyright (c) 2023-2024 The Aquila Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

//! Proof of work nonces for unfunded message transactions.
//!
//! Protocol messages are often sent from ephemeral trade keys with no funded
//! account behind them. Instead of a fee, such transactions carry a hashcash
//! nonce over their payload. Computing one is CPU bound and must not run on
//! the trade bot's poll task.

/// Difficulty for messages from unfunded accounts, in leading zero bits.
pub const MESSAGE_POW_DIFFICULTY: u32 = 14;

fn pow_digest(payload: &[u8], nonce: u64) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    hasher.update(payload);
    hasher.update(&nonce.to_be_bytes());
    *hasher.finalize().as_bytes()
}

#[must_use]
pub fn meets_difficulty(hash: &[u8; 32], difficulty: u32) -> bool {
    let mut remaining = difficulty;

    for byte in hash {
        if remaining == 0 {
            return true;
        }

        let zeros = byte.leading_zeros();
        if zeros < remaining.min(8) {
            return false;
        }

        if remaining <= 8 {
            return true;
        }

        if *byte != 0 {
            return false;
        }

        remaining -= 8;
    }

    true
}

/// Finds the lowest nonce whose digest meets `difficulty`. Deterministic for
/// a given payload, so re-issuing an unconfirmed message reproduces the same
/// transaction bytes.
#[must_use]
pub fn compute_nonce(payload: &[u8], difficulty: u32) -> u64 {
    let mut nonce = 0_u64;
    loop {
        if meets_difficulty(&pow_digest(payload, nonce), difficulty) {
            return nonce;
        }
        nonce += 1;
    }
}

#[must_use]
pub fn verify_nonce(payload: &[u8], nonce: u64, difficulty: u32) -> bool {
    meets_difficulty(&pow_digest(payload, nonce), difficulty)
}
