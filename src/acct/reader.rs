// Copyright (c) 2023 Octavian Oncescu
// Copyright (c) 2023-2024 The Aquila Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use super::layout::*;
use super::AcctMode;
use crate::foreign::ForeignChain;
use crate::primitives::{Address, Hash160, ADDRESS_BYTES};
use serde::{Deserialize, Serialize};

/// Denormalised snapshot of one escrow program's trade state.
///
/// Derived, never authoritative: recomputed on demand from the program's
/// current data segment and never cached across mode changes.
///
/// Fields are populated strictly by what the state machine has actually
/// written. While the mode is `Offering` the partner, lock time and secret
/// fields hold uninitialised memory on chain and are therefore `None` here
/// rather than zero garbage; the payout address only appears once the mode is
/// `Redeemed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossChainTradeData {
    pub foreign_blockchain: ForeignChain,
    pub acct_version: u16,
    pub program_address: Address,
    pub creator_trade_address: Address,
    pub creator_foreign_pkh: Hash160,
    pub redeem_amount: u64,
    pub expected_foreign_amount: u64,
    pub trade_timeout_minutes: u64,
    pub mode: AcctMode,
    pub creator_address: Option<Address>,
    pub creation_timestamp: Option<i64>,
    pub aquila_partner_address: Option<Address>,
    pub partner_foreign_public_key: Option<Vec<u8>>,
    pub refund_timeout_minutes: Option<u64>,
    pub hash_of_secret: Option<Hash160>,
    pub lock_time_a: Option<u64>,
    pub refund_deadline: Option<i64>,
    pub payout_address: Option<Address>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TradeReadErr {
    BadImageLength { expected: usize, actual: usize },
    UnknownMode(u64),
}

fn address_group(image: &[u8], slot: SlotIndex) -> Address {
    let bytes = read_bytes(image, slot, ADDRESS_WORDS);
    let mut out = Address([0; ADDRESS_BYTES]);
    out.0.copy_from_slice(&bytes[..ADDRESS_BYTES]);
    out
}

fn pkh_group(image: &[u8], slot: SlotIndex) -> Hash160 {
    let bytes = read_bytes(image, slot, PKH_WORDS);
    let mut out = Hash160([0; 20]);
    out.0.copy_from_slice(&bytes[..20]);
    out
}

/// Parses an escrow program's current data segment into a structured trade
/// snapshot, walking the layout in the exact order the builder wrote it.
pub fn read_trade_data(
    chain: ForeignChain,
    version: u16,
    foreign_public_key_len: usize,
    program_address: Address,
    image: &[u8],
) -> Result<CrossChainTradeData, TradeReadErr> {
    if image.len() != DATA_SEGMENT_BYTES {
        return Err(TradeReadErr::BadImageLength {
            expected: DATA_SEGMENT_BYTES,
            actual: image.len(),
        });
    }

    let mode_word = read_word(image, SLOT_MODE);
    let mode = AcctMode::from_word(mode_word).ok_or(TradeReadErr::UnknownMode(mode_word))?;

    // Constants region: trade parameters, present in every mode.
    let creator_trade_address = address_group(image, SLOT_CREATOR_TRADE_ADDRESS);
    let creator_foreign_pkh = pkh_group(image, SLOT_CREATOR_FOREIGN_PKH);
    let redeem_amount = read_word(image, SLOT_REDEEM_AMOUNT);
    let expected_foreign_amount = read_word(image, SLOT_EXPECTED_FOREIGN_AMOUNT);
    let trade_timeout_minutes = read_word(image, SLOT_TRADE_TIMEOUT_MINUTES);

    // Initialization writes: present once the program has run its first
    // block, regardless of mode. A zero group means not yet written.
    let creator_address = Some(address_group(image, SLOT_CREATOR_ADDRESS)).filter(|a| !a.is_zero());
    let creation_timestamp = match read_word(image, SLOT_CREATION_TIMESTAMP) {
        0 => None,
        ts => Some(ts as i64),
    };

    // Partner details exist only once a trade message has switched the mode
    // to Trading; before that the slots hold meaningless zeroes. A refund can
    // fire both from Offering (offer deadline) and Trading (refund deadline),
    // so Refunded decides by whether a partner was ever registered.
    let trading = match mode {
        AcctMode::Trading | AcctMode::Redeemed => true,
        AcctMode::Refunded => !address_group(image, SLOT_PARTNER_TRADE_ADDRESS).is_zero(),
        AcctMode::Offering | AcctMode::Cancelled => false,
    };
    let aquila_partner_address =
        trading.then(|| address_group(image, SLOT_PARTNER_TRADE_ADDRESS));
    let partner_foreign_public_key = trading.then(|| {
        read_bytes(image, SLOT_PARTNER_FOREIGN_PUBKEY, FOREIGN_PUBKEY_WORDS)
            [..foreign_public_key_len]
            .to_vec()
    });
    let refund_timeout_minutes = trading.then(|| read_word(image, SLOT_REFUND_TIMEOUT_MINUTES));
    let hash_of_secret = trading.then(|| pkh_group(image, SLOT_HASH_OF_SECRET));
    let lock_time_a = trading.then(|| read_word(image, SLOT_LOCK_TIME_A));
    let refund_deadline = trading.then(|| read_word(image, SLOT_REFUND_DEADLINE) as i64);

    let payout_address =
        (mode == AcctMode::Redeemed).then(|| address_group(image, SLOT_PAYOUT_ADDRESS));

    Ok(CrossChainTradeData {
        foreign_blockchain: chain,
        acct_version: version,
        program_address,
        creator_trade_address,
        creator_foreign_pkh,
        redeem_amount,
        expected_foreign_amount,
        trade_timeout_minutes,
        mode,
        creator_address,
        creation_timestamp,
        aquila_partner_address,
        partner_foreign_public_key,
        refund_timeout_minutes,
        hash_of_secret,
        lock_time_a,
        refund_deadline,
        payout_address,
    })
}
