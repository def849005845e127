// Copyright (c) 2023 Octavian Oncescu
// Copyright (c) 2023-2024 The Aquila Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

//! Automated Cross-Chain Trading Contracts.
//!
//! An ACCT is an escrow program deployed on the Aquila chain plus the
//! off-chain protocol that drives it. The program holds the creator's funds
//! and hands them to whoever reveals the preimage of a published hash before
//! the refund deadline. Combined with a hash-locked output on the foreign
//! chain this yields a trustless atomic swap.

mod assembler;
#[cfg(test)]
pub(crate) mod harness;
mod layout;
mod messages;
mod program;
mod reader;
mod registry;

pub use assembler::*;
pub use layout::*;
pub use messages::*;
pub use program::*;
pub use reader::*;
pub use registry::*;

use crate::primitives::Address;
use bincode::{Decode, Encode};
use num_derive::FromPrimitive;
use num_traits::FromPrimitive as FromPrimitiveTrait;
use serde::{Deserialize, Serialize};

/// Shortest trade timeout accepted by the builder, in minutes.
pub const MIN_TRADE_TIMEOUT: u64 = 10;

/// Longest trade timeout accepted by the builder, in minutes.
pub const MAX_TRADE_TIMEOUT: u64 = 50_000;

/// Foreign public key hash length embedded in escrow programs.
pub const FOREIGN_PKH_BYTES: usize = 20;

/// The escrow program's state machine value.
///
/// `Offering` is the state immediately after deployment. The three rightmost
/// states are terminal and never transition further.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    FromPrimitive,
    Encode,
    Decode,
    Serialize,
    Deserialize,
)]
pub enum AcctMode {
    Offering = 0,
    Trading = 1,
    Redeemed = 2,
    Refunded = 3,
    Cancelled = 4,
}

impl AcctMode {
    #[must_use]
    pub fn from_word(word: u64) -> Option<Self> {
        Self::from_u64(word)
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Redeemed | Self::Refunded | Self::Cancelled)
    }
}

/// Parameters a trade creator supplies when building an escrow program.
///
/// Immutable once a program is built; embedded verbatim into the program's
/// initial data segment.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode, Serialize, Deserialize)]
pub struct TradeParameters {
    /// The creator's ephemeral trade address. Only trade messages sent from
    /// this address can move the escrow to `Trading`.
    pub creator_trade_address: Address,

    /// Hash of the creator's foreign chain public key. The counterparty locks
    /// the foreign leg to this key.
    pub creator_foreign_pkh: Vec<u8>,

    /// Amount of the host asset paid out on redemption.
    pub redeem_amount: u64,

    /// Foreign chain amount the creator expects in return.
    pub expected_foreign_amount: u64,

    /// Minutes the offer stays open before the escrow refunds itself.
    pub trade_timeout_minutes: u64,
}

impl TradeParameters {
    /// Caller input validation, performed before any compilation work.
    pub fn validate(&self) -> Result<(), TradeParameterErr> {
        if self.creator_foreign_pkh.len() != FOREIGN_PKH_BYTES {
            return Err(TradeParameterErr::InvalidForeignPkhLength(
                self.creator_foreign_pkh.len(),
            ));
        }

        if self.redeem_amount == 0 {
            return Err(TradeParameterErr::ZeroRedeemAmount);
        }

        if self.expected_foreign_amount == 0 {
            return Err(TradeParameterErr::ZeroForeignAmount);
        }

        if self.trade_timeout_minutes < MIN_TRADE_TIMEOUT
            || self.trade_timeout_minutes > MAX_TRADE_TIMEOUT
        {
            return Err(TradeParameterErr::TimeoutOutOfRange(
                self.trade_timeout_minutes,
            ));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TradeParameterErr {
    InvalidForeignPkhLength(usize),
    ZeroRedeemAmount,
    ZeroForeignAmount,
    TimeoutOutOfRange(u64),
}

/// Refund timeout in minutes granted to the counterparty, derived from the
/// foreign chain lock time and the moment the offer was received.
///
/// The divisions truncate. The legacy protocol truncates here as well and
/// every deployed escrow depends on the exact value, so this must not be
/// "fixed" to round.
#[must_use]
pub fn calc_refund_timeout(lock_time_a: u64, offer_timestamp_millis: i64) -> i64 {
    (lock_time_a as i64 - offer_timestamp_millis / 1000) / 2 / 60
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_from_word() {
        assert_eq!(AcctMode::from_word(0), Some(AcctMode::Offering));
        assert_eq!(AcctMode::from_word(1), Some(AcctMode::Trading));
        assert_eq!(AcctMode::from_word(2), Some(AcctMode::Redeemed));
        assert_eq!(AcctMode::from_word(3), Some(AcctMode::Refunded));
        assert_eq!(AcctMode::from_word(4), Some(AcctMode::Cancelled));
        assert_eq!(AcctMode::from_word(5), None);
    }

    #[test]
    fn terminal_modes() {
        assert!(!AcctMode::Offering.is_terminal());
        assert!(!AcctMode::Trading.is_terminal());
        assert!(AcctMode::Redeemed.is_terminal());
        assert!(AcctMode::Refunded.is_terminal());
        assert!(AcctMode::Cancelled.is_terminal());
    }

    #[test]
    fn parameter_validation() {
        let params = TradeParameters {
            creator_trade_address: Address::random(),
            creator_foreign_pkh: vec![1; FOREIGN_PKH_BYTES],
            redeem_amount: 100,
            expected_foreign_amount: 1,
            trade_timeout_minutes: 120,
        };
        assert!(params.validate().is_ok());

        let mut bad = params.clone();
        bad.creator_foreign_pkh = vec![1; 19];
        assert_eq!(
            bad.validate(),
            Err(TradeParameterErr::InvalidForeignPkhLength(19))
        );

        let mut bad = params.clone();
        bad.redeem_amount = 0;
        assert_eq!(bad.validate(), Err(TradeParameterErr::ZeroRedeemAmount));

        let mut bad = params.clone();
        bad.expected_foreign_amount = 0;
        assert_eq!(bad.validate(), Err(TradeParameterErr::ZeroForeignAmount));

        let mut bad = params.clone();
        bad.trade_timeout_minutes = 9;
        assert_eq!(bad.validate(), Err(TradeParameterErr::TimeoutOutOfRange(9)));

        let mut bad = params;
        bad.trade_timeout_minutes = 50_001;
        assert_eq!(
            bad.validate(),
            Err(TradeParameterErr::TimeoutOutOfRange(50_001))
        );
    }

    #[test]
    fn refund_timeout_truncates() {
        // 90 minutes of lock time left: 90 / 2 = 45
        assert_eq!(calc_refund_timeout(5400, 0), 45);
        // 91 minutes: truncates to 45, not 45.5
        assert_eq!(calc_refund_timeout(5460, 0), 45);
        // offer timestamp is in milliseconds
        assert_eq!(calc_refund_timeout(5400, 1_000), 44);
        // expired lock time yields a non-positive timeout
        assert!(calc_refund_timeout(100, 1_000_000) <= 0);
    }
}
