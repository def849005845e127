// Copyright (c) 2023 Octavian Oncescu
// Copyright (c) 2023-2024 The Aquila Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

//! Test evaluator for escrow programs.
//!
//! The stack machine interpreter that executes deployed programs lives
//! outside this crate, so tests drive a data segment image through the same
//! rules the emitted byte code encodes: message dispatch by sender and exact
//! length, the verbatim message copy into the layout, the HASH160 commitment
//! check and the deadline arithmetic. Everything is applied through the
//! shared slot constants, which is exactly what keeps the builder and reader
//! honest about the layout.

use super::layout::*;
use super::program::DeployedProgram;
use super::AcctMode;
use crate::primitives::{Address, Hash160};

/// Payout recorded by the harness when the escrow disburses funds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payout {
    pub to: Address,
    pub amount: u64,
}

pub struct EscrowHarness {
    image: Vec<u8>,
    finished: bool,
    pub payouts: Vec<Payout>,
}

impl EscrowHarness {
    /// Deploys `program`, running the initialization block: creation
    /// timestamp, creator capture and the offer deadline.
    pub fn deploy(program: &DeployedProgram, creator: &Address, creation_timestamp: u64) -> Self {
        let mut harness = Self {
            image: program.data.clone(),
            finished: false,
            payouts: vec![],
        };

        harness.put_group(SLOT_CREATOR_ADDRESS, ADDRESS_WORDS, creator.as_bytes());
        harness.put_word(SLOT_CREATION_TIMESTAMP, creation_timestamp);
        harness.put_word(SLOT_LAST_TX_TIMESTAMP, creation_timestamp);
        let timeout = read_word(&harness.image, SLOT_TRADE_TIMEOUT_MINUTES);
        harness.put_word(SLOT_REFUND_DEADLINE, creation_timestamp + timeout * 60);
        harness
    }

    #[must_use]
    pub fn image(&self) -> &[u8] {
        &self.image
    }

    #[must_use]
    pub fn mode(&self) -> AcctMode {
        AcctMode::from_word(read_word(&self.image, SLOT_MODE)).unwrap()
    }

    fn put_word(&mut self, slot: SlotIndex, value: u64) {
        self.image[byte_offset(slot)..byte_offset(slot) + WORD_BYTES]
            .copy_from_slice(&value.to_be_bytes());
    }

    fn put_group(&mut self, slot: SlotIndex, words: u16, bytes: &[u8]) {
        let width = words as usize * WORD_BYTES;
        let offset = byte_offset(slot);
        self.image[offset..offset + width].fill(0);
        self.image[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    fn group(&self, slot: SlotIndex, words: u16) -> &[u8] {
        read_bytes(&self.image, slot, words)
    }

    fn address_matches(&self, slot: SlotIndex, address: &Address) -> bool {
        &self.group(slot, ADDRESS_WORDS)[..20] == address.as_bytes()
    }

    /// Advances the block clock without delivering a transaction, firing
    /// deadline transitions.
    pub fn tick(&mut self, block_timestamp: u64) {
        if self.finished {
            return;
        }

        let deadline = read_word(&self.image, SLOT_REFUND_DEADLINE);
        if block_timestamp >= deadline {
            self.put_word(SLOT_MODE, AcctMode::Refunded as u64);
            self.finished = true;
        }
    }

    /// Delivers a message transaction to the escrow.
    pub fn deliver(&mut self, sender: &Address, payload: &[u8], block_timestamp: u64) {
        self.tick(block_timestamp);
        if self.finished {
            return;
        }

        self.put_word(SLOT_LAST_TX_TIMESTAMP, block_timestamp);

        match self.mode() {
            AcctMode::Offering => self.deliver_offering(sender, payload, block_timestamp),
            AcctMode::Trading => self.deliver_trading(sender, payload),
            _ => {}
        }
    }

    fn deliver_offering(&mut self, sender: &Address, payload: &[u8], block_timestamp: u64) {
        if self.address_matches(SLOT_CREATOR_TRADE_ADDRESS, sender) {
            let expected = read_word(&self.image, SLOT_TRADE_MSG_LENGTH) as usize;
            if payload.len() != expected {
                return;
            }

            // The trade message image lands on its slots verbatim.
            let offset = byte_offset(SLOT_PARTNER_TRADE_ADDRESS);
            self.image[offset..offset + expected].copy_from_slice(payload);

            let timeout = read_word(&self.image, SLOT_REFUND_TIMEOUT_MINUTES);
            self.put_word(SLOT_REFUND_DEADLINE, block_timestamp + timeout * 60);
            self.put_word(SLOT_MODE, AcctMode::Trading as u64);
            return;
        }

        if self.address_matches(SLOT_CREATOR_ADDRESS, sender) {
            let expected = read_word(&self.image, SLOT_CANCEL_MSG_LENGTH) as usize;
            if payload.len() != expected {
                return;
            }

            self.put_word(SLOT_MODE, AcctMode::Cancelled as u64);
            self.finished = true;
        }
    }

    fn deliver_trading(&mut self, sender: &Address, payload: &[u8]) {
        if !self.address_matches(SLOT_PARTNER_TRADE_ADDRESS, sender) {
            return;
        }

        let expected = read_word(&self.image, SLOT_REDEEM_MSG_LENGTH) as usize;
        if payload.len() != expected {
            return;
        }

        let offset = byte_offset(SLOT_MSG_SECRET);
        self.image[offset..offset + expected].copy_from_slice(payload);

        // Commitment check over the revealed preimage.
        let secret = self.group(SLOT_MSG_SECRET, ADDRESS_WORDS).to_vec();
        let check = Hash160::hash160(&secret[..32]);
        self.put_group(SLOT_HASH_CHECK, PKH_WORDS, check.as_bytes());
        if self.group(SLOT_HASH_CHECK, PKH_WORDS) != self.group(SLOT_HASH_OF_SECRET, PKH_WORDS) {
            return;
        }

        let amount = read_word(&self.image, SLOT_REDEEM_AMOUNT);
        let mut to = Address([0; 20]);
        to.0
            .copy_from_slice(&self.group(SLOT_PAYOUT_ADDRESS, ADDRESS_WORDS)[..20]);
        self.payouts.push(Payout { to, amount });
        self.put_word(SLOT_MODE, AcctMode::Redeemed as u64);
        self.finished = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acct::{
        EscrowProgramBuilder, RedeemMessage, TradeMessage, TradeParameters, FOREIGN_PKH_BYTES,
    };
    use crate::foreign::ForeignChain;
    use crate::primitives::SwapSecret;

    const T0: u64 = 1_700_000_000;

    fn setup() -> (EscrowHarness, Address, Address) {
        let creator_trade_address = Address([0x11; 20]);
        let creator_address = Address([0x10; 20]);
        let params = TradeParameters {
            creator_trade_address,
            creator_foreign_pkh: vec![0x22; FOREIGN_PKH_BYTES],
            redeem_amount: 100,
            expected_foreign_amount: 1,
            trade_timeout_minutes: 120,
        };
        let program = EscrowProgramBuilder::new(ForeignChain::Bitcoin, 1)
            .build(&params)
            .unwrap();
        let harness = EscrowHarness::deploy(&program, &creator_address, T0);
        (harness, creator_trade_address, creator_address)
    }

    fn trade_message(partner: Address, secret: &SwapSecret) -> TradeMessage {
        TradeMessage {
            partner_trade_address: partner,
            partner_foreign_public_key: vec![0x02; 33],
            refund_timeout_minutes: 60,
            hash_of_secret: secret.hash_of_secret(),
            lock_time_a: T0 + 7200,
        }
    }

    #[test]
    fn end_to_end_offering_trading_redeemed() {
        let (mut escrow, creator_trade, _) = setup();
        assert_eq!(escrow.mode(), AcctMode::Offering);

        let secret = SwapSecret([0xab; 32]);
        let partner = Address([0x55; 20]);
        escrow.deliver(&creator_trade, &trade_message(partner, &secret).encode(), T0 + 60);
        assert_eq!(escrow.mode(), AcctMode::Trading);

        let data = crate::acct::Acct::BitcoinV1
            .trade_data(Address([0xaa; 20]), escrow.image())
            .unwrap();
        assert_eq!(data.aquila_partner_address, Some(partner));
        assert_eq!(data.hash_of_secret, Some(secret.hash_of_secret()));

        let payout = Address([0x77; 20]);
        let redeem = RedeemMessage {
            secret,
            payout_address: payout,
        };
        escrow.deliver(&partner, &redeem.encode(), T0 + 120);
        assert_eq!(escrow.mode(), AcctMode::Redeemed);
        assert_eq!(escrow.payouts, vec![Payout { to: payout, amount: 100 }]);

        let data = crate::acct::Acct::BitcoinV1
            .trade_data(Address([0xaa; 20]), escrow.image())
            .unwrap();
        assert_eq!(data.payout_address, Some(payout));
    }

    #[test]
    fn only_creator_trade_address_can_open_trading() {
        let (mut escrow, _, _) = setup();
        let secret = SwapSecret([0xab; 32]);
        let message = trade_message(Address([0x55; 20]), &secret).encode();

        escrow.deliver(&Address([0xee; 20]), &message, T0 + 60);
        assert_eq!(escrow.mode(), AcctMode::Offering);
    }

    #[test]
    fn wrong_length_trade_message_is_ignored() {
        let (mut escrow, creator_trade, _) = setup();
        let secret = SwapSecret([0xab; 32]);
        let mut message = trade_message(Address([0x55; 20]), &secret).encode();
        message.push(0);

        escrow.deliver(&creator_trade, &message, T0 + 60);
        assert_eq!(escrow.mode(), AcctMode::Offering);
    }

    #[test]
    fn cancel_from_creator_main_address() {
        let (mut escrow, _, creator_main) = setup();
        let cancel = crate::acct::CancelMessage {
            creator_address: creator_main,
        };

        escrow.deliver(&creator_main, &cancel.encode(), T0 + 60);
        assert_eq!(escrow.mode(), AcctMode::Cancelled);
    }

    #[test]
    fn cancel_from_other_sender_is_ignored() {
        let (mut escrow, _, creator_main) = setup();
        let cancel = crate::acct::CancelMessage {
            creator_address: creator_main,
        };

        escrow.deliver(&Address([0xee; 20]), &cancel.encode(), T0 + 60);
        assert_eq!(escrow.mode(), AcctMode::Offering);
    }

    #[test]
    fn redeem_with_wrong_secret_is_rejected() {
        let (mut escrow, creator_trade, _) = setup();
        let secret = SwapSecret([0xab; 32]);
        let partner = Address([0x55; 20]);
        escrow.deliver(&creator_trade, &trade_message(partner, &secret).encode(), T0 + 60);

        let redeem = RedeemMessage {
            secret: SwapSecret([0xac; 32]),
            payout_address: Address([0x77; 20]),
        };
        escrow.deliver(&partner, &redeem.encode(), T0 + 120);
        assert_eq!(escrow.mode(), AcctMode::Trading);
        assert!(escrow.payouts.is_empty());
    }

    #[test]
    fn redeem_from_unregistered_sender_is_rejected() {
        let (mut escrow, creator_trade, _) = setup();
        let secret = SwapSecret([0xab; 32]);
        escrow.deliver(
            &creator_trade,
            &trade_message(Address([0x55; 20]), &secret).encode(),
            T0 + 60,
        );

        let redeem = RedeemMessage {
            secret,
            payout_address: Address([0x77; 20]),
        };
        escrow.deliver(&Address([0xee; 20]), &redeem.encode(), T0 + 120);
        assert_eq!(escrow.mode(), AcctMode::Trading);
    }

    #[test]
    fn offer_deadline_refunds() {
        let (mut escrow, _, _) = setup();
        // 120 minute offer window
        escrow.tick(T0 + 120 * 60);
        assert_eq!(escrow.mode(), AcctMode::Refunded);
    }

    #[test]
    fn refund_deadline_in_trading() {
        let (mut escrow, creator_trade, _) = setup();
        let secret = SwapSecret([0xab; 32]);
        let partner = Address([0x55; 20]);
        escrow.deliver(&creator_trade, &trade_message(partner, &secret).encode(), T0 + 60);

        // 60 minute refund window from the trade message
        escrow.tick(T0 + 60 + 60 * 60);
        assert_eq!(escrow.mode(), AcctMode::Refunded);

        // Terminal: a late redeem changes nothing.
        let redeem = RedeemMessage {
            secret,
            payout_address: Address([0x77; 20]),
        };
        escrow.deliver(&partner, &redeem.encode(), T0 + 60 + 61 * 60);
        assert_eq!(escrow.mode(), AcctMode::Refunded);
        assert!(escrow.payouts.is_empty());
    }
}
