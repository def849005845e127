// Copyright (c) 2023 Octavian Oncescu
// Copyright (c) 2023-2024 The Aquila Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

//! Escrow program data segment layout.
//!
//! The data segment is an ordered list of named 64 bit big-endian slots. The
//! constants region is written once by [`super::EscrowProgramBuilder`] and
//! never mutated by the program; the variables region is written by the
//! program as the trade advances. Slot offsets are fixed at compile time and
//! shared between the builder and [`super::read_trade_data`] — a mismatch
//! between the two is a silent correctness bug, which is why
//! [`DataSegmentWriter`] asserts the byte offset of every slot as it is
//! written.

use static_assertions::const_assert_eq;

pub type SlotIndex = u16;

pub const WORD_BYTES: usize = 8;

/// Words occupied by a 32 byte address group (20 byte address, zero padded).
pub const ADDRESS_WORDS: u16 = 4;

/// Words occupied by a foreign public key hash (20 bytes, zero padded to 24).
pub const PKH_WORDS: u16 = 3;

/// Words occupied by a foreign public key (up to 40 bytes, zero padded).
pub const FOREIGN_PUBKEY_WORDS: u16 = 5;

// Constants region. Trade parameters, message length constants and slot
// pointers, embedded verbatim at creation.
pub const SLOT_CREATOR_TRADE_ADDRESS: SlotIndex = 0;
pub const SLOT_CREATOR_FOREIGN_PKH: SlotIndex = 4;
pub const SLOT_REDEEM_AMOUNT: SlotIndex = 7;
pub const SLOT_EXPECTED_FOREIGN_AMOUNT: SlotIndex = 8;
pub const SLOT_TRADE_TIMEOUT_MINUTES: SlotIndex = 9;
pub const SLOT_FOREIGN_CHAIN_ID: SlotIndex = 10;
pub const SLOT_ACCT_VERSION: SlotIndex = 11;
pub const SLOT_TRADE_MSG_LENGTH: SlotIndex = 12;
pub const SLOT_REDEEM_MSG_LENGTH: SlotIndex = 13;
pub const SLOT_CANCEL_MSG_LENGTH: SlotIndex = 14;
pub const SLOT_PTR_PARTNER_TRADE_ADDRESS: SlotIndex = 15;
pub const SLOT_PTR_HASH_OF_SECRET: SlotIndex = 16;
pub const SLOT_PTR_PAYOUT_ADDRESS: SlotIndex = 17;

pub const CONSTANTS_REGION_WORDS: usize = 18;

// Variables region. Written by the running program, zeroed at creation.
pub const SLOT_CREATOR_ADDRESS: SlotIndex = 18;
pub const SLOT_CREATION_TIMESTAMP: SlotIndex = 22;
pub const SLOT_LAST_TX_TIMESTAMP: SlotIndex = 23;

// The trade message is copied verbatim into slots 24..=37: partner trade
// address, partner foreign public key, refund timeout, hash of secret and
// foreign lock time land on their slots without any per-field shuffling.
pub const SLOT_PARTNER_TRADE_ADDRESS: SlotIndex = 24;
pub const SLOT_PARTNER_FOREIGN_PUBKEY: SlotIndex = 28;
pub const SLOT_REFUND_TIMEOUT_MINUTES: SlotIndex = 33;
pub const SLOT_HASH_OF_SECRET: SlotIndex = 34;
pub const SLOT_LOCK_TIME_A: SlotIndex = 37;

pub const SLOT_REFUND_DEADLINE: SlotIndex = 38;

// The redeem message is copied verbatim into slots 39..=46.
pub const SLOT_MSG_SECRET: SlotIndex = 39;
pub const SLOT_PAYOUT_ADDRESS: SlotIndex = 43;

pub const SLOT_HASH_CHECK: SlotIndex = 47;
pub const SLOT_MODE: SlotIndex = 50;
pub const SLOT_TMP_A: SlotIndex = 51;
pub const SLOT_TMP_B: SlotIndex = 52;

pub const DATA_SEGMENT_WORDS: usize = 53;
pub const DATA_SEGMENT_BYTES: usize = DATA_SEGMENT_WORDS * WORD_BYTES;

// Group adjacency. The trade and redeem message images must tile their slot
// ranges exactly or the verbatim message copy lands on the wrong fields.
const_assert_eq!(
    SLOT_CREATOR_FOREIGN_PKH,
    SLOT_CREATOR_TRADE_ADDRESS + ADDRESS_WORDS
);
const_assert_eq!(SLOT_REDEEM_AMOUNT, SLOT_CREATOR_FOREIGN_PKH + PKH_WORDS);
const_assert_eq!(SLOT_CREATOR_ADDRESS as usize, CONSTANTS_REGION_WORDS);
const_assert_eq!(SLOT_CREATION_TIMESTAMP, SLOT_CREATOR_ADDRESS + ADDRESS_WORDS);
const_assert_eq!(
    SLOT_PARTNER_FOREIGN_PUBKEY,
    SLOT_PARTNER_TRADE_ADDRESS + ADDRESS_WORDS
);
const_assert_eq!(
    SLOT_REFUND_TIMEOUT_MINUTES,
    SLOT_PARTNER_FOREIGN_PUBKEY + FOREIGN_PUBKEY_WORDS
);
const_assert_eq!(SLOT_HASH_OF_SECRET, SLOT_REFUND_TIMEOUT_MINUTES + 1);
const_assert_eq!(SLOT_LOCK_TIME_A, SLOT_HASH_OF_SECRET + PKH_WORDS);
const_assert_eq!(SLOT_PAYOUT_ADDRESS, SLOT_MSG_SECRET + ADDRESS_WORDS);
const_assert_eq!(SLOT_MODE, SLOT_HASH_CHECK + PKH_WORDS);
const_assert_eq!(DATA_SEGMENT_WORDS, SLOT_TMP_B as usize + 1);

// Slot pointer constants stored in the constants region must name the slots
// they claim to.
const_assert_eq!(SLOT_PTR_PAYOUT_ADDRESS as usize + 1, CONSTANTS_REGION_WORDS);

#[inline]
#[must_use]
pub const fn byte_offset(slot: SlotIndex) -> usize {
    slot as usize * WORD_BYTES
}

/// Sequential data segment writer.
///
/// Slots must be written in layout order with no gaps; every write asserts
/// that the buffer length matches the slot's fixed byte offset.
pub struct DataSegmentWriter {
    buf: Vec<u8>,
    next_slot: SlotIndex,
}

impl DataSegmentWriter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(DATA_SEGMENT_BYTES),
            next_slot: 0,
        }
    }

    fn assert_position(&self, slot: SlotIndex) {
        assert_eq!(slot, self.next_slot, "data slot written out of order");
        assert_eq!(
            self.buf.len(),
            byte_offset(slot),
            "data slot byte offset drifted from the layout"
        );
    }

    pub fn put_word(&mut self, slot: SlotIndex, value: u64) {
        self.assert_position(slot);
        self.buf.extend_from_slice(&value.to_be_bytes());
        self.next_slot += 1;
    }

    /// Writes `bytes` into a `words` wide group, zero padding on the right.
    pub fn put_bytes(&mut self, slot: SlotIndex, words: u16, bytes: &[u8]) {
        self.assert_position(slot);
        let width = words as usize * WORD_BYTES;
        assert!(bytes.len() <= width, "value does not fit its slot group");
        self.buf.extend_from_slice(bytes);
        self.buf.resize(byte_offset(slot) + width, 0);
        self.next_slot += words;
    }

    /// Zeroes every slot from the current position through `last` inclusive.
    pub fn zero_through(&mut self, last: SlotIndex) {
        assert!(last >= self.next_slot);
        self.buf.resize(byte_offset(last + 1), 0);
        self.next_slot = last + 1;
    }

    pub fn finish(self) -> Vec<u8> {
        assert_eq!(
            self.next_slot as usize, DATA_SEGMENT_WORDS,
            "data segment is incomplete"
        );
        debug_assert_eq!(self.buf.len(), DATA_SEGMENT_BYTES);
        self.buf
    }
}

impl Default for DataSegmentWriter {
    fn default() -> Self {
        Self::new()
    }
}

/// Reads the 64 bit word at `slot` from a data segment image.
#[must_use]
pub fn read_word(image: &[u8], slot: SlotIndex) -> u64 {
    let offset = byte_offset(slot);
    let mut word = [0; WORD_BYTES];
    word.copy_from_slice(&image[offset..offset + WORD_BYTES]);
    u64::from_be_bytes(word)
}

/// Reads a `words` wide group starting at `slot` from a data segment image.
#[must_use]
pub fn read_bytes(image: &[u8], slot: SlotIndex, words: u16) -> &[u8] {
    let offset = byte_offset(slot);
    &image[offset..offset + words as usize * WORD_BYTES]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writer_tracks_offsets() {
        let mut writer = DataSegmentWriter::new();
        writer.put_bytes(SLOT_CREATOR_TRADE_ADDRESS, ADDRESS_WORDS, &[0xaa; 20]);
        writer.put_bytes(SLOT_CREATOR_FOREIGN_PKH, PKH_WORDS, &[0xbb; 20]);
        writer.put_word(SLOT_REDEEM_AMOUNT, 100);
        writer.put_word(SLOT_EXPECTED_FOREIGN_AMOUNT, 1);
        writer.put_word(SLOT_TRADE_TIMEOUT_MINUTES, 120);
        writer.put_word(SLOT_FOREIGN_CHAIN_ID, 0);
        writer.put_word(SLOT_ACCT_VERSION, 1);
        writer.put_word(SLOT_TRADE_MSG_LENGTH, 112);
        writer.put_word(SLOT_REDEEM_MSG_LENGTH, 64);
        writer.put_word(SLOT_CANCEL_MSG_LENGTH, 32);
        writer.put_word(SLOT_PTR_PARTNER_TRADE_ADDRESS, 24);
        writer.put_word(SLOT_PTR_HASH_OF_SECRET, 34);
        writer.put_word(SLOT_PTR_PAYOUT_ADDRESS, 43);
        writer.zero_through(SLOT_TMP_B);

        let image = writer.finish();
        assert_eq!(image.len(), DATA_SEGMENT_BYTES);
        assert_eq!(read_word(&image, SLOT_REDEEM_AMOUNT), 100);
        assert_eq!(read_word(&image, SLOT_TRADE_TIMEOUT_MINUTES), 120);
        assert_eq!(&read_bytes(&image, SLOT_CREATOR_TRADE_ADDRESS, ADDRESS_WORDS)[..20], &[0xaa; 20]);
        // padding bytes are zero
        assert_eq!(&read_bytes(&image, SLOT_CREATOR_TRADE_ADDRESS, ADDRESS_WORDS)[20..], &[0; 12]);
        assert_eq!(read_word(&image, SLOT_MODE), 0);
    }

    #[test]
    #[should_panic(expected = "out of order")]
    fn writer_rejects_out_of_order_slots() {
        let mut writer = DataSegmentWriter::new();
        writer.put_word(SLOT_REDEEM_AMOUNT, 100);
    }

    #[test]
    fn trade_message_image_tiles_its_slots() {
        let first = byte_offset(SLOT_PARTNER_TRADE_ADDRESS);
        let last = byte_offset(SLOT_LOCK_TIME_A) + WORD_BYTES;
        assert_eq!(last - first, crate::acct::TRADE_MESSAGE_LENGTH);
    }

    #[test]
    fn redeem_message_image_tiles_its_slots() {
        let first = byte_offset(SLOT_MSG_SECRET);
        let last = byte_offset(SLOT_PAYOUT_ADDRESS) + ADDRESS_WORDS as usize * WORD_BYTES;
        assert_eq!(last - first, crate::acct::REDEEM_MESSAGE_LENGTH);
    }
}
