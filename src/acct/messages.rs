// Copyright (c) 2023 Octavian Oncescu
// Copyright (c) 2023-2024 The Aquila Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

//! The four fixed-length protocol payloads.
//!
//! Payloads travel as opaque message transaction contents on the host chain
//! (or out of band, for offers), so decoding fails closed: a buffer whose
//! length differs from the expected constant is "not this message type",
//! never an error and never partially interpreted. Padding bytes are zero on
//! encode and opaque on decode.

use crate::primitives::{Address, Hash160, SwapSecret, ADDRESS_BYTES, SECRET_BYTES};

/// Bytes an address occupies on the wire, zero padded.
pub const PADDED_ADDRESS_BYTES: usize = 32;

/// Bytes a foreign public key occupies inside a trade message, zero padded.
pub const PADDED_FOREIGN_PUBKEY_BYTES: usize = 40;

/// Bytes a hash of secret occupies inside a trade message, zero padded.
pub const PADDED_HASH_OF_SECRET_BYTES: usize = 24;

pub const HASH_OF_SECRET_BYTES: usize = 20;

/// partner trade address ‖ partner foreign public key ‖ refund timeout
/// minutes ‖ hash of secret ‖ foreign lock time.
pub const TRADE_MESSAGE_LENGTH: usize =
    PADDED_ADDRESS_BYTES + PADDED_FOREIGN_PUBKEY_BYTES + 8 + PADDED_HASH_OF_SECRET_BYTES + 8;

/// secret preimage ‖ payout address.
pub const REDEEM_MESSAGE_LENGTH: usize = SECRET_BYTES + PADDED_ADDRESS_BYTES;

/// creator's host chain address.
pub const CANCEL_MESSAGE_LENGTH: usize = PADDED_ADDRESS_BYTES;

fn put_padded(out: &mut Vec<u8>, bytes: &[u8], width: usize) {
    debug_assert!(bytes.len() <= width);
    let start = out.len();
    out.extend_from_slice(bytes);
    out.resize(start + width, 0);
}

/// First contact from the counterparty, sent to the creator out of band or to
/// the creator's trade address: the counterparty's foreign chain public key,
/// its secret commitment and the foreign chain lock time.
///
/// The foreign public key field is 33 or 65 bytes depending on the coin
/// family, so offers are only decodable against a concrete ACCT variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OfferMessage {
    pub foreign_public_key: Vec<u8>,
    pub hash_of_secret: Hash160,
    pub lock_time_a: u64,
}

impl OfferMessage {
    #[must_use]
    pub fn encoded_len(foreign_public_key_len: usize) -> usize {
        foreign_public_key_len + HASH_OF_SECRET_BYTES + 8
    }

    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::encoded_len(self.foreign_public_key.len()));
        out.extend_from_slice(&self.foreign_public_key);
        out.extend_from_slice(self.hash_of_secret.as_bytes());
        out.extend_from_slice(&self.lock_time_a.to_be_bytes());
        out
    }

    #[must_use]
    pub fn decode(bytes: &[u8], foreign_public_key_len: usize) -> Option<Self> {
        if bytes.len() != Self::encoded_len(foreign_public_key_len) {
            return None;
        }

        let (pubkey, rest) = bytes.split_at(foreign_public_key_len);
        let (hash, lock_time) = rest.split_at(HASH_OF_SECRET_BYTES);

        Some(Self {
            foreign_public_key: pubkey.to_vec(),
            hash_of_secret: Hash160::from_slice(hash).ok()?,
            lock_time_a: u64::from_be_bytes(lock_time.try_into().ok()?),
        })
    }
}

/// Sent by the creator from their trade address to register the counterparty
/// with the escrow; flips the escrow mode to `Trading`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradeMessage {
    pub partner_trade_address: Address,
    pub partner_foreign_public_key: Vec<u8>,
    pub refund_timeout_minutes: u64,
    pub hash_of_secret: Hash160,
    pub lock_time_a: u64,
}

impl TradeMessage {
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(TRADE_MESSAGE_LENGTH);
        put_padded(
            &mut out,
            self.partner_trade_address.as_bytes(),
            PADDED_ADDRESS_BYTES,
        );
        put_padded(
            &mut out,
            &self.partner_foreign_public_key,
            PADDED_FOREIGN_PUBKEY_BYTES,
        );
        out.extend_from_slice(&self.refund_timeout_minutes.to_be_bytes());
        put_padded(
            &mut out,
            self.hash_of_secret.as_bytes(),
            PADDED_HASH_OF_SECRET_BYTES,
        );
        out.extend_from_slice(&self.lock_time_a.to_be_bytes());
        out
    }

    #[must_use]
    pub fn decode(bytes: &[u8], foreign_public_key_len: usize) -> Option<Self> {
        if bytes.len() != TRADE_MESSAGE_LENGTH || foreign_public_key_len > PADDED_FOREIGN_PUBKEY_BYTES
        {
            return None;
        }

        let (address, rest) = bytes.split_at(PADDED_ADDRESS_BYTES);
        let (pubkey, rest) = rest.split_at(PADDED_FOREIGN_PUBKEY_BYTES);
        let (timeout, rest) = rest.split_at(8);
        let (hash, lock_time) = rest.split_at(PADDED_HASH_OF_SECRET_BYTES);

        Some(Self {
            partner_trade_address: Address::from_padded(address).ok()?,
            partner_foreign_public_key: pubkey[..foreign_public_key_len].to_vec(),
            refund_timeout_minutes: u64::from_be_bytes(timeout.try_into().ok()?),
            hash_of_secret: Hash160::from_slice(hash).ok()?,
            lock_time_a: u64::from_be_bytes(lock_time.try_into().ok()?),
        })
    }
}

/// Sent by the registered partner to claim the host leg, revealing the secret
/// preimage in the process.
#[derive(Clone, PartialEq, Eq)]
pub struct RedeemMessage {
    pub secret: SwapSecret,
    pub payout_address: Address,
}

impl RedeemMessage {
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(REDEEM_MESSAGE_LENGTH);
        out.extend_from_slice(self.secret.as_bytes());
        put_padded(&mut out, self.payout_address.as_bytes(), PADDED_ADDRESS_BYTES);
        out
    }

    #[must_use]
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != REDEEM_MESSAGE_LENGTH {
            return None;
        }

        let (secret, address) = bytes.split_at(SECRET_BYTES);

        Some(Self {
            secret: SwapSecret::from_slice(secret).ok()?,
            payout_address: Address::from_padded(address).ok()?,
        })
    }
}

impl std::fmt::Debug for RedeemMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedeemMessage")
            .field("secret", &"[REDACTED]")
            .field("payout_address", &self.payout_address)
            .finish()
    }
}

/// Sent by the creator from their main address to cancel an offer before a
/// counterparty is registered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancelMessage {
    pub creator_address: Address,
}

impl CancelMessage {
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(CANCEL_MESSAGE_LENGTH);
        put_padded(&mut out, self.creator_address.as_bytes(), PADDED_ADDRESS_BYTES);
        out
    }

    #[must_use]
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != CANCEL_MESSAGE_LENGTH {
            return None;
        }

        Some(Self {
            creator_address: Address::from_padded(bytes).ok()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck_macros::quickcheck;

    const BTC_PUBKEY_LEN: usize = 33;

    #[test]
    fn offer_roundtrip() {
        let message = OfferMessage {
            foreign_public_key: vec![0x02; BTC_PUBKEY_LEN],
            hash_of_secret: Hash160([0x33; 20]),
            lock_time_a: 1_700_000_000,
        };

        let encoded = message.encode();
        assert_eq!(encoded.len(), OfferMessage::encoded_len(BTC_PUBKEY_LEN));
        assert_eq!(OfferMessage::decode(&encoded, BTC_PUBKEY_LEN), Some(message));
    }

    #[test]
    fn offer_uncompressed_pubkey_roundtrip() {
        let message = OfferMessage {
            foreign_public_key: vec![0x04; 65],
            hash_of_secret: Hash160([0x44; 20]),
            lock_time_a: 42,
        };

        let encoded = message.encode();
        assert_eq!(OfferMessage::decode(&encoded, 65), Some(message));
        // Against the wrong variant's key length it is not an offer at all.
        assert_eq!(OfferMessage::decode(&encoded, BTC_PUBKEY_LEN), None);
    }

    #[test]
    fn trade_roundtrip() {
        let message = TradeMessage {
            partner_trade_address: Address([0x55; 20]),
            partner_foreign_public_key: vec![0x02; BTC_PUBKEY_LEN],
            refund_timeout_minutes: 60,
            hash_of_secret: Hash160([0x66; 20]),
            lock_time_a: 1_700_000_000,
        };

        let encoded = message.encode();
        assert_eq!(encoded.len(), TRADE_MESSAGE_LENGTH);
        assert_eq!(TradeMessage::decode(&encoded, BTC_PUBKEY_LEN), Some(message));
    }

    #[test]
    fn trade_padding_is_zero_on_encode_opaque_on_decode() {
        let message = TradeMessage {
            partner_trade_address: Address([0x55; 20]),
            partner_foreign_public_key: vec![0x02; BTC_PUBKEY_LEN],
            refund_timeout_minutes: 60,
            hash_of_secret: Hash160([0x66; 20]),
            lock_time_a: 7,
        };

        let mut encoded = message.encode();
        assert_eq!(&encoded[20..PADDED_ADDRESS_BYTES], &[0; 12]);

        // Non-zero padding must not change what decodes.
        encoded[21] = 0xff;
        assert_eq!(TradeMessage::decode(&encoded, BTC_PUBKEY_LEN), Some(message));
    }

    #[test]
    fn redeem_roundtrip() {
        let message = RedeemMessage {
            secret: SwapSecret([0x77; 32]),
            payout_address: Address([0x88; 20]),
        };

        let encoded = message.encode();
        assert_eq!(encoded.len(), REDEEM_MESSAGE_LENGTH);
        assert_eq!(RedeemMessage::decode(&encoded), Some(message));
    }

    #[test]
    fn cancel_roundtrip() {
        let message = CancelMessage {
            creator_address: Address([0x99; 20]),
        };

        let encoded = message.encode();
        assert_eq!(encoded.len(), CANCEL_MESSAGE_LENGTH);
        assert_eq!(CancelMessage::decode(&encoded), Some(message));
    }

    #[test]
    fn wrong_length_is_not_this_type() {
        assert_eq!(TradeMessage::decode(&[0; TRADE_MESSAGE_LENGTH - 1], 33), None);
        assert_eq!(TradeMessage::decode(&[0; TRADE_MESSAGE_LENGTH + 1], 33), None);
        assert_eq!(RedeemMessage::decode(&[0; REDEEM_MESSAGE_LENGTH + 1]), None);
        assert_eq!(CancelMessage::decode(&[]), None);
        assert_eq!(OfferMessage::decode(&[0; 10], 33), None);
    }

    #[quickcheck]
    fn decode_never_panics(bytes: Vec<u8>) -> bool {
        let _ = OfferMessage::decode(&bytes, 33);
        let _ = OfferMessage::decode(&bytes, 65);
        let _ = TradeMessage::decode(&bytes, 33);
        let _ = RedeemMessage::decode(&bytes);
        let _ = CancelMessage::decode(&bytes);
        true
    }
}
