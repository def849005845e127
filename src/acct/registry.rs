// Copyright (c) 2023 Octavian Oncescu
// Copyright (c) 2023-2024 The Aquila Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use super::messages::{CancelMessage, OfferMessage, RedeemMessage, TradeMessage};
use super::program::EscrowProgramBuilder;
use super::reader::{read_trade_data, CrossChainTradeData, TradeReadErr};
use crate::foreign::ForeignChain;
use crate::primitives::{Address, Hash256};
use serde::{Deserialize, Serialize};

/// One supported (foreign chain, protocol version) swap contract variant.
///
/// A tagged union rather than a trait object: a new coin means a new variant
/// here, and every caller dispatches through [`AcctRegistry`] by code hash
/// rather than naming variants directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Acct {
    BitcoinV1,
    LitecoinV1,
}

impl Acct {
    pub const ALL: [Acct; 2] = [Acct::BitcoinV1, Acct::LitecoinV1];

    #[must_use]
    pub fn foreign_chain(&self) -> ForeignChain {
        match self {
            Self::BitcoinV1 => ForeignChain::Bitcoin,
            Self::LitecoinV1 => ForeignChain::Litecoin,
        }
    }

    #[must_use]
    pub fn version(&self) -> u16 {
        match self {
            Self::BitcoinV1 | Self::LitecoinV1 => 1,
        }
    }

    /// Length of a foreign public key on this variant's chain.
    #[must_use]
    pub fn foreign_public_key_len(&self) -> usize {
        match self {
            // Compressed secp256k1 keys on both Bitcoin family chains.
            Self::BitcoinV1 | Self::LitecoinV1 => 33,
        }
    }

    #[must_use]
    pub fn builder(&self) -> EscrowProgramBuilder {
        EscrowProgramBuilder::new(self.foreign_chain(), self.version())
    }

    /// Parses an escrow data segment against this variant's layout.
    pub fn trade_data(
        &self,
        program_address: Address,
        image: &[u8],
    ) -> Result<CrossChainTradeData, TradeReadErr> {
        read_trade_data(
            self.foreign_chain(),
            self.version(),
            self.foreign_public_key_len(),
            program_address,
            image,
        )
    }

    pub fn decode_offer_message(&self, bytes: &[u8]) -> Option<OfferMessage> {
        OfferMessage::decode(bytes, self.foreign_public_key_len())
    }

    pub fn decode_trade_message(&self, bytes: &[u8]) -> Option<TradeMessage> {
        TradeMessage::decode(bytes, self.foreign_public_key_len())
    }

    pub fn decode_redeem_message(&self, bytes: &[u8]) -> Option<RedeemMessage> {
        RedeemMessage::decode(bytes)
    }

    pub fn decode_cancel_message(&self, bytes: &[u8]) -> Option<CancelMessage> {
        CancelMessage::decode(bytes)
    }
}

/// Maps deployed program code hashes to ACCT variants.
///
/// Constructed once at startup and passed to every caller; there is no global
/// instance. Matching on the exact content hash of the code segment is the
/// only sanctioned way to decide whether a program is one of ours: a
/// malicious program with different semantics can reuse any outward shape
/// except the hash.
#[derive(Debug, Clone)]
pub struct AcctRegistry {
    entries: Vec<(Hash256, Acct)>,
}

impl AcctRegistry {
    /// Builds the registry, deriving each variant's canonical code hash from
    /// a parameter-free code segment build. The code segment embeds the
    /// variant tag, so hashes are distinct per entry.
    #[must_use]
    pub fn new() -> Self {
        let entries = Acct::ALL
            .iter()
            .map(|acct| {
                let code = acct
                    .builder()
                    .build_code()
                    .expect("variant escrow template must assemble");
                (Hash256::sha256(&code), *acct)
            })
            .collect();

        Self { entries }
    }

    #[must_use]
    pub fn lookup(&self, code_hash: &Hash256) -> Option<&Acct> {
        self.entries
            .iter()
            .find(|(hash, _)| hash == code_hash)
            .map(|(_, acct)| acct)
    }

    #[must_use]
    pub fn get(&self, chain: ForeignChain, version: u16) -> Option<&Acct> {
        self.entries
            .iter()
            .map(|(_, acct)| acct)
            .find(|acct| acct.foreign_chain() == chain && acct.version() == version)
    }

    #[must_use]
    pub fn code_hash(&self, acct: &Acct) -> Option<Hash256> {
        self.entries
            .iter()
            .find(|(_, entry)| entry == acct)
            .map(|(hash, _)| *hash)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Hash256, &Acct)> {
        self.entries.iter().map(|(hash, acct)| (hash, acct))
    }
}

impl Default for AcctRegistry {
    fn default() -> Self {
        Self::new()
    }
}
