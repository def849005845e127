// Copyright (c) 2023 Octavian Oncescu
// Copyright (c) 2023-2024 The Aquila Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

//! Foreign blockchain capability interface.
//!
//! One [`ForeignBlockchainAdapter`] implementation exists per supported coin
//! family; implementations differ in address encoding, key handling and dust
//! limits but share a uniform error taxonomy. Wallet level concerns (UTXO
//! selection, signing) stay outside this crate; adapters validate inputs,
//! derive watch addresses and talk to an electrum style backend through
//! [`ForeignRpcClient`].

mod bitcoin;
pub mod electrum;
mod litecoin;

pub use bitcoin::*;
pub use litecoin::*;

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::time::Duration;

/// Foreign chains with a registered ACCT variant.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Encode, Decode, Serialize, Deserialize,
)]
pub enum ForeignChain {
    Bitcoin,
    Litecoin,
}

impl ForeignChain {
    /// Stable numeric id baked into escrow program code segments.
    #[must_use]
    pub fn chain_id(&self) -> u16 {
        match self {
            Self::Bitcoin => 1,
            Self::Litecoin => 2,
        }
    }

    #[must_use]
    pub fn ticker(&self) -> &'static str {
        match self {
            Self::Bitcoin => "BTC",
            Self::Litecoin => "LTC",
        }
    }

    #[must_use]
    pub fn from_ticker(ticker: &str) -> Option<Self> {
        match ticker.to_ascii_uppercase().as_str() {
            "BTC" => Some(Self::Bitcoin),
            "LTC" => Some(Self::Litecoin),
            _ => None,
        }
    }
}

impl fmt::Display for ForeignChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.ticker())
    }
}

/// Uniform adapter failure taxonomy.
///
/// `Network` and `Timeout` are transient and retried on the next poll;
/// `InsufficientFunds` is permanent until the user acts; malformed keys and
/// addresses are caller errors and never retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForeignChainErr {
    Network(String),
    Timeout,
    InsufficientFunds { required: u64, available: u64 },
    InvalidKey,
    InvalidAddress,
    AmountBelowMinimum { minimum: u64 },
}

impl ForeignChainErr {
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout)
    }
}

impl fmt::Display for ForeignChainErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network(reason) => write!(f, "foreign chain unreachable: {reason}"),
            Self::Timeout => f.write_str("foreign chain call timed out"),
            Self::InsufficientFunds {
                required,
                available,
            } => write!(f, "insufficient funds: need {required}, have {available}"),
            Self::InvalidKey => f.write_str("malformed wallet key"),
            Self::InvalidAddress => f.write_str("malformed address"),
            Self::AmountBelowMinimum { minimum } => {
                write!(f, "amount below the chain minimum of {minimum}")
            }
        }
    }
}

/// A spend prepared by an adapter but not yet signed. Signing and input
/// selection belong to the external wallet layer; the payload is the opaque
/// request handed to it.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct UnsignedForeignTx {
    pub chain: ForeignChain,
    pub to_address: String,
    pub amount: u64,
    pub fee: u64,
    pub payload: Vec<u8>,
}

/// Transport boundary towards an electrum style foreign chain backend.
///
/// Calls are blocking with no timeout of their own; adapters impose one via
/// [`call_with_timeout`] and surface expiry as a retryable error.
pub trait ForeignRpcClient: Send + Sync {
    /// Confirmed balance of an electrum script hash.
    fn script_hash_balance(&self, script_hash: &[u8; 32]) -> Result<u64, ForeignChainErr>;

    /// Broadcasts a raw transaction, returning its txid.
    fn broadcast_raw(&self, tx: &[u8]) -> Result<String, ForeignChainErr>;

    /// Current chain tip height.
    fn tip_height(&self) -> Result<u64, ForeignChainErr>;
}

/// Per-coin operations needed by the trade bot.
pub trait ForeignBlockchainAdapter: Send + Sync {
    fn chain(&self) -> ForeignChain;

    fn is_valid_address(&self, address: &str) -> bool;

    fn is_valid_wallet_key(&self, key: &str) -> bool;

    /// Smallest amount worth trading on this chain.
    fn minimum_order_amount(&self) -> u64;

    /// Confirmed balance controlled by `key`.
    fn get_balance(&self, key: &str) -> Result<u64, ForeignChainErr>;

    fn build_spend(
        &self,
        key: &str,
        to_address: &str,
        amount: u64,
        fee_rate: u64,
    ) -> Result<UnsignedForeignTx, ForeignChainErr>;

    fn broadcast(&self, tx: &UnsignedForeignTx) -> Result<String, ForeignChainErr>;

    fn get_blockchain_height(&self) -> Result<u64, ForeignChainErr>;
}

/// Runs a blocking foreign chain call with an explicit deadline. Expiry maps
/// to [`ForeignChainErr::Timeout`], a retryable kind, never a permanent
/// failure.
pub fn call_with_timeout<T: Send + 'static>(
    timeout: Duration,
    f: impl FnOnce() -> Result<T, ForeignChainErr> + Send + 'static,
) -> Result<T, ForeignChainErr> {
    let (tx, rx) = crossbeam_channel::bounded(1);
    std::thread::spawn(move || {
        let _ = tx.send(f());
    });

    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(_) => Err(ForeignChainErr::Timeout),
    }
}

/// Decodes a base58check string into its version byte and payload.
pub(crate) fn base58check_decode(encoded: &str) -> Option<(u8, Vec<u8>)> {
    let bytes = bs58::decode(encoded).into_vec().ok()?;
    if bytes.len() < 5 {
        return None;
    }

    let (body, checksum) = bytes.split_at(bytes.len() - 4);
    let digest = Sha256::digest(Sha256::digest(body));
    if &digest[..4] != checksum {
        return None;
    }

    Some((body[0], body[1..].to_vec()))
}

/// Electrum script hash for a standard pay-to-pubkey-hash output.
pub(crate) fn p2pkh_script_hash(pubkey_hash: &[u8; 20]) -> [u8; 32] {
    let mut script = Vec::with_capacity(25);
    script.extend_from_slice(&[0x76, 0xa9, 0x14]); // OP_DUP OP_HASH160 <20>
    script.extend_from_slice(pubkey_hash);
    script.extend_from_slice(&[0x88, 0xac]); // OP_EQUALVERIFY OP_CHECKSIG

    // Electrum addresses scripts by the reversed SHA256 of the script.
    let mut out = [0; 32];
    out.copy_from_slice(&Sha256::digest(&script));
    out.reverse();
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticker_roundtrip() {
        assert_eq!(ForeignChain::from_ticker("btc"), Some(ForeignChain::Bitcoin));
        assert_eq!(ForeignChain::from_ticker("LTC"), Some(ForeignChain::Litecoin));
        assert_eq!(ForeignChain::from_ticker("DOGE"), None);
    }

    #[test]
    fn retryable_kinds() {
        assert!(ForeignChainErr::Network("down".into()).is_retryable());
        assert!(ForeignChainErr::Timeout.is_retryable());
        assert!(!ForeignChainErr::InsufficientFunds {
            required: 2,
            available: 1
        }
        .is_retryable());
        assert!(!ForeignChainErr::InvalidKey.is_retryable());
    }

    #[test]
    fn base58check_rejects_bad_checksum() {
        // Genesis block coinbase address
        assert!(base58check_decode("1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa").is_some());
        assert!(base58check_decode("1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNb").is_none());
        assert!(base58check_decode("").is_none());
        assert!(base58check_decode("0OIl").is_none());
    }

    #[test]
    fn call_with_timeout_expires() {
        let result: Result<(), _> = call_with_timeout(Duration::from_millis(20), || {
            std::thread::sleep(Duration::from_secs(2));
            Ok(())
        });
        assert_eq!(result, Err(ForeignChainErr::Timeout));
    }

    #[test]
    fn call_with_timeout_passes_result_through() {
        let result = call_with_timeout(Duration::from_secs(1), || Ok(42_u64));
        assert_eq!(result, Ok(42));
    }
}
