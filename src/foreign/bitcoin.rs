// Copyright (c) 2023 Octavian Oncescu
// Copyright (c) 2023-2024 The Aquila Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use super::{
    base58check_decode, call_with_timeout, p2pkh_script_hash, ForeignBlockchainAdapter,
    ForeignChain, ForeignChainErr, ForeignRpcClient, UnsignedForeignTx,
};
use crate::primitives::Hash160;
use bincode::{Decode, Encode};
use secp256k1::{Secp256k1, SecretKey};
use std::sync::Arc;
use std::time::Duration;

const P2PKH_VERSION: u8 = 0x00;
const P2SH_VERSION: u8 = 0x05;
const WIF_VERSION: u8 = 0x80;

/// Standard dust threshold for a p2pkh output, in satoshis.
const DUST_LIMIT: u64 = 546;

/// Rough upper bound on the virtual size of a one-input two-output spend,
/// used for fee estimation before the wallet layer selects inputs.
const EST_SPEND_VBYTES: u64 = 227;

/// Opaque spend request handed to the external wallet layer for input
/// selection and signing.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub(crate) struct SpendRequest {
    pub from_script_hash: [u8; 32],
    pub to_address: String,
    pub amount: u64,
    pub fee: u64,
}

pub struct BitcoinAdapter {
    client: Arc<dyn ForeignRpcClient>,
    timeout: Duration,
}

impl BitcoinAdapter {
    #[must_use]
    pub fn new(client: Arc<dyn ForeignRpcClient>, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    /// Parses a wallet key into a secp256k1 secret key. Accepts WIF and raw
    /// 32 byte hex.
    fn parse_key(key: &str) -> Result<SecretKey, ForeignChainErr> {
        if let Some((version, payload)) = base58check_decode(key) {
            if version != WIF_VERSION {
                return Err(ForeignChainErr::InvalidKey);
            }

            // 33 bytes with a trailing 0x01 marks a compressed-pubkey WIF.
            let body = match payload.len() {
                32 => &payload[..],
                33 if payload[32] == 0x01 => &payload[..32],
                _ => return Err(ForeignChainErr::InvalidKey),
            };

            return SecretKey::from_slice(body).map_err(|_| ForeignChainErr::InvalidKey);
        }

        let bytes = hex::decode(key).map_err(|_| ForeignChainErr::InvalidKey)?;
        SecretKey::from_slice(&bytes).map_err(|_| ForeignChainErr::InvalidKey)
    }

    /// Electrum script hash of the key's compressed-pubkey p2pkh output.
    fn key_script_hash(key: &str) -> Result<[u8; 32], ForeignChainErr> {
        let secret = Self::parse_key(key)?;
        let secp = Secp256k1::new();
        let public = secret.public_key(&secp).serialize();
        let pkh = Hash160::hash160(&public);
        Ok(p2pkh_script_hash(&pkh.0))
    }
}

impl ForeignBlockchainAdapter for BitcoinAdapter {
    fn chain(&self) -> ForeignChain {
        ForeignChain::Bitcoin
    }

    fn is_valid_address(&self, address: &str) -> bool {
        match base58check_decode(address) {
            Some((version, payload)) => {
                (version == P2PKH_VERSION || version == P2SH_VERSION) && payload.len() == 20
            }
            None => false,
        }
    }

    fn is_valid_wallet_key(&self, key: &str) -> bool {
        Self::parse_key(key).is_ok()
    }

    fn minimum_order_amount(&self) -> u64 {
        DUST_LIMIT
    }

    fn get_balance(&self, key: &str) -> Result<u64, ForeignChainErr> {
        let script_hash = Self::key_script_hash(key)?;
        let client = Arc::clone(&self.client);
        call_with_timeout(self.timeout, move || {
            client.script_hash_balance(&script_hash)
        })
    }

    fn build_spend(
        &self,
        key: &str,
        to_address: &str,
        amount: u64,
        fee_rate: u64,
    ) -> Result<UnsignedForeignTx, ForeignChainErr> {
        if !self.is_valid_address(to_address) {
            return Err(ForeignChainErr::InvalidAddress);
        }

        if amount < self.minimum_order_amount() {
            return Err(ForeignChainErr::AmountBelowMinimum {
                minimum: self.minimum_order_amount(),
            });
        }

        let fee = fee_rate.saturating_mul(EST_SPEND_VBYTES);
        let available = self.get_balance(key)?;
        let required = amount.saturating_add(fee);

        if available < required {
            return Err(ForeignChainErr::InsufficientFunds {
                required,
                available,
            });
        }

        let request = SpendRequest {
            from_script_hash: Self::key_script_hash(key)?,
            to_address: to_address.to_owned(),
            amount,
            fee,
        };

        Ok(UnsignedForeignTx {
            chain: ForeignChain::Bitcoin,
            to_address: to_address.to_owned(),
            amount,
            fee,
            payload: crate::codec::encode_to_vec(&request)
                .map_err(|err| ForeignChainErr::Network(err.to_string()))?,
        })
    }

    fn broadcast(&self, tx: &UnsignedForeignTx) -> Result<String, ForeignChainErr> {
        let client = Arc::clone(&self.client);
        let payload = tx.payload.clone();
        call_with_timeout(self.timeout, move || client.broadcast_raw(&payload))
    }

    fn get_blockchain_height(&self) -> Result<u64, ForeignChainErr> {
        let client = Arc::clone(&self.client);
        call_with_timeout(self.timeout, move || client.tip_height())
    }
}
