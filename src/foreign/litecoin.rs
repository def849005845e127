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
use secp256k1::{Secp256k1, SecretKey};
use std::sync::Arc;
use std::time::Duration;

const P2PKH_VERSION: u8 = 0x30;
const P2SH_VERSION: u8 = 0x32;
const WIF_VERSION: u8 = 0xb0;

/// Litecoin relays with a ten times lower fee floor than Bitcoin but keeps a
/// larger dust threshold in litoshis.
const DUST_LIMIT: u64 = 5460;

const EST_SPEND_VBYTES: u64 = 227;

pub struct LitecoinAdapter {
    client: Arc<dyn ForeignRpcClient>,
    timeout: Duration,
}

impl LitecoinAdapter {
    #[must_use]
    pub fn new(client: Arc<dyn ForeignRpcClient>, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    fn parse_key(key: &str) -> Result<SecretKey, ForeignChainErr> {
        if let Some((version, payload)) = base58check_decode(key) {
            if version != WIF_VERSION {
                return Err(ForeignChainErr::InvalidKey);
            }

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

    fn key_script_hash(key: &str) -> Result<[u8; 32], ForeignChainErr> {
        let secret = Self::parse_key(key)?;
        let secp = Secp256k1::new();
        let public = secret.public_key(&secp).serialize();
        let pkh = Hash160::hash160(&public);
        Ok(p2pkh_script_hash(&pkh.0))
    }
}

impl ForeignBlockchainAdapter for LitecoinAdapter {
    fn chain(&self) -> ForeignChain {
        ForeignChain::Litecoin
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

        let request = super::bitcoin::SpendRequest {
            from_script_hash: Self::key_script_hash(key)?,
            to_address: to_address.to_owned(),
            amount,
            fee,
        };

        Ok(UnsignedForeignTx {
            chain: ForeignChain::Litecoin,
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

#[cfg(test)]
mod tests {
    use super::super::bitcoin::tests::MockRpcClient;
    use super::*;

    fn adapter() -> LitecoinAdapter {
        LitecoinAdapter::new(
            Arc::new(MockRpcClient::new(1_000_000, 2_500_000)),
            Duration::from_secs(1),
        )
    }

    #[test]
    fn validates_litecoin_addresses() {
        let adapter = adapter();
        assert!(adapter.is_valid_address("LM2WMpR1Rp6j3Sa59cMXMs1SPzj9eXpGc1"));
        // Bitcoin addresses carry the wrong version byte.
        assert!(!adapter.is_valid_address("1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa"));
    }

    #[test]
    fn dust_limit_differs_from_bitcoin() {
        assert_eq!(adapter().minimum_order_amount(), DUST_LIMIT);
        assert_ne!(adapter().minimum_order_amount(), 546);
    }

    #[test]
    fn raw_hex_keys_are_accepted() {
        assert!(adapter().is_valid_wallet_key(
            "0000000000000000000000000000000000000000000000000000000000000001"
        ));
        assert!(!adapter().is_valid_wallet_key("zz"));
    }
}
