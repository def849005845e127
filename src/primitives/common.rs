// Copyright (c) 2023 Octavian Oncescu
// Copyright (c) 2023-2024 The Aquila Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use bech32::{self, FromBase32, ToBase32, Variant};
use bincode::{Decode, Encode};
use constant_time_eq::constant_time_eq;
use lazy_static::lazy_static;
use ripemd::Ripemd160;
use schnorrkel::keys::{ExpansionMode, MiniSecretKey};
use schnorrkel::PublicKey as SchnorrPubKey;
use schnorrkel::Signature as SchnorrSignature;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::hash::Hash as HashTrait;
use zeroize::Zeroize;

pub const ADDRESS_BYTES: usize = 20;
pub const SECRET_BYTES: usize = 32;

/// Human readable part used when rendering addresses as bech32.
pub const ADDRESS_HRP: &str = "aq";

/// Signing context for protocol message transactions.
pub const MESSAGE_SIGNING_CTX: &[u8] = b"aquila.message";

const HASH_KEY_PREFIX: &str = "aquila.hash.";

lazy_static! {
    static ref HASH_KEY160_OWNED: String = format!("{HASH_KEY_PREFIX}{}", 20);
    static ref HASH_KEY160: &'static str = &HASH_KEY160_OWNED;
    static ref HASH_KEY256_OWNED: String = format!("{HASH_KEY_PREFIX}{}", 32);
    static ref HASH_KEY256: &'static str = &HASH_KEY256_OWNED;
}

#[derive(Clone, Copy, PartialEq, Eq, HashTrait, Encode, Decode)]
pub struct Address(pub [u8; ADDRESS_BYTES]);

impl Address {
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        crate::codec::encode_to_vec(self).unwrap()
    }

    #[must_use]
    pub fn zero() -> Self {
        Self([0; ADDRESS_BYTES])
    }

    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0 == [0; ADDRESS_BYTES]
    }

    #[must_use]
    pub fn to_bech32(&self, hrp: &str) -> String {
        bech32::encode(hrp, self.0.to_base32(), Variant::Bech32m).unwrap()
    }

    pub fn from_bech32(encoded: &str) -> Result<Self, &'static str> {
        let (_hrp, data, _variant) = bech32::decode(encoded).map_err(|_| "invalid address")?;
        let data: Vec<u8> = Vec::<u8>::from_base32(&data).map_err(|_| "invalid address")?;

        if data.len() != ADDRESS_BYTES {
            return Err("invalid address length");
        }

        let mut out = Self([0; ADDRESS_BYTES]);
        out.0.copy_from_slice(&data);
        Ok(out)
    }

    /// Reads an address out of a zero-padded wire field. Padding bytes are
    /// ignored rather than validated.
    pub fn from_padded(bytes: &[u8]) -> Result<Self, &'static str> {
        if bytes.len() < ADDRESS_BYTES {
            return Err("invalid address length");
        }

        let mut out = Self([0; ADDRESS_BYTES]);
        out.0.copy_from_slice(&bytes[..ADDRESS_BYTES]);
        Ok(out)
    }

    /// Validate against public key
    #[must_use]
    pub fn validate(&self, public_key: &PublicKey) -> bool {
        self == &public_key.to_address()
    }

    #[cfg(test)]
    #[must_use]
    pub fn random() -> Self {
        use rand::Rng;
        Self(rand::thread_rng().gen())
    }
}

impl Serialize for Address {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        String::serialize(&self.to_bech32(ADDRESS_HRP), serializer)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D>(deserializer: D) -> Result<Address, D::Error>
    where
        D: Deserializer<'de>,
    {
        let string = String::deserialize(deserializer)?;
        Address::from_bech32(&string).map_err(|err| serde::de::Error::custom(err.to_owned()))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Address")
            .field(&self.to_bech32(ADDRESS_HRP))
            .finish()
    }
}

#[derive(Clone, Copy, PartialEq, Eq, HashTrait, Encode, Decode, Serialize, Deserialize)]
pub struct PublicKey(pub [u8; 32]);

impl PublicKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, &'static str> {
        if bytes.len() != 32 {
            return Err("invalid slice length! expected 32");
        }

        let mut out = Self([0; 32]);
        out.0.copy_from_slice(bytes);
        Ok(out)
    }

    pub fn from_hex(hexstr: &str) -> Result<Self, &'static str> {
        let bytes = hex::decode(hexstr).map_err(|_| "invalid hexstr")?;
        Self::from_bytes(&bytes)
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    #[must_use]
    pub fn zero() -> Self {
        Self([0; 32])
    }

    pub fn to_schnorr(&self) -> Result<SchnorrPubKey, &'static str> {
        SchnorrPubKey::from_bytes(&self.0).map_err(|_| "could not decode public key")
    }

    #[inline]
    #[must_use]
    pub fn to_address(&self) -> Address {
        let mut address = Address([0; ADDRESS_BYTES]);
        let mut hash1 = [0; 32];
        let mut hasher = blake3::Hasher::new_derive_key(&HASH_KEY256);
        hasher.update(&self.0);
        let mut out = hasher.finalize_xof();
        out.fill(&mut hash1);
        let mut hasher = blake3::Hasher::new_derive_key(&HASH_KEY160);
        hasher.update(&hash1);
        let mut out = hasher.finalize_xof();
        out.fill(&mut address.0);
        address
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PublicKey").field(&hex::encode(self.0)).finish()
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub struct Signature(pub [u8; 64]);

impl Signature {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, &'static str> {
        if bytes.len() != 64 {
            return Err("invalid slice length! expected 64");
        }

        let mut out = Self([0; 64]);
        out.0.copy_from_slice(bytes);
        Ok(out)
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Signature").field(&hex::encode(self.0)).finish()
    }
}

/// Expands a 32 byte seed into a signing keypair.
pub fn keypair_from_seed(seed: &[u8; 32]) -> Result<schnorrkel::Keypair, &'static str> {
    let mini = MiniSecretKey::from_bytes(seed).map_err(|_| "invalid secret seed")?;
    Ok(mini.expand_to_keypair(ExpansionMode::Ed25519))
}

/// Signs a protocol message payload with the given keypair.
#[must_use]
pub fn sign_message(keypair: &schnorrkel::Keypair, payload: &[u8]) -> Signature {
    let ctx = schnorrkel::signing_context(MESSAGE_SIGNING_CTX);
    Signature(keypair.sign(ctx.bytes(payload)).to_bytes())
}

/// Verifies a protocol message payload signature.
#[must_use]
pub fn verify_message(public_key: &PublicKey, payload: &[u8], signature: &Signature) -> bool {
    let Ok(pub_key) = public_key.to_schnorr() else {
        return false;
    };
    let Ok(signature) = SchnorrSignature::from_bytes(&signature.0) else {
        return false;
    };
    let ctx = schnorrkel::signing_context(MESSAGE_SIGNING_CTX);
    pub_key.verify(ctx.bytes(payload), &signature).is_ok()
}

#[derive(PartialEq, Eq, Encode, Decode, Clone, Copy, HashTrait, Zeroize, Serialize, Deserialize)]
pub struct Hash160(pub [u8; 20]);

impl Hash160 {
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    #[must_use]
    pub fn zero() -> Self {
        Self([0; 20])
    }

    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0 == [0; 20]
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, &'static str> {
        if bytes.len() < 20 {
            return Err("invalid slice length! expected at least 20");
        }

        let mut out = Self([0; 20]);
        out.0.copy_from_slice(&bytes[..20]);
        Ok(out)
    }

    pub fn hash_from_slice<T: AsRef<[u8]>>(slice: T, key: &str) -> Self {
        let mut out = Self([0; 20]);
        let mut hasher = blake3::Hasher::new_derive_key(key);
        hasher.update(slice.as_ref());
        let mut reader = hasher.finalize_xof();
        reader.fill(&mut out.0);
        out
    }

    /// `RIPEMD160(SHA256(bytes))`, the commitment function used for swap
    /// secrets and foreign public key hashes.
    #[must_use]
    pub fn hash160(bytes: &[u8]) -> Self {
        let sha = Sha256::digest(bytes);
        let mut hasher = Ripemd160::new();
        hasher.update(sha);
        let hash = hasher.finalize();
        let mut out = Self([0; 20]);
        out.0.copy_from_slice(&hash);
        out
    }
}

impl fmt::Debug for Hash160 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Hash160").field(&hex::encode(self.0)).finish()
    }
}

#[derive(PartialEq, Eq, Encode, Decode, Clone, Copy, HashTrait, Zeroize, Serialize, Deserialize)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    #[must_use]
    pub fn zero() -> Self {
        Self([0; 32])
    }

    pub fn from_hex(hexstr: &str) -> Result<Self, &'static str> {
        let bytes = hex::decode(hexstr).map_err(|_| "invalid hexstr")?;

        if bytes.len() != 32 {
            return Err("invalid slice length! expected 32");
        }

        let mut out = Self([0; 32]);
        out.0.copy_from_slice(&bytes);
        Ok(out)
    }

    pub fn hash_from_slice<T: AsRef<[u8]>>(slice: T, key: &str) -> Self {
        let mut out = Self([0; 32]);
        let mut hasher = blake3::Hasher::new_derive_key(key);
        hasher.update(slice.as_ref());
        let mut reader = hasher.finalize_xof();
        reader.fill(&mut out.0);
        out
    }

    /// Plain `SHA256`, used for code segment content hashes so that the ACCT
    /// discriminator is computable by any external party.
    #[must_use]
    pub fn sha256(bytes: &[u8]) -> Self {
        let mut out = Self([0; 32]);
        out.0.copy_from_slice(&Sha256::digest(bytes));
        out
    }
}

impl fmt::Debug for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Hash256").field(&hex::encode(self.0)).finish()
    }
}

/// A swap secret preimage. Never logged and compared in constant time.
#[derive(Clone, Copy, Encode, Decode, Zeroize)]
pub struct SwapSecret(pub [u8; SECRET_BYTES]);

impl SwapSecret {
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, &'static str> {
        if bytes.len() != SECRET_BYTES {
            return Err("invalid slice length! expected 32");
        }

        let mut out = Self([0; SECRET_BYTES]);
        out.0.copy_from_slice(bytes);
        Ok(out)
    }

    #[must_use]
    pub fn generate() -> Self {
        use rand::Rng;
        Self(rand::thread_rng().gen())
    }

    /// Commitment published in offer and trade messages.
    #[must_use]
    pub fn hash_of_secret(&self) -> Hash160 {
        Hash160::hash160(&self.0)
    }
}

impl PartialEq for SwapSecret {
    fn eq(&self, other: &Self) -> bool {
        constant_time_eq(&self.0, &other.0)
    }
}

impl Eq for SwapSecret {}

impl fmt::Debug for SwapSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SwapSecret").field(&"[REDACTED]").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_bech32_roundtrip() {
        let address = Address::random();
        let encoded = address.to_bech32(ADDRESS_HRP);
        assert_eq!(Address::from_bech32(&encoded).unwrap(), address);
    }

    #[test]
    fn address_from_bech32_rejects_bad_length() {
        let encoded = bech32::encode(ADDRESS_HRP, [0_u8; 10].to_base32(), Variant::Bech32m).unwrap();
        assert!(Address::from_bech32(&encoded).is_err());
    }

    #[test]
    fn public_key_address_is_stable() {
        let keypair = keypair_from_seed(&[7; 32]).unwrap();
        let pub_key = PublicKey::from_bytes(&keypair.public.to_bytes()).unwrap();
        assert_eq!(pub_key.to_address(), pub_key.to_address());
        assert!(pub_key.to_address().validate(&pub_key));
    }

    #[test]
    fn sign_verify_roundtrip() {
        let keypair = keypair_from_seed(&[3; 32]).unwrap();
        let pub_key = PublicKey::from_bytes(&keypair.public.to_bytes()).unwrap();
        let signature = sign_message(&keypair, b"payload");

        assert!(verify_message(&pub_key, b"payload", &signature));
        assert!(!verify_message(&pub_key, b"other payload", &signature));
    }

    #[test]
    fn hash160_test_vector() {
        // HASH160 of the empty string
        let result = Hash160::hash160(b"");
        assert_eq!(
            hex::encode(result.0),
            "b472a266d0bd89c13706a4132ccfb16f7c3b9fcb"
        );
    }

    #[test]
    fn sha256_test_vector() {
        let result = Hash256::sha256(b"");
        assert_eq!(
            hex::encode(result.0),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn swap_secret_commitment_matches_hash160() {
        let secret = SwapSecret([0xab; 32]);
        assert_eq!(secret.hash_of_secret(), Hash160::hash160(&[0xab; 32]));
    }

    #[test]
    fn swap_secret_debug_is_redacted() {
        let secret = SwapSecret::generate();
        assert!(!format!("{secret:?}").contains(&hex::encode(secret.0)));
    }
}
