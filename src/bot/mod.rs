// Copyright (c) 2023 Octavian Oncescu
// Copyright (c) 2023-2024 The Aquila Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

//! The trade bot: one background task driving every local trade.
//!
//! A single periodic poll iterates all persisted [`TradeBotData`] entries,
//! so resource usage is bounded by the poll interval rather than the trade
//! count. Per entry, the driver gathers one [`Observation`] (escrow snapshot
//! through the registry and reader, foreign chain view through the adapter),
//! hands it to the pure [`advance`] function, persists the result and
//! performs the returned actions. Every on-chain action is safe to re-issue:
//! the escrow rejects duplicates once its mode moves on.

mod pow;
mod state;
mod store;

pub use pow::*;
pub use state::*;
pub use store::*;

use crate::acct::{Acct, AcctRegistry, CrossChainTradeData, DeployedProgram};
use crate::foreign::{ForeignBlockchainAdapter, ForeignChain, ForeignChainErr};
use crate::primitives::{sign_message, Address, PublicKey, Signature};
use chrono::prelude::*;
use dashmap::DashMap;
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerErr {
    Storage(String),
    Rejected(String),
}

/// A message transaction observed on the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerMessage {
    pub sender: Address,
    pub timestamp_millis: i64,
    pub payload: Vec<u8>,
}

/// A message transaction ready for broadcast. Messages from unfunded
/// accounts carry a proof of work nonce instead of a fee.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageTransaction {
    pub sender_public_key: PublicKey,
    pub recipient: Address,
    pub payload: Vec<u8>,
    pub nonce: u64,
    pub signature: Signature,
}

impl MessageTransaction {
    /// Bytes covered by the signature.
    #[must_use]
    pub fn signing_bytes(
        sender_public_key: &PublicKey,
        recipient: &Address,
        payload: &[u8],
        nonce: u64,
    ) -> Vec<u8> {
        let mut out = Vec::with_capacity(32 + 20 + payload.len() + 8);
        out.extend_from_slice(sender_public_key.as_bytes());
        out.extend_from_slice(recipient.as_bytes());
        out.extend_from_slice(payload);
        out.extend_from_slice(&nonce.to_be_bytes());
        out
    }

    /// Transaction signature, doubling as its ledger identifier.
    #[must_use]
    pub fn signature_bytes(&self) -> Vec<u8> {
        self.signature.as_bytes().to_vec()
    }
}

/// Read and broadcast access to the host chain ledger. The ledger itself
/// (validation, storage, gossip) is an external collaborator; reads are
/// served from a consistent snapshot.
pub trait LedgerView: Send + Sync {
    fn height(&self) -> Result<u64, LedgerErr>;

    fn balance(&self, address: &Address) -> Result<u64, LedgerErr>;

    /// The deployed program at `address`, with its current data segment.
    fn program(&self, address: &Address) -> Result<Option<DeployedProgram>, LedgerErr>;

    /// Message transactions addressed to `address`, oldest first, strictly
    /// after `after_timestamp_millis`.
    fn messages_to(
        &self,
        address: &Address,
        after_timestamp_millis: i64,
    ) -> Result<Vec<LedgerMessage>, LedgerErr>;

    /// Broadcasts a message transaction, returning its signature bytes.
    fn broadcast_message(&self, tx: MessageTransaction) -> Result<Vec<u8>, LedgerErr>;
}

/// In-memory ledger for devnet runs and tests.
#[derive(Default)]
pub struct MemoryLedger {
    height: AtomicU64,
    balances: DashMap<Address, u64>,
    programs: DashMap<Address, DeployedProgram>,
    messages: DashMap<Address, Vec<LedgerMessage>>,
}

impl MemoryLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_height(&self, height: u64) {
        self.height.store(height, Ordering::Relaxed);
    }

    pub fn set_balance(&self, address: Address, balance: u64) {
        self.balances.insert(address, balance);
    }

    pub fn install_program(&self, address: Address, program: DeployedProgram) {
        self.programs.insert(address, program);
    }

    /// Replaces a deployed program's data segment, mirroring what the
    /// external interpreter does as the escrow runs.
    pub fn set_program_data(&self, address: &Address, data: Vec<u8>) {
        if let Some(mut program) = self.programs.get_mut(address) {
            program.data = data;
        }
    }

    pub fn push_message(&self, recipient: Address, message: LedgerMessage) {
        self.messages.entry(recipient).or_default().push(message);
    }
}

impl LedgerView for MemoryLedger {
    fn height(&self) -> Result<u64, LedgerErr> {
        Ok(self.height.load(Ordering::Relaxed))
    }

    fn balance(&self, address: &Address) -> Result<u64, LedgerErr> {
        Ok(self.balances.get(address).map(|b| *b).unwrap_or(0))
    }

    fn program(&self, address: &Address) -> Result<Option<DeployedProgram>, LedgerErr> {
        Ok(self.programs.get(address).map(|p| p.value().clone()))
    }

    fn messages_to(
        &self,
        address: &Address,
        after_timestamp_millis: i64,
    ) -> Result<Vec<LedgerMessage>, LedgerErr> {
        Ok(self
            .messages
            .get(address)
            .map(|messages| {
                messages
                    .iter()
                    .filter(|m| m.timestamp_millis > after_timestamp_millis)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn broadcast_message(&self, tx: MessageTransaction) -> Result<Vec<u8>, LedgerErr> {
        let signing_bytes = MessageTransaction::signing_bytes(
            &tx.sender_public_key,
            &tx.recipient,
            &tx.payload,
            tx.nonce,
        );

        if !crate::primitives::verify_message(&tx.sender_public_key, &signing_bytes, &tx.signature)
        {
            return Err(LedgerErr::Rejected("bad message signature".to_owned()));
        }

        let sender = tx.sender_public_key.to_address();
        if self.balance(&sender)? == 0
            && !verify_nonce(&tx.payload, tx.nonce, MESSAGE_POW_DIFFICULTY)
        {
            return Err(LedgerErr::Rejected("insufficient message pow".to_owned()));
        }

        let signature = tx.signature_bytes();
        self.push_message(
            tx.recipient,
            LedgerMessage {
                sender,
                timestamp_millis: Utc::now().timestamp_millis(),
                payload: tx.payload,
            },
        );

        Ok(signature)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TradeBotErr {
    Store(StoreErr),
    Ledger(LedgerErr),
    UnknownEntry,
    UnknownForeignChain(ForeignChain),
    TradeStillInFlight,
    InvalidKey(&'static str),
}

impl From<StoreErr> for TradeBotErr {
    fn from(err: StoreErr) -> Self {
        Self::Store(err)
    }
}

impl From<LedgerErr> for TradeBotErr {
    fn from(err: LedgerErr) -> Self {
        Self::Ledger(err)
    }
}

/// The orchestrator: owns the persisted entries and drives each one through
/// its state machine once per poll interval.
pub struct TradeBot {
    registry: Arc<AcctRegistry>,
    ledger: Arc<dyn LedgerView>,
    store: Arc<dyn TradeBotStore>,
    adapters: HashMap<ForeignChain, Arc<dyn ForeignBlockchainAdapter>>,
    poll_interval: Duration,
    fee_rate: u64,
}

impl TradeBot {
    #[must_use]
    pub fn new(
        registry: Arc<AcctRegistry>,
        ledger: Arc<dyn LedgerView>,
        store: Arc<dyn TradeBotStore>,
        adapters: HashMap<ForeignChain, Arc<dyn ForeignBlockchainAdapter>>,
        poll_interval: Duration,
        fee_rate: u64,
    ) -> Self {
        Self {
            registry,
            ledger,
            store,
            adapters,
            poll_interval,
            fee_rate,
        }
    }

    #[must_use]
    pub fn registry(&self) -> &AcctRegistry {
        &self.registry
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn TradeBotStore> {
        &self.store
    }

    #[must_use]
    pub fn ledger(&self) -> &Arc<dyn LedgerView> {
        &self.ledger
    }

    pub fn create_entry(&self, data: TradeBotData) -> Result<PublicKey, TradeBotErr> {
        let key = data
            .trade_public_key()
            .map_err(TradeBotErr::InvalidKey)?;
        self.store.put(&data)?;
        info!(
            "trade bot entry created: {} {} {:?}",
            data.reported_state(),
            data.foreign_blockchain,
            data.program_address
        );
        Ok(key)
    }

    pub fn get_entry(&self, key: &PublicKey) -> Result<Option<TradeBotData>, TradeBotErr> {
        Ok(self.store.get(key)?)
    }

    pub fn list_entries(&self) -> Result<Vec<TradeBotData>, TradeBotErr> {
        Ok(self.store.list()?)
    }

    /// Purges a finished entry. In-flight trades are refused: deleting one
    /// would strand funds on one of the two chains.
    pub fn delete_entry(&self, key: &PublicKey) -> Result<(), TradeBotErr> {
        let entry = self.store.get(key)?.ok_or(TradeBotErr::UnknownEntry)?;

        if !entry.state.is_terminal() {
            return Err(TradeBotErr::TradeStillInFlight);
        }

        self.store.delete(key)?;
        Ok(())
    }

    /// Runs until `exit` flips. One task for all trades.
    pub async fn run(self: Arc<Self>, exit: Arc<AtomicBool>) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(
            "trade bot polling every {}s",
            self.poll_interval.as_secs()
        );

        loop {
            ticker.tick().await;

            if exit.load(Ordering::Relaxed) {
                info!("trade bot shutting down");
                return;
            }

            if let Err(err) = self.poll_once().await {
                error!("trade bot poll failed: {err:?}");
            }
        }
    }

    /// One pass over every persisted entry. Entries are independent; a
    /// failure in one never blocks the rest.
    #[tracing::instrument(skip(self))]
    pub async fn poll_once(&self) -> Result<(), TradeBotErr> {
        for mut entry in self.store.list()? {
            if entry.state.is_terminal() {
                continue;
            }

            let Some(acct) = self.resolve_acct(&entry) else {
                continue;
            };

            let observation = self.observe(&acct, &entry);
            let step = advance(&entry, &observation);

            if step.state != entry.state || step.failure != entry.failure {
                debug!(
                    "trade {:?}: {} -> {:?} (failure {:?})",
                    entry.program_address, entry.reported_state(), step.state, step.failure
                );
            }

            entry.state = step.state;
            entry.failure = step.failure;

            self.execute(&acct, &mut entry, observation.trade.as_ref(), step.actions)
                .await;

            if let Err(err) = self.store.put(&entry) {
                // Fatal to this entry's update only; state is re-derived on
                // the next poll.
                error!("could not persist trade bot entry: {err:?}");
            }
        }

        Ok(())
    }

    /// Resolves an entry's ACCT variant, insisting on an exact code hash
    /// match for the deployed program. Anything else on the ledger is not
    /// ours and is silently skipped.
    fn resolve_acct(&self, entry: &TradeBotData) -> Option<Acct> {
        let acct = *self
            .registry
            .get(entry.foreign_blockchain, entry.acct_version)?;

        match self.ledger.program(&entry.program_address) {
            Ok(Some(program)) => {
                let matched = self.registry.lookup(&program.code_hash());
                if matched != Some(&acct) {
                    debug!(
                        "program {:?} does not hash to a registered ACCT; skipping",
                        entry.program_address
                    );
                    return None;
                }
                Some(acct)
            }
            // Deployment not yet visible: the state machine handles the
            // absent snapshot.
            Ok(None) => Some(acct),
            Err(err) => {
                warn!("ledger read failed: {err:?}");
                Some(acct)
            }
        }
    }

    fn observe(&self, acct: &Acct, entry: &TradeBotData) -> Observation {
        let now = Utc::now().timestamp();

        let trade = match self.ledger.program(&entry.program_address) {
            Ok(Some(program)) => acct.trade_data(entry.program_address, &program.data).ok(),
            _ => None,
        };

        let foreign = self.observe_foreign(entry);
        let offer = self.observe_offer(acct, entry, trade.as_ref());
        let revealed_secret = self.observe_revealed_secret(acct, entry, trade.as_ref());

        Observation {
            now,
            trade,
            foreign,
            offer,
            revealed_secret,
        }
    }

    fn observe_foreign(&self, entry: &TradeBotData) -> Result<ForeignView, FailureKind> {
        let Some(adapter) = self.adapters.get(&entry.foreign_blockchain) else {
            return Err(FailureKind::Network);
        };

        let Some(key) = entry.foreign_key.as_deref() else {
            // Nothing to watch on the foreign side for this entry.
            return Ok(ForeignView {
                height: 0,
                balance: 0,
            });
        };

        let height = adapter
            .get_blockchain_height()
            .map_err(Self::map_foreign_err)?;
        let balance = adapter.get_balance(key).map_err(Self::map_foreign_err)?;

        Ok(ForeignView { height, balance })
    }

    fn map_foreign_err(err: ForeignChainErr) -> FailureKind {
        if err.is_retryable() {
            FailureKind::Network
        } else {
            FailureKind::Balance
        }
    }

    /// First well-formed offer pending at the creator's trade address.
    fn observe_offer(
        &self,
        acct: &Acct,
        entry: &TradeBotData,
        trade: Option<&CrossChainTradeData>,
    ) -> Option<OfferObservation> {
        if entry.role != TradeRole::Creator || entry.state != TradeBotState::Offered {
            return None;
        }

        // Only relevant while the escrow still accepts a trade message.
        if trade.map(|t| t.mode) != Some(crate::acct::AcctMode::Offering) {
            return None;
        }

        let our_address = entry.trade_address().ok()?;
        let messages = self
            .ledger
            .messages_to(&our_address, entry.created_at * 1000)
            .ok()?;

        messages.into_iter().find_map(|message| {
            let offer = acct.decode_offer_message(&message.payload)?;
            Some(OfferObservation {
                message: offer,
                sender: message.sender,
                timestamp_millis: message.timestamp_millis,
            })
        })
    }

    /// Recovers the revealed secret preimage from the partner's redeem
    /// message once the escrow reports Redeemed.
    fn observe_revealed_secret(
        &self,
        acct: &Acct,
        entry: &TradeBotData,
        trade: Option<&CrossChainTradeData>,
    ) -> Option<crate::primitives::SwapSecret> {
        if entry.role != TradeRole::Creator {
            return None;
        }

        let trade = trade?;
        if trade.mode != crate::acct::AcctMode::Redeemed {
            return None;
        }

        let messages = self
            .ledger
            .messages_to(&entry.program_address, 0)
            .ok()?;

        messages.into_iter().find_map(|message| {
            let sender_matches = trade.aquila_partner_address == Some(message.sender);
            let redeem = acct.decode_redeem_message(&message.payload)?;
            sender_matches.then_some(redeem.secret)
        })
    }

    async fn execute(
        &self,
        acct: &Acct,
        entry: &mut TradeBotData,
        trade: Option<&CrossChainTradeData>,
        actions: Vec<TradeAction>,
    ) {
        for action in actions {
            match action {
                TradeAction::SendOffer(message) => {
                    let Some(recipient) = trade.map(|t| t.creator_trade_address) else {
                        warn!("offer ready but no escrow snapshot to address it to");
                        continue;
                    };
                    self.send_message(entry, recipient, message.encode()).await;
                }

                TradeAction::SendTrade(message) => {
                    // The escrow watches its own inbox and checks the sender
                    // is the creator's trade address.
                    let recipient = entry.program_address;
                    self.send_message(entry, recipient, message.encode()).await;
                }

                TradeAction::SendRedeem(message) => {
                    let recipient = entry.program_address;
                    self.send_message(entry, recipient, message.encode()).await;
                }

                TradeAction::FundForeign { amount } => {
                    // Funding comes from the user's foreign wallet; the bot
                    // watches for it and reports what is still owed.
                    info!(
                        "trade {:?}: waiting for {} {} of foreign funding",
                        entry.program_address, amount, entry.foreign_blockchain
                    );
                }

                TradeAction::SpendForeignWithSecret { secret: _secret } => {
                    // The preimage travels inside the wallet layer's witness;
                    // it is never logged here.
                    self.spend_foreign(acct, entry, true);
                }

                TradeAction::RefundForeign => {
                    self.spend_foreign(acct, entry, false);
                }
            }
        }
    }

    /// Builds and broadcasts a foreign chain spend for a claim or a refund.
    fn spend_foreign(&self, _acct: &Acct, entry: &mut TradeBotData, claim: bool) {
        let Some(adapter) = self.adapters.get(&entry.foreign_blockchain) else {
            entry.failure = Some(FailureKind::Network);
            return;
        };

        let (Some(key), Some(to_address)) = (
            entry.foreign_key.clone(),
            entry.foreign_receiving_address.clone(),
        ) else {
            warn!(
                "trade {:?}: foreign spend requested without key material",
                entry.program_address
            );
            return;
        };

        let result = adapter
            .build_spend(&key, &to_address, entry.foreign_amount, self.fee_rate)
            .and_then(|tx| adapter.broadcast(&tx));

        match result {
            Ok(txid) => {
                info!(
                    "trade {:?}: foreign {} broadcast as {txid}",
                    entry.program_address,
                    if claim { "claim" } else { "refund" }
                );
            }
            Err(err) if err.is_retryable() => {
                warn!("foreign spend deferred: {err}");
                entry.failure = Some(FailureKind::Network);
            }
            Err(err) => {
                warn!("foreign spend failed: {err}");
                entry.failure = Some(FailureKind::Balance);
            }
        }
    }

    /// Signs and broadcasts a protocol message from the entry's trade key.
    /// Unfunded senders first compute a proof of work nonce, off the poll
    /// task since it is the one CPU heavy step in the loop.
    async fn send_message(&self, entry: &mut TradeBotData, recipient: Address, payload: Vec<u8>) {
        let keypair = match entry.trade_keypair() {
            Ok(keypair) => keypair,
            Err(err) => {
                error!("trade entry holds an unusable key: {err}");
                return;
            }
        };

        let sender_public_key = match entry.trade_public_key() {
            Ok(key) => key,
            Err(err) => {
                error!("trade entry holds an unusable key: {err}");
                return;
            }
        };

        let sender_address = sender_public_key.to_address();
        let funded = matches!(self.ledger.balance(&sender_address), Ok(balance) if balance > 0);

        let nonce = if funded {
            0
        } else {
            let pow_payload = payload.clone();
            tokio_rayon::spawn(move || compute_nonce(&pow_payload, MESSAGE_POW_DIFFICULTY)).await
        };

        let signing_bytes =
            MessageTransaction::signing_bytes(&sender_public_key, &recipient, &payload, nonce);
        let signature = sign_message(&keypair, &signing_bytes);

        let tx = MessageTransaction {
            sender_public_key,
            recipient,
            payload,
            nonce,
            signature,
        };

        match self.ledger.broadcast_message(tx) {
            Ok(signature) => {
                debug!(
                    "trade {:?}: message to {:?} broadcast",
                    entry.program_address, recipient
                );
                entry.last_tx_signature = Some(signature);
            }
            Err(err) => {
                // Re-issued on a later poll; protocol messages are idempotent
                // against the escrow.
                warn!("message broadcast failed: {err:?}");
            }
        }
    }
}
