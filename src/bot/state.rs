// Copyright (c) 2023 Octavian Oncescu
// Copyright (c) 2023-2024 The Aquila Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

//! The per-trade state machine.
//!
//! [`advance`] is a pure function of the persisted entry and one poll's
//! observations; the imperative driver in [`super::TradeBot`] performs the
//! I/O on both sides and persists the result. No hidden mutable context: two
//! polls with equal inputs take equal transitions.

use crate::acct::{
    calc_refund_timeout, AcctMode, CrossChainTradeData, OfferMessage, RedeemMessage, TradeMessage,
};
use crate::foreign::ForeignChain;
use crate::primitives::{keypair_from_seed, Address, Hash160, PublicKey, SwapSecret};
use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which side of a swap this node plays.
///
/// The creator sells the host asset: it deploys the escrow, registers the
/// counterparty with a trade message and later claims the foreign leg with
/// the revealed secret. The responder funds the foreign leg, holds the
/// secret, and redeems the host leg by revealing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode, Serialize, Deserialize)]
pub enum TradeRole {
    Creator,
    Responder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode, Serialize, Deserialize)]
pub enum TradeBotState {
    Created,
    FundingForeign,
    Offered,
    Trading,
    Redeeming,
    RefundPending,
    Redeemed,
    Refunded,
    Cancelled,
}

impl TradeBotState {
    /// Terminal states stop polling.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Redeemed | Self::Refunded | Self::Cancelled)
    }
}

/// Foreign chain failure kinds that park an entry without losing its state.
/// Both are retried on the next poll; neither is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode, Serialize, Deserialize)]
pub enum FailureKind {
    Balance,
    Network,
}

/// One local party's persistent record of a single trade.
///
/// Keyed by the trade private key and must survive restart: partial protocol
/// progress is resumable from this record alone.
#[derive(Clone, PartialEq, Encode, Decode)]
pub struct TradeBotData {
    /// Seed of the ephemeral keypair identifying this party's role in the
    /// trade. Secret material, never logged.
    pub trade_private_key: [u8; 32],
    pub role: TradeRole,
    pub foreign_blockchain: ForeignChain,
    pub acct_version: u16,
    pub program_address: Address,
    pub state: TradeBotState,
    pub failure: Option<FailureKind>,
    /// Host chain address receiving the redeemed amount.
    pub receiving_address: Address,
    /// Foreign chain address the creator claims the foreign leg to.
    pub foreign_receiving_address: Option<String>,
    /// Responder's foreign wallet key. Secret material, never logged.
    pub foreign_key: Option<String>,
    /// Responder's secret preimage. Never logged.
    pub secret: Option<SwapSecret>,
    pub hash_of_secret: Option<Hash160>,
    /// Responder's foreign chain public key, published in the offer.
    pub foreign_public_key: Option<Vec<u8>>,
    /// Foreign amount this trade settles.
    pub foreign_amount: u64,
    /// Foreign chain lock time chosen by the responder.
    pub lock_time_a: Option<u64>,
    /// Signature of the last protocol transaction this bot broadcast.
    pub last_tx_signature: Option<Vec<u8>>,
    pub created_at: i64,
}

impl TradeBotData {
    pub fn trade_keypair(&self) -> Result<schnorrkel::Keypair, &'static str> {
        keypair_from_seed(&self.trade_private_key)
    }

    pub fn trade_public_key(&self) -> Result<PublicKey, &'static str> {
        let keypair = self.trade_keypair()?;
        PublicKey::from_bytes(&keypair.public.to_bytes())
    }

    pub fn trade_address(&self) -> Result<Address, &'static str> {
        Ok(self.trade_public_key()?.to_address())
    }

    /// State as reported to the user: a pending foreign failure shadows the
    /// resumable state without destroying it.
    #[must_use]
    pub fn reported_state(&self) -> &'static str {
        match self.failure {
            Some(FailureKind::Balance) => "ERROR_BALANCE",
            Some(FailureKind::Network) => "ERROR_NETWORK",
            None => match self.state {
                TradeBotState::Created => "CREATED",
                TradeBotState::FundingForeign => "FUNDING_FOREIGN",
                TradeBotState::Offered => "OFFERED",
                TradeBotState::Trading => "TRADING",
                TradeBotState::Redeeming => "REDEEMING",
                TradeBotState::RefundPending => "REFUND_PENDING",
                TradeBotState::Redeemed => "REDEEMED",
                TradeBotState::Refunded => "REFUNDED",
                TradeBotState::Cancelled => "CANCELLED",
            },
        }
    }
}

impl fmt::Debug for TradeBotData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TradeBotData")
            .field("trade_private_key", &"[REDACTED]")
            .field("role", &self.role)
            .field("foreign_blockchain", &self.foreign_blockchain)
            .field("program_address", &self.program_address)
            .field("state", &self.state)
            .field("failure", &self.failure)
            .field("foreign_key", &self.foreign_key.as_ref().map(|_| "[REDACTED]"))
            .field("secret", &self.secret.as_ref().map(|_| "[REDACTED]"))
            .field("foreign_amount", &self.foreign_amount)
            .finish()
    }
}

/// Foreign chain reading for the script this entry currently watches: the
/// responder's funding key before the offer, the escrowed foreign leg during
/// refund, the creator's receiving address while claiming.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForeignView {
    pub height: u64,
    pub balance: u64,
}

/// An offer observed as a message transaction to the creator's trade
/// address. The sender is the counterparty's trade address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OfferObservation {
    pub message: OfferMessage,
    pub sender: Address,
    pub timestamp_millis: i64,
}

/// Everything one poll learned about the world.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    /// Wall clock, epoch seconds.
    pub now: i64,
    /// Escrow snapshot, absent while the deployment is unconfirmed.
    pub trade: Option<CrossChainTradeData>,
    pub foreign: Result<ForeignView, FailureKind>,
    /// First well-formed offer pending at the creator's trade address.
    pub offer: Option<OfferObservation>,
    /// Secret preimage recovered from the partner's redeem message once the
    /// escrow mode is Redeemed.
    pub revealed_secret: Option<SwapSecret>,
}

/// Side effects the driver must perform after a transition.
///
/// Cancels are absent on purpose: a cancel message must come from the
/// creator's funded main address, which only the user's wallet controls, so
/// the API layer builds the payload and the wallet sends it.
#[derive(Debug, Clone, PartialEq)]
pub enum TradeAction {
    SendOffer(OfferMessage),
    SendTrade(TradeMessage),
    SendRedeem(RedeemMessage),
    FundForeign { amount: u64 },
    SpendForeignWithSecret { secret: SwapSecret },
    RefundForeign,
}

/// Result of one transition.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub state: TradeBotState,
    pub failure: Option<FailureKind>,
    pub actions: Vec<TradeAction>,
}

impl Step {
    fn stay(state: TradeBotState) -> Self {
        Self {
            state,
            failure: None,
            actions: vec![],
        }
    }

    fn go(state: TradeBotState, actions: Vec<TradeAction>) -> Self {
        Self {
            state,
            failure: None,
            actions,
        }
    }

    fn fail(state: TradeBotState, kind: FailureKind) -> Self {
        Self {
            state,
            failure: Some(kind),
            actions: vec![],
        }
    }
}

/// Advances one entry by one poll.
pub fn advance(data: &TradeBotData, obs: &Observation) -> Step {
    if data.state.is_terminal() {
        return Step::stay(data.state);
    }

    match data.role {
        TradeRole::Responder => advance_responder(data, obs),
        TradeRole::Creator => advance_creator(data, obs),
    }
}

fn advance_responder(data: &TradeBotData, obs: &Observation) -> Step {
    let mode = obs.trade.as_ref().map(|t| t.mode);

    match data.state {
        TradeBotState::Created => match obs.foreign {
            Err(kind) => Step::fail(data.state, kind),
            Ok(_) => Step::go(
                TradeBotState::FundingForeign,
                vec![TradeAction::FundForeign {
                    amount: data.foreign_amount,
                }],
            ),
        },

        TradeBotState::FundingForeign => match obs.foreign {
            Err(kind) => Step::fail(data.state, kind),
            Ok(view) if view.balance >= data.foreign_amount => {
                let (Some(foreign_public_key), Some(hash_of_secret), Some(lock_time_a)) = (
                    data.foreign_public_key.clone(),
                    data.hash_of_secret,
                    data.lock_time_a,
                ) else {
                    // Entry was created without its offer ingredients;
                    // nothing sensible can be sent.
                    return Step::stay(data.state);
                };

                Step::go(
                    TradeBotState::Offered,
                    vec![TradeAction::SendOffer(OfferMessage {
                        foreign_public_key,
                        hash_of_secret,
                        lock_time_a,
                    })],
                )
            }
            // Funding transaction still confirming.
            Ok(_) => Step::stay(data.state),
        },

        TradeBotState::Offered => match mode {
            Some(AcctMode::Trading) => {
                let ours = obs.trade.as_ref().and_then(|t| t.aquila_partner_address)
                    == data.trade_address().ok();
                if ours {
                    Step::go(TradeBotState::Trading, vec![])
                } else {
                    // The creator registered someone else; our foreign leg
                    // comes back at lock time.
                    past_lock_time(data, obs.now)
                }
            }
            Some(mode) if mode.is_terminal() => past_lock_time(data, obs.now),
            _ => past_lock_time(data, obs.now),
        },

        TradeBotState::Trading => {
            let escrow_hash = obs.trade.as_ref().and_then(|t| t.hash_of_secret);
            let (Some(secret), Some(escrow_hash)) = (data.secret, escrow_hash) else {
                return Step::stay(data.state);
            };

            // The escrow side check is hash160(secret) == registered hash;
            // never reveal without verifying the same thing locally,
            // byte for byte.
            if secret.hash_of_secret() != escrow_hash {
                return Step::stay(data.state);
            }

            Step::go(
                TradeBotState::Redeeming,
                vec![TradeAction::SendRedeem(RedeemMessage {
                    secret,
                    payout_address: data.receiving_address,
                })],
            )
        }

        TradeBotState::Redeeming => match mode {
            Some(AcctMode::Redeemed) => Step::go(TradeBotState::Redeemed, vec![]),
            Some(AcctMode::Refunded) => past_lock_time(data, obs.now),
            // Unknown outcome: re-issue. The escrow rejects a second redeem
            // once its mode is terminal, so this is harmless.
            _ => match (data.secret, obs.trade.as_ref().and_then(|t| t.hash_of_secret)) {
                (Some(secret), Some(_)) => Step::go(
                    TradeBotState::Redeeming,
                    vec![TradeAction::SendRedeem(RedeemMessage {
                        secret,
                        payout_address: data.receiving_address,
                    })],
                ),
                _ => Step::stay(data.state),
            },
        },

        TradeBotState::RefundPending => match obs.foreign {
            Err(kind) => Step::fail(data.state, kind),
            Ok(view) if view.balance == 0 => Step::go(TradeBotState::Refunded, vec![]),
            Ok(_) if data.lock_time_a.is_some_and(|lt| obs.now >= lt as i64) => Step::go(
                TradeBotState::RefundPending,
                vec![TradeAction::RefundForeign],
            ),
            Ok(_) => Step::stay(data.state),
        },

        // Terminal states handled by the caller.
        _ => Step::stay(data.state),
    }
}

/// Responder fallback once the host side cannot complete: wait out the
/// foreign lock time, then reclaim.
fn past_lock_time(data: &TradeBotData, now: i64) -> Step {
    match data.lock_time_a {
        Some(lock_time) if now >= lock_time as i64 => {
            Step::go(TradeBotState::RefundPending, vec![])
        }
        _ => Step::stay(data.state),
    }
}

fn advance_creator(data: &TradeBotData, obs: &Observation) -> Step {
    let mode = obs.trade.as_ref().map(|t| t.mode);

    match data.state {
        TradeBotState::Created => match mode {
            Some(_) => Step::go(TradeBotState::Offered, vec![]),
            // Deployment still confirming.
            None => Step::stay(data.state),
        },

        TradeBotState::Offered => match mode {
            Some(AcctMode::Cancelled) => Step::go(TradeBotState::Cancelled, vec![]),
            Some(AcctMode::Refunded) => Step::go(TradeBotState::Refunded, vec![]),
            Some(AcctMode::Trading) => Step::go(TradeBotState::Trading, vec![]),
            Some(AcctMode::Offering) => match &obs.offer {
                Some(offer) => respond_to_offer(data, offer),
                None => Step::stay(data.state),
            },
            _ => Step::stay(data.state),
        },

        TradeBotState::Trading | TradeBotState::RefundPending => match mode {
            Some(AcctMode::Redeemed) => creator_claim_foreign(data, obs),
            Some(AcctMode::Refunded) => Step::go(TradeBotState::Refunded, vec![]),
            Some(AcctMode::Trading) => {
                let deadline = obs.trade.as_ref().and_then(|t| t.refund_deadline);
                if data.state == TradeBotState::Trading
                    && deadline.is_some_and(|d| obs.now >= d)
                {
                    Step::go(TradeBotState::RefundPending, vec![])
                } else {
                    Step::stay(data.state)
                }
            }
            _ => Step::stay(data.state),
        },

        TradeBotState::Redeeming => match obs.foreign {
            Err(kind) => Step::fail(data.state, kind),
            Ok(view) if view.balance >= data.foreign_amount => {
                Step::go(TradeBotState::Redeemed, vec![])
            }
            // Claim not settled yet: re-issue if we still hold the secret.
            Ok(_) => match obs.revealed_secret {
                Some(secret) => Step::go(
                    TradeBotState::Redeeming,
                    vec![TradeAction::SpendForeignWithSecret { secret }],
                ),
                None => Step::stay(data.state),
            },
        },

        _ => Step::stay(data.state),
    }
}

/// Creator reaction to a pending offer: derive the refund timeout and
/// register the sender as the trade partner.
fn respond_to_offer(data: &TradeBotData, offer: &OfferObservation) -> Step {
    let refund_timeout =
        calc_refund_timeout(offer.message.lock_time_a, offer.timestamp_millis);

    // A non-positive timeout means the foreign lock time is already within
    // reach; accepting would let the counterparty refund while we trade.
    if refund_timeout <= 0 {
        return Step::stay(data.state);
    }

    if offer.message.hash_of_secret.is_zero() {
        return Step::stay(data.state);
    }

    Step::go(
        TradeBotState::Offered,
        vec![TradeAction::SendTrade(TradeMessage {
            partner_trade_address: offer.sender,
            partner_foreign_public_key: offer.message.foreign_public_key.clone(),
            refund_timeout_minutes: refund_timeout as u64,
            hash_of_secret: offer.message.hash_of_secret,
            lock_time_a: offer.message.lock_time_a,
        })],
    )
}

/// Creator claim of the foreign leg once the partner revealed the secret.
fn creator_claim_foreign(data: &TradeBotData, obs: &Observation) -> Step {
    let Some(secret) = obs.revealed_secret else {
        // Mode is Redeemed but the revealing message has not been fetched
        // yet; retry next poll.
        return Step::stay(data.state);
    };

    let escrow_hash = obs.trade.as_ref().and_then(|t| t.hash_of_secret);
    let Some(escrow_hash) = escrow_hash else {
        return Step::stay(data.state);
    };

    // Same commitment check the escrow ran, byte for byte, before any
    // foreign chain spend.
    if secret.hash_of_secret() != escrow_hash {
        return Step::stay(data.state);
    }

    Step::go(
        TradeBotState::Redeeming,
        vec![TradeAction::SpendForeignWithSecret { secret }],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acct::harness::EscrowHarness;
    use crate::acct::{
        Acct, CancelMessage, EscrowProgramBuilder, TradeParameters, FOREIGN_PKH_BYTES,
    };

    const T0: i64 = 1_700_000_000;

    fn responder_data(state: TradeBotState) -> TradeBotData {
        let secret = SwapSecret([0xab; 32]);
        TradeBotData {
            trade_private_key: [7; 32],
            role: TradeRole::Responder,
            foreign_blockchain: ForeignChain::Bitcoin,
            acct_version: 1,
            program_address: Address([0xaa; 20]),
            state,
            failure: None,
            receiving_address: Address([0xcc; 20]),
            foreign_receiving_address: None,
            foreign_key: Some("key".to_owned()),
            secret: Some(secret),
            hash_of_secret: Some(secret.hash_of_secret()),
            foreign_public_key: Some(vec![0x02; 33]),
            foreign_amount: 50_000,
            lock_time_a: Some(T0 as u64 + 7200),
            last_tx_signature: None,
            created_at: T0,
        }
    }

    fn creator_data(state: TradeBotState) -> TradeBotData {
        TradeBotData {
            trade_private_key: [9; 32],
            role: TradeRole::Creator,
            foreign_blockchain: ForeignChain::Bitcoin,
            acct_version: 1,
            program_address: Address([0xaa; 20]),
            state,
            failure: None,
            receiving_address: Address([0xcd; 20]),
            foreign_receiving_address: Some("1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa".to_owned()),
            foreign_key: None,
            secret: None,
            hash_of_secret: None,
            foreign_public_key: None,
            foreign_amount: 50_000,
            lock_time_a: None,
            last_tx_signature: None,
            created_at: T0,
        }
    }

    fn escrow_snapshot(mode_setup: impl FnOnce(&mut EscrowHarness, &Address)) -> CrossChainTradeData {
        let creator_trade = Address([0x11; 20]);
        let params = TradeParameters {
            creator_trade_address: creator_trade,
            creator_foreign_pkh: vec![0x22; FOREIGN_PKH_BYTES],
            redeem_amount: 100,
            expected_foreign_amount: 50_000,
            trade_timeout_minutes: 120,
        };
        let program = EscrowProgramBuilder::new(ForeignChain::Bitcoin, 1)
            .build(&params)
            .unwrap();
        let mut harness = EscrowHarness::deploy(&program, &Address([0x10; 20]), T0 as u64);
        mode_setup(&mut harness, &creator_trade);
        Acct::BitcoinV1
            .trade_data(Address([0xaa; 20]), harness.image())
            .unwrap()
    }

    fn obs(trade: Option<CrossChainTradeData>, foreign: Result<ForeignView, FailureKind>) -> Observation {
        Observation {
            now: T0 + 60,
            trade,
            foreign,
            offer: None,
            revealed_secret: None,
        }
    }

    fn offering_snapshot() -> CrossChainTradeData {
        escrow_snapshot(|_, _| {})
    }

    fn trading_snapshot(partner: Address, hash: Hash160) -> CrossChainTradeData {
        escrow_snapshot(|harness, creator_trade| {
            let message = TradeMessage {
                partner_trade_address: partner,
                partner_foreign_public_key: vec![0x02; 33],
                refund_timeout_minutes: 60,
                hash_of_secret: hash,
                lock_time_a: T0 as u64 + 7200,
            };
            harness.deliver(creator_trade, &message.encode(), T0 as u64 + 30);
        })
    }

    #[test]
    fn responder_funds_then_offers() {
        let data = responder_data(TradeBotState::Created);
        let step = advance(
            &data,
            &obs(None, Ok(ForeignView { height: 1, balance: 0 })),
        );
        assert_eq!(step.state, TradeBotState::FundingForeign);
        assert_eq!(
            step.actions,
            vec![TradeAction::FundForeign { amount: 50_000 }]
        );

        // Funding unconfirmed: stay.
        let data = responder_data(TradeBotState::FundingForeign);
        let step = advance(
            &data,
            &obs(None, Ok(ForeignView { height: 2, balance: 10 })),
        );
        assert_eq!(step.state, TradeBotState::FundingForeign);
        assert!(step.actions.is_empty());

        // Confirmed: send the offer.
        let step = advance(
            &data,
            &obs(
                None,
                Ok(ForeignView {
                    height: 3,
                    balance: 50_000,
                }),
            ),
        );
        assert_eq!(step.state, TradeBotState::Offered);
        assert!(matches!(step.actions.as_slice(), [TradeAction::SendOffer(_)]));
    }

    #[test]
    fn responder_enters_trading_when_registered() {
        let data = responder_data(TradeBotState::Offered);
        let partner = data.trade_address().unwrap();
        let snapshot = trading_snapshot(partner, data.secret.unwrap().hash_of_secret());

        let step = advance(
            &data,
            &obs(
                Some(snapshot),
                Ok(ForeignView {
                    height: 4,
                    balance: 50_000,
                }),
            ),
        );
        assert_eq!(step.state, TradeBotState::Trading);
    }

    #[test]
    fn responder_ignores_trading_for_someone_else() {
        let data = responder_data(TradeBotState::Offered);
        let snapshot = trading_snapshot(
            Address([0xee; 20]),
            data.secret.unwrap().hash_of_secret(),
        );

        let step = advance(
            &data,
            &obs(
                Some(snapshot),
                Ok(ForeignView {
                    height: 4,
                    balance: 50_000,
                }),
            ),
        );
        assert_eq!(step.state, TradeBotState::Offered);
        assert!(step.actions.is_empty());
    }

    #[test]
    fn responder_redeems_only_after_local_hash_check() {
        let data = responder_data(TradeBotState::Trading);
        let partner = data.trade_address().unwrap();

        // Escrow registered our commitment: redeem.
        let snapshot = trading_snapshot(partner, data.secret.unwrap().hash_of_secret());
        let step = advance(
            &data,
            &obs(
                Some(snapshot),
                Ok(ForeignView {
                    height: 5,
                    balance: 50_000,
                }),
            ),
        );
        assert_eq!(step.state, TradeBotState::Redeeming);
        assert!(matches!(step.actions.as_slice(), [TradeAction::SendRedeem(_)]));

        // Escrow holds a different commitment: never reveal the secret.
        let snapshot = trading_snapshot(partner, Hash160([0xde; 20]));
        let step = advance(
            &data,
            &obs(
                Some(snapshot),
                Ok(ForeignView {
                    height: 5,
                    balance: 50_000,
                }),
            ),
        );
        assert_eq!(step.state, TradeBotState::Trading);
        assert!(step.actions.is_empty());
    }

    #[test]
    fn responder_refunds_after_lock_time() {
        let data = responder_data(TradeBotState::Offered);
        let mut observation = obs(
            Some(offering_snapshot()),
            Ok(ForeignView {
                height: 6,
                balance: 50_000,
            }),
        );
        observation.now = T0 + 7200;

        let step = advance(&data, &observation);
        assert_eq!(step.state, TradeBotState::RefundPending);

        // Lock time reached: reclaim the foreign leg.
        let data = responder_data(TradeBotState::RefundPending);
        let step = advance(&data, &observation);
        assert_eq!(step.state, TradeBotState::RefundPending);
        assert_eq!(step.actions, vec![TradeAction::RefundForeign]);

        // Reclaim settled.
        let mut observation = observation;
        observation.foreign = Ok(ForeignView {
            height: 7,
            balance: 0,
        });
        let step = advance(&data, &observation);
        assert_eq!(step.state, TradeBotState::Refunded);
    }

    #[test]
    fn foreign_failures_park_the_entry() {
        let data = responder_data(TradeBotState::Created);

        let step = advance(&data, &obs(None, Err(FailureKind::Network)));
        assert_eq!(step.state, TradeBotState::Created);
        assert_eq!(step.failure, Some(FailureKind::Network));

        let step = advance(&data, &obs(None, Err(FailureKind::Balance)));
        assert_eq!(step.failure, Some(FailureKind::Balance));

        // Next successful poll resumes where the trade left off.
        let step = advance(
            &data,
            &obs(None, Ok(ForeignView { height: 1, balance: 0 })),
        );
        assert_eq!(step.failure, None);
        assert_eq!(step.state, TradeBotState::FundingForeign);
    }

    #[test]
    fn terminal_states_stop() {
        for state in [
            TradeBotState::Redeemed,
            TradeBotState::Refunded,
            TradeBotState::Cancelled,
        ] {
            let data = responder_data(state);
            let step = advance(&data, &obs(None, Err(FailureKind::Network)));
            assert_eq!(step, Step::stay(state));
        }
    }

    #[test]
    fn creator_sends_trade_message_for_valid_offer() {
        let data = creator_data(TradeBotState::Offered);
        let mut observation = obs(
            Some(offering_snapshot()),
            Ok(ForeignView { height: 1, balance: 0 }),
        );
        let sender = Address([0x55; 20]);
        observation.offer = Some(OfferObservation {
            message: OfferMessage {
                foreign_public_key: vec![0x02; 33],
                hash_of_secret: Hash160([0x66; 20]),
                lock_time_a: T0 as u64 + 7200,
            },
            sender,
            timestamp_millis: T0 * 1000,
        });

        let step = advance(&data, &observation);
        assert_eq!(step.state, TradeBotState::Offered);
        match step.actions.as_slice() {
            [TradeAction::SendTrade(message)] => {
                assert_eq!(message.partner_trade_address, sender);
                assert_eq!(message.hash_of_secret, Hash160([0x66; 20]));
                // 7200 seconds of lock time: 7200 / 2 / 60 = 60 minutes
                assert_eq!(message.refund_timeout_minutes, 60);
            }
            other => panic!("expected a trade message, got {other:?}"),
        }
    }

    #[test]
    fn creator_rejects_expired_offer() {
        let data = creator_data(TradeBotState::Offered);
        let mut observation = obs(
            Some(offering_snapshot()),
            Ok(ForeignView { height: 1, balance: 0 }),
        );
        observation.offer = Some(OfferObservation {
            message: OfferMessage {
                foreign_public_key: vec![0x02; 33],
                hash_of_secret: Hash160([0x66; 20]),
                // Lock time at the offer timestamp: refund timeout <= 0.
                lock_time_a: T0 as u64,
            },
            sender: Address([0x55; 20]),
            timestamp_millis: T0 * 1000,
        });

        let step = advance(&data, &observation);
        assert_eq!(step.state, TradeBotState::Offered);
        assert!(step.actions.is_empty());
    }

    #[test]
    fn creator_claims_foreign_leg_after_reveal() {
        let data = creator_data(TradeBotState::Trading);
        let secret = SwapSecret([0xab; 32]);
        let partner = Address([0x55; 20]);

        let snapshot = escrow_snapshot(|harness, creator_trade| {
            let message = TradeMessage {
                partner_trade_address: partner,
                partner_foreign_public_key: vec![0x02; 33],
                refund_timeout_minutes: 60,
                hash_of_secret: secret.hash_of_secret(),
                lock_time_a: T0 as u64 + 7200,
            };
            harness.deliver(creator_trade, &message.encode(), T0 as u64 + 30);
            let redeem = RedeemMessage {
                secret,
                payout_address: Address([0x77; 20]),
            };
            harness.deliver(&partner, &redeem.encode(), T0 as u64 + 60);
        });
        assert_eq!(snapshot.mode, AcctMode::Redeemed);

        // Reveal not yet fetched: wait.
        let mut observation = obs(
            Some(snapshot.clone()),
            Ok(ForeignView { height: 1, balance: 0 }),
        );
        let step = advance(&data, &observation);
        assert_eq!(step.state, TradeBotState::Trading);

        // Wrong preimage from the ledger scan: never spend.
        observation.revealed_secret = Some(SwapSecret([0xac; 32]));
        let step = advance(&data, &observation);
        assert_eq!(step.state, TradeBotState::Trading);
        assert!(step.actions.is_empty());

        // Correct preimage: claim.
        observation.revealed_secret = Some(secret);
        let step = advance(&data, &observation);
        assert_eq!(step.state, TradeBotState::Redeeming);
        assert_eq!(
            step.actions,
            vec![TradeAction::SpendForeignWithSecret { secret }]
        );

        // Claim settles once the receiving script holds the foreign amount.
        let mut data = creator_data(TradeBotState::Redeeming);
        data.foreign_amount = 50_000;
        observation.foreign = Ok(ForeignView {
            height: 2,
            balance: 50_000,
        });
        let step = advance(&data, &observation);
        assert_eq!(step.state, TradeBotState::Redeemed);
    }

    #[test]
    fn creator_follows_cancel_and_refund_modes() {
        let data = creator_data(TradeBotState::Offered);

        let cancelled = escrow_snapshot(|harness, _| {
            let creator_main = Address([0x10; 20]);
            let cancel = CancelMessage {
                creator_address: creator_main,
            };
            harness.deliver(&creator_main, &cancel.encode(), T0 as u64 + 30);
        });
        let step = advance(
            &data,
            &obs(Some(cancelled), Ok(ForeignView { height: 1, balance: 0 })),
        );
        assert_eq!(step.state, TradeBotState::Cancelled);

        let refunded = escrow_snapshot(|harness, _| {
            harness.tick(T0 as u64 + 120 * 60);
        });
        let step = advance(
            &data,
            &obs(Some(refunded), Ok(ForeignView { height: 1, balance: 0 })),
        );
        assert_eq!(step.state, TradeBotState::Refunded);
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let mut data = responder_data(TradeBotState::Trading);
        data.foreign_key = Some("KwDiBf89QgGbjEhKnhXJuH7LrciVrZi3qYjgd9M7rFU73sVHnoWn".to_owned());
        let rendered = format!("{data:?}");
        assert!(rendered.contains("[REDACTED]"));
        assert!(!rendered.contains("KwDiBf89"));
        assert!(!rendered.contains(&hex::encode([0xab_u8; 32])));
        assert!(!rendered.contains(&hex::encode([7_u8; 32])));
    }
}
