// Copyright (c) 2023 Octavian Oncescu
// Copyright (c) 2023-2024 The Aquila Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

//! Thin rpc surface over the ACCT components. Each endpoint translates an
//! untyped request into calls on the registry, builder, codec, reader and
//! trade bot; no business logic lives here beyond input validation.

use crate::acct::{
    Acct, CancelMessage, RedeemMessage, TradeMessage, TradeParameters,
};
use crate::bot::{TradeBotData, TradeBotErr, TradeBotState, TradeRole};
use crate::foreign::ForeignChain;
use crate::node::{NodeCtx, EXIT_SIGNAL, STARTUP_TIME};
use crate::primitives::{Address, Hash160, PublicKey, SwapSecret};
use crate::settings::SETTINGS;
use chrono::prelude::*;
use futures::future::{self, Ready};
use serde::{Deserialize, Serialize};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tarpc::{client, context};
use warp::Filter;

pub type RpcRequest = tarpc::ClientMessage<RpcServerDefinitionRequest>;
pub type RpcResponse = tarpc::Response<RpcServerDefinitionResponse>;
pub type RpcChannel = tarpc::transport::channel::UnboundedChannel<RpcResponse, RpcRequest>;

#[tarpc::service]
pub trait RpcServerDefinition {
    /// Returns information about the node
    async fn get_node_info() -> String;

    /// Returns the number of seconds the server has been running
    async fn uptime() -> u64;

    /// Attempts to gracefully shutdown Aquila
    async fn stop() -> String;

    /// Validates the given host chain address
    async fn validate_address(address: String) -> bool;

    /// Compiles a deployable escrow program for a new trade
    async fn build_trade(request: BuildTradeRequest) -> Result<String, RpcErr>;

    /// Builds the trade message registering a counterparty with an escrow
    async fn build_trade_message(request: BuildTradeMessageRequest) -> Result<String, RpcErr>;

    /// Builds the redeem message revealing a secret to an escrow
    async fn build_redeem_message(request: BuildRedeemMessageRequest) -> Result<String, RpcErr>;

    /// Builds the cancel message for an offering escrow
    async fn build_cancel_message(creator_address: String) -> Result<String, RpcErr>;

    /// Returns the current trade snapshot of a deployed escrow program
    async fn get_trade(program_address: String) -> Result<String, RpcErr>;

    /// Returns trade snapshots for every local trade on the given chain
    async fn list_trades(foreign_blockchain: String) -> Result<String, RpcErr>;

    /// Creates a trade bot entry for the creator side of a trade
    async fn create_trade_bot(request: CreateTradeBotRequest) -> Result<String, RpcErr>;

    /// Creates a trade bot entry responding to a discovered trade
    async fn respond_trade_bot(request: RespondTradeBotRequest) -> Result<String, RpcErr>;

    /// Deletes a finished trade bot entry
    async fn delete_trade_bot(trade_public_key: String) -> Result<bool, RpcErr>;

    /// Lists all trade bot entries and their states
    async fn list_trade_bot_entries() -> Result<String, RpcErr>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RpcErr {
    InvalidAddress,
    InvalidPublicKey,
    InvalidParameters,
    UnknownForeignChain,
    UnknownTrade,
    TradeStillInFlight,
    StoreFailure,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildTradeRequest {
    pub foreign_blockchain: String,
    pub creator_trade_address: String,
    /// Hex encoded HASH160 of the creator's foreign public key.
    pub creator_foreign_pkh: String,
    pub redeem_amount: u64,
    pub expected_foreign_amount: u64,
    pub trade_timeout_minutes: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildTradeMessageRequest {
    pub foreign_blockchain: String,
    pub partner_trade_address: String,
    /// Hex encoded foreign chain public key.
    pub partner_foreign_public_key: String,
    pub refund_timeout_minutes: u64,
    /// Hex encoded HASH160 commitment.
    pub hash_of_secret: String,
    pub lock_time_a: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildRedeemMessageRequest {
    /// Hex encoded 32 byte secret preimage.
    pub secret: String,
    pub payout_address: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CreateTradeBotRequest {
    pub foreign_blockchain: String,
    pub program_address: String,
    pub receiving_address: String,
    /// Foreign wallet key used to claim the foreign leg.
    pub foreign_key: String,
    pub foreign_receiving_address: String,
    pub foreign_amount: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RespondTradeBotRequest {
    pub foreign_blockchain: String,
    pub program_address: String,
    pub receiving_address: String,
    /// Foreign wallet key funding the foreign leg.
    pub foreign_key: String,
    /// Hex encoded foreign chain public key published in the offer.
    pub foreign_public_key: String,
    pub foreign_amount: u64,
    pub lock_time_a: u64,
}

/// Redacted view of a trade bot entry for api listings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TradeBotView {
    pub trade_public_key: String,
    pub trade_address: Address,
    pub role: TradeRole,
    pub foreign_blockchain: ForeignChain,
    pub program_address: Address,
    pub state: String,
    pub foreign_amount: u64,
    pub created_at: i64,
}

impl TradeBotView {
    fn from_data(data: &TradeBotData) -> Option<Self> {
        Some(Self {
            trade_public_key: hex::encode(data.trade_public_key().ok()?.as_bytes()),
            trade_address: data.trade_address().ok()?,
            role: data.role,
            foreign_blockchain: data.foreign_blockchain,
            program_address: data.program_address,
            state: data.reported_state().to_owned(),
            foreign_amount: data.foreign_amount,
            created_at: data.created_at,
        })
    }
}

/// RPC server
#[derive(Clone)]
pub struct RpcServer {
    pub ctx: Arc<NodeCtx>,
}

impl RpcServer {
    fn parse_chain(ticker: &str) -> Result<ForeignChain, RpcErr> {
        ForeignChain::from_ticker(ticker).ok_or(RpcErr::UnknownForeignChain)
    }

    /// Latest registered variant for a chain.
    fn variant_for(&self, chain: ForeignChain) -> Result<Acct, RpcErr> {
        self.ctx
            .registry
            .iter()
            .map(|(_, acct)| *acct)
            .filter(|acct| acct.foreign_chain() == chain)
            .max_by_key(Acct::version)
            .ok_or(RpcErr::UnknownForeignChain)
    }

    fn parse_address(address: &str) -> Result<Address, RpcErr> {
        Address::from_bech32(address).map_err(|_| RpcErr::InvalidAddress)
    }

    fn parse_hash160(hexstr: &str) -> Result<Hash160, RpcErr> {
        let bytes = hex::decode(hexstr).map_err(|_| RpcErr::InvalidParameters)?;
        if bytes.len() != 20 {
            return Err(RpcErr::InvalidParameters);
        }
        Hash160::from_slice(&bytes).map_err(|_| RpcErr::InvalidParameters)
    }

    fn do_build_trade(&self, request: &BuildTradeRequest) -> Result<String, RpcErr> {
        let chain = Self::parse_chain(&request.foreign_blockchain)?;
        let acct = self.variant_for(chain)?;

        let params = TradeParameters {
            creator_trade_address: Self::parse_address(&request.creator_trade_address)?,
            creator_foreign_pkh: hex::decode(&request.creator_foreign_pkh)
                .map_err(|_| RpcErr::InvalidParameters)?,
            redeem_amount: request.redeem_amount,
            expected_foreign_amount: request.expected_foreign_amount,
            trade_timeout_minutes: request.trade_timeout_minutes,
        };

        let program = acct
            .builder()
            .build(&params)
            .map_err(|_| RpcErr::InvalidParameters)?;

        let response = serde_json::json!({
            "program": hex::encode(program.to_bytes()),
            "code_hash": hex::encode(program.code_hash().as_bytes()),
            "foreign_blockchain": chain.ticker(),
            "acct_version": acct.version(),
        });
        Ok(response.to_string())
    }

    fn do_build_trade_message(
        &self,
        request: &BuildTradeMessageRequest,
    ) -> Result<String, RpcErr> {
        let chain = Self::parse_chain(&request.foreign_blockchain)?;
        let acct = self.variant_for(chain)?;

        let foreign_public_key = hex::decode(&request.partner_foreign_public_key)
            .map_err(|_| RpcErr::InvalidPublicKey)?;
        if foreign_public_key.len() != acct.foreign_public_key_len() {
            return Err(RpcErr::InvalidPublicKey);
        }

        if request.refund_timeout_minutes == 0 {
            return Err(RpcErr::InvalidParameters);
        }

        let message = TradeMessage {
            partner_trade_address: Self::parse_address(&request.partner_trade_address)?,
            partner_foreign_public_key: foreign_public_key,
            refund_timeout_minutes: request.refund_timeout_minutes,
            hash_of_secret: Self::parse_hash160(&request.hash_of_secret)?,
            lock_time_a: request.lock_time_a,
        };

        Ok(hex::encode(message.encode()))
    }

    fn do_build_redeem_message(
        &self,
        request: &BuildRedeemMessageRequest,
    ) -> Result<String, RpcErr> {
        let secret_bytes = hex::decode(&request.secret).map_err(|_| RpcErr::InvalidParameters)?;
        let secret =
            SwapSecret::from_slice(&secret_bytes).map_err(|_| RpcErr::InvalidParameters)?;

        let message = RedeemMessage {
            secret,
            payout_address: Self::parse_address(&request.payout_address)?,
        };

        Ok(hex::encode(message.encode()))
    }

    fn do_get_trade(&self, program_address: &str) -> Result<String, RpcErr> {
        let address = Self::parse_address(program_address)?;

        let program = self
            .ctx
            .ledger
            .program(&address)
            .map_err(|_| RpcErr::StoreFailure)?
            .ok_or(RpcErr::UnknownTrade)?;

        // Exact code hash match is the only sanctioned recognition.
        let acct = self
            .ctx
            .registry
            .lookup(&program.code_hash())
            .ok_or(RpcErr::UnknownTrade)?;

        let data = acct
            .trade_data(address, &program.data)
            .map_err(|_| RpcErr::UnknownTrade)?;

        serde_json::to_string(&data).map_err(|_| RpcErr::StoreFailure)
    }

    fn do_list_trades(&self, foreign_blockchain: &str) -> Result<String, RpcErr> {
        let chain = Self::parse_chain(foreign_blockchain)?;

        let entries = self
            .ctx
            .store
            .list()
            .map_err(|_| RpcErr::StoreFailure)?;

        let mut out = vec![];
        for entry in entries {
            if entry.foreign_blockchain != chain {
                continue;
            }

            let Ok(Some(program)) = self.ctx.ledger.program(&entry.program_address) else {
                continue;
            };
            let Some(acct) = self.ctx.registry.lookup(&program.code_hash()) else {
                continue;
            };
            if let Ok(data) = acct.trade_data(entry.program_address, &program.data) {
                out.push(data);
            }
        }

        serde_json::to_string(&out).map_err(|_| RpcErr::StoreFailure)
    }

    fn do_create_trade_bot(&self, request: &CreateTradeBotRequest) -> Result<String, RpcErr> {
        let chain = Self::parse_chain(&request.foreign_blockchain)?;
        let adapter = self
            .ctx
            .adapters
            .get(&chain)
            .ok_or(RpcErr::UnknownForeignChain)?;

        if !adapter.is_valid_wallet_key(&request.foreign_key) {
            return Err(RpcErr::InvalidParameters);
        }

        if !adapter.is_valid_address(&request.foreign_receiving_address) {
            return Err(RpcErr::InvalidAddress);
        }

        if request.foreign_amount < adapter.minimum_order_amount() {
            return Err(RpcErr::InvalidParameters);
        }

        let data = TradeBotData {
            trade_private_key: rand::random(),
            role: TradeRole::Creator,
            foreign_blockchain: chain,
            acct_version: self.variant_for(chain)?.version(),
            program_address: Self::parse_address(&request.program_address)?,
            state: TradeBotState::Created,
            failure: None,
            receiving_address: Self::parse_address(&request.receiving_address)?,
            foreign_receiving_address: Some(request.foreign_receiving_address.clone()),
            foreign_key: Some(request.foreign_key.clone()),
            secret: None,
            hash_of_secret: None,
            foreign_public_key: None,
            foreign_amount: request.foreign_amount,
            lock_time_a: None,
            last_tx_signature: None,
            created_at: Utc::now().timestamp(),
        };

        let key = self
            .ctx
            .trade_bot
            .create_entry(data.clone())
            .map_err(|_| RpcErr::StoreFailure)?;

        let response = serde_json::json!({
            "trade_public_key": hex::encode(key.as_bytes()),
            "trade_address": data.trade_address().map_err(|_| RpcErr::StoreFailure)?,
        });
        Ok(response.to_string())
    }

    fn do_respond_trade_bot(&self, request: &RespondTradeBotRequest) -> Result<String, RpcErr> {
        let chain = Self::parse_chain(&request.foreign_blockchain)?;
        let acct = self.variant_for(chain)?;
        let adapter = self
            .ctx
            .adapters
            .get(&chain)
            .ok_or(RpcErr::UnknownForeignChain)?;

        if !adapter.is_valid_wallet_key(&request.foreign_key) {
            return Err(RpcErr::InvalidParameters);
        }

        let foreign_public_key = hex::decode(&request.foreign_public_key)
            .map_err(|_| RpcErr::InvalidPublicKey)?;
        if foreign_public_key.len() != acct.foreign_public_key_len() {
            return Err(RpcErr::InvalidPublicKey);
        }

        if request.foreign_amount < adapter.minimum_order_amount() {
            return Err(RpcErr::InvalidParameters);
        }

        // The responder's secret is generated here and only ever leaves the
        // node inside a redeem message.
        let secret = SwapSecret::generate();

        let data = TradeBotData {
            trade_private_key: rand::random(),
            role: TradeRole::Responder,
            foreign_blockchain: chain,
            acct_version: acct.version(),
            program_address: Self::parse_address(&request.program_address)?,
            state: TradeBotState::Created,
            failure: None,
            receiving_address: Self::parse_address(&request.receiving_address)?,
            foreign_receiving_address: None,
            foreign_key: Some(request.foreign_key.clone()),
            secret: Some(secret),
            hash_of_secret: Some(secret.hash_of_secret()),
            foreign_public_key: Some(foreign_public_key),
            foreign_amount: request.foreign_amount,
            lock_time_a: Some(request.lock_time_a),
            last_tx_signature: None,
            created_at: Utc::now().timestamp(),
        };

        let key = self
            .ctx
            .trade_bot
            .create_entry(data.clone())
            .map_err(|_| RpcErr::StoreFailure)?;

        let response = serde_json::json!({
            "trade_public_key": hex::encode(key.as_bytes()),
            "trade_address": data.trade_address().map_err(|_| RpcErr::StoreFailure)?,
            "hash_of_secret": hex::encode(secret.hash_of_secret().as_bytes()),
        });
        Ok(response.to_string())
    }

    fn do_delete_trade_bot(&self, trade_public_key: &str) -> Result<bool, RpcErr> {
        let bytes = hex::decode(trade_public_key).map_err(|_| RpcErr::InvalidPublicKey)?;
        let key = PublicKey::from_bytes(&bytes).map_err(|_| RpcErr::InvalidPublicKey)?;

        match self.ctx.trade_bot.delete_entry(&key) {
            Ok(()) => Ok(true),
            Err(TradeBotErr::UnknownEntry) => Err(RpcErr::UnknownTrade),
            Err(TradeBotErr::TradeStillInFlight) => Err(RpcErr::TradeStillInFlight),
            Err(_) => Err(RpcErr::StoreFailure),
        }
    }

    fn do_list_trade_bot_entries(&self) -> Result<String, RpcErr> {
        let entries = self
            .ctx
            .store
            .list()
            .map_err(|_| RpcErr::StoreFailure)?;

        let views: Vec<_> = entries
            .iter()
            .filter_map(TradeBotView::from_data)
            .collect();

        serde_json::to_string(&views).map_err(|_| RpcErr::StoreFailure)
    }
}

impl RpcServerDefinition for RpcServer {
    type GetNodeInfoFut = Ready<String>;
    type UptimeFut = Ready<u64>;
    type StopFut = Ready<String>;
    type ValidateAddressFut = Ready<bool>;
    type BuildTradeFut = Ready<Result<String, RpcErr>>;
    type BuildTradeMessageFut = Ready<Result<String, RpcErr>>;
    type BuildRedeemMessageFut = Ready<Result<String, RpcErr>>;
    type BuildCancelMessageFut = Ready<Result<String, RpcErr>>;
    type GetTradeFut = Ready<Result<String, RpcErr>>;
    type ListTradesFut = Ready<Result<String, RpcErr>>;
    type CreateTradeBotFut = Ready<Result<String, RpcErr>>;
    type RespondTradeBotFut = Ready<Result<String, RpcErr>>;
    type DeleteTradeBotFut = Ready<Result<bool, RpcErr>>;
    type ListTradeBotEntriesFut = Ready<Result<String, RpcErr>>;

    fn get_node_info(self, _: context::Context) -> Self::GetNodeInfoFut {
        let info = serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "network": SETTINGS.node.network_name,
            "acct_variants": self.ctx.registry.iter().count(),
        });
        future::ready(info.to_string())
    }

    fn uptime(self, _: context::Context) -> Self::UptimeFut {
        let started = STARTUP_TIME.load(Ordering::Relaxed);
        future::ready((Utc::now().timestamp() - started).max(0) as u64)
    }

    fn stop(self, _: context::Context) -> Self::StopFut {
        EXIT_SIGNAL.store(true, Ordering::Relaxed);
        future::ready("Aquila shutting down".to_string())
    }

    fn validate_address(self, _: context::Context, address: String) -> Self::ValidateAddressFut {
        future::ready(Address::from_bech32(&address).is_ok())
    }

    fn build_trade(self, _: context::Context, request: BuildTradeRequest) -> Self::BuildTradeFut {
        future::ready(self.do_build_trade(&request))
    }

    fn build_trade_message(
        self,
        _: context::Context,
        request: BuildTradeMessageRequest,
    ) -> Self::BuildTradeMessageFut {
        future::ready(self.do_build_trade_message(&request))
    }

    fn build_redeem_message(
        self,
        _: context::Context,
        request: BuildRedeemMessageRequest,
    ) -> Self::BuildRedeemMessageFut {
        future::ready(self.do_build_redeem_message(&request))
    }

    fn build_cancel_message(
        self,
        _: context::Context,
        creator_address: String,
    ) -> Self::BuildCancelMessageFut {
        future::ready(
            Self::parse_address(&creator_address)
                .map(|creator_address| hex::encode(CancelMessage { creator_address }.encode())),
        )
    }

    fn get_trade(self, _: context::Context, program_address: String) -> Self::GetTradeFut {
        future::ready(self.do_get_trade(&program_address))
    }

    fn list_trades(self, _: context::Context, foreign_blockchain: String) -> Self::ListTradesFut {
        future::ready(self.do_list_trades(&foreign_blockchain))
    }

    fn create_trade_bot(
        self,
        _: context::Context,
        request: CreateTradeBotRequest,
    ) -> Self::CreateTradeBotFut {
        future::ready(self.do_create_trade_bot(&request))
    }

    fn respond_trade_bot(
        self,
        _: context::Context,
        request: RespondTradeBotRequest,
    ) -> Self::RespondTradeBotFut {
        future::ready(self.do_respond_trade_bot(&request))
    }

    fn delete_trade_bot(
        self,
        _: context::Context,
        trade_public_key: String,
    ) -> Self::DeleteTradeBotFut {
        future::ready(self.do_delete_trade_bot(&trade_public_key))
    }

    fn list_trade_bot_entries(self, _: context::Context) -> Self::ListTradeBotEntriesFut {
        future::ready(self.do_list_trade_bot_entries())
    }
}

pub async fn dispatch_rpc_request(
    request: tarpc::Request<RpcServerDefinitionRequest>,
    client: RpcServerDefinitionClient,
) -> Result<RpcServerDefinitionResponse, String> {
    client
        .0
        .call(
            tarpc::context::current(),
            &request.id.to_string(),
            request.message,
        )
        .await
        .map_err(|err| serde_json::to_string(&err).unwrap())
}

pub fn json_body() -> impl Filter<
    Extract = (tarpc::Request<RpcServerDefinitionRequest>,),
    Error = warp::Rejection,
> + Clone {
    warp::body::content_length_limit(1024 * 64).and(warp::body::json())
}

fn expected_authorization() -> String {
    format!(
        "Basic {}",
        base64::encode(format!(
            "{}:{}",
            SETTINGS.network.rpc_username, SETTINGS.network.rpc_password
        ))
    )
}

pub async fn handle_rpc_request(
    request: tarpc::Request<RpcServerDefinitionRequest>,
    client: RpcServerDefinitionClient,
    authorization: String,
) -> Result<impl warp::Reply, warp::Rejection> {
    use warp::http::StatusCode;

    if authorization != expected_authorization() {
        return Ok(warp::reply::with_status(
            warp::reply::json(&"unauthorized"),
            StatusCode::UNAUTHORIZED,
        ));
    }

    match dispatch_rpc_request(request, client).await {
        Ok(response) => Ok(warp::reply::with_status(
            warp::reply::json(&response),
            StatusCode::OK,
        )),
        Err(err) => Ok(warp::reply::with_status(
            warp::reply::json(&err),
            StatusCode::INTERNAL_SERVER_ERROR,
        )),
    }
}
