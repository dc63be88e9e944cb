//! Collaborators the protocol engine consumes but never implements
//!
//! Transport, wallet, persistence and telemetry live outside the engine. Each is
//! an object-safe trait so the surrounding application (or a test) can plug in
//! its own implementation.

use crate::message::TradeMessage;
use crate::trade::{
    Currency, NodeAddress, PaymentAccount, TimeStamp, Trade, Transaction, Utxo,
};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;

#[async_trait]
pub trait Messenger: Send + Sync {
    /// Encrypts and sends `message` to `peer`, falling back to the peer's mailbox
    /// if it is offline.
    async fn send_message(&self, peer: &NodeAddress, message: TradeMessage) -> anyhow::Result<()>;
}

/// What the offerer asks the wallet to fund and sign.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct DepositTxRequest {
    #[n(0)]
    pub trade_id: String,
    #[n(1)]
    pub contract_hash: String,
    #[n(2)]
    pub offerer_is_buyer: bool,
    #[n(3)]
    pub offerer_amount: u64,
    #[n(4)]
    pub taker_amount: u64,
    #[n(5)]
    pub taker_inputs: Vec<Utxo>,
    /// The offerer's fee payment, spent alongside the deposit inputs.
    #[n(6)]
    pub offer_fee_tx_id: String,
}

/// The payout both peers sign. Built identically on each side.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct PayoutTxRequest {
    #[n(0)]
    pub trade_id: String,
    #[n(1)]
    pub deposit_tx_id: String,
    #[n(2)]
    pub buyer_payout_address: String,
    #[n(3)]
    pub buyer_amount: u64,
    #[n(4)]
    pub seller_payout_address: String,
    #[n(5)]
    pub seller_amount: u64,
}

#[async_trait]
pub trait TradeWallet: Send + Sync {
    async fn get_transaction(&self, tx_id: &str) -> anyhow::Result<Option<Transaction>>;

    async fn verify_fee_payment(&self, fee_tx_id: &str) -> anyhow::Result<bool>;

    async fn verify_counterparty_account(&self, account: &PaymentAccount) -> anyhow::Result<bool>;

    /// Creates and publishes the taker's trade fee.
    async fn create_take_offer_fee_tx(&self, trade_id: &str) -> anyhow::Result<Transaction>;

    async fn reserve_deposit_inputs(&self, trade_id: &str, amount: u64) -> anyhow::Result<Vec<Utxo>>;

    async fn build_and_sign_deposit_tx(&self, request: &DepositTxRequest) -> anyhow::Result<Transaction>;

    /// Adds the taker's signatures to a prepared deposit and publishes it.
    async fn sign_and_publish_deposit_tx(&self, prepared: &Transaction) -> anyhow::Result<Transaction>;

    async fn build_and_sign_payout_tx(&self, request: &PayoutTxRequest) -> anyhow::Result<Vec<u8>>;

    /// Combines our signature with the peer's into a complete payout.
    async fn finalize_payout_tx(
        &self,
        request: &PayoutTxRequest,
        peer_signature: &[u8],
    ) -> anyhow::Result<Transaction>;

    async fn broadcast_transaction(&self, tx: &Transaction) -> anyhow::Result<()>;

    async fn is_in_network(&self, tx_id: &str) -> anyhow::Result<bool>;

    async fn sign(&self, payload: &[u8]) -> anyhow::Result<Vec<u8>>;

    async fn verify_signature(
        &self,
        pub_key: &[u8],
        payload: &[u8],
        signature: &[u8],
    ) -> anyhow::Result<bool>;

    /// Registers interest in the deposit reaching the network. The wallet
    /// reports it back through `TradeProtocol::on_deposit_tx_seen`.
    async fn watch_deposit_tx(&self, trade_id: &str) -> anyhow::Result<()>;

    /// Registers interest in a payout spending `deposit_tx_id`. Reported back
    /// through `TradeProtocol::on_payout_tx_seen`.
    async fn watch_payout_tx(&self, trade_id: &str, deposit_tx_id: &str) -> anyhow::Result<()>;
}

pub trait TradeStore: Send + Sync {
    fn load(&self, trade_id: &str) -> anyhow::Result<Option<Trade>>;

    fn save(&self, trade: &Trade) -> anyhow::Result<()>;

    fn load_all(&self) -> anyhow::Result<Vec<Trade>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradeStatistics {
    pub trade_id: String,
    pub currency: Currency,
    pub price: u64,
    pub amount: u64,
    pub deposit_tx_id: String,
    pub date: TimeStamp<Utc>,
}

/// Best effort. A failing sink never fails a trade.
#[async_trait]
pub trait StatisticsSink: Send + Sync {
    async fn publish(&self, statistics: TradeStatistics) -> anyhow::Result<()>;
}

#[derive(Clone)]
pub struct Services {
    pub messenger: Arc<dyn Messenger>,
    pub wallet: Arc<dyn TradeWallet>,
    pub store: Arc<dyn TradeStore>,
    pub statistics: Arc<dyn StatisticsSink>,
}

impl Services {
    pub fn new(
        messenger: Arc<dyn Messenger>,
        wallet: Arc<dyn TradeWallet>,
        store: Arc<dyn TradeStore>,
        statistics: Arc<dyn StatisticsSink>,
    ) -> Self {
        Self {
            messenger,
            wallet,
            store,
            statistics,
        }
    }
}
