//! Protocol messages exchanged between the two peers of a trade
use crate::pipeline::Trigger;
use crate::trade::{NodeAddress, PaymentAccount, Transaction, Utxo};

/// Taker -> offerer. Opens the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayDepositRequest {
    pub trade_id: String,
    pub trade_amount: u64,
    pub taker_fee_tx_id: String,
    pub taker_payment_account: PaymentAccount,
    pub taker_pub_key: Vec<u8>,
    pub taker_payout_address: String,
    pub taker_deposit_inputs: Vec<Utxo>,
    pub accepted_arbitrators: Vec<NodeAddress>,
    pub arbitrator: NodeAddress,
}

/// Offerer -> taker. Carries the offerer's half of the contract and deposit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishDepositTxRequest {
    pub trade_id: String,
    pub offerer_payment_account: PaymentAccount,
    pub offerer_pub_key: Vec<u8>,
    pub offerer_payout_address: String,
    pub contract_hash: String,
    pub offerer_contract_signature: Vec<u8>,
    pub prepared_deposit_tx: Transaction,
}

/// Taker -> offerer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepositTxPublishedMessage {
    pub trade_id: String,
    pub deposit_tx: Transaction,
}

/// Buyer -> seller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FiatTransferStartedMessage {
    pub trade_id: String,
    pub buyer_payout_address: String,
    pub buyer_payout_signature: Vec<u8>,
}

/// Seller -> buyer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayoutTxPublishedMessage {
    pub trade_id: String,
    pub payout_tx: Transaction,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TradeMessage {
    PayDepositRequest(PayDepositRequest),
    PublishDepositTxRequest(PublishDepositTxRequest),
    DepositTxPublished(DepositTxPublishedMessage),
    FiatTransferStarted(FiatTransferStartedMessage),
    PayoutTxPublished(PayoutTxPublishedMessage),
}

impl TradeMessage {
    pub fn trade_id(&self) -> &str {
        match self {
            TradeMessage::PayDepositRequest(m) => &m.trade_id,
            TradeMessage::PublishDepositTxRequest(m) => &m.trade_id,
            TradeMessage::DepositTxPublished(m) => &m.trade_id,
            TradeMessage::FiatTransferStarted(m) => &m.trade_id,
            TradeMessage::PayoutTxPublished(m) => &m.trade_id,
        }
    }
    /// Messages that may be stored for a peer that is offline when they are sent.
    /// The handshake messages need both peers online.
    pub fn is_mailbox_message(&self) -> bool {
        matches!(
            self,
            TradeMessage::DepositTxPublished(_)
                | TradeMessage::FiatTransferStarted(_)
                | TradeMessage::PayoutTxPublished(_)
        )
    }
    pub fn trigger(&self) -> Trigger {
        match self {
            TradeMessage::PayDepositRequest(_) => Trigger::TakeOfferRequest,
            TradeMessage::PublishDepositTxRequest(_) => Trigger::PublishDepositTxRequest,
            TradeMessage::DepositTxPublished(_) => Trigger::DepositTxPublished,
            TradeMessage::FiatTransferStarted(_) => Trigger::FiatTransferStarted,
            TradeMessage::PayoutTxPublished(_) => Trigger::PayoutTxPublished,
        }
    }
    pub fn kind(&self) -> &'static str {
        match self {
            TradeMessage::PayDepositRequest(_) => "PayDepositRequest",
            TradeMessage::PublishDepositTxRequest(_) => "PublishDepositTxRequest",
            TradeMessage::DepositTxPublished(_) => "DepositTxPublishedMessage",
            TradeMessage::FiatTransferStarted(_) => "FiatTransferStartedMessage",
            TradeMessage::PayoutTxPublished(_) => "PayoutTxPublishedMessage",
        }
    }
}

/// A decrypted message as handed over by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Envelope {
    /// Delivered over a live connection.
    Direct {
        message: TradeMessage,
        sender: NodeAddress,
    },
    /// Stored while we were offline and replayed on reconnection.
    Mailbox {
        message: TradeMessage,
        sender: NodeAddress,
    },
}

impl Envelope {
    pub fn message(&self) -> &TradeMessage {
        match self {
            Envelope::Direct { message, .. } | Envelope::Mailbox { message, .. } => message,
        }
    }
}
