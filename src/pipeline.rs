//! Role pipelines expressed as data
//!
//! Every (role, trigger) pair the protocol reacts to maps to one static
//! [`Pipeline`]. The generic protocol looks pipelines up here instead of each
//! role carrying its own dispatch code.

use super::resume::RecoveryAction;
use super::task::TaskKind::{self, *};
use super::trade::{Role, TradeState};

/// What caused a pipeline to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Trigger {
    // incoming messages
    TakeOfferRequest,
    PublishDepositTxRequest,
    DepositTxPublished,
    FiatTransferStarted,
    PayoutTxPublished,
    // local user intents
    TakeOffer,
    FiatPaymentStarted,
    FiatPaymentReceived,
    OpenDispute,
    // wallet watchers
    DepositTxSeen,
    PayoutTxSeen,
    // restart recovery
    Recovery(RecoveryAction),
}

impl Trigger {
    /// Intents come from the local user, who gets an error back instead of a
    /// log line when the role cannot act on them.
    pub fn is_user_intent(&self) -> bool {
        matches!(
            self,
            Trigger::TakeOffer
                | Trigger::FiatPaymentStarted
                | Trigger::FiatPaymentReceived
                | Trigger::OpenDispute
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutAction {
    None,
    /// Start the timer before the first task runs.
    Start,
    /// Cancel the timer before the first task runs.
    Stop,
}

/// What a successful run means for the trade as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// More pipelines follow.
    Pending,
    /// Nothing is left to run locally, but a wallet watcher may still report.
    Watching,
    /// The trade is finished.
    Finished,
}

#[derive(Debug)]
pub struct Pipeline {
    pub name: &'static str,
    pub tasks: &'static [TaskKind],
    pub timeout: TimeoutAction,
    /// Set on the trade before any task runs, so an interrupted run can be
    /// recognised after a restart.
    pub marker: Option<TradeState>,
    /// Lowest state the trade must have reached for the pipeline to run.
    pub requires: Option<TradeState>,
    /// Once the trade is at or past this state the pipeline is a duplicate.
    pub skip_from: Option<TradeState>,
    pub completion: Completion,
}

/// Which roles a table entry applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Offerer,
    Taker,
    Buyer,
    Seller,
    Any,
}

impl Side {
    fn matches(self, role: Role) -> bool {
        match self {
            Side::Offerer => role.is_offerer(),
            Side::Taker => !role.is_offerer(),
            Side::Buyer => role.is_buyer(),
            Side::Seller => !role.is_buyer(),
            Side::Any => true,
        }
    }
}

const fn pipeline(name: &'static str, tasks: &'static [TaskKind]) -> Pipeline {
    Pipeline {
        name,
        tasks,
        timeout: TimeoutAction::None,
        marker: None,
        requires: None,
        skip_from: None,
        completion: Completion::Pending,
    }
}

static OFFERER_TAKE_OFFER_REQUEST: Pipeline = Pipeline {
    timeout: TimeoutAction::Start,
    skip_from: Some(TradeState::OffererSentPublishDepositTxRequest),
    ..pipeline(
        "handle_take_offer_request",
        &[
            ProcessPayDepositRequest,
            VerifyArbitrationSelection,
            VerifyPeerFeePayment,
            VerifyPeerAccount,
            LoadOfferFeeTx,
            CreateAndSignContract,
            OffererCreatesAndSignsDepositTx,
            SetupDepositTxListener,
            SendPublishDepositTxRequest,
        ],
    )
};

static OFFERER_DEPOSIT_TX_PUBLISHED: Pipeline = Pipeline {
    timeout: TimeoutAction::Stop,
    skip_from: Some(TradeState::OffererReceivedDepositTxPublishedMsg),
    ..pipeline(
        "handle_deposit_tx_published",
        &[
            ProcessDepositTxPublishedMessage,
            VerifyPeerFeePayment,
            VerifyPeerAccount,
            PublishTradeStatistics,
        ],
    )
};

static OFFERER_DEPOSIT_TX_SEEN: Pipeline = Pipeline {
    timeout: TimeoutAction::Stop,
    skip_from: Some(TradeState::DepositSeenInNetwork),
    ..pipeline("handle_deposit_tx_seen", &[ProcessDepositTxSeen])
};

static TAKER_TAKE_OFFER: Pipeline = Pipeline {
    timeout: TimeoutAction::Start,
    skip_from: Some(TradeState::TakeOfferRequested),
    ..pipeline(
        "take_available_offer",
        &[
            SelectArbitrator,
            VerifyOfferFeePayment,
            CreateTakeOfferFeeTx,
            ReserveDepositInputs,
            SendPayDepositRequest,
        ],
    )
};

static TAKER_PUBLISH_DEPOSIT_TX_REQUEST: Pipeline = Pipeline {
    timeout: TimeoutAction::Stop,
    skip_from: Some(TradeState::TakerPublishedDepositTx),
    ..pipeline(
        "handle_publish_deposit_tx_request",
        &[
            ProcessPublishDepositTxRequest,
            VerifyPeerAccount,
            VerifyAndSignContract,
            SignAndPublishDepositTx,
            SendDepositTxPublishedMessage,
        ],
    )
};

static TAKER_RESEND_DEPOSIT_TX_PUBLISHED: Pipeline = pipeline(
    "resend_deposit_tx_published",
    &[SendDepositTxPublishedMessage],
);

static BUYER_FIAT_PAYMENT_STARTED: Pipeline = Pipeline {
    marker: Some(TradeState::BuyerConfirmedFiatPaymentInitiated),
    requires: Some(TradeState::TakerPublishedDepositTx),
    skip_from: Some(TradeState::BuyerSentFiatPaymentInitiatedMsg),
    ..pipeline(
        "on_fiat_payment_started",
        &[
            VerifyPeerFeePayment,
            VerifyPeerAccount,
            BuyerSignPayoutTx,
            SendFiatTransferStartedMessage,
            SetupListenerForPayoutTx,
        ],
    )
};

static BUYER_PAYOUT_TX_PUBLISHED: Pipeline = Pipeline {
    skip_from: Some(TradeState::PayoutBroadcasted),
    completion: Completion::Finished,
    ..pipeline(
        "handle_payout_tx_published",
        &[
            BuyerProcessPayoutTxPublishedMessage,
            BuyerMightBroadcastPayoutTx,
        ],
    )
};

static BUYER_PAYOUT_TX_SEEN: Pipeline = Pipeline {
    skip_from: Some(TradeState::PayoutBroadcasted),
    completion: Completion::Finished,
    ..pipeline("handle_payout_tx_seen", &[BuyerProcessPayoutTxSeen])
};

static BUYER_BROADCAST_PAYOUT_TX: Pipeline = Pipeline {
    completion: Completion::Finished,
    ..pipeline("might_broadcast_payout_tx", &[BuyerMightBroadcastPayoutTx])
};

static BUYER_WATCH_PAYOUT_TX: Pipeline = Pipeline {
    completion: Completion::Watching,
    ..pipeline("setup_listener_for_payout_tx", &[SetupListenerForPayoutTx])
};

// the offerer may get this from a mailbox before the deposit message
static SELLER_FIAT_TRANSFER_STARTED: Pipeline = Pipeline {
    requires: Some(TradeState::TakerPublishedDepositTx),
    skip_from: Some(TradeState::SellerReceivedFiatPaymentInitiatedMsg),
    ..pipeline(
        "handle_fiat_transfer_started",
        &[SellerProcessFiatTransferStartedMessage],
    )
};

static SELLER_FIAT_PAYMENT_RECEIVED: Pipeline = Pipeline {
    marker: Some(TradeState::SellerConfirmedFiatPaymentReceipt),
    requires: Some(TradeState::SellerReceivedFiatPaymentInitiatedMsg),
    skip_from: Some(TradeState::SellerPublishedPayoutTx),
    completion: Completion::Finished,
    ..pipeline(
        "on_fiat_payment_received",
        &[
            VerifyPeerFeePayment,
            VerifyPeerAccount,
            SellerSignAndFinalizePayoutTx,
            SellerBroadcastPayoutTx,
            SendPayoutTxPublishedMessage,
        ],
    )
};

static SELLER_RESEND_PAYOUT_TX_PUBLISHED: Pipeline = Pipeline {
    completion: Completion::Finished,
    ..pipeline(
        "resend_payout_tx_published",
        &[SendPayoutTxPublishedMessage],
    )
};

static OPEN_DISPUTE: Pipeline = Pipeline {
    completion: Completion::Finished,
    ..pipeline("open_dispute", &[OpenDispute])
};

static PIPELINES: &[(Side, Trigger, &Pipeline)] = &[
    (Side::Offerer, Trigger::TakeOfferRequest, &OFFERER_TAKE_OFFER_REQUEST),
    (Side::Offerer, Trigger::DepositTxPublished, &OFFERER_DEPOSIT_TX_PUBLISHED),
    (Side::Offerer, Trigger::DepositTxSeen, &OFFERER_DEPOSIT_TX_SEEN),
    (Side::Taker, Trigger::TakeOffer, &TAKER_TAKE_OFFER),
    (Side::Taker, Trigger::PublishDepositTxRequest, &TAKER_PUBLISH_DEPOSIT_TX_REQUEST),
    (
        Side::Taker,
        Trigger::Recovery(RecoveryAction::ResendDepositTxPublished),
        &TAKER_RESEND_DEPOSIT_TX_PUBLISHED,
    ),
    (Side::Buyer, Trigger::FiatPaymentStarted, &BUYER_FIAT_PAYMENT_STARTED),
    (Side::Buyer, Trigger::PayoutTxPublished, &BUYER_PAYOUT_TX_PUBLISHED),
    (Side::Buyer, Trigger::PayoutTxSeen, &BUYER_PAYOUT_TX_SEEN),
    (
        Side::Buyer,
        Trigger::Recovery(RecoveryAction::BroadcastPayoutTx),
        &BUYER_BROADCAST_PAYOUT_TX,
    ),
    (
        Side::Buyer,
        Trigger::Recovery(RecoveryAction::WatchForPayoutTx),
        &BUYER_WATCH_PAYOUT_TX,
    ),
    (Side::Seller, Trigger::FiatTransferStarted, &SELLER_FIAT_TRANSFER_STARTED),
    (Side::Seller, Trigger::FiatPaymentReceived, &SELLER_FIAT_PAYMENT_RECEIVED),
    (
        Side::Seller,
        Trigger::Recovery(RecoveryAction::ResendPayoutTxPublished),
        &SELLER_RESEND_PAYOUT_TX_PUBLISHED,
    ),
    (Side::Any, Trigger::OpenDispute, &OPEN_DISPUTE),
];

/// Looks up the pipeline `role` runs for `trigger`, if it reacts to it at all.
pub fn lookup(role: Role, trigger: Trigger) -> Option<&'static Pipeline> {
    PIPELINES
        .iter()
        .find(|(side, t, _)| *t == trigger && side.matches(role))
        .map(|(_, _, pipeline)| *pipeline)
}
