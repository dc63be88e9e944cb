//! The task abstraction and the registry of every protocol step
use super::context::TaskContext;
use super::error::TaskError;
use super::tasks::{buyer, offerer, seller, shared, taker};
use async_trait::async_trait;

/// One atomic protocol step.
///
/// A task must be safe to re-run from the start of its pipeline after a
/// restart: side effects are either idempotent or guarded by the trade state.
/// Tasks never spawn work of their own.
#[async_trait]
pub trait Task: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(&self, cx: &mut TaskContext<'_>) -> Result<(), TaskError>;
}

/// Identifier of a protocol step, used to express pipelines as data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    // shared
    VerifyPeerFeePayment,
    VerifyPeerAccount,
    PublishTradeStatistics,
    OpenDispute,
    // offerer
    ProcessPayDepositRequest,
    VerifyArbitrationSelection,
    LoadOfferFeeTx,
    CreateAndSignContract,
    OffererCreatesAndSignsDepositTx,
    SetupDepositTxListener,
    SendPublishDepositTxRequest,
    ProcessDepositTxPublishedMessage,
    ProcessDepositTxSeen,
    // taker
    SelectArbitrator,
    VerifyOfferFeePayment,
    CreateTakeOfferFeeTx,
    ReserveDepositInputs,
    SendPayDepositRequest,
    ProcessPublishDepositTxRequest,
    VerifyAndSignContract,
    SignAndPublishDepositTx,
    SendDepositTxPublishedMessage,
    // buyer
    BuyerSignPayoutTx,
    SendFiatTransferStartedMessage,
    SetupListenerForPayoutTx,
    BuyerProcessPayoutTxPublishedMessage,
    BuyerMightBroadcastPayoutTx,
    BuyerProcessPayoutTxSeen,
    // seller
    SellerProcessFiatTransferStartedMessage,
    SellerSignAndFinalizePayoutTx,
    SellerBroadcastPayoutTx,
    SendPayoutTxPublishedMessage,
}

impl TaskKind {
    pub fn task(self) -> &'static dyn Task {
        use TaskKind::*;
        match self {
            VerifyPeerFeePayment => &shared::VerifyPeerFeePayment,
            VerifyPeerAccount => &shared::VerifyPeerAccount,
            PublishTradeStatistics => &shared::PublishTradeStatistics,
            OpenDispute => &shared::OpenDispute,
            ProcessPayDepositRequest => &offerer::ProcessPayDepositRequest,
            VerifyArbitrationSelection => &offerer::VerifyArbitrationSelection,
            LoadOfferFeeTx => &offerer::LoadOfferFeeTx,
            CreateAndSignContract => &offerer::CreateAndSignContract,
            OffererCreatesAndSignsDepositTx => &offerer::OffererCreatesAndSignsDepositTx,
            SetupDepositTxListener => &offerer::SetupDepositTxListener,
            SendPublishDepositTxRequest => &offerer::SendPublishDepositTxRequest,
            ProcessDepositTxPublishedMessage => &offerer::ProcessDepositTxPublishedMessage,
            ProcessDepositTxSeen => &offerer::ProcessDepositTxSeen,
            SelectArbitrator => &taker::SelectArbitrator,
            VerifyOfferFeePayment => &taker::VerifyOfferFeePayment,
            CreateTakeOfferFeeTx => &taker::CreateTakeOfferFeeTx,
            ReserveDepositInputs => &taker::ReserveDepositInputs,
            SendPayDepositRequest => &taker::SendPayDepositRequest,
            ProcessPublishDepositTxRequest => &taker::ProcessPublishDepositTxRequest,
            VerifyAndSignContract => &taker::VerifyAndSignContract,
            SignAndPublishDepositTx => &taker::SignAndPublishDepositTx,
            SendDepositTxPublishedMessage => &taker::SendDepositTxPublishedMessage,
            BuyerSignPayoutTx => &buyer::BuyerSignPayoutTx,
            SendFiatTransferStartedMessage => &buyer::SendFiatTransferStartedMessage,
            SetupListenerForPayoutTx => &buyer::SetupListenerForPayoutTx,
            BuyerProcessPayoutTxPublishedMessage => &buyer::BuyerProcessPayoutTxPublishedMessage,
            BuyerMightBroadcastPayoutTx => &buyer::BuyerMightBroadcastPayoutTx,
            BuyerProcessPayoutTxSeen => &buyer::BuyerProcessPayoutTxSeen,
            SellerProcessFiatTransferStartedMessage => {
                &seller::SellerProcessFiatTransferStartedMessage
            }
            SellerSignAndFinalizePayoutTx => &seller::SellerSignAndFinalizePayoutTx,
            SellerBroadcastPayoutTx => &seller::SellerBroadcastPayoutTx,
            SendPayoutTxPublishedMessage => &seller::SendPayoutTxPublishedMessage,
        }
    }
}
