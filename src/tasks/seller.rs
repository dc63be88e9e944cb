//! Steps run by the seller, offerer or taker alike
use super::shared::payout_request;
use crate::context::TaskContext;
use crate::error::TaskError;
use crate::message::{PayoutTxPublishedMessage, TradeMessage};
use crate::task::Task;
use crate::trade::TradeState;
use async_trait::async_trait;

pub struct SellerProcessFiatTransferStartedMessage;

#[async_trait]
impl Task for SellerProcessFiatTransferStartedMessage {
    fn name(&self) -> &'static str {
        "SellerProcessFiatTransferStartedMessage"
    }

    async fn run(&self, cx: &mut TaskContext<'_>) -> Result<(), TaskError> {
        let message = match cx.message()? {
            TradeMessage::FiatTransferStarted(message) => message.clone(),
            _ => {
                return Err(TaskError::UnexpectedMessage {
                    expected: "FiatTransferStartedMessage",
                });
            }
        };
        if message.buyer_payout_signature.is_empty() {
            return Err(TaskError::Verification("buyer payout signature is empty".into()));
        }
        // the buyer signed a payout spending a deposit we have not seen yet
        if cx.trade.deposit_tx().is_none() {
            return Err(TaskError::MissingData("deposit transaction"));
        }

        // the payout is only finalised once the seller confirms receipt, possibly
        // after a restart, so the buyer's signature goes onto the trade
        let peer = cx.trade.peer_mut();
        peer.payout_address = Some(message.buyer_payout_address);
        peer.payout_signature = Some(message.buyer_payout_signature);

        cx.trade
            .set_state(TradeState::SellerReceivedFiatPaymentInitiatedMsg)?;
        Ok(())
    }
}

pub struct SellerSignAndFinalizePayoutTx;

#[async_trait]
impl Task for SellerSignAndFinalizePayoutTx {
    fn name(&self) -> &'static str {
        "SellerSignAndFinalizePayoutTx"
    }

    async fn run(&self, cx: &mut TaskContext<'_>) -> Result<(), TaskError> {
        if cx.trade.payout_tx().is_some() {
            return Ok(());
        }
        let peer_signature = cx
            .trade
            .peer()
            .payout_signature
            .clone()
            .ok_or(TaskError::MissingData("buyer payout signature"))?;
        let request = payout_request(cx.trade)?;

        let payout_tx = cx
            .services
            .wallet
            .finalize_payout_tx(&request, &peer_signature)
            .await?;
        cx.trade.set_payout_tx(payout_tx)?;
        Ok(())
    }
}

pub struct SellerBroadcastPayoutTx;

#[async_trait]
impl Task for SellerBroadcastPayoutTx {
    fn name(&self) -> &'static str {
        "SellerBroadcastPayoutTx"
    }

    async fn run(&self, cx: &mut TaskContext<'_>) -> Result<(), TaskError> {
        let payout_tx = cx
            .trade
            .payout_tx()
            .cloned()
            .ok_or(TaskError::MissingData("payout transaction"))?;

        if !cx.services.wallet.is_in_network(&payout_tx.id).await? {
            cx.services.wallet.broadcast_transaction(&payout_tx).await?;
        }
        cx.trade.set_state(TradeState::SellerPublishedPayoutTx)?;
        Ok(())
    }
}

pub struct SendPayoutTxPublishedMessage;

#[async_trait]
impl Task for SendPayoutTxPublishedMessage {
    fn name(&self) -> &'static str {
        "SendPayoutTxPublishedMessage"
    }

    async fn run(&self, cx: &mut TaskContext<'_>) -> Result<(), TaskError> {
        let message = PayoutTxPublishedMessage {
            trade_id: cx.trade.id().to_string(),
            payout_tx: cx
                .trade
                .payout_tx()
                .cloned()
                .ok_or(TaskError::MissingData("payout transaction"))?,
        };
        let peer = cx.peer_address()?;

        cx.services
            .messenger
            .send_message(&peer, TradeMessage::PayoutTxPublished(message))
            .await?;
        cx.trade
            .set_state(TradeState::SellerSentPayoutTxPublishedMsg)?;
        Ok(())
    }
}
