//! Steps run by the buyer, offerer or taker alike
use super::shared::payout_request;
use crate::context::TaskContext;
use crate::error::TaskError;
use crate::message::{FiatTransferStartedMessage, TradeMessage};
use crate::task::Task;
use crate::trade::TradeState;
use async_trait::async_trait;
use tracing::info;

pub struct BuyerSignPayoutTx;

#[async_trait]
impl Task for BuyerSignPayoutTx {
    fn name(&self) -> &'static str {
        "BuyerSignPayoutTx"
    }

    async fn run(&self, cx: &mut TaskContext<'_>) -> Result<(), TaskError> {
        let request = payout_request(cx.trade)?;
        let signature = cx.services.wallet.build_and_sign_payout_tx(&request).await?;

        cx.process.payout_signature = Some(signature);
        Ok(())
    }
}

pub struct SendFiatTransferStartedMessage;

#[async_trait]
impl Task for SendFiatTransferStartedMessage {
    fn name(&self) -> &'static str {
        "SendFiatTransferStartedMessage"
    }

    async fn run(&self, cx: &mut TaskContext<'_>) -> Result<(), TaskError> {
        let message = FiatTransferStartedMessage {
            trade_id: cx.trade.id().to_string(),
            buyer_payout_address: cx
                .trade
                .own()
                .payout_address
                .clone()
                .ok_or(TaskError::MissingData("own payout address"))?,
            buyer_payout_signature: cx
                .process
                .payout_signature
                .clone()
                .ok_or(TaskError::MissingData("payout signature"))?,
        };
        let peer = cx.peer_address()?;

        cx.services
            .messenger
            .send_message(&peer, TradeMessage::FiatTransferStarted(message))
            .await?;
        cx.trade
            .set_state(TradeState::BuyerSentFiatPaymentInitiatedMsg)?;
        Ok(())
    }
}

/// Lets the wallet report the payout in case the seller's message is lost.
pub struct SetupListenerForPayoutTx;

#[async_trait]
impl Task for SetupListenerForPayoutTx {
    fn name(&self) -> &'static str {
        "SetupListenerForPayoutTx"
    }

    async fn run(&self, cx: &mut TaskContext<'_>) -> Result<(), TaskError> {
        if cx.trade.payout_tx().is_some() || cx.process.payout_listener_active {
            return Ok(());
        }
        let deposit_tx_id = cx
            .trade
            .deposit_tx()
            .map(|tx| tx.id.clone())
            .ok_or(TaskError::MissingData("deposit transaction"))?;

        cx.services
            .wallet
            .watch_payout_tx(cx.trade.id(), &deposit_tx_id)
            .await?;
        cx.process.payout_listener_active = true;
        Ok(())
    }
}

pub struct BuyerProcessPayoutTxPublishedMessage;

#[async_trait]
impl Task for BuyerProcessPayoutTxPublishedMessage {
    fn name(&self) -> &'static str {
        "BuyerProcessPayoutTxPublishedMessage"
    }

    async fn run(&self, cx: &mut TaskContext<'_>) -> Result<(), TaskError> {
        let payout_tx = match cx.message()? {
            TradeMessage::PayoutTxPublished(message) => message.payout_tx.clone(),
            _ => {
                return Err(TaskError::UnexpectedMessage {
                    expected: "PayoutTxPublishedMessage",
                });
            }
        };
        if payout_tx.raw.is_empty() {
            return Err(TaskError::Verification("payout transaction is empty".into()));
        }

        cx.trade.set_payout_tx(payout_tx)?;
        cx.trade
            .set_state(TradeState::BuyerReceivedPayoutTxPublishedMsg)?;
        Ok(())
    }
}

/// Broadcasts the payout unless the network already has it.
pub struct BuyerMightBroadcastPayoutTx;

#[async_trait]
impl Task for BuyerMightBroadcastPayoutTx {
    fn name(&self) -> &'static str {
        "BuyerMightBroadcastPayoutTx"
    }

    async fn run(&self, cx: &mut TaskContext<'_>) -> Result<(), TaskError> {
        let payout_tx = cx
            .trade
            .payout_tx()
            .cloned()
            .ok_or(TaskError::MissingData("payout transaction"))?;

        if cx.services.wallet.is_in_network(&payout_tx.id).await? {
            info!(trade_id = %cx.trade.id(), tx_id = %payout_tx.id, "payout already in network");
        } else {
            cx.services.wallet.broadcast_transaction(&payout_tx).await?;
            info!(trade_id = %cx.trade.id(), tx_id = %payout_tx.id, "payout broadcast");
        }
        cx.trade.set_state(TradeState::PayoutBroadcasted)?;
        cx.process.payout_listener_active = false;
        Ok(())
    }
}

pub struct BuyerProcessPayoutTxSeen;

#[async_trait]
impl Task for BuyerProcessPayoutTxSeen {
    fn name(&self) -> &'static str {
        "BuyerProcessPayoutTxSeen"
    }

    async fn run(&self, cx: &mut TaskContext<'_>) -> Result<(), TaskError> {
        let payout_tx = cx
            .process
            .observed_tx
            .clone()
            .ok_or(TaskError::MissingData("observed payout transaction"))?;

        cx.trade.set_payout_tx(payout_tx)?;
        cx.trade.set_state(TradeState::PayoutBroadcasted)?;
        cx.process.payout_listener_active = false;
        Ok(())
    }
}
