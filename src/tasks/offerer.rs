//! Steps run by the peer that created the offer
use super::shared::escrow_total;
use crate::context::TaskContext;
use crate::error::TaskError;
use crate::message::{PublishDepositTxRequest, TradeMessage};
use crate::services::DepositTxRequest;
use crate::task::Task;
use crate::trade::TradeState;
use async_trait::async_trait;
use tracing::debug;

pub struct ProcessPayDepositRequest;

#[async_trait]
impl Task for ProcessPayDepositRequest {
    fn name(&self) -> &'static str {
        "ProcessPayDepositRequest"
    }

    async fn run(&self, cx: &mut TaskContext<'_>) -> Result<(), TaskError> {
        let request = match cx.message()? {
            TradeMessage::PayDepositRequest(request) => request.clone(),
            _ => {
                return Err(TaskError::UnexpectedMessage {
                    expected: "PayDepositRequest",
                });
            }
        };
        if request.taker_pub_key.is_empty() {
            return Err(TaskError::Verification("taker public key is empty".into()));
        }
        if request.taker_deposit_inputs.is_empty() {
            return Err(TaskError::Verification("taker sent no deposit inputs".into()));
        }
        let peer_address = cx.peer_address()?;

        cx.trade.set_trade_amount(request.trade_amount)?;
        let peer = cx.trade.peer_mut();
        peer.fee_tx_id = Some(request.taker_fee_tx_id);
        peer.payment_account = Some(request.taker_payment_account);
        peer.pub_key = request.taker_pub_key;
        peer.payout_address = Some(request.taker_payout_address);
        peer.deposit_inputs = request.taker_deposit_inputs;
        cx.trade.set_arbitrator(request.arbitrator);
        cx.trade.set_peer_address(peer_address);

        cx.trade.set_state(TradeState::TakeOfferRequested)?;
        Ok(())
    }
}

/// The arbitrator the taker picked must be one both peers accept.
pub struct VerifyArbitrationSelection;

#[async_trait]
impl Task for VerifyArbitrationSelection {
    fn name(&self) -> &'static str {
        "VerifyArbitrationSelection"
    }

    async fn run(&self, cx: &mut TaskContext<'_>) -> Result<(), TaskError> {
        let accepted_by_taker = match cx.message()? {
            TradeMessage::PayDepositRequest(request) => request.accepted_arbitrators.clone(),
            _ => {
                return Err(TaskError::UnexpectedMessage {
                    expected: "PayDepositRequest",
                });
            }
        };
        let arbitrator = cx
            .trade
            .arbitrator()
            .ok_or(TaskError::MissingData("arbitrator"))?;

        if !cx.trade.offer().arbitrators.contains(arbitrator) {
            return Err(TaskError::Verification(format!(
                "arbitrator {arbitrator} is not accepted by the offer"
            )));
        }
        if !accepted_by_taker.contains(arbitrator) {
            return Err(TaskError::Verification(format!(
                "arbitrator {arbitrator} is not accepted by the taker"
            )));
        }
        Ok(())
    }
}

pub struct LoadOfferFeeTx;

#[async_trait]
impl Task for LoadOfferFeeTx {
    fn name(&self) -> &'static str {
        "LoadOfferFeeTx"
    }

    async fn run(&self, cx: &mut TaskContext<'_>) -> Result<(), TaskError> {
        let fee_tx_id = cx.trade.offer().offer_fee_tx_id.clone();
        let fee_tx = cx
            .services
            .wallet
            .get_transaction(&fee_tx_id)
            .await?
            .ok_or(TaskError::MissingData("offer fee transaction"))?;

        cx.process.offer_fee_tx = Some(fee_tx);
        Ok(())
    }
}

pub struct CreateAndSignContract;

#[async_trait]
impl Task for CreateAndSignContract {
    fn name(&self) -> &'static str {
        "CreateAndSignContract"
    }

    async fn run(&self, cx: &mut TaskContext<'_>) -> Result<(), TaskError> {
        let contract = cx.trade.contract()?;
        let contract_hash = contract.hash()?;
        let signature = cx.services.wallet.sign(contract_hash.as_bytes()).await?;

        debug!(
            trade_id = %cx.trade.id(),
            contract_hash = %contract_hash,
            signature = %hex::encode(&signature),
            "signed contract"
        );
        cx.trade.set_contract_hash(contract_hash);
        cx.trade.own_mut().contract_signature = Some(signature);
        Ok(())
    }
}

/// The buyer escrows their security deposit, the seller the trade amount on top.
pub struct OffererCreatesAndSignsDepositTx;

#[async_trait]
impl Task for OffererCreatesAndSignsDepositTx {
    fn name(&self) -> &'static str {
        "OffererCreatesAndSignsDepositTx"
    }

    async fn run(&self, cx: &mut TaskContext<'_>) -> Result<(), TaskError> {
        let amount = cx
            .trade
            .trade_amount()
            .ok_or(TaskError::MissingData("trade amount"))?;
        let offer_fee_tx_id = cx
            .process
            .offer_fee_tx
            .as_ref()
            .map(|tx| tx.id.clone())
            .ok_or(TaskError::MissingData("offer fee transaction"))?;
        let deposit = cx.trade.offer().security_deposit;
        let offerer_is_buyer = cx.trade.role().is_buyer();
        let funded = escrow_total(amount, deposit)?;
        let (offerer_amount, taker_amount) = if offerer_is_buyer {
            (deposit, funded)
        } else {
            (funded, deposit)
        };

        let request = DepositTxRequest {
            trade_id: cx.trade.id().to_string(),
            contract_hash: cx
                .trade
                .contract_hash()
                .ok_or(TaskError::MissingData("contract hash"))?
                .to_string(),
            offerer_is_buyer,
            offerer_amount,
            taker_amount,
            taker_inputs: cx.trade.peer().deposit_inputs.clone(),
            offer_fee_tx_id,
        };
        let prepared = cx.services.wallet.build_and_sign_deposit_tx(&request).await?;

        cx.process.prepared_deposit_tx = Some(prepared);
        Ok(())
    }
}

/// Lets the wallet tell us about the deposit even if the taker's message never arrives.
pub struct SetupDepositTxListener;

#[async_trait]
impl Task for SetupDepositTxListener {
    fn name(&self) -> &'static str {
        "SetupDepositTxListener"
    }

    async fn run(&self, cx: &mut TaskContext<'_>) -> Result<(), TaskError> {
        if cx.trade.deposit_tx().is_some() || cx.process.deposit_listener_active {
            return Ok(());
        }
        cx.services.wallet.watch_deposit_tx(cx.trade.id()).await?;
        cx.process.deposit_listener_active = true;
        Ok(())
    }
}

pub struct SendPublishDepositTxRequest;

#[async_trait]
impl Task for SendPublishDepositTxRequest {
    fn name(&self) -> &'static str {
        "SendPublishDepositTxRequest"
    }

    async fn run(&self, cx: &mut TaskContext<'_>) -> Result<(), TaskError> {
        let prepared_deposit_tx = cx
            .process
            .prepared_deposit_tx
            .clone()
            .ok_or(TaskError::MissingData("prepared deposit transaction"))?;
        let own = cx.trade.own();
        let message = PublishDepositTxRequest {
            trade_id: cx.trade.id().to_string(),
            offerer_payment_account: own
                .payment_account
                .clone()
                .ok_or(TaskError::MissingData("own payment account"))?,
            offerer_pub_key: own.pub_key.clone(),
            offerer_payout_address: own
                .payout_address
                .clone()
                .ok_or(TaskError::MissingData("own payout address"))?,
            contract_hash: cx
                .trade
                .contract_hash()
                .ok_or(TaskError::MissingData("contract hash"))?
                .to_string(),
            offerer_contract_signature: own
                .contract_signature
                .clone()
                .ok_or(TaskError::MissingData("contract signature"))?,
            prepared_deposit_tx,
        };
        let peer = cx.peer_address()?;

        cx.services
            .messenger
            .send_message(&peer, TradeMessage::PublishDepositTxRequest(message))
            .await?;
        cx.trade
            .set_state(TradeState::OffererSentPublishDepositTxRequest)?;
        Ok(())
    }
}

pub struct ProcessDepositTxPublishedMessage;

#[async_trait]
impl Task for ProcessDepositTxPublishedMessage {
    fn name(&self) -> &'static str {
        "ProcessDepositTxPublishedMessage"
    }

    async fn run(&self, cx: &mut TaskContext<'_>) -> Result<(), TaskError> {
        let deposit_tx = match cx.message()? {
            TradeMessage::DepositTxPublished(message) => message.deposit_tx.clone(),
            _ => {
                return Err(TaskError::UnexpectedMessage {
                    expected: "DepositTxPublishedMessage",
                });
            }
        };
        if deposit_tx.raw.is_empty() {
            return Err(TaskError::Verification("deposit transaction is empty".into()));
        }

        cx.trade.set_deposit_tx(deposit_tx)?;
        cx.trade
            .set_state(TradeState::OffererReceivedDepositTxPublishedMsg)?;
        Ok(())
    }
}

pub struct ProcessDepositTxSeen;

#[async_trait]
impl Task for ProcessDepositTxSeen {
    fn name(&self) -> &'static str {
        "ProcessDepositTxSeen"
    }

    async fn run(&self, cx: &mut TaskContext<'_>) -> Result<(), TaskError> {
        let deposit_tx = cx
            .process
            .observed_tx
            .clone()
            .ok_or(TaskError::MissingData("observed deposit transaction"))?;

        cx.trade.set_deposit_tx(deposit_tx)?;
        cx.trade.set_state(TradeState::DepositSeenInNetwork)?;
        cx.process.deposit_listener_active = false;
        Ok(())
    }
}
