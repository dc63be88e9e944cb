//! Steps run by the peer that takes an existing offer
use super::shared::escrow_total;
use crate::context::TaskContext;
use crate::error::TaskError;
use crate::message::{DepositTxPublishedMessage, PayDepositRequest, TradeMessage};
use crate::task::Task;
use crate::trade::TradeState;
use async_trait::async_trait;
use tracing::debug;

pub struct SelectArbitrator;

#[async_trait]
impl Task for SelectArbitrator {
    fn name(&self) -> &'static str {
        "SelectArbitrator"
    }

    async fn run(&self, cx: &mut TaskContext<'_>) -> Result<(), TaskError> {
        let arbitrator = cx
            .trade
            .offer()
            .arbitrators
            .first()
            .cloned()
            .ok_or(TaskError::MissingData("accepted arbitrator"))?;

        cx.trade.set_arbitrator(arbitrator);
        Ok(())
    }
}

/// The offerer's fee stands in for their fee payment for the rest of the trade.
pub struct VerifyOfferFeePayment;

#[async_trait]
impl Task for VerifyOfferFeePayment {
    fn name(&self) -> &'static str {
        "VerifyOfferFeePayment"
    }

    async fn run(&self, cx: &mut TaskContext<'_>) -> Result<(), TaskError> {
        let fee_tx_id = cx.trade.offer().offer_fee_tx_id.clone();

        if !cx.services.wallet.verify_fee_payment(&fee_tx_id).await? {
            return Err(TaskError::Verification(format!(
                "offer fee transaction {fee_tx_id} is not confirmed"
            )));
        }
        cx.trade.peer_mut().fee_tx_id = Some(fee_tx_id);
        Ok(())
    }
}

pub struct CreateTakeOfferFeeTx;

#[async_trait]
impl Task for CreateTakeOfferFeeTx {
    fn name(&self) -> &'static str {
        "CreateTakeOfferFeeTx"
    }

    async fn run(&self, cx: &mut TaskContext<'_>) -> Result<(), TaskError> {
        // already paid in an earlier attempt
        if cx.trade.own().fee_tx_id.is_some() {
            return Ok(());
        }
        let fee_tx = cx
            .services
            .wallet
            .create_take_offer_fee_tx(cx.trade.id())
            .await?;

        cx.trade.own_mut().fee_tx_id = Some(fee_tx.id);
        cx.trade.set_state(TradeState::TakerPublishedTakerFeeTx)?;
        Ok(())
    }
}

pub struct ReserveDepositInputs;

#[async_trait]
impl Task for ReserveDepositInputs {
    fn name(&self) -> &'static str {
        "ReserveDepositInputs"
    }

    async fn run(&self, cx: &mut TaskContext<'_>) -> Result<(), TaskError> {
        let amount = cx
            .trade
            .trade_amount()
            .ok_or(TaskError::MissingData("trade amount"))?;
        let deposit = cx.trade.offer().security_deposit;
        let required = if cx.trade.role().is_buyer() {
            deposit
        } else {
            escrow_total(amount, deposit)?
        };

        let inputs = cx
            .services
            .wallet
            .reserve_deposit_inputs(cx.trade.id(), required)
            .await?;
        let reserved = inputs
            .iter()
            .try_fold(0u64, |total, utxo| total.checked_add(utxo.value))
            .ok_or_else(|| TaskError::Verification("reserved inputs overflow".into()))?;
        if reserved < required {
            return Err(TaskError::Verification(format!(
                "reserved inputs do not cover {required}"
            )));
        }
        cx.trade.own_mut().deposit_inputs = inputs;
        Ok(())
    }
}

pub struct SendPayDepositRequest;

#[async_trait]
impl Task for SendPayDepositRequest {
    fn name(&self) -> &'static str {
        "SendPayDepositRequest"
    }

    async fn run(&self, cx: &mut TaskContext<'_>) -> Result<(), TaskError> {
        let own = cx.trade.own();
        let request = PayDepositRequest {
            trade_id: cx.trade.id().to_string(),
            trade_amount: cx
                .trade
                .trade_amount()
                .ok_or(TaskError::MissingData("trade amount"))?,
            taker_fee_tx_id: own
                .fee_tx_id
                .clone()
                .ok_or(TaskError::MissingData("taker fee transaction"))?,
            taker_payment_account: own
                .payment_account
                .clone()
                .ok_or(TaskError::MissingData("own payment account"))?,
            taker_pub_key: own.pub_key.clone(),
            taker_payout_address: own
                .payout_address
                .clone()
                .ok_or(TaskError::MissingData("own payout address"))?,
            taker_deposit_inputs: own.deposit_inputs.clone(),
            accepted_arbitrators: cx.trade.offer().arbitrators.clone(),
            arbitrator: cx
                .trade
                .arbitrator()
                .cloned()
                .ok_or(TaskError::MissingData("arbitrator"))?,
        };
        let peer = cx.peer_address()?;

        cx.services
            .messenger
            .send_message(&peer, TradeMessage::PayDepositRequest(request))
            .await?;
        cx.trade.set_state(TradeState::TakeOfferRequested)?;
        Ok(())
    }
}

pub struct ProcessPublishDepositTxRequest;

#[async_trait]
impl Task for ProcessPublishDepositTxRequest {
    fn name(&self) -> &'static str {
        "ProcessPublishDepositTxRequest"
    }

    async fn run(&self, cx: &mut TaskContext<'_>) -> Result<(), TaskError> {
        let request = match cx.message()? {
            TradeMessage::PublishDepositTxRequest(request) => request.clone(),
            _ => {
                return Err(TaskError::UnexpectedMessage {
                    expected: "PublishDepositTxRequest",
                });
            }
        };
        if request.offerer_pub_key.is_empty() {
            return Err(TaskError::Verification("offerer public key is empty".into()));
        }
        let peer_address = cx.peer_address()?;

        let peer = cx.trade.peer_mut();
        peer.payment_account = Some(request.offerer_payment_account);
        peer.pub_key = request.offerer_pub_key;
        peer.payout_address = Some(request.offerer_payout_address);
        peer.contract_signature = Some(request.offerer_contract_signature);
        cx.trade.set_peer_address(peer_address);
        cx.process.prepared_deposit_tx = Some(request.prepared_deposit_tx);
        Ok(())
    }
}

/// Rebuilds the contract from our own view, checks it against the offerer's
/// hash and signature, then counter-signs.
pub struct VerifyAndSignContract;

#[async_trait]
impl Task for VerifyAndSignContract {
    fn name(&self) -> &'static str {
        "VerifyAndSignContract"
    }

    async fn run(&self, cx: &mut TaskContext<'_>) -> Result<(), TaskError> {
        let claimed_hash = match cx.message()? {
            TradeMessage::PublishDepositTxRequest(request) => request.contract_hash.clone(),
            _ => {
                return Err(TaskError::UnexpectedMessage {
                    expected: "PublishDepositTxRequest",
                });
            }
        };
        let contract_hash = cx.trade.contract()?.hash()?;
        if contract_hash != claimed_hash {
            return Err(TaskError::Verification(format!(
                "contract hash mismatch, ours {contract_hash} theirs {claimed_hash}"
            )));
        }

        let peer = cx.trade.peer();
        let peer_signature = peer
            .contract_signature
            .clone()
            .ok_or(TaskError::MissingData("offerer contract signature"))?;
        let valid = cx
            .services
            .wallet
            .verify_signature(&peer.pub_key, contract_hash.as_bytes(), &peer_signature)
            .await?;
        if !valid {
            return Err(TaskError::Verification(
                "offerer contract signature is invalid".into(),
            ));
        }

        let signature = cx.services.wallet.sign(contract_hash.as_bytes()).await?;
        debug!(
            trade_id = %cx.trade.id(),
            contract_hash = %contract_hash,
            signature = %hex::encode(&signature),
            "counter-signed contract"
        );
        cx.trade.set_contract_hash(contract_hash);
        cx.trade.own_mut().contract_signature = Some(signature);
        Ok(())
    }
}

pub struct SignAndPublishDepositTx;

#[async_trait]
impl Task for SignAndPublishDepositTx {
    fn name(&self) -> &'static str {
        "SignAndPublishDepositTx"
    }

    async fn run(&self, cx: &mut TaskContext<'_>) -> Result<(), TaskError> {
        if cx.trade.deposit_tx().is_none() {
            let prepared = cx
                .process
                .prepared_deposit_tx
                .clone()
                .ok_or(TaskError::MissingData("prepared deposit transaction"))?;
            let deposit_tx = cx
                .services
                .wallet
                .sign_and_publish_deposit_tx(&prepared)
                .await?;
            cx.trade.set_deposit_tx(deposit_tx)?;
        }
        cx.trade.set_state(TradeState::TakerPublishedDepositTx)?;
        Ok(())
    }
}

pub struct SendDepositTxPublishedMessage;

#[async_trait]
impl Task for SendDepositTxPublishedMessage {
    fn name(&self) -> &'static str {
        "SendDepositTxPublishedMessage"
    }

    async fn run(&self, cx: &mut TaskContext<'_>) -> Result<(), TaskError> {
        let message = DepositTxPublishedMessage {
            trade_id: cx.trade.id().to_string(),
            deposit_tx: cx
                .trade
                .deposit_tx()
                .cloned()
                .ok_or(TaskError::MissingData("deposit transaction"))?,
        };
        let peer = cx.peer_address()?;

        cx.services
            .messenger
            .send_message(&peer, TradeMessage::DepositTxPublished(message))
            .await?;
        cx.trade
            .set_state(TradeState::TakerSentDepositTxPublishedMsg)?;
        Ok(())
    }
}
