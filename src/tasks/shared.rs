//! Steps every role uses
use crate::context::TaskContext;
use crate::error::TaskError;
use crate::services::{PayoutTxRequest, TradeStatistics};
use crate::task::Task;
use crate::trade::{TimeStamp, Trade, TradeState};
use async_trait::async_trait;
use tracing::{info, warn};

pub struct VerifyPeerFeePayment;

#[async_trait]
impl Task for VerifyPeerFeePayment {
    fn name(&self) -> &'static str {
        "VerifyPeerFeePayment"
    }

    async fn run(&self, cx: &mut TaskContext<'_>) -> Result<(), TaskError> {
        let fee_tx_id = cx
            .trade
            .peer()
            .fee_tx_id
            .clone()
            .ok_or(TaskError::MissingData("peer fee transaction"))?;

        if !cx.services.wallet.verify_fee_payment(&fee_tx_id).await? {
            return Err(TaskError::Verification(format!(
                "fee transaction {fee_tx_id} is not confirmed"
            )));
        }
        Ok(())
    }
}

pub struct VerifyPeerAccount;

#[async_trait]
impl Task for VerifyPeerAccount {
    fn name(&self) -> &'static str {
        "VerifyPeerAccount"
    }

    async fn run(&self, cx: &mut TaskContext<'_>) -> Result<(), TaskError> {
        let account = cx
            .trade
            .peer()
            .payment_account
            .clone()
            .ok_or(TaskError::MissingData("peer payment account"))?;

        if !cx
            .services
            .wallet
            .verify_counterparty_account(&account)
            .await?
        {
            return Err(TaskError::Verification(format!(
                "payment account {} failed verification",
                account.id
            )));
        }
        Ok(())
    }
}

pub struct PublishTradeStatistics;

#[async_trait]
impl Task for PublishTradeStatistics {
    fn name(&self) -> &'static str {
        "PublishTradeStatistics"
    }

    async fn run(&self, cx: &mut TaskContext<'_>) -> Result<(), TaskError> {
        let deposit_tx_id = cx
            .trade
            .deposit_tx()
            .map(|tx| tx.id.clone())
            .ok_or(TaskError::MissingData("deposit transaction"))?;

        let statistics = TradeStatistics {
            trade_id: cx.trade.id().to_string(),
            currency: cx.trade.offer().currency,
            price: cx.trade.offer().price,
            amount: cx.trade.trade_amount().unwrap_or_default(),
            deposit_tx_id,
            date: TimeStamp::new(),
        };

        // best effort, telemetry never fails a trade
        if let Err(e) = cx.services.statistics.publish(statistics).await {
            warn!(trade_id = %cx.trade.id(), error = %e, "failed to publish trade statistics");
        }
        Ok(())
    }
}

pub struct OpenDispute;

#[async_trait]
impl Task for OpenDispute {
    fn name(&self) -> &'static str {
        "OpenDispute"
    }

    async fn run(&self, cx: &mut TaskContext<'_>) -> Result<(), TaskError> {
        info!(trade_id = %cx.trade.id(), state = ?cx.trade.state(), "opening dispute");
        cx.trade.set_state(TradeState::Disputed)?;
        Ok(())
    }
}

/// The payout layout both peers sign: the buyer gets the trade amount plus
/// their security deposit back, the seller only their security deposit.
pub(crate) fn payout_request(trade: &Trade) -> Result<PayoutTxRequest, TaskError> {
    let deposit_tx_id = trade
        .deposit_tx()
        .map(|tx| tx.id.clone())
        .ok_or(TaskError::MissingData("deposit transaction"))?;
    let amount = trade
        .trade_amount()
        .ok_or(TaskError::MissingData("trade amount"))?;
    let deposit = trade.offer().security_deposit;

    let own_address = trade
        .own()
        .payout_address
        .clone()
        .ok_or(TaskError::MissingData("own payout address"))?;
    let peer_address = trade
        .peer()
        .payout_address
        .clone()
        .ok_or(TaskError::MissingData("peer payout address"))?;
    let (buyer_payout_address, seller_payout_address) = if trade.role().is_buyer() {
        (own_address, peer_address)
    } else {
        (peer_address, own_address)
    };

    Ok(PayoutTxRequest {
        trade_id: trade.id().to_string(),
        deposit_tx_id,
        buyer_payout_address,
        buyer_amount: escrow_total(amount, deposit)?,
        seller_payout_address,
        seller_amount: deposit,
    })
}

/// Trade amount plus security deposit, the side of the escrow the seller funds
/// and the buyer is paid out.
pub(crate) fn escrow_total(amount: u64, deposit: u64) -> Result<u64, TaskError> {
    amount.checked_add(deposit).ok_or_else(|| {
        TaskError::Verification(format!("amount {amount} plus deposit {deposit} overflows"))
    })
}
