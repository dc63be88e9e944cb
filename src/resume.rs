//! Deciding what to do with a trade loaded after a restart
use super::trade::{Phase, Trade, TradeState};

/// Work a restarted node owes its peer or the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecoveryAction {
    /// Buyer holds a payout that may never have reached the network.
    BroadcastPayoutTx,
    /// Buyer told the seller about the fiat transfer but has no payout yet.
    WatchForPayoutTx,
    /// Seller published the payout but the buyer may never have heard of it.
    ResendPayoutTxPublished,
    /// Taker published the deposit but the offerer may never have heard of it.
    ResendDepositTxPublished,
}

/// Pure function of the persisted trade. `None` means there is nothing to
/// recover and resuming the trade is a no-op.
pub fn recovery_action(trade: &Trade) -> Option<RecoveryAction> {
    let state = trade.state();
    if state.is_terminal() {
        return None;
    }
    let phase = trade.phase();
    let has_payout = trade.payout_tx().is_some();

    if trade.role().is_buyer() {
        if has_payout
            && matches!(phase, Phase::FiatReceived | Phase::PayoutPaid)
            && state != TradeState::PayoutBroadcasted
        {
            return Some(RecoveryAction::BroadcastPayoutTx);
        }
        if !has_payout
            && state == TradeState::BuyerSentFiatPaymentInitiatedMsg
            && phase != Phase::PayoutPaid
        {
            return Some(RecoveryAction::WatchForPayoutTx);
        }
        return taker_action(trade);
    }

    if has_payout && state == TradeState::SellerPublishedPayoutTx {
        return Some(RecoveryAction::ResendPayoutTxPublished);
    }
    taker_action(trade)
}

fn taker_action(trade: &Trade) -> Option<RecoveryAction> {
    if !trade.role().is_offerer()
        && trade.deposit_tx().is_some()
        && trade.state() == TradeState::TakerPublishedDepositTx
    {
        return Some(RecoveryAction::ResendDepositTxPublished);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trade::tests::{test_offer, test_party};
    use crate::trade::{Direction, Role, Transaction};

    fn trade_for(role: Role) -> Trade {
        let direction = match role {
            Role::BuyerAsOfferer | Role::SellerAsTaker => Direction::Buy,
            Role::SellerAsOfferer | Role::BuyerAsTaker => Direction::Sell,
        };
        let offer = test_offer(direction);
        let trade = if role.is_offerer() {
            Trade::new_offerer(offer, test_party("alice"))
        } else {
            Trade::new_taker(offer, 60_000, test_party("bob")).unwrap()
        };
        assert_eq!(trade.role(), role);
        trade
    }

    /// Forces `trade` into `state`, optionally with a deposit and payout.
    fn at_state(role: Role, state: TradeState, deposit: bool, payout: bool) -> Trade {
        let mut trade = trade_for(role);
        if deposit || payout {
            trade.set_deposit_tx(Transaction::new(b"deposit".to_vec())).unwrap();
        }
        if payout {
            trade.set_payout_tx(Transaction::new(b"payout".to_vec())).unwrap();
        }
        trade.set_state(state).unwrap();
        trade
    }

    #[test]
    fn buyer_recovery_over_every_state() {
        for role in [Role::BuyerAsOfferer, Role::BuyerAsTaker] {
            for state in TradeState::ALL {
                let with_payout = recovery_action(&at_state(role, state, true, true));
                let expected = if !state.is_terminal()
                    && matches!(state.phase(), Phase::FiatReceived | Phase::PayoutPaid)
                    && state != TradeState::PayoutBroadcasted
                {
                    Some(RecoveryAction::BroadcastPayoutTx)
                } else if !role.is_offerer() && state == TradeState::TakerPublishedDepositTx {
                    Some(RecoveryAction::ResendDepositTxPublished)
                } else {
                    None
                };
                assert_eq!(with_payout, expected, "{role:?} {state:?} with payout");

                let without_payout = recovery_action(&at_state(role, state, true, false));
                let expected = if state == TradeState::BuyerSentFiatPaymentInitiatedMsg {
                    Some(RecoveryAction::WatchForPayoutTx)
                } else if !role.is_offerer() && state == TradeState::TakerPublishedDepositTx {
                    Some(RecoveryAction::ResendDepositTxPublished)
                } else {
                    None
                };
                assert_eq!(without_payout, expected, "{role:?} {state:?} without payout");
            }
        }
    }

    #[test]
    fn seller_recovery_over_every_state() {
        for role in [Role::SellerAsOfferer, Role::SellerAsTaker] {
            for state in TradeState::ALL {
                let with_payout = recovery_action(&at_state(role, state, true, true));
                let expected = if state == TradeState::SellerPublishedPayoutTx {
                    Some(RecoveryAction::ResendPayoutTxPublished)
                } else if !role.is_offerer() && state == TradeState::TakerPublishedDepositTx {
                    Some(RecoveryAction::ResendDepositTxPublished)
                } else {
                    None
                };
                assert_eq!(with_payout, expected, "{role:?} {state:?} with payout");

                let without_payout = recovery_action(&at_state(role, state, true, false));
                let expected = if !role.is_offerer() && state == TradeState::TakerPublishedDepositTx {
                    Some(RecoveryAction::ResendDepositTxPublished)
                } else {
                    None
                };
                assert_eq!(without_payout, expected, "{role:?} {state:?} without payout");
            }
        }
    }

    #[test]
    fn fresh_trades_need_no_recovery() {
        for role in [
            Role::BuyerAsOfferer,
            Role::SellerAsOfferer,
            Role::BuyerAsTaker,
            Role::SellerAsTaker,
        ] {
            assert_eq!(recovery_action(&trade_for(role)), None);
        }
    }

    #[test]
    fn taker_without_deposit_does_not_resend() {
        let trade = at_state(
            Role::SellerAsTaker,
            TradeState::TakerPublishedDepositTx,
            false,
            false,
        );
        assert_eq!(recovery_action(&trade), None);
    }
}
