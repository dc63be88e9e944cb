//! Restarting a node in the middle of a trade
//!
//! Each test drives a trade until a step fails, then throws the live protocol
//! away and builds a fresh one from what the store kept, the way a node does
//! after a crash.
mod common;

use common::{Pair, Peer, handshake, pair, single_message};
use std::sync::atomic::Ordering;
use trade_protocol::services::TradeStore;
use trade_protocol::trade::{Direction, TradeState};
use trade_protocol::{
    Outcome, ProtocolConfig, ProtocolError, ProtocolEvent, TradeManager, TradeProtocol,
};

fn restart(peer: &Peer, trade_id: &str) -> anyhow::Result<TradeProtocol> {
    let trade = peer.store.load(trade_id)?.expect("trade is stored");
    Ok(TradeProtocol::new(
        trade,
        peer.services.clone(),
        ProtocolConfig::default(),
    ))
}

fn ran(outcome: Outcome) -> Vec<&'static str> {
    match outcome {
        Outcome::Completed(report) => report.tasks,
        Outcome::Ignored => vec![],
    }
}

/// Handshake plus the deposit message reaching the offerer.
async fn deposit_confirmed(direction: Direction) -> anyhow::Result<Pair> {
    let p = pair(direction)?;
    handshake(&p).await?;
    p.offerer_protocol
        .handle_decrypted_message(single_message(&p.taker), p.taker.address.clone())
        .await?;
    Ok(p)
}

#[tokio::test]
async fn buyer_broadcasts_known_payout_after_restart() -> anyhow::Result<()> {
    let p = deposit_confirmed(Direction::Buy).await?;
    let (buyer, seller) = (&p.offerer, &p.taker);
    let trade_id = p.offerer_protocol.trade_id().to_string();

    p.offerer_protocol.on_fiat_payment_started().await?;
    p.taker_protocol
        .handle_decrypted_message(single_message(buyer), buyer.address.clone())
        .await?;
    p.taker_protocol.on_fiat_payment_received().await?;

    // the buyer stores the payout but cannot reach the network
    buyer.wallet.network_down.store(true, Ordering::SeqCst);
    let err = p
        .offerer_protocol
        .handle_decrypted_message(single_message(seller), seller.address.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, ProtocolError::Fault(_)));
    assert_eq!(
        p.offerer_protocol.state().await,
        TradeState::BuyerReceivedPayoutTxPublishedMsg
    );

    // back online, and the seller's broadcast got lost
    buyer.wallet.network_down.store(false, Ordering::SeqCst);
    buyer.wallet.network.lock().unwrap().clear();
    let protocol = restart(buyer, &trade_id)?;

    let outcome = protocol.resume().await?;
    assert_eq!(ran(outcome), vec!["BuyerMightBroadcastPayoutTx"]);
    assert_eq!(buyer.wallet.broadcasts.load(Ordering::SeqCst), 1);
    assert_eq!(protocol.state().await, TradeState::PayoutBroadcasted);
    assert!(protocol.is_completed().await);

    // nothing is owed any more
    assert_eq!(protocol.resume().await?, Outcome::Ignored);
    assert_eq!(buyer.wallet.broadcasts.load(Ordering::SeqCst), 1);

    Ok(())
}

#[tokio::test]
async fn seller_resends_payout_message_on_restore() -> anyhow::Result<()> {
    let p = deposit_confirmed(Direction::Sell).await?;
    let (seller, buyer) = (&p.offerer, &p.taker);
    let trade_id = p.offerer_protocol.trade_id().to_string();

    p.taker_protocol.on_fiat_payment_started().await?;
    p.offerer_protocol
        .handle_decrypted_message(single_message(buyer), buyer.address.clone())
        .await?;

    seller.messenger.fail.store(true, Ordering::SeqCst);
    assert!(p.offerer_protocol.on_fiat_payment_received().await.is_err());
    let stored = seller.store.load(&trade_id)?.expect("trade is stored");
    assert_eq!(stored.state(), TradeState::SellerPublishedPayoutTx);
    assert!(stored.payout_tx().is_some());

    seller.messenger.fail.store(false, Ordering::SeqCst);
    let manager = TradeManager::new(seller.services.clone(), ProtocolConfig::default());
    assert_eq!(manager.restore_all().await?, 1);

    let protocol = manager.protocol(&trade_id).await.expect("restored");
    assert_eq!(
        protocol.state().await,
        TradeState::SellerSentPayoutTxPublishedMsg
    );
    assert!(protocol.is_completed().await);
    let sent = seller.messenger.take();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, buyer.address);

    Ok(())
}

#[tokio::test]
async fn taker_resends_deposit_message_after_restart() -> anyhow::Result<()> {
    let p = pair(Direction::Buy)?;
    let (offerer, taker) = (&p.offerer, &p.taker);
    let trade_id = p.taker_protocol.trade_id().to_string();

    p.taker_protocol.take_available_offer().await?;
    p.offerer_protocol
        .handle_take_offer_request(single_message(taker), taker.address.clone())
        .await?;

    taker.messenger.fail.store(true, Ordering::SeqCst);
    assert!(
        p.taker_protocol
            .handle_decrypted_message(single_message(offerer), offerer.address.clone())
            .await
            .is_err()
    );
    assert_eq!(
        p.taker_protocol.state().await,
        TradeState::TakerPublishedDepositTx
    );

    taker.messenger.fail.store(false, Ordering::SeqCst);
    let protocol = restart(taker, &trade_id)?;
    assert_eq!(
        ran(protocol.resume().await?),
        vec!["SendDepositTxPublishedMessage"]
    );
    assert_eq!(
        protocol.state().await,
        TradeState::TakerSentDepositTxPublishedMsg
    );

    // the resent message completes the offerer side as usual
    p.offerer_protocol
        .handle_decrypted_message(single_message(taker), taker.address.clone())
        .await?;
    assert_eq!(
        p.offerer_protocol.state().await,
        TradeState::OffererReceivedDepositTxPublishedMsg
    );

    Ok(())
}

#[tokio::test]
async fn buyer_without_payout_watches_for_it_after_restart() -> anyhow::Result<()> {
    let p = deposit_confirmed(Direction::Sell).await?;
    let (seller, buyer) = (&p.offerer, &p.taker);
    let trade_id = p.taker_protocol.trade_id().to_string();

    p.taker_protocol.on_fiat_payment_started().await?;
    assert_eq!(buyer.wallet.payout_watches.load(Ordering::SeqCst), 1);
    let fiat_started = single_message(buyer);

    // the live process already watches, so resuming it registers nothing new
    let mut events = p.taker_protocol.subscribe();
    assert_eq!(
        ran(p.taker_protocol.resume().await?),
        vec!["SetupListenerForPayoutTx"]
    );
    assert_eq!(buyer.wallet.payout_watches.load(Ordering::SeqCst), 1);
    // still waiting for the payout, so the trade is not reported as done
    let mut trade_completed = false;
    while let Ok(event) = events.try_recv() {
        trade_completed |= matches!(event, ProtocolEvent::TradeCompleted { .. });
    }
    assert!(!trade_completed);

    let protocol = restart(buyer, &trade_id)?;
    assert_eq!(
        ran(protocol.resume().await?),
        vec!["SetupListenerForPayoutTx"]
    );
    assert_eq!(buyer.wallet.payout_watches.load(Ordering::SeqCst), 2);

    // the seller pays out, but only the wallet tells the buyer
    p.offerer_protocol
        .handle_decrypted_message(fiat_started, buyer.address.clone())
        .await?;
    p.offerer_protocol.on_fiat_payment_received().await?;
    let payout_tx = p
        .offerer_protocol
        .trade()
        .await
        .payout_tx()
        .cloned()
        .expect("seller finalized the payout");
    drop(seller.messenger.take());

    protocol.on_payout_tx_seen(payout_tx.clone()).await?;
    let trade = protocol.trade().await;
    assert_eq!(trade.state(), TradeState::PayoutBroadcasted);
    assert_eq!(trade.payout_tx(), Some(&payout_tx));

    Ok(())
}

#[tokio::test]
async fn resume_is_a_noop_for_trades_that_owe_nothing() -> anyhow::Result<()> {
    let p = deposit_confirmed(Direction::Buy).await?;

    for protocol in [&p.offerer_protocol, &p.taker_protocol] {
        let before = protocol.trade().await;
        assert_eq!(protocol.resume().await?, Outcome::Ignored);
        assert_eq!(protocol.trade().await, before);
    }
    assert_eq!(p.offerer.messenger.sent_count(), 0);
    assert_eq!(p.taker.messenger.sent_count(), 0);

    Ok(())
}
