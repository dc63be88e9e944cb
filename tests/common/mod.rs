//! Shared fixtures for the integration tests
//!
//! Each peer gets its own sled store in a temp dir, a messenger that records
//! instead of sending, and a wallet backed by a network set shared with the
//! other peer so a broadcast by one side is visible to the other.
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use trade_protocol::services::{
    DepositTxRequest, Messenger, PayoutTxRequest, Services, StatisticsSink, TradeStatistics,
    TradeWallet,
};
use trade_protocol::store::SledTradeStore;
use trade_protocol::trade::{
    Currency, Direction, NodeAddress, Offer, OfferDetails, PaymentAccount, TradingParty,
    Transaction, Utxo,
};
use trade_protocol::trade::Trade;
use trade_protocol::{ProtocolConfig, TradeMessage, TradeProtocol};

pub type Network = Arc<Mutex<HashSet<String>>>;

pub fn network() -> Network {
    Arc::new(Mutex::new(HashSet::new()))
}

#[derive(Default)]
pub struct RecordingMessenger {
    sent: Mutex<Vec<(NodeAddress, TradeMessage)>>,
    pub fail: AtomicBool,
}

impl RecordingMessenger {
    /// Drains everything sent so far.
    pub fn take(&self) -> Vec<(NodeAddress, TradeMessage)> {
        std::mem::take(&mut *self.sent.lock().unwrap())
    }
    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl Messenger for RecordingMessenger {
    async fn send_message(&self, peer: &NodeAddress, message: TradeMessage) -> anyhow::Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("peer {peer} unreachable");
        }
        self.sent.lock().unwrap().push((peer.clone(), message));
        Ok(())
    }
}

pub struct MockWallet {
    pub_key: Vec<u8>,
    pub network: Network,
    pub reject_fee: AtomicBool,
    pub reject_account: AtomicBool,
    pub network_down: AtomicBool,
    pub broadcasts: AtomicUsize,
    pub deposit_watches: AtomicUsize,
    pub payout_watches: AtomicUsize,
}

impl MockWallet {
    pub fn new(pub_key: &[u8], network: Network) -> Self {
        Self {
            pub_key: pub_key.to_vec(),
            network,
            reject_fee: AtomicBool::new(false),
            reject_account: AtomicBool::new(false),
            network_down: AtomicBool::new(false),
            broadcasts: AtomicUsize::new(0),
            deposit_watches: AtomicUsize::new(0),
            payout_watches: AtomicUsize::new(0),
        }
    }
}

fn signature(pub_key: &[u8], payload: &[u8]) -> Vec<u8> {
    let mut bytes = pub_key.to_vec();
    bytes.extend_from_slice(payload);
    sha256::digest(&bytes).into_bytes()
}

#[async_trait]
impl TradeWallet for MockWallet {
    async fn get_transaction(&self, tx_id: &str) -> anyhow::Result<Option<Transaction>> {
        Ok(Some(Transaction {
            id: tx_id.to_string(),
            raw: tx_id.as_bytes().to_vec(),
        }))
    }

    async fn verify_fee_payment(&self, _fee_tx_id: &str) -> anyhow::Result<bool> {
        Ok(!self.reject_fee.load(Ordering::SeqCst))
    }

    async fn verify_counterparty_account(&self, _account: &PaymentAccount) -> anyhow::Result<bool> {
        Ok(!self.reject_account.load(Ordering::SeqCst))
    }

    async fn create_take_offer_fee_tx(&self, trade_id: &str) -> anyhow::Result<Transaction> {
        let tx = Transaction::new(format!("taker-fee:{trade_id}").into_bytes());
        self.network.lock().unwrap().insert(tx.id.clone());
        Ok(tx)
    }

    async fn reserve_deposit_inputs(&self, trade_id: &str, amount: u64) -> anyhow::Result<Vec<Utxo>> {
        Ok(vec![Utxo {
            tx_id: format!("utxo:{trade_id}"),
            vout: 0,
            value: amount,
        }])
    }

    async fn build_and_sign_deposit_tx(&self, request: &DepositTxRequest) -> anyhow::Result<Transaction> {
        Ok(Transaction::new(minicbor::to_vec(request)?))
    }

    async fn sign_and_publish_deposit_tx(&self, prepared: &Transaction) -> anyhow::Result<Transaction> {
        let mut raw = b"deposit:".to_vec();
        raw.extend_from_slice(&prepared.raw);
        let tx = Transaction::new(raw);
        self.network.lock().unwrap().insert(tx.id.clone());
        Ok(tx)
    }

    async fn build_and_sign_payout_tx(&self, request: &PayoutTxRequest) -> anyhow::Result<Vec<u8>> {
        Ok(signature(&self.pub_key, &minicbor::to_vec(request)?))
    }

    async fn finalize_payout_tx(
        &self,
        request: &PayoutTxRequest,
        peer_signature: &[u8],
    ) -> anyhow::Result<Transaction> {
        if peer_signature.is_empty() {
            anyhow::bail!("missing buyer signature");
        }
        Ok(Transaction::new(minicbor::to_vec(request)?))
    }

    async fn broadcast_transaction(&self, tx: &Transaction) -> anyhow::Result<()> {
        self.broadcasts.fetch_add(1, Ordering::SeqCst);
        self.network.lock().unwrap().insert(tx.id.clone());
        Ok(())
    }

    async fn is_in_network(&self, tx_id: &str) -> anyhow::Result<bool> {
        if self.network_down.load(Ordering::SeqCst) {
            anyhow::bail!("no connection to the network");
        }
        Ok(self.network.lock().unwrap().contains(tx_id))
    }

    async fn sign(&self, payload: &[u8]) -> anyhow::Result<Vec<u8>> {
        Ok(signature(&self.pub_key, payload))
    }

    async fn verify_signature(
        &self,
        pub_key: &[u8],
        payload: &[u8],
        signature_bytes: &[u8],
    ) -> anyhow::Result<bool> {
        Ok(signature(pub_key, payload) == signature_bytes)
    }

    async fn watch_deposit_tx(&self, _trade_id: &str) -> anyhow::Result<()> {
        self.deposit_watches.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn watch_payout_tx(&self, _trade_id: &str, _deposit_tx_id: &str) -> anyhow::Result<()> {
        self.payout_watches.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingStatistics {
    pub published: Mutex<Vec<TradeStatistics>>,
    pub fail: AtomicBool,
}

#[async_trait]
impl StatisticsSink for RecordingStatistics {
    async fn publish(&self, statistics: TradeStatistics) -> anyhow::Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("statistics relay offline");
        }
        self.published.lock().unwrap().push(statistics);
        Ok(())
    }
}

/// One side of a trade with all of its collaborators.
pub struct Peer {
    pub name: String,
    pub address: NodeAddress,
    pub messenger: Arc<RecordingMessenger>,
    pub wallet: Arc<MockWallet>,
    pub statistics: Arc<RecordingStatistics>,
    pub store: Arc<SledTradeStore>,
    pub services: Services,
    _dir: TempDir,
}

impl Peer {
    pub fn new(name: &str, port: u16, network: &Network) -> anyhow::Result<Self> {
        // sled locks its files, so every peer gets its own temp db
        let dir = tempfile::tempdir()?;
        let db = Arc::new(sled::open(dir.path().join(format!("{name}.db")))?);

        let messenger = Arc::new(RecordingMessenger::default());
        let wallet = Arc::new(MockWallet::new(name.as_bytes(), network.clone()));
        let statistics = Arc::new(RecordingStatistics::default());
        let store = Arc::new(SledTradeStore::new(db));
        let services = Services::new(
            messenger.clone(),
            wallet.clone(),
            store.clone(),
            statistics.clone(),
        );

        Ok(Self {
            name: name.to_string(),
            address: NodeAddress::new(name, port),
            messenger,
            wallet,
            statistics,
            store,
            services,
            _dir: dir,
        })
    }

    pub fn party(&self) -> TradingParty {
        let account = PaymentAccount {
            id: format!("{}-account", self.name),
            method: "SEPA".into(),
            holder: self.name.clone(),
        };
        TradingParty::new(
            account,
            self.name.as_bytes().to_vec(),
            &format!("{}-payout", self.name),
        )
    }
}

pub const ARBITRATOR_PORT: u16 = 9000;

pub fn offer(direction: Direction, offerer: &NodeAddress) -> Offer {
    OfferDetails::new()
        .set_direction(direction)
        .set_currency(Currency::EUR)
        .set_amount(100_000)
        .set_min_amount(50_000)
        .set_price(30_000)
        .set_security_deposit(10_000)
        .set_offer_fee_tx_id("offer-fee")
        .add_arbitrator(NodeAddress::new("arbitrator", ARBITRATOR_PORT))
        .set_offerer_address(offerer.clone())
        .build()
        .expect("offer is valid")
}

/// Pops the single message `from` has sent, failing the test otherwise.
pub fn single_message(from: &Peer) -> TradeMessage {
    let mut sent = from.messenger.take();
    assert_eq!(sent.len(), 1, "{} sent {} messages", from.name, sent.len());
    sent.remove(0).1
}

pub struct Pair {
    pub offerer: Peer,
    pub taker: Peer,
    pub offerer_protocol: TradeProtocol,
    pub taker_protocol: TradeProtocol,
}

pub fn pair(direction: Direction) -> anyhow::Result<Pair> {
    let net = network();
    let offerer = Peer::new("alice", 9001, &net)?;
    let taker = Peer::new("bob", 9002, &net)?;

    let offer = offer(direction, &offerer.address);
    let offerer_trade = Trade::new_offerer(offer.clone(), offerer.party());
    let taker_trade = Trade::new_taker(offer, 60_000, taker.party())?;

    let offerer_protocol = TradeProtocol::new(
        offerer_trade,
        offerer.services.clone(),
        ProtocolConfig::default(),
    );
    let taker_protocol =
        TradeProtocol::new(taker_trade, taker.services.clone(), ProtocolConfig::default());

    Ok(Pair {
        offerer,
        taker,
        offerer_protocol,
        taker_protocol,
    })
}

/// Runs the handshake up to the taker having published the deposit. The
/// deposit-published message is left in the taker's outbox.
pub async fn handshake(p: &Pair) -> anyhow::Result<()> {
    p.taker_protocol.take_available_offer().await?;
    let request = single_message(&p.taker);
    p.offerer_protocol
        .handle_take_offer_request(request, p.taker.address.clone())
        .await?;

    let publish = single_message(&p.offerer);
    p.taker_protocol
        .handle_decrypted_message(publish, p.offerer.address.clone())
        .await?;
    Ok(())
}
