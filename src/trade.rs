//! Core trade aggregate, its state machine and the value types it carries
use super::error::TradeError;
use super::utils;
use chrono::{DateTime, TimeZone, Utc};
use std::fmt;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, Eq, Ord, PartialEq, PartialOrd)]
pub enum Currency {
    #[n(0)]
    USD,
    #[n(1)]
    GBP,
    #[n(2)]
    EUR,
}

// Direction is always expressed from the offerer's point of view
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, Eq, Ord, PartialEq, PartialOrd)]
pub enum Direction {
    #[n(0)]
    Buy,
    #[n(1)]
    Sell,
}

/// Which of the four peer-role combinations a trade instance plays. Fixed at creation.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, Eq, Hash, PartialEq)]
pub enum Role {
    #[n(0)]
    BuyerAsOfferer,
    #[n(1)]
    SellerAsOfferer,
    #[n(2)]
    BuyerAsTaker,
    #[n(3)]
    SellerAsTaker,
}

impl Role {
    pub fn for_offerer(direction: Direction) -> Self {
        match direction {
            Direction::Buy => Role::BuyerAsOfferer,
            Direction::Sell => Role::SellerAsOfferer,
        }
    }
    pub fn for_taker(direction: Direction) -> Self {
        match direction {
            Direction::Buy => Role::SellerAsTaker,
            Direction::Sell => Role::BuyerAsTaker,
        }
    }
    pub fn is_offerer(&self) -> bool {
        matches!(self, Role::BuyerAsOfferer | Role::SellerAsOfferer)
    }
    pub fn is_buyer(&self) -> bool {
        matches!(self, Role::BuyerAsOfferer | Role::BuyerAsTaker)
    }
}

/// Coarse grouping of consecutive states. Monotone in [`TradeState`].
#[derive(Debug, Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Phase {
    Init,
    TakerFeePaid,
    DepositRequested,
    DepositPublished,
    FiatSent,
    FiatReceived,
    PayoutPaid,
    Disputed,
    Failed,
}

/// Strictly ordered trade progression. Declaration order is the ordinal order.
///
/// Each role only visits the states that belong to it, but all roles share the
/// one ordering so monotonicity can be checked without knowing the role.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum TradeState {
    #[n(0)]
    Preparation,
    #[n(1)]
    TakerPublishedTakerFeeTx,
    #[n(2)]
    TakeOfferRequested,
    #[n(3)]
    OffererSentPublishDepositTxRequest,
    #[n(4)]
    TakerPublishedDepositTx,
    #[n(5)]
    TakerSentDepositTxPublishedMsg,
    #[n(6)]
    DepositSeenInNetwork,
    #[n(7)]
    OffererReceivedDepositTxPublishedMsg,
    #[n(8)]
    BuyerConfirmedFiatPaymentInitiated,
    #[n(9)]
    BuyerSentFiatPaymentInitiatedMsg,
    #[n(10)]
    SellerReceivedFiatPaymentInitiatedMsg,
    #[n(11)]
    SellerConfirmedFiatPaymentReceipt,
    #[n(12)]
    SellerPublishedPayoutTx,
    #[n(13)]
    SellerSentPayoutTxPublishedMsg,
    #[n(14)]
    BuyerReceivedPayoutTxPublishedMsg,
    #[n(15)]
    PayoutBroadcasted,
    #[n(16)]
    Disputed,
    #[n(17)]
    Fault,
}

impl TradeState {
    pub const ALL: [TradeState; 18] = [
        TradeState::Preparation,
        TradeState::TakerPublishedTakerFeeTx,
        TradeState::TakeOfferRequested,
        TradeState::OffererSentPublishDepositTxRequest,
        TradeState::TakerPublishedDepositTx,
        TradeState::TakerSentDepositTxPublishedMsg,
        TradeState::DepositSeenInNetwork,
        TradeState::OffererReceivedDepositTxPublishedMsg,
        TradeState::BuyerConfirmedFiatPaymentInitiated,
        TradeState::BuyerSentFiatPaymentInitiatedMsg,
        TradeState::SellerReceivedFiatPaymentInitiatedMsg,
        TradeState::SellerConfirmedFiatPaymentReceipt,
        TradeState::SellerPublishedPayoutTx,
        TradeState::SellerSentPayoutTxPublishedMsg,
        TradeState::BuyerReceivedPayoutTxPublishedMsg,
        TradeState::PayoutBroadcasted,
        TradeState::Disputed,
        TradeState::Fault,
    ];

    pub fn phase(&self) -> Phase {
        use TradeState::*;
        match self {
            Preparation => Phase::Init,
            TakerPublishedTakerFeeTx | TakeOfferRequested => Phase::TakerFeePaid,
            OffererSentPublishDepositTxRequest => Phase::DepositRequested,
            TakerPublishedDepositTx
            | TakerSentDepositTxPublishedMsg
            | DepositSeenInNetwork
            | OffererReceivedDepositTxPublishedMsg => Phase::DepositPublished,
            BuyerConfirmedFiatPaymentInitiated
            | BuyerSentFiatPaymentInitiatedMsg
            | SellerReceivedFiatPaymentInitiatedMsg => Phase::FiatSent,
            SellerConfirmedFiatPaymentReceipt => Phase::FiatReceived,
            SellerPublishedPayoutTx
            | SellerSentPayoutTxPublishedMsg
            | BuyerReceivedPayoutTxPublishedMsg
            | PayoutBroadcasted => Phase::PayoutPaid,
            Disputed => Phase::Disputed,
            Fault => Phase::Failed,
        }
    }
    /// `Disputed` and `Fault` are reachable from any open state and final.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TradeState::Disputed | TradeState::Fault)
    }
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone)]
pub struct TimeStamp<T: TimeZone>(DateTime<T>);

impl TimeStamp<Utc> {
    pub fn new() -> Self {
        Self(Utc::now())
    }
}

impl Default for TimeStamp<Utc> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: TimeZone> From<DateTime<T>> for TimeStamp<T> {
    fn from(value: DateTime<T>) -> Self {
        TimeStamp(value)
    }
}

impl<C> minicbor::Encode<C> for TimeStamp<Utc> {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        if let Some(nsec) = self.0.timestamp_nanos_opt() {
            return e.i64(nsec)?.ok();
        }

        Err(minicbor::encode::Error::message(
            "failed to encode timestamp. timestamp_nanos_opt returned None",
        ))
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TimeStamp<Utc> {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let nsecs = d.i64()?;

        Ok(TimeStamp(DateTime::from_timestamp_nanos(nsecs)))
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeAddress {
    #[n(0)]
    pub host: String,
    #[n(1)]
    pub port: u16,
}

impl NodeAddress {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.to_string(),
            port,
        }
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct PaymentAccount {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub method: String,
    #[n(2)]
    pub holder: String,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Utxo {
    #[n(0)]
    pub tx_id: String,
    #[n(1)]
    pub vout: u32,
    #[n(2)]
    pub value: u64,
}

/// A financial artifact. The id is the sha256 of the raw bytes.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub raw: Vec<u8>,
}

impl Transaction {
    pub fn new(raw: Vec<u8>) -> Self {
        let id = sha256::digest(&raw);
        Self { id, raw }
    }
}

/// What one side of the trade brings: filled in at creation for ourselves and
/// from incoming messages for the peer.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Default, PartialEq, Eq)]
pub struct TradingParty {
    #[n(0)]
    pub payment_account: Option<PaymentAccount>,
    #[n(1)]
    pub pub_key: Vec<u8>,
    #[n(2)]
    pub payout_address: Option<String>,
    #[n(3)]
    pub fee_tx_id: Option<String>,
    #[n(4)]
    pub deposit_inputs: Vec<Utxo>,
    #[n(5)]
    pub contract_signature: Option<Vec<u8>>,
    #[n(6)]
    pub payout_signature: Option<Vec<u8>>,
}

impl TradingParty {
    pub fn new(payment_account: PaymentAccount, pub_key: Vec<u8>, payout_address: &str) -> Self {
        Self {
            payment_account: Some(payment_account),
            pub_key,
            payout_address: Some(payout_address.to_string()),
            ..Self::default()
        }
    }
}

// Used for constructing an offer before it is published
#[derive(Debug, Default)]
pub struct OfferDetails {
    direction: Option<Direction>,
    currency: Option<Currency>,
    amount: u64,
    min_amount: u64,
    price: u64,
    security_deposit: u64,
    offer_fee_tx_id: Option<String>,
    arbitrators: Vec<NodeAddress>,
    offerer_address: Option<NodeAddress>,
}

/// A published offer. Its id doubles as the id of every trade taken from it.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Offer {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub direction: Direction,
    #[n(2)]
    pub currency: Currency,
    #[n(3)]
    pub amount: u64,
    #[n(4)]
    pub min_amount: u64,
    #[n(5)]
    pub price: u64,
    #[n(6)]
    pub security_deposit: u64,
    #[n(7)]
    pub offer_fee_tx_id: String,
    #[n(8)]
    pub arbitrators: Vec<NodeAddress>,
    #[n(9)]
    pub offerer_address: NodeAddress,
}

impl OfferDetails {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn set_direction(mut self, direction: Direction) -> Self {
        self.direction = Some(direction);
        self
    }
    pub fn set_currency(mut self, currency: Currency) -> Self {
        self.currency = Some(currency);
        self
    }
    pub fn set_amount(mut self, amount: u64) -> Self {
        self.amount = amount;
        self
    }
    pub fn set_min_amount(mut self, amount: u64) -> Self {
        self.min_amount = amount;
        self
    }
    pub fn set_price(mut self, price: u64) -> Self {
        self.price = price;
        self
    }
    pub fn set_security_deposit(mut self, deposit: u64) -> Self {
        self.security_deposit = deposit;
        self
    }
    pub fn set_offer_fee_tx_id(mut self, tx_id: &str) -> Self {
        self.offer_fee_tx_id = Some(tx_id.to_string());
        self
    }
    pub fn add_arbitrator(mut self, arbitrator: NodeAddress) -> Self {
        self.arbitrators.push(arbitrator);
        self
    }
    pub fn set_offerer_address(mut self, address: NodeAddress) -> Self {
        self.offerer_address = Some(address);
        self
    }
    /// Checks every field and assigns a fresh bech32 offer id.
    pub fn build(self) -> anyhow::Result<Offer> {
        let Some(direction) = self.direction else {
            return Err(TradeError::InvalidOffer("direction is not set").into());
        };
        let Some(currency) = self.currency else {
            return Err(TradeError::InvalidOffer("currency is not set").into());
        };
        if self.amount == 0 {
            return Err(TradeError::InvalidOffer("amount is set to zero").into());
        }
        // a missing min amount means the offer can only be taken in full
        let min_amount = if self.min_amount == 0 {
            self.amount
        } else {
            self.min_amount
        };
        if min_amount > self.amount {
            return Err(TradeError::InvalidOffer("min amount exceeds amount").into());
        }
        if self.price == 0 {
            return Err(TradeError::InvalidOffer("price is set to zero").into());
        }
        let Some(offer_fee_tx_id) = self.offer_fee_tx_id else {
            return Err(TradeError::InvalidOffer("offer fee transaction is not set").into());
        };
        if self.arbitrators.is_empty() {
            return Err(TradeError::InvalidOffer("no arbitrator accepted").into());
        }
        let Some(offerer_address) = self.offerer_address else {
            return Err(TradeError::InvalidOffer("offerer address is not set").into());
        };

        Ok(Offer {
            id: utils::new_uuid_to_bech32("trade")?,
            direction,
            currency,
            amount: self.amount,
            min_amount,
            price: self.price,
            security_deposit: self.security_deposit,
            offer_fee_tx_id,
            arbitrators: self.arbitrators,
            offerer_address,
        })
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct ContractParty {
    #[n(0)]
    pub payment_account: PaymentAccount,
    #[n(1)]
    pub pub_key: Vec<u8>,
    #[n(2)]
    pub payout_address: String,
}

/// The terms both peers sign. Built identically on each side from its own trade.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Contract {
    #[n(0)]
    pub trade_id: String,
    #[n(1)]
    pub currency: Currency,
    #[n(2)]
    pub trade_amount: u64,
    #[n(3)]
    pub price: u64,
    #[n(4)]
    pub security_deposit: u64,
    #[n(5)]
    pub arbitrator: NodeAddress,
    #[n(6)]
    pub buyer: ContractParty,
    #[n(7)]
    pub seller: ContractParty,
    #[n(8)]
    pub offer_fee_tx_id: String,
    #[n(9)]
    pub taker_fee_tx_id: String,
}

impl Contract {
    /// Returns the sha256 hash of the contract's CBOR encoding.
    pub fn hash(&self) -> anyhow::Result<String> {
        let (hash, _) = utils::cbor_digest(self)?;
        Ok(hash)
    }
}

/// The long-lived aggregate of one negotiated deal.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Trade {
    #[n(0)]
    id: String,
    #[n(1)]
    role: Role,
    #[n(2)]
    state: TradeState,
    #[n(3)]
    offer: Offer,
    #[n(4)]
    trade_amount: Option<u64>,
    #[n(5)]
    take_offer_date: TimeStamp<Utc>,
    #[n(6)]
    own: TradingParty,
    #[n(7)]
    peer: TradingParty,
    #[n(8)]
    peer_address: Option<NodeAddress>,
    #[n(9)]
    arbitrator: Option<NodeAddress>,
    #[n(10)]
    contract_hash: Option<String>,
    #[n(11)]
    deposit_tx: Option<Transaction>,
    #[n(12)]
    payout_tx: Option<Transaction>,
    #[n(13)]
    error_message: Option<String>,
}

impl Trade {
    /// Offerer side trade, created when a take-offer request arrives for `offer`.
    pub fn new_offerer(offer: Offer, own: TradingParty) -> Self {
        let mut own = own;
        own.fee_tx_id = Some(offer.offer_fee_tx_id.clone());
        let role = Role::for_offerer(offer.direction);
        Self::new(role, offer, None, own)
    }
    /// Taker side trade. `amount` must lie within the offer's bounds.
    pub fn new_taker(offer: Offer, amount: u64, own: TradingParty) -> Result<Self, TradeError> {
        if amount < offer.min_amount || amount > offer.amount {
            return Err(TradeError::AmountOutOfRange {
                amount,
                min: offer.min_amount,
                max: offer.amount,
            });
        }
        let role = Role::for_taker(offer.direction);
        let mut trade = Self::new(role, offer, Some(amount), own);
        trade.peer_address = Some(trade.offer.offerer_address.clone());
        Ok(trade)
    }
    fn new(role: Role, offer: Offer, trade_amount: Option<u64>, own: TradingParty) -> Self {
        Self {
            id: offer.id.clone(),
            role,
            state: TradeState::Preparation,
            offer,
            trade_amount,
            take_offer_date: TimeStamp::new(),
            own,
            peer: TradingParty::default(),
            peer_address: None,
            arbitrator: None,
            contract_hash: None,
            deposit_tx: None,
            payout_tx: None,
            error_message: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }
    pub fn role(&self) -> Role {
        self.role
    }
    pub fn state(&self) -> TradeState {
        self.state
    }
    pub fn phase(&self) -> Phase {
        self.state.phase()
    }
    pub fn offer(&self) -> &Offer {
        &self.offer
    }
    pub fn trade_amount(&self) -> Option<u64> {
        self.trade_amount
    }
    pub fn take_offer_date(&self) -> &TimeStamp<Utc> {
        &self.take_offer_date
    }
    pub fn own(&self) -> &TradingParty {
        &self.own
    }
    pub fn peer(&self) -> &TradingParty {
        &self.peer
    }
    pub fn peer_address(&self) -> Option<&NodeAddress> {
        self.peer_address.as_ref()
    }
    pub fn arbitrator(&self) -> Option<&NodeAddress> {
        self.arbitrator.as_ref()
    }
    pub fn contract_hash(&self) -> Option<&str> {
        self.contract_hash.as_deref()
    }
    pub fn deposit_tx(&self) -> Option<&Transaction> {
        self.deposit_tx.as_ref()
    }
    pub fn payout_tx(&self) -> Option<&Transaction> {
        self.payout_tx.as_ref()
    }
    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }
    /// Fee transaction of whichever peer took the offer.
    pub fn taker_fee_tx_id(&self) -> Option<&str> {
        if self.role.is_offerer() {
            self.peer.fee_tx_id.as_deref()
        } else {
            self.own.fee_tx_id.as_deref()
        }
    }

    /// Moves the trade forward. Re-entering the current state is allowed so an
    /// interrupted pipeline can be re-run; moving backwards or leaving a
    /// terminal state is not.
    pub(crate) fn set_state(&mut self, state: TradeState) -> Result<(), TradeError> {
        if self.state.is_terminal() && state != self.state {
            return Err(TradeError::Closed(self.state));
        }
        if !state.is_terminal() && state < self.state {
            return Err(TradeError::StateRegression {
                current: self.state,
                requested: state,
            });
        }
        self.state = state;
        Ok(())
    }
    pub(crate) fn set_trade_amount(&mut self, amount: u64) -> Result<(), TradeError> {
        if amount < self.offer.min_amount || amount > self.offer.amount {
            return Err(TradeError::AmountOutOfRange {
                amount,
                min: self.offer.min_amount,
                max: self.offer.amount,
            });
        }
        self.trade_amount = Some(amount);
        Ok(())
    }
    pub(crate) fn own_mut(&mut self) -> &mut TradingParty {
        &mut self.own
    }
    pub(crate) fn peer_mut(&mut self) -> &mut TradingParty {
        &mut self.peer
    }
    pub(crate) fn set_peer_address(&mut self, address: NodeAddress) {
        self.peer_address = Some(address);
    }
    pub(crate) fn set_arbitrator(&mut self, arbitrator: NodeAddress) {
        self.arbitrator = Some(arbitrator);
    }
    pub(crate) fn set_contract_hash(&mut self, hash: String) {
        self.contract_hash = Some(hash);
    }
    /// Set once. Setting the same transaction again is a no-op.
    pub(crate) fn set_deposit_tx(&mut self, tx: Transaction) -> Result<(), TradeError> {
        match &self.deposit_tx {
            Some(existing) if existing.id != tx.id => {
                Err(TradeError::ArtifactAlreadySet("deposit", existing.id.clone()))
            }
            Some(_) => Ok(()),
            None => {
                self.deposit_tx = Some(tx);
                Ok(())
            }
        }
    }
    /// Set once, and only after the deposit is known.
    pub(crate) fn set_payout_tx(&mut self, tx: Transaction) -> Result<(), TradeError> {
        if self.deposit_tx.is_none() {
            return Err(TradeError::PayoutWithoutDeposit);
        }
        match &self.payout_tx {
            Some(existing) if existing.id != tx.id => {
                Err(TradeError::ArtifactAlreadySet("payout", existing.id.clone()))
            }
            Some(_) => Ok(()),
            None => {
                self.payout_tx = Some(tx);
                Ok(())
            }
        }
    }
    pub(crate) fn set_error_message(&mut self, message: String) {
        self.error_message = Some(message);
    }

    /// Builds the contract from this side's view of the trade.
    pub fn contract(&self) -> Result<Contract, TradeError> {
        let own = contract_party(&self.own, "own")?;
        let peer = contract_party(&self.peer, "peer")?;
        let (buyer, seller) = if self.role.is_buyer() {
            (own, peer)
        } else {
            (peer, own)
        };

        Ok(Contract {
            trade_id: self.id.clone(),
            currency: self.offer.currency,
            trade_amount: self
                .trade_amount
                .ok_or(TradeError::MissingField("trade amount"))?,
            price: self.offer.price,
            security_deposit: self.offer.security_deposit,
            arbitrator: self
                .arbitrator
                .clone()
                .ok_or(TradeError::MissingField("arbitrator"))?,
            buyer,
            seller,
            offer_fee_tx_id: self.offer.offer_fee_tx_id.clone(),
            taker_fee_tx_id: self
                .taker_fee_tx_id()
                .ok_or(TradeError::MissingField("taker fee transaction"))?
                .to_string(),
        })
    }
}

fn contract_party(party: &TradingParty, side: &'static str) -> Result<ContractParty, TradeError> {
    let payment_account = party
        .payment_account
        .clone()
        .ok_or(TradeError::MissingField(side))?;
    let payout_address = party
        .payout_address
        .clone()
        .ok_or(TradeError::MissingField(side))?;

    Ok(ContractParty {
        payment_account,
        pub_key: party.pub_key.clone(),
        payout_address,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use proptest::prelude::*;

    pub(crate) fn test_offer(direction: Direction) -> Offer {
        OfferDetails::new()
            .set_direction(direction)
            .set_currency(Currency::EUR)
            .set_amount(100_000)
            .set_min_amount(50_000)
            .set_price(30_000)
            .set_security_deposit(10_000)
            .set_offer_fee_tx_id("offer-fee")
            .add_arbitrator(NodeAddress::new("arbitrator", 9000))
            .set_offerer_address(NodeAddress::new("offerer", 9001))
            .build()
            .unwrap()
    }

    pub(crate) fn test_party(name: &str) -> TradingParty {
        let account = PaymentAccount {
            id: format!("{name}-account"),
            method: "SEPA".into(),
            holder: name.into(),
        };
        TradingParty::new(account, name.as_bytes().to_vec(), &format!("{name}-payout"))
    }

    fn tx(tag: &str) -> Transaction {
        Transaction::new(tag.as_bytes().to_vec())
    }

    #[test]
    fn phase_is_monotone_in_state() {
        let phases: Vec<Phase> = TradeState::ALL.iter().map(|s| s.phase()).collect();
        assert!(phases.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn all_states_are_in_ordinal_order() {
        assert!(TradeState::ALL.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn roles_follow_offer_direction() {
        assert_eq!(Role::for_offerer(Direction::Buy), Role::BuyerAsOfferer);
        assert_eq!(Role::for_taker(Direction::Buy), Role::SellerAsTaker);
        assert_eq!(Role::for_offerer(Direction::Sell), Role::SellerAsOfferer);
        assert_eq!(Role::for_taker(Direction::Sell), Role::BuyerAsTaker);
    }

    #[test]
    fn state_never_moves_backwards() {
        let mut trade = Trade::new_offerer(test_offer(Direction::Buy), test_party("alice"));
        trade.set_state(TradeState::DepositSeenInNetwork).unwrap();

        let err = trade.set_state(TradeState::TakeOfferRequested).unwrap_err();
        assert!(matches!(err, TradeError::StateRegression { .. }));
        assert_eq!(trade.state(), TradeState::DepositSeenInNetwork);

        // re-entering the same state is allowed
        trade.set_state(TradeState::DepositSeenInNetwork).unwrap();
    }

    #[test]
    fn terminal_states_are_final() {
        let mut trade = Trade::new_offerer(test_offer(Direction::Buy), test_party("alice"));
        trade.set_state(TradeState::Fault).unwrap();

        assert!(trade.set_state(TradeState::PayoutBroadcasted).is_err());
        assert!(trade.set_state(TradeState::Disputed).is_err());
        assert_eq!(trade.state(), TradeState::Fault);
    }

    #[test]
    fn payout_requires_deposit() {
        let mut trade = Trade::new_offerer(test_offer(Direction::Buy), test_party("alice"));

        assert_eq!(
            trade.set_payout_tx(tx("payout")),
            Err(TradeError::PayoutWithoutDeposit)
        );
        trade.set_deposit_tx(tx("deposit")).unwrap();
        trade.set_payout_tx(tx("payout")).unwrap();
        assert!(trade.payout_tx().is_some());
    }

    #[test]
    fn artifacts_are_set_once() {
        let mut trade = Trade::new_offerer(test_offer(Direction::Buy), test_party("alice"));
        trade.set_deposit_tx(tx("deposit")).unwrap();

        // same artifact again is accepted, a different one is not
        trade.set_deposit_tx(tx("deposit")).unwrap();
        assert!(trade.set_deposit_tx(tx("other")).is_err());
        assert_eq!(trade.deposit_tx(), Some(&tx("deposit")));
    }

    #[test]
    fn taker_amount_must_be_within_offer() {
        let offer = test_offer(Direction::Sell);
        assert!(Trade::new_taker(offer.clone(), 10, test_party("bob")).is_err());
        assert!(Trade::new_taker(offer.clone(), 200_000, test_party("bob")).is_err());

        let trade = Trade::new_taker(offer, 60_000, test_party("bob")).unwrap();
        assert_eq!(trade.role(), Role::BuyerAsTaker);
        assert_eq!(trade.peer_address(), Some(&NodeAddress::new("offerer", 9001)));
    }

    #[test]
    fn trade_cbor_roundtrip() {
        let mut trade = Trade::new_offerer(test_offer(Direction::Buy), test_party("alice"));
        trade.set_deposit_tx(tx("deposit")).unwrap();
        trade.set_state(TradeState::OffererReceivedDepositTxPublishedMsg).unwrap();

        let encoded = minicbor::to_vec(&trade).unwrap();
        let decoded: Trade = minicbor::decode(&encoded).unwrap();

        assert_eq!(trade, decoded);
    }

    proptest! {
        /// Whatever sequence of transitions is attempted, the ordinal never
        /// decreases except by entering a terminal state.
        #[test]
        fn prop_state_is_monotone(indices in prop::collection::vec(0usize..TradeState::ALL.len(), 1..40)) {
            let mut trade = Trade::new_offerer(test_offer(Direction::Buy), test_party("alice"));
            let mut previous = trade.state();

            for i in indices {
                let _ = trade.set_state(TradeState::ALL[i]);
                let current = trade.state();

                if previous.is_terminal() {
                    prop_assert_eq!(current, previous);
                } else if !current.is_terminal() {
                    prop_assert!(current >= previous);
                }
                previous = current;
            }
        }
    }
}
