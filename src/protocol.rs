//! The per-trade protocol engine
//!
//! A [`TradeProtocol`] owns one trade and its process model. Every entry point
//! (incoming message, user intent, wallet watcher, restart recovery) is turned
//! into a [`Trigger`], looked up in the role's pipeline table and run through a
//! [`TaskRunner`]. Runs are serialised per trade by a single async mutex, so a
//! pipeline always sees the trade as the previous pipeline left it.

use super::config::ProtocolConfig;
use super::context::{ProcessModel, TaskContext};
use super::error::{FaultReason, ProtocolError, ValidationError};
use super::message::TradeMessage;
use super::pipeline::{self, Completion, TimeoutAction, Trigger};
use super::resume::recovery_action;
use super::runner::{RunReport, TaskRunner};
use super::services::Services;
use super::trade::{NodeAddress, Phase, Role, Trade, TradeState, Transaction};
use std::sync::{Arc, Weak};
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Result of a dispatch that was not refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Completed(RunReport),
    /// Nothing ran: a duplicate, or a message this role does not handle.
    Ignored,
}

/// Published to subscribers once the trade has been persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolEvent {
    PipelineCompleted {
        trade_id: String,
        pipeline: &'static str,
    },
    Faulted {
        trade_id: String,
        reason: String,
    },
    TradeCompleted {
        trade_id: String,
    },
}

struct Timer {
    id: u64,
    handle: JoinHandle<()>,
}

struct ProtocolState {
    trade: Trade,
    process: ProcessModel,
    timer: Option<Timer>,
    next_timer_id: u64,
}

impl ProtocolState {
    fn stop_timeout(&mut self) {
        if let Some(timer) = self.timer.take() {
            debug!(trade_id = %self.trade.id(), timer = timer.id, "timeout stopped");
            timer.handle.abort();
        }
    }
}

struct Inner {
    trade_id: String,
    role: Role,
    services: Services,
    config: ProtocolConfig,
    state: Mutex<ProtocolState>,
    events: broadcast::Sender<ProtocolEvent>,
}

impl Inner {
    fn persist(&self, trade: &Trade) -> Result<(), ProtocolError> {
        self.services
            .store
            .save(trade)
            .map_err(ProtocolError::Persistence)
    }

    fn emit(&self, event: ProtocolEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    /// Runs on the timer task. Only the timer that is still armed may fault
    /// the trade; a stopped or replaced timer finds a different id and leaves.
    async fn on_timeout(&self, timer_id: u64) {
        let mut st = self.state.lock().await;
        match &st.timer {
            Some(timer) if timer.id == timer_id => {}
            _ => return,
        }
        st.timer = None;
        if st.trade.state().is_terminal() {
            return;
        }

        let reason = FaultReason::Timeout(self.config.timeout);
        error!(trade_id = %self.trade_id, state = ?st.trade.state(), "{reason}");
        st.trade.set_error_message(reason.to_string());
        if let Err(e) = st.trade.set_state(TradeState::Fault) {
            error!(trade_id = %self.trade_id, error = %e, "failed to mark trade as faulted");
        }
        if let Err(e) = self.persist(&st.trade) {
            error!(trade_id = %self.trade_id, error = %e, "failed to persist faulted trade");
        }
        self.emit(ProtocolEvent::Faulted {
            trade_id: self.trade_id.clone(),
            reason: reason.to_string(),
        });
    }
}

/// Handle to the protocol of one trade. Clones share the same instance.
#[derive(Clone)]
pub struct TradeProtocol {
    inner: Arc<Inner>,
}

impl TradeProtocol {
    /// Binds a protocol to `trade`. Nothing runs until an entry point is called.
    pub fn new(trade: Trade, services: Services, config: ProtocolConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let inner = Inner {
            trade_id: trade.id().to_string(),
            role: trade.role(),
            services,
            config,
            state: Mutex::new(ProtocolState {
                process: ProcessModel::default(),
                trade,
                timer: None,
                next_timer_id: 0,
            }),
            events,
        };

        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn trade_id(&self) -> &str {
        &self.inner.trade_id
    }
    pub fn role(&self) -> Role {
        self.inner.role
    }
    pub fn subscribe(&self) -> broadcast::Receiver<ProtocolEvent> {
        self.inner.events.subscribe()
    }
    /// Snapshot of the trade as the last pipeline left it.
    pub async fn trade(&self) -> Trade {
        self.inner.state.lock().await.trade.clone()
    }
    pub async fn state(&self) -> TradeState {
        self.inner.state.lock().await.trade.state()
    }
    pub async fn phase(&self) -> Phase {
        self.inner.state.lock().await.trade.phase()
    }
    pub async fn is_completed(&self) -> bool {
        self.inner.state.lock().await.process.is_completed()
    }
    pub async fn last_completed_pipeline(&self) -> Option<&'static str> {
        self.inner.state.lock().await.process.last_completed_pipeline
    }

    /// Offerer only. The opening request of a new trade.
    pub async fn handle_take_offer_request(
        &self,
        message: TradeMessage,
        peer: NodeAddress,
    ) -> Result<Outcome, ProtocolError> {
        if !matches!(message, TradeMessage::PayDepositRequest(_)) {
            error!(
                trade_id = %self.inner.trade_id,
                kind = message.kind(),
                "take offer entry point received another message"
            );
            return Err(ValidationError::UnexpectedTakeOfferRequest.into());
        }
        self.dispatch(message.trigger(), Some(message), Some(peer), None)
            .await
    }

    /// A message delivered over a live connection.
    pub async fn handle_decrypted_message(
        &self,
        message: TradeMessage,
        peer: NodeAddress,
    ) -> Result<Outcome, ProtocolError> {
        if matches!(message, TradeMessage::PayDepositRequest(_)) {
            debug!(
                trade_id = %self.inner.trade_id,
                "take offer request is handled by handle_take_offer_request"
            );
            return Ok(Outcome::Ignored);
        }
        self.dispatch(message.trigger(), Some(message), Some(peer), None)
            .await
    }

    /// A message replayed from the mailbox. The protocol may have been built
    /// before the trade was reloaded from the store, so it is rebound to
    /// `trade` before the message is processed.
    pub async fn apply_mailbox_message(
        &self,
        message: TradeMessage,
        peer: NodeAddress,
        trade: Trade,
    ) -> Result<Outcome, ProtocolError> {
        if !message.is_mailbox_message() {
            error!(
                trade_id = %self.inner.trade_id,
                kind = message.kind(),
                "message cannot be delivered through the mailbox"
            );
            return Ok(Outcome::Ignored);
        }
        if message.trade_id() != self.inner.trade_id {
            error!(
                trade_id = %self.inner.trade_id,
                received = message.trade_id(),
                "mailbox message for another trade"
            );
            return Err(ValidationError::TradeIdMismatch {
                expected: self.inner.trade_id.clone(),
                actual: message.trade_id().to_string(),
            }
            .into());
        }
        if trade.id() != self.inner.trade_id {
            error!(
                trade_id = %self.inner.trade_id,
                reloaded = %trade.id(),
                "mailbox replay with a different trade"
            );
            return Err(ValidationError::TradeIdMismatch {
                expected: self.inner.trade_id.clone(),
                actual: trade.id().to_string(),
            }
            .into());
        }
        self.inner.state.lock().await.trade = trade;

        self.dispatch(message.trigger(), Some(message), Some(peer), None)
            .await
    }

    /// Taker only. Starts the handshake with the offerer.
    pub async fn take_available_offer(&self) -> Result<Outcome, ProtocolError> {
        self.dispatch(Trigger::TakeOffer, None, None, None).await
    }

    /// Buyer only. The user reports the fiat transfer as started.
    pub async fn on_fiat_payment_started(&self) -> Result<Outcome, ProtocolError> {
        self.dispatch(Trigger::FiatPaymentStarted, None, None, None)
            .await
    }

    /// Seller only. The user confirms the fiat transfer arrived.
    pub async fn on_fiat_payment_received(&self) -> Result<Outcome, ProtocolError> {
        self.dispatch(Trigger::FiatPaymentReceived, None, None, None)
            .await
    }

    pub async fn open_dispute(&self) -> Result<Outcome, ProtocolError> {
        self.dispatch(Trigger::OpenDispute, None, None, None).await
    }

    /// Wallet callback for a deposit registered through `watch_deposit_tx`.
    pub async fn on_deposit_tx_seen(&self, tx: Transaction) -> Result<Outcome, ProtocolError> {
        self.dispatch(Trigger::DepositTxSeen, None, None, Some(tx))
            .await
    }

    /// Wallet callback for a payout registered through `watch_payout_tx`.
    pub async fn on_payout_tx_seen(&self, tx: Transaction) -> Result<Outcome, ProtocolError> {
        self.dispatch(Trigger::PayoutTxSeen, None, None, Some(tx))
            .await
    }

    /// Finishes whatever a restart interrupted. A no-op for trades that owe
    /// nothing.
    pub async fn resume(&self) -> Result<Outcome, ProtocolError> {
        let action = {
            let st = self.inner.state.lock().await;
            recovery_action(&st.trade)
        };
        match action {
            Some(action) => {
                info!(trade_id = %self.inner.trade_id, ?action, "resuming trade");
                self.dispatch(Trigger::Recovery(action), None, None, None)
                    .await
            }
            None => {
                debug!(trade_id = %self.inner.trade_id, "nothing to resume");
                Ok(Outcome::Ignored)
            }
        }
    }

    fn start_timeout(&self, st: &mut ProtocolState) {
        st.stop_timeout();
        st.next_timer_id += 1;
        let id = st.next_timer_id;
        let timeout = self.inner.config.timeout;
        let inner: Weak<Inner> = Arc::downgrade(&self.inner);

        let handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(inner) = inner.upgrade() {
                inner.on_timeout(id).await;
            }
        });
        debug!(trade_id = %st.trade.id(), timer = id, ?timeout, "timeout started");
        st.timer = Some(Timer { id, handle });
    }

    async fn dispatch(
        &self,
        trigger: Trigger,
        message: Option<TradeMessage>,
        peer: Option<NodeAddress>,
        observed: Option<Transaction>,
    ) -> Result<Outcome, ProtocolError> {
        let inner = &self.inner;
        if let Some(message) = &message {
            if message.trade_id() != inner.trade_id {
                error!(
                    trade_id = %inner.trade_id,
                    received = message.trade_id(),
                    kind = message.kind(),
                    "message belongs to another trade"
                );
                return Err(ValidationError::TradeIdMismatch {
                    expected: inner.trade_id.clone(),
                    actual: message.trade_id().to_string(),
                }
                .into());
            }
        }

        let mut guard = inner.state.lock().await;
        let st = &mut *guard;
        let state = st.trade.state();
        if state.is_terminal() {
            error!(trade_id = %inner.trade_id, ?state, ?trigger, "trade is closed");
            return Err(ValidationError::TradeClosed {
                trade_id: inner.trade_id.clone(),
                state,
            }
            .into());
        }

        let Some(pipeline) = pipeline::lookup(inner.role, trigger) else {
            if trigger.is_user_intent() {
                return Err(ProtocolError::UnsupportedForRole {
                    role: inner.role,
                    trigger,
                });
            }
            error!(trade_id = %inner.trade_id, role = ?inner.role, ?trigger, "unsupported trigger for role");
            return Ok(Outcome::Ignored);
        };

        if pipeline.timeout == TimeoutAction::Stop {
            st.stop_timeout();
        }
        if let Some(required) = pipeline.requires {
            if state < required {
                error!(
                    trade_id = %inner.trade_id,
                    pipeline = pipeline.name,
                    ?state,
                    ?required,
                    "trade is not ready"
                );
                return Err(ValidationError::NotReady {
                    required,
                    current: state,
                }
                .into());
            }
        }
        if let Some(skip_from) = pipeline.skip_from {
            if state >= skip_from {
                warn!(
                    trade_id = %inner.trade_id,
                    pipeline = pipeline.name,
                    ?state,
                    "duplicate trigger, already handled"
                );
                return Ok(Outcome::Ignored);
            }
        }

        st.process.prepare(message, peer);
        st.process.observed_tx = observed;
        if let Some(marker) = pipeline.marker {
            if state >= marker {
                warn!(trade_id = %inner.trade_id, pipeline = pipeline.name, "re-running interrupted pipeline");
            } else {
                st.trade.set_state(marker)?;
            }
            inner.persist(&st.trade)?;
        }
        if pipeline.timeout == TimeoutAction::Start {
            self.start_timeout(st);
        }

        let runner = TaskRunner::new(pipeline.name)
            .add_tasks(pipeline.tasks.iter().map(|kind| kind.task()));
        let result = {
            let mut cx = TaskContext::new(&mut st.trade, &mut st.process, &inner.services);
            runner.run(&mut cx).await
        };

        match result {
            Ok(report) => {
                st.process.last_completed_pipeline = Some(pipeline.name);
                info!(
                    trade_id = %inner.trade_id,
                    pipeline = pipeline.name,
                    state = ?st.trade.state(),
                    "pipeline completed"
                );
                if pipeline.completion != Completion::Pending {
                    st.process.on_complete();
                    st.stop_timeout();
                }
                inner.persist(&st.trade)?;

                inner.emit(ProtocolEvent::PipelineCompleted {
                    trade_id: inner.trade_id.clone(),
                    pipeline: pipeline.name,
                });
                if pipeline.completion == Completion::Finished {
                    inner.emit(ProtocolEvent::TradeCompleted {
                        trade_id: inner.trade_id.clone(),
                    });
                }
                Ok(Outcome::Completed(report))
            }
            Err(reason) => {
                error!(
                    trade_id = %inner.trade_id,
                    pipeline = pipeline.name,
                    error = %reason,
                    "pipeline faulted"
                );
                st.trade.set_error_message(reason.to_string());
                st.stop_timeout();
                if let Err(e) = inner.persist(&st.trade) {
                    error!(trade_id = %inner.trade_id, error = %e, "failed to persist faulted trade");
                }

                inner.emit(ProtocolEvent::Faulted {
                    trade_id: inner.trade_id.clone(),
                    reason: reason.to_string(),
                });
                Err(reason.into())
            }
        }
    }
}
