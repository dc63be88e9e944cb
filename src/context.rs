//! Per-trade scratch state shared by the tasks of one pipeline run
use super::error::TaskError;
use super::message::TradeMessage;
use super::services::Services;
use super::trade::{NodeAddress, Trade, Transaction};

/// The process context. Owned by exactly one protocol instance and recreated
/// whenever a protocol is constructed, so nothing in here survives a restart.
#[derive(Debug, Default)]
pub struct ProcessModel {
    pub pending_message: Option<TradeMessage>,
    pub peer_address: Option<NodeAddress>,
    // set by a wallet watcher callback instead of a message
    pub observed_tx: Option<Transaction>,
    pub prepared_deposit_tx: Option<Transaction>,
    pub offer_fee_tx: Option<Transaction>,
    pub payout_signature: Option<Vec<u8>>,
    // a watcher registered by this process, so it is not registered twice
    pub deposit_listener_active: bool,
    pub payout_listener_active: bool,
    pub last_completed_pipeline: Option<&'static str>,
    completed: bool,
}

impl ProcessModel {
    /// Marks the trade's active work as done. Set once, never cleared.
    pub fn on_complete(&mut self) {
        self.completed = true;
    }
    pub fn is_completed(&self) -> bool {
        self.completed
    }
    /// Clears the inputs of the previous run before the next one starts.
    pub(crate) fn prepare(&mut self, message: Option<TradeMessage>, peer: Option<NodeAddress>) {
        self.pending_message = message;
        self.observed_tx = None;
        if peer.is_some() {
            self.peer_address = peer;
        }
    }
}

/// Everything a task may touch: the trade, the process model and the collaborators.
pub struct TaskContext<'a> {
    pub trade: &'a mut Trade,
    pub process: &'a mut ProcessModel,
    pub services: &'a Services,
}

impl<'a> TaskContext<'a> {
    pub fn new(trade: &'a mut Trade, process: &'a mut ProcessModel, services: &'a Services) -> Self {
        Self {
            trade,
            process,
            services,
        }
    }
    pub fn message(&self) -> Result<&TradeMessage, TaskError> {
        self.process
            .pending_message
            .as_ref()
            .ok_or(TaskError::MissingMessage)
    }
    /// The sender of the message being processed, else the address stored on the trade.
    pub fn peer_address(&self) -> Result<NodeAddress, TaskError> {
        self.process
            .peer_address
            .clone()
            .or_else(|| self.trade.peer_address().cloned())
            .ok_or(TaskError::MissingData("peer address"))
    }
}
