use crate::pipeline::Trigger;
use crate::trade::{Role, TradeState};
use std::time::Duration;

/// Violations of the trade aggregate's own invariants.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TradeError {
    #[error("Trade state cannot move back from {current:?} to {requested:?}")]
    StateRegression {
        current: TradeState,
        requested: TradeState,
    },
    #[error("Trade is closed in state {0:?}")]
    Closed(TradeState),
    #[error("The {0} transaction is already set to {1}")]
    ArtifactAlreadySet(&'static str, String),
    #[error("A payout transaction requires a deposit transaction")]
    PayoutWithoutDeposit,
    #[error("Amount {amount} is outside the offer range {min}..={max}")]
    AmountOutOfRange { amount: u64, min: u64, max: u64 },
    #[error("Trade is missing {0}")]
    MissingField(&'static str),
    #[error("Invalid offer: {0}")]
    InvalidOffer(&'static str),
}

/// A dispatch that was refused before any task ran. The trade is unchanged.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Message for trade {actual} delivered to trade {expected}")]
    TradeIdMismatch { expected: String, actual: String },
    #[error("Trade {trade_id} is closed in state {state:?}")]
    TradeClosed { trade_id: String, state: TradeState },
    #[error("No protocol is registered for trade {0}")]
    UnknownTrade(String),
    #[error("Trade is in state {current:?}, but {required:?} is required")]
    NotReady {
        required: TradeState,
        current: TradeState,
    },
    #[error("Take offer request must be delivered through handle_take_offer_request")]
    UnexpectedTakeOfferRequest,
}

/// Why a single task reported failure.
#[derive(thiserror::Error, Debug)]
pub enum TaskError {
    #[error("No pending message to process")]
    MissingMessage,
    #[error("Expected a {expected} message")]
    UnexpectedMessage { expected: &'static str },
    #[error("Missing {0}")]
    MissingData(&'static str),
    #[error("Verification failed: {0}")]
    Verification(String),
    #[error(transparent)]
    Trade(#[from] TradeError),
    #[error(transparent)]
    Collaborator(#[from] anyhow::Error),
}

/// Terminal failure of a pipeline run.
#[derive(thiserror::Error, Debug)]
pub enum FaultReason {
    #[error("{task} failed during {pipeline}: {error}")]
    TaskFailed {
        pipeline: &'static str,
        task: &'static str,
        error: TaskError,
    },
    #[error("Timeout reached after {0:?} without a response from the peer")]
    Timeout(Duration),
}

#[derive(thiserror::Error, Debug)]
pub enum ProtocolError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Fault(#[from] FaultReason),
    #[error("{trigger:?} is not supported for {role:?}")]
    UnsupportedForRole { role: Role, trigger: Trigger },
    #[error(transparent)]
    Trade(#[from] TradeError),
    #[error("Failed to persist trade: {0:#}")]
    Persistence(anyhow::Error),
}
