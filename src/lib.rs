pub mod config;
pub mod context;
pub mod error;
pub mod manager;
pub mod message;
pub mod pipeline;
pub mod protocol;
pub mod resume;
pub mod runner;
pub mod services;
pub mod store;
pub mod task;
pub mod tasks;
pub mod trade;
pub mod utils;

pub use config::ProtocolConfig;
pub use error::{FaultReason, ProtocolError, TaskError, TradeError, ValidationError};
pub use manager::TradeManager;
pub use message::{Envelope, TradeMessage};
pub use protocol::{Outcome, ProtocolEvent, TradeProtocol};
pub use services::{Messenger, Services, StatisticsSink, TradeStore, TradeWallet};
pub use trade::{Offer, OfferDetails, Phase, Role, Trade, TradeState, TradingParty};
