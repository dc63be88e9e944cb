//! Registry of live protocols and the routing of incoming envelopes
use super::config::ProtocolConfig;
use super::error::{ProtocolError, ValidationError};
use super::message::{Envelope, TradeMessage};
use super::protocol::{Outcome, TradeProtocol};
use super::services::Services;
use super::trade::Trade;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{error, info};

pub struct TradeManager {
    services: Services,
    config: ProtocolConfig,
    protocols: RwLock<HashMap<String, TradeProtocol>>,
}

impl TradeManager {
    pub fn new(services: Services, config: ProtocolConfig) -> Self {
        Self {
            services,
            config,
            protocols: RwLock::new(HashMap::new()),
        }
    }

    /// Persists a newly created trade and starts a protocol for it.
    pub async fn register(&self, trade: Trade) -> Result<TradeProtocol, ProtocolError> {
        self.services
            .store
            .save(&trade)
            .map_err(ProtocolError::Persistence)?;
        let protocol = self.build(trade);
        self.protocols
            .write()
            .await
            .insert(protocol.trade_id().to_string(), protocol.clone());
        Ok(protocol)
    }

    pub async fn protocol(&self, trade_id: &str) -> Option<TradeProtocol> {
        self.protocols.read().await.get(trade_id).cloned()
    }

    pub async fn remove(&self, trade_id: &str) -> Option<TradeProtocol> {
        self.protocols.write().await.remove(trade_id)
    }

    /// Routes a decrypted envelope to the protocol of its trade.
    pub async fn on_envelope(&self, envelope: Envelope) -> Result<Outcome, ProtocolError> {
        match envelope {
            Envelope::Direct { message, sender } => {
                let protocol = self
                    .protocol(message.trade_id())
                    .await
                    .ok_or_else(|| ValidationError::UnknownTrade(message.trade_id().to_string()))?;
                match message {
                    TradeMessage::PayDepositRequest(_) => {
                        protocol.handle_take_offer_request(message, sender).await
                    }
                    _ => protocol.handle_decrypted_message(message, sender).await,
                }
            }
            Envelope::Mailbox { message, sender } => {
                // the store holds the latest trade, the registry may not
                let trade = self
                    .services
                    .store
                    .load(message.trade_id())
                    .map_err(ProtocolError::Persistence)?
                    .ok_or_else(|| ValidationError::UnknownTrade(message.trade_id().to_string()))?;
                let protocol = match self.protocol(trade.id()).await {
                    Some(protocol) => protocol,
                    None => {
                        let protocol = self.build(trade.clone());
                        self.protocols
                            .write()
                            .await
                            .insert(protocol.trade_id().to_string(), protocol.clone());
                        protocol
                    }
                };
                protocol.apply_mailbox_message(message, sender, trade).await
            }
        }
    }

    /// Startup path: binds a protocol to every open trade in the store and
    /// lets each finish what the shutdown interrupted. Returns the number of
    /// trades restored.
    pub async fn restore_all(&self) -> Result<usize, ProtocolError> {
        let trades = self
            .services
            .store
            .load_all()
            .map_err(ProtocolError::Persistence)?;

        let mut restored = 0;
        for trade in trades.into_iter().filter(|t| !t.state().is_terminal()) {
            let protocol = self.build(trade);
            self.protocols
                .write()
                .await
                .insert(protocol.trade_id().to_string(), protocol.clone());
            restored += 1;

            // one failing trade must not keep the others from resuming
            if let Err(e) = protocol.resume().await {
                error!(trade_id = %protocol.trade_id(), error = %e, "failed to resume trade");
            }
        }
        info!(restored, "restored open trades");
        Ok(restored)
    }

    fn build(&self, trade: Trade) -> TradeProtocol {
        TradeProtocol::new(trade, self.services.clone(), self.config.clone())
    }
}
