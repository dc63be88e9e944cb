//! Sled backed persistence for trades
use super::services::TradeStore;
use super::trade::Trade;
use std::sync::Arc;

pub struct SledTradeStore {
    instance: Arc<sled::Db>,
}

impl SledTradeStore {
    pub fn new(instance: Arc<sled::Db>) -> Self {
        Self { instance }
    }
}

impl TradeStore for SledTradeStore {
    /// Trades are keyed by id and stored as CBOR
    fn load(&self, trade_id: &str) -> anyhow::Result<Option<Trade>> {
        match self.instance.get(trade_id.as_bytes())? {
            Some(bytes) => {
                let trade: Trade = minicbor::decode(bytes.as_ref())?;
                Ok(Some(trade))
            }
            None => Ok(None),
        }
    }

    fn save(&self, trade: &Trade) -> anyhow::Result<()> {
        let cbor = minicbor::to_vec(trade)?;
        self.instance.insert(trade.id().as_bytes(), cbor)?;
        self.instance.flush()?;
        Ok(())
    }

    fn load_all(&self) -> anyhow::Result<Vec<Trade>> {
        let mut trades = vec![];
        for entry in self.instance.iter() {
            let (_, bytes) = entry?;
            trades.push(minicbor::decode(bytes.as_ref())?);
        }
        Ok(trades)
    }
}
