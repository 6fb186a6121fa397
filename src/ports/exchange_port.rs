//! Exchange port trait.

use crate::domain::error::TraderError;
use crate::domain::models::{MarketOrder, MarketOrderFill};

/// Places orders against a market. Failures surface as
/// `TraderError::Exchange` and are never retried by the caller.
pub trait Exchange: Send + Sync {
    fn create_market_order(&self, order: &MarketOrder) -> Result<MarketOrderFill, TraderError>;
}
