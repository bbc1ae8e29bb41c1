//! Broker Gateway - the capability boundary the engine calls into
//!
//! Session management, market-data transport and order transmission all live
//! behind this trait. The engine treats every call as blocking with unbounded
//! latency, so callers wrap them with [`with_timeout`].

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::future::Future;
use std::time::Duration;

use crate::types::{
    Candle, CloseRequest, OrderOutcome, OrderRequest, Position, Quote, SymbolConstraints,
    TimeFrame,
};

/// Failures reported by a broker gateway
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GatewayError {
    #[error("{0} unavailable")]
    Unavailable(String),

    #[error("Gateway call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Transport failure: {0}")]
    Transport(String),
}

/// Result type for gateway calls
pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

/// Broker operations consumed by the entry and exit loops
#[async_trait]
pub trait BrokerGateway: Send + Sync {
    /// Most recent `count` candles, oldest first. The last one may still be forming.
    async fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: TimeFrame,
        count: usize,
    ) -> GatewayResult<Vec<Candle>>;

    /// Current account balance
    async fn fetch_account_balance(&self) -> GatewayResult<Decimal>;

    /// Volume grid and price precision for a symbol
    async fn fetch_symbol_constraints(&self, symbol: &str) -> GatewayResult<SymbolConstraints>;

    /// All open positions on the account
    async fn fetch_open_positions(&self) -> GatewayResult<Vec<Position>>;

    /// Latest bid/ask with the broker's server time
    async fn fetch_quote(&self, symbol: &str) -> GatewayResult<Quote>;

    /// Send a market order
    async fn submit_order(&self, request: &OrderRequest) -> GatewayResult<OrderOutcome>;

    /// Close an existing position
    async fn submit_close(&self, request: &CloseRequest) -> GatewayResult<OrderOutcome>;
}

/// Bound a gateway call by `limit`, mapping expiry to [`GatewayError::Timeout`].
pub async fn with_timeout<T, F>(limit: Duration, call: F) -> GatewayResult<T>
where
    F: Future<Output = GatewayResult<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(GatewayError::Timeout(limit)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_with_timeout_passes_result_through() {
        let result = with_timeout(Duration::from_millis(50), async { Ok::<_, GatewayError>(5) }).await;
        assert_eq!(result, Ok(5));
    }

    #[tokio::test]
    async fn test_with_timeout_expires() {
        let result: GatewayResult<()> = with_timeout(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert_eq!(result, Err(GatewayError::Timeout(Duration::from_millis(10))));
    }
}
