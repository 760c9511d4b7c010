use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use thiserror::Error;

use crate::trade::intent::{LegOrder, OrderFill};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum GatewayError {
    #[error("unknown symbol: {0}")]
    UnknownSymbol(String),

    #[error("invalid price {price} for {symbol}")]
    InvalidPrice { symbol: String, price: Decimal },

    #[error("invalid quantity {qty} for {symbol}")]
    InvalidQuantity { symbol: String, qty: Decimal },

    #[error("insufficient cash: need {needed}, have {available}")]
    InsufficientCash { needed: Decimal, available: Decimal },
}

/// Cash and marked-to-market holdings at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PortfolioSnapshot {
    pub cash: Decimal,
    pub value: Decimal,
    pub positions: HashMap<String, Decimal>,
}

impl PortfolioSnapshot {
    pub fn value_f64(&self) -> f64 {
        self.value.to_f64().unwrap_or(0.0)
    }

    pub fn cash_f64(&self) -> f64 {
        self.cash.to_f64().unwrap_or(0.0)
    }

    pub fn position(&self, symbol: &str) -> Decimal {
        self.positions.get(symbol).copied().unwrap_or(Decimal::ZERO)
    }
}

/// Order routing and ledger access used by the run loop.
#[async_trait]
pub trait ExecutionGateway: Send + Sync {
    /// Executes one leg against `reference_price` and returns the fill.
    async fn submit(
        &self,
        order: &LegOrder,
        reference_price: Decimal,
        ts: i64,
    ) -> Result<OrderFill, GatewayError>;

    /// Marks holdings to `prices`.
    async fn portfolio(
        &self,
        prices: &HashMap<String, Decimal>,
    ) -> Result<PortfolioSnapshot, GatewayError>;
}
