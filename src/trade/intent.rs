use rust_decimal::Decimal;
use serde::Serialize;

use crate::signal::{ExitReason, PositionDirection};
use crate::strategy::PairId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// Side that moves a position by `signed_qty`.
    pub fn for_delta(signed_qty: Decimal) -> Self {
        if signed_qty.is_sign_negative() {
            OrderSide::Sell
        } else {
            OrderSide::Buy
        }
    }

    pub fn sign(self) -> Decimal {
        match self {
            OrderSide::Buy => Decimal::ONE,
            OrderSide::Sell => Decimal::NEGATIVE_ONE,
        }
    }
}

/// One leg of a spread order. `qty` is always positive.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LegOrder {
    pub pair: PairId,
    pub symbol: String,
    pub side: OrderSide,
    pub qty: Decimal,
    pub opening: bool,
}

impl LegOrder {
    pub fn from_signed(pair: &PairId, symbol: &str, signed_qty: Decimal, opening: bool) -> Self {
        Self {
            pair: pair.clone(),
            symbol: symbol.to_string(),
            side: OrderSide::for_delta(signed_qty),
            qty: signed_qty.abs(),
            opening,
        }
    }

    pub fn signed_qty(&self) -> Decimal {
        self.qty * self.side.sign()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TradeIntent {
    Open {
        pair: PairId,
        direction: PositionDirection,
        legs: [LegOrder; 2],
    },
    Close {
        pair: PairId,
        reason: ExitReason,
        legs: [LegOrder; 2],
    },
}

impl TradeIntent {
    pub fn pair(&self) -> &PairId {
        match self {
            TradeIntent::Open { pair, .. } | TradeIntent::Close { pair, .. } => pair,
        }
    }

    pub fn legs(&self) -> &[LegOrder; 2] {
        match self {
            TradeIntent::Open { legs, .. } | TradeIntent::Close { legs, .. } => legs,
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, TradeIntent::Open { .. })
    }
}

/// Fill confirmation reported back to the strategy.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderFill {
    pub pair: PairId,
    pub symbol: String,
    pub side: OrderSide,
    pub qty: Decimal,
    pub price: Decimal,
    pub commission: Decimal,
    pub opening: bool,
    pub ts: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn leg_from_signed_quantity() {
        let pair = PairId::new("AAA", "BBB");
        let leg = LegOrder::from_signed(&pair, "BBB", dec!(-2.5), true);
        assert_eq!(leg.side, OrderSide::Sell);
        assert_eq!(leg.qty, dec!(2.5));
        assert_eq!(leg.signed_qty(), dec!(-2.5));
    }
}
