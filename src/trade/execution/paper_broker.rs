use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::config::PairTradeConfig;
use crate::trade::execution::gateway::{ExecutionGateway, GatewayError, PortfolioSnapshot};
use crate::trade::intent::{LegOrder, OrderFill, OrderSide};

const PRICE_DECIMALS: u32 = 8;
const BPS: Decimal = Decimal::from_parts(10_000, 0, 0, false, 0);

#[derive(Debug, Default)]
struct Ledger {
    cash: Decimal,
    positions: HashMap<String, Decimal>,
    fill_count: u64,
}

/// In-process fill simulator: every leg fills in full at the reference price
/// moved against the taker by `slippage_bps`, with `commission_bps` charged on
/// traded notional.
#[derive(Debug)]
pub struct PaperBroker {
    ledger: Mutex<Ledger>,
    slippage_bps: Decimal,
    commission_bps: Decimal,
    allow_negative_cash: bool,
}

impl PaperBroker {
    pub fn new(initial_cash: Decimal, slippage_bps: Decimal, commission_bps: Decimal) -> Self {
        Self {
            ledger: Mutex::new(Ledger {
                cash: initial_cash,
                ..Ledger::default()
            }),
            slippage_bps,
            commission_bps,
            allow_negative_cash: true,
        }
    }

    pub fn from_config(cfg: &PairTradeConfig) -> Self {
        Self::new(cfg.initial_cash, cfg.slippage_bps, cfg.commission_bps)
    }

    pub fn with_negative_cash(mut self, allow: bool) -> Self {
        self.allow_negative_cash = allow;
        self
    }

    pub async fn fill_count(&self) -> u64 {
        self.ledger.lock().await.fill_count
    }

    fn fill_price(&self, side: OrderSide, reference_price: Decimal) -> Decimal {
        let slip = reference_price * self.slippage_bps / BPS;
        let price = match side {
            OrderSide::Buy => reference_price + slip,
            OrderSide::Sell => reference_price - slip,
        };
        price.round_dp(PRICE_DECIMALS)
    }
}

#[async_trait]
impl ExecutionGateway for PaperBroker {
    async fn submit(
        &self,
        order: &LegOrder,
        reference_price: Decimal,
        ts: i64,
    ) -> Result<OrderFill, GatewayError> {
        if reference_price <= Decimal::ZERO {
            return Err(GatewayError::InvalidPrice {
                symbol: order.symbol.clone(),
                price: reference_price,
            });
        }
        if order.qty <= Decimal::ZERO {
            return Err(GatewayError::InvalidQuantity {
                symbol: order.symbol.clone(),
                qty: order.qty,
            });
        }

        let price = self.fill_price(order.side, reference_price);
        let notional = order.qty * price;
        let commission = (notional * self.commission_bps / BPS).round_dp(PRICE_DECIMALS);
        let cash_delta = -(order.signed_qty() * price) - commission;

        let mut ledger = self.ledger.lock().await;
        let next_cash = ledger.cash + cash_delta;
        if !self.allow_negative_cash && next_cash < Decimal::ZERO {
            return Err(GatewayError::InsufficientCash {
                needed: -cash_delta,
                available: ledger.cash,
            });
        }
        ledger.cash = next_cash;
        let position = ledger
            .positions
            .entry(order.symbol.clone())
            .or_insert(Decimal::ZERO);
        *position += order.signed_qty();
        if position.is_zero() {
            ledger.positions.remove(&order.symbol);
        }
        ledger.fill_count += 1;

        log::info!(
            "[FILL] pair={} symbol={} side={:?} qty={} price={} commission={}",
            order.pair,
            order.symbol,
            order.side,
            order.qty,
            price,
            commission
        );

        Ok(OrderFill {
            pair: order.pair.clone(),
            symbol: order.symbol.clone(),
            side: order.side,
            qty: order.qty,
            price,
            commission,
            opening: order.opening,
            ts,
        })
    }

    async fn portfolio(
        &self,
        prices: &HashMap<String, Decimal>,
    ) -> Result<PortfolioSnapshot, GatewayError> {
        let ledger = self.ledger.lock().await;
        let mut value = ledger.cash;
        for (symbol, qty) in ledger.positions.iter() {
            let price = prices
                .get(symbol)
                .ok_or_else(|| GatewayError::UnknownSymbol(symbol.clone()))?;
            value += *qty * *price;
        }
        Ok(PortfolioSnapshot {
            cash: ledger.cash,
            value,
            positions: ledger.positions.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::PairId;
    use rust_decimal_macros::dec;

    fn leg(symbol: &str, signed: Decimal) -> LegOrder {
        LegOrder::from_signed(&PairId::new("AAA", "BBB"), symbol, signed, true)
    }

    #[tokio::test]
    async fn buy_then_sell_accounts_for_costs() {
        let broker = PaperBroker::new(dec!(10000), dec!(10), dec!(5));
        let fill = broker.submit(&leg("AAA", dec!(10)), dec!(100), 1).await.unwrap();
        assert_eq!(fill.price, dec!(100.1));
        assert_eq!(fill.commission, dec!(0.5005));

        let mut prices = HashMap::new();
        prices.insert("AAA".to_string(), dec!(100));
        let snap = broker.portfolio(&prices).await.unwrap();
        assert_eq!(snap.cash, dec!(10000) - dec!(1001) - dec!(0.5005));
        assert_eq!(snap.position("AAA"), dec!(10));
        assert_eq!(snap.value, snap.cash + dec!(1000));

        let fill = broker.submit(&leg("AAA", dec!(-10)), dec!(100), 2).await.unwrap();
        assert_eq!(fill.price, dec!(99.9));
        let snap = broker.portfolio(&prices).await.unwrap();
        assert!(snap.positions.is_empty());
        assert_eq!(snap.cash, dec!(10000) - dec!(1001) - dec!(0.5005) + dec!(999) - dec!(0.4995));
        assert_eq!(broker.fill_count().await, 2);
    }

    #[tokio::test]
    async fn short_position_is_marked_negative() {
        let broker = PaperBroker::new(dec!(1000), dec!(0), dec!(0));
        broker.submit(&leg("BBB", dec!(-5)), dec!(20), 1).await.unwrap();
        let mut prices = HashMap::new();
        prices.insert("BBB".to_string(), dec!(22));
        let snap = broker.portfolio(&prices).await.unwrap();
        assert_eq!(snap.cash, dec!(1100));
        assert_eq!(snap.value, dec!(990));
    }

    #[tokio::test]
    async fn rejects_invalid_orders() {
        let broker = PaperBroker::new(dec!(1000), dec!(0), dec!(0)).with_negative_cash(false);
        assert!(matches!(
            broker.submit(&leg("AAA", dec!(1)), dec!(0), 1).await,
            Err(GatewayError::InvalidPrice { .. })
        ));
        assert!(matches!(
            broker.submit(&leg("AAA", dec!(0)), dec!(10), 1).await,
            Err(GatewayError::InvalidQuantity { .. })
        ));
        assert!(matches!(
            broker.submit(&leg("AAA", dec!(200)), dec!(10), 1).await,
            Err(GatewayError::InsufficientCash { .. })
        ));
    }

    #[tokio::test]
    async fn portfolio_needs_prices_for_holdings() {
        let broker = PaperBroker::new(dec!(1000), dec!(0), dec!(0));
        broker.submit(&leg("AAA", dec!(1)), dec!(10), 1).await.unwrap();
        let err = broker.portfolio(&HashMap::new()).await.unwrap_err();
        assert_eq!(err, GatewayError::UnknownSymbol("AAA".to_string()));
    }
}
