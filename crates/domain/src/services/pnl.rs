//! Realized profit and loss.

use crate::models::{Trade, TradeDirection};

/// Realized P/L of a trade, net of fees. `None` while the position is open.
///
/// Multipliers that are zero or negative are treated as 1.
pub fn realized_pnl(trade: &Trade) -> Option<f64> {
    let exit = trade.exit_price?;
    let per_unit = match trade.direction {
        TradeDirection::Long => exit - trade.entry_price,
        TradeDirection::Short => trade.entry_price - exit,
    };
    let multiplier = if trade.contract_multiplier > 0.0 {
        trade.contract_multiplier
    } else {
        1.0
    };
    Some(per_unit * trade.quantity * multiplier - trade.fees)
}

/// Round a monetary value to cents for presentation.
pub fn round_money(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
