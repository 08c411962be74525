//! FIFO batch costing.
//!
//! Prices a quantity against the oldest unconsumed batches of a
//! (product, warehouse), skipping units already promised to earlier
//! reservations. Previously booked stock is assumed to consume the oldest
//! inventory first, so a new reservation prices from the next-oldest
//! available unit onward.

use rust_decimal::Decimal;

use crate::entities::stock_batch;

/// Result of pricing a quantity against FIFO batches.
#[derive(Debug, Clone, PartialEq)]
pub struct PricedQuantity {
    /// Weighted-average unit cost over the priced quantity.
    pub unit_cost: Decimal,
    /// Quantity actually priced. Equals the requested quantity unless the
    /// batches ran out and no fallback cost existed at all.
    pub quantity_priced: Decimal,
    /// Portion priced at the last batch's cost because batches ran out
    /// before covering the request. Non-zero values are a data-quality
    /// signal: the physical ledger disagrees with the logical counters.
    pub shortfall: Decimal,
}

/// Walks `batches` in arrival order and prices `qty` units, skipping
/// `already_booked` units from the oldest batch forward.
///
/// Callers pass batches as returned by `stock_ledger::list_batches`
/// (oldest arrival first, fully consumed rows excluded).
pub fn price_quantity(
    batches: &[stock_batch::Model],
    already_booked: Decimal,
    qty: Decimal,
) -> PricedQuantity {
    if qty <= Decimal::ZERO {
        return PricedQuantity {
            unit_cost: Decimal::ZERO,
            quantity_priced: Decimal::ZERO,
            shortfall: Decimal::ZERO,
        };
    }

    let mut skip = already_booked.max(Decimal::ZERO);
    let mut remaining = qty;
    let mut total_cost = Decimal::ZERO;
    let mut last_cost: Option<Decimal> = None;

    for batch in batches {
        last_cost = Some(batch.unit_cost);
        if skip >= batch.residual_qty {
            skip -= batch.residual_qty;
            continue;
        }
        let take = remaining.min(batch.residual_qty - skip);
        skip = Decimal::ZERO;
        total_cost += take * batch.unit_cost;
        remaining -= take;
        if remaining <= Decimal::ZERO {
            break;
        }
    }

    if remaining <= Decimal::ZERO {
        return PricedQuantity {
            unit_cost: total_cost / qty,
            quantity_priced: qty,
            shortfall: Decimal::ZERO,
        };
    }

    // Batches exhausted. Price the shortfall at the last known batch cost as
    // a degraded fallback; the caller flags this for observability.
    match last_cost {
        Some(cost) => PricedQuantity {
            unit_cost: (total_cost + remaining * cost) / qty,
            quantity_priced: qty,
            shortfall: remaining,
        },
        None => PricedQuantity {
            unit_cost: Decimal::ZERO,
            quantity_priced: Decimal::ZERO,
            shortfall: remaining,
        },
    }
}
