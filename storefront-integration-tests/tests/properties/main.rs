//! Property tests for order placement against the in-memory store.

mod order_totals;
mod stock_conservation;
