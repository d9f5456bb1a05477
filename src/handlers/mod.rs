//! HTTP handlers. Thin: extract, call one service, wrap the result.
pub mod cart;
pub mod checkout;
pub mod health;
pub mod orders;
pub mod payment_returns;
pub mod payments;
