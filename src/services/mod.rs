pub mod commerce;
pub mod outcome;
pub mod payment_store;
pub mod payments;
pub mod reconciliation;
