pub mod commerce;
pub mod order;
pub mod order_item;
pub mod payment_attempt;
pub mod payment_log;

pub use order::{
    Entity as Order, FulfillmentStatus, Model as OrderModel, PaymentMethod, PaymentStatus,
};
pub use order_item::{Entity as OrderItem, Model as OrderItemModel};
pub use payment_attempt::{AttemptStatus, Entity as PaymentAttempt, Model as PaymentAttemptModel, Provider};
pub use payment_log::{Entity as PaymentLog, Model as PaymentLogModel, PaymentLogEvent};
