/// Cart lifecycle, pricing and checkout
pub mod cart_service;
pub mod cart_state;
pub mod checkout_service;
pub mod pricing_service;

pub use cart_service::{AddItemInput, CartService, CartView};
pub use cart_state::CartStateMachine;
pub use checkout_service::{CheckoutInput, CheckoutResult, CheckoutService, ShippingInfo};
