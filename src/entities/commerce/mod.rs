//! Catalog, promotion and cart entities
pub mod cart;
pub mod cart_item;
pub mod product;
pub mod product_variant;
pub mod promotion_campaign;
pub mod promotion_item;

pub use cart::{CartStatus, Entity as Cart, Model as CartModel};
pub use cart_item::{Entity as CartItem, Model as CartItemModel};
pub use product::{Entity as Product, Model as ProductModel};
pub use product_variant::{Entity as ProductVariant, Model as ProductVariantModel};
pub use promotion_campaign::{Entity as PromotionCampaign, Model as PromotionCampaignModel};
pub use promotion_item::{DiscountType, Entity as PromotionItem, Model as PromotionItemModel};
