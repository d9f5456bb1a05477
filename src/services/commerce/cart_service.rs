use crate::{
    entities::commerce::{
        cart, cart_item, Cart, CartItem, CartItemModel, CartModel, CartStatus, ProductVariant,
    },
    errors::ServiceError,
    services::commerce::CartStateMachine,
};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
    SqlErr,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

/// Minimal cart management: enough to give every owner one editable cart.
#[derive(Clone)]
pub struct CartService {
    db: Arc<DatabaseConnection>,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct AddItemInput {
    pub variant_id: Uuid,
    #[validate(range(min = 1, max = 1000, message = "Quantity must be between 1 and 1000"))]
    pub quantity: i32,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CartView {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub status: CartStatus,
    pub items: Vec<CartItemView>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CartItemView {
    pub id: Uuid,
    pub variant_id: Uuid,
    pub quantity: i32,
}

impl CartView {
    fn from_models(cart: CartModel, items: Vec<CartItemModel>) -> Self {
        Self {
            id: cart.id,
            owner_id: cart.owner_id,
            status: cart.status,
            items: items
                .into_iter()
                .map(|i| CartItemView {
                    id: i.id,
                    variant_id: i.variant_id,
                    quantity: i.quantity,
                })
                .collect(),
        }
    }
}

impl CartService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn find_active_cart(&self, owner_id: Uuid) -> Result<Option<CartModel>, ServiceError> {
        Ok(Cart::find()
            .filter(cart::Column::OwnerId.eq(owner_id))
            .filter(cart::Column::Status.eq(CartStatus::Active))
            .one(&*self.db)
            .await?)
    }

    /// Returns the owner's active cart, creating it when none exists.
    #[instrument(skip(self))]
    pub async fn get_or_create_active_cart(&self, owner_id: Uuid) -> Result<CartModel, ServiceError> {
        if let Some(existing) = self.find_active_cart(owner_id).await? {
            return Ok(existing);
        }

        let now = Utc::now();
        let insert = cart::ActiveModel {
            id: Set(Uuid::new_v4()),
            owner_id: Set(owner_id),
            status: Set(CartStatus::Active),
            order_id: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await;

        match insert {
            Ok(cart) => {
                info!(cart_id = %cart.id, %owner_id, "created cart");
                Ok(cart)
            }
            // Lost a race against a concurrent create: the one-active-cart index fired.
            Err(err) if matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
                debug!(%owner_id, "concurrent cart creation, reusing winner");
                self.find_active_cart(owner_id)
                    .await?
                    .ok_or_else(|| ServiceError::Conflict("active cart changed concurrently".into()))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Adds `quantity` of a variant to the owner's active cart.
    #[instrument(skip(self))]
    pub async fn add_item(&self, owner_id: Uuid, input: AddItemInput) -> Result<CartView, ServiceError> {
        input.validate()?;

        let variant = ProductVariant::find_by_id(input.variant_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("variant {}", input.variant_id)))?;
        if !variant.is_active {
            return Err(ServiceError::ValidationError(format!(
                "variant {} is not available",
                variant.id
            )));
        }

        let cart = self.get_or_create_active_cart(owner_id).await?;
        if cart.status != CartStatus::Active {
            return Err(ServiceError::CartNotActive(cart.id));
        }

        let existing = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .filter(cart_item::Column::VariantId.eq(variant.id))
            .one(&*self.db)
            .await?;

        let now = Utc::now();
        match existing {
            Some(item) => {
                let quantity = item.quantity.saturating_add(input.quantity);
                let mut item: cart_item::ActiveModel = item.into();
                item.quantity = Set(quantity);
                item.updated_at = Set(now);
                item.update(&*self.db).await?;
            }
            None => {
                cart_item::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    cart_id: Set(cart.id),
                    variant_id: Set(variant.id),
                    quantity: Set(input.quantity),
                    created_at: Set(now),
                    updated_at: Set(now),
                }
                .insert(&*self.db)
                .await?;
            }
        }

        self.view(cart).await
    }

    /// Gives up the owner's active cart. The next add starts a fresh one.
    #[instrument(skip(self))]
    pub async fn abandon_cart(&self, owner_id: Uuid) -> Result<CartView, ServiceError> {
        let mut cart = self
            .find_active_cart(owner_id)
            .await?
            .ok_or(ServiceError::NoActiveCart(owner_id))?;

        if !CartStateMachine::abandon(&*self.db, cart.id).await? {
            return Err(ServiceError::CartNotActive(cart.id));
        }
        info!(cart_id = %cart.id, %owner_id, "cart abandoned");

        cart.status = CartStatus::Abandoned;
        self.view(cart).await
    }

    /// The owner's active cart with its lines, creating an empty one if needed.
    pub async fn get_cart(&self, owner_id: Uuid) -> Result<CartView, ServiceError> {
        let cart = self.get_or_create_active_cart(owner_id).await?;
        self.view(cart).await
    }

    async fn view(&self, cart: CartModel) -> Result<CartView, ServiceError> {
        let items = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .order_by_asc(cart_item::Column::CreatedAt)
            .all(&*self.db)
            .await?;
        Ok(CartView::from_models(cart, items))
    }
}
