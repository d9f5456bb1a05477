//! Cart lifecycle transitions.
//!
//! Legal `(status, order_id)` pairs: `(active, None)`, `(checkout_pending, Some)`,
//! `(converted, None)`, `(abandoned, None)`. Every transition is a conditional
//! `UPDATE ... WHERE status = <expected>` and `rows_affected` decides whether it
//! happened, so concurrent writers can never both win.

use chrono::Utc;
use sea_orm::{ActiveValue::Set, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::entities::commerce::{cart, Cart, CartStatus};
use crate::errors::ServiceError;

/// Result of returning a linked cart to an editable state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Unlocked {
    pub cart_id: Uuid,
    /// The owner already had another active cart, so this one was abandoned.
    pub abandoned: bool,
}

pub struct CartStateMachine;

impl CartStateMachine {
    /// `active -> checkout_pending`, linking the cart to `order_id`.
    pub async fn lock_for_checkout<C: ConnectionTrait>(
        conn: &C,
        cart_id: Uuid,
        order_id: Uuid,
    ) -> Result<(), ServiceError> {
        let result = Cart::update_many()
            .set(cart::ActiveModel {
                status: Set(CartStatus::CheckoutPending),
                order_id: Set(Some(order_id)),
                updated_at: Set(Utc::now()),
                ..Default::default()
            })
            .filter(cart::Column::Id.eq(cart_id))
            .filter(cart::Column::Status.eq(CartStatus::Active))
            .exec(conn)
            .await?;

        if result.rows_affected == 0 {
            return Err(ServiceError::CartNotActive(cart_id));
        }
        debug!(%cart_id, %order_id, "cart locked for checkout");
        Ok(())
    }

    /// `active -> converted` with no payment phase (cash on delivery).
    pub async fn convert_direct<C: ConnectionTrait>(
        conn: &C,
        cart_id: Uuid,
    ) -> Result<(), ServiceError> {
        let result = Cart::update_many()
            .set(cart::ActiveModel {
                status: Set(CartStatus::Converted),
                order_id: Set(None),
                updated_at: Set(Utc::now()),
                ..Default::default()
            })
            .filter(cart::Column::Id.eq(cart_id))
            .filter(cart::Column::Status.eq(CartStatus::Active))
            .exec(conn)
            .await?;

        if result.rows_affected == 0 {
            return Err(ServiceError::CartNotActive(cart_id));
        }
        Ok(())
    }

    /// `checkout_pending -> converted` for the cart still linked to `order_id`,
    /// clearing the link. Returns the converted cart, or `None` when no cart is
    /// linked to this order any more.
    pub async fn convert_linked<C: ConnectionTrait>(
        conn: &C,
        order_id: Uuid,
    ) -> Result<Option<Uuid>, ServiceError> {
        let Some(linked) = Self::linked_cart(conn, order_id).await? else {
            warn!(%order_id, "no checkout_pending cart linked to settled order");
            return Ok(None);
        };

        let result = Cart::update_many()
            .set(cart::ActiveModel {
                status: Set(CartStatus::Converted),
                order_id: Set(None),
                updated_at: Set(Utc::now()),
                ..Default::default()
            })
            .filter(cart::Column::Id.eq(linked.id))
            .filter(cart::Column::Status.eq(CartStatus::CheckoutPending))
            .filter(cart::Column::OrderId.eq(order_id))
            .exec(conn)
            .await?;

        Ok((result.rows_affected > 0).then_some(linked.id))
    }

    /// `checkout_pending -> active` for the cart linked to `order_id`, or
    /// `-> abandoned` when the owner has since opened another active cart.
    pub async fn unlock<C: ConnectionTrait>(
        conn: &C,
        order_id: Uuid,
    ) -> Result<Option<Unlocked>, ServiceError> {
        let Some(linked) = Self::linked_cart(conn, order_id).await? else {
            return Ok(None);
        };

        let other_active = Cart::find()
            .filter(cart::Column::OwnerId.eq(linked.owner_id))
            .filter(cart::Column::Status.eq(CartStatus::Active))
            .filter(cart::Column::Id.ne(linked.id))
            .one(conn)
            .await?
            .is_some();

        let target = if other_active {
            CartStatus::Abandoned
        } else {
            CartStatus::Active
        };

        let result = Cart::update_many()
            .set(cart::ActiveModel {
                status: Set(target),
                order_id: Set(None),
                updated_at: Set(Utc::now()),
                ..Default::default()
            })
            .filter(cart::Column::Id.eq(linked.id))
            .filter(cart::Column::Status.eq(CartStatus::CheckoutPending))
            .filter(cart::Column::OrderId.eq(order_id))
            .exec(conn)
            .await?;

        if result.rows_affected == 0 {
            return Ok(None);
        }
        Ok(Some(Unlocked {
            cart_id: linked.id,
            abandoned: other_active,
        }))
    }

    /// `active -> abandoned`.
    pub async fn abandon<C: ConnectionTrait>(conn: &C, cart_id: Uuid) -> Result<bool, ServiceError> {
        let result = Cart::update_many()
            .set(cart::ActiveModel {
                status: Set(CartStatus::Abandoned),
                updated_at: Set(Utc::now()),
                ..Default::default()
            })
            .filter(cart::Column::Id.eq(cart_id))
            .filter(cart::Column::Status.eq(CartStatus::Active))
            .exec(conn)
            .await?;
        Ok(result.rows_affected > 0)
    }

    pub async fn linked_cart<C: ConnectionTrait>(
        conn: &C,
        order_id: Uuid,
    ) -> Result<Option<cart::Model>, ServiceError> {
        Ok(Cart::find()
            .filter(cart::Column::OrderId.eq(order_id))
            .filter(cart::Column::Status.eq(CartStatus::CheckoutPending))
            .one(conn)
            .await?)
    }
}
