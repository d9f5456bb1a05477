//! Order snapshot builder.
//!
//! Checkout locks the owner's active cart row, prices it, persists an immutable
//! order snapshot and moves the cart out of `active`, all in one transaction.

use crate::{
    entities::{
        commerce::{
            cart, cart_item, product, Cart, CartItem, CartModel, CartStatus, Product, ProductVariant,
        },
        order, order_item, FulfillmentStatus, Order, OrderItem, OrderItemModel, OrderModel, PaymentMethod,
        PaymentStatus,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        commerce::{
            cart_state::CartStateMachine,
            pricing_service::{eligible_promotions, price_cart, CartLine, PricedCart},
        },
        payments::{InitiatedPayment, PaymentService},
    },
};
use chrono::{DateTime, Utc};
use metrics::counter;
use rand::{distributions::Alphanumeric, Rng};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DatabaseTransaction,
    EntityTrait, QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct ShippingInfo {
    #[validate(length(min = 1, max = 200))]
    pub full_name: String,
    #[validate(length(min = 5, max = 20))]
    pub phone: String,
    #[validate(length(min = 1, max = 500))]
    pub address: String,
    #[validate(length(min = 1, max = 100))]
    pub city: String,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CheckoutInput {
    pub payment_method: PaymentMethod,
    #[validate]
    pub shipping_info: Option<ShippingInfo>,
    #[validate(length(max = 1000))]
    pub notes: Option<String>,
}

/// A persisted order snapshot, plus the payment handle for online methods.
#[derive(Debug, Clone)]
pub struct CheckoutResult {
    pub order: OrderModel,
    pub items: Vec<OrderItemModel>,
    pub payment: Option<InitiatedPayment>,
}

#[derive(Clone)]
pub struct CheckoutService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    payments: Arc<PaymentService>,
    currency: String,
}

impl CheckoutService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        payments: Arc<PaymentService>,
        currency: String,
    ) -> Self {
        Self {
            db,
            event_sender,
            payments,
            currency,
        }
    }

    /// Converts the owner's active cart into an order and, for online methods,
    /// opens a payment session with the matching provider.
    #[instrument(skip(self, input), fields(payment_method = %input.payment_method))]
    pub async fn checkout(
        &self,
        owner_id: Uuid,
        input: CheckoutInput,
    ) -> Result<CheckoutResult, ServiceError> {
        input.validate()?;

        let provider = input.payment_method.provider();
        if let Some(provider) = provider {
            // Refuse before locking the cart; an unconfigured provider can never settle.
            self.payments.ensure_provider(provider)?;
        }

        let (order, items) = self.create_snapshot(owner_id, &input, Utc::now()).await?;

        counter!("settle_checkout_total", 1, "method" => input.payment_method.to_string());
        self.event_sender.send_or_log(Event::OrderCreated {
            order_id: order.id,
            owner_id,
            total: order.total,
            payment_method: input.payment_method,
        });
        info!(
            order_id = %order.id,
            order_number = %order.order_number,
            total = order.total,
            "order created"
        );

        let payment = match provider {
            Some(provider) => Some(
                self.payments
                    .initiate(Some(owner_id), order.id, provider)
                    .await?,
            ),
            None => None,
        };

        Ok(CheckoutResult {
            order,
            items,
            payment,
        })
    }

    /// Builds and persists the order snapshot under the checkout mutex.
    pub async fn create_snapshot(
        &self,
        owner_id: Uuid,
        input: &CheckoutInput,
        now: DateTime<Utc>,
    ) -> Result<(OrderModel, Vec<OrderItemModel>), ServiceError> {
        let txn = self.db.begin().await?;

        let cart = lock_active_cart(&txn, owner_id)
            .await?
            .ok_or(ServiceError::NoActiveCart(owner_id))?;

        let lines = load_cart_lines(&txn, &cart).await?;
        let promotions = eligible_promotions(&txn, &lines, now).await?;
        let priced = price_cart(cart.id, lines, &promotions)?;

        let order = insert_order(&txn, owner_id, &self.currency, input, &priced, now).await?;
        let items = insert_order_items(&txn, order.id, &priced, now).await?;

        match input.payment_method {
            PaymentMethod::Cod => CartStateMachine::convert_direct(&txn, cart.id).await?,
            _ => CartStateMachine::lock_for_checkout(&txn, cart.id, order.id).await?,
        }

        txn.commit().await?;

        if input.payment_method == PaymentMethod::Cod {
            self.event_sender.send_or_log(Event::CartConverted {
                cart_id: cart.id,
                order_id: order.id,
            });
        }

        Ok((order, items))
    }
}

impl CheckoutService {
    /// Order snapshot owned by `owner_id`, with its line items.
    pub async fn get_order(
        &self,
        owner_id: Uuid,
        order_id: Uuid,
    ) -> Result<(OrderModel, Vec<OrderItemModel>), ServiceError> {
        let order = Order::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .filter(|o| o.owner_id == owner_id)
            .ok_or_else(|| ServiceError::NotFound(format!("order {}", order_id)))?;
        let items = order_items(&*self.db, order.id).await?;
        Ok((order, items))
    }
}

/// Row-locks the owner's active cart for the rest of the transaction.
async fn lock_active_cart(
    txn: &DatabaseTransaction,
    owner_id: Uuid,
) -> Result<Option<CartModel>, ServiceError> {
    Ok(Cart::find()
        .filter(cart::Column::OwnerId.eq(owner_id))
        .filter(cart::Column::Status.eq(CartStatus::Active))
        .lock_exclusive()
        .one(txn)
        .await?)
}

async fn load_cart_lines<C: ConnectionTrait>(
    conn: &C,
    cart: &CartModel,
) -> Result<Vec<CartLine>, ServiceError> {
    let rows = CartItem::find()
        .filter(cart_item::Column::CartId.eq(cart.id))
        .find_also_related(ProductVariant)
        .all(conn)
        .await?;

    if rows.is_empty() {
        return Err(ServiceError::EmptyCart(cart.id));
    }

    let product_ids: Vec<Uuid> = rows
        .iter()
        .filter_map(|(_, variant)| variant.as_ref().map(|v| v.product_id))
        .collect();
    let products: HashMap<Uuid, _> = Product::find()
        .filter(product::Column::Id.is_in(product_ids))
        .all(conn)
        .await?
        .into_iter()
        .map(|p| (p.id, p))
        .collect();

    let mut lines = Vec::with_capacity(rows.len());
    for (item, variant) in rows {
        let variant = variant.ok_or_else(|| {
            ServiceError::ValidationError(format!("variant {} no longer exists", item.variant_id))
        })?;
        let product = products.get(&variant.product_id).ok_or_else(|| {
            ServiceError::ValidationError(format!("product {} no longer exists", variant.product_id))
        })?;
        if !variant.is_active || !product.is_active {
            warn!(cart_id = %cart.id, variant_id = %variant.id, "cart holds an unavailable variant");
            return Err(ServiceError::ValidationError(format!(
                "{} is no longer available",
                variant.sku
            )));
        }

        lines.push(CartLine {
            product_id: product.id,
            variant_id: variant.id,
            name: format!("{} - {}", product.name, variant.name),
            attributes: variant.attributes,
            quantity: item.quantity,
            list_price: variant.price,
        });
    }
    Ok(lines)
}

async fn insert_order<C: ConnectionTrait>(
    conn: &C,
    owner_id: Uuid,
    currency: &str,
    input: &CheckoutInput,
    priced: &PricedCart,
    now: DateTime<Utc>,
) -> Result<OrderModel, ServiceError> {
    let cod = input.payment_method == PaymentMethod::Cod;
    let shipping_info = input
        .shipping_info
        .as_ref()
        .map(serde_json::to_value)
        .transpose()
        .map_err(|e| ServiceError::InternalError(format!("shipping info: {}", e)))?;

    let order = order::ActiveModel {
        id: Set(Uuid::new_v4()),
        order_number: Set(generate_order_number(now)),
        owner_id: Set(owner_id),
        currency: Set(currency.to_string()),
        subtotal: Set(priced.subtotal),
        discount: Set(priced.discount),
        tax: Set(priced.tax),
        shipping: Set(priced.shipping),
        total: Set(priced.total),
        fulfillment_status: Set(if cod {
            FulfillmentStatus::Processing
        } else {
            FulfillmentStatus::Pending
        }),
        payment_status: Set(PaymentStatus::Pending),
        payment_method: Set(Some(input.payment_method)),
        shipping_info: Set(shipping_info),
        notes: Set(input.notes.clone()),
        paid_at: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
    };
    Ok(order.insert(conn).await?)
}

async fn insert_order_items<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
    priced: &PricedCart,
    now: DateTime<Utc>,
) -> Result<Vec<OrderItemModel>, ServiceError> {
    let mut items = Vec::with_capacity(priced.lines.len());
    for line in &priced.lines {
        let item = order_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            product_id: Set(line.product_id),
            variant_id: Set(line.variant_id),
            name: Set(line.name.clone()),
            attributes: Set(line.attributes.clone()),
            quantity: Set(line.quantity),
            list_price: Set(line.list_price),
            unit_price: Set(line.unit_price),
            total: Set(line.total),
            promotion_item_id: Set(line.promotion_item_id),
            created_at: Set(now),
        }
        .insert(conn)
        .await?;
        items.push(item);
    }
    Ok(items)
}

/// `ORD-YYYYMMDD-XXXXXX`
pub fn generate_order_number(now: DateTime<Utc>) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(|b| char::from(b).to_ascii_uppercase())
        .collect();
    format!("ORD-{}-{}", now.format("%Y%m%d"), suffix)
}

/// Line items of an order, in insertion order.
pub async fn order_items<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
) -> Result<Vec<OrderItemModel>, ServiceError> {
    Ok(OrderItem::find()
        .filter(order_item::Column::OrderId.eq(order_id))
        .order_by_asc(order_item::Column::CreatedAt)
        .all(conn)
        .await?)
}
