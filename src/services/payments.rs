use crate::{
    entities::{
        order, AttemptStatus, Order, OrderModel, PaymentAttemptModel, PaymentLogEvent,
        PaymentMethod, PaymentStatus, Provider,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    gateways::{GatewayRegistry, InitiateRequest, PaymentGateway, PaymentHandle},
    services::{
        commerce::cart_state::CartStateMachine,
        payment_store::PaymentStore,
        reconciliation::{apply_failure, emit_failure},
    },
};
use chrono::{DateTime, Utc};
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set, TransactionTrait,
};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

/// A freshly opened payment session.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct InitiatedPayment {
    pub payment_id: Uuid,
    pub order_id: Uuid,
    pub provider: Provider,
    pub amount: i64,
    pub handle: PaymentHandle,
}

/// Read view of a payment attempt.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PaymentView {
    pub payment_id: Uuid,
    pub order_id: Uuid,
    pub provider: Provider,
    pub status: AttemptStatus,
    pub amount: i64,
    pub currency: String,
    pub provider_reference: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<PaymentAttemptModel> for PaymentView {
    fn from(attempt: PaymentAttemptModel) -> Self {
        Self {
            payment_id: attempt.id,
            order_id: attempt.order_id,
            provider: attempt.provider,
            status: attempt.status,
            amount: attempt.amount,
            currency: attempt.currency,
            provider_reference: attempt.provider_reference,
            created_at: attempt.created_at,
            updated_at: attempt.updated_at,
        }
    }
}

/// Opens payment sessions for orders awaiting payment.
pub struct PaymentService {
    db: Arc<DatabaseConnection>,
    gateways: Arc<GatewayRegistry>,
    event_sender: Arc<EventSender>,
}

impl PaymentService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        gateways: Arc<GatewayRegistry>,
        event_sender: Arc<EventSender>,
    ) -> Self {
        Self {
            db,
            gateways,
            event_sender,
        }
    }

    pub fn providers(&self) -> Vec<Provider> {
        self.gateways.providers()
    }

    pub fn ensure_provider(&self, provider: Provider) -> Result<Arc<dyn PaymentGateway>, ServiceError> {
        self.gateways.get(provider).map_err(|_| {
            ServiceError::ValidationError(format!("payment method {} is not available", provider))
        })
    }

    /// Creates a pending attempt and asks the provider for a payment handle.
    ///
    /// The provider call runs outside any transaction. If it fails the attempt is
    /// marked failed and, when it was the order's last pending attempt, the cart is
    /// released so the owner can check out again.
    #[instrument(skip(self))]
    pub async fn initiate(
        &self,
        owner_id: Option<Uuid>,
        order_id: Uuid,
        provider: Provider,
    ) -> Result<InitiatedPayment, ServiceError> {
        let gateway = self.ensure_provider(provider)?;
        let order = self.payable_order(owner_id, order_id).await?;

        let attempt = PaymentStore::create_pending(&*self.db, &order, provider).await?;
        let request = InitiateRequest {
            payment_id: attempt.id,
            order_id: order.id,
            order_number: order.order_number.clone(),
            amount: attempt.amount,
            currency: attempt.currency.clone(),
        };
        PaymentStore::append_log(
            &*self.db,
            attempt.id,
            PaymentLogEvent::InitiateRequest,
            json!({ "order_id": order.id, "amount": attempt.amount, "provider": provider }),
        )
        .await;

        let response = match gateway.initiate(&request).await {
            Ok(response) => response,
            Err(e) => {
                error!(payment_id = %attempt.id, error = %e, "payment initiation failed");
                PaymentStore::append_log(
                    &*self.db,
                    attempt.id,
                    PaymentLogEvent::Error,
                    json!({ "stage": "initiate", "error": e.to_string() }),
                )
                .await;
                self.fail_initiation(&attempt, &e.to_string()).await?;
                return Err(ServiceError::ExternalServiceError(format!(
                    "{} could not start the payment",
                    provider
                )));
            }
        };

        if !PaymentStore::record_reference(&*self.db, attempt.id, &response.reference, response.raw.clone())
            .await?
        {
            return Err(ServiceError::Conflict(format!(
                "payment {} changed during initiation",
                attempt.id
            )));
        }
        PaymentStore::append_log(
            &*self.db,
            attempt.id,
            PaymentLogEvent::InitiateResponse,
            json!({ "reference": response.reference, "raw": response.raw }),
        )
        .await;

        if order.payment_method != Some(PaymentMethod::from(provider)) {
            Order::update_many()
                .set(order::ActiveModel {
                    payment_method: Set(Some(PaymentMethod::from(provider))),
                    updated_at: Set(Utc::now()),
                    ..Default::default()
                })
                .filter(order::Column::Id.eq(order.id))
                .filter(order::Column::PaymentStatus.eq(PaymentStatus::Pending))
                .exec(&*self.db)
                .await?;
        }

        info!(payment_id = %attempt.id, reference = %response.reference, "payment initiated");
        self.event_sender.send_or_log(Event::PaymentInitiated {
            payment_id: attempt.id,
            order_id: order.id,
            provider,
        });

        Ok(InitiatedPayment {
            payment_id: attempt.id,
            order_id: order.id,
            provider,
            amount: attempt.amount,
            handle: response.handle,
        })
    }

    /// Payment attempt visible to `owner_id`.
    pub async fn get_payment(&self, owner_id: Uuid, payment_id: Uuid) -> Result<PaymentView, ServiceError> {
        let attempt = PaymentStore::find(&*self.db, payment_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("payment {}", payment_id)))?;
        let order = Order::find_by_id(attempt.order_id).one(&*self.db).await?;
        match order {
            Some(order) if order.owner_id == owner_id => Ok(attempt.into()),
            _ => Err(ServiceError::NotFound(format!("payment {}", payment_id))),
        }
    }

    /// Order that may receive a new attempt: still unpaid with its cart locked.
    async fn payable_order(&self, owner_id: Option<Uuid>, order_id: Uuid) -> Result<OrderModel, ServiceError> {
        let order = Order::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .filter(|o| owner_id.map_or(true, |owner| o.owner_id == owner))
            .ok_or_else(|| ServiceError::NotFound(format!("order {}", order_id)))?;

        if order.payment_status != PaymentStatus::Pending {
            return Err(ServiceError::Conflict(format!(
                "order {} is {}",
                order.order_number, order.payment_status
            )));
        }
        if order.payment_method == Some(PaymentMethod::Cod) {
            return Err(ServiceError::Conflict(format!(
                "order {} is cash on delivery",
                order.order_number
            )));
        }
        if CartStateMachine::linked_cart(&*self.db, order.id).await?.is_none() {
            return Err(ServiceError::Conflict(format!(
                "order {} no longer holds its cart",
                order.order_number
            )));
        }
        Ok(order)
    }

    async fn fail_initiation(&self, attempt: &PaymentAttemptModel, reason: &str) -> Result<(), ServiceError> {
        let reason = format!("initiation failed: {}", reason);
        let txn = self.db.begin().await?;
        let applied = apply_failure(&txn, attempt, &reason, None).await?;
        txn.commit().await?;

        match applied {
            Some(applied) => emit_failure(&self.event_sender, attempt, &reason, applied),
            None => warn!(payment_id = %attempt.id, "attempt settled concurrently with initiation"),
        }
        Ok(())
    }
}
