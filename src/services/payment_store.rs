//! Durable ledger of payment attempts and their audit log.
//!
//! Status moves only out of `pending`, through guarded updates; `paid` and
//! `failed` are absorbing.

use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

use crate::entities::{
    payment_attempt, payment_log, AttemptStatus, OrderModel, PaymentAttempt, PaymentAttemptModel,
    PaymentLogEvent, Provider,
};
use crate::errors::ServiceError;

pub struct PaymentStore;

impl PaymentStore {
    pub async fn create_pending<C: ConnectionTrait>(
        conn: &C,
        order: &OrderModel,
        provider: Provider,
    ) -> Result<PaymentAttemptModel, ServiceError> {
        let now = Utc::now();
        let attempt = payment_attempt::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order.id),
            provider: Set(provider),
            provider_reference: Set(None),
            amount: Set(order.total),
            currency: Set(order.currency.clone()),
            status: Set(AttemptStatus::Pending),
            raw_response: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };
        Ok(attempt.insert(conn).await?)
    }

    pub async fn find<C: ConnectionTrait>(
        conn: &C,
        payment_id: Uuid,
    ) -> Result<Option<PaymentAttemptModel>, ServiceError> {
        Ok(PaymentAttempt::find_by_id(payment_id).one(conn).await?)
    }

    /// Locates an attempt by the provider's own identifier.
    pub async fn find_by_reference<C: ConnectionTrait>(
        conn: &C,
        provider: Provider,
        reference: &str,
    ) -> Result<Option<PaymentAttemptModel>, ServiceError> {
        Ok(PaymentAttempt::find()
            .filter(payment_attempt::Column::Provider.eq(provider))
            .filter(payment_attempt::Column::ProviderReference.eq(reference))
            .one(conn)
            .await?)
    }

    /// Stores the provider reference returned by initiation. Only a still-pending
    /// attempt without a reference can receive one.
    pub async fn record_reference<C: ConnectionTrait>(
        conn: &C,
        payment_id: Uuid,
        reference: &str,
        raw: Value,
    ) -> Result<bool, ServiceError> {
        let result = PaymentAttempt::update_many()
            .set(payment_attempt::ActiveModel {
                provider_reference: Set(Some(reference.to_string())),
                raw_response: Set(Some(raw)),
                updated_at: Set(Utc::now()),
                ..Default::default()
            })
            .filter(payment_attempt::Column::Id.eq(payment_id))
            .filter(payment_attempt::Column::Status.eq(AttemptStatus::Pending))
            .filter(payment_attempt::Column::ProviderReference.is_null())
            .exec(conn)
            .await?;
        Ok(result.rows_affected > 0)
    }

    /// `pending -> to`. Returns false when the attempt already left `pending`.
    pub async fn transition<C: ConnectionTrait>(
        conn: &C,
        payment_id: Uuid,
        to: AttemptStatus,
        raw: Option<Value>,
    ) -> Result<bool, ServiceError> {
        let mut update = payment_attempt::ActiveModel {
            status: Set(to),
            updated_at: Set(Utc::now()),
            ..Default::default()
        };
        if let Some(raw) = raw {
            update.raw_response = Set(Some(raw));
        }

        let result = PaymentAttempt::update_many()
            .set(update)
            .filter(payment_attempt::Column::Id.eq(payment_id))
            .filter(payment_attempt::Column::Status.eq(AttemptStatus::Pending))
            .exec(conn)
            .await?;
        Ok(result.rows_affected > 0)
    }

    /// Whether the order still has a pending attempt other than `except`.
    pub async fn has_other_pending<C: ConnectionTrait>(
        conn: &C,
        order_id: Uuid,
        except: Uuid,
    ) -> Result<bool, ServiceError> {
        Ok(PaymentAttempt::find()
            .filter(payment_attempt::Column::OrderId.eq(order_id))
            .filter(payment_attempt::Column::Status.eq(AttemptStatus::Pending))
            .filter(payment_attempt::Column::Id.ne(except))
            .one(conn)
            .await?
            .is_some())
    }

    /// One page of pending attempts created before `cutoff`, ordered by
    /// `(created_at, id)` and starting strictly after `after`.
    pub async fn stale_pending<C: ConnectionTrait>(
        conn: &C,
        cutoff: DateTime<Utc>,
        after: Option<(DateTime<Utc>, Uuid)>,
        limit: u64,
    ) -> Result<Vec<PaymentAttemptModel>, ServiceError> {
        let mut query = PaymentAttempt::find()
            .filter(payment_attempt::Column::Status.eq(AttemptStatus::Pending))
            .filter(payment_attempt::Column::CreatedAt.lt(cutoff));
        if let Some((created_at, id)) = after {
            query = query.filter(
                Condition::any()
                    .add(payment_attempt::Column::CreatedAt.gt(created_at))
                    .add(
                        Condition::all()
                            .add(payment_attempt::Column::CreatedAt.eq(created_at))
                            .add(payment_attempt::Column::Id.gt(id)),
                    ),
            );
        }
        Ok(query
            .order_by_asc(payment_attempt::Column::CreatedAt)
            .order_by_asc(payment_attempt::Column::Id)
            .limit(limit)
            .all(conn)
            .await?)
    }

    /// Appends an audit entry. Failures are logged and swallowed.
    pub async fn append_log<C: ConnectionTrait>(
        conn: &C,
        payment_id: Uuid,
        event_type: PaymentLogEvent,
        payload: Value,
    ) {
        let entry = payment_log::ActiveModel {
            id: Set(Uuid::new_v4()),
            payment_id: Set(payment_id),
            event_type: Set(event_type),
            payload: Set(payload),
            created_at: Set(Utc::now()),
        };
        if let Err(e) = entry.insert(conn).await {
            warn!(%payment_id, error = %e, "failed to append payment log");
        }
    }
}
