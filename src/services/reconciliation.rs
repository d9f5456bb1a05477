//! Settlement of payment attempts against the provider's own view.
//!
//! Redirect parameters only ever locate an attempt; the decision comes from the
//! adapter's `verify`. Every write is short, row-guarded and happens after the
//! network call, so duplicate redirects and concurrent polls settle at most once.

use chrono::{DateTime, Utc};
use metrics::counter;
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
    TransactionTrait,
};
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    entities::{
        order, AttemptStatus, FulfillmentStatus, Order, PaymentAttemptModel, PaymentLogEvent,
        PaymentMethod, PaymentStatus, Provider,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    gateways::{GatewayError, GatewayRegistry, NormalizedResult, VerifyRequest},
    services::{
        commerce::cart_state::{CartStateMachine, Unlocked},
        payment_store::PaymentStore,
    },
};

const SWEEP_BATCH: u64 = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OutcomeKind {
    Success,
    Pending,
    Failed,
    /// No attempt matches the reference. Nothing was written.
    NotFound,
    /// Callback could not be decoded or authenticated. Nothing was written.
    Invalid,
}

/// Diagnostic code carried to the shopper's landing page. Safe to log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Reason {
    Paid,
    AlreadyPaid,
    Processing,
    GatewayUnreachable,
    /// The provider answered, but with a rejection or a body we could not read.
    GatewayError,
    GatewayDeclined,
    AmountMismatch,
    UnknownReference,
    MalformedCallback,
    InternalError,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct ReconcileOutcome {
    pub kind: OutcomeKind,
    pub reason: Reason,
    pub order_id: Option<Uuid>,
    pub payment_id: Option<Uuid>,
    pub terminal: bool,
    /// Provider's raw state string, or the stored status on short-circuit.
    pub state: String,
}

impl ReconcileOutcome {
    fn new(kind: OutcomeKind, reason: Reason, attempt: Option<&PaymentAttemptModel>) -> Self {
        Self {
            kind,
            reason,
            order_id: attempt.map(|a| a.order_id),
            payment_id: attempt.map(|a| a.id),
            terminal: matches!(kind, OutcomeKind::Success | OutcomeKind::Failed),
            state: attempt.map(|a| a.status.to_string()).unwrap_or_default(),
        }
    }

    fn with_state(mut self, state: impl Into<String>) -> Self {
        self.state = state.into();
        self
    }

    pub fn unknown() -> Self {
        Self::new(OutcomeKind::NotFound, Reason::UnknownReference, None)
    }

    pub fn malformed() -> Self {
        Self::new(OutcomeKind::Invalid, Reason::MalformedCallback, None)
    }

    pub fn success(&self) -> bool {
        self.kind == OutcomeKind::Success
    }
}

/// What started a reconciliation; recorded in the payment log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum Trigger {
    Redirect,
    Verify,
    Sweep,
}

impl Trigger {
    fn log_event(self) -> PaymentLogEvent {
        match self {
            Self::Redirect => PaymentLogEvent::Redirect,
            Self::Verify | Self::Sweep => PaymentLogEvent::VerifyRequest,
        }
    }
}

/// Client-supplied reference data for an explicit verify.
#[derive(Debug, Clone, Default)]
pub struct VerifyHint {
    pub reference: Option<String>,
    /// Provider-encoded callback payload (eSewa `data`)
    pub data: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub examined: usize,
    pub settled: usize,
    pub failed: usize,
    pub still_pending: usize,
}

/// Effects of a terminal failure applied inside one transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FailureApplied {
    pub order_failed: bool,
    pub cart: Option<Unlocked>,
}

enum SuccessApplied {
    Settled { cart_id: Option<Uuid> },
    AlreadyPaid,
    /// Attempt left `pending` for `failed` between verify and write.
    LostToFailure,
}

#[derive(Clone)]
pub struct ReconciliationEngine {
    db: Arc<DatabaseConnection>,
    gateways: Arc<GatewayRegistry>,
    event_sender: Arc<EventSender>,
    verify_timeout: Duration,
}

impl ReconciliationEngine {
    pub fn new(
        db: Arc<DatabaseConnection>,
        gateways: Arc<GatewayRegistry>,
        event_sender: Arc<EventSender>,
        verify_timeout: Duration,
    ) -> Self {
        Self {
            db,
            gateways,
            event_sender,
            verify_timeout,
        }
    }

    /// Browser return from a provider. Never fails: every problem becomes an outcome.
    #[instrument(skip(self, params))]
    pub async fn handle_callback(
        &self,
        provider: Provider,
        params: &HashMap<String, String>,
    ) -> ReconcileOutcome {
        let gateway = match self.gateways.get(provider) {
            Ok(gateway) => gateway,
            Err(e) => {
                warn!(error = %e, "callback for unconfigured provider");
                return ReconcileOutcome::new(OutcomeKind::Invalid, Reason::InternalError, None);
            }
        };

        let hint = match gateway.parse_callback(params) {
            Ok(hint) => hint,
            Err(e) => {
                warn!(error = %e, "rejected payment callback");
                return record(ReconcileOutcome::malformed(), provider);
            }
        };

        let attempt =
            match PaymentStore::find_by_reference(&*self.db, provider, &hint.reference).await {
                Ok(Some(attempt)) => attempt,
                Ok(None) => {
                    warn!(reference = %hint.reference, "callback for unknown payment reference");
                    return record(ReconcileOutcome::unknown(), provider);
                }
                Err(e) => {
                    error!(error = %e, "payment lookup failed");
                    return record(
                        ReconcileOutcome::new(OutcomeKind::Pending, Reason::InternalError, None),
                        provider,
                    );
                }
            };

        PaymentStore::append_log(
            &*self.db,
            attempt.id,
            Trigger::Redirect.log_event(),
            json!({ "state_hint": hint.state_hint, "params": hint.raw }),
        )
        .await;

        self.reconcile_attempt(attempt, Trigger::Redirect).await
    }

    /// Explicit, repeatable verify for a known payment id.
    #[instrument(skip(self, hint))]
    pub async fn verify(
        &self,
        payment_id: Uuid,
        provider: Provider,
        hint: VerifyHint,
    ) -> Result<ReconcileOutcome, ServiceError> {
        let Some(attempt) = PaymentStore::find(&*self.db, payment_id).await? else {
            return Ok(record(ReconcileOutcome::unknown(), provider));
        };
        if attempt.provider != provider {
            warn!(stored = %attempt.provider, "verify names the wrong provider");
            return Ok(record(ReconcileOutcome::malformed(), provider));
        }

        let reference = match (hint.data, hint.reference) {
            (Some(data), _) => {
                let gateway = self.gateways.get(provider)?;
                let params = HashMap::from([("data".to_string(), data)]);
                match gateway.parse_callback(&params) {
                    Ok(parsed) => Some(parsed.reference),
                    Err(e) => {
                        warn!(error = %e, "rejected verify payload");
                        return Ok(record(ReconcileOutcome::malformed(), provider));
                    }
                }
            }
            (None, reference) => reference,
        };

        if let Some(reference) = reference {
            if attempt.provider_reference.as_deref() != Some(reference.as_str()) {
                warn!(%reference, "verify reference does not match the payment");
                return Ok(record(ReconcileOutcome::unknown(), provider));
            }
        }

        PaymentStore::append_log(
            &*self.db,
            attempt.id,
            Trigger::Verify.log_event(),
            json!({ "trigger": Trigger::Verify.to_string() }),
        )
        .await;

        Ok(self.reconcile_attempt(attempt, Trigger::Verify).await)
    }

    /// Re-runs reconciliation for attempts still pending after `older_than`.
    #[instrument(skip(self))]
    pub async fn sweep_pending(&self, older_than: chrono::Duration) -> Result<SweepReport, ServiceError> {
        let cutoff = Utc::now() - older_than;
        let mut report = SweepReport::default();
        let mut cursor = None;

        // Keyset pages, so attempts that stay pending never hide newer ones.
        loop {
            let page = PaymentStore::stale_pending(&*self.db, cutoff, cursor, SWEEP_BATCH).await?;
            let exhausted = (page.len() as u64) < SWEEP_BATCH;
            cursor = page.last().map(|a| (a.created_at, a.id));

            for attempt in page {
                report.examined += 1;
                if attempt.provider_reference.is_none() {
                    report.still_pending += 1;
                    continue;
                }
                PaymentStore::append_log(
                    &*self.db,
                    attempt.id,
                    Trigger::Sweep.log_event(),
                    json!({ "trigger": Trigger::Sweep.to_string() }),
                )
                .await;

                match self.reconcile_attempt(attempt, Trigger::Sweep).await.kind {
                    OutcomeKind::Success => report.settled += 1,
                    OutcomeKind::Failed => report.failed += 1,
                    _ => report.still_pending += 1,
                }
            }

            if exhausted {
                break;
            }
        }

        info!(?report, "pending payment sweep finished");
        Ok(report)
    }

    /// Shared procedure behind every entry point.
    #[instrument(skip(self, attempt), fields(payment_id = %attempt.id, order_id = %attempt.order_id, provider = %attempt.provider))]
    pub async fn reconcile_attempt(
        &self,
        attempt: PaymentAttemptModel,
        trigger: Trigger,
    ) -> ReconcileOutcome {
        let provider = attempt.provider;

        match attempt.status {
            AttemptStatus::Paid => {
                return record(
                    ReconcileOutcome::new(OutcomeKind::Success, Reason::AlreadyPaid, Some(&attempt)),
                    provider,
                )
            }
            AttemptStatus::Failed | AttemptStatus::Refunded => {
                return record(
                    ReconcileOutcome::new(OutcomeKind::Failed, Reason::GatewayDeclined, Some(&attempt)),
                    provider,
                )
            }
            AttemptStatus::Pending => {}
        }

        let Some(reference) = attempt.provider_reference.clone() else {
            return record(
                ReconcileOutcome::new(OutcomeKind::Pending, Reason::Processing, Some(&attempt)),
                provider,
            );
        };

        let result = match self.call_verify(&attempt, reference).await {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, transport = e.is_transport(), "payment verification unavailable");
                PaymentStore::append_log(
                    &*self.db,
                    attempt.id,
                    PaymentLogEvent::Error,
                    json!({ "stage": "verify", "error": e.to_string() }),
                )
                .await;
                return record(
                    ReconcileOutcome::new(OutcomeKind::Pending, verify_error_reason(&e), Some(&attempt)),
                    provider,
                );
            }
        };

        PaymentStore::append_log(
            &*self.db,
            attempt.id,
            PaymentLogEvent::VerifyResponse,
            json!({
                "trigger": trigger.to_string(),
                "state": result.raw_state,
                "success": result.success,
                "terminal": result.terminal,
                "raw": result.raw,
            }),
        )
        .await;

        let outcome = match self.apply(&attempt, &result).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(error = %e, "failed to persist reconciliation");
                ReconcileOutcome::new(OutcomeKind::Pending, Reason::InternalError, Some(&attempt))
            }
        };
        record(outcome.with_state(result.raw_state), provider)
    }

    async fn call_verify(
        &self,
        attempt: &PaymentAttemptModel,
        reference: String,
    ) -> Result<NormalizedResult, GatewayError> {
        let gateway = self.gateways.get(attempt.provider)?;
        let request = VerifyRequest {
            reference,
            amount: attempt.amount,
        };
        tokio::time::timeout(self.verify_timeout, gateway.verify(&request))
            .await
            .map_err(|_| {
                GatewayError::Transport(format!("verify timed out after {:?}", self.verify_timeout))
            })?
    }

    async fn apply(
        &self,
        attempt: &PaymentAttemptModel,
        result: &NormalizedResult,
    ) -> Result<ReconcileOutcome, ServiceError> {
        if result.success {
            if let Some(settled) = result.amount {
                if settled != attempt.amount {
                    error!(
                        expected = attempt.amount,
                        reported = settled,
                        "provider reports a different settled amount"
                    );
                    return Ok(ReconcileOutcome::new(
                        OutcomeKind::Pending,
                        Reason::AmountMismatch,
                        Some(attempt),
                    ));
                }
            }
            return self.settle_success(attempt, result).await;
        }

        if !result.terminal {
            return Ok(ReconcileOutcome::new(
                OutcomeKind::Pending,
                Reason::Processing,
                Some(attempt),
            ));
        }

        let txn = self.db.begin().await?;
        let current = PaymentStore::find(&txn, attempt.id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("payment {}", attempt.id)))?;
        if current.status != AttemptStatus::Pending {
            txn.rollback().await?;
            return Ok(short_circuit(&current));
        }

        let reason = format!("{} reported {}", attempt.provider, result.raw_state);
        let applied = apply_failure(&txn, &current, &reason, Some(result.raw.clone())).await?;
        txn.commit().await?;

        match applied {
            Some(applied) => {
                info!(order_failed = applied.order_failed, "payment failed at provider");
                emit_failure(&self.event_sender, &current, &reason, applied);
                Ok(ReconcileOutcome::new(
                    OutcomeKind::Failed,
                    Reason::GatewayDeclined,
                    Some(&current),
                ))
            }
            None => {
                let latest = PaymentStore::find(&*self.db, attempt.id).await?;
                Ok(latest.as_ref().map_or_else(ReconcileOutcome::unknown, short_circuit))
            }
        }
    }

    async fn settle_success(
        &self,
        attempt: &PaymentAttemptModel,
        result: &NormalizedResult,
    ) -> Result<ReconcileOutcome, ServiceError> {
        let now = Utc::now();
        let txn = self.db.begin().await?;

        let current = PaymentStore::find(&txn, attempt.id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("payment {}", attempt.id)))?;

        let applied = match current.status {
            AttemptStatus::Pending => apply_success(&txn, &current, result, now).await?,
            AttemptStatus::Paid => SuccessApplied::AlreadyPaid,
            AttemptStatus::Failed | AttemptStatus::Refunded => SuccessApplied::LostToFailure,
        };
        txn.commit().await?;

        match applied {
            SuccessApplied::Settled { cart_id } => {
                info!(amount = current.amount, "payment settled");
                self.event_sender.send_or_log(Event::PaymentSucceeded {
                    payment_id: current.id,
                    order_id: current.order_id,
                    provider: current.provider,
                    amount: current.amount,
                    settled_at: now,
                });
                if let Some(cart_id) = cart_id {
                    self.event_sender.send_or_log(Event::CartConverted {
                        cart_id,
                        order_id: current.order_id,
                    });
                }
                Ok(ReconcileOutcome::new(
                    OutcomeKind::Success,
                    Reason::Paid,
                    Some(&current),
                ))
            }
            SuccessApplied::AlreadyPaid => Ok(ReconcileOutcome::new(
                OutcomeKind::Success,
                Reason::AlreadyPaid,
                Some(&current),
            )),
            SuccessApplied::LostToFailure => {
                error!(
                    reference = ?current.provider_reference,
                    "provider reports capture for an attempt already marked failed"
                );
                Ok(ReconcileOutcome::new(
                    OutcomeKind::Failed,
                    Reason::GatewayDeclined,
                    Some(&current),
                ))
            }
        }
    }
}

pub(crate) fn emit_failure(
    events: &EventSender,
    attempt: &PaymentAttemptModel,
    reason: &str,
    applied: FailureApplied,
) {
    events.send_or_log(Event::PaymentFailed {
        payment_id: attempt.id,
        order_id: attempt.order_id,
        provider: attempt.provider,
        reason: reason.to_string(),
    });
    if let Some(unlocked) = applied.cart {
        events.send_or_log(Event::CartUnlocked {
            cart_id: unlocked.cart_id,
            order_id: attempt.order_id,
            abandoned: unlocked.abandoned,
        });
    }
}

fn short_circuit(attempt: &PaymentAttemptModel) -> ReconcileOutcome {
    match attempt.status {
        AttemptStatus::Paid => {
            ReconcileOutcome::new(OutcomeKind::Success, Reason::AlreadyPaid, Some(attempt))
        }
        AttemptStatus::Pending => {
            ReconcileOutcome::new(OutcomeKind::Pending, Reason::Processing, Some(attempt))
        }
        AttemptStatus::Failed | AttemptStatus::Refunded => {
            ReconcileOutcome::new(OutcomeKind::Failed, Reason::GatewayDeclined, Some(attempt))
        }
    }
}

/// Verification never completed, so the attempt stays pending either way.
fn verify_error_reason(err: &GatewayError) -> Reason {
    match err {
        GatewayError::Transport(_) => Reason::GatewayUnreachable,
        GatewayError::Configuration(_) => Reason::InternalError,
        GatewayError::Rejected { .. }
        | GatewayError::Protocol(_)
        | GatewayError::InvalidCallback(_) => Reason::GatewayError,
    }
}

fn record(outcome: ReconcileOutcome, provider: Provider) -> ReconcileOutcome {
    counter!(
        "settle_payments_reconciled_total",
        1,
        "outcome" => outcome.kind.to_string(),
        "provider" => provider.to_string()
    );
    outcome
}

/// Marks the attempt paid, the order paid and the linked cart converted.
async fn apply_success<C: ConnectionTrait>(
    conn: &C,
    attempt: &PaymentAttemptModel,
    result: &NormalizedResult,
    now: DateTime<Utc>,
) -> Result<SuccessApplied, ServiceError> {
    if !PaymentStore::transition(conn, attempt.id, AttemptStatus::Paid, Some(result.raw.clone()))
        .await?
    {
        return Ok(SuccessApplied::AlreadyPaid);
    }

    let order_update = Order::update_many()
        .set(order::ActiveModel {
            payment_status: Set(PaymentStatus::Paid),
            fulfillment_status: Set(FulfillmentStatus::Processing),
            payment_method: Set(Some(PaymentMethod::from(attempt.provider))),
            paid_at: Set(Some(now)),
            updated_at: Set(now),
            ..Default::default()
        })
        .filter(order::Column::Id.eq(attempt.order_id))
        .filter(order::Column::PaymentStatus.ne(PaymentStatus::Paid))
        .exec(conn)
        .await?;
    if order_update.rows_affected == 0 {
        warn!(order_id = %attempt.order_id, "order was already marked paid");
    }

    let cart_id = CartStateMachine::convert_linked(conn, attempt.order_id).await?;
    Ok(SuccessApplied::Settled { cart_id })
}

/// Marks the attempt failed. When no other attempt for the order is still
/// pending, also fails the order and releases its cart. Returns `None` when the
/// attempt had already left `pending`.
pub(crate) async fn apply_failure<C: ConnectionTrait>(
    conn: &C,
    attempt: &PaymentAttemptModel,
    reason: &str,
    raw: Option<serde_json::Value>,
) -> Result<Option<FailureApplied>, ServiceError> {
    if !PaymentStore::transition(conn, attempt.id, AttemptStatus::Failed, raw).await? {
        return Ok(None);
    }

    if PaymentStore::has_other_pending(conn, attempt.order_id, attempt.id).await? {
        return Ok(Some(FailureApplied {
            order_failed: false,
            cart: None,
        }));
    }

    let cart = CartStateMachine::unlock(conn, attempt.order_id).await?;
    let order_update = Order::update_many()
        .set(order::ActiveModel {
            payment_status: Set(PaymentStatus::Failed),
            notes: Set(Some(reason.to_string())),
            updated_at: Set(Utc::now()),
            ..Default::default()
        })
        .filter(order::Column::Id.eq(attempt.order_id))
        .filter(order::Column::PaymentStatus.eq(PaymentStatus::Pending))
        .exec(conn)
        .await?;

    Ok(Some(FailureApplied {
        order_failed: order_update.rows_affected > 0,
        cart,
    }))
}
