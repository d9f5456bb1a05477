use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Append-only audit trail of gateway traffic for a payment attempt.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "payment_logs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub payment_id: Uuid,
    pub event_type: PaymentLogEvent,
    #[sea_orm(column_type = "Json")]
    pub payload: Json,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::payment_attempt::Entity",
        from = "Column::PaymentId",
        to = "super::payment_attempt::Column::Id"
    )]
    PaymentAttempt,
}

impl Related<super::payment_attempt::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::PaymentAttempt.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(30))")]
#[serde(rename_all = "snake_case")]
pub enum PaymentLogEvent {
    #[sea_orm(string_value = "initiate_request")]
    InitiateRequest,
    #[sea_orm(string_value = "initiate_response")]
    InitiateResponse,
    #[sea_orm(string_value = "redirect")]
    Redirect,
    #[sea_orm(string_value = "verify_request")]
    VerifyRequest,
    #[sea_orm(string_value = "verify_response")]
    VerifyResponse,
    #[sea_orm(string_value = "error")]
    Error,
}
