use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Discount rule inside a campaign, targeting one variant or every variant of a product.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "promotion_items")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub campaign_id: Uuid,
    #[sea_orm(nullable)]
    pub product_id: Option<Uuid>,
    #[sea_orm(nullable)]
    pub variant_id: Option<Uuid>,
    pub discount_type: DiscountType,
    /// Replacement price in minor units when `discount_type` is fixed_price
    #[sea_orm(nullable)]
    pub fixed_price: Option<i64>,
    /// Percentage in basis points (1500 = 15%) when `discount_type` is percentage
    #[sea_orm(nullable)]
    pub percentage_bps: Option<i32>,
    pub is_active: bool,
    #[sea_orm(nullable)]
    pub starts_at: Option<DateTime<Utc>>,
    #[sea_orm(nullable)]
    pub ends_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::promotion_campaign::Entity",
        from = "Column::CampaignId",
        to = "super::promotion_campaign::Column::Id"
    )]
    Campaign,
}

impl Related<super::promotion_campaign::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Campaign.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn is_live_at(&self, at: DateTime<Utc>) -> bool {
        self.is_active
            && self.starts_at.map_or(true, |start| start <= at)
            && self.ends_at.map_or(true, |end| at < end)
    }

    pub fn targets(&self, product_id: Uuid, variant_id: Uuid) -> bool {
        self.variant_id == Some(variant_id) || self.product_id == Some(product_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "snake_case")]
pub enum DiscountType {
    #[sea_orm(string_value = "fixed_price")]
    FixedPrice,
    #[sea_orm(string_value = "percentage")]
    Percentage,
}
