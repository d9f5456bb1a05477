use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use sea_orm::{ColumnTrait, Condition, ConnectionTrait, EntityTrait, QueryFilter};
use serde_json::Value;
use tracing::{error, warn};
use uuid::Uuid;

use crate::entities::commerce::{
    promotion_item, DiscountType, PromotionCampaign, PromotionItem, PromotionItemModel,
};
use crate::errors::ServiceError;

const BPS_SCALE: i32 = 10_000;

/// A cart line joined with its catalog variant, ready to price.
#[derive(Debug, Clone)]
pub struct CartLine {
    pub product_id: Uuid,
    pub variant_id: Uuid,
    pub name: String,
    pub attributes: Option<Value>,
    pub quantity: i32,
    pub list_price: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricedLine {
    pub product_id: Uuid,
    pub variant_id: Uuid,
    pub name: String,
    pub attributes: Option<Value>,
    pub quantity: i32,
    pub list_price: i64,
    pub unit_price: i64,
    pub total: i64,
    pub promotion_item_id: Option<Uuid>,
}

/// Order totals in minor units. `total = subtotal - discount + tax + shipping`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricedCart {
    pub lines: Vec<PricedLine>,
    pub subtotal: i64,
    pub discount: i64,
    pub tax: i64,
    pub shipping: i64,
    pub total: i64,
}

/// Promotion that survived validation, reduced to what ranking needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Offer {
    Fixed { price: i64 },
    Percent { bps: i32, price: i64 },
}

impl Offer {
    fn price(self) -> i64 {
        match self {
            Offer::Fixed { price } | Offer::Percent { price, .. } => price,
        }
    }

    /// Fixed beats percentage; lowest fixed wins; highest percentage wins.
    fn beats(self, other: Offer) -> bool {
        match (self, other) {
            (Offer::Fixed { .. }, Offer::Percent { .. }) => true,
            (Offer::Percent { .. }, Offer::Fixed { .. }) => false,
            (Offer::Fixed { price: a }, Offer::Fixed { price: b }) => a < b,
            (Offer::Percent { bps: a, .. }, Offer::Percent { bps: b, .. }) => a > b,
        }
    }
}

/// Validates one promotion against a list price. Ineffective promotions are
/// dropped with a warning so operators can spot the misconfiguration.
fn offer_for(list_price: i64, promo: &PromotionItemModel) -> Option<Offer> {
    match promo.discount_type {
        DiscountType::FixedPrice => match promo.fixed_price {
            Some(price) if (0..list_price).contains(&price) => Some(Offer::Fixed { price }),
            other => {
                warn!(
                    promotion_item_id = %promo.id,
                    fixed_price = ?other,
                    list_price,
                    "ignoring fixed-price promotion that does not lower the price"
                );
                None
            }
        },
        DiscountType::Percentage => match promo.percentage_bps {
            Some(bps) if bps > 0 && bps < BPS_SCALE => {
                let price = percent_price(list_price, bps)?;
                Some(Offer::Percent { bps, price })
            }
            other => {
                warn!(
                    promotion_item_id = %promo.id,
                    percentage_bps = ?other,
                    "ignoring percentage promotion outside (0, 100)"
                );
                None
            }
        },
    }
}

/// `list * (100% - pct)`, rounded half away from zero.
fn percent_price(list_price: i64, bps: i32) -> Option<i64> {
    let remaining = Decimal::from(BPS_SCALE - bps) / Decimal::from(BPS_SCALE);
    (Decimal::from(list_price) * remaining)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
}

/// Picks the best eligible promotion for a line. Returns the final unit price and
/// the winning promotion, or the list price when nothing applies.
///
/// `candidates` must already be filtered for eligibility (active, in window, targets
/// this variant or its product).
pub fn best_unit_price(list_price: i64, candidates: &[PromotionItemModel]) -> (i64, Option<Uuid>) {
    let mut best: Option<(Offer, Uuid)> = None;
    for promo in candidates {
        let Some(offer) = offer_for(list_price, promo) else {
            continue;
        };
        let replace = match best {
            Some((current, _)) => offer.beats(current),
            None => true,
        };
        if replace {
            best = Some((offer, promo.id));
        }
    }

    match best {
        Some((offer, id)) => (offer.price(), Some(id)),
        None => (list_price, None),
    }
}

fn overflow(what: &str) -> ServiceError {
    ServiceError::InvalidPricing(format!("{} overflows", what))
}

/// Prices every line and checks the order-level invariants.
pub fn price_cart(
    cart_id: Uuid,
    lines: Vec<CartLine>,
    promotions: &[PromotionItemModel],
) -> Result<PricedCart, ServiceError> {
    let mut priced = Vec::with_capacity(lines.len());
    let mut subtotal: i64 = 0;
    let mut discount: i64 = 0;

    for line in lines {
        if line.quantity <= 0 {
            return Err(ServiceError::InvalidPricing(format!(
                "variant {} has quantity {}",
                line.variant_id, line.quantity
            )));
        }
        if line.list_price < 0 {
            error!(variant_id = %line.variant_id, list_price = line.list_price, "negative list price");
            return Err(ServiceError::InvalidPricing(format!(
                "variant {} has a negative list price",
                line.variant_id
            )));
        }

        let candidates: Vec<PromotionItemModel> = promotions
            .iter()
            .filter(|p| p.targets(line.product_id, line.variant_id))
            .cloned()
            .collect();
        let (unit_price, promotion_item_id) = best_unit_price(line.list_price, &candidates);

        let qty = i64::from(line.quantity);
        let list_total = line
            .list_price
            .checked_mul(qty)
            .ok_or_else(|| overflow("line subtotal"))?;
        let total = unit_price
            .checked_mul(qty)
            .ok_or_else(|| overflow("line total"))?;
        let line_discount = (line.list_price - unit_price)
            .max(0)
            .checked_mul(qty)
            .ok_or_else(|| overflow("line discount"))?;

        subtotal = subtotal
            .checked_add(list_total)
            .ok_or_else(|| overflow("subtotal"))?;
        discount = discount
            .checked_add(line_discount)
            .ok_or_else(|| overflow("discount"))?;

        priced.push(PricedLine {
            product_id: line.product_id,
            variant_id: line.variant_id,
            name: line.name,
            attributes: line.attributes,
            quantity: line.quantity,
            list_price: line.list_price,
            unit_price,
            total,
            promotion_item_id,
        });
    }

    if subtotal <= 0 {
        return Err(ServiceError::EmptyCart(cart_id));
    }

    let (tax, shipping) = (0_i64, 0_i64);
    let total = subtotal - discount + tax + shipping;

    if discount < 0 || discount > subtotal || total <= 0 {
        error!(
            %cart_id,
            subtotal,
            discount,
            total,
            "pricing invariant violated"
        );
        return Err(ServiceError::InvalidPricing(format!(
            "subtotal {} discount {} total {}",
            subtotal, discount, total
        )));
    }

    Ok(PricedCart {
        lines: priced,
        subtotal,
        discount,
        tax,
        shipping,
        total,
    })
}

/// Loads promotions targeting any of the given variants or products whose item and
/// campaign are both live at `now`.
pub async fn eligible_promotions<C: ConnectionTrait>(
    conn: &C,
    lines: &[CartLine],
    now: DateTime<Utc>,
) -> Result<Vec<PromotionItemModel>, ServiceError> {
    if lines.is_empty() {
        return Ok(Vec::new());
    }

    let variant_ids: Vec<Uuid> = lines.iter().map(|l| l.variant_id).collect();
    let product_ids: Vec<Uuid> = lines.iter().map(|l| l.product_id).collect();

    let rows = PromotionItem::find()
        .find_also_related(PromotionCampaign)
        .filter(promotion_item::Column::IsActive.eq(true))
        .filter(
            Condition::any()
                .add(promotion_item::Column::VariantId.is_in(variant_ids))
                .add(promotion_item::Column::ProductId.is_in(product_ids)),
        )
        .all(conn)
        .await?;

    Ok(rows
        .into_iter()
        .filter_map(|(item, campaign)| {
            let campaign = campaign?;
            (item.is_live_at(now) && campaign.is_live_at(now)).then_some(item)
        })
        .collect())
}
