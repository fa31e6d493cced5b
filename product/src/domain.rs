use std::str::FromStr;

use chrono::{DateTime, Utc};
use common::error::DomainError;
use sqlx::types::Decimal;
use uuid::Uuid;

const MAX_NAME_LEN: usize = 255;
/// Prices are stored as NUMERIC(10, 2).
const PRICE_SCALE: u32 = 2;
const PRICE_LIMIT: i64 = 100_000_000;

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Product {
    pub id: Uuid,
    pub name: String,
    pub price: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Result of applying new details to a product.
#[derive(Debug)]
pub struct Change {
    pub product: Product,
    pub changed_fields: Vec<String>,
    pub price_changed: bool,
}

impl Product {
    pub fn new(name: &str, price: &str) -> Result<Self, DomainError> {
        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4(),
            name: validate_name(name)?,
            price: parse_price(price)?,
            created_at: now,
            updated_at: now,
        })
    }

    /// `None` when neither the name nor the price value changes.
    pub fn with_details(&self, name: &str, price: &str) -> Result<Option<Change>, DomainError> {
        let name = validate_name(name)?;
        let price = parse_price(price)?;

        let mut changed_fields = Vec::new();
        if name != self.name {
            changed_fields.push("name".to_string());
        }
        let price_changed = price != self.price;
        if price_changed {
            changed_fields.push("price".to_string());
        }
        if changed_fields.is_empty() {
            return Ok(None);
        }

        Ok(Some(Change {
            product: Product {
                name,
                price,
                updated_at: Utc::now(),
                ..self.clone()
            },
            changed_fields,
            price_changed,
        }))
    }

    pub fn to_proto(&self) -> proto::product::Product {
        proto::product::Product {
            id: self.id.to_string(),
            name: self.name.clone(),
            price: self.price.to_string(),
            created_at: self.created_at.timestamp(),
            updated_at: self.updated_at.timestamp(),
        }
    }
}

pub fn parse_id(id: &str) -> Result<Uuid, DomainError> {
    Uuid::parse_str(id.trim())
        .map_err(|e| DomainError::validation(format!("invalid product ID: {e}")))
}

fn validate_name(name: &str) -> Result<String, DomainError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(DomainError::validation("product name is required"));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(DomainError::validation("product name must be at most 255 characters"));
    }
    Ok(name.to_owned())
}

/// Parses a price, normalised to two decimal places.
pub fn parse_price(price: &str) -> Result<Decimal, DomainError> {
    let value = parse_decimal(price)?;
    if value < Decimal::ZERO {
        return Err(DomainError::validation("price cannot be negative"));
    }
    if value >= Decimal::from(PRICE_LIMIT) {
        return Err(DomainError::validation("price must be below 100000000"));
    }
    if value.normalize().scale() > PRICE_SCALE {
        return Err(DomainError::validation("price must have at most two decimal places"));
    }

    let mut value = if value.is_zero() { Decimal::ZERO } else { value };
    value.rescale(PRICE_SCALE);
    Ok(value)
}

/// Any decimal, for range bounds.
pub fn parse_decimal(value: &str) -> Result<Decimal, DomainError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(DomainError::validation("price is required"));
    }
    Decimal::from_str(value).map_err(|_| DomainError::validation(format!("invalid price format: {value}")))
}
