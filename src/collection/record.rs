//! The completed car record handed to the prediction service.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::fields::FieldKey;
use crate::error::CollectionError;

/// A fully collected car description.
///
/// Numeric-looking fields the model parses itself (`mileage`, `engine`,
/// `max_power`) stay as the user typed them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CarRecord {
    pub name: String,
    pub year: i32,
    pub km_driven: i64,
    pub fuel: String,
    pub seller_type: String,
    pub transmission: String,
    pub owner: String,
    pub mileage: String,
    pub engine: String,
    pub max_power: String,
    /// Never collected; the model imputes it.
    pub torque: Option<String>,
    pub seats: f64,
}

impl CarRecord {
    /// Assemble a record from the values collected during a session.
    pub fn from_collected(collected: &BTreeMap<FieldKey, String>) -> Result<Self, CollectionError> {
        let text = |key: FieldKey| -> Result<String, CollectionError> {
            collected
                .get(&key)
                .cloned()
                .ok_or(CollectionError::MissingField(key.as_str()))
        };

        Ok(Self {
            name: text(FieldKey::Name)?,
            year: parse(FieldKey::Year, &text(FieldKey::Year)?)?,
            km_driven: parse(FieldKey::KmDriven, &text(FieldKey::KmDriven)?)?,
            fuel: text(FieldKey::Fuel)?,
            seller_type: text(FieldKey::SellerType)?,
            transmission: text(FieldKey::Transmission)?,
            owner: text(FieldKey::Owner)?,
            mileage: text(FieldKey::Mileage)?,
            engine: text(FieldKey::Engine)?,
            max_power: text(FieldKey::MaxPower)?,
            torque: None,
            seats: parse(FieldKey::Seats, &text(FieldKey::Seats)?)?,
        })
    }
}

fn parse<T: std::str::FromStr>(key: FieldKey, value: &str) -> Result<T, CollectionError> {
    value.parse().map_err(|_| CollectionError::Unparseable {
        field: key.as_str(),
        value: value.to_string(),
    })
}
