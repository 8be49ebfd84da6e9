//! Domain model and wire mapping.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::proto;

/// Lifecycle state of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub enum DeviceState {
    Available,
    InUse,
    Maintenance,
    Decommissioned,
}

impl DeviceState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::InUse => "in-use",
            Self::Maintenance => "maintenance",
            Self::Decommissioned => "decommissioned",
        }
    }
}

impl std::str::FromStr for DeviceState {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "available" => Ok(Self::Available),
            "in-use" => Ok(Self::InUse),
            "maintenance" => Ok(Self::Maintenance),
            "decommissioned" => Ok(Self::Decommissioned),
            other => Err(ModelError::UnknownState(other.to_owned())),
        }
    }
}

impl std::fmt::Display for DeviceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("unknown device state {0:?}")]
    UnknownState(String),

    #[error("downstream sent a malformed device id {0:?}")]
    BadId(String),
}

/// A device as the API exposes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Device {
    pub id: Uuid,
    pub name: String,
    pub brand: String,
    pub state: DeviceState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<proto::Device> for Device {
    type Error = ModelError;

    fn try_from(wire: proto::Device) -> Result<Self, Self::Error> {
        let id = Uuid::parse_str(&wire.id).map_err(|_| ModelError::BadId(wire.id.clone()))?;
        let state = wire.state.parse()?;
        Ok(Self {
            id,
            name: wire.name,
            brand: wire.brand,
            state,
            created_at: millis_to_utc(wire.created_at_ms),
            updated_at: millis_to_utc(wire.updated_at_ms),
        })
    }
}

fn millis_to_utc(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
}

/// Body of `POST /v1/devices`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewDevice {
    pub name: String,
    pub brand: String,
    pub state: DeviceState,
}

/// Body of `PUT /v1/devices/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DeviceUpdate {
    pub name: String,
    pub brand: String,
    pub state: DeviceState,
}

/// Field-level validation the gateway performs before calling downstream.
///
/// # Errors
/// Returns the offending field's message.
pub fn validate_new_device(device: &NewDevice) -> Result<(), String> {
    validate_fields(&device.name, &device.brand)
}

/// # Errors
/// Returns the offending field's message.
pub fn validate_device_update(update: &DeviceUpdate) -> Result<(), String> {
    validate_fields(&update.name, &update.brand)
}

fn validate_fields(name: &str, brand: &str) -> Result<(), String> {
    if name.trim().is_empty() {
        return Err("name must not be empty".to_owned());
    }
    if name.len() > 255 {
        return Err("name must be at most 255 characters".to_owned());
    }
    if brand.trim().is_empty() {
        return Err("brand must not be empty".to_owned());
    }
    if brand.len() > 255 {
        return Err("brand must be at most 255 characters".to_owned());
    }
    Ok(())
}
