//! In-memory [`DevicesRpc`] used by tests and local development.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use gateway_http::context::RequestContext;
use gateway_rpc::RpcError;
use parking_lot::Mutex;
use tonic::{Code, Status};
use uuid::Uuid;

use crate::model::{Device, DeviceState, DeviceUpdate, NewDevice};
use crate::rpc::DevicesRpc;

/// In-memory device inventory with the downstream service's semantics:
/// unknown ids are `NotFound`, mutating an in-use device is
/// `FailedPrecondition`, and an optional injected failure simulates outages.
#[derive(Default)]
pub struct InMemoryDevices {
    devices: Mutex<HashMap<Uuid, Device>>,
    failure: Mutex<Option<Code>>,
    latency: Mutex<Option<std::time::Duration>>,
}

impl InMemoryDevices {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a device directly, bypassing the RPC surface.
    pub fn seed(&self, name: &str, brand: &str, state: DeviceState) -> Device {
        let now = Utc::now();
        let device = Device {
            id: Uuid::new_v4(),
            name: name.to_owned(),
            brand: brand.to_owned(),
            state,
            created_at: now,
            updated_at: now,
        };
        self.devices.lock().insert(device.id, device.clone());
        device
    }

    /// Make every subsequent call fail with `code`; `None` heals the service.
    pub fn set_failure(&self, code: Option<Code>) {
        *self.failure.lock() = code;
    }

    /// Delay every call, for tests that need requests to overlap.
    pub fn set_latency(&self, latency: Option<std::time::Duration>) {
        *self.latency.lock() = latency;
    }

    async fn check_failure(&self) -> Result<(), RpcError> {
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if let Some(code) = *self.failure.lock() {
            return Err(RpcError::Status(Status::new(code, "injected failure")));
        }
        Ok(())
    }
}

#[async_trait]
impl DevicesRpc for InMemoryDevices {
    async fn list_devices(&self, _ctx: &RequestContext) -> Result<Vec<Device>, RpcError> {
        self.check_failure().await?;
        let mut devices: Vec<_> = self.devices.lock().values().cloned().collect();
        devices.sort_by_key(|d| (d.created_at, d.id));
        Ok(devices)
    }

    async fn get_device(&self, _ctx: &RequestContext, id: Uuid) -> Result<Device, RpcError> {
        self.check_failure().await?;
        self.devices
            .lock()
            .get(&id)
            .cloned()
            .ok_or_else(|| RpcError::Status(Status::not_found(format!("device {id} not found"))))
    }

    async fn create_device(
        &self,
        _ctx: &RequestContext,
        device: NewDevice,
    ) -> Result<Device, RpcError> {
        self.check_failure().await?;
        let now = Utc::now();
        let created = Device {
            id: Uuid::new_v4(),
            name: device.name,
            brand: device.brand,
            state: device.state,
            created_at: now,
            updated_at: now,
        };
        self.devices.lock().insert(created.id, created.clone());
        Ok(created)
    }

    async fn update_device(
        &self,
        _ctx: &RequestContext,
        id: Uuid,
        update: DeviceUpdate,
    ) -> Result<Device, RpcError> {
        self.check_failure().await?;
        let mut devices = self.devices.lock();
        let existing = devices
            .get_mut(&id)
            .ok_or_else(|| RpcError::Status(Status::not_found(format!("device {id} not found"))))?;

        // An in-use device only accepts a transition out of in-use.
        if existing.state == DeviceState::InUse && update.state == DeviceState::InUse {
            return Err(RpcError::Status(Status::failed_precondition(
                "device is in use",
            )));
        }

        existing.name = update.name;
        existing.brand = update.brand;
        existing.state = update.state;
        existing.updated_at = Utc::now();
        Ok(existing.clone())
    }

    async fn delete_device(&self, _ctx: &RequestContext, id: Uuid) -> Result<(), RpcError> {
        self.check_failure().await?;
        let mut devices = self.devices.lock();
        match devices.get(&id) {
            None => Err(RpcError::Status(Status::not_found(format!(
                "device {id} not found"
            )))),
            Some(device) if device.state == DeviceState::InUse => Err(RpcError::Status(
                Status::failed_precondition("device is in use"),
            )),
            Some(_) => {
                devices.remove(&id);
                Ok(())
            }
        }
    }
}
