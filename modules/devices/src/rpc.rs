//! The downstream seam.
//!
//! Handlers talk to [`DevicesRpc`]; the production implementation executes
//! `DeviceService` calls through the resilience adapter (breaker, retry,
//! timeout, metadata propagation). Tests plug in
//! [`crate::testing::InMemoryDevices`].

use std::sync::Arc;

use async_trait::async_trait;
use gateway_http::context::RequestContext;
use gateway_rpc::{RpcAdapter, RpcError};
use tonic::transport::Channel;
use tonic::{Request, Status};
use uuid::Uuid;

use crate::model::{Device, DeviceUpdate, NewDevice};
use crate::proto;
use crate::proto::device_service_client::DeviceServiceClient;

#[async_trait]
pub trait DevicesRpc: Send + Sync {
    async fn list_devices(&self, ctx: &RequestContext) -> Result<Vec<Device>, RpcError>;
    async fn get_device(&self, ctx: &RequestContext, id: Uuid) -> Result<Device, RpcError>;
    async fn create_device(
        &self,
        ctx: &RequestContext,
        device: NewDevice,
    ) -> Result<Device, RpcError>;
    async fn update_device(
        &self,
        ctx: &RequestContext,
        id: Uuid,
        update: DeviceUpdate,
    ) -> Result<Device, RpcError>;
    async fn delete_device(&self, ctx: &RequestContext, id: Uuid) -> Result<(), RpcError>;
}

/// gRPC-backed implementation over a shared channel.
pub struct GrpcDevices {
    channel: Channel,
    adapter: Arc<RpcAdapter>,
}

impl GrpcDevices {
    #[must_use]
    pub fn new(channel: Channel, adapter: Arc<RpcAdapter>) -> Self {
        Self { channel, adapter }
    }
}

fn into_domain(wire: proto::Device) -> Result<Device, RpcError> {
    Device::try_from(wire)
        .map_err(|err| RpcError::Status(Status::internal(format!("bad downstream payload: {err}"))))
}

#[async_trait]
impl DevicesRpc for GrpcDevices {
    async fn list_devices(&self, ctx: &RequestContext) -> Result<Vec<Device>, RpcError> {
        let response = self
            .adapter
            .call_unary(
                ctx,
                &self.channel,
                proto::ListDevicesRequest { page_size: 0 },
                |channel, req: Request<proto::ListDevicesRequest>| async move {
                    DeviceServiceClient::new(channel).list_devices(req).await
                },
                "devices.v1.DeviceService/ListDevices",
            )
            .await?;

        response.devices.into_iter().map(into_domain).collect()
    }

    async fn get_device(&self, ctx: &RequestContext, id: Uuid) -> Result<Device, RpcError> {
        let response = self
            .adapter
            .call_unary(
                ctx,
                &self.channel,
                proto::GetDeviceRequest { id: id.to_string() },
                |channel, req: Request<proto::GetDeviceRequest>| async move {
                    DeviceServiceClient::new(channel).get_device(req).await
                },
                "devices.v1.DeviceService/GetDevice",
            )
            .await?;

        into_domain(response)
    }

    async fn create_device(
        &self,
        ctx: &RequestContext,
        device: NewDevice,
    ) -> Result<Device, RpcError> {
        let response = self
            .adapter
            .call_unary(
                ctx,
                &self.channel,
                proto::CreateDeviceRequest {
                    name: device.name,
                    brand: device.brand,
                    state: device.state.as_str().to_owned(),
                },
                |channel, req: Request<proto::CreateDeviceRequest>| async move {
                    DeviceServiceClient::new(channel).create_device(req).await
                },
                "devices.v1.DeviceService/CreateDevice",
            )
            .await?;

        into_domain(response)
    }

    async fn update_device(
        &self,
        ctx: &RequestContext,
        id: Uuid,
        update: DeviceUpdate,
    ) -> Result<Device, RpcError> {
        let response = self
            .adapter
            .call_unary(
                ctx,
                &self.channel,
                proto::UpdateDeviceRequest {
                    id: id.to_string(),
                    name: update.name,
                    brand: update.brand,
                    state: update.state.as_str().to_owned(),
                },
                |channel, req: Request<proto::UpdateDeviceRequest>| async move {
                    DeviceServiceClient::new(channel).update_device(req).await
                },
                "devices.v1.DeviceService/UpdateDevice",
            )
            .await?;

        into_domain(response)
    }

    async fn delete_device(&self, ctx: &RequestContext, id: Uuid) -> Result<(), RpcError> {
        self.adapter
            .call_unary(
                ctx,
                &self.channel,
                proto::DeleteDeviceRequest { id: id.to_string() },
                |channel, req: Request<proto::DeleteDeviceRequest>| async move {
                    DeviceServiceClient::new(channel).delete_device(req).await
                },
                "devices.v1.DeviceService/DeleteDevice",
            )
            .await?;
        Ok(())
    }
}
