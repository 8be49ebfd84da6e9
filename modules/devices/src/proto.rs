//! Wire types and client for `devices.v1.DeviceService`.
//!
//! Vendored from the service's proto definition so the build needs no
//! `protoc`; the client follows the shape tonic's codegen emits for unary
//! methods. Timestamps travel as Unix milliseconds.

/// `devices.v1.Device`
#[derive(Clone, PartialEq, prost::Message)]
pub struct Device {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(string, tag = "2")]
    pub name: String,
    #[prost(string, tag = "3")]
    pub brand: String,
    #[prost(string, tag = "4")]
    pub state: String,
    #[prost(int64, tag = "5")]
    pub created_at_ms: i64,
    #[prost(int64, tag = "6")]
    pub updated_at_ms: i64,
}

/// `devices.v1.ListDevicesRequest`
#[derive(Clone, PartialEq, prost::Message)]
pub struct ListDevicesRequest {
    #[prost(int32, tag = "1")]
    pub page_size: i32,
}

/// `devices.v1.ListDevicesResponse`
#[derive(Clone, PartialEq, prost::Message)]
pub struct ListDevicesResponse {
    #[prost(message, repeated, tag = "1")]
    pub devices: Vec<Device>,
}

/// `devices.v1.GetDeviceRequest`
#[derive(Clone, PartialEq, prost::Message)]
pub struct GetDeviceRequest {
    #[prost(string, tag = "1")]
    pub id: String,
}

/// `devices.v1.CreateDeviceRequest`
#[derive(Clone, PartialEq, prost::Message)]
pub struct CreateDeviceRequest {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, tag = "2")]
    pub brand: String,
    #[prost(string, tag = "3")]
    pub state: String,
}

/// `devices.v1.UpdateDeviceRequest`
#[derive(Clone, PartialEq, prost::Message)]
pub struct UpdateDeviceRequest {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(string, tag = "2")]
    pub name: String,
    #[prost(string, tag = "3")]
    pub brand: String,
    #[prost(string, tag = "4")]
    pub state: String,
}

/// `devices.v1.DeleteDeviceRequest`
#[derive(Clone, PartialEq, prost::Message)]
pub struct DeleteDeviceRequest {
    #[prost(string, tag = "1")]
    pub id: String,
}

/// `devices.v1.DeleteDeviceResponse`
#[derive(Clone, PartialEq, prost::Message)]
pub struct DeleteDeviceResponse {}

pub mod device_service_client {
    use tonic::transport::Channel;

    use super::{
        CreateDeviceRequest, DeleteDeviceRequest, DeleteDeviceResponse, Device, GetDeviceRequest,
        ListDevicesRequest, ListDevicesResponse, UpdateDeviceRequest,
    };

    #[derive(Debug, Clone)]
    pub struct DeviceServiceClient {
        inner: tonic::client::Grpc<Channel>,
    }

    impl DeviceServiceClient {
        #[must_use]
        pub fn new(channel: Channel) -> Self {
            Self {
                inner: tonic::client::Grpc::new(channel),
            }
        }

        async fn ready(&mut self) -> Result<(), tonic::Status> {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::unavailable(format!("devices service was not ready: {e}"))
            })
        }

        /// # Errors
        /// Returns the downstream `tonic::Status` on failure.
        pub async fn list_devices(
            &mut self,
            request: tonic::Request<ListDevicesRequest>,
        ) -> Result<tonic::Response<ListDevicesResponse>, tonic::Status> {
            self.ready().await?;
            let codec = tonic_prost::ProstCodec::default();
            let path =
                http::uri::PathAndQuery::from_static("/devices.v1.DeviceService/ListDevices");
            self.inner.unary(request, path, codec).await
        }

        /// # Errors
        /// Returns the downstream `tonic::Status` on failure.
        pub async fn get_device(
            &mut self,
            request: tonic::Request<GetDeviceRequest>,
        ) -> Result<tonic::Response<Device>, tonic::Status> {
            self.ready().await?;
            let codec = tonic_prost::ProstCodec::default();
            let path = http::uri::PathAndQuery::from_static("/devices.v1.DeviceService/GetDevice");
            self.inner.unary(request, path, codec).await
        }

        /// # Errors
        /// Returns the downstream `tonic::Status` on failure.
        pub async fn create_device(
            &mut self,
            request: tonic::Request<CreateDeviceRequest>,
        ) -> Result<tonic::Response<Device>, tonic::Status> {
            self.ready().await?;
            let codec = tonic_prost::ProstCodec::default();
            let path =
                http::uri::PathAndQuery::from_static("/devices.v1.DeviceService/CreateDevice");
            self.inner.unary(request, path, codec).await
        }

        /// # Errors
        /// Returns the downstream `tonic::Status` on failure.
        pub async fn update_device(
            &mut self,
            request: tonic::Request<UpdateDeviceRequest>,
        ) -> Result<tonic::Response<Device>, tonic::Status> {
            self.ready().await?;
            let codec = tonic_prost::ProstCodec::default();
            let path =
                http::uri::PathAndQuery::from_static("/devices.v1.DeviceService/UpdateDevice");
            self.inner.unary(request, path, codec).await
        }

        /// # Errors
        /// Returns the downstream `tonic::Status` on failure.
        pub async fn delete_device(
            &mut self,
            request: tonic::Request<DeleteDeviceRequest>,
        ) -> Result<tonic::Response<DeleteDeviceResponse>, tonic::Status> {
            self.ready().await?;
            let codec = tonic_prost::ProstCodec::default();
            let path =
                http::uri::PathAndQuery::from_static("/devices.v1.DeviceService/DeleteDevice");
            self.inner.unary(request, path, codec).await
        }
    }
}
