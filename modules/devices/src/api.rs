//! REST surface for `/v1/devices`.

use std::sync::Arc;

use axum::extract::{Extension, Path, State};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use gateway_http::context::RequestContext;
use gateway_http::middleware::validation::{InsertError, RouteSpec, RouteTable};
use gateway_http::problem::{Problem, codes};
use gateway_rpc::RpcError;
use http::{Method, StatusCode, header};
use utoipa::OpenApi;
use uuid::Uuid;

use crate::model::{
    Device, DeviceState, DeviceUpdate, NewDevice, validate_device_update, validate_new_device,
};
use crate::rpc::DevicesRpc;

#[derive(Clone)]
pub struct DevicesApi {
    rpc: Arc<dyn DevicesRpc>,
}

/// Routes served by this module.
pub fn router(rpc: Arc<dyn DevicesRpc>) -> Router {
    Router::new()
        .route("/v1/devices", get(list_devices).post(create_device))
        .route(
            "/v1/devices/{id}",
            get(get_device).put(update_device).delete(delete_device),
        )
        .with_state(DevicesApi { rpc })
}

/// Operation specs the validation stage enforces for this module.
///
/// # Errors
/// Returns the matchit error on conflicting templates.
pub fn route_table() -> Result<RouteTable, InsertError> {
    RouteTable::new()
        .route(RouteSpec::new(Method::GET, "/v1/devices").authenticated())?
        .route(
            RouteSpec::new(Method::POST, "/v1/devices")
                .authenticated()
                .json_body(),
        )?
        .route(RouteSpec::new(Method::GET, "/v1/devices/{id}").authenticated())?
        .route(
            RouteSpec::new(Method::PUT, "/v1/devices/{id}")
                .authenticated()
                .json_body(),
        )?
        .route(RouteSpec::new(Method::DELETE, "/v1/devices/{id}").authenticated())
}

#[derive(OpenApi)]
#[openapi(
    paths(list_devices, create_device, get_device, update_device, delete_device),
    components(schemas(Device, DeviceState, NewDevice, DeviceUpdate)),
    tags((name = "devices", description = "Device inventory"))
)]
pub struct ApiDoc;

fn problem_from_rpc(err: &RpcError) -> Problem {
    let status = err.http_status();
    let code = match status {
        StatusCode::NOT_FOUND => codes::NOT_FOUND,
        StatusCode::CONFLICT => codes::CONFLICT,
        StatusCode::BAD_REQUEST => codes::VALIDATION_ERROR,
        StatusCode::UNAUTHORIZED => codes::UNAUTHORIZED,
        StatusCode::TOO_MANY_REQUESTS => codes::RATE_LIMIT_EXCEEDED,
        StatusCode::GATEWAY_TIMEOUT => codes::GATEWAY_TIMEOUT,
        StatusCode::SERVICE_UNAVAILABLE => codes::SERVICE_UNAVAILABLE,
        _ => codes::INTERNAL_ERROR,
    };

    let message = match err {
        RpcError::Status(status) if !status.message().is_empty() => status.message().to_owned(),
        other => other.to_string(),
    };
    Problem::new(status, code, message)
}

fn request_context(ctx: Option<Extension<RequestContext>>) -> RequestContext {
    ctx.map_or_else(|| RequestContext::new("local", "local"), |Extension(c)| c)
}

fn parse_id(raw: &str) -> Result<Uuid, Problem> {
    Uuid::parse_str(raw).map_err(|_| Problem::validation(format!("invalid device id {raw:?}")))
}

#[utoipa::path(
    get,
    path = "/v1/devices",
    tag = "devices",
    responses((status = 200, description = "All known devices", body = [Device]))
)]
async fn list_devices(
    State(api): State<DevicesApi>,
    ctx: Option<Extension<RequestContext>>,
) -> Response {
    let ctx = request_context(ctx);
    match api.rpc.list_devices(&ctx).await {
        Ok(devices) => Json(devices).into_response(),
        Err(err) => problem_from_rpc(&err).into_response(),
    }
}

#[utoipa::path(
    post,
    path = "/v1/devices",
    tag = "devices",
    request_body = NewDevice,
    responses(
        (status = 201, description = "Device created", body = Device),
        (status = 400, description = "Invalid payload"),
        (status = 409, description = "Duplicate or in-progress request")
    )
)]
async fn create_device(
    State(api): State<DevicesApi>,
    ctx: Option<Extension<RequestContext>>,
    Json(body): Json<NewDevice>,
) -> Response {
    if let Err(message) = validate_new_device(&body) {
        return Problem::validation(message).into_response();
    }

    let ctx = request_context(ctx);
    match api.rpc.create_device(&ctx, body).await {
        Ok(device) => {
            let location = format!("/v1/devices/{}", device.id);
            (
                StatusCode::CREATED,
                [(header::LOCATION, location)],
                Json(device),
            )
                .into_response()
        }
        Err(err) => problem_from_rpc(&err).into_response(),
    }
}

#[utoipa::path(
    get,
    path = "/v1/devices/{id}",
    tag = "devices",
    params(("id" = Uuid, Path, description = "Device id")),
    responses(
        (status = 200, description = "The device", body = Device),
        (status = 404, description = "Unknown device")
    )
)]
async fn get_device(
    State(api): State<DevicesApi>,
    ctx: Option<Extension<RequestContext>>,
    Path(id): Path<String>,
) -> Response {
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(problem) => return problem.into_response(),
    };

    let ctx = request_context(ctx);
    match api.rpc.get_device(&ctx, id).await {
        Ok(device) => Json(device).into_response(),
        Err(err) => problem_from_rpc(&err).into_response(),
    }
}

#[utoipa::path(
    put,
    path = "/v1/devices/{id}",
    tag = "devices",
    request_body = DeviceUpdate,
    params(("id" = Uuid, Path, description = "Device id")),
    responses(
        (status = 200, description = "Updated device", body = Device),
        (status = 404, description = "Unknown device"),
        (status = 409, description = "Device is in use")
    )
)]
async fn update_device(
    State(api): State<DevicesApi>,
    ctx: Option<Extension<RequestContext>>,
    Path(id): Path<String>,
    Json(body): Json<DeviceUpdate>,
) -> Response {
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(problem) => return problem.into_response(),
    };
    if let Err(message) = validate_device_update(&body) {
        return Problem::validation(message).into_response();
    }

    let ctx = request_context(ctx);
    match api.rpc.update_device(&ctx, id, body).await {
        Ok(device) => Json(device).into_response(),
        Err(err) => problem_from_rpc(&err).into_response(),
    }
}

#[utoipa::path(
    delete,
    path = "/v1/devices/{id}",
    tag = "devices",
    params(("id" = Uuid, Path, description = "Device id")),
    responses(
        (status = 204, description = "Device removed"),
        (status = 404, description = "Unknown device"),
        (status = 409, description = "Device is in use")
    )
)]
async fn delete_device(
    State(api): State<DevicesApi>,
    ctx: Option<Extension<RequestContext>>,
    Path(id): Path<String>,
) -> Response {
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(problem) => return problem.into_response(),
    };

    let ctx = request_context(ctx);
    match api.rpc.delete_device(&ctx, id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => problem_from_rpc(&err).into_response(),
    }
}
