// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! `axum` router exposing the RC's RPC surface. One route per method in
//! spec.md §6's Resource Controller interface list.

use std::sync::Arc;

use axum::{extract::State, routing::post, Json, Router};

use crate::api::ApiResult;
use crate::distributed::protocol::{
    AcquireRuleRequest, AcquireRuleResponse, DelRuleRequest, GetResourceRequest,
    RcStatus, RegisterCoordinatorRequest, RegisterCoordinatorResponse, RegisterProcessorRequest,
    ReleaseRuleRequest, ReportLoadRequest, ReportLoadResponse, RequestCpusRequest, RequestCpusResponse,
    SetLoadRequest, SetRuleRequest, UnregisterCoordinatorRequest, UnregisterProcessorRequest,
};
use crate::distributed::types::ResourceOutcome;

use super::ResourceController;

/// Build the RC's router. `Arc<ResourceController>` is shared across every
/// request handled on this bind address.
pub fn router(rc: Arc<ResourceController>) -> Router {
    Router::new()
        .route("/rc/register_coordinator", post(register_coordinator))
        .route("/rc/unregister_coordinator", post(unregister_coordinator))
        .route("/rc/request_cpus", post(request_cpus))
        .route("/rc/register_processor", post(register_processor))
        .route("/rc/unregister_processor", post(unregister_processor))
        .route("/rc/report_load", post(report_load))
        .route("/rc/get_resource", post(get_resource))
        .route("/rc/acquire_rule", post(acquire_rule))
        .route("/rc/release_rule", post(release_rule))
        .route("/rc/setrule", post(setrule))
        .route("/rc/delrule", post(delrule))
        .route("/rc/setload", post(setload))
        .route("/rc/retry_unused_hosts", post(retry_unused_hosts))
        .route("/rc/get_status", post(get_status))
        .with_state(rc)
}

async fn register_coordinator(
    State(rc): State<Arc<ResourceController>>,
    Json(req): Json<RegisterCoordinatorRequest>,
) -> Json<RegisterCoordinatorResponse> {
    rc.register_coordinator(req.url.clone(), req.priority).await;
    Json(RegisterCoordinatorResponse { url: req.url })
}

async fn unregister_coordinator(
    State(rc): State<Arc<ResourceController>>,
    Json(req): Json<UnregisterCoordinatorRequest>,
) -> Json<()> {
    rc.unregister_coordinator(&req.url).await;
    Json(())
}

async fn request_cpus(
    State(rc): State<Arc<ResourceController>>,
    Json(req): Json<RequestCpusRequest>,
) -> ApiResult<Json<RequestCpusResponse>> {
    let allocated_cpu = rc.request_cpus(&req.url, req.priority).await?;
    Ok(Json(RequestCpusResponse { allocated_cpu }))
}

async fn register_processor(
    State(rc): State<Arc<ResourceController>>,
    Json(req): Json<RegisterProcessorRequest>,
) -> Json<()> {
    rc.register_processor(&req.url, &req.host).await;
    Json(())
}

async fn unregister_processor(
    State(rc): State<Arc<ResourceController>>,
    Json(req): Json<UnregisterProcessorRequest>,
) -> Json<()> {
    rc.unregister_processor(&req.url, &req.host).await;
    Json(())
}

async fn report_load(
    State(rc): State<Arc<ResourceController>>,
    Json(req): Json<ReportLoadRequest>,
) -> Json<ReportLoadResponse> {
    let not_overloaded = rc.report_load(&req.host, req.load).await;
    Json(ReportLoadResponse { not_overloaded })
}

async fn get_resource(
    State(rc): State<Arc<ResourceController>>,
    Json(req): Json<GetResourceRequest>,
) -> Json<ResourceOutcome> {
    Json(rc.get_resource(&req.host, &req.resource).await)
}

async fn acquire_rule(
    State(rc): State<Arc<ResourceController>>,
    Json(req): Json<AcquireRuleRequest>,
) -> Json<AcquireRuleResponse> {
    let (outcome, rule) = rc.acquire_rule(&req.host, &req.resource, &req.rule).await;
    Json(AcquireRuleResponse { outcome, rule })
}

async fn release_rule(
    State(rc): State<Arc<ResourceController>>,
    Json(req): Json<ReleaseRuleRequest>,
) -> ApiResult<Json<()>> {
    rc.release_rule(&req.host, &req.resource, req.succeeded).await?;
    Ok(Json(()))
}

async fn setrule(
    State(rc): State<Arc<ResourceController>>,
    Json(req): Json<SetRuleRequest>,
) -> ApiResult<Json<()>> {
    rc.setrule(req.name, req.path, req.acquire_command, req.release_command).await?;
    Ok(Json(()))
}

async fn delrule(
    State(rc): State<Arc<ResourceController>>,
    Json(req): Json<DelRuleRequest>,
) -> ApiResult<Json<()>> {
    rc.delrule(&req.name).await?;
    Ok(Json(()))
}

async fn setload(
    State(rc): State<Arc<ResourceController>>,
    Json(req): Json<SetLoadRequest>,
) -> ApiResult<Json<()>> {
    rc.setload(req.host, req.max_load).await?;
    Ok(Json(()))
}

async fn retry_unused_hosts(State(rc): State<Arc<ResourceController>>) -> Json<()> {
    rc.retry_unused_hosts().await;
    Json(())
}

async fn get_status(State(rc): State<Arc<ResourceController>>) -> Json<RcStatus> {
    Json(rc.get_status().await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributed::rc::service::ResourceControllerConfig;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_router_builds() {
        let dir = TempDir::new().unwrap();
        let config = ResourceControllerConfig {
            hosts_path: dir.path().join("hosts.txt").display().to_string(),
            data_dir: dir.path().join("data").display().to_string(),
            ..Default::default()
        };
        let rc = Arc::new(ResourceController::open(&config).unwrap());
        let _app = router(rc);
    }
}
