// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! `axum` router exposing the Coordinator's RPC surface: client
//! lifecycle, dispatch, and the RC's allocation-delivery callback.

use std::sync::Arc;

use axum::{extract::State, routing::post, Json, Router};

use crate::distributed::protocol::{
    CoordinatorStatus, NextRequest, NextResponse, RegisterClientRequest, ReportErrorRequest,
    ReportSuccessRequest, SetMaxClientsRequest, StopClientRequest, UnregisterClientRequest,
};

use super::Coordinator;

/// Build the coordinator's router.
pub fn router(coordinator: Arc<Coordinator>) -> Router {
    Router::new()
        .route("/coordinator/register_client", post(register_client))
        .route("/coordinator/unregister_client", post(unregister_client))
        .route("/coordinator/next", post(next))
        .route("/coordinator/report_success", post(report_success))
        .route("/coordinator/report_error", post(report_error))
        .route("/coordinator/set_max_clients", post(set_max_clients))
        .route("/coordinator/stop_client", post(stop_client))
        .route("/coordinator/get_status", post(get_status))
        .route("/rc/allocation", post(allocation))
        .with_state(coordinator)
}

async fn register_client(
    State(coordinator): State<Arc<Coordinator>>,
    Json(req): Json<RegisterClientRequest>,
) -> Json<()> {
    coordinator.register_client(req.host, req.url, req.logfile).await;
    Json(())
}

async fn unregister_client(
    State(coordinator): State<Arc<Coordinator>>,
    Json(req): Json<UnregisterClientRequest>,
) -> Json<()> {
    coordinator.unregister_client(&req.url, req.done).await;
    Json(())
}

async fn next(
    State(coordinator): State<Arc<Coordinator>>,
    Json(req): Json<NextRequest>,
) -> Json<NextResponse> {
    Json(NextResponse {
        outcome: coordinator.next(&req.url),
    })
}

async fn report_success(
    State(coordinator): State<Arc<Coordinator>>,
    Json(req): Json<ReportSuccessRequest>,
) -> Json<NextResponse> {
    Json(NextResponse {
        outcome: coordinator.report_success(&req.url, req.id),
    })
}

async fn report_error(
    State(coordinator): State<Arc<Coordinator>>,
    Json(req): Json<ReportErrorRequest>,
) -> Json<()> {
    coordinator.report_error(&req.url, req.id, &req.message);
    Json(())
}

async fn set_max_clients(
    State(coordinator): State<Arc<Coordinator>>,
    Json(req): Json<SetMaxClientsRequest>,
) -> Json<()> {
    coordinator.set_max_clients(req.max_clients);
    Json(())
}

async fn stop_client(
    State(coordinator): State<Arc<Coordinator>>,
    Json(req): Json<StopClientRequest>,
) -> Json<()> {
    coordinator.stop_client(&req.url).await;
    Json(())
}

async fn get_status(State(coordinator): State<Arc<Coordinator>>) -> Json<CoordinatorStatus> {
    Json(coordinator.get_status())
}

/// Receives the RC's pushed allocation update (see `rc::service::notify_coordinators`).
/// The coordinator doesn't currently act on the CPU figure beyond logging
/// it — processor counts are driven by the RC independently via
/// `register_processor`/`unregister_processor` — but the route exists so
/// the RC's delivery call has somewhere to land.
async fn allocation(
    State(_coordinator): State<Arc<Coordinator>>,
    Json(body): Json<serde_json::Value>,
) -> Json<()> {
    tracing::debug!(?body, "received allocation update from resource controller");
    Json(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributed::coordinator::service::CoordinatorConfig;
    use crate::distributed::coordinator::state::TaskSource;
    use crate::distributed::launcher::{Launcher, SshLauncher};
    use tempfile::TempDir;

    fn source() -> Box<dyn TaskSource> {
        Box::new(std::iter::empty::<serde_json::Value>())
    }

    #[tokio::test]
    async fn test_router_builds() {
        let dir = TempDir::new().unwrap();
        let config = CoordinatorConfig {
            data_dir: dir.path().display().to_string(),
            ..Default::default()
        };
        let launcher: Arc<dyn Launcher> = Arc::new(SshLauncher::default());
        let coordinator = Arc::new(Coordinator::open(config, source(), launcher).unwrap());
        let _app = router(coordinator);
    }
}
