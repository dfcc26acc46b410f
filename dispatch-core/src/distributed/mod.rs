// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The three-role distributed task-dispatch system: a fleet-wide
//! [`rc::ResourceController`] allocates CPU shares and mediates named
//! resources, a per-job [`coordinator`] hands out task IDs from a user
//! iterator to registered processors, and a [`processor`] pulls tasks,
//! runs them, and reports outcomes back.
//!
//! Every role talks RPC over JSON/HTTP (`rpc::RpcClient` on the client
//! side, an `axum::Router` per role on the server side) rather than the
//! raw sentinel-tuple convention this system was originally specified
//! with — see `types::DispatchOutcome` for how the `false`/`true`/payload
//! convention is replaced with a proper enum.

pub mod coordinator;
pub mod launcher;
pub mod loadprobe;
pub mod processor;
pub mod protocol;
pub mod rc;
pub mod rpc;
pub mod store;
pub mod types;

pub use coordinator::{Coordinator, CoordinatorConfig};
pub use processor::{Processor, ProcessorConfig};
pub use rc::{ResourceController, ResourceControllerConfig};
