//! Gateway: the HTTP webhook endpoint and the per-request pipeline behind it.
//!
//! The platform always gets `200 OK`; downstream work is awaited before the response is sent.

mod pipeline;
mod server;

pub use pipeline::{FailureCounts, Outcome, Pipeline, PipelineError, Stage, StatsSnapshot};
pub use server::{build_state, router, run_gateway, GatewayState, ACK_BODY};
