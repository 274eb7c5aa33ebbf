//! Opal peer node - the control-plane surface of one cluster member
//!
//! A peer exposes two HTTP surfaces. The peer RPC surface under
//! `/opal/peer/v1` is how the coordinator pushes configuration changes,
//! triggers reloads, collects telemetry and opens long-lived event/trace/log
//! streams; every call is authenticated with the cluster shared key and a
//! clock-skew-checked timestamp. The admin surface carries operator calls,
//! with the bucket lifecycle endpoints as its exemplar, and projects every
//! exchange into an audit entry.

pub mod admin;
pub mod auth;
pub mod bandwidth;
pub mod bucketmeta;
pub mod config;
pub mod error;
pub mod heal;
pub mod iam;
pub mod locks;
pub mod metacache;
pub mod object;
pub mod probe;
pub mod profiler;
pub mod routes;
pub mod server;
pub mod state;
pub mod stream;
pub mod tracker;
pub mod update;

pub use config::PeerConfig;
pub use error::{AdminError, PeerError, PeerResult};
pub use server::{create_router, run_server, start_background_server};
pub use state::{PeerServices, ServiceSignal};
