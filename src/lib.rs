pub mod broker;
pub mod config;
pub mod envelope;
pub mod log;
pub mod server;
pub mod service;
pub mod util;

/// Generated gRPC types for the `monitoring.v1` package
pub mod proto {
    tonic::include_proto!("monitoring.v1");
}

pub use broker::producer::ProducerAdapter;
pub use broker::registry::SessionRegistry;
pub use broker::session::{SessionHandle, StreamSession};
pub use broker::subscriber::CommandSubscriber;
pub use envelope::{CommandEnvelope, MetricsEnvelope};
pub use server::Broker;
