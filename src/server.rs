//! Broker process wiring
//!
//! Owns the pieces that live as long as the process: the shared producer, the
//! session registry and the root cancellation token every session derives from.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;
use tracing::{info, warn};

use crate::broker::commands::CommandPublisher;
use crate::broker::producer::ProducerAdapter;
use crate::broker::registry::SessionRegistry;
use crate::config::Config;
use crate::log::{LogBackend, LogResult};
use crate::proto::monitoring_service_server::MonitoringServiceServer;
use crate::service::MonitoringServiceImpl;

pub struct Broker {
    config: Config,
    backend: Arc<dyn LogBackend>,
    producer: Arc<ProducerAdapter>,
    registry: Arc<SessionRegistry>,
    shutdown: CancellationToken,
}

impl Broker {
    /// Create the process-wide producer and registry
    pub fn new(config: Config, backend: Arc<dyn LogBackend>) -> LogResult<Self> {
        let producer = Arc::new(ProducerAdapter::from_config(
            backend.producer()?,
            &config.topics,
            &config.producer,
        ));

        Ok(Self {
            config,
            backend,
            producer,
            registry: Arc::new(SessionRegistry::new()),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn registry(&self) -> Arc<SessionRegistry> {
        Arc::clone(&self.registry)
    }

    /// Configured listen address
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.config.server.host, self.config.server.port)
    }

    pub fn service(&self) -> LogResult<MonitoringServiceServer<MonitoringServiceImpl>> {
        let commands = CommandPublisher::from_config(
            self.backend.producer()?,
            &self.config.topics,
            &self.config.producer,
        );

        Ok(MonitoringServiceServer::new(MonitoringServiceImpl::new(
            Arc::clone(&self.backend),
            Arc::clone(&self.producer),
            commands,
            Arc::clone(&self.registry),
            self.config.session.clone().into(),
            self.shutdown.clone(),
        )))
    }

    /// Serve on `listener` until `signal` resolves
    ///
    /// When the signal fires every session is cancelled, in-flight calls are
    /// drained and the producer is flushed one last time.
    pub async fn serve<F>(self, listener: TcpListener, signal: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let service = self.service()?;

        match listener.local_addr() {
            Ok(addr) => info!("broker listening on {addr}"),
            Err(e) => warn!("broker listening on unknown address: {e}"),
        }

        let shutdown = self.shutdown.clone();
        let registry = Arc::clone(&self.registry);
        let result = Server::builder()
            .add_service(service)
            .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async move {
                signal.await;
                info!("shutdown requested, closing {} session(s)", registry.len());
                shutdown.cancel();
            })
            .await;

        self.shutdown.cancel();

        if let Err(e) = self.producer.shutdown().await {
            warn!("final producer flush failed: {e}");
        }

        info!("broker stopped");
        result.map_err(Into::into)
    }
}
