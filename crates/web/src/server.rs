use crate::app::App;
use crate::body::BoxError;
use http::Request;
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::{SocketAddr, ToSocketAddrs};
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{Level, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[derive(Debug)]
pub struct ServerBuilder {
    app: Option<App>,
    address: Option<Vec<SocketAddr>>,
}

impl ServerBuilder {
    fn new() -> Self {
        Self { app: None, address: None }
    }

    pub fn address<A: ToSocketAddrs>(mut self, address: A) -> Self {
        self.address = Some(address.to_socket_addrs().unwrap().collect::<Vec<_>>());
        self
    }

    pub fn app(mut self, app: App) -> Self {
        self.app = Some(app);
        self
    }

    pub fn build(self) -> Result<Server, ServerBuildError> {
        let app = self.app.ok_or(ServerBuildError::MissingApp)?;
        let address = self.address.ok_or(ServerBuildError::MissingAddress)?;
        Ok(Server { app, address })
    }
}

pub struct Server {
    app: App,
    address: Vec<SocketAddr>,
}

#[derive(Error, Debug)]
pub enum ServerBuildError {
    #[error("app must be set")]
    MissingApp,
    #[error("address must be set")]
    MissingAddress,
}

impl Server {
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    pub async fn start(self) {
        let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
        tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

        info!("start listening at {:?}", self.address);
        let tcp_listener = match TcpListener::bind(self.address.as_slice()).await {
            Ok(tcp_listener) => tcp_listener,
            Err(e) => {
                error!(cause = %e, "bind server error");
                return;
            }
        };

        loop {
            let (tcp_stream, _remote_addr) = match tcp_listener.accept().await {
                Ok(stream_and_addr) => stream_and_addr,
                Err(e) => {
                    warn!(cause = %e, "failed to accept");
                    continue;
                }
            };

            let app = self.app.clone();

            tokio::spawn(async move {
                let service = service_fn(move |request: Request<Incoming>| {
                    let app = app.clone();
                    async move {
                        let request = request.map(|body| body.map_err(BoxError::from).boxed_unsync());
                        Ok::<_, Infallible>(app.fetch(request).await)
                    }
                });

                let connection = http1::Builder::new()
                    .serve_connection(TokioIo::new(tcp_stream), service)
                    .with_upgrades();

                if let Err(e) = connection.await {
                    error!("service has error, cause {}, connection shutdown", e);
                }
            });
        }
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server").field("address", &self.address).finish()
    }
}
