use std::net::SocketAddr;

use actix_web::dev::ServerHandle;
use actix_web::{web, App, HttpServer};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::handlers;
use crate::state::WebState;

/// The running HTTP control surface.
pub struct ControlServer {
    local_addr: SocketAddr,
    handle: ServerHandle,
}

impl ControlServer {
    /// Bind and start serving. The server stops (gracefully) when
    /// `cancel` fires.
    pub async fn start(
        addr: SocketAddr,
        state: WebState,
        cancel: CancellationToken,
    ) -> std::io::Result<Self> {
        let data = web::Data::new(state);
        let server = HttpServer::new(move || {
            App::new()
                .app_data(data.clone())
                .configure(handlers::configure)
        })
        .workers(2)
        .bind(addr)?;
        let local_addr = server
            .addrs()
            .first()
            .copied()
            .expect("bound server has an address");
        info!(addr = %local_addr, "http control surface listening");

        let server = server.run();
        let handle = server.handle();
        tokio::spawn(server);

        let stop_handle = handle.clone();
        tokio::spawn(async move {
            cancel.cancelled().await;
            stop_handle.stop(true).await;
        });

        Ok(Self { local_addr, handle })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    pub fn handle(&self) -> ServerHandle {
        self.handle.clone()
    }
}
