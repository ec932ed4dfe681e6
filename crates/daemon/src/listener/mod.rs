// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Listener task for the controller socket.
//!
//! Accepts connections on the Unix socket (and optionally TCP), reads
//! one request per connection, and answers it. Launches return as soon
//! as the step thread starts; everything long-lived happens off the
//! async runtime.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::dispatch::Dispatcher;
use crate::protocol::{self, Request, Response};
use crate::registry::RegistryError;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, UnixListener};
use tokio::sync::Notify;
use tracing::{debug, error, info};

/// Per-request deadline on socket IO.
pub fn ipc_timeout() -> Duration {
    std::env::var("STEPD_IPC_TIMEOUT_MS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(Duration::from_secs(10))
}

/// Shared context for all connections.
pub struct ListenCtx {
    pub dispatcher: Dispatcher,
    pub shutdown: Arc<Notify>,
}

/// Accept loop over the daemon's sockets.
pub struct Listener {
    unix: UnixListener,
    tcp: Option<TcpListener>,
    ctx: Arc<ListenCtx>,
}

impl Listener {
    pub fn new(unix: UnixListener, ctx: Arc<ListenCtx>) -> Self {
        Self { unix, tcp: None, ctx }
    }

    pub fn with_tcp(unix: UnixListener, tcp: TcpListener, ctx: Arc<ListenCtx>) -> Self {
        Self { unix, tcp: Some(tcp), ctx }
    }

    /// Run until the task is dropped, spawning a handler per connection.
    pub async fn run(self) {
        match self.tcp {
            Some(tcp) => Self::run_dual(self.unix, tcp, self.ctx).await,
            None => Self::run_unix_only(self.unix, self.ctx).await,
        }
    }

    async fn run_unix_only(unix: UnixListener, ctx: Arc<ListenCtx>) {
        loop {
            match unix.accept().await {
                Ok((stream, _)) => {
                    let ctx = Arc::clone(&ctx);
                    tokio::spawn(async move {
                        let (reader, writer) = stream.into_split();
                        handle_connection(reader, writer, None, &ctx).await;
                    });
                }
                Err(e) => error!("Unix accept error: {}", e),
            }
        }
    }

    async fn run_dual(unix: UnixListener, tcp: TcpListener, ctx: Arc<ListenCtx>) {
        loop {
            tokio::select! {
                result = unix.accept() => match result {
                    Ok((stream, _)) => {
                        let ctx = Arc::clone(&ctx);
                        tokio::spawn(async move {
                            let (reader, writer) = stream.into_split();
                            handle_connection(reader, writer, None, &ctx).await;
                        });
                    }
                    Err(e) => error!("Unix accept error: {}", e),
                },
                result = tcp.accept() => match result {
                    Ok((stream, addr)) => {
                        debug!("TCP connection from {}", addr);
                        let ctx = Arc::clone(&ctx);
                        tokio::spawn(async move {
                            let (reader, writer) = stream.into_split();
                            handle_connection(reader, writer, Some(addr.ip()), &ctx).await;
                        });
                    }
                    Err(e) => error!("TCP accept error: {}", e),
                },
            }
        }
    }
}

/// Read one request, answer it, close.
async fn handle_connection<R, W>(mut reader: R, mut writer: W, peer: Option<IpAddr>, ctx: &ListenCtx)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let request = match protocol::read_request(&mut reader, ipc_timeout()).await {
        Ok(req) => req,
        Err(protocol::ProtocolError::ConnectionClosed) => {
            debug!("client disconnected");
            return;
        }
        Err(e) => {
            error!("request read: {}", e);
            return;
        }
    };

    if matches!(request, Request::Status | Request::Ping) {
        debug!(request = ?request, "received request");
    } else {
        info!(request = ?request, "received request");
    }

    let response = handle_request(request, peer, ctx);

    if let Err(e) = protocol::write_response(&mut writer, &response, ipc_timeout()).await {
        error!("response write: {}", e);
    }
}

fn handle_request(request: Request, peer: Option<IpAddr>, ctx: &ListenCtx) -> Response {
    match request {
        Request::Ping => Response::Pong,

        Request::Launch { request } => {
            match ctx.dispatcher.launch(*request, peer.map(|ip| ip.to_string())) {
                Ok(key) => Response::Launched { job_id: key.job_id, step_id: key.step_id },
                Err(message) => Response::Error { message },
            }
        }

        Request::Attach { job_id, step_id, client } => {
            match ctx.dispatcher.attach(job_id, step_id, client) {
                Ok(()) => Response::Ok,
                Err(RegistryError::NotFound) => {
                    Response::Error { message: format!("no step {}.{}", job_id, step_id) }
                }
                Err(e) => Response::Error { message: e.to_string() },
            }
        }

        Request::Status => Response::Status { steps: ctx.dispatcher.registry.snapshot() },

        Request::Shutdown => {
            ctx.shutdown.notify_one();
            Response::ShuttingDown
        }
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
