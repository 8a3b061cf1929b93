//! One task per client connection.
//!
//! The loop reads a request, runs it through the [`Dispatcher`] on the
//! blocking pool, and writes the reply, until the client hangs up or
//! something goes wrong. Failures stay inside the connection:
//!
//! - a malformed frame gets a best-effort `-Protocol error: ...` reply and
//!   the connection is closed, since the stream is no longer aligned on a
//!   frame boundary;
//! - a panic while dispatching gets an error reply and the connection is
//!   closed;
//! - command errors are ordinary replies and the loop carries on.

use crate::server::service::dispatcher::Dispatcher;
use crate::server::telemetry::{decrement_connections_inflight, increment_connections_inflight};
use futures::{SinkExt, StreamExt};
use segid::{CounterStore, SettingsStore};
use segid_resp_core::{Reply, RespCodec};
use std::any::Any;
use std::net::SocketAddr;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;

/// Reply sent when dispatch panics. Details go to the log only.
const INTERNAL_ERROR: &str = "internal error";

#[derive(thiserror::Error, Debug)]
enum ConnectionError {
    #[error(transparent)]
    Wire(#[from] segid_resp_core::Error),

    #[error("dispatch panicked: {0}")]
    Fault(String),
}

/// Serves `stream` until the client disconnects or the connection faults.
pub async fn serve<S>(stream: TcpStream, peer: SocketAddr, dispatcher: Dispatcher<S>)
where
    S: CounterStore + SettingsStore,
{
    increment_connections_inflight();
    tracing::debug!(%peer, "connection opened");

    match handle(stream, peer, dispatcher).await {
        Ok(()) => tracing::debug!(%peer, "connection closed"),
        Err(ConnectionError::Wire(segid_resp_core::Error::Io(e))) => {
            tracing::debug!(%peer, error = %e, "connection dropped");
        }
        Err(ConnectionError::Wire(e)) => {
            tracing::warn!(%peer, error = %e, "closing connection");
        }
        Err(e @ ConnectionError::Fault(_)) => {
            tracing::error!(%peer, error = %e, "closing connection");
        }
    }

    decrement_connections_inflight();
}

async fn handle<S>(
    stream: TcpStream,
    peer: SocketAddr,
    dispatcher: Dispatcher<S>,
) -> Result<(), ConnectionError>
where
    S: CounterStore + SettingsStore,
{
    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!(%peer, error = %e, "failed to set TCP_NODELAY");
    }
    let mut framed = Framed::new(stream, RespCodec::default());

    while let Some(frame) = framed.next().await {
        let request = match frame {
            Ok(request) => request,
            Err(e) => {
                if e.is_protocol() {
                    let _ = framed.send(Reply::error(e.to_string())).await;
                }
                return Err(e.into());
            }
        };

        let dispatcher = dispatcher.clone();
        let reply = match tokio::task::spawn_blocking(move || dispatcher.dispatch(&request)).await
        {
            Ok(reply) => reply,
            Err(join) => {
                let _ = framed.send(Reply::error(INTERNAL_ERROR)).await;
                let reason = if join.is_panic() {
                    panic_message(join.into_panic())
                } else {
                    join.to_string()
                };
                return Err(ConnectionError::Fault(reason));
            }
        };

        framed.send(reply).await?;
    }

    Ok(())
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(message) => *message,
        Err(payload) => match payload.downcast::<&'static str>() {
            Ok(message) => (*message).to_string(),
            Err(_) => "unknown panic".to_string(),
        },
    }
}
