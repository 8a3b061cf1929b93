use crate::server::connection;
use crate::server::service::dispatcher::Dispatcher;
use core::time::Duration;
use segid::{CounterStore, SettingsStore};
use std::io;
use std::net::SocketAddr;
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

// Pause after a failed accept (e.g. out of file descriptors) before retrying.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// The TCP accept loop.
///
/// Every accepted connection is served by its own task. Once the shutdown
/// token is cancelled the listening socket is closed; connections that are
/// already open keep being served and get up to `shutdown_timeout` to finish
/// before [`run`](Self::run) returns.
pub struct Server<S> {
    listener: TcpListener,
    dispatcher: Dispatcher<S>,
    shutdown: CancellationToken,
    shutdown_timeout: Duration,
    connections: TaskTracker,
}

impl<S> Server<S>
where
    S: CounterStore + SettingsStore,
{
    pub async fn bind(
        addr: impl ToSocketAddrs,
        dispatcher: Dispatcher<S>,
        shutdown: CancellationToken,
        shutdown_timeout: Duration,
    ) -> io::Result<Self> {
        Ok(Self {
            listener: TcpListener::bind(addr).await?,
            dispatcher,
            shutdown,
            shutdown_timeout,
            connections: TaskTracker::new(),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn run(self) {
        let Self {
            listener,
            dispatcher,
            shutdown,
            shutdown_timeout,
            connections,
        } = self;

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        connections.spawn(connection::serve(stream, peer, dispatcher.clone()));
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to accept connection");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
            }
        }

        drop(listener);
        connections.close();
        tracing::info!(open = connections.len(), "stopped accepting connections");

        if tokio::time::timeout(shutdown_timeout, connections.wait())
            .await
            .is_err()
        {
            tracing::warn!(
                open = connections.len(),
                "connections still open after the shutdown timeout"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::config::{CliArgs, ServerConfig};
    use crate::server::settings::Settings;
    use clap::Parser;
    use futures::{SinkExt, StreamExt};
    use segid::{MemoryStore, Registry};
    use segid_resp_core::{Reply, Request, RespClientCodec};
    use std::sync::Arc;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpStream;
    use tokio::task::JoinHandle;
    use tokio_util::codec::Framed;

    /// A [`MemoryStore`] that panics when asked to refill the key `boom`.
    #[derive(Default)]
    struct PanickingStore(MemoryStore);

    impl CounterStore for PanickingStore {
        fn create_counter(&self, key: &str) -> segid::Result<()> {
            self.0.create_counter(key)
        }
        fn counter(&self, key: &str) -> segid::Result<i64> {
            assert_ne!(key, "boom", "refill of `boom` exploded");
            self.0.counter(key)
        }
        fn increment(&self, key: &str, delta: i64) -> segid::Result<()> {
            self.0.increment(key, delta)
        }
        fn set_counter(&self, key: &str, value: i64) -> segid::Result<()> {
            self.0.set_counter(key, value)
        }
        fn drop_counter(&self, key: &str) -> segid::Result<()> {
            self.0.drop_counter(key)
        }
        fn insert_known_key(&self, key: &str) -> segid::Result<()> {
            self.0.insert_known_key(key)
        }
        fn known_keys(&self) -> segid::Result<Vec<String>> {
            self.0.known_keys()
        }
        fn remove_known_key(&self, key: &str) -> segid::Result<()> {
            self.0.remove_known_key(key)
        }
    }

    impl SettingsStore for PanickingStore {
        fn settings(&self) -> segid::Result<Vec<(String, String)>> {
            self.0.settings()
        }
        fn save_setting(&self, name: &str, value: &str) -> segid::Result<()> {
            self.0.save_setting(name, value)
        }
    }

    struct Running<S> {
        addr: SocketAddr,
        store: Arc<S>,
        shutdown: CancellationToken,
        handle: JoinHandle<()>,
    }

    async fn start<S>(store: S, batch_size: i64) -> Running<S>
    where
        S: CounterStore + SettingsStore,
    {
        let store = Arc::new(store);
        let mut config =
            ServerConfig::try_from(CliArgs::parse_from(["segid-resp-server"])).unwrap();
        config.batch_size = batch_size;

        let registry = Arc::new(Registry::new(Arc::clone(&store), batch_size).unwrap());
        let settings = Arc::new(Settings::new(config, Arc::clone(&store)));
        let shutdown = CancellationToken::new();

        let server = Server::bind(
            "127.0.0.1:0",
            Dispatcher::new(registry, settings),
            shutdown.clone(),
            Duration::from_secs(5),
        )
        .await
        .unwrap();
        let addr = server.local_addr().unwrap();
        let handle = tokio::spawn(server.run());

        Running {
            addr,
            store,
            shutdown,
            handle,
        }
    }

    async fn connect(addr: SocketAddr) -> Framed<TcpStream, RespClientCodec> {
        Framed::new(
            TcpStream::connect(addr).await.unwrap(),
            RespClientCodec::default(),
        )
    }

    async fn call(
        client: &mut Framed<TcpStream, RespClientCodec>,
        parts: &[&'static str],
    ) -> Reply {
        client
            .send(Request::from_parts(parts.iter().copied()).unwrap())
            .await
            .unwrap();
        client.next().await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn serves_ids_over_tcp() {
        let server = start(MemoryStore::new(), 100).await;
        let mut client = connect(server.addr).await;

        assert_eq!(call(&mut client, &["SET", "orders", "0"]).await, Reply::ok());
        for expected in 1..=100 {
            assert_eq!(
                call(&mut client, &["GET", "orders"]).await,
                Reply::bulk(expected.to_string())
            );
        }
        assert_eq!(server.store.stats().increments, 1);

        assert_eq!(call(&mut client, &["GET", "orders"]).await, Reply::bulk("101"));
        assert_eq!(server.store.stats().increments, 2);
    }

    #[tokio::test]
    async fn pipelined_requests_are_answered_in_order() {
        let server = start(MemoryStore::new(), 10).await;
        let mut stream = TcpStream::connect(server.addr).await.unwrap();
        stream
            .write_all(b"SET orders 0\r\nGET orders\r\n*2\r\n$3\r\nGET\r\n$6\r\norders\r\n")
            .await
            .unwrap();

        let mut client = Framed::new(stream, RespClientCodec::default());
        assert_eq!(client.next().await.unwrap().unwrap(), Reply::ok());
        assert_eq!(client.next().await.unwrap().unwrap(), Reply::bulk("1"));
        assert_eq!(client.next().await.unwrap().unwrap(), Reply::bulk("2"));
    }

    #[tokio::test]
    async fn protocol_errors_close_only_the_offending_connection() {
        let server = start(MemoryStore::new(), 10).await;
        let mut healthy = connect(server.addr).await;
        let mut broken = TcpStream::connect(server.addr).await.unwrap();

        broken.write_all(b"*1\r\n:5\r\n").await.unwrap();
        let mut broken = Framed::new(broken, RespClientCodec::default());
        match broken.next().await.unwrap().unwrap() {
            Reply::Error(message) => assert!(message.starts_with("Protocol error"), "{message}"),
            other => panic!("unexpected reply {other:?}"),
        }
        assert!(broken.next().await.is_none());

        assert_eq!(call(&mut healthy, &["PING"]).await, Reply::status("PONG"));
    }

    #[tokio::test]
    async fn a_panicking_command_closes_only_its_connection() {
        let server = start(PanickingStore::default(), 10).await;
        let mut client = connect(server.addr).await;
        assert_eq!(call(&mut client, &["SET", "boom", "0"]).await, Reply::ok());
        assert_eq!(call(&mut client, &["SET", "fine", "0"]).await, Reply::ok());

        assert_eq!(
            call(&mut client, &["GET", "boom"]).await,
            Reply::error("internal error")
        );
        assert!(client.next().await.is_none());

        let mut other = connect(server.addr).await;
        assert_eq!(call(&mut other, &["GET", "fine"]).await, Reply::bulk("1"));
        assert!(!server.handle.is_finished());
    }

    #[tokio::test]
    async fn shutdown_stops_accepting_but_drains_open_connections() {
        let server = start(MemoryStore::new(), 10).await;
        let mut client = connect(server.addr).await;
        assert_eq!(call(&mut client, &["SET", "orders", "0"]).await, Reply::ok());

        server.shutdown.cancel();
        // Give the accept loop a chance to observe the token.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(TcpStream::connect(server.addr).await.is_err());

        // The open connection is still served.
        assert_eq!(call(&mut client, &["GET", "orders"]).await, Reply::bulk("1"));
        assert!(!server.handle.is_finished());

        drop(client);
        tokio::time::timeout(Duration::from_secs(5), server.handle)
            .await
            .unwrap()
            .unwrap();
    }
}
