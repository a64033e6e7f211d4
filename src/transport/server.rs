//! TCP server for the decision service.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::protocol::{CheckResponse, STATUS_BAD_REQUEST};
use super::service::ThrottleService;
use crate::error::Result;
use crate::throttle::ThrottleGuard;

/// Longest request line accepted, excluding the trailing newline.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// Line-oriented TCP server answering admission decisions.
pub struct TurnstileServer {
    /// Address to bind to
    addr: SocketAddr,
    /// The guard shared by every connection
    guard: Arc<ThrottleGuard>,
}

impl TurnstileServer {
    pub fn new(addr: SocketAddr, guard: Arc<ThrottleGuard>) -> Self {
        Self { addr, guard }
    }

    /// Start the server.
    ///
    /// This method will block until the process is stopped.
    pub async fn serve(self) -> Result<()> {
        self.serve_with_shutdown(std::future::pending()).await
    }

    /// Start the server with graceful shutdown.
    ///
    /// The server stops accepting connections when the provided signal
    /// resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let listener = TcpListener::bind(self.addr).await?;
        Self::run(listener, self.guard, signal).await
    }

    /// Accept connections on an already bound listener until `signal`
    /// resolves.
    pub async fn run<F>(listener: TcpListener, guard: Arc<ThrottleGuard>, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let service = ThrottleService::new(guard);
        info!(addr = %listener.local_addr()?, "Decision service listening");

        tokio::pin!(signal);
        loop {
            tokio::select! {
                _ = &mut signal => {
                    info!("Decision service shutting down");
                    break;
                }
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            warn!(error = %e, "Failed to accept connection");
                            continue;
                        }
                    };

                    let service = service.clone();
                    let span = info_span!("connection", conn_id = %Uuid::new_v4(), peer = %peer);
                    tokio::spawn(
                        async move {
                            if let Err(e) = handle_connection(service, stream, peer).await {
                                debug!(error = %e, "Connection closed with error");
                            }
                        }
                        .instrument(span),
                    );
                }
            }
        }

        Ok(())
    }
}

async fn handle_connection(
    service: ThrottleService,
    stream: TcpStream,
    peer: SocketAddr,
) -> Result<()> {
    debug!("Connection opened");
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::with_capacity(1024);

    loop {
        buf.clear();
        // The cap covers the line plus its newline. Filling it without
        // reaching a newline means the line is too long.
        let read = (&mut reader)
            .take(MAX_LINE_BYTES as u64 + 1)
            .read_until(b'\n', &mut buf)
            .await?;
        if read == 0 {
            break;
        }

        if buf.last() == Some(&b'\n') {
            buf.pop();
            if buf.last() == Some(&b'\r') {
                buf.pop();
            }
        } else if buf.len() > MAX_LINE_BYTES {
            warn!(max = MAX_LINE_BYTES, "Request line too long, closing connection");
            let response = CheckResponse::rejected(
                STATUS_BAD_REQUEST,
                Vec::new(),
                format!("request line exceeds {} bytes", MAX_LINE_BYTES),
            );
            write_response(&mut writer, &response).await?;
            return Ok(());
        }

        let line = match std::str::from_utf8(&buf) {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "Received request line that is not UTF-8");
                let response = CheckResponse::rejected(
                    STATUS_BAD_REQUEST,
                    Vec::new(),
                    format!("request line is not valid UTF-8: {}", e),
                );
                write_response(&mut writer, &response).await?;
                continue;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let response = service.decide(line, Some(peer.ip())).await;
        write_response(&mut writer, &response).await?;
    }

    debug!("Connection closed by peer");
    Ok(())
}

async fn write_response(writer: &mut OwnedWriteHalf, response: &CheckResponse) -> Result<()> {
    let mut payload = serde_json::to_vec(response)?;
    payload.push(b'\n');
    writer.write_all(&payload).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ThrottleConfig;
    use crate::throttle::RouteRules;
    use crate::transport::protocol::{STATUS_OK, STATUS_TOO_MANY_REQUESTS};
    use tokio::io::Lines;
    use tokio::net::tcp::OwnedReadHalf;
    use tokio::sync::oneshot;

    fn guard(limit: u64) -> Arc<ThrottleGuard> {
        let config = ThrottleConfig {
            limit,
            ..ThrottleConfig::default()
        };
        Arc::new(ThrottleGuard::new(&config, RouteRules::new()).unwrap())
    }

    async fn exchange(
        lines: &mut Lines<BufReader<OwnedReadHalf>>,
        writer: &mut tokio::net::tcp::OwnedWriteHalf,
        request: impl AsRef<[u8]>,
    ) -> CheckResponse {
        writer.write_all(request.as_ref()).await.unwrap();
        writer.write_all(b"\n").await.unwrap();
        let line = lines.next_line().await.unwrap().unwrap();
        serde_json::from_str(&line).unwrap()
    }

    #[test]
    fn test_server_creation() {
        let addr: SocketAddr = "127.0.0.1:8090".parse().unwrap();
        let _server = TurnstileServer::new(addr, guard(5));
    }

    async fn start(
        limit: u64,
    ) -> (
        SocketAddr,
        oneshot::Sender<()>,
        tokio::task::JoinHandle<Result<()>>,
    ) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let server = tokio::spawn(TurnstileServer::run(listener, guard(limit), async {
            let _ = shutdown_rx.await;
        }));
        (addr, shutdown_tx, server)
    }

    #[tokio::test]
    async fn test_round_trip_over_tcp() {
        let (addr, shutdown_tx, server) = start(1).await;

        let stream = TcpStream::connect(addr).await.unwrap();
        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();
        let request = r#"{"group":"users","operation":"login"}"#;

        let first = exchange(&mut lines, &mut writer, request).await;
        assert_eq!(first.status, STATUS_OK);

        let second = exchange(&mut lines, &mut writer, request).await;
        assert_eq!(second.status, STATUS_TOO_MANY_REQUESTS);

        // A bad line does not close the connection
        let bad = exchange(&mut lines, &mut writer, "{").await;
        assert_eq!(bad.status, STATUS_BAD_REQUEST);

        let other = exchange(
            &mut lines,
            &mut writer,
            r#"{"group":"users","operation":"login","client_addr":"10.9.9.9"}"#,
        )
        .await;
        assert_eq!(other.status, STATUS_OK);

        shutdown_tx.send(()).unwrap();
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_invalid_utf8_line_keeps_connection_open() {
        let (addr, shutdown_tx, server) = start(5).await;

        let stream = TcpStream::connect(addr).await.unwrap();
        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();

        let bad = exchange(
            &mut lines,
            &mut writer,
            b"{\"group\":\"u\xff\",\"operation\":\"login\"}".as_slice(),
        )
        .await;
        assert_eq!(bad.status, STATUS_BAD_REQUEST);
        assert!(!bad.admitted);

        let good = exchange(
            &mut lines,
            &mut writer,
            r#"{"group":"users","operation":"login"}"#,
        )
        .await;
        assert_eq!(good.status, STATUS_OK);

        shutdown_tx.send(()).unwrap();
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_overlong_line_rejected_and_closed() {
        let (addr, shutdown_tx, server) = start(5).await;

        let stream = TcpStream::connect(addr).await.unwrap();
        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();

        // Exactly one byte over the cap, with no newline
        let payload = vec![b'a'; MAX_LINE_BYTES + 1];
        writer.write_all(&payload).await.unwrap();

        let line = lines.next_line().await.unwrap().unwrap();
        let response: CheckResponse = serde_json::from_str(&line).unwrap();
        assert_eq!(response.status, STATUS_BAD_REQUEST);
        assert!(response.error.unwrap().contains("exceeds"));

        // The server hangs up after an overlong line
        assert!(lines.next_line().await.unwrap().is_none());

        shutdown_tx.send(()).unwrap();
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_line_at_cap_is_decided() {
        let (addr, shutdown_tx, server) = start(5).await;

        let stream = TcpStream::connect(addr).await.unwrap();
        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();

        let request = r#"{"group":"users","operation":"login"}"#;
        let padded = format!("{}{}", request, " ".repeat(MAX_LINE_BYTES - request.len()));
        assert_eq!(padded.len(), MAX_LINE_BYTES);

        let response = exchange(&mut lines, &mut writer, padded).await;
        assert_eq!(response.status, STATUS_OK);

        shutdown_tx.send(()).unwrap();
        server.await.unwrap().unwrap();
    }
}
