//! Server network layer: TCP accept loop and per-connection workers

use crate::client_manager::ClientManager;
use crate::context::ServerContext;
use crate::session::{ClientSession, Flow, SessionEvent, SessionId};
use log::{debug, error, info, warn};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};

const INITIAL_ACCEPT_BACKOFF: Duration = Duration::from_millis(10);
const MAX_ACCEPT_BACKOFF: Duration = Duration::from_secs(1);
/// How long a closing connection may take to flush queued replies
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Listening socket plus the state every connection worker shares
pub struct Server {
    listener: TcpListener,
    context: Arc<ServerContext>,
    clients: Arc<RwLock<ClientManager>>,
}

impl Server {
    pub async fn bind(addr: &str, context: Arc<ServerContext>) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!("Server listening on {}", listener.local_addr()?);

        let clients = Arc::new(RwLock::new(ClientManager::new(context.config.max_clients)));
        Ok(Server {
            listener,
            context,
            clients,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn context(&self) -> &Arc<ServerContext> {
        &self.context
    }

    /// Number of connections currently being served
    pub async fn connected_clients(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Accepts connections forever, one worker task per client.
    ///
    /// Accept failures (e.g. descriptor exhaustion) are retried with an
    /// exponential backoff instead of spinning.
    pub async fn run(&self) {
        let mut backoff = INITIAL_ACCEPT_BACKOFF;
        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    backoff = INITIAL_ACCEPT_BACKOFF;
                    self.admit(stream, addr).await;
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_ACCEPT_BACKOFF);
                }
            }
        }
    }

    async fn admit(&self, stream: TcpStream, addr: SocketAddr) {
        let id = self.clients.write().await.add_client(addr);
        let Some(id) = id else {
            warn!("Refusing connection from {}: server full", addr);
            tokio::spawn(refuse(stream));
            return;
        };

        if let Err(e) = stream.set_nodelay(true) {
            debug!("Could not set TCP_NODELAY for client {}: {}", id, e);
        }

        let context = Arc::clone(&self.context);
        let clients = Arc::clone(&self.clients);
        tokio::spawn(async move {
            serve_connection(stream, id, context).await;
            clients.write().await.remove_client(&id);
        });
    }
}

async fn refuse(mut stream: TcpStream) {
    if let Err(e) = stream.write_all(b"Server full\n").await {
        debug!("Failed to notify refused client: {}", e);
    }
    let _ = stream.shutdown().await;
}

/// Runs one client from greeting to cleanup
async fn serve_connection(stream: TcpStream, id: SessionId, context: Arc<ServerContext>) {
    let max_line_length = context.config.max_line_length;
    let (read_half, write_half) = stream.into_split();
    let (tx, rx) = mpsc::unbounded_channel();
    let writer = tokio::spawn(async move {
        if let Err(e) = write_outbound(write_half, rx).await {
            debug!("Writer for client {} stopped: {}", id, e);
        }
    });

    let session = ClientSession::new(id, tx, context);
    session.greet();

    if let Err(e) = read_commands(BufReader::new(read_half), &session, max_line_length).await {
        warn!("Read error on client {}: {}", id, e);
    }
    session.handle_event(SessionEvent::Disconnected).await;

    // Dropping the session closes the outbox once no game still holds it
    drop(session);
    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, writer).await.is_err() {
        debug!("Writer for client {} did not drain in time", id);
    }
}

/// Feeds newline-delimited commands to `session` until EOF or `quit`.
///
/// At most `max_line_length` bytes (plus a CRLF) are buffered per line; the
/// remainder of an oversized line is discarded and the truncated prefix is
/// handed on so the session reports it.
pub async fn read_commands<R>(mut reader: R, session: &ClientSession, max_line_length: usize) -> io::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let limit = (max_line_length + 2) as u64;
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let read = (&mut reader).take(limit).read_until(b'\n', &mut buf).await?;
        if read == 0 {
            return Ok(());
        }
        if !buf.ends_with(b"\n") && read as u64 == limit {
            skip_line(&mut reader).await?;
        }

        let line = String::from_utf8_lossy(&buf).into_owned();
        if session.handle_event(SessionEvent::Line(line)).await == Flow::Close {
            return Ok(());
        }
    }
}

async fn skip_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> io::Result<()> {
    loop {
        let chunk = reader.fill_buf().await?;
        if chunk.is_empty() {
            return Ok(());
        }
        match chunk.iter().position(|&b| b == b'\n') {
            Some(pos) => {
                reader.consume(pos + 1);
                return Ok(());
            }
            None => {
                let len = chunk.len();
                reader.consume(len);
            }
        }
    }
}

/// Drains a session's outbox onto the socket, one write and flush per
/// message, until every sender is dropped.
pub async fn write_outbound<W>(mut writer: W, mut rx: mpsc::UnboundedReceiver<String>) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = rx.recv().await {
        writer.write_all(message.as_bytes()).await?;
        writer.flush().await?;
    }
    writer.shutdown().await
}
