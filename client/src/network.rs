//! Client network layer relaying terminal lines over TCP

use log::{debug, info};
use std::io;
use std::net::SocketAddr;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

/// A connection to the Reversi server
pub struct Client {
    stream: TcpStream,
    server_addr: SocketAddr,
}

impl Client {
    pub async fn connect(addr: &str) -> io::Result<Self> {
        info!("Connecting to server...");
        let stream = TcpStream::connect(addr).await?;
        let server_addr = stream.peer_addr()?;
        info!("Connected to {}", server_addr);
        Ok(Self {
            stream,
            server_addr,
        })
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.server_addr
    }

    /// Relays lines until the server closes the connection.
    ///
    /// Each line read from `input` is sent as one command. When `input` ends
    /// the write side of the socket is shut down, and replies keep being
    /// written to `output` until the server hangs up.
    pub async fn run<I, O>(self, input: I, mut output: O) -> io::Result<()>
    where
        I: AsyncBufRead + Unpin,
        O: AsyncWrite + Unpin,
    {
        let (read_half, mut write_half) = self.stream.into_split();
        let mut server_lines = BufReader::new(read_half).lines();
        let mut input_lines = input.lines();
        let mut input_open = true;

        loop {
            tokio::select! {
                line = server_lines.next_line() => match line? {
                    Some(line) => {
                        output.write_all(line.as_bytes()).await?;
                        output.write_all(b"\n").await?;
                        output.flush().await?;
                    }
                    None => {
                        info!("Server closed the connection");
                        return Ok(());
                    }
                },
                line = input_lines.next_line(), if input_open => match line? {
                    Some(line) => {
                        write_half.write_all(line.as_bytes()).await?;
                        write_half.write_all(b"\n").await?;
                    }
                    None => {
                        debug!("Input closed, half-closing the connection");
                        input_open = false;
                        write_half.shutdown().await?;
                    }
                },
            }
        }
    }
}
