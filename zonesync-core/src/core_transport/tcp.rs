/*
  tcp.rs - length-prefixed TCP framing

  Every frame on the wire is a 4-byte big-endian length followed by that many
  bytes of UTF-8 JSON. Frames above the configured maximum close the
  connection, since the stream cannot be resynchronized after one.

  A framed stream is split into two tasks:

    Link.outbound ──► writer task ──► socket
    socket ──► reader task ──► Link.inbound

  The writer aborts the reader when the outbound side is dropped, which tears
  the whole connection down.
*/

use super::connector::{Connector, Link, LINK_BUFFER};
use super::errors::{ProtocolError, TransportError};
use crate::metrics::{record_counter, PROTOCOL_ERRORS};
use async_trait::async_trait;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Largest frame accepted from the network
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Dials the authority over plain TCP
#[derive(Debug, Clone)]
pub struct TcpConnector {
    max_frame_size: usize,
}

impl TcpConnector {
    pub fn new() -> Self {
        TcpConnector { max_frame_size: MAX_FRAME_SIZE }
    }

    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        TcpConnector { max_frame_size }
    }
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, url: &str) -> Result<Link, TransportError> {
        let stream = TcpStream::connect(url)
            .await
            .map_err(|e| TransportError::ConnectFailed(format!("{}: {}", url, e)))?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "Failed to set TCP_NODELAY");
        }
        Ok(spawn_framed(stream, self.max_frame_size))
    }
}

/// Wrap an established stream (dialed or accepted) in a framed [`Link`]
pub fn spawn_framed(stream: TcpStream, max_frame_size: usize) -> Link {
    let (mut reader, mut writer) = stream.into_split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<String>(LINK_BUFFER);
    let (inbound_tx, inbound_rx) = mpsc::channel::<String>(LINK_BUFFER);

    let reader_task = tokio::spawn(async move {
        loop {
            match read_frame(&mut reader, max_frame_size).await {
                Ok(Some(bytes)) => match String::from_utf8(bytes) {
                    Ok(text) => {
                        if inbound_tx.send(text).await.is_err() {
                            break;
                        }
                    }
                    Err(_) => {
                        warn!("Dropping non UTF-8 frame");
                        record_counter(PROTOCOL_ERRORS, 1);
                    }
                },
                Ok(None) => {
                    debug!("Connection closed by peer");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "Closing connection after read failure");
                    break;
                }
            }
        }
    });

    tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            if let Err(e) = write_frame(&mut writer, frame.as_bytes()).await {
                debug!(error = %e, "Write failed");
                break;
            }
        }
        let _ = writer.shutdown().await;
        reader_task.abort();
    });

    Link { outbound: outbound_tx, inbound: inbound_rx }
}

/// Write one length-prefixed frame
pub async fn write_frame<W>(writer: &mut W, bytes: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let len = u32::try_from(bytes.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "frame exceeds u32 length"))?;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(bytes).await?;
    writer.flush().await
}

/// Read one length-prefixed frame; `Ok(None)` on clean end of stream
pub async fn read_frame<R>(reader: &mut R, max_frame_size: usize) -> io::Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > max_frame_size {
        record_counter(PROTOCOL_ERRORS, 1);
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            ProtocolError::FrameTooLarge { size: len, max: max_frame_size },
        ));
    }

    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    Ok(Some(buf))
}
