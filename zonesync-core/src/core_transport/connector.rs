//! Connection establishment seam.
//!
//! A [`Connector`] turns a URL into a [`Link`]: a pair of text-frame channels
//! bound to one live connection. Dropping the outbound sender closes it.

use super::errors::TransportError;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Frames buffered per direction on a link
pub const LINK_BUFFER: usize = 64;

#[derive(Debug)]
pub struct Link {
    pub outbound: mpsc::Sender<String>,
    /// Yields `None` once the remote side has gone away
    pub inbound: mpsc::Receiver<String>,
}

#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, url: &str) -> Result<Link, TransportError>;
}
