use async_trait::async_trait;
use bytes::Bytes;

use crate::namespace::Name;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("no data reachable for {0}")]
    NotFound(Name),
    #[error("transport error: {0}")]
    Default(#[from] anyhow::Error),
}

/// Handle to whatever moves packets for this client.
///
/// The group consumer holds one of these to retrieve wrapped key records
/// it does not already have locally. Discovery, retries, and congestion
/// all live behind this seam; by the time `fetch` returns the bytes are
/// final.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Fetch the object published under `name`
    async fn fetch(&self, name: &Name) -> Result<Bytes, TransportError>;
}
