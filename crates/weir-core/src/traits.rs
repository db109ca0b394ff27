use futures::future::BoxFuture;
use tokio::io::AsyncRead;

use crate::error::Result;
use crate::node::ResourceId;

/// A readable byte stream handed across the store boundary.
pub type ByteStream = Box<dyn AsyncRead + Send + Unpin>;

/// Resource store: stream-based blob access.
///
/// The engine treats resources as opaque byte streams: bytes in, bytes out,
/// no transactional guarantees beyond that. Each input/output slot touches a
/// distinct identifier, so implementations need no per-id serialization
/// within one execution attempt.
pub trait ResourceStore: Send + Sync + 'static {
    /// Open a download stream for an existing resource.
    fn download_stream(&self, id: &ResourceId) -> BoxFuture<'_, Result<ByteStream>>;

    /// Consume a stream, persist it, and return the allocated identifier.
    fn upload_stream(&self, stream: ByteStream) -> BoxFuture<'_, Result<ResourceId>>;
}
