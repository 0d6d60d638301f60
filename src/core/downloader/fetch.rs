use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;

use crate::core::error::LauncherResult;

/// Response body as a stream of chunks.
pub type ByteStream = BoxStream<'static, std::io::Result<Bytes>>;

/// Headers-first response: the declared length is known before the body is
/// consumed.
pub struct FetchResponse {
    pub content_length: Option<u64>,
    pub body: ByteStream,
}

/// Transport used to fetch build archives. Timeouts and retries belong to
/// the implementation.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> LauncherResult<FetchResponse>;
}
