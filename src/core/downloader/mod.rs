pub mod client;
pub mod fetch;
pub mod progress;

pub use client::{
    open_stream, Download, DownloadCoordinator, DownloadStart, DownloadStatus, ServerDescriptor,
};
pub use fetch::{ByteStream, FetchResponse, Fetcher};
pub use progress::{DownloadProgress, ProgressThrottle};
