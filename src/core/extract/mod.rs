pub mod archive;
pub mod pipeline;

pub use archive::{ArchiveExtractor, ZipStreamExtractor};
pub use pipeline::ExtractionPipeline;
