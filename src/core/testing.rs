//! Fixtures shared by unit tests: in-memory archives and scripted fetchers.

use std::io::Write;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{stream, StreamExt};
use zip::write::SimpleFileOptions;

use crate::core::downloader::{FetchResponse, Fetcher};
use crate::core::error::{LauncherError, LauncherResult};

/// Build a zip archive from `(name, contents, unix mode)` triples.
pub fn zip_bytes(entries: &[(&str, &[u8], u32)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    for (name, contents, mode) in entries {
        let options = SimpleFileOptions::default().unix_permissions(*mode);
        writer.start_file(*name, options).unwrap();
        writer.write_all(contents).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

/// Build a stored zip the way streaming writers do: local headers without
/// sizes (flag bit 3), a data descriptor after each entry, and a central
/// directory marked as written on unix. `mode` is the full `st_mode`.
pub fn zip_bytes_with_descriptors(entries: &[(&str, &[u8], u32)]) -> Vec<u8> {
    const DOS_DATE: u16 = (40 << 9) | (1 << 5) | 1;

    let mut out = Vec::new();
    let mut central = Vec::new();

    for (name, contents, mode) in entries {
        let offset = out.len() as u32;
        let crc = crc32(contents);
        let size = contents.len() as u32;
        let name_len = name.len() as u16;

        out.extend(0x0403_4b50u32.to_le_bytes());
        out.extend(20u16.to_le_bytes());
        out.extend(0x0008u16.to_le_bytes());
        out.extend(0u16.to_le_bytes());
        out.extend(0u16.to_le_bytes());
        out.extend(DOS_DATE.to_le_bytes());
        out.extend([0u8; 12]);
        out.extend(name_len.to_le_bytes());
        out.extend(0u16.to_le_bytes());
        out.extend(name.as_bytes());
        out.extend_from_slice(contents);
        out.extend(0x0807_4b50u32.to_le_bytes());
        out.extend(crc.to_le_bytes());
        out.extend(size.to_le_bytes());
        out.extend(size.to_le_bytes());

        central.extend(0x0201_4b50u32.to_le_bytes());
        central.extend(((3u16 << 8) | 20).to_le_bytes());
        central.extend(20u16.to_le_bytes());
        central.extend(0x0008u16.to_le_bytes());
        central.extend(0u16.to_le_bytes());
        central.extend(0u16.to_le_bytes());
        central.extend(DOS_DATE.to_le_bytes());
        central.extend(crc.to_le_bytes());
        central.extend(size.to_le_bytes());
        central.extend(size.to_le_bytes());
        central.extend(name_len.to_le_bytes());
        central.extend([0u8; 8]);
        central.extend((mode << 16).to_le_bytes());
        central.extend(offset.to_le_bytes());
        central.extend(name.as_bytes());
    }

    let directory_offset = out.len() as u32;
    let directory_size = central.len() as u32;
    let count = entries.len() as u16;
    out.extend(central);
    out.extend(0x0605_4b50u32.to_le_bytes());
    out.extend([0u8; 4]);
    out.extend(count.to_le_bytes());
    out.extend(count.to_le_bytes());
    out.extend(directory_size.to_le_bytes());
    out.extend(directory_offset.to_le_bytes());
    out.extend(0u16.to_le_bytes());
    out
}

fn crc32(data: &[u8]) -> u32 {
    let mut crc = 0xFFFF_FFFFu32;
    for &byte in data {
        crc ^= byte as u32;
        for _ in 0..8 {
            let mask = (crc & 1).wrapping_neg();
            crc = (crc >> 1) ^ (0xEDB8_8320 & mask);
        }
    }
    !crc
}

/// Serves a fixed body in small chunks.
pub struct StaticFetcher {
    pub body: Vec<u8>,
    pub declared_length: Option<u64>,
}

impl StaticFetcher {
    pub fn new(body: Vec<u8>) -> Self {
        let declared_length = Some(body.len() as u64);
        Self {
            body,
            declared_length,
        }
    }
}

#[async_trait]
impl Fetcher for StaticFetcher {
    async fn fetch(&self, _url: &str) -> LauncherResult<FetchResponse> {
        let chunks: Vec<std::io::Result<Bytes>> = self
            .body
            .chunks(64)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        Ok(FetchResponse {
            content_length: self.declared_length,
            body: stream::iter(chunks).boxed(),
        })
    }
}

/// Sends the first bytes of `body` and then never anything again.
pub struct StallingFetcher {
    pub body: Vec<u8>,
}

#[async_trait]
impl Fetcher for StallingFetcher {
    async fn fetch(&self, _url: &str) -> LauncherResult<FetchResponse> {
        let head = Bytes::copy_from_slice(&self.body[..self.body.len().min(16)]);
        Ok(FetchResponse {
            content_length: Some(self.body.len() as u64),
            body: stream::iter(vec![Ok(head)])
                .chain(stream::pending())
                .boxed(),
        })
    }
}

/// Refuses every request like a server answering 404.
pub struct NotFoundFetcher;

#[async_trait]
impl Fetcher for NotFoundFetcher {
    async fn fetch(&self, url: &str) -> LauncherResult<FetchResponse> {
        Err(LauncherError::DownloadFailed {
            url: url.to_string(),
            status: 404,
        })
    }
}
