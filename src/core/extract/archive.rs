use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::path::{Component, Path, PathBuf};

use tracing::{debug, warn};

use crate::core::error::{LauncherError, LauncherResult};

const LOCAL_HEADER_SIGNATURE: u32 = 0x0403_4b50;
const CENTRAL_HEADER_SIGNATURE: u32 = 0x0201_4b50;
const LOCAL_HEADER_LEN: usize = 30;
const CENTRAL_HEADER_LEN: usize = 46;
/// General-purpose flag bit 3: sizes and CRC follow the entry data.
const DATA_DESCRIPTOR_FLAG: u16 = 0x0008;
const MADE_BY_UNIX: u8 = 3;
#[cfg_attr(not(unix), allow(dead_code))]
const FILE_TYPE_MASK: u32 = 0o170_000;
#[cfg_attr(not(unix), allow(dead_code))]
const SYMLINK_TYPE: u32 = 0o120_000;
/// The stream reader consumes at most one local header block before it
/// recognises the central directory.
const HEAD_CAPTURE_LEN: usize = 64;

/// Unpacks an archive read sequentially from `reader` into `target`,
/// overwriting files that already exist.
pub trait ArchiveExtractor: Send + Sync {
    fn extract(&self, reader: &mut dyn Read, target: &Path) -> LauncherResult<()>;
}

/// Zip decoding straight off the stream, entry by entry, without buffering
/// the whole archive or seeking to the central directory.
///
/// Archives whose first entry defers its sizes to a data descriptor cannot
/// be decoded that way; those are spooled to a temporary file next to
/// `target` and read through their central directory instead.
#[derive(Debug, Default, Clone, Copy)]
pub struct ZipStreamExtractor;

impl ArchiveExtractor for ZipStreamExtractor {
    fn extract(&self, reader: &mut dyn Read, target: &Path) -> LauncherResult<()> {
        let head = read_head(reader, LOCAL_HEADER_LEN).map_err(|e| LauncherError::io(target, e))?;
        let spool = uses_data_descriptor(&head);
        let rest = Cursor::new(head).chain(reader);

        if spool {
            extract_spooled(rest, target)
        } else {
            extract_streamed(rest, target)
        }
    }
}

fn extract_streamed<R: Read>(reader: R, target: &Path) -> LauncherResult<()> {
    let mut reader = HeadRecorder::new(reader);
    let mut written: HashMap<String, PathBuf> = HashMap::new();

    loop {
        reader.reset();
        let Some(mut entry) = zip::read::read_zipfile_from_stream(&mut reader)? else {
            break;
        };

        // Rejects absolute paths and `..` components.
        let Some(relative) = entry.enclosed_name() else {
            warn!("Skipping unsafe archive entry {:?}", entry.name());
            continue;
        };
        let out_path = target.join(relative);

        if entry.is_dir() {
            std::fs::create_dir_all(&out_path).map_err(|e| LauncherError::io(&out_path, e))?;
            continue;
        }

        write_file(&mut entry, &out_path)?;
        written.insert(entry.name().to_string(), out_path);
    }

    // Local headers carry no file modes; the central directory that follows does.
    match reader.take_head() {
        Some(consumed) => {
            let directory = Cursor::new(consumed).chain(&mut reader);
            let modes = read_central_modes(directory).map_err(|e| LauncherError::io(target, e))?;
            for (name, mode) in modes {
                if let Some(path) = written.get(&name) {
                    apply_unix_mode(path, mode, target)?;
                }
            }
        }
        None => warn!("Central directory of archive for {:?} not recoverable, modes not applied", target),
    }

    debug!("Extracted {} files into {:?}", written.len(), target);
    Ok(())
}

fn extract_spooled<R: Read>(mut reader: R, target: &Path) -> LauncherResult<()> {
    let spool_dir = target.parent().unwrap_or(target);
    let mut spool = tempfile::tempfile_in(spool_dir).map_err(|e| LauncherError::io(spool_dir, e))?;
    let size = std::io::copy(&mut reader, &mut spool).map_err(|e| LauncherError::io(target, e))?;
    debug!("Archive uses data descriptors, spooled {} bytes before extracting", size);

    let mut archive = zip::ZipArchive::new(spool)?;
    let mut extracted = 0usize;

    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        let Some(relative) = entry.enclosed_name() else {
            warn!("Skipping unsafe archive entry {:?}", entry.name());
            continue;
        };
        let out_path = target.join(relative);

        if entry.is_dir() {
            std::fs::create_dir_all(&out_path).map_err(|e| LauncherError::io(&out_path, e))?;
            continue;
        }

        write_file(&mut entry, &out_path)?;
        if let Some(mode) = entry.unix_mode() {
            apply_unix_mode(&out_path, mode, target)?;
        }
        extracted += 1;
    }

    debug!("Extracted {} files into {:?}", extracted, target);
    Ok(())
}

fn write_file<E: Read>(entry: &mut E, out_path: &Path) -> LauncherResult<()> {
    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| LauncherError::io(parent, e))?;
    }

    // A link left by an earlier partial run must not redirect the write.
    if std::fs::symlink_metadata(out_path).is_ok_and(|m| m.file_type().is_symlink()) {
        std::fs::remove_file(out_path).map_err(|e| LauncherError::io(out_path, e))?;
    }

    let mut file = std::fs::File::create(out_path).map_err(|e| LauncherError::io(out_path, e))?;
    std::io::copy(entry, &mut file).map_err(|e| LauncherError::io(out_path, e))?;
    Ok(())
}

/// Restore permission bits, or turn a symlink entry (written as a file
/// holding the link target) back into a link.
#[cfg(unix)]
fn apply_unix_mode(path: &Path, mode: u32, root: &Path) -> LauncherResult<()> {
    use std::os::unix::fs::PermissionsExt;

    if mode & FILE_TYPE_MASK == SYMLINK_TYPE {
        let link_target = std::fs::read_to_string(path).map_err(|e| LauncherError::io(path, e))?;
        let link_target = PathBuf::from(link_target);
        if !link_stays_inside(root, path, &link_target) {
            warn!("Keeping {:?} as a file: link to {:?} leaves the install", path, link_target);
            return Ok(());
        }
        std::fs::remove_file(path).map_err(|e| LauncherError::io(path, e))?;
        std::os::unix::fs::symlink(&link_target, path).map_err(|e| LauncherError::io(path, e))?;
        return Ok(());
    }

    if mode & 0o777 != 0 {
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode & 0o777))
            .map_err(|e| LauncherError::io(path, e))?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn apply_unix_mode(_path: &Path, _mode: u32, _root: &Path) -> LauncherResult<()> {
    Ok(())
}

/// Whether a relative `link_target` placed at `link` resolves inside `root`.
#[cfg_attr(not(unix), allow(dead_code))]
fn link_stays_inside(root: &Path, link: &Path, link_target: &Path) -> bool {
    let Ok(parent) = link.parent().unwrap_or(root).strip_prefix(root) else {
        return false;
    };

    let mut depth = parent.components().count();
    for component in link_target.components() {
        match component {
            Component::Normal(_) => depth += 1,
            Component::CurDir => {}
            Component::ParentDir => match depth.checked_sub(1) {
                Some(up) => depth = up,
                None => return false,
            },
            Component::RootDir | Component::Prefix(_) => return false,
        }
    }
    true
}

fn uses_data_descriptor(head: &[u8]) -> bool {
    if head.len() < 8 {
        return false;
    }
    let signature = u32::from_le_bytes([head[0], head[1], head[2], head[3]]);
    let flags = u16::from_le_bytes([head[6], head[7]]);
    signature == LOCAL_HEADER_SIGNATURE && flags & DATA_DESCRIPTOR_FLAG != 0
}

/// Up to `len` bytes, fewer only at end of stream.
fn read_head(reader: &mut dyn Read, len: usize) -> std::io::Result<Vec<u8>> {
    let mut head = vec![0u8; len];
    let mut filled = 0;
    while filled < len {
        match reader.read(&mut head[filled..])? {
            0 => break,
            n => filled += n,
        }
    }
    head.truncate(filled);
    Ok(head)
}

/// `(name, unix mode)` of every central directory record written on unix.
fn read_central_modes<R: Read>(mut reader: R) -> std::io::Result<Vec<(String, u32)>> {
    let mut modes = Vec::new();
    let mut record = [0u8; CENTRAL_HEADER_LEN];

    loop {
        reader.read_exact(&mut record[..4])?;
        if u32::from_le_bytes([record[0], record[1], record[2], record[3]]) != CENTRAL_HEADER_SIGNATURE {
            break;
        }
        reader.read_exact(&mut record[4..])?;

        let made_by = record[5];
        let name_len = u16::from_le_bytes([record[28], record[29]]) as usize;
        let skip = u16::from_le_bytes([record[30], record[31]]) as u64
            + u16::from_le_bytes([record[32], record[33]]) as u64;
        let external = u32::from_le_bytes([record[38], record[39], record[40], record[41]]);

        let mut name = vec![0u8; name_len];
        reader.read_exact(&mut name)?;
        std::io::copy(&mut (&mut reader).take(skip), &mut std::io::sink())?;

        let mode = external >> 16;
        if made_by == MADE_BY_UNIX && mode != 0 {
            modes.push((String::from_utf8_lossy(&name).into_owned(), mode));
        }
    }
    Ok(modes)
}

/// Remembers the first bytes read since the last `reset`, so whatever the
/// zip stream reader consumed while probing for the next entry can be
/// replayed.
struct HeadRecorder<R> {
    inner: R,
    head: Vec<u8>,
    overflowed: bool,
}

impl<R: Read> HeadRecorder<R> {
    fn new(inner: R) -> Self {
        Self {
            inner,
            head: Vec::with_capacity(HEAD_CAPTURE_LEN),
            overflowed: false,
        }
    }

    fn reset(&mut self) {
        self.head.clear();
        self.overflowed = false;
    }

    fn take_head(&mut self) -> Option<Vec<u8>> {
        (!self.overflowed).then(|| std::mem::take(&mut self.head))
    }
}

impl<R: Read> Read for HeadRecorder<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        let room = HEAD_CAPTURE_LEN - self.head.len();
        if n > room {
            self.overflowed = true;
        }
        self.head.extend_from_slice(&buf[..n.min(room)]);
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    use crate::core::testing::{zip_bytes, zip_bytes_with_descriptors};

    #[test]
    fn extracts_nested_entries() {
        let dir = tempfile::tempdir().unwrap();
        let archive = zip_bytes(&[
            ("Starfall", b"binary", 0o755),
            ("data/levels/one.dat", b"level one", 0o644),
        ]);

        ZipStreamExtractor
            .extract(&mut archive.as_slice(), dir.path())
            .unwrap();

        assert_eq!(std::fs::read(dir.path().join("Starfall")).unwrap(), b"binary");
        assert_eq!(
            std::fs::read(dir.path().join("data/levels/one.dat")).unwrap(),
            b"level one"
        );

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(dir.path().join("Starfall"))
                .unwrap()
                .permissions()
                .mode();
            assert_eq!(mode & 0o777, 0o755);
        }
    }

    #[test]
    fn overwrites_partial_content() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.txt"), b"stale and much longer").unwrap();
        let archive = zip_bytes(&[("config.txt", b"fresh", 0o644)]);

        ZipStreamExtractor
            .extract(&mut archive.as_slice(), dir.path())
            .unwrap();
        assert_eq!(std::fs::read(dir.path().join("config.txt")).unwrap(), b"fresh");
    }

    #[test]
    fn garbage_input_fails() {
        let dir = tempfile::tempdir().unwrap();
        let garbage = vec![7u8; 64];
        assert!(ZipStreamExtractor
            .extract(&mut garbage.as_slice(), dir.path())
            .is_err());
    }

    #[test]
    fn extracts_archive_with_data_descriptors() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("stable/3");
        std::fs::create_dir_all(&target).unwrap();
        let archive = zip_bytes_with_descriptors(&[
            ("Starfall", b"#!/bin/sh\n", 0o100_755),
            ("data/levels/one.dat", b"level one", 0o100_644),
        ]);

        ZipStreamExtractor
            .extract(&mut archive.as_slice(), &target)
            .unwrap();

        assert_eq!(std::fs::read(target.join("Starfall")).unwrap(), b"#!/bin/sh\n");
        assert_eq!(
            std::fs::read(target.join("data/levels/one.dat")).unwrap(),
            b"level one"
        );
        // The spool file is gone with its handle.
        assert_eq!(std::fs::read_dir(dir.path().join("stable")).unwrap().count(), 1);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(target.join("Starfall"))
                .unwrap()
                .permissions()
                .mode();
            assert_eq!(mode & 0o777, 0o755);
        }
    }

    #[cfg(unix)]
    #[test]
    fn streamed_symlinks_are_recreated() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        let options = zip::write::SimpleFileOptions::default;
        writer
            .start_file("Starfall.app/Frameworks/Core/Versions/A/core", options())
            .unwrap();
        writer.write_all(b"framework").unwrap();
        writer
            .add_symlink("Starfall.app/Frameworks/Core/Versions/Current", "A", options())
            .unwrap();
        writer
            .add_symlink("escape", "../../outside", options())
            .unwrap();
        let archive = writer.finish().unwrap().into_inner();

        ZipStreamExtractor
            .extract(&mut archive.as_slice(), dir.path())
            .unwrap();

        let current = dir.path().join("Starfall.app/Frameworks/Core/Versions/Current");
        assert!(std::fs::symlink_metadata(&current).unwrap().file_type().is_symlink());
        assert_eq!(std::fs::read_link(&current).unwrap(), PathBuf::from("A"));
        assert_eq!(std::fs::read(current.join("core")).unwrap(), b"framework");

        let escape = dir.path().join("escape");
        assert!(!std::fs::symlink_metadata(&escape).unwrap().file_type().is_symlink());
    }

    #[cfg(unix)]
    #[test]
    fn spooled_symlinks_are_recreated() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("stable/4");
        std::fs::create_dir_all(&target).unwrap();
        let archive = zip_bytes_with_descriptors(&[
            ("lib/libgame.so.1", b"elf", 0o100_644),
            ("lib/libgame.so", b"libgame.so.1", 0o120_777),
        ]);

        ZipStreamExtractor
            .extract(&mut archive.as_slice(), &target)
            .unwrap();

        let link = target.join("lib/libgame.so");
        assert_eq!(std::fs::read_link(&link).unwrap(), PathBuf::from("libgame.so.1"));
        assert_eq!(std::fs::read(&link).unwrap(), b"elf");
    }

    #[test]
    fn link_containment() {
        let root = Path::new("/games/stable/1");
        let link = root.join("a/b/link");
        assert!(link_stays_inside(root, &link, Path::new("../c")));
        assert!(link_stays_inside(root, &link, Path::new("../../top")));
        assert!(!link_stays_inside(root, &link, Path::new("../../../up")));
        assert!(!link_stays_inside(root, &link, Path::new("/etc/passwd")));
    }
}
