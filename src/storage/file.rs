//! File helpers
//!
//! Whole-file replacement via temp file + rename, checksummed writes,
//! and tail repair after a torn append.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::Result;

use super::format::DataFingerprint;
use super::TMP_SUFFIX;

/// Write adapter that tracks CRC32 and byte count of everything written
pub struct CrcWriter<W: Write> {
    inner: W,
    hasher: crc32fast::Hasher,
    written: u64,
}

impl<W: Write> CrcWriter<W> {
    pub fn new(inner: W) -> Self {
        Self::resume(inner, DataFingerprint::default())
    }

    /// Continue a checksum over data that already precedes `inner`
    pub fn resume(inner: W, prior: DataFingerprint) -> Self {
        Self {
            inner,
            hasher: crc32fast::Hasher::new_with_initial(prior.crc),
            written: prior.len,
        }
    }

    /// Fingerprint of prior + written bytes
    pub fn fingerprint(&self) -> DataFingerprint {
        DataFingerprint {
            len: self.written,
            crc: self.hasher.clone().finalize(),
        }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for CrcWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Temp path next to `path` used for atomic replacement
pub(crate) fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(TMP_SUFFIX);
    PathBuf::from(name)
}

/// Write a file atomically: `f` fills a temp file which is fsynced and
/// renamed over `path`. Readers see either the old or the new file.
pub fn write_atomic<T, F>(path: &Path, buffer_size: usize, f: F) -> Result<T>
where
    F: FnOnce(&mut BufWriter<File>) -> Result<T>,
{
    let tmp = temp_path(path);
    let result = (|| -> Result<T> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp)?;
        let mut writer = BufWriter::with_capacity(buffer_size, file);
        let out = f(&mut writer)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(out)
    })();

    match result {
        Ok(out) => {
            replace_file(&tmp, path)?;
            Ok(out)
        }
        Err(e) => {
            let _ = fs::remove_file(&tmp);
            Err(e)
        }
    }
}

/// Copy `src` to `dst` atomically (temp + rename)
pub fn copy_atomic(src: &Path, dst: &Path) -> Result<u64> {
    let tmp = temp_path(dst);
    let copied = match fs::copy(src, &tmp) {
        Ok(n) => n,
        Err(e) => {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
    };
    File::open(&tmp)?.sync_all()?;
    replace_file(&tmp, dst)?;
    Ok(copied)
}

/// Rename `from` over `to` and sync the parent directory
pub fn replace_file(from: &Path, to: &Path) -> Result<()> {
    fs::rename(from, to)?;
    sync_parent(to);
    Ok(())
}

#[cfg(unix)]
fn sync_parent(path: &Path) {
    if let Some(dir) = path.parent() {
        if let Ok(handle) = File::open(dir) {
            let _ = handle.sync_all();
        }
    }
}

#[cfg(not(unix))]
fn sync_parent(_path: &Path) {}

/// Length + CRC32 of a whole file
pub fn fingerprint(path: &Path, buffer_size: usize) -> Result<DataFingerprint> {
    let mut reader = BufReader::with_capacity(buffer_size, File::open(path)?);
    let mut hasher = crc32fast::Hasher::new();
    let mut len = 0u64;
    let mut buf = vec![0u8; buffer_size.max(4096)];

    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        len += n as u64;
    }

    Ok(DataFingerprint {
        len,
        crc: hasher.finalize(),
    })
}

/// Drop a partial last line left by an interrupted append.
///
/// Returns the number of bytes truncated (0 when the file ends cleanly).
pub fn repair_torn_tail(path: &Path) -> Result<u64> {
    let mut file = OpenOptions::new().read(true).write(true).open(path)?;
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(0);
    }

    // Walk backwards in blocks until the last newline is found
    const BLOCK: u64 = 4096;
    let mut end = len;
    let mut buf = vec![0u8; BLOCK as usize];
    let mut keep = 0u64;
    let mut first = true;

    while end > 0 {
        let start = end.saturating_sub(BLOCK);
        let chunk = &mut buf[..(end - start) as usize];
        file.seek(SeekFrom::Start(start))?;
        file.read_exact(chunk)?;

        if first && chunk.last() == Some(&b'\n') {
            return Ok(0);
        }
        first = false;

        if let Some(i) = memchr::memrchr(b'\n', chunk) {
            keep = start + i as u64 + 1;
            break;
        }
        end = start;
    }

    file.set_len(keep)?;
    file.sync_all()?;
    Ok(len - keep)
}
