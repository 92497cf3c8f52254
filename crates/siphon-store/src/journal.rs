//! Append-only JSON-lines journal with atomic compaction
//!
//! A journal is owned by one process at a time: opening takes an exclusive
//! lock on `<journal>.lock`, released by `compact_and_close` or on drop.
//! The OS drops the lock when the owner dies, so a crash leaves nothing
//! stale behind.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use fs2::FileExt;
use serde::Serialize;
use serde::de::DeserializeOwned;

/// One record per line. Appends are serialized by a writer mutex, so lines
/// from concurrent writers never interleave.
pub(crate) struct Journal {
    path: PathBuf,
    writer: Mutex<Option<Writer>>,
}

struct Writer {
    file: File,
    /// Held for as long as the journal is open
    _lock: File,
}

impl Journal {
    /// Read every record in `path`. A missing file is an empty journal.
    ///
    /// An unparsable final line is what an interrupted append leaves behind;
    /// it is dropped with a warning. Unparsable lines anywhere else are
    /// `InvalidData`.
    pub fn replay<T: DeserializeOwned>(path: &Path) -> io::Result<Vec<T>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let lines: Vec<String> = BufReader::new(file).lines().collect::<io::Result<_>>()?;
        let last = lines.len().saturating_sub(1);
        let mut records = Vec::with_capacity(lines.len());
        for (i, line) in lines.iter().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(record) => records.push(record),
                Err(e) if i == last => {
                    log::warn!("{}: dropping truncated last line: {e}", path.display());
                }
                Err(e) => {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("{} line {}: {e}", path.display(), i + 1),
                    ));
                }
            }
        }
        Ok(records)
    }

    /// Lock `path` for this process, then rewrite it to exactly `records`
    /// and open it for appending.
    ///
    /// Fails with `WouldBlock` while another process has it open.
    pub fn create<'a, T, I>(path: &Path, records: I) -> io::Result<Self>
    where
        T: Serialize + 'a,
        I: IntoIterator<Item = &'a T>,
    {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let lock = lock_exclusive(path)?;
        rewrite(path, records)?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: Mutex::new(Some(Writer {
                file: open_append(path)?,
                _lock: lock,
            })),
        })
    }

    /// Lock file guarding `path`
    pub fn lock_path(path: &Path) -> PathBuf {
        with_suffix(path, ".lock")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record; it is handed to the OS before this returns.
    pub fn append<T: Serialize>(&self, record: &T) -> io::Result<()> {
        let mut line = serde_json::to_vec(record).map_err(io::Error::other)?;
        line.push(b'\n');
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let writer = writer
            .as_mut()
            .ok_or_else(|| io::Error::other("journal is closed"))?;
        writer.file.write_all(&line)?;
        writer.file.flush()
    }

    /// Replace the journal with `records` (tmp→rename), stop appending and
    /// release the lock.
    pub fn compact_and_close<'a, T, I>(&self, records: I) -> io::Result<()>
    where
        T: Serialize + 'a,
        I: IntoIterator<Item = &'a T>,
    {
        let mut guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(writer) = guard.take() else {
            return Ok(());
        };
        writer.file.sync_all()?;
        rewrite(&self.path, records)
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(suffix);
    PathBuf::from(s)
}

fn lock_exclusive(path: &Path) -> io::Result<File> {
    let lock_path = Journal::lock_path(path);
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&lock_path)?;
    match FileExt::try_lock_exclusive(&file) {
        Ok(()) => Ok(file),
        Err(e) if e.kind() == fs2::lock_contended_error().kind() => Err(io::Error::new(
            io::ErrorKind::WouldBlock,
            format!("{} is in use by another process", path.display()),
        )),
        Err(e) => Err(e),
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

fn rewrite<'a, T, I>(path: &Path, records: I) -> io::Result<()>
where
    T: Serialize + 'a,
    I: IntoIterator<Item = &'a T>,
{
    let tmp = with_suffix(path, ".tmp");

    let mut out = io::BufWriter::new(File::create(&tmp)?);
    for record in records {
        serde_json::to_writer(&mut out, record).map_err(io::Error::other)?;
        out.write_all(b"\n")?;
    }
    let file = out.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;
    fs::rename(&tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_journal_is_empty() {
        let dir = TempDir::new().unwrap();
        let records: Vec<u32> = Journal::replay(&dir.path().join("none.jsonl")).unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn append_then_replay() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("j.jsonl");
        let journal = Journal::create(&path, &[1u32, 2]).unwrap();
        journal.append(&3u32).unwrap();
        assert_eq!(Journal::replay::<u32>(&path).unwrap(), [1, 2, 3]);
    }

    #[test]
    fn truncated_tail_is_dropped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("j.jsonl");
        std::fs::write(&path, "\"a\"\n\"b\"\n\"c").unwrap();
        assert_eq!(Journal::replay::<String>(&path).unwrap(), ["a", "b"]);
    }

    #[test]
    fn corrupt_middle_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("j.jsonl");
        std::fs::write(&path, "\"a\"\nnot json\n\"c\"\n").unwrap();
        let err = Journal::replay::<String>(&path).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn compaction_replaces_contents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("j.jsonl");
        let journal = Journal::create(&path, &[1u32, 2, 3]).unwrap();
        journal.compact_and_close(&[9u32]).unwrap();
        assert_eq!(Journal::replay::<u32>(&path).unwrap(), [9]);
        assert!(journal.append(&4u32).is_err());
        assert!(!dir.path().join("j.jsonl.tmp").exists());
    }

    #[test]
    fn second_owner_is_refused_until_close() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("j.jsonl");
        let first = Journal::create(&path, &[1u32]).unwrap();

        let err = Journal::create(&path, &[2u32]).err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
        assert_eq!(Journal::replay::<u32>(&path).unwrap(), [1]);

        first.compact_and_close(&[1u32]).unwrap();
        let second = Journal::create(&path, &[1u32]).unwrap();
        second.append(&2u32).unwrap();
        assert_eq!(Journal::replay::<u32>(&path).unwrap(), [1, 2]);
    }

    #[test]
    fn dropping_releases_the_lock() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("j.jsonl");
        drop(Journal::create(&path, &[1u32]).unwrap());
        assert!(Journal::create(&path, &[1u32]).is_ok());
    }
}
