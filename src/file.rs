//! Access to container files on disk, either whole or split into numbered chunks.

use std::{
    fs::File,
    io,
    io::{Read, Seek, SeekFrom},
    path::{Path, PathBuf},
    time::Duration,
};

use backoff::backoff::Backoff;
use log::{debug, trace};

/// Bounded retry with exponential backoff around a single operation.
#[derive(Copy, Clone, Debug)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub initial_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self { Self { attempts: 5, initial_delay: Duration::from_millis(10) } }
}

/// Doubling delays that run out after the policy's attempts.
#[derive(Clone, Debug)]
struct BoundedBackoff {
    policy: RetryPolicy,
    retries_left: u32,
    delay: Duration,
}

impl BoundedBackoff {
    fn new(policy: RetryPolicy) -> Self {
        let mut backoff = Self { policy, retries_left: 0, delay: Duration::ZERO };
        backoff.reset();
        backoff
    }
}

impl Backoff for BoundedBackoff {
    fn reset(&mut self) {
        self.retries_left = self.policy.attempts.saturating_sub(1);
        self.delay = self.policy.initial_delay;
    }

    fn next_backoff(&mut self) -> Option<Duration> {
        if self.retries_left == 0 {
            return None;
        }
        self.retries_left -= 1;
        let delay = self.delay;
        self.delay = delay.saturating_mul(2);
        Some(delay)
    }
}

impl RetryPolicy {
    /// Runs `op` until it succeeds or the attempts are exhausted, returning the last error.
    pub fn run<T, F>(&self, mut op: F) -> io::Result<T>
    where F: FnMut() -> io::Result<T> {
        let attempts = self.attempts;
        let mut failed = 0;
        backoff::retry_notify(
            BoundedBackoff::new(*self),
            || op().map_err(backoff::Error::transient),
            |e: io::Error, delay: Duration| {
                failed += 1;
                debug!("Attempt {failed}/{attempts} failed, retrying in {delay:?}: {e}");
            },
        )
        .map_err(|e| match e {
            backoff::Error::Permanent(e) => e,
            backoff::Error::Transient { err, .. } => err,
        })
    }
}

/// Opens a file, retrying transient failures.
pub fn open_with_retry(path: &Path, policy: &RetryPolicy) -> io::Result<File> {
    policy.run(|| File::open(path))
}

struct Chunk {
    path: PathBuf,
    size: u64,
    file: Option<File>,
}

/// A file split into equally sized numbered chunks, read as one stream.
///
/// Chunks are opened on first access.
pub struct SplitFile {
    chunks: Vec<Chunk>,
    chunk_size: u64,
    total_size: u64,
    position: u64,
    policy: RetryPolicy,
}

impl SplitFile {
    /// Collects the numbered chunk files in `dir`, ordered by their number.
    pub fn open_dir(dir: &Path, policy: RetryPolicy) -> io::Result<Self> {
        let mut found = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let metadata = entry.metadata()?;
            if !metadata.is_file() {
                continue;
            }
            let name = entry.file_name();
            let Some(index) = name.to_str().and_then(chunk_index) else {
                continue;
            };
            found.push((index, entry.path(), metadata.len()));
        }
        found.sort_by_key(|(index, _, _)| *index);
        let chunks: Vec<Chunk> =
            found.into_iter().map(|(_, path, size)| Chunk { path, size, file: None }).collect();
        Self::from_chunks(chunks, policy)
    }

    fn from_chunks(chunks: Vec<Chunk>, policy: RetryPolicy) -> io::Result<Self> {
        let Some(first) = chunks.first() else {
            return Err(io::Error::new(io::ErrorKind::NotFound, "no chunk files found"));
        };
        let chunk_size = first.size;
        if chunk_size == 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "empty first chunk"));
        }
        let total_size = chunks.iter().map(|c| c.size).sum();
        trace!("Split file: {} chunks of {:#X} bytes", chunks.len(), chunk_size);
        Ok(Self { chunks, chunk_size, total_size, position: 0, policy })
    }

    /// Number of chunks.
    pub fn chunk_count(&self) -> usize { self.chunks.len() }

    /// Total length of the logical stream.
    pub fn len(&self) -> u64 { self.total_size }

    pub fn is_empty(&self) -> bool { self.total_size == 0 }

    fn chunk_file(&mut self, index: usize) -> io::Result<&mut File> {
        let policy = self.policy;
        let chunk = self.chunks.get_mut(index).ok_or_else(|| {
            io::Error::new(io::ErrorKind::UnexpectedEof, format!("missing part {index}"))
        })?;
        if chunk.file.is_none() {
            chunk.file = Some(open_with_retry(&chunk.path, &policy)?);
        }
        match chunk.file.as_mut() {
            Some(file) => Ok(file),
            None => Err(io::Error::from(io::ErrorKind::NotFound)),
        }
    }
}

impl Read for SplitFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() || self.position >= self.total_size {
            return Ok(0);
        }
        let index = (self.position / self.chunk_size) as usize;
        let offset = self.position % self.chunk_size;
        let available = self.chunks.get(index).map_or(0, |c| c.size.saturating_sub(offset));
        if available == 0 {
            return Ok(0);
        }
        let len = buf.len().min(available as usize);
        let file = self.chunk_file(index)?;
        file.seek(SeekFrom::Start(offset))?;
        let read = file.read(&mut buf[..len])?;
        self.position += read as u64;
        Ok(read)
    }
}

impl Seek for SplitFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let position = match pos {
            SeekFrom::Start(p) => Some(p),
            SeekFrom::End(p) => self.total_size.checked_add_signed(p),
            SeekFrom::Current(p) => self.position.checked_add_signed(p),
        };
        self.position = position.ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "invalid seek to a negative position")
        })?;
        Ok(self.position)
    }
}

/// Number of a chunk file: the trailing one or two digits of its name.
fn chunk_index(name: &str) -> Option<u32> {
    let digits = name.bytes().rev().take_while(u8::is_ascii_digit).count();
    if digits == 0 {
        return None;
    }
    let digits = digits.min(2);
    name[name.len() - digits..].parse().ok()
}

/// Whether a path looks like one chunk of a split file.
pub fn is_split_chunk(path: &Path) -> bool {
    path.file_name().and_then(|n| n.to_str()).and_then(chunk_index).is_some()
}

/// A container file, whole or split.
pub enum GameFile {
    Plain(File),
    Split(SplitFile),
}

impl GameFile {
    /// Opens `path`, treating it as a split-file chunk when its name ends in a digit.
    pub fn open(path: &Path) -> io::Result<Self> {
        Self::open_with_policy(path, RetryPolicy::default())
    }

    pub fn open_with_policy(path: &Path, policy: RetryPolicy) -> io::Result<Self> {
        if is_split_chunk(path) {
            let dir = match path.parent() {
                Some(dir) if !dir.as_os_str().is_empty() => dir,
                _ => Path::new("."),
            };
            debug!("Opening {} as split file", dir.display());
            Ok(GameFile::Split(SplitFile::open_dir(dir, policy)?))
        } else {
            Ok(GameFile::Plain(open_with_retry(path, &policy)?))
        }
    }
}

impl Read for GameFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            GameFile::Plain(file) => file.read(buf),
            GameFile::Split(file) => file.read(buf),
        }
    }
}

impl Seek for GameFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match self {
            GameFile::Plain(file) => file.seek(pos),
            GameFile::Split(file) => file.seek(pos),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::Cell, fs};

    use super::*;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir()
            .join(format!("nscatalog-{name}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn chunk_names() {
        assert_eq!(chunk_index("00"), Some(0));
        assert_eq!(chunk_index("game.nsp.12"), Some(12));
        assert_eq!(chunk_index("part7"), Some(7));
        assert_eq!(chunk_index("game.nsp"), None);
        assert!(is_split_chunk(Path::new("dir/01")));
        assert!(!is_split_chunk(Path::new("dir/game.xci")));
    }

    #[test]
    fn retry_stops_after_success() {
        let calls = Cell::new(0);
        let policy = RetryPolicy { attempts: 5, initial_delay: Duration::ZERO };
        let value = policy
            .run(|| {
                calls.set(calls.get() + 1);
                if calls.get() < 3 {
                    Err(io::Error::from(io::ErrorKind::Interrupted))
                } else {
                    Ok(42)
                }
            })
            .unwrap();
        assert_eq!(value, 42);
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn retry_is_bounded() {
        let calls = Cell::new(0);
        let policy = RetryPolicy { attempts: 5, initial_delay: Duration::ZERO };
        let err = policy
            .run::<(), _>(|| {
                calls.set(calls.get() + 1);
                Err(io::Error::from(io::ErrorKind::NotFound))
            })
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
        assert_eq!(calls.get(), 5);
    }

    #[test]
    fn backoff_doubles_until_exhausted() {
        let policy = RetryPolicy { attempts: 4, initial_delay: Duration::from_millis(10) };
        let mut backoff = BoundedBackoff::new(policy);
        let delays: Vec<_> = std::iter::from_fn(|| backoff.next_backoff()).collect();
        assert_eq!(delays, [10, 20, 40].map(Duration::from_millis));
        backoff.reset();
        assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(10)));

        let single = RetryPolicy { attempts: 1, initial_delay: Duration::ZERO };
        assert_eq!(BoundedBackoff::new(single).next_backoff(), None);
    }

    #[test]
    fn reads_across_chunks() {
        let dir = temp_dir("split");
        let data: Vec<u8> = (0..40u8).collect();
        for (i, chunk) in data.chunks(16).enumerate() {
            fs::write(dir.join(format!("{i:02}")), chunk).unwrap();
        }
        fs::write(dir.join("notes.txt"), b"ignored").unwrap();

        let mut file = GameFile::open(&dir.join("00")).unwrap();
        let GameFile::Split(split) = &file else { panic!("expected split file") };
        assert_eq!(split.chunk_count(), 3);
        assert_eq!(split.len(), 40);

        file.seek(SeekFrom::Start(14)).unwrap();
        let mut buf = [0u8; 6];
        file.read_exact(&mut buf).unwrap();
        assert_eq!(buf, [14, 15, 16, 17, 18, 19]);

        file.seek(SeekFrom::Start(30)).unwrap();
        let mut rest = Vec::new();
        file.read_to_end(&mut rest).unwrap();
        assert_eq!(rest, (30..40u8).collect::<Vec<_>>());
        fs::remove_dir_all(&dir).unwrap();
    }
}
