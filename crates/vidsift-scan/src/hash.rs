//! Streaming content digest.

use std::fs::File;
use std::hash::Hasher as _;
use std::io::{self, Read};
use std::path::Path;

use twox_hash::XxHash64;
use vidsift_core::VideoDescriptor;

/// Read size used when streaming a file through the digest.
pub const HASH_CHUNK_SIZE: usize = 64 * 1024;

/// XxHash64 of the whole file, seeded with its size.
pub fn content_hash(path: &Path, size: u64) -> io::Result<u64> {
    hash_reader(File::open(path)?, size)
}

/// XxHash64 of everything `reader` yields, seeded with `seed`.
fn hash_reader(mut reader: impl Read, seed: u64) -> io::Result<u64> {
    let mut hasher = XxHash64::with_seed(seed);
    let mut buffer = vec![0u8; HASH_CHUNK_SIZE];

    loop {
        let bytes_read = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.write(&buffer[..bytes_read]);
    }

    Ok(hasher.finish())
}

/// Computes the content digest of a descriptor's file.
pub trait ContentDigest: Send + Sync {
    /// Digest the file behind `video`.
    fn digest(&self, video: &VideoDescriptor) -> io::Result<u64>;
}

/// Digest that streams the file from disk.
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamingDigest;

impl ContentDigest for StreamingDigest {
    fn digest(&self, video: &VideoDescriptor) -> io::Result<u64> {
        content_hash(&video.path, video.size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    /// Yields its bytes in two reads with interruptions before each.
    struct Flaky {
        data: &'static [u8],
        interrupt_next: bool,
    }

    impl Read for Flaky {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.interrupt_next {
                self.interrupt_next = false;
                return Err(io::Error::from(io::ErrorKind::Interrupted));
            }
            self.interrupt_next = true;
            let n = self.data.len().min(4).min(buf.len());
            buf[..n].copy_from_slice(&self.data[..n]);
            self.data = &self.data[n..];
            Ok(n)
        }
    }

    #[test]
    fn test_interrupted_reads_are_retried() {
        let data: &[u8] = b"abcdefgh";
        let flaky = Flaky {
            data,
            interrupt_next: true,
        };
        let hash = hash_reader(flaky, 8).unwrap();
        assert_eq!(hash, hash_reader(data, 8).unwrap());
    }

    #[test]
    fn test_other_read_errors_propagate() {
        struct Broken;
        impl Read for Broken {
            fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
                Err(io::Error::from(io::ErrorKind::PermissionDenied))
            }
        }
        let err = hash_reader(Broken, 0).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::PermissionDenied);
    }

    #[test]
    fn test_identical_content_same_hash() {
        let temp = TempDir::new().unwrap();
        let a = temp.path().join("a.mp4");
        let b = temp.path().join("b.mp4");
        fs::write(&a, b"same bytes").unwrap();
        fs::write(&b, b"same bytes").unwrap();

        assert_eq!(content_hash(&a, 10).unwrap(), content_hash(&b, 10).unwrap());
    }

    #[test]
    fn test_size_seeds_the_hash() {
        let temp = TempDir::new().unwrap();
        let a = temp.path().join("a.mp4");
        fs::write(&a, b"same bytes").unwrap();

        assert_ne!(content_hash(&a, 10).unwrap(), content_hash(&a, 11).unwrap());
    }

    #[test]
    fn test_spans_multiple_chunks() {
        let temp = TempDir::new().unwrap();
        let a = temp.path().join("a.mp4");
        let b = temp.path().join("b.mp4");
        let mut data = vec![7u8; HASH_CHUNK_SIZE * 2 + 13];
        fs::write(&a, &data).unwrap();
        *data.last_mut().unwrap() = 8;
        fs::write(&b, &data).unwrap();

        let size = data.len() as u64;
        assert_ne!(content_hash(&a, size).unwrap(), content_hash(&b, size).unwrap());
    }

    #[test]
    fn test_missing_file_is_error() {
        let temp = TempDir::new().unwrap();
        assert!(content_hash(&temp.path().join("gone.mp4"), 0).is_err());
    }
}
