//! src/services/digest.rs
//!
//! Whole-file and part-wise MD5 digests of local backup artifacts. The
//! part-wise form reproduces the ETag an S3-compatible store assigns to a
//! multipart upload: MD5 over the concatenated raw MD5s of each part.

use crate::models::multipart::PartwiseDigest;
use md5::Context;
use std::{
    fs::File,
    io::{self, Read},
    path::{Path, PathBuf},
};
use thiserror::Error;

/// Read block size. Correctness does not depend on it.
const READ_BLOCK_SIZE: usize = 1024 * 1024;

#[derive(Debug, Error)]
pub enum DigestError {
    #[error("part size must be a positive number of bytes")]
    InvalidPartSize,
    #[error("failed to read local file `{}`: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl DigestError {
    fn read(path: &Path, source: io::Error) -> Self {
        Self::Read {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Underlying I/O error kind, if this is a read failure.
    pub fn io_kind(&self) -> Option<io::ErrorKind> {
        match self {
            Self::Read { source, .. } => Some(source.kind()),
            Self::InvalidPartSize => None,
        }
    }
}

pub type DigestResult<T> = Result<T, DigestError>;

/// Incremental hasher for one partitioning of a byte stream.
///
/// Keeps only the context of the part being filled and a running context
/// over the raw digests of finished parts.
struct PartwiseHasher {
    part_size: u64,
    filled: u64,
    part_count: u64,
    current: Context,
    outer: Context,
}

impl PartwiseHasher {
    fn new(part_size: u64) -> Self {
        Self {
            part_size,
            filled: 0,
            part_count: 0,
            current: Context::new(),
            outer: Context::new(),
        }
    }

    fn consume(&mut self, mut data: &[u8]) {
        while !data.is_empty() {
            let room = self.part_size - self.filled;
            let take = usize::try_from(room).map_or(data.len(), |room| room.min(data.len()));
            self.current.consume(&data[..take]);
            self.filled += take as u64;
            data = &data[take..];
            if self.filled == self.part_size {
                self.finish_part();
            }
        }
    }

    fn finish_part(&mut self) {
        let part = std::mem::replace(&mut self.current, Context::new());
        self.outer.consume(part.compute().0);
        self.part_count += 1;
        self.filled = 0;
    }

    fn finalize(mut self) -> PartwiseDigest {
        if self.filled > 0 {
            self.finish_part();
        }
        PartwiseDigest {
            part_size: self.part_size,
            digest: format!("{:x}", self.outer.compute()),
            part_count: self.part_count,
        }
    }
}

/// Feed every block of the file at `path` into `sink`.
fn read_blocks(path: &Path, mut sink: impl FnMut(&[u8])) -> DigestResult<()> {
    let mut file = File::open(path).map_err(|err| DigestError::read(path, err))?;
    let mut buf = vec![0u8; READ_BLOCK_SIZE];
    loop {
        let n = match file.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(DigestError::read(path, err)),
        };
        sink(&buf[..n]);
    }
    Ok(())
}

/// Lowercase hex MD5 of the whole file.
pub fn whole_file_digest(path: &Path) -> DigestResult<String> {
    let mut ctx = Context::new();
    read_blocks(path, |block| ctx.consume(block))?;
    Ok(format!("{:x}", ctx.compute()))
}

/// Digest-of-digests of the file split into `part_size` chunks.
///
/// An empty file yields zero parts.
pub fn part_digest_of_digests(path: &Path, part_size: u64) -> DigestResult<PartwiseDigest> {
    let mut digests = part_digests_of_digests(path, &[part_size])?;
    digests.pop().ok_or(DigestError::InvalidPartSize)
}

/// Compute the digest-of-digests for several part sizes in one pass over
/// the file. Results follow the order of `part_sizes`.
pub fn part_digests_of_digests(
    path: &Path,
    part_sizes: &[u64],
) -> DigestResult<Vec<PartwiseDigest>> {
    if part_sizes.iter().any(|size| *size == 0) {
        return Err(DigestError::InvalidPartSize);
    }
    let mut hashers: Vec<PartwiseHasher> =
        part_sizes.iter().map(|size| PartwiseHasher::new(*size)).collect();
    if hashers.is_empty() {
        return Ok(Vec::new());
    }

    read_blocks(path, |block| {
        for hasher in hashers.iter_mut() {
            hasher.consume(block);
        }
    })?;

    Ok(hashers.into_iter().map(PartwiseHasher::finalize).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn file_with(bytes: &[u8]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(bytes).unwrap();
        file.flush().unwrap();
        file
    }

    fn reference_etag(bytes: &[u8], part_size: usize) -> String {
        let raw: Vec<u8> = bytes
            .chunks(part_size)
            .flat_map(|chunk| md5::compute(chunk).0)
            .collect();
        format!("{:x}", md5::compute(raw))
    }

    #[test]
    fn whole_file_digest_matches_md5() {
        let file = file_with(b"hello world");
        assert_eq!(
            whole_file_digest(file.path()).unwrap(),
            "5eb63bbbe01eeed093cb22bb8f5acdc3"
        );
    }

    #[test]
    fn empty_file_digest() {
        let file = file_with(b"");
        assert_eq!(
            whole_file_digest(file.path()).unwrap(),
            "d41d8cd98f00b204e9800998ecf8427e"
        );
    }

    #[test]
    fn partwise_digest_matches_reference() {
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let file = file_with(&data);

        let digest = part_digest_of_digests(file.path(), 3000).unwrap();
        assert_eq!(digest.part_count, 4);
        assert_eq!(digest.digest, reference_etag(&data, 3000));
    }

    #[test]
    fn exact_multiple_has_no_empty_trailing_part() {
        let data = vec![7u8; 4096];
        let file = file_with(&data);

        let digest = part_digest_of_digests(file.path(), 1024).unwrap();
        assert_eq!(digest.part_count, 4);
        assert_eq!(digest.digest, reference_etag(&data, 1024));
    }

    #[test]
    fn parts_larger_than_read_block() {
        let data: Vec<u8> = (0..(READ_BLOCK_SIZE * 2 + 17))
            .map(|i| (i % 97) as u8)
            .collect();
        let file = file_with(&data);
        let part_size = READ_BLOCK_SIZE + READ_BLOCK_SIZE / 2;

        let digest = part_digest_of_digests(file.path(), part_size as u64).unwrap();
        assert_eq!(digest.part_count, 2);
        assert_eq!(digest.digest, reference_etag(&data, part_size));
    }

    #[test]
    fn single_pass_matches_individual_runs() {
        let data: Vec<u8> = (0..50_000u32).map(|i| (i * 31 % 256) as u8).collect();
        let file = file_with(&data);

        let all = part_digests_of_digests(file.path(), &[1000, 7777, 50_000]).unwrap();
        for digest in &all {
            let single = part_digest_of_digests(file.path(), digest.part_size).unwrap();
            assert_eq!(&single, digest);
        }
        assert_eq!(all[2].part_count, 1);
    }

    #[test]
    fn zero_part_size_is_rejected() {
        let file = file_with(b"abc");
        assert!(matches!(
            part_digest_of_digests(file.path(), 0),
            Err(DigestError::InvalidPartSize)
        ));
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = whole_file_digest(&dir.path().join("missing.gz")).unwrap_err();
        assert_eq!(err.io_kind(), Some(io::ErrorKind::NotFound));
    }
}
