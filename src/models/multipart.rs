//! Represents multipart checksum tokens and the partitionings behind them.

use std::fmt;

/// Ordered candidate part sizes (bytes) for one file. Recomputed per
/// verification, never persisted.
pub type PartitionScheme = Vec<u64>;

/// A remote ETag split into its digest and the part count suffix.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChecksumToken {
    /// Plain content digest of a single-request upload.
    Single { digest: String },

    /// Digest-of-digests of a multipart upload.
    Multipart { digest: String, part_count: u64 },
}

impl ChecksumToken {
    /// Parse a token as emitted by the store. Surrounding quotes are
    /// ignored.
    ///
    /// Returns `None` when the part count suffix is not an integer `>= 1`.
    pub fn parse(raw: &str) -> Option<Self> {
        let token = raw.trim().trim_matches('"');
        match token.rsplit_once('-') {
            None => Some(Self::Single {
                digest: token.to_string(),
            }),
            Some((digest, suffix)) => {
                let part_count = suffix.parse::<u64>().ok().filter(|n| *n >= 1)?;
                Some(Self::Multipart {
                    digest: digest.to_string(),
                    part_count,
                })
            }
        }
    }

    /// Part count declared by the token; `0` for single uploads.
    pub fn declared_part_count(&self) -> u64 {
        match self {
            Self::Single { .. } => 0,
            Self::Multipart { part_count, .. } => *part_count,
        }
    }
}

impl fmt::Display for ChecksumToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single { digest } => write!(f, "{}", digest),
            Self::Multipart { digest, part_count } => write!(f, "{}-{}", digest, part_count),
        }
    }
}

/// Result of hashing a file in fixed-size parts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartwiseDigest {
    /// Part size the file was split at.
    pub part_size: u64,

    /// Hex MD5 of the concatenated raw part digests.
    pub digest: String,

    /// Number of parts the file produced.
    pub part_count: u64,
}

impl fmt::Display for PartwiseDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.digest, self.part_count)
    }
}
