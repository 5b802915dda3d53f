//! Candidate part sizes for reconstructing multipart ETags.
//!
//! The store does not record how a file was partitioned, only how many
//! parts it ended up with. Known uploaders use a handful of fixed part
//! sizes, and some derive the size from the file size and a target part
//! count rounded to whole MiB.

use crate::models::multipart::PartitionScheme;

pub const MIB: u64 = 1_048_576;

/// Default chunk size of the AWS CLI and boto3 transfer manager.
pub const AWS_CLI_PART_SIZE: u64 = 8_388_608;

/// Default chunk size of s3cmd.
pub const S3CMD_PART_SIZE: u64 = 15_728_640;

pub const DEFAULT_PART_SIZES: [u64; 2] = [AWS_CLI_PART_SIZE, S3CMD_PART_SIZE];

/// Most parts S3 accepts in one multipart upload.
pub const MAX_PART_COUNT: u64 = 10_000;

#[derive(Clone, Debug)]
pub struct CandidatePartSizer {
    catalogue: Vec<u64>,
}

impl Default for CandidatePartSizer {
    fn default() -> Self {
        Self::with_catalogue(DEFAULT_PART_SIZES)
    }
}

impl CandidatePartSizer {
    /// Use `catalogue` instead of the default well-known sizes.
    pub fn with_catalogue(catalogue: impl IntoIterator<Item = u64>) -> Self {
        Self {
            catalogue: catalogue.into_iter().collect(),
        }
    }

    /// Append further well-known sizes after the current catalogue.
    pub fn extended(mut self, extra: impl IntoIterator<Item = u64>) -> Self {
        self.catalogue.extend(extra);
        self
    }

    pub fn catalogue(&self) -> &[u64] {
        &self.catalogue
    }

    /// Part sizes an uploader could plausibly have used for a file of
    /// `file_size` bytes that ended up with `declared_part_count` parts.
    ///
    /// Catalogue order is preserved and the derived size comes last.
    /// Duplicates are left in place.
    pub fn candidate_part_sizes(
        &self,
        file_size: u64,
        declared_part_count: u64,
    ) -> PartitionScheme {
        let derived = derived_part_size(file_size, declared_part_count);
        self.catalogue
            .iter()
            .copied()
            .chain(derived)
            .filter(|size| is_admissible(*size, file_size, declared_part_count))
            .collect()
    }
}

/// `ceil_to_1MiB(file_size / declared_part_count)`, or `None` when no part
/// count was declared.
pub fn derived_part_size(file_size: u64, declared_part_count: u64) -> Option<u64> {
    if declared_part_count == 0 {
        return None;
    }
    let mib_parts = u128::from(declared_part_count) * u128::from(MIB);
    let rounded = u128::from(file_size).div_ceil(mib_parts) * u128::from(MIB);
    u64::try_from(rounded).ok()
}

/// A part size is admissible when it actually splits the file and the
/// split does not need more parts than were declared.
pub fn is_admissible(part_size: u64, file_size: u64, declared_part_count: u64) -> bool {
    part_size > 0
        && part_size < file_size
        && u128::from(file_size) <= u128::from(part_size) * u128::from(declared_part_count)
}

/// Part size for uploading `file_size` bytes.
///
/// `preferred` is kept while the upload fits in [`MAX_PART_COUNT`] parts.
/// Past that the smallest whole-MiB size that fits is used, which is the
/// derived candidate for the resulting part count.
pub fn upload_part_size(file_size: u64, preferred: u64) -> u64 {
    if part_count_for(file_size, preferred) <= MAX_PART_COUNT {
        return preferred;
    }
    derived_part_size(file_size, MAX_PART_COUNT).unwrap_or(preferred)
}

/// Parts needed to split `file_size` bytes at `part_size`.
pub fn part_count_for(file_size: u64, part_size: u64) -> u64 {
    file_size.div_ceil(part_size)
}
