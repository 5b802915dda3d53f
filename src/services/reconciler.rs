//! src/services/reconciler.rs
//!
//! Reconciles a remote ETag against a local file. The partitioning used by
//! the uploader is unknown, so the reconciler regenerates the tokens a set
//! of plausible uploaders would have produced and tests membership. This
//! is a heuristic: a file uploaded with a part size outside the catalogue
//! (and not matching the derived size) fails verification spuriously.

use crate::{
    models::multipart::ChecksumToken,
    services::{
        digest::{self, DigestResult},
        part_sizer::{CandidatePartSizer, part_count_for},
    },
};
use std::{collections::BTreeSet, fs, path::Path};
use tracing::{debug, warn};

#[derive(Clone, Debug, Default)]
pub struct ChecksumReconciler {
    sizer: CandidatePartSizer,
}

impl ChecksumReconciler {
    pub fn new(sizer: CandidatePartSizer) -> Self {
        Self { sizer }
    }

    pub fn sizer(&self) -> &CandidatePartSizer {
        &self.sizer
    }

    /// Every token the local file could have been given by the store.
    ///
    /// With `declared_part_count == 0` this is the plain content digest.
    /// Otherwise one `<digest>-<parts>` token per admissible part size,
    /// where `<parts>` is the number of parts that size really produces.
    pub fn possible_checksum_tokens(
        &self,
        path: &Path,
        declared_part_count: u64,
    ) -> DigestResult<BTreeSet<String>> {
        if declared_part_count == 0 {
            return Ok(BTreeSet::from([digest::whole_file_digest(path)?]));
        }

        let file_size = fs::metadata(path)
            .map_err(|err| digest::DigestError::Read {
                path: path.to_path_buf(),
                source: err,
            })?
            .len();
        let sizes = self.sizer.candidate_part_sizes(file_size, declared_part_count);
        debug!(file_size, declared_part_count, ?sizes, "candidate part sizes");

        let tokens = digest::part_digests_of_digests(path, &sizes)?
            .into_iter()
            .map(|partwise| {
                debug_assert_eq!(
                    partwise.part_count,
                    part_count_for(file_size, partwise.part_size)
                );
                partwise.to_string()
            })
            .collect();
        Ok(tokens)
    }

    /// True when `remote_token` matches one of the tokens regenerated from
    /// `path`. A token with a malformed part count is a mismatch, not an
    /// error. Local read failures are returned as errors.
    pub fn verify(&self, remote_token: &str, path: &Path) -> DigestResult<bool> {
        let Some(token) = ChecksumToken::parse(remote_token) else {
            warn!("remote checksum token `{}` is malformed", remote_token);
            return Ok(false);
        };
        let candidates = self.possible_checksum_tokens(path, token.declared_part_count())?;
        debug!("remote etag: {}, local etags: {:?}", token, candidates);
        Ok(candidates.contains(&token.to_string()))
    }
}
