use serde::{Deserialize, Serialize};
use std::fmt;

/// Why the numbering engine rejected a set of dots.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NumberingFailure {
    CandidateCountMismatch,
    KmeansFailed,
    InvalidRowLabel,
    MissingCenterRowNotUnique,
    RowSizeMismatch,
    OrderedSizeMismatch,
    NotEnoughCandidates,
}

impl NumberingFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CandidateCountMismatch => "candidate_count_mismatch",
            Self::KmeansFailed => "kmeans_failed",
            Self::InvalidRowLabel => "invalid_row_label",
            Self::MissingCenterRowNotUnique => "missing_center_row_not_unique",
            Self::RowSizeMismatch => "row_size_mismatch",
            Self::OrderedSizeMismatch => "ordered_size_mismatch",
            Self::NotEnoughCandidates => "not_enough_candidates",
        }
    }
}

impl fmt::Display for NumberingFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors produced by the single-image detection pipeline.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum DetectionError {
    #[error("invalid image: {0}")]
    InvalidImage(String),
    #[error("board boundary not found: {0}")]
    BoardNotFound(String),
    #[error("perspective rectification failed: {0}")]
    WarpFailed(String),
    #[error("expected {expected} small circles, found {found}")]
    BlobCount { expected: usize, found: usize },
    #[error("numbering failed: {reason}")]
    Numbering { reason: NumberingFailure },
    #[error("back-projection failed: {0}")]
    BackProjection(String),
}

impl DetectionError {
    /// Pipeline stage the error originates from.
    pub fn stage(&self) -> &'static str {
        match self {
            Self::InvalidImage(_) => "input",
            Self::BoardNotFound(_) => "board-boundary",
            Self::WarpFailed(_) => "rectify",
            Self::BlobCount { .. } => "blobs",
            Self::Numbering { .. } => "numbering",
            Self::BackProjection(_) => "back-projection",
        }
    }
}

impl From<NumberingFailure> for DetectionError {
    fn from(reason: NumberingFailure) -> Self {
        Self::Numbering { reason }
    }
}
