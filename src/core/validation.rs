//! Validation for externally supplied exclusion ranges
//!
//! Exclusion ranges are produced upstream (curation tooling) and handed to
//! this crate as character offsets. This module only checks them; it never
//! decides what is excluded and never mutates its input.
//!
//! Ranges are half-open: `{start: 10, end: 20}` covers offsets 10..20, so a
//! range ending at 20 and one starting at 20 touch without overlapping.

use crate::error::{CodexError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How violations are handled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strictness {
    /// Abort on the first violation
    #[default]
    Strict,
    /// Report every violation and continue
    Permissive,
}

impl Strictness {
    pub fn from_relaxed(relaxed: bool) -> Self {
        if relaxed {
            Strictness::Permissive
        } else {
            Strictness::Strict
        }
    }

    pub fn is_strict(self) -> bool {
        self == Strictness::Strict
    }
}

/// One exclusion range as it appears in `curation.exclusions[]`
///
/// Bounds are optional so that incomplete upstream records can be reported
/// instead of rejected at parse time. Unknown keys (line numbers, reasons)
/// are carried through untouched.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExclusionRange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<u64>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl ExclusionRange {
    pub fn new(start: u64, end: u64) -> Self {
        ExclusionRange {
            start: Some(start),
            end: Some(end),
            extra: BTreeMap::new(),
        }
    }

    /// Bounds if both are present and ordered
    pub fn bounds(&self) -> Option<CharRange> {
        match (self.start, self.end) {
            (Some(start), Some(end)) if start <= end => Some(CharRange { start, end }),
            _ => None,
        }
    }
}

/// A well-formed half-open character range
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CharRange {
    pub start: u64,
    pub end: u64,
}

impl CharRange {
    pub fn overlaps(&self, other: &CharRange) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// Validate the exclusion ranges of one source
///
/// Ranges are examined in order of their start offset. In strict mode the
/// first violation is returned as the error; in permissive mode every
/// violation is returned in the `Ok` vector (empty means valid).
///
/// # Examples
///
/// ```
/// use codex_cartridge::validation::{validate_exclusions, ExclusionRange, Strictness};
///
/// let touching = [ExclusionRange::new(10, 20), ExclusionRange::new(20, 30)];
/// assert!(validate_exclusions("src", &touching, Strictness::Strict).is_ok());
///
/// let overlapping = [ExclusionRange::new(10, 20), ExclusionRange::new(15, 25)];
/// assert!(validate_exclusions("src", &overlapping, Strictness::Strict).is_err());
/// ```
pub fn validate_exclusions(
    source_id: &str,
    ranges: &[ExclusionRange],
    strictness: Strictness,
) -> Result<Vec<CodexError>> {
    let mut order: Vec<usize> = (0..ranges.len()).collect();
    order.sort_by_key(|&i| ranges[i].start.unwrap_or(0));

    let mut violations = Vec::new();
    // Range with the furthest end seen so far
    let mut widest: Option<CharRange> = None;

    for index in order {
        let range = &ranges[index];
        let violation = match (range.start, range.end) {
            (Some(start), Some(end)) if start > end => Some(CodexError::InvalidRange {
                source_id: source_id.to_string(),
                start,
                end,
            }),
            (Some(start), Some(end)) => {
                let current = CharRange { start, end };
                let overlap = widest.filter(|prev| prev.overlaps(&current));
                if widest.map_or(true, |prev| end > prev.end) {
                    widest = Some(current);
                }
                overlap.map(|prev| CodexError::OverlappingRanges {
                    source_id: source_id.to_string(),
                    first_start: prev.start,
                    first_end: prev.end,
                    second_start: start,
                    second_end: end,
                })
            }
            _ => Some(CodexError::IncompleteRange {
                source_id: source_id.to_string(),
                index,
            }),
        };

        if let Some(violation) = violation {
            if strictness.is_strict() {
                return Err(violation);
            }
            tracing::warn!("{}", violation);
            violations.push(violation);
        }
    }

    Ok(violations)
}

/// Merge exclusion ranges into a sorted, non-overlapping sequence
///
/// Returns a new vector; the input is left untouched. Incomplete or
/// inverted ranges are skipped. Touching ranges are coalesced since they
/// cover a contiguous span.
pub fn merge_exclusions(ranges: &[ExclusionRange]) -> Vec<CharRange> {
    let mut bounds: Vec<CharRange> = ranges.iter().filter_map(ExclusionRange::bounds).collect();
    bounds.sort();

    let mut merged: Vec<CharRange> = Vec::with_capacity(bounds.len());
    for range in bounds {
        match merged.last_mut() {
            Some(last) if range.start <= last.end => last.end = last.end.max(range.end),
            _ => merged.push(range),
        }
    }
    merged
}
