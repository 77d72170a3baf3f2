// crates/runner-fleet-core/src/core/tags.rs
// ============================================================================
// Module: Runner Fleet Tags
// Description: Tag normalization shared by pools and file objects.
// Purpose: Give tag sets a single canonical form before storage and matching.
// Dependencies: none
// ============================================================================

//! ## Overview
//! Tags are compared as sets. Normalization trims whitespace, drops empty
//! entries, removes duplicates, and sorts, so stored tag sets and query tag
//! sets compare byte for byte.

/// Returns the canonical form of a tag list.
#[must_use]
pub fn normalize_tags<I, S>(tags: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut normalized: Vec<String> = tags
        .into_iter()
        .map(|tag| tag.as_ref().trim().to_string())
        .filter(|tag| !tag.is_empty())
        .collect();
    normalized.sort();
    normalized.dedup();
    normalized
}

#[cfg(test)]
mod tests {
    use super::normalize_tags;

    #[test]
    fn normalization_trims_dedupes_and_sorts() {
        let tags = normalize_tags(["  linux", "x64", "", "linux ", "gpu"]);
        assert_eq!(tags, vec!["gpu", "linux", "x64"]);
    }
}
