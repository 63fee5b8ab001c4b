//! Retention window enforcement.

/// Given snapshots ordered oldest-first, return the prefix that must be
/// deleted so that at most `max_count` remain. Pure; the caller performs
/// the deletions.
pub fn excess_prefix<T>(existing: &[T], max_count: usize) -> &[T] {
    let excess = existing.len().saturating_sub(max_count);
    &existing[..excess]
}
