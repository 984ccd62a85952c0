use crate::hosting::{RepositoryRecord, ZERO_TIME};
use crate::watermark::Watermark;

/// True when `owners` is empty or names the record's owner.
pub fn owner_allowed(record: &RepositoryRecord, owners: &[String]) -> bool {
    owners.is_empty() || owners.iter().any(|o| *o == record.owner)
}

/// True when the record changed after its watermark.
///
/// A repository absent from the watermark is compared against [`ZERO_TIME`].
pub fn is_changed(record: &RepositoryRecord, watermark: &Watermark) -> bool {
    let seen = watermark
        .get(&record.full_name)
        .copied()
        .unwrap_or(ZERO_TIME);
    record.last_modified > seen
}

/// The change set: records passing the owner filter whose last-modified
/// time is strictly after their watermark. Input order is preserved.
pub fn resolve(
    records: &[RepositoryRecord],
    watermark: &Watermark,
    owners: &[String],
) -> Vec<RepositoryRecord> {
    records
        .iter()
        .filter(|r| owner_allowed(r, owners) && is_changed(r, watermark))
        .cloned()
        .collect()
}
