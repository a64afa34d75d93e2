//! Stored records: a stable id, and soft deletion instead of removal.

pub trait Entity {
    type Id: Copy + Ord + core::fmt::Display;

    fn id(&self) -> Self::Id;

    /// A soft-deleted record stays in storage but is hidden from every read.
    fn is_deleted(&self) -> bool {
        false
    }
}
