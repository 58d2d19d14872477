pub mod entries;
pub mod journal;

pub use entries::{
    ChangesetHeader, ChangesetPageHeader, EntryHeader, EntryType, ErasePayload, InsertPayload,
};
pub use journal::Journal;
