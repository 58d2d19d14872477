pub mod blob;
pub mod cache;
pub mod changeset;
pub mod device;
pub mod freelist;
pub mod page;
pub mod page_manager;

pub use blob::{BlobKind, BlobManager};
pub use changeset::Changeset;
pub use device::{Device, FileDevice, MemDevice};
pub use page::{Page, PageType, PAGE_HEADER_SIZE};
pub use page_manager::PageManager;
