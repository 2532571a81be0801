pub mod buffer;
pub mod disk;
pub mod page;

pub use buffer::{BufferPoolManager, ReadPageGuard, WritePageGuard};
pub use disk::{DiskManager, PAGE_SIZE};
pub use page::{PageId, HEADER_PAGE_ID, INVALID_PAGE_ID};
