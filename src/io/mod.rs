//! Virtual file access
//!
//! The only layer that performs raw I/O. Drivers and the block cache go through
//! [`VfsHandle`]s obtained from a [`Vfs`].

pub mod traits;
pub mod byte_order;
pub mod local;
pub mod memory;
pub mod subfile;
pub mod vfs;

pub use traits::{OpenMode, VirtualFile};
pub use byte_order::ByteOrder;
pub use vfs::{Vfs, VfsHandle, MEM_PREFIX, SUBFILE_PREFIX};
