//! # quadb storage
//!
//! Byte-level storage backends used by the quadb journal and by
//! transactional components that keep their own files.
//!
//! Backends are **opaque append-only byte stores**. They know nothing about
//! journal records, commit groups or generations; `quadb_core` owns every
//! on-disk format.
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - tests and ephemeral stores; handles can share
//!   one buffer so a "crashed" store can be reopened over the same bytes
//! - [`FileBackend`] - persistent storage using OS file APIs
//!
//! ## Example
//!
//! ```rust
//! use quadb_storage::{StorageBackend, InMemoryBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"journal bytes").unwrap();
//! assert_eq!(backend.read_at(offset, 7).unwrap(), b"journal");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
