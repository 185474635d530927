//! Local reference backend: SQLite rows, on-disk blobs and an in-process
//! realtime dispatcher behind the client's `Backend` trait.

pub mod backend;
pub mod dispatcher;
pub mod storage;

pub use backend::LocalBackend;
pub use dispatcher::Dispatcher;
pub use storage::BlobStore;
