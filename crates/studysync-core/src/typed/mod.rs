//! Typed records and task handlers.
//!
//! - **record**: リモートレコードの型付き decode と upsert（`RecordData`）
//! - **handler**: `ResourceHandler<D>` と型消去された `dyn TaskHandler`
//! - **registry**: task kind -> handler の対応表

pub mod handler;
pub mod record;
pub mod registry;

pub use handler::{Applied, CURSOR_OVERLAP, ResourceHandler, TaskContext, TaskHandler};
pub use record::{RecordData, Resource};
pub use registry::{HandlerRegistry, RegistryError};
