pub mod offsets;
pub mod patcher;
pub mod pipeline;
pub mod store;

pub use offsets::{Component, Offsets};
pub use pipeline::{ApplyPipeline, ApplyReport};
pub use store::{GlobalSettings, ProfileStore};
