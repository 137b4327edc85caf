//! The rebuild engine: reads chunks back from the backup store, re-embeds
//! them in batches and writes the vectors, reporting progress as it goes.

pub mod engine;
pub mod progress;
pub mod stream;

pub use engine::{RebuildParams, RebuildService};
pub use progress::ProgressEmitter;
pub use stream::{spawn_background_rebuild, stream_rebuild, RebuildFrame};
