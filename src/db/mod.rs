pub mod checkpoint;

pub use checkpoint::Checkpoint;
pub use checkpoint::CheckpointStore;
