//! Structured output of the server's layout parse stage.

mod structure;

pub use structure::{Block, BlockType, BoundingBox, Page, StructuredDocument};
