use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// Layout role of a parsed block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockType {
    Heading,
    Paragraph,
    Caption,
    Formula,
    Figure,
    Table,
}

/// Block bounds in page coordinates
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
}

/// A layout block produced by the parse stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: BlockType,
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translation: Option<String>,
    #[serde(alias = "bbox", default)]
    pub bounding_box: BoundingBox,
    #[serde(default)]
    pub column_index: u32,
    pub reading_order: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub index: u32,
    #[serde(default)]
    pub width: f64,
    #[serde(default)]
    pub height: f64,
    #[serde(default)]
    pub blocks: Vec<Block>,
}

impl Page {
    /// Blocks sorted by reading order
    pub fn blocks_in_reading_order(&self) -> Vec<&Block> {
        let mut blocks: Vec<&Block> = self.blocks.iter().collect();
        blocks.sort_by_key(|b| b.reading_order);
        blocks
    }

    /// Reading order must be a total order: no two blocks share a position.
    pub fn has_total_reading_order(&self) -> bool {
        let mut seen = HashSet::with_capacity(self.blocks.len());
        self.blocks.iter().all(|b| seen.insert(b.reading_order))
    }
}

/// Parsed document as consumed by the presentation layer
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StructuredDocument {
    #[serde(default)]
    pub pages: Vec<Page>,
}

impl StructuredDocument {
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Indices of pages whose reading order has duplicates.
    pub fn pages_with_broken_order(&self) -> Vec<u32> {
        self.pages
            .iter()
            .filter(|p| !p.has_total_reading_order())
            .map(|p| p.index)
            .collect()
    }
}
