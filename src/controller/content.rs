//! Content kinds
//!
//! Documents and blocks are closed sets of variants; every branch on them is
//! an exhaustive `match`.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::convergent::{ContainerId, ContainerKind};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DocumentKind {
    /// One element per language code
    Statement,
    /// An ordered list of content blocks
    Sheet,
}

impl DocumentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::Statement => "statement",
            DocumentKind::Sheet => "sheet",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "statement" => Some(DocumentKind::Statement),
            "sheet" => Some(DocumentKind::Sheet),
            _ => None,
        }
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlockKind {
    Text,
    Properties,
    StatementGrid,
    BarcodeGrid,
}

impl BlockKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockKind::Text => "text",
            BlockKind::Properties => "properties",
            BlockKind::StatementGrid => "statementGrid",
            BlockKind::BarcodeGrid => "barcodeGrid",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "text" => Some(BlockKind::Text),
            "properties" => Some(BlockKind::Properties),
            "statementGrid" => Some(BlockKind::StatementGrid),
            "barcodeGrid" => Some(BlockKind::BarcodeGrid),
            _ => None,
        }
    }

    /// Container type backing the block's content
    pub fn content_container(&self) -> ContainerKind {
        match self {
            BlockKind::Text => ContainerKind::Text,
            BlockKind::Properties | BlockKind::StatementGrid | BlockKind::BarcodeGrid => {
                ContainerKind::Map
            }
        }
    }
}

/// A content entity as callers name it.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Entity {
    /// A statement element by language code
    Language(String),
    /// A sheet block by its container id
    Block(ContainerId),
}

impl Entity {
    pub fn language(code: impl Into<String>) -> Self {
        Entity::Language(code.into())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShiftDirection {
    Up,
    Down,
}

/// A block as listed by `DocumentController::blocks`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockSummary {
    pub id: ContainerId,
    pub kind: BlockKind,
    pub position: usize,
}
