// SPDX-License-Identifier: MIT OR Apache-2.0
//! Per-node-type field accessor tables.
//!
//! Built once when a node type is registered and shared by every instance,
//! so propagation resolves a field name to an anchor index without
//! scanning the node.

use crate::anchor::{AnchorDirection, AnchorType, FieldDecl};
use indexmap::IndexMap;

/// Resolved location and shape of one field
#[derive(Debug, Clone, PartialEq)]
pub struct FieldAccessor {
    /// Index of the anchor on the node
    pub index: usize,
    /// Anchor direction
    pub direction: AnchorDirection,
    /// Declared type
    pub anchor_type: AnchorType,
    /// Whether the field is multiple
    pub multiple: bool,
}

/// Field name to accessor mapping of a node type
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldAccessors {
    fields: IndexMap<String, FieldAccessor>,
}

impl FieldAccessors {
    /// Build the table from field declarations, in declaration order
    pub fn from_decls(decls: &[FieldDecl]) -> Self {
        let mut accessors = Self::default();
        for decl in decls {
            accessors.push(decl);
        }
        accessors
    }

    /// Append a field, returning its anchor index
    pub fn push(&mut self, decl: &FieldDecl) -> usize {
        let index = self.fields.len();
        self.fields.insert(
            decl.name.clone(),
            FieldAccessor {
                index,
                direction: decl.direction,
                anchor_type: decl.anchor_type.clone(),
                multiple: decl.multiple.is_some(),
            },
        );
        index
    }

    /// Look up a field by name
    pub fn get(&self, name: &str) -> Option<&FieldAccessor> {
        self.fields.get(name)
    }

    /// Field names in anchor order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// Number of fields
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}
