// SPDX-License-Identifier: MIT OR Apache-2.0
//! Anchor (typed port) definitions for node fields.
//!
//! Every field a node type declares becomes an [`Anchor`] on each instance.
//! Input and output anchors can be linked; anchors with
//! [`AnchorDirection::None`] are plain settings edited by the host.
//! A multiple anchor owns one value per slot and can grow new slots
//! up to its declared maximum.

use crate::value::FieldValue;
use serde::{Deserialize, Serialize};

/// Node-local identifier of an anchor slot, used for link addressing only
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AnchorSlotId(pub u32);

/// Anchor direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnchorDirection {
    /// Value is read from another node
    Input,
    /// Value is written to other nodes
    Output,
    /// Not linkable
    None,
}

/// Data type that can flow through anchors
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AnchorType {
    /// Boolean value
    Bool,
    /// Integer value
    Int,
    /// Floating point value
    Float,
    /// 2D vector
    Vector2,
    /// 3D vector
    Vector3,
    /// 4D vector
    Vector4,
    /// Color (RGBA)
    Color,
    /// String value
    String,
    /// 2D sample grid
    Sampler2D,
    /// Biome description
    Biome,
    /// Merged terrain
    Terrain,
    /// Any type (for generic nodes)
    Any,
    /// Custom type
    Custom(String),
}

impl AnchorType {
    /// Get the color for this anchor type (for UI)
    pub fn color(&self) -> [u8; 3] {
        match self {
            Self::Bool => [200, 80, 80],
            Self::Int => [80, 200, 200],
            Self::Float => [80, 200, 80],
            Self::Vector2 => [200, 200, 80],
            Self::Vector3 => [200, 150, 80],
            Self::Vector4 => [200, 100, 200],
            Self::Color => [255, 200, 100],
            Self::String => [200, 180, 150],
            Self::Sampler2D => [100, 150, 200],
            Self::Biome => [150, 200, 150],
            Self::Terrain => [200, 100, 150],
            Self::Any => [150, 150, 150],
            Self::Custom(_) => [128, 128, 128],
        }
    }
}

/// Declaration of a node field, registered once per node type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDecl {
    /// Field name, unique within the node type
    pub name: String,
    /// Anchor direction
    pub direction: AnchorDirection,
    /// Declared type
    pub anchor_type: AnchorType,
    /// Extra types accepted on link creation
    pub allowed_types: Vec<AnchorType>,
    /// Slot bounds when the field is multiple
    pub multiple: Option<(usize, usize)>,
    /// Initial value
    pub default_value: Option<FieldValue>,
    /// Linkable from both sides (graph boundary fields)
    pub pass_through: bool,
}

impl FieldDecl {
    fn new(name: impl Into<String>, anchor_type: AnchorType, direction: AnchorDirection) -> Self {
        Self {
            name: name.into(),
            direction,
            anchor_type,
            allowed_types: Vec::new(),
            multiple: None,
            default_value: None,
            pass_through: false,
        }
    }

    /// Declare an input field
    pub fn input(name: impl Into<String>, anchor_type: AnchorType) -> Self {
        Self::new(name, anchor_type, AnchorDirection::Input)
    }

    /// Declare an output field
    pub fn output(name: impl Into<String>, anchor_type: AnchorType) -> Self {
        Self::new(name, anchor_type, AnchorDirection::Output)
    }

    /// Declare a setting (not linkable)
    pub fn setting(name: impl Into<String>, anchor_type: AnchorType) -> Self {
        Self::new(name, anchor_type, AnchorDirection::None)
    }

    /// Declare a boundary field of a graph proxy
    pub fn pass_through(name: impl Into<String>, anchor_type: AnchorType) -> Self {
        let mut decl = Self::new(name, anchor_type, AnchorDirection::None);
        decl.pass_through = true;
        decl
    }

    /// Make the field multiple with slot bounds
    pub fn multiple(mut self, min: usize, max: usize) -> Self {
        self.multiple = Some((min, max.max(min.max(1))));
        self
    }

    /// Accept an extra type on link creation
    pub fn allow(mut self, anchor_type: AnchorType) -> Self {
        self.allowed_types.push(anchor_type);
        self
    }

    /// Set the default value
    pub fn with_default(mut self, value: FieldValue) -> Self {
        self.default_value = Some(value);
        self
    }
}

/// One addressable position of an anchor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnchorSlot {
    /// Slot identifier
    pub id: AnchorSlotId,
    /// Display name
    pub name: String,
    /// Display color
    pub color: [u8; 3],
    /// Added after creation (not the canonical first slot)
    pub additional: bool,
    /// Whether the slot accepts links
    pub enabled: bool,
    link_count: u32,
}

impl AnchorSlot {
    fn new(id: AnchorSlotId, name: String, color: [u8; 3]) -> Self {
        Self {
            id,
            name,
            color,
            additional: false,
            enabled: true,
            link_count: 0,
        }
    }

    /// Number of links attached to this slot
    pub fn link_count(&self) -> u32 {
        self.link_count
    }
}

/// Backing container of a multiple anchor
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnchorValues {
    values: Vec<Option<FieldValue>>,
    names: Vec<Option<String>>,
}

impl AnchorValues {
    fn with_len(len: usize) -> Self {
        Self {
            values: vec![None; len],
            names: vec![None; len],
        }
    }

    /// Number of values
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the container is empty
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Value at `index`
    pub fn get(&self, index: usize) -> Option<&FieldValue> {
        self.values.get(index).and_then(Option::as_ref)
    }

    /// Name recorded with the value at `index`
    pub fn name(&self, index: usize) -> Option<&str> {
        self.names.get(index).and_then(|n| n.as_deref())
    }

    fn push(&mut self) {
        self.values.push(None);
        self.names.push(None);
    }

    /// Store `value` at `index`, failing when out of range
    pub fn assign_at(
        &mut self,
        index: usize,
        value: Option<FieldValue>,
        name: &str,
    ) -> Result<(), AssignError> {
        let len = self.values.len();
        match (self.values.get_mut(index), self.names.get_mut(index)) {
            (Some(slot), Some(slot_name)) => {
                *slot = value;
                *slot_name = Some(name.to_string());
                Ok(())
            }
            _ => Err(AssignError::SlotOutOfRange { index, len }),
        }
    }
}

/// Value storage of an anchor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AnchorValue {
    /// Single-valued field
    Single(Option<FieldValue>),
    /// Multiple field, one value per slot
    Multiple(AnchorValues),
}

/// A typed field of a node instance
#[derive(Debug, Clone, PartialEq)]
pub struct Anchor {
    /// Field name
    pub field_name: String,
    /// Anchor direction
    pub direction: AnchorDirection,
    /// Declared type
    pub anchor_type: AnchorType,
    /// Extra types accepted on link creation
    pub allowed_types: Vec<AnchorType>,
    /// Linkable from both sides
    pub pass_through: bool,
    min_multiple_values: usize,
    max_multiple_values: usize,
    multiple_value_count: usize,
    slots: Vec<AnchorSlot>,
    value: AnchorValue,
}

impl Anchor {
    /// Build an anchor from its declaration, drawing slot ids from `next_id`
    pub fn from_decl(decl: &FieldDecl, mut next_id: impl FnMut() -> AnchorSlotId) -> Self {
        let color = decl.anchor_type.color();
        let mut anchor = Self {
            field_name: decl.name.clone(),
            direction: decl.direction,
            anchor_type: decl.anchor_type.clone(),
            allowed_types: decl.allowed_types.clone(),
            pass_through: decl.pass_through,
            min_multiple_values: 0,
            max_multiple_values: 1,
            multiple_value_count: 1,
            slots: vec![AnchorSlot::new(next_id(), decl.name.clone(), color)],
            value: AnchorValue::Single(decl.default_value.clone()),
        };

        if let Some((min, max)) = decl.multiple {
            let initial = min.max(1);
            anchor.min_multiple_values = min;
            anchor.max_multiple_values = max;
            anchor.value = AnchorValue::Multiple(AnchorValues::with_len(1));
            anchor.multiple_value_count = 1;
            while anchor.slots.len() < initial {
                let id = next_id();
                // Bounds were normalized by `FieldDecl::multiple`
                let _ = anchor.add_slot(id);
            }
        }
        anchor
    }

    /// Whether the anchor holds one value per slot
    pub fn is_multiple(&self) -> bool {
        matches!(self.value, AnchorValue::Multiple(_))
    }

    /// Can be the source of a link
    pub fn acts_as_output(&self) -> bool {
        self.direction == AnchorDirection::Output || self.pass_through
    }

    /// Can be the target of a link
    pub fn acts_as_input(&self) -> bool {
        self.direction == AnchorDirection::Input || self.pass_through
    }

    /// Check if a value of `other` type may be stored here
    pub fn accepts(&self, other: &AnchorType) -> bool {
        matches!(self.anchor_type, AnchorType::Any)
            || matches!(other, AnchorType::Any)
            || self.anchor_type == *other
            || self.allowed_types.contains(other)
    }

    /// Minimum slot count
    pub fn min_multiple_values(&self) -> usize {
        self.min_multiple_values
    }

    /// Maximum slot count
    pub fn max_multiple_values(&self) -> usize {
        self.max_multiple_values
    }

    /// Number of addressable values
    pub fn multiple_value_count(&self) -> usize {
        self.multiple_value_count
    }

    /// Rendered slots, the first one is canonical
    pub fn slots(&self) -> &[AnchorSlot] {
        &self.slots
    }

    /// Find a slot index by id
    pub fn slot_index(&self, id: AnchorSlotId) -> Option<usize> {
        self.slots.iter().position(|s| s.id == id)
    }

    /// Raw value storage
    pub fn value(&self) -> &AnchorValue {
        &self.value
    }

    /// Value of a single anchor
    pub fn single(&self) -> Option<&FieldValue> {
        match &self.value {
            AnchorValue::Single(v) => v.as_ref(),
            AnchorValue::Multiple(_) => None,
        }
    }

    /// Values of a multiple anchor
    pub fn values(&self) -> Option<&AnchorValues> {
        match &self.value {
            AnchorValue::Multiple(values) => Some(values),
            AnchorValue::Single(_) => None,
        }
    }

    /// Present values among the addressable slots of a multiple anchor
    pub fn present_values(&self) -> impl Iterator<Item = &FieldValue> {
        let count = self.multiple_value_count;
        self.values()
            .into_iter()
            .flat_map(move |values| (0..count).filter_map(move |i| values.get(i)))
    }

    /// Direct assignment of a single anchor
    pub fn set(&mut self, value: Option<FieldValue>) -> Result<(), AssignError> {
        if let Some(v) = &value {
            if !self.accepts(&v.anchor_type()) {
                return Err(AssignError::TypeMismatch {
                    field: self.field_name.clone(),
                    expected: self.anchor_type.clone(),
                    found: v.anchor_type(),
                });
            }
        }
        match &mut self.value {
            AnchorValue::Single(slot) => {
                *slot = value;
                Ok(())
            }
            AnchorValue::Multiple(_) => Err(AssignError::NotSingle(self.field_name.clone())),
        }
    }

    /// Indexed assignment of a multiple anchor
    pub fn assign_at(
        &mut self,
        index: usize,
        value: Option<FieldValue>,
        name: &str,
    ) -> Result<(), AssignError> {
        if let Some(v) = &value {
            if !self.accepts(&v.anchor_type()) {
                return Err(AssignError::TypeMismatch {
                    field: self.field_name.clone(),
                    expected: self.anchor_type.clone(),
                    found: v.anchor_type(),
                });
            }
        }
        let count = self.multiple_value_count;
        match &mut self.value {
            AnchorValue::Multiple(values) => {
                if index >= count {
                    return Err(AssignError::SlotOutOfRange { index, len: count });
                }
                values.assign_at(index, value, name)
            }
            AnchorValue::Single(_) => Err(AssignError::NotMultiple(self.field_name.clone())),
        }
    }

    /// Append a slot styled after the first one
    pub fn add_slot(&mut self, id: AnchorSlotId) -> Result<usize, SlotError> {
        let color = self.slots[0].color;
        self.add_slot_with_color(color, id)
    }

    /// Append a slot, growing the value container in lockstep
    pub fn add_slot_with_color(
        &mut self,
        color: [u8; 3],
        id: AnchorSlotId,
    ) -> Result<usize, SlotError> {
        let max = self.max_multiple_values;
        let values = match &mut self.value {
            AnchorValue::Multiple(values) => values,
            AnchorValue::Single(_) => return Err(SlotError::NotMultiple(self.field_name.clone())),
        };
        if self.slots.len() >= max {
            return Err(SlotError::LimitReached {
                field: self.field_name.clone(),
                max,
            });
        }

        if values.len() == self.multiple_value_count {
            self.multiple_value_count += 1;
        }
        values.push();

        let mut slot = AnchorSlot::new(id, self.slots[0].name.clone(), color);
        slot.additional = true;
        self.slots.push(slot);
        Ok(self.slots.len() - 1)
    }

    /// Replace the stored value wholesale (used when rehydrating)
    pub(crate) fn restore(
        &mut self,
        value: AnchorValue,
        multiple_value_count: Option<usize>,
        mut next_id: impl FnMut() -> AnchorSlotId,
    ) -> Result<(), AssignError> {
        let is_multiple = self.is_multiple();
        match value {
            AnchorValue::Single(v) if !is_multiple => {
                self.value = AnchorValue::Single(v);
                Ok(())
            }
            AnchorValue::Multiple(mut values) if is_multiple => {
                let len = values.len().min(self.max_multiple_values);
                while self.slots.len() < len {
                    let id = next_id();
                    let color = self.slots[0].color;
                    let mut slot = AnchorSlot::new(id, self.slots[0].name.clone(), color);
                    slot.additional = true;
                    self.slots.push(slot);
                }
                values.values.truncate(self.slots.len());
                values.names.truncate(self.slots.len());
                while values.len() < self.slots.len() {
                    values.push();
                }
                self.multiple_value_count = multiple_value_count
                    .unwrap_or(values.len())
                    .clamp(self.min_multiple_values.min(values.len()), values.len());
                self.value = AnchorValue::Multiple(values);
                Ok(())
            }
            AnchorValue::Single(_) => Err(AssignError::NotSingle(self.field_name.clone())),
            AnchorValue::Multiple(_) => Err(AssignError::NotMultiple(self.field_name.clone())),
        }
    }

    pub(crate) fn slot_mut(&mut self, index: usize) -> Option<&mut AnchorSlot> {
        self.slots.get_mut(index)
    }

    pub(crate) fn increment_links(&mut self, slot: Option<usize>) {
        if let Some(s) = self.slot_mut(slot.unwrap_or(0)) {
            s.link_count += 1;
        }
    }

    pub(crate) fn clear_links(&mut self) {
        for slot in &mut self.slots {
            slot.link_count = 0;
        }
    }

    pub(crate) fn decrement_links(&mut self, slot: Option<usize>) {
        if let Some(s) = self.slot_mut(slot.unwrap_or(0)) {
            s.link_count = s.link_count.saturating_sub(1);
        }
    }
}

/// Error when writing a field or slot
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AssignError {
    /// No field with this name
    #[error("Unknown field: {0}")]
    UnknownField(String),

    /// Value type is not accepted
    #[error("Type mismatch on {field}: expected {expected:?}, found {found:?}")]
    TypeMismatch {
        /// Field name
        field: String,
        /// Declared type
        expected: AnchorType,
        /// Type of the rejected value
        found: AnchorType,
    },

    /// Slot index outside of the current bounds
    #[error("Slot {index} out of range (count {len})")]
    SlotOutOfRange {
        /// Requested slot
        index: usize,
        /// Current slot count
        len: usize,
    },

    /// Indexed assignment on a single field
    #[error("Field is not multiple: {0}")]
    NotMultiple(String),

    /// Direct assignment on a multiple field
    #[error("Field is multiple: {0}")]
    NotSingle(String),
}

/// Error when growing a multiple anchor
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SlotError {
    /// Anchor is single-valued
    #[error("Field is not multiple: {0}")]
    NotMultiple(String),

    /// Maximum slot count reached
    #[error("Field {field} already has the maximum of {max} slots")]
    LimitReached {
        /// Field name
        field: String,
        /// Maximum slot count
        max: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids() -> impl FnMut() -> AnchorSlotId {
        let mut next = 0;
        move || {
            next += 1;
            AnchorSlotId(next)
        }
    }

    #[test]
    fn test_single_assignment_type_checked() {
        let mut anchor = Anchor::from_decl(&FieldDecl::input("y", AnchorType::Float), ids());
        assert!(anchor.set(Some(FieldValue::Float(2.0))).is_ok());
        let err = anchor.set(Some(FieldValue::Bool(true))).unwrap_err();
        assert!(matches!(err, AssignError::TypeMismatch { .. }));
        assert_eq!(anchor.single(), Some(&FieldValue::Float(2.0)));
    }

    #[test]
    fn test_slot_growth_invariant() {
        let decl = FieldDecl::input("values", AnchorType::Float).multiple(1, 3);
        let mut next = ids();
        let mut anchor = Anchor::from_decl(&decl, &mut next);
        assert_eq!(anchor.multiple_value_count(), 1);

        anchor.add_slot(next()).unwrap();
        assert_eq!(anchor.multiple_value_count(), 2);
        assert_eq!(anchor.values().unwrap().len(), anchor.slots().len());
        assert!(anchor.slots()[1].additional);
        assert_eq!(anchor.slots()[1].name, anchor.slots()[0].name);

        anchor.add_slot(next()).unwrap();
        let err = anchor.add_slot(next()).unwrap_err();
        assert!(matches!(err, SlotError::LimitReached { max: 3, .. }));
        assert!(anchor.min_multiple_values() <= anchor.multiple_value_count());
        assert!(anchor.multiple_value_count() <= anchor.max_multiple_values());
        assert_eq!(anchor.values().unwrap().len(), 3);
    }

    #[test]
    fn test_assign_at_keeps_other_slots() {
        let decl = FieldDecl::input("values", AnchorType::Float).multiple(1, 4);
        let mut next = ids();
        let mut anchor = Anchor::from_decl(&decl, &mut next);
        anchor.add_slot(next()).unwrap();

        anchor.assign_at(0, Some(FieldValue::Float(1.0)), "a").unwrap();
        anchor.assign_at(1, Some(FieldValue::Float(7.0)), "b").unwrap();
        assert_eq!(anchor.values().unwrap().get(0), Some(&FieldValue::Float(1.0)));
        assert_eq!(anchor.values().unwrap().name(1), Some("b"));

        let err = anchor.assign_at(2, Some(FieldValue::Float(3.0)), "c").unwrap_err();
        assert_eq!(err, AssignError::SlotOutOfRange { index: 2, len: 2 });
        assert_eq!(anchor.present_values().count(), 2);
    }

    #[test]
    fn test_single_anchor_cannot_grow() {
        let mut anchor = Anchor::from_decl(&FieldDecl::output("x", AnchorType::Float), ids());
        assert!(matches!(anchor.add_slot(AnchorSlotId(9)), Err(SlotError::NotMultiple(_))));
        assert!(anchor.acts_as_output());
        assert!(!anchor.acts_as_input());
    }

    #[test]
    fn test_type_compatibility() {
        let anchor = Anchor::from_decl(
            &FieldDecl::input("in", AnchorType::Sampler2D).allow(AnchorType::Float),
            ids(),
        );
        assert!(anchor.accepts(&AnchorType::Sampler2D));
        assert!(anchor.accepts(&AnchorType::Float));
        assert!(anchor.accepts(&AnchorType::Any));
        assert!(!anchor.accepts(&AnchorType::Biome));
    }
}
