//! Interpreter frames: slot kinds, descriptors, tagged slot storage
//!
//! A frame stores every slot twice-typed: the *declared* kind lives in the
//! `FrameDescriptor`, the *concrete* tag lives in the frame itself and
//! follows whatever was last written. OSR speculation works on the concrete
//! tags only.
//!
//! Storage is split like an unboxed frame: primitive values are kept as raw
//! 64-bit words and references in a separate value array. Static slots use
//! both arrays without touching the tag, so they can be read as any kind.

pub mod transfer;

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub use transfer::{FrameTagMismatch, FrameTransferEngine, TransferPlan, TransferReport};

/// Kind of a frame slot
///
/// Used both for the declared kind in a descriptor and for the concrete
/// runtime tag of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[repr(u8)]
pub enum FrameSlotKind {
    Object = 0,
    Long = 1,
    Int = 2,
    Double = 3,
    Float = 4,
    Boolean = 5,
    Byte = 6,
    /// No value has been assigned a type yet
    Illegal = 7,
    /// Accessible as any kind through the static accessors
    Static = 8,
}

impl FrameSlotKind {
    /// Whether values of this kind live in the primitive array
    pub fn is_primitive(self) -> bool {
        matches!(
            self,
            FrameSlotKind::Long
                | FrameSlotKind::Int
                | FrameSlotKind::Double
                | FrameSlotKind::Float
                | FrameSlotKind::Boolean
                | FrameSlotKind::Byte
        )
    }
}

impl fmt::Display for FrameSlotKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FrameSlotKind::Object => "Object",
            FrameSlotKind::Long => "Long",
            FrameSlotKind::Int => "Int",
            FrameSlotKind::Double => "Double",
            FrameSlotKind::Float => "Float",
            FrameSlotKind::Boolean => "Boolean",
            FrameSlotKind::Byte => "Byte",
            FrameSlotKind::Illegal => "Illegal",
            FrameSlotKind::Static => "Static",
        };
        f.write_str(name)
    }
}

/// Error raised by a typed slot read whose concrete tag does not match
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Frame slot {slot} holds {actual}, expected {expected}")]
pub struct FrameSlotTypeError {
    /// Slot index
    pub slot: usize,
    /// Kind requested by the reader
    pub expected: FrameSlotKind,
    /// Concrete tag found in the frame
    pub actual: FrameSlotKind,
}

/// An opaque guest object compared by identity
#[derive(Clone)]
pub struct ObjectRef(Arc<dyn Any + Send + Sync>);

impl ObjectRef {
    /// Wrap any value as a guest object
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        ObjectRef(Arc::new(value))
    }

    /// A fresh object with no payload, useful as a unique sentinel
    pub fn opaque() -> Self {
        ObjectRef::new(())
    }

    /// Borrow the payload if it has type `T`
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }
}

impl PartialEq for ObjectRef {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectRef({:p})", Arc::as_ptr(&self.0))
    }
}

/// A guest value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    Byte(i8),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Str(Arc<str>),
    Object(ObjectRef),
}

impl Value {
    /// Build a string value
    pub fn str(s: &str) -> Self {
        Value::Str(Arc::from(s))
    }

    /// String payload, if this is a string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Integer payload, if this is an int
    pub fn as_int(&self) -> Option<i32> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::str(s)
    }
}

/// Declared layout of a frame
#[derive(Debug, Clone)]
pub struct FrameDescriptor {
    kinds: Vec<FrameSlotKind>,
    names: Vec<String>,
    default_value: Value,
}

impl FrameDescriptor {
    /// Start building a descriptor
    pub fn builder() -> FrameDescriptorBuilder {
        FrameDescriptorBuilder::default()
    }

    /// A descriptor without slots
    pub fn empty() -> Arc<Self> {
        FrameDescriptor::builder().build()
    }

    /// Number of indexed slots
    pub fn slot_count(&self) -> usize {
        self.kinds.len()
    }

    /// Declared kind of a slot
    pub fn slot_kind(&self, slot: usize) -> FrameSlotKind {
        self.kinds[slot]
    }

    /// Debug name of a slot
    pub fn slot_name(&self, slot: usize) -> &str {
        &self.names[slot]
    }

    /// Value held by uninitialized object reads
    pub fn default_value(&self) -> &Value {
        &self.default_value
    }
}

/// Builder for `FrameDescriptor`
#[derive(Debug)]
pub struct FrameDescriptorBuilder {
    kinds: Vec<FrameSlotKind>,
    names: Vec<String>,
    default_value: Value,
}

impl Default for FrameDescriptorBuilder {
    fn default() -> Self {
        FrameDescriptorBuilder {
            kinds: Vec::new(),
            names: Vec::new(),
            default_value: Value::Null,
        }
    }
}

impl FrameDescriptorBuilder {
    /// Add a slot, returning its index
    pub fn add_slot(&mut self, kind: FrameSlotKind, name: &str) -> usize {
        self.kinds.push(kind);
        self.names.push(name.to_string());
        self.kinds.len() - 1
    }

    /// Add `count` slots of one kind, returning the index of the first
    pub fn add_slots(&mut self, count: usize, kind: FrameSlotKind) -> usize {
        let first = self.kinds.len();
        for i in 0..count {
            self.add_slot(kind, &format!("r{}", i));
        }
        first
    }

    /// Set the value returned for uninitialized object reads
    pub fn default_value(&mut self, value: Value) -> &mut Self {
        self.default_value = value;
        self
    }

    /// Finish the descriptor
    pub fn build(&self) -> Arc<FrameDescriptor> {
        Arc::new(FrameDescriptor {
            kinds: self.kinds.clone(),
            names: self.names.clone(),
            default_value: self.default_value.clone(),
        })
    }
}

/// Unique identity of a frame, used by stack introspection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameId(u64);

impl FrameId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        FrameId(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// A live activation's local state
pub struct Frame {
    id: FrameId,
    descriptor: Arc<FrameDescriptor>,
    arguments: Vec<Value>,
    tags: Vec<FrameSlotKind>,
    primitives: Vec<u64>,
    objects: Vec<Value>,
}

impl Frame {
    /// Create a frame with every slot uninitialized
    pub fn new(descriptor: Arc<FrameDescriptor>, arguments: Vec<Value>) -> Self {
        let count = descriptor.slot_count();
        let mut tags = Vec::with_capacity(count);
        for slot in 0..count {
            tags.push(match descriptor.slot_kind(slot) {
                FrameSlotKind::Static => FrameSlotKind::Static,
                _ => FrameSlotKind::Object,
            });
        }
        let objects = vec![descriptor.default_value().clone(); count];
        Frame {
            id: FrameId::next(),
            descriptor,
            arguments,
            tags,
            primitives: vec![0; count],
            objects,
        }
    }

    pub fn id(&self) -> FrameId {
        self.id
    }

    pub fn descriptor(&self) -> &Arc<FrameDescriptor> {
        &self.descriptor
    }

    pub fn arguments(&self) -> &[Value] {
        &self.arguments
    }

    pub fn arguments_mut(&mut self) -> &mut Vec<Value> {
        &mut self.arguments
    }

    /// Concrete runtime tag of a slot
    pub fn tag(&self, slot: usize) -> FrameSlotKind {
        self.tags[slot]
    }

    /// Concrete runtime tags of all slots
    pub fn tags(&self) -> &[FrameSlotKind] {
        &self.tags
    }

    fn check(&self, slot: usize, expected: FrameSlotKind) -> Result<(), FrameSlotTypeError> {
        let actual = self.tags[slot];
        if actual == expected {
            Ok(())
        } else {
            Err(FrameSlotTypeError { slot, expected, actual })
        }
    }

    // A static slot keeps its tag; a regular write only fills the matching half.
    fn set_primitive(&mut self, slot: usize, kind: FrameSlotKind, raw: u64) {
        if self.tags[slot] == FrameSlotKind::Static {
            self.primitives[slot] = raw;
            return;
        }
        self.tags[slot] = kind;
        self.primitives[slot] = raw;
        self.objects[slot] = Value::Null;
    }

    pub fn get_object(&self, slot: usize) -> Result<Value, FrameSlotTypeError> {
        self.check(slot, FrameSlotKind::Object)?;
        Ok(self.objects[slot].clone())
    }

    pub fn set_object(&mut self, slot: usize, value: Value) {
        if self.tags[slot] == FrameSlotKind::Static {
            self.objects[slot] = value;
            return;
        }
        self.tags[slot] = FrameSlotKind::Object;
        self.primitives[slot] = 0;
        self.objects[slot] = value;
    }

    pub fn get_boolean(&self, slot: usize) -> Result<bool, FrameSlotTypeError> {
        self.check(slot, FrameSlotKind::Boolean)?;
        Ok(self.primitives[slot] != 0)
    }

    pub fn set_boolean(&mut self, slot: usize, value: bool) {
        self.set_primitive(slot, FrameSlotKind::Boolean, value as u64);
    }

    pub fn get_byte(&self, slot: usize) -> Result<i8, FrameSlotTypeError> {
        self.check(slot, FrameSlotKind::Byte)?;
        Ok(self.primitives[slot] as u8 as i8)
    }

    pub fn set_byte(&mut self, slot: usize, value: i8) {
        self.set_primitive(slot, FrameSlotKind::Byte, value as u8 as u64);
    }

    pub fn get_int(&self, slot: usize) -> Result<i32, FrameSlotTypeError> {
        self.check(slot, FrameSlotKind::Int)?;
        Ok(self.primitives[slot] as u32 as i32)
    }

    pub fn set_int(&mut self, slot: usize, value: i32) {
        self.set_primitive(slot, FrameSlotKind::Int, value as u32 as u64);
    }

    pub fn get_long(&self, slot: usize) -> Result<i64, FrameSlotTypeError> {
        self.check(slot, FrameSlotKind::Long)?;
        Ok(self.primitives[slot] as i64)
    }

    pub fn set_long(&mut self, slot: usize, value: i64) {
        self.set_primitive(slot, FrameSlotKind::Long, value as u64);
    }

    pub fn get_float(&self, slot: usize) -> Result<f32, FrameSlotTypeError> {
        self.check(slot, FrameSlotKind::Float)?;
        Ok(f32::from_bits(self.primitives[slot] as u32))
    }

    pub fn set_float(&mut self, slot: usize, value: f32) {
        self.set_primitive(slot, FrameSlotKind::Float, value.to_bits() as u64);
    }

    pub fn get_double(&self, slot: usize) -> Result<f64, FrameSlotTypeError> {
        self.check(slot, FrameSlotKind::Double)?;
        Ok(f64::from_bits(self.primitives[slot]))
    }

    pub fn set_double(&mut self, slot: usize, value: f64) {
        self.set_primitive(slot, FrameSlotKind::Double, value.to_bits());
    }

    /// Reset a slot to the uninitialized state
    pub fn clear(&mut self, slot: usize) {
        if self.tags[slot] != FrameSlotKind::Static {
            self.tags[slot] = FrameSlotKind::Object;
        }
        self.primitives[slot] = 0;
        self.objects[slot] = self.descriptor.default_value().clone();
    }

    // Static accessors never fail. An unwritten static slot reads as the
    // zero value of the requested kind, or the default value for objects.

    pub fn get_object_static(&self, slot: usize) -> Value {
        debug_assert_eq!(self.tags[slot], FrameSlotKind::Static);
        self.objects[slot].clone()
    }

    pub fn set_object_static(&mut self, slot: usize, value: Value) {
        debug_assert_eq!(self.tags[slot], FrameSlotKind::Static);
        self.objects[slot] = value;
    }

    pub fn get_boolean_static(&self, slot: usize) -> bool {
        debug_assert_eq!(self.tags[slot], FrameSlotKind::Static);
        self.primitives[slot] != 0
    }

    pub fn set_boolean_static(&mut self, slot: usize, value: bool) {
        debug_assert_eq!(self.tags[slot], FrameSlotKind::Static);
        self.primitives[slot] = value as u64;
    }

    pub fn get_byte_static(&self, slot: usize) -> i8 {
        debug_assert_eq!(self.tags[slot], FrameSlotKind::Static);
        self.primitives[slot] as u8 as i8
    }

    pub fn set_byte_static(&mut self, slot: usize, value: i8) {
        debug_assert_eq!(self.tags[slot], FrameSlotKind::Static);
        self.primitives[slot] = value as u8 as u64;
    }

    pub fn get_int_static(&self, slot: usize) -> i32 {
        debug_assert_eq!(self.tags[slot], FrameSlotKind::Static);
        self.primitives[slot] as u32 as i32
    }

    pub fn set_int_static(&mut self, slot: usize, value: i32) {
        debug_assert_eq!(self.tags[slot], FrameSlotKind::Static);
        self.primitives[slot] = value as u32 as u64;
    }

    pub fn get_long_static(&self, slot: usize) -> i64 {
        debug_assert_eq!(self.tags[slot], FrameSlotKind::Static);
        self.primitives[slot] as i64
    }

    pub fn set_long_static(&mut self, slot: usize, value: i64) {
        debug_assert_eq!(self.tags[slot], FrameSlotKind::Static);
        self.primitives[slot] = value as u64;
    }

    pub fn get_float_static(&self, slot: usize) -> f32 {
        debug_assert_eq!(self.tags[slot], FrameSlotKind::Static);
        f32::from_bits(self.primitives[slot] as u32)
    }

    pub fn set_float_static(&mut self, slot: usize, value: f32) {
        debug_assert_eq!(self.tags[slot], FrameSlotKind::Static);
        self.primitives[slot] = value.to_bits() as u64;
    }

    pub fn get_double_static(&self, slot: usize) -> f64 {
        debug_assert_eq!(self.tags[slot], FrameSlotKind::Static);
        f64::from_bits(self.primitives[slot])
    }

    pub fn set_double_static(&mut self, slot: usize, value: f64) {
        debug_assert_eq!(self.tags[slot], FrameSlotKind::Static);
        self.primitives[slot] = value.to_bits();
    }

    // Raw access for the transfer engine.

    pub(crate) fn raw_primitive(&self, slot: usize) -> u64 {
        self.primitives[slot]
    }

    pub(crate) fn raw_object(&self, slot: usize) -> &Value {
        &self.objects[slot]
    }

    pub(crate) fn write_raw(&mut self, slot: usize, tag: FrameSlotKind, primitive: u64, object: Value) {
        self.tags[slot] = tag;
        self.primitives[slot] = primitive;
        self.objects[slot] = object;
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("id", &self.id)
            .field("arguments", &self.arguments)
            .field("tags", &self.tags)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor() -> (Arc<FrameDescriptor>, usize, usize, usize) {
        let mut builder = FrameDescriptor::builder();
        let i = builder.add_slot(FrameSlotKind::Int, "i");
        let d = builder.add_slot(FrameSlotKind::Double, "d");
        let s = builder.add_slot(FrameSlotKind::Static, "s");
        (builder.build(), i, d, s)
    }

    #[test]
    fn test_uninitialized_slot_reads_default_object() {
        let sentinel = Value::Object(ObjectRef::opaque());
        let mut builder = FrameDescriptor::builder();
        let slot = builder.add_slot(FrameSlotKind::Int, "i");
        builder.default_value(sentinel.clone());
        let frame = Frame::new(builder.build(), vec![]);

        assert_eq!(frame.tag(slot), FrameSlotKind::Object);
        assert_eq!(frame.get_object(slot).unwrap(), sentinel);
        let err = frame.get_int(slot).unwrap_err();
        assert_eq!(err.expected, FrameSlotKind::Int);
        assert_eq!(err.actual, FrameSlotKind::Object);
    }

    #[test]
    fn test_tag_follows_last_write() {
        let (desc, i, _, _) = descriptor();
        let mut frame = Frame::new(desc, vec![]);
        frame.set_int(i, -7);
        assert_eq!(frame.get_int(i).unwrap(), -7);
        frame.set_double(i, 1.5);
        assert_eq!(frame.tag(i), FrameSlotKind::Double);
        assert!(frame.get_int(i).is_err());
        assert_eq!(frame.get_double(i).unwrap(), 1.5);
    }

    #[test]
    fn test_primitive_extremes() {
        let (desc, i, d, _) = descriptor();
        let mut frame = Frame::new(desc, vec![]);
        frame.set_int(i, i32::MIN);
        frame.set_double(d, f64::MIN_POSITIVE);
        assert_eq!(frame.get_int(i).unwrap(), i32::MIN);
        assert_eq!(frame.get_double(d).unwrap(), f64::MIN_POSITIVE);
        frame.set_byte(i, i8::MIN);
        assert_eq!(frame.get_byte(i).unwrap(), i8::MIN);
        frame.set_float(d, f32::MAX);
        assert_eq!(frame.get_float(d).unwrap(), f32::MAX);
    }

    #[test]
    fn test_unwritten_static_reads_zero_for_any_kind() {
        let (desc, _, _, s) = descriptor();
        let frame = Frame::new(desc, vec![]);
        assert_eq!(frame.tag(s), FrameSlotKind::Static);
        assert!(!frame.get_boolean_static(s));
        assert_eq!(frame.get_byte_static(s), 0);
        assert_eq!(frame.get_int_static(s), 0);
        assert_eq!(frame.get_long_static(s), 0);
        assert_eq!(frame.get_float_static(s), 0.0);
        assert_eq!(frame.get_double_static(s), 0.0);
        assert_eq!(frame.get_object_static(s), Value::Null);
    }

    #[test]
    fn test_static_write_keeps_static_tag() {
        let (desc, _, _, s) = descriptor();
        let mut frame = Frame::new(desc, vec![]);
        frame.set_long_static(s, i64::MAX);
        assert_eq!(frame.tag(s), FrameSlotKind::Static);
        assert_eq!(frame.get_long_static(s), i64::MAX);
    }

    #[test]
    fn test_regular_write_to_static_slot_stays_static() {
        let (desc, _, _, s) = descriptor();
        let mut frame = Frame::new(desc, vec![]);
        let obj = Value::Object(ObjectRef::opaque());
        frame.set_object_static(s, obj.clone());
        frame.set_int(s, 9);
        assert_eq!(frame.tag(s), FrameSlotKind::Static);
        assert_eq!(frame.get_int_static(s), 9);
        assert_eq!(frame.get_object_static(s), obj);

        frame.set_object(s, Value::Null);
        assert_eq!(frame.tag(s), FrameSlotKind::Static);
        assert_eq!(frame.get_int_static(s), 9);
        assert!(frame.get_int(s).is_err());
    }

    #[test]
    fn test_object_identity() {
        let a = ObjectRef::opaque();
        let b = ObjectRef::opaque();
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
    }

    #[test]
    fn test_frame_ids_are_unique() {
        let (desc, _, _, _) = descriptor();
        let a = Frame::new(desc.clone(), vec![]);
        let b = Frame::new(desc, vec![]);
        assert_ne!(a.id(), b.id());
    }
}
