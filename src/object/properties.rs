//! Tagged properties.
//!
//! A property list is a run of `(name, type tag: u8, size: i32, value)`
//! records closed by the name `None`. The size lets readers skip types they
//! do not know.

use super::{ObjectArchive, ObjectId};
use crate::names::{Name, NameArchive};
use crate::util::{Error, Result};

/// On-disk type tag of a property value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PropertyType {
    Int = 1,
    Float = 2,
    Bool = 3,
    Name = 4,
    Str = 5,
    Object = 6,
    Bytes = 7,
}

impl PropertyType {
    pub fn from_tag(tag: u8) -> Option<Self> {
        Some(match tag {
            1 => Self::Int,
            2 => Self::Float,
            3 => Self::Bool,
            4 => Self::Name,
            5 => Self::Str,
            6 => Self::Object,
            7 => Self::Bytes,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Int(i32),
    Float(f32),
    Bool(bool),
    Name(Name),
    Str(String),
    Object(Option<ObjectId>),
    Bytes(Vec<u8>),
}

impl PropertyValue {
    pub fn property_type(&self) -> PropertyType {
        match self {
            Self::Int(_) => PropertyType::Int,
            Self::Float(_) => PropertyType::Float,
            Self::Bool(_) => PropertyType::Bool,
            Self::Name(_) => PropertyType::Name,
            Self::Str(_) => PropertyType::Str,
            Self::Object(_) => PropertyType::Object,
            Self::Bytes(_) => PropertyType::Bytes,
        }
    }

    fn read<A: ObjectArchive + ?Sized>(ar: &mut A, ty: PropertyType, size: usize) -> Result<Self> {
        Ok(match ty {
            PropertyType::Int => {
                let mut v = 0;
                ar.serialize_i32(&mut v)?;
                Self::Int(v)
            }
            PropertyType::Float => {
                let mut v = 0.0;
                ar.serialize_f32(&mut v)?;
                Self::Float(v)
            }
            PropertyType::Bool => {
                let mut v = false;
                ar.serialize_bool(&mut v)?;
                Self::Bool(v)
            }
            PropertyType::Name => {
                let mut v = Name::NONE;
                ar.serialize_name(&mut v)?;
                Self::Name(v)
            }
            PropertyType::Str => {
                let mut v = String::new();
                ar.serialize_string(&mut v)?;
                Self::Str(v)
            }
            PropertyType::Object => {
                let mut v = None;
                ar.serialize_object_ref(&mut v)?;
                Self::Object(v)
            }
            PropertyType::Bytes => {
                let mut v = vec![0u8; size];
                ar.serialize(&mut v)?;
                Self::Bytes(v)
            }
        })
    }

    fn write<A: ObjectArchive + ?Sized>(&mut self, ar: &mut A) -> Result<()> {
        match self {
            Self::Int(v) => ar.serialize_i32(v),
            Self::Float(v) => ar.serialize_f32(v),
            Self::Bool(v) => ar.serialize_bool(v),
            Self::Name(v) => ar.serialize_name(v),
            Self::Str(v) => ar.serialize_string(v),
            Self::Object(v) => ar.serialize_object_ref(v),
            Self::Bytes(v) => ar.serialize(v),
        }
    }
}

/// Ordered property list of one object.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropertyBag {
    entries: Vec<(Name, PropertyValue)>,
}

impl PropertyBag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, name: Name) -> Option<&PropertyValue> {
        self.entries.iter().find(|(n, _)| *n == name).map(|(_, v)| v)
    }

    /// Insert or replace, keeping first-insertion order.
    pub fn set(&mut self, name: Name, value: PropertyValue) {
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn remove(&mut self, name: Name) -> Option<PropertyValue> {
        let pos = self.entries.iter().position(|(n, _)| *n == name)?;
        Some(self.entries.remove(pos).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Name, &PropertyValue)> {
        self.entries.iter().map(|(n, v)| (*n, v))
    }

    pub fn get_int(&self, name: Name) -> Option<i32> {
        match self.get(name)? {
            PropertyValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn get_object(&self, name: Name) -> Option<ObjectId> {
        match self.get(name)? {
            PropertyValue::Object(v) => *v,
            _ => None,
        }
    }

    pub fn serialize<A: ObjectArchive + ?Sized>(&mut self, ar: &mut A) -> Result<()> {
        if ar.is_loading() {
            self.load(ar)
        } else {
            for (name, value) in &mut self.entries {
                let ty = value.property_type();
                write_property_with(ar, *name, ty, |ar| value.write(ar))?;
            }
            write_property_terminator(ar)
        }
    }

    fn load<A: ObjectArchive + ?Sized>(&mut self, ar: &mut A) -> Result<()> {
        self.entries.clear();
        loop {
            let mut name = Name::NONE;
            ar.serialize_name(&mut name)?;
            if name.is_none() {
                return Ok(());
            }
            let (mut tag, mut size) = (0u8, 0i32);
            ar.serialize_u8(&mut tag)?;
            ar.serialize_i32(&mut size)?;
            if size < 0 || size as u64 > ar.remaining() {
                return Err(Error::corrupt(format!("property size {size} out of range")));
            }
            let start = ar.tell();
            let end = start + size as u64;
            match PropertyType::from_tag(tag) {
                Some(ty) => {
                    let value = PropertyValue::read(ar, ty, size as usize)?;
                    if ar.tell() != end {
                        return Err(Error::corrupt(format!(
                            "property of type {ty:?} used {} of {size} bytes",
                            ar.tell() - start
                        )));
                    }
                    self.set(name, value);
                }
                None => {
                    tracing::warn!(tag, size, "skipping property of unknown type");
                    ar.seek(end)?;
                }
            }
        }
    }
}

/// Write one tagged property; the size field is patched after `value` runs.
pub fn write_property_with<A, F>(ar: &mut A, mut name: Name, ty: PropertyType, value: F) -> Result<()>
where
    A: NameArchive + ?Sized,
    F: FnOnce(&mut A) -> Result<()>,
{
    ar.serialize_name(&mut name)?;
    let mut tag = ty as u8;
    ar.serialize_u8(&mut tag)?;
    let size_pos = ar.tell();
    ar.serialize_i32(&mut 0)?;
    let start = ar.tell();
    value(ar)?;
    let end = ar.tell();
    let mut size = i32::try_from(end - start).map_err(|_| Error::corrupt("property value too large"))?;
    ar.seek(size_pos)?;
    ar.serialize_i32(&mut size)?;
    ar.seek(end)
}

pub fn write_property_terminator<A: NameArchive + ?Sized>(ar: &mut A) -> Result<()> {
    let mut none = Name::NONE;
    ar.serialize_name(&mut none)
}
