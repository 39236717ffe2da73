//! Object redirectors.
//!
//! A redirector is left behind when an object is renamed or moved. Its serial
//! data is a single object reference to the new location.

use super::class::{ClassSerializer, ObjectArchive};
use super::properties::{PropertyBag, PropertyValue};
use crate::names::Name;
use crate::util::Result;

/// Serializer of `Core.ObjectRedirector`. The destination lands in the
/// property bag under `property`.
#[derive(Debug)]
pub struct RedirectorSerializer {
    property: Name,
}

impl RedirectorSerializer {
    pub fn new(property: Name) -> Self {
        Self { property }
    }
}

impl ClassSerializer for RedirectorSerializer {
    fn serialize_tagged_properties(&self, ar: &mut dyn ObjectArchive, properties: &mut PropertyBag) -> Result<()> {
        let mut destination = properties.get_object(self.property);
        ar.serialize_object_ref(&mut destination)?;
        if ar.is_loading() {
            properties.set(self.property, PropertyValue::Object(destination));
        }
        Ok(())
    }
}
