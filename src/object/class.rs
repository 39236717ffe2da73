//! Class serializers: the seam between the loader and object contents.

use super::{ObjectId, PropertyBag};
use crate::linker::LoadContext;
use crate::names::NameArchive;
use crate::util::Result;

/// Archive that can also encode references to other objects.
pub trait ObjectArchive: NameArchive {
    fn serialize_object_ref(&mut self, object: &mut Option<ObjectId>) -> Result<()>;
}

/// Reads and writes the serial data of objects of one class.
///
/// Serial data is the tagged property list followed by class-specific binary
/// fields. A loader hands the serializer exactly the export's bytes and
/// checks afterwards that all of them were consumed.
pub trait ClassSerializer: Send + Sync {
    fn serialize_tagged_properties(&self, ar: &mut dyn ObjectArchive, properties: &mut PropertyBag) -> Result<()> {
        properties.serialize(ar)
    }

    /// Default: opaque bytes up to the end of the export.
    fn serialize_binary_fields(&self, ar: &mut dyn ObjectArchive, binary: &mut Vec<u8>) -> Result<()> {
        if ar.is_loading() {
            binary.resize(ar.remaining() as usize, 0);
        }
        ar.serialize(binary)
    }

    /// Runs once per object after every object of the pass was read.
    fn post_load(&self, _cx: &mut PostLoadContext<'_>) -> Result<()> {
        Ok(())
    }
}

/// Serializer used when no class in a chain registered one.
#[derive(Debug, Default)]
pub struct DefaultSerializer;

impl ClassSerializer for DefaultSerializer {}

/// Access handed to [`ClassSerializer::post_load`].
pub struct PostLoadContext<'a> {
    object: ObjectId,
    cx: &'a mut LoadContext,
}

impl<'a> PostLoadContext<'a> {
    pub(crate) fn new(object: ObjectId, cx: &'a mut LoadContext) -> Self {
        Self { object, cx }
    }

    /// The object being post-loaded.
    #[inline]
    pub fn object(&self) -> ObjectId {
        self.object
    }

    /// Loading context, for reading other objects or loading more of them.
    pub fn context(&mut self) -> &mut LoadContext {
        self.cx
    }

    pub fn properties(&self) -> Option<&PropertyBag> {
        self.cx.objects().get(self.object).map(|r| &r.properties)
    }

    pub fn properties_mut(&mut self) -> Option<&mut PropertyBag> {
        self.cx.objects_mut().get_mut(self.object).map(|r| &mut r.properties)
    }
}
