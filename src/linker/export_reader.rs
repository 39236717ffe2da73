//! Archive handed to class serializers while an export is preloaded.

use std::sync::Arc;

use super::{LinkerId, LoadContext};
use crate::format::{read_mapped_name, PackageIndex};
use crate::names::{Name, NameArchive};
use crate::object::{ObjectArchive, ObjectId};
use crate::stream::{delegate_archive, Archive, MemoryReader};
use crate::util::{Error, Result};

/// Reads one export's serial bytes. Names decode through the linker's name
/// map; object references resolve through the load context, which may create
/// objects and open other packages.
pub struct ExportReader<'a> {
    inner: MemoryReader,
    names: Arc<[Name]>,
    linker: LinkerId,
    cx: &'a mut LoadContext,
}

impl<'a> ExportReader<'a> {
    pub fn new(cx: &'a mut LoadContext, linker: LinkerId, inner: MemoryReader, names: Arc<[Name]>) -> Self {
        Self { inner, names, linker, cx }
    }

    #[inline]
    pub fn linker(&self) -> LinkerId {
        self.linker
    }
}

impl Archive for ExportReader<'_> {
    delegate_archive!(inner);
}

impl NameArchive for ExportReader<'_> {
    fn serialize_name(&mut self, name: &mut Name) -> Result<()> {
        read_mapped_name(&mut self.inner, &self.names, name)
    }
}

impl ObjectArchive for ExportReader<'_> {
    fn serialize_object_ref(&mut self, object: &mut Option<ObjectId>) -> Result<()> {
        let mut index = PackageIndex::NULL;
        index.serialize(&mut self.inner)?;
        *object = match self.cx.index_to_object(self.linker, index) {
            Ok(resolved) => resolved,
            // A dangling reference loads as null rather than failing the export
            Err(e @ (Error::MissingImport { .. } | Error::PackageNotFound(_))) => {
                tracing::warn!(linker = %self.linker, %index, error = %e, "object reference not resolved");
                None
            }
            Err(e) => return Err(e),
        };
        Ok(())
    }
}
