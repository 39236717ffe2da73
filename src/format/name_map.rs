//! Name archives that translate between local table indices and interned names.

use std::collections::HashMap;

use crate::names::{Name, NameArchive};
use crate::stream::{delegate_archive, Archive};
use crate::util::{Error, Result};

/// Decodes `(local index, number)` pairs through a linker's name map.
pub struct NameMapReader<'a, A> {
    inner: A,
    map: &'a [Name],
}

impl<'a, A: Archive> NameMapReader<'a, A> {
    pub fn new(inner: A, map: &'a [Name]) -> Self {
        Self { inner, map }
    }

    pub fn into_inner(self) -> A {
        self.inner
    }
}

impl<A: Archive> Archive for NameMapReader<'_, A> {
    delegate_archive!(inner);
}

impl<A: Archive> NameArchive for NameMapReader<'_, A> {
    fn serialize_name(&mut self, name: &mut Name) -> Result<()> {
        read_mapped_name(&mut self.inner, self.map, name)
    }
}

/// Shared decode step for every archive that reads names from a package.
pub fn read_mapped_name<A: Archive + ?Sized>(ar: &mut A, map: &[Name], name: &mut Name) -> Result<()> {
    let (mut index, mut number) = (0i32, 0i32);
    ar.serialize_i32(&mut index)?;
    ar.serialize_i32(&mut number)?;
    let base = usize::try_from(index)
        .ok()
        .and_then(|i| map.get(i))
        .ok_or_else(|| Error::corrupt(format!("bad name index {index} (table has {})", map.len())))?;
    if number < 0 {
        return Err(Error::corrupt(format!("negative name number {number}")));
    }
    *name = base.with_number(number as u32);
    Ok(())
}

/// Inverse lookup from interned entries to a package's local table.
#[derive(Debug, Clone, Default)]
pub struct LocalNameIndex {
    local: HashMap<u32, i32>,
}

impl LocalNameIndex {
    pub fn new(map: &[Name]) -> Self {
        let mut local = HashMap::with_capacity(map.len());
        for (i, name) in map.iter().enumerate() {
            local.entry(name.index()).or_insert(i as i32);
        }
        Self { local }
    }

    /// Local index of an interned entry.
    #[inline]
    pub fn get(&self, name: Name) -> Option<i32> {
        self.local.get(&name.index()).copied()
    }

    /// Register `name` at `local` unless its entry is already present.
    pub fn insert(&mut self, name: Name, local: i32) -> i32 {
        *self.local.entry(name.index()).or_insert(local)
    }

    pub fn len(&self) -> usize {
        self.local.len()
    }

    pub fn is_empty(&self) -> bool {
        self.local.is_empty()
    }

    /// Write `name` as `(local index, number)`.
    pub fn write_name<A: Archive + ?Sized>(&self, ar: &mut A, name: Name) -> Result<()> {
        let mut index = self
            .get(name)
            .ok_or_else(|| Error::corrupt(format!("name entry {} missing from the package name table", name.index())))?;
        let mut number = name.number() as i32;
        ar.serialize_i32(&mut index)?;
        ar.serialize_i32(&mut number)
    }
}

/// Encodes names as local table indices.
pub struct NameMapWriter<A> {
    inner: A,
    index: LocalNameIndex,
}

impl<A: Archive> NameMapWriter<A> {
    pub fn new(inner: A, map: &[Name]) -> Self {
        Self { inner, index: LocalNameIndex::new(map) }
    }

    pub fn into_inner(self) -> A {
        self.inner
    }
}

impl<A: Archive> Archive for NameMapWriter<A> {
    delegate_archive!(inner);
}

impl<A: Archive> NameArchive for NameMapWriter<A> {
    fn serialize_name(&mut self, name: &mut Name) -> Result<()> {
        self.index.write_name(&mut self.inner, *name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::names::NameTable;
    use crate::stream::{MemoryReader, MemoryWriter};

    #[test]
    fn test_names_through_local_table() {
        let table = NameTable::new();
        let map = vec![table.intern_or_add("None"), table.intern_or_add("Chair"), table.intern_or_add("Seat")];

        let mut writer = NameMapWriter::new(MemoryWriter::new(), &map);
        writer.serialize_name(&mut map[2].with_number(4)).unwrap();
        let mut chair = map[1];
        writer.serialize_name(&mut chair).unwrap();
        let bytes = writer.into_inner().into_inner();
        assert_eq!(&bytes[..8], &[2, 0, 0, 0, 4, 0, 0, 0]);

        let mut reader = NameMapReader::new(MemoryReader::new(bytes), &map);
        let mut name = Name::NONE;
        reader.serialize_name(&mut name).unwrap();
        assert_eq!(table.resolve(name), "Seat_3");
        reader.serialize_name(&mut name).unwrap();
        assert_eq!(table.resolve(name), "Chair");
    }

    #[test]
    fn test_bad_local_index() {
        let map = vec![Name::NONE];
        for (mut index, mut number) in [(1i32, 0i32), (-1, 0), (0, -2)] {
            let mut writer = MemoryWriter::new();
            writer.serialize_i32(&mut index).unwrap();
            writer.serialize_i32(&mut number).unwrap();
            let mut reader = NameMapReader::new(MemoryReader::new(writer.into_inner()), &map);
            let mut name = Name::NONE;
            assert!(matches!(reader.serialize_name(&mut name), Err(Error::CorruptData(_))));
        }
    }

    #[test]
    fn test_writer_rejects_foreign_name() {
        let table = NameTable::new();
        let map = vec![Name::NONE];
        let mut writer = NameMapWriter::new(MemoryWriter::new(), &map);
        assert!(writer.serialize_name(&mut table.intern_or_add("Stranger")).is_err());
    }
}
