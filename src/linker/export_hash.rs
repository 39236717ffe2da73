//! Export lookup by `(outer, name)`.

use super::Linker;
use crate::format::{ObjectExport, PackageIndex, EXPORT_HASH_BUCKETS};
use crate::names::Name;

/// Exports hashed per unit of work while the table is built.
pub(super) const EXPORT_HASH_BATCH: usize = 64;

#[inline]
fn bucket(outer: PackageIndex, name: Name) -> usize {
    let mut h = name.index().wrapping_mul(0x9E37_79B1)
        ^ name.number().wrapping_mul(0x85EB_CA77)
        ^ (outer.raw() as u32).wrapping_mul(0xC2B2_AE3D);
    h ^= h >> 16;
    h as usize & (EXPORT_HASH_BUCKETS - 1)
}

/// Bucket heads; chains run through [`ObjectExport::hash_next`].
#[derive(Debug, Clone)]
pub(super) struct ExportHash {
    buckets: Vec<Option<u32>>,
}

impl ExportHash {
    pub(super) fn new() -> Self {
        Self { buckets: vec![None; EXPORT_HASH_BUCKETS] }
    }

    pub(super) fn insert(&mut self, exports: &mut [ObjectExport], index: usize) {
        let export = &mut exports[index];
        let b = bucket(export.outer_index, export.object_name);
        export.hash_next = self.buckets[b];
        self.buckets[b] = Some(index as u32);
    }

    fn chain<'a>(&self, exports: &'a [ObjectExport], outer: PackageIndex, name: Name) -> impl Iterator<Item = usize> + 'a {
        let mut cursor = self.buckets[bucket(outer, name)];
        std::iter::from_fn(move || {
            let index = cursor? as usize;
            cursor = exports.get(index).and_then(|e| e.hash_next);
            Some(index)
        })
    }
}

impl Linker {
    /// Export matching all four keys. `outer == None` matches any outer.
    ///
    /// Until the hash is built every lookup falls back to a linear scan.
    pub fn find_export_index(
        &self,
        class_name: Name,
        class_package: Name,
        object_name: Name,
        outer: Option<PackageIndex>,
    ) -> Option<usize> {
        let matches = |i: usize| {
            let export = &self.exports[i];
            export.object_name == object_name
                && outer.is_none_or(|o| export.outer_index == o)
                && self.export_class_name(i) == Some(class_name)
                && self.export_class_package(i) == Some(class_package)
        };
        match outer {
            Some(outer) if self.hash_built() => {
                self.export_hash.chain(&self.exports, outer, object_name).find(|&i| matches(i))
            }
            _ => (0..self.exports.len()).find(|&i| matches(i)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{ExportSpec, PackageBuilder};
    use crate::linker::LoadContext;
    use crate::names::NameTable;
    use crate::stream::MemoryFileSystem;
    use crate::util::LoaderConfig;
    use std::sync::Arc;

    #[test]
    fn test_chain_collects_collisions() {
        let names: Vec<Name> = (1..=600).map(|i| Name::new(i, 0)).collect();
        let mut exports: Vec<ObjectExport> = names
            .iter()
            .map(|&object_name| ObjectExport { object_name, ..Default::default() })
            .collect();
        let mut hash = ExportHash::new();
        for i in 0..exports.len() {
            hash.insert(&mut exports, i);
        }
        for (i, &name) in names.iter().enumerate() {
            assert!(hash.chain(&exports, PackageIndex::NULL, name).any(|j| j == i));
        }
        // 600 exports over 256 buckets must chain
        assert!(exports.iter().any(|e| e.hash_next.is_some()));
    }

    #[test]
    fn test_outer_changes_bucket_key() {
        let name = Name::new(7, 0);
        let spread: std::collections::HashSet<usize> =
            (1..64).map(|i| bucket(PackageIndex::from_export(i), name)).collect();
        assert!(spread.len() > 1);
    }

    #[test]
    fn test_every_export_found_by_its_own_keys() {
        let names = Arc::new(NameTable::new());
        let mut builder = PackageBuilder::with_name_table(names.clone());
        let core = builder.add_import("Core", "Package", PackageIndex::NULL, "Core");
        let object = builder.add_import("Core", "Class", core, "Object");
        let game = builder.add_import("Core", "Package", PackageIndex::NULL, "Game");
        let actor = builder.add_import("Core", "Class", game, "Actor");

        // Same item names under every group, once per class, and at the root
        for g in 0..8 {
            let group = builder.add_export(ExportSpec::new(format!("Group_{g}"), object));
            for k in 0..20 {
                for class in [object, actor] {
                    builder.add_export(ExportSpec::new(format!("Item_{k}"), class).outer(group));
                }
            }
        }
        for k in 0..20 {
            builder.add_export(ExportSpec::new(format!("Item_{k}"), object));
        }
        let fs = Arc::new(MemoryFileSystem::new());
        fs.insert_package("Crowd", builder.build().unwrap());

        let mut cx = LoadContext::with_name_table(names.clone(), fs, LoaderConfig::default());
        let id = cx.get_package_linker("Crowd").unwrap();
        cx.finish_linker(id).unwrap();
        let linker = cx.linker(id).unwrap();
        assert!(linker.hash_built());
        assert_eq!(linker.exports().len(), 8 + 8 * 40 + 20);

        for (i, export) in linker.exports().iter().enumerate() {
            let class_name = linker.export_class_name(i).unwrap();
            let class_package = linker.export_class_package(i).unwrap();
            let found =
                linker.find_export_index(class_name, class_package, export.object_name, Some(export.outer_index));
            assert_eq!(found, Some(i), "{}", linker.export_path(&names, i));
        }

        // Actor lives in Game, so the Core key misses
        let actor_item = (0..linker.exports().len())
            .find(|&i| linker.export_class_name(i).is_some_and(|n| names.matches(n, "Actor")))
            .unwrap();
        let export = &linker.exports()[actor_item];
        let core_name = names.intern_or_add("Core");
        let actor_name = names.intern_or_add("Actor");
        assert_eq!(linker.find_export_index(actor_name, core_name, export.object_name, Some(export.outer_index)), None);
    }
}
