//! Compressed packages, packages on disk, bulk data and saving.

mod common;

use std::path::PathBuf;
use std::sync::Arc;

use pkglinker::format::{ExportSpec, PackageBuilder, PackageIndex};
use pkglinker::linker::LoadContext;
use pkglinker::names::NameTable;
use pkglinker::object::{BulkData, ClassSerializer, ObjectArchive};
use pkglinker::stream::{Archive, CompressionFlags, DirectoryFileSystem, MemoryFileSystem};
use pkglinker::util::{LoaderConfig, Result};

/// Package with enough exports to span several compressed chunks.
fn crowded(names: &Arc<NameTable>) -> PackageBuilder {
    let mut builder = PackageBuilder::with_name_table(names.clone());
    let object = common::core_class(&mut builder, "Object");
    let mut previous = PackageIndex::NULL;
    for i in 0..64 {
        let payload = builder
            .encode_payload(|w| {
                w.int_property("Index", i)?;
                w.str_property("Label", &format!("entry number {i}"))?;
                if !previous.is_null() {
                    w.object_property("Previous", previous)?;
                }
                w.end_properties()
            })
            .unwrap();
        previous = builder.add_export(ExportSpec::new(format!("Entry_{i}"), object).payload(payload));
    }
    builder
}

fn load_snapshot(name: &str, install: impl FnOnce(&Arc<NameTable>, &MemoryFileSystem)) -> Vec<String> {
    let (names, fs, mut cx) = common::context();
    install(&names, fs.as_ref());
    cx.load_package(name).unwrap();
    common::snapshot(&cx)
}

#[test]
fn test_chunk_compressed_packages() {
    let plain = load_snapshot("Crowded", |names, fs| {
        fs.insert_package("Crowded", crowded(names).build().unwrap());
    });
    for flags in [CompressionFlags::ZLIB, CompressionFlags::ZSTD] {
        let (names, fs, mut cx) = common::context();
        let mut builder = crowded(&names);
        builder.set_compression(flags, 512);
        fs.insert_package("Crowded", builder.build().unwrap());

        let id = cx.get_package_linker("Crowded").unwrap();
        cx.finish_linker(id).unwrap();
        let summary = cx.linker(id).unwrap().summary();
        assert!(summary.is_compressed());
        assert!(summary.compressed_chunks.len() > 1, "{flags:?}");

        cx.load_package("Crowded").unwrap();
        assert_eq!(common::snapshot(&cx), plain, "{flags:?}");
    }
}

#[test]
fn test_fully_compressed_package() {
    let plain = load_snapshot("Crowded", |names, fs| {
        fs.insert_package("Crowded", crowded(names).build().unwrap());
    });
    let packed = load_snapshot("Crowded", |names, fs| {
        let (data, size) = crowded(names).build_fully_compressed(CompressionFlags::ZLIB).unwrap();
        assert!((data.len() as u64) < size);
        fs.insert_fully_compressed("Crowded", data, size);
    });
    assert_eq!(packed, plain);
}

#[test]
fn test_load_from_directory() {
    let dir = tempfile::tempdir().unwrap();
    let names = Arc::new(NameTable::new());
    std::fs::write(dir.path().join("PkgA.pkg"), common::package_a(&names).build().unwrap()).unwrap();
    // Lookup ignores case
    std::fs::write(dir.path().join("pkgb.PKG"), common::package_b(&names).build().unwrap()).unwrap();

    for use_mmap in [false, true] {
        let fs = Arc::new(DirectoryFileSystem::new([dir.path().to_path_buf()]).with_mmap(use_mmap));
        let mut cx = LoadContext::with_name_table(names.clone(), fs, LoaderConfig::default());
        cx.load_package("PkgB").unwrap();
        let x = cx.objects().find_by_path("PkgA.X").unwrap();
        let y = cx.objects().find_by_path("PkgB.Y").unwrap();
        let target = cx.objects().get(y).unwrap().properties.get_object(names.intern_or_add("Target"));
        assert_eq!(target, Some(x));
    }
}

#[test]
fn test_config_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path: PathBuf = dir.path().join("loader.json");
    let config = LoaderConfig { min_read_size: 4096, load_depends_table: false, ..LoaderConfig::default() };
    std::fs::write(&path, config.to_json().unwrap()).unwrap();

    let loaded = LoaderConfig::from_file(&path).unwrap();
    assert_eq!(loaded.min_read_size, 4096);
    assert!(!loaded.load_depends_table);

    let (names, fs, _) = common::context();
    common::install_a_and_b(&names, &fs);
    let mut cx = LoadContext::with_name_table(names.clone(), fs, loaded);
    let b = cx.get_package_linker("PkgB").unwrap();
    cx.finish_linker(b).unwrap();
    assert!(cx.linker(b).unwrap().depends(0).is_empty());
}

#[test]
fn test_save_round_trip() {
    let (names, fs, mut cx) = common::context();
    common::install_a_and_b(&names, &fs);
    let b = cx.load_package("PkgB").unwrap();
    let before = common::snapshot(&cx);
    let saved = cx.save_package(b).unwrap();

    let fs2 = Arc::new(MemoryFileSystem::new());
    fs2.insert_package("PkgA", common::package_a(&names).build().unwrap());
    fs2.insert_package("PkgB", saved);
    let mut reloaded = common::reopen(&names, &fs2);
    reloaded.load_package("PkgB").unwrap();
    assert_eq!(common::snapshot(&reloaded), before);

    let id = reloaded.get_package_linker("PkgB").unwrap();
    let linker = reloaded.linker(id).unwrap();
    let import = linker.depends(0)[0].to_import().unwrap();
    assert_eq!(linker.import_path(&names, import), "PkgA.X");
}

#[test]
fn test_save_to_disk_and_reload() {
    let dir = tempfile::tempdir().unwrap();
    let (names, fs, mut cx) = common::context();
    common::install_a_and_b(&names, &fs);
    let a = cx.load_package("PkgA").unwrap();
    let before = common::snapshot(&cx);
    cx.save_package_to(a, dir.path().join("PkgA.pkg")).unwrap();

    let fs = Arc::new(DirectoryFileSystem::new([dir.path().to_path_buf()]));
    let mut reloaded = LoadContext::with_name_table(names.clone(), fs, LoaderConfig::default());
    reloaded.load_package("PkgA").unwrap();
    assert_eq!(common::snapshot(&reloaded), before);
}

#[test]
fn test_save_compressed() {
    let config = LoaderConfig { save_compression: CompressionFlags::ZSTD, ..LoaderConfig::default() };
    let (names, fs, mut cx) = common::context_with(config);
    fs.insert_package("Crowded", crowded(&names).build().unwrap());
    let package = cx.load_package("Crowded").unwrap();
    let before = common::snapshot(&cx);
    let saved = cx.save_package(package).unwrap();

    let fs2 = Arc::new(MemoryFileSystem::new());
    fs2.insert_package("Crowded", saved);
    let mut reloaded = common::reopen(&names, &fs2);
    let id = reloaded.get_package_linker("Crowded").unwrap();
    reloaded.finish_linker(id).unwrap();
    assert!(reloaded.linker(id).unwrap().summary().is_compressed());
    reloaded.load_package("Crowded").unwrap();
    assert_eq!(common::snapshot(&reloaded), before);
}

/// Stores its vertex positions as a zstd bulk block.
struct Mesh;

impl ClassSerializer for Mesh {
    fn serialize_binary_fields(&self, ar: &mut dyn ObjectArchive, binary: &mut Vec<u8>) -> Result<()> {
        let mut bulk = if ar.is_loading() {
            BulkData::new(CompressionFlags::NONE)
        } else {
            BulkData::from_slice(binary.as_slice(), CompressionFlags::ZSTD)
        };
        bulk.serialize(ar)?;
        if ar.is_loading() {
            *binary = bulk.bytes().to_vec();
        }
        Ok(())
    }
}

#[test]
fn test_bulk_data_export() {
    let (names, fs, mut cx) = common::context();
    cx.objects_mut().register_native_class("Game", "Mesh", None, Arc::new(Mesh)).unwrap();
    let positions: Vec<f32> = (0..3000).map(|i| (i % 17) as f32 * 0.25).collect();

    let mut builder = PackageBuilder::with_name_table(names.clone());
    let game = builder.add_import("Core", "Package", PackageIndex::NULL, "Game");
    let mesh = builder.add_import("Core", "Class", game, "Mesh");
    let payload = builder
        .encode_payload(|w| {
            w.int_property("Vertices", 1000)?;
            w.end_properties()?;
            BulkData::from_slice(&positions, CompressionFlags::ZSTD).serialize(w)
        })
        .unwrap();
    assert!(payload.len() < positions.len() * 4);
    builder.add_export(ExportSpec::new("Rock", mesh).payload(payload));
    fs.insert_package("Meshes", builder.build().unwrap());

    let package = cx.load_package("Meshes").unwrap();
    let rock = cx.objects().find_by_path("Meshes.Rock").unwrap();
    let expected = BulkData::from_slice(&positions, CompressionFlags::NONE);
    assert_eq!(cx.objects().get(rock).unwrap().binary, expected.bytes());

    // Saving writes the block back through the same serializer
    let saved = cx.save_package(package).unwrap();
    let fs2 = Arc::new(MemoryFileSystem::new());
    fs2.insert_package("Meshes", saved);
    let mut reloaded = common::reopen(&names, &fs2);
    reloaded.objects_mut().register_native_class("Game", "Mesh", None, Arc::new(Mesh)).unwrap();
    reloaded.load_package("Meshes").unwrap();
    let rock = reloaded.objects().find_by_path("Meshes.Rock").unwrap();
    assert_eq!(reloaded.objects().get(rock).unwrap().binary, expected.bytes());
}
