//! Package fixtures shared by the integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use pkglinker::format::{ExportSpec, PackageBuilder, PackageIndex};
use pkglinker::linker::LoadContext;
use pkglinker::names::NameTable;
use pkglinker::object::PropertyValue;
use pkglinker::stream::MemoryFileSystem;
use pkglinker::util::LoaderConfig;

pub fn context() -> (Arc<NameTable>, Arc<MemoryFileSystem>, LoadContext) {
    context_with(LoaderConfig::default())
}

pub fn context_with(config: LoaderConfig) -> (Arc<NameTable>, Arc<MemoryFileSystem>, LoadContext) {
    let names = Arc::new(NameTable::new());
    let fs = Arc::new(MemoryFileSystem::new());
    let cx = LoadContext::with_name_table(names.clone(), fs.clone(), config);
    (names, fs, cx)
}

/// Fresh context over an existing file system and name table.
pub fn reopen(names: &Arc<NameTable>, fs: &Arc<MemoryFileSystem>) -> LoadContext {
    LoadContext::with_name_table(names.clone(), fs.clone(), LoaderConfig::default())
}

/// Import of `Core.<class>` as a class, plus the `Core` package import.
pub fn core_class(builder: &mut PackageBuilder, class: &str) -> PackageIndex {
    let core = builder.add_import("Core", "Package", PackageIndex::NULL, "Core");
    builder.add_import("Core", "Class", core, class)
}

/// `PkgA`: `X` (Value = 7), `Group` and `Group.Inner`.
pub fn package_a(names: &Arc<NameTable>) -> PackageBuilder {
    let mut builder = PackageBuilder::with_name_table(names.clone());
    let object = core_class(&mut builder, "Object");
    let x = builder
        .encode_payload(|w| {
            w.int_property("Value", 7)?;
            w.str_property("Label", "crate")?;
            w.end_properties()
        })
        .unwrap();
    let empty = builder.encode_payload(|w| w.end_properties()).unwrap();
    builder.add_export(ExportSpec::new("X", object).payload(x));
    let group = builder.add_export(ExportSpec::new("Group", object).payload(empty.clone()));
    builder.add_export(ExportSpec::new("Inner", object).outer(group).payload(empty));
    builder
}

/// `PkgB`: `Y`, whose `Target` property references `PkgA.X`.
pub fn package_b(names: &Arc<NameTable>) -> PackageBuilder {
    let mut builder = PackageBuilder::with_name_table(names.clone());
    let object = core_class(&mut builder, "Object");
    let pkg_a = builder.add_import("Core", "Package", PackageIndex::NULL, "PkgA");
    let x = builder.add_import("Core", "Object", pkg_a, "X");
    let y = builder
        .encode_payload(|w| {
            w.object_property("Target", x)?;
            w.float_property("Weight", 0.5)?;
            w.end_properties()
        })
        .unwrap();
    let y = builder.add_export(ExportSpec::new("Y", object).payload(y));
    builder.add_depends(y, x).unwrap();
    builder
}

/// Install `PkgA` and `PkgB` into `fs`.
pub fn install_a_and_b(names: &Arc<NameTable>, fs: &MemoryFileSystem) {
    fs.insert_package("PkgA", package_a(names).build().unwrap());
    fs.insert_package("PkgB", package_b(names).build().unwrap());
}

/// Order-independent description of every object in a context.
pub fn snapshot(cx: &LoadContext) -> Vec<String> {
    let objects = cx.objects();
    let names = cx.names();
    let mut lines: Vec<String> = objects
        .iter()
        .map(|(id, record)| {
            let class = objects.class_name(id).map_or_else(|| "-".to_string(), |n| names.resolve(n));
            let properties: Vec<String> = record
                .properties
                .iter()
                .map(|(name, value)| {
                    let value = match value {
                        PropertyValue::Object(Some(o)) => objects.path_name(*o),
                        PropertyValue::Name(n) => names.resolve(*n),
                        other => format!("{other:?}"),
                    };
                    format!("{}={value}", names.resolve(name))
                })
                .collect();
            format!(
                "{} [{class}] flags={:#x} {} binary={}",
                objects.path_name(id),
                record.flags.0,
                properties.join(","),
                record.binary.len()
            )
        })
        .collect();
    lines.sort();
    lines
}
