//! Per-version upgrades applied after parsing older files.
//!
//! Each entry names the version that introduced a format change and fills
//! the fields a file older than that version cannot carry. Entries run in
//! ascending order for every version newer than the file's.

use super::constants::*;
use super::summary::PackageFileSummary;
use super::tables::ObjectExport;
use crate::stream::CompressionFlags;
use smallvec::SmallVec;

/// One format change and the defaults it implies for older files.
pub struct VersionUpgrade {
    pub version: u16,
    pub description: &'static str,
    pub summary: fn(&mut PackageFileSummary),
    pub export: fn(&mut ObjectExport),
}

fn no_export_change(_: &mut ObjectExport) {}

fn no_summary_change(_: &mut PackageFileSummary) {}

/// Ordered by version.
pub static UPGRADES: &[VersionUpgrade] = &[
    VersionUpgrade {
        version: VER_HEADER_SIZE_AND_FOLDER,
        description: "total header size and folder name",
        summary: |s| {
            s.total_header_size = 0;
            s.folder_name = "None".to_string();
        },
        export: no_export_change,
    },
    VersionUpgrade {
        version: VER_DEPENDS_TABLE,
        description: "depends table",
        summary: |s| s.depends_offset = 0,
        export: no_export_change,
    },
    VersionUpgrade {
        version: VER_NET_OBJECT_COUNTS,
        description: "generation net object counts",
        summary: |s| {
            for generation in &mut s.generations {
                generation.net_object_count = generation.export_count;
            }
        },
        export: |e| {
            e.generation_net_object_count.clear();
            e.package_guid = crate::util::Guid::ZERO;
        },
    },
    VersionUpgrade {
        version: VER_ENGINE_AND_COOK_VERSION,
        description: "engine and cooked content versions",
        summary: |s| {
            s.engine_version = 0;
            s.cooked_content_version = 0;
        },
        export: no_export_change,
    },
    VersionUpgrade {
        version: VER_PACKAGE_COMPRESSION,
        description: "package compression",
        summary: |s| {
            s.compression_flags = CompressionFlags::NONE;
            s.compressed_chunks.clear();
        },
        export: no_export_change,
    },
    VersionUpgrade {
        version: VER_COMPONENT_MAP,
        description: "export component map",
        summary: no_summary_change,
        export: |e| e.component_map = SmallVec::new(),
    },
];

/// Entries newer than `file_version`, oldest first.
pub fn pending_upgrades(file_version: u16) -> impl Iterator<Item = &'static VersionUpgrade> {
    UPGRADES.iter().filter(move |u| u.version > file_version)
}

pub fn upgrade_summary(summary: &mut PackageFileSummary, file_version: u16) {
    for upgrade in pending_upgrades(file_version) {
        (upgrade.summary)(summary);
    }
}

pub fn upgrade_export(export: &mut ObjectExport, file_version: u16) {
    for upgrade in pending_upgrades(file_version) {
        (upgrade.export)(export);
    }
}
