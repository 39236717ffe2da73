//! Process-wide name table.

use std::sync::Arc;

use parking_lot::RwLock;

use super::Name;
use crate::util::{Error, Result};

/// Hash buckets in the name table.
pub const NAME_HASH_BUCKETS: usize = 4096;

/// Longest string accepted as a name.
pub const MAX_NAME_LEN: usize = 1024;

/// One interned string.
#[derive(Debug, Clone)]
pub struct NameEntry {
    pub text: Box<str>,
    pub flags: u64,
    hash_next: Option<u32>,
}

struct Inner {
    entries: Vec<NameEntry>,
    buckets: Vec<Option<u32>>,
}

/// Case-insensitive intern table mapping strings to stable indices.
///
/// Index 0 is always `None`. Entries are never removed, so an index stays
/// valid for the lifetime of the table.
pub struct NameTable {
    inner: RwLock<Inner>,
}

impl NameTable {
    pub fn new() -> Self {
        let table = Self {
            inner: RwLock::new(Inner { entries: Vec::new(), buckets: vec![None; NAME_HASH_BUCKETS] }),
        };
        table.add_entry("None");
        table
    }

    /// Number of entries, including `None`.
    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Find-only lookup of a bare string.
    pub fn find_entry(&self, text: &str) -> Option<u32> {
        self.inner.read().find(text)
    }

    /// Lookup of a bare string, adding it if absent.
    pub fn add_entry(&self, text: &str) -> u32 {
        if let Some(index) = self.find_entry(text) {
            return index;
        }
        let mut inner = self.inner.write();
        // Another writer may have added it between the locks
        if let Some(index) = inner.find(text) {
            return index;
        }
        let index = inner.entries.len() as u32;
        let bucket = hash_name(text) % NAME_HASH_BUCKETS;
        let hash_next = inner.buckets[bucket];
        inner.entries.push(NameEntry { text: text.into(), flags: 0, hash_next });
        inner.buckets[bucket] = Some(index);
        index
    }

    /// Find-only mode: `"Foo_3"` resolves to entry `Foo` with number 3.
    pub fn intern_or_find(&self, text: &str) -> Option<Name> {
        let (base, number) = split_number(text);
        self.find_entry(base).map(|index| Name::new(index, number))
    }

    /// Add mode.
    pub fn intern_or_add(&self, text: &str) -> Name {
        let (base, number) = split_number(text);
        Name::new(self.add_entry(base), number)
    }

    /// Checked variant of [`NameTable::intern_or_add`] for untrusted input.
    pub fn try_intern(&self, text: &str) -> Result<Name> {
        if text.len() > MAX_NAME_LEN {
            return Err(Error::corrupt(format!("name of {} bytes too long", text.len())));
        }
        Ok(self.intern_or_add(text))
    }

    /// Bare string of an entry.
    pub fn entry_text(&self, index: u32) -> Option<String> {
        self.inner.read().entries.get(index as usize).map(|e| e.text.to_string())
    }

    pub fn entry_flags(&self, index: u32) -> u64 {
        self.inner.read().entries.get(index as usize).map_or(0, |e| e.flags)
    }

    pub fn add_entry_flags(&self, index: u32, flags: u64) {
        if let Some(entry) = self.inner.write().entries.get_mut(index as usize) {
            entry.flags |= flags;
        }
    }

    /// Full display string, number suffix included.
    pub fn resolve(&self, name: Name) -> String {
        let base = self.entry_text(name.index()).unwrap_or_else(|| format!("<bad name {}>", name.index()));
        match name.suffix() {
            Some(n) => format!("{base}_{n}"),
            None => base,
        }
    }

    /// Case-insensitive comparison against a display string.
    pub fn matches(&self, name: Name, text: &str) -> bool {
        self.intern_or_find(text) == Some(name)
    }
}

impl Default for NameTable {
    fn default() -> Self {
        Self::new()
    }
}

impl Inner {
    fn find(&self, text: &str) -> Option<u32> {
        let mut cursor = self.buckets[hash_name(text) % NAME_HASH_BUCKETS];
        while let Some(index) = cursor {
            let entry = &self.entries[index as usize];
            if entry.text.eq_ignore_ascii_case(text) {
                return Some(index);
            }
            cursor = entry.hash_next;
        }
        None
    }
}

/// FNV-1a over ASCII-lowercased bytes.
fn hash_name(text: &str) -> usize {
    let mut hash: u32 = 0x811C_9DC5;
    for byte in text.bytes() {
        hash ^= byte.to_ascii_lowercase() as u32;
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash as usize
}

/// Split a trailing `_<digits>` suffix into an internal number (suffix + 1).
pub fn split_number(text: &str) -> (&str, u32) {
    let Some(pos) = text.rfind('_') else {
        return (text, 0);
    };
    let digits = &text[pos + 1..];
    if pos == 0
        || digits.is_empty()
        || !digits.bytes().all(|b| b.is_ascii_digit())
        || (digits.len() > 1 && digits.starts_with('0'))
    {
        return (text, 0);
    }
    match digits.parse::<u32>() {
        Ok(n) if n < i32::MAX as u32 => (&text[..pos], n + 1),
        _ => (text, 0),
    }
}

static GLOBAL: RwLock<Option<Arc<NameTable>>> = parking_lot::const_rwlock(None);

/// Create the process-wide table if needed and return it.
pub fn init_global() -> Arc<NameTable> {
    if let Some(table) = GLOBAL.read().as_ref() {
        return table.clone();
    }
    GLOBAL.write().get_or_insert_with(|| Arc::new(NameTable::new())).clone()
}

/// The process-wide table, if initialized.
pub fn global() -> Result<Arc<NameTable>> {
    GLOBAL
        .read()
        .clone()
        .ok_or_else(|| Error::other("name table used before init_global"))
}

/// Drop the process-wide table. Holders of an `Arc` keep theirs alive.
pub fn teardown_global() -> bool {
    GLOBAL.write().take().is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_none_is_index_zero() {
        let table = NameTable::new();
        assert_eq!(table.find_entry("none"), Some(0));
        assert_eq!(table.intern_or_add("None"), Name::NONE);
    }

    #[test]
    fn test_case_insensitive() {
        let table = NameTable::new();
        let a = table.intern_or_add("StaticMesh");
        let b = table.intern_or_add("staticmesh");
        assert_eq!(a, b);
        // First spelling wins
        assert_eq!(table.resolve(b), "StaticMesh");
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_find_only_mode() {
        let table = NameTable::new();
        assert!(table.intern_or_find("Missing").is_none());
        assert_eq!(table.len(), 1);
        table.intern_or_add("Present");
        assert!(table.intern_or_find("PRESENT").is_some());
    }

    #[test]
    fn test_number_split() {
        assert_eq!(split_number("Name_17"), ("Name", 18));
        assert_eq!(split_number("Name_0"), ("Name", 1));
        assert_eq!(split_number("Name_07"), ("Name_07", 0));
        assert_eq!(split_number("Name_"), ("Name_", 0));
        assert_eq!(split_number("_5"), ("_5", 0));
        assert_eq!(split_number("Name_99999999999"), ("Name_99999999999", 0));
        assert_eq!(split_number("A_B_3"), ("A_B", 4));
    }

    #[test]
    fn test_numbered_names_share_entry() {
        let table = NameTable::new();
        let a = table.intern_or_add("Actor_3");
        let b = table.intern_or_add("Actor_4");
        let c = table.intern_or_add("Actor");
        assert_eq!(a.index(), b.index());
        assert_eq!(a.index(), c.index());
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(table.resolve(a), "Actor_3");
        assert_eq!(table.resolve(c), "Actor");
        assert!(table.matches(b, "actor_4"));
    }

    #[test]
    fn test_many_entries_chain() {
        let table = NameTable::new();
        let names: Vec<Name> = (0..10_000).map(|i| table.intern_or_add(&format!("N{i}x"))).collect();
        for (i, name) in names.iter().enumerate() {
            assert_eq!(table.intern_or_find(&format!("n{i}X")), Some(*name));
        }
    }

    #[test]
    fn test_try_intern_rejects_long() {
        let table = NameTable::new();
        assert!(table.try_intern(&"x".repeat(MAX_NAME_LEN + 1)).is_err());
    }
}
