//! Arena of live objects.

use std::collections::HashMap;
use std::sync::Arc;

use smallvec::SmallVec;

use super::class::{ClassSerializer, DefaultSerializer};
use super::flags::ObjectFlags;
use super::properties::PropertyBag;
use super::redirector::RedirectorSerializer;
use crate::format::PackageFlags;
use crate::linker::LinkerId;
use crate::names::{Name, NameTable};
use crate::util::{Error, Guid, Result};

/// Handle of an object in an [`ObjectStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(u32);

impl ObjectId {
    #[inline]
    pub const fn from_index(index: usize) -> Self {
        Self(index as u32)
    }

    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// One live object.
pub struct ObjectRecord {
    pub name: Name,
    /// `None` for top-level packages.
    pub outer: Option<ObjectId>,
    pub class: Option<ObjectId>,
    pub archetype: Option<ObjectId>,
    /// Parent class, for class objects.
    pub super_struct: Option<ObjectId>,
    pub flags: ObjectFlags,
    /// Export this object was created from.
    pub linker: Option<(LinkerId, usize)>,
    pub properties: PropertyBag,
    pub binary: Vec<u8>,
    /// Set on native classes.
    pub serializer: Option<Arc<dyn ClassSerializer>>,
}

impl std::fmt::Debug for ObjectRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectRecord")
            .field("name", &self.name)
            .field("outer", &self.outer)
            .field("class", &self.class)
            .field("flags", &self.flags)
            .field("linker", &self.linker)
            .finish_non_exhaustive()
    }
}

/// Side record kept for package objects.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PackageInfo {
    pub package_flags: PackageFlags,
    pub folder_name: String,
    pub guid: Guid,
    pub generation_net_object_counts: Vec<i32>,
    pub fully_loaded: bool,
}

/// Objects every store starts with.
#[derive(Debug, Clone, Copy)]
pub struct CoreObjects {
    pub package: ObjectId,
    pub object_class: ObjectId,
    pub class_class: ObjectId,
    pub package_class: ObjectId,
    pub redirector_class: ObjectId,
}

/// Well-known names interned at startup.
#[derive(Debug, Clone, Copy)]
pub struct CoreNames {
    pub core: Name,
    pub object: Name,
    pub class: Name,
    pub package: Name,
    pub redirector: Name,
    pub destination: Name,
}

/// Owns every object and indexes them by `(outer, name)`.
pub struct ObjectStore {
    names: Arc<NameTable>,
    objects: Vec<ObjectRecord>,
    lookup: HashMap<(Option<ObjectId>, Name), SmallVec<[ObjectId; 1]>>,
    packages: HashMap<ObjectId, PackageInfo>,
    core: CoreObjects,
    core_names: CoreNames,
}

impl ObjectStore {
    /// Store holding the intrinsic `Core` package and its classes.
    pub fn new(names: Arc<NameTable>) -> Self {
        let core_names = CoreNames {
            core: names.intern_or_add("Core"),
            object: names.intern_or_add("Object"),
            class: names.intern_or_add("Class"),
            package: names.intern_or_add("Package"),
            redirector: names.intern_or_add("ObjectRedirector"),
            destination: names.intern_or_add("DestinationObject"),
        };
        let placeholder = ObjectId(0);
        let mut store = Self {
            names,
            objects: Vec::new(),
            lookup: HashMap::new(),
            packages: HashMap::new(),
            core: CoreObjects {
                package: placeholder,
                object_class: placeholder,
                class_class: placeholder,
                package_class: placeholder,
                redirector_class: placeholder,
            },
            core_names,
        };

        let native = ObjectFlags::NATIVE | ObjectFlags::PUBLIC | ObjectFlags::STANDALONE;
        let core = store.allocate(core_names.core, None, None, native);
        let class_class = store.allocate(core_names.class, Some(core), None, native);
        let object_class = store.allocate(core_names.object, Some(core), Some(class_class), native);
        let package_class = store.allocate(core_names.package, Some(core), Some(class_class), native);
        let redirector_class = store.allocate(core_names.redirector, Some(core), Some(class_class), native);
        store.objects[class_class.index()].class = Some(class_class);
        store.objects[class_class.index()].super_struct = Some(object_class);
        store.objects[core.index()].class = Some(package_class);
        for class in [package_class, redirector_class] {
            store.objects[class.index()].super_struct = Some(object_class);
        }
        store.objects[object_class.index()].serializer = Some(Arc::new(DefaultSerializer));
        store.objects[redirector_class.index()].serializer =
            Some(Arc::new(RedirectorSerializer::new(core_names.destination)));
        store.packages.insert(core, PackageInfo { fully_loaded: true, ..Default::default() });
        store.core = CoreObjects { package: core, object_class, class_class, package_class, redirector_class };
        store
    }

    #[inline]
    pub fn names(&self) -> &Arc<NameTable> {
        &self.names
    }

    #[inline]
    pub fn core(&self) -> &CoreObjects {
        &self.core
    }

    #[inline]
    pub fn core_names(&self) -> &CoreNames {
        &self.core_names
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    #[inline]
    pub fn get(&self, id: ObjectId) -> Option<&ObjectRecord> {
        self.objects.get(id.index())
    }

    #[inline]
    pub fn get_mut(&mut self, id: ObjectId) -> Option<&mut ObjectRecord> {
        self.objects.get_mut(id.index())
    }

    pub fn iter(&self) -> impl Iterator<Item = (ObjectId, &ObjectRecord)> {
        self.objects.iter().enumerate().map(|(i, r)| (ObjectId::from_index(i), r))
    }

    /// Create a new object. Identity is not checked.
    pub fn allocate(
        &mut self,
        name: Name,
        outer: Option<ObjectId>,
        class: Option<ObjectId>,
        flags: ObjectFlags,
    ) -> ObjectId {
        let id = ObjectId::from_index(self.objects.len());
        self.objects.push(ObjectRecord {
            name,
            outer,
            class,
            archetype: None,
            super_struct: None,
            flags,
            linker: None,
            properties: PropertyBag::new(),
            binary: Vec::new(),
            serializer: None,
        });
        self.lookup.entry((outer, name)).or_default().push(id);
        id
    }

    /// All objects named `name` directly inside `outer`.
    pub fn find_all(&self, outer: Option<ObjectId>, name: Name) -> &[ObjectId] {
        self.lookup.get(&(outer, name)).map_or(&[], |ids| ids.as_slice())
    }

    /// Identity lookup. `class_name` and `class_package` narrow the match
    /// when given.
    pub fn find_object(
        &self,
        outer: Option<ObjectId>,
        name: Name,
        class_name: Option<Name>,
        class_package: Option<Name>,
    ) -> Option<ObjectId> {
        self.find_all(outer, name).iter().copied().find(|&id| {
            let class = self.get(id).and_then(|r| r.class);
            let class_record = class.and_then(|c| self.get(c));
            let name_ok = class_name.is_none_or(|n| class_record.is_some_and(|c| c.name == n));
            let package_ok = class_package
                .is_none_or(|p| class.and_then(|c| self.outermost_name(c)) == Some(p));
            name_ok && package_ok
        })
    }

    /// Top-level package by name.
    pub fn find_package(&self, name: Name) -> Option<ObjectId> {
        self.find_object(None, name, Some(self.core_names.package), None)
    }

    /// Find or create a top-level package.
    pub fn create_package(&mut self, name: Name) -> ObjectId {
        if let Some(id) = self.find_package(name) {
            return id;
        }
        let id = self.allocate(name, None, Some(self.core.package_class), ObjectFlags::PUBLIC);
        self.packages.insert(id, PackageInfo::default());
        id
    }

    pub fn is_package(&self, id: ObjectId) -> bool {
        self.packages.contains_key(&id)
    }

    pub fn package_info(&self, id: ObjectId) -> Option<&PackageInfo> {
        self.packages.get(&id)
    }

    pub fn package_info_mut(&mut self, id: ObjectId) -> Option<&mut PackageInfo> {
        self.packages.get_mut(&id)
    }

    /// Register a class implemented in code. `super_class` defaults to `Core.Object`.
    pub fn register_native_class(
        &mut self,
        package: &str,
        name: &str,
        super_class: Option<ObjectId>,
        serializer: Arc<dyn ClassSerializer>,
    ) -> Result<ObjectId> {
        let package_name = self.names.try_intern(package)?;
        let class_name = self.names.try_intern(name)?;
        let package = self.create_package(package_name);
        if let Some(existing) = self.find_object(Some(package), class_name, Some(self.core_names.class), None) {
            return Err(Error::other(format!("class {} already registered", self.path_name(existing))));
        }
        let flags = ObjectFlags::NATIVE | ObjectFlags::PUBLIC | ObjectFlags::STANDALONE;
        let class = self.allocate(class_name, Some(package), Some(self.core.class_class), flags);
        let record = &mut self.objects[class.index()];
        record.super_struct = Some(super_class.unwrap_or(self.core.object_class));
        record.serializer = Some(serializer);
        Ok(class)
    }

    /// Outermost object (the package), or `id` itself at top level.
    pub fn outermost(&self, id: ObjectId) -> ObjectId {
        let mut current = id;
        while let Some(outer) = self.get(current).and_then(|r| r.outer) {
            current = outer;
        }
        current
    }

    fn outermost_name(&self, id: ObjectId) -> Option<Name> {
        self.get(self.outermost(id)).map(|r| r.name)
    }

    /// Dotted path from the package down, e.g. `Pkg.Group.Object`.
    pub fn path_name(&self, id: ObjectId) -> String {
        let mut parts = Vec::new();
        let mut current = Some(id);
        while let Some(cur) = current {
            match self.get(cur) {
                Some(record) => {
                    parts.push(self.names.resolve(record.name));
                    current = record.outer;
                }
                None => {
                    parts.push(format!("<bad object {}>", cur.index()));
                    break;
                }
            }
        }
        parts.reverse();
        parts.join(".")
    }

    /// Find an object by dotted path.
    pub fn find_by_path(&self, path: &str) -> Option<ObjectId> {
        let mut outer = None;
        for part in path.split('.') {
            let name = self.names.intern_or_find(part)?;
            outer = Some(*self.find_all(outer, name).first()?);
        }
        outer
    }

    /// Whether `class` is `ancestor` or derives from it.
    pub fn is_child_of(&self, class: ObjectId, ancestor: ObjectId) -> bool {
        let mut current = Some(class);
        let mut depth = 0;
        while let Some(cur) = current {
            if cur == ancestor {
                return true;
            }
            depth += 1;
            if depth > self.objects.len() {
                return false;
            }
            current = self.get(cur).and_then(|r| r.super_struct);
        }
        false
    }

    /// Serializer of the nearest class in the super chain that registered one.
    pub fn serializer_for(&self, class: Option<ObjectId>) -> Arc<dyn ClassSerializer> {
        let mut current = class;
        let mut depth = 0;
        while let Some(cur) = current {
            let Some(record) = self.get(cur) else { break };
            if let Some(serializer) = &record.serializer {
                return serializer.clone();
            }
            depth += 1;
            if depth > self.objects.len() {
                break;
            }
            current = record.super_struct;
        }
        Arc::new(DefaultSerializer)
    }

    /// Destination of a loaded redirector.
    pub fn redirector_destination(&self, redirector: ObjectId) -> Option<ObjectId> {
        self.get(redirector)?.properties.get_object(self.core_names.destination)
    }

    /// Class name of an object.
    pub fn class_name(&self, id: ObjectId) -> Option<Name> {
        let class = self.get(id)?.class?;
        Some(self.get(class)?.name)
    }

    /// Objects whose outermost package is `package`, in creation order.
    pub fn objects_in(&self, package: ObjectId) -> Vec<ObjectId> {
        self.iter()
            .map(|(id, _)| id)
            .filter(|&id| id != package && self.outermost(id) == package)
            .collect()
    }
}
