// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Loaded module bookkeeping
//!
//! Modules live in an arena owned by [`ModuleTable`] and refer to each other
//! by [`ModuleId`]. An ELF or Mach-O module can contain PE modules (a builtin
//! DLL is both), which is recorded as a container link.

use core::fmt;

/// Binary format of a module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleKind {
    Elf,
    MachO,
    Pe,
    /// 16-bit Windows module
    Ne,
}

impl fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModuleKind::Elf => write!(f, "ELF"),
            ModuleKind::MachO => write!(f, "Mach-O"),
            ModuleKind::Pe => write!(f, "PE"),
            ModuleKind::Ne => write!(f, "NE"),
        }
    }
}

/// Debug information load state (DIL)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbgInfoLoad {
    /// Not loaded yet, will be loaded on first use
    Deferred,
    /// Loaded successfully
    Loaded,
    /// The module carries no debug information
    NoInfo,
    /// Loading was attempted and failed
    Failed,
}

impl fmt::Display for DbgInfoLoad {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DbgInfoLoad::Deferred => write!(f, "deferred"),
            DbgInfoLoad::Loaded => write!(f, "loaded"),
            DbgInfoLoad::NoInfo => write!(f, "none"),
            DbgInfoLoad::Failed => write!(f, "failed"),
        }
    }
}

/// Index of a module in its [`ModuleTable`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ModuleId(usize);

impl ModuleId {
    pub const fn index(&self) -> usize {
        self.0
    }
}

/// A module known to the process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Module {
    /// Path or name the module was registered with
    pub name: String,
    pub kind: ModuleKind,
    /// Load address, also used as the module handle
    pub base: u64,
    pub size: u64,
    pub debug_state: DbgInfoLoad,
    /// Module whose mapping contains this one
    pub container: Option<ModuleId>,
}

impl Module {
    pub fn end(&self) -> u64 {
        self.base.saturating_add(self.size)
    }

    pub fn contains(&self, address: u64) -> bool {
        address >= self.base && address < self.end()
    }

    /// File name without its directory
    pub fn base_name(&self) -> &str {
        base_name(&self.name)
    }
}

fn base_name(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

/// Arena of modules with lookups by name, address and handle
#[derive(Debug, Default)]
pub struct ModuleTable {
    /// Removed modules leave a hole so that ids stay valid
    slots: Vec<Option<Module>>,
}

impl ModuleTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a module and return its id
    pub fn add(&mut self, name: &str, kind: ModuleKind, base: u64, size: u64) -> ModuleId {
        let id = ModuleId(self.slots.len());
        self.slots.push(Some(Module {
            name: name.to_string(),
            kind,
            base,
            size,
            debug_state: DbgInfoLoad::Deferred,
            container: None,
        }));
        id
    }

    /// Unregister a module; modules it contained lose their container link
    pub fn remove(&mut self, id: ModuleId) -> Option<Module> {
        let module = self.slots.get_mut(id.0)?.take()?;
        for other in self.slots.iter_mut().flatten() {
            if other.container == Some(id) {
                other.container = None;
            }
        }
        Some(module)
    }

    pub fn get(&self, id: ModuleId) -> Option<&Module> {
        self.slots.get(id.0)?.as_ref()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterate over live modules in registration order
    pub fn iter(&self) -> impl Iterator<Item = (ModuleId, &Module)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|module| (ModuleId(i), module)))
    }

    /// Find a module by file name, ignoring case and directories
    pub fn find_by_name(&self, name: &str) -> Option<ModuleId> {
        let wanted = base_name(name);
        self.iter()
            .find(|(_, module)| module.base_name().eq_ignore_ascii_case(wanted))
            .map(|(id, _)| id)
    }

    /// Find the module containing `address`
    ///
    /// Without a kind, PE modules win over the host modules that contain
    /// them, then ELF, Mach-O and NE are tried in that order.
    pub fn find_by_addr(&self, address: u64, kind: Option<ModuleKind>) -> Option<ModuleId> {
        match kind {
            Some(kind) => self
                .iter()
                .find(|(_, module)| module.kind == kind && module.contains(address))
                .map(|(id, _)| id),
            None => [
                ModuleKind::Pe,
                ModuleKind::Elf,
                ModuleKind::MachO,
                ModuleKind::Ne,
            ]
            .into_iter()
            .find_map(|kind| self.find_by_addr(address, Some(kind))),
        }
    }

    /// Find a module by its handle, which is its load address
    pub fn find_by_handle(&self, base: u64) -> Option<ModuleId> {
        self.iter()
            .find(|(_, module)| module.base == base)
            .map(|(id, _)| id)
    }

    /// Find a module of `kind` lying entirely inside `container`
    pub fn containee(&self, container: ModuleId, kind: ModuleKind) -> Option<ModuleId> {
        let outer = self.get(container)?;
        self.iter()
            .find(|(id, module)| {
                *id != container
                    && module.kind == kind
                    && module.base >= outer.base
                    && module.end() <= outer.end()
            })
            .map(|(id, _)| id)
    }

    /// Record that `inner` is mapped inside `container`
    pub fn set_container(&mut self, inner: ModuleId, container: ModuleId) -> bool {
        if inner == container || self.get(container).is_none() {
            return false;
        }
        match self.slots.get_mut(inner.0).and_then(Option::as_mut) {
            Some(module) => {
                module.container = Some(container);
                true
            }
            None => false,
        }
    }

    pub fn set_debug_state(&mut self, id: ModuleId, state: DbgInfoLoad) -> bool {
        match self.slots.get_mut(id.0).and_then(Option::as_mut) {
            Some(module) => {
                module.debug_state = state;
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> (ModuleTable, ModuleId, ModuleId, ModuleId) {
        let mut table = ModuleTable::new();
        let host = table.add("/usr/lib/wine/ntdll.so", ModuleKind::Elf, 0x7000_0000, 0x40_0000);
        let pe = table.add("ntdll.dll", ModuleKind::Pe, 0x7010_0000, 0x10_0000);
        let exe = table.add("C:\\windows\\notepad.exe", ModuleKind::Pe, 0x40_0000, 0x5_0000);
        (table, host, pe, exe)
    }

    #[test]
    fn test_find_by_name_ignores_case_and_path() {
        let (table, host, _, exe) = sample();
        assert_eq!(table.find_by_name("NTDLL.SO"), Some(host));
        assert_eq!(table.find_by_name("notepad.EXE"), Some(exe));
        assert_eq!(table.find_by_name("/tmp/notepad.exe"), Some(exe));
        assert_eq!(table.find_by_name("kernel32.dll"), None);
    }

    #[test]
    fn test_find_by_addr_prefers_pe() {
        let (table, host, pe, _) = sample();
        assert_eq!(table.find_by_addr(0x7010_0010, None), Some(pe));
        assert_eq!(table.find_by_addr(0x7010_0010, Some(ModuleKind::Elf)), Some(host));
        assert_eq!(table.find_by_addr(0x7000_0010, None), Some(host));
        assert_eq!(table.find_by_addr(0x1000, None), None);
    }

    #[test]
    fn test_find_by_handle() {
        let (table, _, _, exe) = sample();
        assert_eq!(table.find_by_handle(0x40_0000), Some(exe));
        assert_eq!(table.find_by_handle(0x40_1000), None);
    }

    #[test]
    fn test_containee_and_container() {
        let (mut table, host, pe, exe) = sample();
        assert_eq!(table.containee(host, ModuleKind::Pe), Some(pe));
        assert_eq!(table.containee(exe, ModuleKind::Pe), None);

        assert!(table.set_container(pe, host));
        assert_eq!(table.get(pe).unwrap().container, Some(host));

        table.remove(host);
        assert_eq!(table.get(pe).unwrap().container, None);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_ids_stay_valid_after_remove() {
        let (mut table, host, pe, exe) = sample();
        assert!(table.remove(pe).is_some());
        assert!(table.remove(pe).is_none());
        assert_eq!(table.get(host).unwrap().kind, ModuleKind::Elf);
        assert_eq!(table.get(exe).unwrap().base, 0x40_0000);
        assert!(!table.set_debug_state(pe, DbgInfoLoad::Loaded));
        assert!(table.set_debug_state(exe, DbgInfoLoad::NoInfo));
        assert_eq!(table.get(exe).unwrap().debug_state, DbgInfoLoad::NoInfo);
    }
}
