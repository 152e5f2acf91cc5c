//! Registry access boundary.
//!
//! Paths are relative to `HKEY_LOCAL_MACHINE` and use `\` separators.
//! [`MemoryRegistry`] backs tests and dry runs; [`WindowsRegistry`] talks to
//! the real registry through `winreg`.

use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::sync::{Mutex, PoisonError};

/// Typed registry value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegValue {
    /// `REG_SZ`
    String(String),
    /// `REG_MULTI_SZ`
    MultiString(Vec<String>),
    /// `REG_DWORD`
    Dword(u32),
}

impl RegValue {
    /// Flattens string values into a list. Multi-strings keep their order;
    /// a plain string is a one-element list.
    #[must_use]
    pub fn strings(&self) -> Vec<String> {
        match self {
            Self::String(s) => vec![s.clone()],
            Self::MultiString(v) => v.clone(),
            Self::Dword(_) => Vec::new(),
        }
    }

    /// Returns the value as a single string; multi-strings yield their
    /// first element.
    #[must_use]
    pub fn as_string(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            Self::MultiString(v) => v.first().map(String::as_str),
            Self::Dword(_) => None,
        }
    }

    #[must_use]
    pub const fn as_dword(&self) -> Option<u32> {
        match self {
            Self::Dword(d) => Some(*d),
            _ => None,
        }
    }
}

/// Minimal registry surface the Windows backend needs.
pub trait Registry {
    /// Names of the direct subkeys of `path`.
    ///
    /// # Errors
    ///
    /// `NotFound` if `path` does not exist.
    fn subkeys(&self, path: &str) -> io::Result<Vec<String>>;

    /// Reads a value. `Ok(None)` means the key exists but the value does not.
    ///
    /// # Errors
    ///
    /// `NotFound` if the key does not exist.
    fn value(&self, path: &str, name: &str) -> io::Result<Option<RegValue>>;

    /// Creates `path` (and missing parents).
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error.
    fn create_key(&self, path: &str) -> io::Result<()>;

    /// Writes a value on an existing key.
    ///
    /// # Errors
    ///
    /// `NotFound` if the key does not exist.
    fn set_value(&self, path: &str, name: &str, value: &RegValue) -> io::Result<()>;

    /// Deletes `path` and everything below it.
    ///
    /// # Errors
    ///
    /// `NotFound` if the key does not exist.
    fn delete_key(&self, path: &str) -> io::Result<()>;
}

impl<T: Registry + ?Sized> Registry for &T {
    fn subkeys(&self, path: &str) -> io::Result<Vec<String>> {
        (**self).subkeys(path)
    }
    fn value(&self, path: &str, name: &str) -> io::Result<Option<RegValue>> {
        (**self).value(path, name)
    }
    fn create_key(&self, path: &str) -> io::Result<()> {
        (**self).create_key(path)
    }
    fn set_value(&self, path: &str, name: &str, value: &RegValue) -> io::Result<()> {
        (**self).set_value(path, name, value)
    }
    fn delete_key(&self, path: &str) -> io::Result<()> {
        (**self).delete_key(path)
    }
}

/// Joins registry path components with `\`.
#[must_use]
pub fn join(parent: &str, child: &str) -> String {
    format!("{}\\{child}", parent.trim_end_matches('\\'))
}

/// In-memory registry tree.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    keys: Mutex<BTreeMap<String, BTreeMap<String, RegValue>>>,
}

impl MemoryRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if `path` exists.
    #[must_use]
    pub fn contains_key(&self, path: &str) -> bool {
        self.lock().contains_key(&canonical(path))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, BTreeMap<String, RegValue>>> {
        self.keys.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn canonical(path: &str) -> String {
    path.trim_matches('\\').to_string()
}

fn not_found(path: &str) -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, format!("registry key not found: {path}"))
}

impl Registry for MemoryRegistry {
    fn subkeys(&self, path: &str) -> io::Result<Vec<String>> {
        let path = canonical(path);
        let keys = self.lock();
        let prefix = format!("{path}\\");
        let children: BTreeSet<&str> = keys
            .keys()
            .filter_map(|k| k.strip_prefix(&prefix))
            .filter_map(|rest| rest.split('\\').next())
            .collect();
        if children.is_empty() && !keys.contains_key(&path) {
            return Err(not_found(&path));
        }
        Ok(children.into_iter().map(str::to_string).collect())
    }

    fn value(&self, path: &str, name: &str) -> io::Result<Option<RegValue>> {
        let path = canonical(path);
        self.lock()
            .get(&path)
            .map(|values| values.get(name).cloned())
            .ok_or_else(|| not_found(&path))
    }

    fn create_key(&self, path: &str) -> io::Result<()> {
        self.lock().entry(canonical(path)).or_default();
        Ok(())
    }

    fn set_value(&self, path: &str, name: &str, value: &RegValue) -> io::Result<()> {
        let path = canonical(path);
        let mut keys = self.lock();
        let values = keys.get_mut(&path).ok_or_else(|| not_found(&path))?;
        values.insert(name.to_string(), value.clone());
        Ok(())
    }

    fn delete_key(&self, path: &str) -> io::Result<()> {
        let path = canonical(path);
        let prefix = format!("{path}\\");
        let mut keys = self.lock();
        if !keys.contains_key(&path) {
            return Err(not_found(&path));
        }
        keys.retain(|k, _| k != &path && !k.starts_with(&prefix));
        Ok(())
    }
}

#[cfg(windows)]
pub use self::windows::WindowsRegistry;

#[cfg(windows)]
mod windows {
    use std::io;

    use winreg::enums::{HKEY_LOCAL_MACHINE, KEY_ALL_ACCESS, KEY_READ, RegType};
    use winreg::RegKey;

    use super::{RegValue, Registry};

    /// `HKEY_LOCAL_MACHINE` accessed through `winreg`.
    #[derive(Debug, Default)]
    pub struct WindowsRegistry;

    impl WindowsRegistry {
        #[must_use]
        pub const fn new() -> Self {
            Self
        }

        fn open(path: &str, flags: u32) -> io::Result<RegKey> {
            RegKey::predef(HKEY_LOCAL_MACHINE).open_subkey_with_flags(path, flags)
        }
    }

    impl Registry for WindowsRegistry {
        fn subkeys(&self, path: &str) -> io::Result<Vec<String>> {
            Self::open(path, KEY_READ)?.enum_keys().collect()
        }

        fn value(&self, path: &str, name: &str) -> io::Result<Option<RegValue>> {
            let key = Self::open(path, KEY_READ)?;
            let raw = match key.get_raw_value(name) {
                Ok(raw) => raw,
                Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
                Err(e) => return Err(e),
            };
            let value = match raw.vtype {
                RegType::REG_DWORD => RegValue::Dword(key.get_value(name)?),
                RegType::REG_MULTI_SZ => RegValue::MultiString(key.get_value(name)?),
                _ => RegValue::String(key.get_value(name)?),
            };
            Ok(Some(value))
        }

        fn create_key(&self, path: &str) -> io::Result<()> {
            RegKey::predef(HKEY_LOCAL_MACHINE).create_subkey(path)?;
            Ok(())
        }

        fn set_value(&self, path: &str, name: &str, value: &RegValue) -> io::Result<()> {
            let key = Self::open(path, KEY_ALL_ACCESS)?;
            match value {
                RegValue::String(s) => key.set_value(name, s),
                RegValue::MultiString(v) => key.set_value(name, v),
                RegValue::Dword(d) => key.set_value(name, d),
            }
        }

        fn delete_key(&self, path: &str) -> io::Result<()> {
            RegKey::predef(HKEY_LOCAL_MACHINE).delete_subkey_all(path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subkeys_lists_direct_children_once() {
        let reg = MemoryRegistry::new();
        reg.create_key(r"A\B\one").unwrap();
        reg.create_key(r"A\B\two\deep").unwrap();
        reg.create_key(r"A\B\two").unwrap();

        assert_eq!(reg.subkeys(r"A\B").unwrap(), vec!["one", "two"]);
        assert_eq!(reg.subkeys(r"A").unwrap(), vec!["B"]);
        assert!(reg.subkeys(r"missing").is_err());
    }

    #[test]
    fn values_round_trip_and_absent_value_is_none() {
        let reg = MemoryRegistry::new();
        reg.create_key(r"K").unwrap();
        reg.set_value(r"K", "Comment", &RegValue::String("x".into()))
            .unwrap();

        assert_eq!(
            reg.value(r"K", "Comment").unwrap(),
            Some(RegValue::String("x".into()))
        );
        assert_eq!(reg.value(r"K", "Other").unwrap(), None);
        assert!(reg.value(r"Nope", "Comment").is_err());
        assert!(reg.set_value(r"Nope", "v", &RegValue::Dword(1)).is_err());
    }

    #[test]
    fn delete_removes_subtree() {
        let reg = MemoryRegistry::new();
        reg.create_key(r"P\rule").unwrap();
        reg.create_key(r"P\rule\child").unwrap();
        reg.create_key(r"P\ruleish").unwrap();

        reg.delete_key(r"P\rule").unwrap();
        assert!(!reg.contains_key(r"P\rule"));
        assert!(!reg.contains_key(r"P\rule\child"));
        assert!(reg.contains_key(r"P\ruleish"));
        assert!(reg.delete_key(r"P\rule").is_err());
    }

    #[test]
    fn reg_value_accessors() {
        let multi = RegValue::MultiString(vec!["10.0.0.1".into(), "10.0.0.9".into()]);
        assert_eq!(multi.as_string(), Some("10.0.0.1"));
        assert_eq!(multi.strings().len(), 2);
        assert_eq!(RegValue::Dword(1).as_dword(), Some(1));
        assert_eq!(RegValue::Dword(1).as_string(), None);
    }
}
