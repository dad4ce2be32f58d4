//! Name-based lookup of buses.
//!
//! Transports register an opener per bus they can reach; consumers open
//! buses by name, alias or number without knowing the transport. A
//! [`Registry`] is an ordinary value: create one at startup and pass it to
//! whoever registers or opens buses.

use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    sync::{Arc, Mutex, MutexGuard},
};

use crate::{BusCloser, Error};

pub type Opener = dyn Fn() -> Result<Box<dyn BusCloser>, Error> + Send + Sync;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("bus name must not be empty")]
    EmptyName,

    #[error("bus name {0:?} must not be a number")]
    NumericName(String),

    #[error("bus {0:?} is already registered")]
    Duplicate(String),

    #[error("alias {alias:?} conflicts with an existing bus or alias")]
    AliasConflict { alias: String },

    #[error("bus number {0} is already registered")]
    NumberConflict(u32),

    #[error("no bus registered as {0:?}")]
    NotFound(String),

    #[error("no bus registered")]
    Empty,

    #[error(transparent)]
    Open(#[from] Error),
}

/// A registered bus.
#[derive(Clone)]
pub struct Ref {
    pub name: String,
    pub aliases: Vec<String>,
    pub number: Option<u32>,
    opener: Arc<Opener>,
}

impl Ref {
    pub fn open(&self) -> Result<Box<dyn BusCloser>, Error> {
        (self.opener)()
    }
}

impl fmt::Debug for Ref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ref")
            .field("name", &self.name)
            .field("aliases", &self.aliases)
            .field("number", &self.number)
            .finish()
    }
}

#[derive(Default)]
struct Entries {
    by_name: HashMap<String, Ref>,
    by_alias: HashMap<String, String>,
    by_number: BTreeMap<u32, String>,
}

#[derive(Default)]
pub struct Registry {
    entries: Mutex<Entries>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Entries> {
        // entries are only mutated after validation
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Registers a bus opener.
    ///
    /// Names and aliases share one namespace and must not parse as numbers,
    /// which are reserved for lookups by `number`.
    pub fn register<F>(
        &self,
        name: &str,
        aliases: &[&str],
        number: Option<u32>,
        opener: F,
    ) -> Result<(), RegistryError>
    where
        F: Fn() -> Result<Box<dyn BusCloser>, Error> + Send + Sync + 'static,
    {
        validate_name(name)?;
        for alias in aliases {
            validate_name(alias)?;
        }

        let mut entries = self.lock();
        if entries.by_name.contains_key(name) || entries.by_alias.contains_key(name) {
            return Err(RegistryError::Duplicate(name.to_string()));
        }
        for (i, alias) in aliases.iter().enumerate() {
            let taken = entries.by_name.contains_key(*alias)
                || entries.by_alias.contains_key(*alias)
                || *alias == name
                || aliases[..i].contains(alias);
            if taken {
                return Err(RegistryError::AliasConflict {
                    alias: alias.to_string(),
                });
            }
        }
        if let Some(n) = number {
            if entries.by_number.contains_key(&n) {
                return Err(RegistryError::NumberConflict(n));
            }
            entries.by_number.insert(n, name.to_string());
        }
        for alias in aliases {
            entries.by_alias.insert(alias.to_string(), name.to_string());
        }
        entries.by_name.insert(
            name.to_string(),
            Ref {
                name: name.to_string(),
                aliases: aliases.iter().map(|a| a.to_string()).collect(),
                number,
                opener: Arc::new(opener),
            },
        );
        Ok(())
    }

    pub fn unregister(&self, name: &str) -> Result<(), RegistryError> {
        let mut entries = self.lock();
        let r = entries
            .by_name
            .remove(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        for alias in &r.aliases {
            entries.by_alias.remove(alias);
        }
        if let Some(n) = r.number {
            entries.by_number.remove(&n);
        }
        Ok(())
    }

    /// Finds a registered bus.
    ///
    /// An empty name picks the bus with the lowest number, or the first by
    /// name when none is numbered. A numeric name is looked up by number,
    /// anything else by name then alias.
    pub fn find(&self, name: &str) -> Result<Ref, RegistryError> {
        let entries = self.lock();
        let target = if name.is_empty() {
            match entries.by_number.values().next() {
                Some(n) => n.clone(),
                None => entries
                    .by_name
                    .keys()
                    .min()
                    .cloned()
                    .ok_or(RegistryError::Empty)?,
            }
        } else if let Ok(n) = name.parse::<u32>() {
            entries
                .by_number
                .get(&n)
                .cloned()
                .ok_or_else(|| RegistryError::NotFound(name.to_string()))?
        } else if let Some(real) = entries.by_alias.get(name) {
            real.clone()
        } else {
            name.to_string()
        };
        entries
            .by_name
            .get(&target)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    /// Opens a bus, see [`Registry::find`] for how `name` is resolved.
    ///
    /// The opener runs without the registry locked.
    pub fn open(&self, name: &str) -> Result<Box<dyn BusCloser>, RegistryError> {
        let r = self.find(name)?;
        Ok(r.open()?)
    }

    /// Every registered bus, numbered ones first in number order, then by name.
    pub fn all(&self) -> Vec<Ref> {
        let entries = self.lock();
        let mut refs: Vec<Ref> = entries.by_name.values().cloned().collect();
        refs.sort_by(|a, b| match (a.number, b.number) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => a.name.cmp(&b.name),
        });
        refs
    }
}

fn validate_name(name: &str) -> Result<(), RegistryError> {
    if name.is_empty() {
        return Err(RegistryError::EmptyName);
    }
    if name.parse::<u32>().is_ok() {
        return Err(RegistryError::NumericName(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Address, Bus, Pullup};

    struct NullBus;

    impl Bus for NullBus {
        fn tx(&self, _w: &[u8], _r: &mut [u8], _pull: Pullup) -> Result<(), Error> {
            Ok(())
        }

        fn search(&self, _alarm_only: bool) -> Result<Vec<Address>, Error> {
            Ok(vec![Address(0)])
        }
    }

    impl BusCloser for NullBus {
        fn close(&self) -> Result<(), Error> {
            Ok(())
        }
    }

    fn null() -> Result<Box<dyn BusCloser>, Error> {
        Ok(Box::new(NullBus))
    }

    #[test]
    fn lookup_by_name_alias_and_number() {
        let reg = Registry::new();
        reg.register("w1-netlink-2", &["bus-b"], Some(2), null).unwrap();
        reg.register("w1-netlink-1", &["bus-a"], Some(1), null).unwrap();

        assert_eq!(reg.find("w1-netlink-2").unwrap().name, "w1-netlink-2");
        assert_eq!(reg.find("bus-a").unwrap().name, "w1-netlink-1");
        assert_eq!(reg.find("2").unwrap().name, "w1-netlink-2");
        assert_eq!(reg.find("").unwrap().name, "w1-netlink-1");
        assert!(matches!(reg.find("3"), Err(RegistryError::NotFound(_))));
        assert!(matches!(reg.find("nope"), Err(RegistryError::NotFound(_))));

        let bus = reg.open("bus-b").unwrap();
        assert_eq!(bus.search(false).unwrap(), vec![Address(0)]);
    }

    #[test]
    fn conflicts_are_rejected() {
        let reg = Registry::new();
        reg.register("a", &["x"], Some(1), null).unwrap();

        assert!(matches!(
            reg.register("a", &[], None, null),
            Err(RegistryError::Duplicate(_))
        ));
        assert!(matches!(
            reg.register("x", &[], None, null),
            Err(RegistryError::Duplicate(_))
        ));
        assert!(matches!(
            reg.register("b", &["x"], None, null),
            Err(RegistryError::AliasConflict { .. })
        ));
        assert!(matches!(
            reg.register("b", &["y", "y"], None, null),
            Err(RegistryError::AliasConflict { .. })
        ));
        assert!(matches!(
            reg.register("b", &[], Some(1), null),
            Err(RegistryError::NumberConflict(1))
        ));
        assert!(matches!(
            reg.register("", &[], None, null),
            Err(RegistryError::EmptyName)
        ));
        assert!(matches!(
            reg.register("12", &[], None, null),
            Err(RegistryError::NumericName(_))
        ));
        // failed registrations leave nothing behind
        reg.register("b", &["y"], Some(2), null).unwrap();
        assert_eq!(reg.all().len(), 2);
    }

    #[test]
    fn unregister_frees_name_alias_and_number() {
        let reg = Registry::new();
        reg.register("a", &["x"], Some(1), null).unwrap();
        reg.unregister("a").unwrap();
        assert!(matches!(reg.find(""), Err(RegistryError::Empty)));
        assert!(matches!(reg.unregister("a"), Err(RegistryError::NotFound(_))));
        reg.register("x", &["a"], Some(1), null).unwrap();
    }

    #[test]
    fn all_orders_numbered_first() {
        let reg = Registry::new();
        reg.register("zeta", &[], None, null).unwrap();
        reg.register("beta", &[], Some(9), null).unwrap();
        reg.register("alpha", &[], None, null).unwrap();
        reg.register("gamma", &[], Some(3), null).unwrap();
        let names: Vec<_> = reg.all().into_iter().map(|r| r.name).collect();
        assert_eq!(names, ["gamma", "beta", "alpha", "zeta"]);
    }

    #[test]
    fn opener_errors_surface() {
        let reg = Registry::new();
        reg.register("broken", &[], None, || Err(Error::NoDevices)).unwrap();
        assert!(matches!(
            reg.open("broken"),
            Err(RegistryError::Open(Error::NoDevices))
        ));
    }
}
