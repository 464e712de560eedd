//! Component identity and the per-store name registry.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Size of a [`ComponentId`] in its journal encoding.
pub const COMPONENT_ID_LEN: usize = 20;

/// Stable identity of a transactional component.
///
/// A component id pairs a 128-bit base with a small integer. The journal
/// stores it with every redo entry so that recovery can route the entry back
/// to the component that wrote it.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ComponentId {
    base: Uuid,
    index: u32,
}

impl ComponentId {
    /// Creates a component id from its two parts.
    #[must_use]
    pub const fn new(base: Uuid, index: u32) -> Self {
        Self { base, index }
    }

    /// Derives an id from a store base and a per-unit discriminator.
    ///
    /// The low 32 bits of `base` are xor-ed with `discriminator`, so two
    /// stores built from the same base but different discriminators never
    /// share ids.
    #[must_use]
    pub fn alloc(base: Uuid, discriminator: u32, index: u32) -> Self {
        let mut bytes = base.into_bytes();
        let mut low = [0u8; 4];
        low.copy_from_slice(&bytes[12..16]);
        let mixed = u32::from_be_bytes(low) ^ discriminator;
        bytes[12..16].copy_from_slice(&mixed.to_be_bytes());
        Self::new(Uuid::from_bytes(bytes), index)
    }

    /// Returns the 128-bit base.
    #[must_use]
    pub const fn base(&self) -> Uuid {
        self.base
    }

    /// Returns the integer part.
    #[must_use]
    pub const fn index(&self) -> u32 {
        self.index
    }

    /// Encodes the id for the journal (16 byte base, then little-endian index).
    #[must_use]
    pub fn to_bytes(&self) -> [u8; COMPONENT_ID_LEN] {
        let mut out = [0u8; COMPONENT_ID_LEN];
        out[..16].copy_from_slice(self.base.as_bytes());
        out[16..].copy_from_slice(&self.index.to_le_bytes());
        out
    }

    /// Decodes an id; returns `None` unless `bytes` is exactly 20 bytes long.
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != COMPONENT_ID_LEN {
            return None;
        }
        let base = Uuid::from_slice(&bytes[..16]).ok()?;
        let index = u32::from_le_bytes(bytes[16..].try_into().ok()?);
        Some(Self::new(base, index))
    }
}

impl fmt::Debug for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ComponentId({}/{})", self.base, self.index)
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.index)
    }
}

#[derive(Debug, Default)]
struct RegistryState {
    /// Unit name -> registered integer.
    names: HashMap<String, u32>,
    /// Registered integer -> unit name (to spot duplicates).
    indexes: HashMap<u32, String>,
    /// (name, discriminator) -> previously allocated id.
    allocated: HashMap<(String, u32), ComponentId>,
}

/// Per-store table of logical unit names and the ids allocated for them.
///
/// One registry is built for each store and passed to the code that builds
/// its components. Double registration and double allocation are tolerated:
/// they are logged and the first answer is kept, so rebuild paths may run
/// twice.
///
/// ```rust
/// use quadb_core::ComponentIdRegistry;
/// use uuid::Uuid;
///
/// let registry = ComponentIdRegistry::new(Uuid::nil());
/// registry.register_name(1, "SPO");
/// let spo = registry.alloc("SPO", 0);
/// assert_eq!(spo.index(), 1);
/// assert_eq!(registry.alloc("SPO", 0), spo);
/// ```
#[derive(Debug)]
pub struct ComponentIdRegistry {
    base: Uuid,
    state: Mutex<RegistryState>,
}

impl ComponentIdRegistry {
    /// Creates an empty registry for a store whose ids derive from `base`.
    #[must_use]
    pub fn new(base: Uuid) -> Self {
        Self {
            base,
            state: Mutex::new(RegistryState::default()),
        }
    }

    /// Returns the base all ids of this registry derive from.
    #[must_use]
    pub fn base(&self) -> Uuid {
        self.base
    }

    /// Associates a fixed integer with a unit name.
    ///
    /// Returns `false` (after logging) if the name or the integer is already
    /// taken; the earlier mapping stays in force.
    pub fn register_name(&self, index: u32, name: &str) -> bool {
        let mut state = self.state.lock();
        if let Some(existing) = state.names.get(name) {
            error!(name, index, existing, "component name already registered");
            return false;
        }
        if let Some(owner) = state.indexes.get(&index) {
            error!(name, index, owner = owner.as_str(), "component index already registered");
            return false;
        }
        state.names.insert(name.to_string(), index);
        state.indexes.insert(index, name.to_string());
        true
    }

    /// Returns the integer registered for `name`, if any.
    #[must_use]
    pub fn index_of(&self, name: &str) -> Option<u32> {
        self.state.lock().names.get(name).copied()
    }

    /// Allocates the id of a logical unit.
    ///
    /// Names that were never registered get the next unused integer.
    /// Allocating the same `(name, discriminator)` twice logs a warning and
    /// returns the id handed out the first time.
    pub fn alloc(&self, name: &str, discriminator: u32) -> ComponentId {
        let mut state = self.state.lock();
        let key = (name.to_string(), discriminator);
        if let Some(id) = state.allocated.get(&key) {
            warn!(name, discriminator, %id, "component id allocated twice");
            return *id;
        }

        let index = match state.names.get(name) {
            Some(index) => *index,
            None => {
                let next = state.indexes.keys().max().map_or(1, |max| max + 1);
                debug!(name, index = next, "auto-registering component name");
                state.names.insert(name.to_string(), next);
                state.indexes.insert(next, name.to_string());
                next
            }
        };

        let id = ComponentId::alloc(self.base, discriminator, index);
        state.allocated.insert(key, id);
        id
    }
}
