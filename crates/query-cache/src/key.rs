//! Composite cache keys

use ahash::AHasher;
use query_core::Value;
use std::fmt;
use std::hash::{Hash, Hasher};

const DEFAULT_MULTIPLIER: u64 = 37;
const DEFAULT_HASHCODE: u64 = 17;

/// Ordered identity of one query invocation: statement id, row bounds,
/// rendered SQL, each non-output parameter value and the environment id.
///
/// The hash code is a running hash updated on every [`CacheKey::update`], so
/// a key must not be updated once it has been used to store a value.
#[derive(Clone)]
pub struct CacheKey {
    multiplier: u64,
    hashcode: u64,
    checksum: u64,
    components: Vec<Value>,
}

impl CacheKey {
    /// Create an empty key
    pub fn new() -> Self {
        Self {
            multiplier: DEFAULT_MULTIPLIER,
            hashcode: DEFAULT_HASHCODE,
            checksum: 0,
            components: Vec::new(),
        }
    }

    /// Build a key from components in order
    pub fn from_components<I, V>(components: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let mut key = Self::new();
        for component in components {
            key.update(component);
        }
        key
    }

    /// Append a component and fold it into the running hash
    pub fn update(&mut self, component: impl Into<Value>) {
        let component = component.into();
        let count = self.components.len() as u64 + 1;
        let mut base = component_hash(&component);

        self.checksum = self.checksum.wrapping_add(base);
        base = base.wrapping_mul(count);
        self.hashcode = self
            .multiplier
            .wrapping_mul(self.hashcode)
            .wrapping_add(base);

        self.components.push(component);
    }

    /// Append each component in order
    pub fn update_all<I, V>(&mut self, components: I)
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        for component in components {
            self.update(component);
        }
    }

    /// Number of components folded in so far
    pub fn update_count(&self) -> usize {
        self.components.len()
    }

    /// Get the components
    pub fn components(&self) -> &[Value] {
        &self.components
    }

    /// Running hash. Equal keys have equal hashcodes; the reverse does not hold.
    pub fn hashcode(&self) -> u64 {
        self.hashcode
    }
}

impl Default for CacheKey {
    fn default() -> Self {
        Self::new()
    }
}

fn component_hash(value: &Value) -> u64 {
    if value.is_null() {
        return 1;
    }
    let mut hasher = AHasher::default();
    value.hash(&mut hasher);
    hasher.finish()
}

impl PartialEq for CacheKey {
    fn eq(&self, other: &Self) -> bool {
        if std::ptr::eq(self, other) {
            return true;
        }
        // Cheap rejections first, then element-wise comparison.
        self.hashcode == other.hashcode
            && self.checksum == other.checksum
            && self.components.len() == other.components.len()
            && self.components == other.components
    }
}

impl Eq for CacheKey {}

impl Hash for CacheKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hashcode);
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.hashcode, self.checksum)?;
        for component in &self.components {
            write!(f, ":{}", component)?;
        }
        Ok(())
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CacheKey({})", self)
    }
}
