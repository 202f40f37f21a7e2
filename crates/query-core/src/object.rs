//! Parameter and result objects
//!
//! Both are shared handles: cloning a [`ParameterObject`] or [`ResultObject`]
//! yields another handle to the same underlying state. Executors rely on this
//! to write generated keys and output parameters back into the caller's
//! parameter object, and to populate deferred properties of result objects
//! after they have been handed out.

use crate::error::{QueryError, Result};
use crate::types::{Row, Value};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::{Arc, Weak};

#[derive(Debug, Clone, Default, PartialEq)]
enum ParameterState {
    #[default]
    Null,
    Scalar(Value),
    Record(BTreeMap<String, Value>),
}

/// The caller-supplied parameter of a statement invocation.
///
/// A scalar parameter answers every property lookup with itself, so a
/// statement taking a single id can name its placeholder anything.
#[derive(Clone, Default)]
pub struct ParameterObject {
    state: Arc<RwLock<ParameterState>>,
}

impl ParameterObject {
    /// Create a null parameter
    pub fn null() -> Self {
        Self::default()
    }

    /// Create a parameter holding a single value
    pub fn scalar(value: impl Into<Value>) -> Self {
        Self::from_state(ParameterState::Scalar(value.into()))
    }

    /// Create a record parameter with no properties
    pub fn record() -> Self {
        Self::from_state(ParameterState::Record(BTreeMap::new()))
    }

    fn from_state(state: ParameterState) -> Self {
        Self {
            state: Arc::new(RwLock::new(state)),
        }
    }

    /// Builder-style property assignment; turns a null parameter into a record.
    pub fn with(self, property: impl Into<String>, value: impl Into<Value>) -> Self {
        {
            let mut state = self.state.write();
            if !matches!(*state, ParameterState::Record(_)) {
                *state = ParameterState::Record(BTreeMap::new());
            }
            if let ParameterState::Record(map) = &mut *state {
                map.insert(property.into(), value.into());
            }
        }
        self
    }

    /// Whether the parameter is null
    pub fn is_null(&self) -> bool {
        matches!(*self.state.read(), ParameterState::Null)
    }

    /// Whether the parameter is a single value
    pub fn is_scalar(&self) -> bool {
        matches!(*self.state.read(), ParameterState::Scalar(_))
    }

    /// Resolve a property. Missing properties and null parameters yield `Value::Null`.
    pub fn get(&self, property: &str) -> Value {
        match &*self.state.read() {
            ParameterState::Null => Value::Null,
            ParameterState::Scalar(value) => value.clone(),
            ParameterState::Record(map) => map.get(property).cloned().unwrap_or_default(),
        }
    }

    /// Write a property back into the parameter (output parameters, generated keys).
    pub fn set(&self, property: &str, value: Value) -> Result<()> {
        let mut state = self.state.write();
        match &mut *state {
            ParameterState::Scalar(_) => Err(QueryError::ExecutionError(format!(
                "Cannot set property '{}' on a scalar parameter",
                property
            ))),
            ParameterState::Null => {
                let mut map = BTreeMap::new();
                map.insert(property.to_string(), value);
                *state = ParameterState::Record(map);
                Ok(())
            }
            ParameterState::Record(map) => {
                map.insert(property.to_string(), value);
                Ok(())
            }
        }
    }

    /// Deep copy detached from this handle.
    pub fn snapshot(&self) -> ParameterObject {
        Self::from_state(self.state.read().clone())
    }

    /// True when both handles point at the same parameter.
    pub fn same_object(&self, other: &ParameterObject) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }
}

impl PartialEq for ParameterObject {
    fn eq(&self, other: &Self) -> bool {
        self.same_object(other) || *self.state.read() == *other.state.read()
    }
}

impl fmt::Debug for ParameterObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.state.read() {
            ParameterState::Null => write!(f, "ParameterObject(null)"),
            ParameterState::Scalar(value) => write!(f, "ParameterObject({:?})", value),
            ParameterState::Record(map) => f.debug_map().entries(map.iter()).finish(),
        }
    }
}

/// A property of a mapped result object.
#[derive(Debug, Clone, PartialEq)]
pub enum Property {
    Value(Value),
    Object(ResultObject),
    List(Vec<ResultObject>),
}

impl From<Value> for Property {
    fn from(value: Value) -> Self {
        Property::Value(value)
    }
}

type Properties = RwLock<BTreeMap<String, Slot>>;

/// Stored form of a [`Property`].
#[derive(Clone)]
enum Slot {
    Value(Value),
    Object(Link),
    List(Vec<Link>),
}

/// Edge to another result object. An edge that would close a cycle is held
/// weakly, so every graph has a strong spanning tree and is freed once the
/// last outside handle is dropped.
#[derive(Clone)]
enum Link {
    Strong(ResultObject),
    Weak(WeakResultObject),
}

impl Link {
    fn resolve(&self) -> Option<ResultObject> {
        match self {
            Link::Strong(object) => Some(object.clone()),
            Link::Weak(weak) => weak.upgrade(),
        }
    }
}

/// A mapped result. Equality is identity, since object graphs produced by
/// nested selects may be cyclic.
#[derive(Clone, Default)]
pub struct ResultObject {
    properties: Arc<Properties>,
}

/// Non-owning handle to a [`ResultObject`].
#[derive(Clone)]
pub struct WeakResultObject {
    properties: Weak<Properties>,
}

impl WeakResultObject {
    /// The object, if any strong handle to it is still alive.
    pub fn upgrade(&self) -> Option<ResultObject> {
        self.properties
            .upgrade()
            .map(|properties| ResultObject { properties })
    }
}

impl fmt::Debug for WeakResultObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WeakResultObject")
    }
}

impl ResultObject {
    /// Create an object with no properties
    pub fn new() -> Self {
        Self::default()
    }

    /// Flat mapping: one value property per column.
    pub fn from_row(row: &Row) -> Self {
        let properties = row
            .columns()
            .map(|(name, value)| (name.to_string(), Slot::Value(value.clone())))
            .collect();
        Self {
            properties: Arc::new(RwLock::new(properties)),
        }
    }

    /// Property by name. Linked objects that have already been dropped are
    /// left out.
    pub fn get(&self, name: &str) -> Option<Property> {
        match self.properties.read().get(name)? {
            Slot::Value(value) => Some(Property::Value(value.clone())),
            Slot::Object(link) => link.resolve().map(Property::Object),
            Slot::List(links) => Some(Property::List(
                links.iter().filter_map(Link::resolve).collect(),
            )),
        }
    }

    /// Scalar property value, `Value::Null` when absent or not a scalar.
    pub fn value(&self, name: &str) -> Value {
        match self.properties.read().get(name) {
            Some(Slot::Value(value)) => value.clone(),
            _ => Value::Null,
        }
    }

    /// Nested object under `name`
    pub fn object(&self, name: &str) -> Option<ResultObject> {
        match self.get(name)? {
            Property::Object(object) => Some(object),
            _ => None,
        }
    }

    /// Nested list under `name`
    pub fn list(&self, name: &str) -> Option<Vec<ResultObject>> {
        match self.get(name)? {
            Property::List(list) => Some(list),
            _ => None,
        }
    }

    /// Assign a property. Objects that already reach `self` are linked
    /// weakly.
    pub fn set(&self, name: impl Into<String>, property: impl Into<Property>) {
        // Links are classified before taking the write lock: the reachability
        // walk may read this object.
        let slot = match property.into() {
            Property::Value(value) => Slot::Value(value),
            Property::Object(object) => Slot::Object(self.link_to(object)),
            Property::List(list) => {
                Slot::List(list.into_iter().map(|object| self.link_to(object)).collect())
            }
        };
        self.properties.write().insert(name.into(), slot);
    }

    /// Whether `name` has been set, dead back-references included
    pub fn contains(&self, name: &str) -> bool {
        self.properties.read().contains_key(name)
    }

    /// Whether both handles point at the same object
    pub fn ptr_eq(&self, other: &ResultObject) -> bool {
        Arc::ptr_eq(&self.properties, &other.properties)
    }

    /// Handle that does not keep the object alive
    pub fn downgrade(&self) -> WeakResultObject {
        WeakResultObject {
            properties: Arc::downgrade(&self.properties),
        }
    }

    /// True when the property holds a weak back-reference.
    pub fn is_back_reference(&self, name: &str) -> bool {
        match self.properties.read().get(name) {
            Some(Slot::Object(Link::Weak(_))) => true,
            Some(Slot::List(links)) => links.iter().any(|l| matches!(l, Link::Weak(_))),
            _ => false,
        }
    }

    fn link_to(&self, target: ResultObject) -> Link {
        if target.reaches(self) {
            Link::Weak(target.downgrade())
        } else {
            Link::Strong(target)
        }
    }

    /// Depth-first walk over every live edge, starting at `self`.
    fn reaches(&self, other: &ResultObject) -> bool {
        let mut visited = HashSet::new();
        let mut stack = vec![self.clone()];
        while let Some(object) = stack.pop() {
            if object.ptr_eq(other) {
                return true;
            }
            if !visited.insert(Arc::as_ptr(&object.properties) as usize) {
                continue;
            }
            let properties = object.properties.read();
            for slot in properties.values() {
                match slot {
                    Slot::Value(_) => {}
                    Slot::Object(link) => stack.extend(link.resolve()),
                    Slot::List(links) => stack.extend(links.iter().filter_map(Link::resolve)),
                }
            }
        }
        false
    }
}

impl PartialEq for ResultObject {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl fmt::Debug for ResultObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Nested objects are printed shallowly; graphs may contain cycles.
        let properties = self.properties.read();
        let mut map = f.debug_map();
        for (name, slot) in properties.iter() {
            match slot {
                Slot::Value(value) => map.entry(name, value),
                Slot::Object(_) => map.entry(name, &"<object>"),
                Slot::List(links) => map.entry(name, &format!("<{} objects>", links.len())),
            };
        }
        map.finish()
    }
}
