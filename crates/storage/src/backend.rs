//! Backend descriptors and the registry that turns them back into backends.
//!
//! A descriptor is a flat JSON object: `subclass_name` names the backend type,
//! every other key is a constructor argument. Descriptors are what an
//! embedding pipeline persists next to its knowledge base configuration.

use crate::error::{Result, StorageError};
use crate::filesystem::{FilesystemStorage, LocalConfig, LOCAL_BACKEND_NAME};
use crate::remote::{RemoteConfig, RemoteStorage, REMOTE_BACKEND_NAME};
use crate::Storage;
use once_cell::sync::Lazy;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Serialized form of a backend: its type name plus constructor arguments
pub type Descriptor = Map<String, Value>;

/// Descriptor key holding the backend type name
pub const SUBCLASS_NAME_KEY: &str = "subclass_name";

/// Builds a backend from a descriptor that no longer carries `subclass_name`
pub type BackendFactory = fn(Descriptor) -> Result<Arc<dyn Storage>>;

static DEFAULT_REGISTRY: Lazy<StorageRegistry> = Lazy::new(StorageRegistry::with_builtin);

/// Rebuild a backend from its descriptor using the built-in backends
pub fn from_descriptor(descriptor: Descriptor) -> Result<Arc<dyn Storage>> {
    DEFAULT_REGISTRY.build(descriptor)
}

pub(crate) fn descriptor_for<C: Serialize>(name: &str, config: &C) -> Descriptor {
    let mut descriptor = Descriptor::new();
    descriptor.insert(SUBCLASS_NAME_KEY.to_string(), Value::String(name.to_string()));
    if let Ok(Value::Object(fields)) = serde_json::to_value(config) {
        descriptor.extend(fields);
    }
    descriptor
}

pub(crate) fn config_from_descriptor<C: DeserializeOwned>(descriptor: Descriptor) -> Result<C> {
    serde_json::from_value(Value::Object(descriptor))
        .map_err(|e| StorageError::InvalidDescriptor(e.to_string()))
}

/// Take `subclass_name` out of a descriptor
fn take_backend_name(descriptor: &mut Descriptor) -> Result<String> {
    match descriptor.remove(SUBCLASS_NAME_KEY) {
        Some(Value::String(name)) => Ok(name),
        Some(other) => Err(StorageError::UnknownBackend(other.to_string())),
        None => Err(StorageError::UnknownBackend(format!(
            "descriptor has no {}",
            SUBCLASS_NAME_KEY
        ))),
    }
}

/// Name-keyed table of backend factories
#[derive(Clone, Default)]
pub struct StorageRegistry {
    factories: HashMap<String, BackendFactory>,
}

impl StorageRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the local and remote backends
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry
            .register(LOCAL_BACKEND_NAME, build_local)
            .register(REMOTE_BACKEND_NAME, build_remote);
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, factory: BackendFactory) -> &mut Self {
        self.factories.insert(name.into(), factory);
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Construct the backend named by the descriptor's `subclass_name`
    pub fn build(&self, mut descriptor: Descriptor) -> Result<Arc<dyn Storage>> {
        let name = take_backend_name(&mut descriptor)?;
        let factory = self
            .factories
            .get(&name)
            .ok_or(StorageError::UnknownBackend(name))?;
        factory(descriptor)
    }
}

fn build_local(descriptor: Descriptor) -> Result<Arc<dyn Storage>> {
    let config: LocalConfig = config_from_descriptor(descriptor)?;
    Ok(Arc::new(FilesystemStorage::from_config(config)))
}

fn build_remote(descriptor: Descriptor) -> Result<Arc<dyn Storage>> {
    let config: RemoteConfig = config_from_descriptor(descriptor)?;
    Ok(Arc::new(RemoteStorage::from_config(config)?))
}

/// Storage backend type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackend {
    /// Local directory tree
    Filesystem(LocalConfig),
    /// Object store with an optional error table
    Remote(RemoteConfig),
}

impl StorageBackend {
    /// Initialize storage backend based on type
    pub fn initialize(self) -> Result<Arc<dyn Storage>> {
        match self {
            StorageBackend::Filesystem(config) => {
                Ok(Arc::new(FilesystemStorage::from_config(config)))
            }
            StorageBackend::Remote(config) => Ok(Arc::new(RemoteStorage::from_config(config)?)),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            StorageBackend::Filesystem(_) => LOCAL_BACKEND_NAME,
            StorageBackend::Remote(_) => REMOTE_BACKEND_NAME,
        }
    }

    pub fn to_descriptor(&self) -> Descriptor {
        match self {
            StorageBackend::Filesystem(config) => descriptor_for(self.name(), config),
            StorageBackend::Remote(config) => descriptor_for(self.name(), config),
        }
    }
}
