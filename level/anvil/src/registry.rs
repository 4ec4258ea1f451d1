use std::collections::BTreeMap;
use std::sync::Arc;

/// The namespaced id and property map identifying one concrete block state.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlockStateInfo {
	pub name: String,
	pub properties: BTreeMap<String, String>
}

impl BlockStateInfo {
	pub fn new(name: impl Into<String>) -> Self {
		BlockStateInfo { name: name.into(), properties: BTreeMap::new() }
	}
}

/// Resolves between namespaced block-state descriptions and integer state
/// ids. Consulted during load to reconstruct concrete block values, and
/// during save to persist them.
pub trait BlockRegistry: Send + Sync {
	/// State id for a namespaced id plus property map, or None if the name
	/// is not recognized.
	fn resolve_state(&self, name: &str, properties: &BTreeMap<String, String>) -> Option<u16>;

	/// Inverse of `resolve_state`. Implementations should omit properties
	/// that hold their default value.
	fn describe_state(&self, state_id: u16) -> Option<BlockStateInfo>;
}

/// Dynamic behavior attached to a block, persisted as a block-entity record
/// and reattached by namespaced id on load.
pub trait BlockHandler: Send + Sync {
	fn namespace_id(&self) -> &str;
}

/// Resolves namespaced ids to behavior handlers during load.
pub trait HandlerRegistry: Send + Sync {
	fn handler(&self, namespace_id: &str) -> Option<Arc<dyn BlockHandler>>;
}

/// Stands in for handlers whose namespace is not registered, preserving the
/// original id so the record survives a load/save cycle.
#[derive(Debug)]
pub struct DummyHandler {
	namespace_id: String
}

impl DummyHandler {
	pub fn new(namespace_id: impl Into<String>) -> Self {
		DummyHandler { namespace_id: namespace_id.into() }
	}
}

impl BlockHandler for DummyHandler {
	fn namespace_id(&self) -> &str {
		&self.namespace_id
	}
}
