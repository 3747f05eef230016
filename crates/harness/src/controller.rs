use std::sync::Arc;

use portcullis_core::crypto::RootKey;
use portcullis_core::{FieldDelta, OpContext, PublicId, ScopeId, VersionSpec};
use portcullis_engine::{
    AttributeRegistry, AuthToken, Controller, ControllerConfig, EngineError, Resource,
};
use portcullis_storage::SqliteStorage;

/// Explicit version shorthand for tests.
///
/// # Panics
///
/// Panics on zero; versions start at 1.
pub fn at(version: u32) -> VersionSpec {
    match VersionSpec::explicit(version) {
        Some(spec) => spec,
        None => panic!("versions start at 1"),
    }
}

/// A controller over an in-memory store with one provisioned project scope.
pub struct TestController {
    pub controller: Controller,
    pub scope_id: ScopeId,
    pub ctx: OpContext,
}

impl TestController {
    pub fn new() -> Result<Self, EngineError> {
        Self::with_config(ControllerConfig::default())
    }

    pub fn with_config(config: ControllerConfig) -> Result<Self, EngineError> {
        Self::with_registry(AttributeRegistry::builtin()?, config)
    }

    pub fn with_registry(
        registry: AttributeRegistry,
        config: ControllerConfig,
    ) -> Result<Self, EngineError> {
        let storage = Arc::new(SqliteStorage::open_in_memory()?);
        let controller = Controller::new(storage, RootKey::generate()?, registry, config)?;
        let ctx = OpContext::new();
        let scope_id = ScopeId::new_project()?;
        controller.provision_scope(&ctx, &scope_id)?;
        Ok(Self {
            controller,
            scope_id,
            ctx,
        })
    }

    /// Create a tcp target with a name and default port.
    pub fn create_tcp_target(&self, name: &str, port: i64) -> Result<Resource, EngineError> {
        let input = FieldDelta::new()
            .set("name", name)
            .set("attributes.default_port", port);
        self.controller.create(&self.ctx, &self.scope_id, "tcp", &input)
    }

    pub fn create_host_set(&self, name: &str) -> Result<Resource, EngineError> {
        let input = FieldDelta::new().set("name", name);
        self.controller
            .create_host_set(&self.ctx, &self.scope_id, &input)
    }

    /// Create `count` host sets and return their ids.
    pub fn host_set_ids(&self, count: usize) -> Result<Vec<PublicId>, EngineError> {
        (0..count)
            .map(|i| self.create_host_set(&format!("hosts-{i}")).map(|r| r.id))
            .collect()
    }

    pub fn rename(
        &self,
        id: &PublicId,
        version: VersionSpec,
        name: &str,
    ) -> Result<Resource, EngineError> {
        let delta = FieldDelta::new().set("name", name);
        self.controller.update(&self.ctx, id, version, &delta)
    }

    pub fn read(&self, id: &PublicId) -> Result<Resource, EngineError> {
        self.controller.read(&self.ctx, id)
    }

    pub fn issue_token(&self) -> Result<AuthToken, EngineError> {
        let account = PublicId::generate("acctpw")?;
        self.controller
            .create_auth_token(&self.ctx, &self.scope_id, &account)
    }
}
