use std::path::PathBuf;

use portcullis_core::crypto::{KEY_SIZE, RootKey};
use portcullis_core::{OpContext, ScopeId};
use portcullis_engine::{Controller, ControllerConfig, EngineError, StorageConfig};
use tempfile::TempDir;

/// Root key shared by every controller in a cluster.
const CLUSTER_ROOT_KEY: [u8; KEY_SIZE] = [0x42; KEY_SIZE];

/// Several controllers, each with its own connection, over one database
/// file. Used to race writers through the storage layer's conditional write.
pub struct TestCluster {
    _dir: TempDir,
    path: PathBuf,
    pub scope_id: ScopeId,
    controllers: Vec<Controller>,
}

impl TestCluster {
    pub fn new() -> Result<Self, Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("controller.db");
        Ok(Self {
            _dir: dir,
            path,
            scope_id: ScopeId::new_project()?,
            controllers: Vec::new(),
        })
    }

    pub fn add_controller(&mut self) -> Result<usize, EngineError> {
        let config = ControllerConfig {
            storage: StorageConfig {
                path: Some(self.path.to_string_lossy().into_owned()),
                ..StorageConfig::default()
            },
            ..ControllerConfig::default()
        };
        let controller = Controller::open(config, RootKey::from_bytes(CLUSTER_ROOT_KEY))?;
        if self.controllers.is_empty() {
            controller.provision_scope(&OpContext::new(), &self.scope_id)?;
        }
        let index = self.controllers.len();
        self.controllers.push(controller);
        Ok(index)
    }

    pub fn controller(&self, index: usize) -> &Controller {
        &self.controllers[index]
    }
}
