use std::sync::Arc;

use crate::backend::ContentBackend;
use crate::crypto::EncryptionService;
use crate::mirror::LocalMirror;
use crate::repository::ObjectRepository;

/// The collaborators every pipeline works against.
#[derive(Debug, Clone)]
pub struct VaultContext {
    pub repo: Arc<dyn ObjectRepository>,
    pub backend: Arc<dyn ContentBackend>,
    pub mirror: Arc<dyn LocalMirror>,
    pub crypto: EncryptionService,
}
