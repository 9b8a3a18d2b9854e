use std::sync::Arc;

use tokio::sync::RwLock;

/// Holds an injected authentication service and hands it back unchanged.
/// The accessor imposes no contract of its own; the host application
/// decides what the service can do.
pub struct AuthAccessor<S> {
    service: Arc<S>,
}

impl<S> AuthAccessor<S> {
    pub fn new(service: Arc<S>) -> Self {
        Self { service }
    }

    /// The service exactly as it was injected.
    pub fn service(&self) -> &S {
        &self.service
    }
}

impl<S> Clone for AuthAccessor<S> {
    fn clone(&self) -> Self {
        Self {
            service: Arc::clone(&self.service),
        }
    }
}

/// Process-local identity: remembers which username is signed in.
#[derive(Default)]
pub struct IdentityService {
    current: RwLock<Option<String>>,
}

impl IdentityService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds the identity to `username`, replacing any previous one.
    pub async fn remember(&self, username: &str) {
        *self.current.write().await = Some(username.to_string());
    }

    /// Clears the bound identity.
    pub async fn forget(&self) {
        *self.current.write().await = None;
    }

    pub async fn current(&self) -> Option<String> {
        self.current.read().await.clone()
    }

    pub async fn has_identity(&self) -> bool {
        self.current.read().await.is_some()
    }
}
