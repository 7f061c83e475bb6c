use parking_lot::RwLock;
use std::sync::Arc;

use flagsync_core::{ConfigDocument, ConfigKey};

/// Observer told when a fetched configuration replaces the cached one
pub trait ConfigListener: Send + Sync + 'static {
    fn on_config_replaced(&self, key: &ConfigKey, document: &ConfigDocument);
}

impl<F> ConfigListener for F
where
    F: Fn(&ConfigKey, &ConfigDocument) + Send + Sync + 'static,
{
    fn on_config_replaced(&self, key: &ConfigKey, document: &ConfigDocument) {
        self(key, document)
    }
}

#[derive(Clone, Default)]
pub(crate) struct Listeners {
    inner: Arc<RwLock<Vec<Arc<dyn ConfigListener>>>>,
}

impl Listeners {
    pub(crate) fn add(&self, listener: Arc<dyn ConfigListener>) {
        self.inner.write().push(listener);
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub(crate) fn notify(&self, key: &ConfigKey, document: &ConfigDocument) {
        // Snapshot so a listener may register another one without deadlocking
        let listeners: Vec<_> = self.inner.read().iter().cloned().collect();
        for listener in listeners {
            listener.on_config_replaced(key, document);
        }
    }
}
