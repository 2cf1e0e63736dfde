//! Mock registry for tests

use super::{ImageRegistry, RegistryError};
use crate::reference::{Digest, ImageReference};
use async_trait::async_trait;
use std::sync::Mutex;

/// Records copy/delete calls; optionally fails the first copy.
pub struct MockRegistry {
    copies: Mutex<Vec<(ImageReference, ImageReference)>>,
    deletes: Mutex<Vec<(ImageReference, bool)>>,
    fail_copy: Option<String>,
    fail_delete: Option<String>,
}

impl MockRegistry {
    pub fn new() -> Self {
        Self {
            copies: Mutex::new(Vec::new()),
            deletes: Mutex::new(Vec::new()),
            fail_copy: None,
            fail_delete: None,
        }
    }

    pub fn failing_copy(message: impl Into<String>) -> Self {
        Self {
            fail_copy: Some(message.into()),
            ..Self::new()
        }
    }

    pub fn failing_delete(message: impl Into<String>) -> Self {
        Self {
            fail_delete: Some(message.into()),
            ..Self::new()
        }
    }

    pub fn copies(&self) -> Vec<(ImageReference, ImageReference)> {
        self.copies.lock().expect("mock lock").clone()
    }

    pub fn deletes(&self) -> Vec<(ImageReference, bool)> {
        self.deletes.lock().expect("mock lock").clone()
    }
}

impl Default for MockRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ImageRegistry for MockRegistry {
    async fn copy_image(
        &self,
        src: &ImageReference,
        dst: &ImageReference,
    ) -> Result<Digest, RegistryError> {
        if let Some(message) = &self.fail_copy {
            return Err(RegistryError::Auth {
                registry: dst.registry.clone(),
                message: message.clone(),
            });
        }
        self.copies
            .lock()
            .expect("mock lock")
            .push((src.clone(), dst.clone()));
        Ok(Digest::of_bytes(src.to_string().as_bytes()))
    }

    async fn delete_tag(
        &self,
        image: &ImageReference,
        allow_digest_fallback: bool,
    ) -> Result<(), RegistryError> {
        if let Some(message) = &self.fail_delete {
            return Err(RegistryError::Auth {
                registry: image.registry.clone(),
                message: message.clone(),
            });
        }
        self.deletes
            .lock()
            .expect("mock lock")
            .push((image.clone(), allow_digest_fallback));
        Ok(())
    }
}
