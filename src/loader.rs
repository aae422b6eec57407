//! User-code loading context.
//!
//! The context is the ordered search path (libraries first, then classpath
//! entries) user values are resolved against when a job result comes back.
//! Contexts chain: a lookup that misses the own search path falls through to
//! the parent.

use std::fmt;
use std::sync::Arc;
use url::Url;

use crate::error::{ExecutorError, Result};
use crate::job::SerializedValue;

pub trait LoadingContext: Send + Sync + fmt::Debug {
    /// Own search path, in lookup order.
    fn search_path(&self) -> &[Url];

    fn parent(&self) -> Option<&Arc<dyn LoadingContext>>;

    /// Whether code from `origin` is visible through this context chain.
    fn can_load(&self, origin: &Url) -> bool {
        self.search_path().contains(origin) || self.parent().is_some_and(|p| p.can_load(origin))
    }

    /// Decode a value serialized by user code.
    fn decode(&self, value: &SerializedValue) -> Result<serde_json::Value> {
        if let Some(origin) = &value.origin {
            if !self.can_load(origin) {
                return Err(ExecutorError::Execution(format!(
                    "Value was produced by {} which is not on the user-code search path",
                    origin
                )));
            }
        }
        let bytes = value.bytes()?;
        serde_json::from_slice(&bytes)
            .map_err(|e| ExecutorError::Execution(format!("Could not deserialize value: {}", e)))
    }
}

/// Builds the loading context a blocking submission decodes its result with.
pub trait LoadingContextFactory: Send + Sync {
    fn build(
        &self,
        libraries: &[Url],
        classpaths: &[Url],
        parent: Option<Arc<dyn LoadingContext>>,
    ) -> Result<Arc<dyn LoadingContext>>;
}

#[derive(Debug)]
pub struct UserCodeContext {
    search_path: Vec<Url>,
    parent: Option<Arc<dyn LoadingContext>>,
}

impl UserCodeContext {
    pub fn new(
        libraries: Vec<Url>,
        classpaths: Vec<Url>,
        parent: Option<Arc<dyn LoadingContext>>,
    ) -> Self {
        let mut search_path = libraries;
        search_path.extend(classpaths);
        Self {
            search_path,
            parent,
        }
    }
}

impl LoadingContext for UserCodeContext {
    fn search_path(&self) -> &[Url] {
        &self.search_path
    }

    fn parent(&self) -> Option<&Arc<dyn LoadingContext>> {
        self.parent.as_ref()
    }
}

/// Default factory: accepts `file`, `http` and `https` locations.
#[derive(Debug, Default, Clone)]
pub struct UserCodeContextFactory;

impl LoadingContextFactory for UserCodeContextFactory {
    fn build(
        &self,
        libraries: &[Url],
        classpaths: &[Url],
        parent: Option<Arc<dyn LoadingContext>>,
    ) -> Result<Arc<dyn LoadingContext>> {
        for url in libraries.iter().chain(classpaths) {
            if !matches!(url.scheme(), "file" | "http" | "https") {
                return Err(ExecutorError::precondition(format!(
                    "Unsupported user-code location {} (scheme `{}`)",
                    url,
                    url.scheme()
                )));
            }
        }
        Ok(Arc::new(UserCodeContext::new(
            libraries.to_vec(),
            classpaths.to_vec(),
            parent,
        )))
    }
}
