// Handler Registry
// Explicit function-name -> handler map handed to dispatchers

use crate::domain::{ArgValue, TaskArgs};
use crate::error::{AppError, Result};
use crate::port::{FnHandler, TaskError, TaskHandler};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Per-function settings applied by the dispatcher
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandlerOptions {
    /// Overrides the worker-wide result TTL for this function
    pub result_ttl: Option<Duration>,
    /// Pipeline successors of this function never receive its result
    pub pipe_ignore: bool,
}

impl HandlerOptions {
    pub fn result_ttl(mut self, ttl: Duration) -> Self {
        self.result_ttl = Some(ttl);
        self
    }

    pub fn pipe_ignore(mut self) -> Self {
        self.pipe_ignore = true;
        self
    }
}

#[derive(Clone)]
struct Registration {
    handler: Arc<dyn TaskHandler>,
    options: HandlerOptions,
}

#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Registration>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under `name`
    ///
    /// # Errors
    /// - AppError::Validation if the name is empty or already taken
    pub fn register(&mut self, name: impl Into<String>, handler: Arc<dyn TaskHandler>) -> Result<()> {
        self.register_with_options(name, handler, HandlerOptions::default())
    }

    pub fn register_with_options(
        &mut self,
        name: impl Into<String>,
        handler: Arc<dyn TaskHandler>,
        options: HandlerOptions,
    ) -> Result<()> {
        let name = name.into();
        if name.is_empty() {
            return Err(AppError::Validation(
                "function name cannot be empty".to_string(),
            ));
        }
        if self.handlers.contains_key(&name) {
            return Err(AppError::Validation(format!(
                "function already registered: {}",
                name
            )));
        }
        if options.result_ttl == Some(Duration::ZERO) {
            return Err(AppError::Validation(format!(
                "result TTL of {} must be positive",
                name
            )));
        }
        self.handlers.insert(name, Registration { handler, options });
        Ok(())
    }

    /// Register an async closure
    pub fn register_fn<F, Fut>(&mut self, name: impl Into<String>, f: F) -> Result<()>
    where
        F: Fn(TaskArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<ArgValue, TaskError>> + Send + 'static,
    {
        self.register(name, Arc::new(FnHandler::new(f)))
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(name).map(|r| r.handler.clone())
    }

    /// Options `name` was registered with
    pub fn options(&self, name: &str) -> Option<&HandlerOptions> {
        self.handlers.get(name).map(|r| &r.options)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Registered function names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
