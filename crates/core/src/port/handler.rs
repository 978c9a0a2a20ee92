// Task Handler Port
// Application code registered under a function name, invoked by the worker pool

use crate::domain::{ArgValue, ErrorDescriptor, TaskArgs};
use async_trait::async_trait;
use std::future::Future;
use std::marker::PhantomData;
use thiserror::Error;

/// Failure reported by a handler
///
/// `retryable = false` fails the task immediately regardless of remaining retries.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{kind}: {message}")]
pub struct TaskError {
    pub kind: String,
    pub message: String,
    pub retryable: bool,
}

impl TaskError {
    pub fn retryable(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            retryable: true,
        }
    }

    pub fn permanent(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            retryable: false,
        }
    }

    pub fn descriptor(&self) -> ErrorDescriptor {
        ErrorDescriptor::new(self.kind.clone(), self.message.clone())
    }
}

/// Task handler trait
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn call(&self, args: TaskArgs) -> Result<ArgValue, TaskError>;
}

/// Adapter turning an async closure into a [`TaskHandler`]
pub struct FnHandler<F, Fut> {
    f: F,
    _marker: PhantomData<fn() -> Fut>,
}

impl<F, Fut> FnHandler<F, Fut>
where
    F: Fn(TaskArgs) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ArgValue, TaskError>> + Send + 'static,
{
    pub fn new(f: F) -> Self {
        Self {
            f,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<F, Fut> TaskHandler for FnHandler<F, Fut>
where
    F: Fn(TaskArgs) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ArgValue, TaskError>> + Send + 'static,
{
    async fn call(&self, args: TaskArgs) -> Result<ArgValue, TaskError> {
        (self.f)(args).await
    }
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    /// Mock handler behavior
    #[derive(Debug, Clone)]
    pub enum MockBehavior {
        /// Always succeed with the given value
        Succeed(ArgValue),
        /// Always fail with the given error
        Fail(TaskError),
        /// Fail the first N calls (retryable), then succeed
        FailTimes(usize),
        /// Panic with message (for panic isolation testing)
        Panic(String),
        /// Sleep, then succeed with Null
        Sleep(Duration),
    }

    /// Mock handler that counts calls and tracks peak concurrency
    #[derive(Clone)]
    pub struct MockHandler {
        behavior: MockBehavior,
        calls: Arc<AtomicUsize>,
        running: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    impl MockHandler {
        pub fn new(behavior: MockBehavior) -> Self {
            Self {
                behavior,
                calls: Arc::new(AtomicUsize::new(0)),
                running: Arc::new(AtomicUsize::new(0)),
                peak: Arc::new(AtomicUsize::new(0)),
            }
        }

        pub fn new_success() -> Self {
            Self::new(MockBehavior::Succeed(ArgValue::Null))
        }

        pub fn new_fail(message: impl Into<String>) -> Self {
            Self::new(MockBehavior::Fail(TaskError::retryable("MockError", message)))
        }

        pub fn new_panic_inducing(message: impl Into<String>) -> Self {
            Self::new(MockBehavior::Panic(message.into()))
        }

        pub fn new_sleep(duration: Duration) -> Self {
            Self::new(MockBehavior::Sleep(duration))
        }

        pub fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        pub fn peak_concurrency(&self) -> usize {
            self.peak.load(Ordering::SeqCst)
        }
    }

    struct RunningGuard<'a>(&'a AtomicUsize);

    impl Drop for RunningGuard<'_> {
        fn drop(&mut self) {
            self.0.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl TaskHandler for MockHandler {
        async fn call(&self, _args: TaskArgs) -> Result<ArgValue, TaskError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            let now_running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            let _guard = RunningGuard(&self.running);
            self.peak.fetch_max(now_running, Ordering::SeqCst);

            match &self.behavior {
                MockBehavior::Succeed(value) => Ok(value.clone()),
                MockBehavior::Fail(err) => Err(err.clone()),
                MockBehavior::FailTimes(n) if call < *n => Err(TaskError::retryable(
                    "MockError",
                    format!("failure {} of {}", call + 1, n),
                )),
                MockBehavior::FailTimes(_) => Ok(ArgValue::Int(call as i64 + 1)),
                MockBehavior::Panic(msg) => {
                    panic!("{}", msg); // Actually panic for panic isolation testing
                }
                MockBehavior::Sleep(duration) => {
                    tokio::time::sleep(*duration).await;
                    Ok(ArgValue::Null)
                }
            }
        }
    }
}
