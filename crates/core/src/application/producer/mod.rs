// Producer - Task submission API

pub mod send;

pub use send::{build_task, validate_request, SendRequest, TaskDefaults, TaskOptions};

use super::broker_client::BrokerClient;
use super::composition::{Group, GroupHandle, Pipeline, PipelineHandle};
use crate::domain::{ArgValue, TaskArgs, TaskId};
use crate::error::Result;
use crate::port::{IdProvider, TimeProvider};
use std::sync::Arc;

/// Submits tasks to the broker
///
/// `send` returns as soon as the task is published; the outcome is observed
/// through the result store.
pub struct Producer {
    broker: BrokerClient,
    id_provider: Arc<dyn IdProvider>,
    time_provider: Arc<dyn TimeProvider>,
    defaults: TaskDefaults,
}

impl Producer {
    pub fn new(
        broker: BrokerClient,
        id_provider: Arc<dyn IdProvider>,
        time_provider: Arc<dyn TimeProvider>,
        defaults: TaskDefaults,
    ) -> Self {
        Self {
            broker,
            id_provider,
            time_provider,
            defaults,
        }
    }

    pub fn defaults(&self) -> &TaskDefaults {
        &self.defaults
    }

    /// Send a task invocation, returning its id
    pub async fn send(
        &self,
        function: impl Into<String>,
        args: TaskArgs,
        options: TaskOptions,
    ) -> Result<TaskId> {
        self.enqueue(SendRequest {
            function: function.into(),
            args,
            options,
        })
        .await
    }

    /// Send positional arguments only, with default options
    pub async fn send_args<I, V>(&self, function: impl Into<String>, args: I) -> Result<TaskId>
    where
        I: IntoIterator<Item = V>,
        V: Into<ArgValue>,
    {
        self.send(function, TaskArgs::positional(args), TaskOptions::default())
            .await
    }

    pub async fn enqueue(&self, req: SendRequest) -> Result<TaskId> {
        send::execute(
            &self.broker,
            self.id_provider.as_ref(),
            self.time_provider.as_ref(),
            &self.defaults,
            req,
        )
        .await
    }

    /// Enqueue steps that run one after another, each fed the previous result
    pub async fn send_pipeline(&self, pipeline: impl Into<Pipeline>) -> Result<PipelineHandle> {
        send::execute_pipeline(
            &self.broker,
            self.id_provider.as_ref(),
            self.time_provider.as_ref(),
            &self.defaults,
            pipeline.into(),
        )
        .await
    }

    /// Enqueue independent tasks and pipelines together
    pub async fn send_group(&self, group: Group) -> Result<GroupHandle> {
        send::execute_group(
            &self.broker,
            self.id_provider.as_ref(),
            self.time_provider.as_ref(),
            &self.defaults,
            group,
        )
        .await
    }
}
