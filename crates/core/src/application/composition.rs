// Composition - pipelines and groups of send requests

use super::producer::SendRequest;
use crate::domain::TaskId;
use serde::{Deserialize, Serialize};

/// Steps run one after another; each succeeded step hands its result to the
/// next one as an extra trailing positional argument
///
/// Steps that set `pipe_ignore` keep their arguments as given.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    steps: Vec<SendRequest>,
}

impl Pipeline {
    pub fn new(first: SendRequest) -> Self {
        Self { steps: vec![first] }
    }

    /// Append a step
    pub fn pipe(mut self, step: SendRequest) -> Self {
        self.steps.push(step);
        self
    }

    /// Append every step of `other`
    pub fn chain(mut self, other: Pipeline) -> Self {
        self.steps.extend(other.steps);
        self
    }

    pub fn steps(&self) -> &[SendRequest] {
        &self.steps
    }

    pub fn into_steps(self) -> Vec<SendRequest> {
        self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl From<SendRequest> for Pipeline {
    fn from(step: SendRequest) -> Self {
        Self::new(step)
    }
}

impl FromIterator<SendRequest> for Pipeline {
    fn from_iter<I: IntoIterator<Item = SendRequest>>(iter: I) -> Self {
        Self {
            steps: iter.into_iter().collect(),
        }
    }
}

/// Independent members enqueued together; a member is a single task or a pipeline
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Group {
    members: Vec<Pipeline>,
}

impl Group {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(mut self, member: impl Into<Pipeline>) -> Self {
        self.members.push(member.into());
        self
    }

    pub fn members(&self) -> &[Pipeline] {
        &self.members
    }

    pub fn into_members(self) -> Vec<Pipeline> {
        self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

impl<P: Into<Pipeline>> FromIterator<P> for Group {
    fn from_iter<I: IntoIterator<Item = P>>(iter: I) -> Self {
        Self {
            members: iter.into_iter().map(Into::into).collect(),
        }
    }
}

/// Ids of an enqueued pipeline's steps, in order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineHandle {
    pub task_ids: Vec<TaskId>,
}

impl PipelineHandle {
    /// Id of the last step, whose result is the pipeline's result
    pub fn result_id(&self) -> Option<&TaskId> {
        self.task_ids.last()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupHandle {
    pub group_id: String,
    pub members: Vec<PipelineHandle>,
}

impl GroupHandle {
    /// Result id of every member, in member order
    pub fn result_ids(&self) -> Vec<TaskId> {
        self.members
            .iter()
            .filter_map(|member| member.result_id().cloned())
            .collect()
    }
}
