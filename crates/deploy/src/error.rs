//! Errors surfaced by the deployment orchestrator.

use thiserror::Error;

use crate::DeploymentRecord;

/// Result alias for orchestration operations.
pub type DeployResult<T> = Result<T, DeployError>;

/// Every way a pipeline run can fail.
///
/// Each variant carries enough context (pipeline, scope, cause) to diagnose the failure
/// and re-run. None of these leave a record behind: a failed run never touches the
/// record store.
#[derive(Debug, Error)]
pub enum DeployError {
    /// The pipeline definition itself is malformed.
    #[error("invalid pipeline `{pipeline}`: {reason}")]
    InvalidPipeline { pipeline: String, reason: String },

    /// A settings value is of the wrong kind, unparseable, or not declared by the scope.
    #[error("invalid parameter `{param}` for `{scope}`: {reason}")]
    InvalidParameter {
        scope: String,
        param: String,
        reason: String,
    },

    /// A required parameter is absent after merging every settings layer.
    #[error("pipeline `{pipeline}`: `{scope}` is missing required parameter `{param}`")]
    MissingRequiredParameter {
        pipeline: String,
        scope: String,
        param: String,
    },

    /// The chain id has no entry in the network defaults table.
    #[error("unrecognized network with chain id {chain_id}")]
    UnrecognizedNetwork { chain_id: u64 },

    /// The deploy primitive failed for one of the pipeline units.
    #[error("pipeline `{pipeline}`: deployment of `{unit}` failed")]
    DeploymentFailed {
        pipeline: String,
        unit: String,
        #[source]
        source: anyhow::Error,
    },

    /// A post-deploy call failed after every unit was deployed.
    ///
    /// `deployed` lists the contracts that now exist on-chain but were not recorded.
    #[error("pipeline `{pipeline}`: post-deploy action `{action}` failed (unrecorded contracts: {deployed})")]
    PostDeployActionFailed {
        pipeline: String,
        action: String,
        deployed: DeploymentRecord,
        #[source]
        source: anyhow::Error,
    },

    /// Reading or writing the deployment record failed.
    #[error("pipeline `{pipeline}`: record store failure on `{record}`")]
    RecordStore {
        pipeline: String,
        record: String,
        #[source]
        source: anyhow::Error,
    },
}

impl DeployError {
    pub(crate) fn invalid_parameter(
        scope: impl Into<String>,
        param: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidParameter {
            scope: scope.into(),
            param: param.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_pipeline(pipeline: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPipeline {
            pipeline: pipeline.into(),
            reason: reason.into(),
        }
    }
}
