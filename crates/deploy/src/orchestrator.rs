//! Pipeline orchestration.

use std::collections::BTreeMap;

use alloy_core::primitives::Address;

use crate::{
    DeploymentRecord, DeploymentVersion, SettingsFingerprint,
    chain::{ContractDeployer, ContractExecutor, NetworkContext},
    error::{DeployError, DeployResult},
    network::NetworkDefaults,
    pipeline::{Bindings, Link, LinkSource, Pipeline},
    record::RecordStore,
    settings::{
        ParamSpec, PipelineOverrides, RawLayer, ResolvedSettings, ScopeLayers, SettingValue,
        SettingsLayer, resolve,
    },
    units::UnitContext,
};

/// Settings of one scope, parsed and ready to resolve once its in-run links are known.
#[derive(Debug, Clone)]
pub struct PlannedScope {
    pub id: String,
    pub params: Vec<ParamSpec>,
    pub layers: ScopeLayers,
    /// Links to outputs of earlier units, filled in during the run.
    pub pending: Vec<Link>,
    /// Settings resolved with every pending link set to the zero address.
    pub preview: ResolvedSettings,
}

impl PlannedScope {
    /// The unit output `param` will be read from, unless a caller override sets it.
    pub fn pending_output(&self, param: &str) -> Option<(&str, &str)> {
        if self.layers.overrides.contains(param) {
            return None;
        }
        self.pending
            .iter()
            .filter(|link| link.param == param)
            .find_map(|link| match &link.source {
                LinkSource::Output { unit, output } => Some((unit.as_str(), output.as_str())),
                LinkSource::Record { .. } => None,
            })
    }

    fn resolve_with(&self, pipeline: &str, bindings: &Bindings) -> DeployResult<ResolvedSettings> {
        let mut layers = self.layers.clone();
        for link in &self.pending {
            if let LinkSource::Output { unit, output } = &link.source {
                let address = bindings
                    .output(unit, output)
                    .map_err(|e| DeployError::invalid_pipeline(pipeline, format!("{e:#}")))?;
                layers
                    .linked
                    .insert(link.param.clone(), SettingValue::Address(address));
            }
        }
        resolve(pipeline, &self.id, &self.params, &layers)
    }
}

/// Everything checked before the first chain interaction.
#[derive(Debug, Clone)]
pub struct Plan {
    pub pipeline: String,
    pub chain_id: u64,
    /// One entry per scope, units first, in execution order.
    pub scopes: Vec<PlannedScope>,
}

/// Runs pipelines against a chain backend and a record store.
pub struct Orchestrator<B, S> {
    backend: B,
    store: S,
    network: NetworkContext,
    defaults: NetworkDefaults,
}

impl<B, S> Orchestrator<B, S>
where
    B: ContractDeployer + ContractExecutor,
    S: RecordStore,
{
    pub fn new(backend: B, store: S, network: NetworkContext, defaults: NetworkDefaults) -> Self {
        Self {
            backend,
            store,
            network,
            defaults,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn network(&self) -> &NetworkContext {
        &self.network
    }

    /// Deploy `pipeline` and return its record.
    ///
    /// Unless `force` is set, an existing record is returned as is, without touching the
    /// chain. On any failure nothing is written.
    pub async fn deploy(
        &self,
        pipeline: &Pipeline,
        overrides: &PipelineOverrides,
        force: bool,
    ) -> DeployResult<DeploymentRecord> {
        pipeline.validate()?;

        let fingerprint =
            SettingsFingerprint::new(&pipeline.name, self.network.chain_id, overrides);

        if force {
            tracing::info!(pipeline = %pipeline.name, record = %pipeline.record, "Redeploy forced, ignoring any existing record");
        } else if let Some(record) = self.load_record(pipeline, &pipeline.record).await? {
            tracing::info!(
                pipeline = %pipeline.name,
                record = %pipeline.record,
                "Found existing deployment record, skipping deployment"
            );
            self.check_version(pipeline, &fingerprint).await;
            return Ok(record);
        }

        let plan = self.plan(pipeline, overrides).await?;

        tracing::info!(
            pipeline = %pipeline.name,
            chain_id = self.network.chain_id,
            deployer = %self.network.deployer,
            units = pipeline.units.len(),
            actions = pipeline.actions.len(),
            "Deploying pipeline"
        );

        let (unit_scopes, action_scopes) = plan.scopes.split_at(pipeline.units.len());
        let mut bindings = Bindings::default();

        for (unit, scope) in pipeline.units.iter().zip(unit_scopes) {
            let settings = scope.resolve_with(&pipeline.name, &bindings)?;
            let depends_on = unit.depends_on();
            let ctx = UnitContext {
                pipeline: &pipeline.name,
                id: &unit.id,
                depends_on: &depends_on,
                settings: &settings,
                deployer: &self.backend,
                network: &self.network,
            };
            let outputs = unit.kind.deploy(&ctx).await?;

            bindings.insert_settings(settings);
            bindings.insert_outputs(&unit.id, outputs);
        }

        for (action, scope) in pipeline.actions.iter().zip(action_scopes) {
            let settings = scope.resolve_with(&pipeline.name, &bindings)?;
            bindings.insert_settings(settings);

            if let Err(source) = action.run(&bindings, &self.backend, &self.network).await {
                let deployed = bindings.deployed();
                tracing::error!(
                    pipeline = %pipeline.name,
                    action = %action.id,
                    error = %format!("{source:#}"),
                    deployed = %deployed,
                    "Post-deploy action failed; deployed contracts were not recorded"
                );
                return Err(DeployError::PostDeployActionFailed {
                    pipeline: pipeline.name.clone(),
                    action: action.id.clone(),
                    deployed,
                    source,
                });
            }
        }

        let record = pipeline
            .entries
            .iter()
            .map(|entry| {
                entry
                    .value
                    .resolve_address(&bindings)
                    .map(|address| (entry.key.clone(), address))
                    .map_err(|e| {
                        DeployError::invalid_pipeline(
                            &pipeline.name,
                            format!("record entry `{}`: {e:#}", entry.key),
                        )
                    })
            })
            .collect::<DeployResult<DeploymentRecord>>()?;

        self.store
            .save(&pipeline.record, &record)
            .await
            .map_err(|source| DeployError::RecordStore {
                pipeline: pipeline.name.clone(),
                record: pipeline.record.clone(),
                source,
            })?;

        // The record is already durable; a missing sidecar only disables the drift warning.
        let version = DeploymentVersion::new(&fingerprint);
        if let Err(e) = self.store.save_version(&pipeline.record, &version).await {
            tracing::warn!(record = %pipeline.record, error = %e, "Failed to save deployment version");
        }

        tracing::info!(pipeline = %pipeline.name, record = %pipeline.record, entries = %record, "Deployment recorded");
        Ok(record)
    }

    /// Parse and resolve every scope of `pipeline` without touching the chain.
    ///
    /// Fails with the same settings errors a real run would, so a successful plan only
    /// leaves chain-side failures.
    pub async fn plan(
        &self,
        pipeline: &Pipeline,
        overrides: &PipelineOverrides,
    ) -> DeployResult<Plan> {
        pipeline.validate()?;
        let network = self.defaults.select(self.network.chain_id)?;

        for (scope, layer) in overrides {
            if !pipeline.scope_ids().any(|id| id == scope) {
                let param = layer.keys().next().cloned().unwrap_or_default();
                return Err(DeployError::invalid_parameter(
                    scope,
                    param,
                    format!("pipeline `{}` has no scope `{scope}`", pipeline.name),
                ));
            }
        }

        let mut records = BTreeMap::new();
        for name in pipeline.linked_records() {
            let record = self.load_record(pipeline, name).await?;
            if record.is_none() {
                tracing::debug!(pipeline = %pipeline.name, record = %name, "Linked record not found");
            }
            records.insert(name.to_string(), record);
        }

        let scopes = pipeline
            .units
            .iter()
            .map(|u| (u.id.as_str(), u.kind.params(), u.links.as_slice()))
            .chain(
                pipeline
                    .actions
                    .iter()
                    .map(|a| (a.id.as_str(), a.params.clone(), a.links.as_slice())),
            );

        let empty = RawLayer::new();
        let mut planned = Vec::new();
        for (id, params, links) in scopes {
            let hardcoded = network.hardcoded(&pipeline.name, id);
            let chain_specific = network.network(&pipeline.name, id);
            let mut layers = ScopeLayers {
                defaults: SettingsLayer::parse(id, &params, &hardcoded)?,
                network: SettingsLayer::parse(id, &params, &chain_specific)?,
                linked: SettingsLayer::new(),
                overrides: SettingsLayer::parse(id, &params, overrides.get(id).unwrap_or(&empty))?,
            };

            let mut pending = Vec::new();
            for link in links {
                match &link.source {
                    LinkSource::Output { .. } => pending.push(link.clone()),
                    LinkSource::Record { record, key } => {
                        let address = records
                            .get(record)
                            .and_then(|r| r.as_ref())
                            .and_then(|r| r.get(key));
                        match address {
                            Some(address) => layers
                                .linked
                                .insert(link.param.clone(), SettingValue::Address(address)),
                            None => tracing::debug!(
                                scope = %id,
                                param = %link.param,
                                record = %record,
                                key = %key,
                                "Linked address unavailable"
                            ),
                        }
                    }
                }
            }

            let mut preview_layers = layers.clone();
            for link in &pending {
                preview_layers
                    .linked
                    .insert(link.param.clone(), SettingValue::Address(Address::ZERO));
            }
            let preview = resolve(&pipeline.name, id, &params, &preview_layers)?;

            planned.push(PlannedScope {
                id: id.to_string(),
                params,
                layers,
                pending,
                preview,
            });
        }

        for (unit, scope) in pipeline.units.iter().zip(&planned) {
            unit.kind.check(&scope.preview)?;
        }

        Ok(Plan {
            pipeline: pipeline.name.clone(),
            chain_id: network.chain_id(),
            scopes: planned,
        })
    }

    /// The stored record of `pipeline`, if it was deployed.
    pub async fn existing(&self, pipeline: &Pipeline) -> DeployResult<Option<DeploymentRecord>> {
        self.load_record(pipeline, &pipeline.record).await
    }

    async fn load_record(
        &self,
        pipeline: &Pipeline,
        name: &str,
    ) -> DeployResult<Option<DeploymentRecord>> {
        self.store
            .load(name)
            .await
            .map_err(|source| DeployError::RecordStore {
                pipeline: pipeline.name.clone(),
                record: name.to_string(),
                source,
            })
    }

    async fn check_version(&self, pipeline: &Pipeline, fingerprint: &SettingsFingerprint) {
        match self.store.load_version(&pipeline.record).await {
            Ok(Some(version)) if !version.matches(fingerprint) => {
                tracing::warn!(
                    pipeline = %pipeline.name,
                    record = %pipeline.record,
                    deployed_at = version.deployed_at,
                    "Settings changed since this record was deployed. Use --redeploy to deploy again"
                );
            }
            Ok(Some(_)) => {}
            Ok(None) => {
                tracing::debug!(record = %pipeline.record, "No version stored for record");
            }
            Err(e) => {
                tracing::warn!(record = %pipeline.record, error = %e, "Failed to read deployment version");
            }
        }
    }
}
