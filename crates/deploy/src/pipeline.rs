//! Declarative pipeline definitions.
//!
//! A pipeline is an ordered list of units followed by post-deploy actions, plus the
//! entries of the record it produces. Order is the declaration order: [`Pipeline::validate`]
//! checks that every reference points backwards, so no reordering ever happens.

use std::collections::{BTreeMap, BTreeSet};

use alloy_core::{
    dyn_abi::DynSolValue,
    primitives::{Address, B256, keccak256},
};
use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::{
    actions::PostDeployAction,
    error::{DeployError, DeployResult},
    settings::{ParamKind, ParamSpec, ResolvedSettings, SettingValue},
    units::{ClaimerUnit, GenesisLayout, GenesisUnit, TokenUnit, UnitKind, UnitOutputs},
};

/// A value computed during a run, used as a call target, argument, sender or record entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "from", rename_all = "kebab-case")]
pub enum Operand {
    /// An address produced by an earlier unit.
    Output { unit: String, output: String },
    /// A resolved parameter of a scope.
    Param { scope: String, param: String },
    /// `keccak256(name)`, the usual encoding of an access-control role.
    Role { name: String },
    /// The all-zero `bytes32`, the default admin role.
    ZeroHash,
}

impl Operand {
    pub fn output(unit: &str, output: &str) -> Self {
        Operand::Output {
            unit: unit.to_string(),
            output: output.to_string(),
        }
    }

    pub fn param(scope: &str, param: &str) -> Self {
        Operand::Param {
            scope: scope.to_string(),
            param: param.to_string(),
        }
    }

    pub fn role(name: &str) -> Self {
        Operand::Role {
            name: name.to_string(),
        }
    }

    pub fn resolve(&self, bindings: &Bindings) -> anyhow::Result<DynSolValue> {
        match self {
            Operand::Output { unit, output } => {
                bindings.output(unit, output).map(DynSolValue::Address)
            }
            Operand::Param { scope, param } => {
                bindings.param(scope, param).map(SettingValue::to_sol_value)
            }
            Operand::Role { name } => Ok(DynSolValue::FixedBytes(keccak256(name), 32)),
            Operand::ZeroHash => Ok(DynSolValue::FixedBytes(B256::ZERO, 32)),
        }
    }

    pub fn resolve_address(&self, bindings: &Bindings) -> anyhow::Result<Address> {
        match self.resolve(bindings)? {
            DynSolValue::Address(address) => Ok(address),
            other => anyhow::bail!("Expected an address for {self}, got {other:?}"),
        }
    }
}

impl std::fmt::Display for Operand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operand::Output { unit, output } => write!(f, "{unit}.{output}"),
            Operand::Param { scope, param } => write!(f, "{scope}.{param}"),
            Operand::Role { name } => write!(f, "keccak256(\"{name}\")"),
            Operand::ZeroHash => write!(f, "0x00"),
        }
    }
}

/// Where a linked address comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "from", rename_all = "kebab-case")]
pub enum LinkSource {
    /// An output of an earlier unit of the same run.
    Output { unit: String, output: String },
    /// An entry of a record written by another pipeline.
    Record { record: String, key: String },
}

/// Substitution of a linked address into a scope parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub param: String,
    #[serde(flatten)]
    pub source: LinkSource,
}

impl Link {
    pub fn output(param: &str, unit: &str, output: &str) -> Self {
        Self {
            param: param.to_string(),
            source: LinkSource::Output {
                unit: unit.to_string(),
                output: output.to_string(),
            },
        }
    }

    pub fn record(param: &str, record: &str, key: &str) -> Self {
        Self {
            param: param.to_string(),
            source: LinkSource::Record {
                record: record.to_string(),
                key: key.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitDef {
    /// Scope id, unique within the pipeline.
    pub id: String,
    #[serde(flatten)]
    pub kind: UnitKind,
    #[serde(default)]
    pub links: Vec<Link>,
}

impl UnitDef {
    pub fn new(id: &str, kind: UnitKind) -> Self {
        Self {
            id: id.to_string(),
            kind,
            links: Vec::new(),
        }
    }

    pub fn with_link(mut self, link: Link) -> Self {
        self.links.push(link);
        self
    }

    /// Units this one consumes outputs of.
    pub fn depends_on(&self) -> Vec<String> {
        let mut deps: Vec<String> = Vec::new();
        for link in &self.links {
            if let LinkSource::Output { unit, .. } = &link.source {
                if !deps.contains(unit) {
                    deps.push(unit.clone());
                }
            }
        }
        deps
    }
}

/// One `key -> address` entry of the produced record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordEntry {
    pub key: String,
    pub value: Operand,
}

impl RecordEntry {
    pub fn new(key: &str, value: Operand) -> Self {
        Self {
            key: key.to_string(),
            value,
        }
    }
}

/// A named, ordered deployment plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pipeline {
    pub name: String,
    /// Name of the record written on success, e.g. `token.json`.
    pub record: String,
    #[serde(default)]
    pub units: Vec<UnitDef>,
    #[serde(default)]
    pub actions: Vec<PostDeployAction>,
    pub entries: Vec<RecordEntry>,
}

/// A scope seen from validation: its position and declared parameters.
struct ScopeInfo {
    position: usize,
    params: Vec<ParamSpec>,
    outputs: Option<&'static [&'static str]>,
}

impl Pipeline {
    /// Names of the pipelines shipped with the tool.
    pub fn builtin_names() -> &'static [&'static str] {
        &["token", "genesis", "claimer", "launch", "v1", "transfer-admin"]
    }

    pub fn builtins() -> Vec<Pipeline> {
        Self::builtin_names()
            .iter()
            .filter_map(|name| Self::builtin(name))
            .collect()
    }

    pub fn builtin(name: &str) -> Option<Pipeline> {
        let pipeline = match name {
            "token" => Pipeline {
                name: name.to_string(),
                record: "token.json".to_string(),
                units: vec![UnitDef::new("token", UnitKind::Token(TokenUnit::default()))],
                actions: vec![],
                entries: vec![RecordEntry::new("token", Operand::output("token", "proxy"))],
            },
            "genesis" => Pipeline {
                name: name.to_string(),
                record: "genesis.json".to_string(),
                units: vec![UnitDef::new(
                    "genesis",
                    UnitKind::Genesis(GenesisUnit::default()),
                )],
                actions: vec![],
                entries: vec![RecordEntry::new(
                    "genesis",
                    Operand::output("genesis", "address"),
                )],
            },
            "claimer" => Pipeline {
                name: name.to_string(),
                record: "claimer.json".to_string(),
                units: vec![
                    UnitDef::new("claimer", UnitKind::Claimer(ClaimerUnit::default()))
                        .with_link(Link::record("token", "token.json", "token")),
                ],
                actions: vec![minting_role(Operand::param("claimer", "token"))],
                entries: vec![RecordEntry::new(
                    "claimer",
                    Operand::output("claimer", "address"),
                )],
            },
            "launch" => Pipeline {
                name: name.to_string(),
                record: "launch.json".to_string(),
                units: vec![
                    UnitDef::new("token", UnitKind::Token(TokenUnit::default())),
                    UnitDef::new("claimer", UnitKind::Claimer(ClaimerUnit::default()))
                        .with_link(Link::output("token", "token", "proxy")),
                ],
                actions: vec![minting_role(Operand::output("token", "proxy"))],
                entries: vec![
                    RecordEntry::new("token", Operand::output("token", "proxy")),
                    RecordEntry::new("claimer", Operand::output("claimer", "address")),
                ],
            },
            "v1" => Pipeline {
                name: name.to_string(),
                record: "V1.json".to_string(),
                units: vec![
                    UnitDef::new("token", UnitKind::Token(TokenUnit::new("OpenXAI"))),
                    UnitDef::new(
                        "genesis",
                        UnitKind::Genesis(GenesisUnit::new(
                            "OpenXAIGenesis",
                            GenesisLayout::Tiered,
                        )),
                    ),
                ],
                actions: vec![],
                entries: vec![
                    RecordEntry::new("token", Operand::output("token", "proxy")),
                    RecordEntry::new("genesis", Operand::output("genesis", "address")),
                ],
            },
            "transfer-admin" => {
                let scope = "multisig-admin-role";
                Pipeline {
                    name: name.to_string(),
                    record: "transfer-admin.json".to_string(),
                    units: vec![],
                    actions: vec![PostDeployAction {
                        id: scope.to_string(),
                        target: Operand::param(scope, "token"),
                        function: "grantRole(bytes32,address)".to_string(),
                        args: vec![Operand::ZeroHash, Operand::param(scope, "multisig")],
                        sender: Some(Operand::param(scope, "from")),
                        params: vec![
                            ParamSpec::required("token", ParamKind::Address),
                            ParamSpec::required("multisig", ParamKind::Address),
                            ParamSpec::required("from", ParamKind::Address),
                        ],
                        links: vec![Link::record("token", "token.json", "token")],
                    }],
                    entries: vec![
                        RecordEntry::new("token", Operand::param(scope, "token")),
                        RecordEntry::new("multisig", Operand::param(scope, "multisig")),
                    ],
                }
            }
            _ => return None,
        };
        Some(pipeline)
    }

    /// Ids of every scope, units first, in execution order.
    pub fn scope_ids(&self) -> impl Iterator<Item = &str> {
        self.units
            .iter()
            .map(|u| u.id.as_str())
            .chain(self.actions.iter().map(|a| a.id.as_str()))
    }

    /// Names of the records this pipeline reads links from.
    pub fn linked_records(&self) -> BTreeSet<&str> {
        self.units
            .iter()
            .flat_map(|u| u.links.iter())
            .chain(self.actions.iter().flat_map(|a| a.links.iter()))
            .filter_map(|link| match &link.source {
                LinkSource::Record { record, .. } => Some(record.as_str()),
                LinkSource::Output { .. } => None,
            })
            .collect()
    }

    /// Check the pipeline is well formed.
    ///
    /// Rejects duplicate scope ids, references to unknown or later scopes, unknown unit
    /// outputs, undeclared parameters and records with no entries.
    pub fn validate(&self) -> DeployResult<()> {
        let invalid = |reason: String| DeployError::invalid_pipeline(&self.name, reason);

        if self.name.trim().is_empty() {
            return Err(invalid("pipeline name is empty".to_string()));
        }
        if self.record.trim().is_empty() {
            return Err(invalid("record name is empty".to_string()));
        }
        if self.entries.is_empty() {
            return Err(invalid("record has no entries".to_string()));
        }

        let mut scopes: BTreeMap<&str, ScopeInfo> = BTreeMap::new();
        let declared = self
            .units
            .iter()
            .map(|u| (u.id.as_str(), u.kind.params(), Some(u.kind.outputs())))
            .chain(
                self.actions
                    .iter()
                    .map(|a| (a.id.as_str(), a.params.clone(), None)),
            );
        for (position, (id, params, outputs)) in declared.enumerate() {
            if id.trim().is_empty() {
                return Err(invalid(format!("scope {position} has an empty id")));
            }
            let info = ScopeInfo {
                position,
                params,
                outputs,
            };
            if scopes.insert(id, info).is_some() {
                return Err(invalid(format!("duplicate scope id `{id}`")));
            }
        }

        // A reference from the scope at `position` must point at a scope at or before it
        // (outputs: strictly before).
        let check_output = |position: usize, unit: &str, output: &str| -> DeployResult<()> {
            let info = scopes
                .get(unit)
                .ok_or_else(|| invalid(format!("reference to unknown unit `{unit}`")))?;
            let outputs = info
                .outputs
                .ok_or_else(|| invalid(format!("`{unit}` is an action and has no outputs")))?;
            if info.position >= position {
                return Err(invalid(format!(
                    "reference to `{unit}.{output}` before `{unit}` is deployed"
                )));
            }
            if !outputs.contains(&output) {
                return Err(invalid(format!("unit `{unit}` has no output `{output}`")));
            }
            Ok(())
        };
        let check_param = |position: usize, scope: &str, param: &str| -> DeployResult<ParamKind> {
            let info = scopes
                .get(scope)
                .ok_or_else(|| invalid(format!("reference to unknown scope `{scope}`")))?;
            if info.position > position {
                return Err(invalid(format!(
                    "reference to `{scope}.{param}` before `{scope}` is resolved"
                )));
            }
            info.params
                .iter()
                .find(|p| p.name == param)
                .map(|p| p.kind)
                .ok_or_else(|| invalid(format!("`{scope}` has no parameter `{param}`")))
        };
        let check_operand = |position: usize, operand: &Operand| -> DeployResult<()> {
            match operand {
                Operand::Output { unit, output } => check_output(position, unit, output),
                Operand::Param { scope, param } => check_param(position, scope, param).map(drop),
                Operand::Role { name } if name.is_empty() => {
                    Err(invalid("role name is empty".to_string()))
                }
                Operand::Role { .. } | Operand::ZeroHash => Ok(()),
            }
        };
        let check_address_operand = |position: usize, operand: &Operand| -> DeployResult<()> {
            match operand {
                Operand::Output { .. } => check_operand(position, operand),
                Operand::Param { scope, param } => {
                    match check_param(position, scope, param)? {
                        ParamKind::Address => Ok(()),
                        kind => Err(invalid(format!("`{operand}` is {kind}, not an address"))),
                    }
                }
                _ => Err(invalid(format!("`{operand}` is not an address"))),
            }
        };
        let check_links = |position: usize, scope: &str, links: &[Link]| -> DeployResult<()> {
            for link in links {
                match check_param(position, scope, &link.param)? {
                    ParamKind::Address => {}
                    kind => {
                        return Err(invalid(format!(
                            "link into `{scope}.{}` which is {kind}, not an address",
                            link.param
                        )));
                    }
                }
                match &link.source {
                    LinkSource::Output { unit, output } => check_output(position, unit, output)?,
                    LinkSource::Record { record, key } => {
                        if record.is_empty() || key.is_empty() {
                            return Err(invalid(format!(
                                "link into `{scope}.{}` names an empty record or key",
                                link.param
                            )));
                        }
                        if record == &self.record {
                            return Err(invalid(format!(
                                "link into `{scope}.{}` reads the pipeline's own record",
                                link.param
                            )));
                        }
                    }
                }
            }
            Ok(())
        };

        for (position, unit) in self.units.iter().enumerate() {
            check_links(position, &unit.id, &unit.links)?;
        }

        for (offset, action) in self.actions.iter().enumerate() {
            let position = self.units.len() + offset;
            check_links(position, &action.id, &action.links)?;
            check_address_operand(position, &action.target)?;
            if let Some(sender) = &action.sender {
                check_address_operand(position, sender)?;
            }
            for arg in &action.args {
                check_operand(position, arg)?;
            }

            let function = action
                .parse_function()
                .map_err(|e| invalid(format!("action `{}`: {e:#}", action.id)))?;
            if function.inputs.len() != action.args.len() {
                return Err(invalid(format!(
                    "action `{}` passes {} arguments to {}",
                    action.id,
                    action.args.len(),
                    function.signature()
                )));
            }
        }

        let end = self.units.len() + self.actions.len();
        let mut keys = BTreeSet::new();
        for entry in &self.entries {
            if entry.key.is_empty() {
                return Err(invalid("record entry with an empty key".to_string()));
            }
            if !keys.insert(entry.key.as_str()) {
                return Err(invalid(format!("duplicate record entry `{}`", entry.key)));
            }
            check_address_operand(end, &entry.value)?;
        }

        Ok(())
    }
}

fn minting_role(token: Operand) -> PostDeployAction {
    PostDeployAction {
        id: "claimer-minting-role".to_string(),
        target: token,
        function: "grantRole(bytes32,address)".to_string(),
        args: vec![Operand::role("MINT"), Operand::output("claimer", "address")],
        sender: None,
        params: vec![],
        links: vec![],
    }
}

/// Values produced so far in a run: unit outputs and resolved scope settings.
#[derive(Debug, Clone, Default)]
pub struct Bindings {
    outputs: BTreeMap<String, UnitOutputs>,
    settings: BTreeMap<String, ResolvedSettings>,
}

impl Bindings {
    pub fn insert_outputs(&mut self, unit: &str, outputs: UnitOutputs) {
        self.outputs.insert(unit.to_string(), outputs);
    }

    pub fn insert_settings(&mut self, settings: ResolvedSettings) {
        self.settings.insert(settings.scope().to_string(), settings);
    }

    pub fn output(&self, unit: &str, output: &str) -> anyhow::Result<Address> {
        self.outputs
            .get(unit)
            .and_then(|outputs| outputs.get(output))
            .copied()
            .with_context(|| format!("Output `{unit}.{output}` is not available"))
    }

    pub fn param(&self, scope: &str, param: &str) -> anyhow::Result<&SettingValue> {
        self.settings
            .get(scope)
            .and_then(|settings| settings.get(param))
            .with_context(|| format!("Parameter `{scope}.{param}` is not resolved"))
    }

    /// Every address deployed so far, keyed `unit.output`.
    pub fn deployed(&self) -> crate::DeploymentRecord {
        self.outputs
            .iter()
            .flat_map(|(unit, outputs)| {
                outputs
                    .iter()
                    .map(move |(output, address)| (format!("{unit}.{output}"), *address))
            })
            .collect()
    }
}
