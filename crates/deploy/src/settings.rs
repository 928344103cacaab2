//! Layered settings resolution.
//!
//! Every scope of a pipeline (a unit or a post-deploy action) declares the parameters it
//! reads as [`ParamSpec`]s. Raw values from the defaults table, the network table and the
//! caller are parsed against those specs into typed [`SettingsLayer`]s, then merged by
//! [`resolve`] in increasing priority:
//!
//! 1. hardcoded defaults
//! 2. network-conditional defaults
//! 3. addresses linked from earlier units or other records
//! 4. caller overrides
//!
//! The merge is shallow: the highest layer that sets a key wins, and array values are
//! replaced as a whole, never concatenated.

use std::{collections::BTreeMap, str::FromStr};

use alloy_core::{
    dyn_abi::DynSolValue,
    primitives::{Address, U256},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{DeployError, DeployResult};

/// Raw, untyped parameter values for one scope, as read from TOML or JSON.
pub type RawLayer = BTreeMap<String, Value>;

/// Raw caller overrides for a whole pipeline, keyed by scope id.
pub type PipelineOverrides = BTreeMap<String, RawLayer>;

/// The kind of value a parameter holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ParamKind {
    /// A single address.
    Address,
    /// An unsigned integer of up to 256 bits.
    Uint,
    /// A list of addresses.
    Addresses,
    /// A list of unsigned integers.
    Uints,
    /// A list of funding tiers, each an amount and an escrow address.
    Tiers,
}

/// Declaration of one parameter read by a scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    pub kind: ParamKind,
    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_required() -> bool {
    true
}

impl ParamSpec {
    pub fn required(name: &str, kind: ParamKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            required: true,
        }
    }

    pub fn optional(name: &str, kind: ParamKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            required: false,
        }
    }
}

/// One funding tier of a genesis contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tier {
    /// Amount in the smallest unit of the accepted stablecoins.
    pub amount: U256,
    /// Address receiving the funds of this tier.
    pub escrow: Address,
}

/// A typed parameter value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SettingValue {
    Address(Address),
    Uint(U256),
    Addresses(Vec<Address>),
    Uints(Vec<U256>),
    Tiers(Vec<Tier>),
}

impl SettingValue {
    pub fn kind(&self) -> ParamKind {
        match self {
            SettingValue::Address(_) => ParamKind::Address,
            SettingValue::Uint(_) => ParamKind::Uint,
            SettingValue::Addresses(_) => ParamKind::Addresses,
            SettingValue::Uints(_) => ParamKind::Uints,
            SettingValue::Tiers(_) => ParamKind::Tiers,
        }
    }

    /// Parse a raw value as `kind`.
    ///
    /// Addresses are `0x`-prefixed hex strings. Integers are either JSON numbers or strings
    /// in decimal or `0x` hex, so that values above `i64::MAX` survive TOML.
    pub fn parse(kind: ParamKind, raw: &Value) -> Result<Self, String> {
        match kind {
            ParamKind::Address => parse_address(raw).map(SettingValue::Address),
            ParamKind::Uint => parse_uint(raw).map(SettingValue::Uint),
            ParamKind::Addresses => parse_list(raw, parse_address).map(SettingValue::Addresses),
            ParamKind::Uints => parse_list(raw, parse_uint).map(SettingValue::Uints),
            ParamKind::Tiers => parse_list(raw, parse_tier).map(SettingValue::Tiers),
        }
    }

    /// Render this value as a raw JSON value that [`SettingValue::parse`] accepts back.
    pub fn to_raw(&self) -> Value {
        match self {
            SettingValue::Address(a) => Value::String(a.to_checksum(None)),
            SettingValue::Uint(u) => Value::String(u.to_string()),
            SettingValue::Addresses(list) => list
                .iter()
                .map(|a| Value::String(a.to_checksum(None)))
                .collect(),
            SettingValue::Uints(list) => {
                list.iter().map(|u| Value::String(u.to_string())).collect()
            }
            SettingValue::Tiers(list) => list
                .iter()
                .map(|t| {
                    serde_json::json!({
                        "amount": t.amount.to_string(),
                        "escrow": t.escrow.to_checksum(None),
                    })
                })
                .collect(),
        }
    }

    /// ABI representation of this value, with integers as `uint256` and tiers as
    /// `(uint96, address)` tuples.
    pub fn to_sol_value(&self) -> DynSolValue {
        match self {
            SettingValue::Address(a) => DynSolValue::Address(*a),
            SettingValue::Uint(u) => DynSolValue::Uint(*u, 256),
            SettingValue::Addresses(list) => {
                DynSolValue::Array(list.iter().copied().map(DynSolValue::Address).collect())
            }
            SettingValue::Uints(list) => DynSolValue::Array(
                list.iter().map(|u| DynSolValue::Uint(*u, 256)).collect(),
            ),
            SettingValue::Tiers(list) => DynSolValue::Array(
                list.iter()
                    .map(|t| {
                        DynSolValue::Tuple(vec![
                            DynSolValue::Uint(t.amount, 96),
                            DynSolValue::Address(t.escrow),
                        ])
                    })
                    .collect(),
            ),
        }
    }
}

fn parse_address(raw: &Value) -> Result<Address, String> {
    let s = raw
        .as_str()
        .ok_or_else(|| format!("expected an address string, got {raw}"))?;
    if !s.starts_with("0x") || s.len() != 42 {
        return Err(format!("expected 0x-prefixed 40 hex chars, got '{s}'"));
    }
    Address::from_str(s).map_err(|e| format!("invalid address '{s}': {e}"))
}

fn parse_uint(raw: &Value) -> Result<U256, String> {
    match raw {
        Value::Number(n) => n
            .as_u64()
            .map(U256::from)
            .ok_or_else(|| format!("expected a non-negative integer, got {n}")),
        Value::String(s) => {
            U256::from_str(s.trim()).map_err(|e| format!("invalid integer '{s}': {e}"))
        }
        other => Err(format!("expected an integer, got {other}")),
    }
}

fn parse_tier(raw: &Value) -> Result<Tier, String> {
    let obj = raw
        .as_object()
        .ok_or_else(|| format!("expected a tier table with `amount` and `escrow`, got {raw}"))?;
    if let Some(unknown) = obj.keys().find(|k| *k != "amount" && *k != "escrow") {
        return Err(format!("unknown tier field `{unknown}`"));
    }
    let amount = obj
        .get("amount")
        .ok_or_else(|| "tier is missing `amount`".to_string())
        .and_then(parse_uint)?;
    let escrow = obj
        .get("escrow")
        .ok_or_else(|| "tier is missing `escrow`".to_string())
        .and_then(parse_address)?;
    Ok(Tier { amount, escrow })
}

fn parse_list<T>(raw: &Value, item: fn(&Value) -> Result<T, String>) -> Result<Vec<T>, String> {
    raw.as_array()
        .ok_or_else(|| format!("expected a list, got {raw}"))?
        .iter()
        .enumerate()
        .map(|(i, v)| item(v).map_err(|e| format!("item {i}: {e}")))
        .collect()
}

/// A typed, partial set of parameter values for one scope.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettingsLayer(BTreeMap<String, SettingValue>);

impl SettingsLayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a raw layer against the parameters declared by `scope`.
    ///
    /// Keys the scope does not declare are rejected rather than ignored: a mistyped key
    /// would otherwise silently fall back to a default address.
    pub fn parse(scope: &str, specs: &[ParamSpec], raw: &RawLayer) -> DeployResult<Self> {
        let mut layer = Self::new();
        for (name, value) in raw {
            let spec = specs.iter().find(|s| &s.name == name).ok_or_else(|| {
                DeployError::invalid_parameter(scope, name, "not a parameter of this scope")
            })?;
            let parsed = SettingValue::parse(spec.kind, value)
                .map_err(|reason| DeployError::invalid_parameter(scope, name, reason))?;
            layer.0.insert(name.clone(), parsed);
        }
        Ok(layer)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: SettingValue) {
        self.0.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&SettingValue> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// The complete layer stack for one scope, lowest priority first.
#[derive(Debug, Clone, Default)]
pub struct ScopeLayers {
    pub defaults: SettingsLayer,
    pub network: SettingsLayer,
    pub linked: SettingsLayer,
    pub overrides: SettingsLayer,
}

impl ScopeLayers {
    fn in_priority_order(&self) -> [&SettingsLayer; 4] {
        [&self.defaults, &self.network, &self.linked, &self.overrides]
    }
}

/// The fully merged settings of one scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSettings {
    scope: String,
    values: BTreeMap<String, SettingValue>,
}

impl ResolvedSettings {
    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn get(&self, name: &str) -> Option<&SettingValue> {
        self.values.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SettingValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    fn require(&self, name: &str) -> DeployResult<&SettingValue> {
        self.values
            .get(name)
            .ok_or_else(|| DeployError::invalid_parameter(&self.scope, name, "not resolved"))
    }

    fn mismatch(&self, name: &str, expected: ParamKind, found: &SettingValue) -> DeployError {
        DeployError::invalid_parameter(
            &self.scope,
            name,
            format!("expected {expected}, found {}", found.kind()),
        )
    }

    pub fn address(&self, name: &str) -> DeployResult<Address> {
        match self.require(name)? {
            SettingValue::Address(a) => Ok(*a),
            other => Err(self.mismatch(name, ParamKind::Address, other)),
        }
    }

    pub fn uint(&self, name: &str) -> DeployResult<U256> {
        match self.require(name)? {
            SettingValue::Uint(u) => Ok(*u),
            other => Err(self.mismatch(name, ParamKind::Uint, other)),
        }
    }

    pub fn addresses(&self, name: &str) -> DeployResult<Vec<Address>> {
        match self.require(name)? {
            SettingValue::Addresses(list) => Ok(list.clone()),
            other => Err(self.mismatch(name, ParamKind::Addresses, other)),
        }
    }

    pub fn uints(&self, name: &str) -> DeployResult<Vec<U256>> {
        match self.require(name)? {
            SettingValue::Uints(list) => Ok(list.clone()),
            other => Err(self.mismatch(name, ParamKind::Uints, other)),
        }
    }

    pub fn tiers(&self, name: &str) -> DeployResult<Vec<Tier>> {
        match self.require(name)? {
            SettingValue::Tiers(list) => Ok(list.clone()),
            other => Err(self.mismatch(name, ParamKind::Tiers, other)),
        }
    }
}

/// Merge the layers of `scope` and check every required parameter is present.
pub fn resolve(
    pipeline: &str,
    scope: &str,
    specs: &[ParamSpec],
    layers: &ScopeLayers,
) -> DeployResult<ResolvedSettings> {
    let mut values = BTreeMap::new();
    for layer in layers.in_priority_order() {
        for (name, value) in &layer.0 {
            values.insert(name.clone(), value.clone());
        }
    }

    if let Some(missing) = specs
        .iter()
        .find(|spec| spec.required && !values.contains_key(&spec.name))
    {
        return Err(DeployError::MissingRequiredParameter {
            pipeline: pipeline.to_string(),
            scope: scope.to_string(),
            param: missing.name.clone(),
        });
    }

    Ok(ResolvedSettings {
        scope: scope.to_string(),
        values,
    })
}
