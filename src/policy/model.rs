use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How the values of a single policy atom combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = "AND")]
    And,
    #[serde(rename = "OR")]
    Or,
}

/// Quota-style interval for call and timeliness policies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Interval {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    pub unit: String,
}

/// One policy atom. The set of kinds is closed; a clause holds at most one
/// atom of each kind because clauses decode from a kind-keyed mapping.
#[derive(Debug, Clone, PartialEq)]
pub enum PolicyAtom {
    User {
        operator: Operator,
        values: Vec<String>,
    },
    Role {
        operator: Operator,
        values: Vec<String>,
    },
    StorageLocation {
        operator: Operator,
        values: Vec<String>,
    },
    Call {
        operator: Operator,
        intervals: Vec<Interval>,
    },
    Timeliness {
        operator: Operator,
        intervals: Vec<Interval>,
    },
}

impl PolicyAtom {
    pub fn kind(&self) -> &'static str {
        match self {
            PolicyAtom::User { .. } => "user",
            PolicyAtom::Role { .. } => "role",
            PolicyAtom::StorageLocation { .. } => "storage-location",
            PolicyAtom::Call { .. } => "call",
            PolicyAtom::Timeliness { .. } => "timeliness",
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ValuesPayload {
    operator: Operator,
    values: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct IntervalsPayload {
    operator: Operator,
    intervals: Vec<Interval>,
}

/// An unordered conjunction of policy atoms.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PolicyClause {
    pub atoms: Vec<PolicyAtom>,
}

impl PolicyClause {
    /// Decode a clause from its wire form: a mapping from policy kind to the
    /// atom payload. Unknown kinds and payloads that do not match the schema
    /// are rejected.
    pub fn from_value(value: &Value) -> Result<Self, String> {
        let obj = value
            .as_object()
            .ok_or_else(|| "policy clause must be a mapping".to_string())?;

        let mut atoms = Vec::new();
        for (kind, payload) in obj {
            let atom = match kind.as_str() {
                "user" => {
                    let p: ValuesPayload = decode(kind, payload)?;
                    PolicyAtom::User {
                        operator: p.operator,
                        values: p.values,
                    }
                }
                "role" => {
                    let p: ValuesPayload = decode(kind, payload)?;
                    PolicyAtom::Role {
                        operator: p.operator,
                        values: p.values,
                    }
                }
                "storage-location" => {
                    let p: ValuesPayload = decode(kind, payload)?;
                    PolicyAtom::StorageLocation {
                        operator: p.operator,
                        values: p.values,
                    }
                }
                "call" => {
                    let p: IntervalsPayload = decode(kind, payload)?;
                    PolicyAtom::Call {
                        operator: p.operator,
                        intervals: p.intervals,
                    }
                }
                "timeliness" => {
                    let p: IntervalsPayload = decode(kind, payload)?;
                    PolicyAtom::Timeliness {
                        operator: p.operator,
                        intervals: p.intervals,
                    }
                }
                other => return Err(format!("unknown policy kind `{other}`")),
            };
            atoms.push(atom);
        }

        Ok(Self { atoms })
    }
}

fn decode<T: serde::de::DeserializeOwned>(kind: &str, payload: &Value) -> Result<T, String> {
    serde_json::from_value(payload.clone()).map_err(|e| format!("invalid `{kind}` policy: {e}"))
}

/// Policies at the general scope plus explicit per-path specializations.
/// Specializations inherit nothing; the lowerer materializes inheritance by
/// emitting parent-clause cross-products.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeneralPolicies {
    pub clauses: Vec<PolicyClause>,
    pub specialized_paths: BTreeMap<String, PathPolicies>,
}

impl GeneralPolicies {
    /// True when no clauses exist at any scope and nothing is specialized.
    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty() && self.specialized_paths.is_empty()
    }

    /// Entry for `path`, materialized empty if missing.
    pub fn path_entry(&mut self, path: &str) -> &mut PathPolicies {
        self.specialized_paths
            .entry(path.to_string())
            .or_insert_with(|| PathPolicies {
                path: path.to_string(),
                clauses: Vec::new(),
                specialized_methods: BTreeMap::new(),
            })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PathPolicies {
    pub path: String,
    pub clauses: Vec<PolicyClause>,
    pub specialized_methods: BTreeMap<String, PathMethodPolicies>,
}

impl PathPolicies {
    /// Entry for `method`, materialized empty if missing.
    pub fn method_entry(&mut self, method: &str) -> &mut PathMethodPolicies {
        self.specialized_methods
            .entry(method.to_string())
            .or_insert_with(|| PathMethodPolicies {
                path: self.path.clone(),
                method: method.to_string(),
                clauses: Vec::new(),
            })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PathMethodPolicies {
    pub path: String,
    pub method: String,
    pub clauses: Vec<PolicyClause>,
}

/// A named backend service: its module package name, identity provider and
/// policy tree.
#[derive(Debug, Clone, PartialEq)]
pub struct Service {
    pub name: String,
    pub identity_provider_url: String,
    pub policies: GeneralPolicies,
}

impl Service {
    pub fn new(
        name: impl Into<String>,
        identity_provider_url: impl Into<String>,
        policies: GeneralPolicies,
    ) -> Self {
        Self {
            name: name.into(),
            identity_provider_url: identity_provider_url.into(),
            policies,
        }
    }
}
