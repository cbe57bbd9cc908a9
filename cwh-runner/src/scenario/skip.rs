//! Skip predicates and the platform environment they inspect
//!
//! Predicates run lazily, right before their scenario, and stop at the first
//! one that asks to skip.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Device the harness is running on
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub name: String,
    #[serde(default)]
    pub version: Option<u32>,
}

/// Platform capabilities consulted by skip predicates
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Environment {
    pub device: DeviceInfo,
    pub running_in_vm: bool,
    /// MIME types (with codecs) the platform can decode
    pub supported_types: BTreeSet<String>,
    /// Key system id → supported
    pub key_systems: BTreeMap<String, bool>,
}

impl Environment {
    pub fn is_type_supported(&self, mime_type: &str) -> bool {
        self.supported_types.contains(mime_type)
    }

    pub fn supports_key_system(&self, key_system: &str) -> bool {
        self.key_systems.get(key_system).copied().unwrap_or(false)
    }
}

/// Result of evaluating one predicate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipDecision {
    Proceed,
    Skip(String),
}

impl SkipDecision {
    pub fn skip(reason: impl Into<String>) -> Self {
        SkipDecision::Skip(reason.into())
    }
}

type PredicateFn = dyn Fn(&Environment) -> SkipDecision + Send + Sync;

/// Named check deciding whether a scenario can run here
#[derive(Clone)]
pub struct SkipPredicate {
    name: String,
    check: Arc<PredicateFn>,
}

impl SkipPredicate {
    pub fn new<F>(name: impl Into<String>, check: F) -> Self
    where
        F: Fn(&Environment) -> SkipDecision + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            check: Arc::new(check),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn evaluate(&self, environment: &Environment) -> SkipDecision {
        (self.check)(environment)
    }
}

impl std::fmt::Debug for SkipPredicate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SkipPredicate").field("name", &self.name).finish()
    }
}

/// Evaluate predicates in order, stopping at the first skip
pub fn evaluate_all(predicates: &[SkipPredicate], environment: &Environment) -> SkipDecision {
    for predicate in predicates {
        if let SkipDecision::Skip(reason) = predicate.evaluate(environment) {
            return SkipDecision::Skip(reason);
        }
    }
    SkipDecision::Proceed
}

/// Skip unless the platform decodes `mime_type`
pub fn requires_mime_type(mime_type: &str) -> SkipPredicate {
    let mime_type = mime_type.to_string();
    SkipPredicate::new(format!("requires {mime_type}"), move |env| {
        if env.is_type_supported(&mime_type) {
            SkipDecision::Proceed
        } else {
            SkipDecision::skip(format!("{mime_type} is not supported by the platform."))
        }
    })
}

/// Skip unless the platform supports `key_system`
pub fn requires_key_system(key_system: &str) -> SkipPredicate {
    let key_system = key_system.to_string();
    SkipPredicate::new(format!("requires {key_system}"), move |env| {
        if env.supports_key_system(&key_system) {
            SkipDecision::Proceed
        } else {
            SkipDecision::skip("Needed DRM is not supported on this platform")
        }
    })
}

/// Skip on a device, optionally only on one version of it
pub fn excluded_device(name: &str, version: Option<u32>, reason: &str) -> SkipPredicate {
    let name = name.to_string();
    let reason = reason.to_string();
    SkipPredicate::new(format!("excludes device {name}"), move |env| {
        let name_matches = env.device.name == name;
        let version_matches = version.map_or(true, |v| env.device.version == Some(v));
        if name_matches && version_matches {
            SkipDecision::Skip(reason.clone())
        } else {
            SkipDecision::Proceed
        }
    })
}

/// Skip when running inside a virtual machine
pub fn excluded_in_vm(reason: &str) -> SkipPredicate {
    let reason = reason.to_string();
    SkipPredicate::new("excludes virtual machines", move |env| {
        if env.running_in_vm {
            SkipDecision::Skip(reason.clone())
        } else {
            SkipDecision::Proceed
        }
    })
}
