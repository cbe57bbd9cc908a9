//! Ordered scenario collection

use super::Scenario;
use crate::error::{Error, Result};

/// Ordered mapping of scenario id → scenario
///
/// Iteration follows declaration order so runs are reproducible. Ids are unique.
#[derive(Debug, Clone, Default)]
pub struct ScenarioMatrix {
    scenarios: Vec<Scenario>,
}

impl ScenarioMatrix {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a scenario; a duplicate id is a configuration error
    pub fn insert(&mut self, scenario: Scenario) -> Result<()> {
        if self.get(scenario.id()).is_some() {
            return Err(Error::Configuration(format!(
                "Duplicate scenario id: {}",
                scenario.id()
            )));
        }
        self.scenarios.push(scenario);
        Ok(())
    }

    /// Builder-style [`insert`](Self::insert)
    pub fn with(mut self, scenario: Scenario) -> Result<Self> {
        self.insert(scenario)?;
        Ok(self)
    }

    pub fn get(&self, id: &str) -> Option<&Scenario> {
        self.scenarios.iter().find(|s| s.id() == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Scenario> {
        self.scenarios.iter()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.scenarios.iter().map(|s| s.id()).collect()
    }

    pub fn len(&self) -> usize {
        self.scenarios.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenarios.is_empty()
    }

    /// Keep only scenarios whose id contains `pattern`, preserving order
    pub fn filter(&self, pattern: &str) -> ScenarioMatrix {
        ScenarioMatrix {
            scenarios: self
                .scenarios
                .iter()
                .filter(|s| s.id().contains(pattern))
                .cloned()
                .collect(),
        }
    }
}

impl<'a> IntoIterator for &'a ScenarioMatrix {
    type Item = &'a Scenario;
    type IntoIter = std::slice::Iter<'a, Scenario>;

    fn into_iter(self) -> Self::IntoIter {
        self.scenarios.iter()
    }
}
