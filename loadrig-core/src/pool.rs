//! Credential and test-data pools shared read-only by all virtual users

use crate::error::{PlanError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Login credentials for one simulated user
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

// Keep passwords out of logs
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Fixed pool of credentials; one entry is drawn per iteration
#[derive(Debug, Clone)]
pub struct CredentialPool {
    entries: Vec<Credentials>,
}

impl CredentialPool {
    pub fn new(entries: Vec<Credentials>) -> Result<Self> {
        if entries.is_empty() {
            return Err(PlanError::EmptyPool("credentials".to_string()));
        }
        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn first(&self) -> &Credentials {
        &self.entries[0]
    }

    /// Draw a credential uniformly at random
    pub fn pick(&self, rng: &mut fastrand::Rng) -> &Credentials {
        &self.entries[rng.usize(..self.entries.len())]
    }
}

/// Named lists of values substituted into step templates
#[derive(Debug, Clone, Default)]
pub struct DataPools {
    pools: BTreeMap<String, Vec<String>>,
}

impl DataPools {
    pub fn new(pools: BTreeMap<String, Vec<String>>) -> Result<Self> {
        for (name, values) in &pools {
            if values.is_empty() {
                return Err(PlanError::EmptyPool(name.clone()));
            }
        }
        Ok(Self { pools })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.pools.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.pools.keys().map(String::as_str)
    }

    /// Draw one value from every pool for a single iteration
    pub fn draw(&self, rng: &mut fastrand::Rng) -> HashMap<String, String> {
        self.pools
            .iter()
            .map(|(name, values)| (name.clone(), values[rng.usize(..values.len())].clone()))
            .collect()
    }
}
