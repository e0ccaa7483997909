//! Build configurations and their audited revision snapshots.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use uuid::Uuid;

use super::task::BuildOptions;

/// Key of an audited configuration snapshot: (configuration id, revision).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdRev {
    /// The configuration id.
    pub id: Uuid,
    /// The configuration revision.
    pub revision: String,
}

impl IdRev {
    /// Creates a new id/revision key.
    #[must_use]
    pub fn new(id: Uuid, revision: impl Into<String>) -> Self {
        Self {
            id,
            revision: revision.into(),
        }
    }
}

impl fmt::Display for IdRev {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.id, self.revision)
    }
}

/// The user on whose behalf a build set is submitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// The user id.
    pub id: Uuid,
    /// The login name.
    pub username: String,
}

impl User {
    /// Creates a new user.
    #[must_use]
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            username: username.into(),
        }
    }
}

/// User-defined description of what to build: script, dependencies,
/// environment parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildConfiguration {
    /// The configuration id.
    pub id: Uuid,
    /// Human-readable name.
    pub name: String,
    /// The build script to execute.
    pub build_script: String,
    /// Ids of configurations this one depends on.
    #[serde(default)]
    pub dependency_ids: HashSet<Uuid>,
    /// The current revision.
    pub revision: String,
    /// Generic build parameters. Ordered so fingerprints are stable.
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
    /// Whether the configuration was explicitly marked dirty by the user.
    #[serde(default)]
    pub explicitly_dirty: bool,
}

impl BuildConfiguration {
    /// Creates a new configuration at revision "1".
    #[must_use]
    pub fn new(name: impl Into<String>, build_script: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            build_script: build_script.into(),
            dependency_ids: HashSet::new(),
            revision: "1".to_string(),
            parameters: BTreeMap::new(),
            explicitly_dirty: false,
        }
    }

    /// Adds a dependency on another configuration.
    #[must_use]
    pub fn with_dependency(mut self, dependency_id: Uuid) -> Self {
        self.dependency_ids.insert(dependency_id);
        self
    }

    /// Sets a build parameter.
    #[must_use]
    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// Sets the revision.
    #[must_use]
    pub fn with_revision(mut self, revision: impl Into<String>) -> Self {
        self.revision = revision.into();
        self
    }

    /// Marks the configuration as explicitly dirty.
    #[must_use]
    pub fn dirty(mut self) -> Self {
        self.explicitly_dirty = true;
        self
    }

    /// Takes an immutable snapshot of the configuration at its current
    /// revision.
    #[must_use]
    pub fn audit(&self) -> BuildConfigurationAudited {
        BuildConfigurationAudited {
            id_rev: IdRev::new(self.id, self.revision.clone()),
            name: self.name.clone(),
            build_script: self.build_script.clone(),
            dependency_ids: self.dependency_ids.clone(),
            parameters: self.parameters.clone(),
            explicitly_dirty: self.explicitly_dirty,
        }
    }
}

/// Immutable snapshot of a [`BuildConfiguration`] at a specific revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildConfigurationAudited {
    /// The (id, revision) key of this snapshot.
    pub id_rev: IdRev,
    /// Human-readable name.
    pub name: String,
    /// The build script to execute.
    pub build_script: String,
    /// Ids of configurations this one depends on.
    pub dependency_ids: HashSet<Uuid>,
    /// Generic build parameters.
    pub parameters: BTreeMap<String, String>,
    /// Whether the configuration was explicitly marked dirty.
    pub explicitly_dirty: bool,
}

impl BuildConfigurationAudited {
    /// The configuration id this snapshot belongs to.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id_rev.id
    }

    /// Fingerprint over every input that affects the build output.
    ///
    /// Two snapshots with equal fingerprints (built under equal options)
    /// produce equivalent results, so a prior successful record with the same
    /// fingerprint satisfies a new request.
    #[must_use]
    pub fn fingerprint(&self, options: &BuildOptions) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.id_rev.revision.as_bytes());
        hasher.update([0x1f]);
        hasher.update(self.build_script.as_bytes());
        for (key, value) in &self.parameters {
            hasher.update([0x1f]);
            hasher.update(key.as_bytes());
            hasher.update([0x1e]);
            hasher.update(value.as_bytes());
        }
        hasher.update([0x1f]);
        hasher.update([u8::from(options.temporary_build)]);
        hasher.update([options.alignment_preference as u8]);
        hex::encode(hasher.finalize())
    }
}
