use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::docker::{self, ImageOverrides, UserSpec};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Image reference → replacement reference.
    pub image_overrides: HashMap<String, String>,
    pub docker_executable: String,
    /// Container uid. When unset, Unix hosts default to the current user.
    pub user_id: Option<u32>,
    /// Only consulted together with `user_id`.
    pub group_id: Option<u32>,
    /// Staging area for execution output directories.
    pub data_dir: PathBuf,
    /// Environment passed to every container run.
    pub environ: BTreeMap<String, String>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            image_overrides: HashMap::new(),
            docker_executable: "docker".to_string(),
            user_id: None,
            group_id: None,
            data_dir: PathBuf::from("styx_tmp"),
            environ: BTreeMap::new(),
        }
    }
}

impl RunnerConfig {
    /// The identity containers run as: the explicit `user_id` if configured,
    /// else the host's current user on Unix, else nothing.
    pub fn resolve_user(&self) -> Option<UserSpec> {
        match self.user_id {
            Some(uid) => Some(UserSpec {
                uid,
                gid: self.group_id,
            }),
            None => docker::current_user(),
        }
    }

    pub fn overrides(&self) -> ImageOverrides {
        ImageOverrides::new(self.image_overrides.clone())
    }
}
