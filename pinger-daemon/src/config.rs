// Copyright 2020 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Target configuration and its three-way precedence: the `HOSTS`
//! environment variable beats positional CLI arguments, which beat a YAML
//! config file.

use std::fs;

use pinger_core::TargetSpec;
use serde::Deserialize;

/// One entry in a YAML config file's `targets:` list.
#[derive(Debug, Deserialize)]
pub struct TargetEntry {
    pub host: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// The on-disk shape of a config file. Only the parts this daemon reads;
/// unknown keys are ignored rather than rejected, matching the teacher's
/// forgiving deserialization.
#[derive(Debug, Deserialize, Default)]
pub struct FileConfig {
    #[serde(default)]
    pub targets: Vec<TargetEntry>,
}

impl FileConfig {
    /// Reads a file located at `filepath` and constructs a `FileConfig`.
    pub fn from_filepath(filepath: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = fs::read_to_string(filepath)?;
        Self::from_str(&contents)
    }

    pub fn from_str(contents: &str) -> Result<Self, Box<dyn std::error::Error>> {
        Ok(serde_yaml::from_str(contents)?)
    }
}

/// Resolve the target list. `HOSTS` (space- or comma-separated) wins over
/// `args`, which wins over `file`. `file` is only consulted when both other
/// sources are empty.
pub fn resolve_targets(
    hosts_env: Option<&str>,
    args: &[String],
    file: Option<&FileConfig>,
) -> Vec<TargetSpec> {
    if let Some(hosts) = hosts_env.filter(|h| !h.is_empty()) {
        return targets_from_hosts_env(hosts);
    }
    if !args.is_empty() {
        return targets_from_args(args);
    }
    file.map(targets_from_file).unwrap_or_default()
}

fn targets_from_hosts_env(hosts: &str) -> Vec<TargetSpec> {
    let sep = if hosts.contains(',') { ',' } else { ' ' };
    hosts
        .split(sep)
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .map(|host| TargetSpec {
            host: host.to_owned(),
            display_name: None,
        })
        .collect()
}

fn targets_from_args(args: &[String]) -> Vec<TargetSpec> {
    args.iter()
        .map(|host| TargetSpec {
            host: host.clone(),
            display_name: None,
        })
        .collect()
}

fn targets_from_file(file: &FileConfig) -> Vec<TargetSpec> {
    file.targets
        .iter()
        .map(|entry| TargetSpec {
            host: entry.host.clone(),
            display_name: entry.name.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE_CFG: &str = r#"
targets:
  - name: router
    host: 192.168.0.1
  - host: 8.8.8.8
"#;

    #[test]
    fn from_str_empty_yields_no_targets() {
        let cfg = FileConfig::from_str("").unwrap();
        assert!(cfg.targets.is_empty());
    }

    #[test]
    fn from_str_valid() {
        let cfg = FileConfig::from_str(SAMPLE_CFG).unwrap();
        assert_eq!(cfg.targets.len(), 2);
        assert_eq!(cfg.targets[0].host, "192.168.0.1");
        assert_eq!(cfg.targets[0].name.as_deref(), Some("router"));
        assert_eq!(cfg.targets[1].name, None);
    }

    #[test]
    fn from_file_valid() {
        let mut tmpfile = tempfile::NamedTempFile::new().unwrap();
        write!(tmpfile.as_file_mut(), "{}", SAMPLE_CFG).unwrap();
        let path = tmpfile.into_temp_path();
        let cfg = FileConfig::from_filepath(path.to_str().unwrap()).unwrap();
        assert_eq!(cfg.targets.len(), 2);
        path.close().unwrap();
    }

    #[test]
    fn from_file_nofile_is_an_error() {
        assert!(FileConfig::from_filepath("").is_err());
    }

    #[test]
    fn hosts_env_beats_args_and_file() {
        let file = FileConfig::from_str(SAMPLE_CFG).unwrap();
        let args = vec!["1.1.1.1".to_owned()];
        let targets = resolve_targets(Some("a.example,b.example"), &args, Some(&file));
        let hosts: Vec<_> = targets.iter().map(|t| t.host.as_str()).collect();
        assert_eq!(hosts, vec!["a.example", "b.example"]);
    }

    #[test]
    fn args_beat_file_when_hosts_env_absent() {
        let file = FileConfig::from_str(SAMPLE_CFG).unwrap();
        let args = vec!["1.1.1.1".to_owned()];
        let targets = resolve_targets(None, &args, Some(&file));
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].host, "1.1.1.1");
    }

    #[test]
    fn file_used_only_when_others_empty() {
        let file = FileConfig::from_str(SAMPLE_CFG).unwrap();
        let targets = resolve_targets(None, &[], Some(&file));
        assert_eq!(targets.len(), 2);
    }

    #[test]
    fn hosts_env_splits_on_space_when_no_comma() {
        let targets = targets_from_hosts_env("a.example b.example");
        assert_eq!(targets.len(), 2);
    }
}
