// Copyright (C) 2025 Category Labs, Inc.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

use crate::error::{ConvertError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConverterConfig {
    /// Length of the `involved_dim` list attached to collective nodes.
    #[serde(default = "default_num_dims")]
    pub num_dims: usize,

    /// Exact names of the per-thread root records.
    #[serde(default = "default_root_names")]
    pub root_names: Vec<String>,

    #[serde(default)]
    pub markers: CollectiveMarkers,
}

/// Substrings identifying collective communication in operator names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectiveMarkers {
    /// Matched against GPU kernel names.
    #[serde(default = "default_gpu_markers")]
    pub gpu: Vec<String>,

    /// Matched against CPU and label record names.
    #[serde(default = "default_cpu_markers")]
    pub cpu: Vec<String>,
}

fn default_num_dims() -> usize {
    1
}

fn default_root_names() -> Vec<String> {
    vec![
        "[pytorch|profiler|execution_graph|thread]".to_string(),
        "[pytorch|profiler|execution_trace|thread]".to_string(),
    ]
}

fn default_gpu_markers() -> Vec<String> {
    vec!["ncclKernel".to_string(), "ncclDevKernel".to_string()]
}

fn default_cpu_markers() -> Vec<String> {
    vec!["c10d::".to_string(), "nccl:".to_string()]
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            num_dims: default_num_dims(),
            root_names: default_root_names(),
            markers: CollectiveMarkers::default(),
        }
    }
}

impl Default for CollectiveMarkers {
    fn default() -> Self {
        Self {
            gpu: default_gpu_markers(),
            cpu: default_cpu_markers(),
        }
    }
}

impl CollectiveMarkers {
    pub fn is_gpu_collective(&self, name: &str) -> bool {
        self.gpu.iter().any(|marker| name.contains(marker.as_str()))
    }

    pub fn is_cpu_collective(&self, name: &str) -> bool {
        self.cpu.iter().any(|marker| name.contains(marker.as_str()))
    }
}

impl ConverterConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let invalid = |message: String| ConvertError::Config {
            path: path.to_path_buf(),
            message,
        };
        let content = std::fs::read_to_string(path).map_err(|e| invalid(e.to_string()))?;
        toml::from_str(&content).map_err(|e| invalid(e.message().to_string()))
    }

    pub fn is_root_name(&self, name: &str) -> bool {
        self.root_names.iter().any(|root| root == name)
    }
}
