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

use chakra_format::ChakraFormatError;
use pytorch_trace_format::PyTorchTraceError;
use std::path::PathBuf;
use thiserror::Error;

/// Which half of a split CPU record failed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitSegment {
    First,
    Second,
}

impl std::fmt::Display for SplitSegment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SplitSegment::First => f.write_str("first"),
            SplitSegment::Second => f.write_str("second"),
        }
    }
}

#[derive(Error, Debug)]
pub enum ConvertError {
    #[error("invalid converter configuration {}: {message}", path.display())]
    Config { path: PathBuf, message: String },

    #[error("failed to load execution trace: {0}")]
    Load(#[from] PyTorchTraceError),

    #[error("malformed execution trace: operator id {id} appears more than once")]
    DuplicateOperator { id: u64 },

    #[error(
        "invalid timestamps for the {segment} split of CPU node {id} ({name}): \
         cpu start {cpu_start}, cpu duration {cpu_duration}, gpu start {gpu_start}, \
         segment start {segment_start}, segment duration {segment_duration}"
    )]
    TimestampInconsistency {
        id: u64,
        name: String,
        segment: SplitSegment,
        cpu_start: i64,
        cpu_duration: i64,
        gpu_start: i64,
        segment_start: i64,
        segment_duration: i64,
    },

    #[error("duplicate node id {id} in Chakra trace ({first} and {second})")]
    DuplicateIdentity {
        id: u64,
        first: String,
        second: String,
    },

    #[error("cyclic dependency detected: {path}")]
    CyclicDependency { path: String, ids: Vec<u64> },

    #[error("failed to write Chakra trace: {0}")]
    Write(#[from] ChakraFormatError),

    #[error("failed to persist Chakra trace to {}: {source}", path.display())]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, ConvertError>;
