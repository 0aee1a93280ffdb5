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

//! Converts PyTorch execution traces into Chakra execution traces.
//!
//! The pipeline runs in stages over one trace:
//!
//! 1. [`record::RecordGraph::build`] links operators into a call tree.
//! 2. [`splitter::split_cpu_nodes_with_gpu_child`] re-identifies every record and
//!    splits CPU operators around the kernel they launched.
//! 3. [`classifier::NodeTranslator`] turns records into Chakra nodes.
//! 4. [`dependency::convert_ctrl_dep_to_data_dep`] encodes the call tree as data
//!    dependencies.
//! 5. [`sanitizer`] prunes unconnected nodes and rejects cycles.
//! 6. [`writer::persist_trace`] writes the result.
//!
//! [`converter::ChakraConverter`] drives all of them.

pub mod classifier;
pub mod config;
pub mod converter;
pub mod dependency;
pub mod error;
pub mod id_assigner;
pub mod jsonizer;
pub mod record;
pub mod sanitizer;
pub mod splitter;
pub mod writer;

pub use config::ConverterConfig;
pub use converter::{ChakraConverter, ChakraTrace, ConversionSummary};
pub use error::{ConvertError, Result};
