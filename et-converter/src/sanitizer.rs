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
use chakra_format::Node;
use std::collections::{BTreeMap, HashMap, HashSet};

/// Removes nodes that neither depend on anything nor are depended upon.
pub fn remove_dangling_nodes(nodes: &mut BTreeMap<u64, Node>) -> Vec<Node> {
    let depended_upon: HashSet<u64> = nodes
        .values()
        .flat_map(|node| node.data_deps.iter().copied())
        .collect();

    let dangling: Vec<u64> = nodes
        .values()
        .filter(|node| node.data_deps.is_empty() && !depended_upon.contains(&node.id))
        .map(|node| node.id)
        .collect();

    let removed: Vec<Node> = dangling
        .into_iter()
        .filter_map(|id| nodes.remove(&id))
        .collect();

    if !removed.is_empty() {
        tracing::info!(count = removed.len(), "removed dangling nodes");
        for node in &removed {
            tracing::debug!(id = node.id, name = %node.name, "removed dangling node");
        }
    }
    removed
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    OnStack,
    Done,
}

/// Fails with [`ConvertError::CyclicDependency`] if the data dependencies contain a cycle.
///
/// Dependencies on IDs outside `nodes` are ignored.
pub fn identify_cyclic_dependencies(nodes: &BTreeMap<u64, Node>) -> Result<()> {
    let mut marks: HashMap<u64, Mark> = HashMap::with_capacity(nodes.len());

    for &start in nodes.keys() {
        if marks.contains_key(&start) {
            continue;
        }
        marks.insert(start, Mark::OnStack);
        // (node, index of the next dependency to explore)
        let mut path: Vec<(u64, usize)> = vec![(start, 0)];

        while let Some(&(id, next)) = path.last() {
            let deps = nodes.get(&id).map_or(&[][..], |node| node.data_deps.as_slice());
            let Some(&dep) = deps.get(next) else {
                marks.insert(id, Mark::Done);
                path.pop();
                continue;
            };
            if let Some(top) = path.last_mut() {
                top.1 += 1;
            }

            match marks.get(&dep) {
                Some(Mark::OnStack) => return Err(cycle_error(nodes, &path, dep)),
                Some(Mark::Done) => {}
                None if nodes.contains_key(&dep) => {
                    marks.insert(dep, Mark::OnStack);
                    path.push((dep, 0));
                }
                None => {}
            }
        }
    }
    Ok(())
}

fn cycle_error(nodes: &BTreeMap<u64, Node>, path: &[(u64, usize)], repeated: u64) -> ConvertError {
    let begin = path
        .iter()
        .position(|&(id, _)| id == repeated)
        .unwrap_or_default();
    let ids: Vec<u64> = path[begin..]
        .iter()
        .map(|&(id, _)| id)
        .chain(std::iter::once(repeated))
        .collect();
    let path = ids
        .iter()
        .map(|id| nodes.get(id).map_or("<unknown>", |node| node.name.as_str()))
        .collect::<Vec<_>>()
        .join(" -> ");
    tracing::error!(%path, "cyclic dependency detected");
    ConvertError::CyclicDependency { path, ids }
}
