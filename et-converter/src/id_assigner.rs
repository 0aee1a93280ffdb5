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

use std::collections::HashMap;

/// Hands out fresh node IDs and remembers every ID derived from an original operator.
///
/// A single operator can fan out into several Chakra nodes when it is split, and the
/// same operator name can recur many times, so every output node gets its own ID.
#[derive(Debug, Default)]
pub struct UniqueIdAssigner {
    next_id: u64,
    assigned: HashMap<u64, Vec<u64>>,
}

impl UniqueIdAssigner {
    /// `next_id` must be past every original ID still in use.
    pub fn new(next_id: u64) -> Self {
        Self {
            next_id,
            assigned: HashMap::new(),
        }
    }

    pub fn assign(&mut self, original_id: u64) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.assigned.entry(original_id).or_default().push(id);
        id
    }

    pub fn history(&self, original_id: u64) -> &[u64] {
        self.assigned
            .get(&original_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn next_id(&self) -> u64 {
        self.next_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_strictly_increasing() {
        let mut ids = UniqueIdAssigner::new(10);
        let issued: Vec<u64> = [3, 3, 1, 7, 3, 1].iter().map(|&o| ids.assign(o)).collect();
        assert_eq!(issued, vec![10, 11, 12, 13, 14, 15]);
        assert!(issued.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(ids.next_id(), 16);
    }

    #[test]
    fn history_lists_ids_in_assignment_order() {
        let mut ids = UniqueIdAssigner::new(5);
        ids.assign(1);
        ids.assign(2);
        ids.assign(1);
        assert_eq!(ids.history(1), &[5, 7]);
        assert_eq!(ids.history(2), &[6]);
        assert!(ids.history(99).is_empty());
    }
}
