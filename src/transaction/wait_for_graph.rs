use std::collections::{HashMap, HashSet};

use super::TransactionID;

/// The waits-for relation between transactions, kept as adjacency
/// sets rather than object references so edges can be replaced
/// wholesale on every blocked poll.
pub(crate) struct WaitForGraph {
    // key: transaction id, value: the transactions that the key transaction is waiting for
    graph: HashMap<TransactionID, HashSet<TransactionID>>,
}

impl WaitForGraph {
    pub(crate) fn new() -> Self {
        Self {
            graph: HashMap::new(),
        }
    }

    /// Replace the outgoing edges of `from`. A transaction runs on a
    /// single thread, so it waits on at most one slot at a time and
    /// its edge set is always recomputed from that slot.
    pub(crate) fn set_edges(&mut self, from: TransactionID, to: HashSet<TransactionID>) {
        if to.is_empty() {
            self.graph.remove(&from);
        } else {
            self.graph.insert(from, to);
        }
    }

    /// Drop the outgoing edges of `tid`, used when its request has
    /// been granted or cancelled.
    pub(crate) fn remove_waiter(&mut self, tid: TransactionID) {
        self.graph.remove(&tid);
    }

    /// Drop `tid` entirely, both as a waiter and as a wait target.
    pub(crate) fn remove_transaction(&mut self, tid: TransactionID) {
        self.graph.remove(&tid);
        for targets in self.graph.values_mut() {
            targets.remove(&tid);
        }
        self.graph.retain(|_, targets| !targets.is_empty());
    }

    /// Search for a cycle that runs through `start`. Returns the
    /// cycle path (starting and ending at `start`) when one exists.
    pub(crate) fn find_cycle_from(&self, start: TransactionID) -> Option<Vec<TransactionID>> {
        let mut visited = HashSet::new();
        visited.insert(start);

        let mut path = vec![start];
        if self.dfs(start, start, &mut visited, &mut path) {
            path.push(start);
            return Some(path);
        }

        None
    }

    fn dfs(
        &self,
        current: TransactionID,
        start: TransactionID,
        visited: &mut HashSet<TransactionID>,
        path: &mut Vec<TransactionID>,
    ) -> bool {
        if let Some(targets) = self.graph.get(&current) {
            for &next in targets {
                if next == start {
                    return true;
                }

                if visited.insert(next) {
                    path.push(next);
                    if self.dfs(next, start, visited, path) {
                        return true;
                    }
                    path.pop();
                }
            }
        }

        false
    }
}
