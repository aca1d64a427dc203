#![forbid(unsafe_code)]

use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};

use crate::error::Result;

/// Outcome of a bounded breadth-first expansion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Expansion {
    /// Every id reached from the starts, with its minimum depth, in discovery
    /// order. Start ids (depth 0) are never included.
    pub reached: Vec<(i64, usize)>,
    /// First predecessor through which each reached id was discovered.
    pub parents: HashMap<i64, i64>,
    /// Some entity at `max_depth` still had an unvisited neighbour.
    pub truncated: bool,
    pub max_depth_reached: usize,
}

/// Breadth-first expansion from `starts`, following `neighbors` up to
/// `max_depth` hops.
///
/// Each id is expanded at most once, at the first (and therefore minimum)
/// depth it is seen, so cycles terminate. `neighbors` is called once per
/// expanded id; ids at `max_depth` are probed only until truncation is known.
pub fn bounded_bfs<F>(starts: &[i64], max_depth: usize, neighbors: F) -> Result<Expansion>
where
    F: FnMut(i64) -> Result<Vec<i64>>,
{
    expand(starts, max_depth, neighbors, None)
}

/// Shortest path from `from` to `to` (both inclusive) within `max_depth` hops.
pub fn shortest_path<F>(from: i64, to: i64, max_depth: usize, neighbors: F) -> Result<Option<Vec<i64>>>
where
    F: FnMut(i64) -> Result<Vec<i64>>,
{
    if from == to {
        return Ok(Some(vec![from]));
    }

    let expansion = expand(&[from], max_depth, neighbors, Some(to))?;
    if !expansion.parents.contains_key(&to) {
        return Ok(None);
    }

    let mut path = vec![to];
    let mut current = to;
    while let Some(&parent) = expansion.parents.get(&current) {
        path.push(parent);
        if parent == from {
            break;
        }
        current = parent;
    }
    path.reverse();
    Ok(Some(path))
}

fn expand<F>(
    starts: &[i64],
    max_depth: usize,
    mut neighbors: F,
    stop_at: Option<i64>,
) -> Result<Expansion>
where
    F: FnMut(i64) -> Result<Vec<i64>>,
{
    let mut depth_of: HashMap<i64, usize> = HashMap::new();
    let mut queue = VecDeque::new();
    let mut out = Expansion::default();

    for &start in starts {
        if let Entry::Vacant(slot) = depth_of.entry(start) {
            slot.insert(0);
            queue.push_back((start, 0usize));
        }
    }

    while let Some((id, depth)) = queue.pop_front() {
        if depth >= max_depth {
            // Everything at depth <= max_depth is already known here, so an
            // unknown neighbour lies beyond the limit.
            if !out.truncated {
                out.truncated = neighbors(id)?.iter().any(|n| !depth_of.contains_key(n));
            }
            continue;
        }

        for next in neighbors(id)? {
            let Entry::Vacant(slot) = depth_of.entry(next) else {
                continue;
            };
            let next_depth = depth + 1;
            slot.insert(next_depth);
            out.parents.insert(next, id);
            out.reached.push((next, next_depth));
            out.max_depth_reached = out.max_depth_reached.max(next_depth);
            if stop_at == Some(next) {
                return Ok(out);
            }
            queue.push_back((next, next_depth));
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::{BTreeMap, HashSet};

    fn adjacency(edges: &[(i64, i64)]) -> BTreeMap<i64, Vec<i64>> {
        let mut adj: BTreeMap<i64, Vec<i64>> = BTreeMap::new();
        for &(from, to) in edges {
            adj.entry(from).or_default().push(to);
        }
        for targets in adj.values_mut() {
            targets.sort_unstable();
            targets.dedup();
        }
        adj
    }

    fn run(adj: &BTreeMap<i64, Vec<i64>>, starts: &[i64], depth: usize) -> Expansion {
        bounded_bfs(starts, depth, |id| Ok(adj.get(&id).cloned().unwrap_or_default())).unwrap()
    }

    #[test]
    fn cycle_terminates_with_minimum_depths() {
        let adj = adjacency(&[(1, 2), (2, 3), (3, 1)]);
        let result = run(&adj, &[1], 10);
        assert_eq!(result.reached, vec![(2, 1), (3, 2)]);
        assert!(!result.truncated);
        assert_eq!(result.max_depth_reached, 2);
    }

    #[test]
    fn chain_truncates_at_limit() {
        let edges: Vec<_> = (0..9).map(|i| (i, i + 1)).collect();
        let adj = adjacency(&edges);

        let shallow = run(&adj, &[0], 3);
        assert_eq!(shallow.reached.len(), 3);
        assert!(shallow.truncated);

        let deep = run(&adj, &[0], 20);
        assert_eq!(deep.reached.len(), 9);
        assert!(!deep.truncated);
    }

    #[test]
    fn exact_fit_is_not_truncated() {
        let adj = adjacency(&[(0, 1), (1, 2)]);
        let result = run(&adj, &[0], 2);
        assert_eq!(result.reached.len(), 2);
        assert!(!result.truncated);
    }

    #[test]
    fn back_edge_at_limit_does_not_truncate() {
        let adj = adjacency(&[(0, 1), (1, 0)]);
        let result = run(&adj, &[0], 1);
        assert!(!result.truncated);
    }

    #[test]
    fn multiple_starts_exclude_each_other() {
        let adj = adjacency(&[(1, 2), (2, 3), (3, 4)]);
        let result = run(&adj, &[1, 3], 5);
        assert_eq!(result.reached, vec![(2, 1), (4, 1)]);
    }

    #[test]
    fn shortest_path_follows_parents() {
        let adj = adjacency(&[(1, 2), (2, 3), (1, 4), (4, 5), (5, 3)]);
        let lookup = |id| Ok(adj.get(&id).cloned().unwrap_or_default());
        assert_eq!(shortest_path(1, 3, 10, lookup).unwrap(), Some(vec![1, 2, 3]));
        assert_eq!(shortest_path(3, 1, 10, lookup).unwrap(), None);
        assert_eq!(shortest_path(1, 3, 1, lookup).unwrap(), None);
        assert_eq!(shortest_path(7, 7, 1, lookup).unwrap(), Some(vec![7]));
    }

    proptest! {
        #[test]
        fn expansion_is_minimal_and_bounded(
            edges in proptest::collection::vec((0i64..24, 0i64..24), 0..80),
            start in 0i64..24,
            depth in 1usize..6,
        ) {
            let adj = adjacency(&edges);
            let result = run(&adj, &[start], depth);

            let mut depth_of: HashMap<i64, usize> = HashMap::new();
            depth_of.insert(start, 0);
            let mut seen = HashSet::new();
            for &(id, d) in &result.reached {
                prop_assert!(seen.insert(id), "{id} reported twice");
                prop_assert!(id != start);
                prop_assert!(d >= 1 && d <= depth);
                depth_of.insert(id, d);
            }

            // No edge can shortcut a reported depth, and every edge out of a
            // non-frontier entity lands inside the result.
            for (&from, targets) in &adj {
                let Some(&d) = depth_of.get(&from) else { continue };
                for to in targets {
                    match depth_of.get(to) {
                        Some(&td) => prop_assert!(td <= d + 1),
                        None => prop_assert!(d == depth),
                    }
                }
            }

            let frontier_escapes = depth_of.iter().any(|(id, d)| {
                *d == depth
                    && adj
                        .get(id)
                        .is_some_and(|targets| targets.iter().any(|t| !depth_of.contains_key(t)))
            });
            prop_assert_eq!(result.truncated, frontier_escapes);

            let again = run(&adj, &[start], depth);
            prop_assert_eq!(again, result);
        }
    }
}
