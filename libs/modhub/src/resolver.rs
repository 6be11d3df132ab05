//! Activation order over the dependency graph.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use thiserror::Error;

use crate::manifest::Manifest;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("cyclic dependency detected: {}", path.join(" -> "))]
    CyclicDependency { path: Vec<String> },
    #[error("module '{module}' depends on unknown module '{missing}'")]
    MissingDependency { module: String, missing: String },
}

/// Pure topological sort over a manifest set.
///
/// Edges point dependency -> dependent. Among modules that are ready at the
/// same time, the smaller declared menu order wins, then the smaller id.
#[derive(Debug, Default, Clone, Copy)]
pub struct DependencyResolver;

impl DependencyResolver {
    pub fn resolve_order<'a, I>(manifests: I) -> Result<Vec<String>, ResolveError>
    where
        I: IntoIterator<Item = &'a Manifest>,
    {
        let nodes: Vec<&Manifest> = manifests.into_iter().collect();

        let mut idx: HashMap<&str, usize> = HashMap::with_capacity(nodes.len());
        for (i, m) in nodes.iter().enumerate() {
            idx.entry(m.id.as_str()).or_insert(i);
        }

        // 1) every dependency must be known; fail closed otherwise
        let mut adj = vec![Vec::<usize>::new(); nodes.len()];
        for (u, m) in nodes.iter().enumerate() {
            for dep in &m.dependencies {
                let v = *idx
                    .get(dep.as_str())
                    .ok_or_else(|| ResolveError::MissingDependency {
                        module: m.id.clone(),
                        missing: dep.clone(),
                    })?;
                adj[v].push(u);
            }
        }

        // 2) report the first cycle with its full path
        let names: Vec<&str> = nodes.iter().map(|m| m.id.as_str()).collect();
        if let Some(path) = detect_cycle_with_path(&names, &adj) {
            return Err(ResolveError::CyclicDependency { path });
        }

        // 3) Kahn's algorithm with a deterministic ready queue
        let mut indeg = vec![0usize; nodes.len()];
        for targets in &adj {
            for &t in targets {
                indeg[t] += 1;
            }
        }

        let key = |i: usize| Reverse((nodes[i].menu_order(), nodes[i].id.as_str(), i));
        let mut ready: BinaryHeap<_> = indeg
            .iter()
            .enumerate()
            .filter(|&(_, &d)| d == 0)
            .map(|(i, _)| key(i))
            .collect();

        let mut order = Vec::with_capacity(nodes.len());
        while let Some(Reverse((_, id, u))) = ready.pop() {
            order.push(id.to_string());
            for &w in &adj[u] {
                indeg[w] -= 1;
                if indeg[w] == 0 {
                    ready.push(key(w));
                }
            }
        }

        Ok(order)
    }
}

/// DFS with three colors; returns the cycle closed on its first node.
fn detect_cycle_with_path(names: &[&str], adj: &[Vec<usize>]) -> Option<Vec<String>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Color {
        White,
        Gray,
        Black,
    }

    fn dfs(
        node: usize,
        names: &[&str],
        adj: &[Vec<usize>],
        colors: &mut [Color],
        path: &mut Vec<usize>,
    ) -> Option<Vec<String>> {
        colors[node] = Color::Gray;
        path.push(node);

        for &next in &adj[node] {
            match colors[next] {
                Color::Gray => {
                    if let Some(start) = path.iter().position(|&n| n == next) {
                        let mut cycle: Vec<String> =
                            path[start..].iter().map(|&i| names[i].to_string()).collect();
                        cycle.push(names[next].to_string());
                        return Some(cycle);
                    }
                }
                Color::White => {
                    if let Some(cycle) = dfs(next, names, adj, colors, path) {
                        return Some(cycle);
                    }
                }
                Color::Black => {}
            }
        }

        path.pop();
        colors[node] = Color::Black;
        None
    }

    let mut colors = vec![Color::White; names.len()];
    let mut path = Vec::new();
    for i in 0..names.len() {
        if colors[i] == Color::White {
            if let Some(cycle) = dfs(i, names, adj, &mut colors, &mut path) {
                return Some(cycle);
            }
        }
    }
    None
}
