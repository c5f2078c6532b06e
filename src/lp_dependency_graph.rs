//! # LP Dependency Graph
//!
//! Orders POOL tokens so every LP token is valued after the LP tokens it holds.
//!
//! A POOL token depends on the subset of its two legs that are themselves POOL tokens.
//! `level = 0` with no POOL legs, otherwise `1 + max(level of POOL legs)`.
//!
//! Nodes live in an arena (`Vec<DependencyNode>`) and reference their dependencies by
//! index. Levels are computed once, at build time, by an iterative Tarjan
//! strongly-connected-components pass with an explicit stack, so deep nesting cannot
//! overflow the call stack.
//!
//! Cycle handling: every strongly connected component with more than one token, or a
//! token holding itself, is one cycle, and all of its members are reported as cyclic.
//! Tokens that reach a cycle without being on it are reported as blocked.
//! Everything else keeps its level.

use indexmap::IndexMap;
use log::{debug, warn};
use std::collections::{BTreeMap, HashMap};

use crate::errors::PricingError;
use crate::types::{TokenId, TokenRecord};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyNode {
    pub token: TokenId,
    /// `None` for cyclic and blocked tokens
    pub level: Option<u32>,
    /// Arena indices of POOL-typed legs
    pub dependencies: Vec<usize>,
}

const UNVISITED: usize = usize::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Resolved,
    Cyclic,
    Blocked,
}

/// Per-level counts of POOL tokens.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyStats {
    pub total_pools: usize,
    pub level_count: usize,
    pub tokens_per_level: BTreeMap<u32, usize>,
    pub cyclic: usize,
    pub blocked: usize,
}

impl std::fmt::Display for DependencyStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} pools over {} levels (cyclic={}, blocked={})",
            self.total_pools, self.level_count, self.cyclic, self.blocked
        )?;
        for (level, count) in &self.tokens_per_level {
            write!(f, " L{}={}", level, count)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct LpDependencyGraph {
    nodes: Vec<DependencyNode>,
    index: IndexMap<TokenId, usize>,
    status: Vec<Status>,
    /// One entry per cyclic component, members in discovery order
    cycles: Vec<Vec<TokenId>>,
    cycle_of: HashMap<usize, usize>,
    /// For blocked tokens: the dependency that blocked them
    blocked_by: HashMap<usize, usize>,
}

impl LpDependencyGraph {
    /// Builds the graph over every POOL token in `tokens`. Non-POOL records are ignored.
    pub fn build<'a>(tokens: impl IntoIterator<Item = &'a TokenRecord>) -> Self {
        let pools: Vec<&TokenRecord> = tokens.into_iter().filter(|t| t.is_pool()).collect();

        let mut index = IndexMap::with_capacity(pools.len());
        for record in &pools {
            let next = index.len();
            index.entry(record.id.clone()).or_insert(next);
        }

        let mut nodes: Vec<DependencyNode> = index
            .keys()
            .map(|token| DependencyNode {
                token: token.clone(),
                level: None,
                dependencies: Vec::new(),
            })
            .collect();

        let mut linked = vec![false; nodes.len()];
        for record in &pools {
            let Some(&idx) = index.get(&record.id) else {
                continue;
            };
            if std::mem::replace(&mut linked[idx], true) {
                warn!("Duplicate POOL token {} in dependency input, keeping the first record", record.id);
                continue;
            }
            if let Some((a, b)) = record.pool_legs() {
                let mut deps: Vec<usize> = [&a.token, &b.token]
                    .into_iter()
                    .filter_map(|leg| index.get(leg).copied())
                    .collect();
                deps.dedup();
                nodes[idx].dependencies = deps;
            }
        }

        let mut graph = Self {
            status: vec![Status::Resolved; nodes.len()],
            nodes,
            index,
            cycles: Vec::new(),
            cycle_of: HashMap::new(),
            blocked_by: HashMap::new(),
        };
        graph.compute_levels();
        graph
    }

    /// Iterative Tarjan pass. Components are emitted dependencies-first, so every
    /// dependency of a component is settled before the component itself.
    fn compute_levels(&mut self) {
        let n = self.nodes.len();
        let mut order = vec![UNVISITED; n];
        let mut low = vec![0usize; n];
        let mut on_stack = vec![false; n];
        let mut component: Vec<usize> = Vec::new();
        // (node, next dependency to examine)
        let mut stack: Vec<(usize, usize)> = Vec::new();
        let mut counter = 0usize;

        for root in 0..n {
            if order[root] != UNVISITED {
                continue;
            }
            order[root] = counter;
            low[root] = counter;
            counter += 1;
            on_stack[root] = true;
            component.push(root);
            stack.push((root, 0));

            while let Some(&(node, next)) = stack.last() {
                if let Some(&dep) = self.nodes[node].dependencies.get(next) {
                    if let Some(top) = stack.last_mut() {
                        top.1 += 1;
                    }
                    if order[dep] == UNVISITED {
                        order[dep] = counter;
                        low[dep] = counter;
                        counter += 1;
                        on_stack[dep] = true;
                        component.push(dep);
                        stack.push((dep, 0));
                    } else if on_stack[dep] {
                        low[node] = low[node].min(order[dep]);
                    }
                    continue;
                }

                stack.pop();
                if let Some(&(parent, _)) = stack.last() {
                    low[parent] = low[parent].min(low[node]);
                }
                if low[node] != order[node] {
                    continue;
                }

                let mut members = Vec::new();
                while let Some(member) = component.pop() {
                    on_stack[member] = false;
                    members.push(member);
                    if member == node {
                        break;
                    }
                }
                members.reverse();
                self.settle_component(members);
            }
        }

        if !self.cycles.is_empty() {
            warn!(
                "LP dependency graph: {} cycle(s), {} cyclic and {} blocked tokens",
                self.cycles.len(),
                self.cycle_of.len(),
                self.blocked_by.len()
            );
        }
        debug!("LP dependency graph built: {}", self.stats());
    }

    fn settle_component(&mut self, members: Vec<usize>) {
        let cyclic = match members.as_slice() {
            [single] => self.nodes[*single].dependencies.contains(single),
            _ => true,
        };
        if cyclic {
            self.record_cycle(&members);
        } else {
            for node in members {
                self.settle(node);
            }
        }
    }

    fn record_cycle(&mut self, component: &[usize]) {
        let cycle_idx = self.cycles.len();
        let mut members = Vec::with_capacity(component.len());
        for &member in component {
            self.status[member] = Status::Cyclic;
            self.cycle_of.insert(member, cycle_idx);
            members.push(self.nodes[member].token.clone());
        }
        debug!("Dependency cycle: {}", members.join(" -> "));
        self.cycles.push(members);
    }

    /// Assigns the level of `node` once all of its dependencies are done.
    fn settle(&mut self, node: usize) {
        if self.status[node] == Status::Cyclic {
            return;
        }
        let mut level = 0u32;
        for &dep in &self.nodes[node].dependencies {
            match (self.status[dep], self.nodes[dep].level) {
                (Status::Resolved, Some(dep_level)) => level = level.max(dep_level + 1),
                _ => {
                    self.status[node] = Status::Blocked;
                    self.blocked_by.insert(node, dep);
                    return;
                }
            }
        }
        self.nodes[node].level = Some(level);
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> &[DependencyNode] {
        &self.nodes
    }

    pub fn contains(&self, token: &str) -> bool {
        self.index.contains_key(token)
    }

    pub fn level(&self, token: &str) -> Option<u32> {
        self.index.get(token).and_then(|&i| self.nodes[i].level)
    }

    /// POOL tokens at `level`, in metadata order.
    pub fn tokens_at_level(&self, level: u32) -> Vec<TokenId> {
        self.nodes
            .iter()
            .filter(|n| n.level == Some(level))
            .map(|n| n.token.clone())
            .collect()
    }

    pub fn max_level(&self) -> Option<u32> {
        self.nodes.iter().filter_map(|n| n.level).max()
    }

    /// Every resolvable level, ascending, with its tokens.
    pub fn levels(&self) -> Vec<(u32, Vec<TokenId>)> {
        let mut by_level: BTreeMap<u32, Vec<TokenId>> = BTreeMap::new();
        for node in &self.nodes {
            if let Some(level) = node.level {
                by_level.entry(level).or_default().push(node.token.clone());
            }
        }
        by_level.into_iter().collect()
    }

    pub fn cycles(&self) -> &[Vec<TokenId>] {
        &self.cycles
    }

    pub fn cyclic_tokens(&self) -> Vec<TokenId> {
        self.tokens_with(Status::Cyclic)
    }

    pub fn blocked_tokens(&self) -> Vec<TokenId> {
        self.tokens_with(Status::Blocked)
    }

    fn tokens_with(&self, status: Status) -> Vec<TokenId> {
        self.status
            .iter()
            .enumerate()
            .filter(|(_, s)| **s == status)
            .map(|(i, _)| self.nodes[i].token.clone())
            .collect()
    }

    /// Why `token` has no level, if it is cyclic or blocked.
    pub fn unresolvable_reason(&self, token: &str) -> Option<PricingError> {
        let &idx = self.index.get(token)?;
        match self.status[idx] {
            Status::Resolved => None,
            Status::Cyclic => {
                let cycle = self.cycle_of.get(&idx).map(|&c| &self.cycles[c])?;
                let mut members = cycle.clone();
                if let Some(first) = cycle.first() {
                    members.push(first.clone());
                }
                Some(PricingError::CycleDetected {
                    token: token.to_string(),
                    members,
                })
            }
            Status::Blocked => {
                let dep = self.blocked_by.get(&idx)?;
                Some(PricingError::MissingDependency {
                    token: token.to_string(),
                    missing: self.nodes[*dep].token.clone(),
                })
            }
        }
    }

    pub fn stats(&self) -> DependencyStats {
        let mut tokens_per_level = BTreeMap::new();
        for node in &self.nodes {
            if let Some(level) = node.level {
                *tokens_per_level.entry(level).or_insert(0) += 1;
            }
        }
        DependencyStats {
            total_pools: self.nodes.len(),
            level_count: tokens_per_level.len(),
            tokens_per_level,
            cyclic: self.cycle_of.len(),
            blocked: self.blocked_by.len(),
        }
    }
}
