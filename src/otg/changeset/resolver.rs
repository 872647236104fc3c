//! Dependency resolution and ordered application of a batch of changes

use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::{debug, info, trace, warn};

use super::types::{Action, FileChange, When};
use crate::error::{AppError, Result};

/// Memoised actions keyed by change key.
///
/// Resolution probes the filesystem, and changes earlier in a batch alter
/// what later ones observe, so entries are dropped whenever state may have
/// moved on.
#[derive(Debug, Default)]
pub struct ActionCache {
    actions: HashMap<String, Action>,
}

impl ActionCache {
    pub fn get(&self, key: &str) -> Option<Action> {
        self.actions.get(key).copied()
    }

    /// Cached action for `change`, probing on a miss
    pub fn resolve(&mut self, change: &mut FileChange) -> Result<Action> {
        let key = change.key();
        if let Some(action) = self.actions.get(&key) {
            return Ok(*action);
        }
        let action = change.resolve_action()?;
        self.actions.insert(key, action);
        Ok(action)
    }

    pub fn invalidate(&mut self, key: &str) {
        self.actions.remove(key);
    }

    pub fn clear(&mut self) {
        self.actions.clear();
    }
}

/// Adjacency-list DAG over change keys, edges point dependency -> dependent
struct DependencyGraph {
    keys: Vec<String>,
    dependents: Vec<Vec<usize>>,
}

impl DependencyGraph {
    /// `keys` must be in declaration order; it is used to break ties so the
    /// resulting order is deterministic
    fn build(keys: Vec<String>, changes: &HashMap<String, FileChange>) -> Self {
        let index: HashMap<&str, usize> = keys
            .iter()
            .enumerate()
            .map(|(i, k)| (k.as_str(), i))
            .collect();

        let mut dependents = vec![Vec::new(); keys.len()];
        for (i, key) in keys.iter().enumerate() {
            let Some(change) = changes.get(key) else {
                continue;
            };
            let mut seen = HashSet::new();
            for dep in change.dependencies() {
                if !seen.insert(dep.as_str()) {
                    continue;
                }
                match index.get(dep.as_str()) {
                    Some(&from) => dependents[from].push(i),
                    None => warn!(
                        key = %key,
                        dependency = %dep,
                        "Dependency not part of this batch, ignoring"
                    ),
                }
            }
        }

        Self { keys, dependents }
    }

    /// Every cycle reachable by DFS, each as the list of keys on it
    fn find_cycles(&self) -> Vec<Vec<String>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            New,
            OnStack,
            Done,
        }

        fn visit(
            graph: &DependencyGraph,
            node: usize,
            marks: &mut [Mark],
            stack: &mut Vec<usize>,
            cycles: &mut Vec<Vec<String>>,
        ) {
            marks[node] = Mark::OnStack;
            stack.push(node);
            for &next in &graph.dependents[node] {
                match marks[next] {
                    Mark::New => visit(graph, next, marks, stack, cycles),
                    Mark::OnStack => {
                        if let Some(start) = stack.iter().position(|&n| n == next) {
                            let mut cycle: Vec<String> =
                                stack[start..].iter().map(|&n| graph.keys[n].clone()).collect();
                            cycle.push(graph.keys[next].clone());
                            cycles.push(cycle);
                        }
                    }
                    Mark::Done => {}
                }
            }
            stack.pop();
            marks[node] = Mark::Done;
        }

        let mut marks = vec![Mark::New; self.keys.len()];
        let mut stack = Vec::new();
        let mut cycles = Vec::new();
        for node in 0..self.keys.len() {
            if marks[node] == Mark::New {
                visit(self, node, &mut marks, &mut stack, &mut cycles);
            }
        }
        cycles
    }

    /// Kahn's algorithm; among ready nodes the earliest declared goes first
    fn topological_order(&self) -> Vec<String> {
        let mut in_degree = vec![0usize; self.keys.len()];
        for targets in &self.dependents {
            for &t in targets {
                in_degree[t] += 1;
            }
        }

        let mut ready: BTreeSet<usize> = (0..self.keys.len())
            .filter(|&n| in_degree[n] == 0)
            .collect();
        let mut order = Vec::with_capacity(self.keys.len());
        while let Some(node) = ready.pop_first() {
            order.push(self.keys[node].clone());
            for &next in &self.dependents[node] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    ready.insert(next);
                }
            }
        }
        order
    }
}

/// Resolved result for one change, used for dry runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedChange {
    pub key: String,
    pub component: String,
    pub path: std::path::PathBuf,
    pub action: Action,
    /// Runs after a promoted conditional change that has work to do.
    /// `action` was resolved before that change ran and is recomputed at
    /// apply time.
    pub after_promoted: bool,
}

/// Orders a batch of changes, promotes conditional changes that turn out
/// to be needed and applies the result
pub struct ChangeSetResolver {
    /// Changes taking part in the batch
    changes: HashMap<String, FileChange>,
    /// `When::BeforeChange` changes not promoted (yet)
    conditional: HashMap<String, FileChange>,
    /// Every key in declaration order
    declared: Vec<String>,
    order: Vec<String>,
    cache: ActionCache,
}

impl ChangeSetResolver {
    pub fn new(changes: Vec<FileChange>) -> Result<Self> {
        let mut active: HashMap<String, FileChange> = HashMap::new();
        let mut conditional: HashMap<String, FileChange> = HashMap::new();
        let mut declared = Vec::new();

        for change in changes {
            let key = change.key();
            let existing = active
                .get(&key)
                .or_else(|| conditional.get(&key))
                .map(|c| &c.requested);
            if let Some(existing) = existing {
                if existing.is_same(&change.requested) {
                    trace!(key = %key, "Skipping duplicate change");
                    continue;
                }
                return Err(AppError::DuplicateChange(key));
            }

            declared.push(key.clone());
            if change.requested.when == When::BeforeChange {
                conditional.insert(key, change);
            } else {
                active.insert(key, change);
            }
        }

        Ok(Self {
            changes: active,
            conditional,
            declared,
            order: Vec::new(),
            cache: ActionCache::default(),
        })
    }

    /// Compute the final application order.
    ///
    /// Each pass resolves every active change in order; a change that has
    /// work to do promotes the conditional changes it names in
    /// `before_change` and depends on them from then on. Promotion changes
    /// the graph, so another pass follows until one promotes nothing. Every
    /// extra pass consumes at least one conditional change, which bounds the
    /// loop by the number of conditional changes.
    pub fn resolve(&mut self) -> Result<()> {
        let mut pass = 0;
        loop {
            pass += 1;
            self.order = self.ordered_keys()?;
            let promoted = self.resolve_pass()?;
            if promoted == 0 {
                debug!(passes = pass, changes = self.order.len(), "Change set resolved");
                return Ok(());
            }
            debug!(pass, promoted, "Conditional changes promoted, resolving again");
            self.cache.clear();
        }
    }

    fn ordered_keys(&self) -> Result<Vec<String>> {
        let keys: Vec<String> = self
            .declared
            .iter()
            .filter(|k| self.changes.contains_key(*k))
            .cloned()
            .collect();
        let graph = DependencyGraph::build(keys, &self.changes);

        let cycles = graph.find_cycles();
        if !cycles.is_empty() {
            return Err(AppError::DependencyCycle(cycles));
        }
        Ok(graph.topological_order())
    }

    fn resolve_pass(&mut self) -> Result<usize> {
        let mut promoted = 0;
        for key in &self.order {
            let Some(change) = self.changes.get_mut(key) else {
                continue;
            };
            let action = self.cache.resolve(change)?;
            if action == Action::DoNothing || change.requested.before_change.is_empty() {
                continue;
            }

            let triggers = change.requested.before_change.clone();
            for dep in &triggers {
                if !change.resolved_deps.contains(dep) {
                    change.resolved_deps.push(dep.clone());
                }
            }

            for dep in triggers {
                if self.changes.contains_key(&dep) {
                    continue;
                }
                let promoted_change = self
                    .conditional
                    .remove(&dep)
                    .ok_or_else(|| AppError::MissingConditionalChange(dep.clone()))?;
                trace!(key = %dep, trigger = %key, "Promoting conditional change");
                self.changes.insert(dep, promoted_change);
                promoted += 1;
            }
        }
        Ok(promoted)
    }

    /// Keys in application order; empty until `resolve` ran
    pub fn order(&self) -> &[String] {
        &self.order
    }

    /// Resolved actions in application order, without touching anything.
    ///
    /// Actions reflect the filesystem as it is now. Anything ordered after
    /// a promoted conditional change may resolve differently once that
    /// change has run, and is flagged `after_promoted`.
    pub fn plan(&self) -> Vec<PlannedChange> {
        let mut downstream: HashSet<&str> = HashSet::new();
        self.order
            .iter()
            .filter_map(|key| {
                let change = self.changes.get(key)?;
                let action = self.cache.get(key)?;
                let after_promoted = change
                    .dependencies()
                    .any(|dep| downstream.contains(dep.as_str()));
                let promoted_work =
                    change.requested.when == When::BeforeChange && action != Action::DoNothing;
                if after_promoted || promoted_work {
                    downstream.insert(key.as_str());
                }
                Some(PlannedChange {
                    key: key.clone(),
                    component: change.requested.component.clone(),
                    path: change.path().to_path_buf(),
                    action,
                    after_promoted,
                })
            })
            .collect()
    }

    /// Apply every change in order.
    ///
    /// Actions are recomputed right before each change runs. A failure
    /// stops the batch unless the change ignores errors; nothing already
    /// applied is undone.
    pub fn apply(&mut self) -> Result<()> {
        for key in &self.order {
            let Some(change) = self.changes.get_mut(key) else {
                continue;
            };
            self.cache.invalidate(key);

            let outcome = self
                .cache
                .resolve(change)
                .and_then(|action| {
                    if action == Action::DoNothing {
                        trace!(component = %change.requested.component, key = %key, "{}", change.requested);
                    } else {
                        info!(
                            component = %change.requested.component,
                            action = %action,
                            "Applying change {}",
                            change.requested
                        );
                    }
                    change.apply(action)
                });

            if let Err(e) = outcome {
                if change.requested.ignore_errors {
                    warn!(key = %key, "Ignoring error: {}", e);
                } else {
                    return Err(e);
                }
            }
        }
        Ok(())
    }
}
