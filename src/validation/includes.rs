//! Include Graph Resolver
//!
//! Finds `{% include %}` directives, checks that the referenced templates
//! exist in the configured store and looks for circular includes. Existence
//! checks are collected during the scan and run as one concurrent batch
//! afterwards; their diagnostics are still reported in line order.
//!
//! By default the include graph is a single fan-out from `ROOT`. With
//! `include_depth` set, included templates are fetched from the store and
//! their own includes become edges too, so cycles across files show up.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;
use std::time::{Duration, Instant};

use rayon::prelude::*;

use crate::patterns::INCLUDE;
use crate::storage::{TemplateStore, storage_key};
use crate::validation::engine::ValidationContext;

/// Synthetic node the top-level template hangs off
const ROOT: &str = "ROOT";

/// Upper bound on concurrent existence checks
const MAX_CHECK_WORKERS: usize = 8;

type IncludeGraph = BTreeMap<String, BTreeSet<String>>;

/// Shared pool for existence checks; `None` falls back to checking in place
static CHECK_POOL: LazyLock<Option<rayon::ThreadPool>> = LazyLock::new(|| {
    rayon::ThreadPoolBuilder::new()
        .num_threads(MAX_CHECK_WORKERS)
        .thread_name(|idx| format!("include-check-{}", idx))
        .build()
        .inspect_err(|e| log::warn!("Failed to create include check pool: {}", e))
        .ok()
});

/// An include directive found while scanning
#[derive(Debug, Clone, PartialEq)]
struct IncludeRef {
    line: usize,
    path: String,
}

/// What the scan found on a line, in discovery order
enum Finding {
    EmptyPath(usize),
    /// Index into the existence-check batch
    Check(usize),
}

/// A pending existence check
struct Check {
    line: usize,
    path: String,
    key: String,
}

fn scan_includes(text: &str) -> Vec<IncludeRef> {
    text.lines()
        .enumerate()
        .flat_map(|(idx, line)| {
            INCLUDE.captures_iter(line).map(move |caps| IncludeRef {
                line: idx + 1,
                path: caps[2].to_string(),
            })
        })
        .collect()
}

pub fn validate_includes(ctx: &mut ValidationContext<'_>) {
    let options = ctx.options;
    let deadline = options.include_timeout.map(|timeout| Instant::now() + timeout);
    let resolver = match (&options.store, &options.namespace) {
        (Some(store), Some(namespace)) => Some((store.as_ref(), namespace.as_str())),
        _ => None,
    };

    let mut graph = IncludeGraph::new();
    let mut findings = Vec::new();
    let mut checks = Vec::new();

    for include in scan_includes(ctx.text) {
        if include.path.trim().is_empty() {
            findings.push(Finding::EmptyPath(include.line));
            continue;
        }

        if let Some((_, namespace)) = resolver {
            findings.push(Finding::Check(checks.len()));
            checks.push(Check {
                line: include.line,
                key: storage_key(namespace, &include.path),
                path: include.path.clone(),
            });
        }

        graph
            .entry(ROOT.to_string())
            .or_default()
            .insert(include.path);
    }

    let outcomes = match resolver {
        Some((store, _)) if !checks.is_empty() => check_existence(store, &checks, deadline),
        _ => Vec::new(),
    };

    for finding in findings {
        match finding {
            Finding::EmptyPath(line) => {
                ctx.error(Some(line), format!("Line {}: Empty include path detected", line));
            }
            Finding::Check(idx) => {
                let check = &checks[idx];
                if outcomes.get(idx) == Some(&Some(false)) {
                    ctx.error(
                        Some(check.line),
                        format!(
                            "Line {}: Include file not found: '{}' (Expected blob path: '{}')",
                            check.line, check.path, check.key
                        ),
                    );
                }
            }
        }
    }

    let skipped = outcomes.iter().filter(|outcome| outcome.is_none()).count();
    if skipped > 0 {
        let timeout = options.include_timeout.unwrap_or_default();
        ctx.error(
            None,
            format!(
                "Include existence check timed out after {} ms ({} of {} includes not checked)",
                timeout.as_millis(),
                skipped,
                checks.len()
            ),
        );
    }

    if let (Some((store, namespace)), Some(depth)) = (resolver, options.include_depth) {
        expand_graph(&mut graph, store, namespace, depth, deadline);
    }

    for node in find_cycles(&graph) {
        ctx.error(None, format!("Circular include dependency detected: {}", node));
    }
}

/// Run the existence checks on the check pool
///
/// Slot `i` holds the answer for `checks[i]`, or `None` when the deadline
/// passed before the check was started. A panicking store unwinds into
/// the caller.
fn check_existence(
    store: &dyn TemplateStore,
    checks: &[Check],
    deadline: Option<Instant>,
) -> Vec<Option<bool>> {
    let expired = || deadline.is_some_and(|deadline| Instant::now() >= deadline);
    let check = |pending: &Check| (!expired()).then(|| store.exists(&pending.key));

    let outcomes: Vec<Option<bool>> = match CHECK_POOL.as_ref() {
        Some(pool) => pool.install(|| checks.par_iter().map(&check).collect()),
        None => checks.iter().map(&check).collect(),
    };

    log::debug!(
        "Checked {} of {} include(s)",
        outcomes.iter().filter(|o| o.is_some()).count(),
        checks.len()
    );
    outcomes
}

/// Follow includes through the store, breadth first, up to `depth` levels
fn expand_graph(
    graph: &mut IncludeGraph,
    store: &dyn TemplateStore,
    namespace: &str,
    depth: usize,
    deadline: Option<Instant>,
) {
    let mut fetched = BTreeSet::new();
    let mut frontier: Vec<String> = graph
        .get(ROOT)
        .map(|paths| paths.iter().cloned().collect())
        .unwrap_or_default();

    for level in 1..=depth {
        let mut next = Vec::new();
        for path in frontier {
            if !fetched.insert(path.clone()) {
                continue;
            }
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                log::warn!("Include expansion stopped at level {}: deadline reached", level);
                return;
            }

            let Some(content) = store.fetch(&storage_key(namespace, &path)) else {
                log::debug!("No content for include '{}', not expanded", path);
                continue;
            };

            for child in scan_includes(&content) {
                if child.path.trim().is_empty() {
                    continue;
                }
                next.push(child.path.clone());
                graph.entry(path.clone()).or_default().insert(child.path);
            }
        }
        frontier = next;
    }
}

/// Depth-first search from `ROOT`, reporting every node reached while it is on the stack
fn find_cycles(graph: &IncludeGraph) -> Vec<String> {
    fn visit<'g>(
        node: &'g str,
        graph: &'g IncludeGraph,
        visited: &mut BTreeSet<&'g str>,
        on_stack: &mut BTreeSet<&'g str>,
        cycles: &mut Vec<String>,
    ) {
        if on_stack.contains(node) {
            cycles.push(node.to_string());
            return;
        }
        if !visited.insert(node) {
            return;
        }

        on_stack.insert(node);
        for child in graph.get(node).into_iter().flatten() {
            visit(child, graph, visited, on_stack, cycles);
        }
        on_stack.remove(node);
    }

    let mut cycles = Vec::new();
    visit(
        ROOT,
        graph,
        &mut BTreeSet::new(),
        &mut BTreeSet::new(),
        &mut cycles,
    );
    cycles
}

/// Include timeout from a millisecond count; zero disables it
pub fn timeout_from_millis(millis: u64) -> Option<Duration> {
    (millis > 0).then(|| Duration::from_millis(millis))
}
