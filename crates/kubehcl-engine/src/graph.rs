//! Dependency graph over decoded resources
//!
//! Every [`DecodedResource`] of the tree is one vertex. `depends_on` entries
//! are resolved relative to the module that declared them; entries declared
//! on a module call apply to every resource inside the called module. A
//! synthetic root vertex depends on every vertex nothing else depends on, so
//! it is always visited last.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use kubehcl_core::{DecodedResource, DependencyKind, DependencyRef, Diagnostic, Diagnostics, ModuleTree};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Vertices visited concurrently when no limit is given
pub const DEFAULT_PARALLELISM: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Vertex {
    /// Index into [`Graph::resources`]
    Resource(usize),
    Root,
}

#[derive(Debug, Clone)]
pub struct Graph {
    resources: Vec<DecodedResource>,
    /// `deps[i]`: vertices `i` waits for
    deps: Vec<BTreeSet<usize>>,
    /// `dependents[i]`: vertices waiting for `i`
    dependents: Vec<BTreeSet<usize>>,
}

impl Graph {
    /// Build the graph of every resource in `tree`
    ///
    /// The graph is only safe to walk when the diagnostics hold no errors.
    pub fn build(tree: &ModuleTree) -> (Graph, Diagnostics) {
        let resources: Vec<DecodedResource> = tree.resources().into_iter().cloned().collect();
        Self::from_resources(resources)
    }

    pub fn from_resources(resources: Vec<DecodedResource>) -> (Graph, Diagnostics) {
        let mut diags = Diagnostics::new();
        let n = resources.len();
        let mut graph = Graph {
            resources,
            deps: vec![BTreeSet::new(); n],
            dependents: vec![BTreeSet::new(); n],
        };

        let mut names: BTreeMap<String, usize> = BTreeMap::new();
        for (i, resource) in graph.resources.iter().enumerate() {
            if let Some(first) = names.insert(resource.fqn(), i) {
                diags.push(
                    Diagnostic::error(
                        "Resources must have different names",
                        format!("Two resources have the same name: {}", resource.fqn()),
                    )
                    .with_subject(&resource.range)
                    .with_context(&graph.resources[first].range),
                );
            }
        }

        for i in 0..n {
            for dep in graph.resources[i].depends_on.clone() {
                let targets = graph.targets(&dep);
                if targets.is_empty() {
                    diags.error(
                        "Dependency does not exist",
                        format!("{} does not exist", dep),
                        &dep.range,
                    );
                    continue;
                }
                for target in targets {
                    tracing::debug!(
                        from = %graph.resources[i].fqn(),
                        to = %graph.resources[target].fqn(),
                        "dependency edge"
                    );
                    graph.deps[i].insert(target);
                    graph.dependents[target].insert(i);
                }
            }
        }

        for (a, b) in graph.find_cycles() {
            let (ra, rb) = (&graph.resources[a], &graph.resources[b]);
            diags.push(
                Diagnostic::error(
                    "Circular dependencies",
                    format!("Resources {} {} have circular dependencies", ra.fqn(), rb.fqn()),
                )
                .with_subject(&ra.range)
                .with_context(&rb.range),
            );
        }

        (graph, diags)
    }

    /// Vertices matched by a `depends_on` entry
    fn targets(&self, dep: &DependencyRef) -> Vec<usize> {
        let depth = dep.depth();
        self.resources
            .iter()
            .enumerate()
            .filter(|(_, r)| match dep.kind {
                DependencyKind::Resource => r.module_path == dep.scope && r.name == dep.name,
                DependencyKind::Module => {
                    r.module_path.len() > depth
                        && r.module_path[..depth] == dep.scope[..]
                        && is_instance_of(&r.module_path[depth], &dep.name)
                }
            })
            .map(|(i, _)| i)
            .collect()
    }

    /// Back edges found by a depth-first search, each as `(from, to)`
    fn find_cycles(&self) -> Vec<(usize, usize)> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            New,
            OnPath,
            Done,
        }

        fn visit(
            graph: &Graph,
            v: usize,
            marks: &mut [Mark],
            cycles: &mut Vec<(usize, usize)>,
        ) {
            marks[v] = Mark::OnPath;
            for &dep in &graph.deps[v] {
                match marks[dep] {
                    Mark::OnPath => cycles.push((v, dep)),
                    Mark::New => visit(graph, dep, marks, cycles),
                    Mark::Done => {}
                }
            }
            marks[v] = Mark::Done;
        }

        let mut marks = vec![Mark::New; self.resources.len()];
        let mut cycles = Vec::new();
        for v in 0..self.resources.len() {
            if marks[v] == Mark::New {
                visit(self, v, &mut marks, &mut cycles);
            }
        }
        cycles
    }

    pub fn resources(&self) -> &[DecodedResource] {
        &self.resources
    }

    pub fn resource(&self, vertex: Vertex) -> Option<&DecodedResource> {
        match vertex {
            Vertex::Resource(i) => self.resources.get(i),
            Vertex::Root => None,
        }
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn name(&self, vertex: Vertex) -> String {
        match self.resource(vertex) {
            Some(r) => r.fqn(),
            None => "root".to_string(),
        }
    }

    /// Vertices `vertex` waits for
    pub fn dependencies(&self, vertex: Vertex) -> Vec<Vertex> {
        match vertex {
            Vertex::Resource(i) => self.deps[i].iter().map(|&d| Vertex::Resource(d)).collect(),
            Vertex::Root => (0..self.len())
                .filter(|&i| self.dependents[i].is_empty())
                .map(Vertex::Resource)
                .collect(),
        }
    }

    /// A deterministic order consistent with every edge, root last
    pub fn topological_order(&self) -> Vec<Vertex> {
        let mut remaining: Vec<usize> = self.deps.iter().map(BTreeSet::len).collect();
        let mut ready: BTreeSet<usize> = (0..self.len()).filter(|&i| remaining[i] == 0).collect();
        let mut order = Vec::with_capacity(self.len() + 1);
        while let Some(v) = ready.pop_first() {
            order.push(Vertex::Resource(v));
            for &d in &self.dependents[v] {
                remaining[d] -= 1;
                if remaining[d] == 0 {
                    ready.insert(d);
                }
            }
        }
        order.push(Vertex::Root);
        order
    }

    /// Visit every vertex once, dependencies first
    ///
    /// Up to `max_parallel` visits run at the same time. A failed visit is
    /// recorded and every vertex depending on it, directly or not, is
    /// skipped; visits already running are not interrupted.
    pub async fn walk<F, Fut>(&self, max_parallel: usize, cancel: &CancelFlag, visit: F) -> WalkReport
    where
        F: Fn(Vertex) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), Diagnostics>> + Send + 'static,
    {
        let n = self.len();
        let root = n;
        let mut remaining: Vec<usize> = self.deps.iter().map(BTreeSet::len).collect();
        remaining.push(self.dependencies(Vertex::Root).len());
        let dependents = |v: usize| -> Vec<usize> {
            if v == root {
                return Vec::new();
            }
            let mut out: Vec<usize> = self.dependents[v].iter().copied().collect();
            if self.dependents[v].is_empty() {
                out.push(root);
            }
            out
        };
        let vertex = |v: usize| if v == root { Vertex::Root } else { Vertex::Resource(v) };

        let semaphore = Arc::new(Semaphore::new(max_parallel.max(1)));
        let visit = Arc::new(visit);
        let mut tasks: JoinSet<(usize, Result<(), Diagnostics>)> = JoinSet::new();
        let mut ready: VecDeque<usize> = (0..=n).filter(|&v| remaining[v] == 0).collect();
        let mut report = WalkReport::default();
        let mut finished = vec![false; n + 1];

        loop {
            if cancel.is_cancelled() {
                ready.clear();
            }
            while let Some(v) = ready.pop_front() {
                let semaphore = semaphore.clone();
                let visit = visit.clone();
                let target = vertex(v);
                tasks.spawn(async move {
                    let Ok(_permit) = semaphore.acquire_owned().await else {
                        return (v, Ok(()));
                    };
                    (v, visit(target).await)
                });
            }

            let Some(joined) = tasks.join_next().await else {
                break;
            };
            let (v, result) = match joined {
                Ok(done) => done,
                Err(e) => {
                    report.diags.push(Diagnostic::from_error("Vertex visit failed", &e));
                    continue;
                }
            };
            finished[v] = true;
            match result {
                Ok(()) => {
                    report.visited.push(vertex(v));
                    for d in dependents(v) {
                        remaining[d] -= 1;
                        if remaining[d] == 0 {
                            ready.push_back(d);
                        }
                    }
                }
                Err(diags) => {
                    tracing::debug!(vertex = %self.name(vertex(v)), "visit failed");
                    report.failed.push(vertex(v));
                    report.diags.append(diags);
                }
            }
        }

        report.skipped = (0..=n).filter(|&v| !finished[v]).map(vertex).collect();
        if cancel.is_cancelled() && !report.skipped.is_empty() {
            let names: Vec<String> = report.skipped.iter().map(|&v| self.name(v)).collect();
            report.diags.push(Diagnostic::error(
                "Operation cancelled",
                format!("These resources were not processed: {}", names.join(", ")),
            ));
        }
        report
    }
}

/// Whether the module instance `segment` (`db` or `db[key]`) belongs to `name`
fn is_instance_of(segment: &str, name: &str) -> bool {
    segment == name
        || segment
            .strip_prefix(name)
            .is_some_and(|rest| rest.starts_with('['))
}

/// Outcome of [`Graph::walk`]
#[derive(Debug, Default)]
pub struct WalkReport {
    /// Successful visits in completion order
    pub visited: Vec<Vertex>,
    pub failed: Vec<Vertex>,
    /// Vertices never visited because a dependency failed or the walk was cancelled
    pub skipped: Vec<Vertex>,
    pub diags: Diagnostics,
}

impl WalkReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty() && !self.diags.has_errors()
    }
}

/// Stops a walk from starting new visits
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kubehcl_core::{SourceRange, Value};
    use std::sync::Mutex;

    fn resource(name: &str, path: &[&str], deps: Vec<DependencyRef>) -> DecodedResource {
        let path: Vec<String> = path.iter().map(|s| s.to_string()).collect();
        let mut r = DecodedResource {
            name: name.to_string(),
            module_path: path,
            config: BTreeMap::new(),
            depends_on: deps,
            range: SourceRange::default(),
        };
        r.config.insert(r.fqn(), Value::empty_object());
        r
    }

    fn dep(kind: DependencyKind, name: &str, scope: &[&str]) -> DependencyRef {
        DependencyRef {
            kind,
            name: name.to_string(),
            scope: scope.iter().map(|s| s.to_string()).collect(),
            range: SourceRange::default(),
        }
    }

    fn position(order: &[Vertex], v: usize) -> usize {
        order.iter().position(|x| *x == Vertex::Resource(v)).unwrap()
    }

    #[test]
    fn test_module_dependency_matches_instances() {
        let (graph, diags) = Graph::from_resources(vec![
            resource("ns", &[], vec![]),
            resource("deploy", &["test[s1]"], vec![dep(DependencyKind::Resource, "ns", &[])]),
            resource("deploy", &["test[s2]"], vec![dep(DependencyKind::Resource, "ns", &[])]),
            resource("svc", &[], vec![dep(DependencyKind::Module, "test", &[])]),
        ]);
        assert!(!diags.has_errors(), "{:?}", diags);
        assert_eq!(
            graph.dependencies(Vertex::Resource(3)),
            vec![Vertex::Resource(1), Vertex::Resource(2)]
        );
        let order = graph.topological_order();
        assert!(position(&order, 0) < position(&order, 1));
        assert!(position(&order, 2) < position(&order, 3));
        assert_eq!(order.last(), Some(&Vertex::Root));
    }

    #[test]
    fn test_missing_dependency() {
        let (_, diags) = Graph::from_resources(vec![resource(
            "a",
            &[],
            vec![dep(DependencyKind::Resource, "ghost", &[])],
        )]);
        let err = diags.errors().next().unwrap();
        assert_eq!(err.summary, "Dependency does not exist");
        assert_eq!(err.detail, "kube_resource.ghost does not exist");
    }

    #[test]
    fn test_cycle_detected() {
        let (_, diags) = Graph::from_resources(vec![
            resource("x", &["A"], vec![dep(DependencyKind::Module, "B", &[])]),
            resource("y", &["B"], vec![dep(DependencyKind::Module, "A", &[])]),
        ]);
        let err = diags.errors().next().unwrap();
        assert_eq!(err.summary, "Circular dependencies");
        assert!(err.detail.contains("module.A.kube_resource.x"));
        assert!(err.detail.contains("module.B.kube_resource.y"));
    }

    #[test]
    fn test_is_instance_of() {
        assert!(is_instance_of("db", "db"));
        assert!(is_instance_of("db[1]", "db"));
        assert!(!is_instance_of("dbx", "db"));
    }

    #[tokio::test]
    async fn test_walk_respects_edges() {
        let (graph, _) = Graph::from_resources(vec![
            resource("a", &[], vec![]),
            resource("b", &[], vec![dep(DependencyKind::Resource, "a", &[])]),
            resource("c", &[], vec![dep(DependencyKind::Resource, "b", &[])]),
            resource("d", &[], vec![]),
        ]);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();
        let report = graph
            .walk(4, &CancelFlag::new(), move |v| {
                let log = log.clone();
                async move {
                    log.lock().unwrap().push(v);
                    Ok(())
                }
            })
            .await;
        assert!(report.is_success());
        let order = seen.lock().unwrap().clone();
        assert_eq!(order.len(), 5);
        assert!(position(&order, 0) < position(&order, 1));
        assert!(position(&order, 1) < position(&order, 2));
        assert_eq!(order.last(), Some(&Vertex::Root));
    }

    #[tokio::test]
    async fn test_failure_skips_dependents() {
        let (graph, _) = Graph::from_resources(vec![
            resource("a", &[], vec![]),
            resource("b", &[], vec![dep(DependencyKind::Resource, "a", &[])]),
            resource("c", &[], vec![]),
        ]);
        let report = graph
            .walk(2, &CancelFlag::new(), |v| async move {
                if v == Vertex::Resource(0) {
                    let mut diags = Diagnostics::new();
                    diags.push(Diagnostic::error("boom", "a failed"));
                    Err(diags)
                } else {
                    Ok(())
                }
            })
            .await;
        assert_eq!(report.failed, vec![Vertex::Resource(0)]);
        assert_eq!(report.visited, vec![Vertex::Resource(2)]);
        assert_eq!(report.skipped, vec![Vertex::Resource(1), Vertex::Root]);
        assert!(!report.is_success());
    }

    #[tokio::test]
    async fn test_cancelled_walk_starts_nothing() {
        let (graph, _) = Graph::from_resources(vec![resource("a", &[], vec![])]);
        let cancel = CancelFlag::new();
        cancel.cancel();
        let report = graph.walk(1, &cancel, |_| async { Ok(()) }).await;
        assert!(report.visited.is_empty());
        assert_eq!(report.diags.errors().next().unwrap().summary, "Operation cancelled");
    }
}
