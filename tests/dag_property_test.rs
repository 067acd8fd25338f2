//! Property: no sequence of edge insertions ever commits a cyclic graph.

mod common;

use std::collections::HashMap;

use proptest::prelude::*;
use uuid::Uuid;

use common::{core, planner, seed_project, seed_task};
use tascade::models::UnlockOn;

/// Kahn's algorithm over the committed edge set: every node must drain.
fn committed_graph_is_acyclic(nodes: &[Uuid], edges: &[(Uuid, Uuid)]) -> bool {
    let mut in_degree: HashMap<Uuid, usize> = nodes.iter().map(|n| (*n, 0)).collect();
    let mut adjacency: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
    for (from, to) in edges {
        adjacency.entry(*from).or_default().push(*to);
        *in_degree.entry(*to).or_insert(0) += 1;
    }
    let mut queue: Vec<Uuid> = in_degree
        .iter()
        .filter(|(_, d)| **d == 0)
        .map(|(n, _)| *n)
        .collect();
    let mut drained = 0;
    while let Some(node) = queue.pop() {
        drained += 1;
        if let Some(next) = adjacency.get(&node) {
            for n in next {
                let d = in_degree.get_mut(n).unwrap();
                *d -= 1;
                if *d == 0 {
                    queue.push(*n);
                }
            }
        }
    }
    drained == nodes.len()
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 16, ..ProptestConfig::default() })]

    #[test]
    fn random_edge_insertions_never_commit_a_cycle(
        attempts in proptest::collection::vec((0usize..6, 0usize..6), 1..25)
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        runtime.block_on(async move {
            let (core, _clock) = core().await;
            let project = seed_project(&core, "prop").await;
            let planner_p = planner(project.id);

            let mut tasks = Vec::new();
            for i in 0..6 {
                tasks.push(seed_task(&core, project.id, &format!("n{i}")).await);
            }

            for (from, to) in attempts {
                // Accepted or rejected, either is fine; corruption is not.
                let _ = core.dag
                    .add_dependency(
                        &planner_p,
                        project.id,
                        tasks[from].id,
                        tasks[to].id,
                        UnlockOn::Implemented,
                        None,
                    )
                    .await;
            }

            let (committed_tasks, committed_edges) =
                core.dag.project_graph(&planner_p, project.id).await.unwrap();
            let node_ids: Vec<Uuid> = committed_tasks.iter().map(|t| t.id).collect();
            let edge_pairs: Vec<(Uuid, Uuid)> = committed_edges
                .iter()
                .map(|e| (e.from_task_id, e.to_task_id))
                .collect();
            assert!(
                committed_graph_is_acyclic(&node_ids, &edge_pairs),
                "committed edge set contains a cycle"
            );
        });
    }
}
