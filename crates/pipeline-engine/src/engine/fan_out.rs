//! Fan-Out Coordinator: one multi-result step becomes N sibling child runs.

use std::sync::Arc;

use serde_json::{Map, Value};
use uuid::Uuid;

use super::context::{self, Context};
use crate::db::models::{NewRun, PipelineRun};
use crate::error::AppResult;
use crate::store::RunStore;

/// Object items of `output[field]`, in order. Anything that is not an
/// object is ignored.
pub fn fan_out_seeds(output: &Map<String, Value>, field: &str) -> Vec<Map<String, Value>> {
    match output.get(field) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| item.as_object().cloned())
            .collect(),
        _ => Vec::new(),
    }
}

#[derive(Clone)]
pub struct FanOutCoordinator {
    runs: Arc<dyn RunStore>,
}

impl FanOutCoordinator {
    pub fn new(runs: Arc<dyn RunStore>) -> Self {
        Self { runs }
    }

    /// Create one queued child per seed and return their ids in seed order.
    ///
    /// Each child copies the parent's blueprint snapshot verbatim, starts at
    /// `start_position`, and seeds its context with the parent's context
    /// merged with the seed item (seed wins). Calling this twice for the same
    /// parent and position creates two sets of children.
    pub async fn fan_out(
        &self,
        parent: &PipelineRun,
        parent_context: &Context,
        start_position: i32,
        seeds: &[Map<String, Value>],
    ) -> AppResult<Vec<Uuid>> {
        let mut child_ids = Vec::with_capacity(seeds.len());

        for seed in seeds {
            let initial_context = context::merge(parent_context, &Value::Object(seed.clone()));
            let child = NewRun {
                id: Uuid::new_v4(),
                org_id: parent.org_id.clone(),
                parent_run_id: Some(parent.id),
                root_run_id: parent.root_run_id,
                depth: parent.depth + 1,
                entity_type: parent.entity_type.clone(),
                blueprint_snapshot: parent.blueprint_snapshot.clone(),
                initial_context: Value::Object(initial_context),
                start_position,
            };
            let stored = self.runs.insert_run(&child).await?;
            child_ids.push(stored.id);
        }

        tracing::info!(
            parent_run_id = %parent.id,
            start_position,
            children = child_ids.len(),
            depth = parent.depth + 1,
            "Run fanned out"
        );

        Ok(child_ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::state::RunStatus;
    use crate::store::InMemoryStore;
    use serde_json::json;

    fn seeds(value: Value) -> Vec<Map<String, Value>> {
        value
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_object().cloned().unwrap())
            .collect()
    }

    async fn parent(store: &InMemoryStore) -> PipelineRun {
        store
            .insert_run(&NewRun::root(
                "O",
                None,
                json!({"steps": [{"position": 1, "operation_id": "company.search", "fan_out": true}]}),
                json!({"query": "saas"}),
                1,
            ))
            .await
            .unwrap()
    }

    #[test]
    fn test_fan_out_seeds_keeps_objects_only() {
        let output = context::from_value(&json!({"results": [{"domain": "a.com"}, 3, {"domain": "b.com"}]}));
        assert_eq!(fan_out_seeds(&output, "results").len(), 2);
        assert!(fan_out_seeds(&output, "companies").is_empty());
    }

    #[tokio::test]
    async fn test_one_child_per_seed() {
        let store = Arc::new(InMemoryStore::new());
        let coordinator = FanOutCoordinator::new(store.clone());
        let parent = parent(&store).await;
        let parent_context = context::from_value(&json!({"query": "saas", "domain": "parent.com"}));

        let ids = coordinator
            .fan_out(
                &parent,
                &parent_context,
                2,
                &seeds(json!([{"domain": "a.com"}, {"domain": "b.com"}, {"domain": "c.com"}])),
            )
            .await
            .unwrap();
        assert_eq!(ids.len(), 3);

        let children = store.list_children(parent.id).await.unwrap();
        assert_eq!(children.len(), 3);
        for (child, domain) in children.iter().zip(["a.com", "b.com", "c.com"]) {
            assert_eq!(child.blueprint_snapshot, parent.blueprint_snapshot);
            assert_eq!(child.start_position, 2);
            assert_eq!(child.depth, 1);
            assert_eq!(child.root_run_id, parent.id);
            assert_eq!(child.status, RunStatus::Queued);
            assert_eq!(child.initial_context["domain"], json!(domain));
            assert_eq!(child.initial_context["query"], json!("saas"));
        }
    }

    #[tokio::test]
    async fn test_duplicate_calls_duplicate_children() {
        let store = Arc::new(InMemoryStore::new());
        let coordinator = FanOutCoordinator::new(store.clone());
        let parent = parent(&store).await;
        let items = seeds(json!([{"domain": "a.com"}, {"domain": "b.com"}]));

        coordinator.fan_out(&parent, &Context::new(), 2, &items).await.unwrap();
        coordinator.fan_out(&parent, &Context::new(), 2, &items).await.unwrap();

        assert_eq!(store.list_children(parent.id).await.unwrap().len(), 4);
    }
}
