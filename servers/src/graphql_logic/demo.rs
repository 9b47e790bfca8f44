//! The built-in demo schema: an in-memory todo table with resolvers for
//! every operation kind, wired so `onCreateTodo` and friends fire from the
//! matching mutations.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};

use lib_simulator::{resolver, FieldArguments, SimulatorSchema};

#[derive(Default)]
struct TodoStore {
    rows: Mutex<BTreeMap<String, Value>>,
    next_id: AtomicU64,
}

impl TodoStore {
    fn list(&self) -> Vec<Value> {
        self.rows.lock().expect("Todo store lock poisoned").values().cloned().collect()
    }

    fn get(&self, id: &str) -> Option<Value> {
        self.rows.lock().expect("Todo store lock poisoned").get(id).cloned()
    }

    fn create(&self, args: &FieldArguments) -> Value {
        let id = format!("todo-{}", self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let mut row = serde_json::Map::new();
        row.insert("id".to_string(), json!(id));
        row.insert("name".to_string(), args.get("name").cloned().unwrap_or(Value::Null));
        row.insert("owner".to_string(), args.get("owner").cloned().unwrap_or(Value::Null));
        row.insert("done".to_string(), json!(false));
        row.insert("createdAt".to_string(), json!(chrono::Utc::now().to_rfc3339()));
        let row = Value::Object(row);
        self.rows.lock().expect("Todo store lock poisoned").insert(id, row.clone());
        row
    }

    /// Overlays every non-id argument onto the stored row.
    fn update(&self, id: &str, args: &FieldArguments) -> Option<Value> {
        let mut rows = self.rows.lock().expect("Todo store lock poisoned");
        let row = rows.get_mut(id)?;
        if let Value::Object(fields) = row {
            for (name, value) in args {
                if name != "id" {
                    fields.insert(name.clone(), value.clone());
                }
            }
        }
        Some(row.clone())
    }

    fn delete(&self, id: &str) -> Option<Value> {
        self.rows.lock().expect("Todo store lock poisoned").remove(id)
    }
}

fn id_argument(args: &FieldArguments, field: &str) -> Result<String, String> {
    args.get("id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| format!("{field} requires an id argument"))
}

pub fn demo_schema() -> SimulatorSchema {
    let store = Arc::new(TodoStore::default());

    let list_store = Arc::clone(&store);
    let get_store = Arc::clone(&store);
    let create_store = Arc::clone(&store);
    let update_store = Arc::clone(&store);
    let delete_store = Arc::clone(&store);

    SimulatorSchema::new()
        .query(
            "listTodos",
            resolver(move |_args| {
                let store = Arc::clone(&list_store);
                async move { Ok(Value::Array(store.list())) }
            }),
        )
        .query(
            "getTodo",
            resolver(move |args| {
                let store = Arc::clone(&get_store);
                async move {
                    let id = id_argument(&args, "getTodo")?;
                    Ok(store.get(&id).unwrap_or(Value::Null))
                }
            }),
        )
        .mutation(
            "createTodo",
            resolver(move |args| {
                let store = Arc::clone(&create_store);
                async move { Ok(store.create(&args)) }
            }),
        )
        .mutation(
            "updateTodo",
            resolver(move |args| {
                let store = Arc::clone(&update_store);
                async move {
                    let id = id_argument(&args, "updateTodo")?;
                    store.update(&id, &args).ok_or_else(|| format!("no todo with id {id}"))
                }
            }),
        )
        .mutation(
            "deleteTodo",
            resolver(move |args| {
                let store = Arc::clone(&delete_store);
                async move {
                    let id = id_argument(&args, "deleteTodo")?;
                    store.delete(&id).ok_or_else(|| format!("no todo with id {id}"))
                }
            }),
        )
        .subscription("onCreateTodo", &["createTodo"])
        .subscription("onUpdateTodo", &["updateTodo"])
        .subscription("onDeleteTodo", &["deleteTodo"])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_then_update_then_delete_round_trip() {
        let store = TodoStore::default();
        let mut args = FieldArguments::new();
        args.insert("name".to_string(), json!("write docs"));

        let created = store.create(&args);
        let id = created["id"].as_str().unwrap().to_string();
        assert_eq!(created["done"], json!(false));
        assert_eq!(store.list().len(), 1);

        let mut update = FieldArguments::new();
        update.insert("id".to_string(), json!(id.clone()));
        update.insert("done".to_string(), json!(true));
        let updated = store.update(&id, &update).unwrap();
        assert_eq!(updated["done"], json!(true));
        assert_eq!(updated["name"], json!("write docs"));

        assert!(store.delete(&id).is_some());
        assert!(store.get(&id).is_none());
        assert!(store.delete(&id).is_none());
    }
}
