//! Structural JSON diff producing RFC 6902 style operations
//! (`add`, `remove`, `replace`), used to explain why a cached item is stale.

use serde_json::{json, Value};

/// Operations turning `source` into `target`. Empty when they are equal.
pub fn diff(source: &Value, target: &Value) -> Vec<Value> {
    let mut ops = Vec::new();
    diff_at(source, target, String::new(), &mut ops);
    ops
}

fn diff_at(source: &Value, target: &Value, path: String, ops: &mut Vec<Value>) {
    if source == target {
        return;
    }
    match (source, target) {
        (Value::Object(a), Value::Object(b)) => {
            for (key, va) in a {
                let p = format!("{}/{}", path, escape(key));
                match b.get(key) {
                    Some(vb) => diff_at(va, vb, p, ops),
                    None => ops.push(json!({"op": "remove", "path": p})),
                }
            }
            for (key, vb) in b {
                if !a.contains_key(key) {
                    let p = format!("{}/{}", path, escape(key));
                    ops.push(json!({"op": "add", "path": p, "value": vb}));
                }
            }
        }
        (Value::Array(a), Value::Array(b)) => {
            let common = a.len().min(b.len());
            for i in 0..common {
                diff_at(&a[i], &b[i], format!("{}/{}", path, i), ops);
            }
            // remove from the back so indices stay valid while applying
            for i in (common..a.len()).rev() {
                ops.push(json!({"op": "remove", "path": format!("{}/{}", path, i)}));
            }
            for (i, vb) in b.iter().enumerate().skip(common) {
                ops.push(json!({"op": "add", "path": format!("{}/{}", path, i), "value": vb}));
            }
        }
        _ => ops.push(json!({"op": "replace", "path": path, "value": target})),
    }
}

fn escape(key: &str) -> String {
    key.replace('~', "~0").replace('/', "~1")
}
