//! On-disk item formats, reduced to the fields the index stores.

use crate::{Result, UpdateError};
use hpool_core::utils::load_json_from_file;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use uuid::Uuid;

pub fn read_value(path: &Path) -> Result<Value> {
    Ok(load_json_from_file(path)?)
}

pub fn from_value<T: DeserializeOwned>(path: &Path, j: Value) -> Result<T> {
    serde_json::from_value(j).map_err(|source| UpdateError::Json {
        path: path.to_path_buf(),
        source,
    })
}

/// The `type` field every item file carries.
pub fn item_type(j: &Value) -> &str {
    j.get("type").and_then(Value::as_str).unwrap_or("")
}

#[derive(Debug, Deserialize)]
pub struct Unit {
    pub uuid: Uuid,
    pub name: String,
    #[serde(default)]
    pub manufacturer: String,
}

#[derive(Debug, Deserialize)]
pub struct Gate {
    pub unit: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct Entity {
    pub uuid: Uuid,
    pub name: String,
    #[serde(default)]
    pub manufacturer: String,
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub gates: BTreeMap<Uuid, Gate>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct Symbol {
    pub uuid: Uuid,
    #[serde(default)]
    pub name: String,
    pub unit: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct Padstack {
    pub uuid: Uuid,
    pub name: String,
    #[serde(default)]
    pub well_known_name: String,
    #[serde(default)]
    pub padstack_type: String,
}

impl Padstack {
    pub const MECHANICAL: &'static str = "mechanical";
}

#[derive(Debug, Deserialize)]
pub struct Pad {
    pub padstack: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct Model {
    pub filename: String,
}

#[derive(Debug, Deserialize)]
pub struct Package {
    pub uuid: Uuid,
    pub name: String,
    #[serde(default)]
    pub manufacturer: String,
    #[serde(default)]
    pub pads: BTreeMap<Uuid, Pad>,
    #[serde(default)]
    pub alternate_for: Option<Uuid>,
    #[serde(default)]
    pub models: BTreeMap<Uuid, Model>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Package {
    pub fn alternate_for(&self) -> Uuid {
        self.alternate_for.unwrap_or_else(Uuid::nil)
    }
}

/// A part attribute stored as `[inherit, value]`.
#[derive(Debug, Default, Deserialize)]
pub struct Inheritable(pub bool, pub String);

impl Inheritable {
    /// The own value, or `base` when the attribute is inherited.
    pub fn resolve(&self, base: Option<&str>) -> String {
        match base {
            Some(b) if self.0 => b.to_string(),
            _ => self.1.clone(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct Parametric {
    #[serde(default)]
    pub table: String,
}

#[derive(Debug, Deserialize)]
pub struct Part {
    pub uuid: Uuid,
    #[serde(rename = "MPN", default)]
    pub mpn: Inheritable,
    #[serde(default)]
    pub value: Inheritable,
    #[serde(default)]
    pub manufacturer: Inheritable,
    #[serde(default)]
    pub datasheet: Inheritable,
    #[serde(default)]
    pub description: Inheritable,
    #[serde(default)]
    pub entity: Option<Uuid>,
    #[serde(default)]
    pub package: Option<Uuid>,
    #[serde(default)]
    pub base: Option<Uuid>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub inherit_tags: bool,
    #[serde(rename = "orderable_MPNs", default)]
    pub orderable_mpns: BTreeMap<Uuid, String>,
    #[serde(default)]
    pub parametric: Parametric,
    #[serde(default)]
    pub flags: BTreeMap<String, Value>,
}

impl Part {
    pub fn base(&self) -> Uuid {
        self.base.unwrap_or_else(Uuid::nil)
    }

    /// Flags are stored either as booleans or as `"set"`/`"clear"`/`"default"`.
    pub fn flag(&self, name: &str) -> bool {
        match self.flags.get(name) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => s == "set",
            _ => false,
        }
    }
}

/// Frames and decals only contribute their name.
#[derive(Debug, Deserialize)]
pub struct Named {
    pub uuid: Uuid,
    #[serde(default)]
    pub name: String,
}

pub fn check_type(path: &Path, j: &Value, expected: &str) -> Result<()> {
    let found = item_type(j);
    if found != expected {
        return Err(UpdateError::InvalidItem(format!(
            "{}: expected type {}, found {:?}",
            path.display(),
            expected,
            found
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::path::PathBuf;

    #[test]
    fn test_part_fields() {
        let base = Uuid::from_u128(7);
        let j = json!({
            "type": "part",
            "uuid": Uuid::from_u128(1).to_string(),
            "MPN": [false, "RC0603"],
            "value": [true, ""],
            "base": base.to_string(),
            "orderable_MPNs": {Uuid::from_u128(2).to_string(): "RC0603-T"},
            "parametric": {"table": "resistors"},
            "flags": {"base_part": "set"}
        });
        let part: Part = from_value(&PathBuf::from("p.json"), j).unwrap();
        assert_eq!(part.base(), base);
        assert_eq!(part.mpn.resolve(Some("X")), "RC0603");
        assert_eq!(part.value.resolve(Some("10k")), "10k");
        assert_eq!(part.value.resolve(None), "");
        assert_eq!(part.parametric.table, "resistors");
        assert!(part.flag("base_part"));
        assert_eq!(part.orderable_mpns.len(), 1);
        assert!(part.entity.is_none());
    }

    #[test]
    fn test_type_mismatch_is_item_error() {
        let err = check_type(Path::new("x.json"), &json!({"type": "unit"}), "symbol").unwrap_err();
        assert!(err.is_item_error());
    }
}
