use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectType {
    Unit,
    Entity,
    Symbol,
    Padstack,
    Package,
    Part,
    Frame,
    Decal,
    #[serde(rename = "model_3d")]
    Model3d,
}

impl ObjectType {
    /// Categories in the order a full update processes them.
    pub const UPDATE_ORDER: [ObjectType; 8] = [
        Self::Unit,
        Self::Entity,
        Self::Symbol,
        Self::Padstack,
        Self::Package,
        Self::Part,
        Self::Frame,
        Self::Decal,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unit => "unit",
            Self::Entity => "entity",
            Self::Symbol => "symbol",
            Self::Padstack => "padstack",
            Self::Package => "package",
            Self::Part => "part",
            Self::Frame => "frame",
            Self::Decal => "decal",
            Self::Model3d => "model_3d",
        }
    }

    /// Index table and on-disk directory name. `None` for types the pool
    /// does not index.
    pub fn table_name(&self) -> Option<&'static str> {
        match self {
            Self::Unit => Some("units"),
            Self::Entity => Some("entities"),
            Self::Symbol => Some("symbols"),
            Self::Padstack => Some("padstacks"),
            Self::Package => Some("packages"),
            Self::Part => Some("parts"),
            Self::Frame => Some("frames"),
            Self::Decal => Some("decals"),
            Self::Model3d => None,
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Model3d => "3D model",
            other => other.as_str(),
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownObjectType(pub String);

impl fmt::Display for UnknownObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown object type {:?}", self.0)
    }
}

impl std::error::Error for UnknownObjectType {}

impl FromStr for ObjectType {
    type Err = UnknownObjectType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unit" => Ok(Self::Unit),
            "entity" => Ok(Self::Entity),
            "symbol" => Ok(Self::Symbol),
            "padstack" => Ok(Self::Padstack),
            "package" => Ok(Self::Package),
            "part" => Ok(Self::Part),
            "frame" => Ok(Self::Frame),
            "decal" => Ok(Self::Decal),
            "model_3d" => Ok(Self::Model3d),
            other => Err(UnknownObjectType(other.to_string())),
        }
    }
}

/// Progress kinds reported through the updater's status callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolUpdateStatus {
    Info,
    File,
    FileError,
    Error,
    Done,
}

impl PoolUpdateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::File => "file",
            Self::FileError => "file_error",
            Self::Error => "error",
            Self::Done => "done",
        }
    }
}
