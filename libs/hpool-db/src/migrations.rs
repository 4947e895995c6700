/// Bump whenever `SCHEMA` changes; a mismatching index is rebuilt from scratch.
pub const REQUIRED_SCHEMA_VERSION: u32 = 25;

pub const SCHEMA: &str = r#"
DROP VIEW IF EXISTS all_items_view;
DROP TABLE IF EXISTS units;
DROP TABLE IF EXISTS entities;
DROP TABLE IF EXISTS symbols;
DROP TABLE IF EXISTS padstacks;
DROP TABLE IF EXISTS packages;
DROP TABLE IF EXISTS parts;
DROP TABLE IF EXISTS frames;
DROP TABLE IF EXISTS decals;
DROP TABLE IF EXISTS dependencies;
DROP TABLE IF EXISTS tags;
DROP TABLE IF EXISTS models;
DROP TABLE IF EXISTS orderable_MPNs;
DROP TABLE IF EXISTS pools_included;
DROP TABLE IF EXISTS installation_uuid;

CREATE TABLE units (
  uuid TEXT NOT NULL PRIMARY KEY,
  name TEXT NOT NULL,
  manufacturer TEXT NOT NULL,
  filename TEXT NOT NULL,
  mtime INTEGER NOT NULL,
  pool_uuid TEXT NOT NULL,
  last_pool_uuid TEXT NOT NULL
);

CREATE TABLE entities (
  uuid TEXT NOT NULL PRIMARY KEY,
  name TEXT NOT NULL,
  manufacturer TEXT NOT NULL,
  prefix TEXT NOT NULL,
  n_gates INTEGER NOT NULL,
  filename TEXT NOT NULL,
  mtime INTEGER NOT NULL,
  pool_uuid TEXT NOT NULL,
  last_pool_uuid TEXT NOT NULL
);

CREATE TABLE symbols (
  uuid TEXT NOT NULL PRIMARY KEY,
  name TEXT NOT NULL,
  unit TEXT NOT NULL,
  filename TEXT NOT NULL,
  mtime INTEGER NOT NULL,
  pool_uuid TEXT NOT NULL,
  last_pool_uuid TEXT NOT NULL
);

CREATE TABLE padstacks (
  uuid TEXT NOT NULL PRIMARY KEY,
  name TEXT NOT NULL,
  well_known_name TEXT NOT NULL,
  type TEXT NOT NULL,
  package TEXT NOT NULL,
  filename TEXT NOT NULL,
  mtime INTEGER NOT NULL,
  pool_uuid TEXT NOT NULL,
  last_pool_uuid TEXT NOT NULL
);

CREATE TABLE packages (
  uuid TEXT NOT NULL PRIMARY KEY,
  name TEXT NOT NULL,
  manufacturer TEXT NOT NULL,
  n_pads INTEGER NOT NULL,
  alternate_for TEXT NOT NULL,
  filename TEXT NOT NULL,
  mtime INTEGER NOT NULL,
  pool_uuid TEXT NOT NULL,
  last_pool_uuid TEXT NOT NULL
);

CREATE TABLE parts (
  uuid TEXT NOT NULL PRIMARY KEY,
  MPN TEXT NOT NULL,
  manufacturer TEXT NOT NULL,
  value TEXT NOT NULL,
  description TEXT NOT NULL,
  datasheet TEXT NOT NULL,
  entity TEXT NOT NULL,
  package TEXT NOT NULL,
  base TEXT NOT NULL,
  parametric_table TEXT NOT NULL,
  flag_base_part INTEGER NOT NULL,
  filename TEXT NOT NULL,
  mtime INTEGER NOT NULL,
  pool_uuid TEXT NOT NULL,
  last_pool_uuid TEXT NOT NULL
);

CREATE TABLE frames (
  uuid TEXT NOT NULL PRIMARY KEY,
  name TEXT NOT NULL,
  filename TEXT NOT NULL,
  mtime INTEGER NOT NULL,
  pool_uuid TEXT NOT NULL,
  last_pool_uuid TEXT NOT NULL
);

CREATE TABLE decals (
  uuid TEXT NOT NULL PRIMARY KEY,
  name TEXT NOT NULL,
  filename TEXT NOT NULL,
  mtime INTEGER NOT NULL,
  pool_uuid TEXT NOT NULL,
  last_pool_uuid TEXT NOT NULL
);

CREATE TABLE dependencies (
  type TEXT NOT NULL,
  uuid TEXT NOT NULL,
  dep_type TEXT NOT NULL,
  dep_uuid TEXT NOT NULL
);

CREATE INDEX idx_dependencies_item ON dependencies(type, uuid);
CREATE INDEX idx_dependencies_dep ON dependencies(dep_type, dep_uuid);

CREATE TABLE tags (
  tag TEXT NOT NULL,
  uuid TEXT NOT NULL,
  type TEXT NOT NULL
);

CREATE INDEX idx_tags_item ON tags(type, uuid);
CREATE INDEX idx_tags_tag ON tags(tag);

CREATE TABLE models (
  package_uuid TEXT NOT NULL,
  model_uuid TEXT NOT NULL,
  model_filename TEXT NOT NULL
);

CREATE INDEX idx_models_package ON models(package_uuid);

CREATE TABLE orderable_MPNs (
  part TEXT NOT NULL,
  uuid TEXT NOT NULL,
  MPN TEXT NOT NULL
);

CREATE INDEX idx_orderable_mpns_part ON orderable_MPNs(part);

CREATE TABLE pools_included (
  uuid TEXT NOT NULL PRIMARY KEY,
  level INTEGER NOT NULL
);

CREATE TABLE installation_uuid (
  uuid TEXT NOT NULL
);

CREATE VIEW all_items_view AS
  SELECT 'unit' AS type, uuid, name, filename, pool_uuid, last_pool_uuid FROM units
  UNION ALL
  SELECT 'entity' AS type, uuid, name, filename, pool_uuid, last_pool_uuid FROM entities
  UNION ALL
  SELECT 'symbol' AS type, uuid, name, filename, pool_uuid, last_pool_uuid FROM symbols
  UNION ALL
  SELECT 'padstack' AS type, uuid, name, filename, pool_uuid, last_pool_uuid FROM padstacks
  UNION ALL
  SELECT 'package' AS type, uuid, name, filename, pool_uuid, last_pool_uuid FROM packages
  UNION ALL
  SELECT 'part' AS type, uuid, MPN AS name, filename, pool_uuid, last_pool_uuid FROM parts
  UNION ALL
  SELECT 'frame' AS type, uuid, name, filename, pool_uuid, last_pool_uuid FROM frames
  UNION ALL
  SELECT 'decal' AS type, uuid, name, filename, pool_uuid, last_pool_uuid FROM decals;
"#;
