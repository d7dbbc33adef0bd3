//! Schema definition files.
//!
//! The current layout is
//!
//! ```json
//! {
//!   "versions": {
//!     "1": { "description": "...", "fields": { "name": { "type": "string", "required": true } } },
//!     "2": {
//!       "fields": { ... },
//!       "upgrade_definitions": {
//!         "from_1": { "add_fields": [...], "remove_fields": [...],
//!                     "rename_fields": {...}, "transform_functions": {...} }
//!       }
//!     }
//!   }
//! }
//! ```
//!
//! Older files are accepted too: `versions` as a list, `fields` as a list of
//! objects carrying `name`, constraints written inline on the field,
//! `add_fields` as a `name -> type` mapping and `transform_fields` as a
//! `name -> {type, precision}` mapping. Saving always writes the layout above.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use log::{debug, info, warn};
use serde::Deserialize;
use serde_json::{Map, Value, json};

use crate::errors::{EncodingDecodingError, NodeStoreError, NodeStoreResult};
use crate::keys::NodeType;
use crate::schema::{
    Constraints, FieldDefinition, FieldUpgradeDefinition, SchemaCatalog, SchemaVersion,
    UpgradeStrategy, ValidationMode,
};
use crate::value::{FieldType, FieldValue};

/// Versions and strategies parsed from one schema file.
#[derive(Debug, Clone, Default)]
pub struct SchemaDocument {
    pub versions: Vec<SchemaVersion>,
    pub strategies: Vec<UpgradeStrategy>,
}

impl SchemaDocument {
    pub fn parse(text: &str) -> NodeStoreResult<Self> {
        let raw: RawDocument = serde_json::from_str(text).map_err(|e| invalid(None, e))?;
        raw.into_document()
    }

    /// Register everything in the document with `catalog`.
    pub fn register(self, catalog: &SchemaCatalog, node_type: &NodeType) {
        for version in self.versions {
            catalog.register_version(node_type, version);
        }
        for strategy in self.strategies {
            catalog.register_strategy(node_type, strategy);
        }
    }

    /// Snapshot a node type's catalog entries.
    pub fn from_catalog(catalog: &SchemaCatalog, node_type: &NodeType) -> Self {
        Self {
            versions: catalog
                .versions(node_type)
                .iter()
                .map(|v| v.as_ref().clone())
                .collect(),
            strategies: catalog
                .strategies(node_type)
                .iter()
                .map(|s| s.as_ref().clone())
                .collect(),
        }
    }

    /// Render in the mapping-of-versions layout. A strategy leaving version
    /// `n` is written as `from_n` under version `n + 1`, or under the nearest
    /// registered version above it when `n + 1` is not registered. With no
    /// versions at all, strategies go in a top-level `upgrade_definitions`.
    pub fn to_json(&self) -> Value {
        let mut upgrades: BTreeMap<Option<u32>, Map<String, Value>> = BTreeMap::new();
        for strategy in &self.strategies {
            upgrades
                .entry(self.holder_of(strategy))
                .or_default()
                .insert(format!("from_{}", strategy.from_version), strategy_to_json(strategy));
        }

        let mut versions = Map::new();
        for version in &self.versions {
            let fields: Map<String, Value> = version
                .fields()
                .map(|f| (f.name.clone(), field_to_json(f)))
                .collect();
            versions.insert(
                version.version().to_string(),
                json!({
                    "version": version.version(),
                    "description": version.description(),
                    "fields": fields,
                    "upgrade_definitions": upgrades.remove(&Some(version.version())).unwrap_or_default(),
                }),
            );
        }
        let mut document = json!({ "versions": versions });
        if let (Some(orphans), Some(map)) = (upgrades.remove(&None), document.as_object_mut()) {
            map.insert("upgrade_definitions".into(), Value::Object(orphans));
        }
        document
    }

    /// The version a strategy is written under.
    fn holder_of(&self, strategy: &UpgradeStrategy) -> Option<u32> {
        let target = strategy.to_version();
        let numbers = self.versions.iter().map(SchemaVersion::version);
        numbers
            .clone()
            .filter(|&n| n >= target)
            .min()
            .or_else(|| numbers.max())
    }
}

/// Load one schema file into `catalog` under `node_type`. Returns the
/// number of versions registered.
pub fn load_file(
    catalog: &SchemaCatalog,
    node_type: &NodeType,
    path: impl AsRef<Path>,
) -> NodeStoreResult<usize> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)
        .map_err(|e| NodeStoreError::io(format!("reading {}", path.display()), e))?;
    let document = SchemaDocument::parse(&text).map_err(|e| match e {
        NodeStoreError::InvalidSchema { reason, .. } => NodeStoreError::InvalidSchema {
            path: Some(path.to_path_buf()),
            reason,
        },
        other => other,
    })?;
    let count = document.versions.len();
    document.register(catalog, node_type);
    info!("Loaded {count} schema version(s) for {node_type} from {}", path.display());
    Ok(count)
}

/// Load every `*.json` file below `dir`. The node type is the file's path
/// relative to `dir` without the extension, e.g. `finance/sales_order.json`
/// becomes `finance/sales_order`.
///
/// Malformed files are logged and skipped so one bad file does not hide the
/// rest of the metadata.
pub fn load_dir(catalog: &SchemaCatalog, dir: impl AsRef<Path>) -> NodeStoreResult<Vec<NodeType>> {
    let dir = dir.as_ref();
    let mut files = Vec::new();
    collect_json_files(dir, &mut files)?;
    files.sort();

    let mut loaded = Vec::new();
    for file in files {
        let Some(node_type) = node_type_for(dir, &file) else {
            warn!("Skipping schema file with unusable name: {}", file.display());
            continue;
        };
        match load_file(catalog, &node_type, &file) {
            Ok(_) => loaded.push(node_type),
            Err(e) => warn!("Skipping schema file {}: {e}", file.display()),
        }
    }
    Ok(loaded)
}

/// Write a node type's catalog entries to `path`, creating parent
/// directories as needed.
pub fn save_file(
    catalog: &SchemaCatalog,
    node_type: &NodeType,
    path: impl AsRef<Path>,
) -> NodeStoreResult<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| NodeStoreError::io(format!("creating {}", parent.display()), e))?;
    }
    let document = SchemaDocument::from_catalog(catalog, node_type).to_json();
    let text = serde_json::to_string_pretty(&document).map_err(EncodingDecodingError::from)?;
    fs::write(path, text).map_err(|e| NodeStoreError::io(format!("writing {}", path.display()), e))
}

fn collect_json_files(dir: &Path, out: &mut Vec<PathBuf>) -> NodeStoreResult<()> {
    let entries =
        fs::read_dir(dir).map_err(|e| NodeStoreError::io(format!("listing {}", dir.display()), e))?;
    for entry in entries {
        let entry = entry.map_err(|e| NodeStoreError::io(format!("listing {}", dir.display()), e))?;
        let path = entry.path();
        let hidden = entry.file_name().to_string_lossy().starts_with('.');
        if hidden {
            continue;
        }
        if path.is_dir() {
            collect_json_files(&path, out)?;
        } else if path.extension().is_some_and(|ext| ext == "json") {
            out.push(path);
        }
    }
    Ok(())
}

fn node_type_for(root: &Path, file: &Path) -> Option<NodeType> {
    let relative = file.strip_prefix(root).ok()?.with_extension("");
    let segments: Vec<_> = relative
        .components()
        .map(|c| c.as_os_str().to_str())
        .collect::<Option<_>>()?;
    NodeType::new(segments.join("/")).ok()
}

fn invalid(path: Option<&Path>, reason: impl ToString) -> NodeStoreError {
    NodeStoreError::InvalidSchema {
        path: path.map(Path::to_path_buf),
        reason: reason.to_string(),
    }
}

fn field_to_json(field: &FieldDefinition) -> Value {
    let mut out = json!({
        "type": field.field_type.to_string(),
        "required": field.required,
        "validation": field.validation_mode.to_string(),
        "default": field.default_value.to_json(),
        "description": field.description,
    });
    if !field.constraints.is_empty() {
        if let (Some(map), Ok(constraints)) =
            (out.as_object_mut(), serde_json::to_value(&field.constraints))
        {
            map.insert("constraints".into(), constraints);
        }
    }
    out
}

fn strategy_to_json(strategy: &UpgradeStrategy) -> Value {
    let add_fields: Vec<Value> = strategy
        .add_fields
        .iter()
        .map(|f| {
            json!({
                "name": f.name,
                "type": f.field_type.to_string(),
                "default": f.default_value.to_json(),
                "transform": f.transform,
                "description": f.description,
            })
        })
        .collect();
    json!({
        "description": strategy.description,
        "add_fields": add_fields,
        "remove_fields": strategy.remove_fields,
        "rename_fields": strategy.rename_fields,
        "transform_functions": strategy.transform_functions,
    })
}

/// Parse a JSON default into a value of the declared type where possible.
fn typed_default(default: Option<Value>, field_type: FieldType) -> FieldValue {
    let value = default.map_or(FieldValue::Null, FieldValue::from_json);
    value.decode_as(field_type).unwrap_or(value)
}

fn default_field_type() -> FieldType {
    FieldType::String
}

#[derive(Deserialize)]
struct RawDocument {
    #[serde(default)]
    versions: Option<VersionsForm>,
    #[serde(default)]
    upgrade_definitions: BTreeMap<String, Value>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum VersionsForm {
    Mapping(BTreeMap<String, VersionEntry>),
    List(Vec<VersionEntry>),
}

#[derive(Deserialize)]
struct VersionEntry {
    #[serde(default)]
    version: Option<u32>,
    #[serde(default)]
    description: String,
    #[serde(default)]
    fields: Option<FieldsForm>,
    #[serde(default)]
    upgrade_definitions: BTreeMap<String, Value>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum FieldsForm {
    Mapping(IndexMap<String, FieldEntry>),
    List(Vec<NamedFieldEntry>),
}

#[derive(Deserialize)]
struct NamedFieldEntry {
    name: String,
    #[serde(flatten)]
    entry: FieldEntry,
}

#[derive(Deserialize)]
struct FieldEntry {
    #[serde(rename = "type", default = "default_field_type")]
    field_type: FieldType,
    #[serde(default)]
    required: bool,
    #[serde(default, alias = "validation_mode")]
    validation: ValidationMode,
    #[serde(default)]
    default: Option<Value>,
    #[serde(default)]
    description: String,
    #[serde(default)]
    constraints: Constraints,
    #[serde(flatten)]
    inline: Constraints,
}

impl FieldEntry {
    fn into_definition(self, name: String) -> FieldDefinition {
        FieldDefinition::builder()
            .name(name)
            .field_type(self.field_type)
            .required(self.required)
            .validation_mode(self.validation)
            .default_value(typed_default(self.default, self.field_type))
            .description(self.description)
            .constraints(self.constraints.or(self.inline))
            .build()
    }
}

#[derive(Deserialize)]
struct UpgradeEntry {
    #[serde(default)]
    description: String,
    #[serde(default)]
    add_fields: Option<AddFieldsForm>,
    #[serde(default)]
    remove_fields: Vec<String>,
    #[serde(default)]
    rename_fields: IndexMap<String, String>,
    #[serde(default)]
    transform_functions: IndexMap<String, String>,
    #[serde(default)]
    transform_fields: IndexMap<String, LegacyTransform>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum AddFieldsForm {
    List(Vec<AddFieldEntry>),
    Mapping(IndexMap<String, AddFieldSpec>),
}

#[derive(Deserialize)]
struct AddFieldEntry {
    name: String,
    #[serde(flatten)]
    body: AddFieldBody,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum AddFieldSpec {
    TypeName(FieldType),
    Entry(AddFieldBody),
}

#[derive(Deserialize)]
struct AddFieldBody {
    #[serde(rename = "type", default = "default_field_type")]
    field_type: FieldType,
    #[serde(default)]
    default: Option<Value>,
    #[serde(default, alias = "transform_function")]
    transform: Option<String>,
    #[serde(default)]
    description: String,
}

impl AddFieldBody {
    fn into_definition(self, name: String) -> FieldUpgradeDefinition {
        let default_value = match self.default {
            Some(value) => typed_default(Some(value), self.field_type),
            None => self.field_type.implicit_default(),
        };
        FieldUpgradeDefinition {
            name,
            field_type: self.field_type,
            default_value,
            transform: self.transform,
            description: self.description,
        }
    }
}

/// `{"type": "DECIMAL", "precision": 2}` style conversion.
#[derive(Deserialize)]
struct LegacyTransform {
    #[serde(rename = "type")]
    field_type: FieldType,
    #[serde(default)]
    precision: Option<usize>,
}

impl LegacyTransform {
    fn transform_name(&self) -> Option<String> {
        match self.field_type {
            FieldType::Decimal => Some(format!("to_decimal_{}", self.precision.unwrap_or(2))),
            FieldType::Integer => Some("to_integer".into()),
            FieldType::String => Some("to_string".into()),
            FieldType::Boolean => Some("to_boolean".into()),
            _ => None,
        }
    }
}

impl RawDocument {
    fn into_document(self) -> NodeStoreResult<SchemaDocument> {
        let entries: Vec<(u32, VersionEntry)> = match self.versions {
            None => Vec::new(),
            Some(VersionsForm::Mapping(map)) => map
                .into_iter()
                .map(|(key, entry)| {
                    key.trim()
                        .parse::<u32>()
                        .map(|n| (n, entry))
                        .map_err(|_| invalid(None, format!("version key `{key}` is not a number")))
                })
                .collect::<NodeStoreResult<_>>()?,
            Some(VersionsForm::List(list)) => list
                .into_iter()
                .enumerate()
                .map(|(index, entry)| (entry.version.unwrap_or(index as u32 + 1), entry))
                .collect(),
        };

        let mut document = SchemaDocument::default();
        for (number, entry) in entries {
            let fields: Vec<FieldDefinition> = match entry.fields {
                None => Vec::new(),
                Some(FieldsForm::Mapping(map)) => map
                    .into_iter()
                    .map(|(name, field)| field.into_definition(name))
                    .collect(),
                Some(FieldsForm::List(list)) => list
                    .into_iter()
                    .map(|named| named.entry.into_definition(named.name))
                    .collect(),
            };
            document
                .versions
                .push(SchemaVersion::new(number, entry.description, fields)?);

            push_strategies(
                &mut document,
                entry.upgrade_definitions,
                &format!("version {number}"),
            )?;
        }
        push_strategies(&mut document, self.upgrade_definitions, "the document")?;
        Ok(document)
    }
}

fn push_strategies(
    document: &mut SchemaDocument,
    definitions: BTreeMap<String, Value>,
    location: &str,
) -> NodeStoreResult<()> {
    for (key, body) in definitions {
        let Some(from) = key.strip_prefix("from_").and_then(|n| n.parse::<u32>().ok()) else {
            debug!("Ignoring upgrade definition `{key}` of {location}");
            continue;
        };
        let upgrade: UpgradeEntry = serde_json::from_value(body)
            .map_err(|e| invalid(None, format!("upgrade definition `{key}` of {location}: {e}")))?;
        document.strategies.push(upgrade.into_strategy(from));
    }
    Ok(())
}

impl UpgradeEntry {
    fn into_strategy(self, from_version: u32) -> UpgradeStrategy {
        let add_fields = match self.add_fields {
            None => Vec::new(),
            Some(AddFieldsForm::List(list)) => list
                .into_iter()
                .map(|entry| entry.body.into_definition(entry.name))
                .collect(),
            Some(AddFieldsForm::Mapping(map)) => map
                .into_iter()
                .map(|(name, spec)| match spec {
                    AddFieldSpec::TypeName(field_type) => FieldUpgradeDefinition {
                        default_value: field_type.implicit_default(),
                        name,
                        field_type,
                        transform: None,
                        description: String::new(),
                    },
                    AddFieldSpec::Entry(body) => body.into_definition(name),
                })
                .collect(),
        };

        let mut transform_functions = self.transform_functions;
        for (field, legacy) in self.transform_fields {
            match legacy.transform_name() {
                Some(name) => {
                    transform_functions.entry(field).or_insert(name);
                }
                None => warn!(
                    "No conversion for legacy transform of `{field}` to {}",
                    legacy.field_type
                ),
            }
        }

        UpgradeStrategy {
            from_version,
            description: self.description,
            add_fields,
            remove_fields: self.remove_fields.into_iter().collect(),
            rename_fields: self.rename_fields,
            transform_functions,
        }
    }
}
