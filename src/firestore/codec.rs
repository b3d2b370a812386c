/// Firestore REST Codec
///
/// Converts between the crate's document model and the Firestore v1 JSON
/// representation: typed values (`{"integerValue": "5"}`), documents, commit
/// writes and google.rpc.Status error bodies.

use serde_json::{json, Map, Value as Json};
use crate::document::{Document, DocumentUpdate, FieldOp, Fields, Number, Value};
use crate::path::{CollectionPath, DocumentPath};
use crate::store::StoreError;

/// Resource names for one database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceNames {
    project_id: String,
    database_id: String,
    database: String,
    documents_root: String,
}

impl ResourceNames {
    pub fn new(project_id: &str, database_id: &str) -> Self {
        let database = format!("projects/{}/databases/{}", project_id, database_id);
        let documents_root = format!("{}/documents", database);
        Self {
            project_id: project_id.to_string(),
            database_id: database_id.to_string(),
            database,
            documents_root,
        }
    }

    /// Unescaped URL path segments of the database resource.
    pub fn database_segments(&self) -> [&str; 4] {
        ["projects", &self.project_id, "databases", &self.database_id]
    }

    /// `projects/{p}/databases/{d}`
    pub fn database(&self) -> &str {
        &self.database
    }

    /// `projects/{p}/databases/{d}/documents`
    pub fn documents_root(&self) -> &str {
        &self.documents_root
    }

    /// Full resource name, as used in bodies. Not URL safe.
    pub fn document(&self, path: &DocumentPath) -> String {
        format!("{}/{}", self.documents_root, path)
    }

    /// Unescaped URL path segments, below the database, of the resource a
    /// `runQuery` over `collection` is sent to.
    pub fn query_segments(&self, collection: &CollectionPath) -> Vec<String> {
        let mut segments = vec!["documents".to_string()];
        if let Some(doc) = collection.parent() {
            segments.extend(doc.segments().iter().cloned());
        }
        if let Some(last) = segments.last_mut() {
            last.push_str(":runQuery");
        }
        segments
    }

    /// Document path from a full resource name. References may point at
    /// other databases, so any `.../documents/` prefix is accepted.
    pub fn parse_document(&self, name: &str) -> Result<DocumentPath, StoreError> {
        let relative = match name.strip_prefix(&self.documents_root) {
            Some(rest) => rest.trim_start_matches('/'),
            None => name
                .split_once("/documents/")
                .map(|(_, rest)| rest)
                .ok_or_else(|| StoreError::Decode(format!("not a document name: {}", name)))?,
        };
        DocumentPath::parse(relative)
            .map_err(|e| StoreError::Decode(format!("bad document name {}: {}", name, e)))
    }
}

// ============================================================================
// VALUES
// ============================================================================

pub fn encode_value(value: &Value, names: &ResourceNames) -> Json {
    match value {
        Value::Null => json!({ "nullValue": null }),
        Value::Boolean(b) => json!({ "booleanValue": b }),
        // int64 travels as a JSON string
        Value::Integer(i) => json!({ "integerValue": i.to_string() }),
        Value::Double(d) => json!({ "doubleValue": encode_double(*d) }),
        Value::Timestamp(t) => json!({ "timestampValue": t }),
        Value::String(s) => json!({ "stringValue": s }),
        Value::Bytes(b) => json!({ "bytesValue": b }),
        Value::Reference(path) => json!({ "referenceValue": names.document(path) }),
        Value::GeoPoint { latitude, longitude } => json!({
            "geoPointValue": { "latitude": latitude, "longitude": longitude }
        }),
        Value::Array(values) => json!({
            "arrayValue": {
                "values": values.iter().map(|v| encode_value(v, names)).collect::<Vec<_>>()
            }
        }),
        Value::Map(fields) => json!({ "mapValue": { "fields": encode_fields(fields, names) } }),
    }
}

fn encode_double(d: f64) -> Json {
    if d.is_nan() {
        json!("NaN")
    } else if d.is_infinite() {
        json!(if d > 0.0 { "Infinity" } else { "-Infinity" })
    } else {
        json!(d)
    }
}

pub fn encode_fields(fields: &Fields, names: &ResourceNames) -> Json {
    let map: Map<String, Json> = fields
        .iter()
        .map(|(k, v)| (k.clone(), encode_value(v, names)))
        .collect();
    Json::Object(map)
}

pub fn encode_number(n: Number) -> Json {
    match n {
        Number::Integer(i) => json!({ "integerValue": i.to_string() }),
        Number::Double(d) => json!({ "doubleValue": encode_double(d) }),
    }
}

fn decode_error(what: &str, raw: &Json) -> StoreError {
    StoreError::Decode(format!("invalid {}: {}", what, raw))
}

fn decode_integer(raw: &Json) -> Result<i64, StoreError> {
    match raw {
        Json::String(s) => s.parse().map_err(|_| decode_error("integerValue", raw)),
        Json::Number(n) => n.as_i64().ok_or_else(|| decode_error("integerValue", raw)),
        _ => Err(decode_error("integerValue", raw)),
    }
}

fn decode_double(raw: &Json) -> Result<f64, StoreError> {
    match raw {
        Json::Number(n) => n.as_f64().ok_or_else(|| decode_error("doubleValue", raw)),
        Json::String(s) => match s.as_str() {
            "NaN" => Ok(f64::NAN),
            "Infinity" => Ok(f64::INFINITY),
            "-Infinity" => Ok(f64::NEG_INFINITY),
            other => other.parse().map_err(|_| decode_error("doubleValue", raw)),
        },
        _ => Err(decode_error("doubleValue", raw)),
    }
}

pub fn decode_value(raw: &Json, names: &ResourceNames) -> Result<Value, StoreError> {
    let obj = raw.as_object().ok_or_else(|| decode_error("value", raw))?;
    let (kind, inner) = obj.iter().next().ok_or_else(|| decode_error("value", raw))?;

    let value = match kind.as_str() {
        "nullValue" => Value::Null,
        "booleanValue" => Value::Boolean(inner.as_bool().ok_or_else(|| decode_error(kind, raw))?),
        "integerValue" => Value::Integer(decode_integer(inner)?),
        "doubleValue" => Value::Double(decode_double(inner)?),
        "timestampValue" => Value::Timestamp(string_of(kind, inner)?),
        "stringValue" => Value::String(string_of(kind, inner)?),
        "bytesValue" => Value::Bytes(string_of(kind, inner)?),
        "referenceValue" => Value::Reference(names.parse_document(&string_of(kind, inner)?)?),
        "geoPointValue" => Value::GeoPoint {
            latitude: inner.get("latitude").and_then(Json::as_f64).unwrap_or(0.0),
            longitude: inner.get("longitude").and_then(Json::as_f64).unwrap_or(0.0),
        },
        "arrayValue" => {
            let values = match inner.get("values") {
                Some(Json::Array(items)) => items
                    .iter()
                    .map(|item| decode_value(item, names))
                    .collect::<Result<Vec<_>, _>>()?,
                Some(other) => return Err(decode_error("arrayValue", other)),
                None => Vec::new(),
            };
            Value::Array(values)
        }
        "mapValue" => Value::Map(decode_fields(inner.get("fields"), names)?),
        _ => return Err(decode_error("value type", raw)),
    };
    Ok(value)
}

fn string_of(kind: &str, raw: &Json) -> Result<String, StoreError> {
    raw.as_str()
        .map(str::to_string)
        .ok_or_else(|| decode_error(kind, raw))
}

/// Decode a `fields` object; absent means an empty document.
pub fn decode_fields(raw: Option<&Json>, names: &ResourceNames) -> Result<Fields, StoreError> {
    let Some(raw) = raw else {
        return Ok(Fields::new());
    };
    let obj = raw.as_object().ok_or_else(|| decode_error("fields", raw))?;
    obj.iter()
        .map(|(k, v)| Ok::<_, StoreError>((k.clone(), decode_value(v, names)?)))
        .collect()
}

pub fn decode_document(raw: &Json, names: &ResourceNames) -> Result<Document, StoreError> {
    let name = raw
        .get("name")
        .and_then(Json::as_str)
        .ok_or_else(|| decode_error("document", raw))?;
    let path = names.parse_document(name)?;
    let fields = decode_fields(raw.get("fields"), names)?;
    Ok(Document::new(path, fields))
}

/// Documents out of a streamed `runQuery` response. Entries without a
/// document (progress / read time only) are skipped.
pub fn decode_query_results(raw: &Json, names: &ResourceNames) -> Result<Vec<Document>, StoreError> {
    let entries = raw.as_array().ok_or_else(|| decode_error("runQuery response", raw))?;
    entries
        .iter()
        .filter_map(|entry| entry.get("document"))
        .map(|doc| decode_document(doc, names))
        .collect()
}

/// The single document of a `batchGet` response: `found` decodes,
/// `missing` is `None`.
pub fn decode_batch_get(raw: &Json, names: &ResourceNames) -> Result<Option<Document>, StoreError> {
    let entries = raw.as_array().ok_or_else(|| decode_error("batchGet response", raw))?;
    for entry in entries {
        if let Some(found) = entry.get("found") {
            return decode_document(found, names).map(Some);
        }
        if entry.get("missing").is_some() {
            return Ok(None);
        }
    }
    Err(decode_error("batchGet response", raw))
}

// ============================================================================
// QUERIES & WRITES
// ============================================================================

fn is_simple_field(field: &str) -> bool {
    let mut chars = field.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Field path as Firestore expects it in masks and filters.
pub fn quote_field_path(field: &str) -> String {
    if is_simple_field(field) {
        field.to_string()
    } else {
        format!("`{}`", field.replace('\\', "\\\\").replace('`', "\\`"))
    }
}

pub fn encode_equality_query(collection: &CollectionPath, field: &str, value: &Value, names: &ResourceNames) -> Json {
    json!({
        "from": [{ "collectionId": collection.id() }],
        "where": {
            "fieldFilter": {
                "field": { "fieldPath": quote_field_path(field) },
                "op": "EQUAL",
                "value": encode_value(value, names)
            }
        }
    })
}

/// `update` write: set fields and field deletes go through the mask,
/// increments through `updateTransforms`. Requires the document to exist.
pub fn encode_update_write(path: &DocumentPath, update: &DocumentUpdate, names: &ResourceNames) -> Json {
    let mut fields = Map::new();
    let mut mask = Vec::new();
    let mut transforms = Vec::new();

    for (field, op) in update.ops() {
        match op {
            FieldOp::Set(value) => {
                fields.insert(field.clone(), encode_value(value, names));
                mask.push(quote_field_path(field));
            }
            FieldOp::Delete => {
                // In the mask but not in fields: removed
                mask.push(quote_field_path(field));
            }
            FieldOp::Increment(by) => {
                transforms.push(json!({
                    "fieldPath": quote_field_path(field),
                    "increment": encode_number(*by)
                }));
            }
        }
    }

    let mut write = json!({
        "update": { "name": names.document(path), "fields": fields },
        "updateMask": { "fieldPaths": mask },
        "currentDocument": { "exists": true }
    });
    if !transforms.is_empty() {
        write["updateTransforms"] = Json::Array(transforms);
    }
    write
}

pub fn encode_delete_write(path: &DocumentPath, names: &ResourceNames) -> Json {
    json!({ "delete": names.document(path) })
}

// ============================================================================
// ERRORS
// ============================================================================

fn canonical_code(http: u16) -> &'static str {
    match http {
        400 => "INVALID_ARGUMENT",
        401 => "UNAUTHENTICATED",
        403 => "PERMISSION_DENIED",
        404 => "NOT_FOUND",
        409 => "ABORTED",
        412 => "FAILED_PRECONDITION",
        503 => "UNAVAILABLE",
        _ => "UNKNOWN",
    }
}

/// (status code, message) from an error response body.
pub fn parse_rpc_status(http: u16, body: &str) -> (String, String) {
    let parsed: Option<Json> = serde_json::from_str(body).ok();
    // Streaming methods (runQuery, batchGet) wrap the status in an array
    let status = parsed.as_ref().and_then(|raw| match raw {
        Json::Array(entries) => entries.iter().find_map(|entry| entry.get("error")),
        other => other.get("error"),
    });

    match status {
        Some(status) => {
            let code = status
                .get("status")
                .and_then(Json::as_str)
                .filter(|code| !code.is_empty())
                .unwrap_or(canonical_code(http))
                .to_string();
            let message = status
                .get("message")
                .and_then(Json::as_str)
                .unwrap_or_default()
                .to_string();
            (code, message)
        }
        None => (canonical_code(http).to_string(), body.trim().to_string()),
    }
}

pub fn status_error(code: &str, message: String) -> StoreError {
    match code {
        "ABORTED" => StoreError::Aborted(message),
        "PERMISSION_DENIED" => StoreError::PermissionDenied(message),
        "UNAUTHENTICATED" => StoreError::Unauthenticated(message),
        "FAILED_PRECONDITION" => StoreError::PreconditionFailed(message),
        "NOT_FOUND" => StoreError::NotFound(message),
        "INVALID_ARGUMENT" => StoreError::InvalidArgument(message),
        "UNAVAILABLE" => StoreError::Unavailable(message),
        _ => StoreError::Status {
            code: code.to_string(),
            message,
        },
    }
}
