//! CMIS Browser Binding response types
//!
//! Data structures for deserializing succinct browser binding responses
//! (`succinct=true`), where properties arrive as a flat id → value map.

use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;

pub const PROP_OBJECT_ID: &str = "cmis:objectId";
pub const PROP_BASE_TYPE_ID: &str = "cmis:baseTypeId";
pub const PROP_NAME: &str = "cmis:name";
pub const PROP_PATH: &str = "cmis:path";
pub const PROP_CONTENT_LENGTH: &str = "cmis:contentStreamLength";
pub const PROP_CONTENT_HASH: &str = "cmis:contentStreamHash";
pub const PROP_CHANGE_TOKEN: &str = "cmis:changeToken";
pub const PROP_LAST_MODIFICATION: &str = "cmis:lastModificationDate";

pub const BASE_TYPE_FOLDER: &str = "cmis:folder";
pub const BASE_TYPE_DOCUMENT: &str = "cmis:document";

/// Repository info entry from the service document or `repositoryInfo`
/// selector. Both are maps keyed by repository id.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryInfoJson {
    pub repository_id: String,

    #[serde(default)]
    pub repository_name: String,

    #[serde(default)]
    pub latest_change_log_token: Option<String>,

    #[serde(default)]
    pub capabilities: RepositoryCapabilities,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryCapabilities {
    /// `none`, `objectidsonly`, `properties` or `all`
    #[serde(default)]
    pub capability_changes: Option<String>,
}

pub type ServiceDocument = HashMap<String, RepositoryInfoJson>;

/// A CMIS object with succinct properties.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectData {
    #[serde(default)]
    pub succinct_properties: HashMap<String, Value>,

    /// Present on `contentChanges` entries only
    #[serde(default)]
    pub change_event_info: Option<ChangeEventInfo>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEventInfo {
    /// `created`, `updated`, `deleted` or `security`
    pub change_type: String,

    #[serde(default)]
    pub change_time: Option<Value>,
}

/// `contentChanges` response
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectList {
    #[serde(default)]
    pub objects: Vec<ObjectData>,

    #[serde(default)]
    pub has_more_items: bool,

    #[serde(default)]
    pub num_items: Option<u64>,

    #[serde(default)]
    pub change_log_token: Option<String>,
}

/// Child entry of a `children` response
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectInFolder {
    pub object: ObjectData,

    #[serde(default)]
    pub path_segment: Option<String>,
}

/// `children` response
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectInFolderList {
    #[serde(default)]
    pub objects: Vec<ObjectInFolder>,

    #[serde(default)]
    pub has_more_items: bool,

    #[serde(default)]
    pub num_items: Option<u64>,
}

/// Entry of a `parents` response
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectParent {
    pub object: ObjectData,

    #[serde(default)]
    pub relative_path_segment: Option<String>,
}

/// Node of a `folderTree` response
#[derive(Debug, Clone, Deserialize)]
pub struct ObjectInFolderContainer {
    pub object: ObjectInFolder,

    #[serde(default)]
    pub children: Vec<ObjectInFolderContainer>,
}

/// Error body returned by the browser binding on non-2xx responses
#[derive(Debug, Deserialize)]
pub struct ErrorResponse {
    #[serde(default)]
    pub exception: String,

    #[serde(default)]
    pub message: String,
}

impl ObjectData {
    /// Single-valued string property. Multi-valued properties yield their
    /// first value.
    pub fn string(&self, id: &str) -> Option<&str> {
        match self.succinct_properties.get(id)? {
            Value::String(s) => Some(s.as_str()),
            Value::Array(values) => values.first().and_then(Value::as_str),
            _ => None,
        }
    }

    pub fn object_id(&self) -> Option<&str> {
        self.string(PROP_OBJECT_ID)
    }

    pub fn name(&self) -> Option<&str> {
        self.string(PROP_NAME)
    }

    pub fn path(&self) -> Option<&str> {
        self.string(PROP_PATH)
    }

    pub fn is_folder(&self) -> bool {
        self.string(PROP_BASE_TYPE_ID) == Some(BASE_TYPE_FOLDER)
    }

    pub fn is_document(&self) -> bool {
        self.string(PROP_BASE_TYPE_ID) == Some(BASE_TYPE_DOCUMENT)
    }

    pub fn content_length(&self) -> Option<u64> {
        match self.succinct_properties.get(PROP_CONTENT_LENGTH)? {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Content fingerprint used to detect changed documents.
    ///
    /// A `{sha-256}` entry of `cmis:contentStreamHash` wins. Otherwise the
    /// first advertised hash, then the object's change token, then its
    /// modification date. Empty when the server exposes none of these.
    pub fn content_fingerprint(&self) -> String {
        let hashes: Vec<&str> = match self.succinct_properties.get(PROP_CONTENT_HASH) {
            Some(Value::Array(values)) => values.iter().filter_map(Value::as_str).collect(),
            Some(Value::String(s)) => vec![s.as_str()],
            _ => Vec::new(),
        };

        if let Some(sha) = hashes
            .iter()
            .find(|h| h.to_ascii_lowercase().starts_with("{sha-256}"))
        {
            return sha.to_string();
        }
        if let Some(first) = hashes.first() {
            return first.to_string();
        }
        if let Some(token) = self.string(PROP_CHANGE_TOKEN) {
            return format!("{{change-token}}{}", token);
        }
        match self.succinct_properties.get(PROP_LAST_MODIFICATION) {
            Some(Value::Number(n)) => format!("{{modified}}{}", n),
            Some(Value::String(s)) => format!("{{modified}}{}", s),
            _ => String::new(),
        }
    }
}
