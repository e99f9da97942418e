//! Static message schema: identities, field layouts and payload enums.
//!
//! A [`Schema`] is built once from a [`SchemaDescription`] (either the
//! built-in tables in [`crate::builtin`] or JSON produced by the offline
//! generator) and then only read. Categories, subcategories and messages get
//! 1-based ordinals from their position in the description.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::value::{EnumValue, FieldValue};

/// Errors from schema construction and lookups.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    #[error("unknown schema entry: {0}")]
    UnknownEntry(String),

    #[error("unknown message identity {0}")]
    UnknownIdentity(MessageIdentity),

    #[error("unknown enum domain: {0}")]
    UnknownEnum(String),

    #[error("duplicate schema entry: {0}")]
    Duplicate(String),

    #[error("{message}: missing field '{field}'")]
    MissingField { message: String, field: String },

    #[error("{message}: unexpected field '{field}'")]
    UnexpectedField { message: String, field: String },

    #[error("invalid schema description: {0}")]
    Description(String),
}

/// Numeric three-level message identity as carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageIdentity {
    pub category: u32,
    pub subcategory: u32,
    pub message: u32,
}

impl MessageIdentity {
    pub const fn new(category: u32, subcategory: u32, message: u32) -> Self {
        Self { category, subcategory, message }
    }
}

impl fmt::Display for MessageIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.category, self.subcategory, self.message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Int,
    Float,
    String,
    Bool,
    Bytes,
    #[serde(alias = "enum_ref")]
    Enum,
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Int => "int",
            Self::Float => "float",
            Self::String => "string",
            Self::Bool => "bool",
            Self::Bytes => "bytes",
            Self::Enum => "enum",
        };
        f.write_str(name)
    }
}

/// One positional payload field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub datatype: DataType,
    #[serde(default, rename = "bitmask", alias = "is_bitmask")]
    pub is_bitmask: bool,
    /// Enum domain for `DataType::Enum` fields. Defaults to the field name.
    #[serde(default, rename = "enum", skip_serializing_if = "Option::is_none")]
    pub enum_ref: Option<String>,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, datatype: DataType) -> Self {
        Self { name: name.into(), datatype, is_bitmask: false, enum_ref: None }
    }

    pub fn bitmask(mut self) -> Self {
        self.is_bitmask = true;
        self
    }

    pub fn with_enum(mut self, domain: impl Into<String>) -> Self {
        self.enum_ref = Some(domain.into());
        self
    }

    /// Name of the referenced enum domain, if this is an enum field.
    pub fn enum_domain(&self) -> Option<&str> {
        match self.datatype {
            DataType::Enum => Some(self.enum_ref.as_deref().unwrap_or(&self.name)),
            _ => None,
        }
    }
}

/// A named integer domain, e.g. flight mode codes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadEnum {
    name: String,
    members: Vec<(String, i64)>,
}

impl PayloadEnum {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn members(&self) -> impl Iterator<Item = (&str, i64)> {
        self.members.iter().map(|(name, value)| (name.as_str(), *value))
    }

    pub fn name_of(&self, value: i64) -> Option<&str> {
        self.members.iter().find(|(_, v)| *v == value).map(|(name, _)| name.as_str())
    }

    pub fn value_of(&self, name: &str) -> Option<i64> {
        self.members.iter().find(|(n, _)| n == name).map(|(_, v)| *v)
    }
}

/// Resolved schema entry for one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageSpec {
    pub identity: MessageIdentity,
    pub category: String,
    pub subcategory: String,
    pub name: String,
    pub fields: Vec<FieldSpec>,
    path: String,
}

impl MessageSpec {
    /// `"Category.Subcategory.Message"`.
    pub fn path(&self) -> &str {
        &self.path
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaDescription {
    #[serde(default = "default_protocol_name")]
    pub name: String,
    #[serde(default = "default_protocol_version")]
    pub version: u32,
    pub categories: Vec<CategoryDef>,
    #[serde(default)]
    pub enums: Vec<EnumDef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryDef {
    pub name: String,
    pub subcategories: Vec<SubcategoryDef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubcategoryDef {
    pub name: String,
    pub messages: Vec<MessageDef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageDef {
    pub name: String,
    #[serde(default)]
    pub fields: Vec<FieldSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnumDef {
    pub name: String,
    pub members: Vec<EnumMember>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnumMember {
    pub name: String,
    pub value: i64,
}

fn default_protocol_name() -> String {
    "default".to_string()
}

fn default_protocol_version() -> u32 {
    1
}

impl SchemaDescription {
    pub fn from_json(input: &str) -> Result<Self, SchemaError> {
        serde_json::from_str(input).map_err(|err| SchemaError::Description(err.to_string()))
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, SchemaError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .map_err(|err| SchemaError::Description(format!("{}: {err}", path.display())))?;
        Self::from_json(&contents)
    }
}

/// Read-only registry built from a [`SchemaDescription`].
#[derive(Debug, Clone)]
pub struct Schema {
    name: String,
    version: u32,
    messages: Vec<MessageSpec>,
    by_identity: HashMap<MessageIdentity, usize>,
    by_path: HashMap<String, usize>,
    enums: HashMap<String, PayloadEnum>,
}

impl Schema {
    pub fn build(description: &SchemaDescription) -> Result<Self, SchemaError> {
        let mut enums = HashMap::with_capacity(description.enums.len());
        for def in &description.enums {
            let domain = PayloadEnum {
                name: def.name.clone(),
                members: def.members.iter().map(|m| (m.name.clone(), m.value)).collect(),
            };
            if enums.insert(def.name.clone(), domain).is_some() {
                return Err(SchemaError::Duplicate(def.name.clone()));
            }
        }

        let mut messages = Vec::new();
        let mut by_identity = HashMap::new();
        let mut by_path = HashMap::new();

        for (cat_idx, category) in description.categories.iter().enumerate() {
            for (sub_idx, subcategory) in category.subcategories.iter().enumerate() {
                for (msg_idx, message) in subcategory.messages.iter().enumerate() {
                    let identity = MessageIdentity::new(
                        ordinal(cat_idx)?,
                        ordinal(sub_idx)?,
                        ordinal(msg_idx)?,
                    );
                    let path = format!("{}.{}.{}", category.name, subcategory.name, message.name);

                    let mut seen = HashSet::new();
                    for field in &message.fields {
                        if !seen.insert(field.name.as_str()) {
                            return Err(SchemaError::Duplicate(format!("{path}.{}", field.name)));
                        }
                        if let Some(domain) = field.enum_domain() {
                            if !enums.contains_key(domain) {
                                return Err(SchemaError::UnknownEnum(domain.to_string()));
                            }
                        }
                    }

                    let index = messages.len();
                    if by_path.insert(path.clone(), index).is_some() {
                        return Err(SchemaError::Duplicate(path));
                    }
                    by_identity.insert(identity, index);
                    messages.push(MessageSpec {
                        identity,
                        category: category.name.clone(),
                        subcategory: subcategory.name.clone(),
                        name: message.name.clone(),
                        fields: message.fields.clone(),
                        path,
                    });
                }
            }
        }

        Ok(Self {
            name: description.name.clone(),
            version: description.version,
            messages,
            by_identity,
            by_path,
            enums,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn messages(&self) -> impl Iterator<Item = &MessageSpec> {
        self.messages.iter()
    }

    pub fn lookup(
        &self,
        category: &str,
        subcategory: &str,
        message: &str,
    ) -> Result<&MessageSpec, SchemaError> {
        self.lookup_path(&format!("{category}.{subcategory}.{message}"))
    }

    pub fn lookup_path(&self, path: &str) -> Result<&MessageSpec, SchemaError> {
        self.by_path
            .get(path)
            .map(|&index| &self.messages[index])
            .ok_or_else(|| SchemaError::UnknownEntry(path.to_string()))
    }

    pub fn resolve(&self, identity: MessageIdentity) -> Result<&MessageSpec, SchemaError> {
        self.by_identity
            .get(&identity)
            .map(|&index| &self.messages[index])
            .ok_or(SchemaError::UnknownIdentity(identity))
    }

    pub fn path(&self, identity: MessageIdentity) -> Result<&str, SchemaError> {
        self.resolve(identity).map(MessageSpec::path)
    }

    pub fn enum_domain(&self, name: &str) -> Result<&PayloadEnum, SchemaError> {
        self.enums.get(name).ok_or_else(|| SchemaError::UnknownEnum(name.to_string()))
    }

    /// Named member of an enum domain, e.g. `("FlightMode", "LOITER")`.
    pub fn enum_value(&self, domain: &str, member: &str) -> Result<EnumValue, SchemaError> {
        let payload_enum = self.enum_domain(domain)?;
        let value = payload_enum
            .value_of(member)
            .ok_or_else(|| SchemaError::UnknownEntry(format!("{domain}.{member}")))?;
        Ok(EnumValue { domain: domain.to_string(), name: member.to_string(), value })
    }

    /// Orders named field values by the schema for `identity`.
    ///
    /// Types and enum domains are checked later by the encoder.
    pub fn build_payload(
        &self,
        identity: MessageIdentity,
        fields: &HashMap<String, FieldValue>,
    ) -> Result<Vec<FieldValue>, SchemaError> {
        let spec = self.resolve(identity)?;

        if let Some(extra) =
            fields.keys().find(|name| !spec.fields.iter().any(|field| &field.name == *name))
        {
            return Err(SchemaError::UnexpectedField {
                message: spec.path.clone(),
                field: extra.clone(),
            });
        }

        spec.fields
            .iter()
            .map(|field| {
                fields.get(&field.name).cloned().ok_or_else(|| SchemaError::MissingField {
                    message: spec.path.clone(),
                    field: field.name.clone(),
                })
            })
            .collect()
    }
}

fn ordinal(index: usize) -> Result<u32, SchemaError> {
    u32::try_from(index + 1)
        .map_err(|_| SchemaError::Description(format!("too many entries ({index})")))
}
