use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Credential fields a connector accepts through `auth/<provider>/set`.
#[derive(Serialize, Deserialize, Debug, Default, Clone)]
pub struct ConnectorConfigSchema {
    pub fields: Vec<Field>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Field {
    pub name: String,
    pub label: String,
    pub field_type: FieldType,
    pub required: bool,
    pub description: Option<String>,
}

impl Field {
    pub fn new(name: &str, label: &str, field_type: FieldType) -> Self {
        Self {
            name: name.to_string(),
            label: label.to_string(),
            field_type,
            required: false,
            description: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn describe(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub enum FieldType {
    Text,
    /// Tokens, client secrets; rendered as `format: password`.
    Secret,
    Number,
    Boolean,
    Select { options: Vec<String> },
}

impl ConnectorConfigSchema {
    /// JSON Schema object for the fields, used as a tool input schema.
    pub fn to_json_schema(&self) -> Map<String, Value> {
        let mut props = Map::new();
        let mut required: Vec<&str> = Vec::new();
        for f in &self.fields {
            let mut obj = Map::new();
            match &f.field_type {
                FieldType::Text => {
                    obj.insert("type".into(), json!("string"));
                }
                FieldType::Secret => {
                    obj.insert("type".into(), json!("string"));
                    obj.insert("format".into(), json!("password"));
                }
                FieldType::Number => {
                    obj.insert("type".into(), json!("number"));
                }
                FieldType::Boolean => {
                    obj.insert("type".into(), json!("boolean"));
                }
                FieldType::Select { options } => {
                    obj.insert("type".into(), json!("string"));
                    obj.insert("enum".into(), json!(options));
                }
            }
            if let Some(desc) = &f.description {
                obj.insert("description".into(), json!(desc));
            }
            props.insert(f.name.clone(), Value::Object(obj));
            if f.required {
                required.push(&f.name);
            }
        }
        let mut root = Map::new();
        root.insert("type".into(), json!("object"));
        root.insert("properties".into(), Value::Object(props));
        if !required.is_empty() {
            root.insert("required".into(), json!(required));
        }
        root
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_marks_secrets_and_required() {
        let schema = ConnectorConfigSchema {
            fields: vec![
                Field::new("client_id", "Client ID", FieldType::Text).required(),
                Field::new("access_token", "Access Token", FieldType::Secret),
            ],
        };
        let js = Value::Object(schema.to_json_schema());
        assert_eq!(js["properties"]["access_token"]["format"], "password");
        assert_eq!(js["required"], json!(["client_id"]));
    }
}
