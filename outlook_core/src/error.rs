// src/error.rs
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum ConnectorError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serde JSON error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid params: {0}")]
    InvalidParams(String),

    #[error("Folder \"{0}\" not found. Use list_folders to see the available folders, then retry with an exact folder name.")]
    FolderNotFound(String),

    #[error("Graph API error {status}: {message}")]
    Upstream { status: u16, message: String },

    #[error("Resource not found")]
    ResourceNotFound,

    #[error("Tool not found")]
    ToolNotFound,

    #[error("Method not found")]
    MethodNotFound,

    #[error("Parse error")]
    ParseError,

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Other error: {0}")]
    Other(String),

    #[error("HTTP request error: {0}")]
    HttpRequest(#[from] reqwest::Error),

    #[error("Timeout: {0}")]
    Timeout(String),
}

impl ConnectorError {
    pub fn code_str(&self) -> &'static str {
        match self {
            ConnectorError::InvalidInput(_) => "invalid_input",
            ConnectorError::InvalidParams(_) => "invalid_params",
            ConnectorError::Authentication(_) => "auth_failed",
            ConnectorError::FolderNotFound(_) => "folder_not_found",
            ConnectorError::ResourceNotFound => "not_found",
            ConnectorError::ToolNotFound => "tool_not_found",
            ConnectorError::MethodNotFound => "method_not_found",
            ConnectorError::ParseError => "parse_error",
            ConnectorError::Timeout(_) => "timeout",
            ConnectorError::HttpRequest(_) => "upstream_error",
            ConnectorError::Upstream { .. } => "upstream_error",
            _ => "internal_error",
        }
    }

    /// Errors the agent can fix by changing its arguments. These are reported
    /// as tool results with `is_error` set rather than as protocol errors.
    pub fn is_user_correctable(&self) -> bool {
        matches!(
            self,
            ConnectorError::InvalidParams(_)
                | ConnectorError::InvalidInput(_)
                | ConnectorError::FolderNotFound(_)
        )
    }

    pub fn to_jsonrpc_error(&self) -> serde_json::Value {
        let (code, message) = match self {
            ConnectorError::ResourceNotFound => (-32602, "Resource not found".to_string()),
            ConnectorError::ToolNotFound => (-32602, "Tool not found".to_string()),
            ConnectorError::InternalError(msg) => (-32603, msg.to_string()),
            ConnectorError::InvalidParams(msg) => (-32602, msg.to_string()),
            ConnectorError::InvalidInput(msg) => (-32602, msg.to_string()),
            ConnectorError::FolderNotFound(_) => (-32602, self.to_string()),
            ConnectorError::MethodNotFound => (-32601, "Method not found".to_string()),
            ConnectorError::ParseError => (-32700, "Parse error".to_string()),
            ConnectorError::Other(msg) => (-32603, msg.to_string()),
            err => (-32603, err.to_string()),
        };

        json!({
            "code": code,
            "message": message,
            "data": { "kind": self.code_str() },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folder_not_found_carries_remediation_hint() {
        let err = ConnectorError::FolderNotFound("Invoices".into());
        let text = err.to_string();
        assert!(text.contains("\"Invoices\""));
        assert!(text.contains("list_folders"));
        assert_eq!(err.code_str(), "folder_not_found");
        assert!(err.is_user_correctable());
    }

    #[test]
    fn jsonrpc_codes() {
        let v = ConnectorError::MethodNotFound.to_jsonrpc_error();
        assert_eq!(v["code"], -32601);

        let v = ConnectorError::Upstream {
            status: 400,
            message: "Invalid filter clause".into(),
        }
        .to_jsonrpc_error();
        assert_eq!(v["code"], -32603);
        assert_eq!(v["data"]["kind"], "upstream_error");
        assert!(v["message"].as_str().unwrap().contains("Invalid filter clause"));
    }
}
