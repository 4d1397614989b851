use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    pub id: String,
    pub name: String,
    pub container_host: Option<String>,
    pub container_name: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Instance {
    /// Host and container, when both are mapped.
    pub fn container(&self) -> Option<(&str, &str)> {
        match (self.container_host.as_deref(), self.container_name.as_deref()) {
            (Some(host), Some(name)) if !host.is_empty() && !name.is_empty() => Some((host, name)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateInstanceInput {
    pub name: String,
    pub container_host: Option<String>,
    pub container_name: Option<String>,
}
