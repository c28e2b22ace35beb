use serde::Deserialize;

// --- NetBox API types ---

#[derive(Debug, Deserialize)]
pub struct PaginatedResponse<T> {
    pub next: Option<String>,
    pub results: Vec<T>,
}

/// The device fields the compiler reads; NetBox sends many more
#[derive(Debug, Clone, Deserialize)]
pub struct NbDevice {
    pub id: i32,
    pub name: Option<String>,
    /// Rendered config context: NetBox merges every matching context
    /// with the device's local context before returning it.
    #[serde(default)]
    pub config_context: serde_json::Value,
}

/// A device as the compiler sees it: a name and its free-form variables
#[derive(Debug, Clone, PartialEq)]
pub struct InventoryDevice {
    pub name: String,
    pub config_context: serde_json::Value,
}

impl NbDevice {
    /// Unnamed devices cannot be turned into a config file, so they map to None
    pub fn into_inventory_device(self) -> Option<InventoryDevice> {
        let name = self.name.filter(|n| !n.trim().is_empty())?;
        Some(InventoryDevice {
            name,
            config_context: self.config_context,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_without_context_defaults_to_null() {
        let dev: NbDevice = serde_json::from_str(
            r#"{"id": 4, "name": "R4", "role": {"id": 1, "name": "Router"}, "tags": [{"id": 2, "slug": "router"}]}"#,
        )
        .unwrap();
        assert_eq!(dev.name.as_deref(), Some("R4"));
        assert!(dev.config_context.is_null());
    }

    #[test]
    fn test_unnamed_device_is_dropped() {
        let dev: NbDevice = serde_json::from_str(r#"{"id": 9, "name": null}"#).unwrap();
        assert!(dev.into_inventory_device().is_none());

        let blank: NbDevice = serde_json::from_str(r#"{"id": 9, "name": "  "}"#).unwrap();
        assert!(blank.into_inventory_device().is_none());
    }
}
