//! Connection configuration.

use serde::{Deserialize, Serialize};

/// Settings for a MongoDB connection, typically loaded from a config file.
///
/// ```ignore
/// let config: MongoConfig = serde_json::from_str(r#"{
///     "dsn": "mongodb://localhost:27017",
///     "database": "app"
/// }"#)?;
/// let connection = MongoConnection::builder_from_config(config).build().await?;
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MongoConfig {
    /// Connection string, e.g. `mongodb://localhost:27017`.
    pub dsn: String,
    pub database: String,
    /// Application name reported to the server.
    #[serde(default)]
    pub app_name: Option<String>,
}

impl MongoConfig {
    pub fn new(dsn: &str, database: &str) -> Self {
        Self {
            dsn: dsn.to_string(),
            database: database.to_string(),
            app_name: None,
        }
    }
}
