use super::{Config, ServerConfigFile, TabletPlacement};
use anyhow::{anyhow, Result};
use glob::glob;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::snapshot::TargetObject;

pub struct ConfigManager {
    current_config: Arc<Config>,
}

impl ConfigManager {
    pub async fn new(config_dir: String) -> Result<Self> {
        let config = Self::load_configuration(&config_dir).await?;
        Ok(Self {
            current_config: Arc::new(config),
        })
    }

    pub fn get_current_config(&self) -> Arc<Config> {
        self.current_config.clone()
    }

    async fn load_configuration(config_dir: &str) -> Result<Config> {
        let main_config_path = format!("{}/main.toml", config_dir);
        let main_config_content = fs::read_to_string(&main_config_path)
            .await
            .map_err(|e| anyhow!("Failed to read main config {}: {}", main_config_path, e))?;

        let mut config: Config = toml::from_str(&main_config_content)
            .map_err(|e| anyhow!("Failed to parse main config: {}", e))?;

        config
            .retry
            .validate()
            .map_err(|e| anyhow!("Invalid retry policy in {}: {}", main_config_path, e))?;

        // Load tablet server configurations
        let pattern = format!("{}/*.toml", config_dir);
        let mut server_configs = HashMap::new();
        let mut all_tables: BTreeMap<String, Vec<TabletPlacement>> = BTreeMap::new();

        for entry in glob(&pattern).map_err(|e| anyhow!("Glob pattern error: {}", e))? {
            let path = entry.map_err(|e| anyhow!("Glob entry error: {}", e))?;
            let filename = path
                .file_name()
                .and_then(|name| name.to_str())
                .ok_or_else(|| anyhow!("Invalid filename"))?;

            // Skip main.toml as it's already loaded
            if filename == "main.toml" {
                continue;
            }

            let server_name = filename
                .strip_suffix(".toml")
                .ok_or_else(|| anyhow!("Invalid config filename: {}", filename))?;

            debug!("Loading server config: {}", path.display());

            let content = fs::read_to_string(&path)
                .await
                .map_err(|e| anyhow!("Failed to read {}: {}", path.display(), e))?;

            let server_config_file: ServerConfigFile = toml::from_str(&content)
                .map_err(|e| anyhow!("Failed to parse {}: {}", path.display(), e))?;

            server_configs.insert(server_name.to_string(), server_config_file.server);

            // A table hosted on several servers merges its tablets
            for (table_name, table_config) in server_config_file.tables {
                let target: TargetObject = table_name
                    .parse()
                    .map_err(|e| anyhow!("Invalid table '{}' in {}: {}", table_name, path.display(), e))?;
                if target.table.is_none() {
                    return Err(anyhow!(
                        "Table entry '{}' in {} must be qualified as namespace.table",
                        table_name,
                        path.display()
                    ));
                }

                if table_config.tablets.is_empty() {
                    warn!("Table {} on {} lists no tablets", table_name, server_name);
                }

                let placements = all_tables.entry(target.to_string()).or_default();
                for tablet_id in table_config.tablets {
                    if placements.iter().any(|p| p.tablet_id == tablet_id) {
                        return Err(anyhow!(
                            "Tablet {} of {} is declared on more than one server",
                            tablet_id,
                            table_name
                        ));
                    }
                    placements.push(TabletPlacement {
                        server: server_name.to_string(),
                        tablet_id,
                    });
                }
            }
        }

        config.servers = server_configs;
        config.tables = all_tables;

        info!(
            "Loaded {} tablet servers, {} tables, {} tablets",
            config.servers.len(),
            config.tables.len(),
            config.tables.values().map(Vec::len).sum::<usize>()
        );

        Ok(config)
    }
}
