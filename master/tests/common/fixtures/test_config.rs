//! Test configuration builder for creating test configs programmatically

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

use super::test_data::TEST_API_KEY;

/// Builder for creating test configurations
pub struct TestConfigBuilder {
    temp_dir: TempDir,
    main_config: MainConfigBuilder,
    server_configs: BTreeMap<String, ServerConfigBuilder>,
}

impl TestConfigBuilder {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        Self {
            temp_dir,
            main_config: MainConfigBuilder::default(),
            server_configs: BTreeMap::new(),
        }
    }

    pub fn with_main_config<F>(mut self, f: F) -> Self
    where
        F: FnOnce(MainConfigBuilder) -> MainConfigBuilder,
    {
        self.main_config = f(self.main_config);
        self
    }

    pub fn with_server<F>(mut self, server_name: &str, f: F) -> Self
    where
        F: FnOnce(ServerConfigBuilder) -> ServerConfigBuilder,
    {
        let builder = f(ServerConfigBuilder::default());
        self.server_configs.insert(server_name.to_string(), builder);
        self
    }

    /// Write the config files into the temp directory
    pub fn build(self) -> TestConfig {
        let config_dir = self.temp_dir.path().join("config");
        fs::create_dir_all(&config_dir).expect("Failed to create config dir");

        fs::write(config_dir.join("main.toml"), self.main_config.to_toml())
            .expect("Failed to write main.toml");

        for (name, builder) in self.server_configs {
            fs::write(config_dir.join(format!("{}.toml", name)), builder.to_toml())
                .expect("Failed to write server config");
        }

        TestConfig {
            _temp_dir: self.temp_dir,
            config_dir,
        }
    }
}

impl Default for TestConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
pub struct MainConfigBuilder {
    host: String,
    port: u16,
    database_path: String,
    executor: String,
    extra: Vec<String>,
}

impl Default for MainConfigBuilder {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8095,
            database_path: ":memory:".to_string(),
            executor: "memory".to_string(),
            extra: Vec::new(),
        }
    }
}

impl MainConfigBuilder {
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn executor(mut self, executor: &str) -> Self {
        self.executor = executor.to_string();
        self
    }

    /// Append raw TOML, e.g. a `[retry]` table
    pub fn raw(mut self, toml: &str) -> Self {
        self.extra.push(toml.to_string());
        self
    }

    fn to_toml(&self) -> String {
        let mut toml = format!(
            "host = \"{}\"\nport = {}\ndatabase_path = \"{}\"\nexecutor = \"{}\"\n",
            self.host, self.port, self.database_path, self.executor
        );
        for extra in &self.extra {
            toml.push('\n');
            toml.push_str(extra);
            toml.push('\n');
        }
        toml
    }
}

#[derive(Clone)]
pub struct ServerConfigBuilder {
    host: String,
    agent_port: u16,
    api_key: String,
    tables: BTreeMap<String, Vec<String>>,
}

impl Default for ServerConfigBuilder {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            agent_port: 8745,
            api_key: TEST_API_KEY.to_string(),
            tables: BTreeMap::new(),
        }
    }
}

impl ServerConfigBuilder {
    pub fn agent(mut self, host: &str, port: u16) -> Self {
        self.host = host.to_string();
        self.agent_port = port;
        self
    }

    pub fn table(mut self, qualified: &str, tablets: &[&str]) -> Self {
        self.tables.insert(
            qualified.to_string(),
            tablets.iter().map(|t| t.to_string()).collect(),
        );
        self
    }

    fn to_toml(&self) -> String {
        let mut toml = format!(
            "[server]\nhost = \"{}\"\nagent_port = {}\napi_key = \"{}\"\npoll_interval_ms = 10\n",
            self.host, self.agent_port, self.api_key
        );
        for (table, tablets) in &self.tables {
            let list: Vec<String> = tablets.iter().map(|t| format!("\"{}\"", t)).collect();
            toml.push_str(&format!(
                "\n[tables.\"{}\"]\ntablets = [{}]\n",
                table,
                list.join(", ")
            ));
        }
        toml
    }
}

/// Written config directory, removed on drop
pub struct TestConfig {
    _temp_dir: TempDir,
    pub config_dir: PathBuf,
}

impl TestConfig {
    pub fn dir(&self) -> String {
        self.config_dir.to_string_lossy().to_string()
    }
}
