use anyhow::{anyhow, Context};

pub const CONFIG_ENV_VAR: &str = "PLAUDIT_CONFIG";

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub struct Config {
    /// Longest comment or reply accepted, in characters
    pub max_content_len: usize,

    /// Number of the first page of root comments, as the server counts them
    pub first_page: u32,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            max_content_len: 2000,
            first_page: 1,
        }
    }
}

impl Config {
    pub fn from_json(s: &str) -> anyhow::Result<Config> {
        let config: Config = serde_json::from_str(s).context("parsing engine configuration")?;
        if config.max_content_len == 0 {
            return Err(anyhow!("max_content_len must be positive"));
        }
        Ok(config)
    }

    /// Reads the JSON file pointed to by `PLAUDIT_CONFIG`, if set
    pub fn from_env() -> anyhow::Result<Config> {
        let path = match std::env::var(CONFIG_ENV_VAR) {
            Ok(path) => path,
            Err(std::env::VarError::NotPresent) => return Ok(Config::default()),
            Err(e) => return Err(e).with_context(|| format!("reading {CONFIG_ENV_VAR}")),
        };
        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("reading configuration file {path:?}"))?;
        Config::from_json(&contents).with_context(|| format!("loading configuration file {path:?}"))
    }
}
