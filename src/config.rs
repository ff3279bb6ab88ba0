//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `GHOSTIE__*` 覆盖（双下划线表示嵌套，如 `GHOSTIE__SANDBOX__TIMEOUT_SECS=10`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub plugins: PluginsSection,
    pub sandbox: SandboxSection,
    pub agent: AgentSection,
}

/// [app] 段：应用名、数据目录
#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
    #[serde(default = "default_app_name")]
    pub name: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

fn default_app_name() -> String {
    "ghostie".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            data_dir: default_data_dir(),
        }
    }
}

/// [plugins] 段：插件源码与描述索引目录
#[derive(Debug, Clone, Deserialize)]
pub struct PluginsSection {
    #[serde(default = "default_store_dir")]
    pub store_dir: PathBuf,
}

fn default_store_dir() -> PathBuf {
    PathBuf::from("./data/plugins")
}

impl Default for PluginsSection {
    fn default() -> Self {
        Self {
            store_dir: default_store_dir(),
        }
    }
}

/// [sandbox] 段：外部运行时命令、参数、超时与临时目录
#[derive(Debug, Clone, Deserialize)]
pub struct SandboxSection {
    #[serde(default = "default_program")]
    pub program: String,
    #[serde(default = "default_sandbox_args")]
    pub args: Vec<String>,
    /// 单次执行超时（秒）
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: PathBuf,
}

fn default_program() -> String {
    "deno".to_string()
}

fn default_sandbox_args() -> Vec<String> {
    vec![
        "run".into(),
        "--no-check".into(),
        "--allow-read".into(),
        "--allow-net".into(),
        "--allow-env".into(),
    ]
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_scratch_dir() -> PathBuf {
    std::env::temp_dir().join("ghostie-sandbox")
}

impl Default for SandboxSection {
    fn default() -> Self {
        Self {
            program: default_program(),
            args: default_sandbox_args(),
            timeout_secs: default_timeout_secs(),
            scratch_dir: default_scratch_dir(),
        }
    }
}

/// [agent] 段：Agent 循环上限
#[derive(Debug, Clone, Deserialize)]
pub struct AgentSection {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
}

fn default_max_iterations() -> usize {
    crate::react::loop_::DEFAULT_MAX_ITERATIONS
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 GHOSTIE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 GHOSTIE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("GHOSTIE")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.sandbox.program, "deno");
        assert_eq!(cfg.sandbox.timeout_secs, 30);
        assert_eq!(cfg.sandbox.args[0], "run");
        assert_eq!(cfg.agent.max_iterations, 20);
    }

    #[test]
    fn test_explicit_file_overrides() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[sandbox]\nprogram = \"node\"\ntimeout_secs = 5\n\n[plugins]\nstore_dir = \"/tmp/p\""
        )
        .unwrap();

        let cfg = load_config(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(cfg.sandbox.program, "node");
        assert_eq!(cfg.sandbox.timeout_secs, 5);
        assert_eq!(cfg.sandbox.args.len(), 5);
        assert_eq!(cfg.plugins.store_dir, PathBuf::from("/tmp/p"));
    }
}
