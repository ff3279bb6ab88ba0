//! Ghostie 命令行
//!
//! - `ghostie inspect <file>`：打印解析出的插件描述 JSON
//! - `ghostie transpile <file>`：打印转译后的脚本
//! - `ghostie run <file> <tool> [json-args]`：存入插件目录后通过 Deno 沙箱执行工具

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context};
use ghostie::config::load_config;
use ghostie::data::{MemoryImageStore, MemoryTableStore};
use ghostie::plugins::{
    parse_plugin, transpile, AuditedSandbox, DenoSandbox, FsPluginStore, PluginDraft,
    PluginRegistry,
};

const USAGE: &str = "usage: ghostie <inspect|transpile> <file> | ghostie run <file> <tool> [json-args]";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    ghostie::observability::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        Some("inspect") => {
            let source = read_source(args.get(1))?;
            let parsed = parse_plugin(&source).context("Failed to parse plugin")?;
            println!("{}", serde_json::to_string_pretty(&parsed)?);
        }
        Some("transpile") => {
            let source = read_source(args.get(1))?;
            print!("{}", transpile(&source).context("Failed to transpile plugin")?);
        }
        Some("run") => {
            let file = args.get(1);
            let source = read_source(file)?;
            let Some(tool) = args.get(2) else {
                bail!(USAGE);
            };
            let tool_args = match args.get(3) {
                Some(raw) => serde_json::from_str(raw).context("Invalid JSON arguments")?,
                None => serde_json::json!({}),
            };
            let id = plugin_id_from_path(file.map(String::as_str).unwrap_or("plugin"));

            let cfg = load_config(None).context("Failed to load config")?;
            let registry = PluginRegistry::new(
                Arc::new(FsPluginStore::new(cfg.plugins.store_dir.clone())),
                Arc::new(MemoryTableStore::default()),
                Arc::new(MemoryImageStore::default()),
                Arc::new(AuditedSandbox::new(DenoSandbox::from_config(&cfg.sandbox))),
            );
            let handle = registry
                .create(PluginDraft {
                    id: Some(id),
                    ..Default::default()
                })
                .await
                .context("Failed to create plugin")?;
            let handle = registry
                .update_content(&handle, &source)
                .await
                .context("Failed to store plugin")?;
            let result = registry
                .execute(&handle, tool, tool_args)
                .await
                .context("Tool execution failed")?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => bail!(USAGE),
    }

    Ok(())
}

/// 文件名（去掉最后一个扩展名）作为插件 id；存储只接受字母数字、`-`、`_`，其余字符替换为 `_`
fn plugin_id_from_path(path: &str) -> String {
    let stem = Path::new(path)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let id: String = stem
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if id.is_empty() {
        "plugin".to_string()
    } else {
        id
    }
}

fn read_source(path: Option<&String>) -> anyhow::Result<String> {
    let Some(path) = path else {
        bail!(USAGE);
    };
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plugin_id_from_path() {
        assert_eq!(plugin_id_from_path("plugins/my.plugin.ts"), "my_plugin");
        assert_eq!(plugin_id_from_path("weather report.ts"), "weather_report");
        assert_eq!(plugin_id_from_path("ok-id_1.ts"), "ok-id_1");
        assert_eq!(plugin_id_from_path("/"), "plugin");
    }
}
