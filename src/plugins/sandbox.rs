//! 沙箱执行器边界
//!
//! SandboxExecutor 接收 (转译后脚本, 工具名, 参数)，返回 JSON 结果或 ExecutionError。
//! DenoSandbox 在独立进程中运行脚本（无 shell，带超时）；AuditedSandbox 为任意执行器输出 JSON 审计日志；
//! MockSandbox 在进程内按闭包返回结果，供测试使用。

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;

use super::transpiler::EXPORTS_GLOBAL;
use crate::config::SandboxSection;
use crate::core::ExecutionError;

/// 运行器输出结果行的前缀
pub const RESULT_SENTINEL: &str = "__GHOSTIE_RESULT__";

/// 外部沙箱执行器
#[async_trait]
pub trait SandboxExecutor: Send + Sync {
    async fn execute(&self, script: &str, tool: &str, args: Value) -> Result<Value, ExecutionError>;
}

#[async_trait]
impl<T: SandboxExecutor + ?Sized> SandboxExecutor for Arc<T> {
    async fn execute(&self, script: &str, tool: &str, args: Value) -> Result<Value, ExecutionError> {
        (**self).execute(script, tool, args).await
    }
}

/// Deno 子进程沙箱
pub struct DenoSandbox {
    program: String,
    args: Vec<String>,
    timeout_secs: u64,
    scratch_dir: PathBuf,
}

impl DenoSandbox {
    pub fn new(
        program: impl Into<String>,
        args: Vec<String>,
        timeout_secs: u64,
        scratch_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            program: program.into(),
            args,
            timeout_secs,
            scratch_dir: scratch_dir.into(),
        }
    }

    pub fn from_config(cfg: &SandboxSection) -> Self {
        Self::new(
            cfg.program.clone(),
            cfg.args.clone(),
            cfg.timeout_secs,
            cfg.scratch_dir.clone(),
        )
    }

    /// 子进程工作目录即 scratch_dir，运行器只按文件名传入
    async fn run(&self, runner_file: &str) -> Result<Value, ExecutionError> {
        let child = Command::new(&self.program)
            .args(&self.args)
            .arg(runner_file)
            .current_dir(&self.scratch_dir)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ExecutionError::Spawn(format!("{}: {}", self.program, e)))?;

        let timeout = Duration::from_secs(self.timeout_secs);
        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| ExecutionError::Timeout(self.timeout_secs))?
            .map_err(|e| ExecutionError::Spawn(format!("wait failed: {}", e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        match parse_runner_output(&stdout) {
            Some(result) => result,
            None if !output.status.success() => Err(ExecutionError::Failed(format!(
                "exit {:?}: {}",
                output.status.code(),
                stderr.trim()
            ))),
            None => Err(ExecutionError::InvalidOutput(format!(
                "no result line in output: {}",
                truncate(stdout.trim(), 200)
            ))),
        }
    }
}

#[async_trait]
impl SandboxExecutor for DenoSandbox {
    async fn execute(&self, script: &str, tool: &str, args: Value) -> Result<Value, ExecutionError> {
        tokio::fs::create_dir_all(&self.scratch_dir)
            .await
            .map_err(|e| ExecutionError::Spawn(format!("scratch dir: {}", e)))?;

        let id = uuid::Uuid::new_v4().simple().to_string();
        let plugin_file = format!("plugin_{}.js", id);
        let plugin_path = self.scratch_dir.join(&plugin_file);
        let runner_file = format!("runner_{}.js", id);
        let runner_path = self.scratch_dir.join(&runner_file);

        let runner = runner_script(&plugin_file, tool, &args)?;
        let written = async {
            tokio::fs::write(&plugin_path, script).await?;
            tokio::fs::write(&runner_path, runner).await
        }
        .await;

        let result = match written {
            Ok(()) => {
                tracing::debug!(tool, program = %self.program, "sandbox run");
                self.run(&runner_file).await
            }
            Err(e) => Err(ExecutionError::Spawn(format!("write script: {}", e))),
        };

        for path in [&plugin_path, &runner_path] {
            if let Err(e) = tokio::fs::remove_file(path).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %path.display(), error = %e, "scratch cleanup failed");
                }
            }
        }
        result
    }
}

/// 生成运行器模块：导入插件脚本，从导出表取工具函数并以 args 调用，输出一行带前缀的 JSON
pub fn runner_script(plugin_file: &str, tool: &str, args: &Value) -> Result<String, ExecutionError> {
    let encode = |v: &Value| {
        serde_json::to_string(v).map_err(|e| ExecutionError::InvalidOutput(e.to_string()))
    };
    let module = encode(&Value::String(format!("./{}", plugin_file)))?;
    let tool = encode(&Value::String(tool.to_string()))?;
    let args = encode(args)?;
    let sentinel = encode(&Value::String(RESULT_SENTINEL.to_string()))?;

    Ok(format!(
        r#"const sentinel = {sentinel};
try {{
  await import({module});
  const fn = globalThis.{exports}?.[{tool}];
  if (typeof fn !== "function") throw new Error("Tool not found: " + {tool});
  const result = await fn({args});
  console.log(sentinel + JSON.stringify({{ result: result === undefined ? null : result }}));
}} catch (e) {{
  console.log(sentinel + JSON.stringify({{ error: String(e && e.message ? e.message : e) }}));
}}
"#,
        exports = EXPORTS_GLOBAL,
    ))
}

/// 解析运行器输出：取最后一条结果行；无结果行返回 None
pub fn parse_runner_output(stdout: &str) -> Option<Result<Value, ExecutionError>> {
    let line = stdout
        .lines()
        .rev()
        .find_map(|l| l.trim().strip_prefix(RESULT_SENTINEL))?;
    let payload: Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => return Some(Err(ExecutionError::InvalidOutput(e.to_string()))),
    };
    if let Some(err) = payload.get("error") {
        let msg = err.as_str().map(str::to_string).unwrap_or_else(|| err.to_string());
        return Some(Err(ExecutionError::Failed(msg)));
    }
    Some(Ok(payload.get("result").cloned().unwrap_or(Value::Null)))
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        format!("{}...", s.chars().take(max).collect::<String>())
    } else {
        s.to_string()
    }
}

/// 审计包装：每次调用输出一行 JSON 审计日志
pub struct AuditedSandbox<E> {
    inner: E,
}

impl<E: SandboxExecutor> AuditedSandbox<E> {
    pub fn new(inner: E) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<E: SandboxExecutor> SandboxExecutor for AuditedSandbox<E> {
    async fn execute(&self, script: &str, tool: &str, args: Value) -> Result<Value, ExecutionError> {
        let start = Instant::now();
        let args_preview = truncate(&args.to_string(), 200);
        let result = self.inner.execute(script, tool, args).await;

        let (ok, outcome) = match &result {
            Ok(_) => (true, "ok"),
            Err(ExecutionError::Timeout(_)) => (false, "timeout"),
            Err(_) => (false, "error"),
        };
        let audit = serde_json::json!({
            "event": "sandbox_audit",
            "tool": tool,
            "ok": ok,
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": args_preview,
        });
        tracing::info!(audit = %audit.to_string(), "sandbox");
        result
    }
}

type Handler = dyn Fn(&str, &str, &Value) -> Result<Value, ExecutionError> + Send + Sync;

/// 一次沙箱调用记录
#[derive(Debug, Clone, PartialEq)]
pub struct SandboxCall {
    pub script: String,
    pub tool: String,
    pub args: Value,
}

/// 进程内沙箱（测试用）：按闭包计算结果并记录调用
pub struct MockSandbox {
    handler: Box<Handler>,
    calls: Mutex<Vec<SandboxCall>>,
}

impl MockSandbox {
    pub fn new(
        handler: impl Fn(&str, &str, &Value) -> Result<Value, ExecutionError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// 总是返回同一个值
    pub fn returning(value: Value) -> Self {
        Self::new(move |_, _, _| Ok(value.clone()))
    }

    pub fn calls(&self) -> Vec<SandboxCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl SandboxExecutor for MockSandbox {
    async fn execute(&self, script: &str, tool: &str, args: Value) -> Result<Value, ExecutionError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(SandboxCall {
                script: script.to_string(),
                tool: tool.to_string(),
                args: args.clone(),
            });
        }
        (self.handler)(script, tool, &args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_runner_script_embeds_tool_and_args() {
        let script = runner_script("plugin_x.js", "greet", &json!({"name": "a\"b"})).unwrap();
        assert!(script.contains(r#"await import("./plugin_x.js")"#));
        assert!(script.contains(r#"globalThis.__PLUGIN_EXPORTS__?.["greet"]"#));
        assert!(script.contains(r#"fn({"name":"a\"b"})"#));
    }

    #[test]
    fn test_parse_runner_output() {
        let out = format!("log line\n{}{{\"result\":[1,2]}}\n", RESULT_SENTINEL);
        assert_eq!(parse_runner_output(&out).unwrap().unwrap(), json!([1, 2]));

        let out = format!("{}{{\"error\":\"boom\"}}", RESULT_SENTINEL);
        assert_eq!(
            parse_runner_output(&out).unwrap().unwrap_err(),
            ExecutionError::Failed("boom".into())
        );

        assert!(parse_runner_output("nothing here").is_none());
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = DenoSandbox::new("ghostie-no-such-program", vec![], 5, dir.path());
        let err = sandbox.execute("", "f", json!({})).await.unwrap_err();
        assert!(matches!(err, ExecutionError::Spawn(_)));
        // 临时文件已清理
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_result_line_from_process() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = format!("echo '{}{{\"result\":42}}'", RESULT_SENTINEL);
        let sandbox = DenoSandbox::new("sh", vec!["-c".into(), cmd, "sh".into()], 5, dir.path());
        let value = sandbox.execute("", "f", json!({})).await.unwrap();
        assert_eq!(value, json!(42));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_relative_scratch_dir() {
        let dir = tempfile::tempdir_in(".").unwrap();
        let relative = std::path::Path::new(".").join(dir.path().file_name().unwrap());
        let cmd = format!(
            "test -f \"$1\" && echo '{}{{\"result\":3}}'",
            RESULT_SENTINEL
        );
        let sandbox = DenoSandbox::new("sh", vec!["-c".into(), cmd, "sh".into()], 5, relative);
        let value = sandbox.execute("", "f", json!({})).await.unwrap();
        assert_eq!(value, json!(3));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = DenoSandbox::new(
            "sh",
            vec!["-c".into(), "sleep 5".into(), "sh".into()],
            1,
            dir.path(),
        );
        let err = sandbox.execute("", "f", json!({})).await.unwrap_err();
        assert_eq!(err, ExecutionError::Timeout(1));
    }

    #[tokio::test]
    async fn test_audited_passes_result_through() {
        let sandbox = AuditedSandbox::new(MockSandbox::returning(json!("ok")));
        assert_eq!(sandbox.execute("s", "t", json!({})).await.unwrap(), json!("ok"));
    }

    #[tokio::test]
    async fn test_mock_records_calls() {
        let mock = MockSandbox::new(|_, tool, args| Ok(json!({ "tool": tool, "args": args })));
        let out = mock.execute("script", "t", json!({"a": 1})).await.unwrap();
        assert_eq!(out["tool"], "t");
        assert_eq!(mock.calls().len(), 1);
        assert_eq!(mock.calls()[0].script, "script");
    }
}
