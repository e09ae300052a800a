//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `WASP__*` 覆盖（双下划线表示嵌套，如 `WASP__LLM__MODEL=gpt-4o-mini`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub app: AppSection,
    #[serde(default)]
    pub llm: LlmSection,
    #[serde(default)]
    pub workflow: WorkflowSection,
    #[serde(default)]
    pub trace: TraceSection,
}

/// [app] 段：应用名与代码工作目录
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 代码生成与编辑的根目录，未设置时用当前目录
    pub workspace_root: Option<PathBuf>,
}

/// [llm] 段：后端选择与超时
#[derive(Debug, Clone, Deserialize, Default)]
pub struct LlmSection {
    /// OpenAI 兼容端点，未设置时用官方默认
    pub base_url: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub timeouts: LlmTimeoutsSection,
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LlmTimeoutsSection {
    #[serde(default = "default_request_timeout")]
    pub request: u64,
}

fn default_request_timeout() -> u64 {
    60
}

/// [workflow] 段：重试上限、置信度阈值、预算与校验开关
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkflowSection {
    /// 单任务最大重试次数
    pub max_retries: u32,
    /// 接受结果所需的最低置信度
    pub confidence_accept: f64,
    /// 触发重规划的滚动置信度下限
    pub confidence_replan: f64,
    /// 滚动置信度窗口（最近 N 个结果）
    pub confidence_window: usize,
    /// 单次 Agent 调用超时（秒）
    pub call_timeout_secs: u64,
    /// 全局执行步数预算（含重试）
    pub max_total_steps: usize,
    /// 单次运行最大重规划次数
    pub max_replans: u32,
    /// 校验失败时是否自动发起一次修正回合
    pub auto_correct: bool,
    /// 校验失败是否视为硬失败（否则降置信度后接受）
    pub strict_validation: bool,
    /// 每条校验警告扣除的置信度
    pub warning_penalty: f64,
    /// 每次已消耗重试扣除的置信度
    pub retry_penalty: f64,
    /// 非阻塞任务的失败是否计入重规划置信度信号
    pub count_nonblocking_failures: bool,
}

impl Default for WorkflowSection {
    fn default() -> Self {
        Self {
            max_retries: 3,
            confidence_accept: 0.8,
            confidence_replan: 0.5,
            confidence_window: 3,
            call_timeout_secs: 60,
            max_total_steps: 24,
            max_replans: 2,
            auto_correct: true,
            strict_validation: false,
            warning_penalty: 0.10,
            retry_penalty: 0.15,
            count_nonblocking_failures: true,
        }
    }
}

/// [trace] 段：运行轨迹落盘
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TraceSection {
    pub enabled: bool,
    /// 轨迹根目录（其下建 runs/）
    pub dir: PathBuf,
}

impl Default for TraceSection {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: PathBuf::from(".wasp"),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            app: AppSection::default(),
            llm: LlmSection::default(),
            workflow: WorkflowSection::default(),
            trace: TraceSection::default(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 WASP__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 WASP__*（双下划线表示嵌套键）
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
        config::Environment::with_prefix("WASP")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workflow_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.workflow.max_retries, 3);
        assert!((cfg.workflow.confidence_accept - 0.8).abs() < f64::EPSILON);
        assert!(cfg.workflow.auto_correct);
        assert!(!cfg.workflow.strict_validation);
    }

    #[test]
    fn test_trace_defaults() {
        let cfg = AppConfig::default();
        assert!(cfg.trace.enabled);
        assert_eq!(cfg.trace.dir, PathBuf::from(".wasp"));
    }
}
