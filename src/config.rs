//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `DIFFEQ__*` 覆盖（双下划线表示嵌套，如 `DIFFEQ__MODEL__HORIZON=20`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub model: ModelSection,
    #[serde(default)]
    pub backend: BackendSection,
}

/// [model] 段：积分上限、灵敏度开关、新一代缓冲区的默认值
#[derive(Debug, Clone, Deserialize)]
pub struct ModelSection {
    /// 积分终止时间，time grid 为 [0, horizon]
    #[serde(default = "default_horizon")]
    pub horizon: f64,
    /// 是否同时求解 tangent（一阶灵敏度）
    #[serde(default = "default_sensitivities")]
    pub sensitivities: bool,
    #[serde(default = "default_input_value")]
    pub input_value: f64,
    #[serde(default)]
    pub lower_bound: f64,
    #[serde(default = "default_upper_bound")]
    pub upper_bound: f64,
}

impl Default for ModelSection {
    fn default() -> Self {
        Self {
            horizon: default_horizon(),
            sensitivities: default_sensitivities(),
            input_value: default_input_value(),
            lower_bound: 0.0,
            upper_bound: default_upper_bound(),
        }
    }
}

fn default_horizon() -> f64 {
    10.0
}

fn default_sensitivities() -> bool {
    true
}

fn default_input_value() -> f64 {
    1.0
}

fn default_upper_bound() -> f64 {
    2.0
}

/// [backend] 段：编译后端选择与超时
#[derive(Debug, Clone, Deserialize)]
pub struct BackendSection {
    /// 后端名称；目前内置 mock
    #[serde(default = "default_provider")]
    pub provider: String,
    /// 单次编译超时（秒），超时按 BackendFault 处理
    #[serde(default = "default_compile_timeout_secs")]
    pub compile_timeout_secs: u64,
    /// mock 后端在源码未声明 `in = [..]` 时的输入个数
    #[serde(default = "default_mock_inputs")]
    pub mock_inputs: usize,
    /// mock 后端在源码没有 `out_i { .. }` 时的输出个数
    #[serde(default = "default_mock_outputs")]
    pub mock_outputs: usize,
}

impl Default for BackendSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            compile_timeout_secs: default_compile_timeout_secs(),
            mock_inputs: default_mock_inputs(),
            mock_outputs: default_mock_outputs(),
        }
    }
}

fn default_provider() -> String {
    "mock".to_string()
}

fn default_compile_timeout_secs() -> u64 {
    30
}

fn default_mock_inputs() -> usize {
    2
}

fn default_mock_outputs() -> usize {
    1
}

/// 从 config 目录加载配置，环境变量 DIFFEQ__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 DIFFEQ__*（双下划线表示嵌套键）
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
        config::Environment::with_prefix("DIFFEQ")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
