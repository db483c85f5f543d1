//! 应用配置和持久化
//!
//! 扫描窗口、服务稳定延时等参数的存储和读取。

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::store::FileStore;

/// 应用设置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    /// 扫描窗口时长（毫秒），窗口结束时汇总搜索结果
    pub scan_window_ms: u64,
    /// 每个服务枚举特征值前的稳定延时（毫秒）
    ///
    /// 固定 800ms 的取值没有文档化依据，疑似在规避平台自身的
    /// service-ready 时序问题，因此做成可配置项而不是常量。
    pub service_settle_ms: u64,
    /// 扫描时是否允许重复上报同一设备
    pub allow_duplicates: bool,
    /// 设备列表存储路径（默认 `<config_dir>/cattyprint/printer_list.json`）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_list_path: Option<PathBuf>,
    /// 详细日志模式
    pub verbose: bool,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            scan_window_ms: 5000,
            service_settle_ms: 800,
            allow_duplicates: true,
            device_list_path: None,
            verbose: false,
        }
    }
}

impl AppSettings {
    /// 获取配置文件路径
    fn config_path() -> PathBuf {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("cattyprint");
        config_dir.join("settings.toml")
    }

    /// 加载设置（如果文件不存在则使用默认值）
    pub fn load() -> Self {
        let path = Self::config_path();
        if path.exists() {
            match fs::read_to_string(&path) {
                Ok(content) => match toml::from_str(&content) {
                    Ok(settings) => {
                        debug!("Loaded settings from {:?}", path);
                        return settings;
                    }
                    Err(e) => {
                        warn!("Failed to parse settings: {}, using defaults", e);
                    }
                },
                Err(e) => {
                    warn!("Failed to read settings file: {}, using defaults", e);
                }
            }
        }
        Self::default()
    }

    /// 保存设置
    pub fn save(&self) -> anyhow::Result<()> {
        let path = Self::config_path();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(&path, content)?;
        debug!("Saved settings to {:?}", path);
        Ok(())
    }

    pub fn scan_window(&self) -> Duration {
        Duration::from_millis(self.scan_window_ms)
    }

    pub fn service_settle(&self) -> Duration {
        Duration::from_millis(self.service_settle_ms)
    }

    /// 设备列表存储路径，未配置时使用默认位置
    pub fn device_list_path(&self) -> PathBuf {
        self.device_list_path
            .clone()
            .unwrap_or_else(FileStore::default_path)
    }
}
