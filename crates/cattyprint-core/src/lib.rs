//! Cattyprint Core Library
//!
//! 蓝牙热敏打印机连接管理的核心实现库：发现、连接外设并选定可写入
//! 的 GATT 特征值（打印数据的写入通道）。
//!
//! # 模块
//!
//! - **platform**: 宿主 BLE 能力抽象与 btleplug 后端
//! - **link**: 连接编排（扫描 → 连接 → 特征值选定）
//! - **store**: 已连接设备列表持久化
//! - **config**: 应用设置
//! - **prompt**: 用户提示回调
//!
//! # 使用示例
//!
//! ```ignore
//! use cattyprint_core::{BtleplugPlatform, FileStore, LinkOptions, NullPrompt, PrinterLink};
//!
//! // 1. 创建平台后端和编排器
//! let platform = BtleplugPlatform::new().await?;
//! let link = PrinterLink::new(platform, FileStore::default(), NullPrompt, LinkOptions::default());
//!
//! // 2. 初始化适配器并扫描
//! link.start_bluetooth().await?;
//!
//! // 3. 连接搜索到的打印机
//! let device = link.search_results().into_iter().next().unwrap();
//! link.connect_device(&device).await?;
//!
//! // 4. 特征值选定后即可向打印机写入数据
//! let write = link.write_characteristic();
//! ```

pub mod config;
pub mod device;
pub mod link;
pub mod platform;
pub mod prompt;
pub mod store;

// Link re-exports
pub use link::{LinkError, LinkOptions, LinkSnapshot, LinkState, PrinterLink};

// Platform re-exports
pub use platform::{
    AdapterInfo, AdapterState, BlePlatform, BtleplugPlatform, CharacteristicInfo,
    CharacteristicProps, EventStream, PlatformError, PlatformEvent, ServiceInfo,
};

// Device / persistence re-exports
pub use config::AppSettings;
pub use device::{ConnectedPrinter, PrinterDevice, WriteCharacteristic};
pub use prompt::{NullPrompt, PromptCallback, PromptEvent, SimplePromptCallback};
pub use store::{DeviceStore, FileStore, MemoryStore, StoreError};
