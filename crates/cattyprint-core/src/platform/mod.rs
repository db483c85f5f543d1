//! 平台能力抽象
//!
//! 宿主的 BLE 能力（适配器、扫描、连接、GATT 枚举）在这里收敛为一个
//! 可注入的 [`BlePlatform`] trait：编排逻辑只面向这个接口，真实后端和
//! 测试替身都从这里接入。
//!
//! 异步事件（设备发现、连接状态、特征值通知）通过 [`BlePlatform::events`]
//! 下发，每次调用返回一条独立的订阅流。

pub mod btleplug;

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use uuid::Uuid;

use crate::device::PrinterDevice;

pub use self::btleplug::BtleplugPlatform;

/// 平台事件订阅流
pub type EventStream = BoxStream<'static, PlatformEvent>;

/// 平台错误
#[derive(Debug, Clone, thiserror::Error)]
pub enum PlatformError {
    #[error("Bluetooth capability unavailable on this host")]
    Unsupported,

    #[error("No Bluetooth adapters found")]
    NoAdapter,

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Device not connected: {0}")]
    NotConnected(String),

    #[error("Backend error: {0}")]
    Backend(String),
}

/// 适配器打开结果
#[derive(Debug, Clone, PartialEq)]
pub struct AdapterInfo {
    pub name: String,
}

/// 适配器状态
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AdapterState {
    /// 适配器是否可用
    pub available: bool,
    /// 是否正在扫描
    pub discovering: bool,
}

/// GATT 服务
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ServiceInfo {
    pub uuid: Uuid,
    pub primary: bool,
}

/// 特征值能力标志
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CharacteristicProps {
    pub read: bool,
    pub write: bool,
    pub write_without_response: bool,
    pub notify: bool,
    pub indicate: bool,
}

/// GATT 特征值
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CharacteristicInfo {
    pub uuid: Uuid,
    pub properties: CharacteristicProps,
}

/// 平台异步事件
#[derive(Debug, Clone, PartialEq)]
pub enum PlatformEvent {
    /// 扫描上报设备（允许重复上报时同一设备可能多次出现）
    DeviceFound(PrinterDevice),
    /// 连接状态变化
    ConnectionState { device_id: String, connected: bool },
    /// 特征值通知
    CharacteristicValue {
        device_id: String,
        service_id: Uuid,
        characteristic_id: Uuid,
        value: Vec<u8>,
    },
}

/// 宿主 BLE 能力接口
///
/// 所有方法都是对平台能力的直接透传，不做重试。
#[async_trait]
pub trait BlePlatform: Send + Sync + 'static {
    /// 打开蓝牙适配器；宿主缺少蓝牙能力时返回 [`PlatformError::Unsupported`]
    async fn open_adapter(&self) -> Result<AdapterInfo, PlatformError>;

    /// 查询适配器状态
    async fn adapter_state(&self) -> Result<AdapterState, PlatformError>;

    /// 开始扫描；`allow_duplicates` 控制是否重复上报同一设备
    async fn start_discovery(&self, allow_duplicates: bool) -> Result<(), PlatformError>;

    /// 停止扫描
    async fn stop_discovery(&self) -> Result<(), PlatformError>;

    /// 发起连接
    async fn create_connection(&self, device_id: &str) -> Result<(), PlatformError>;

    /// 断开连接
    async fn close_connection(&self, device_id: &str) -> Result<(), PlatformError>;

    /// 枚举设备的所有服务
    async fn device_services(&self, device_id: &str) -> Result<Vec<ServiceInfo>, PlatformError>;

    /// 枚举某个服务的所有特征值
    async fn device_characteristics(
        &self,
        device_id: &str,
        service_id: Uuid,
    ) -> Result<Vec<CharacteristicInfo>, PlatformError>;

    /// 订阅平台事件；每次调用返回一条独立的事件流
    fn events(&self) -> EventStream;
}

#[async_trait]
impl<P: BlePlatform + ?Sized> BlePlatform for Arc<P> {
    async fn open_adapter(&self) -> Result<AdapterInfo, PlatformError> {
        (**self).open_adapter().await
    }

    async fn adapter_state(&self) -> Result<AdapterState, PlatformError> {
        (**self).adapter_state().await
    }

    async fn start_discovery(&self, allow_duplicates: bool) -> Result<(), PlatformError> {
        (**self).start_discovery(allow_duplicates).await
    }

    async fn stop_discovery(&self) -> Result<(), PlatformError> {
        (**self).stop_discovery().await
    }

    async fn create_connection(&self, device_id: &str) -> Result<(), PlatformError> {
        (**self).create_connection(device_id).await
    }

    async fn close_connection(&self, device_id: &str) -> Result<(), PlatformError> {
        (**self).close_connection(device_id).await
    }

    async fn device_services(&self, device_id: &str) -> Result<Vec<ServiceInfo>, PlatformError> {
        (**self).device_services(device_id).await
    }

    async fn device_characteristics(
        &self,
        device_id: &str,
        service_id: Uuid,
    ) -> Result<Vec<CharacteristicInfo>, PlatformError> {
        (**self).device_characteristics(device_id, service_id).await
    }

    fn events(&self) -> EventStream {
        (**self).events()
    }
}
