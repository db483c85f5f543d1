//! 设备模型
//!
//! 扫描得到的打印机设备快照。同一份结构既用于扫描结果，也作为
//! 已连接列表的持久化记录（按最近连接排序、按 device_id 去重）。

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 扫描发现的打印机设备
///
/// `device_id` 是平台分配的不透明标识，同一外设在不同主机上可能不同，
/// 只在本机范围内用于去重和重连。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrinterDevice {
    pub device_id: String,
    /// 广播名称
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// 本地名称（部分设备只在 scan response 里带 localName）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_name: Option<String>,
    /// 原始广播数据
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub advertisement: Vec<u8>,
    /// 广播的服务 UUID 列表
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub advertised_services: Vec<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rssi: Option<i16>,
}

impl PrinterDevice {
    /// 展示名称：优先广播名称，其次本地名称，空串视为无名
    pub fn display_name(&self) -> Option<&str> {
        self.name
            .as_deref()
            .filter(|s| !s.is_empty())
            .or_else(|| self.local_name.as_deref().filter(|s| !s.is_empty()))
    }

    /// 是否携带广播内容（数据负载或服务 UUID 至少其一）
    pub fn has_advertisement(&self) -> bool {
        !self.advertisement.is_empty() || !self.advertised_services.is_empty()
    }

    /// 扫描候选：有广播内容且名称非空的设备才进入搜索结果
    pub fn is_candidate(&self) -> bool {
        self.has_advertisement() && self.display_name().is_some()
    }
}

/// 已连接设备快照
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectedPrinter {
    pub device: PrinterDevice,
    pub connected: bool,
}

/// 选定的可写特征值 (serviceId, characteristicId)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteCharacteristic {
    pub service_id: Uuid,
    pub characteristic_id: Uuid,
}
