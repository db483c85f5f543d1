//! 已连接设备列表的持久化
//!
//! 对应宿主端 key-value 存储里的一个命名键：按最近连接排序、按
//! device_id 去重的设备列表。去重和排序由编排层维护，这里只负责
//! 原样读写。

use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::device::PrinterDevice;

/// 存储错误
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// 设备列表存储接口
pub trait DeviceStore: Send + Sync {
    fn load(&self) -> Result<Vec<PrinterDevice>, StoreError>;
    fn save(&self, devices: &[PrinterDevice]) -> Result<(), StoreError>;
}

impl<S: DeviceStore + ?Sized> DeviceStore for Arc<S> {
    fn load(&self) -> Result<Vec<PrinterDevice>, StoreError> {
        (**self).load()
    }

    fn save(&self, devices: &[PrinterDevice]) -> Result<(), StoreError> {
        (**self).save(devices)
    }
}

/// JSON 文件存储
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// 默认存储路径: `<config_dir>/cattyprint/printer_list.json`
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("cattyprint")
            .join("printer_list.json")
    }
}

impl Default for FileStore {
    fn default() -> Self {
        Self::new(Self::default_path())
    }
}

impl DeviceStore for FileStore {
    fn load(&self) -> Result<Vec<PrinterDevice>, StoreError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&self.path)?;
        let devices: Vec<PrinterDevice> = serde_json::from_str(&content)?;
        debug!("Loaded {} saved device(s) from {:?}", devices.len(), self.path);
        Ok(devices)
    }

    fn save(&self, devices: &[PrinterDevice]) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_string_pretty(devices)?)?;
        debug!("Saved {} device(s) to {:?}", devices.len(), self.path);
        Ok(())
    }
}

/// 内存存储，用于测试和嵌入场景
#[derive(Default)]
pub struct MemoryStore {
    devices: Mutex<Vec<PrinterDevice>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_devices(devices: Vec<PrinterDevice>) -> Self {
        Self {
            devices: Mutex::new(devices),
        }
    }
}

impl DeviceStore for MemoryStore {
    fn load(&self) -> Result<Vec<PrinterDevice>, StoreError> {
        Ok(self.devices.lock().unwrap().clone())
    }

    fn save(&self, devices: &[PrinterDevice]) -> Result<(), StoreError> {
        *self.devices.lock().unwrap() = devices.to_vec();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(id: &str) -> PrinterDevice {
        PrinterDevice {
            device_id: id.to_string(),
            name: Some(format!("Printer-{id}")),
            local_name: None,
            advertisement: vec![0x4d, 0x58],
            advertised_services: Vec::new(),
            rssi: Some(-52),
        }
    }

    #[test]
    fn test_file_store_round_trip() {
        let path = std::env::temp_dir().join("cattyprint-test-store-round-trip.json");
        let _ = fs::remove_file(&path);

        let store = FileStore::new(&path);
        assert!(store.load().unwrap().is_empty());

        let devices = vec![device("A"), device("B")];
        store.save(&devices).unwrap();
        assert_eq!(store.load().unwrap(), devices);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_memory_store_round_trip() {
        let store = MemoryStore::new();
        store.save(&[device("A")]).unwrap();
        assert_eq!(store.load().unwrap()[0].device_id, "A");
    }
}
