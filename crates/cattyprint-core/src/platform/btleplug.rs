//! btleplug 后端
//!
//! 基于 btleplug 的跨平台实现。适配器事件由一个常驻转译任务翻译成
//! [`PlatformEvent`] 后扇出给所有订阅者；连接建立后另起任务转发该
//! 外设的特征值通知。
//!
//! btleplug 没有"允许重复上报"的开关，这里用 `DeviceUpdated` 事件
//! 模拟：允许重复时，扫描期间的更新事件同样作为发现事件转发。

use std::pin::Pin;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, CharPropFlags, Manager as _, Peripheral as _, ScanFilter,
    ValueNotification,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::device::PrinterDevice;

use super::{
    AdapterInfo, AdapterState, BlePlatform, CharacteristicInfo, CharacteristicProps, EventStream,
    PlatformError, PlatformEvent, ServiceInfo,
};

impl From<btleplug::Error> for PlatformError {
    fn from(e: btleplug::Error) -> Self {
        PlatformError::Backend(e.to_string())
    }
}

struct Shared {
    adapter: Mutex<Option<Adapter>>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<PlatformEvent>>>,
    discovering: AtomicBool,
    allow_duplicates: AtomicBool,
    pump_started: AtomicBool,
}

/// btleplug 平台实现
pub struct BtleplugPlatform {
    manager: Manager,
    shared: Arc<Shared>,
}

impl BtleplugPlatform {
    /// 创建平台实例
    ///
    /// Manager 创建失败视为宿主缺少蓝牙能力。
    pub async fn new() -> Result<Self, PlatformError> {
        let manager = Manager::new().await.map_err(|e| {
            debug!("BLE manager unavailable: {e}");
            PlatformError::Unsupported
        })?;

        Ok(Self {
            manager,
            shared: Arc::new(Shared {
                adapter: Mutex::new(None),
                subscribers: Mutex::new(Vec::new()),
                discovering: AtomicBool::new(false),
                allow_duplicates: AtomicBool::new(true),
                pump_started: AtomicBool::new(false),
            }),
        })
    }

    fn adapter(&self) -> Result<Adapter, PlatformError> {
        self.shared
            .adapter
            .lock()
            .unwrap()
            .clone()
            .ok_or(PlatformError::NoAdapter)
    }

    async fn find_peripheral(&self, device_id: &str) -> Result<Peripheral, PlatformError> {
        let adapter = self.adapter()?;
        for peripheral in adapter.peripherals().await? {
            if peripheral.id().to_string() == device_id {
                return Ok(peripheral);
            }
        }
        Err(PlatformError::DeviceNotFound(device_id.to_string()))
    }
}

fn fan_out(shared: &Shared, event: PlatformEvent) {
    shared
        .subscribers
        .lock()
        .unwrap()
        .retain(|tx| tx.send(event.clone()).is_ok());
}

/// 读取外设属性并生成设备快照；广播数据按厂商 ID 排序后拼接
async fn snapshot_device(adapter: &Adapter, id: &PeripheralId) -> Option<PrinterDevice> {
    let peripheral = adapter.peripheral(id).await.ok()?;
    let props = peripheral.properties().await.ok()??;

    let mut manufacturer: Vec<_> = props.manufacturer_data.into_iter().collect();
    manufacturer.sort_by_key(|(id, _)| *id);
    let mut advertisement = Vec::new();
    for (_, data) in manufacturer {
        advertisement.extend_from_slice(&data);
    }

    Some(PrinterDevice {
        device_id: peripheral.id().to_string(),
        name: props.local_name.clone(),
        local_name: props.local_name,
        advertisement,
        advertised_services: props.services,
        rssi: props.rssi,
    })
}

async fn run_pump(adapter: Adapter, shared: Arc<Shared>) {
    let mut events = match adapter.events().await {
        Ok(events) => events,
        Err(e) => {
            warn!("Adapter event stream unavailable: {e}");
            return;
        }
    };

    while let Some(event) = events.next().await {
        match event {
            CentralEvent::DeviceDiscovered(id) => {
                if let Some(device) = snapshot_device(&adapter, &id).await {
                    fan_out(&shared, PlatformEvent::DeviceFound(device));
                }
            }
            CentralEvent::DeviceUpdated(id) => {
                let duplicates = shared.allow_duplicates.load(Ordering::Relaxed)
                    && shared.discovering.load(Ordering::Relaxed);
                if duplicates {
                    if let Some(device) = snapshot_device(&adapter, &id).await {
                        fan_out(&shared, PlatformEvent::DeviceFound(device));
                    }
                }
            }
            CentralEvent::DeviceConnected(id) => {
                fan_out(
                    &shared,
                    PlatformEvent::ConnectionState {
                        device_id: id.to_string(),
                        connected: true,
                    },
                );
            }
            CentralEvent::DeviceDisconnected(id) => {
                fan_out(
                    &shared,
                    PlatformEvent::ConnectionState {
                        device_id: id.to_string(),
                        connected: false,
                    },
                );
            }
            _ => {}
        }
    }
}

async fn forward_notifications(
    peripheral: Peripheral,
    mut notifications: Pin<Box<dyn Stream<Item = ValueNotification> + Send>>,
    shared: Arc<Shared>,
    device_id: String,
) {
    while let Some(notification) = notifications.next().await {
        // 通知只带特征值 UUID，从服务表反查所属服务
        let service_id = peripheral
            .services()
            .into_iter()
            .find(|s| s.characteristics.iter().any(|c| c.uuid == notification.uuid))
            .map(|s| s.uuid)
            .unwrap_or(Uuid::nil());

        fan_out(
            &shared,
            PlatformEvent::CharacteristicValue {
                device_id: device_id.clone(),
                service_id,
                characteristic_id: notification.uuid,
                value: notification.value,
            },
        );
    }
}

#[async_trait]
impl BlePlatform for BtleplugPlatform {
    async fn open_adapter(&self) -> Result<AdapterInfo, PlatformError> {
        let adapters = self.manager.adapters().await?;
        let adapter = adapters.into_iter().next().ok_or(PlatformError::NoAdapter)?;

        let name = adapter
            .adapter_info()
            .await
            .unwrap_or_else(|_| "unknown".to_string());
        debug!("Opened Bluetooth adapter: {name}");

        *self.shared.adapter.lock().unwrap() = Some(adapter.clone());
        if !self.shared.pump_started.swap(true, Ordering::SeqCst) {
            tokio::spawn(run_pump(adapter, self.shared.clone()));
        }

        Ok(AdapterInfo { name })
    }

    async fn adapter_state(&self) -> Result<AdapterState, PlatformError> {
        Ok(AdapterState {
            available: self.shared.adapter.lock().unwrap().is_some(),
            discovering: self.shared.discovering.load(Ordering::Relaxed),
        })
    }

    async fn start_discovery(&self, allow_duplicates: bool) -> Result<(), PlatformError> {
        let adapter = self.adapter()?;
        self.shared
            .allow_duplicates
            .store(allow_duplicates, Ordering::Relaxed);
        adapter.start_scan(ScanFilter::default()).await?;
        self.shared.discovering.store(true, Ordering::Relaxed);
        Ok(())
    }

    async fn stop_discovery(&self) -> Result<(), PlatformError> {
        let adapter = self.adapter()?;
        adapter.stop_scan().await?;
        self.shared.discovering.store(false, Ordering::Relaxed);
        Ok(())
    }

    async fn create_connection(&self, device_id: &str) -> Result<(), PlatformError> {
        let peripheral = self.find_peripheral(device_id).await?;
        peripheral.connect().await?;

        // 转发该外设的特征值通知
        match peripheral.notifications().await {
            Ok(notifications) => {
                tokio::spawn(forward_notifications(
                    peripheral,
                    notifications,
                    self.shared.clone(),
                    device_id.to_string(),
                ));
            }
            Err(e) => debug!("Notification stream unavailable for {device_id}: {e}"),
        }

        Ok(())
    }

    async fn close_connection(&self, device_id: &str) -> Result<(), PlatformError> {
        let peripheral = self.find_peripheral(device_id).await?;
        peripheral.disconnect().await?;
        Ok(())
    }

    async fn device_services(&self, device_id: &str) -> Result<Vec<ServiceInfo>, PlatformError> {
        let peripheral = self.find_peripheral(device_id).await?;
        peripheral.discover_services().await?;
        Ok(peripheral
            .services()
            .into_iter()
            .map(|s| ServiceInfo {
                uuid: s.uuid,
                primary: s.primary,
            })
            .collect())
    }

    async fn device_characteristics(
        &self,
        device_id: &str,
        service_id: Uuid,
    ) -> Result<Vec<CharacteristicInfo>, PlatformError> {
        let peripheral = self.find_peripheral(device_id).await?;
        let service = peripheral
            .services()
            .into_iter()
            .find(|s| s.uuid == service_id)
            .ok_or_else(|| PlatformError::Backend(format!("service not found: {service_id}")))?;

        Ok(service
            .characteristics
            .into_iter()
            .map(|c| CharacteristicInfo {
                uuid: c.uuid,
                properties: CharacteristicProps {
                    read: c.properties.contains(CharPropFlags::READ),
                    write: c.properties.contains(CharPropFlags::WRITE),
                    write_without_response: c
                        .properties
                        .contains(CharPropFlags::WRITE_WITHOUT_RESPONSE),
                    notify: c.properties.contains(CharPropFlags::NOTIFY),
                    indicate: c.properties.contains(CharPropFlags::INDICATE),
                },
            })
            .collect())
    }

    fn events(&self) -> EventStream {
        let (tx, rx) = mpsc::unbounded_channel();
        self.shared.subscribers.lock().unwrap().push(tx);
        UnboundedReceiverStream::new(rx).boxed()
    }
}
