//! 测试用的脚本化平台实现
//!
//! 预先注入服务/特征值表和失败点，记录每次平台调用，事件由测试
//! 主动通过 [`MockPlatform::emit`] 注入。

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use uuid::Uuid;

use cattyprint_core::{
    AdapterInfo, AdapterState, BlePlatform, CharacteristicInfo, CharacteristicProps, EventStream,
    PlatformError, PlatformEvent, PrinterDevice, ServiceInfo,
};

/// 记录的平台调用
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    OpenAdapter,
    AdapterState,
    StartDiscovery(bool),
    StopDiscovery,
    Connect(String),
    Close(String),
    Services(String),
    Characteristics(String, Uuid),
}

#[derive(Default)]
struct MockInner {
    subscribers: Vec<mpsc::UnboundedSender<PlatformEvent>>,
    calls: Vec<Call>,
    open_error: Option<PlatformError>,
    start_discovery_error: Option<PlatformError>,
    adapter_state: AdapterState,
    connect_errors: HashMap<String, PlatformError>,
    services: HashMap<String, Vec<ServiceInfo>>,
    services_errors: HashMap<String, PlatformError>,
    characteristics: HashMap<(String, Uuid), Vec<CharacteristicInfo>>,
}

#[derive(Default)]
pub struct MockPlatform {
    inner: Mutex<MockInner>,
}

impl MockPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_open(&self, error: PlatformError) {
        self.inner.lock().unwrap().open_error = Some(error);
    }

    pub fn fail_start_discovery(&self) {
        self.inner.lock().unwrap().start_discovery_error =
            Some(PlatformError::Backend("scan failed".to_string()));
    }

    pub fn set_adapter_state(&self, available: bool, discovering: bool) {
        self.inner.lock().unwrap().adapter_state = AdapterState {
            available,
            discovering,
        };
    }

    pub fn fail_connect(&self, device_id: &str) {
        self.inner.lock().unwrap().connect_errors.insert(
            device_id.to_string(),
            PlatformError::Backend("connect failed".to_string()),
        );
    }

    pub fn set_services(&self, device_id: &str, services: Vec<ServiceInfo>) {
        self.inner
            .lock()
            .unwrap()
            .services
            .insert(device_id.to_string(), services);
    }

    pub fn fail_services(&self, device_id: &str) {
        self.inner.lock().unwrap().services_errors.insert(
            device_id.to_string(),
            PlatformError::Backend("service enumeration failed".to_string()),
        );
    }

    pub fn set_characteristics(
        &self,
        device_id: &str,
        service_id: Uuid,
        characteristics: Vec<CharacteristicInfo>,
    ) {
        self.inner
            .lock()
            .unwrap()
            .characteristics
            .insert((device_id.to_string(), service_id), characteristics);
    }

    /// 向所有订阅者注入一条平台事件
    pub fn emit(&self, event: PlatformEvent) {
        self.inner
            .lock()
            .unwrap()
            .subscribers
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn calls(&self) -> Vec<Call> {
        self.inner.lock().unwrap().calls.clone()
    }

    /// 收到过 close-connection 请求的设备 id 列表
    pub fn closed(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Close(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: Call) {
        self.inner.lock().unwrap().calls.push(call);
    }
}

#[async_trait]
impl BlePlatform for MockPlatform {
    async fn open_adapter(&self) -> Result<AdapterInfo, PlatformError> {
        self.record(Call::OpenAdapter);
        if let Some(e) = self.inner.lock().unwrap().open_error.clone() {
            return Err(e);
        }
        Ok(AdapterInfo {
            name: "mock0".to_string(),
        })
    }

    async fn adapter_state(&self) -> Result<AdapterState, PlatformError> {
        self.record(Call::AdapterState);
        Ok(self.inner.lock().unwrap().adapter_state)
    }

    async fn start_discovery(&self, allow_duplicates: bool) -> Result<(), PlatformError> {
        self.record(Call::StartDiscovery(allow_duplicates));
        if let Some(e) = self.inner.lock().unwrap().start_discovery_error.clone() {
            return Err(e);
        }
        Ok(())
    }

    async fn stop_discovery(&self) -> Result<(), PlatformError> {
        self.record(Call::StopDiscovery);
        Ok(())
    }

    async fn create_connection(&self, device_id: &str) -> Result<(), PlatformError> {
        self.record(Call::Connect(device_id.to_string()));
        if let Some(e) = self.inner.lock().unwrap().connect_errors.get(device_id) {
            return Err(e.clone());
        }
        Ok(())
    }

    async fn close_connection(&self, device_id: &str) -> Result<(), PlatformError> {
        self.record(Call::Close(device_id.to_string()));
        Ok(())
    }

    async fn device_services(&self, device_id: &str) -> Result<Vec<ServiceInfo>, PlatformError> {
        self.record(Call::Services(device_id.to_string()));
        let inner = self.inner.lock().unwrap();
        if let Some(e) = inner.services_errors.get(device_id) {
            return Err(e.clone());
        }
        Ok(inner.services.get(device_id).cloned().unwrap_or_default())
    }

    async fn device_characteristics(
        &self,
        device_id: &str,
        service_id: Uuid,
    ) -> Result<Vec<CharacteristicInfo>, PlatformError> {
        self.record(Call::Characteristics(device_id.to_string(), service_id));
        Ok(self
            .inner
            .lock()
            .unwrap()
            .characteristics
            .get(&(device_id.to_string(), service_id))
            .cloned()
            .unwrap_or_default())
    }

    fn events(&self) -> EventStream {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.lock().unwrap().subscribers.push(tx);
        UnboundedReceiverStream::new(rx).boxed()
    }
}

/// 构造一台带广播数据和名称的候选打印机
pub fn printer(id: &str, name: &str) -> PrinterDevice {
    PrinterDevice {
        device_id: id.to_string(),
        name: Some(name.to_string()),
        local_name: Some(name.to_string()),
        advertisement: vec![0x4d, 0x58, 0x30, 0x31],
        advertised_services: Vec::new(),
        rssi: Some(-40),
    }
}

pub fn service(uuid: u128) -> ServiceInfo {
    ServiceInfo {
        uuid: Uuid::from_u128(uuid),
        primary: true,
    }
}

pub fn characteristic(uuid: u128, write: bool) -> CharacteristicInfo {
    CharacteristicInfo {
        uuid: Uuid::from_u128(uuid),
        properties: CharacteristicProps {
            write,
            ..Default::default()
        },
    }
}
