//! 连接编排
//!
//! 驱动打印机从"未知"到"已知可写特征值"的完整流程：
//! 初始化适配器 → 固定窗口扫描 → 连接 → 服务/特征值枚举 → 选定可写特征值。
//!
//! 连接生命周期用显式的 [`LinkState`] 建模，平台事件只能触发定义好的
//! 状态迁移：特征值只在 `Connected → Ready` 迁移中出现，连接断开后
//! 不可能残留已选特征值。
//!
//! 所有平台失败都是一次性的：要么弹一次提示，要么记日志后吞掉，
//! 没有重试。

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info, warn};

use crate::config::AppSettings;
use crate::device::{ConnectedPrinter, PrinterDevice, WriteCharacteristic};
use crate::platform::{AdapterInfo, AdapterState, BlePlatform, PlatformError, PlatformEvent};
use crate::prompt::PromptCallback;
use crate::store::{DeviceStore, StoreError};

/// 蓝牙能力缺失时的一次性提示
const TIP_UNSUPPORTED: &str = "当前设备不支持蓝牙功能，请检查系统蓝牙开关后重试。";
const TIP_CONNECTED: &str = "连接成功";
const TIP_CONNECT_FAILED: &str = "连接失败";
const LOADING_CONNECTING: &str = "连接中...";

/// 编排错误
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("platform error: {0}")]
    Platform(#[from] PlatformError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// 编排参数
#[derive(Debug, Clone)]
pub struct LinkOptions {
    /// 扫描窗口时长，窗口结束时汇总搜索结果
    pub scan_window: Duration,
    /// 每个服务枚举特征值前的稳定延时
    pub service_settle: Duration,
    /// 扫描时是否允许重复上报同一设备
    pub allow_duplicates: bool,
}

impl Default for LinkOptions {
    fn default() -> Self {
        Self {
            scan_window: Duration::from_millis(5000),
            service_settle: Duration::from_millis(800),
            allow_duplicates: true,
        }
    }
}

impl From<&AppSettings> for LinkOptions {
    fn from(settings: &AppSettings) -> Self {
        Self {
            scan_window: settings.scan_window(),
            service_settle: settings.service_settle(),
            allow_duplicates: settings.allow_duplicates,
        }
    }
}

/// 连接生命周期
#[derive(Debug, Clone, PartialEq)]
pub enum LinkState {
    /// 无活动连接
    Idle,
    /// 已连接，特征值尚未选定
    Connected { printer: ConnectedPrinter },
    /// 已连接且可写特征值已选定
    Ready {
        printer: ConnectedPrinter,
        write: WriteCharacteristic,
    },
}

impl LinkState {
    /// 当前活动设备 id
    pub fn active_device_id(&self) -> Option<&str> {
        match self {
            LinkState::Idle => None,
            LinkState::Connected { printer } | LinkState::Ready { printer, .. } => {
                Some(printer.device.device_id.as_str())
            }
        }
    }

    fn connected_printer(&self) -> Option<&ConnectedPrinter> {
        match self {
            LinkState::Idle => None,
            LinkState::Connected { printer } | LinkState::Ready { printer, .. } => Some(printer),
        }
    }

    fn write_characteristic(&self) -> Option<WriteCharacteristic> {
        match self {
            LinkState::Ready { write, .. } => Some(*write),
            _ => None,
        }
    }
}

/// 对外状态快照
#[derive(Debug, Clone, PartialEq)]
pub struct LinkSnapshot {
    /// 搜索中
    pub searching: bool,
    /// 搜索到的打印机列表
    pub search_results: Vec<PrinterDevice>,
    /// 已连接过的打印机列表（最近优先）
    pub saved: Vec<PrinterDevice>,
    /// 当前连接的打印机
    pub connected: Option<ConnectedPrinter>,
    /// 选定的可写特征值
    pub write_characteristic: Option<WriteCharacteristic>,
}

struct LinkInner {
    searching: bool,
    search_results: Vec<PrinterDevice>,
    saved: Vec<PrinterDevice>,
    live: HashMap<String, ConnectedPrinter>,
    state: LinkState,
}

impl LinkInner {
    fn snapshot(&self) -> LinkSnapshot {
        LinkSnapshot {
            searching: self.searching,
            search_results: self.search_results.clone(),
            saved: self.saved.clone(),
            connected: self.state.connected_printer().cloned(),
            write_characteristic: self.state.write_characteristic(),
        }
    }
}

struct Shared<P> {
    platform: P,
    store: Box<dyn DeviceStore>,
    prompt: Box<dyn PromptCallback>,
    options: LinkOptions,
    inner: Mutex<LinkInner>,
    snapshot_tx: watch::Sender<LinkSnapshot>,
    scan_task: Mutex<Option<JoinHandle<()>>>,
}

impl<P> Shared<P> {
    fn publish(&self) {
        let snapshot = self.inner.lock().unwrap().snapshot();
        self.snapshot_tx.send_replace(snapshot);
    }
}

/// 打印机连接编排器
pub struct PrinterLink<P: BlePlatform> {
    shared: Arc<Shared<P>>,
    snapshot_rx: watch::Receiver<LinkSnapshot>,
}

impl<P: BlePlatform> PrinterLink<P> {
    pub fn new(
        platform: P,
        store: impl DeviceStore + 'static,
        prompt: impl PromptCallback + 'static,
        options: LinkOptions,
    ) -> Self {
        let saved = store.load().unwrap_or_else(|e| {
            warn!("Failed to load saved device list: {e}, starting empty");
            Vec::new()
        });

        let inner = LinkInner {
            searching: false,
            search_results: Vec::new(),
            saved,
            live: HashMap::new(),
            state: LinkState::Idle,
        };
        let (snapshot_tx, snapshot_rx) = watch::channel(inner.snapshot());

        Self {
            shared: Arc::new(Shared {
                platform,
                store: Box::new(store),
                prompt: Box::new(prompt),
                options,
                inner: Mutex::new(inner),
                snapshot_tx,
                scan_task: Mutex::new(None),
            }),
            snapshot_rx,
        }
    }

    /// 订阅状态快照变化
    pub fn subscribe(&self) -> watch::Receiver<LinkSnapshot> {
        self.snapshot_rx.clone()
    }

    pub fn snapshot(&self) -> LinkSnapshot {
        self.shared.inner.lock().unwrap().snapshot()
    }

    /// 搜索中
    pub fn searching(&self) -> bool {
        self.shared.inner.lock().unwrap().searching
    }

    /// 搜索到的打印机列表
    pub fn search_results(&self) -> Vec<PrinterDevice> {
        self.shared.inner.lock().unwrap().search_results.clone()
    }

    /// 已连接过的打印机列表（最近优先）
    pub fn saved_devices(&self) -> Vec<PrinterDevice> {
        self.shared.inner.lock().unwrap().saved.clone()
    }

    /// 当前连接的打印机
    pub fn connected(&self) -> Option<ConnectedPrinter> {
        self.shared
            .inner
            .lock()
            .unwrap()
            .state
            .connected_printer()
            .cloned()
    }

    /// 选定的可写特征值
    pub fn write_characteristic(&self) -> Option<WriteCharacteristic> {
        self.shared.inner.lock().unwrap().state.write_characteristic()
    }

    /// 活动连接表 deviceId => 快照
    pub fn live_connections(&self) -> HashMap<String, ConnectedPrinter> {
        self.shared.inner.lock().unwrap().live.clone()
    }

    /// 初始化蓝牙适配器
    ///
    /// 宿主缺少蓝牙能力时弹一次性提示并返回错误；成功时查询适配器
    /// 状态，并把 discovering 同步到 searching 标志。
    pub async fn init_adapter(&self) -> Result<(AdapterInfo, AdapterState), LinkError> {
        let info = match self.shared.platform.open_adapter().await {
            Ok(info) => info,
            Err(PlatformError::Unsupported) => {
                self.shared.prompt.show_tip(TIP_UNSUPPORTED);
                return Err(PlatformError::Unsupported.into());
            }
            Err(e) => {
                debug!("open_adapter failed: {e}");
                return Err(e.into());
            }
        };

        let state = self.shared.platform.adapter_state().await?;
        debug!("Adapter opened: {info:?}, state: {state:?}");
        {
            let mut inner = self.shared.inner.lock().unwrap();
            inner.searching = state.discovering;
        }
        self.shared.publish();

        Ok((info, state))
    }

    /// 开始执行流程：初始化适配器并搜索打印机
    ///
    /// 返回值与 [`Self::init_adapter`] 一致；扫描启动失败不向上传播。
    pub async fn start_bluetooth(&self) -> Result<(AdapterInfo, AdapterState), LinkError> {
        let res = self.init_adapter().await?;
        if let Err(e) = self.start_discovery().await {
            debug!("start_discovery failed: {e}");
        }
        Ok(res)
    }

    /// 搜索附近的打印机
    ///
    /// 固定窗口结束时汇总结果并停止扫描；窗口期内按 device_id 对本批次
    /// 和已保存列表去重，只收录有广播内容且名称非空的设备。
    pub async fn start_discovery(&self) -> Result<(), LinkError> {
        {
            let mut inner = self.shared.inner.lock().unwrap();
            inner.searching = true;
        }
        self.shared.publish();

        // 先订阅事件流，避免错过扫描启动瞬间的上报
        let mut events = self.shared.platform.events();

        if let Err(e) = self
            .shared
            .platform
            .start_discovery(self.shared.options.allow_duplicates)
            .await
        {
            {
                let mut inner = self.shared.inner.lock().unwrap();
                inner.searching = false;
            }
            self.shared.publish();
            return Err(e.into());
        }

        let shared = self.shared.clone();
        let window = self.shared.options.scan_window;
        let handle = tokio::spawn(async move {
            let mut found: Vec<PrinterDevice> = Vec::new();
            let deadline = time::sleep(window);
            tokio::pin!(deadline);

            loop {
                tokio::select! {
                    _ = &mut deadline => break,
                    event = events.next() => match event {
                        Some(PlatformEvent::DeviceFound(device)) => {
                            if !device.is_candidate() {
                                continue;
                            }
                            let seen = {
                                let inner = shared.inner.lock().unwrap();
                                found
                                    .iter()
                                    .chain(inner.saved.iter())
                                    .any(|d| d.device_id == device.device_id)
                            };
                            if !seen {
                                debug!(
                                    "Discovered printer candidate: {} ({})",
                                    device.display_name().unwrap_or("<unknown>"),
                                    device.device_id
                                );
                                found.push(device);
                            }
                        }
                        Some(_) => {}
                        None => break,
                    },
                }
            }

            info!("Scan window elapsed: {} device(s) found", found.len());
            {
                let mut inner = shared.inner.lock().unwrap();
                inner.searching = false;
                inner.search_results = found;
            }
            shared.publish();

            if let Err(e) = shared.platform.stop_discovery().await {
                debug!("stop_discovery failed: {e}");
            }
        });
        *self.shared.scan_task.lock().unwrap() = Some(handle);

        Ok(())
    }

    /// 停止搜索并取消窗口计时
    pub async fn stop_discovery(&self) {
        let handle = self.shared.scan_task.lock().unwrap().take();
        if let Some(handle) = handle {
            if !handle.is_finished() {
                handle.abort();
                // 被取消的扫描不再处于搜索中
                {
                    let mut inner = self.shared.inner.lock().unwrap();
                    inner.searching = false;
                }
                self.shared.publish();
            }
        }
        if let Err(e) = self.shared.platform.stop_discovery().await {
            debug!("stop_discovery failed: {e}");
        }
    }

    /// 配对连接低功耗蓝牙打印机
    ///
    /// 成功后停止扫描、记录到已连接列表（去重、最近优先）并立即开始
    /// 服务枚举；失败时弹一次错误提示并请求关闭连接。
    pub async fn connect_device(&self, device: &PrinterDevice) -> Result<(), LinkError> {
        self.shared.prompt.show_loading(LOADING_CONNECTING);

        match self
            .shared
            .platform
            .create_connection(&device.device_id)
            .await
        {
            Ok(()) => {
                self.shared.prompt.hide_loading();
                self.shared.prompt.show_tip(TIP_CONNECTED);
                info!(
                    "Connected to printer: {} ({})",
                    device.display_name().unwrap_or("<unknown>"),
                    device.device_id
                );

                self.spawn_value_logger(device.device_id.clone());
                self.stop_discovery().await;

                let printer = ConnectedPrinter {
                    device: device.clone(),
                    connected: true,
                };
                let (previous, rebind, saved) = {
                    let mut inner = self.shared.inner.lock().unwrap();
                    let active = inner.state.active_device_id().map(str::to_owned);
                    let rebind = active.as_deref() != Some(device.device_id.as_str());
                    let previous = active.filter(|id| *id != device.device_id);

                    inner.state = LinkState::Connected {
                        printer: printer.clone(),
                    };
                    inner.live.insert(device.device_id.clone(), printer);

                    // 去重，最近连接排在最前
                    let mut saved = Vec::with_capacity(inner.saved.len() + 1);
                    saved.push(device.clone());
                    saved.extend(
                        inner
                            .saved
                            .iter()
                            .filter(|d| d.device_id != device.device_id)
                            .cloned(),
                    );
                    inner.saved = saved.clone();
                    (previous, rebind, saved)
                };
                self.shared.publish();

                // 活动设备变更时关闭上一个连接
                if let Some(previous) = previous {
                    debug!("Closing previous connection: {previous}");
                    if let Err(e) = self.shared.platform.close_connection(&previous).await {
                        debug!("close_connection failed: {e}");
                    }
                }

                if let Err(e) = self.shared.store.save(&saved) {
                    warn!("Failed to persist device list: {e}");
                }

                if rebind {
                    self.spawn_disconnect_watcher(device.device_id.clone());
                }
                self.spawn_service_discovery(device.device_id.clone());

                Ok(())
            }
            Err(e) => {
                self.shared.prompt.hide_loading();
                self.shared.prompt.show_tip(TIP_CONNECT_FAILED);
                debug!("create_connection failed: {e}");
                if let Err(close_err) = self
                    .shared
                    .platform
                    .close_connection(&device.device_id)
                    .await
                {
                    debug!("close_connection failed: {close_err}");
                }
                Err(e.into())
            }
        }
    }

    /// 主动断开当前活动连接
    ///
    /// 活动标记清空并向平台发出 close-connection 请求；活动连接表交由
    /// 断开监听在收到平台事件时清理。
    pub async fn close_active(&self) {
        let active = {
            let mut inner = self.shared.inner.lock().unwrap();
            let active = inner.state.active_device_id().map(str::to_owned);
            if active.is_some() {
                inner.state = LinkState::Idle;
            }
            active
        };
        if let Some(device_id) = active {
            self.shared.publish();
            debug!("Closing connection: {device_id}");
            if let Err(e) = self.shared.platform.close_connection(&device_id).await {
                debug!("close_connection failed: {e}");
            }
        }
    }

    /// 监听连接状态，断开时清理活动标记（一次性）
    fn spawn_disconnect_watcher(&self, device_id: String) {
        let shared = self.shared.clone();
        let mut events = shared.platform.events();
        tokio::spawn(async move {
            debug!("Disconnect watcher bound: {device_id}");
            while let Some(event) = events.next().await {
                if let PlatformEvent::ConnectionState {
                    device_id: id,
                    connected: false,
                } = event
                {
                    if id != device_id {
                        continue;
                    }
                    info!("Printer disconnected: {device_id}");
                    {
                        let mut inner = shared.inner.lock().unwrap();
                        inner.live.remove(&device_id);
                        // 断开后不保留活动标记和已选特征值
                        if inner.state.active_device_id() == Some(device_id.as_str()) {
                            inner.state = LinkState::Idle;
                        }
                    }
                    shared.publish();
                    break;
                }
            }
        });
    }

    /// 连接期间把收到的特征值通知按 16 进制记入日志
    fn spawn_value_logger(&self, device_id: String) {
        let mut events = self.shared.platform.events();
        tokio::spawn(async move {
            while let Some(event) = events.next().await {
                match event {
                    PlatformEvent::CharacteristicValue {
                        device_id: id,
                        service_id,
                        characteristic_id,
                        value,
                    } if id == device_id => {
                        debug!(
                            "Characteristic value: service={service_id} characteristic={characteristic_id} len={} hex={}",
                            value.len(),
                            hex(&value)
                        );
                    }
                    PlatformEvent::ConnectionState {
                        device_id: id,
                        connected: false,
                    } if id == device_id => break,
                    _ => {}
                }
            }
        });
    }

    /// 枚举服务并选定第一个可写特征值
    ///
    /// 按上报顺序逐个服务处理，每个服务等待稳定延时后再枚举特征值；
    /// 找到第一个支持 write 的特征值即停止。没有可写特征值时保持静默。
    fn spawn_service_discovery(&self, device_id: String) {
        let shared = self.shared.clone();
        tokio::spawn(async move {
            let services = match shared.platform.device_services(&device_id).await {
                Ok(services) => services,
                Err(e) => {
                    debug!("device_services failed: {e}");
                    if let Err(e) = shared.platform.close_connection(&device_id).await {
                        debug!("close_connection failed: {e}");
                    }
                    return;
                }
            };
            debug!("{} service(s) reported by {device_id}", services.len());

            for service in services {
                // 等服务就绪后再枚举特征值
                time::sleep(shared.options.service_settle).await;

                let characteristics = match shared
                    .platform
                    .device_characteristics(&device_id, service.uuid)
                    .await
                {
                    Ok(characteristics) => characteristics,
                    Err(e) => {
                        debug!("device_characteristics failed for {}: {e}", service.uuid);
                        continue;
                    }
                };

                if let Some(characteristic) =
                    characteristics.iter().find(|c| c.properties.write)
                {
                    let write = WriteCharacteristic {
                        service_id: service.uuid,
                        characteristic_id: characteristic.uuid,
                    };
                    let selected = {
                        let mut inner = shared.inner.lock().unwrap();
                        let active = match &inner.state {
                            LinkState::Connected { printer } | LinkState::Ready { printer, .. }
                                if printer.device.device_id == device_id =>
                            {
                                Some(printer.clone())
                            }
                            _ => None,
                        };
                        match active {
                            Some(printer) => {
                                inner.state = LinkState::Ready { printer, write };
                                true
                            }
                            None => false,
                        }
                    };
                    if selected {
                        info!(
                            "Write characteristic selected: service={} characteristic={}",
                            write.service_id, write.characteristic_id
                        );
                        shared.publish();
                    }
                    return;
                }
            }
        });
    }
}

/// 字节序列转 16 进制字符串
fn hex(value: &[u8]) -> String {
    value.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_hex() {
        assert_eq!(hex(&[0x00, 0x1f, 0xff]), "001fff");
        assert_eq!(hex(&[]), "");
    }

    #[test]
    fn test_link_state_accessors() {
        assert_eq!(LinkState::Idle.active_device_id(), None);
        assert_eq!(LinkState::Idle.write_characteristic(), None);

        let printer = ConnectedPrinter {
            device: PrinterDevice {
                device_id: "A".to_string(),
                name: Some("Printer-A".to_string()),
                local_name: None,
                advertisement: vec![1],
                advertised_services: Vec::new(),
                rssi: None,
            },
            connected: true,
        };
        let write = WriteCharacteristic {
            service_id: Uuid::from_u128(0x1000),
            characteristic_id: Uuid::from_u128(0x2000),
        };

        let connected = LinkState::Connected {
            printer: printer.clone(),
        };
        assert_eq!(connected.active_device_id(), Some("A"));
        assert_eq!(connected.write_characteristic(), None);

        let ready = LinkState::Ready { printer, write };
        assert_eq!(ready.active_device_id(), Some("A"));
        assert_eq!(ready.write_characteristic(), Some(write));
    }
}
