//! 用户提示回调
//!
//! 宿主端的模态弹窗/加载提示收敛为一个回调接口，由外层 UI 决定如何
//! 呈现。编排层只在一次性提示的场合调用，不依赖返回值。

use std::sync::Arc;

use tokio::sync::mpsc;

/// 提示回调
pub trait PromptCallback: Send + Sync {
    /// 一次性提示（对应模态弹窗）
    fn show_tip(&self, message: &str);
    /// 显示加载中
    fn show_loading(&self, title: &str);
    /// 隐藏加载中
    fn hide_loading(&self);
}

impl<C: PromptCallback + ?Sized> PromptCallback for Arc<C> {
    fn show_tip(&self, message: &str) {
        (**self).show_tip(message);
    }

    fn show_loading(&self, title: &str) {
        (**self).show_loading(title);
    }

    fn hide_loading(&self) {
        (**self).hide_loading();
    }
}

/// 不做任何呈现的实现
#[derive(Debug, Default, Clone, Copy)]
pub struct NullPrompt;

impl PromptCallback for NullPrompt {
    fn show_tip(&self, _message: &str) {}
    fn show_loading(&self, _title: &str) {}
    fn hide_loading(&self) {}
}

/// 提示事件
#[derive(Debug, Clone, PartialEq)]
pub enum PromptEvent {
    Tip(String),
    Loading(String),
    LoadingDone,
}

/// 简化的提示回调实现，把提示转成事件队列
pub struct SimplePromptCallback {
    tx: mpsc::Sender<PromptEvent>,
}

impl SimplePromptCallback {
    pub fn new() -> (Self, mpsc::Receiver<PromptEvent>) {
        let (tx, rx) = mpsc::channel(32);
        (Self { tx }, rx)
    }
}

impl PromptCallback for SimplePromptCallback {
    fn show_tip(&self, message: &str) {
        let _ = self.tx.try_send(PromptEvent::Tip(message.to_string()));
    }

    fn show_loading(&self, title: &str) {
        let _ = self.tx.try_send(PromptEvent::Loading(title.to_string()));
    }

    fn hide_loading(&self) {
        let _ = self.tx.try_send(PromptEvent::LoadingDone);
    }
}
