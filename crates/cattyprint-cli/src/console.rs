//! 控制台提示输出
//!
//! 把编排层的模态提示映射为终端输出。

use cattyprint_core::PromptCallback;

pub struct ConsolePrompt;

impl PromptCallback for ConsolePrompt {
    fn show_tip(&self, message: &str) {
        println!("💬 {message}");
    }

    fn show_loading(&self, title: &str) {
        println!("⏳ {title}");
    }

    fn hide_loading(&self) {}
}
