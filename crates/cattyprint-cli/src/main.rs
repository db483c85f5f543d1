//! Cattyprint CLI
//!
//! 命令行客户端：扫描、连接蓝牙热敏打印机并输出选定的可写特征值

mod console;

use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use cattyprint_core::{
    AppSettings, BtleplugPlatform, DeviceStore, FileStore, LinkOptions, PrinterLink,
};

#[derive(Parser)]
#[command(name = "cattyprint", version, about = "蓝牙热敏打印机连接工具")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 扫描附近的打印机
    Scan {
        /// 扫描窗口时长 (秒，默认取配置)
        #[arg(short, long)]
        timeout: Option<u64>,
    },
    /// 连接打印机并选定可写特征值
    Connect {
        /// 目标设备 id 或名称
        device: String,
    },
    /// 查看已连接过的打印机
    Saved,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = AppSettings::load();

    // 初始化日志
    let default_filter = if settings.verbose {
        "debug"
    } else {
        "info,cattyprint_core=debug"
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .try_init();

    match cli.command {
        Commands::Scan { timeout } => scan(settings, timeout).await?,
        Commands::Connect { device } => connect(settings, &device).await?,
        Commands::Saved => saved(&settings)?,
    }

    Ok(())
}

async fn build_link(settings: &AppSettings) -> Result<PrinterLink<BtleplugPlatform>> {
    let platform = BtleplugPlatform::new().await?;
    let store = FileStore::new(settings.device_list_path());
    let options = LinkOptions::from(settings);
    Ok(PrinterLink::new(
        platform,
        store,
        console::ConsolePrompt,
        options,
    ))
}

/// 等待扫描窗口结束
async fn wait_for_scan(link: &PrinterLink<BtleplugPlatform>) {
    let mut snapshots = link.subscribe();
    while snapshots.borrow().searching {
        if snapshots.changed().await.is_err() {
            break;
        }
    }
}

fn print_devices(devices: &[cattyprint_core::PrinterDevice]) {
    if devices.is_empty() {
        println!("   未发现打印机");
    } else {
        for (i, device) in devices.iter().enumerate() {
            println!(
                "   [{}] {} ({})",
                i,
                device.display_name().unwrap_or("<unknown>"),
                device.device_id
            );
        }
    }
}

async fn scan(mut settings: AppSettings, timeout: Option<u64>) -> Result<()> {
    if let Some(secs) = timeout {
        settings.scan_window_ms = secs * 1000;
    }
    let link = build_link(&settings).await?;

    println!("🔍 扫描打印机 ({}s)...", settings.scan_window_ms / 1000);
    link.start_bluetooth().await?;
    wait_for_scan(&link).await;

    print_devices(&link.search_results());
    Ok(())
}

async fn connect(settings: AppSettings, target: &str) -> Result<()> {
    let link = build_link(&settings).await?;

    println!("🔍 扫描打印机...");
    link.start_bluetooth().await?;
    wait_for_scan(&link).await;

    let results = link.search_results();
    let device = results
        .iter()
        .find(|d| d.device_id == target || d.display_name() == Some(target))
        .ok_or_else(|| anyhow::anyhow!("未找到设备: {target}"))?;

    link.connect_device(device).await?;

    // 等待特征值选定
    let mut snapshots = link.subscribe();
    let write = tokio::time::timeout(Duration::from_secs(15), async {
        loop {
            let current = snapshots.borrow().write_characteristic;
            if let Some(write) = current {
                return Some(write);
            }
            if snapshots.changed().await.is_err() {
                return None;
            }
        }
    })
    .await
    .ok()
    .flatten();

    match write {
        Some(write) => println!(
            "✅ 可写特征值: service={} characteristic={}",
            write.service_id, write.characteristic_id
        ),
        None => println!("⚠️  未在该设备上找到可写特征值"),
    }
    Ok(())
}

fn saved(settings: &AppSettings) -> Result<()> {
    let store = FileStore::new(settings.device_list_path());
    let devices = store.load()?;
    println!("📋 已连接过的打印机:");
    print_devices(&devices);
    Ok(())
}
