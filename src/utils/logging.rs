use anyhow::Result;
/// 日志工具模块
///
/// 提供日志初始化、日志文件和输出格式化的辅助函数
use std::fs;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// 初始化 tracing 订阅器
///
/// `RUST_LOG` 优先；否则默认 `info`，verbose 时为 `debug`。重复调用不会报错。
pub fn init(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// 初始化日志文件
///
/// # 参数
/// - `log_file_path`: 日志文件路径
pub fn init_log_file(log_file_path: &str) -> Result<()> {
    let log_header = format!(
        "{}\n发票支持文件分类日志 - {}\n{}\n\n",
        "=".repeat(60),
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
        "=".repeat(60)
    );
    fs::write(log_file_path, log_header)?;
    Ok(())
}

/// 记录程序启动信息
///
/// # 参数
/// - `max_concurrent`: 工作池大小
/// - `package_cap`: 每个批次的包数量上限
pub fn log_startup(max_concurrent: usize, package_cap: usize) {
    info!("{}", "=".repeat(60));
    info!("🚀 程序启动 - 批量发票分类模式");
    info!("📊 工作池大小: {}", max_concurrent);
    info!("📦 每批次最多 {} 个发票包", package_cap);
    info!("{}", "=".repeat(60));
}

/// 记录批次文件扫描结果
pub fn log_batches_found(total: usize, input_folder: &str) {
    info!("✓ 在 {} 中找到 {} 个批次压缩包", input_folder, total);
}

/// 记录批次开始信息
///
/// # 参数
/// - `batch_num`: 第几个批次（从 1 开始）
/// - `total_batches`: 批次总数
/// - `batch_id`: 批次 ID
/// - `packages`: 批次中的包数量
pub fn log_batch_start(batch_num: usize, total_batches: usize, batch_id: &str, packages: usize) {
    info!("\n{}", "=".repeat(60));
    info!("📦 开始处理第 {}/{} 批 ({})", batch_num, total_batches, batch_id);
    info!("📄 本批发票包: {} 个", packages);
    info!("{}", "=".repeat(60));
}

/// 记录批次完成信息
///
/// # 参数
/// - `batch_id`: 批次 ID
/// - `status`: 批次最终状态
/// - `done`: 成功的包数量
/// - `total`: 包总数
pub fn log_batch_complete(batch_id: &str, status: &str, done: usize, total: usize) {
    info!("\n{}", "─".repeat(60));
    info!("✓ 批次 {} 结束 [{}]: 成功 {}/{}", batch_id, status, done, total);
    info!("{}", "─".repeat(60));
}

/// 打印最终统计信息
///
/// # 参数
/// - `success`: 成功的包数量
/// - `failed`: 失败的包数量
/// - `total`: 包总数
/// - `log_file_path`: 日志文件路径
pub fn print_final_stats(success: usize, failed: usize, total: usize, log_file_path: &str) {
    info!("\n{}", "=".repeat(60));
    info!("📊 全部处理完成统计");
    info!(
        "完成时间: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    info!("{}", "=".repeat(60));
    info!("✅ 成功: {}/{}", success, total);
    info!("❌ 失败: {}", failed);
    info!("{}", "=".repeat(60));
    info!("\n日志已保存至: {}", log_file_path);
}

/// 截断长文本用于日志显示
///
/// # 参数
/// - `text`: 原始文本
/// - `max_len`: 最大字符数
///
/// # 返回
/// 返回截断后的文本（换行替换为空格）
pub fn truncate_text(text: &str, max_len: usize) -> String {
    let flat = text.replace(['\r', '\n'], " ");
    if flat.chars().count() > max_len {
        flat.chars().take(max_len).collect::<String>() + "..."
    } else {
        flat
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_text() {
        assert_eq!(truncate_text("historia\nclinica", 100), "historia clinica");
        assert_eq!(truncate_text("atención", 4), "aten...");
    }

    #[test]
    fn test_init_is_idempotent() {
        init(false);
        init(true);
    }
}
