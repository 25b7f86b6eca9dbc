//! # Tipificador
//!
//! 发票支持文件（PDF）的自动分类与打包
//!
//! ## 架构设计
//!
//! 本系统采用严格的四层架构：
//!
//! ### ① 基础设施层（Infrastructure）
//! - `infrastructure/` - 持有外部资源，只暴露能力
//! - `BlobStore` - 源文件与产物存储（内存 / 本地磁盘）
//! - `TextExtractor` - 页面 → 文本，带超时
//! - `pdf` - 页数统计与按页重组
//!
//! ### ② 业务能力层（Services）
//! - `services/` - 描述"我能做什么"
//! - `PageClassifier` - 文本 → CRC / FEV / HEV / OPF / PDE
//! - `IdentifierResolver` - 从 FEV 中识别 NIT 与发票号
//! - `ArchiveAssembler` - 按分类生成 PDF 并打包
//! - `JobService` - 交互式单张发票流程
//!
//! ### ③ 流程层（Workflow）
//! - `workflow/` - 定义"一张发票"的完整处理流程
//! - `JobCtx` - 上下文封装（job_id + 批次 + 包名）
//! - `JobFlow` - 流程编排（分类 → 识别 → 组装）
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/batch_orchestrator` - 批次状态机与全局工作池
//! - `orchestrator/package_pipeline` - 单个发票包处理器
//! - `orchestrator/batch_runner` - 命令行批量运行器
//!
//! ## 模块结构

pub mod config;
pub mod error;
pub mod infrastructure;

pub mod models;
pub mod orchestrator;
pub mod services;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use config::Config;
pub use error::{AppError, AppResult};
pub use infrastructure::{BlobStore, LocalBlobStore, MemoryBlobStore, PdfTextExtractor, TextExtractor};
pub use models::{BatchReport, BatchStatus, Category, PackageStatus, UploadedFile};
pub use orchestrator::{App, BatchOrchestrator};
pub use services::{JobService, PageClassifier, ProcessRequest};
pub use workflow::{JobCtx, JobFlow, ProcessOutcome};
