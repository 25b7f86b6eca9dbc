//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 本层负责批量处理和并发调度，是整个系统的"指挥中心"。
//!
//! ## 模块划分
//!
//! ### `batch_runner` - 命令行批量运行器
//! - 管理应用生命周期（初始化、运行、统计）
//! - 扫描输入目录中的批次压缩包
//! - 逐个批次交给 BatchOrchestrator，写出汇总压缩包
//!
//! ### `batch_orchestrator` - 批次编排器
//! - 创建批次、检查容量上限
//! - 控制并发数量（全局 Semaphore）
//! - 维护包状态机，支持取消与重试
//! - 提供状态查询与产物下载
//!
//! ### `package_pipeline` - 单个发票包处理器
//! - 从批次压缩包中取出 PDF，构建 Job
//! - 调用 JobFlow 分类、识别、组装
//! - 保存产物并清理工作文件
//!
//! ## 层次关系
//!
//! ```text
//! batch_runner (处理输入目录中的 Vec<批次>)
//!     ↓
//! batch_orchestrator (处理 Vec<发票包>)
//!     ↓
//! package_pipeline (处理单个发票包)
//!     ↓
//! workflow::JobFlow (分类 → 识别 → 组装)
//!     ↓
//! services (能力层：classifier / resolver / assembler)
//!     ↓
//! infrastructure (基础设施：BlobStore / TextExtractor / pdf)
//! ```
//!
//! ## 设计原则
//!
//! 1. **单一职责**：orchestrator 管批次，pipeline 管单个包
//! 2. **资源共享**：工作池在所有批次之间共享
//! 3. **向下依赖**：编排层 → workflow → services → infrastructure
//! 4. **无业务逻辑**：只做调度和状态维护，不做分类判断

pub mod batch_orchestrator;
pub mod batch_runner;
pub mod package_pipeline;

// 重新导出主要类型
pub use batch_orchestrator::BatchOrchestrator;
pub use batch_runner::App;
pub use package_pipeline::PackageOutcome;
