//! 业务能力层：分类、标识符解析、归档组装与 Job 生命周期
//!
//! 只提供能力，不关心批次调度。

pub mod archive_assembler;
pub mod identifier_resolver;
pub mod job_service;
pub mod page_classifier;

pub use archive_assembler::{ArchiveAssembler, ConsolidatedEntry, JobArchive};
pub use identifier_resolver::{IdentifierResolver, ResolvedIdentifiers};
pub use job_service::{JobCreated, JobService, ProcessRequest};
pub use page_classifier::{creation_date, Classification, PageClassifier};
