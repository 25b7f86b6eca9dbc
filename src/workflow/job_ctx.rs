//! Job 处理上下文
//!
//! 封装"我正在处理哪个批次的哪个包"这一信息，只用于日志

use std::fmt::Display;

/// Job 处理上下文
#[derive(Debug, Clone)]
pub struct JobCtx {
    /// Job ID
    pub job_id: String,

    /// 所属批次（交互式 Job 为空）
    pub batch_id: Option<String>,

    /// 包名（交互式 Job 为空）
    pub package_name: Option<String>,
}

impl JobCtx {
    /// 交互式 Job 的上下文
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            batch_id: None,
            package_name: None,
        }
    }

    /// 批次中某个包的上下文
    pub fn for_package(
        job_id: impl Into<String>,
        batch_id: impl Into<String>,
        package_name: impl Into<String>,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            batch_id: Some(batch_id.into()),
            package_name: Some(package_name.into()),
        }
    }
}

impl Display for JobCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.batch_id, &self.package_name) {
            (Some(batch), Some(package)) => write!(f, "[批次 {} 包 {}]", batch, package),
            _ => write!(f, "[Job {}]", self.job_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(JobCtx::new("abc").to_string(), "[Job abc]");
        assert_eq!(
            JobCtx::for_package("abc", "b1", "FAC_1").to_string(),
            "[批次 b1 包 FAC_1]"
        );
    }
}
