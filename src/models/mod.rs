pub mod batch;
pub mod category;
pub mod job;
pub mod loaders;
pub mod package;

pub use batch::{
    derive_batch_status, BatchAction, BatchReport, BatchStatus, PackageReport, PackageStatus,
    UploadSlot,
};
pub use category::Category;
pub use job::{IdentifierOverride, Job, Page, SourceDocument};
pub use loaders::{enumerate_packages, load_package_pdfs, UploadedFile};
pub use package::{PackageDescriptor, PackageError, PackageErrorKind, PackageSource};
