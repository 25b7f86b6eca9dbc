pub mod batch_loader;

pub use batch_loader::{enumerate_packages, load_package_pdfs, UploadedFile};
