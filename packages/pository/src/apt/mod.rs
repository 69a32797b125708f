//! Synthesis of the apt wire documents: `Packages` and `Release`.

pub mod packages_index;
pub mod release;

pub use packages_index::PackagesIndex;
pub use release::ReleaseFile;
