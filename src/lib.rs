pub mod carve;
pub mod container;
pub mod crypto;

pub use carve::{carve_file, CarveError, CarveOptions, CarveReport, CarvedRegion, RepairedImage};
pub use container::{DecodeOptions, Kdb, KdbEntry, KdbError, KdbWriter};
pub use crypto::CryptoError;
