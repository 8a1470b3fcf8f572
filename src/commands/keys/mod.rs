//! Key management commands.
//!
//! Provides commands for creating, importing, inspecting and removing keys
//! stored on the token.

pub mod address;
pub mod checksum;
pub mod generate;
pub mod import;
pub mod purge;

pub use address::AddressCommand;
pub use checksum::ChecksumCommand;
pub use generate::GenerateKeyPairCommand;
pub use import::ImportKeyCommand;
pub use purge::DeleteAllExceptCommand;
