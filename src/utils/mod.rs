pub mod config;
pub mod output;
pub mod pkcs11_devices;
