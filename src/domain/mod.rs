//! Value types of the EBICS protocol and the ports the engine talks through.

pub mod identity;
pub mod keyring;
pub mod order;
pub mod ports;
pub mod protocol;
pub mod return_code;
pub mod transaction;
