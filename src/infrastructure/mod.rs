pub mod codec;
pub mod crypto;
pub mod http;
pub mod in_memory;
