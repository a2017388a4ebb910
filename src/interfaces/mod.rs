pub mod record;
pub mod xml;
