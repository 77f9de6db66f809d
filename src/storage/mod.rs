pub mod header;
pub mod codec;
pub mod segment;
pub mod layout;
