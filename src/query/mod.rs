pub mod algebra;
pub mod aggregate;
