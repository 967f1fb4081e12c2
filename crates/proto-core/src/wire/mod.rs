pub mod buffer;
pub mod guid;
