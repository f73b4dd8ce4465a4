//! 数据模型

mod enums;
mod order;

pub use enums::*;
pub use order::*;
