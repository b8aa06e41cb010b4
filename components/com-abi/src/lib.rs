//! 二进制组件接口 ABI 定义
//!
//! 这里只描述调用边界: 接口标识、状态码、统一调用帧和方法表布局,
//! 以及进程内组件共用的 IUnknown 实现。

mod abi;
mod guid;
mod hresult;
pub mod iids;
mod server;

pub use abi::{RawArg, RawObject, RawSlot, RawVTable, frame};
pub use guid::{Guid, GuidError};
pub use hresult::*;
pub use server::{ComServer, ServerObject, add_ref, query_interface, ref_count, release};
