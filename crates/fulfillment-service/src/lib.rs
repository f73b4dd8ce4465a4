//! 订单履约服务
//!
//! 负责订单发货后的生命周期对账：定时从承运商同步物流轨迹、映射为内部状态、
//! 通知买家，并在取消、退回、丢件时通过支付网关自动退款。

pub mod carrier;
pub mod dto;
pub mod error;
pub mod gateway;
pub mod handlers;
pub mod models;
pub mod notification;
pub mod refund;
pub mod repository;
pub mod routes;
pub mod state;
pub mod status_mapper;
pub mod sync;

pub use error::{FulfillmentError, Result};
