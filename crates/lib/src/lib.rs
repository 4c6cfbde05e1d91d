//! mysgw core library — wire codec, transports, dispatcher and gateway
//! coordinator for bridging MySensors device networks to a home-automation
//! controller.

pub mod bus;
pub mod config;
pub mod consts;
pub mod controller;
pub mod counters;
pub mod dispatch;
pub mod gateway;
pub mod inclusion;
pub mod message;
pub mod status;
