mod bits;
pub mod config;
mod error;
pub mod firewall;
pub mod firewall_switch;
pub mod flow_installer;
pub mod logging;
pub mod mac_table;
pub mod ofp_controller;
pub mod ofp_header;
pub mod ofp_message;
pub mod openflow0x04;
pub mod packet;
pub mod session;

pub use error::{Error, Result};
