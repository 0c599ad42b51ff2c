pub mod client;

pub use client::{MdnsClient, MdnsResponse, MDNS_GROUP, MDNS_PORT};
