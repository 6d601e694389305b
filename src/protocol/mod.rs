//! Protocol module for decoding logger payloads.
//!
//! This module contains the implementations for:
//! - Stored-record parsing (sync data-switch notifications)
//! - Broadcast service-data parsing
//! - Live characteristic parsing

pub mod broadcast;
pub mod live;
pub mod records;

pub use broadcast::{parse_broadcast, parse_service_data};
pub use records::{
    encode_stored_record, parse_stored_hex, parse_stored_records, parse_stored_records_with,
    RecordClock,
};
