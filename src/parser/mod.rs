//! Binary parsers for raw datagram files and segment containers

mod header_parser;
pub mod raw_parser;
mod segment_parser;

// Re-export the parsing functions
pub use header_parser::{parse_channel_id, parse_raw_channel, parse_raw_header, parse_segment_header};
pub use raw_parser::{encode_datagram, parse_datagram};
pub use segment_parser::{PingTable, parse_channel_table, parse_f64_block, parse_pings};
