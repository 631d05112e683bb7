//! PPP framing as carried inside an SSTP DATA packet (spec.md §4.1, "PPP frame").

mod frame;
mod option;

pub use frame::{ControlFrame, PppProtocol, UnrecognizedFrame, HDLC_HEADER};
pub use option::RawOption;
