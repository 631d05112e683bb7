//! SSTP packet framing (spec.md §4.1, "SSTP packet").

mod attribute;
mod message;
mod packet;

pub use attribute::{Attribute, CryptoBindingBody, CryptoBindingRequestBody};
pub use message::SstpMessageType;
pub use packet::{ControlPacket, PacketType, SstpPacket};
