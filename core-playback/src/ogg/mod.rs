//! Ogg container layer: page framing, CRC and packet reassembly.

pub mod crc;
pub mod packet;
pub mod page;

pub use packet::{OggPacket, PacketReader, PageInfo, MAX_PACKET_LEN};
pub use page::{read_page, HeaderType, Page, PageError, PageHeader, PageRead, MAX_PAGE_LEN};
