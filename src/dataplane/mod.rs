//! Data plane components.
//!
//! Handles packet processing: parsing, ICMP dispatch, neighbor discovery,
//! flow tracking, and transmission.

mod flow;
mod gateway;
mod icmp_handler;
mod ndp_processor;
mod neighbor_table;
mod packet;
mod port;
mod transport;

pub use flow::{FlowEntry, FlowKey, FlowProtocol, FlowStore};
pub use gateway::{Gateway, PassThrough, Translator};
pub use icmp_handler::{classify, AddressClass, DispatchSettings, Disposition, IcmpDispatcher};
pub use ndp_processor::{NdpHandler, NeighborDiscovery};
pub use neighbor_table::{NeighborState, NeighborTable};
pub use packet::{ChecksumPolicy, Packet, TxOffload};
pub use port::{
    link_local_from_mac, solicited_node, Port, PortIndex, PortRole, Subnet4, Subnet6,
};
pub use transport::{hex_dump, PacketTransport, QueueTransport, TxFrame};
