//! P2P Networking
//!
//! Uses libp2p gossipsub as the session's publish/subscribe channel.

mod behaviour;
mod session_code;

pub use behaviour::{
    NetworkCommand, NetworkConfig, NetworkError, NetworkEvent, NetworkHandle, NetworkManager,
};
pub use session_code::SessionCode;
