use std::io;
use std::net::SocketAddr;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("malformed OpenFlow message: {0}")]
    Codec(String),

    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("unsupported OpenFlow version {peer:#04x}")]
    UnsupportedVersion { peer: u8 },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("cannot bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
