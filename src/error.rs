use thiserror::Error;

/// Possible errors for the package.
#[derive(Error, Debug)]
pub enum SampError {
    /// Returned if the host is not a dotted-quad IPv4 literal. The packet
    /// header embeds the raw address octets, so hostnames must be resolved
    /// before a client is built.
    #[error("invalid server address: {0}")]
    InvalidAddress(String),
    /// The socket could not be opened or the handshake probe went
    /// unanswered. Clients record this in their connection state instead of
    /// returning it.
    #[error("cannot connect to server")]
    ConnectionFailed(#[source] std::io::Error),
    /// Internal error used if the socket is open but a datagram could not be
    /// sent. Never fatal: the operation carries on to its receive phase.
    #[error("cannot send packet to server")]
    SendFailed(#[source] std::io::Error),
    /// Returned if a decode step needed more bytes than the reply carried.
    #[error("response truncated (needed {needed} bytes, {available} available)")]
    TruncatedResponse { needed: usize, available: usize },
    /// Returned if the reply is complete but carries a value the protocol
    /// treats as an anomaly, such as an empty hostname.
    #[error("malformed response: {0}")]
    MalformedResponse(&'static str),
    /// Returned if the development server cannot bind its socket.
    #[error("cannot bind server socket")]
    BindError(#[source] std::io::Error),
}
