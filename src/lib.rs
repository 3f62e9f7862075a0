//! An embeddable, event-driven HTTP/1.1 server library.
//!
//! All output produced while handling a data event is corked into a single
//! kernel write, idle connections are force-closed after a fixed timeout,
//! and a connection can be handed over to another protocol (e.g. WebSocket)
//! mid-request.

pub mod codec;
pub mod connection;
pub mod context;
pub mod protocol;
pub mod router;
pub mod server;

pub use connection::{Connection, CorkStream, SocketProtocol, TlsConfig, Transport};
pub use context::{DataOutcome, HttpContext, IDLE_TIMEOUT};
pub use protocol::{HttpRequest, HttpResponse, ParseError, RequestHead};
pub use server::{ListenError, ListenOptions, Listener, TcpTransport};

pub(crate) use help::ensure;

mod help {

    macro_rules! ensure {
        ($predicate:expr, $error:expr) => {
            if !$predicate {
                return Err($error);
            }
        };
    }
    pub(crate) use ensure;
}
