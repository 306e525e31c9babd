pub mod connection;
pub mod dispatcher;
pub mod notification_socket;
pub mod protocol;

pub use connection::{Connection, ConnectionState};
pub use dispatcher::{Dispatcher, Session};
pub use notification_socket::NotificationSocket;
pub use protocol::{InboundFrame, NotificationFrame, OutboundFrame};
