mod stream;

pub use stream::SocketStream;
