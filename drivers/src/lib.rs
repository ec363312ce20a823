//! Applications on top of `pipenet` connections
//!
//! - `echo`: copy a connection's input back to its output
//! - `relay`: join a connection with local input and output streams
//! - `http`: a fixed "Hello World" HTTP/1.1 server and a keep-alive client, on `hyper`

pub mod echo;
pub mod error;
pub mod http;
pub mod relay;
pub mod server;

pub use echo::{echo, run_echo_server};
pub use error::DriverError;
pub use http::{
    http_get, serve_hello, HttpClient, HttpError, HttpResponse, MAX_BODY_SIZE, MAX_HEAD_SIZE,
};
pub use relay::{relay, RelayStats};
pub use server::{serve, ServerReport, ACCEPT_BACKOFF_MAX, ACCEPT_BACKOFF_MIN};
