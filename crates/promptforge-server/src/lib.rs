mod http;
pub mod sse;
pub mod state;
pub mod wire;

pub use http::serve;
pub use state::AppState;
