pub mod http;
pub mod mock;
pub mod traits;

pub use http::HttpTransport;
pub use mock::MockTransport;
pub use traits::*;
