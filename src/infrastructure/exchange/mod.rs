pub mod http;
pub mod mock;

pub use http::HttpExchangeClient;
pub use mock::MockExchangeClient;
