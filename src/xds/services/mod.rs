mod ads;
mod discovery;
pub mod stream;

pub use ads::AggregatedDiscoveryServiceImpl;
pub use discovery::FamilyDiscoveryService;
pub use stream::{fetch_response, run_stream};
