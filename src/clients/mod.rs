mod client;
pub use client::{Claim, Client};

mod blocking_client;
pub use blocking_client::BlockingClient;
