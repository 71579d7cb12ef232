pub mod fs;
pub mod http_client;
pub mod output;

pub use http_client::{build_http_client, install_rustls_provider};
pub use output::{OutputPaths, allocate_output_paths};
