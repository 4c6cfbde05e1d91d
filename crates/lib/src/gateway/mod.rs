mod server;

pub use server::{run_gateway, Gateway};
