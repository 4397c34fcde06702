pub mod server;

pub use server::{handle_request_line, run_stdio_server};
