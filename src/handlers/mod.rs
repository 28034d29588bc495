pub mod download_handlers;
