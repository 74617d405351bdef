pub mod config;
pub mod io_struct;
pub mod relay;
pub mod server;
pub mod upstream;
pub mod validator;
