pub mod api_client;
pub mod certificate_flow;
pub mod certificate_render;
pub mod config_loader;
pub mod payment_flow;
