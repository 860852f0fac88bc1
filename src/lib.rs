#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod handler;
mod nginx;
mod resolve;
mod status_writer;
mod watch;

pub use self::handler::{EventHandler, SharedHandler};
pub use self::nginx::{FileSystemConfigurer, NginxConfigurer, NginxGenerator};
pub use self::resolve::EndpointSliceResolver;
pub use self::status_writer::StatusWriter;
pub use self::watch::CaptureIndex;

pub use nginx_gateway_controller_k8s_api as k8s;
pub use nginx_gateway_controller_k8s_state as state;
pub use nginx_gateway_controller_k8s_status as status;
