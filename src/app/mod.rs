pub mod display;
pub mod flight;
pub mod setup;

pub use display::{sync_shadow_settings, sync_vsync_settings};
pub use flight::{fly_camera, toggle_flight_pause, FlightPath};
pub use setup::setup;
