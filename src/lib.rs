pub mod backend;
pub mod camera;
pub mod color;
pub mod config;
pub mod context;
pub mod frame_driver;
pub mod generation;
pub mod gpu;
pub mod history;
pub mod idle;
pub mod input;
pub mod loader;
pub mod orbit;
pub mod params;
pub mod payload;
pub mod post_processing;
pub mod primitives;
pub mod reclaimer;
pub mod resources;
pub mod scene_graph;
pub mod stage;
pub mod surface;
pub mod view_bridge;
pub mod view_settings;
pub mod visualiser;

// Script host
pub mod script_api;
pub mod script_diagnostics;
pub mod script_log;
pub mod scripting;

#[cfg(not(target_arch = "wasm32"))]
pub mod cli;
#[cfg(not(target_arch = "wasm32"))]
pub mod viewer;

#[cfg(target_arch = "wasm32")]
pub mod wasm;
