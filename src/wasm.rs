use std::cell::RefCell;
use std::rc::Rc;

use serde::Serialize;
use wasm_bindgen::prelude::*;
use web_sys::HtmlCanvasElement;

use crate::config::RuntimeConfig;
use crate::frame_driver::{FrameRequest, FrameScheduler};
use crate::generation::{parse_generated, GENERATION_FAILED_MESSAGE};
use crate::gpu::backends::SurfaceBackend;
use crate::input::PointerButton;
use crate::params::ParamValue;
use crate::payload::SharedBundle;
use crate::surface::{Dimensions, HostSurface};
use crate::view_settings::ViewSettings;
use crate::visualiser::Visualiser;

/// Frame requests answered by the page's `requestAnimationFrame` loop.
///
/// The page calls [`WasmVisualiser::frame`] from its rAF callback; the
/// scheduler only remembers which request that call satisfies.
#[derive(Debug, Default)]
pub struct JsScheduler {
    next_id: u64,
    pending: Option<FrameRequest>,
}

impl FrameScheduler for JsScheduler {
    fn request_frame(&mut self) -> FrameRequest {
        self.next_id += 1;
        let request = FrameRequest(self.next_id);
        self.pending = Some(request);
        request
    }

    fn cancel_frame(&mut self, request: FrameRequest) {
        if self.pending == Some(request) {
            self.pending = None;
        }
    }
}

#[wasm_bindgen]
pub struct WasmVisualiser {
    inner: Rc<RefCell<Visualiser<JsScheduler>>>,
}

#[wasm_bindgen]
pub fn init_panic_hook() {
    console_error_panic_hook::set_once();
    let _ = console_log::init_with_level(log::Level::Info);
}

/// Message shown when generating a payload fails.
#[wasm_bindgen]
pub fn generation_failed_message() -> String {
    GENERATION_FAILED_MESSAGE.to_string()
}

fn to_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "null".to_string())
}

fn js_error(err: impl std::fmt::Display) -> JsValue {
    JsValue::from_str(&err.to_string())
}

#[wasm_bindgen]
impl WasmVisualiser {
    #[wasm_bindgen(constructor)]
    pub fn new() -> Result<WasmVisualiser, JsValue> {
        Err(JsValue::from_str("Use the create_visualiser async constructor"))
    }

    /// Run the pending frame. Call from `requestAnimationFrame` with its
    /// timestamp in milliseconds. Returns whether another frame is wanted.
    pub fn frame(&self, timestamp_ms: f64) -> bool {
        let mut inner = self.inner.borrow_mut();
        if let Some(request) = inner.scheduler_mut().pending.take() {
            inner.on_frame(request, timestamp_ms / 1000.0);
        }
        inner.driver().is_running()
    }

    /// Redraw without advancing the animation, e.g. after orbiting a halted payload.
    pub fn redraw(&self) {
        let mut inner = self.inner.borrow_mut();
        if inner.context().is_disposed() {
            return;
        }
        if let Err(e) = inner.context_mut().render() {
            log::warn!("Redraw failed: {}", e);
        }
    }

    /// Record a freshly generated payload in history and show it.
    /// Returns the install report as JSON.
    pub fn load_payload(&self, json: &str) -> Result<String, JsValue> {
        let payload = parse_generated(json).map_err(|e| {
            log::error!("{}", e);
            JsValue::from_str(GENERATION_FAILED_MESSAGE)
        })?;
        let mut inner = self.inner.borrow_mut();
        let stored = inner.history_mut().add(payload).clone();
        inner.activate(stored).map(to_json).map_err(js_error)
    }

    /// Show a shared bundle (`{ v, p, c }`) with its parameters and settings.
    pub fn load_bundle(&self, json: &str) -> Result<String, JsValue> {
        let bundle = SharedBundle::from_json(json).map_err(js_error)?;
        let mut inner = self.inner.borrow_mut();
        inner.activate_bundle(bundle).map(to_json).map_err(js_error)
    }

    pub fn activate_history(&self, id: &str) -> Result<String, JsValue> {
        let mut inner = self.inner.borrow_mut();
        inner.activate_history(id).map(to_json).map_err(js_error)
    }

    pub fn return_to_idle(&self) -> Result<String, JsValue> {
        let mut inner = self.inner.borrow_mut();
        inner.return_to_idle().map(to_json).map_err(js_error)
    }

    pub fn set_parameter(&self, id: &str, value: f32) -> bool {
        self.inner
            .borrow_mut()
            .set_parameter(id, ParamValue::Number(value))
    }

    pub fn set_toggle(&self, id: &str, value: bool) -> bool {
        self.inner
            .borrow_mut()
            .set_parameter(id, ParamValue::Bool(value))
    }

    /// Replace the view settings. Returns the applied changes as JSON.
    pub fn set_view_settings(&self, json: &str) -> Result<String, JsValue> {
        let settings: ViewSettings = serde_json::from_str(json).map_err(js_error)?;
        let changes = self.inner.borrow_mut().set_view_settings(settings);
        Ok(to_json(&changes))
    }

    pub fn view_settings(&self) -> String {
        to_json(self.inner.borrow().settings())
    }

    pub fn parameters(&self) -> String {
        to_json(&self.inner.borrow().parameters())
    }

    pub fn history(&self) -> String {
        to_json(self.inner.borrow().history())
    }

    /// Bundle for a share link, or `undefined` while idle.
    pub fn share(&self) -> Option<String> {
        self.inner
            .borrow()
            .share()
            .and_then(|bundle| bundle.to_json().ok())
    }

    /// Diagnostics of the last install plus any animation halt, as JSON.
    pub fn diagnostics(&self) -> String {
        let inner = self.inner.borrow();
        #[derive(Serialize)]
        struct Diagnostics<'a> {
            install: Option<&'a crate::loader::InstallReport>,
            halted: Option<&'a crate::script_diagnostics::ScriptDiagnostic>,
        }
        to_json(&Diagnostics {
            install: inner.last_report(),
            halted: inner.halted(),
        })
    }

    pub fn resize(&self, width: u32, height: u32, pixel_ratio: f32) {
        self.inner.borrow_mut().resize(Dimensions {
            width: width.max(1),
            height: height.max(1),
            pixel_ratio,
        });
    }

    /// `button` follows `MouseEvent.button`: 0 primary, 1 middle, 2 secondary.
    pub fn pointer_down(&self, button: u32, x: f32, y: f32) {
        let button = match button {
            0 => PointerButton::Primary,
            1 => PointerButton::Middle,
            _ => PointerButton::Secondary,
        };
        self.inner.borrow_mut().pointer_down(button, x, y);
    }

    pub fn pointer_up(&self) {
        self.inner.borrow_mut().pointer_up();
    }

    pub fn pointer_move(&self, x: f32, y: f32) {
        self.inner.borrow_mut().pointer_move(x, y);
    }

    pub fn wheel(&self, delta_y: f32) {
        self.inner.borrow_mut().wheel(delta_y);
    }

    pub fn unmount(&self) {
        self.inner.borrow_mut().unmount();
    }
}

#[wasm_bindgen]
pub async fn create_visualiser(
    canvas: HtmlCanvasElement,
    config_json: Option<String>,
) -> Result<WasmVisualiser, JsValue> {
    init_panic_hook();

    let config = match config_json {
        Some(json) => RuntimeConfig::from_json(&json).map_err(js_error)?,
        None => RuntimeConfig::default(),
    };

    let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
        backends: wgpu::Backends::all(),
        dx12_shader_compiler: Default::default(),
        flags: wgpu::InstanceFlags::default(),
        gles_minor_version: wgpu::Gles3MinorVersion::Automatic,
    });

    let width = canvas.width().max(1);
    let height = canvas.height().max(1);
    let target = wgpu::SurfaceTarget::Canvas(canvas);
    let surface = instance.create_surface(target).map_err(js_error)?;
    let (adapter, device, queue) = crate::gpu::request_device(
        &instance,
        Some(&surface),
        wgpu::Limits::downlevel_webgl2_defaults(),
    )
    .await
    .map_err(js_error)?;

    let backend =
        SurfaceBackend::new(surface, &adapter, device, queue, width, height).map_err(js_error)?;
    let pixel_ratio = web_sys::window()
        .map(|w| w.device_pixel_ratio() as f32)
        .unwrap_or(1.0);
    let host = HostSurface::new(Dimensions {
        width,
        height,
        pixel_ratio,
    });
    let visualiser = Visualiser::new(host, Box::new(backend), JsScheduler::default(), config);

    Ok(WasmVisualiser {
        inner: Rc::new(RefCell::new(visualiser)),
    })
}
