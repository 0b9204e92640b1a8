//! Frame capture to PNG.
//!
//! Hosts push output paths onto a [`CaptureQueue`]; the backend pops one per
//! rendered frame, reads the frame back and writes it to disk.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::rc::Rc;

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("failed to map readback buffer: {0}")]
    Map(#[from] wgpu::BufferAsyncError),
    #[error("readback callback never fired")]
    Channel,
    #[error("failed to write image: {0}")]
    Image(#[from] image::ImageError),
}

#[derive(Debug, Default)]
struct CaptureState {
    pending: VecDeque<PathBuf>,
    saved: Vec<PathBuf>,
    failed: usize,
}

/// Shared between the host that requests captures and the backend that
/// fulfils them.
#[derive(Debug, Clone, Default)]
pub struct CaptureQueue {
    inner: Rc<RefCell<CaptureState>>,
}

impl CaptureQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Capture the next rendered frame to `path`.
    pub fn request(&self, path: impl Into<PathBuf>) {
        self.inner.borrow_mut().pending.push_back(path.into());
    }

    pub fn is_pending(&self) -> bool {
        !self.inner.borrow().pending.is_empty()
    }

    pub fn saved(&self) -> Vec<PathBuf> {
        self.inner.borrow().saved.clone()
    }

    pub fn failed(&self) -> usize {
        self.inner.borrow().failed
    }

    pub(crate) fn next(&self) -> Option<PathBuf> {
        self.inner.borrow_mut().pending.pop_front()
    }

    pub(crate) fn finish(&self, path: PathBuf, result: Result<(), CaptureError>) {
        let mut state = self.inner.borrow_mut();
        match result {
            Ok(()) => {
                log::info!("Saved frame to {}", path.display());
                state.saved.push(path);
            }
            Err(e) => {
                log::error!("Failed to capture frame to {}: {}", path.display(), e);
                state.failed += 1;
            }
        }
    }
}

/// A render target that can be copied back to the CPU.
pub struct OffscreenTarget {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub width: u32,
    pub height: u32,
    pub format: wgpu::TextureFormat,
}

impl OffscreenTarget {
    pub fn new(device: &wgpu::Device, width: u32, height: u32, format: wgpu::TextureFormat) -> Self {
        let width = width.max(1);
        let height = height.max(1);
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Offscreen Target"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self {
            texture,
            view,
            width,
            height,
            format,
        }
    }
}

/// Bytes per row rounded up to the copy alignment.
pub fn padded_bytes_per_row(width: u32) -> u32 {
    let unpadded = width * 4;
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    unpadded + (align - unpadded % align) % align
}

/// Strip row padding and reorder BGRA to RGBA when needed.
pub fn unpad_rows(data: &[u8], width: u32, height: u32, bgra: bool) -> Vec<u8> {
    let padded = padded_bytes_per_row(width) as usize;
    let row = (width * 4) as usize;
    let mut out = Vec::with_capacity(row * height as usize);
    for y in 0..height as usize {
        let start = y * padded;
        out.extend_from_slice(&data[start..start + row]);
    }
    if bgra {
        for pixel in out.chunks_exact_mut(4) {
            pixel.swap(0, 2);
        }
    }
    out
}

/// Copy `target` to the CPU and write it as a PNG.
pub fn save_target(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    target: &OffscreenTarget,
    path: &Path,
) -> Result<(), CaptureError> {
    let bytes_per_row = padded_bytes_per_row(target.width);
    let buffer = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("Capture Readback Buffer"),
        size: (bytes_per_row * target.height) as wgpu::BufferAddress,
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("Capture Encoder"),
    });
    encoder.copy_texture_to_buffer(
        wgpu::ImageCopyTexture {
            texture: &target.texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        wgpu::ImageCopyBuffer {
            buffer: &buffer,
            layout: wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(bytes_per_row),
                rows_per_image: Some(target.height),
            },
        },
        wgpu::Extent3d {
            width: target.width,
            height: target.height,
            depth_or_array_layers: 1,
        },
    );
    queue.submit(Some(encoder.finish()));

    let slice = buffer.slice(..);
    let (tx, rx) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = tx.send(result);
    });
    device.poll(wgpu::Maintain::Wait);
    rx.recv().map_err(|_| CaptureError::Channel)??;

    let bgra = matches!(
        target.format,
        wgpu::TextureFormat::Bgra8Unorm | wgpu::TextureFormat::Bgra8UnormSrgb
    );
    let pixels = {
        let data = slice.get_mapped_range();
        unpad_rows(&data, target.width, target.height, bgra)
    };
    buffer.unmap();

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if let Err(e) = std::fs::create_dir_all(parent) {
            return Err(CaptureError::Image(image::ImageError::IoError(e)));
        }
    }
    image::save_buffer(
        path,
        &pixels,
        target.width,
        target.height,
        image::ColorType::Rgba8,
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_padded_rows() {
        assert_eq!(padded_bytes_per_row(64), 256);
        assert_eq!(padded_bytes_per_row(65), 512);
        assert_eq!(padded_bytes_per_row(1), 256);
    }

    #[test]
    fn test_unpad_swaps_bgra() {
        let mut data = vec![0u8; 256 * 2];
        data[0..4].copy_from_slice(&[1, 2, 3, 4]);
        data[256..260].copy_from_slice(&[5, 6, 7, 8]);

        assert_eq!(unpad_rows(&data, 1, 2, false), vec![1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(unpad_rows(&data, 1, 2, true), vec![3, 2, 1, 4, 7, 6, 5, 8]);
    }

    #[test]
    fn test_capture_queue_order() {
        let queue = CaptureQueue::new();
        let host = queue.clone();
        host.request("a.png");
        host.request("b.png");
        assert!(queue.is_pending());
        assert_eq!(queue.next(), Some(PathBuf::from("a.png")));

        queue.finish(PathBuf::from("a.png"), Ok(()));
        queue.finish(PathBuf::from("b.png"), Err(CaptureError::Channel));
        assert_eq!(host.saved(), vec![PathBuf::from("a.png")]);
        assert_eq!(host.failed(), 1);
    }
}
