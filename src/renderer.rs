// renderer.rs - wgpu-side GPU state: pipeline, equirect texture, draw

use glam::Mat3;
use wgpu::util::DeviceExt;
use winit::window::Window;

use crate::loader::SourceImage;
use crate::view::ViewSnapshot;

/// Quad vertex. Texture coordinates intentionally span [0, 2], not [0, 1];
/// the projection math depends on that buffer range, so it must not be
/// normalized away.
#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct Vertex {
    position: [f32; 2],
    tex_coords: [f32; 2],
}

// Triangle strip: bottom-left, bottom-right, top-left, top-right.
//
// The quad is oversized so the viewport shows exactly the centered [0,1]²
// sub-range of the [0,2] texcoord span: u falls from 1 to 0 left to right,
// v from 1 to 0 top to bottom, and clip-space (0,0) interpolates uv =
// (0.5, 0.5). This reproduces the visible quadrant of the original GL quad,
// which was drawn through an ortho(0, 1, 1, 0) projection.
const QUAD_VERTICES: [Vertex; 4] = [
    Vertex { position: [-3.0, -1.0], tex_coords: [2.0, 0.0] },
    Vertex { position: [1.0, -1.0], tex_coords: [0.0, 0.0] },
    Vertex { position: [-3.0, 3.0], tex_coords: [2.0, 2.0] },
    Vertex { position: [1.0, 3.0], tex_coords: [0.0, 2.0] },
];

/// Per-frame uniform block. Layout mirrors the WGSL struct: mat3x3 columns
/// are padded to 16 bytes each.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ProjectionUniforms {
    transform: [[f32; 4]; 3],
    scale: f32,
    aspect: f32,
    _pad: [f32; 2],
}

impl ProjectionUniforms {
    /// Packs orientation, scale and viewport into the GPU layout.
    /// Aspect is height / width; a zero-sized viewport falls back to 1.
    pub fn pack(rotation: Mat3, scale: f32, viewport: (u32, u32)) -> Self {
        let (w, h) = viewport;
        let aspect = if w == 0 || h == 0 {
            1.0
        } else {
            h as f32 / w as f32
        };
        let col = |c: glam::Vec3| [c.x, c.y, c.z, 0.0];
        Self {
            transform: [col(rotation.x_axis), col(rotation.y_axis), col(rotation.z_axis)],
            scale,
            aspect,
            _pad: [0.0; 2],
        }
    }
}

impl Default for ProjectionUniforms {
    fn default() -> Self {
        Self::pack(Mat3::IDENTITY, 1.0, (0, 0))
    }
}

pub struct Renderer {
    surface: wgpu::Surface,
    device: wgpu::Device,
    queue: wgpu::Queue,
    config: wgpu::SurfaceConfiguration,
    pub size: winit::dpi::PhysicalSize<u32>,

    // Scene pipeline, built lazily on the first frame. Stays `None` after a
    // failed build so no frame ever binds a broken program.
    pipeline: Option<wgpu::RenderPipeline>,
    pipeline_failed: bool,

    vertex_buffer: wgpu::Buffer,
    uniform_buffer: wgpu::Buffer,
    uniforms: ProjectionUniforms,

    bind_group_layout: wgpu::BindGroupLayout,
    bind_group: wgpu::BindGroup,
    texture: wgpu::Texture,
    sampler: wgpu::Sampler,

    // UI
    pub egui_ctx: egui::Context,
    pub egui_state: egui_winit::State,
    egui_renderer: egui_wgpu::Renderer,
}

impl Renderer {
    pub async fn new(window: std::sync::Arc<Window>) -> Self {
        let size = window.inner_size();
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let surface = unsafe { instance.create_surface(window.as_ref()) }.unwrap();
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .unwrap();

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    features: wgpu::Features::empty(),
                    limits: wgpu::Limits::default().using_resolution(adapter.limits()),
                    label: None,
                },
                None,
            )
            .await
            .unwrap();

        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .copied()
            .find(|f| f.is_srgb())
            .unwrap_or(surface_caps.formats[0]);

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: wgpu::PresentMode::Fifo,
            alpha_mode: surface_caps.alpha_modes[0],
            view_formats: vec![],
        };
        surface.configure(&device, &config);

        // Neutral gray placeholder until the first image is uploaded, so a
        // failed or absent load still renders a defined surface.
        let texture = create_equirect_texture(&device, 2, 2, "placeholder_texture");
        write_texture_pixels(&queue, &texture, &[96u8; 16], 2, 2);

        // Horizontal repeat for longitude wrap, vertical clamp at the poles.
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            address_mode_u: wgpu::AddressMode::Repeat,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let uniforms = ProjectionUniforms::pack(Mat3::IDENTITY, 1.0, (size.width, size.height));
        let uniform_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("projection_uniforms"),
            contents: bytemuck::cast_slice(&[uniforms]),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("quad_vertices"),
            contents: bytemuck::cast_slice(&QUAD_VERTICES),
            usage: wgpu::BufferUsages::VERTEX,
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        multisampled: false,
                        view_dimension: wgpu::TextureViewDimension::D2,
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
            label: Some("photosphere_bind_group_layout"),
        });

        let bind_group = create_bind_group(
            &device,
            &bind_group_layout,
            &uniform_buffer,
            &texture,
            &sampler,
        );

        let egui_ctx = egui::Context::default();
        let mut egui_state = egui_winit::State::new(window.as_ref());
        egui_state.set_pixels_per_point(window.scale_factor() as f32);
        let egui_renderer = egui_wgpu::Renderer::new(&device, config.format, None, 1);

        Self {
            surface,
            device,
            queue,
            config,
            size,
            pipeline: None,
            pipeline_failed: false,
            vertex_buffer,
            uniform_buffer,
            uniforms,
            bind_group_layout,
            bind_group,
            texture,
            sampler,
            egui_ctx,
            egui_state,
            egui_renderer,
        }
    }

    pub fn resize(&mut self, new_size: winit::dpi::PhysicalSize<u32>) {
        if new_size.width > 0 && new_size.height > 0 {
            self.size = new_size;
            self.config.width = new_size.width;
            self.config.height = new_size.height;
            self.surface.configure(&self.device, &self.config);
        }
    }

    /// The once-per-frame handoff: copies the UI-side snapshot into GPU-side
    /// state. Runs strictly before the corresponding `render_with_ui`.
    pub fn sync(&mut self, snapshot: ViewSnapshot) {
        let uniforms =
            ProjectionUniforms::pack(snapshot.rotation, snapshot.scale, snapshot.viewport);
        if uniforms != self.uniforms {
            self.uniforms = uniforms;
            self.queue
                .write_buffer(&self.uniform_buffer, 0, bytemuck::cast_slice(&[uniforms]));
        }

        if let Some(image) = snapshot.image {
            self.upload_image(image);
        }
    }

    /// Uploads a freshly decoded image, replacing the previous texture. A
    /// degenerate image is rejected and the old texture stays bound.
    fn upload_image(&mut self, image: SourceImage) {
        let (w, h) = image.pixels.dimensions();
        if w == 0 || h == 0 {
            log::warn!("ignoring empty image {:?}", image.path);
            return;
        }

        let max_dim = self.device.limits().max_texture_dimension_2d;
        let pixels = prepare_pixels(image.pixels, max_dim, &image.path);

        let (width, height) = pixels.dimensions();
        self.texture = create_equirect_texture(&self.device, width, height, "equirect_texture");
        write_texture_pixels(&self.queue, &self.texture, &pixels, width, height);

        self.bind_group = create_bind_group(
            &self.device,
            &self.bind_group_layout,
            &self.uniform_buffer,
            &self.texture,
            &self.sampler,
        );
        log::info!("displaying {:?} ({}x{})", image.path, width, height);
    }

    /// Builds the scene pipeline on first use. Compilation runs inside a
    /// validation error scope; on failure the pipeline stays absent and the
    /// scene pass is skipped from then on.
    fn ensure_pipeline(&mut self) {
        if self.pipeline.is_some() || self.pipeline_failed {
            return;
        }

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);

        let shader = self
            .device
            .create_shader_module(wgpu::include_wgsl!("shader_photosphere.wgsl"));
        let layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("photosphere_pipeline_layout"),
                bind_group_layouts: &[&self.bind_group_layout],
                push_constant_ranges: &[],
            });

        let pipeline = self
            .device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some("photosphere_pipeline"),
                layout: Some(&layout),
                vertex: wgpu::VertexState {
                    module: &shader,
                    entry_point: "vs_main",
                    buffers: &[wgpu::VertexBufferLayout {
                        array_stride: std::mem::size_of::<Vertex>() as wgpu::BufferAddress,
                        step_mode: wgpu::VertexStepMode::Vertex,
                        attributes: &wgpu::vertex_attr_array![0 => Float32x2, 1 => Float32x2],
                    }],
                },
                fragment: Some(wgpu::FragmentState {
                    module: &shader,
                    entry_point: "fs_main",
                    targets: &[Some(wgpu::ColorTargetState {
                        format: self.config.format,
                        blend: Some(wgpu::BlendState::REPLACE),
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                }),
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleStrip,
                    strip_index_format: None,
                    front_face: wgpu::FrontFace::Ccw,
                    cull_mode: None,
                    polygon_mode: wgpu::PolygonMode::Fill,
                    unclipped_depth: false,
                    conservative: false,
                },
                depth_stencil: None,
                multisample: wgpu::MultisampleState {
                    count: 1,
                    mask: !0,
                    alpha_to_coverage_enabled: false,
                },
                multiview: None,
            });

        match pollster::block_on(self.device.pop_error_scope()) {
            None => self.pipeline = Some(pipeline),
            Some(err) => {
                log::error!("photosphere pipeline failed to build: {err}");
                self.pipeline_failed = true;
            }
        }
    }

    pub fn render_with_ui(
        &mut self,
        window: &Window,
        run_ui: impl FnOnce(&egui::Context),
    ) -> Result<(), wgpu::SurfaceError> {
        self.ensure_pipeline();

        let output = self.surface.get_current_texture()?;
        let view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("photosphere_encoder"),
            });

        // Scene pass: clear, then draw the projected sphere if the pipeline
        // is usable.
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("scene_pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: true,
                    },
                })],
                depth_stencil_attachment: None,
            });

            if let Some(pipeline) = &self.pipeline {
                pass.set_pipeline(pipeline);
                pass.set_bind_group(0, &self.bind_group, &[]);
                pass.set_vertex_buffer(0, self.vertex_buffer.slice(..));
                pass.draw(0..QUAD_VERTICES.len() as u32, 0..1);
            }
        }

        // UI pass on top.
        let raw_input = self.egui_state.take_egui_input(window);
        let full_output = self.egui_ctx.run(raw_input, run_ui);
        self.egui_state
            .handle_platform_output(window, &self.egui_ctx, full_output.platform_output);
        let clipped_primitives = self.egui_ctx.tessellate(full_output.shapes);

        let screen_descriptor = egui_wgpu::renderer::ScreenDescriptor {
            size_in_pixels: [self.config.width, self.config.height],
            pixels_per_point: window.scale_factor() as f32,
        };

        for (id, delta) in &full_output.textures_delta.set {
            self.egui_renderer
                .update_texture(&self.device, &self.queue, *id, delta);
        }
        self.egui_renderer.update_buffers(
            &self.device,
            &self.queue,
            &mut encoder,
            &clipped_primitives,
            &screen_descriptor,
        );

        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("ui_pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: true,
                    },
                })],
                depth_stencil_attachment: None,
            });
            self.egui_renderer
                .render(&mut pass, &clipped_primitives, &screen_descriptor);
        }

        for id in &full_output.textures_delta.free {
            self.egui_renderer.free_texture(id);
        }

        self.queue.submit(std::iter::once(encoder.finish()));
        output.present();

        Ok(())
    }
}

/// Shapes decoded pixels for upload: downscales anything beyond the
/// adapter's 2D texture limit, then mirrors the rows vertically — the same
/// mirror the original applied at texture creation, so v = 1 (screen top at
/// identity orientation) reads the image's top rows.
fn prepare_pixels(
    pixels: image::RgbaImage,
    max_dim: u32,
    path: &std::path::Path,
) -> image::RgbaImage {
    let (w, h) = pixels.dimensions();
    let mut pixels = if w > max_dim || h > max_dim {
        let scale = max_dim as f32 / w.max(h) as f32;
        let new_w = ((w as f32 * scale) as u32).max(1);
        let new_h = ((h as f32 * scale) as u32).max(1);
        log::warn!(
            "{:?} is {}x{}, above the {} texture limit; downscaling to {}x{}",
            path,
            w,
            h,
            max_dim,
            new_w,
            new_h
        );
        image::DynamicImage::ImageRgba8(pixels)
            .resize(new_w, new_h, image::imageops::FilterType::Lanczos3)
            .to_rgba8()
    } else {
        pixels
    };

    image::imageops::flip_vertical_in_place(&mut pixels);
    pixels
}

fn create_equirect_texture(
    device: &wgpu::Device,
    width: u32,
    height: u32,
    label: &str,
) -> wgpu::Texture {
    device.create_texture(&wgpu::TextureDescriptor {
        size: wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: wgpu::TextureFormat::Rgba8UnormSrgb,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        label: Some(label),
        view_formats: &[],
    })
}

fn write_texture_pixels(
    queue: &wgpu::Queue,
    texture: &wgpu::Texture,
    pixels: &[u8],
    width: u32,
    height: u32,
) {
    queue.write_texture(
        wgpu::ImageCopyTexture {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        pixels,
        wgpu::ImageDataLayout {
            offset: 0,
            bytes_per_row: Some(4 * width),
            rows_per_image: Some(height),
        },
        wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
    );
}

fn create_bind_group(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
    uniform_buffer: &wgpu::Buffer,
    texture: &wgpu::Texture,
    sampler: &wgpu::Sampler,
) -> wgpu::BindGroup {
    let texture_view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        layout,
        entries: &[
            wgpu::BindGroupEntry {
                binding: 0,
                resource: uniform_buffer.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: wgpu::BindingResource::TextureView(&texture_view),
            },
            wgpu::BindGroupEntry {
                binding: 2,
                resource: wgpu::BindingResource::Sampler(sampler),
            },
        ],
        label: Some("photosphere_bind_group"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn uniform_block_matches_wgsl_layout() {
        // mat3x3<f32> (3 padded columns) + scale + aspect + vec2 pad = 64.
        assert_eq!(std::mem::size_of::<ProjectionUniforms>(), 64);
    }

    #[test]
    fn pack_uses_height_over_width_aspect() {
        let u = ProjectionUniforms::pack(Mat3::IDENTITY, 1.0, (800, 400));
        assert_relative_eq!(u.aspect, 0.5);

        let u = ProjectionUniforms::pack(Mat3::IDENTITY, 1.0, (0, 400));
        assert_relative_eq!(u.aspect, 1.0);
    }

    #[test]
    fn pack_writes_rotation_columns_with_zero_pad() {
        let rot = Mat3::from_rotation_z(0.5);
        let u = ProjectionUniforms::pack(rot, 2.0, (100, 100));
        for (packed, col) in u.transform.iter().zip([rot.x_axis, rot.y_axis, rot.z_axis]) {
            assert_relative_eq!(packed[0], col.x);
            assert_relative_eq!(packed[1], col.y);
            assert_relative_eq!(packed[2], col.z);
            assert_relative_eq!(packed[3], 0.0);
        }
        assert_relative_eq!(u.scale, 2.0);
    }

    #[test]
    fn quad_texcoords_span_zero_to_two() {
        let max_u = QUAD_VERTICES
            .iter()
            .map(|v| v.tex_coords[0])
            .fold(0.0, f32::max);
        let max_v = QUAD_VERTICES
            .iter()
            .map(|v| v.tex_coords[1])
            .fold(0.0, f32::max);
        assert_eq!(max_u, 2.0);
        assert_eq!(max_v, 2.0);
    }

    /// Texcoords interpolated across the quad at a clip-space point. The
    /// quad is axis aligned with u linear in x and v linear in y, so
    /// bilinear interpolation reduces to two lerps between opposite corners.
    fn interpolated_uv(x: f32, y: f32) -> (f32, f32) {
        let lo = QUAD_VERTICES[0];
        let hi = QUAD_VERTICES[3];
        let tx = (x - lo.position[0]) / (hi.position[0] - lo.position[0]);
        let ty = (y - lo.position[1]) / (hi.position[1] - lo.position[1]);
        (
            lo.tex_coords[0] + tx * (hi.tex_coords[0] - lo.tex_coords[0]),
            lo.tex_coords[1] + ty * (hi.tex_coords[1] - lo.tex_coords[1]),
        )
    }

    #[test]
    fn screen_center_interpolates_projection_center() {
        // Clip-space (0,0) must see uv = (0.5, 0.5), i.e. p = 0 in the
        // fragment shader: the projection pole sits at screen center.
        let (u, v) = interpolated_uv(0.0, 0.0);
        assert_relative_eq!(u, 0.5);
        assert_relative_eq!(v, 0.5);
    }

    #[test]
    fn viewport_sees_unit_uv_range_with_u_falling_left_to_right() {
        let (u_left, v_bottom) = interpolated_uv(-1.0, -1.0);
        let (u_right, v_top) = interpolated_uv(1.0, 1.0);
        assert_relative_eq!(u_left, 1.0);
        assert_relative_eq!(u_right, 0.0);
        assert_relative_eq!(v_bottom, 0.0);
        assert_relative_eq!(v_top, 1.0);
    }

    #[test]
    fn prepare_mirrors_rows_vertically() {
        let mut img = image::RgbaImage::new(2, 2);
        img.put_pixel(0, 0, image::Rgba([255, 0, 0, 255]));
        img.put_pixel(1, 0, image::Rgba([255, 0, 0, 255]));
        img.put_pixel(0, 1, image::Rgba([0, 0, 255, 255]));
        img.put_pixel(1, 1, image::Rgba([0, 0, 255, 255]));

        let out = prepare_pixels(img, 4096, std::path::Path::new("test.png"));
        assert_eq!(out.get_pixel(0, 0), &image::Rgba([0, 0, 255, 255]));
        assert_eq!(out.get_pixel(0, 1), &image::Rgba([255, 0, 0, 255]));
    }

    #[test]
    fn prepare_downscales_to_the_texture_limit() {
        let img = image::RgbaImage::new(8, 4);
        let out = prepare_pixels(img, 4, std::path::Path::new("big.png"));
        assert_eq!(out.dimensions(), (4, 2));
    }
}
